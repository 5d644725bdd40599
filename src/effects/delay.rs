//! Stereo delay line, final stage of the chain. Each channel gets its own
//! ring buffer so cross-channel feedback never enters the picture.

use super::clamp01;

/// One second at the engine's nominal 48kHz sample rate. Buffers are sized
/// to this regardless of the actual sample rate passed to `process`, so the
/// delay time control simply clamps rather than reallocating.
pub const MAX_DELAY_SAMPLES: usize = 48_000;

/// Safety scaling applied to the stored `feedback` parameter when deriving
/// the actual ring-buffer feedback coefficient, keeping the loop just shy
/// of unity even when the knob is all the way up.
const FEEDBACK_SAFETY_SCALE: f32 = 0.98;

#[derive(Debug, Clone, Copy)]
pub struct DelayParams {
    /// Fraction of the 1-second buffer capacity, `[0, 1]`.
    pub time: f32,
    pub feedback: f32,
    pub mix: f32,
}

impl Default for DelayParams {
    fn default() -> Self {
        DelayParams {
            time: 0.25,
            feedback: 0.3,
            mix: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
struct Line {
    buf: Vec<f32>,
    pos: usize,
}

impl Line {
    fn new() -> Self {
        Line {
            buf: vec![0.0; MAX_DELAY_SAMPLES],
            pos: 0,
        }
    }

    fn reset(&mut self) {
        self.buf.iter_mut().for_each(|s| *s = 0.0);
        self.pos = 0;
    }

    fn tick(&mut self, input: f32, delay_samples: usize, feedback: f32) -> f32 {
        let read_pos = (self.pos + MAX_DELAY_SAMPLES - delay_samples) % MAX_DELAY_SAMPLES;
        let delayed = self.buf[read_pos];
        self.buf[self.pos] = input + delayed * feedback;
        self.pos = (self.pos + 1) % MAX_DELAY_SAMPLES;
        delayed
    }
}

#[derive(Debug, Clone)]
pub struct Delay {
    pub enabled: bool,
    params: DelayParams,
    left: Line,
    right: Line,
}

impl Default for Delay {
    fn default() -> Self {
        Delay {
            enabled: false,
            params: DelayParams::default(),
            left: Line::new(),
            right: Line::new(),
        }
    }
}

impl Delay {
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn time(&self) -> f32 {
        self.params.time
    }

    pub fn feedback(&self) -> f32 {
        self.params.feedback
    }

    pub fn mix(&self) -> f32 {
        self.params.mix
    }

    pub fn set_time(&mut self, v: f32) {
        self.params.time = clamp01(v);
    }

    pub fn set_feedback(&mut self, v: f32) {
        self.params.feedback = clamp01(v);
    }

    pub fn set_mix(&mut self, v: f32) {
        self.params.mix = clamp01(v);
    }

    pub fn process(&mut self, l: f32, r: f32, _sample_rate: f32) -> (f32, f32) {
        // `time` is a fraction of the fixed 1-second buffer capacity, so the
        // sample count it maps to doesn't depend on the actual sample rate.
        let delay_samples =
            ((self.params.time * MAX_DELAY_SAMPLES as f32) as usize).clamp(1, MAX_DELAY_SAMPLES - 1);
        let feedback = self.params.feedback * FEEDBACK_SAFETY_SCALE;
        let dl = self.left.tick(l, delay_samples, feedback);
        let dr = self.right.tick(r, delay_samples, feedback);
        let mix = self.params.mix;
        (l + (dl - l) * mix, r + (dr - r) * mix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_stays_silent() {
        let mut d = Delay::default();
        d.set_enabled(true);
        let (l, r) = d.process(0.0, 0.0, 48_000.0);
        assert_eq!(l, 0.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn an_impulse_reappears_after_the_delay_time() {
        let mut d = Delay::default();
        d.set_enabled(true);
        d.set_time(0.001);
        d.set_mix(1.0);
        d.set_feedback(0.0);
        let delay_samples = (0.001 * 48_000.0) as usize;

        d.process(1.0, 1.0, 48_000.0);
        let mut saw_echo = false;
        for _ in 0..delay_samples {
            let (l, _) = d.process(0.0, 0.0, 48_000.0);
            if l > 0.5 {
                saw_echo = true;
            }
        }
        assert!(saw_echo);
    }

    #[test]
    fn feedback_setter_stores_the_raw_clamped_value() {
        let mut d = Delay::default();
        d.set_feedback(1.0);
        assert_eq!(d.feedback(), 1.0);
        d.set_feedback(-1.0);
        assert_eq!(d.feedback(), 0.0);
    }

    #[test]
    fn time_setter_stores_the_raw_clamped_value() {
        let mut d = Delay::default();
        d.set_time(2.0);
        assert_eq!(d.time(), 1.0);
        d.set_time(-1.0);
        assert_eq!(d.time(), 0.0);
    }

    #[test]
    fn feedback_safety_scale_keeps_the_loop_below_unity_at_full_knob() {
        let mut d = Delay::default();
        d.set_enabled(true);
        d.set_time(0.01);
        d.set_mix(1.0);
        d.set_feedback(1.0);
        let mut last = 0.0f32;
        for _ in 0..20_000 {
            let (l, _) = d.process(1.0, 1.0, 48_000.0);
            last = l;
        }
        assert!(last.is_finite());
        assert!(last.abs() < 1000.0);
    }
}
