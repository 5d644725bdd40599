//! Chamberlin state-variable filter, lowpass output only. Run
//! independently on each channel so stereo imaging is preserved.

use super::clamp01;

#[derive(Debug, Clone, Copy)]
pub struct FilterParams {
    pub cutoff: f32,
    pub resonance: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            cutoff: 0.5,
            resonance: 0.2,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Channel {
    low: f32,
    band: f32,
}

impl Channel {
    fn reset(&mut self) {
        self.low = 0.0;
        self.band = 0.0;
    }
}

/// Two independent Chamberlin SVFs (one per channel) sharing one set of
/// parameters. Coefficients are recomputed every sample from `cutoff` and
/// `resonance` since both may change between calls to `process`.
#[derive(Debug, Clone, Default)]
pub struct SvfFilter {
    pub enabled: bool,
    params: FilterParams,
    left: Channel,
    right: Channel,
}

impl SvfFilter {
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn params(&self) -> FilterParams {
        self.params
    }

    /// Stores the raw normalized value; `process` maps it to Hz as
    /// `cutoff * nyquist * 0.48`.
    pub fn set_cutoff(&mut self, cutoff: f32) {
        self.params.cutoff = clamp01(cutoff);
    }

    pub fn set_resonance(&mut self, resonance: f32) {
        self.params.resonance = clamp01(resonance);
    }

    fn tick(chan: &mut Channel, input: f32, f: f32, q: f32) -> f32 {
        let high = input - chan.low - q * chan.band;
        chan.band += f * high;
        chan.low += f * chan.band;
        chan.low
    }

    pub fn process(&mut self, l: f32, r: f32, sample_rate: f32) -> (f32, f32) {
        let nyquist = sample_rate * 0.5;
        let freq = self.params.cutoff * nyquist * 0.48;
        let f = 2.0 * (std::f32::consts::PI * freq / sample_rate).sin();
        let q = (0.7 - self.params.resonance * 0.6).max(0.1);
        let ol = Self::tick(&mut self.left, l, f, q);
        let or = Self::tick(&mut self.right, r, f, q);
        (ol, or)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_is_silence_out() {
        let mut f = SvfFilter::default();
        f.set_enabled(true);
        let (l, r) = f.process(0.0, 0.0, 48_000.0);
        assert_eq!(l, 0.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn lowpass_attenuates_a_dc_step_slower_than_instant() {
        let mut f = SvfFilter::default();
        f.set_cutoff(0.1);
        let (out, _) = f.process(1.0, 1.0, 48_000.0);
        assert!(out < 1.0);
        assert!(out > 0.0);
    }

    #[test]
    fn setters_store_the_clamped_normalized_value() {
        let mut f = SvfFilter::default();
        f.set_cutoff(2.0);
        f.set_resonance(-1.0);
        assert_eq!(f.params().cutoff, 1.0);
        assert_eq!(f.params().resonance, 0.0);
    }

    #[test]
    fn reset_zeroes_state_but_keeps_params() {
        let mut f = SvfFilter::default();
        f.set_cutoff(0.2);
        f.process(1.0, 1.0, 48_000.0);
        f.reset();
        assert_eq!(f.left.low, 0.0);
        assert_eq!(f.params().cutoff, 0.2);
    }
}
