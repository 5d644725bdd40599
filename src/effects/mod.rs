//! Per-program effects chain applied to interleaved stereo i16 audio in
//! the audio callback.
//!
//! Stage order is fixed: distortion -> filter -> EQ -> compressor -> delay.
//! Every stage is skipped when its `enabled` bit is clear. `process` is
//! allocation-free: all DSP state lives in the `EffectsChain` itself.

mod compressor;
mod delay;
mod distortion;
mod eq;
mod filter;

use compressor::Compressor;
use delay::Delay;
use distortion::Distortion;
use eq::Eq3Band;
use filter::SvfFilter;

fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

fn i16_to_f32(s: i16) -> f32 {
    s as f32 / 32768.0
}

fn f32_to_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// One instance's full DSP state and parameters for all five stages. Never
/// shared between master and per-program chains.
#[derive(Clone)]
pub struct EffectsChain {
    distortion: Distortion,
    filter: SvfFilter,
    eq: Eq3Band,
    compressor: Compressor,
    delay: Delay,
}

impl Default for EffectsChain {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectsChain {
    pub fn new() -> Self {
        EffectsChain {
            distortion: Distortion::default(),
            filter: SvfFilter::default(),
            eq: Eq3Band::default(),
            compressor: Compressor::default(),
            delay: Delay::default(),
        }
    }

    /// Zeros all DSP state (filter memories, delay buffers, envelope
    /// followers, RMS accumulators) but preserves every parameter value.
    pub fn reset(&mut self) {
        self.distortion.reset();
        self.filter.reset();
        self.eq.reset();
        self.compressor.reset();
        self.delay.reset();
    }

    pub fn distortion_mut(&mut self) -> &mut Distortion {
        &mut self.distortion
    }
    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }
    pub fn filter_mut(&mut self) -> &mut SvfFilter {
        &mut self.filter
    }
    pub fn filter(&self) -> &SvfFilter {
        &self.filter
    }
    pub fn eq_mut(&mut self) -> &mut Eq3Band {
        &mut self.eq
    }
    pub fn eq(&self) -> &Eq3Band {
        &self.eq
    }
    pub fn compressor_mut(&mut self) -> &mut Compressor {
        &mut self.compressor
    }
    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }
    pub fn delay_mut(&mut self) -> &mut Delay {
        &mut self.delay
    }
    pub fn delay(&self) -> &Delay {
        &self.delay
    }

    /// Processes `frames` stereo frames (2 * frames i16 samples) of
    /// interleaved audio in place. Allocation-free.
    pub fn process(&mut self, buffer: &mut [i16], frames: usize, sample_rate: f32) {
        debug_assert!(buffer.len() >= frames * 2);
        for i in 0..frames {
            let li = i * 2;
            let ri = li + 1;
            let mut l = i16_to_f32(buffer[li]);
            let mut r = i16_to_f32(buffer[ri]);

            if self.distortion.enabled {
                let (nl, nr) = self.distortion.process(l, r, sample_rate);
                l = nl;
                r = nr;
            }
            if self.filter.enabled {
                let (nl, nr) = self.filter.process(l, r, sample_rate);
                l = nl;
                r = nr;
            }
            if self.eq.enabled {
                let (nl, nr) = self.eq.process(l, r, sample_rate);
                l = nl;
                r = nr;
            }
            if self.compressor.enabled {
                let (nl, nr) = self.compressor.process(l, r, sample_rate);
                l = nl;
                r = nr;
            }
            if self.delay.enabled {
                let (nl, nr) = self.delay.process(l, r, sample_rate);
                l = nl;
                r = nr;
            }

            buffer[li] = f32_to_i16(l);
            buffer[ri] = f32_to_i16(r);
        }
    }
}

pub use compressor::CompressorParams;
pub use delay::DelayParams;
pub use distortion::DistortionParams;
pub use eq::EqParams;
pub use filter::FilterParams;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_chain_is_a_passthrough() {
        let mut fx = EffectsChain::new();
        let mut buf = vec![1000i16, -1000, 2000, -2000];
        let orig = buf.clone();
        fx.process(&mut buf, 2, 48_000.0);
        assert_eq!(buf, orig);
    }

    #[test]
    fn reset_clears_state_not_params() {
        let mut fx = EffectsChain::new();
        fx.delay_mut().set_enabled(true);
        fx.delay_mut().set_time(0.1);
        fx.delay_mut().set_feedback(0.3);
        let mut buf = vec![20000i16, 20000];
        fx.process(&mut buf, 1, 48_000.0);
        fx.reset();
        assert_eq!(fx.delay().time(), 0.1);
        assert_eq!(fx.delay().feedback(), 0.3);
    }
}
