//! RMS-detector soft-knee compressor with makeup gain. Runs a shared
//! envelope across both channels so stereo material doesn't pump unevenly
//! left-to-right.
//!
//! Every parameter is stored as the raw normalized `[0, 1]` value passed to
//! its setter; the musical units (ms, ratio, linear level) are derived at
//! use time.

use super::clamp01;

/// Fixed one-pole coefficient for the RMS detector, independent of attack
/// and release (those shape the gain-smoothing stage, not the detector).
const RMS_ALPHA: f32 = 0.01;

#[derive(Debug, Clone, Copy)]
pub struct CompressorParams {
    pub threshold: f32,
    pub ratio: f32,
    pub attack: f32,
    pub release: f32,
    pub makeup: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        CompressorParams {
            threshold: 0.7,
            ratio: 0.16,
            attack: 0.19,
            release: 0.18,
            makeup: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compressor {
    pub enabled: bool,
    params: CompressorParams,
    rms_sq: f32,
    gain_smoothed: f32,
}

impl Default for Compressor {
    fn default() -> Self {
        Compressor {
            enabled: false,
            params: CompressorParams::default(),
            rms_sq: 0.0,
            gain_smoothed: 1.0,
        }
    }
}

impl Compressor {
    pub fn reset(&mut self) {
        self.rms_sq = 0.0;
        self.gain_smoothed = 1.0;
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn params(&self) -> CompressorParams {
        self.params
    }

    pub fn set_threshold(&mut self, v: f32) {
        self.params.threshold = clamp01(v);
    }

    pub fn set_ratio(&mut self, v: f32) {
        self.params.ratio = clamp01(v);
    }

    pub fn set_attack(&mut self, v: f32) {
        self.params.attack = clamp01(v);
    }

    pub fn set_release(&mut self, v: f32) {
        self.params.release = clamp01(v);
    }

    pub fn set_makeup(&mut self, v: f32) {
        self.params.makeup = clamp01(v);
    }

    fn threshold_level(&self) -> f32 {
        0.01 + self.params.threshold * 0.49
    }

    fn ratio(&self) -> f32 {
        1.0 + self.params.ratio * 19.0
    }

    fn attack_ms(&self) -> f32 {
        0.5 + self.params.attack * 49.5
    }

    fn release_ms(&self) -> f32 {
        10.0 + self.params.release * 490.0
    }

    fn makeup_linear(&self) -> f32 {
        8f32.powf((self.params.makeup - 0.5) * 2.0)
    }

    /// Static gain-reduction curve: unity below the knee's lower edge, full
    /// ratio above its upper edge, a smoothstep blend in between. Knee
    /// width is fixed at 10% of the threshold, not a free parameter.
    fn gain_reduction(&self, level: f32) -> f32 {
        let t = self.threshold_level();
        let ratio = self.ratio();
        let knee = (t * 0.1).max(1e-4);
        let lower = t - knee * 0.5;
        let upper = t + knee * 0.5;

        if level <= lower || level <= 1e-9 {
            return 1.0;
        }

        let db = |x: f32| 20.0 * x.max(1e-9).log10();
        let level_db = db(level);
        let thresh_db = db(t);
        let over_db = level_db - thresh_db;

        let gain_db = if level >= upper {
            over_db - over_db / ratio
        } else {
            let x = ((level - lower) / (upper - lower)).clamp(0.0, 1.0);
            let knee_frac = x * x * (3.0 - 2.0 * x);
            let soft_over = over_db * knee_frac;
            soft_over - soft_over / ratio
        };

        10f32.powf(-gain_db.max(0.0) / 20.0)
    }

    pub fn process(&mut self, l: f32, r: f32, sample_rate: f32) -> (f32, f32) {
        let level_sq = (l * l + r * r) * 0.5;
        self.rms_sq += RMS_ALPHA * (level_sq - self.rms_sq);
        let rms = self.rms_sq.max(0.0).sqrt();

        let target_gain = self.gain_reduction(rms);
        let coeff = if target_gain < self.gain_smoothed {
            time_coeff(self.attack_ms(), sample_rate)
        } else {
            time_coeff(self.release_ms(), sample_rate)
        };
        self.gain_smoothed += (target_gain - self.gain_smoothed) * coeff;

        let gain = self.gain_smoothed * self.makeup_linear();
        (l * gain, r * gain)
    }
}

fn time_coeff(time_ms: f32, sample_rate: f32) -> f32 {
    let samples = (time_ms / 1000.0) * sample_rate;
    1.0 - (-1.0 / samples.max(1.0)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_is_untouched() {
        let mut c = Compressor::default();
        c.set_enabled(true);
        c.set_threshold(0.8);
        c.set_makeup(0.5); // unity makeup
        let mut last = (0.0, 0.0);
        for _ in 0..6000 {
            last = c.process(0.05, 0.05, 48_000.0);
        }
        assert!((last.0 - 0.05).abs() < 1e-3);
        assert!((last.1 - 0.05).abs() < 1e-3);
    }

    #[test]
    fn above_threshold_reduces_gain_over_time() {
        let mut c = Compressor::default();
        c.set_enabled(true);
        c.set_threshold(0.1);
        c.set_ratio(1.0);
        c.set_makeup(0.5);
        let mut last = (0.0, 0.0);
        for _ in 0..4000 {
            last = c.process(0.9, 0.9, 48_000.0);
        }
        assert!(last.0 < 0.9);
    }

    #[test]
    fn makeup_gain_scales_output_at_max() {
        let mut c = Compressor::default();
        c.set_enabled(true);
        c.set_makeup(1.0);
        assert!((c.makeup_linear() - 8.0).abs() < 1e-4);
    }

    #[test]
    fn setters_store_the_clamped_normalized_value_not_mapped_units() {
        let mut c = Compressor::default();
        c.set_ratio(2.0); // out of range, clamps to 1.0
        c.set_attack(-1.0);
        assert_eq!(c.params().ratio, 1.0);
        assert_eq!(c.params().attack, 0.0);
    }

    #[test]
    fn reset_clears_envelope() {
        let mut c = Compressor::default();
        c.set_enabled(true);
        for _ in 0..500 {
            c.process(0.9, 0.9, 48_000.0);
        }
        assert!(c.rms_sq > 0.0);
        assert!(c.gain_smoothed < 1.0);
        c.reset();
        assert_eq!(c.rms_sq, 0.0);
        assert_eq!(c.gain_smoothed, 1.0);
    }
}
