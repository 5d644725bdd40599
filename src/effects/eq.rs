//! Three-band EQ: fixed-crossover low/mid/high split, each band independently
//! gained. Crossovers are first-order Chamberlin-style splits reusing the
//! same state-variable topology as the filter stage, just fixed to low/high
//! pass at the two crossover frequencies.

use super::clamp01;

const LOW_CROSSOVER_HZ: f32 = 250.0;
const HIGH_CROSSOVER_HZ: f32 = 6000.0;

#[derive(Debug, Clone, Copy)]
pub struct EqParams {
    /// Each in [0, 1]; 0.5 is unity gain.
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl Default for EqParams {
    fn default() -> Self {
        EqParams {
            low: 0.5,
            mid: 0.5,
            high: 0.5,
        }
    }
}

/// Maps a [0,1] knob position to a gain multiplier, matching the pad-gain
/// curve used elsewhere in the engine: unity at the midpoint, roughly
/// +/-12dB at the extremes.
fn gain_for(knob: f32) -> f32 {
    4f32.powf((knob - 0.5) * 2.0)
}

#[derive(Debug, Clone, Default)]
struct SplitState {
    low: f32,
    band: f32,
}

#[derive(Debug, Clone, Default)]
struct ChannelState {
    low_split: SplitState,
    high_split: SplitState,
}

/// Splits the signal into three bands via two cascaded SVF splits (a low
/// crossover and a high crossover), applies per-band gain, and sums.
#[derive(Debug, Clone, Default)]
pub struct Eq3Band {
    pub enabled: bool,
    params: EqParams,
    left: ChannelState,
    right: ChannelState,
}

impl Eq3Band {
    pub fn reset(&mut self) {
        self.left = ChannelState::default();
        self.right = ChannelState::default();
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn params(&self) -> EqParams {
        self.params
    }

    pub fn set_low(&mut self, v: f32) {
        self.params.low = clamp01(v);
    }
    pub fn set_mid(&mut self, v: f32) {
        self.params.mid = clamp01(v);
    }
    pub fn set_high(&mut self, v: f32) {
        self.params.high = clamp01(v);
    }

    fn split(state: &mut SplitState, input: f32, f: f32) -> (f32, f32) {
        // Chamberlin SVF with fixed, near-critical damping, used purely as a
        // crossover rather than a resonant filter.
        let high = input - state.low - 1.4 * state.band;
        state.band += f * high;
        state.low += f * state.band;
        (state.low, high)
    }

    fn process_channel(&self, state: &mut ChannelState, input: f32, sample_rate: f32) -> f32 {
        let f_low = 2.0 * (std::f32::consts::PI * LOW_CROSSOVER_HZ / sample_rate).sin();
        let f_high = 2.0 * (std::f32::consts::PI * HIGH_CROSSOVER_HZ / sample_rate).sin();

        let (low_band, rest) = Self::split(&mut state.low_split, input, f_low);
        let (mid_band, high_band) = Self::split(&mut state.high_split, rest, f_high);

        low_band * gain_for(self.params.low)
            + mid_band * gain_for(self.params.mid)
            + high_band * gain_for(self.params.high)
    }

    pub fn process(&mut self, l: f32, r: f32, sample_rate: f32) -> (f32, f32) {
        let mut left = std::mem::take(&mut self.left);
        let mut right = std::mem::take(&mut self.right);
        let ol = self.process_channel(&mut left, l, sample_rate);
        let or = self.process_channel(&mut right, r, sample_rate);
        self.left = left;
        self.right = right;
        (ol, or)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_gain_on_all_bands_is_near_passthrough() {
        let mut eq = Eq3Band::default();
        eq.set_enabled(true);
        // warm up the split filters so low+mid+high reconstructs the input
        let mut last = (0.0, 0.0);
        for _ in 0..2000 {
            last = eq.process(1.0, -1.0, 48_000.0);
        }
        assert!((last.0 - 1.0).abs() < 0.05);
        assert!((last.1 + 1.0).abs() < 0.05);
    }

    #[test]
    fn gain_curve_midpoint_is_unity() {
        assert!((gain_for(0.5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn gain_curve_is_monotonic() {
        assert!(gain_for(0.0) < gain_for(0.5));
        assert!(gain_for(0.5) < gain_for(1.0));
    }
}
