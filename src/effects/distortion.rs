//! Waveshaping distortion. First stage of the chain, so its output drives
//! everything downstream of it. Aimed at 909-style kicks: pre-emphasis into
//! a resonant bump, dynamic drive keyed off an envelope follower, asymmetric
//! soft clip, then a post-filter to tame the fold-back harmonics.

use super::clamp01;

const HIGHPASS_HZ: f32 = 80.0;
const BANDPASS_HZ: f32 = 120.0;
const LOWPASS_HZ: f32 = 8_000.0;
const ENV_ATTACK: f32 = 0.9;
const ENV_RELEASE: f32 = 0.001;

#[derive(Debug, Clone, Copy)]
pub struct DistortionParams {
    pub drive: f32,
    pub mix: f32,
}

impl Default for DistortionParams {
    fn default() -> Self {
        DistortionParams {
            drive: 0.0,
            mix: 1.0,
        }
    }
}

/// One channel's worth of DSP memory: the pre-emphasis highpass, the
/// resonant bandpass bump (a small state-variable filter), the envelope
/// follower, and the post lowpass.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    hp_prev_in: f32,
    hp_prev_out: f32,
    bp_low: f32,
    bp_band: f32,
    envelope: f32,
    lp_prev_out: f32,
}

impl ChannelState {
    fn reset(&mut self) {
        *self = ChannelState::default();
    }

    fn highpass(&mut self, x: f32, coeff: f32) -> f32 {
        let y = coeff * (self.hp_prev_out + x - self.hp_prev_in);
        self.hp_prev_in = x;
        self.hp_prev_out = y;
        y
    }

    /// Chamberlin SVF bandpass tap, fixed resonance.
    fn bandpass_bump(&mut self, x: f32, f: f32, q: f32) -> f32 {
        self.bp_low += f * self.bp_band;
        let high = x - self.bp_low - q * self.bp_band;
        self.bp_band += f * high;
        self.bp_band
    }

    fn follow_envelope(&mut self, x: f32) {
        let mag = x.abs();
        let coeff = if mag > self.envelope { ENV_ATTACK } else { ENV_RELEASE };
        self.envelope += coeff * (mag - self.envelope);
    }

    fn lowpass(&mut self, x: f32, coeff: f32) -> f32 {
        let y = self.lp_prev_out + coeff * (x - self.lp_prev_out);
        self.lp_prev_out = y;
        y
    }
}

/// Asymmetric waveshaper: pre-emphasis, envelope-tracked dynamic drive,
/// foldback clip, asymmetric soft clip, post-filter.
#[derive(Debug, Clone, Default)]
pub struct Distortion {
    pub enabled: bool,
    params: DistortionParams,
    left: ChannelState,
    right: ChannelState,
}

impl Distortion {
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    pub fn params(&self) -> DistortionParams {
        self.params
    }

    pub fn set_drive(&mut self, drive: f32) {
        self.params.drive = clamp01(drive);
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.params.mix = clamp01(mix);
    }

    fn shape_channel(state: &mut ChannelState, x: f32, drive: f32, sample_rate: f32) -> f32 {
        let hp_coeff = hp_coefficient(HIGHPASS_HZ, sample_rate);
        let pre = state.highpass(x, hp_coeff);

        let (f, q) = svf_coefficients(BANDPASS_HZ, sample_rate);
        let bump = state.bandpass_bump(pre, f, q);
        let boosted = pre + bump * 0.5;

        state.follow_envelope(boosted);

        let base_drive = 1.0 + drive * 7.0;
        let dynamic_drive = base_drive * (0.7 + state.envelope * 0.6);

        let driven = (boosted * dynamic_drive).clamp(-1.0, 1.0);
        let shaped = if driven > 0.0 {
            (1.5 * driven).tanh()
        } else {
            (0.5 * driven).tanh()
        };

        let lp_coeff = lp_coefficient(LOWPASS_HZ, sample_rate);
        state.lowpass(shaped, lp_coeff)
    }

    pub fn process(&mut self, l: f32, r: f32, sample_rate: f32) -> (f32, f32) {
        let drive = self.params.drive;
        let wet_l = Self::shape_channel(&mut self.left, l, drive, sample_rate);
        let wet_r = Self::shape_channel(&mut self.right, r, drive, sample_rate);
        let mix = self.params.mix;
        (l + (wet_l - l) * mix, r + (wet_r - r) * mix)
    }
}

fn hp_coefficient(cutoff_hz: f32, sample_rate: f32) -> f32 {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / sample_rate;
    rc / (rc + dt)
}

fn lp_coefficient(cutoff_hz: f32, sample_rate: f32) -> f32 {
    let dt = 1.0 / sample_rate;
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    dt / (rc + dt)
}

fn svf_coefficients(freq_hz: f32, sample_rate: f32) -> (f32, f32) {
    let f = 2.0 * (std::f32::consts::PI * freq_hz / sample_rate).sin();
    (f, 0.5)
}
