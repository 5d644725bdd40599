//! The input router. Translates raw MIDI CC/note and keyboard events into
//! the engine's closed `Action` set via three lookup tables.

pub mod ini;

/// Default threshold at which a button/trigger-style MIDI mapping fires.
pub const DEFAULT_THRESHOLD: i32 = 64;

pub const TRIGGER_PAD_COUNT: usize = 16;

/// The closed set of actions the input router can produce. Every variant
/// has a stable textual name (`Action::name`) used by the persistence
/// format and the reverse lookup (`Action::parse`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    None,
    Quit,
    FilePrev,
    FileNext,
    FileLoad,
    FileLoadByName,
    FxDistortionDrive,
    FxDistortionMix,
    FxDistortionToggle,
    FxFilterCutoff,
    FxFilterResonance,
    FxFilterToggle,
    FxEqLow,
    FxEqMid,
    FxEqHigh,
    FxEqToggle,
    FxCompressorThreshold,
    FxCompressorRatio,
    FxCompressorToggle,
    FxDelayTime,
    FxDelayFeedback,
    FxDelayMix,
    FxDelayToggle,
    MasterVolume,
    PlaybackVolume,
    MasterPan,
    PlaybackPan,
    MasterMute,
    PlaybackMute,
    TriggerNotePad,
    ProgramPrev,
    ProgramNext,
    NoteSuppressToggle,
    ProgramMuteToggle,
}

impl Action {
    /// All actions other than `None`, for building a complete name/parse
    /// table and for tests that want to round-trip every variant.
    pub const ALL: &'static [Action] = &[
        Action::Quit,
        Action::FilePrev,
        Action::FileNext,
        Action::FileLoad,
        Action::FileLoadByName,
        Action::FxDistortionDrive,
        Action::FxDistortionMix,
        Action::FxDistortionToggle,
        Action::FxFilterCutoff,
        Action::FxFilterResonance,
        Action::FxFilterToggle,
        Action::FxEqLow,
        Action::FxEqMid,
        Action::FxEqHigh,
        Action::FxEqToggle,
        Action::FxCompressorThreshold,
        Action::FxCompressorRatio,
        Action::FxCompressorToggle,
        Action::FxDelayTime,
        Action::FxDelayFeedback,
        Action::FxDelayMix,
        Action::FxDelayToggle,
        Action::MasterVolume,
        Action::PlaybackVolume,
        Action::MasterPan,
        Action::PlaybackPan,
        Action::MasterMute,
        Action::PlaybackMute,
        Action::TriggerNotePad,
        Action::ProgramPrev,
        Action::ProgramNext,
        Action::NoteSuppressToggle,
        Action::ProgramMuteToggle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::None => "none",
            Action::Quit => "quit",
            Action::FilePrev => "file_prev",
            Action::FileNext => "file_next",
            Action::FileLoad => "file_load",
            Action::FileLoadByName => "file_load_byname",
            Action::FxDistortionDrive => "fx_distortion_drive",
            Action::FxDistortionMix => "fx_distortion_mix",
            Action::FxDistortionToggle => "fx_distortion_toggle",
            Action::FxFilterCutoff => "fx_filter_cutoff",
            Action::FxFilterResonance => "fx_filter_resonance",
            Action::FxFilterToggle => "fx_filter_toggle",
            Action::FxEqLow => "fx_eq_low",
            Action::FxEqMid => "fx_eq_mid",
            Action::FxEqHigh => "fx_eq_high",
            Action::FxEqToggle => "fx_eq_toggle",
            Action::FxCompressorThreshold => "fx_compressor_threshold",
            Action::FxCompressorRatio => "fx_compressor_ratio",
            Action::FxCompressorToggle => "fx_compressor_toggle",
            Action::FxDelayTime => "fx_delay_time",
            Action::FxDelayFeedback => "fx_delay_feedback",
            Action::FxDelayMix => "fx_delay_mix",
            Action::FxDelayToggle => "fx_delay_toggle",
            Action::MasterVolume => "master_volume",
            Action::PlaybackVolume => "playback_volume",
            Action::MasterPan => "master_pan",
            Action::PlaybackPan => "playback_pan",
            Action::MasterMute => "master_mute",
            Action::PlaybackMute => "playback_mute",
            Action::TriggerNotePad => "trigger_note_pad",
            Action::ProgramPrev => "program_prev",
            Action::ProgramNext => "program_next",
            Action::NoteSuppressToggle => "note_suppress_toggle",
            Action::ProgramMuteToggle => "program_mute_toggle",
        }
    }

    pub fn parse(s: &str) -> Option<Action> {
        if s.eq_ignore_ascii_case("none") {
            return Some(Action::None);
        }
        Self::ALL.iter().copied().find(|a| a.name().eq_ignore_ascii_case(s))
    }
}

/// An action resolved from a raw input, ready for the control context to
/// act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub action: Action,
    pub parameter: i32,
    pub value: i32,
}

/// One row of the MIDI CC table. `device_id == -1` matches any device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiMapping {
    pub device_id: i32,
    pub cc_number: u8,
    pub action: Action,
    pub parameter: i32,
    pub threshold: i32,
    pub continuous: bool,
}

/// One row of the keyboard table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardMapping {
    pub key: i32,
    pub action: Action,
    pub parameter: i32,
}

/// One of the 16 fixed trigger-pad slots. Either drives an `action`
/// (`action != Action::None`) or a phrase (`phrase_index >= 0`), never both.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TriggerPadConfig {
    pub action: Action,
    pub parameters: String,
    pub midi_note: i32,
    pub midi_device: i32,
    pub phrase_index: i32,
}

impl Default for Action {
    fn default() -> Self {
        Action::None
    }
}

impl Default for TriggerPadConfig {
    fn default() -> Self {
        TriggerPadConfig {
            action: Action::None,
            parameters: String::new(),
            midi_note: -1,
            midi_device: -1,
            phrase_index: -1,
        }
    }
}

/// The three lookup tables: first-match semantics on both MIDI and
/// keyboard lookups.
#[derive(Debug, Clone, Default)]
pub struct InputRouter {
    midi: Vec<MidiMapping>,
    keyboard: Vec<KeyboardMapping>,
    trigger_pads: [TriggerPadConfig; TRIGGER_PAD_COUNT],
}

impl InputRouter {
    pub fn new() -> Self {
        InputRouter::default()
    }

    pub fn add_midi_mapping(&mut self, mapping: MidiMapping) {
        self.midi.push(mapping);
    }

    pub fn add_keyboard_mapping(&mut self, mapping: KeyboardMapping) {
        self.keyboard.push(mapping);
    }

    pub fn set_trigger_pad(&mut self, index: usize, config: TriggerPadConfig) {
        if index < TRIGGER_PAD_COUNT {
            self.trigger_pads[index] = config;
        }
    }

    pub fn trigger_pad(&self, index: usize) -> Option<&TriggerPadConfig> {
        self.trigger_pads.get(index)
    }

    pub fn midi_mappings(&self) -> &[MidiMapping] {
        &self.midi
    }

    pub fn keyboard_mappings(&self) -> &[KeyboardMapping] {
        &self.keyboard
    }

    pub fn clear(&mut self) {
        self.midi.clear();
        self.keyboard.clear();
        self.trigger_pads = Default::default();
    }

    /// First mapping whose CC matches and whose device matches (`-1` = any).
    /// Continuous mappings always fire; button mappings only when
    /// `value >= threshold`.
    pub fn get_midi_event(&self, device_id: i32, cc: u8, value: i32) -> Option<InputEvent> {
        for m in &self.midi {
            if m.cc_number != cc {
                continue;
            }
            if m.device_id != -1 && m.device_id != device_id {
                continue;
            }
            if !m.continuous && value < m.threshold {
                continue;
            }
            return Some(InputEvent {
                action: m.action,
                parameter: m.parameter,
                value,
            });
        }
        None
    }

    pub fn get_keyboard_event(&self, key: i32) -> Option<InputEvent> {
        self.keyboard
            .iter()
            .find(|m| m.key == key)
            .map(|m| InputEvent {
                action: m.action,
                parameter: m.parameter,
                value: 0,
            })
    }
}

/// Parses `"note;velocity;program;channel"` as stored in
/// `TriggerPadConfig::parameters` for `Action::TriggerNotePad`. Missing or
/// malformed fields default to 0.
pub fn parse_note_pad_params(params: &str) -> (i32, i32, i32, i32) {
    let mut fields = params.split(';').map(|f| f.trim().parse::<i32>().unwrap_or(0));
    (
        fields.next().unwrap_or(0),
        fields.next().unwrap_or(0),
        fields.next().unwrap_or(0),
        fields.next().unwrap_or(0),
    )
}

pub fn serialize_note_pad_params(note: i32, velocity: i32, program: i32, channel: i32) -> String {
    format!("{note};{velocity};{program};{channel}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_name_round_trips_for_every_variant() {
        for &a in Action::ALL {
            assert_eq!(Action::parse(a.name()), Some(a));
        }
        assert_eq!(Action::parse("none"), Some(Action::None));
        assert_eq!(Action::parse("not_a_real_action"), None);
    }

    #[test]
    fn midi_lookup_matches_device_and_cc() {
        let mut router = InputRouter::new();
        router.add_midi_mapping(MidiMapping {
            device_id: 0,
            cc_number: 7,
            action: Action::MasterVolume,
            parameter: 0,
            threshold: 0,
            continuous: true,
        });
        assert!(router.get_midi_event(0, 7, 100).is_some());
        assert!(router.get_midi_event(1, 7, 100).is_none());
        assert!(router.get_midi_event(0, 8, 100).is_none());
    }

    #[test]
    fn midi_lookup_any_device_wildcard() {
        let mut router = InputRouter::new();
        router.add_midi_mapping(MidiMapping {
            device_id: -1,
            cc_number: 64,
            action: Action::FxFilterToggle,
            parameter: 0,
            threshold: DEFAULT_THRESHOLD,
            continuous: false,
        });
        assert!(router.get_midi_event(5, 64, 127).is_some());
        assert!(router.get_midi_event(5, 64, 10).is_none());
    }

    #[test]
    fn keyboard_lookup_first_match() {
        let mut router = InputRouter::new();
        router.add_keyboard_mapping(KeyboardMapping {
            key: b'q' as i32,
            action: Action::Quit,
            parameter: 0,
        });
        let ev = router.get_keyboard_event(b'q' as i32).unwrap();
        assert_eq!(ev.action, Action::Quit);
        assert!(router.get_keyboard_event(b'z' as i32).is_none());
    }

    #[test]
    fn note_pad_params_round_trip() {
        let s = serialize_note_pad_params(36, 100, 1, 9);
        assert_eq!(parse_note_pad_params(&s), (36, 100, 1, 9));
    }

    #[test]
    fn trigger_pad_default_has_no_action_and_no_phrase() {
        let pad = TriggerPadConfig::default();
        assert_eq!(pad.action, Action::None);
        assert_eq!(pad.phrase_index, -1);
    }
}
