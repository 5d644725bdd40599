//! Load/save for the input-mapping persistence format: an INI-like file
//! with `[midi]`, `[keyboard]`, `[trigger_pads]` sections, `#`/`;`
//! comments, one `key = value` per line.

use super::{Action, InputRouter, KeyboardMapping, MidiMapping, TriggerPadConfig, DEFAULT_THRESHOLD};
use crate::error::{Result, SamplecrateError};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Midi,
    Keyboard,
    TriggerPads,
}

/// Maps the file's named keyboard keys (`space`, `esc`, ...) to the ASCII
/// code stored in `KeyboardMapping::key`. Single characters pass through
/// as their own ASCII code.
fn key_code_for(token: &str) -> Option<i32> {
    let named = match token {
        "space" => 32,
        "esc" => 27,
        "enter" => 13,
        "plus" => b'+' as i32,
        "minus" => b'-' as i32,
        "equals" => b'=' as i32,
        "lbracket" => b'[' as i32,
        "rbracket" => b']' as i32,
        "pipe" => b'|' as i32,
        "backslash" => b'\\' as i32,
        "slash" => b'/' as i32,
        "comma" => b',' as i32,
        "semicolon" => b';' as i32,
        "hash" => b'#' as i32,
        _ => {
            if let Some(digit) = token.strip_prefix("kp") {
                return digit.parse::<i32>().ok().map(|d| 0x100 + d);
            }
            let mut chars = token.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c as i32),
                _ => None,
            };
        }
    };
    Some(named)
}

fn key_name_for(key: i32) -> String {
    match key {
        32 => "space".into(),
        27 => "esc".into(),
        13 => "enter".into(),
        k if k == b'+' as i32 => "plus".into(),
        k if k == b'-' as i32 => "minus".into(),
        k if k == b'=' as i32 => "equals".into(),
        k if k == b'[' as i32 => "lbracket".into(),
        k if k == b']' as i32 => "rbracket".into(),
        k if k == b'|' as i32 => "pipe".into(),
        k if k == b'\\' as i32 => "backslash".into(),
        k if k == b'/' as i32 => "slash".into(),
        k if k == b',' as i32 => "comma".into(),
        k if k == b';' as i32 => "semicolon".into(),
        k if k == b'#' as i32 => "hash".into(),
        k if (0x100..0x10a).contains(&k) => format!("kp{}", k - 0x100),
        k if (0..=127).contains(&k) => (k as u8 as char).to_string(),
        _ => "unknown".into(),
    }
}

fn strip_comment(line: &str) -> &str {
    let mut end = line.len();
    for (i, c) in line.char_indices() {
        if c == '#' || c == ';' {
            end = i;
            break;
        }
    }
    &line[..end]
}

fn parse_section(line: &str) -> Option<Section> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    match inner.to_ascii_lowercase().as_str() {
        "midi" => Some(Section::Midi),
        "keyboard" => Some(Section::Keyboard),
        "trigger_pads" => Some(Section::TriggerPads),
        _ => None,
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let idx = line.find('=')?;
    Some((line[..idx].trim(), line[idx + 1..].trim()))
}

/// Parses a MIDI row's numeric prefix: `cc<n>`.
fn parse_indexed(prefix: &str, key: &str) -> Option<i64> {
    key.strip_prefix(prefix)?.parse().ok()
}

fn parse_csv_value(value: &str) -> Vec<&str> {
    value.split(',').map(|s| s.trim()).collect()
}

/// Loads an [`InputRouter`] from `path`. Missing or malformed rows are
/// skipped rather than aborting the whole load.
pub fn load<P: AsRef<Path>>(path: P) -> Result<InputRouter> {
    let text = fs::read_to_string(path)?;
    let mut router = InputRouter::new();
    let mut section = Section::None;

    for raw_line in text.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(s) = parse_section(line) {
            section = s;
            continue;
        }
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };

        match section {
            Section::Midi => {
                if let Some(cc) = parse_indexed("cc", key) {
                    if let Some(mapping) = parse_midi_value(cc as u8, value) {
                        router.add_midi_mapping(mapping);
                    }
                }
            }
            Section::Keyboard => {
                if let Some(rest) = key.strip_prefix("key_") {
                    if let Some(code) = key_code_for(rest) {
                        if let Some(mapping) = parse_keyboard_value(code, value) {
                            router.add_keyboard_mapping(mapping);
                        }
                    }
                } else if let Some(rest) = key.strip_prefix("key") {
                    if let Some(code) = key_code_for(rest) {
                        if let Some(mapping) = parse_keyboard_value(code, value) {
                            router.add_keyboard_mapping(mapping);
                        }
                    }
                }
            }
            Section::TriggerPads => {
                if let Some(idx) = parse_indexed("pad", key) {
                    if let Some(config) = parse_pad_value(value) {
                        router.set_trigger_pad(idx as usize, config);
                    }
                }
            }
            Section::None => {}
        }
    }

    Ok(router)
}

fn parse_midi_value(cc: u8, value: &str) -> Option<MidiMapping> {
    let fields = parse_csv_value(value);
    let action = Action::parse(fields.first()?)?;
    let parameter = fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
    let continuous = fields.get(2).map(|s| *s == "1").unwrap_or(false);
    let device_id = fields.get(3).and_then(|s| s.parse().ok()).unwrap_or(-1);
    let threshold = if continuous { 0 } else { DEFAULT_THRESHOLD };
    Some(MidiMapping {
        device_id,
        cc_number: cc,
        action,
        parameter,
        threshold,
        continuous,
    })
}

fn parse_keyboard_value(key: i32, value: &str) -> Option<KeyboardMapping> {
    let fields = parse_csv_value(value);
    let action = Action::parse(fields.first()?)?;
    let parameter = fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
    Some(KeyboardMapping {
        key,
        action,
        parameter,
    })
}

fn parse_pad_value(value: &str) -> Option<TriggerPadConfig> {
    let fields = parse_csv_value(value);
    let action = Action::parse(fields.first()?)?;
    let parameter = fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
    let midi_note = fields.get(2).and_then(|s| s.parse().ok()).unwrap_or(-1);
    let midi_device = fields.get(3).and_then(|s| s.parse().ok()).unwrap_or(-1);
    Some(TriggerPadConfig {
        action,
        parameters: if parameter != 0 {
            parameter.to_string()
        } else {
            String::new()
        },
        midi_note,
        midi_device,
        phrase_index: -1,
    })
}

/// Writes `router` to `path` in the same format `load` reads.
pub fn save<P: AsRef<Path>>(router: &InputRouter, path: P) -> Result<()> {
    let mut out = String::new();
    out.push_str("[midi]\n");
    for (i, m) in router.midi_mappings().iter().enumerate() {
        let _ = writeln!(
            out,
            "cc{} = {},{},{},{}",
            i,
            m.action.name(),
            m.parameter,
            m.continuous as u8,
            m.device_id
        );
    }

    out.push_str("\n[keyboard]\n");
    for (i, m) in router.keyboard_mappings().iter().enumerate() {
        let _ = writeln!(
            out,
            "key_{} = {},{}",
            key_name_for(m.key),
            m.action.name(),
            m.parameter
        );
        let _ = i; // key name is the identity, index is only for uniqueness of iteration
    }

    out.push_str("\n[trigger_pads]\n");
    for i in 0..super::TRIGGER_PAD_COUNT {
        let Some(pad) = router.trigger_pad(i) else {
            continue;
        };
        if pad.action == Action::None {
            continue;
        }
        let param: i32 = pad.parameters.parse().unwrap_or(0);
        let _ = writeln!(
            out,
            "pad{} = {},{},{},{}",
            i,
            pad.action.name(),
            param,
            pad.midi_note,
            pad.midi_device
        );
    }

    fs::write(path, out).map_err(SamplecrateError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("samplecrate-input-test-{:p}.ini", contents.as_ptr()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_midi_keyboard_and_pad_sections() {
        let contents = "\
; comment line
[midi]
cc7 = master_volume,0,1,0
cc64 = fx_filter_toggle,0,0,-1

[keyboard]
key_q = quit
key_space = trigger_note_pad,3

[trigger_pads]
pad0 = trigger_note_pad,36,36,-1
";
        let path = write_temp(contents);
        let router = load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(router.midi_mappings().len(), 2);
        assert!(router.get_midi_event(0, 7, 50).is_some());
        assert!(router.get_midi_event(-1, 64, 127).is_some());

        let q = router.get_keyboard_event(b'q' as i32).unwrap();
        assert_eq!(q.action, Action::Quit);
        let space = router.get_keyboard_event(32).unwrap();
        assert_eq!(space.action, Action::TriggerNotePad);
        assert_eq!(space.parameter, 3);

        let pad0 = router.trigger_pad(0).unwrap();
        assert_eq!(pad0.action, Action::TriggerNotePad);
        assert_eq!(pad0.midi_note, 36);
    }

    #[test]
    fn unknown_action_name_is_skipped_not_fatal() {
        let contents = "[midi]\ncc1 = not_a_real_action,0,0,-1\n";
        let path = write_temp(contents);
        let router = load(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(router.midi_mappings().len(), 0);
    }

    #[test]
    fn save_then_load_round_trips_midi_mappings() {
        let mut router = InputRouter::new();
        router.add_midi_mapping(MidiMapping {
            device_id: 0,
            cc_number: 7,
            action: Action::MasterVolume,
            parameter: 0,
            threshold: 0,
            continuous: true,
        });
        let mut path = std::env::temp_dir();
        path.push("samplecrate-input-roundtrip.ini");
        save(&router, &path).unwrap();
        let loaded = load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded.midi_mappings().len(), 1);
        assert_eq!(loaded.midi_mappings()[0].action, Action::MasterVolume);
    }
}
