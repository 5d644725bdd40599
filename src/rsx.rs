//! The RSX program file: an INI-like, UTF-8 text format describing the
//! programs and note-trigger pads for one samplecrate.
//!
//! Sections `[Samplecrate]`, `[Programs]`, `[NoteTriggerPads]`; keys
//! `prog_N_{file|name|volume|pan}` for N in 1..=4 and
//! `pad_N<k>_{note|description|velocity|pitch_bend|pan|volume|enabled|program}`
//! for k in 1..=32. Values are unquoted or double-quoted; comments start
//! with `#` or `;`.

use crate::error::{Result, SamplecrateError};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub const MAX_PROGRAMS: usize = 4;
pub const MAX_PADS: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramEntry {
    pub file: String,
    pub name: String,
    pub volume: f32,
    pub pan: f32,
}

impl Default for ProgramEntry {
    fn default() -> Self {
        ProgramEntry {
            file: String::new(),
            name: String::new(),
            volume: 1.0,
            pan: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteTriggerPad {
    pub note: i32,
    pub description: String,
    pub velocity: i32,
    pub pitch_bend: f32,
    pub pan: f32,
    pub volume: f32,
    pub enabled: bool,
    /// Program index 0-3, or `-1` for "use the current program".
    pub program: i32,
}

impl Default for NoteTriggerPad {
    fn default() -> Self {
        NoteTriggerPad {
            note: -1,
            description: String::new(),
            velocity: 100,
            pitch_bend: 0.0,
            pan: 0.0,
            volume: 1.0,
            enabled: true,
            program: -1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RsxFile {
    pub version: i32,
    pub programs: Vec<Option<ProgramEntry>>,
    pub pads: Vec<Option<NoteTriggerPad>>,
}

impl RsxFile {
    pub fn new() -> Self {
        let mut programs = Vec::with_capacity(MAX_PROGRAMS);
        programs.resize_with(MAX_PROGRAMS, || None);
        let mut pads = Vec::with_capacity(MAX_PADS);
        pads.resize_with(MAX_PADS, || None);
        RsxFile {
            version: 1,
            programs,
            pads,
        }
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

fn unquote(value: &str) -> &str {
    let v = value.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Samplecrate,
    Programs,
    NoteTriggerPads,
}

fn parse_section(line: &str) -> Option<Section> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    match inner {
        "Samplecrate" => Some(Section::Samplecrate),
        "Programs" => Some(Section::Programs),
        "NoteTriggerPads" => Some(Section::NoteTriggerPads),
        _ => None,
    }
}

/// Loads an RSX file from `path`.
pub fn load<P: AsRef<Path>>(path: P) -> Result<RsxFile> {
    let text = fs::read_to_string(path)?;
    parse(&text)
}

fn parse(text: &str) -> Result<RsxFile> {
    let mut rsx = RsxFile::new();
    let mut section = Section::None;
    // key -> raw value, keyed by the full dotted key, so a program/pad's
    // fields can be assembled once every line has been scanned.
    let mut raw: BTreeMap<String, String> = BTreeMap::new();

    for line in text.lines() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(s) = parse_section(line) {
            section = s;
            continue;
        }
        let Some(idx) = line.find('=') else { continue };
        let key = line[..idx].trim().to_string();
        let value = unquote(&line[idx + 1..]).to_string();

        match section {
            Section::Samplecrate => {
                if key == "version" {
                    rsx.version = value.parse().unwrap_or(1);
                }
            }
            Section::Programs | Section::NoteTriggerPads => {
                raw.insert(key, value);
            }
            Section::None => {}
        }
    }

    for n in 1..=MAX_PROGRAMS {
        let prefix = format!("prog_{n}_");
        let file = raw.get(&format!("{prefix}file"));
        let name = raw.get(&format!("{prefix}name"));
        if file.is_none() && name.is_none() {
            continue;
        }
        rsx.programs[n - 1] = Some(ProgramEntry {
            file: file.cloned().unwrap_or_default(),
            name: name.cloned().unwrap_or_default(),
            volume: raw
                .get(&format!("{prefix}volume"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            pan: raw
                .get(&format!("{prefix}pan"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),
        });
    }

    for k in 1..=MAX_PADS {
        let prefix = format!("pad_{k}_");
        let note_key = format!("{prefix}note");
        let Some(note) = raw.get(&note_key).and_then(|v| v.parse::<i32>().ok()) else {
            continue;
        };
        rsx.pads[k - 1] = Some(NoteTriggerPad {
            note,
            description: raw.get(&format!("{prefix}description")).cloned().unwrap_or_default(),
            velocity: raw
                .get(&format!("{prefix}velocity"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            pitch_bend: raw
                .get(&format!("{prefix}pitch_bend"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            pan: raw.get(&format!("{prefix}pan")).and_then(|v| v.parse().ok()).unwrap_or(0.0),
            volume: raw
                .get(&format!("{prefix}volume"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            enabled: raw
                .get(&format!("{prefix}enabled"))
                .map(|v| v != "0")
                .unwrap_or(true),
            program: raw
                .get(&format!("{prefix}program"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(-1),
        });
    }

    Ok(rsx)
}

/// Writes `rsx` to `path` in the same format `load` reads.
pub fn save<P: AsRef<Path>>(rsx: &RsxFile, path: P) -> Result<()> {
    let mut out = String::new();
    let _ = writeln!(out, "[Samplecrate]");
    let _ = writeln!(out, "version = {}", rsx.version);

    let _ = writeln!(out, "\n[Programs]");
    for (i, prog) in rsx.programs.iter().enumerate() {
        let Some(prog) = prog else { continue };
        let n = i + 1;
        let _ = writeln!(out, "prog_{n}_file = \"{}\"", prog.file);
        let _ = writeln!(out, "prog_{n}_name = \"{}\"", prog.name);
        let _ = writeln!(out, "prog_{n}_volume = {}", prog.volume);
        let _ = writeln!(out, "prog_{n}_pan = {}", prog.pan);
    }

    let _ = writeln!(out, "\n[NoteTriggerPads]");
    for (i, pad) in rsx.pads.iter().enumerate() {
        let Some(pad) = pad else { continue };
        let k = i + 1;
        let _ = writeln!(out, "pad_{k}_note = {}", pad.note);
        let _ = writeln!(out, "pad_{k}_description = \"{}\"", pad.description);
        let _ = writeln!(out, "pad_{k}_velocity = {}", pad.velocity);
        let _ = writeln!(out, "pad_{k}_pitch_bend = {}", pad.pitch_bend);
        let _ = writeln!(out, "pad_{k}_pan = {}", pad.pan);
        let _ = writeln!(out, "pad_{k}_volume = {}", pad.volume);
        let _ = writeln!(out, "pad_{k}_enabled = {}", pad.enabled as u8);
        let _ = writeln!(out, "pad_{k}_program = {}", pad.program);
    }

    fs::write(path, out).map_err(SamplecrateError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[Samplecrate]
version = 2

[Programs]
prog_1_file = "kit1.sfz"
prog_1_name = "Acoustic Kit"
prog_1_volume = 0.9
prog_1_pan = 0.5

[NoteTriggerPads]
pad_1_note = 36
pad_1_description = "Kick"
pad_1_velocity = 110
pad_1_enabled = 1
pad_1_program = 0
; pad 2 intentionally absent
"#;

    #[test]
    fn parses_version_program_and_pad() {
        let rsx = parse(SAMPLE).unwrap();
        assert_eq!(rsx.version, 2);

        let prog0 = rsx.programs[0].as_ref().unwrap();
        assert_eq!(prog0.file, "kit1.sfz");
        assert_eq!(prog0.name, "Acoustic Kit");
        assert!((prog0.volume - 0.9).abs() < 1e-6);

        let pad0 = rsx.pads[0].as_ref().unwrap();
        assert_eq!(pad0.note, 36);
        assert_eq!(pad0.description, "Kick");
        assert_eq!(pad0.velocity, 110);
        assert!(pad0.enabled);
        assert_eq!(pad0.program, 0);

        assert!(rsx.pads[1].is_none());
        assert!(rsx.programs[1].is_none());
    }

    #[test]
    fn save_then_parse_round_trips() {
        let rsx = parse(SAMPLE).unwrap();
        let mut out = String::new();
        let mut path = std::env::temp_dir();
        path.push("samplecrate-rsx-roundtrip.rsx");
        save(&rsx, &path).unwrap();
        out.push_str(&fs::read_to_string(&path).unwrap());
        fs::remove_file(&path).ok();

        let reparsed = parse(&out).unwrap();
        assert_eq!(reparsed.version, rsx.version);
        assert_eq!(reparsed.programs[0], rsx.programs[0]);
        assert_eq!(reparsed.pads[0], rsx.pads[0]);
    }

    #[test]
    fn absent_note_key_means_pad_slot_is_empty() {
        let rsx = parse("[NoteTriggerPads]\npad_5_description = \"orphan\"\n").unwrap();
        assert!(rsx.pads[4].is_none());
    }
}
