//! An immutable, sorted sequence of note events parsed from a Standard
//! MIDI File.

use crate::error::{Result, SamplecrateError};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;

/// TPQN assumed for ticks coming out of a parsed MIDI file when nothing
/// better is known, and the value the sequencer uses to convert pulses to
/// ticks (`tick = pulse * TPQN / 24`).
pub const TPQN: u32 = 480;

/// A single tick-stamped note event.
///
/// Sort order: tick ascending, then note-off before note-on at equal ticks,
/// so a retrigger at the same tick never steals its own voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub tick: u32,
    pub note: u8,
    pub velocity: u8,
    pub on: bool,
}

impl NoteEvent {
    pub fn new(tick: u32, note: u8, velocity: u8, on: bool) -> Self {
        NoteEvent {
            tick,
            note: note.min(127),
            velocity: velocity.min(127),
            on,
        }
    }
}

fn event_order(a: &NoteEvent, b: &NoteEvent) -> Ordering {
    a.tick.cmp(&b.tick).then_with(|| a.on.cmp(&b.on))
}

/// Immutable after `load_midi`. Owns its events and the file's TPQN.
#[derive(Debug, Clone, Default)]
pub struct Track {
    events: Vec<NoteEvent>,
    tpqn: u32,
}

impl Track {
    /// An empty track, useful as a placeholder before `load_midi` runs or in
    /// tests that build events directly via `from_events`.
    pub fn new() -> Self {
        Track {
            events: Vec::new(),
            tpqn: TPQN,
        }
    }

    /// Build a track directly from already-sorted-or-not events, for tests
    /// and for callers (like the pad/sequence engine tests) that don't want
    /// to round-trip through an actual SMF file.
    pub fn from_events(events: Vec<NoteEvent>, tpqn: u32) -> Self {
        let mut events = events;
        events.sort_by(event_order);
        Track { events, tpqn }
    }

    /// Parse a Standard MIDI File at `path`. Extracts every note-on
    /// (velocity > 0) and note-off (explicit, or note-on with velocity 0)
    /// across all internal tracks, projecting them onto one logical event
    /// list sorted per `event_order`. Zero events is success, not an error.
    pub fn load_midi<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        let smf = midly::Smf::parse(&bytes)
            .map_err(|e| SamplecrateError::Parse(format!("invalid MIDI header: {e}")))?;

        let tpqn = match smf.header.timing {
            midly::Timing::Metrical(ticks_per_beat) => ticks_per_beat.as_int() as u32,
            midly::Timing::Timecode(..) => {
                return Err(SamplecrateError::Parse(
                    "timecode-based MIDI files are not supported".into(),
                ))
            }
        };

        let mut events = Vec::new();
        for track in smf.tracks.iter() {
            let mut tick: u32 = 0;
            for ev in track.iter() {
                tick += ev.delta.as_int();
                if let midly::TrackEventKind::Midi { message, .. } = ev.kind {
                    match message {
                        midly::MidiMessage::NoteOn { key, vel } => {
                            let vel = vel.as_int();
                            events.push(NoteEvent::new(tick, key.as_int(), vel, vel > 0));
                        }
                        midly::MidiMessage::NoteOff { key, vel } => {
                            events.push(NoteEvent::new(tick, key.as_int(), vel.as_int(), false));
                        }
                        _ => {}
                    }
                }
            }
        }
        events.sort_by(event_order);

        Ok(Track { events, tpqn })
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn tpqn(&self) -> u32 {
        self.tpqn
    }

    pub fn duration_ticks(&self) -> u32 {
        self.events.last().map(|e| e.tick).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events with `lo < tick <= hi`, in track order. Used by the sequencer's
    /// dispatch step.
    pub fn events_in_range(&self, lo: i64, hi: i64) -> impl Iterator<Item = &NoteEvent> {
        self.events
            .iter()
            .filter(move |e| (e.tick as i64) > lo && (e.tick as i64) <= hi)
    }
}
