//! The hierarchical phrase/sequence/performance engine.
//!
//! A `Sequence` does not keep its own tick clock: its current phrase's track
//! is registered directly onto a slot of the shared `sequencer::Sequencer`,
//! which dispatches its note events, and phrase-advance happens off that
//! same sequencer's pattern-wrap (`loop_callback`). `Performance` is the
//! sole registrant of that callback, since the sequencer only ever holds
//! one; it fans the wrap out to every sequence it owns.

use crate::sequencer::{NoteSink, SequencerHandle};
use crate::track::Track;
use std::sync::{Arc, Mutex};

/// One entry in a `Sequence`'s phrase chain: a MIDI file and how many times
/// to loop it before advancing.
#[derive(Clone)]
pub struct Phrase {
    track: Arc<Track>,
    /// `0` means loop forever; never auto-advances past this phrase.
    loop_count: u32,
    name: Option<String>,
}

impl Phrase {
    pub fn new(track: Arc<Track>, loop_count: u32, name: Option<String>) -> Self {
        Phrase {
            track,
            loop_count,
            name,
        }
    }

    pub fn track(&self) -> &Arc<Track> {
        &self.track
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn is_infinite(&self) -> bool {
        self.loop_count == 0
    }
}

/// Forwards to a sink shared across repeated `add_track` registrations, so
/// the same logical consumer survives every phrase-track swap even though
/// `Sequencer::add_track` takes ownership of a fresh `Box` each time.
struct SharedSink(Arc<Mutex<dyn NoteSink>>);

impl NoteSink for SharedSink {
    fn on_event(&mut self, note: u8, velocity: u8, on: bool) {
        self.0.lock().unwrap().on_event(note, velocity, on);
    }
}

/// An ordered chain of phrases occupying exactly one sequencer slot while
/// playing.
pub struct Sequence {
    phrases: Vec<Phrase>,
    /// `-1` when nothing is current (stopped with no phrase selected).
    current_phrase: i32,
    current_phrase_loop: u32,
    slot_id: usize,
    playing: bool,
    /// When true, wraps back to phrase 0 after the last phrase finishes its
    /// loops; when false, playback stops.
    sequence_loop: bool,
    sequencer: SequencerHandle,
    sink: Arc<Mutex<dyn NoteSink>>,
    phrase_change: Option<Box<dyn FnMut(usize, Option<&str>) + Send>>,
}

impl Sequence {
    /// `slot_id` is the sequencer slot this sequence occupies whenever it is
    /// playing; `sink` is the consumer that receives every note event from
    /// whichever phrase's track is currently registered.
    pub fn new(slot_id: usize, sequencer: SequencerHandle, sink: Arc<Mutex<dyn NoteSink>>) -> Self {
        Sequence {
            phrases: Vec::new(),
            current_phrase: -1,
            current_phrase_loop: 0,
            slot_id,
            playing: false,
            sequence_loop: true,
            sequencer,
            sink,
            phrase_change: None,
        }
    }

    pub fn slot_id(&self) -> usize {
        self.slot_id
    }

    pub fn set_phrase_change_callback<F>(&mut self, cb: F)
    where
        F: FnMut(usize, Option<&str>) + Send + 'static,
    {
        self.phrase_change = Some(Box::new(cb));
    }

    pub fn add_phrase(&mut self, phrase: Phrase) -> usize {
        self.phrases.push(phrase);
        self.phrases.len() - 1
    }

    pub fn clear_phrases(&mut self) {
        self.stop();
        self.phrases.clear();
    }

    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }

    /// `-1` if no phrase is current.
    pub fn current_phrase(&self) -> i32 {
        self.current_phrase
    }

    pub fn current_phrase_loop(&self) -> u32 {
        self.current_phrase_loop
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.sequence_loop = looping;
    }

    pub fn get_loop(&self) -> bool {
        self.sequence_loop
    }

    fn register_current_track(&mut self) {
        let Ok(idx) = usize::try_from(self.current_phrase) else {
            return;
        };
        let Some(phrase) = self.phrases.get(idx) else {
            return;
        };
        let sink = Box::new(SharedSink(Arc::clone(&self.sink)));
        self.sequencer.add_track(self.slot_id, phrase.track(), sink);
    }

    fn unregister_track(&self) {
        self.sequencer.remove_track(self.slot_id);
    }

    /// Registers phrase 0's track on this sequence's slot and begins
    /// playback. A no-op if there are no phrases.
    pub fn play(&mut self) {
        if self.phrases.is_empty() {
            return;
        }
        self.unregister_track();
        self.current_phrase = 0;
        self.current_phrase_loop = 0;
        self.playing = true;
        self.register_current_track();
        self.notify_phrase_change();
    }

    /// Unregisters the slot and clears playback position.
    pub fn stop(&mut self) {
        self.unregister_track();
        self.playing = false;
        self.current_phrase = -1;
        self.current_phrase_loop = 0;
    }

    /// Swaps the registered track to `phrase_index`, resetting its loop
    /// counter. Does not change the playing flag.
    pub fn jump_to_phrase(&mut self, phrase_index: usize) -> bool {
        if phrase_index >= self.phrases.len() {
            return false;
        }
        self.unregister_track();
        self.current_phrase = phrase_index as i32;
        self.current_phrase_loop = 0;
        if self.playing {
            self.register_current_track();
        }
        self.notify_phrase_change();
        true
    }

    fn notify_phrase_change(&mut self) {
        let Ok(idx) = usize::try_from(self.current_phrase) else {
            return;
        };
        let name = self.phrases.get(idx).and_then(|p| p.name.clone());
        if let Some(cb) = self.phrase_change.as_mut() {
            cb(idx, name.as_deref());
        }
    }

    /// Called once per sequencer pattern wrap (the 384-pulse loop
    /// boundary). Increments the current phrase's loop counter and, once
    /// it has looped `loop_count` times, advances to the next phrase
    /// (wrapping to 0 if `sequence_loop`, stopping otherwise), swapping the
    /// registered track on this sequence's slot.
    pub(crate) fn on_pattern_wrap(&mut self) {
        if !self.playing {
            return;
        }
        let Ok(idx) = usize::try_from(self.current_phrase) else {
            return;
        };
        let Some(phrase) = self.phrases.get(idx) else {
            return;
        };
        if phrase.is_infinite() {
            return;
        }

        self.current_phrase_loop += 1;
        if self.current_phrase_loop < phrase.loop_count() {
            return;
        }

        self.unregister_track();
        self.current_phrase_loop = 0;
        let next = idx + 1;
        if next < self.phrases.len() {
            self.current_phrase = next as i32;
        } else if self.sequence_loop {
            self.current_phrase = 0;
        } else {
            self.playing = false;
            self.current_phrase = -1;
            return;
        }
        self.register_current_track();
        self.notify_phrase_change();
    }
}

/// Start timing for `Performance::play`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStartMode {
    /// Start immediately, jumping into the sequence's current position.
    Immediate,
    /// Wait for the next pattern wrap (pulse 0).
    Quantized,
}

pub const MAX_PERFORMANCE_SEQUENCES: usize = 16;

/// First sequencer slot reserved for performance sequences; pads occupy
/// `0..PAD_SLOTS`.
pub const SEQUENCE_SLOT_BASE: usize = crate::sequencer::PAD_SLOTS;

/// Owns up to 16 concurrently-playable `Sequence`s and a quantized-start
/// queue for them. Registers the one `loop_callback` the shared sequencer
/// can hold, fanning each pattern wrap out to every live sequence.
pub struct Performance {
    sequencer: SequencerHandle,
    sequences: Arc<Vec<Mutex<Option<Sequence>>>>,
    start_mode: SequenceStartMode,
    pending_starts: Vec<usize>,
}

impl Performance {
    pub fn new(sequencer: SequencerHandle) -> Self {
        let mut slots = Vec::with_capacity(MAX_PERFORMANCE_SEQUENCES);
        slots.resize_with(MAX_PERFORMANCE_SEQUENCES, || Mutex::new(None));
        let sequences = Arc::new(slots);

        let wrap_sequences = Arc::clone(&sequences);
        sequencer.with_lock(|s| {
            s.set_loop_callback(move || {
                for slot in wrap_sequences.iter() {
                    if let Ok(mut guard) = slot.lock() {
                        if let Some(seq) = guard.as_mut() {
                            seq.on_pattern_wrap();
                        }
                    }
                }
            });
        });

        Performance {
            sequencer,
            sequences,
            start_mode: SequenceStartMode::Immediate,
            pending_starts: Vec::new(),
        }
    }

    pub fn set_start_mode(&mut self, mode: SequenceStartMode) {
        self.start_mode = mode;
    }

    pub fn start_mode(&self) -> SequenceStartMode {
        self.start_mode
    }

    /// Builds and installs a sequence at `index` (0..16), occupying
    /// sequencer slot `SEQUENCE_SLOT_BASE + index`, replacing whatever was
    /// there.
    pub fn set_sequence(&mut self, index: usize, phrases: Vec<Phrase>, sink: Arc<Mutex<dyn NoteSink>>) -> bool {
        let Some(slot) = self.sequences.get(index) else {
            return false;
        };
        let mut guard = slot.lock().unwrap();
        if let Some(old) = guard.as_mut() {
            old.stop();
        }
        let mut seq = Sequence::new(SEQUENCE_SLOT_BASE + index, self.sequencer.clone(), sink);
        for phrase in phrases {
            seq.add_phrase(phrase);
        }
        *guard = Some(seq);
        true
    }

    pub fn clear(&mut self) {
        for slot in self.sequences.iter() {
            let mut guard = slot.lock().unwrap();
            if let Some(seq) = guard.as_mut() {
                seq.stop();
            }
            *guard = None;
        }
        self.pending_starts.clear();
    }

    pub fn count(&self) -> usize {
        self.sequences
            .iter()
            .filter(|s| s.lock().unwrap().is_some())
            .count()
    }

    pub fn with_sequence<F, T>(&self, index: usize, func: F) -> Option<T>
    where
        F: FnOnce(&mut Sequence) -> T,
    {
        self.sequences
            .get(index)
            .and_then(|m| m.lock().unwrap().as_mut().map(func))
    }

    /// Starts `index` per the configured start mode. Immediate mode plays
    /// right away; quantized mode queues it for the next pattern wrap seen
    /// by `update_samples`.
    pub fn play(&mut self, index: usize, current_pulse: u32) {
        match self.start_mode {
            SequenceStartMode::Immediate => {
                self.with_sequence(index, |s| s.play());
            }
            SequenceStartMode::Quantized => {
                if current_pulse == 0 {
                    self.with_sequence(index, |s| s.play());
                } else if !self.pending_starts.contains(&index) {
                    self.pending_starts.push(index);
                }
            }
        }
    }

    pub fn stop(&mut self, index: usize) {
        self.pending_starts.retain(|&s| s != index);
        self.with_sequence(index, |s| s.stop());
    }

    pub fn stop_all(&self) {
        for s in self.sequences.iter() {
            if let Some(seq) = s.lock().unwrap().as_mut() {
                seq.stop();
            }
        }
    }

    pub fn is_playing(&self, index: usize) -> bool {
        self.with_sequence(index, |s| s.is_playing()).unwrap_or(false)
    }

    pub fn jump_to_phrase(&self, index: usize, phrase_index: usize) -> bool {
        self.with_sequence(index, |s| s.jump_to_phrase(phrase_index))
            .unwrap_or(false)
    }

    /// Forwards to the shared sequencer; all sequences share its one clock.
    pub fn set_tempo(&self, bpm: f32) {
        self.sequencer.set_bpm(bpm);
    }

    /// Releases any queued quantized starts now that `current_pulse` has
    /// reached pulse 0. Phrase-advance itself runs off the loop callback
    /// installed once in `new`, not from here.
    pub fn update_samples(&mut self, _num_samples: i64, _sample_rate: f64, current_pulse: u32) {
        if current_pulse == 0 && !self.pending_starts.is_empty() {
            for index in self.pending_starts.drain(..) {
                if let Some(m) = self.sequences.get(index) {
                    if let Some(seq) = m.lock().unwrap().as_mut() {
                        seq.play();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{FnSink, Sequencer};
    use crate::track::NoteEvent;
    use std::sync::Mutex as StdMutex;

    fn shared_capturing_sink() -> (Arc<Mutex<dyn NoteSink>>, Arc<StdMutex<Vec<(u8, u8, bool)>>>) {
        let captured = Arc::new(StdMutex::new(Vec::new()));
        let captured_clone = captured.clone();
        let sink: Arc<Mutex<dyn NoteSink>> = Arc::new(Mutex::new(FnSink(move |note, vel, on| {
            captured_clone.lock().unwrap().push((note, vel, on));
        })));
        (sink, captured)
    }

    fn track_with(events: Vec<NoteEvent>) -> Arc<Track> {
        Arc::new(Track::from_events(events, 480))
    }

    /// Drives `handle` through enough pulses to cross exactly one 384-pulse
    /// pattern wrap.
    fn advance_one_pattern(handle: &SequencerHandle) {
        for _ in 0..crate::sequencer::PULSES_PER_PATTERN {
            handle.clock_pulse();
        }
    }

    #[test]
    fn single_infinite_phrase_restarts_without_advancing() {
        let handle = SequencerHandle::new(Sequencer::new());
        let track = track_with(vec![NoteEvent::new(0, 36, 100, true)]);
        let (sink, captured) = shared_capturing_sink();
        let mut seq = Sequence::new(0, handle.clone(), sink);
        seq.add_phrase(Phrase::new(track, 0, None));
        seq.play();

        advance_one_pattern(&handle);

        assert_eq!(seq.current_phrase(), 0);
        assert!(seq.is_playing());
        assert_eq!(captured.lock().unwrap().iter().filter(|(_, _, on)| *on).count(), 1);
    }

    #[test]
    fn finite_phrase_advances_after_its_loop_count() {
        let handle = SequencerHandle::new(Sequencer::new());
        let p0 = track_with(vec![NoteEvent::new(0, 1, 100, true)]);
        let p1 = track_with(vec![NoteEvent::new(0, 2, 100, true)]);
        let (sink, _captured) = shared_capturing_sink();

        let name_log = Arc::new(StdMutex::new(Vec::new()));
        let name_log_clone = name_log.clone();
        let mut seq = Sequence::new(0, handle.clone(), sink);
        seq.set_phrase_change_callback(move |idx, _name| {
            name_log_clone.lock().unwrap().push(idx);
        });
        seq.add_phrase(Phrase::new(p0, 1, Some("intro".into())));
        seq.add_phrase(Phrase::new(p1, 0, Some("loop".into())));
        seq.play();

        advance_one_pattern(&handle);

        assert_eq!(seq.current_phrase(), 1);
        assert_eq!(*name_log.lock().unwrap(), vec![1]);
    }

    #[test]
    fn non_looping_sequence_stops_after_last_phrase() {
        let handle = SequencerHandle::new(Sequencer::new());
        let p0 = track_with(vec![NoteEvent::new(0, 1, 100, true)]);
        let (sink, _captured) = shared_capturing_sink();
        let mut seq = Sequence::new(0, handle.clone(), sink);
        seq.set_loop(false);
        seq.add_phrase(Phrase::new(p0, 1, None));
        seq.play();

        advance_one_pattern(&handle);

        assert!(!seq.is_playing());
        assert_eq!(seq.current_phrase(), -1);
    }

    #[test]
    fn jump_to_phrase_resets_position_and_notifies() {
        let handle = SequencerHandle::new(Sequencer::new());
        let p0 = track_with(vec![NoteEvent::new(0, 1, 100, true)]);
        let p1 = track_with(vec![NoteEvent::new(0, 2, 100, true)]);
        let (sink, _captured) = shared_capturing_sink();
        let mut seq = Sequence::new(0, handle, sink);
        seq.add_phrase(Phrase::new(p0, 0, None));
        seq.add_phrase(Phrase::new(p1, 0, Some("b".into())));
        assert!(seq.jump_to_phrase(1));
        assert_eq!(seq.current_phrase(), 1);
        assert!(!seq.jump_to_phrase(5));
    }

    #[test]
    fn play_stop_register_and_unregister_the_slot() {
        let handle = SequencerHandle::new(Sequencer::new());
        let p0 = track_with(vec![NoteEvent::new(0, 1, 100, true)]);
        let (sink, _captured) = shared_capturing_sink();
        let mut seq = Sequence::new(3, handle.clone(), sink);
        seq.add_phrase(Phrase::new(p0, 0, None));

        assert!(!handle.slot_is_active(3));
        seq.play();
        assert!(handle.slot_is_active(3));
        seq.stop();
        assert!(!handle.slot_is_active(3));
    }

    #[test]
    fn performance_immediate_start_plays_right_away() {
        let handle = SequencerHandle::new(Sequencer::new());
        let mut perf = Performance::new(handle);
        perf.set_start_mode(SequenceStartMode::Immediate);
        let (sink, _captured) = shared_capturing_sink();
        perf.set_sequence(0, vec![Phrase::new(track_with(vec![]), 0, None)], sink);
        perf.play(0, 50);
        assert!(perf.is_playing(0));
    }

    #[test]
    fn performance_quantized_start_waits_for_pulse_zero() {
        let handle = SequencerHandle::new(Sequencer::new());
        let mut perf = Performance::new(handle);
        perf.set_start_mode(SequenceStartMode::Quantized);
        let (sink, _captured) = shared_capturing_sink();
        perf.set_sequence(0, vec![Phrase::new(track_with(vec![]), 0, None)], sink);

        perf.play(0, 10); // not pulse 0, should queue
        assert!(!perf.is_playing(0));

        perf.update_samples(0, 48_000.0, 0); // pattern boundary
        assert!(perf.is_playing(0));
    }

    #[test]
    fn stop_all_stops_every_sequence() {
        let handle = SequencerHandle::new(Sequencer::new());
        let mut perf = Performance::new(handle);
        let (sink_a, _) = shared_capturing_sink();
        let (sink_b, _) = shared_capturing_sink();
        perf.set_sequence(0, vec![Phrase::new(track_with(vec![]), 0, None)], sink_a);
        perf.set_sequence(1, vec![Phrase::new(track_with(vec![]), 0, None)], sink_b);
        perf.play(0, 0);
        perf.play(1, 0);
        perf.stop_all();
        assert!(!perf.is_playing(0));
        assert!(!perf.is_playing(1));
    }

    #[test]
    fn on_pattern_wrap_no_op_when_not_playing() {
        let handle = SequencerHandle::new(Sequencer::new());
        let (sink, _captured) = shared_capturing_sink();
        let mut seq = Sequence::new(0, handle, sink);
        seq.add_phrase(Phrase::new(track_with(vec![]), 1, None));
        seq.on_pattern_wrap();
        assert_eq!(seq.current_phrase(), -1);
    }
}
