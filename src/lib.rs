//! A multi-timbral sample/drum instrument core: a pulse-quantized pattern
//! sequencer, a hierarchical phrase/sequence/performance engine, a
//! per-program effects chain, and the MIDI/SysEx plumbing that drives them.
//!
//! The library itself never touches audio output or a MIDI port; that
//! wiring lives in `bin/samplecrate.rs`. Everything here is safe to call
//! from a headless test or from inside a real-time audio callback, per the
//! contracts documented on `sequencer::Sequencer` and `effects::EffectsChain`.

pub mod effects;
pub mod error;
pub mod input;
pub mod phrase;
pub mod rsx;
pub mod sequencer;
pub mod sysex;
pub mod track;
pub mod transfer;

pub use error::{Result, SamplecrateError};
