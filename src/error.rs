use std::fmt;

/// Error kinds produced by the non-realtime paths of the engine.
///
/// Nothing in the audio callback (`Sequencer::advance`, `EffectsChain::process`)
/// ever returns this: bad parameters are clamped and missing tracks are
/// skipped there, per the real-time contract.
#[derive(Debug)]
pub enum SamplecrateError {
    Io(std::io::Error),
    Parse(String),
    OutOfRange(String),
    BufferOverflow(String),
    Protocol(String),
    Timeout(String),
}

impl fmt::Display for SamplecrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplecrateError::Io(e) => write!(f, "io error: {e}"),
            SamplecrateError::Parse(s) => write!(f, "parse error: {s}"),
            SamplecrateError::OutOfRange(s) => write!(f, "out of range: {s}"),
            SamplecrateError::BufferOverflow(s) => write!(f, "buffer overflow: {s}"),
            SamplecrateError::Protocol(s) => write!(f, "protocol error: {s}"),
            SamplecrateError::Timeout(s) => write!(f, "timeout: {s}"),
        }
    }
}

impl std::error::Error for SamplecrateError {}

impl From<std::io::Error> for SamplecrateError {
    fn from(e: std::io::Error) -> Self {
        SamplecrateError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, SamplecrateError>;
