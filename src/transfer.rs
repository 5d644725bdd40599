//! Chunked MIDI-file upload/download over SysEx.
//!
//! Large files move in 256-byte raw chunks, 7-bit encoded for the wire:
//! every 7 input bytes become 8 output bytes, byte 0 holding the top bit of
//! each of the following 7. The control context owns every session; none
//! of this runs on the audio thread.

use crate::error::{Result, SamplecrateError};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

pub const MAX_SLOTS: usize = 16;
pub const CHUNK_SIZE: usize = 256;
pub const MAX_FILE_SIZE: usize = 16 * 1024;
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Encodes `data` 7 bytes at a time into 8-byte blocks. The final block is
/// zero-padded if `data.len()` isn't a multiple of 7.
pub fn encode_7bit(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((data.len() / 7 + 1) * 8);
    for block in data.chunks(7) {
        let mut mask = 0u8;
        let mut lows = [0u8; 7];
        for (i, b) in block.iter().enumerate() {
            if b & 0x80 != 0 {
                mask |= 1 << i;
            }
            lows[i] = b & 0x7f;
        }
        out.push(mask);
        out.extend_from_slice(&lows);
    }
    out
}

/// Inverse of `encode_7bit`. `encoded.len()` must be a multiple of 8.
pub fn decode_7bit(encoded: &[u8]) -> Result<Vec<u8>> {
    if encoded.len() % 8 != 0 {
        return Err(SamplecrateError::Protocol(
            "7-bit encoded payload length must be a multiple of 8".into(),
        ));
    }
    let mut out = Vec::with_capacity(encoded.len() / 8 * 7);
    for block in encoded.chunks(8) {
        let mask = block[0];
        for (i, b) in block[1..].iter().enumerate() {
            let high = if mask & (1 << i) != 0 { 0x80 } else { 0 };
            out.push(b | high);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Receiving,
    Complete,
    Error,
}

struct UploadSession {
    state: UploadState,
    program: u8,
    total_chunks: u16,
    file_size: u16,
    chunks_received: u16,
    buffer: Vec<u8>,
    last_activity: Instant,
}

/// Tracks one reassembly session per sequence slot (0-15). Out-of-order
/// chunks abort the session rather than silently overwriting state.
pub struct UploadManager {
    sessions: Vec<Option<UploadSession>>,
}

impl Default for UploadManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadManager {
    pub fn new() -> Self {
        let mut sessions = Vec::with_capacity(MAX_SLOTS);
        sessions.resize_with(MAX_SLOTS, || None);
        UploadManager { sessions }
    }

    pub fn state(&self, slot: usize) -> UploadState {
        self.sessions
            .get(slot)
            .and_then(|s| s.as_ref())
            .map(|s| s.state)
            .unwrap_or(UploadState::Idle)
    }

    /// Allocates a reassembly buffer and abandons any existing session on
    /// `slot`. Rejects file sizes over `MAX_FILE_SIZE`.
    pub fn start(&mut self, slot: u8, program: u8, total_chunks: u16, file_size: u16) -> Result<()> {
        let idx = slot as usize;
        if idx >= MAX_SLOTS {
            return Err(SamplecrateError::OutOfRange(format!("upload slot {slot} out of range")));
        }
        if file_size as usize > MAX_FILE_SIZE {
            return Err(SamplecrateError::BufferOverflow(format!(
                "upload of {file_size} bytes exceeds {MAX_FILE_SIZE}"
            )));
        }
        self.sessions[idx] = Some(UploadSession {
            state: UploadState::Receiving,
            program,
            total_chunks,
            file_size,
            chunks_received: 0,
            buffer: Vec::with_capacity(file_size as usize),
            last_activity: Instant::now(),
        });
        Ok(())
    }

    /// Decodes and appends `encoded` for chunk `chunk_num`. `chunk_num` must
    /// equal the count of chunks already received, or the session aborts.
    pub fn chunk(&mut self, slot: u8, chunk_num: u16, encoded: &[u8]) -> Result<()> {
        let idx = slot as usize;
        let session = self
            .sessions
            .get_mut(idx)
            .and_then(|s| s.as_mut())
            .ok_or_else(|| SamplecrateError::Protocol(format!("no active upload on slot {slot}")))?;

        if chunk_num != session.chunks_received {
            session.state = UploadState::Error;
            return Err(SamplecrateError::Protocol(format!(
                "out-of-order chunk {chunk_num}, expected {}",
                session.chunks_received
            )));
        }

        let mut decoded = decode_7bit(encoded)?;
        let is_last = chunk_num + 1 == session.total_chunks;
        if is_last {
            let remaining = session.file_size as usize - session.buffer.len();
            decoded.truncate(remaining);
        }
        session.buffer.extend_from_slice(&decoded);
        session.chunks_received += 1;
        session.last_activity = Instant::now();
        Ok(())
    }

    /// Validates the reassembled buffer as a Standard MIDI File header and
    /// writes it to `<output_dir>/sequences/seq_<slot>.mid`.
    pub fn complete<P: AsRef<Path>>(&mut self, slot: u8, output_dir: P) -> Result<()> {
        let idx = slot as usize;
        let session = self
            .sessions
            .get(idx)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| SamplecrateError::Protocol(format!("no active upload on slot {slot}")))?;

        if session.chunks_received != session.total_chunks {
            return Err(SamplecrateError::Protocol(format!(
                "upload incomplete: {}/{} chunks",
                session.chunks_received, session.total_chunks
            )));
        }
        validate_smf_header(&session.buffer)?;

        let dir = output_dir.as_ref().join("sequences");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(format!("seq_{slot}.mid")), &session.buffer)?;

        self.sessions[idx] = None;
        Ok(())
    }

    pub fn abort(&mut self, slot: u8) {
        if let Some(s) = self.sessions.get_mut(slot as usize) {
            *s = None;
        }
    }

    pub fn program_for(&self, slot: u8) -> Option<u8> {
        self.sessions.get(slot as usize)?.as_ref().map(|s| s.program)
    }

    /// Aborts every session inactive for `SESSION_TIMEOUT` or longer.
    pub fn check_timeouts(&mut self) {
        let now = Instant::now();
        for slot in self.sessions.iter_mut() {
            if let Some(s) = slot {
                if now.duration_since(s.last_activity) >= SESSION_TIMEOUT {
                    *slot = None;
                }
            }
        }
    }
}

fn validate_smf_header(data: &[u8]) -> Result<()> {
    if data.len() < 8 || &data[0..4] != b"MThd" {
        return Err(SamplecrateError::Parse("missing MThd header".into()));
    }
    let header_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if header_len != 6 {
        return Err(SamplecrateError::Parse(format!(
            "MThd header length must be 6, got {header_len}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    Active,
    Complete,
    Error,
}

struct DownloadSession {
    state: DownloadState,
    program: u8,
    total_chunks: u16,
    file_size: u16,
    buffer: Vec<u8>,
    last_activity: Instant,
}

/// Symmetric to `UploadManager`: serves a previously-saved sequence file
/// out in 256-byte, 7-bit-encoded chunks.
pub struct DownloadManager {
    sessions: Vec<Option<DownloadSession>>,
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadManager {
    pub fn new() -> Self {
        let mut sessions = Vec::with_capacity(MAX_SLOTS);
        sessions.resize_with(MAX_SLOTS, || None);
        DownloadManager { sessions }
    }

    pub fn state(&self, slot: usize) -> DownloadState {
        self.sessions
            .get(slot)
            .and_then(|s| s.as_ref())
            .map(|s| s.state)
            .unwrap_or(DownloadState::Idle)
    }

    /// Loads `<rsx_dir>/sequences/seq_<slot>.mid` into memory and reports
    /// `(program, total_chunks, file_size)`.
    pub fn start<P: AsRef<Path>>(&mut self, slot: u8, rsx_dir: P, program: u8) -> Result<(u8, u16, u16)> {
        let idx = slot as usize;
        if idx >= MAX_SLOTS {
            return Err(SamplecrateError::OutOfRange(format!("download slot {slot} out of range")));
        }
        let path = rsx_dir.as_ref().join("sequences").join(format!("seq_{slot}.mid"));
        let buffer = fs::read(path)?;
        if buffer.len() > MAX_FILE_SIZE {
            return Err(SamplecrateError::BufferOverflow(format!(
                "sequence file of {} bytes exceeds {MAX_FILE_SIZE}",
                buffer.len()
            )));
        }
        let file_size = buffer.len() as u16;
        let total_chunks = ((buffer.len() + CHUNK_SIZE - 1) / CHUNK_SIZE).max(1) as u16;

        self.sessions[idx] = Some(DownloadSession {
            state: DownloadState::Active,
            program,
            total_chunks,
            file_size,
            buffer,
            last_activity: Instant::now(),
        });
        Ok((program, total_chunks, file_size))
    }

    /// Returns the 7-bit-encoded bytes for raw chunk `chunk_num` (each raw
    /// chunk is up to `CHUNK_SIZE` bytes, the last zero-padded before
    /// encoding).
    pub fn get_chunk(&mut self, slot: u8, chunk_num: u16) -> Result<Vec<u8>> {
        let idx = slot as usize;
        let session = self
            .sessions
            .get_mut(idx)
            .and_then(|s| s.as_mut())
            .ok_or_else(|| SamplecrateError::Protocol(format!("no active download on slot {slot}")))?;

        if chunk_num >= session.total_chunks {
            return Err(SamplecrateError::OutOfRange(format!(
                "chunk {chunk_num} out of range ({} total)",
                session.total_chunks
            )));
        }

        let start = chunk_num as usize * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(session.buffer.len());
        let raw = &session.buffer[start..end];
        session.last_activity = Instant::now();
        Ok(encode_7bit(raw))
    }

    pub fn complete(&mut self, slot: u8) {
        if let Some(s) = self.sessions.get_mut(slot as usize) {
            *s = None;
        }
    }

    pub fn abort(&mut self, slot: u8) {
        self.complete(slot);
    }

    pub fn check_timeouts(&mut self) {
        let now = Instant::now();
        for slot in self.sessions.iter_mut() {
            if let Some(s) = slot {
                if now.duration_since(s.last_activity) >= SESSION_TIMEOUT {
                    *slot = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip_on_arbitrary_bytes() {
        let data: Vec<u8> = (0..=255u8).collect();
        let encoded = encode_7bit(&data);
        assert_eq!(encoded.len() % 8, 0);
        let decoded = decode_7bit(&encoded).unwrap();
        // data.len() isn't a multiple of 7, so the decode carries trailing
        // zero padding that the caller truncates using the announced size.
        assert_eq!(&decoded[..data.len()], &data[..]);
    }

    #[test]
    fn encode_sets_mask_bit_for_high_bytes() {
        let encoded = encode_7bit(&[0x80, 0x01]);
        assert_eq!(encoded[0], 0b0000_0001); // bit0 set for the first (0x80) byte
        assert_eq!(encoded[1], 0x00); // low 7 bits of 0x80
        assert_eq!(encoded[2], 0x01);
    }

    fn minimal_midi_bytes() -> Vec<u8> {
        let mut v = vec![];
        v.extend_from_slice(b"MThd");
        v.extend_from_slice(&6u32.to_be_bytes());
        v.extend_from_slice(&[0, 0, 0, 1, 1, 0xe0]); // format, ntrks, division
        v
    }

    #[test]
    fn full_upload_round_trip_writes_file() {
        let midi = minimal_midi_bytes();
        let encoded = encode_7bit(&midi);
        let total_chunks = (encoded.len() / 8) as u16;

        let mut mgr = UploadManager::new();
        mgr.start(0, 1, total_chunks, midi.len() as u16).unwrap();
        for (i, block) in encoded.chunks(8).enumerate() {
            mgr.chunk(0, i as u16, block).unwrap();
        }

        let dir = std::env::temp_dir().join("samplecrate-upload-test");
        mgr.complete(0, &dir).unwrap();

        let written = fs::read(dir.join("sequences").join("seq_0.mid")).unwrap();
        assert_eq!(written, midi);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn out_of_order_chunk_aborts_session() {
        let mut mgr = UploadManager::new();
        mgr.start(0, 0, 2, 14).unwrap();
        let block = encode_7bit(&[0u8; 7]);
        assert!(mgr.chunk(0, 1, &block).is_err());
        assert_eq!(mgr.state(0), UploadState::Error);
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let mut mgr = UploadManager::new();
        let err = mgr.start(0, 0, 100, (MAX_FILE_SIZE + 1) as u16);
        assert!(err.is_err());
    }

    #[test]
    fn download_round_trip_matches_uploaded_file() {
        let midi = minimal_midi_bytes();
        let dir = std::env::temp_dir().join("samplecrate-download-test");
        fs::create_dir_all(dir.join("sequences")).unwrap();
        fs::write(dir.join("sequences").join("seq_2.mid"), &midi).unwrap();

        let mut mgr = DownloadManager::new();
        let (_, total_chunks, file_size) = mgr.start(2, &dir, 0).unwrap();
        assert_eq!(file_size as usize, midi.len());

        let mut reassembled = Vec::new();
        for i in 0..total_chunks {
            let encoded = mgr.get_chunk(2, i).unwrap();
            reassembled.extend(decode_7bit(&encoded).unwrap());
        }
        reassembled.truncate(file_size as usize);
        assert_eq!(reassembled, midi);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn non_mthd_buffer_fails_completion() {
        let mut mgr = UploadManager::new();
        mgr.start(0, 0, 1, 8).unwrap();
        let encoded = encode_7bit(b"NOTMIDI!");
        mgr.chunk(0, 0, &encoded).unwrap();
        let dir = std::env::temp_dir().join("samplecrate-bad-upload-test");
        assert!(mgr.complete(0, &dir).is_err());
        fs::remove_dir_all(&dir).ok();
    }
}
