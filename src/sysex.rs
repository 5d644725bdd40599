//! The SysEx wire protocol for remote control and file transfer.
//!
//! `F0 7D <target_dev> <cmd> <data...> F7`. Target `0x7F` is broadcast; a
//! frame is accepted only when `target == local_device_id || target ==
//! BROADCAST`. All data bytes are 7-bit (the top bit is always clear).

use crate::error::{Result, SamplecrateError};

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
/// Manufacturer/model ID byte following `SYSEX_START`.
pub const DEVICE_TAG: u8 = 0x7D;
pub const BROADCAST_DEVICE: u8 = 0x7F;

/// Effect identifiers used by `FX_EFFECT_GET`/`FX_EFFECT_SET` and the
/// `FX_STATE_RESPONSE` blob. Order matches the response body's field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectId {
    Distortion,
    Filter,
    Eq,
    Compressor,
    Delay,
}

impl EffectId {
    pub fn param_count(self) -> usize {
        match self {
            EffectId::Distortion => 2,
            EffectId::Filter => 2,
            EffectId::Eq => 3,
            EffectId::Compressor => 5,
            EffectId::Delay => 3,
        }
    }

    fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(EffectId::Distortion),
            1 => Some(EffectId::Filter),
            2 => Some(EffectId::Eq),
            3 => Some(EffectId::Compressor),
            4 => Some(EffectId::Delay),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            EffectId::Distortion => 0,
            EffectId::Filter => 1,
            EffectId::Eq => 2,
            EffectId::Compressor => 3,
            EffectId::Delay => 4,
        }
    }
}

/// Every sequence-track subcommand is handled in `transfer.rs`; this enum
/// only distinguishes them at the dispatch layer so `parse` can return a
/// single flat type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceTrackCmd {
    Upload { slot: u8, data: Vec<u8> },
    Play { slot: u8 },
    Stop { slot: u8 },
    Mute { slot: u8, mute: bool },
    Solo { slot: u8, solo: bool },
    GetState { slot: u8 },
    StateResponse { slot: u8, data: Vec<u8> },
    Clear { slot: u8 },
    List,
    Download { slot: u8 },
    DownloadResponse { slot: u8, data: Vec<u8> },
    UploadResponse { slot: u8, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysexMessage {
    Ping,
    FileLoad { name: String },
    Play,
    Stop,
    Pause,
    ChannelMute { channel: u8, mute: bool },
    ChannelSolo { channel: u8, solo: bool },
    ChannelVolume { channel: u8, volume: u8 },
    SetPosition { position: u16 },
    SetBpm { bpm_raw: u16 },
    TriggerPad { pad: u8 },
    FxEffectGet { program: u8, effect: EffectId },
    FxEffectSet { program: u8, effect: EffectId, enabled: bool, params: Vec<u8> },
    FxGetAllState { program: u8 },
    FxStateResponse(FxStateResponse),
    SequenceTrack(SequenceTrackCmd),
}

/// Fixed 32-byte `FX_GET_ALL_STATE` reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FxStateResponse {
    pub program_id: u8,
    pub version: u8,
    pub fx_route: u8,
    /// bit0..4 = dist, filt, eq, comp, delay.
    pub enable_flags: u8,
    pub dist: [u8; 2],
    pub filt: [u8; 2],
    pub eq: [u8; 3],
    pub comp: [u8; 5],
    pub delay: [u8; 3],
}

const FX_STATE_BODY_LEN: usize = 32;

impl FxStateResponse {
    pub fn to_bytes(&self) -> [u8; FX_STATE_BODY_LEN] {
        let mut out = [0u8; FX_STATE_BODY_LEN];
        out[0] = self.program_id;
        out[1] = self.version;
        out[2] = self.fx_route;
        out[3] = self.enable_flags;
        out[4..6].copy_from_slice(&self.dist);
        out[6..8].copy_from_slice(&self.filt);
        out[8..11].copy_from_slice(&self.eq);
        out[11..16].copy_from_slice(&self.comp);
        out[16..19].copy_from_slice(&self.delay);
        // out[19..32] stays reserved/zero.
        out
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        if b.len() != FX_STATE_BODY_LEN {
            return Err(SamplecrateError::Protocol(format!(
                "FX_STATE_RESPONSE body must be {FX_STATE_BODY_LEN} bytes, got {}",
                b.len()
            )));
        }
        Ok(FxStateResponse {
            program_id: b[0],
            version: b[1],
            fx_route: b[2],
            enable_flags: b[3],
            dist: [b[4], b[5]],
            filt: [b[6], b[7]],
            eq: [b[8], b[9], b[10]],
            comp: [b[11], b[12], b[13], b[14], b[15]],
            delay: [b[16], b[17], b[18]],
        })
    }
}

mod cmd {
    pub const PING: u8 = 0x01;
    pub const FILE_LOAD: u8 = 0x10;
    pub const PLAY: u8 = 0x20;
    pub const STOP: u8 = 0x21;
    pub const PAUSE: u8 = 0x22;
    pub const CHANNEL_MUTE: u8 = 0x30;
    pub const CHANNEL_SOLO: u8 = 0x31;
    pub const CHANNEL_VOLUME: u8 = 0x32;
    pub const SET_POSITION: u8 = 0x40;
    pub const SET_BPM: u8 = 0x41;
    pub const TRIGGER_PAD: u8 = 0x50;
    pub const FX_EFFECT_GET: u8 = 0x70;
    pub const FX_EFFECT_SET: u8 = 0x71;
    pub const FX_GET_ALL_STATE: u8 = 0x7E;
    pub const FX_STATE_RESPONSE: u8 = 0x7F;
    pub const SEQ_UPLOAD: u8 = 0x80;
    pub const SEQ_PLAY: u8 = 0x81;
    pub const SEQ_STOP: u8 = 0x82;
    pub const SEQ_MUTE: u8 = 0x83;
    pub const SEQ_SOLO: u8 = 0x84;
    pub const SEQ_GET_STATE: u8 = 0x85;
    pub const SEQ_STATE_RESPONSE: u8 = 0x86;
    pub const SEQ_CLEAR: u8 = 0x87;
    pub const SEQ_LIST: u8 = 0x88;
    pub const SEQ_DOWNLOAD: u8 = 0x89;
    pub const SEQ_DOWNLOAD_RESPONSE: u8 = 0x8A;
    pub const SEQ_UPLOAD_RESPONSE: u8 = 0x8B;
}

fn check_7bit(bytes: &[u8]) -> Result<()> {
    if bytes.iter().any(|b| *b & 0x80 != 0) {
        return Err(SamplecrateError::Protocol(
            "SysEx data byte has the top bit set".into(),
        ));
    }
    Ok(())
}

fn u16_from_lsb_msb(lsb: u8, msb: u8) -> u16 {
    (lsb as u16) | ((msb as u16) << 7)
}

fn u16_to_lsb_msb(v: u16) -> (u8, u8) {
    ((v & 0x7f) as u8, ((v >> 7) & 0x7f) as u8)
}

/// Parses a full frame including `F0`/`F7` framing. Rejects a frame whose
/// target doesn't match `local_device_id` (unless it's a broadcast).
pub fn parse(frame: &[u8], local_device_id: u8) -> Result<SysexMessage> {
    if frame.len() < 4 {
        return Err(SamplecrateError::Protocol("frame too short".into()));
    }
    if frame[0] != SYSEX_START || *frame.last().unwrap() != SYSEX_END {
        return Err(SamplecrateError::Protocol("missing F0/F7 framing".into()));
    }
    if frame[1] != DEVICE_TAG {
        return Err(SamplecrateError::Protocol("unrecognized device tag".into()));
    }
    let target = frame[2];
    if target != local_device_id && target != BROADCAST_DEVICE {
        return Err(SamplecrateError::Protocol(format!(
            "frame targets device {target}, not us"
        )));
    }
    let command = frame[3];
    let data = &frame[4..frame.len() - 1];
    check_7bit(data)?;

    parse_command(command, data)
}

fn parse_command(command: u8, data: &[u8]) -> Result<SysexMessage> {
    use cmd::*;
    match command {
        PING => Ok(SysexMessage::Ping),
        FILE_LOAD => {
            let len = *data.first().ok_or_else(|| proto("FILE_LOAD missing length"))? as usize;
            let name_bytes = data.get(1..1 + len).ok_or_else(|| proto("FILE_LOAD name truncated"))?;
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|_| SamplecrateError::Protocol("FILE_LOAD name is not UTF-8".into()))?;
            Ok(SysexMessage::FileLoad { name })
        }
        PLAY => Ok(SysexMessage::Play),
        STOP => Ok(SysexMessage::Stop),
        PAUSE => Ok(SysexMessage::Pause),
        CHANNEL_MUTE => Ok(SysexMessage::ChannelMute {
            channel: byte_at(data, 0)?,
            mute: byte_at(data, 1)? != 0,
        }),
        CHANNEL_SOLO => Ok(SysexMessage::ChannelSolo {
            channel: byte_at(data, 0)?,
            solo: byte_at(data, 1)? != 0,
        }),
        CHANNEL_VOLUME => Ok(SysexMessage::ChannelVolume {
            channel: byte_at(data, 0)?,
            volume: byte_at(data, 1)?,
        }),
        SET_POSITION => Ok(SysexMessage::SetPosition {
            position: u16_from_lsb_msb(byte_at(data, 0)?, byte_at(data, 1)?),
        }),
        SET_BPM => Ok(SysexMessage::SetBpm {
            bpm_raw: u16_from_lsb_msb(byte_at(data, 0)?, byte_at(data, 1)?),
        }),
        TRIGGER_PAD => Ok(SysexMessage::TriggerPad { pad: byte_at(data, 0)? }),
        FX_EFFECT_GET => Ok(SysexMessage::FxEffectGet {
            program: byte_at(data, 0)?,
            effect: effect_at(data, 1)?,
        }),
        FX_EFFECT_SET => {
            let program = byte_at(data, 0)?;
            let effect = effect_at(data, 1)?;
            let enabled = byte_at(data, 2)? != 0;
            let params = data.get(3..).unwrap_or(&[]).to_vec();
            Ok(SysexMessage::FxEffectSet {
                program,
                effect,
                enabled,
                params,
            })
        }
        FX_GET_ALL_STATE => Ok(SysexMessage::FxGetAllState { program: byte_at(data, 0)? }),
        FX_STATE_RESPONSE => Ok(SysexMessage::FxStateResponse(FxStateResponse::from_bytes(data)?)),

        SEQ_UPLOAD => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::Upload {
            slot: byte_at(data, 0)?,
            data: data.get(1..).unwrap_or(&[]).to_vec(),
        })),
        SEQ_PLAY => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::Play { slot: byte_at(data, 0)? })),
        SEQ_STOP => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::Stop { slot: byte_at(data, 0)? })),
        SEQ_MUTE => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::Mute {
            slot: byte_at(data, 0)?,
            mute: byte_at(data, 1)? != 0,
        })),
        SEQ_SOLO => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::Solo {
            slot: byte_at(data, 0)?,
            solo: byte_at(data, 1)? != 0,
        })),
        SEQ_GET_STATE => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::GetState { slot: byte_at(data, 0)? })),
        SEQ_STATE_RESPONSE => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::StateResponse {
            slot: byte_at(data, 0)?,
            data: data.get(1..).unwrap_or(&[]).to_vec(),
        })),
        SEQ_CLEAR => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::Clear { slot: byte_at(data, 0)? })),
        SEQ_LIST => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::List)),
        SEQ_DOWNLOAD => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::Download { slot: byte_at(data, 0)? })),
        SEQ_DOWNLOAD_RESPONSE => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::DownloadResponse {
            slot: byte_at(data, 0)?,
            data: data.get(1..).unwrap_or(&[]).to_vec(),
        })),
        SEQ_UPLOAD_RESPONSE => Ok(SysexMessage::SequenceTrack(SequenceTrackCmd::UploadResponse {
            slot: byte_at(data, 0)?,
            data: data.get(1..).unwrap_or(&[]).to_vec(),
        })),

        other => Err(SamplecrateError::Protocol(format!("unknown command byte {other:#04x}"))),
    }
}

fn proto(msg: &str) -> SamplecrateError {
    SamplecrateError::Protocol(msg.to_string())
}

fn byte_at(data: &[u8], idx: usize) -> Result<u8> {
    data.get(idx).copied().ok_or_else(|| proto("frame data truncated"))
}

fn effect_at(data: &[u8], idx: usize) -> Result<EffectId> {
    let b = byte_at(data, idx)?;
    EffectId::from_wire(b).ok_or_else(|| proto("unknown effect id"))
}

/// Wraps `command`/`data` with `F0 7D <target> <cmd> ... F7` framing,
/// validating that all data bytes are 7-bit.
pub fn build_frame(target: u8, command: u8, data: &[u8]) -> Result<Vec<u8>> {
    check_7bit(data)?;
    let mut out = Vec::with_capacity(4 + data.len());
    out.push(SYSEX_START);
    out.push(DEVICE_TAG);
    out.push(target);
    out.push(command);
    out.extend_from_slice(data);
    out.push(SYSEX_END);
    Ok(out)
}

pub fn build_ping(target: u8) -> Vec<u8> {
    build_frame(target, cmd::PING, &[]).expect("PING has no data bytes")
}

pub fn build_set_bpm(target: u8, bpm_raw: u16) -> Result<Vec<u8>> {
    let (lsb, msb) = u16_to_lsb_msb(bpm_raw);
    build_frame(target, cmd::SET_BPM, &[lsb, msb])
}

pub fn build_set_position(target: u8, position: u16) -> Result<Vec<u8>> {
    let (lsb, msb) = u16_to_lsb_msb(position);
    build_frame(target, cmd::SET_POSITION, &[lsb, msb])
}

pub fn build_fx_state_response(target: u8, state: &FxStateResponse) -> Result<Vec<u8>> {
    build_frame(target, cmd::FX_STATE_RESPONSE, &state.to_bytes())
}

pub fn build_sequence_track_cmd(target: u8, cmd: &SequenceTrackCmd) -> Result<Vec<u8>> {
    use cmd as wire;
    match cmd {
        SequenceTrackCmd::Upload { slot, data } => {
            let mut body = vec![*slot];
            body.extend_from_slice(data);
            build_frame(target, wire::SEQ_UPLOAD, &body)
        }
        SequenceTrackCmd::Play { slot } => build_frame(target, wire::SEQ_PLAY, &[*slot]),
        SequenceTrackCmd::Stop { slot } => build_frame(target, wire::SEQ_STOP, &[*slot]),
        SequenceTrackCmd::Mute { slot, mute } => {
            build_frame(target, wire::SEQ_MUTE, &[*slot, *mute as u8])
        }
        SequenceTrackCmd::Solo { slot, solo } => {
            build_frame(target, wire::SEQ_SOLO, &[*slot, *solo as u8])
        }
        SequenceTrackCmd::GetState { slot } => build_frame(target, wire::SEQ_GET_STATE, &[*slot]),
        SequenceTrackCmd::StateResponse { slot, data } => {
            let mut body = vec![*slot];
            body.extend_from_slice(data);
            build_frame(target, wire::SEQ_STATE_RESPONSE, &body)
        }
        SequenceTrackCmd::Clear { slot } => build_frame(target, wire::SEQ_CLEAR, &[*slot]),
        SequenceTrackCmd::List => build_frame(target, wire::SEQ_LIST, &[]),
        SequenceTrackCmd::Download { slot } => build_frame(target, wire::SEQ_DOWNLOAD, &[*slot]),
        SequenceTrackCmd::DownloadResponse { slot, data } => {
            let mut body = vec![*slot];
            body.extend_from_slice(data);
            build_frame(target, wire::SEQ_DOWNLOAD_RESPONSE, &body)
        }
        SequenceTrackCmd::UploadResponse { slot, data } => {
            let mut body = vec![*slot];
            body.extend_from_slice(data);
            build_frame(target, wire::SEQ_UPLOAD_RESPONSE, &body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips() {
        let frame = build_ping(5);
        let msg = parse(&frame, 5).unwrap();
        assert_eq!(msg, SysexMessage::Ping);
    }

    #[test]
    fn broadcast_target_is_always_accepted() {
        let frame = build_ping(BROADCAST_DEVICE);
        assert!(parse(&frame, 42).is_ok());
    }

    #[test]
    fn mismatched_target_is_rejected() {
        let frame = build_ping(5);
        assert!(parse(&frame, 6).is_err());
    }

    #[test]
    fn set_bpm_round_trips_14_bit_value() {
        let frame = build_set_bpm(1, 12345).unwrap();
        match parse(&frame, 1).unwrap() {
            SysexMessage::SetBpm { bpm_raw } => assert_eq!(bpm_raw, 12345),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fx_state_response_round_trips_32_byte_body() {
        let state = FxStateResponse {
            program_id: 2,
            version: 1,
            fx_route: 0,
            enable_flags: 0b10101,
            dist: [10, 20],
            filt: [30, 40],
            eq: [1, 2, 3],
            comp: [4, 5, 6, 7, 8],
            delay: [9, 10, 11],
        };
        let frame = build_fx_state_response(9, &state).unwrap();
        match parse(&frame, 9).unwrap() {
            SysexMessage::FxStateResponse(got) => assert_eq!(got, state),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn top_bit_set_data_byte_is_rejected() {
        let err = build_frame(0, cmd::PING, &[0x80]).unwrap_err();
        matches!(err, SamplecrateError::Protocol(_));
    }

    #[test]
    fn sequence_track_upload_round_trips_with_arbitrary_payload() {
        let original = SequenceTrackCmd::Upload {
            slot: 3,
            data: vec![1, 2, 3, 4, 5],
        };
        let frame = build_sequence_track_cmd(0, &original).unwrap();
        match parse(&frame, 0).unwrap() {
            SysexMessage::SequenceTrack(got) => assert_eq!(got, original),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn too_short_frame_is_an_error() {
        assert!(parse(&[SYSEX_START, DEVICE_TAG], 0).is_err());
    }
}
