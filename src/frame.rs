// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sniffer UART wire framing.
//!
//! Every command and response travels in one frame:
//!
//! ```text
//! +-----+-------------+---------------+--------------+-----+-----+
//! | SOF | Packet Info | Packet Length | Command Data | FCS | EOF |
//! | 2B  | 1B          | 2B (LE)       | 0..2049B     | 1B  | 2B  |
//! +-----+-------------+---------------+--------------+-----+-----+
//! ```
//!
//! `SOF` is `40 53`, `EOF` is `40 45`. The FCS is a mod-256 sum over the
//! packet-info byte, both length bytes and the command data. The packet-info
//! byte carries the command opcode outbound and the response classifier
//! inbound (`0xC0` radio data, `0xC1` board error, anything else a command
//! response with a status byte at `command_data[0]`).

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Start-of-frame sentinel.
pub const SOF: [u8; 2] = [0x40, 0x53];
/// End-of-frame sentinel.
pub const EOF: [u8; 2] = [0x40, 0x45];

/// Smallest possible frame: sentinels, packet info, length and FCS.
pub const MIN_FRAME_LEN: usize = 8;

/// Inbound packet-info value for streamed radio data.
pub const PACKET_INFO_DATA: u8 = 0xC0;
/// Inbound packet-info value for board error reports.
pub const PACKET_INFO_ERROR: u8 = 0xC1;

/// Outbound command opcodes understood by the CC1352 sniffer firmware.
///
/// PAUSE (0x43) and RESUME (0x44) exist in the protocol document but not in
/// the firmware's control task, so they are not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    Ping = 0x40,
    Start = 0x41,
    Stop = 0x42,
    CfgFrequency = 0x45,
    CfgPhy = 0x47,
}

impl CommandKind {
    /// Wire opcode for the packet-info field.
    pub fn opcode(self) -> u8 {
        self as u8
    }
}

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream ended before the end-of-frame sentinel")]
    Truncated,

    #[error("bad start-of-frame {found:02x?}")]
    BadMagic { found: [u8; 2] },

    #[error("FCS mismatch: computed {computed:#04x}, frame carries {found:#04x}")]
    BadFcs { computed: u8, found: u8 },

    #[error("length field declares {declared} bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// One decoded frame: the packet-info byte plus its command data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub packet_info: u8,
    pub command_data: Vec<u8>,
}

impl Frame {
    /// Streamed radio data (`0xC0`)?
    pub fn is_data(&self) -> bool {
        self.packet_info == PACKET_INFO_DATA
    }

    /// Board error report (`0xC1`)?
    pub fn is_error(&self) -> bool {
        self.packet_info == PACKET_INFO_ERROR
    }
}

/// Mod-256 checksum over packet info, both length bytes and command data.
pub fn fcs(packet_info: u8, command_data: &[u8]) -> u8 {
    let len = command_data.len() as u16;
    let mut sum = u32::from(packet_info) + u32::from(len & 0xFF) + u32::from(len >> 8);
    for &byte in command_data {
        sum += u32::from(byte);
    }
    (sum & 0xFF) as u8
}

/// Encode one outbound command frame. Command data may be empty.
pub fn encode(kind: CommandKind, command_data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(command_data.len() + MIN_FRAME_LEN);
    out.extend_from_slice(&SOF);
    out.push(kind.opcode());
    let mut len = [0u8; 2];
    LittleEndian::write_u16(&mut len, command_data.len() as u16);
    out.extend_from_slice(&len);
    out.extend_from_slice(command_data);
    out.push(fcs(kind.opcode(), command_data));
    out.extend_from_slice(&EOF);
    out
}

/// Split a complete frame (SOF through EOF inclusive) into its fields.
///
/// The byte-wise accumulation up to the EOF sentinel lives in
/// [`crate::transport::Transport::read_until`]; this is the positional half
/// of the decoder. There is no resynchronization: command data that happens
/// to contain the sentinel shortens the observed frame, which then fails the
/// length check here.
pub fn parse(raw: &[u8]) -> Result<Frame, FrameError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(FrameError::Truncated);
    }
    if raw[..2] != SOF {
        return Err(FrameError::BadMagic {
            found: [raw[0], raw[1]],
        });
    }
    let packet_info = raw[2];
    let declared = LittleEndian::read_u16(&raw[3..5]) as usize;
    let command_data = &raw[5..raw.len() - 3];
    if declared != command_data.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: command_data.len(),
        });
    }
    let found = raw[raw.len() - 3];
    let computed = fcs(packet_info, command_data);
    if computed != found {
        return Err(FrameError::BadFcs { computed, found });
    }
    Ok(Frame {
        packet_info,
        command_data: command_data.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_frame(packet_info: u8, command_data: &[u8]) -> Vec<u8> {
        let mut raw = vec![0x40, 0x53, packet_info];
        raw.extend_from_slice(&(command_data.len() as u16).to_le_bytes());
        raw.extend_from_slice(command_data);
        raw.push(fcs(packet_info, command_data));
        raw.extend_from_slice(&[0x40, 0x45]);
        raw
    }

    #[test]
    fn test_encode_ping() {
        assert_eq!(
            encode(CommandKind::Ping, &[]),
            [0x40, 0x53, 0x40, 0x00, 0x00, 0x40, 0x40, 0x45]
        );
    }

    #[test]
    fn test_encode_start_stop() {
        assert_eq!(
            encode(CommandKind::Start, &[]),
            [0x40, 0x53, 0x41, 0x00, 0x00, 0x41, 0x40, 0x45]
        );
        assert_eq!(
            encode(CommandKind::Stop, &[]),
            [0x40, 0x53, 0x42, 0x00, 0x00, 0x42, 0x40, 0x45]
        );
    }

    #[test]
    fn test_encode_frequency_2450() {
        // 2450.0 MHz: whole 0x0992 LE, zero fraction.
        let frame = encode(CommandKind::CfgFrequency, &[0x92, 0x09, 0x00, 0x00]);
        assert_eq!(
            frame,
            [0x40, 0x53, 0x45, 0x04, 0x00, 0x92, 0x09, 0x00, 0x00, 0xE4, 0x40, 0x45]
        );
    }

    #[test]
    fn test_encode_phy() {
        let frame = encode(CommandKind::CfgPhy, &[0x11]);
        assert_eq!(frame, [0x40, 0x53, 0x47, 0x01, 0x00, 0x11, 0x59, 0x40, 0x45]);
    }

    #[test]
    fn test_roundtrip_various_payloads() {
        for kind in [
            CommandKind::Ping,
            CommandKind::Start,
            CommandKind::Stop,
            CommandKind::CfgFrequency,
            CommandKind::CfgPhy,
        ] {
            for len in [0usize, 1, 4, 255] {
                let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
                let encoded = encode(kind, &payload);
                let decoded = parse(&encoded).expect("roundtrip");
                assert_eq!(decoded.packet_info, kind.opcode());
                assert_eq!(decoded.command_data, payload);
            }
        }
    }

    #[test]
    fn test_fcs_formula() {
        let payload = [0x92u8, 0x09, 0x00, 0x00];
        let sum: u32 = 0x45 + 0x04 + 0x00 + payload.iter().map(|&b| u32::from(b)).sum::<u32>();
        assert_eq!(fcs(0x45, &payload), (sum & 0xFF) as u8);
        assert_eq!(fcs(0x45, &payload), 0xE4);
    }

    #[test]
    fn test_parse_bad_magic() {
        let mut raw = wire_frame(0x80, &[0x00]);
        raw[0] = 0x41;
        match parse(&raw) {
            Err(FrameError::BadMagic { found }) => assert_eq!(found, [0x41, 0x53]),
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_bad_fcs() {
        let mut raw = wire_frame(0x80, &[0x00]);
        let fcs_at = raw.len() - 3;
        raw[fcs_at] = raw[fcs_at].wrapping_add(1);
        assert!(matches!(parse(&raw), Err(FrameError::BadFcs { .. })));
    }

    #[test]
    fn test_parse_length_mismatch() {
        let mut raw = wire_frame(0x80, &[0x00, 0x01]);
        // Declare one byte more than the frame carries.
        raw[3] = 3;
        match parse(&raw) {
            Err(FrameError::LengthMismatch { declared, actual }) => {
                assert_eq!(declared, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected LengthMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_truncated() {
        assert!(matches!(parse(&[]), Err(FrameError::Truncated)));
        assert!(matches!(parse(&[0x40, 0x53, 0xC0]), Err(FrameError::Truncated)));
    }

    #[test]
    fn test_sentinel_inside_command_data_shortens_frame() {
        // A transport scanning for EOF stops at the embedded sentinel; the
        // resulting prefix must not parse as a valid frame.
        let raw = wire_frame(0xC0, &[0xAA, 0x40, 0x45, 0xBB]);
        let cut = raw
            .windows(2)
            .position(|w| w == EOF)
            .map(|at| &raw[..at + 2])
            .expect("sentinel present");
        assert!(matches!(
            parse(cut),
            Err(FrameError::LengthMismatch { .. }) | Err(FrameError::BadFcs { .. })
        ));
    }
}
