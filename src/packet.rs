// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoded board payloads: radio data packets, board identity and the
//! capture-time radio configuration.
//!
//! A DATA frame's command data decomposes as:
//!
//! ```text
//! +-----------+----------+------+--------+
//! | Timestamp | Payload  | RSSI | Status |
//! | 6B (LE)   | 0..2049B | 1B   | 1B     |
//! +-----------+----------+------+--------+
//! ```

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// PHY table index for CC1352P7 Sub-GHz capture.
pub const PHY_CC1352_SUBGHZ: u8 = 0x11;
/// PHY table index for CC1352P7 2.4 GHz IEEE 802.15.4 capture.
pub const PHY_CC1352_2_4GHZ: u8 = 0x12;

/// Problems with a single inbound packet. The stream loop logs these and
/// keeps running; they are never fatal on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("board reports receive buffer overflow")]
    RxBufOverflow,

    #[error("board reports unknown error code {0:#04x}")]
    Unknown(u8),

    #[error("command data too short: {0} byte(s)")]
    Malformed(usize),
}

impl PacketError {
    /// Classify an ERROR frame by the first byte of its command data.
    pub fn classify(code: u8) -> Self {
        match code {
            0x01 => PacketError::RxBufOverflow,
            other => PacketError::Unknown(other),
        }
    }
}

/// Interpret the one-byte wire RSSI as signed dBm.
pub fn rssi_to_dbm(raw: u8) -> i8 {
    raw as i8
}

/// One captured radio PDU with its sniffer-side metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Microseconds since the board started capturing.
    pub timestamp_us: u64,
    /// Raw radio PDU.
    pub payload: Vec<u8>,
    /// RSSI in unsigned wire form.
    pub rssi_raw: u8,
    /// CRC/correlator status byte, carried verbatim.
    pub status: u8,
}

impl DataPacket {
    /// Minimum command-data size: 6-byte timestamp plus RSSI and status.
    pub const MIN_LEN: usize = 8;

    /// Decompose a DATA frame's command data.
    pub fn parse(command_data: &[u8]) -> Result<Self, PacketError> {
        if command_data.len() < Self::MIN_LEN {
            return Err(PacketError::Malformed(command_data.len()));
        }
        let end = command_data.len();
        Ok(Self {
            timestamp_us: LittleEndian::read_u48(&command_data[..6]),
            payload: command_data[6..end - 2].to_vec(),
            rssi_raw: command_data[end - 2],
            status: command_data[end - 1],
        })
    }

    /// RSSI in dBm.
    pub fn rssi_dbm(&self) -> i8 {
        rssi_to_dbm(self.rssi_raw)
    }
}

/// Board identity returned by the PING command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardInfo {
    /// Command status; `0x00` is success.
    pub status: u8,
    /// Chip identifier, e.g. `0x1350`.
    pub chip_id: u16,
    /// Chip revision in BCD, e.g. `0x21` for revision 2.1.
    pub chip_rev: u8,
    /// Firmware identifier.
    pub fw_id: u8,
    /// Firmware revision; major in the high byte, minor in the low byte.
    pub fw_rev: u16,
}

impl BoardInfo {
    pub const LEN: usize = 7;

    /// Parse a PING response's command data.
    pub fn parse(command_data: &[u8]) -> Result<Self, PacketError> {
        if command_data.len() < Self::LEN {
            return Err(PacketError::Malformed(command_data.len()));
        }
        Ok(Self {
            status: command_data[0],
            chip_id: LittleEndian::read_u16(&command_data[1..3]),
            chip_rev: command_data[3],
            fw_id: command_data[4],
            fw_rev: LittleEndian::read_u16(&command_data[5..7]),
        })
    }

    pub fn fw_major(&self) -> u8 {
        (self.fw_rev >> 8) as u8
    }

    pub fn fw_minor(&self) -> u8 {
        (self.fw_rev & 0xFF) as u8
    }
}

/// Frequency argument accepted by `configure`: a real-valued MHz number or
/// the raw 4-byte wire form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frequency {
    Mhz(f64),
    Raw([u8; 4]),
}

impl Frequency {
    /// Wire form: whole MHz as LE u16, then the fractional part multiplied
    /// by 65536 and truncated to an LE u16. `(whole + frac/65536)` MHz.
    pub fn to_wire(self) -> [u8; 4] {
        match self {
            Frequency::Raw(raw) => raw,
            Frequency::Mhz(mhz) => {
                let whole = mhz.trunc() as u16;
                let frac = ((mhz - mhz.trunc()) * 65536.0) as u16;
                let mut out = [0u8; 4];
                LittleEndian::write_u16(&mut out[..2], whole);
                LittleEndian::write_u16(&mut out[2..], frac);
                out
            }
        }
    }
}

impl From<f64> for Frequency {
    fn from(mhz: f64) -> Self {
        Frequency::Mhz(mhz)
    }
}

impl From<[u8; 4]> for Frequency {
    fn from(raw: [u8; 4]) -> Self {
        Frequency::Raw(raw)
    }
}

/// Capture-time radio configuration attached to every emitted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnifferConfig {
    /// Interface number for the TI envelope, derived from the serial-port
    /// identifier's trailing digits.
    pub interface: u16,
    /// PHY table index.
    pub phy: u8,
    /// Frequency in wire form (see [`Frequency::to_wire`]).
    pub frequency: [u8; 4],
    /// Informational channel number.
    pub channel: u16,
}

impl SnifferConfig {
    /// Defaults match the board's 2.4 GHz IEEE 802.15.4 profile: 2450.0 MHz,
    /// channel 20.
    pub fn new(interface: u16) -> Self {
        Self {
            interface,
            phy: PHY_CC1352_2_4GHZ,
            frequency: [0x92, 0x09, 0x00, 0x00],
            channel: 20,
        }
    }

    /// Configured frequency in MHz.
    pub fn frequency_mhz(&self) -> f64 {
        let whole = f64::from(LittleEndian::read_u16(&self.frequency[..2]));
        let frac = f64::from(LittleEndian::read_u16(&self.frequency[2..]));
        whole + frac / 65536.0
    }
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A data packet merged with the configuration snapshot taken at dispatch,
/// so a mid-stream reconfiguration can never tear a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedPacket {
    pub data: DataPacket,
    pub config: SnifferConfig,
}

/// Trailing digits of a serial port identifier: `COM5` -> 5,
/// `/dev/ttyACM0` -> 0. Ports without trailing digits map to 0.
pub fn interface_number(port: &str) -> u16 {
    let start = port.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    port[start..].parse().unwrap_or(0)
}
