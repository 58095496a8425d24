// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PCAP emission with the TI radio-packet-info envelope.
//!
//! # Capture layout
//!
//! ```text
//! +---------------------------------------------------------+
//! |              Global Header (24 bytes)                   |
//! |  magic | 2.4 | thiszone | sigfigs | snaplen | DLT 228   |
//! +---------------------------------------------------------+
//! |              Record Header (16 bytes)                   |
//! |  ts_sec | ts_usec | incl_len | orig_len                 |
//! +---------------------------------------------------------+
//! |              Record Body (44 + payload bytes)           |
//! |  IPv4 (20) | UDP (8) | TI radio packet info | PDU       |
//! +---------------------------------------------------------+
//! |  ...                                                    |
//! +---------------------------------------------------------+
//! ```
//!
//! The link type is 228 (raw IPv4): the vendor dissector expects an
//! IPv4/UDP carrier around its radio-packet-info layer, so each record wraps
//! the PDU in fixed header templates with only the length fields patched.
//! Pure 802.15.4 captures would use DLT 195/215 and no envelope, but that
//! breaks the TI dissector.
//!
//! `ts_sec` is pure Unix time anchored on the first packet so the capture
//! starts at the wall-clock open time; the local timezone offset is recorded
//! once in the global header's `thiszone` field. `ts_usec` carries true
//! microseconds within the second.

use crate::packet::EnrichedPacket;
use crate::sink::CaptureSink;
use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian, WriteBytesExt};
use chrono::Local;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// PCAP magic, written in the host's byte order; readers detect endianness.
pub const MAGIC: u32 = 0xA1B2_C3D4;
pub const VERSION_MAJOR: u16 = 2;
pub const VERSION_MINOR: u16 = 4;
/// Maximum captured-packet length advertised in the global header.
pub const SNAPLEN: u32 = 262_144;
/// DLT_IPV4.
pub const LINKTYPE_IPV4: u32 = 228;

/// IPv4 header template; bytes 2..4 get the record-body length.
const IPV4_TEMPLATE: [u8; 20] = [
    0x45, 0x00, 0x00, 0x5B, 0x00, 0x00, 0x00, 0x00, 0x80, 0x11, 0xB7, 0x3B, 0xC0, 0xA8, 0x01,
    0x03, 0xC0, 0xA8, 0x01, 0x03,
];
/// UDP header template; bytes 4..6 get the UDP length.
const UDP_TEMPLATE: [u8; 8] = [0x45, 0x60, 0x45, 0x60, 0x00, 0x47, 0x1D, 0x82];
/// Leading marker of the TI radio packet info block.
const TI_HEADER: [u8; 4] = [0x00, 0x3C, 0x00, 0x00];
/// Separator between the interface and PHY fields.
const TI_SEPARATOR: u8 = 0x02;
/// FCS-present marker the dissector expects.
const TI_FCS_MARKER: u8 = 0x80;

/// Fixed envelope bytes around each radio PDU: IPv4 + UDP + TI block
/// (header, interface, separator, phy, frequency, channel, rssi, fcs).
pub const ENVELOPE_LEN: usize = 20 + 8 + 4 + 2 + 1 + 1 + 4 + 2 + 1 + 1;

/// PCAP emission failures.
#[derive(Debug, Error)]
pub enum PcapError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("pcap output is not open")]
    NotOpen,
}

/// Streams one PCAP capture to a file or named pipe.
///
/// Owned by the capture session; construction captures the timezone offset,
/// [`open`](Self::open) snapshots the wall clock, and the first packet
/// anchors board time to it.
pub struct PcapBuilder {
    sink: Option<CaptureSink>,
    thiszone: i32,
    anchor: i64,
    first_packet_seen: bool,
}

impl PcapBuilder {
    pub fn new() -> Self {
        Self {
            sink: None,
            thiszone: Local::now().offset().local_minus_utc(),
            anchor: 0,
            first_packet_seen: false,
        }
    }

    /// Open the output endpoint. With `is_pipe` the name is a named-pipe or
    /// FIFO name and the call blocks until a reader attaches; otherwise it
    /// is a file path, truncated on open.
    pub fn open(&mut self, name: &str, is_pipe: bool) -> Result<(), PcapError> {
        let sink = if is_pipe {
            CaptureSink::open_pipe(name)?
        } else {
            CaptureSink::create_file(name)?
        };
        self.sink = Some(sink);
        self.anchor = unix_now();
        self.first_packet_seen = false;
        info!("pcap output {name} open");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Write the 24-byte global header.
    pub fn write_global_header(&mut self) -> Result<(), PcapError> {
        let mut buf = Vec::with_capacity(24);
        buf.write_u32::<NativeEndian>(MAGIC)?;
        buf.write_u16::<NativeEndian>(VERSION_MAJOR)?;
        buf.write_u16::<NativeEndian>(VERSION_MINOR)?;
        buf.write_i32::<NativeEndian>(self.thiszone)?;
        buf.write_u32::<NativeEndian>(0)?; // sigfigs
        buf.write_u32::<NativeEndian>(SNAPLEN)?;
        buf.write_u32::<NativeEndian>(LINKTYPE_IPV4)?;
        self.sink_mut()?.write(&buf)?;
        debug!("global header written (thiszone {}s)", self.thiszone);
        Ok(())
    }

    /// Record-body length for a packet: envelope plus radio PDU.
    pub fn record_len(packet: &EnrichedPacket) -> usize {
        ENVELOPE_LEN + packet.data.payload.len()
    }

    /// Write the 16-byte record header. The first packet anchors the board's
    /// microsecond counter to the wall-clock open time.
    pub fn write_packet_header(&mut self, packet: &EnrichedPacket) -> Result<(), PcapError> {
        let ts_us = packet.data.timestamp_us;
        let ts_sec_rel = (ts_us / 1_000_000) as i64;
        if !self.first_packet_seen {
            self.first_packet_seen = true;
            self.anchor -= ts_sec_rel;
        }
        let ts_sec = self.anchor + ts_sec_rel;
        let ts_usec = (ts_us % 1_000_000) as u32;
        let total = Self::record_len(packet) as u32;

        let mut buf = Vec::with_capacity(16);
        buf.write_u32::<NativeEndian>(ts_sec as u32)?;
        buf.write_u32::<NativeEndian>(ts_usec)?;
        buf.write_u32::<NativeEndian>(total)?; // incl_len
        buf.write_u32::<NativeEndian>(total)?; // orig_len
        self.sink_mut()?.write(&buf)?;
        Ok(())
    }

    /// Write the record body: patched IPv4/UDP carrier, TI radio packet
    /// info, then the radio PDU.
    pub fn write_packet(&mut self, packet: &EnrichedPacket) -> Result<(), PcapError> {
        let total = Self::record_len(packet) as u16;
        let mut ipv4 = IPV4_TEMPLATE;
        BigEndian::write_u16(&mut ipv4[2..4], total);
        let mut udp = UDP_TEMPLATE;
        BigEndian::write_u16(&mut udp[4..6], total - IPV4_TEMPLATE.len() as u16);

        let config = &packet.config;
        let mut buf = Vec::with_capacity(usize::from(total));
        buf.extend_from_slice(&ipv4);
        buf.extend_from_slice(&udp);
        buf.extend_from_slice(&TI_HEADER);
        buf.write_u16::<LittleEndian>(config.interface)?;
        buf.push(TI_SEPARATOR);
        buf.push(config.phy);
        buf.extend_from_slice(&config.frequency);
        buf.write_u16::<LittleEndian>(config.channel)?;
        buf.push(packet.data.rssi_raw);
        buf.push(TI_FCS_MARKER);
        buf.extend_from_slice(&packet.data.payload);
        self.sink_mut()?.write(&buf)?;
        Ok(())
    }

    /// Record header plus body.
    pub fn write_record(&mut self, packet: &EnrichedPacket) -> Result<(), PcapError> {
        self.write_packet_header(packet)?;
        self.write_packet(packet)
    }

    pub fn flush(&mut self) -> Result<(), PcapError> {
        self.sink_mut()?.flush()?;
        Ok(())
    }

    /// Flush and close the output; removes a FIFO's inode. Idempotent.
    pub fn close(&mut self) -> Result<(), PcapError> {
        if let Some(mut sink) = self.sink.take() {
            sink.flush()?;
            sink.close()?;
        }
        Ok(())
    }

    fn sink_mut(&mut self) -> Result<&mut CaptureSink, PcapError> {
        self.sink.as_mut().ok_or(PcapError::NotOpen)
    }
}

impl Default for PcapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{DataPacket, SnifferConfig};
    use byteorder::NativeEndian;
    use tempfile::tempdir;

    fn sample_packet(timestamp_us: u64, payload: &[u8]) -> EnrichedPacket {
        EnrichedPacket {
            data: DataPacket {
                timestamp_us,
                payload: payload.to_vec(),
                rssi_raw: 0xC5,
                status: 0x80,
            },
            config: SnifferConfig {
                interface: 5,
                phy: 0x12,
                frequency: [0x92, 0x09, 0x00, 0x00],
                channel: 20,
            },
        }
    }

    fn read_u32_ne(bytes: &[u8]) -> u32 {
        NativeEndian::read_u32(bytes)
    }

    #[test]
    fn test_global_header_layout() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("capture.pcap");

        let mut pcap = PcapBuilder::new();
        pcap.open(path.to_str().expect("path"), false).expect("open");
        pcap.write_global_header().expect("header");
        pcap.close().expect("close");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(bytes.len(), 24);
        assert_eq!(read_u32_ne(&bytes[0..4]), MAGIC);
        assert_eq!(NativeEndian::read_u16(&bytes[4..6]), 2);
        assert_eq!(NativeEndian::read_u16(&bytes[6..8]), 4);
        assert_eq!(read_u32_ne(&bytes[12..16]), 0); // sigfigs
        assert_eq!(read_u32_ne(&bytes[16..20]), SNAPLEN);
        assert_eq!(read_u32_ne(&bytes[20..24]), LINKTYPE_IPV4);
    }

    #[test]
    fn test_record_lengths_and_envelope() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("capture.pcap");

        let mut pcap = PcapBuilder::new();
        pcap.open(path.to_str().expect("path"), false).expect("open");
        pcap.write_global_header().expect("header");
        let packet = sample_packet(100_000, &[0xDE, 0xAD, 0xBE, 0xEF]);
        pcap.write_record(&packet).expect("record");
        pcap.close().expect("close");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(bytes.len(), 24 + 16 + 48);

        let header = &bytes[24..40];
        assert_eq!(read_u32_ne(&header[4..8]), 100_000); // ts_usec, microseconds
        assert_eq!(read_u32_ne(&header[8..12]), 48); // incl_len = 44 + 4
        assert_eq!(read_u32_ne(&header[12..16]), 48); // orig_len

        let body = &bytes[40..];
        assert_eq!(body.len(), 48);
        // IPv4 total length, big-endian.
        assert_eq!(&body[2..4], &[0x00, 0x30]);
        // Rest of the IPv4 template is untouched.
        assert_eq!(body[0], 0x45);
        assert_eq!(&body[12..20], &[0xC0, 0xA8, 0x01, 0x03, 0xC0, 0xA8, 0x01, 0x03]);
        // UDP length = total - 20, big-endian.
        assert_eq!(&body[24..26], &[0x00, 0x1C]);
        // TI radio packet info block.
        assert_eq!(&body[28..32], &[0x00, 0x3C, 0x00, 0x00]);
        assert_eq!(&body[32..34], &[0x05, 0x00]); // interface 5, LE
        assert_eq!(body[34], 0x02); // separator
        assert_eq!(body[35], 0x12); // phy
        assert_eq!(&body[36..40], &[0x92, 0x09, 0x00, 0x00]); // frequency
        assert_eq!(&body[40..42], &[0x14, 0x00]); // channel 20, LE
        assert_eq!(body[42], 0xC5); // rssi, raw
        assert_eq!(body[43], 0x80); // fcs marker
        assert_eq!(&body[44..48], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_first_packet_anchors_to_open_time() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("capture.pcap");

        let before = unix_now();
        let mut pcap = PcapBuilder::new();
        pcap.open(path.to_str().expect("path"), false).expect("open");
        // First packet is 3.5s of board time in; it must still land at the
        // wall-clock open second.
        pcap.write_record(&sample_packet(3_500_000, &[0x01])).expect("first");
        pcap.write_record(&sample_packet(5_250_000, &[0x02])).expect("second");
        pcap.close().expect("close");
        let after = unix_now();

        let bytes = std::fs::read(&path).expect("read back");
        let first = &bytes[0..16];
        let first_sec = i64::from(read_u32_ne(&first[0..4]));
        assert!(first_sec >= before && first_sec <= after);
        assert_eq!(read_u32_ne(&first[4..8]), 500_000);

        let second_at = 16 + 44 + 1;
        let second = &bytes[second_at..second_at + 16];
        let second_sec = i64::from(read_u32_ne(&second[0..4]));
        // 5.25s - 3.5s of board time straddles one whole second.
        assert_eq!(second_sec, first_sec + 2);
        assert_eq!(read_u32_ne(&second[4..8]), 250_000);
        assert!(second_sec >= first_sec);
    }

    #[test]
    fn test_empty_payload_record() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("capture.pcap");

        let mut pcap = PcapBuilder::new();
        pcap.open(path.to_str().expect("path"), false).expect("open");
        pcap.write_record(&sample_packet(1, &[])).expect("record");
        pcap.close().expect("close");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(bytes.len(), 16 + 44);
        assert_eq!(read_u32_ne(&bytes[8..12]), 44);
    }

    #[test]
    fn test_write_before_open_fails() {
        let mut pcap = PcapBuilder::new();
        assert!(matches!(
            pcap.write_global_header(),
            Err(PcapError::NotOpen)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("capture.pcap");
        let mut pcap = PcapBuilder::new();
        pcap.open(path.to_str().expect("path"), false).expect("open");
        pcap.close().expect("close");
        pcap.close().expect("second close");
        assert!(!pcap.is_open());
    }
}
