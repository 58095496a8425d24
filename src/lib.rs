// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ccsniff - TI CC1352 sniffer capture
//!
//! Drives a Texas Instruments CC1352-family IEEE 802.15.4 / Sub-GHz sniffer
//! board over its USB-serial link and emits the live radio packet stream as
//! a PCAP file, or as a PCAP stream over a named pipe that Wireshark can
//! read with the TI radio-packet-info dissector.
//!
//! # Quick Start
//!
//! ```bash
//! # Capture 30 seconds of 2.4 GHz traffic to a file
//! ccsniff /dev/ttyACM0 --output capture.pcap --duration 30
//!
//! # Stream live into Wireshark through a FIFO
//! ccsniff /dev/ttyACM0 --output wireshark --pipe &
//! wireshark -k -i /tmp/wireshark
//! ```
//!
//! # Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                        CaptureSession                            |
//! |  open sink -> connect -> start -> stream -> stop -> close        |
//! +------------------------------------------------------------------+
//! |  TISnifferController          |  PcapBuilder                     |
//! |  PING/START/STOP/CFG_* FSM,   |  global header, record headers,  |
//! |  stream loop, board errors    |  IPv4/UDP/TI envelope            |
//! +------------------------------------------------------------------+
//! |  SerialTransport              |  CaptureSink                     |
//! |  3 Mbaud 8N1, sentinel reads  |  file | POSIX FIFO | named pipe  |
//! +------------------------------------------------------------------+
//! ```
//!
//! Data flow: serial bytes -> frames ([`frame`]) -> decoded packets
//! ([`packet`]) -> PCAP records ([`pcap`]) -> sink ([`sink`]).
//!
//! # Embedding
//!
//! ```rust,no_run
//! use ccsniff::{CaptureConfig, CaptureSession, Frequency};
//!
//! fn main() -> Result<(), ccsniff::CaptureError> {
//!     let config = CaptureConfig::new("/dev/ttyACM0", "capture.pcap")
//!         .frequency(Frequency::Mhz(2450.0))
//!         .duration(Some(std::time::Duration::from_secs(30)));
//!     let stats = CaptureSession::new(config).run()?;
//!     println!("{} packets captured", stats.packets);
//!     Ok(())
//! }
//! ```

/// Session orchestration: sink + controller + PCAP lifecycle.
pub mod capture;
/// Board FSM, command exchange and the stream loop.
pub mod controller;
/// UART wire framing and FCS.
pub mod frame;
/// Decoded payloads: data packets, board info, radio configuration.
pub mod packet;
/// PCAP emission with the TI radio-packet-info envelope.
pub mod pcap;
/// Capture output endpoints (file, FIFO, named pipe).
pub mod sink;
/// Serial link with sentinel-delimited reads.
pub mod transport;

pub use capture::{CaptureConfig, CaptureError, CaptureSession, CaptureStats};
pub use controller::{ControllerError, State, StreamStats, TISnifferController};
pub use frame::{CommandKind, Frame, FrameError};
pub use packet::{
    BoardInfo, DataPacket, EnrichedPacket, Frequency, PacketError, SnifferConfig,
};
pub use pcap::{PcapBuilder, PcapError};
pub use sink::CaptureSink;
pub use transport::{SerialTransport, Transport, TransportError};
