// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sniffer lifecycle control and the live capture stream loop.
//!
//! The board walks a small state machine:
//!
//! ```text
//! WAITING_FOR_COMMAND --ping ok--> INIT
//!        any state    --stop ok--> STOPPED <--configure (self-loop)
//!          STOPPED    --start ok-> STARTED --stop ok--> STOPPED
//! ```
//!
//! Configuration is only legal in `STOPPED`; streaming only in `STARTED`.
//! Every command writes one frame and reads exactly one response frame. The
//! board must not stream while stopped, so a stray DATA frame received while
//! awaiting a command response is discarded.

use crate::frame::{self, CommandKind, Frame, FrameError, EOF, PACKET_INFO_DATA, PACKET_INFO_ERROR};
use crate::packet::{
    interface_number, BoardInfo, DataPacket, EnrichedPacket, Frequency, PacketError, SnifferConfig,
};
use crate::transport::{SerialTransport, Transport, TransportError, DEFAULT_TIMEOUT};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Board lifecycle state as tracked host-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Freshly booted, no command acknowledged yet.
    WaitingForCommand,
    /// First successful ping after boot.
    Init,
    /// Radio idle; configuration legal.
    Stopped,
    /// Radio capturing; data frames streaming.
    Started,
}

/// Human text for the firmware status byte. `None` marks a byte outside the
/// documented range.
fn status_text(status: u8) -> Option<&'static str> {
    match status {
        0x00 => Some("command received correctly"),
        0x01 => Some("reception of command timed out"),
        0x02 => Some("frame check sequence mismatch on the board"),
        0x03 => Some("command invalid or unsupported"),
        0x04 => Some("command invalid for the current firmware state"),
        _ => None,
    }
}

/// Controller failures.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("{operation} is not legal while {state:?}")]
    State {
        operation: &'static str,
        state: State,
    },

    #[error("{command:?} rejected by board with status {status:#04x}")]
    CommandRejected { command: CommandKind, status: u8 },

    #[error("{command:?} configuration rejected with status {status:#04x}")]
    ConfigRejected { command: CommandKind, status: u8 },

    #[error("board returned unknown status byte {0:#04x}")]
    InvalidStatus(u8),

    #[error("not connected")]
    NotConnected,
}

/// Statistics tallied by one stream run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    /// Frames of any kind received.
    pub frames: u64,
    /// DATA frames delivered to the sink callback.
    pub data_packets: u64,
    /// ERROR frames reported by the board.
    pub error_frames: u64,
    /// Radio PDU bytes delivered.
    pub payload_bytes: u64,
}

/// Drives a CC1352-family sniffer board over its USB-serial control
/// protocol: connect, configure, start, stream, stop.
pub struct TISnifferController {
    port_name: String,
    debug_frames: bool,
    timeout: Duration,
    transport: Option<Box<dyn Transport>>,
    state: State,
    config: SnifferConfig,
    board_info: Option<BoardInfo>,
    cancel: Arc<AtomicBool>,
}

impl TISnifferController {
    /// Create a controller for the board on `port`. Does not touch the
    /// device until [`connect`](Self::connect). With `debug_frames` set,
    /// raw TX/RX frames are logged at debug level.
    pub fn new(port: impl Into<String>, debug_frames: bool) -> Self {
        let port_name = port.into();
        let config = SnifferConfig::new(interface_number(&port_name));
        Self {
            port_name,
            debug_frames,
            timeout: DEFAULT_TIMEOUT,
            transport: None,
            state: State::WaitingForCommand,
            config,
            board_info: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current host-side FSM state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Board identity from the last successful ping.
    pub fn board_info(&self) -> Option<&BoardInfo> {
        self.board_info.as_ref()
    }

    /// Current radio configuration snapshot.
    pub fn config(&self) -> &SnifferConfig {
        &self.config
    }

    /// Override the per-read serial timeout before connecting.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Preset the frequency applied during [`connect`](Self::connect).
    pub fn set_frequency(&mut self, frequency: impl Into<Frequency>) {
        self.config.frequency = frequency.into().to_wire();
    }

    /// Preset the PHY index applied during [`connect`](Self::connect).
    pub fn set_phy(&mut self, phy: u8) {
        self.config.phy = phy;
    }

    /// Set the informational channel number recorded with every packet.
    pub fn set_channel(&mut self, channel: u16) {
        self.config.channel = channel;
    }

    /// Handle for cooperative cancellation of [`stream`](Self::stream),
    /// checked between frames.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Open the serial port and bring the board to a known state: an
    /// idempotent STOP, the configured frequency and PHY, then a PING to
    /// read the board identity.
    pub fn connect(&mut self) -> Result<(), ControllerError> {
        let transport = SerialTransport::open(&self.port_name, self.timeout)?;
        self.transport = Some(Box::new(transport));
        self.state = State::WaitingForCommand;
        self.board_info = None;

        // The board may still be capturing from a previous session. Any
        // board-side status here, documented or not, means it was already
        // stopped; only transport and framing failures are fatal.
        match self.stop() {
            Ok(()) => {}
            Err(ControllerError::CommandRejected { status, .. })
            | Err(ControllerError::InvalidStatus(status)) => {
                warn!("stop during connect returned status {status:#04x}; board was already stopped");
                self.set_state(State::Stopped);
            }
            Err(e) => return Err(e),
        }

        self.configure(Frequency::Raw(self.config.frequency), self.config.phy)?;
        self.ping()?;
        info!(
            "connected to sniffer on {} (interface {}, phy {:#04x}, {:.4} MHz, channel {})",
            self.port_name,
            self.config.interface,
            self.config.phy,
            self.config.frequency_mhz(),
            self.config.channel
        );
        Ok(())
    }

    /// Close the serial port. The FSM is gone with the connection.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            info!("disconnected from {}", self.port_name);
        }
        self.state = State::WaitingForCommand;
    }

    /// Query the board identity. On success while `WaitingForCommand` the
    /// FSM moves to `Init`.
    pub fn ping(&mut self) -> Result<BoardInfo, ControllerError> {
        let response = self.exchange(CommandKind::Ping, &[])?;
        let board_info = BoardInfo::parse(&response.command_data)?;
        if status_text(board_info.status).is_none() {
            return Err(ControllerError::InvalidStatus(board_info.status));
        }
        info!(
            "board: chip {:#06x} rev {}.{}, fw id {} rev {}.{}",
            board_info.chip_id,
            board_info.chip_rev >> 4,
            board_info.chip_rev & 0x0F,
            board_info.fw_id,
            board_info.fw_major(),
            board_info.fw_minor()
        );
        self.board_info = Some(board_info);
        if board_info.status == 0x00 && self.state == State::WaitingForCommand {
            self.set_state(State::Init);
        }
        Ok(board_info)
    }

    /// Configure radio frequency and PHY. Legal only while `Stopped`; each
    /// sub-command must be acknowledged with status zero.
    pub fn configure(
        &mut self,
        frequency: impl Into<Frequency>,
        phy: u8,
    ) -> Result<(), ControllerError> {
        if self.state != State::Stopped {
            return Err(ControllerError::State {
                operation: "configure",
                state: self.state,
            });
        }

        let wire = frequency.into().to_wire();
        let status = self.checked_exchange(CommandKind::CfgFrequency, &wire)?;
        if status != 0x00 {
            return Err(ControllerError::ConfigRejected {
                command: CommandKind::CfgFrequency,
                status,
            });
        }
        self.config.frequency = wire;
        info!("frequency configured to {:.4} MHz", self.config.frequency_mhz());

        let status = self.checked_exchange(CommandKind::CfgPhy, &[phy])?;
        if status != 0x00 {
            return Err(ControllerError::ConfigRejected {
                command: CommandKind::CfgPhy,
                status,
            });
        }
        self.config.phy = phy;
        info!("phy configured to {phy:#04x}");
        Ok(())
    }

    /// Start capturing. The board streams DATA frames from here on.
    pub fn start(&mut self) -> Result<(), ControllerError> {
        self.command(CommandKind::Start, State::Started)
    }

    /// Stop capturing.
    pub fn stop(&mut self) -> Result<(), ControllerError> {
        self.command(CommandKind::Stop, State::Stopped)
    }

    fn command(&mut self, kind: CommandKind, on_success: State) -> Result<(), ControllerError> {
        let status = self.checked_exchange(kind, &[])?;
        if status != 0x00 {
            return Err(ControllerError::CommandRejected {
                command: kind,
                status,
            });
        }
        self.set_state(on_success);
        Ok(())
    }

    /// Stream captured packets to `on_packet` until the duration elapses,
    /// the cancel flag is raised, or the link fails. Packets arrive in
    /// strict wire order, each carrying the configuration snapshot taken at
    /// dispatch. Board-side ERROR frames are logged and absorbed; transport
    /// and framing errors terminate the loop and surface.
    pub fn stream<F>(
        &mut self,
        mut on_packet: F,
        duration: Option<Duration>,
    ) -> Result<StreamStats, ControllerError>
    where
        F: FnMut(EnrichedPacket),
    {
        if self.state != State::Started {
            return Err(ControllerError::State {
                operation: "stream",
                state: self.state,
            });
        }
        match duration {
            Some(limit) => info!("streaming for {:.1}s", limit.as_secs_f64()),
            None => info!("streaming until cancelled"),
        }

        let start = Instant::now();
        let mut stats = StreamStats::default();
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!("stream cancelled");
                break;
            }
            if let Some(limit) = duration {
                if start.elapsed() >= limit {
                    debug!("stream duration reached");
                    break;
                }
            }

            let transport = self.transport.as_mut().ok_or(ControllerError::NotConnected)?;
            let raw = match transport.read_until(&EOF) {
                Ok(raw) => raw,
                Err(TransportError::Timeout { buffered }) => {
                    // Advisory timeout; partial bytes stay buffered in the
                    // transport and the read resumes next iteration.
                    trace!("read timeout, {buffered} byte(s) pending");
                    continue;
                }
                Err(e) => {
                    warn!("stream transport error: {e}");
                    return Err(e.into());
                }
            };
            if self.debug_frames {
                debug!("RX {raw:02x?}");
            }

            stats.frames += 1;
            let frame = match frame::parse(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    // A desynchronized UART stream is unrecoverable here.
                    warn!("stream framing error: {e}");
                    return Err(e.into());
                }
            };

            match frame.packet_info {
                PACKET_INFO_DATA => match DataPacket::parse(&frame.command_data) {
                    Ok(data) => {
                        stats.data_packets += 1;
                        stats.payload_bytes += data.payload.len() as u64;
                        trace!(
                            "packet at {}us: {} byte payload, {} dBm, status {:#04x}",
                            data.timestamp_us,
                            data.payload.len(),
                            data.rssi_dbm(),
                            data.status
                        );
                        on_packet(EnrichedPacket {
                            data,
                            config: self.config,
                        });
                    }
                    Err(e) => warn!("malformed data frame: {e}"),
                },
                PACKET_INFO_ERROR => {
                    stats.error_frames += 1;
                    let code = frame.command_data.first().copied().unwrap_or(0);
                    warn!("board error: {}", PacketError::classify(code));
                }
                other => debug!("ignoring frame with packet info {other:#04x}"),
            }
        }

        info!(
            "stream finished: {} packets, {} payload bytes, {} board errors in {:.1}s",
            stats.data_packets,
            stats.payload_bytes,
            stats.error_frames,
            start.elapsed().as_secs_f64()
        );
        Ok(stats)
    }

    /// Write one command frame and read exactly one response frame. A DATA
    /// frame arriving here is out of contract and dropped.
    fn exchange(&mut self, kind: CommandKind, data: &[u8]) -> Result<Frame, ControllerError> {
        let encoded = frame::encode(kind, data);
        if self.debug_frames {
            debug!("TX {encoded:02x?}");
        }
        let transport = self.transport.as_mut().ok_or(ControllerError::NotConnected)?;
        transport.write_all(&encoded)?;
        loop {
            let raw = transport.read_until(&EOF)?;
            if self.debug_frames {
                debug!("RX {raw:02x?}");
            }
            let response = frame::parse(&raw)?;
            if response.packet_info == PACKET_INFO_DATA {
                warn!("discarding stray data frame while awaiting {kind:?} response");
                continue;
            }
            return Ok(response);
        }
    }

    /// Exchange and extract the response status byte, validating it against
    /// the documented range.
    fn checked_exchange(&mut self, kind: CommandKind, data: &[u8]) -> Result<u8, ControllerError> {
        let response = self.exchange(kind, data)?;
        let status = response
            .command_data
            .first()
            .copied()
            .ok_or(ControllerError::Frame(FrameError::Truncated))?;
        match status_text(status) {
            Some(text) => {
                debug!("{kind:?} status {status:#04x}: {text}");
                Ok(status)
            }
            None => Err(ControllerError::InvalidStatus(status)),
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    #[cfg(test)]
    pub(crate) fn with_transport(transport: Box<dyn Transport>, state: State) -> Self {
        let mut controller = Self::new("COM5", false);
        controller.transport = Some(transport);
        controller.state = state;
        controller
    }
}
