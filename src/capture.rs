// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capture session orchestration.
//!
//! Composes the controller, the PCAP builder and the output sink into one
//! lifecycle: open sink, write the global header, connect (stop + configure
//! + ping), start, stream every packet into the capture, stop, disconnect,
//! close. Cleanup runs on every exit path; the first error wins.

use crate::controller::{ControllerError, StreamStats, TISnifferController};
use crate::packet::{Frequency, PHY_CC1352_2_4GHZ};
use crate::pcap::{PcapBuilder, PcapError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Capture failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("pcap error: {0}")]
    Pcap(#[from] PcapError),
}

/// Capture session configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Serial port of the sniffer board.
    pub port: String,
    /// Output file path, or pipe name when `is_pipe` is set.
    pub output: String,
    /// Stream to a named pipe/FIFO instead of a file.
    pub is_pipe: bool,
    /// Radio frequency applied on connect.
    pub frequency: Frequency,
    /// PHY table index applied on connect.
    pub phy: u8,
    /// Informational channel number recorded with every packet.
    pub channel: u16,
    /// Capture duration; `None` streams until cancelled.
    pub duration: Option<Duration>,
    /// Log raw command frames.
    pub debug_frames: bool,
}

impl CaptureConfig {
    /// Defaults: 2450.0 MHz, the 2.4 GHz PHY, channel 20, file output,
    /// unbounded duration.
    pub fn new(port: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            output: output.into(),
            is_pipe: false,
            frequency: Frequency::Mhz(2450.0),
            phy: PHY_CC1352_2_4GHZ,
            channel: 20,
            duration: None,
            debug_frames: false,
        }
    }

    pub fn pipe(mut self, is_pipe: bool) -> Self {
        self.is_pipe = is_pipe;
        self
    }

    pub fn frequency(mut self, frequency: impl Into<Frequency>) -> Self {
        self.frequency = frequency.into();
        self
    }

    pub fn phy(mut self, phy: u8) -> Self {
        self.phy = phy;
        self
    }

    pub fn channel(mut self, channel: u16) -> Self {
        self.channel = channel;
        self
    }

    pub fn duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    pub fn debug_frames(mut self, debug_frames: bool) -> Self {
        self.debug_frames = debug_frames;
        self
    }
}

/// Summary of one finished capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    /// Packets written to the capture.
    pub packets: u64,
    /// Radio PDU bytes written.
    pub payload_bytes: u64,
    /// Board error frames observed.
    pub board_errors: u64,
    /// Wall-clock session time.
    pub elapsed: Duration,
}

/// One connect -> configure -> start -> stream -> stop -> disconnect run.
pub struct CaptureSession {
    config: CaptureConfig,
    controller: TISnifferController,
    pcap: PcapBuilder,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig) -> Self {
        let mut controller = TISnifferController::new(&config.port, config.debug_frames);
        controller.set_frequency(config.frequency);
        controller.set_phy(config.phy);
        controller.set_channel(config.channel);
        Self {
            config,
            controller,
            pcap: PcapBuilder::new(),
        }
    }

    /// Handle for cooperative cancellation of the stream loop.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.controller.cancel_handle()
    }

    /// Run the full capture lifecycle.
    pub fn run(&mut self) -> Result<CaptureStats, CaptureError> {
        let started = Instant::now();
        self.pcap.open(&self.config.output, self.config.is_pipe)?;
        self.pcap.write_global_header()?;

        let result = self.drive();

        self.controller.disconnect();
        if let Err(e) = self.pcap.close() {
            warn!("pcap close failed: {e}");
        }

        let stream = result?;
        let stats = CaptureStats {
            packets: stream.data_packets,
            payload_bytes: stream.payload_bytes,
            board_errors: stream.error_frames,
            elapsed: started.elapsed(),
        };
        info!(
            "capture complete: {} packets, {} payload bytes in {:.1}s",
            stats.packets,
            stats.payload_bytes,
            stats.elapsed.as_secs_f64()
        );
        Ok(stats)
    }

    fn drive(&mut self) -> Result<StreamStats, CaptureError> {
        let Self {
            config,
            controller,
            pcap,
        } = self;

        controller.connect()?;
        controller.start()?;

        // A sink write failure cancels the stream at the next frame
        // boundary; the first such error is the one reported.
        let cancel = controller.cancel_handle();
        let mut write_error: Option<PcapError> = None;
        let stream_result = controller.stream(
            |packet| {
                if let Err(e) = pcap.write_record(&packet) {
                    warn!("pcap write failed: {e}");
                    cancel.store(true, Ordering::SeqCst);
                    if write_error.is_none() {
                        write_error = Some(e);
                    }
                }
            },
            config.duration,
        );

        if let Err(e) = controller.stop() {
            warn!("stop after stream failed: {e}");
        }

        let stats = stream_result?;
        if let Some(e) = write_error {
            return Err(e.into());
        }
        Ok(stats)
    }
}
