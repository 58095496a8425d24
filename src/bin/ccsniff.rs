// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ccsniff - capture TI CC1352 sniffer traffic to PCAP.
//!
//! Usage:
//!   ccsniff /dev/ttyACM0 --output capture.pcap --duration 30
//!   ccsniff /dev/ttyACM0 --output capture.pcap --frequency 868.0 --phy 17
//!   ccsniff COM5 --output wireshark --pipe

use ccsniff::{CaptureConfig, CaptureSession, Frequency};
use clap::Parser;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ccsniff")]
#[command(about = "Capture TI CC1352 sniffer traffic to a PCAP file or Wireshark pipe")]
#[command(version)]
struct Args {
    /// Serial port of the sniffer board (e.g. /dev/ttyACM0, COM5)
    port: String,

    /// Output file path, or pipe name with --pipe
    #[arg(short, long)]
    output: String,

    /// Stream to a named pipe/FIFO instead of a file
    #[arg(long)]
    pipe: bool,

    /// Radio frequency in MHz
    #[arg(short, long, default_value = "2450.0")]
    frequency: f64,

    /// PHY table index (board specific; 18 = CC1352P7 2.4 GHz)
    #[arg(long, default_value = "18")]
    phy: u8,

    /// Channel number recorded in the capture metadata
    #[arg(long, default_value = "20")]
    channel: u16,

    /// Capture duration in seconds (0 = until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Quiet mode (errors only, no summary)
    #[arg(short, long)]
    quiet: bool,

    /// Log raw command frames
    #[arg(long)]
    debug_frames: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = if args.quiet {
        tracing::Level::ERROR
    } else {
        args.log_level.parse().unwrap_or(tracing::Level::INFO)
    };
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    if !args.quiet {
        info!("ccsniff v{}", env!("CARGO_PKG_VERSION"));
    }

    let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let config = CaptureConfig::new(&args.port, &args.output)
        .pipe(args.pipe)
        .frequency(Frequency::Mhz(args.frequency))
        .phy(args.phy)
        .channel(args.channel)
        .duration(duration)
        .debug_frames(args.debug_frames);

    let mut session = CaptureSession::new(config);

    let cancel = session.cancel_handle();
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
    })?;

    if args.pipe && !args.quiet {
        info!(
            "waiting for a pipe reader; start wireshark with: wireshark -k -i {}",
            pipe_path(&args.output)
        );
    }

    let stats = session.run()?;
    if !args.quiet {
        info!(
            "captured {} packets ({} payload bytes) in {:.1}s",
            stats.packets,
            stats.payload_bytes,
            stats.elapsed.as_secs_f64()
        );
    }
    Ok(())
}

#[cfg(unix)]
fn pipe_path(name: &str) -> String {
    format!("/tmp/{name}")
}

#[cfg(windows)]
fn pipe_path(name: &str) -> String {
    format!(r"\\.\pipe\{name}")
}
