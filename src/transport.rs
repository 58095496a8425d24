// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial link to the sniffer board.
//!
//! The board talks over a CDC-ACM UART at a fixed 3 Mbaud, 8N1, no flow
//! control. Reads are sentinel-delimited: [`Transport::read_until`]
//! accumulates one byte at a time until the end-of-frame sentinel and hands
//! back the whole sequence, sentinel included. A per-read timeout is
//! advisory; bytes read before it fired stay buffered inside the transport
//! so the caller can retry without losing part of a frame.

use serialport::SerialPort;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// UART baud rate fixed by the sniffer firmware.
pub const BAUD_RATE: u32 = 3_000_000;

/// Default per-read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("read timed out with {buffered} byte(s) buffered")]
    Timeout { buffered: usize },
}

/// Byte-level link to the board.
///
/// A trait so the controller can run against a scripted link in tests; the
/// production implementation is [`SerialTransport`].
pub trait Transport {
    /// Write the whole byte sequence.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read until `sentinel` is seen at the tail and return everything read,
    /// sentinel included. Bytes are never stripped or reinterpreted. On
    /// timeout, whatever was accumulated is retained for the next call and
    /// [`TransportError::Timeout`] reports how much is pending.
    fn read_until(&mut self, sentinel: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// 3 Mbaud 8N1 UART with a carry buffer for timed-out partial reads.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    carry: Vec<u8>,
}

impl SerialTransport {
    /// Open `path` with the fixed sniffer parameters.
    pub fn open(path: &str, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()?;
        info!(
            "opened {} at {} baud with {}ms read timeout",
            path,
            BAUD_RATE,
            timeout.as_millis()
        );
        Ok(Self {
            port,
            carry: Vec::new(),
        })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_until(&mut self, sentinel: &[u8]) -> Result<Vec<u8>, TransportError> {
        read_until_from(&mut self.port, &mut self.carry, sentinel)
    }
}

/// Accumulate bytes from `reader` into `carry` until it ends with
/// `sentinel`, then drain and return it. On a timed-out read the carry is
/// left in place for the next attempt.
fn read_until_from<R: io::Read + ?Sized>(
    reader: &mut R,
    carry: &mut Vec<u8>,
    sentinel: &[u8],
) -> Result<Vec<u8>, TransportError> {
    let mut byte = [0u8; 1];
    while !carry.ends_with(sentinel) {
        match reader.read(&mut byte) {
            Ok(0) => {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port closed",
                )))
            }
            Ok(_) => carry.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(TransportError::Timeout {
                    buffered: carry.len(),
                });
            }
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
    Ok(std::mem::take(carry))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// What a [`ScriptedTransport`] does once its response queue runs dry.
    pub(crate) enum OnEmpty {
        Eof,
        Timeout,
    }

    /// In-memory transport fed with pre-built response frames.
    pub(crate) struct ScriptedTransport {
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
        pub responses: VecDeque<Vec<u8>>,
        pub on_empty: OnEmpty,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<Vec<u8>>) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    written: Arc::clone(&written),
                    responses: responses.into(),
                    on_empty: OnEmpty::Eof,
                },
                written,
            )
        }

        pub fn timing_out(responses: Vec<Vec<u8>>) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
            let (mut transport, written) = Self::new(responses);
            transport.on_empty = OnEmpty::Timeout;
            (transport, written)
        }
    }

    impl Transport for ScriptedTransport {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.written.lock().expect("lock").push(bytes.to_vec());
            Ok(())
        }

        fn read_until(&mut self, _sentinel: &[u8]) -> Result<Vec<u8>, TransportError> {
            match self.responses.pop_front() {
                Some(raw) => Ok(raw),
                None => match self.on_empty {
                    OnEmpty::Eof => Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "script exhausted",
                    ))),
                    OnEmpty::Timeout => Err(TransportError::Timeout { buffered: 0 }),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EOF;
    use std::collections::VecDeque;

    /// Reader that yields scripted results one byte at a time.
    struct ChunkedReader {
        steps: VecDeque<Result<u8, io::ErrorKind>>,
    }

    impl ChunkedReader {
        fn new(steps: Vec<Result<u8, io::ErrorKind>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl io::Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Ok(byte)) => {
                    buf[0] = byte;
                    Ok(1)
                }
                Some(Err(kind)) => Err(kind.into()),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn test_read_until_returns_sentinel_inclusive() {
        let mut reader = ChunkedReader::new(vec![Ok(0x40), Ok(0x53), Ok(0x01), Ok(0x40), Ok(0x45)]);
        let mut carry = Vec::new();
        let raw = read_until_from(&mut reader, &mut carry, &EOF).expect("read");
        assert_eq!(raw, [0x40, 0x53, 0x01, 0x40, 0x45]);
        assert!(carry.is_empty());
    }

    #[test]
    fn test_read_until_keeps_partial_across_timeout() {
        let mut reader = ChunkedReader::new(vec![
            Ok(0x40),
            Ok(0x53),
            Err(io::ErrorKind::TimedOut),
            Ok(0x40),
            Ok(0x45),
        ]);
        let mut carry = Vec::new();
        match read_until_from(&mut reader, &mut carry, &EOF) {
            Err(TransportError::Timeout { buffered }) => assert_eq!(buffered, 2),
            other => panic!("expected timeout, got {other:?}"),
        }
        // Retry resumes with the two buffered bytes intact.
        let raw = read_until_from(&mut reader, &mut carry, &EOF).expect("retry");
        assert_eq!(raw, [0x40, 0x53, 0x40, 0x45]);
    }

    #[test]
    fn test_read_until_eof_is_an_error() {
        let mut reader = ChunkedReader::new(vec![Ok(0x40)]);
        let mut carry = Vec::new();
        match read_until_from(&mut reader, &mut carry, &EOF) {
            Err(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected I/O error, got {other:?}"),
        }
    }

    #[test]
    fn test_read_until_stops_at_earliest_sentinel() {
        // An embedded sentinel terminates the read; the rest stays unread.
        let mut reader = ChunkedReader::new(vec![
            Ok(0x40),
            Ok(0x53),
            Ok(0x40),
            Ok(0x45),
            Ok(0xAA),
        ]);
        let mut carry = Vec::new();
        let raw = read_until_from(&mut reader, &mut carry, &EOF).expect("read");
        assert_eq!(raw, [0x40, 0x53, 0x40, 0x45]);
    }

    #[test]
    fn test_default_parameters() {
        assert_eq!(BAUD_RATE, 3_000_000);
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_millis(500));
    }
}
