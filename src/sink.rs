// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capture output endpoints: regular files, POSIX FIFOs and Windows named
//! pipes behind one writable surface.
//!
//! The variant is chosen once at open time; the hot write path is a plain
//! match, no dynamic dispatch. Pipe opens block until the reading side
//! (typically Wireshark) attaches. `close` runs on every exit path via
//! `Drop`, including FIFO inode removal.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Writable capture endpoint.
pub enum CaptureSink {
    /// Ordinary file, truncated on open.
    File(File),
    /// POSIX FIFO; unlinked on close.
    #[cfg(unix)]
    Fifo { file: Option<File>, path: PathBuf },
    /// Windows named pipe under `\\.\pipe\`.
    #[cfg(windows)]
    NamedPipe(named_pipe::PipeHandle),
}

impl CaptureSink {
    /// Create (truncating) a plain capture file.
    pub fn create_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(CaptureSink::File(File::create(path)?))
    }

    /// Create the platform named pipe for `name` and block until a reader
    /// attaches. POSIX: a FIFO at `/tmp/<name>`.
    #[cfg(unix)]
    pub fn open_pipe(name: &str) -> io::Result<Self> {
        Self::open_fifo_at(PathBuf::from(format!("/tmp/{name}")))
    }

    /// Create the platform named pipe for `name` and block until a client
    /// attaches. Windows: `\\.\pipe\<name>`.
    #[cfg(windows)]
    pub fn open_pipe(name: &str) -> io::Result<Self> {
        named_pipe::create_and_connect(name).map(CaptureSink::NamedPipe)
    }

    #[cfg(unix)]
    pub(crate) fn open_fifo_at(path: PathBuf) -> io::Result<Self> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pipe path contains NUL"))?;
        // EEXIST is fine: reuse a FIFO left over from a previous run.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(err);
            }
        }
        info!("fifo {} ready, waiting for a reader", path.display());
        // Opening the write end blocks until the reading side opens.
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        Ok(CaptureSink::Fifo {
            file: Some(file),
            path,
        })
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            CaptureSink::File(file) => file.write_all(bytes),
            #[cfg(unix)]
            CaptureSink::Fifo { file, .. } => match file {
                Some(file) => {
                    file.write_all(bytes)?;
                    // Pipe readers expect records promptly, not on buffer
                    // boundaries.
                    file.flush()
                }
                None => Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "fifo already closed",
                )),
            },
            #[cfg(windows)]
            CaptureSink::NamedPipe(pipe) => pipe.write(bytes),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            CaptureSink::File(file) => file.flush(),
            #[cfg(unix)]
            CaptureSink::Fifo { file, .. } => file.as_mut().map_or(Ok(()), Write::flush),
            #[cfg(windows)]
            CaptureSink::NamedPipe(pipe) => pipe.flush(),
        }
    }

    /// Release the endpoint. Removes a FIFO's inode. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        match self {
            CaptureSink::File(file) => file.flush(),
            #[cfg(unix)]
            CaptureSink::Fifo { file, path } => {
                if let Some(mut file) = file.take() {
                    file.flush()?;
                    drop(file);
                    std::fs::remove_file(path.as_path())?;
                    info!("fifo {} removed", path.display());
                }
                Ok(())
            }
            #[cfg(windows)]
            CaptureSink::NamedPipe(pipe) => pipe.close(),
        }
    }
}

impl Drop for CaptureSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("sink close failed: {e}");
        }
    }
}

#[cfg(windows)]
mod named_pipe {
    //! Outbound message-mode pipe matching the Wireshark capture
    //! convention: one instance, 64 KiB buffers, 300 ms default timeout.

    use std::ffi::OsStr;
    use std::io;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;
    use tracing::info;
    use winapi::shared::winerror::ERROR_PIPE_CONNECTED;
    use winapi::um::fileapi::{FlushFileBuffers, WriteFile};
    use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
    use winapi::um::namedpipeapi::ConnectNamedPipe;
    use winapi::um::winbase::{
        CreateNamedPipeW, PIPE_ACCESS_OUTBOUND, PIPE_TYPE_MESSAGE, PIPE_WAIT,
    };
    use winapi::um::winnt::HANDLE;

    const PIPE_BUFFER_BYTES: u32 = 65_536;
    const PIPE_DEFAULT_TIMEOUT_MS: u32 = 300;

    pub struct PipeHandle {
        handle: HANDLE,
        path: String,
    }

    // The handle is owned by exactly one sink and never shared.
    unsafe impl Send for PipeHandle {}

    /// Create `\\.\pipe\<name>` and block until a client attaches.
    pub fn create_and_connect(name: &str) -> io::Result<PipeHandle> {
        let path = format!(r"\\.\pipe\{name}");
        let wide: Vec<u16> = OsStr::new(&path).encode_wide().chain(Some(0)).collect();
        let handle = unsafe {
            CreateNamedPipeW(
                wide.as_ptr(),
                PIPE_ACCESS_OUTBOUND,
                PIPE_TYPE_MESSAGE | PIPE_WAIT,
                1,
                PIPE_BUFFER_BYTES,
                PIPE_BUFFER_BYTES,
                PIPE_DEFAULT_TIMEOUT_MS,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        info!("named pipe {path} ready, waiting for a client");
        let connected = unsafe { ConnectNamedPipe(handle, ptr::null_mut()) };
        if connected == 0 {
            let err = io::Error::last_os_error();
            // The client can win the race and attach first.
            if err.raw_os_error() != Some(ERROR_PIPE_CONNECTED as i32) {
                unsafe { CloseHandle(handle) };
                return Err(err);
            }
        }
        Ok(PipeHandle { handle, path })
    }

    impl PipeHandle {
        pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.handle.is_null() {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "pipe already closed",
                ));
            }
            let mut written: u32 = 0;
            let ok = unsafe {
                WriteFile(
                    self.handle,
                    bytes.as_ptr().cast(),
                    bytes.len() as u32,
                    &mut written,
                    ptr::null_mut(),
                )
            };
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
            if written as usize != bytes.len() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "short write to named pipe",
                ));
            }
            Ok(())
        }

        pub fn flush(&mut self) -> io::Result<()> {
            if self.handle.is_null() {
                return Ok(());
            }
            if unsafe { FlushFileBuffers(self.handle) } == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn close(&mut self) -> io::Result<()> {
            if !self.handle.is_null() {
                unsafe { CloseHandle(self.handle) };
                self.handle = ptr::null_mut();
                info!("named pipe {} closed", self.path);
            }
            Ok(())
        }
    }

    impl Drop for PipeHandle {
        fn drop(&mut self) {
            let _ = self.close();
        }
    }
}
