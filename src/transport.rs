// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Buffered, cancellable, tick-bounded I/O over a connection's `TcpStream`.
//!
//! Every connection runs on its own OS thread doing ordinary blocking I/O, so a
//! read that would otherwise block forever must instead return control periodically
//! so the thread can notice a cooperative stop request. [`Transport`] does this by
//! giving the socket a short read/write timeout and re-driving it in a tick loop,
//! the same contract the original's `trfb_io_t` callbacks had (return bytes
//! processed, `0` on timeout, an error on failure) adapted from a pluggable
//! callback pair to a concrete blocking-socket type.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, RfbError};

/// Read/write buffer size, matching the original's `TRFB_BUFSIZ`.
pub const BUFFER_SIZE: usize = 2048;

/// Upper bound on a single blocking I/O call before it returns control to check the
/// stop flag. Chosen well under a second so a stop request is never missed for
/// long, while staying much coarser than per-byte polling.
pub const TICK_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of one bounded I/O attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// `n` bytes were transferred.
    Done(usize),
    /// The tick's timeout elapsed with no data transferred; the caller should loop
    /// and check its stop condition before retrying.
    TimedOut,
    /// The peer closed the connection.
    Closed,
}

/// A buffered, tick-bounded wrapper around a [`TcpStream`].
///
/// Once an I/O error occurs the transport becomes permanently unusable: `error` is
/// latched and every subsequent call fails immediately with
/// [`RfbError::ConnectionClosed`], mirroring the original's `trfb_io_t.error` sticky
/// flag.
pub struct Transport {
    stream: TcpStream,
    stop: Arc<AtomicBool>,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_len: usize,
    write_buf: Vec<u8>,
    error: bool,
}

impl Transport {
    /// Wraps `stream`, which must already be in blocking mode. `stop` is checked
    /// between ticks so that [`Transport::read`]/[`Transport::write`] return
    /// [`RfbError::ConnectionClosed`] promptly after the host asks the connection to
    /// stop, rather than only after the next full timeout.
    pub fn new(stream: TcpStream, stop: Arc<AtomicBool>) -> io::Result<Self> {
        stream.set_read_timeout(Some(TICK_TIMEOUT))?;
        stream.set_write_timeout(Some(TICK_TIMEOUT))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            stop,
            read_buf: vec![0u8; BUFFER_SIZE],
            read_pos: 0,
            read_len: 0,
            write_buf: Vec::with_capacity(BUFFER_SIZE),
            error: false,
        })
    }

    fn check_usable(&self) -> Result<()> {
        if self.error {
            return Err(RfbError::ConnectionClosed);
        }
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Fills `out` completely, ticking on the underlying socket's timeout until
    /// enough buffered data is available.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::ConnectionClosed`] if the transport is already in the
    /// error state, if the stop flag is observed before `out` is filled, or if the
    /// peer closes the connection; returns [`RfbError::Io`] for any other I/O
    /// failure (which also latches the sticky error state).
    pub fn read(&mut self, out: &mut [u8]) -> Result<()> {
        self.check_usable()?;
        let mut filled = 0;
        while filled < out.len() {
            if self.should_stop() {
                return Err(RfbError::ConnectionClosed);
            }
            if self.read_pos == self.read_len {
                match self.fill_read_buf() {
                    Ok(TickOutcome::Done(_)) => {}
                    Ok(TickOutcome::TimedOut) => continue,
                    Ok(TickOutcome::Closed) => {
                        self.error = true;
                        return Err(RfbError::ConnectionClosed);
                    }
                    Err(err) => {
                        self.error = true;
                        return Err(err);
                    }
                }
            }
            let available = self.read_len - self.read_pos;
            let take = available.min(out.len() - filled);
            out[filled..filled + take]
                .copy_from_slice(&self.read_buf[self.read_pos..self.read_pos + take]);
            self.read_pos += take;
            filled += take;
        }
        Ok(())
    }

    fn fill_read_buf(&mut self) -> Result<TickOutcome> {
        match self.stream.read(&mut self.read_buf) {
            Ok(0) => Ok(TickOutcome::Closed),
            Ok(n) => {
                self.read_pos = 0;
                self.read_len = n;
                Ok(TickOutcome::Done(n))
            }
            Err(err) if is_timeout(&err) => Ok(TickOutcome::TimedOut),
            Err(err) => Err(RfbError::Io(err)),
        }
    }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// See [`Transport::read`].
    pub fn get_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read(&mut byte)?;
        Ok(byte[0])
    }

    /// Attempts to read a single byte within one tick, instead of blocking (across
    /// ticks) until one arrives. Lets a connection's message loop interleave input
    /// polling with outstanding-update bookkeeping rather than committing to a full
    /// blocking read for the next message header.
    ///
    /// # Errors
    ///
    /// Returns `Ok(None)` on a tick with no data, `Ok(Some(byte))` once one is read,
    /// and the same errors as [`Transport::read`] otherwise.
    pub fn try_get_byte(&mut self) -> Result<Option<u8>> {
        self.check_usable()?;
        if self.read_pos < self.read_len {
            let byte = self.read_buf[self.read_pos];
            self.read_pos += 1;
            return Ok(Some(byte));
        }
        if self.should_stop() {
            return Err(RfbError::ConnectionClosed);
        }
        match self.fill_read_buf() {
            Ok(TickOutcome::Done(_)) => {
                let byte = self.read_buf[self.read_pos];
                self.read_pos += 1;
                Ok(Some(byte))
            }
            Ok(TickOutcome::TimedOut) => Ok(None),
            Ok(TickOutcome::Closed) => {
                self.error = true;
                Err(RfbError::ConnectionClosed)
            }
            Err(err) => {
                self.error = true;
                Err(err)
            }
        }
    }

    /// Buffers `data` for output; call [`Transport::flush`] to actually send it.
    /// Matches the original's write-buffering so small protocol messages can be
    /// assembled with a few `put` calls before a single write.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.check_usable()?;
        self.write_buf.extend_from_slice(data);
        if self.write_buf.len() >= BUFFER_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes a single byte (buffered).
    ///
    /// # Errors
    ///
    /// See [`Transport::write`].
    pub fn put_byte(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }

    /// Sends any buffered output, ticking on the socket's write timeout until the
    /// stop flag is observed or every byte is written.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::ConnectionClosed`] if already in the error state or if
    /// the stop flag fires before the buffer drains; [`RfbError::Io`] for any other
    /// failure (latching the sticky error state).
    pub fn flush(&mut self) -> Result<()> {
        self.check_usable()?;
        let mut sent = 0;
        while sent < self.write_buf.len() {
            if self.should_stop() {
                return Err(RfbError::ConnectionClosed);
            }
            match self.stream.write(&self.write_buf[sent..]) {
                Ok(n) => sent += n,
                Err(err) if is_timeout(&err) => continue,
                Err(err) => {
                    self.error = true;
                    return Err(RfbError::Io(err));
                }
            }
        }
        self.write_buf.clear();
        Ok(())
    }

    /// Shuts down both halves of the underlying socket. Idempotent: a second call
    /// (or a call after an I/O error already closed the connection) is not an
    /// error.
    pub fn close(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.error = true;
    }

    /// `true` if this transport has latched a terminal error (including a normal
    /// peer-initiated close).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.error
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_thread = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        let client = client_thread.join().unwrap();
        (server, client)
    }

    #[test]
    fn read_and_write_round_trip() {
        let (server, mut client) = connected_pair();
        let stop = Arc::new(AtomicBool::new(false));
        let mut transport = Transport::new(server, stop).unwrap();

        client.write_all(b"hello").unwrap();

        let mut buf = [0u8; 5];
        transport.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        transport.write(b"world").unwrap();
        transport.flush().unwrap();

        let mut response = [0u8; 5];
        client.read_exact(&mut response).unwrap();
        assert_eq!(&response, b"world");
    }

    #[test]
    fn read_returns_connection_closed_after_peer_shutdown() {
        let (server, client) = connected_pair();
        drop(client);

        let stop = Arc::new(AtomicBool::new(false));
        let mut transport = Transport::new(server, stop).unwrap();
        let mut buf = [0u8; 1];
        let err = transport.read(&mut buf).unwrap_err();
        assert!(matches!(err, RfbError::ConnectionClosed));
    }

    #[test]
    fn stop_flag_aborts_a_pending_read() {
        let (server, _client) = connected_pair();
        let stop = Arc::new(AtomicBool::new(false));
        let mut transport = Transport::new(server, Arc::clone(&stop)).unwrap();

        stop.store(true, Ordering::Relaxed);
        let mut buf = [0u8; 1];
        let err = transport.read(&mut buf).unwrap_err();
        assert!(matches!(err, RfbError::ConnectionClosed));
    }

    #[test]
    fn error_state_is_sticky() {
        let (server, client) = connected_pair();
        drop(client);
        let stop = Arc::new(AtomicBool::new(false));
        let mut transport = Transport::new(server, stop).unwrap();

        let mut buf = [0u8; 1];
        assert!(transport.read(&mut buf).is_err());
        assert!(transport.is_closed());
        // A further call still fails, without attempting any I/O.
        assert!(transport.read(&mut buf).is_err());
    }
}
