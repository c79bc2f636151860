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

//! The host-facing `Server`: owns the canonical framebuffer, the accept loop, and
//! the connection table.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::connection::{self, ConnectionContext};
use crate::error::{Result, RfbError};
use crate::events::{EventQueue, InputEvent};
use crate::framebuffer::Framebuffer;
use crate::logging::{default_sink, LogLevel, SharedLogSink};

/// The default port a VNC server listens on (`5900`, display `:0`).
pub const DEFAULT_PORT: u16 = 5900;

/// Poll interval for the accept loop's non-blocking `accept`, bounding how long a
/// `stop` request takes to be noticed.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Server lifecycle state, a bit-or of the flags below. Mirrors the original's
/// `TRFB_STATE_*` macros.
pub mod state {
    /// No accept thread running, no connections possible.
    pub const STOPPED: u32 = 0x0000;
    /// The accept thread is running.
    pub const WORKING: u32 = 0x0001;
    /// A stop request has been issued but teardown is not yet complete.
    pub const STOP: u32 = 0x0002;
    /// The listening socket became unusable; the server cannot accept further
    /// connections.
    pub const ERROR: u32 = 0x8000;
}

struct ConnectionEntry {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// An embeddable RFB server: owns a canonical framebuffer, accepts connections on
/// a worker thread per client, and exposes a small synchronous host API.
pub struct Server {
    listener: Mutex<Option<TcpListener>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    state: AtomicU16,
    fb: Arc<Mutex<Framebuffer>>,
    updated: Arc<AtomicU64>,
    events: Arc<EventQueue>,
    log: Mutex<SharedLogSink>,
    desktop_name: Mutex<Arc<str>>,
    connections: Mutex<HashMap<u64, ConnectionEntry>>,
    next_connection_id: AtomicUsize,
    stop_flag: Arc<AtomicBool>,
    self_weak: Weak<Server>,
}

impl Server {
    /// Creates a server with a freshly allocated canonical framebuffer in the
    /// canonical format for `bpp` bytes per pixel.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::InvalidPixelFormat`] for an unsupported `bpp`.
    pub fn new(width: u32, height: u32, bpp: u8) -> Result<Arc<Self>> {
        let fb = Framebuffer::create(width, height, bpp)?;
        Ok(Self::from_framebuffer(fb))
    }

    /// Creates a server wrapping an already-constructed framebuffer (for example
    /// one built with [`Framebuffer::create_with_data`] over host-owned memory).
    ///
    /// Returns an `Arc` because the accept thread needs to keep the server alive
    /// independently of the host's own handle; a bare `Server` cannot be started.
    #[must_use]
    pub fn from_framebuffer(fb: Framebuffer) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            listener: Mutex::new(None),
            accept_thread: Mutex::new(None),
            state: AtomicU16::new(state::STOPPED as u16),
            fb: Arc::new(Mutex::new(fb)),
            updated: Arc::new(AtomicU64::new(0)),
            events: Arc::new(EventQueue::new()),
            log: Mutex::new(default_sink()),
            desktop_name: Mutex::new(Arc::from("tinyrfb")),
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicUsize::new(0),
            stop_flag: Arc::new(AtomicBool::new(false)),
            self_weak: weak.clone(),
        })
    }

    /// Binds a listening socket at `addr`. Must be called (or
    /// [`Server::attach_listener`]) before [`Server::start`].
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::Io`] if the bind fails.
    pub fn bind(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        *self.listener.lock().unwrap() = Some(listener);
        Ok(())
    }

    /// Attaches an already-bound, already-listening socket instead of binding one
    /// internally — for hosts that want to pre-configure the socket (e.g. with
    /// `SO_REUSEADDR`) or that are handed one by a supervising process.
    pub fn attach_listener(&self, listener: TcpListener) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    /// Sets the log sink every future diagnostic message is routed through.
    /// Existing connections keep whatever sink they were spawned with.
    pub fn set_log_sink(&self, sink: SharedLogSink) {
        *self.log.lock().unwrap() = sink;
    }

    /// Sets the desktop name advertised in future `ServerInit` exchanges.
    pub fn set_desktop_name(&self, name: impl Into<Arc<str>>) {
        *self.desktop_name.lock().unwrap() = name.into();
    }

    /// The current lifecycle state, a bit-or of the constants in [`state`].
    #[must_use]
    pub fn get_state(&self) -> u32 {
        u32::from(self.state.load(Ordering::Acquire))
    }

    /// The current value of the updated counter.
    #[must_use]
    pub fn updated_counter(&self) -> u64 {
        self.updated.load(Ordering::Acquire)
    }

    /// Locks the canonical framebuffer for reading only. Does not advance the
    /// updated counter on release, so polling the framebuffer (e.g. to render a
    /// host-side preview) never causes connected clients' deferred incremental
    /// update requests to fire spuriously.
    #[must_use]
    pub fn lock_fb_read(&self) -> FramebufferGuard<'_> {
        FramebufferGuard {
            guard: self.fb.lock().unwrap(),
            updated: None,
        }
    }

    /// Locks the canonical framebuffer for writing. The returned guard's `Drop`
    /// advances the updated counter, mirroring the original's "unlock implies mark
    /// dirty" contract for a write lock.
    #[must_use]
    pub fn lock_fb_write(&self) -> FramebufferGuard<'_> {
        FramebufferGuard {
            guard: self.fb.lock().unwrap(),
            updated: Some(&self.updated),
        }
    }

    /// Removes and returns the oldest queued input event, or `None` if empty.
    pub fn poll_event(&self) -> Option<InputEvent> {
        self.events.poll()
    }

    /// Starts the accept thread. No-op (returns `Ok`) if already started.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::InvalidState`] if no listener has been bound or
    /// attached yet.
    pub fn start(&self) -> Result<()> {
        if self.get_state() & state::WORKING != 0 {
            return Ok(());
        }
        let listener = self
            .listener
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RfbError::InvalidState("no listener bound".into()))?;
        listener.set_nonblocking(true)?;

        self.stop_flag.store(false, Ordering::Release);
        self.state.store(state::WORKING as u16, Ordering::Release);

        let server = self
            .self_weak
            .upgrade()
            .expect("server is always constructed behind an Arc");
        let handle = std::thread::spawn(move || server.accept_loop(listener));
        *self.accept_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn accept_loop(&self, listener: TcpListener) {
        self.log.lock().unwrap().log(LogLevel::Info, "accept loop started");
        loop {
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
            match listener.accept() {
                Ok((stream, peer_addr)) => self.spawn_connection(stream, peer_addr),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => {
                    self.log
                        .lock()
                        .unwrap()
                        .log(LogLevel::Error, &format!("accept failed: {err}"));
                    self.state.fetch_or(state::ERROR as u16, Ordering::AcqRel);
                    break;
                }
            }
            self.reap_finished_connections();
        }

        self.teardown_connections();
        self.state.store(state::STOPPED as u16, Ordering::Release);
        self.log.lock().unwrap().log(LogLevel::Info, "accept loop stopped");
    }

    fn spawn_connection(&self, stream: std::net::TcpStream, peer_addr: SocketAddr) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) as u64;
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = ConnectionContext {
            server_fb: Arc::clone(&self.fb),
            updated: Arc::clone(&self.updated),
            events: Arc::clone(&self.events),
            log: Arc::clone(&self.log.lock().unwrap()),
            desktop_name: Arc::clone(&self.desktop_name.lock().unwrap()),
        };
        let conn_stop = Arc::clone(&stop);
        let thread = std::thread::spawn(move || connection::run(id, stream, peer_addr, conn_stop, ctx));
        self.connections
            .lock()
            .unwrap()
            .insert(id, ConnectionEntry { stop, thread });
    }

    /// Removes table entries for connections whose worker thread has already
    /// exited, joining them. Done from the supervisor (never from a connection's
    /// own thread) to avoid the self-unlink race the original's linked-list design
    /// was prone to.
    fn reap_finished_connections(&self) {
        let mut connections = self.connections.lock().unwrap();
        let finished: Vec<u64> = connections
            .iter()
            .filter(|(_, entry)| entry.thread.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(entry) = connections.remove(&id) {
                let _ = entry.thread.join();
            }
        }
    }

    fn teardown_connections(&self) {
        let mut connections = self.connections.lock().unwrap();
        for entry in connections.values() {
            entry.stop.store(true, Ordering::Release);
        }
        for (_, entry) in connections.drain() {
            let _ = entry.thread.join();
        }
        while self.events.poll().is_some() {}
    }

    /// Signals every connection and the accept thread to stop, and blocks until
    /// all of them have joined. Idempotent.
    pub fn stop(&self) {
        self.state.fetch_or(state::STOP as u16, Ordering::AcqRel);
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.accept_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.state.store(state::STOPPED as u16, Ordering::Release);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// RAII guard over the canonical framebuffer. A write guard's `Drop` advances the
/// server's updated counter so connected clients re-snapshot on their next tick; a
/// read guard's does not.
pub struct FramebufferGuard<'a> {
    guard: MutexGuard<'a, Framebuffer>,
    updated: Option<&'a AtomicU64>,
}

impl std::ops::Deref for FramebufferGuard<'_> {
    type Target = Framebuffer;
    fn deref(&self) -> &Framebuffer {
        &self.guard
    }
}

impl std::ops::DerefMut for FramebufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut Framebuffer {
        &mut self.guard
    }
}

impl Drop for FramebufferGuard<'_> {
    fn drop(&mut self) {
        if let Some(updated) = self.updated {
            updated.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    #[test]
    fn new_server_starts_stopped() {
        let server = Server::new(4, 4, 4).unwrap();
        assert_eq!(server.get_state(), state::STOPPED);
    }

    #[test]
    fn lock_fb_write_guard_advances_updated_counter_on_drop() {
        let server = Server::new(4, 4, 4).unwrap();
        assert_eq!(server.updated_counter(), 0);
        {
            let _fb = server.lock_fb_write();
        }
        assert_eq!(server.updated_counter(), 1);
    }

    #[test]
    fn lock_fb_read_guard_does_not_advance_updated_counter_on_drop() {
        let server = Server::new(4, 4, 4).unwrap();
        assert_eq!(server.updated_counter(), 0);
        {
            let _fb = server.lock_fb_read();
        }
        assert_eq!(server.updated_counter(), 0);
    }

    #[test]
    fn start_requires_a_bound_listener() {
        let server = Server::new(4, 4, 4).unwrap();
        assert!(server.start().is_err());
    }

    #[test]
    fn start_then_stop_terminates_in_bounded_time() {
        let server = Server::new(4, 4, 4).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        server.bind(addr).unwrap();

        server.start().unwrap();
        assert_eq!(server.get_state() & state::WORKING, state::WORKING);

        std::thread::sleep(Duration::from_millis(50));
        server.stop();
        assert_eq!(server.get_state(), state::STOPPED);
    }

    #[test]
    fn stop_joins_live_connections() {
        let server = Server::new(4, 4, 4).unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        server.attach_listener(listener);
        server.start().unwrap();

        let _client = TcpStream::connect(addr).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!server.connections.lock().unwrap().is_empty());

        server.stop();
        assert!(server.connections.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_drains_the_event_queue() {
        let server = Server::new(4, 4, 4).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        server.bind(addr).unwrap();
        server.start().unwrap();

        server.events.push(InputEvent::Key { down: true, keysym: 0x61 });
        assert!(!server.events.is_empty());

        server.stop();
        assert!(server.events.is_empty());
    }
}
