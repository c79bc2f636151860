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

//! # tinyrfb
//!
//! A small, embeddable RFB (VNC) server core: security type `None`, Raw encoding,
//! RFB 3.3/3.7/3.8 version negotiation, and a thread-per-connection concurrency
//! model.
//!
//! ## Features
//!
//! - **Parallel OS threads**: one worker thread per connection, blocking I/O with
//!   bounded per-tick timeouts and a cooperative stop flag — no async runtime.
//! - **Canonical pixel formats**: BGR233 (8bpp), RGB565 (16bpp), RGB888-in-u32
//!   (32bpp), plus arbitrary valid formats via `SetPixelFormat`.
//! - **Bounded event queue**: a 128-slot ring buffer of input events, newest-drop
//!   on overflow.
//! - **Memory safe**: no unsafe code; a host-owned framebuffer is expressed as a
//!   `'static` mutable borrow rather than a raw pointer.
//! - **Pluggable logging**: a `LogSink` trait, defaulting to stderr + the `log`
//!   facade, so host applications already running `env_logger`/`tracing-log` see
//!   this crate's diagnostics for free.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use tinyrfb::Server;
//!
//! # fn main() -> tinyrfb::Result<()> {
//! let server = Server::new(1920, 1080, 4)?;
//! server.bind("0.0.0.0:5900".parse::<SocketAddr>().unwrap())?;
//! server.start()?;
//!
//! {
//!     let mut fb = server.lock_fb_write();
//!     fb.set_pixel(0, 0, tinyrfb::framebuffer::Color { r: 255, g: 0, b: 0 });
//! } // guard drop advances the updated counter
//!
//! while let Some(event) = server.poll_event() {
//!     println!("{event:?}");
//! }
//!
//! server.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           Host application              │
//! │                                         │
//! │  • Provide framebuffer data             │
//! │  • Poll input events                    │
//! │  • Control server lifecycle             │
//! └──────────────────┬──────────────────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │              Server (public)            │
//! │                                         │
//! │  • TCP listener + accept thread         │
//! │  • Connection table                     │
//! │  • Event queue                          │
//! └──────────────────┬──────────────────────┘
//!                    │
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!   ┌──────────┐┌──────────┐┌──────────┐
//!   │Connection││Connection││Connection│
//!   │ thread 1 ││ thread 2 ││ thread N │
//!   └──────────┘└──────────┘└──────────┘
//!        │           │           │
//!        └───────────┴───────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │      Framebuffer (Mutex-guarded)        │
//! └─────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod encoding;
pub mod error;
pub mod events;
pub mod framebuffer;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-exports
pub use encoding::Encoding;
pub use error::{Result, RfbError};
pub use events::{EventQueue, InputEvent};
pub use framebuffer::Framebuffer;
pub use logging::{default_sink, LogLevel, LogSink, SharedLogSink, StderrSink};
pub use protocol::{PixelFormat, ProtocolVersion};
pub use server::Server;

/// Default VNC port.
pub const DEFAULT_PORT: u16 = 5900;
