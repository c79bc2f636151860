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

//! Per-client connection handling: the handshake, and the running message loop.
//!
//! Each accepted socket gets its own worker thread running [`Connection::run`] end
//! to end. There is no async scheduling here; a connection blocks on its own I/O
//! and is only ever touched by its own thread plus the occasional atomic read of
//! its stop flag from the supervisor.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{BufMut, BytesMut};

use crate::encoding::get_encoder;
use crate::error::{Result, RfbError};
use crate::events::{EventQueue, InputEvent};
use crate::framebuffer::Framebuffer;
use crate::logging::{LogLevel, SharedLogSink};
use crate::protocol::{
    self, ClientMessage, PixelFormat, ProtocolVersion, Rectangle, ServerInit,
    CLIENT_MSG_CLIENT_CUT_TEXT, CLIENT_MSG_SET_ENCODINGS, ENCODING_RAW, MAX_CUT_TEXT_LEN,
    SECURITY_RESULT_FAILED, SECURITY_RESULT_OK, SECURITY_TYPE_NONE, SERVER_MSG_FRAMEBUFFER_UPDATE,
};
use crate::transport::Transport;

/// Shared resources a connection needs from its owning [`crate::server::Server`],
/// grouped so [`Connection::run`] takes one argument instead of five.
pub struct ConnectionContext {
    /// The server's canonical framebuffer.
    pub server_fb: Arc<Mutex<Framebuffer>>,
    /// Monotonic counter the host advances whenever the canonical framebuffer is
    /// marked dirty.
    pub updated: Arc<AtomicU64>,
    /// The server's input event queue.
    pub events: Arc<EventQueue>,
    /// The server's diagnostic sink.
    pub log: SharedLogSink,
    /// The desktop name advertised in `ServerInit`.
    pub desktop_name: Arc<str>,
}

struct PendingRequest {
    x: u16,
    y: u16,
    width: u16,
    height: u16,
}

/// Runs one client connection to completion on the calling thread.
///
/// `id` only identifies the connection for logging; the server's connection table
/// is keyed separately and this function never touches it (removal happens from
/// the supervisor, per the design note in `DESIGN.md`).
pub fn run(id: u64, stream: TcpStream, peer_addr: SocketAddr, stop: Arc<AtomicBool>, ctx: ConnectionContext) {
    match negotiate(stream, &stop, &ctx) {
        Ok(mut conn) => {
            ctx.log.log(
                LogLevel::Info,
                &format!("connection {id} from {peer_addr} entered Running"),
            );
            if let Err(err) = conn.serve() {
                ctx.log.log(
                    LogLevel::Warn,
                    &format!("connection {id} from {peer_addr} closing: {err}"),
                );
            }
            conn.transport.close();
        }
        Err(err) => {
            ctx.log.log(
                LogLevel::Warn,
                &format!("connection {id} from {peer_addr} failed handshake: {err}"),
            );
        }
    }
    ctx.log
        .log(LogLevel::Info, &format!("connection {id} from {peer_addr} closed"));
}

/// The live, post-handshake state of one connection.
struct Connection {
    stop: Arc<AtomicBool>,
    transport: Transport,
    client_fb: Framebuffer,
    encodings: Vec<i32>,
    server_fb: Arc<Mutex<Framebuffer>>,
    updated: Arc<AtomicU64>,
    last_update_counter: u64,
    events: Arc<EventQueue>,
    log: SharedLogSink,
    pending: Option<PendingRequest>,
}

/// Drives `ProtocolVersion`, the security handshake, and `ClientInit`/`ServerInit`
/// through to a live [`Connection`] ready to enter the `Running` loop.
fn negotiate(stream: TcpStream, stop: &Arc<AtomicBool>, ctx: &ConnectionContext) -> Result<Connection> {
    let mut transport = Transport::new(stream, Arc::clone(stop))?;

    // ProtocolVersion
    transport.write(&ProtocolVersion::SERVER_OFFERED.to_bytes())?;
    transport.flush()?;
    let mut client_version = [0u8; 12];
    transport.read(&mut client_version)?;
    let version = ProtocolVersion::SERVER_OFFERED.min(ProtocolVersion::parse(&client_version)?);

    // SecurityHandshake: only security type None is ever offered.
    match version {
        ProtocolVersion::V3 => {
            let mut buf = BytesMut::new();
            buf.put_u32(u32::from(SECURITY_TYPE_NONE));
            transport.write(&buf)?;
            transport.flush()?;
        }
        ProtocolVersion::V7 | ProtocolVersion::V8 => {
            transport.write(&[1, SECURITY_TYPE_NONE])?;
            transport.flush()?;
            let chosen = transport.get_byte()?;
            if chosen != SECURITY_TYPE_NONE {
                if version == ProtocolVersion::V8 {
                    send_security_failure(&mut transport, "unsupported security type")?;
                }
                return Err(RfbError::UnsupportedSecurity);
            }
            if version == ProtocolVersion::V8 {
                let mut buf = BytesMut::new();
                buf.put_u32(SECURITY_RESULT_OK);
                transport.write(&buf)?;
                transport.flush()?;
            }
        }
    }

    // ClientInit
    let _shared_flag = transport.get_byte()?; // shared-flag semantics are ignored, see DESIGN.md

    // ServerInit, derived from the canonical framebuffer at acceptance time.
    let (width, height, format) = {
        let fb = ctx.server_fb.lock().unwrap();
        (fb.width(), fb.height(), fb.format())
    };
    let server_init = ServerInit {
        framebuffer_width: width as u16,
        framebuffer_height: height as u16,
        pixel_format: format,
        name: ctx.desktop_name.to_string(),
    };
    let mut buf = BytesMut::new();
    server_init.write_to(&mut buf);
    transport.write(&buf)?;
    transport.flush()?;

    let client_fb = Framebuffer::create_of_format(width, height, &format)?;
    let last_update_counter = ctx.updated.load(Ordering::Acquire);

    Ok(Connection {
        stop: Arc::clone(stop),
        transport,
        client_fb,
        encodings: vec![ENCODING_RAW],
        server_fb: Arc::clone(&ctx.server_fb),
        updated: Arc::clone(&ctx.updated),
        last_update_counter,
        events: Arc::clone(&ctx.events),
        log: Arc::clone(&ctx.log),
        pending: None,
    })
}

fn send_security_failure(transport: &mut Transport, reason: &str) -> Result<()> {
    let mut buf = BytesMut::new();
    buf.put_u32(SECURITY_RESULT_FAILED);
    buf.put_u32(reason.len() as u32);
    buf.put_slice(reason.as_bytes());
    transport.write(&buf)?;
    transport.flush()
}

impl Connection {
    /// The `Running` state's message loop: services client input and, when an
    /// update request is outstanding, server output.
    fn serve(&mut self) -> Result<()> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Err(RfbError::ConnectionClosed);
            }

            if let Some(msg_type) = self.transport.try_get_byte()? {
                self.handle_message(msg_type)?;
            }

            if let Some(req) = self.pending.take() {
                let current = self.updated.load(Ordering::Acquire);
                if current != self.last_update_counter {
                    self.send_update(req.x, req.y, req.width, req.height)?;
                    self.last_update_counter = current;
                } else {
                    self.pending = Some(req);
                }
            }
        }
    }

    fn handle_message(&mut self, msg_type: u8) -> Result<()> {
        let fixed_len = protocol::fixed_header_len(msg_type)
            .ok_or_else(|| RfbError::Protocol(format!("unknown message type {msg_type}")))?;
        let mut body = vec![0u8; fixed_len];
        self.transport.read(&mut body)?;

        match msg_type {
            CLIENT_MSG_SET_ENCODINGS => {
                let count = u16::from_be_bytes([body[1], body[2]]) as usize;
                let mut tail = vec![0u8; count * 4];
                self.transport.read(&mut tail)?;
                body.extend(tail);
            }
            CLIENT_MSG_CLIENT_CUT_TEXT => {
                let length = u32::from_be_bytes([body[3], body[4], body[5], body[6]]) as usize;
                if length > MAX_CUT_TEXT_LEN {
                    return Err(RfbError::OversizedCutText);
                }
                let mut tail = vec![0u8; length];
                self.transport.read(&mut tail)?;
                body.extend(tail);
            }
            _ => {}
        }

        match protocol::decode_client_message(msg_type, &body)? {
            ClientMessage::SetPixelFormat(format) => self.apply_pixel_format(format)?,
            ClientMessage::SetEncodings(list) => self.encodings = list,
            ClientMessage::FramebufferUpdateRequest {
                incremental,
                x,
                y,
                width,
                height,
            } => self.request_update(incremental, x, y, width, height)?,
            ClientMessage::KeyEvent { down, keysym } => {
                self.events.push(InputEvent::Key { down, keysym });
            }
            ClientMessage::PointerEvent { button_mask, x, y } => {
                self.events
                    .push(InputEvent::Pointer { button_mask, x, y });
            }
            ClientMessage::ClientCutText(text) => {
                self.events.push(InputEvent::CutText { text });
            }
        }
        Ok(())
    }

    fn apply_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        self.client_fb.reformat(&format)
    }

    fn request_update(&mut self, incremental: bool, x: u16, y: u16, width: u16, height: u16) -> Result<()> {
        let (fb_width, fb_height) = (self.client_fb.width(), self.client_fb.height());
        if u32::from(x) + u32::from(width) > fb_width || u32::from(y) + u32::from(height) > fb_height {
            return Err(RfbError::Protocol(format!(
                "update request rectangle ({x}, {y}, {width}x{height}) exceeds framebuffer bounds ({fb_width}x{fb_height})"
            )));
        }

        let current = self.updated.load(Ordering::Acquire);
        if !incremental || current != self.last_update_counter {
            if let Err(err) = self.send_update(x, y, width, height) {
                self.log
                    .log(LogLevel::Warn, &format!("failed to send framebuffer update: {err}"));
            }
            self.last_update_counter = current;
            self.pending = None;
        } else {
            self.pending = Some(PendingRequest { x, y, width, height });
        }
        Ok(())
    }

    fn send_update(&mut self, x: u16, y: u16, width: u16, height: u16) -> Result<()> {
        {
            let server_fb = self.server_fb.lock().unwrap();
            self.client_fb.convert(&server_fb)?;
        }
        let region = self
            .client_fb
            .region_bytes(u32::from(x), u32::from(y), u32::from(width), u32::from(height));
        let encoder = get_encoder(ENCODING_RAW).expect("raw encoding is always registered");
        let payload = encoder.encode(&region);

        let mut buf = BytesMut::new();
        buf.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        buf.put_u8(0); // padding
        buf.put_u16(1); // rectangle count
        let rect = Rectangle {
            x,
            y,
            width,
            height,
            encoding: ENCODING_RAW,
        };
        rect.write_header(&mut buf);
        buf.put_slice(&payload);

        self.transport.write(&buf)?;
        self.transport.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PixelFormat;
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::thread;

    fn connected_pair() -> (TcpStream, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_thread = thread::spawn(move || StdTcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        let client = client_thread.join().unwrap();
        (server, client)
    }

    fn test_context() -> ConnectionContext {
        let fb = Framebuffer::create_of_format(4, 2, &PixelFormat::rgb888()).unwrap();
        ConnectionContext {
            server_fb: Arc::new(Mutex::new(fb)),
            updated: Arc::new(AtomicU64::new(0)),
            events: Arc::new(EventQueue::new()),
            log: crate::logging::default_sink(),
            desktop_name: Arc::from("test"),
        }
    }

    #[test]
    fn version_downgrade_scenario() {
        use std::io::{Read, Write};

        let (server, mut client) = connected_pair();
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = test_context();

        let handle = thread::spawn(move || negotiate(server, &stop, &ctx));

        let mut offered = [0u8; 12];
        client.read_exact(&mut offered).unwrap();
        assert_eq!(&offered, b"RFB 003.008\n");

        client.write_all(b"RFB 003.003\n").unwrap();

        let mut security_type = [0u8; 4];
        client.read_exact(&mut security_type).unwrap();
        assert_eq!(security_type, [0x00, 0x00, 0x00, 0x01]);

        client.write_all(&[0x01]).unwrap(); // ClientInit, shared=1

        let mut server_init_head = [0u8; 4];
        client.read_exact(&mut server_init_head).unwrap();
        assert_eq!(server_init_head, [0x00, 0x04, 0x00, 0x02]);

        let conn = handle.join().unwrap().unwrap();
        assert_eq!(conn.client_fb.width(), 4);
    }

    fn test_connection() -> Connection {
        let (server, _client) = connected_pair();
        let stop = Arc::new(AtomicBool::new(false));
        let transport = Transport::new(server, Arc::clone(&stop)).unwrap();
        let client_fb = Framebuffer::create_of_format(4, 2, &PixelFormat::rgb888()).unwrap();
        Connection {
            stop,
            transport,
            client_fb,
            encodings: vec![ENCODING_RAW],
            server_fb: Arc::new(Mutex::new(Framebuffer::create_of_format(4, 2, &PixelFormat::rgb888()).unwrap())),
            updated: Arc::new(AtomicU64::new(0)),
            last_update_counter: 0,
            events: Arc::new(EventQueue::new()),
            log: crate::logging::default_sink(),
            pending: None,
        }
    }

    #[test]
    fn request_update_rejects_rectangle_exceeding_framebuffer_bounds() {
        let mut conn = test_connection();
        let err = conn.request_update(false, 0, 0, 5, 2).unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }

    #[test]
    fn request_update_accepts_rectangle_within_bounds() {
        let mut conn = test_connection();
        assert!(conn.request_update(false, 1, 1, 3, 1).is_ok());
    }
}
