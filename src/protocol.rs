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

//! RFB wire protocol constants and message structures.
//!
//! This module provides the fundamental building blocks for RFB protocol
//! communication: protocol version negotiation, message types, the security
//! handshake, and pixel format definitions. It implements the core of RFC 6143,
//! restricted to security type `None` and the Raw encoding (see the crate's
//! `encoding` module for the extension point covering other encodings).
//!
//! # Protocol phases
//!
//! 1. **Protocol version** — server and client agree on 3.3, 3.7, or 3.8.
//! 2. **Security handshake** — type selection (only `None` is mandated here).
//! 3. **Initialization** — exchange of framebuffer parameters and capabilities.
//! 4. **Normal operation** — ongoing input events and framebuffer updates.

use crate::error::{Result, RfbError};
use bytes::{Buf, BufMut, BytesMut};

// Client-to-Server Message Types

/// Message type: client requests to change the pixel format.
pub const CLIENT_MSG_SET_PIXEL_FORMAT: u8 = 0;
/// Message type: client specifies supported encodings.
pub const CLIENT_MSG_SET_ENCODINGS: u8 = 2;
/// Message type: client requests a framebuffer update.
pub const CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
/// Message type: client sends a keyboard event.
pub const CLIENT_MSG_KEY_EVENT: u8 = 4;
/// Message type: client sends a pointer (mouse) event.
pub const CLIENT_MSG_POINTER_EVENT: u8 = 5;
/// Message type: client sends cut text (clipboard data).
pub const CLIENT_MSG_CLIENT_CUT_TEXT: u8 = 6;

// Server-to-Client Message Types

/// Message type: server sends a framebuffer update.
pub const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

// Encoding Types

/// Encoding type: Raw pixel data. The only encoding this server implements.
pub const ENCODING_RAW: i32 = 0;

// Security Types

/// Security type: None (no authentication). The only type this server offers.
pub const SECURITY_TYPE_NONE: u8 = 1;

// Security Results

/// Security result: authentication (if any) succeeded.
pub const SECURITY_RESULT_OK: u32 = 0;
/// Security result: authentication failed.
pub const SECURITY_RESULT_FAILED: u32 = 1;

/// Maximum accepted `ClientCutText` payload, guarding against a hostile length field
/// forcing an unbounded allocation.
pub const MAX_CUT_TEXT_LEN: usize = 10 * 1024 * 1024; // 10MB

/// The RFB protocol version negotiated with a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// RFB 3.3.
    V3,
    /// RFB 3.7.
    V7,
    /// RFB 3.8.
    V8,
}

impl ProtocolVersion {
    /// The highest version this server will ever offer.
    pub const SERVER_OFFERED: ProtocolVersion = ProtocolVersion::V8;

    /// The 12-byte ASCII wire representation, e.g. `b"RFB 003.008\n"`.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 12] {
        let text = match self {
            ProtocolVersion::V3 => b"RFB 003.003\n",
            ProtocolVersion::V7 => b"RFB 003.007\n",
            ProtocolVersion::V8 => b"RFB 003.008\n",
        };
        *text
    }

    /// Parses a 12-byte `"RFB xxx.yyy\n"` string, accepting only 003.003, 003.007,
    /// and 003.008.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::UnsupportedVersion`] for anything else, including
    /// malformed input.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 12 || &bytes[0..4] != b"RFB " || bytes[11] != b'\n' {
            return Err(RfbError::UnsupportedVersion);
        }
        match &bytes[4..11] {
            b"003.003" => Ok(ProtocolVersion::V3),
            b"003.007" => Ok(ProtocolVersion::V7),
            b"003.008" => Ok(ProtocolVersion::V8),
            _ => Err(RfbError::UnsupportedVersion),
        }
    }

    /// The lower of two versions, used when the server and client disagree: the
    /// handshake proceeds at whichever version is less capable.
    #[must_use]
    pub fn min(self, other: ProtocolVersion) -> ProtocolVersion {
        use ProtocolVersion::{V3, V7, V8};
        match (self, other) {
            (V3, _) | (_, V3) => V3,
            (V7, _) | (_, V7) => V7,
            (V8, V8) => V8,
        }
    }
}

/// The pixel format as carried on the wire in `ServerInit` and `SetPixelFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Number of bits per pixel (8, 16, or 32).
    pub bits_per_pixel: u8,
    /// Depth of the pixel in bits.
    pub depth: u8,
    /// `1` if multi-byte pixels are big-endian, `0` if little-endian.
    pub big_endian_flag: u8,
    /// `1` if true-color, `0` if colormapped (colormapped is unsupported here).
    pub true_colour_flag: u8,
    /// Maximum red component value (e.g. `31` for 5 bits).
    pub red_max: u16,
    /// Maximum green component value.
    pub green_max: u16,
    /// Maximum blue component value.
    pub blue_max: u16,
    /// Bit shift of the red component within a pixel word.
    pub red_shift: u8,
    /// Bit shift of the green component within a pixel word.
    pub green_shift: u8,
    /// Bit shift of the blue component within a pixel word.
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The canonical 32bpp RGB888 format (§6 of the spec): true-color, R at bits
    /// 16-23, G at bits 8-15, B at bits 0-7, little-endian.
    #[must_use]
    pub fn rgb888() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 0xFF,
            green_max: 0xFF,
            blue_max: 0xFF,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    /// The canonical 16bpp RGB565 format.
    #[must_use]
    pub fn rgb565() -> Self {
        Self {
            bits_per_pixel: 16,
            depth: 16,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 0x1F,
            green_max: 0x3F,
            blue_max: 0x1F,
            red_shift: 11,
            green_shift: 5,
            blue_shift: 0,
        }
    }

    /// The canonical 8bpp BGR233 format.
    #[must_use]
    pub fn bgr233() -> Self {
        Self {
            bits_per_pixel: 8,
            depth: 8,
            big_endian_flag: 0,
            true_colour_flag: 1,
            red_max: 0x07,
            green_max: 0x07,
            blue_max: 0x03,
            red_shift: 0,
            green_shift: 3,
            blue_shift: 6,
        }
    }

    /// The canonical format for a given bytes-per-pixel value (1, 2, or 4), per §6.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::InvalidPixelFormat`] for any other `bpp`.
    pub fn canonical_for_bpp(bpp: u8) -> Result<Self> {
        match bpp {
            1 => Ok(Self::bgr233()),
            2 => Ok(Self::rgb565()),
            4 => Ok(Self::rgb888()),
            _ => Err(RfbError::InvalidPixelFormat),
        }
    }

    /// Validates that this format is one this server can convert to/from: a
    /// supported bits-per-pixel, true-color, and channel widths that fit within the
    /// declared depth without overlap.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if !matches!(self.bits_per_pixel, 8 | 16 | 32) {
            return false;
        }
        if self.depth == 0 || self.depth > 32 {
            return false;
        }
        if self.true_colour_flag == 0 {
            // Colormapped formats are out of scope.
            return false;
        }

        let bits_needed = |max: u16| -> u32 {
            if max == 0 {
                0
            } else {
                16 - max.leading_zeros()
            }
        };
        let red_bits = bits_needed(self.red_max);
        let green_bits = bits_needed(self.green_max);
        let blue_bits = bits_needed(self.blue_max);
        if red_bits + green_bits + blue_bits > u32::from(self.depth) {
            return false;
        }
        if u32::from(self.red_shift) >= u32::from(self.bits_per_pixel)
            || u32::from(self.green_shift) >= u32::from(self.bits_per_pixel)
            || u32::from(self.blue_shift) >= u32::from(self.bits_per_pixel)
        {
            return false;
        }
        true
    }

    /// Serializes the 16-byte wire form (including 3 bytes of trailing padding).
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.bits_per_pixel);
        buf.put_u8(self.depth);
        buf.put_u8(self.big_endian_flag);
        buf.put_u8(self.true_colour_flag);
        buf.put_u16(self.red_max);
        buf.put_u16(self.green_max);
        buf.put_u16(self.blue_max);
        buf.put_u8(self.red_shift);
        buf.put_u8(self.green_shift);
        buf.put_u8(self.blue_shift);
        buf.put_bytes(0, 3); // padding
    }

    /// Parses the 16-byte wire form from a buffer positioned at its start.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::Protocol`] if fewer than 16 bytes remain.
    pub fn read_from(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 16 {
            return Err(RfbError::Protocol("truncated pixel format".into()));
        }
        let format = Self {
            bits_per_pixel: buf.get_u8(),
            depth: buf.get_u8(),
            big_endian_flag: buf.get_u8(),
            true_colour_flag: buf.get_u8(),
            red_max: buf.get_u16(),
            green_max: buf.get_u16(),
            blue_max: buf.get_u16(),
            red_shift: buf.get_u8(),
            green_shift: buf.get_u8(),
            blue_shift: buf.get_u8(),
        };
        buf.advance(3); // padding
        Ok(format)
    }
}

/// The `ServerInit` message sent once, right after the security handshake
/// completes.
#[derive(Debug, Clone)]
pub struct ServerInit {
    /// Framebuffer width in pixels.
    pub framebuffer_width: u16,
    /// Framebuffer height in pixels.
    pub framebuffer_height: u16,
    /// The server's (canonical) pixel format.
    pub pixel_format: PixelFormat,
    /// The desktop name advertised to the client.
    pub name: String,
}

impl ServerInit {
    /// Serializes the message: width, height, 16-byte pixel format, name length,
    /// name bytes.
    #[allow(clippy::cast_possible_truncation)] // desktop names are never near u32::MAX
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.framebuffer_width);
        buf.put_u16(self.framebuffer_height);
        self.pixel_format.write_to(buf);

        let name_bytes = self.name.as_bytes();
        buf.put_u32(name_bytes.len() as u32);
        buf.put_slice(name_bytes);
    }
}

/// A rectangle header within a `FramebufferUpdate` message.
#[derive(Debug, Clone, Copy)]
pub struct Rectangle {
    /// X coordinate of the top-left corner.
    pub x: u16,
    /// Y coordinate of the top-left corner.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Encoding identifier for the data that follows the header.
    pub encoding: i32,
}

impl Rectangle {
    /// Serializes the 12-byte rectangle header (x, y, width, height, encoding).
    pub fn write_header(&self, buf: &mut BytesMut) {
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_i32(self.encoding);
    }
}

/// A decoded client-to-server message.
#[derive(Debug)]
pub enum ClientMessage {
    /// Client requests a specific pixel format for future updates.
    SetPixelFormat(PixelFormat),
    /// Client specifies the list of encodings it supports, in preference order.
    SetEncodings(Vec<i32>),
    /// Client requests a framebuffer update.
    FramebufferUpdateRequest {
        /// If true, only changes since the last update are wanted.
        incremental: bool,
        /// X coordinate of the requested region.
        x: u16,
        /// Y coordinate of the requested region.
        y: u16,
        /// Width of the requested region.
        width: u16,
        /// Height of the requested region.
        height: u16,
    },
    /// Client sends a keyboard event.
    KeyEvent {
        /// `true` if pressed, `false` if released.
        down: bool,
        /// X11 keysym.
        keysym: u32,
    },
    /// Client sends a pointer event.
    PointerEvent {
        /// Bitmask of currently pressed buttons.
        button_mask: u8,
        /// X coordinate.
        x: u16,
        /// Y coordinate.
        y: u16,
    },
    /// Client sends clipboard text.
    ClientCutText(String),
}

/// Decodes one client message body, given its already-consumed type byte and the
/// remaining bytes of the message read from the wire.
///
/// `body` must contain exactly the bytes following the message-type byte (including
/// any trailing variable-length payload such as an encoding list or cut-text
/// string); callers are responsible for reading the right number of bytes off the
/// transport before calling this (fixed-size header first, then any declared
/// variable-length tail).
///
/// # Errors
///
/// Returns [`RfbError::Protocol`] for an unknown message type or truncated body, and
/// [`RfbError::InvalidPixelFormat`] / [`RfbError::OversizedCutText`] for the
/// respective message-specific violations.
pub fn decode_client_message(msg_type: u8, body: &[u8]) -> Result<ClientMessage> {
    let mut buf = body;
    match msg_type {
        CLIENT_MSG_SET_PIXEL_FORMAT => {
            buf.advance(3); // padding
            let format = PixelFormat::read_from(&mut buf)?;
            if !format.is_valid() {
                return Err(RfbError::InvalidPixelFormat);
            }
            Ok(ClientMessage::SetPixelFormat(format))
        }
        CLIENT_MSG_SET_ENCODINGS => {
            buf.advance(1); // padding
            if buf.remaining() < 2 {
                return Err(RfbError::Protocol("truncated SetEncodings".into()));
            }
            let count = buf.get_u16() as usize;
            if buf.remaining() < count * 4 {
                return Err(RfbError::Protocol("truncated SetEncodings body".into()));
            }
            let mut encodings = Vec::with_capacity(count);
            for _ in 0..count {
                encodings.push(buf.get_i32());
            }
            Ok(ClientMessage::SetEncodings(encodings))
        }
        CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
            if buf.remaining() < 9 {
                return Err(RfbError::Protocol(
                    "truncated FramebufferUpdateRequest".into(),
                ));
            }
            let incremental = buf.get_u8() != 0;
            let x = buf.get_u16();
            let y = buf.get_u16();
            let width = buf.get_u16();
            let height = buf.get_u16();
            Ok(ClientMessage::FramebufferUpdateRequest {
                incremental,
                x,
                y,
                width,
                height,
            })
        }
        CLIENT_MSG_KEY_EVENT => {
            if buf.remaining() < 7 {
                return Err(RfbError::Protocol("truncated KeyEvent".into()));
            }
            let down = buf.get_u8() != 0;
            buf.advance(2); // padding
            let keysym = buf.get_u32();
            Ok(ClientMessage::KeyEvent { down, keysym })
        }
        CLIENT_MSG_POINTER_EVENT => {
            if buf.remaining() < 5 {
                return Err(RfbError::Protocol("truncated PointerEvent".into()));
            }
            let button_mask = buf.get_u8();
            let x = buf.get_u16();
            let y = buf.get_u16();
            Ok(ClientMessage::PointerEvent { button_mask, x, y })
        }
        CLIENT_MSG_CLIENT_CUT_TEXT => {
            if buf.remaining() < 7 {
                return Err(RfbError::Protocol("truncated ClientCutText header".into()));
            }
            buf.advance(3); // padding
            let length = buf.get_u32() as usize;
            if length > MAX_CUT_TEXT_LEN {
                return Err(RfbError::OversizedCutText);
            }
            if buf.remaining() < length {
                return Err(RfbError::Protocol("truncated ClientCutText body".into()));
            }
            let text = String::from_utf8(buf.copy_to_bytes(length).to_vec())
                .map_err(|_| RfbError::Protocol("ClientCutText is not valid UTF-8".into()))?;
            Ok(ClientMessage::ClientCutText(text))
        }
        other => Err(RfbError::Protocol(format!("unknown message type {other}"))),
    }
}

/// Returns the number of fixed header bytes (excluding the type byte already read
/// and excluding any variable-length tail) that must be read before
/// [`decode_client_message`] can determine the full message length.
///
/// For [`CLIENT_MSG_SET_ENCODINGS`] and [`CLIENT_MSG_CLIENT_CUT_TEXT`] the header
/// contains a count/length field that determines how many further bytes to read
/// before decoding; callers read this fixed portion first, extract the count, read
/// the variable tail, then call [`decode_client_message`] with the whole body.
#[must_use]
pub fn fixed_header_len(msg_type: u8) -> Option<usize> {
    match msg_type {
        CLIENT_MSG_SET_PIXEL_FORMAT => Some(19), // 3 padding + 16 byte format
        CLIENT_MSG_SET_ENCODINGS => Some(3),     // 1 padding + 2 byte count
        CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => Some(9),
        CLIENT_MSG_KEY_EVENT => Some(7),
        CLIENT_MSG_POINTER_EVENT => Some(5),
        CLIENT_MSG_CLIENT_CUT_TEXT => Some(7), // 3 padding + 4 byte length
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_version_round_trips() {
        for version in [ProtocolVersion::V3, ProtocolVersion::V7, ProtocolVersion::V8] {
            let bytes = version.to_bytes();
            assert_eq!(ProtocolVersion::parse(&bytes).unwrap(), version);
        }
    }

    #[test]
    fn protocol_version_rejects_garbage() {
        assert!(ProtocolVersion::parse(b"RFB 004.000\n").is_err());
        assert!(ProtocolVersion::parse(b"not twelve!!").is_err());
    }

    #[test]
    fn version_downgrade_picks_lower() {
        assert_eq!(ProtocolVersion::V8.min(ProtocolVersion::V3), ProtocolVersion::V3);
        assert_eq!(ProtocolVersion::V7.min(ProtocolVersion::V8), ProtocolVersion::V7);
    }

    #[test]
    fn server_init_payload_matches_literal_scenario() {
        // 4x2 framebuffer, bpp=4 canonical RGB888, desktop name "test".
        let init = ServerInit {
            framebuffer_width: 4,
            framebuffer_height: 2,
            pixel_format: PixelFormat::rgb888(),
            name: "test".to_string(),
        };
        let mut buf = BytesMut::new();
        init.write_to(&mut buf);

        let expected: &[u8] = &[
            0x00, 0x04, 0x00, 0x02, // width, height
            0x20, 0x18, 0x00, 0x01, // bpp=32, depth=24, big_endian=0, true_colour=1
            0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, // r/g/b max
            0x10, 0x08, 0x00, // r/g/b shift
            0x00, 0x00, 0x00, // padding
            0x00, 0x00, 0x00, 0x04, // name length
            0x74, 0x65, 0x73, 0x74, // "test"
        ];
        assert_eq!(&buf[..], expected);
    }

    #[test]
    fn set_pixel_format_round_trips() {
        let format = PixelFormat::rgb565();
        let mut buf = BytesMut::new();
        format.write_to(&mut buf);
        assert_eq!(buf.len(), 16);

        let mut slice = &buf[..];
        let parsed = PixelFormat::read_from(&mut slice).unwrap();
        assert_eq!(parsed, format);
    }

    #[test]
    fn decode_key_event_scenario() {
        // type 0x04 already consumed; body = down, padding(2), keysym
        let body = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x61];
        match decode_client_message(CLIENT_MSG_KEY_EVENT, &body).unwrap() {
            ClientMessage::KeyEvent { down, keysym } => {
                assert!(down);
                assert_eq!(keysym, 0x61);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_oversized_cut_text() {
        let mut body = BytesMut::new();
        body.put_bytes(0, 3);
        body.put_u32((MAX_CUT_TEXT_LEN + 1) as u32);
        let err = decode_client_message(CLIENT_MSG_CLIENT_CUT_TEXT, &body).unwrap_err();
        assert!(matches!(err, RfbError::OversizedCutText));
    }

    #[test]
    fn decode_rejects_unknown_message_type() {
        let err = decode_client_message(0xFF, &[]).unwrap_err();
        assert!(matches!(err, RfbError::Protocol(_)));
    }
}
