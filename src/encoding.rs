//! Framebuffer encodings for `FramebufferUpdate` rectangles.
//!
//! Only the Raw encoding is implemented, per this server's scope. The trait and
//! registry shape are kept exactly as the teacher's so a consumer can register
//! additional encodings (Hextile, Zlib, Tight, ...) without touching
//! [`crate::connection`].

use bytes::BytesMut;

pub mod raw;

pub use raw::RawEncoding;

use crate::protocol::ENCODING_RAW;

/// Transforms a framebuffer's native pixel bytes into the wire representation for
/// one `FramebufferUpdate` rectangle body.
pub trait Encoding: Send + Sync {
    /// Encodes `data` (row-major native pixel bytes for the rectangle's region) for
    /// the wire.
    fn encode(&self, data: &[u8]) -> BytesMut;

    /// The RFB encoding type this implementation produces.
    fn encoding_type(&self) -> i32;
}

/// Returns a boxed encoder for the requested wire encoding type, or `None` if this
/// server has no implementation for it.
#[must_use]
pub fn get_encoder(encoding_type: i32) -> Option<Box<dyn Encoding>> {
    match encoding_type {
        ENCODING_RAW => Some(Box::new(RawEncoding)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_encoder_supports_raw() {
        let encoder = get_encoder(ENCODING_RAW).unwrap();
        assert_eq!(encoder.encoding_type(), ENCODING_RAW);
    }

    #[test]
    fn get_encoder_rejects_unknown_type() {
        assert!(get_encoder(-999).is_none());
    }
}
