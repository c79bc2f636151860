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

//! The pixel buffer backing a server or a connection's view of it.
//!
//! A [`Framebuffer`] keeps an internal pixel descriptor (masks, shifts, and the
//! per-channel normalization shift needed to rescale a wire channel up to 8 bits and
//! back) that is richer than the wire [`crate::protocol::PixelFormat`] it is built
//! from. Reading or writing a pixel always goes through 8-bit-per-channel [`Color`]
//! values; the descriptor absorbs the bit-depth conversion.

use crate::error::{Result, RfbError};
use crate::protocol::PixelFormat;

/// An 8-bit-per-channel color, the common currency for [`Framebuffer::get_pixel`]
/// and [`Framebuffer::set_pixel`] regardless of the buffer's native bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    /// Red channel, 0-255.
    pub r: u8,
    /// Green channel, 0-255.
    pub g: u8,
    /// Blue channel, 0-255.
    pub b: u8,
}

/// Number of bits needed to represent values `0..=max`; `0` for `max == 0`.
fn bits_needed(max: u32) -> u32 {
    if max == 0 {
        0
    } else {
        32 - max.leading_zeros()
    }
}

/// The normalization shift for a channel whose on-wire maximum is `max`: the amount
/// an 8-bit channel value must be shifted right to fit in `bits_needed(max)` bits
/// (and shifted back left to restore precision when reading).
fn compute_norm(max: u32) -> u8 {
    8u32.saturating_sub(bits_needed(max)) as u8
}

/// Storage backing a [`Framebuffer`]: either a buffer this crate allocated and owns,
/// or one borrowed from a host application that guarantees it outlives the
/// framebuffer (a `'static` borrow being the only way to express that guarantee
/// without unsafe code).
enum Storage {
    Owned(Vec<u8>),
    Borrowed(&'static mut [u8]),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Borrowed(s) => s,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Borrowed(s) => s,
        }
    }
}

/// A width x height grid of pixels in some bits-per-pixel layout, with the masks,
/// shifts, and normalization needed to convert 8-bit-per-channel [`Color`] values
/// to and from the buffer's native representation.
pub struct Framebuffer {
    width: u32,
    height: u32,
    bpp: u8,
    big_endian: bool,
    rmask: u32,
    gmask: u32,
    bmask: u32,
    rshift: u8,
    gshift: u8,
    bshift: u8,
    rnorm: u8,
    gnorm: u8,
    bnorm: u8,
    storage: Storage,
}

impl Framebuffer {
    /// Builds the internal descriptor fields from a wire pixel format.
    fn descriptor_from_format(format: &PixelFormat) -> (u8, u32, u32, u32, u8, u8, u8, u8, u8, u8) {
        let bpp = format.bits_per_pixel / 8;
        let rmask = u32::from(format.red_max);
        let gmask = u32::from(format.green_max);
        let bmask = u32::from(format.blue_max);
        (
            bpp,
            rmask,
            gmask,
            bmask,
            format.red_shift,
            format.green_shift,
            format.blue_shift,
            compute_norm(rmask),
            compute_norm(gmask),
            compute_norm(bmask),
        )
    }

    /// Allocates a new, zero-filled framebuffer using the canonical pixel format for
    /// `bpp` bytes per pixel (1, 2, or 4; see [`PixelFormat::canonical_for_bpp`]).
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::InvalidPixelFormat`] for any other `bpp`, and
    /// [`RfbError::Resource`] if `width * height * bpp` overflows `usize`.
    pub fn create(width: u32, height: u32, bpp: u8) -> Result<Self> {
        let format = PixelFormat::canonical_for_bpp(bpp)?;
        Self::create_of_format(width, height, &format)
    }

    /// Allocates a new, zero-filled framebuffer using an arbitrary valid pixel
    /// format.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::InvalidPixelFormat`] if `format` fails validation, and
    /// [`RfbError::Resource`] on overflow.
    pub fn create_of_format(width: u32, height: u32, format: &PixelFormat) -> Result<Self> {
        if !format.is_valid() {
            return Err(RfbError::InvalidPixelFormat);
        }
        let bpp = format.bits_per_pixel / 8;
        let len = pixel_buffer_len(width, height, bpp)?;
        let (bpp, rmask, gmask, bmask, rshift, gshift, bshift, rnorm, gnorm, bnorm) =
            Self::descriptor_from_format(format);
        Ok(Self {
            width,
            height,
            bpp,
            big_endian: format.big_endian_flag != 0,
            rmask,
            gmask,
            bmask,
            rshift,
            gshift,
            bshift,
            rnorm,
            gnorm,
            bnorm,
            storage: Storage::Owned(vec![0u8; len]),
        })
    }

    /// Wraps a caller-owned buffer instead of allocating one. The caller (a host
    /// application embedding this server) must guarantee `data` outlives every use
    /// of the returned [`Framebuffer`]; expressed here as a `'static` borrow.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::InvalidPixelFormat`] if `format` fails validation, and
    /// [`RfbError::Resource`] if `data` is smaller than `width * height * bpp`.
    pub fn create_with_data(
        data: &'static mut [u8],
        width: u32,
        height: u32,
        format: &PixelFormat,
    ) -> Result<Self> {
        if !format.is_valid() {
            return Err(RfbError::InvalidPixelFormat);
        }
        let bpp = format.bits_per_pixel / 8;
        let needed = pixel_buffer_len(width, height, bpp)?;
        if data.len() < needed {
            return Err(RfbError::Resource(format!(
                "buffer of {} bytes too small for {}x{}x{}",
                data.len(),
                width,
                height,
                bpp
            )));
        }
        let (bpp, rmask, gmask, bmask, rshift, gshift, bshift, rnorm, gnorm, bnorm) =
            Self::descriptor_from_format(format);
        Ok(Self {
            width,
            height,
            bpp,
            big_endian: format.big_endian_flag != 0,
            rmask,
            gmask,
            bmask,
            rshift,
            gshift,
            bshift,
            rnorm,
            gnorm,
            bnorm,
            storage: Storage::Borrowed(data),
        })
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per pixel (1, 2, or 4).
    #[must_use]
    pub fn bpp(&self) -> u8 {
        self.bpp
    }

    /// The current pixel format, reconstructed from the internal descriptor.
    #[must_use]
    pub fn format(&self) -> PixelFormat {
        let depth = (bits_needed(self.rmask) + bits_needed(self.gmask) + bits_needed(self.bmask))
            as u8;
        PixelFormat {
            bits_per_pixel: self.bpp * 8,
            depth,
            big_endian_flag: u8::from(self.big_endian),
            true_colour_flag: 1,
            red_max: self.rmask as u16,
            green_max: self.gmask as u16,
            blue_max: self.bmask as u16,
            red_shift: self.rshift,
            green_shift: self.gshift,
            blue_shift: self.bshift,
        }
    }

    /// Resizes the framebuffer in place, preserving the overlapping region (top-left
    /// aligned) and zero-filling any newly exposed area. The pixel format is
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::InvalidState`] if the framebuffer wraps borrowed storage
    /// (a host-owned buffer cannot be reallocated out from under its owner), and
    /// [`RfbError::Resource`] on overflow.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if matches!(self.storage, Storage::Borrowed(_)) {
            return Err(RfbError::InvalidState(
                "cannot resize a framebuffer backed by borrowed storage".into(),
            ));
        }
        let new_len = pixel_buffer_len(width, height, self.bpp)?;
        let mut new_buf = vec![0u8; new_len];

        let copy_width = self.width.min(width);
        let copy_height = self.height.min(height);
        let old = self.storage.as_slice();
        let bpp = usize::from(self.bpp);
        for y in 0..copy_height {
            let src_start = (y * self.width) as usize * bpp;
            let src_end = src_start + copy_width as usize * bpp;
            let dst_start = (y * width) as usize * bpp;
            let dst_end = dst_start + copy_width as usize * bpp;
            new_buf[dst_start..dst_end].copy_from_slice(&old[src_start..src_end]);
        }

        self.width = width;
        self.height = height;
        self.storage = Storage::Owned(new_buf);
        Ok(())
    }

    /// Flips the byte order of every multi-byte pixel in place. A no-op for 1
    /// byte-per-pixel buffers, where endianness has no meaning.
    pub fn set_endian(&mut self, big_endian: bool) {
        if big_endian == self.big_endian || self.bpp == 1 {
            self.big_endian = big_endian;
            return;
        }
        let bpp = usize::from(self.bpp);
        let buf = self.storage.as_mut_slice();
        for chunk in buf.chunks_exact_mut(bpp) {
            chunk.reverse();
        }
        self.big_endian = big_endian;
    }

    /// Reconfigures this framebuffer to a new pixel format without changing its
    /// dimensions, reinterpreting its existing pixel data in the new layout's
    /// normalization.
    ///
    /// This changes only the descriptor (masks/shifts/norms/bpp/endianness); use
    /// [`Framebuffer::convert`] to additionally rewrite the stored bytes from one
    /// layout into another of the same dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::InvalidPixelFormat`] if `format` is invalid, and
    /// [`RfbError::Resource`] if the new bpp requires a differently sized buffer
    /// while this framebuffer is backed by borrowed storage.
    pub fn reformat(&mut self, format: &PixelFormat) -> Result<()> {
        if !format.is_valid() {
            return Err(RfbError::InvalidPixelFormat);
        }
        let new_bpp = format.bits_per_pixel / 8;
        if new_bpp != self.bpp {
            let needed = pixel_buffer_len(self.width, self.height, new_bpp)?;
            match &mut self.storage {
                Storage::Owned(buf) => buf.resize(needed, 0),
                Storage::Borrowed(_) => {
                    return Err(RfbError::Resource(
                        "cannot change bpp of a framebuffer backed by borrowed storage".into(),
                    ))
                }
            }
        }
        let (bpp, rmask, gmask, bmask, rshift, gshift, bshift, rnorm, gnorm, bnorm) =
            Self::descriptor_from_format(format);
        self.bpp = bpp;
        self.rmask = rmask;
        self.gmask = gmask;
        self.bmask = bmask;
        self.rshift = rshift;
        self.gshift = gshift;
        self.bshift = bshift;
        self.rnorm = rnorm;
        self.gnorm = gnorm;
        self.bnorm = bnorm;
        self.big_endian = format.big_endian_flag != 0;
        Ok(())
    }

    /// Reads the raw pixel word at `(x, y)`, honoring the buffer's byte order.
    fn read_word(&self, x: u32, y: u32) -> u32 {
        let offset = pixel_offset(self.width, self.bpp, x, y);
        let buf = self.storage.as_slice();
        match self.bpp {
            1 => u32::from(buf[offset]),
            2 => {
                let bytes = [buf[offset], buf[offset + 1]];
                u32::from(if self.big_endian {
                    u16::from_be_bytes(bytes)
                } else {
                    u16::from_le_bytes(bytes)
                })
            }
            4 => {
                let bytes = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
                if self.big_endian {
                    u32::from_be_bytes(bytes)
                } else {
                    u32::from_le_bytes(bytes)
                }
            }
            _ => unreachable!("bpp is always 1, 2, or 4"),
        }
    }

    /// Writes the raw pixel word at `(x, y)`, honoring the buffer's byte order.
    fn write_word(&mut self, x: u32, y: u32, value: u32) {
        let offset = pixel_offset(self.width, self.bpp, x, y);
        let bpp = self.bpp;
        let big_endian = self.big_endian;
        let buf = self.storage.as_mut_slice();
        match bpp {
            1 => buf[offset] = value as u8,
            2 => {
                let bytes = if big_endian {
                    (value as u16).to_be_bytes()
                } else {
                    (value as u16).to_le_bytes()
                };
                buf[offset..offset + 2].copy_from_slice(&bytes);
            }
            4 => {
                let bytes = if big_endian {
                    value.to_be_bytes()
                } else {
                    value.to_le_bytes()
                };
                buf[offset..offset + 4].copy_from_slice(&bytes);
            }
            _ => unreachable!("bpp is always 1, 2, or 4"),
        }
    }

    /// Reads the pixel at `(x, y)` as an 8-bit-per-channel color.
    ///
    /// # Panics
    ///
    /// Panics if `x >= width()` or `y >= height()`, mirroring ordinary slice
    /// indexing.
    #[must_use]
    pub fn get_pixel(&self, x: u32, y: u32) -> Color {
        assert!(x < self.width && y < self.height, "pixel out of bounds");
        let word = self.read_word(x, y);
        Color {
            r: (((word >> self.rshift) & self.rmask) << self.rnorm) as u8,
            g: (((word >> self.gshift) & self.gmask) << self.gnorm) as u8,
            b: (((word >> self.bshift) & self.bmask) << self.bnorm) as u8,
        }
    }

    /// Writes the pixel at `(x, y)` from an 8-bit-per-channel color, quantizing down
    /// to the buffer's native channel precision.
    ///
    /// # Panics
    ///
    /// Panics if `x >= width()` or `y >= height()`.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        assert!(x < self.width && y < self.height, "pixel out of bounds");
        let word = ((u32::from(color.r) >> self.rnorm) & self.rmask) << self.rshift
            | ((u32::from(color.g) >> self.gnorm) & self.gmask) << self.gshift
            | ((u32::from(color.b) >> self.bnorm) & self.bmask) << self.bshift;
        self.write_word(x, y, word);
    }

    /// Rewrites every pixel of this framebuffer from `src`, translating between
    /// pixel formats as needed via 8-bit-per-channel [`Color`] round-tripping.
    ///
    /// # Errors
    ///
    /// Returns [`RfbError::Resource`] if the dimensions differ.
    pub fn convert(&mut self, src: &Framebuffer) -> Result<()> {
        if self.width != src.width || self.height != src.height {
            return Err(RfbError::Resource(
                "convert requires matching dimensions".into(),
            ));
        }
        for y in 0..self.height {
            for x in 0..self.width {
                let color = src.get_pixel(x, y);
                self.set_pixel(x, y, color);
            }
        }
        Ok(())
    }

    /// Produces a deep, owned copy of this framebuffer (same dimensions, format,
    /// and pixel data).
    #[must_use]
    pub fn copy(&self) -> Framebuffer {
        Framebuffer {
            width: self.width,
            height: self.height,
            bpp: self.bpp,
            big_endian: self.big_endian,
            rmask: self.rmask,
            gmask: self.gmask,
            bmask: self.bmask,
            rshift: self.rshift,
            gshift: self.gshift,
            bshift: self.bshift,
            rnorm: self.rnorm,
            gnorm: self.gnorm,
            bnorm: self.bnorm,
            storage: Storage::Owned(self.storage.as_slice().to_vec()),
        }
    }

    /// Borrows the raw pixel bytes, in row-major order, for assembling a Raw-encoded
    /// `FramebufferUpdate` rectangle.
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        self.storage.as_slice()
    }

    /// Copies out the native pixel bytes of the `width x height` region at
    /// `(x, y)`, row by row, for use as a `FramebufferUpdate` rectangle payload.
    /// Coordinates and extent are clamped to the framebuffer's bounds.
    #[must_use]
    pub fn region_bytes(&self, x: u32, y: u32, width: u32, height: u32) -> Vec<u8> {
        let x = x.min(self.width);
        let y = y.min(self.height);
        let width = width.min(self.width.saturating_sub(x));
        let height = height.min(self.height.saturating_sub(y));
        let bpp = usize::from(self.bpp);
        let row_bytes = width as usize * bpp;

        let mut out = Vec::with_capacity(row_bytes * height as usize);
        let buf = self.storage.as_slice();
        for row in 0..height {
            let start = pixel_offset(self.width, self.bpp, x, y + row);
            out.extend_from_slice(&buf[start..start + row_bytes]);
        }
        out
    }
}

fn pixel_offset(width: u32, bpp: u8, x: u32, y: u32) -> usize {
    (y as usize * width as usize + x as usize) * usize::from(bpp)
}

fn pixel_buffer_len(width: u32, height: u32, bpp: u8) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(usize::from(bpp)))
        .ok_or_else(|| RfbError::Resource("framebuffer dimensions overflow".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_zero_fills() {
        let fb = Framebuffer::create(4, 2, 4).unwrap();
        assert_eq!(fb.raw_bytes().len(), 4 * 2 * 4);
        assert!(fb.raw_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn rgb888_round_trips_exactly() {
        let mut fb = Framebuffer::create(2, 2, 4).unwrap();
        let color = Color { r: 10, g: 200, b: 77 };
        fb.set_pixel(1, 1, color);
        assert_eq!(fb.get_pixel(1, 1), color);
    }

    #[test]
    fn rgb565_round_trip_within_one_quantization_step() {
        let mut fb = Framebuffer::create(1, 1, 2).unwrap();
        let original = Color { r: 130, g: 64, b: 200 };
        fb.set_pixel(0, 0, original);
        let got = fb.get_pixel(0, 0);

        // 5/6/5 bits of precision: error bounded by one quantization step per channel.
        assert!((i16::from(got.r) - i16::from(original.r)).abs() <= 8);
        assert!((i16::from(got.g) - i16::from(original.g)).abs() <= 4);
        assert!((i16::from(got.b) - i16::from(original.b)).abs() <= 8);
    }

    #[test]
    fn set_endian_twice_is_identity() {
        let mut fb = Framebuffer::create(2, 2, 2).unwrap();
        fb.set_pixel(0, 0, Color { r: 255, g: 0, b: 0 });
        fb.set_pixel(1, 1, Color { r: 0, g: 255, b: 255 });
        let before = fb.raw_bytes().to_vec();

        fb.set_endian(true);
        fb.set_endian(false);
        assert_eq!(fb.raw_bytes(), &before[..]);
    }

    #[test]
    fn convert_round_trips_within_one_step() {
        let mut src = Framebuffer::create(2, 2, 4).unwrap();
        src.set_pixel(0, 0, Color { r: 10, g: 20, b: 30 });
        src.set_pixel(1, 0, Color { r: 200, g: 100, b: 50 });

        let mut mid = Framebuffer::create(2, 2, 2).unwrap();
        mid.convert(&src).unwrap();

        let mut back = Framebuffer::create(2, 2, 4).unwrap();
        back.convert(&mid).unwrap();

        let original = src.get_pixel(1, 0);
        let roundtripped = back.get_pixel(1, 0);
        assert!((i16::from(original.r) - i16::from(roundtripped.r)).abs() <= 8);
    }

    #[test]
    fn resize_preserves_overlap_and_zero_fills_new_area() {
        let mut fb = Framebuffer::create(2, 2, 4).unwrap();
        fb.set_pixel(0, 0, Color { r: 1, g: 2, b: 3 });
        fb.resize(4, 4).unwrap();

        assert_eq!(fb.get_pixel(0, 0), Color { r: 1, g: 2, b: 3 });
        assert_eq!(fb.get_pixel(3, 3), Color::default());
    }

    #[test]
    fn resize_rejects_borrowed_storage() {
        let data: &'static mut [u8] = Box::leak(vec![0u8; 16].into_boxed_slice());
        let mut fb =
            Framebuffer::create_with_data(data, 2, 2, &PixelFormat::rgb888()).unwrap();
        assert!(fb.resize(4, 4).is_err());
    }

    #[test]
    fn create_with_data_rejects_undersized_buffer() {
        let data: &'static mut [u8] = Box::leak(vec![0u8; 4].into_boxed_slice());
        let err = Framebuffer::create_with_data(data, 4, 4, &PixelFormat::rgb888()).unwrap_err();
        assert!(matches!(err, RfbError::Resource(_)));
    }

    #[test]
    fn region_bytes_extracts_requested_sub_rectangle() {
        let mut fb = Framebuffer::create(2, 2, 4).unwrap();
        fb.set_pixel(1, 1, Color { r: 9, g: 9, b: 9 });
        let region = fb.region_bytes(1, 1, 1, 1);
        assert_eq!(region.len(), 4);
        assert_eq!(region, vec![9, 9, 9, 0]);
    }

    #[test]
    fn bgr233_masks_match_canonical_table() {
        let fb = Framebuffer::create(1, 1, 1).unwrap();
        assert_eq!(fb.rmask, 0x07);
        assert_eq!(fb.gmask, 0x07);
        assert_eq!(fb.bmask, 0x03);
        assert_eq!(fb.rshift, 0);
        assert_eq!(fb.gshift, 3);
        assert_eq!(fb.bshift, 6);
    }
}
