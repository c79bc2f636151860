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

//! Raw encoding: pixel data sent exactly as the framebuffer stores it, with no
//! transformation or compression.

use bytes::BytesMut;

use super::Encoding;
use crate::protocol::ENCODING_RAW;

/// The "Raw" encoding (type 0): the rectangle body is the region's native pixel
/// bytes, verbatim.
pub struct RawEncoding;

impl Encoding for RawEncoding {
    fn encode(&self, data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    fn encoding_type(&self) -> i32 {
        ENCODING_RAW
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_encode_is_a_verbatim_copy() {
        let data = [1u8, 2, 3, 4, 5];
        let encoded = RawEncoding.encode(&data);
        assert_eq!(&encoded[..], &data);
    }
}
