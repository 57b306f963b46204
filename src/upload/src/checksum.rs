// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use base64::Engine;

/// Incrementally computes the CRC32C checksum of an upload.
///
/// The checksum of chunk `i` is the running CRC32C of all the bytes up to,
/// and including, that chunk. Chunks must be fed in order. Feeding a range
/// that was already consumed does not change the checksum, so retrying a
/// chunk produces the same value. Feeding data past a gap is ignored.
#[derive(Clone, Debug, Default)]
pub struct Crc32c {
    checksum: u32,
    offset: u64,
}

impl Crc32c {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `data`, which starts at `offset` in the upload, into the
    /// checksum.
    ///
    /// Returns the encoded checksum up to the end of `data`. Data already
    /// folded is skipped, so feeding the same range twice returns the same
    /// value. Returns `None`, and leaves the checksum unchanged, if `data`
    /// starts past the bytes consumed so far, or ends before them.
    pub fn update(&mut self, offset: u64, data: &bytes::Bytes) -> Option<String> {
        let end = offset + data.len() as u64;
        self.offset = checked_update(self.offset, offset, data, |data| {
            self.checksum = crc32c::crc32c_append(self.checksum, data)
        });
        (self.offset == end).then(|| self.encoded())
    }

    /// The number of bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn finalize(&self) -> u32 {
        self.checksum
    }

    /// The checksum in the format used by the `x-goog-hash` header: big-endian
    /// bytes, encoded with base64.
    pub fn encoded(&self) -> String {
        base64::prelude::BASE64_STANDARD.encode(self.checksum.to_be_bytes())
    }
}

fn checked_update<F>(current: u64, offset: u64, data: &bytes::Bytes, updater: F) -> u64
where
    F: FnOnce(&bytes::Bytes),
{
    let end = offset + data.len() as u64;
    if (offset..end).contains(&current) {
        let data = data.clone().split_off((current - offset) as usize);
        updater(&data);
        end
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    // From RFC 3720 B.4, 32 bytes of zeros.
    const ZEROS_CRC32C: u32 = 0x8a9136aa;

    #[test]
    fn known_value() {
        let mut checksum = Crc32c::new();
        checksum.update(0, &Bytes::from_static(&[0_u8; 32]));
        assert_eq!(checksum.finalize(), ZEROS_CRC32C);
        assert_eq!(checksum.offset(), 32);
        assert_eq!(
            checksum.encoded(),
            base64::prelude::BASE64_STANDARD.encode(ZEROS_CRC32C.to_be_bytes())
        );
    }

    #[test]
    fn incremental_matches_whole() {
        let data = Bytes::from_static(b"the quick brown fox jumps over the lazy dog");
        let mut whole = Crc32c::new();
        let want = whole.update(0, &data);

        let mut incremental = Crc32c::new();
        let first = incremental.update(0, &data.slice(0..10));
        let second = incremental.update(10, &data.slice(10..));
        assert_ne!(first, second);
        assert_eq!(second, want);
    }

    #[test]
    fn repeated_range_is_ignored() {
        let data = Bytes::from_static(b"the quick brown fox jumps over the lazy dog");
        let mut checksum = Crc32c::new();
        let first = checksum.update(0, &data.slice(0..10));
        let again = checksum.update(0, &data.slice(0..10));
        assert_eq!(first, again);
        assert_eq!(checksum.offset(), 10);
    }

    #[test]
    fn overlapping_range_uses_new_bytes() {
        let data = Bytes::from_static(b"the quick brown fox jumps over the lazy dog");
        let mut want = Crc32c::new();
        want.update(0, &data);

        let mut checksum = Crc32c::new();
        checksum.update(0, &data.slice(0..10));
        checksum.update(5, &data.slice(5..));
        assert_eq!(checksum.finalize(), want.finalize());
    }

    #[test]
    fn gap_is_ignored() {
        let data = Bytes::from_static(b"the quick brown fox jumps over the lazy dog");
        let mut checksum = Crc32c::new();
        let first = checksum.update(0, &data.slice(0..10));
        let skipped = checksum.update(20, &data.slice(20..));
        assert!(first.is_some(), "{first:?}");
        assert_eq!(skipped, None);
        assert_eq!(checksum.offset(), 10);
        assert_eq!(Some(checksum.encoded()), first);
    }

    #[test]
    fn earlier_range_has_no_checksum() {
        let data = Bytes::from_static(b"the quick brown fox jumps over the lazy dog");
        let mut checksum = Crc32c::new();
        checksum.update(0, &data.slice(0..10));
        checksum.update(10, &data.slice(10..20));
        assert_eq!(checksum.update(0, &data.slice(0..10)), None);
        assert_eq!(checksum.offset(), 20);
    }

    #[test]
    fn empty_data() {
        let mut checksum = Crc32c::new();
        let empty = checksum.update(0, &Bytes::new());
        assert_eq!(empty, Some(checksum.encoded()));
        assert_eq!(checksum.update(4, &Bytes::new()), None);
    }
}
