//! Fixed-width seat status bitmap.
//!
//! Bit `i` addresses seat offset `i` of a layout snapshot. Bits are stored
//! big-endian within each byte (offset 0 is the most significant bit of byte
//! 0), the same order Redis uses for `SETBIT`/`GETBIT`, so a buffer written by
//! either side reads back identically on the other.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatBitmap {
    len: usize,
    bytes: Vec<u8>,
}

/// Byte index and mask for an offset.
pub fn bit_position(offset: usize) -> (usize, u8) {
    (offset / 8, 0x80 >> (offset % 8))
}

/// Bytes needed to store `bits` seats.
pub fn byte_len(bits: usize) -> usize {
    bits.div_ceil(8)
}

impl SeatBitmap {
    /// An all-available bitmap for `len` seats.
    pub fn with_len(len: usize) -> Self {
        Self {
            len,
            bytes: vec![0; byte_len(len)],
        }
    }

    /// Rebuild a bitmap for `len` seats from stored bytes. Missing trailing
    /// bytes read as zero and bytes past the width are dropped.
    pub fn from_bytes(len: usize, raw: &[u8]) -> Self {
        let mut bytes = vec![0; byte_len(len)];
        let n = raw.len().min(bytes.len());
        bytes[..n].copy_from_slice(&raw[..n]);
        if len % 8 != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= 0xFFu8 << (8 - len % 8);
            }
        }
        Self { len, bytes }
    }

    /// Like [`SeatBitmap::from_bytes`], but `None` unless `raw` is exactly as
    /// wide as `len` seats need.
    pub fn from_stored(len: usize, raw: &[u8]) -> Option<Self> {
        if raw.len() != byte_len(len) {
            return None;
        }
        Some(Self::from_bytes(len, raw))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, offset: usize) -> Option<bool> {
        if offset >= self.len {
            return None;
        }
        let (byte, mask) = bit_position(offset);
        Some(self.bytes[byte] & mask != 0)
    }

    /// Returns false if the offset is outside the bitmap.
    pub fn set(&mut self, offset: usize) -> bool {
        if offset >= self.len {
            return false;
        }
        let (byte, mask) = bit_position(offset);
        self.bytes[byte] |= mask;
        true
    }

    pub fn clear(&mut self, offset: usize) -> bool {
        if offset >= self.len {
            return false;
        }
        let (byte, mask) = bit_position(offset);
        self.bytes[byte] &= !mask;
        true
    }

    pub fn count_set(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
