//! Random-access little-endian reader over the decompressed image.
//!
//! Every multi-byte integer in the format is little-endian; floats are
//! IEEE-754 little-endian.  Underflow is fatal ([`SaveError::ShortRead`])
//! because every read in the format is driven by a declared size — running
//! out of bytes always means corruption.
//!
//! ASCII reads are lossy: magic bytes are compared as strings, and a
//! position that does not hold a magic must still yield *some* string so
//! the dispatcher can conclude "no magic here" instead of failing.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::SeekFrom;

use crate::error::{Result, SaveError};

pub struct Cursor<'a> {
    data: &'a [u8],
    pos:  usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn tell(&self) -> u64 {
        self.pos as u64
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Advance by `n` and return the raw slice.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(SaveError::ShortRead {
                offset:    self.tell(),
                wanted:    n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Little-endian unsigned integer of width 1, 2, 4, or 8.
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        let mut slice = self.read_bytes(width)?;
        // Width is validated by read_bytes; byteorder handles 1..=8.
        Ok(slice.read_uint::<LittleEndian>(width)?)
    }

    /// Little-endian signed integer of width 1, 2, 4, or 8 (sign-extended).
    pub fn read_int(&mut self, width: usize) -> Result<i64> {
        let mut slice = self.read_bytes(width)?;
        Ok(slice.read_int::<LittleEndian>(width)?)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_bytes(1)?[0] as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_int(2)? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_uint(4)? as u32)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_int(4)? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(self.read_uint(8)?)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_int(8)?)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_uint(4)? as u32))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_uint(8)?))
    }

    /// Advance by `n` and decode lossily — non-ASCII bytes become U+FFFD
    /// so magic comparisons simply fail to match.
    pub fn read_ascii(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Like [`read_ascii`](Self::read_ascii), but the position is unchanged.
    ///
    /// Never fails: near the end of the buffer fewer than `n` bytes are
    /// decoded, which cannot match any `n`-byte magic.
    pub fn peek_ascii(&self, n: usize) -> String {
        let end = (self.pos + n).min(self.data.len());
        String::from_utf8_lossy(&self.data[self.pos..end]).into_owned()
    }

    /// Peek a single byte without advancing.
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Absolute/relative/end-relative seek.  The target must land inside
    /// `0..=len`; anything else is reported as a short read at the current
    /// position.
    pub fn seek(&mut self, from: SeekFrom) -> Result<u64> {
        let base = match from {
            SeekFrom::Start(o)   => Some(o as i128),
            SeekFrom::Current(d) => (self.pos as i128).checked_add(d as i128),
            SeekFrom::End(d)     => (self.data.len() as i128).checked_add(d as i128),
        };
        match base {
            Some(target) if target >= 0 && target <= self.data.len() as i128 => {
                self.pos = target as usize;
                Ok(self.tell())
            }
            _ => Err(SaveError::ShortRead {
                offset:    self.tell(),
                wanted:    0,
                available: self.remaining(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reads_little_endian_widths() {
        let data = [0x2A, 0x00, 0xFF, 0xFF, 0x01, 0x02, 0x03, 0x04];
        let mut cur = Cursor::new(&data);
        assert_eq!(cur.read_u8().unwrap(), 0x2A);
        assert_eq!(cur.read_u8().unwrap(), 0x00);
        assert_eq!(cur.read_i16().unwrap(), -1);
        assert_eq!(cur.read_u32().unwrap(), 0x0403_0201);
        assert_eq!(cur.tell(), 8);
    }

    #[test]
    fn read_int_sign_extends() {
        let data = [0xFF, 0xFF, 0x80];
        let mut cur = Cursor::new(&data);
        assert_eq!(cur.read_int(2).unwrap(), -1);
        assert_eq!(cur.read_int(1).unwrap(), -128);
    }

    #[test]
    fn underflow_is_fatal() {
        let mut cur = Cursor::new(&[1, 2, 3]);
        cur.read_bytes(2).unwrap();
        let err = cur.read_u32().unwrap_err();
        match err {
            SaveError::ShortRead { offset, wanted, available } => {
                assert_eq!(offset, 2);
                assert_eq!(wanted, 4);
                assert_eq!(available, 1);
            }
            other => panic!("expected ShortRead, got {other:?}"),
        }
    }

    #[test]
    fn peek_does_not_advance() {
        let mut cur = Cursor::new(b"BLCKrest");
        assert_eq!(cur.peek_ascii(4), "BLCK");
        assert_eq!(cur.tell(), 0);
        assert_eq!(cur.read_ascii(4).unwrap(), "BLCK");
        assert_eq!(cur.tell(), 4);
    }

    #[test]
    fn peek_past_end_is_best_effort() {
        let cur = Cursor::new(b"VL");
        assert_eq!(cur.peek_ascii(4), "VL");
    }

    #[test]
    fn peek_non_ascii_is_lossy() {
        let cur = Cursor::new(&[0xFF, 0xFE, 0x41, 0x42]);
        // Must not fail; must not equal any real magic.
        let s = cur.peek_ascii(4);
        assert_ne!(s, "BLCK");
    }

    #[test]
    fn seek_start_current_end() {
        let mut cur = Cursor::new(&[0u8; 16]);
        assert_eq!(cur.seek(SeekFrom::Start(10)).unwrap(), 10);
        assert_eq!(cur.seek(SeekFrom::Current(-4)).unwrap(), 6);
        assert_eq!(cur.seek(SeekFrom::End(-6)).unwrap(), 10);
        assert!(cur.seek(SeekFrom::Current(7)).is_err());
        assert!(cur.seek(SeekFrom::End(1)).is_err());
        // Failed seeks leave the position unchanged.
        assert_eq!(cur.tell(), 10);
    }

    proptest! {
        #[test]
        fn uint_matches_le_reference(bytes in proptest::collection::vec(any::<u8>(), 8), width in 1usize..=8) {
            let mut cur = Cursor::new(&bytes);
            let got = cur.read_uint(width).unwrap();
            let mut expect = [0u8; 8];
            expect[..width].copy_from_slice(&bytes[..width]);
            prop_assert_eq!(got, u64::from_le_bytes(expect));
            prop_assert_eq!(cur.tell(), width as u64);
        }

        #[test]
        fn int_matches_sign_extension(bytes in proptest::collection::vec(any::<u8>(), 8), width in 1usize..=8) {
            let mut cur = Cursor::new(&bytes);
            let got = cur.read_int(width).unwrap();
            let mut expect = [0u8; 8];
            expect[..width].copy_from_slice(&bytes[..width]);
            let shift = 64 - width as u32 * 8;
            let reference = (u64::from_le_bytes(expect) as i64) << shift >> shift;
            prop_assert_eq!(got, reference);
        }
    }
}
