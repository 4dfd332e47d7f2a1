use std::borrow::BorrowMut;

use colx_error::{ColxError, Result};

use crate::buffer::{AlignedBuffer, MemoryTracker};

/// Check a bit in an LSB ordered bitmap.
///
/// `bytes` must hold at least `idx / 8 + 1` bytes.
pub fn bit_is_set(bytes: &[u8], idx: usize) -> bool {
    bytes[idx / 8] & (1 << (idx % 8)) != 0
}

/// An LSB ordered bitmap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    len: usize,
    data: Vec<u8>,
}

impl Bitmap {
    pub fn from_bool_iter(iter: impl IntoIterator<Item = bool>) -> Self {
        let mut iter = iter.into_iter();

        let mut data = Vec::new();
        let mut len = 0;

        loop {
            let mut byte = 0;
            let mut bit_len = 0;

            for (idx, bit) in iter.borrow_mut().take(8).enumerate() {
                bit_len += 1;
                if bit {
                    byte |= 1 << idx;
                }
            }

            // No more bits, exit loop.
            if bit_len == 0 {
                break;
            }

            // Push byte, continue loop to get next 8 values.
            data.push(byte);
            len += bit_len;
        }

        Bitmap { len, data }
    }

    /// Create a bitmap of `len` bits where every byte is `pattern`.
    pub fn repeated_byte(len: usize, pattern: u8) -> Self {
        let mut data = vec![pattern; len.div_ceil(8)];
        // Keep bits past `len` unset so popcnt stays accurate.
        if len % 8 != 0 {
            if let Some(last) = data.last_mut() {
                *last &= (1u8 << (len % 8)) - 1;
            }
        }
        Bitmap { len, data }
    }

    /// Copy `len` bits out of raw bitmap bytes, starting at bit `offset`.
    pub fn try_from_raw(bytes: &[u8], offset: usize, len: usize) -> Result<Self> {
        let needed = (offset + len).div_ceil(8);
        if bytes.len() < needed {
            return Err(ColxError::new(format!(
                "Bitmap too short, need {needed} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self::from_bool_iter(
            (offset..offset + len).map(|idx| bit_is_set(bytes, idx)),
        ))
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the value at index.
    ///
    /// Panics if index is out of bounds.
    pub fn value(&self, idx: usize) -> bool {
        assert!(idx < self.len);
        bit_is_set(&self.data, idx)
    }

    /// Number of set bits.
    pub fn popcnt(&self) -> usize {
        self.data.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Copy the bitmap into a freshly allocated aligned buffer.
    pub fn try_to_aligned_buffer(
        &self,
        alignment: usize,
        tracker: &MemoryTracker,
    ) -> Result<AlignedBuffer> {
        let mut buf = AlignedBuffer::try_new_zeroed(self.data.len(), alignment, tracker)?;
        buf.as_mut_slice()[..self.data.len()].copy_from_slice(&self.data);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple() {
        let bits = [true, false, true, false, true, true, true, true];
        let bm = Bitmap::from_bool_iter(bits);

        assert_eq!(8, bm.len());

        let got: Vec<_> = (0..bm.len()).map(|idx| bm.value(idx)).collect();
        assert_eq!(bits.as_slice(), got);
    }

    #[test]
    fn not_multiple_of_eight() {
        let bits = [
            true, false, true, false, true, true, true, true, //
            true, false, true, false,
        ];
        let bm = Bitmap::from_bool_iter(bits);

        assert_eq!(12, bm.len());

        let got: Vec<_> = (0..bm.len()).map(|idx| bm.value(idx)).collect();
        assert_eq!(bits.as_slice(), got);
    }

    #[test]
    fn repeated_0xaa_matches_reference() {
        // 0xAA sets every odd bit.
        let bm = Bitmap::repeated_byte(20, 0xAA);
        let reference = Bitmap::from_bool_iter((0..20).map(|idx| idx % 2 == 1));

        assert_eq!(reference, bm);
        for idx in 0..20 {
            assert_eq!(idx % 2 == 1, bit_is_set(&bm.data, idx), "idx: {idx}");
        }
        assert_eq!(10, bm.popcnt());
    }

    #[test]
    fn repeated_trims_trailing_bits() {
        let bm = Bitmap::repeated_byte(10, 0xFF);
        assert_eq!(10, bm.popcnt());
        assert_eq!(vec![0xFF, 0x03], bm.data);
    }

    #[test]
    fn from_raw_with_offset() {
        let bm = Bitmap::try_from_raw(&[0x55, 0x55], 3, 6).unwrap();
        let got: Vec<_> = (0..bm.len()).map(|idx| bm.value(idx)).collect();
        // 0x55 sets every even bit, starting at bit 3 gives odd, even, ...
        assert_eq!(vec![false, true, false, true, false, true], got);

        Bitmap::try_from_raw(&[0x55], 4, 8).unwrap_err();
    }

    #[test]
    fn to_aligned_buffer() {
        let tracker = MemoryTracker::new();
        let bm = Bitmap::repeated_byte(16, 0x55);
        let buf = bm.try_to_aligned_buffer(64, &tracker).unwrap();

        assert_eq!(64, buf.len());
        assert_eq!(&[0x55, 0x55, 0x00], &buf.as_slice()[0..3]);
    }
}
