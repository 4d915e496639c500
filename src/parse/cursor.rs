//! Bounds-checked little-endian reader shared by all binary parsers.
//!
//! Every read is validated against the slice length; parsers can never
//! seek past EOF, they get a `ParseError::Truncated` instead.

use crate::error::ParseError;

pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), ParseError> {
        if pos > self.data.len() {
            return Err(ParseError::BadOffset {
                offset: pos,
                len: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        self.take(n).map(|_| ())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::Truncated {
                offset: self.pos,
                wanted: n,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, ParseError> {
        Ok(self.take(1)?[0] as i8)
    }

    pub fn u16(&mut self) -> Result<u16, ParseError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Result<i16, ParseError> {
        Ok(self.u16()? as i16)
    }

    pub fn u32(&mut self) -> Result<u32, ParseError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32, ParseError> {
        Ok(self.u32()? as i32)
    }

    pub fn u64(&mut self) -> Result<u64, ParseError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn f32(&mut self) -> Result<f32, ParseError> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn vec3(&mut self) -> Result<glam::Vec3, ParseError> {
        Ok(glam::Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    /// Four-byte chunk tag as stored on disk.
    pub fn tag(&mut self) -> Result<[u8; 4], ParseError> {
        let b = self.take(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }
}

/// Read a `{count, offset}` array header and return the validated byte
/// range, checking that `count * elem_size` fits inside `data`.
pub fn array_range(
    data: &[u8],
    count: u32,
    offset: u32,
    elem_size: usize,
) -> Result<std::ops::Range<usize>, ParseError> {
    let start = offset as usize;
    let bytes = (count as usize)
        .checked_mul(elem_size)
        .ok_or(ParseError::BadCount {
            context: format!("array of {count} x {elem_size} overflows"),
        })?;
    let end = start.checked_add(bytes).ok_or(ParseError::BadOffset {
        offset: start,
        len: data.len(),
    })?;
    if end > data.len() {
        return Err(ParseError::BadOffset {
            offset: end,
            len: data.len(),
        });
    }
    Ok(start..end)
}

/// Split a block of NUL-terminated strings, keeping byte offsets.
pub fn split_string_block(block: &[u8]) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for (i, &b) in block.iter().enumerate() {
        if b == 0 {
            if i > start {
                let s = String::from_utf8_lossy(&block[start..i]).into_owned();
                out.push((start, s));
            }
            start = i + 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_bounds_checked() {
        let mut c = Cursor::new(&[1, 0, 0, 0, 2]);
        assert_eq!(c.u32().unwrap(), 1);
        assert!(matches!(
            c.u32(),
            Err(ParseError::Truncated { offset: 4, wanted: 4 })
        ));
        // The failed read consumed nothing.
        assert_eq!(c.u8().unwrap(), 2);
    }

    #[test]
    fn array_range_rejects_overflow() {
        let data = [0u8; 16];
        assert!(array_range(&data, 2, 0, 8).is_ok());
        assert!(array_range(&data, 3, 0, 8).is_err());
        assert!(array_range(&data, u32::MAX, 0, 8).is_err());
    }

    #[test]
    fn string_block_offsets() {
        let block = b"abc\0\0def\0";
        let strings = split_string_block(block);
        assert_eq!(strings, vec![(0, "abc".to_string()), (5, "def".to_string())]);
    }
}
