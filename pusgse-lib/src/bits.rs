//! Big-endian, MSB-first bit field access.
//!
//! Every header in this crate is decoded through these accessors rather than by
//! overlaying structs onto byte buffers, so all reads are bounds checked.
use crate::prelude::*;

fn check_range(len: usize, bit_offset: usize, bit_width: usize) -> Result<()> {
    let available = len * 8;
    if bit_width > 64 || bit_offset + bit_width > available {
        return Err(Error::Range {
            offset: bit_offset,
            width: bit_width,
            available,
        });
    }
    Ok(())
}

/// Read `bit_width` bits starting at `bit_offset` (counted from the MSB of the first byte).
///
/// # Errors
/// [Error::Range] if the field reaches past the end of `buf` or is wider than 64 bits.
pub fn read_bits(buf: &[u8], bit_offset: usize, bit_width: usize) -> Result<u64> {
    check_range(buf.len(), bit_offset, bit_width)?;
    let end = bit_offset + bit_width;
    let mut pos = bit_offset;
    let mut value: u64 = 0;
    while pos < end {
        let avail = 8 - pos % 8;
        let take = avail.min(end - pos);
        let shift = avail - take;
        let mask = ((1u16 << take) - 1) as u8;
        let bits = (buf[pos / 8] >> shift) & mask;
        value = (value << take) | u64::from(bits);
        pos += take;
    }
    Ok(value)
}

/// Write the low `bit_width` bits of `value` at `bit_offset`, leaving all other bits intact.
///
/// # Errors
/// [Error::Range] if the field reaches past the end of `buf` or is wider than 64 bits.
pub fn write_bits(buf: &mut [u8], bit_offset: usize, bit_width: usize, value: u64) -> Result<()> {
    check_range(buf.len(), bit_offset, bit_width)?;
    let end = bit_offset + bit_width;
    let mut pos = bit_offset;
    while pos < end {
        let avail = 8 - pos % 8;
        let take = avail.min(end - pos);
        let shift = avail - take;
        let after = end - pos - take;
        let mask = ((1u16 << take) - 1) as u8;
        let bits = ((value >> after) as u8) & mask;
        let byte = &mut buf[pos / 8];
        *byte = (*byte & !(mask << shift)) | (bits << shift);
        pos += take;
    }
    Ok(())
}

/// Sequential reader keeping a running bit offset.
///
/// Fields narrower than a byte leave the cursor mid-byte; the next read continues from
/// the residual bit position.
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BitCursor<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Create a cursor positioned at `bit_pos`.
    #[must_use]
    pub fn at(buf: &'a [u8], bit_pos: usize) -> Self {
        Self { buf, pos: bit_pos }
    }

    /// Read an unsigned field of `width` bits.
    ///
    /// # Errors
    /// [Error::Range] if there are not `width` bits remaining. The cursor is not moved.
    pub fn read(&mut self, width: usize) -> Result<u64> {
        let value = read_bits(self.buf, self.pos, width)?;
        self.pos += width;
        Ok(value)
    }

    /// Read a two's-complement signed field of `width` bits.
    ///
    /// # Errors
    /// [Error::Range] if there are not `width` bits remaining.
    pub fn read_signed(&mut self, width: usize) -> Result<i64> {
        let raw = self.read(width)?;
        if width == 0 || width == 64 {
            return Ok(raw as i64);
        }
        let shift = 64 - width;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Read `n` whole octets, which need not be byte aligned.
    ///
    /// # Errors
    /// [Error::Range] if there are not enough bits remaining.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if n * 8 > self.remaining_bits() {
            return Err(self.range_err(n * 8));
        }
        if self.is_aligned() {
            let start = self.pos / 8;
            self.pos += n * 8;
            return Ok(self.buf[start..start + n].to_vec());
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read(8)? as u8);
        }
        Ok(out)
    }

    /// Advance by `bits` without reading.
    ///
    /// # Errors
    /// [Error::Range] if that moves past the end of the buffer.
    pub fn skip(&mut self, bits: usize) -> Result<()> {
        if self.pos + bits > self.buf.len() * 8 {
            return Err(self.range_err(bits));
        }
        self.pos += bits;
        Ok(())
    }

    /// Move forward to the next byte boundary, if not already on one.
    pub fn align(&mut self) {
        self.pos = self.pos.div_ceil(8) * 8;
    }

    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    #[must_use]
    pub fn bit_position(&self) -> usize {
        self.pos
    }

    /// Number of whole or partially consumed bytes.
    #[must_use]
    pub fn byte_position(&self) -> usize {
        self.pos.div_ceil(8)
    }

    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        (self.buf.len() * 8).saturating_sub(self.pos)
    }

    fn range_err(&self, width: usize) -> Error {
        Error::Range {
            offset: self.pos,
            width,
            available: self.buf.len() * 8,
        }
    }
}
