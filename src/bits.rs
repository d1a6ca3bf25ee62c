//! MSB-first bit cursor over a borrowed data section.

use crate::codec::BufrError;

/// Forward-only (but seekable) cursor returning unsigned integers of 1–32 bits.
///
/// Reading past the end of the buffer is always an error; the cursor never
/// zero-fills.
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    data: &'a [u8],
    bit_pos: u64,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitCursor { data, bit_pos: 0 }
    }

    /// Cursor positioned at an absolute bit offset.
    pub fn at(data: &'a [u8], bit_pos: u64) -> Self {
        BitCursor { data, bit_pos }
    }

    pub fn bits_consumed(&self) -> u64 {
        self.bit_pos
    }

    pub fn total_bits(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    pub fn remaining_bits(&self) -> u64 {
        self.total_bits().saturating_sub(self.bit_pos)
    }

    pub fn seek(&mut self, bit_pos: u64) -> Result<(), BufrError> {
        if bit_pos > self.total_bits() {
            return Err(BufrError::OutOfBits {
                needed: bit_pos.saturating_sub(self.bit_pos),
                remaining: self.remaining_bits(),
                position: self.bit_pos,
            });
        }
        self.bit_pos = bit_pos;
        Ok(())
    }

    fn ensure(&self, nbits: u64) -> Result<(), BufrError> {
        if nbits > self.remaining_bits() {
            return Err(BufrError::OutOfBits {
                needed: nbits,
                remaining: self.remaining_bits(),
                position: self.bit_pos,
            });
        }
        Ok(())
    }

    /// Advance without materializing a value.
    pub fn skip(&mut self, nbits: u64) -> Result<(), BufrError> {
        self.ensure(nbits)?;
        self.bit_pos += nbits;
        Ok(())
    }

    pub fn read_unsigned(&mut self, nbits: u32) -> Result<u32, BufrError> {
        if nbits == 0 {
            return Ok(0);
        }
        if nbits > 32 {
            return Err(BufrError::WidthTooLarge(nbits));
        }
        self.ensure(nbits as u64)?;

        let mut out: u64 = 0;
        let mut left = nbits;
        while left > 0 {
            let byte_idx = (self.bit_pos / 8) as usize;
            let bit_in_byte = (self.bit_pos % 8) as u32;
            let avail = 8 - bit_in_byte;
            let take = avail.min(left);
            let byte = self.data[byte_idx] as u64;
            let chunk = (byte >> (avail - take)) & ((1u64 << take) - 1);
            out = (out << take) | chunk;
            left -= take;
            self.bit_pos += take as u64;
        }
        Ok(out as u32)
    }

    /// Up to 64 bits, for fields widened by operators.
    pub fn read_u64(&mut self, nbits: u32) -> Result<u64, BufrError> {
        if nbits > 64 {
            return Err(BufrError::WidthTooLarge(nbits));
        }
        self.ensure(nbits as u64)?;
        if nbits <= 32 {
            return Ok(self.read_unsigned(nbits)? as u64);
        }
        let hi = self.read_unsigned(nbits - 32)? as u64;
        let lo = self.read_unsigned(32)? as u64;
        Ok((hi << 32) | lo)
    }

    /// Read `n` whole bytes starting at the current (possibly unaligned) bit position.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, BufrError> {
        self.ensure(n as u64 * 8)?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read_unsigned(8)? as u8);
        }
        Ok(out)
    }
}
