//! Bit-level read/write cursors shared by packet headers, channel bodies,
//! discovery frames and snapshot deltas.
//!
//! Bits are packed LSB-first; multi-byte fields written at a byte boundary
//! therefore come out little-endian.

const MAX_VARINT_BYTES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("read past end of buffer: needed {needed} bits, {available} available")]
    Overrun { needed: usize, available: usize },
    #[error("varint longer than {MAX_VARINT_BYTES} bytes")]
    VarintOverflow,
    #[error("string is not valid utf-8")]
    InvalidUtf8,
}

#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_pos: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(bytes),
            bit_pos: 0,
        }
    }

    /// Writes the low `bits` bits of `value` (at most 64).
    pub fn write_bits(&mut self, value: u64, bits: u32) {
        debug_assert!(bits <= 64);
        let mut value = if bits >= 64 {
            value
        } else {
            value & ((1u64 << bits) - 1)
        };
        let mut remaining = bits;

        while remaining > 0 {
            let byte_index = self.bit_pos / 8;
            let bit_offset = (self.bit_pos % 8) as u32;
            if byte_index == self.buf.len() {
                self.buf.push(0);
            }

            let take = (8 - bit_offset).min(remaining);
            let chunk = (value & ((1u64 << take) - 1)) as u8;
            self.buf[byte_index] |= chunk << bit_offset;

            value >>= take;
            remaining -= take;
            self.bit_pos += take as usize;
        }
    }

    pub fn write_bit(&mut self, value: bool) {
        self.write_bits(value as u64, 1);
    }

    /// 8 bits.
    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u64, 8);
    }

    /// 16 bits.
    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u64, 16);
    }

    /// 16 bits, two's complement.
    pub fn write_i16(&mut self, value: i16) {
        self.write_bits(value as u16 as u64, 16);
    }

    /// 32 bits.
    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value as u64, 32);
    }

    /// 64 bits.
    pub fn write_u64(&mut self, value: u64) {
        self.write_bits(value, 64);
    }

    /// 32 bits, IEEE-754 bit pattern.
    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// LEB128, 1 to 10 bytes.
    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.write_u8(byte);
                break;
            }
            self.write_u8(byte | 0x80);
        }
    }

    /// Zigzag-mapped LEB128.
    pub fn write_signed_varint(&mut self, value: i64) {
        self.write_varint(((value << 1) ^ (value >> 63)) as u64);
    }

    /// Raw bytes with no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.bit_pos % 8 == 0 {
            self.buf.extend_from_slice(bytes);
            self.bit_pos += bytes.len() * 8;
        } else {
            for &byte in bytes {
                self.write_u8(byte);
            }
        }
    }

    /// Varint length followed by the bytes.
    pub fn write_blob(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_blob(value.as_bytes());
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align(&mut self) {
        let rem = self.bit_pos % 8;
        if rem != 0 {
            self.bit_pos += 8 - rem;
        }
    }

    pub fn bits_written(&self) -> usize {
        self.bit_pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    /// Whole bytes left after aligning.
    pub fn remaining_bytes(&self) -> usize {
        self.data.len().saturating_sub(self.bit_pos.div_ceil(8))
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() < 8 && self.bit_pos.div_ceil(8) >= self.data.len()
    }

    pub fn read_bits(&mut self, bits: u32) -> Result<u64, CursorError> {
        debug_assert!(bits <= 64);
        let available = self.remaining_bits();
        if bits as usize > available {
            return Err(CursorError::Overrun {
                needed: bits as usize,
                available,
            });
        }

        let mut value = 0u64;
        let mut shift = 0u32;
        let mut remaining = bits;

        while remaining > 0 {
            let byte = self.data[self.bit_pos / 8];
            let bit_offset = (self.bit_pos % 8) as u32;
            let take = (8 - bit_offset).min(remaining);
            let chunk = ((byte >> bit_offset) as u64) & ((1u64 << take) - 1);

            value |= chunk << shift;
            shift += take;
            remaining -= take;
            self.bit_pos += take as usize;
        }

        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<bool, CursorError> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, CursorError> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_i16(&mut self) -> Result<i16, CursorError> {
        Ok(self.read_bits(16)? as u16 as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32, CursorError> {
        Ok(self.read_bits(32)? as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64, CursorError> {
        self.read_bits(64)
    }

    pub fn read_f32(&mut self) -> Result<f32, CursorError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_varint(&mut self) -> Result<u64, CursorError> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            value |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CursorError::VarintOverflow)
    }

    pub fn read_signed_varint(&mut self) -> Result<i64, CursorError> {
        let raw = self.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CursorError> {
        let available = self.remaining_bits();
        if len.checked_mul(8).is_none_or(|needed| needed > available) {
            return Err(CursorError::Overrun {
                needed: len.saturating_mul(8),
                available,
            });
        }

        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            self.bit_pos += len * 8;
            Ok(self.data[start..start + len].to_vec())
        } else {
            (0..len).map(|_| self.read_u8()).collect()
        }
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, CursorError> {
        let len = self.read_varint()? as usize;
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> Result<String, CursorError> {
        String::from_utf8(self.read_blob()?).map_err(|_| CursorError::InvalidUtf8)
    }

    /// Everything from the next byte boundary to the end of the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        self.align();
        let start = (self.bit_pos / 8).min(self.data.len());
        self.bit_pos = self.data.len() * 8;
        &self.data[start..]
    }

    pub fn align(&mut self) {
        let rem = self.bit_pos % 8;
        if rem != 0 {
            self.bit_pos = (self.bit_pos + 8 - rem).min(self.data.len() * 8);
        }
    }
}
