//! Big-endian cursor and writer helpers shared by the decoder and encoder.

use crate::error::{ClassFileError, Result};

/// Forward-only reader over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ClassFileError::Truncated {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }

    pub fn u1(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn i1(&mut self) -> Result<i8> {
        Ok(self.u1()? as i8)
    }

    pub fn u2(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i2(&mut self) -> Result<i16> {
        Ok(self.u2()? as i16)
    }

    pub fn u4(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i4(&mut self) -> Result<i32> {
        Ok(self.u4()? as i32)
    }

    pub fn u8(&mut self) -> Result<u64> {
        let hi = self.u4()? as u64;
        let lo = self.u4()? as u64;
        Ok((hi << 32) | lo)
    }
}

pub fn put_u1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn put_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_i4(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Narrow a table length to a `u2` count field.
pub fn u2_len(len: usize, what: &'static str) -> Result<u16> {
    u16::try_from(len).map_err(|_| ClassFileError::TooLarge { what, size: len })
}

/// Narrow a byte length to a `u4` length field.
pub fn u4_len(len: usize, what: &'static str) -> Result<u32> {
    u32::try_from(len).map_err(|_| ClassFileError::TooLarge { what, size: len })
}
