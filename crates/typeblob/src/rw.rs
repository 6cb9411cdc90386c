// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Byte-order aware body reader and writer.
//!
//! Packing is offset-driven rather than streaming: struct regions are
//! allocated up front and members are poked at their descriptor offsets,
//! so padding bytes stay zero and packed output is byte-deterministic.

use crate::error::{Error, Result};
use crate::layout::{align_up, ByteOrder};

/// Growable zero-filled body buffer with random-access writes.
pub(crate) struct BodyWriter {
    buf: Vec<u8>,
    order: ByteOrder,
}

impl BodyWriter {
    pub fn new(order: ByteOrder) -> Self {
        BodyWriter { buf: Vec::new(), order }
    }

    /// Allocate an aligned zero-filled region at the end of the body and
    /// return its offset.
    pub fn alloc(&mut self, size: u32, align: u32) -> u32 {
        let at = align_up(self.buf.len() as u32, align);
        self.buf.resize(at as usize + size as usize, 0);
        at
    }

    /// Write the low `size` bytes of `v` at `at` in the body's byte order.
    pub fn put_uint(&mut self, at: usize, v: u64, size: u32) {
        slice_put_uint(&mut self.buf, at, v, size, self.order);
    }

    /// Read back a previously written field, used for bitfield merges.
    pub fn get_uint(&self, at: usize, size: u32) -> u64 {
        read_uint(&self.buf[at..at + size as usize], self.order)
    }

    pub fn put_bytes(&mut self, at: usize, bytes: &[u8]) {
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Read `size` bytes at `at` of `buf` as an unsigned value (caller has
/// checked bounds).
pub(crate) fn slice_uint(buf: &[u8], at: usize, size: u32, order: ByteOrder) -> u64 {
    read_uint(&buf[at..at + size as usize], order)
}

/// Write the low `size` bytes of `v` at `at` of `buf`.
pub(crate) fn slice_put_uint(buf: &mut [u8], at: usize, v: u64, size: u32, order: ByteOrder) {
    let size = size as usize;
    let raw = match order {
        ByteOrder::Little => v.to_le_bytes(),
        ByteOrder::Big => v.to_be_bytes(),
    };
    let src = match order {
        ByteOrder::Little => &raw[..size],
        ByteOrder::Big => &raw[8 - size..],
    };
    buf[at..at + size].copy_from_slice(src);
}

fn read_uint(bytes: &[u8], order: ByteOrder) -> u64 {
    let mut raw = [0u8; 8];
    match order {
        ByteOrder::Little => raw[..bytes.len()].copy_from_slice(bytes),
        ByteOrder::Big => raw[8 - bytes.len()..].copy_from_slice(bytes),
    }
    match order {
        ByteOrder::Little => u64::from_le_bytes(raw),
        ByteOrder::Big => u64::from_be_bytes(raw),
    }
}

/// Bounds-checked random-access reader over a packed body.
#[derive(Clone, Copy)]
pub(crate) struct BodyReader<'a> {
    buf: &'a [u8],
    order: ByteOrder,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8], order: ByteOrder) -> Self {
        BodyReader { buf, order }
    }

    fn slice(&self, at: u64, size: u32) -> Result<&'a [u8]> {
        let end = at
            .checked_add(size as u64)
            .filter(|end| *end <= self.buf.len() as u64)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "offset {}+{} outside body of {} bytes",
                    at,
                    size,
                    self.buf.len()
                ))
            })?;
        Ok(&self.buf[at as usize..end as usize])
    }

    /// Read `size` bytes at `at` as an unsigned value.
    pub fn uint(&self, at: u64, size: u32) -> Result<u64> {
        Ok(read_uint(self.slice(at, size)?, self.order))
    }

    /// Read `size` bytes at `at` as a sign-extended value.
    pub fn int(&self, at: u64, size: u32) -> Result<i64> {
        let v = self.uint(at, size)?;
        let shift = 64 - size * 8;
        Ok(((v << shift) as i64) >> shift)
    }

    pub fn f32(&self, at: u64) -> Result<f32> {
        Ok(f32::from_bits(self.uint(at, 4)? as u32))
    }

    pub fn f64(&self, at: u64) -> Result<f64> {
        Ok(f64::from_bits(self.uint(at, 8)?))
    }

    /// Read a NUL-terminated UTF-8 string starting at `at`.
    pub fn cstr(&self, at: u64) -> Result<&'a str> {
        let start = usize::try_from(at)
            .ok()
            .filter(|s| *s < self.buf.len())
            .ok_or_else(|| Error::Internal(format!("string offset {} outside body", at)))?;
        let rest = &self.buf[start..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::Internal(format!("unterminated string at offset {}", at)))?;
        std::str::from_utf8(&rest[..nul])
            .map_err(|e| Error::Internal(format!("non-UTF-8 string at offset {}: {}", at, e)))
    }
}
