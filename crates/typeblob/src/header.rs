// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Packed instance header.
//!
//! Layout (24 bytes, u32 fields in the blob's own byte order):
//!
//! ```text
//! [0..4]   magic
//! [4..8]   format version
//! [8..12]  root type id
//! [12..16] body length in bytes
//! [16]     byte order (1 = little, 2 = big)
//! [17]     pointer width in bytes (4 or 8)
//! [18..24] reserved, zero
//! ```
//!
//! The single-byte order field is read first so the u32 fields can be
//! decoded regardless of who produced the blob.

use crate::error::{Error, Result};
use crate::layout::{ByteOrder, PtrWidth};
use crate::type_id::TypeId;

pub(crate) const MAGIC: u32 = 0x424C_4F54; // "TOLB" on disk, little-endian
pub(crate) const VERSION: u32 = 1;

/// Size of the header preceding every instance body.
pub const HEADER_SIZE: usize = 24;

/// Parsed instance header. Every consumer validates magic, version, byte
/// order and pointer width before interpreting the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceHeader {
    pub root_type: TypeId,
    pub body_len: u32,
    pub order: ByteOrder,
    pub ptr_width: PtrWidth,
}

impl InstanceHeader {
    /// Parse and validate the header at the start of `blob`.
    pub fn read(blob: &[u8]) -> Result<InstanceHeader> {
        if blob.len() < HEADER_SIZE {
            return Err(Error::InvalidHeader(format!(
                "blob of {} bytes is shorter than the header",
                blob.len()
            )));
        }
        let order = ByteOrder::from_byte(blob[16])
            .ok_or_else(|| Error::InvalidHeader(format!("bad byte-order field {:#04x}", blob[16])))?;
        let ptr_width = PtrWidth::from_size(blob[17])
            .ok_or_else(|| Error::InvalidHeader(format!("bad pointer-width field {}", blob[17])))?;

        let u32_at = |at: usize| -> u32 {
            let raw = [blob[at], blob[at + 1], blob[at + 2], blob[at + 3]];
            match order {
                ByteOrder::Little => u32::from_le_bytes(raw),
                ByteOrder::Big => u32::from_be_bytes(raw),
            }
        };

        let magic = u32_at(0);
        if magic != MAGIC {
            return Err(Error::InvalidHeader(format!("bad magic {:#010x}", magic)));
        }
        let version = u32_at(4);
        if version != VERSION {
            return Err(Error::InvalidHeader(format!("unsupported version {}", version)));
        }
        let header = InstanceHeader {
            root_type: TypeId(u32_at(8)),
            body_len: u32_at(12),
            order,
            ptr_width,
        };
        if blob.len() < HEADER_SIZE + header.body_len as usize {
            return Err(Error::InvalidHeader(format!(
                "body truncated: header claims {} bytes, {} available",
                header.body_len,
                blob.len() - HEADER_SIZE
            )));
        }
        Ok(header)
    }

    /// Serialize the header into its 24 bytes.
    pub fn write(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut put = |at: usize, v: u32| {
            let raw = match self.order {
                ByteOrder::Little => v.to_le_bytes(),
                ByteOrder::Big => v.to_be_bytes(),
            };
            out[at..at + 4].copy_from_slice(&raw);
        };
        put(0, MAGIC);
        put(4, VERSION);
        put(8, self.root_type.0);
        put(12, self.body_len);
        out[16] = self.order.to_byte();
        out[17] = self.ptr_width.size() as u8;
        out
    }

    /// Byte slice of the body this header describes.
    pub(crate) fn body_of<'a>(&self, blob: &'a [u8]) -> &'a [u8] {
        &blob[HEADER_SIZE..HEADER_SIZE + self.body_len as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(order: ByteOrder) -> InstanceHeader {
        InstanceHeader {
            root_type: TypeId(0xDEAD_BEEF),
            body_len: 96,
            order,
            ptr_width: PtrWidth::W64,
        }
    }

    #[test]
    fn roundtrip_both_orders() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let h = sample(order);
            let mut blob = h.write().to_vec();
            blob.resize(HEADER_SIZE + 96, 0);
            assert_eq!(InstanceHeader::read(&blob).unwrap(), h);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(InstanceHeader::read(&[0u8; 8]).is_err());

        let mut blob = sample(ByteOrder::Little).write().to_vec();
        blob.resize(HEADER_SIZE + 96, 0);
        blob[0] ^= 0xFF; // magic
        assert!(matches!(InstanceHeader::read(&blob), Err(Error::InvalidHeader(_))));

        let mut blob = sample(ByteOrder::Little).write().to_vec();
        blob.resize(HEADER_SIZE + 96, 0);
        blob[17] = 3; // pointer width
        assert!(InstanceHeader::read(&blob).is_err());
    }

    #[test]
    fn rejects_truncated_body() {
        let blob = sample(ByteOrder::Little).write().to_vec();
        assert!(matches!(InstanceHeader::read(&blob), Err(Error::InvalidHeader(_))));
    }
}
