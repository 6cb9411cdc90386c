// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pointer width, byte order and the per-width value table.
//!
//! Every size and offset in a type descriptor is stored once per pointer
//! width so that re-layout for another width never needs to recompute
//! anything outside descriptor data.

/// Pointer width of a packed instance layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtrWidth {
    W32,
    W64,
}

impl PtrWidth {
    /// Pointer width of the host.
    #[cfg(target_pointer_width = "64")]
    pub const HOST: PtrWidth = PtrWidth::W64;
    #[cfg(target_pointer_width = "32")]
    pub const HOST: PtrWidth = PtrWidth::W32;

    /// Size of a pointer slot in bytes.
    pub const fn size(self) -> u32 {
        match self {
            PtrWidth::W32 => 4,
            PtrWidth::W64 => 8,
        }
    }

    /// Alignment of a pointer slot in bytes.
    pub const fn align(self) -> u32 {
        self.size()
    }

    /// The reserved "null reference" offset for this width.
    ///
    /// Chosen as the maximum representable offset so it can never collide
    /// with a legal offset (offset 0 is the root itself and is legal).
    pub const fn null_offset(self) -> u64 {
        match self {
            PtrWidth::W32 => u32::MAX as u64,
            PtrWidth::W64 => u64::MAX,
        }
    }

    /// Decode the header's width byte.
    pub fn from_size(size: u8) -> Option<PtrWidth> {
        match size {
            4 => Some(PtrWidth::W32),
            8 => Some(PtrWidth::W64),
            _ => None,
        }
    }
}

/// Byte order of a packed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the host.
    #[cfg(target_endian = "little")]
    pub const NATIVE: ByteOrder = ByteOrder::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: ByteOrder = ByteOrder::Big;

    /// The opposite byte order.
    pub const fn swapped(self) -> ByteOrder {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }

    pub(crate) const fn to_byte(self) -> u8 {
        match self {
            ByteOrder::Little => 0x01,
            ByteOrder::Big => 0x02,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<ByteOrder> {
        match b {
            0x01 => Some(ByteOrder::Little),
            0x02 => Some(ByteOrder::Big),
            _ => None,
        }
    }
}

/// One value per supported pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerWidth<T> {
    pub w32: T,
    pub w64: T,
}

impl<T: Copy> PerWidth<T> {
    pub const fn splat(v: T) -> Self {
        PerWidth { w32: v, w64: v }
    }

    pub fn get(&self, width: PtrWidth) -> T {
        match width {
            PtrWidth::W32 => self.w32,
            PtrWidth::W64 => self.w64,
        }
    }

    pub fn set(&mut self, width: PtrWidth, v: T) {
        match width {
            PtrWidth::W32 => self.w32 = v,
            PtrWidth::W64 => self.w64 = v,
        }
    }
}

/// Round `v` up to the next multiple of `align` (power of two).
pub(crate) const fn align_up(v: u32, align: u32) -> u32 {
    (v + align - 1) & !(align - 1)
}
