// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Type and member descriptors.
//!
//! Descriptors are immutable once built and always referenced through the
//! owning [`TypeLibrary`](crate::TypeLibrary). Offsets and sizes are kept
//! per pointer width (see [`PerWidth`]) so converting an instance to the
//! other width is a pure table lookup.

use crate::layout::PerWidth;
use crate::type_id::TypeId;
use crate::value::Value;

/// Whether a member is a plain value, a fixed-count inline array, a
/// variable-length array or a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    Scalar,
    InlineArray(u32),
    DynamicArray,
    Pointer,
}

/// Unsigned storage unit backing a run of bitfield members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UintKind {
    U8,
    U16,
    U32,
    U64,
}

impl UintKind {
    pub const fn size(self) -> u32 {
        match self {
            UintKind::U8 => 1,
            UintKind::U16 => 2,
            UintKind::U32 => 4,
            UintKind::U64 => 8,
        }
    }

    pub const fn bits(self) -> u8 {
        (self.size() * 8) as u8
    }
}

/// Underlying value category of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// NUL-terminated string, referenced by offset.
    Str,
    /// Embedded or referenced struct of the given type.
    Struct(TypeId),
    /// 32-bit enum value of the given enum type.
    Enum(TypeId),
    /// Bit run inside a shared unsigned unit. Consecutive bitfield members
    /// over the same unit share one offset; `shift` counts from the LSB.
    Bitfield { unit: UintKind, bits: u8, shift: u8 },
}

impl StorageKind {
    /// Byte size for storages whose size does not depend on another type
    /// or on the pointer width.
    pub(crate) fn fixed_size(self) -> Option<u32> {
        match self {
            StorageKind::I8 | StorageKind::U8 => Some(1),
            StorageKind::I16 | StorageKind::U16 => Some(2),
            StorageKind::I32 | StorageKind::U32 | StorageKind::F32 | StorageKind::Enum(_) => {
                Some(4)
            }
            StorageKind::I64 | StorageKind::U64 | StorageKind::F64 => Some(8),
            StorageKind::Bitfield { unit, .. } => Some(unit.size()),
            StorageKind::Str | StorageKind::Struct(_) => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            StorageKind::I8 => "int8",
            StorageKind::I16 => "int16",
            StorageKind::I32 => "int32",
            StorageKind::I64 => "int64",
            StorageKind::U8 => "uint8",
            StorageKind::U16 => "uint16",
            StorageKind::U32 => "uint32",
            StorageKind::U64 => "uint64",
            StorageKind::F32 => "float32",
            StorageKind::F64 => "float64",
            StorageKind::Str => "string",
            StorageKind::Struct(_) => "struct",
            StorageKind::Enum(_) => "enum",
            StorageKind::Bitfield { .. } => "bitfield",
        }
    }
}

/// One member of a struct type.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDescriptor {
    pub name: String,
    pub atom: AtomKind,
    pub storage: StorageKind,
    /// Byte offset inside the owning struct, per pointer width.
    pub offset: PerWidth<u32>,
    /// Default used by the text codec when the member is unassigned.
    pub default: Option<Value>,
}

/// A complete struct type description.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: String,
    pub id: TypeId,
    pub size: PerWidth<u32>,
    pub align: PerWidth<u32>,
    /// Members in declaration order; blob layout and text output follow it.
    pub members: Vec<MemberDescriptor>,
}

impl TypeDescriptor {
    /// Look up a member by name.
    pub fn member(&self, name: &str) -> Option<(usize, &MemberDescriptor)> {
        self.members
            .iter()
            .enumerate()
            .find(|(_, m)| m.name == name)
    }
}

/// One named value of an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariant {
    pub name: String,
    pub value: u32,
}

/// An enum type description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    pub name: String,
    pub id: TypeId,
    pub variants: Vec<EnumVariant>,
}

impl EnumDescriptor {
    pub fn variant(&self, name: &str) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn variant_by_value(&self, value: u32) -> Option<&EnumVariant> {
        self.variants.iter().find(|v| v.value == value)
    }
}
