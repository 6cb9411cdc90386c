// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Live view over a loaded instance.
//!
//! Loading copies the blob body into an owned buffer and patches every
//! reference slot by the buffer's real address, so pointer members hold
//! live addresses exactly as a consumer of the equivalent C layout would
//! see them. [`StructRef`] walks that patched memory through the type
//! descriptors, translating addresses back to buffer indices under the
//! hood; nothing is ever dereferenced raw.
//!
//! Null references keep the width's sentinel value in both offset and
//! address form, so patching stays direction-agnostic.

use crate::descriptor::{AtomKind, MemberDescriptor, StorageKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::layout::{ByteOrder, PtrWidth};
use crate::library::TypeLibrary;
use crate::patch::patch_instance;
use crate::rw::BodyReader;
use crate::type_id::TypeId;
use crate::value::Value;
use std::sync::Arc;

/// An instance loaded into live memory: owned patched bytes plus the
/// descriptors to walk them.
pub struct LoadedInstance<'lib> {
    lib: &'lib TypeLibrary,
    ty: Arc<TypeDescriptor>,
    data: Box<[u8]>,
}

impl<'lib> LoadedInstance<'lib> {
    pub(crate) fn from_body(
        lib: &'lib TypeLibrary,
        ty: &Arc<TypeDescriptor>,
        body: &[u8],
    ) -> Result<Self> {
        let mut data: Box<[u8]> = body.to_vec().into_boxed_slice();
        let base = data.as_ptr() as u64;
        patch_instance(
            lib,
            ty,
            &mut data,
            PtrWidth::HOST,
            ByteOrder::NATIVE,
            base,
            base as i64,
        )?;
        Ok(LoadedInstance {
            lib,
            ty: ty.clone(),
            data,
        })
    }

    /// Address of the root struct, which every patched reference is
    /// relative to.
    pub fn base_address(&self) -> u64 {
        self.data.as_ptr() as u64
    }

    /// The root struct's type id.
    pub fn root_type(&self) -> TypeId {
        self.ty.id
    }

    /// The patched instance bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Typed accessor over the root struct.
    pub fn root(&self) -> StructRef<'_> {
        StructRef {
            view: self,
            ty: self.ty.as_ref(),
            at: 0,
        }
    }
}

/// A struct inside a [`LoadedInstance`], addressed by buffer index.
#[derive(Clone, Copy)]
pub struct StructRef<'a> {
    view: &'a LoadedInstance<'a>,
    ty: &'a TypeDescriptor,
    at: usize,
}

const W: PtrWidth = PtrWidth::HOST;

impl<'a> StructRef<'a> {
    /// Name of this struct's type.
    pub fn type_name(&self) -> &'a str {
        &self.ty.name
    }

    /// Live address of this struct.
    pub fn address(&self) -> u64 {
        self.view.base_address() + self.at as u64
    }

    /// Read a scalar member (integer, float, string, enum or bitfield).
    pub fn scalar(&self, name: &str) -> Result<Value> {
        let member = self.member(name)?;
        if member.atom != AtomKind::Scalar {
            return Err(self.mismatch("a scalar member", member));
        }
        self.read_scalar(self.slot(member), member.storage)
    }

    /// View an embedded struct member.
    pub fn strukt(&self, name: &str) -> Result<StructRef<'a>> {
        let member = self.member(name)?;
        match (member.atom, member.storage) {
            (AtomKind::Scalar, StorageKind::Struct(id)) => self.at_index(id, self.slot(member)),
            _ => Err(self.mismatch("an embedded struct member", member)),
        }
    }

    /// Live address stored in a pointer member; `None` for a null
    /// reference.
    pub fn ptr_address(&self, name: &str) -> Result<Option<u64>> {
        let member = self.member(name)?;
        if member.atom != AtomKind::Pointer {
            return Err(self.mismatch("a pointer member", member));
        }
        let addr = self.reader().uint(self.slot(member) as u64, W.size())?;
        Ok((addr != W.null_offset()).then_some(addr))
    }

    /// Dereference a pointer member.
    pub fn ptr(&self, name: &str) -> Result<Option<StructRef<'a>>> {
        let member = self.member(name)?;
        let target = match (member.atom, member.storage) {
            (AtomKind::Pointer, StorageKind::Struct(id)) => id,
            _ => return Err(self.mismatch("a pointer member", member)),
        };
        match self.ptr_address(name)? {
            None => Ok(None),
            Some(addr) => Ok(Some(self.at_index(target, self.index_of(addr)?)?)),
        }
    }

    /// Element count of an inline or dynamic array member.
    pub fn len(&self, name: &str) -> Result<usize> {
        let member = self.member(name)?;
        match member.atom {
            AtomKind::InlineArray(count) => Ok(count as usize),
            AtomKind::DynamicArray => {
                let at = self.slot(member) as u64 + W.size() as u64;
                Ok(self.reader().uint(at, 4)? as usize)
            }
            _ => Err(self.mismatch("an array member", member)),
        }
    }

    /// Read one scalar array element.
    pub fn elem(&self, name: &str, index: usize) -> Result<Value> {
        let member = self.member(name)?;
        let at = self.elem_index(member, index)?;
        self.read_scalar(at, member.storage)
    }

    /// View one struct array element.
    pub fn elem_struct(&self, name: &str, index: usize) -> Result<StructRef<'a>> {
        let member = self.member(name)?;
        let id = match member.storage {
            StorageKind::Struct(id) => id,
            _ => return Err(self.mismatch("a struct array member", member)),
        };
        self.at_index(id, self.elem_index(member, index)?)
    }

    fn member(&self, name: &str) -> Result<&'a MemberDescriptor> {
        self.ty
            .member(name)
            .map(|(_, m)| m)
            .ok_or_else(|| Error::MemberNotFound {
                type_name: self.ty.name.clone(),
                member: name.to_string(),
            })
    }

    fn mismatch(&self, expected: &str, member: &MemberDescriptor) -> Error {
        Error::TypeMismatch {
            expected: expected.to_string(),
            found: format!("{}.{}", self.ty.name, member.name),
        }
    }

    fn slot(&self, member: &MemberDescriptor) -> usize {
        self.at + member.offset.get(W) as usize
    }

    fn reader(&self) -> BodyReader<'a> {
        BodyReader::new(&self.view.data, ByteOrder::NATIVE)
    }

    fn at_index(&self, id: TypeId, at: usize) -> Result<StructRef<'a>> {
        Ok(StructRef {
            view: self.view,
            ty: self.view.lib.type_by_id(id)?.as_ref(),
            at,
        })
    }

    fn index_of(&self, addr: u64) -> Result<usize> {
        addr.checked_sub(self.view.base_address())
            .and_then(|i| usize::try_from(i).ok())
            .filter(|i| *i < self.view.data.len())
            .ok_or_else(|| Error::Internal(format!("address {:#x} outside instance", addr)))
    }

    /// Buffer index of array element `index`, for both array atoms.
    fn elem_index(&self, member: &MemberDescriptor, index: usize) -> Result<usize> {
        let (stride, _) = self.view.lib.elem_layout(member.storage, W)?;
        let first = match member.atom {
            AtomKind::InlineArray(count) => {
                if index >= count as usize {
                    return Err(Error::Internal(format!(
                        "index {} out of {} elements",
                        index, count
                    )));
                }
                self.slot(member)
            }
            AtomKind::DynamicArray => {
                let count = self.len(&member.name)?;
                if index >= count {
                    return Err(Error::Internal(format!(
                        "index {} out of {} elements",
                        index, count
                    )));
                }
                let addr = self.reader().uint(self.slot(member) as u64, W.size())?;
                self.index_of(addr)?
            }
            _ => return Err(self.mismatch("an array member", member)),
        };
        Ok(first + index * stride as usize)
    }

    fn read_scalar(&self, at: usize, storage: StorageKind) -> Result<Value> {
        let r = self.reader();
        let at64 = at as u64;
        Ok(match storage {
            StorageKind::I8 => Value::I8(r.int(at64, 1)? as i8),
            StorageKind::I16 => Value::I16(r.int(at64, 2)? as i16),
            StorageKind::I32 => Value::I32(r.int(at64, 4)? as i32),
            StorageKind::I64 => Value::I64(r.int(at64, 8)?),
            StorageKind::U8 => Value::U8(r.uint(at64, 1)? as u8),
            StorageKind::U16 => Value::U16(r.uint(at64, 2)? as u16),
            StorageKind::U32 => Value::U32(r.uint(at64, 4)? as u32),
            StorageKind::U64 => Value::U64(r.uint(at64, 8)?),
            StorageKind::F32 => Value::F32(r.f32(at64)?),
            StorageKind::F64 => Value::F64(r.f64(at64)?),
            StorageKind::Str => {
                let addr = r.uint(at64, W.size())?;
                Value::Str(r.cstr(self.index_of(addr)? as u64)?.to_string())
            }
            StorageKind::Enum(id) => {
                let e = self.view.lib.enum_by_id(id)?;
                let raw = r.uint(at64, 4)? as u32;
                let variant = e.variant_by_value(raw).ok_or_else(|| Error::InvalidEnumValue {
                    enum_name: e.name.clone(),
                    value: raw.to_string(),
                })?;
                Value::Enum(variant.name.clone())
            }
            StorageKind::Bitfield { unit, bits, shift } => {
                let unit_v = r.uint(at64, unit.size())?;
                let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                Value::Bits((unit_v >> shift) & mask)
            }
            StorageKind::Struct(_) => {
                return Err(Error::TypeMismatch {
                    expected: "a scalar value".to_string(),
                    found: "struct".to_string(),
                })
            }
        })
    }
}
