// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instance unpacking: relocatable body bytes back to a native value graph.
//!
//! The reader never trusts a stored offset; every access goes through the
//! bounds-checked [`BodyReader`]. A pointer target becomes one arena
//! object no matter how many slots reference it: the first visit reserves
//! its [`ObjId`] before descending, so reference cycles terminate.

use crate::descriptor::{AtomKind, MemberDescriptor, StorageKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::layout::{ByteOrder, PtrWidth};
use crate::library::TypeLibrary;
use crate::rw::BodyReader;
use crate::value::{Instance, ObjId, Value};
use std::collections::HashMap;

/// Rebuild the value graph of a packed body in the given layout.
pub(crate) fn unpack_body(
    lib: &TypeLibrary,
    ty: &TypeDescriptor,
    body: &[u8],
    order: ByteOrder,
    width: PtrWidth,
) -> Result<Instance> {
    let mut u = Unpacker {
        lib,
        r: BodyReader::new(body, order),
        width,
        objects: Vec::new(),
        by_offset: HashMap::new(),
    };
    let root = u.read_struct(0, ty)?;
    let mut instance = Instance::new(root);
    for object in u.objects {
        let value = object.ok_or_else(|| Error::Internal("unfinished pointer target".into()))?;
        instance.add_object(value);
    }
    Ok(instance)
}

struct Unpacker<'a> {
    lib: &'a TypeLibrary,
    r: BodyReader<'a>,
    width: PtrWidth,
    /// Arena under construction; `None` marks a target currently being
    /// read further up the stack.
    objects: Vec<Option<Value>>,
    by_offset: HashMap<u64, ObjId>,
}

impl Unpacker<'_> {
    fn read_struct(&mut self, at: u64, ty: &TypeDescriptor) -> Result<Value> {
        let mut members = Vec::with_capacity(ty.members.len());
        for member in &ty.members {
            members.push(self.read_member(at, member)?);
        }
        Ok(Value::Struct(members))
    }

    fn read_member(&mut self, at: u64, member: &MemberDescriptor) -> Result<Value> {
        let slot = at + member.offset.get(self.width) as u64;
        match member.atom {
            AtomKind::Scalar => self.read_scalar(slot, member.storage),
            AtomKind::InlineArray(count) => {
                let (stride, _) = self.lib.elem_layout(member.storage, self.width)?;
                let mut elems = Vec::with_capacity(count as usize);
                for i in 0..count as u64 {
                    elems.push(self.read_scalar(slot + i * stride as u64, member.storage)?);
                }
                Ok(Value::Array(elems))
            }
            AtomKind::DynamicArray => {
                let count = self.r.uint(slot + self.width.size() as u64, 4)?;
                // A zero count never dereferences the offset slot.
                if count == 0 {
                    return Ok(Value::Array(Vec::new()));
                }
                let off = self.r.uint(slot, self.width.size())?;
                let (stride, _) = self.lib.elem_layout(member.storage, self.width)?;
                let mut elems = Vec::with_capacity(count as usize);
                for i in 0..count {
                    elems.push(self.read_scalar(off + i * stride as u64, member.storage)?);
                }
                Ok(Value::Array(elems))
            }
            AtomKind::Pointer => {
                let target = match member.storage {
                    StorageKind::Struct(id) => id,
                    other => {
                        return Err(Error::Internal(format!(
                            "pointer member {} with {} storage",
                            member.name,
                            other.name()
                        )))
                    }
                };
                let off = self.r.uint(slot, self.width.size())?;
                if off == self.width.null_offset() {
                    return Ok(Value::Ptr(None));
                }
                if let Some(id) = self.by_offset.get(&off) {
                    return Ok(Value::Ptr(Some(*id)));
                }
                let id = self.objects.len();
                self.objects.push(None);
                self.by_offset.insert(off, id);
                let ty = self.lib.type_by_id(target)?.clone();
                let value = self.read_struct(off, &ty)?;
                self.objects[id] = Some(value);
                Ok(Value::Ptr(Some(id)))
            }
        }
    }

    fn read_scalar(&mut self, at: u64, storage: StorageKind) -> Result<Value> {
        Ok(match storage {
            StorageKind::I8 => Value::I8(self.r.int(at, 1)? as i8),
            StorageKind::I16 => Value::I16(self.r.int(at, 2)? as i16),
            StorageKind::I32 => Value::I32(self.r.int(at, 4)? as i32),
            StorageKind::I64 => Value::I64(self.r.int(at, 8)?),
            StorageKind::U8 => Value::U8(self.r.uint(at, 1)? as u8),
            StorageKind::U16 => Value::U16(self.r.uint(at, 2)? as u16),
            StorageKind::U32 => Value::U32(self.r.uint(at, 4)? as u32),
            StorageKind::U64 => Value::U64(self.r.uint(at, 8)?),
            StorageKind::F32 => Value::F32(self.r.f32(at)?),
            StorageKind::F64 => Value::F64(self.r.f64(at)?),
            StorageKind::Str => {
                let off = self.r.uint(at, self.width.size())?;
                Value::Str(self.r.cstr(off)?.to_string())
            }
            StorageKind::Struct(id) => {
                let ty = self.lib.type_by_id(id)?.clone();
                self.read_struct(at, &ty)?
            }
            StorageKind::Enum(id) => {
                let e = self.lib.enum_by_id(id)?;
                let raw = self.r.uint(at, 4)? as u32;
                let variant = e.variant_by_value(raw).ok_or_else(|| Error::InvalidEnumValue {
                    enum_name: e.name.clone(),
                    value: raw.to_string(),
                })?;
                Value::Enum(variant.name.clone())
            }
            StorageKind::Bitfield { unit, bits, shift } => {
                let unit_v = self.r.uint(at, unit.size())?;
                let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                Value::Bits((unit_v >> shift) & mask)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{EnumBuilder, MemberKind, TypeBuilder, TypeLibraryBuilder};
    use crate::descriptor::UintKind;
    use crate::pack::pack_body;

    fn roundtrip(lib: &TypeLibrary, name: &str, instance: &Instance, width: PtrWidth, order: ByteOrder) -> Instance {
        let ty = lib.type_by_name(name).unwrap();
        let body = pack_body(lib, ty, instance, width, order).unwrap();
        unpack_body(lib, ty, &body, order, width).unwrap()
    }

    #[test]
    fn scalars_and_strings_survive() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(
            TypeBuilder::new("Mixed")
                .member("i", MemberKind::I16)
                .member("f", MemberKind::F64)
                .member("s", MemberKind::Str)
                .array("arr", MemberKind::U32)
                .inline_array("fixed", MemberKind::I8, 3),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let inst = Instance::new(Value::Struct(vec![
            Value::I16(-300),
            Value::F64(3.5),
            Value::Str("hello".into()),
            Value::Array(vec![Value::U32(1), Value::U32(2), Value::U32(3)]),
            Value::Array(vec![Value::I8(-1), Value::I8(0), Value::I8(1)]),
        ]));
        for width in [PtrWidth::W32, PtrWidth::W64] {
            for order in [ByteOrder::Little, ByteOrder::Big] {
                assert_eq!(roundtrip(&lib, "Mixed", &inst, width, order), inst);
            }
        }
    }

    #[test]
    fn empty_array_and_null_pointer_survive() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(TypeBuilder::new("Leaf").member("v", MemberKind::U32)).unwrap();
        b.add_type(
            TypeBuilder::new("H")
                .pointer("p", "Leaf")
                .array("arr", MemberKind::F32),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let inst = Instance::new(Value::Struct(vec![Value::Ptr(None), Value::Array(vec![])]));
        assert_eq!(roundtrip(&lib, "H", &inst, PtrWidth::W64, ByteOrder::Little), inst);
    }

    #[test]
    fn shared_pointer_keeps_identity() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(TypeBuilder::new("Leaf").member("v", MemberKind::U32)).unwrap();
        b.add_type(
            TypeBuilder::new("Two")
                .pointer("a", "Leaf")
                .pointer("b", "Leaf"),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let mut inst = Instance::new(Value::Struct(vec![]));
        let leaf = inst.add_object(Value::Struct(vec![Value::U32(7)]));
        inst.root = Value::Struct(vec![Value::Ptr(Some(leaf)), Value::Ptr(Some(leaf))]);

        let out = roundtrip(&lib, "Two", &inst, PtrWidth::W32, ByteOrder::Little);
        let (a, b2) = match &out.root {
            Value::Struct(ms) => (&ms[0], &ms[1]),
            _ => unreachable!(),
        };
        assert_eq!(a, b2, "both members must reference the same object");
        assert_eq!(out.objects().len(), 1);
    }

    #[test]
    fn cycle_terminates() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(
            TypeBuilder::new("Node")
                .pointer("next", "Node")
                .member("v", MemberKind::U32),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let mut inst = Instance::new(Value::Struct(vec![]));
        let first = inst.add_object(Value::Ptr(None));
        let second = inst.add_object(Value::Struct(vec![Value::Ptr(Some(first)), Value::U32(2)]));
        inst.set_object(first, Value::Struct(vec![Value::Ptr(Some(second)), Value::U32(1)]));
        inst.root = Value::Struct(vec![Value::Ptr(Some(first)), Value::U32(0)]);

        let out = roundtrip(&lib, "Node", &inst, PtrWidth::W64, ByteOrder::Little);
        let first_out = match &out.root {
            Value::Struct(ms) => match ms[0] {
                Value::Ptr(Some(id)) => id,
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        let second_out = match out.object(first_out).unwrap() {
            Value::Struct(ms) => match ms[0] {
                Value::Ptr(Some(id)) => id,
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        // the cycle closes back on the first node
        match out.object(second_out).unwrap() {
            Value::Struct(ms) => assert_eq!(ms[0], Value::Ptr(Some(first_out))),
            _ => unreachable!(),
        }
    }

    #[test]
    fn enums_and_bitfields_survive() {
        let mut b = TypeLibraryBuilder::new();
        b.add_enum(EnumBuilder::new("Mode").variant("OFF").variant("ON")).unwrap();
        b.add_type(
            TypeBuilder::new("Flags")
                .member("mode", MemberKind::Enum("Mode".into()))
                .bitfield("lo", UintKind::U64, 7)
                .bitfield("hi", UintKind::U64, 57),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let inst = Instance::new(Value::Struct(vec![
            Value::Enum("ON".into()),
            Value::Bits(0x55),
            Value::Bits(0x00FF_FFFF_FFFF_FFFF),
        ]));
        assert_eq!(roundtrip(&lib, "Flags", &inst, PtrWidth::W32, ByteOrder::Big), inst);
    }

    #[test]
    fn unknown_enum_value_rejected() {
        let mut b = TypeLibraryBuilder::new();
        b.add_enum(EnumBuilder::new("Mode").variant("OFF")).unwrap();
        b.add_type(TypeBuilder::new("F").member("mode", MemberKind::Enum("Mode".into()))).unwrap();
        let lib = b.build().unwrap();
        let ty = lib.type_by_name("F").unwrap();

        let body = 9u32.to_le_bytes();
        let err = unpack_body(&lib, ty, &body, ByteOrder::Little, PtrWidth::W32).unwrap_err();
        assert!(matches!(err, Error::InvalidEnumValue { .. }));
    }
}
