// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instance packing: native value graph to relocatable body bytes.
//!
//! The root struct is allocated at body offset 0. Strings, dynamic array
//! payloads and pointer targets are deferred onto a FIFO queue and
//! appended in first-reference order, so packing the same graph always
//! produces the same bytes. Pointer slots hold body-relative offsets;
//! the null reference is the width's maximum offset.
//!
//! A pointer target is packed exactly once no matter how many members
//! reference it. Slots referencing an object are recorded as fixups and
//! resolved after the queue drains, which also covers reference cycles.

use crate::descriptor::{AtomKind, MemberDescriptor, StorageKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::layout::{ByteOrder, PtrWidth};
use crate::library::TypeLibrary;
use crate::rw::BodyWriter;
use crate::type_id::TypeId;
use crate::value::{Instance, ObjId, Value};
use std::collections::{HashMap, HashSet, VecDeque};

/// Pack `instance` of type `ty` into body bytes for the given layout.
pub(crate) fn pack_body(
    lib: &TypeLibrary,
    ty: &TypeDescriptor,
    instance: &Instance,
    width: PtrWidth,
    order: ByteOrder,
) -> Result<Vec<u8>> {
    let mut packer = Packer {
        lib,
        instance,
        width,
        w: BodyWriter::new(order),
        queue: VecDeque::new(),
        obj_offsets: HashMap::new(),
        queued: HashSet::new(),
        fixups: Vec::new(),
    };
    let at = packer.w.alloc(ty.size.get(width), ty.align.get(width));
    packer.write_struct(at as usize, ty, as_struct(&instance.root)?)?;
    packer.run()?;
    packer.resolve_fixups()?;
    Ok(packer.w.into_vec())
}

/// Work deferred behind the struct region currently being written.
enum Block<'a> {
    Str { slot: usize, text: &'a str },
    Array { slot: usize, elems: &'a [Value], storage: StorageKind },
    Obj { ty: TypeId, id: ObjId },
}

struct Packer<'a> {
    lib: &'a TypeLibrary,
    instance: &'a Instance,
    width: PtrWidth,
    w: BodyWriter,
    queue: VecDeque<Block<'a>>,
    obj_offsets: HashMap<ObjId, u32>,
    queued: HashSet<ObjId>,
    fixups: Vec<(usize, ObjId)>,
}

impl<'a> Packer<'a> {
    fn run(&mut self) -> Result<()> {
        while let Some(block) = self.queue.pop_front() {
            match block {
                Block::Str { slot, text } => {
                    // Trailing NUL comes from the zero fill.
                    let at = self.w.alloc(text.len() as u32 + 1, 1);
                    self.w.put_bytes(at as usize, text.as_bytes());
                    self.w.put_uint(slot, at as u64, self.width.size());
                }
                Block::Array { slot, elems, storage } => {
                    let (stride, align) = self.lib.elem_layout(storage, self.width)?;
                    let at = self.w.alloc(stride * elems.len() as u32, align);
                    self.w.put_uint(slot, at as u64, self.width.size());
                    for (i, elem) in elems.iter().enumerate() {
                        self.write_scalar(at as usize + i * stride as usize, storage, elem)?;
                    }
                }
                Block::Obj { ty, id } => {
                    let value = self
                        .instance
                        .object(id)
                        .ok_or_else(|| Error::Internal(format!("dangling object id {}", id)))?;
                    let ty = self.lib.type_by_id(ty)?.clone();
                    let at = self.w.alloc(ty.size.get(self.width), ty.align.get(self.width));
                    self.obj_offsets.insert(id, at);
                    self.write_struct(at as usize, &ty, as_struct(value)?)?;
                }
            }
        }
        Ok(())
    }

    fn resolve_fixups(&mut self) -> Result<()> {
        for (slot, id) in std::mem::take(&mut self.fixups) {
            let at = *self
                .obj_offsets
                .get(&id)
                .ok_or_else(|| Error::Internal(format!("unresolved object id {}", id)))?;
            self.w.put_uint(slot, at as u64, self.width.size());
        }
        Ok(())
    }

    fn write_struct(&mut self, at: usize, ty: &TypeDescriptor, members: &'a [Value]) -> Result<()> {
        if members.len() != ty.members.len() {
            return Err(Error::TypeMismatch {
                expected: format!("{} with {} members", ty.name, ty.members.len()),
                found: format!("struct value with {} members", members.len()),
            });
        }
        for (member, value) in ty.members.iter().zip(members) {
            self.write_member(at, member, value)?;
        }
        Ok(())
    }

    fn write_member(&mut self, at: usize, member: &MemberDescriptor, value: &'a Value) -> Result<()> {
        let slot = at + member.offset.get(self.width) as usize;
        match member.atom {
            AtomKind::Scalar => self.write_scalar(slot, member.storage, value),
            AtomKind::InlineArray(count) => {
                let elems = as_array(value)?;
                if elems.len() != count as usize {
                    return Err(Error::TypeMismatch {
                        expected: format!("array of {} elements", count),
                        found: format!("array of {} elements", elems.len()),
                    });
                }
                let (stride, _) = self.lib.elem_layout(member.storage, self.width)?;
                for (i, elem) in elems.iter().enumerate() {
                    self.write_scalar(slot + i * stride as usize, member.storage, elem)?;
                }
                Ok(())
            }
            AtomKind::DynamicArray => {
                let elems = as_array(value)?;
                let count_at = slot + self.width.size() as usize;
                self.w.put_uint(count_at, elems.len() as u64, 4);
                if elems.is_empty() {
                    self.w.put_uint(slot, self.width.null_offset(), self.width.size());
                } else {
                    self.queue.push_back(Block::Array {
                        slot,
                        elems,
                        storage: member.storage,
                    });
                }
                Ok(())
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
                match value {
                    Value::Ptr(None) => {
                        self.w.put_uint(slot, self.width.null_offset(), self.width.size());
                        Ok(())
                    }
                    Value::Ptr(Some(id)) => {
                        self.fixups.push((slot, *id));
                        if self.queued.insert(*id) {
                            self.queue.push_back(Block::Obj { ty: target, id: *id });
                        }
                        Ok(())
                    }
                    other => Err(mismatch("pointer", other)),
                }
            }
        }
    }

    fn write_scalar(&mut self, slot: usize, storage: StorageKind, value: &'a Value) -> Result<()> {
        match (storage, value) {
            (StorageKind::I8, Value::I8(v)) => self.put_int(slot, *v as i64, 1),
            (StorageKind::I16, Value::I16(v)) => self.put_int(slot, *v as i64, 2),
            (StorageKind::I32, Value::I32(v)) => self.put_int(slot, *v as i64, 4),
            (StorageKind::I64, Value::I64(v)) => self.put_int(slot, *v, 8),
            (StorageKind::U8, Value::U8(v)) => self.w.put_uint(slot, *v as u64, 1),
            (StorageKind::U16, Value::U16(v)) => self.w.put_uint(slot, *v as u64, 2),
            (StorageKind::U32, Value::U32(v)) => self.w.put_uint(slot, *v as u64, 4),
            (StorageKind::U64, Value::U64(v)) => self.w.put_uint(slot, *v, 8),
            (StorageKind::F32, Value::F32(v)) => self.w.put_uint(slot, v.to_bits() as u64, 4),
            (StorageKind::F64, Value::F64(v)) => self.w.put_uint(slot, v.to_bits(), 8),
            (StorageKind::Str, Value::Str(text)) => {
                self.queue.push_back(Block::Str { slot, text: text.as_str() });
            }
            (StorageKind::Struct(id), Value::Struct(_)) => {
                let ty = self.lib.type_by_id(id)?.clone();
                self.write_struct(slot, &ty, as_struct(value)?)?;
            }
            (StorageKind::Enum(id), Value::Enum(name)) => {
                let e = self.lib.enum_by_id(id)?;
                let variant = e.variant(name).ok_or_else(|| Error::InvalidEnumValue {
                    enum_name: e.name.clone(),
                    value: name.clone(),
                })?;
                let raw = variant.value;
                self.w.put_uint(slot, raw as u64, 4);
            }
            (StorageKind::Bitfield { unit, bits, shift }, Value::Bits(v)) => {
                if bits < 64 && *v >> bits != 0 {
                    return Err(Error::TypeMismatch {
                        expected: format!("value of at most {} bits", bits),
                        found: format!("bitfield value {}", v),
                    });
                }
                // Units are shared by consecutive members; merge over what
                // is already written.
                let merged = self.w.get_uint(slot, unit.size()) | (*v << shift);
                self.w.put_uint(slot, merged, unit.size());
            }
            (storage, value) => return Err(mismatch(storage.name(), value)),
        }
        Ok(())
    }

    fn put_int(&mut self, slot: usize, v: i64, size: u32) {
        self.w.put_uint(slot, v as u64, size);
    }
}

fn mismatch(expected: &str, found: &Value) -> Error {
    Error::TypeMismatch {
        expected: expected.to_string(),
        found: found.kind_name().to_string(),
    }
}

fn as_struct(value: &Value) -> Result<&[Value]> {
    match value {
        Value::Struct(members) => Ok(members),
        other => Err(mismatch("struct", other)),
    }
}

fn as_array(value: &Value) -> Result<&[Value]> {
    match value {
        Value::Array(elems) => Ok(elems),
        other => Err(mismatch("array", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{MemberKind, TypeBuilder, TypeLibraryBuilder};
    use crate::descriptor::UintKind;

    fn pack32(lib: &TypeLibrary, name: &str, instance: &Instance) -> Vec<u8> {
        let ty = lib.type_by_name(name).unwrap();
        pack_body(lib, ty, instance, PtrWidth::W32, ByteOrder::Little).unwrap()
    }

    #[test]
    fn scalars_land_at_their_offsets() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(
            TypeBuilder::new("P")
                .member("a", MemberKind::U8)
                .member("b", MemberKind::U16)
                .member("c", MemberKind::I32),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let inst = Instance::new(Value::Struct(vec![
            Value::U8(0x11),
            Value::U16(0x2233),
            Value::I32(-2),
        ]));
        let body = pack32(&lib, "P", &inst);
        assert_eq!(body.len(), 8);
        assert_eq!(body[0], 0x11);
        assert_eq!(body[1], 0); // padding stays zero
        assert_eq!(&body[2..4], &[0x33, 0x22]);
        assert_eq!(&body[4..8], &(-2i32).to_le_bytes());
    }

    #[test]
    fn string_appends_after_root() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(
            TypeBuilder::new("S")
                .member("tag", MemberKind::U32)
                .member("name", MemberKind::Str),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let inst = Instance::new(Value::Struct(vec![Value::U32(9), Value::Str("cow".into())]));
        let body = pack32(&lib, "S", &inst);
        // root is 8 bytes, string lands at 8 and the slot points at it
        assert_eq!(&body[4..8], &8u32.to_le_bytes());
        assert_eq!(&body[8..12], b"cow\0");
    }

    #[test]
    fn null_pointer_and_empty_array_use_the_sentinel() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(TypeBuilder::new("Leaf").member("v", MemberKind::U32)).unwrap();
        b.add_type(
            TypeBuilder::new("H")
                .pointer("p", "Leaf")
                .array("arr", MemberKind::U16),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let inst = Instance::new(Value::Struct(vec![Value::Ptr(None), Value::Array(vec![])]));
        let body = pack32(&lib, "H", &inst);
        assert_eq!(&body[0..4], &[0xFF; 4]); // null pointer
        assert_eq!(&body[4..8], &[0xFF; 4]); // empty array offset
        assert_eq!(&body[8..12], &0u32.to_le_bytes()); // count 0
    }

    #[test]
    fn shared_target_packs_once() {
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

        let body = pack32(&lib, "Two", &inst);
        assert_eq!(body.len(), 12); // 8-byte root + one 4-byte leaf
        assert_eq!(&body[0..4], &8u32.to_le_bytes());
        assert_eq!(&body[0..4], &body[4..8]);
        assert_eq!(&body[8..12], &7u32.to_le_bytes());
    }

    #[test]
    fn cycle_resolves_through_fixups() {
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

        let body = pack32(&lib, "Node", &inst);
        assert_eq!(body.len(), 24); // root at 0, first at 8, second at 16
        assert_eq!(&body[0..4], &8u32.to_le_bytes());
        assert_eq!(&body[8..12], &16u32.to_le_bytes());
        assert_eq!(&body[16..20], &8u32.to_le_bytes()); // back edge
        assert_eq!(&body[12..16], &1u32.to_le_bytes());
        assert_eq!(&body[20..24], &2u32.to_le_bytes());
    }

    #[test]
    fn bitfields_merge_into_one_unit() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(
            TypeBuilder::new("B")
                .bitfield("lo", UintKind::U32, 3)
                .bitfield("hi", UintKind::U32, 5),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let inst = Instance::new(Value::Struct(vec![Value::Bits(0b101), Value::Bits(0b10011)]));
        let body = pack32(&lib, "B", &inst);
        let unit = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
        assert_eq!(unit, 0b101 | (0b10011 << 3));
    }

    #[test]
    fn bitfield_overflow_rejected() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(TypeBuilder::new("B").bitfield("lo", UintKind::U32, 3)).unwrap();
        let lib = b.build().unwrap();
        let ty = lib.type_by_name("B").unwrap();

        let inst = Instance::new(Value::Struct(vec![Value::Bits(8)]));
        let err = pack_body(&lib, ty, &inst, PtrWidth::W32, ByteOrder::Little).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn kind_mismatch_rejected() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(TypeBuilder::new("P").member("a", MemberKind::U32)).unwrap();
        let lib = b.build().unwrap();
        let ty = lib.type_by_name("P").unwrap();

        let inst = Instance::new(Value::Struct(vec![Value::Str("no".into())]));
        let err = pack_body(&lib, ty, &inst, PtrWidth::W32, ByteOrder::Little).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }
}
