// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fluent builders for enum and struct types.
//!
//! Registration computes both the 32- and 64-bit layout of every struct up
//! front, following C layout rules: each member is placed at its aligned
//! offset, struct alignment is the maximum member alignment, struct size
//! is padded to that alignment. Embedded struct and enum members must
//! reference types that are already registered, so layouts never need a
//! second pass; pointer members may reference forward (or the type
//! itself) and are checked when the library is built.

use crate::descriptor::{
    AtomKind, EnumDescriptor, EnumVariant, MemberDescriptor, StorageKind, TypeDescriptor, UintKind,
};
use crate::error::{Error, Result};
use crate::layout::{align_up, PerWidth, PtrWidth};
use crate::library::TypeLibrary;
use crate::type_id::TypeId;
use crate::value::Value;

/// Declaration-side storage of a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
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
    Str,
    /// Struct type, referenced by name.
    Struct(String),
    /// Enum type, referenced by name.
    Enum(String),
}

#[derive(Debug, Clone)]
enum DeclKind {
    Scalar(MemberKind),
    InlineArray(MemberKind, u32),
    DynamicArray(MemberKind),
    Pointer(String),
    Bitfield(UintKind, u8),
}

#[derive(Debug, Clone)]
struct MemberDecl {
    name: String,
    kind: DeclKind,
    default: Option<Value>,
}

/// Builder for one struct type.
#[derive(Debug)]
pub struct TypeBuilder {
    name: String,
    members: Vec<MemberDecl>,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        TypeBuilder {
            name: name.into(),
            members: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, kind: DeclKind) -> Self {
        self.members.push(MemberDecl {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    /// Add a plain member (scalar, string, embedded struct or enum).
    pub fn member(self, name: impl Into<String>, kind: MemberKind) -> Self {
        self.push(name, DeclKind::Scalar(kind))
    }

    /// Add a fixed-count inline array member.
    pub fn inline_array(self, name: impl Into<String>, kind: MemberKind, count: u32) -> Self {
        self.push(name, DeclKind::InlineArray(kind, count))
    }

    /// Add a variable-length array member.
    pub fn array(self, name: impl Into<String>, kind: MemberKind) -> Self {
        self.push(name, DeclKind::DynamicArray(kind))
    }

    /// Add a pointer member referencing a struct type by name.
    pub fn pointer(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        self.push(name, DeclKind::Pointer(target))
    }

    /// Add a bitfield member of `bits` bits over the given storage unit.
    pub fn bitfield(self, name: impl Into<String>, unit: UintKind, bits: u8) -> Self {
        self.push(name, DeclKind::Bitfield(unit, bits))
    }

    /// Attach a default value to the most recently added member.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        if let Some(last) = self.members.last_mut() {
            last.default = Some(default.into());
        }
        self
    }
}

/// Builder for one enum type. Variants without an explicit value continue
/// one past the previous variant.
#[derive(Debug)]
pub struct EnumBuilder {
    name: String,
    variants: Vec<EnumVariant>,
    next_value: u32,
}

impl EnumBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        EnumBuilder {
            name: name.into(),
            variants: Vec::new(),
            next_value: 0,
        }
    }

    /// Add a variant with the next automatic value.
    pub fn variant(self, name: impl Into<String>) -> Self {
        let v = self.next_value;
        self.variant_value(name, v)
    }

    /// Add a variant with an explicit value.
    pub fn variant_value(mut self, name: impl Into<String>, value: u32) -> Self {
        self.variants.push(EnumVariant {
            name: name.into(),
            value,
        });
        self.next_value = value.wrapping_add(1);
        self
    }
}

/// Accumulates registered types into an immutable [`TypeLibrary`].
#[derive(Debug)]
pub struct TypeLibraryBuilder {
    lib: TypeLibrary,
    /// Pointer references deferred until [`build`](Self::build), as
    /// (owning type, member, target name). Pointers may target types
    /// declared later, including the owning type itself.
    pending_pointers: Vec<(String, String, String)>,
}

impl Default for TypeLibraryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeLibraryBuilder {
    pub fn new() -> Self {
        TypeLibraryBuilder {
            lib: TypeLibrary::empty(),
            pending_pointers: Vec::new(),
        }
    }

    /// Register an enum type.
    pub fn add_enum(&mut self, e: EnumBuilder) -> Result<TypeId> {
        if e.variants.is_empty() {
            return Err(Error::InvalidSchema(format!("enum {} has no variants", e.name)));
        }
        let id = self.claim_name(&e.name)?;
        for (i, v) in e.variants.iter().enumerate() {
            if e.variants[..i].iter().any(|o| o.name == v.name) {
                return Err(Error::InvalidSchema(format!(
                    "enum {} declares variant {} twice",
                    e.name, v.name
                )));
            }
        }
        self.lib.insert_enum(EnumDescriptor {
            name: e.name,
            id,
            variants: e.variants,
        });
        Ok(id)
    }

    /// Register a struct type and compute its per-width layout.
    pub fn add_type(&mut self, t: TypeBuilder) -> Result<TypeId> {
        let id = self.claim_name(&t.name)?;

        let mut members = Vec::with_capacity(t.members.len());
        for (i, decl) in t.members.iter().enumerate() {
            if t.members[..i].iter().any(|o| o.name == decl.name) {
                return Err(Error::InvalidSchema(format!(
                    "{} declares member {} twice",
                    t.name, decl.name
                )));
            }
            let (atom, storage) = self.resolve(&t.name, decl)?;
            members.push(MemberDescriptor {
                name: decl.name.clone(),
                atom,
                storage,
                offset: PerWidth::splat(0),
                default: decl.default.clone(),
            });
        }

        self.assign_bitfield_shifts(&mut members);

        let mut size = PerWidth::splat(0u32);
        let mut align = PerWidth::splat(1u32);
        for width in [PtrWidth::W32, PtrWidth::W64] {
            let (s, a) = self.layout_members(&mut members, width)?;
            size.set(width, s);
            align.set(width, a);
        }

        let ty = TypeDescriptor {
            name: t.name.clone(),
            id,
            size,
            align,
            members,
        };
        for member in &ty.members {
            if let Some(default) = &member.default {
                self.check_default(&ty.name, member, default)?;
            }
        }
        self.lib.insert_type(ty);
        Ok(id)
    }

    /// Finish and freeze the library. Fails if any pointer member targets
    /// a struct that was never registered.
    pub fn build(self) -> Result<TypeLibrary> {
        for (type_name, member, target) in &self.pending_pointers {
            if self.lib.struct_id_by_name(target).is_none() {
                return Err(Error::InvalidSchema(format!(
                    "{}.{} points to unregistered struct {}",
                    type_name, member, target
                )));
            }
        }
        Ok(self.lib)
    }

    fn claim_name(&self, name: &str) -> Result<TypeId> {
        if self.lib.has_name(name) {
            return Err(Error::InvalidSchema(format!("type {} registered twice", name)));
        }
        let id = TypeId::of(name);
        if self.lib.has_id(id) {
            return Err(Error::InvalidSchema(format!("type id collision on {}", name)));
        }
        Ok(id)
    }

    fn resolve(&mut self, type_name: &str, decl: &MemberDecl) -> Result<(AtomKind, StorageKind)> {
        let storage_of = |kind: &MemberKind| -> Result<StorageKind> {
            Ok(match kind {
                MemberKind::I8 => StorageKind::I8,
                MemberKind::I16 => StorageKind::I16,
                MemberKind::I32 => StorageKind::I32,
                MemberKind::I64 => StorageKind::I64,
                MemberKind::U8 => StorageKind::U8,
                MemberKind::U16 => StorageKind::U16,
                MemberKind::U32 => StorageKind::U32,
                MemberKind::U64 => StorageKind::U64,
                MemberKind::F32 => StorageKind::F32,
                MemberKind::F64 => StorageKind::F64,
                MemberKind::Str => StorageKind::Str,
                MemberKind::Struct(name) => {
                    StorageKind::Struct(self.lib.struct_id_by_name(name).ok_or_else(|| {
                        Error::InvalidSchema(format!(
                            "{}.{} references unregistered struct {}",
                            type_name, decl.name, name
                        ))
                    })?)
                }
                MemberKind::Enum(name) => {
                    StorageKind::Enum(self.lib.enum_id_by_name(name).ok_or_else(|| {
                        Error::InvalidSchema(format!(
                            "{}.{} references unregistered enum {}",
                            type_name, decl.name, name
                        ))
                    })?)
                }
            })
        };

        match &decl.kind {
            DeclKind::Scalar(kind) => Ok((AtomKind::Scalar, storage_of(kind)?)),
            DeclKind::InlineArray(kind, count) => {
                if *count == 0 {
                    return Err(Error::InvalidSchema(format!(
                        "{}.{} inline array of zero elements",
                        type_name, decl.name
                    )));
                }
                Ok((AtomKind::InlineArray(*count), storage_of(kind)?))
            }
            DeclKind::DynamicArray(kind) => Ok((AtomKind::DynamicArray, storage_of(kind)?)),
            DeclKind::Pointer(target) => {
                // Pointer layout never depends on the target, so targets
                // may be forward references; checked when the library is
                // built.
                self.pending_pointers
                    .push((type_name.to_string(), decl.name.clone(), target.clone()));
                Ok((AtomKind::Pointer, StorageKind::Struct(TypeId::of(target))))
            }
            DeclKind::Bitfield(unit, bits) => {
                if *bits == 0 || *bits > unit.bits() {
                    return Err(Error::InvalidSchema(format!(
                        "{}.{} declares {} bits over a {}-bit unit",
                        type_name,
                        decl.name,
                        bits,
                        unit.bits()
                    )));
                }
                Ok((
                    AtomKind::Scalar,
                    StorageKind::Bitfield {
                        unit: *unit,
                        bits: *bits,
                        shift: 0,
                    },
                ))
            }
        }
    }

    /// Assign LSB-first shifts to runs of bitfield members sharing a unit.
    fn assign_bitfield_shifts(&self, members: &mut [MemberDescriptor]) {
        let mut run: Option<(UintKind, u8)> = None; // (unit, bits used)
        for member in members.iter_mut() {
            if let StorageKind::Bitfield { unit, bits, ref mut shift } = member.storage {
                match run {
                    Some((prev_unit, used)) if prev_unit == unit && used + bits <= unit.bits() => {
                        *shift = used;
                        run = Some((unit, used + bits));
                    }
                    _ => {
                        *shift = 0;
                        run = Some((unit, bits));
                    }
                }
            } else {
                run = None;
            }
        }
    }

    /// Place members for one width; bitfield members with a non-zero shift
    /// share the unit slot of the member before them.
    fn layout_members(&self, members: &mut [MemberDescriptor], width: PtrWidth) -> Result<(u32, u32)> {
        let mut cursor = 0u32;
        let mut struct_align = 1u32;
        let mut unit_offset = 0u32;
        for member in members.iter_mut() {
            if let StorageKind::Bitfield { shift, .. } = member.storage {
                if shift != 0 {
                    member.offset.set(width, unit_offset);
                    continue;
                }
            }
            let (size, align) = self.lib.member_layout(member, width)?;
            let at = align_up(cursor, align);
            member.offset.set(width, at);
            unit_offset = at;
            cursor = at + size;
            struct_align = struct_align.max(align);
        }
        Ok((align_up(cursor, struct_align), struct_align))
    }

    /// Shallow kind check of a declared default against its member.
    fn check_default(&self, type_name: &str, member: &MemberDescriptor, default: &Value) -> Result<()> {
        let bad = |expected: &str| {
            Err(Error::InvalidSchema(format!(
                "default for {}.{} must be {}, got {}",
                type_name,
                member.name,
                expected,
                default.kind_name()
            )))
        };
        match member.atom {
            AtomKind::Pointer => match default {
                Value::Ptr(None) => Ok(()),
                _ => bad("a null pointer"),
            },
            AtomKind::InlineArray(count) => match default {
                Value::Array(v) if v.len() == count as usize => Ok(()),
                _ => bad("an array of the declared count"),
            },
            AtomKind::DynamicArray => match default {
                Value::Array(_) => Ok(()),
                _ => bad("an array"),
            },
            AtomKind::Scalar => match (member.storage, default) {
                (StorageKind::I8, Value::I8(_))
                | (StorageKind::I16, Value::I16(_))
                | (StorageKind::I32, Value::I32(_))
                | (StorageKind::I64, Value::I64(_))
                | (StorageKind::U8, Value::U8(_))
                | (StorageKind::U16, Value::U16(_))
                | (StorageKind::U32, Value::U32(_))
                | (StorageKind::U64, Value::U64(_))
                | (StorageKind::F32, Value::F32(_))
                | (StorageKind::F64, Value::F64(_))
                | (StorageKind::Str, Value::Str(_))
                | (StorageKind::Bitfield { .. }, Value::Bits(_)) => Ok(()),
                (StorageKind::Enum(id), Value::Enum(name)) => {
                    let e = self.lib.enum_by_id(id)?;
                    if e.variant(name).is_some() {
                        Ok(())
                    } else {
                        Err(Error::InvalidEnumValue {
                            enum_name: e.name.clone(),
                            value: name.clone(),
                        })
                    }
                }
                (StorageKind::Struct(id), Value::Struct(vals)) => {
                    let ty = self.type_by_id(id)?;
                    if vals.len() == ty.members.len() {
                        Ok(())
                    } else {
                        bad("a struct value with one entry per member")
                    }
                }
                _ => bad(member.storage.name()),
            },
        }
    }

    fn type_by_id(&self, id: TypeId) -> Result<&std::sync::Arc<TypeDescriptor>> {
        self.lib.type_by_id(id)
    }
}
