// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The type library: immutable descriptor registry and operation facade.
//!
//! A [`TypeLibrary`] is built once (see
//! [`TypeLibraryBuilder`](crate::TypeLibraryBuilder)), then shared
//! read-only. All pack/load/convert/text operations hang off it so no
//! ambient global registry exists; concurrent calls on different
//! instances need no locking.

use crate::convert;
use crate::descriptor::{AtomKind, EnumDescriptor, MemberDescriptor, StorageKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::header::{InstanceHeader, HEADER_SIZE};
use crate::layout::{align_up, ByteOrder, PtrWidth};
use crate::pack;
use crate::txt;
use crate::type_id::TypeId;
use crate::unpack;
use crate::value::Instance;
use crate::view::LoadedInstance;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable mapping from type id to descriptor, shared by every core
/// component.
#[derive(Debug)]
pub struct TypeLibrary {
    types: HashMap<TypeId, Arc<TypeDescriptor>>,
    enums: HashMap<TypeId, Arc<EnumDescriptor>>,
    by_name: HashMap<String, TypeId>,
}

impl TypeLibrary {
    pub(crate) fn empty() -> Self {
        TypeLibrary {
            types: HashMap::new(),
            enums: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    pub(crate) fn insert_type(&mut self, ty: TypeDescriptor) {
        self.by_name.insert(ty.name.clone(), ty.id);
        self.types.insert(ty.id, Arc::new(ty));
    }

    pub(crate) fn insert_enum(&mut self, e: EnumDescriptor) {
        self.by_name.insert(e.name.clone(), e.id);
        self.enums.insert(e.id, Arc::new(e));
    }

    pub(crate) fn has_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub(crate) fn has_id(&self, id: TypeId) -> bool {
        self.types.contains_key(&id) || self.enums.contains_key(&id)
    }

    /// Resolve a struct type by id.
    pub fn type_by_id(&self, id: TypeId) -> Result<&Arc<TypeDescriptor>> {
        self.types.get(&id).ok_or(Error::TypeIdNotFound(id))
    }

    /// Resolve a struct type by name.
    pub fn type_by_name(&self, name: &str) -> Result<&Arc<TypeDescriptor>> {
        let id = self
            .by_name
            .get(name)
            .ok_or_else(|| Error::TypeNotFound(name.to_string()))?;
        self.type_by_id(*id)
    }

    /// Resolve an enum type by id.
    pub fn enum_by_id(&self, id: TypeId) -> Result<&Arc<EnumDescriptor>> {
        self.enums.get(&id).ok_or(Error::TypeIdNotFound(id))
    }

    pub(crate) fn enum_id_by_name(&self, name: &str) -> Option<TypeId> {
        let id = self.by_name.get(name)?;
        self.enums.contains_key(id).then_some(*id)
    }

    pub(crate) fn struct_id_by_name(&self, name: &str) -> Option<TypeId> {
        let id = self.by_name.get(name)?;
        self.types.contains_key(id).then_some(*id)
    }

    /// (size, alignment) of one value of `storage` for `width`.
    pub(crate) fn storage_layout(&self, storage: StorageKind, width: PtrWidth) -> Result<(u32, u32)> {
        match storage {
            StorageKind::Str => Ok((width.size(), width.align())),
            StorageKind::Struct(id) => {
                let ty = self.type_by_id(id)?;
                Ok((ty.size.get(width), ty.align.get(width)))
            }
            other => {
                let s = other
                    .fixed_size()
                    .ok_or_else(|| Error::Internal(format!("unsized storage {}", other.name())))?;
                Ok((s, s))
            }
        }
    }

    /// (stride, alignment) of one array element of `storage` for `width`.
    pub(crate) fn elem_layout(&self, storage: StorageKind, width: PtrWidth) -> Result<(u32, u32)> {
        let (size, align) = self.storage_layout(storage, width)?;
        Ok((align_up(size, align), align))
    }

    /// (size, alignment) of a whole member slot for `width`.
    pub(crate) fn member_layout(&self, member: &MemberDescriptor, width: PtrWidth) -> Result<(u32, u32)> {
        match member.atom {
            AtomKind::Scalar => self.storage_layout(member.storage, width),
            AtomKind::Pointer => Ok((width.size(), width.align())),
            AtomKind::InlineArray(count) => {
                let (stride, align) = self.elem_layout(member.storage, width)?;
                Ok((stride * count, align))
            }
            AtomKind::DynamicArray => {
                // Offset slot plus u32 count, padded out to pointer alignment.
                Ok((align_up(width.size() + 4, width.align()), width.align()))
            }
        }
    }
}

// Operation facade. The heavy lifting lives in the pack/unpack/convert/txt
// modules; these entry points own header handling and capacity checks.
impl TypeLibrary {
    /// Exact packed size of `instance`, header included. Call before
    /// [`store`](Self::store) to size the destination.
    pub fn instance_size(&self, root: TypeId, instance: &Instance) -> Result<usize> {
        let ty = self.type_by_id(root)?;
        let body = pack::pack_body(self, ty, instance, PtrWidth::HOST, ByteOrder::NATIVE)?;
        Ok(HEADER_SIZE + body.len())
    }

    /// Pack `instance` into `dst` for the host pointer width and byte
    /// order. Returns the number of bytes written.
    pub fn store(&self, root: TypeId, instance: &Instance, dst: &mut [u8]) -> Result<usize> {
        let ty = self.type_by_id(root)?;
        let body = pack::pack_body(self, ty, instance, PtrWidth::HOST, ByteOrder::NATIVE)?;
        let need = HEADER_SIZE + body.len();
        if dst.len() < need {
            return Err(Error::BufferTooSmall { need, have: dst.len() });
        }
        let header = InstanceHeader {
            root_type: ty.id,
            body_len: body.len() as u32,
            order: ByteOrder::NATIVE,
            ptr_width: PtrWidth::HOST,
        };
        dst[..HEADER_SIZE].copy_from_slice(&header.write());
        dst[HEADER_SIZE..need].copy_from_slice(&body);
        log::debug!("stored {} instance: {} bytes", ty.name, need);
        Ok(need)
    }

    /// Load a blob into live memory: validates the header, copies the body
    /// and patches every stored offset into an absolute address.
    ///
    /// The blob must already be in host format; convert first if not.
    pub fn load(&self, blob: &[u8]) -> Result<LoadedInstance<'_>> {
        let header = InstanceHeader::read(blob)?;
        if header.order != ByteOrder::NATIVE {
            log::warn!("load rejected: blob byte order {:?}", header.order);
            return Err(Error::ByteOrderMismatch);
        }
        if header.ptr_width != PtrWidth::HOST {
            log::warn!("load rejected: blob pointer width {:?}", header.ptr_width);
            return Err(Error::PtrWidthMismatch);
        }
        let ty = self.type_by_id(header.root_type)?;
        LoadedInstance::from_body(self, ty, header.body_of(blob))
    }

    /// Rebuild the value graph of a packed blob, in whatever pointer width
    /// and byte order it was packed for.
    pub fn unpack(&self, blob: &[u8]) -> Result<(Arc<TypeDescriptor>, Instance)> {
        let header = InstanceHeader::read(blob)?;
        let ty = self.type_by_id(header.root_type)?.clone();
        let instance = unpack::unpack_body(
            self,
            &ty,
            header.body_of(blob),
            header.order,
            header.ptr_width,
        )?;
        Ok((ty, instance))
    }

    /// Size the output of [`convert`](Self::convert) for `target_width`
    /// without performing the conversion.
    pub fn convert_size(&self, blob: &[u8], target_width: PtrWidth) -> Result<usize> {
        convert::convert_size(self, blob, target_width)
    }

    /// Re-lay-out `src` for another byte order and/or pointer width into
    /// `dst`. Returns the number of bytes written.
    pub fn convert(
        &self,
        src: &[u8],
        dst: &mut [u8],
        target_order: ByteOrder,
        target_width: PtrWidth,
    ) -> Result<usize> {
        convert::convert(self, src, dst, target_order, target_width)
    }

    /// Convert within `buf`. Always possible when the target pointer width
    /// is not larger than the source's; otherwise the re-laid-out instance
    /// must still fit the buffer.
    pub fn convert_inplace(
        &self,
        buf: &mut [u8],
        target_order: ByteOrder,
        target_width: PtrWidth,
    ) -> Result<usize> {
        convert::convert_inplace(self, buf, target_order, target_width)
    }

    /// Pack a textual instance description into a host-format blob in
    /// `dst`. Returns the number of bytes written.
    pub fn txt_pack(&self, text: &str, dst: &mut [u8]) -> Result<usize> {
        let (root, instance) = txt::parse_instance(self, text)?;
        self.store(root, &instance, dst)
    }

    /// Render a packed blob as its textual instance description, members
    /// in type-declared order.
    pub fn txt_unpack(&self, blob: &[u8]) -> Result<String> {
        let (ty, instance) = self.unpack(blob)?;
        txt::render_instance(self, &ty, &instance)
    }
}
