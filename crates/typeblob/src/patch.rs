// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference relocation over a packed body.
//!
//! [`patch_instance`] adds a signed distance to every reference-bearing
//! slot of an instance, in place. The same walk serves both directions:
//! a positive distance turns body-relative offsets into live addresses on
//! load, a negative one turns addresses back into offsets. Null slots
//! hold the width's sentinel and are never touched.
//!
//! `base_address` is the address the instance start has *after* patching;
//! subtracting it maps a patched slot value back to a body index so the
//! walk can descend into targets. A visited set keyed by target address
//! makes shared references patch exactly once and reference cycles
//! terminate; the root address is pre-marked so back-references to the
//! root are recognized. The set grows with the instance, there is no
//! fixed visit capacity.

use crate::descriptor::{AtomKind, MemberDescriptor, StorageKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::layout::{ByteOrder, PtrWidth};
use crate::library::TypeLibrary;
use crate::rw::{slice_put_uint, slice_uint};
use std::collections::HashSet;

/// Rewrite every reference slot of the instance in `data` by
/// `patch_distance`.
pub(crate) fn patch_instance(
    lib: &TypeLibrary,
    ty: &TypeDescriptor,
    data: &mut [u8],
    width: PtrWidth,
    order: ByteOrder,
    base_address: u64,
    patch_distance: i64,
) -> Result<()> {
    let mut patcher = Patcher {
        lib,
        data,
        width,
        order,
        base: base_address,
        distance: patch_distance as u64,
        visited: HashSet::new(),
    };
    patcher.visited.insert(base_address);
    patcher.patch_struct(0, ty)
}

struct Patcher<'a> {
    lib: &'a TypeLibrary,
    data: &'a mut [u8],
    width: PtrWidth,
    order: ByteOrder,
    base: u64,
    distance: u64,
    visited: HashSet<u64>,
}

impl Patcher<'_> {
    fn patch_struct(&mut self, at: usize, ty: &TypeDescriptor) -> Result<()> {
        for member in &ty.members {
            self.patch_member(at, member)?;
        }
        Ok(())
    }

    fn patch_member(&mut self, at: usize, member: &MemberDescriptor) -> Result<()> {
        let slot = at + member.offset.get(self.width) as usize;
        match member.atom {
            AtomKind::Scalar => match member.storage {
                StorageKind::Str => {
                    self.patch_slot(slot)?;
                    Ok(())
                }
                StorageKind::Struct(id) => {
                    // Embedded structs live inside the parent's storage;
                    // no independent address to track.
                    let ty = self.lib.type_by_id(id)?.clone();
                    self.patch_struct(slot, &ty)
                }
                _ => Ok(()),
            },
            AtomKind::InlineArray(count) => match member.storage {
                StorageKind::Str => {
                    let stride = self.width.size() as usize;
                    for i in 0..count as usize {
                        self.patch_slot(slot + i * stride)?;
                    }
                    Ok(())
                }
                StorageKind::Struct(id) => {
                    let ty = self.lib.type_by_id(id)?.clone();
                    let (stride, _) = self.lib.elem_layout(member.storage, self.width)?;
                    for i in 0..count as usize {
                        self.patch_struct(slot + i * stride as usize, &ty)?;
                    }
                    Ok(())
                }
                _ => Ok(()),
            },
            AtomKind::DynamicArray => {
                let count = self.read_slot(slot + self.width.size() as usize, 4)?;
                let target = self.patch_slot(slot)?;
                let (addr, count) = match (target, count) {
                    (Some(addr), count) if count > 0 => (addr, count),
                    _ => return Ok(()),
                };
                match member.storage {
                    StorageKind::Str => {
                        let elem = self.index_of(addr)?;
                        let stride = self.width.size() as usize;
                        for i in 0..count as usize {
                            self.patch_slot(elem + i * stride)?;
                        }
                        Ok(())
                    }
                    StorageKind::Struct(id) => {
                        let ty = self.lib.type_by_id(id)?.clone();
                        let (stride, _) = self.lib.elem_layout(member.storage, self.width)?;
                        let elem = self.index_of(addr)?;
                        for i in 0..count as usize {
                            self.patch_struct(elem + i * stride as usize, &ty)?;
                        }
                        Ok(())
                    }
                    _ => Ok(()),
                }
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
                if let Some(addr) = self.patch_slot(slot)? {
                    if self.visited.insert(addr) {
                        let at = self.index_of(addr)?;
                        let ty = self.lib.type_by_id(target)?.clone();
                        self.patch_struct(at, &ty)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Patch one reference slot. Returns the patched value, or `None` when
    /// the slot holds the null sentinel and stays untouched.
    fn patch_slot(&mut self, slot: usize) -> Result<Option<u64>> {
        let size = self.width.size();
        let v = self.read_slot(slot, size)?;
        if v == self.width.null_offset() {
            return Ok(None);
        }
        let patched = v.wrapping_add(self.distance);
        if self.width == PtrWidth::W32 && patched > u32::MAX as u64 {
            return Err(Error::Internal(format!(
                "patched reference {:#x} exceeds 32 bits",
                patched
            )));
        }
        slice_put_uint(self.data, slot, patched, size, self.order);
        Ok(Some(patched))
    }

    fn read_slot(&self, slot: usize, size: u32) -> Result<u64> {
        if slot + size as usize > self.data.len() {
            return Err(Error::Internal(format!(
                "reference slot {}+{} outside instance of {} bytes",
                slot,
                size,
                self.data.len()
            )));
        }
        Ok(slice_uint(self.data, slot, size, self.order))
    }

    /// Body index of a patched target address.
    fn index_of(&self, addr: u64) -> Result<usize> {
        addr.checked_sub(self.base)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|i| *i < self.data.len())
            .ok_or_else(|| Error::Internal(format!("target address {:#x} outside instance", addr)))
    }
}
