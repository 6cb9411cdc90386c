// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-layout conversion of packed instances.
//!
//! Changing the pointer width moves every offset, stride and padding
//! byte, so conversion is a full re-layout: unpack the source blob into
//! its value graph, repack for the target width and byte order, prepend
//! a fresh header. Because packing appends deferred blocks in
//! first-reference order, converting A to B and back to A reproduces A's
//! bytes exactly.

use crate::error::{Error, Result};
use crate::header::{InstanceHeader, HEADER_SIZE};
use crate::layout::{ByteOrder, PtrWidth};
use crate::library::TypeLibrary;
use crate::pack::pack_body;
use crate::unpack::unpack_body;

/// Pack the source blob's value graph for the target layout, header
/// included.
fn rebuild(
    lib: &TypeLibrary,
    src: &[u8],
    target_order: ByteOrder,
    target_width: PtrWidth,
) -> Result<Vec<u8>> {
    let header = InstanceHeader::read(src)?;
    let ty = lib.type_by_id(header.root_type)?.clone();
    let instance = unpack_body(lib, &ty, header.body_of(src), header.order, header.ptr_width)?;
    let body = pack_body(lib, &ty, &instance, target_width, target_order)?;
    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    out.extend_from_slice(&InstanceHeader {
        root_type: header.root_type,
        body_len: body.len() as u32,
        order: target_order,
        ptr_width: target_width,
    }
    .write());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Exact output size of converting `blob` to `target_width`.
pub(crate) fn convert_size(lib: &TypeLibrary, blob: &[u8], target_width: PtrWidth) -> Result<usize> {
    let order = InstanceHeader::read(blob)?.order;
    Ok(rebuild(lib, blob, order, target_width)?.len())
}

/// Convert `src` into `dst` for the target layout. Returns the number of
/// bytes written.
pub(crate) fn convert(
    lib: &TypeLibrary,
    src: &[u8],
    dst: &mut [u8],
    target_order: ByteOrder,
    target_width: PtrWidth,
) -> Result<usize> {
    let out = rebuild(lib, src, target_order, target_width)?;
    if dst.len() < out.len() {
        return Err(Error::BufferTooSmall {
            need: out.len(),
            have: dst.len(),
        });
    }
    dst[..out.len()].copy_from_slice(&out);
    log::debug!("converted instance: {} bytes", out.len());
    Ok(out.len())
}

/// Convert within `buf`. Narrowing the pointer width never grows the
/// instance, so it always fits; widening must still fit the buffer.
pub(crate) fn convert_inplace(
    lib: &TypeLibrary,
    buf: &mut [u8],
    target_order: ByteOrder,
    target_width: PtrWidth,
) -> Result<usize> {
    let out = rebuild(lib, buf, target_order, target_width)?;
    if buf.len() < out.len() {
        return Err(Error::BufferTooSmall {
            need: out.len(),
            have: buf.len(),
        });
    }
    buf[..out.len()].copy_from_slice(&out);
    Ok(out.len())
}
