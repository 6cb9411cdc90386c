// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # typeblob - schema-driven relocatable binary instances
//!
//! A type library describes structs (primitives, enums, bitfields, inline
//! and dynamic arrays, nested structs, strings, typed pointers); typeblob
//! packs native value graphs against those descriptors into self-contained
//! relocatable blobs and back, re-targets blobs between 32/64-bit pointer
//! layouts and byte orders, and converts between the binary form and a
//! JSON-like textual instance form.
//!
//! ## Quick Start
//!
//! ```rust
//! use typeblob::{Instance, MemberKind, TypeBuilder, TypeLibraryBuilder, Value};
//!
//! fn main() -> typeblob::Result<()> {
//!     let mut builder = TypeLibraryBuilder::new();
//!     let sensor = builder.add_type(
//!         TypeBuilder::new("Sensor")
//!             .member("temperature", MemberKind::F32)
//!             .member("name", MemberKind::Str),
//!     )?;
//!     let lib = builder.build()?;
//!
//!     // Pack a native instance into a blob...
//!     let instance = Instance::new(Value::Struct(vec![
//!         Value::F32(21.5),
//!         Value::Str("probe-1".into()),
//!     ]));
//!     let mut blob = vec![0u8; lib.instance_size(sensor, &instance)?];
//!     lib.store(sensor, &instance, &mut blob)?;
//!
//!     // ...and read it back, as text or as live patched memory.
//!     let text = lib.txt_unpack(&blob)?;
//!     assert!(text.contains("probe-1"));
//!     let view = lib.load(&blob)?;
//!     assert_eq!(view.root().scalar("temperature")?, Value::F32(21.5));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        TypeLibrary                           |
//! |  descriptors (per-width offsets/sizes) | enums | type ids    |
//! +--------------------------------------------------------------+
//! | Packer    | Unpacker  | Relocator | Converter | Text Codec   |
//! | value     | blob ->   | offsets   | re-layout | JSON-like    |
//! | graph ->  | value     | <-> live  | other     | text <->     |
//! | blob      | graph     | addresses | width/    | blob         |
//! |           |           |           | endian    |              |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TypeLibrary`] | Immutable descriptor registry, entry point for every operation |
//! | [`TypeLibraryBuilder`] | Registers enum and struct types, computes per-width layouts |
//! | [`Instance`] / [`Value`] | Native value graph with an arena for pointer targets |
//! | [`LoadedInstance`] | A blob patched into live memory, walked via [`StructRef`] |
//! | [`InstanceHeader`] | Blob header: root type id, byte order, pointer width, length |

/// Fluent builders for enum and struct types.
mod builder;
/// Cross pointer-width and byte-order conversion.
mod convert;
/// Type, member and enum descriptors.
mod descriptor;
/// Error type shared by all operations.
mod error;
/// Packed instance header.
mod header;
/// Pointer width, byte order and per-width tables.
mod layout;
/// The descriptor registry and operation facade.
mod library;
/// Value graph to blob packing.
mod pack;
/// In-place reference relocation.
mod patch;
/// Byte-order aware body reader/writer.
mod rw;
/// Textual instance codec.
mod txt;
/// Stable type identifiers.
mod type_id;
/// Blob to value graph unpacking.
mod unpack;
/// Native instance values.
mod value;
/// Live view over a loaded instance.
mod view;

pub use builder::{EnumBuilder, MemberKind, TypeBuilder, TypeLibraryBuilder};
pub use descriptor::{
    AtomKind, EnumDescriptor, EnumVariant, MemberDescriptor, StorageKind, TypeDescriptor, UintKind,
};
pub use error::{Error, Result};
pub use header::{InstanceHeader, HEADER_SIZE};
pub use layout::{ByteOrder, PerWidth, PtrWidth};
pub use library::TypeLibrary;
pub use type_id::TypeId;
pub use value::{Instance, ObjId, Value};
pub use view::{LoadedInstance, StructRef};

/// typeblob version string.
pub const VERSION: &str = "0.3.2";
