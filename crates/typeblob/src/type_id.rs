// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stable type identifiers.

use md5::{Digest, Md5};
use std::fmt;

/// Stable 32-bit identifier of a type, derived from its fully qualified
/// name. Identical names hash to identical ids on every platform, so a
/// blob's root type id resolves against any library containing the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Hash a fully qualified type name into its id.
    pub fn of(name: &str) -> TypeId {
        let digest = Md5::digest(name.as_bytes());
        TypeId(u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]))
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
