// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type shared by all typeblob operations.

use crate::type_id::TypeId;
use std::fmt;

/// Errors returned by typeblob operations.
///
/// Schema errors (`TypeNotFound`, `MemberNotFound`, ...) always fail fast
/// before any output is committed to a caller buffer. `BufferTooSmall` is
/// avoidable by calling the size-calculation entry points first.
#[derive(Debug)]
pub enum Error {
    /// No type with this name is registered in the library.
    TypeNotFound(String),
    /// No type with this id is registered in the library.
    TypeIdNotFound(TypeId),
    /// A textual instance referenced a member the type does not declare.
    MemberNotFound { type_name: String, member: String },
    /// A textual instance assigned the same member twice.
    MemberSetTwice { type_name: String, member: String },
    /// A member without a declared default was left unassigned.
    MemberMissing { type_name: String, member: String },
    /// A value's kind does not match the member's declared storage.
    TypeMismatch { expected: String, found: String },
    /// An enum value or variant name is not part of the enum.
    InvalidEnumValue { enum_name: String, value: String },
    /// Destination buffer cannot hold the output.
    BufferTooSmall { need: usize, have: usize },
    /// The textual instance description is not well formed.
    MalformedText(String),
    /// The blob does not start with a valid instance header.
    InvalidHeader(String),
    /// The blob's byte order does not match the host.
    ByteOrderMismatch,
    /// The blob's pointer width does not match the host.
    PtrWidthMismatch,
    /// A type registration was rejected by the library builder.
    InvalidSchema(String),
    /// The operation is not supported for this member kind.
    Unsupported(&'static str),
    /// Internal invariant violation (corrupt body, dangling offset).
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TypeNotFound(name) => write!(f, "Type not found: {}", name),
            Error::TypeIdNotFound(id) => write!(f, "Type id not found: {}", id),
            Error::MemberNotFound { type_name, member } => {
                write!(f, "Member not found: {}.{}", type_name, member)
            }
            Error::MemberSetTwice { type_name, member } => {
                write!(f, "Member set twice: {}.{}", type_name, member)
            }
            Error::MemberMissing { type_name, member } => {
                write!(f, "Member missing and has no default: {}.{}", type_name, member)
            }
            Error::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            Error::InvalidEnumValue { enum_name, value } => {
                write!(f, "Invalid value for enum {}: {}", enum_name, value)
            }
            Error::BufferTooSmall { need, have } => {
                write!(f, "Buffer too small: need {} bytes, have {}", need, have)
            }
            Error::MalformedText(msg) => write!(f, "Malformed text: {}", msg),
            Error::InvalidHeader(msg) => write!(f, "Invalid instance header: {}", msg),
            Error::ByteOrderMismatch => write!(f, "Instance byte order does not match host"),
            Error::PtrWidthMismatch => write!(f, "Instance pointer width does not match host"),
            Error::InvalidSchema(msg) => write!(f, "Invalid schema: {}", msg),
            Error::Unsupported(what) => write!(f, "Unsupported: {}", what),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
