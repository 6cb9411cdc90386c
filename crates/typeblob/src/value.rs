// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory instance values.
//!
//! An [`Instance`] is the native-side analog of a packed blob: the root
//! value plus an arena of pointer targets. Pointer members hold arena
//! indices, so two members referencing the same [`ObjId`] share one object
//! and index cycles express circular references without unsafe code.

/// Index of a pointer target in an instance's object arena.
pub type ObjId = usize;

/// A value matching one member (or one whole struct) of a described type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// String member contents.
    Str(String),
    /// Enum member, held by variant name.
    Enum(String),
    /// Bitfield member value (occupies the member's declared bit count).
    Bits(u64),
    /// Struct value, one entry per member in declared order.
    Struct(Vec<Value>),
    /// Inline or dynamic array elements.
    Array(Vec<Value>),
    /// Pointer member: `None` is the null reference.
    Ptr(Option<ObjId>),
}

impl Value {
    /// Short kind name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::I8(_) => "int8",
            Value::I16(_) => "int16",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::U8(_) => "uint8",
            Value::U16(_) => "uint16",
            Value::U32(_) => "uint32",
            Value::U64(_) => "uint64",
            Value::F32(_) => "float32",
            Value::F64(_) => "float64",
            Value::Str(_) => "string",
            Value::Enum(_) => "enum",
            Value::Bits(_) => "bitfield",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
            Value::Ptr(_) => "pointer",
        }
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::I8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::U8(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::U16(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

/// A complete native instance: root value plus the arena of objects
/// reachable through pointer members.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub root: Value,
    objects: Vec<Value>,
}

impl Instance {
    /// Wrap a root value with an empty object arena.
    pub fn new(root: Value) -> Self {
        Instance {
            root,
            objects: Vec::new(),
        }
    }

    /// Add a pointer target and return its id.
    pub fn add_object(&mut self, value: Value) -> ObjId {
        self.objects.push(value);
        self.objects.len() - 1
    }

    pub fn object(&self, id: ObjId) -> Option<&Value> {
        self.objects.get(id)
    }

    /// Replace an object added earlier, e.g. to close a reference cycle.
    pub fn set_object(&mut self, id: ObjId, value: Value) {
        self.objects[id] = value;
    }

    pub fn objects(&self) -> &[Value] {
        &self.objects
    }
}
