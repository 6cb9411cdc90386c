// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Textual instance codec.
//!
//! The text form is `{"root": {"type": "<TypeName>", "data": {...}}}`.
//! Parsing goes through [`TextValue`], a JSON tree that keeps object keys
//! in document order *including duplicates*; a plain map-based
//! deserialization would silently collapse a repeated member key instead
//! of reporting it. Rendering emits members in type-declared order.
//!
//! Pointer members render as `null` and only accept `null`; a shared or
//! cyclic reference graph has no textual form here.

use crate::descriptor::{AtomKind, MemberDescriptor, StorageKind, TypeDescriptor};
use crate::error::{Error, Result};
use crate::library::TypeLibrary;
use crate::type_id::TypeId;
use crate::value::{Instance, Value};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// A JSON value with duplicate-preserving, order-preserving objects.
#[derive(Debug, Clone, PartialEq)]
enum TextValue {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Array(Vec<TextValue>),
    Object(Vec<(String, TextValue)>),
}

impl TextValue {
    fn kind_name(&self) -> &'static str {
        match self {
            TextValue::Null => "null",
            TextValue::Bool(_) => "bool",
            TextValue::Int(_) | TextValue::Uint(_) => "integer",
            TextValue::Float(_) => "number",
            TextValue::Str(_) => "string",
            TextValue::Array(_) => "array",
            TextValue::Object(_) => "object",
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            TextValue::Int(v) => Some(*v),
            TextValue::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match self {
            TextValue::Uint(v) => Some(*v),
            TextValue::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            TextValue::Float(v) => Some(*v),
            TextValue::Int(v) => Some(*v as f64),
            TextValue::Uint(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for TextValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TextVisitor;

        impl<'de> Visitor<'de> for TextVisitor {
            type Value = TextValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<TextValue, E> {
                Ok(TextValue::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<TextValue, E> {
                Ok(TextValue::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<TextValue, E> {
                Ok(TextValue::Uint(v))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<TextValue, E> {
                Ok(TextValue::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<TextValue, E> {
                Ok(TextValue::Str(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<TextValue, E> {
                Ok(TextValue::Str(v))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<TextValue, E> {
                Ok(TextValue::Null)
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<TextValue, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut elems = Vec::new();
                while let Some(v) = seq.next_element()? {
                    elems.push(v);
                }
                Ok(TextValue::Array(elems))
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<TextValue, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut pairs = Vec::new();
                while let Some(pair) = map.next_entry::<String, TextValue>()? {
                    pairs.push(pair);
                }
                Ok(TextValue::Object(pairs))
            }
        }

        deserializer.deserialize_any(TextVisitor)
    }
}

/// Parse a textual instance description into its root type and value
/// graph.
pub(crate) fn parse_instance(lib: &TypeLibrary, text: &str) -> Result<(TypeId, Instance)> {
    let doc: TextValue =
        serde_json::from_str(text).map_err(|e| Error::MalformedText(e.to_string()))?;
    let top = as_object(&doc, "document")?;
    let root = as_object(unique_key(top, "root", "document")?, "root")?;
    let type_name = match unique_key(root, "type", "root")? {
        TextValue::Str(name) => name,
        other => {
            return Err(Error::MalformedText(format!(
                "root type must be a string, got {}",
                other.kind_name()
            )))
        }
    };
    let data = as_object(unique_key(root, "data", "root")?, "data")?;

    let ty = lib.type_by_name(type_name)?.clone();
    let parser = Parser { lib };
    let root = parser.parse_struct(&ty, data)?;
    Ok((ty.id, Instance::new(root)))
}

fn as_object<'a>(tv: &'a TextValue, what: &str) -> Result<&'a [(String, TextValue)]> {
    match tv {
        TextValue::Object(pairs) => Ok(pairs),
        other => Err(Error::MalformedText(format!(
            "{} must be an object, got {}",
            what,
            other.kind_name()
        ))),
    }
}

/// Fetch a key that must appear exactly once.
fn unique_key<'a>(
    pairs: &'a [(String, TextValue)],
    key: &str,
    what: &str,
) -> Result<&'a TextValue> {
    let mut found = None;
    for (k, v) in pairs {
        if k == key {
            if found.is_some() {
                return Err(Error::MalformedText(format!(
                    "{} declares \"{}\" twice",
                    what, key
                )));
            }
            found = Some(v);
        }
    }
    found.ok_or_else(|| Error::MalformedText(format!("{} is missing \"{}\"", what, key)))
}

struct Parser<'a> {
    lib: &'a TypeLibrary,
}

impl Parser<'_> {
    fn parse_struct(&self, ty: &TypeDescriptor, pairs: &[(String, TextValue)]) -> Result<Value> {
        let mut assigned: Vec<Option<Value>> = vec![None; ty.members.len()];
        for (key, tv) in pairs {
            let (index, member) = ty.member(key).ok_or_else(|| Error::MemberNotFound {
                type_name: ty.name.clone(),
                member: key.clone(),
            })?;
            if assigned[index].is_some() {
                return Err(Error::MemberSetTwice {
                    type_name: ty.name.clone(),
                    member: key.clone(),
                });
            }
            assigned[index] = Some(self.parse_member(ty, member, tv)?);
        }

        let mut members = Vec::with_capacity(ty.members.len());
        for (member, value) in ty.members.iter().zip(assigned) {
            match value {
                Some(v) => members.push(v),
                None => match &member.default {
                    Some(default) => members.push(default.clone()),
                    None => {
                        return Err(Error::MemberMissing {
                            type_name: ty.name.clone(),
                            member: member.name.clone(),
                        })
                    }
                },
            }
        }
        Ok(Value::Struct(members))
    }

    fn parse_member(
        &self,
        ty: &TypeDescriptor,
        member: &MemberDescriptor,
        tv: &TextValue,
    ) -> Result<Value> {
        match member.atom {
            AtomKind::Scalar => self.parse_scalar(member.storage, tv),
            AtomKind::InlineArray(count) => {
                let elems = self.parse_elems(member.storage, tv)?;
                if elems.len() != count as usize {
                    return Err(Error::TypeMismatch {
                        expected: format!("{}.{} with exactly {} elements", ty.name, member.name, count),
                        found: format!("array of {} elements", elems.len()),
                    });
                }
                Ok(Value::Array(elems))
            }
            AtomKind::DynamicArray => Ok(Value::Array(self.parse_elems(member.storage, tv)?)),
            AtomKind::Pointer => match tv {
                TextValue::Null => Ok(Value::Ptr(None)),
                _ => Err(Error::Unsupported("non-null pointer in a textual instance")),
            },
        }
    }

    fn parse_elems(&self, storage: StorageKind, tv: &TextValue) -> Result<Vec<Value>> {
        let elems = match tv {
            TextValue::Array(elems) => elems,
            other => return Err(mismatch("array", other)),
        };
        elems.iter().map(|e| self.parse_scalar(storage, e)).collect()
    }

    fn parse_scalar(&self, storage: StorageKind, tv: &TextValue) -> Result<Value> {
        match storage {
            StorageKind::I8 => signed(tv, storage, i64::from(i8::MIN), i64::from(i8::MAX))
                .map(|v| Value::I8(v as i8)),
            StorageKind::I16 => signed(tv, storage, i64::from(i16::MIN), i64::from(i16::MAX))
                .map(|v| Value::I16(v as i16)),
            StorageKind::I32 => signed(tv, storage, i64::from(i32::MIN), i64::from(i32::MAX))
                .map(|v| Value::I32(v as i32)),
            StorageKind::I64 => signed(tv, storage, i64::MIN, i64::MAX).map(Value::I64),
            StorageKind::U8 => unsigned(tv, storage, u64::from(u8::MAX)).map(|v| Value::U8(v as u8)),
            StorageKind::U16 => {
                unsigned(tv, storage, u64::from(u16::MAX)).map(|v| Value::U16(v as u16))
            }
            StorageKind::U32 => {
                unsigned(tv, storage, u64::from(u32::MAX)).map(|v| Value::U32(v as u32))
            }
            StorageKind::U64 => unsigned(tv, storage, u64::MAX).map(Value::U64),
            StorageKind::F32 => tv
                .as_f64()
                .map(|v| Value::F32(v as f32))
                .ok_or_else(|| mismatch(storage.name(), tv)),
            StorageKind::F64 => tv
                .as_f64()
                .map(Value::F64)
                .ok_or_else(|| mismatch(storage.name(), tv)),
            StorageKind::Str => match tv {
                TextValue::Str(s) => Ok(Value::Str(s.clone())),
                other => Err(mismatch(storage.name(), other)),
            },
            StorageKind::Enum(id) => {
                let e = self.lib.enum_by_id(id)?;
                match tv {
                    TextValue::Str(name) if e.variant(name).is_some() => {
                        Ok(Value::Enum(name.clone()))
                    }
                    TextValue::Str(name) => Err(Error::InvalidEnumValue {
                        enum_name: e.name.clone(),
                        value: name.clone(),
                    }),
                    other => Err(mismatch("enum variant name", other)),
                }
            }
            StorageKind::Bitfield { bits, .. } => {
                let max = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                let v = tv.as_u64().ok_or_else(|| mismatch(storage.name(), tv))?;
                if v > max {
                    return Err(Error::MalformedText(format!(
                        "{} does not fit a {}-bit field",
                        v, bits
                    )));
                }
                Ok(Value::Bits(v))
            }
            StorageKind::Struct(id) => {
                let ty = self.lib.type_by_id(id)?.clone();
                self.parse_struct(&ty, as_object(tv, &ty.name)?)
            }
        }
    }
}

fn signed(tv: &TextValue, storage: StorageKind, min: i64, max: i64) -> Result<i64> {
    let v = tv.as_i64().ok_or_else(|| mismatch(storage.name(), tv))?;
    if v < min || v > max {
        return Err(Error::MalformedText(format!(
            "{} out of range for {}",
            v,
            storage.name()
        )));
    }
    Ok(v)
}

fn unsigned(tv: &TextValue, storage: StorageKind, max: u64) -> Result<u64> {
    let v = tv.as_u64().ok_or_else(|| mismatch(storage.name(), tv))?;
    if v > max {
        return Err(Error::MalformedText(format!(
            "{} out of range for {}",
            v,
            storage.name()
        )));
    }
    Ok(v)
}

fn mismatch(expected: &str, found: &TextValue) -> Error {
    Error::TypeMismatch {
        expected: expected.to_string(),
        found: found.kind_name().to_string(),
    }
}

/// Render a value graph as its textual instance description, members in
/// type-declared order.
pub(crate) fn render_instance(
    lib: &TypeLibrary,
    ty: &TypeDescriptor,
    instance: &Instance,
) -> Result<String> {
    let renderer = Renderer { lib };
    let data = renderer.render_struct(ty, &instance.root)?;

    let mut root = serde_json::Map::new();
    root.insert("type".to_string(), serde_json::Value::String(ty.name.clone()));
    root.insert("data".to_string(), data);
    let mut doc = serde_json::Map::new();
    doc.insert("root".to_string(), serde_json::Value::Object(root));
    serde_json::to_string_pretty(&serde_json::Value::Object(doc))
        .map_err(|e| Error::Internal(format!("render failed: {}", e)))
}

struct Renderer<'a> {
    lib: &'a TypeLibrary,
}

impl Renderer<'_> {
    fn render_struct(&self, ty: &TypeDescriptor, value: &Value) -> Result<serde_json::Value> {
        let members = match value {
            Value::Struct(members) if members.len() == ty.members.len() => members,
            other => {
                return Err(Error::TypeMismatch {
                    expected: format!("{} struct value", ty.name),
                    found: other.kind_name().to_string(),
                })
            }
        };
        let mut out = serde_json::Map::new();
        for (member, value) in ty.members.iter().zip(members) {
            out.insert(member.name.clone(), self.render_member(member, value)?);
        }
        Ok(serde_json::Value::Object(out))
    }

    fn render_member(&self, member: &MemberDescriptor, value: &Value) -> Result<serde_json::Value> {
        match member.atom {
            AtomKind::Scalar => self.render_scalar(member.storage, value),
            AtomKind::InlineArray(_) | AtomKind::DynamicArray => match value {
                Value::Array(elems) => Ok(serde_json::Value::Array(
                    elems
                        .iter()
                        .map(|e| self.render_scalar(member.storage, e))
                        .collect::<Result<_>>()?,
                )),
                other => Err(Error::TypeMismatch {
                    expected: "array".to_string(),
                    found: other.kind_name().to_string(),
                }),
            },
            AtomKind::Pointer => match value {
                Value::Ptr(None) => Ok(serde_json::Value::Null),
                Value::Ptr(Some(_)) => {
                    Err(Error::Unsupported("non-null pointer in a textual instance"))
                }
                other => Err(Error::TypeMismatch {
                    expected: "pointer".to_string(),
                    found: other.kind_name().to_string(),
                }),
            },
        }
    }

    fn render_scalar(&self, storage: StorageKind, value: &Value) -> Result<serde_json::Value> {
        let json = match (storage, value) {
            (StorageKind::I8, Value::I8(v)) => serde_json::Value::from(*v),
            (StorageKind::I16, Value::I16(v)) => serde_json::Value::from(*v),
            (StorageKind::I32, Value::I32(v)) => serde_json::Value::from(*v),
            (StorageKind::I64, Value::I64(v)) => serde_json::Value::from(*v),
            (StorageKind::U8, Value::U8(v)) => serde_json::Value::from(*v),
            (StorageKind::U16, Value::U16(v)) => serde_json::Value::from(*v),
            (StorageKind::U32, Value::U32(v)) => serde_json::Value::from(*v),
            (StorageKind::U64, Value::U64(v)) => serde_json::Value::from(*v),
            (StorageKind::F32, Value::F32(v)) => float_json(*v as f64)?,
            (StorageKind::F64, Value::F64(v)) => float_json(*v)?,
            (StorageKind::Str, Value::Str(s)) => serde_json::Value::String(s.clone()),
            (StorageKind::Enum(_), Value::Enum(name)) => serde_json::Value::String(name.clone()),
            (StorageKind::Bitfield { .. }, Value::Bits(v)) => serde_json::Value::from(*v),
            (StorageKind::Struct(id), value @ Value::Struct(_)) => {
                let ty = self.lib.type_by_id(id)?;
                self.render_struct(ty, value)?
            }
            (storage, value) => {
                return Err(Error::TypeMismatch {
                    expected: storage.name().to_string(),
                    found: value.kind_name().to_string(),
                })
            }
        };
        Ok(json)
    }
}

fn float_json(v: f64) -> Result<serde_json::Value> {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .ok_or_else(|| Error::Unsupported("non-finite float in a textual instance"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{EnumBuilder, MemberKind, TypeBuilder, TypeLibraryBuilder};
    use crate::descriptor::UintKind;

    fn lib() -> TypeLibrary {
        let mut b = TypeLibraryBuilder::new();
        b.add_enum(EnumBuilder::new("Mode").variant("OFF").variant("ON")).unwrap();
        b.add_type(
            TypeBuilder::new("Inner")
                .member("x", MemberKind::U16)
                .member("y", MemberKind::U16),
        )
        .unwrap();
        b.add_type(
            TypeBuilder::new("Outer")
                .member("n", MemberKind::I32)
                .member("s", MemberKind::Str)
                .member("inner", MemberKind::Struct("Inner".into()))
                .member("mode", MemberKind::Enum("Mode".into()))
                .bitfield("flags", UintKind::U32, 5)
                .inline_array("fixed", MemberKind::U8, 3)
                .array("arr", MemberKind::F32)
                .pointer("p", "Inner"),
        )
        .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn parse_builds_the_value_graph() {
        let lib = lib();
        let text = r#"{"root": {"type": "Outer", "data": {
            "n": -4, "s": "hi", "inner": {"x": 1, "y": 2}, "mode": "ON",
            "flags": 21, "fixed": [7, 8, 9], "arr": [0.5, 1.5], "p": null
        }}}"#;
        let (root, instance) = parse_instance(&lib, text).unwrap();
        assert_eq!(root, lib.type_by_name("Outer").unwrap().id);
        assert_eq!(
            instance.root,
            Value::Struct(vec![
                Value::I32(-4),
                Value::Str("hi".into()),
                Value::Struct(vec![Value::U16(1), Value::U16(2)]),
                Value::Enum("ON".into()),
                Value::Bits(21),
                Value::Array(vec![Value::U8(7), Value::U8(8), Value::U8(9)]),
                Value::Array(vec![Value::F32(0.5), Value::F32(1.5)]),
                Value::Ptr(None),
            ])
        );
    }

    #[test]
    fn member_order_in_text_does_not_matter() {
        let lib = lib();
        let a = r#"{"root": {"type": "Inner", "data": {"x": 1, "y": 2}}}"#;
        let b = r#"{"root": {"type": "Inner", "data": {"y": 2, "x": 1}}}"#;
        assert_eq!(parse_instance(&lib, a).unwrap(), parse_instance(&lib, b).unwrap());
    }

    #[test]
    fn duplicate_member_is_set_twice() {
        let lib = lib();
        let text = r#"{"root": {"type": "Inner", "data": {"x": 1, "x": 2, "y": 3}}}"#;
        assert!(matches!(
            parse_instance(&lib, text).unwrap_err(),
            Error::MemberSetTwice { .. }
        ));
    }

    #[test]
    fn unknown_member_is_not_found() {
        let lib = lib();
        let text = r#"{"root": {"type": "Inner", "data": {"x": 1, "y": 2, "z": 3}}}"#;
        assert!(matches!(
            parse_instance(&lib, text).unwrap_err(),
            Error::MemberNotFound { .. }
        ));
    }

    #[test]
    fn missing_member_without_default_fails() {
        let lib = lib();
        let text = r#"{"root": {"type": "Inner", "data": {"x": 1}}}"#;
        let err = parse_instance(&lib, text).unwrap_err();
        match err {
            Error::MemberMissing { type_name, member } => {
                assert_eq!(type_name, "Inner");
                assert_eq!(member, "y");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn defaults_fill_unassigned_members() {
        let mut b = TypeLibraryBuilder::new();
        b.add_type(TypeBuilder::new("Leaf").member("v", MemberKind::U32)).unwrap();
        b.add_type(
            TypeBuilder::new("D")
                .member("n", MemberKind::U32)
                .with_default(13u32)
                .member("s", MemberKind::Str)
                .with_default("fallback")
                .inline_array("fixed", MemberKind::I8, 2)
                .with_default(vec![1i8, 2i8])
                .array("arr", MemberKind::U16)
                .with_default(Vec::<u16>::new())
                .pointer("p", "Leaf")
                .with_default(Value::Ptr(None)),
        )
        .unwrap();
        let lib = b.build().unwrap();

        let (_, instance) = parse_instance(&lib, r#"{"root": {"type": "D", "data": {}}}"#).unwrap();
        assert_eq!(
            instance.root,
            Value::Struct(vec![
                Value::U32(13),
                Value::Str("fallback".into()),
                Value::Array(vec![Value::I8(1), Value::I8(2)]),
                Value::Array(vec![]),
                Value::Ptr(None),
            ])
        );
    }

    #[test]
    fn inline_count_must_match() {
        let lib = lib();
        let text = r#"{"root": {"type": "Outer", "data": {
            "n": 0, "s": "", "inner": {"x": 0, "y": 0}, "mode": "OFF",
            "flags": 0, "fixed": [1, 2], "arr": [], "p": null
        }}}"#;
        assert!(matches!(
            parse_instance(&lib, text).unwrap_err(),
            Error::TypeMismatch { .. }
        ));
    }

    #[test]
    fn bad_enum_and_range_rejected() {
        let lib = lib();
        let bad_enum = r#"{"root": {"type": "Outer", "data": {
            "n": 0, "s": "", "inner": {"x": 0, "y": 0}, "mode": "HALF",
            "flags": 0, "fixed": [1, 2, 3], "arr": [], "p": null
        }}}"#;
        assert!(matches!(
            parse_instance(&lib, bad_enum).unwrap_err(),
            Error::InvalidEnumValue { .. }
        ));

        let bad_bits = r#"{"root": {"type": "Outer", "data": {
            "n": 0, "s": "", "inner": {"x": 0, "y": 0}, "mode": "OFF",
            "flags": 32, "fixed": [1, 2, 3], "arr": [], "p": null
        }}}"#;
        assert!(matches!(
            parse_instance(&lib, bad_bits).unwrap_err(),
            Error::MalformedText(_)
        ));
    }

    #[test]
    fn render_uses_declared_member_order() {
        let lib = lib();
        let text = r#"{"root": {"type": "Outer", "data": {
            "p": null, "arr": [2.5], "fixed": [1, 2, 3], "flags": 3,
            "mode": "ON", "inner": {"y": 2, "x": 1}, "s": "hey", "n": 10
        }}}"#;
        let (root, instance) = parse_instance(&lib, text).unwrap();
        let ty = lib.type_by_id(root).unwrap().clone();
        let out = render_instance(&lib, &ty, &instance).unwrap();

        let declared = ["\"n\"", "\"s\"", "\"inner\"", "\"mode\"", "\"flags\"", "\"fixed\"", "\"arr\"", "\"p\""];
        let positions: Vec<usize> = declared.iter().map(|k| out.find(k).unwrap()).collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted, "members must render in declared order");
    }

    #[test]
    fn text_round_trip_preserves_values() {
        let lib = lib();
        let text = r#"{"root": {"type": "Outer", "data": {
            "n": -4, "s": "hi", "inner": {"x": 1, "y": 2}, "mode": "ON",
            "flags": 21, "fixed": [7, 8, 9], "arr": [0.5, 1.5], "p": null
        }}}"#;
        let (root, instance) = parse_instance(&lib, text).unwrap();
        let ty = lib.type_by_id(root).unwrap().clone();
        let rendered = render_instance(&lib, &ty, &instance).unwrap();
        let (root2, instance2) = parse_instance(&lib, &rendered).unwrap();
        assert_eq!(root, root2);
        assert_eq!(instance, instance2);
    }

    #[test]
    fn duplicate_root_key_rejected() {
        let lib = lib();
        let text = r#"{"root": {"type": "Inner", "data": {"x": 1, "y": 2}}, "root": {"type": "Inner", "data": {}}}"#;
        assert!(matches!(
            parse_instance(&lib, text).unwrap_err(),
            Error::MalformedText(_)
        ));
    }
}
