// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pointer-bearing instances: shared identity, chains, cycles and the
//! conversion of blobs whose layout is dominated by pointer slots.

use typeblob::{
    ByteOrder, Instance, MemberKind, PtrWidth, TypeBuilder, TypeLibrary, TypeLibraryBuilder, Value,
};

fn other_width(w: PtrWidth) -> PtrWidth {
    match w {
        PtrWidth::W32 => PtrWidth::W64,
        PtrWidth::W64 => PtrWidth::W32,
    }
}

fn store(lib: &TypeLibrary, name: &str, instance: &Instance) -> Vec<u8> {
    let ty = lib.type_by_name(name).unwrap();
    let size = lib.instance_size(ty.id, instance).unwrap();
    let mut blob = vec![0u8; size];
    lib.store(ty.id, instance, &mut blob).unwrap();
    blob
}

/// Endian and width round trips must be byte-exact for pointer graphs too.
fn convert_round_trip(lib: &TypeLibrary, blob: &[u8]) {
    let mut tmp = blob.to_vec();
    lib.convert_inplace(&mut tmp, ByteOrder::NATIVE.swapped(), PtrWidth::HOST)
        .unwrap();
    lib.convert_inplace(&mut tmp, ByteOrder::NATIVE, PtrWidth::HOST)
        .unwrap();
    assert_eq!(tmp, blob);

    let target = other_width(PtrWidth::HOST);
    let size = lib.convert_size(blob, target).unwrap();
    let mut converted = vec![0u8; size];
    lib.convert(blob, &mut converted, ByteOrder::NATIVE, target).unwrap();
    let mut back = vec![0u8; blob.len()];
    lib.convert(&converted, &mut back, ByteOrder::NATIVE, PtrWidth::HOST)
        .unwrap();
    assert_eq!(back, blob);
}

fn ptr_library() -> TypeLibrary {
    let mut b = TypeLibraryBuilder::new();
    b.add_type(
        TypeBuilder::new("Pod2")
            .member("a", MemberKind::I32)
            .member("b", MemberKind::I32),
    )
    .unwrap();
    b.add_type(
        TypeBuilder::new("SimplePtr")
            .pointer("ptr1", "Pod2")
            .pointer("ptr2", "Pod2"),
    )
    .unwrap();
    b.add_type(
        TypeBuilder::new("PtrChain")
            .member("val", MemberKind::U32)
            .pointer("next", "PtrChain"),
    )
    .unwrap();
    b.build().unwrap()
}

#[test]
fn shared_pointers_load_to_one_address() {
    let lib = ptr_library();
    let mut inst = Instance::new(Value::Struct(vec![]));
    let pod = inst.add_object(Value::Struct(vec![Value::I32(1), Value::I32(2)]));
    inst.root = Value::Struct(vec![Value::Ptr(Some(pod)), Value::Ptr(Some(pod))]);

    let blob = store(&lib, "SimplePtr", &inst);
    convert_round_trip(&lib, &blob);

    let view = lib.load(&blob).unwrap();
    let root = view.root();
    let p1 = root.ptr_address("ptr1").unwrap().unwrap();
    let p2 = root.ptr_address("ptr2").unwrap().unwrap();
    assert_eq!(p1, p2, "one source object, one loaded address");
    let target = root.ptr("ptr1").unwrap().unwrap();
    assert_eq!(target.scalar("a").unwrap(), Value::I32(1));
    assert_eq!(target.scalar("b").unwrap(), Value::I32(2));
}

#[test]
fn pointer_chain_loads_in_order() {
    let lib = ptr_library();
    let mut inst = Instance::new(Value::Struct(vec![]));
    let deep = inst.add_object(Value::Struct(vec![Value::U32(1337), Value::Ptr(None)]));
    let mid = inst.add_object(Value::Struct(vec![Value::U32(1024), Value::Ptr(Some(deep))]));
    inst.root = Value::Struct(vec![Value::U32(512), Value::Ptr(Some(mid))]);

    let blob = store(&lib, "PtrChain", &inst);
    convert_round_trip(&lib, &blob);

    let view = lib.load(&blob).unwrap();
    let mid_ref = view.root().ptr("next").unwrap().unwrap();
    let deep_ref = mid_ref.ptr("next").unwrap().unwrap();
    assert_eq!(view.root().scalar("val").unwrap(), Value::U32(512));
    assert_eq!(mid_ref.scalar("val").unwrap(), Value::U32(1024));
    assert_eq!(deep_ref.scalar("val").unwrap(), Value::U32(1337));
    assert!(deep_ref.ptr("next").unwrap().is_none());
}

#[test]
fn circular_chain_loads_without_recursing_forever() {
    let lib = ptr_library();
    let mut inst = Instance::new(Value::Struct(vec![]));
    let first = inst.add_object(Value::Ptr(None));
    let second = inst.add_object(Value::Struct(vec![Value::U32(2), Value::Ptr(Some(first))]));
    inst.set_object(first, Value::Struct(vec![Value::U32(1), Value::Ptr(Some(second))]));
    inst.root = Value::Struct(vec![Value::U32(0), Value::Ptr(Some(first))]);

    let blob = store(&lib, "PtrChain", &inst);
    convert_round_trip(&lib, &blob);

    let view = lib.load(&blob).unwrap();
    let first_ref = view.root().ptr("next").unwrap().unwrap();
    let second_ref = first_ref.ptr("next").unwrap().unwrap();
    assert_eq!(second_ref.ptr_address("next").unwrap(), Some(first_ref.address()));
    assert_eq!(first_ref.scalar("val").unwrap(), Value::U32(1));
    assert_eq!(second_ref.scalar("val").unwrap(), Value::U32(2));
}

#[test]
fn unpack_preserves_sharing_topology() {
    let lib = ptr_library();
    let mut inst = Instance::new(Value::Struct(vec![]));
    let pod = inst.add_object(Value::Struct(vec![Value::I32(7), Value::I32(8)]));
    inst.root = Value::Struct(vec![Value::Ptr(Some(pod)), Value::Ptr(Some(pod))]);

    let blob = store(&lib, "SimplePtr", &inst);
    let (_, out) = lib.unpack(&blob).unwrap();
    let Value::Struct(members) = &out.root else { panic!("root must be a struct") };
    assert_eq!(members[0], members[1], "sharing must survive unpack");
    assert_eq!(out.objects().len(), 1);
}

#[test]
fn inline_array_of_pointer_bearing_structs() {
    let mut b = TypeLibraryBuilder::new();
    b.add_type(TypeBuilder::new("Leaf").member("v", MemberKind::U32)).unwrap();
    b.add_type(TypeBuilder::new("Holder").pointer("p", "Leaf")).unwrap();
    b.add_type(
        TypeBuilder::new("Grid")
            .inline_array("cells", MemberKind::Struct("Holder".into()), 3),
    )
    .unwrap();
    let lib = b.build().unwrap();

    let mut inst = Instance::new(Value::Struct(vec![]));
    let l1 = inst.add_object(Value::Struct(vec![Value::U32(10)]));
    let l2 = inst.add_object(Value::Struct(vec![Value::U32(20)]));
    inst.root = Value::Struct(vec![Value::Array(vec![
        Value::Struct(vec![Value::Ptr(Some(l1))]),
        Value::Struct(vec![Value::Ptr(None)]),
        Value::Struct(vec![Value::Ptr(Some(l2))]),
    ])]);

    let blob = store(&lib, "Grid", &inst);
    convert_round_trip(&lib, &blob);

    let view = lib.load(&blob).unwrap();
    let root = view.root();
    let c0 = root.elem_struct("cells", 0).unwrap();
    let c1 = root.elem_struct("cells", 1).unwrap();
    let c2 = root.elem_struct("cells", 2).unwrap();
    assert_eq!(c0.ptr("p").unwrap().unwrap().scalar("v").unwrap(), Value::U32(10));
    assert!(c1.ptr("p").unwrap().is_none());
    assert_eq!(c2.ptr("p").unwrap().unwrap().scalar("v").unwrap(), Value::U32(20));
}

#[test]
fn dynamic_array_of_pointer_bearing_structs() {
    let mut b = TypeLibraryBuilder::new();
    b.add_type(TypeBuilder::new("Leaf").member("v", MemberKind::U32)).unwrap();
    b.add_type(TypeBuilder::new("Holder").pointer("p", "Leaf")).unwrap();
    b.add_type(TypeBuilder::new("List").array("cells", MemberKind::Struct("Holder".into())))
        .unwrap();
    let lib = b.build().unwrap();

    let mut inst = Instance::new(Value::Struct(vec![]));
    let shared = inst.add_object(Value::Struct(vec![Value::U32(99)]));
    inst.root = Value::Struct(vec![Value::Array(vec![
        Value::Struct(vec![Value::Ptr(Some(shared))]),
        Value::Struct(vec![Value::Ptr(Some(shared))]),
    ])]);

    let blob = store(&lib, "List", &inst);
    convert_round_trip(&lib, &blob);

    let view = lib.load(&blob).unwrap();
    let root = view.root();
    let a = root.elem_struct("cells", 0).unwrap().ptr_address("p").unwrap().unwrap();
    let b2 = root.elem_struct("cells", 1).unwrap().ptr_address("p").unwrap().unwrap();
    assert_eq!(a, b2, "elements share one target after load");
}

#[test]
fn load_rejects_foreign_layout() {
    let lib = ptr_library();
    let inst = Instance::new(Value::Struct(vec![Value::U32(1), Value::Ptr(None)]));
    let blob = store(&lib, "PtrChain", &inst);

    let mut other = vec![0u8; blob.len()];
    let n = lib
        .convert(&blob, &mut other, ByteOrder::NATIVE.swapped(), PtrWidth::HOST)
        .unwrap();
    assert!(matches!(
        lib.load(&other[..n]),
        Err(typeblob::Error::ByteOrderMismatch)
    ));

    let target = other_width(PtrWidth::HOST);
    let size = lib.convert_size(&blob, target).unwrap();
    let mut narrow = vec![0u8; size];
    lib.convert(&blob, &mut narrow, ByteOrder::NATIVE, target).unwrap();
    assert!(matches!(
        lib.load(&narrow),
        Err(typeblob::Error::PtrWidthMismatch)
    ));
}
