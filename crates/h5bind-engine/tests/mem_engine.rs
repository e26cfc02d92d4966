//! Integration tests for the in-memory engine: file modes, link paths,
//! dataset and attribute transfers with conversion, variable-length
//! payload ownership, extents and error reporting.

use h5bind_engine::{
    CreateDisposition, Dataspace, Datatype, Engine, FileMode, HandleKind, Hid, MemEngine, Minor,
    ObjectKind, PlistClass, Property, StringOverflow, VarLenRef, UNLIMITED,
};

fn f64_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

fn bytes_f64(raw: &[u8]) -> Vec<f64> {
    raw.chunks_exact(8)
        .map(|c| f64::from_ne_bytes(c.try_into().unwrap()))
        .collect()
}

fn quiet() -> MemEngine {
    let engine = MemEngine::new();
    engine.set_error_printing(false);
    engine
}

/// Create a 1-D dataset of `n` f64 values under `name`.
fn f64_dataset(engine: &MemEngine, loc: Hid, name: &str, n: u64) -> Hid {
    let t = engine.type_create(&Datatype::float(8)).unwrap();
    let s = engine.space_create(&Dataspace::simple(&[n])).unwrap();
    let ds = engine
        .dataset_create(loc, name, t, s, None, None, None)
        .unwrap();
    engine.close(t).unwrap();
    engine.close(s).unwrap();
    ds
}

// ---------------------------------------------------------------------------
// 1. Files
// ---------------------------------------------------------------------------

#[test]
fn create_modes() {
    let engine = quiet();
    let f = engine
        .file_create("a.h5", CreateDisposition::Exclusive, None, None)
        .unwrap();
    let err = engine
        .file_create("a.h5", CreateDisposition::Exclusive, None, None)
        .unwrap_err();
    assert_eq!(err.minor, Minor::CantOpen);

    // truncating an open file is refused
    let err = engine
        .file_create("a.h5", CreateDisposition::Truncate, None, None)
        .unwrap_err();
    assert_eq!(err.minor, Minor::CantOpen);
    engine.close(f).unwrap();

    let f = engine
        .file_create("a.h5", CreateDisposition::Truncate, None, None)
        .unwrap();
    assert_eq!(engine.handle_kind(f).unwrap(), HandleKind::File);
    assert_eq!(engine.object_name(f).unwrap(), "a.h5");
    engine.file_flush(f).unwrap();
    assert_eq!(engine.flush_count(), 1);
    engine.close(f).unwrap();
    assert_eq!(engine.open_handles(), 0);
    assert_eq!(engine.file_names(), vec!["a.h5".to_string()]);
}

#[test]
fn open_missing_file_fails() {
    let engine = quiet();
    let err = engine
        .file_open("missing.h5", FileMode::ReadOnly, None)
        .unwrap_err();
    assert_eq!(err.minor, Minor::CantOpen);
    assert!(!engine.file_exists("missing.h5"));
    let stack = engine.take_error_stack();
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].function, "file_open");
}

#[test]
fn read_only_files_refuse_writes() {
    let engine = quiet();
    let f = engine
        .file_create("ro.h5", CreateDisposition::Truncate, None, None)
        .unwrap();
    let ds = f64_dataset(&engine, f, "x", 2);
    engine.close(ds).unwrap();
    engine.close(f).unwrap();

    let f = engine.file_open("ro.h5", FileMode::ReadOnly, None).unwrap();
    let err = engine.group_create(f, "g", None, None).unwrap_err();
    assert_eq!(err.minor, Minor::ReadOnly);

    let ds = engine.dataset_open(f, "x", None).unwrap();
    let t = engine.type_create(&Datatype::float(8)).unwrap();
    let err = engine
        .dataset_write(ds, t, &f64_bytes(&[1.0, 2.0]), None)
        .unwrap_err();
    assert_eq!(err.minor, Minor::ReadOnly);
    let mut buf = vec![0u8; 16];
    engine.dataset_read(ds, t, &mut buf, None).unwrap();
    assert_eq!(bytes_f64(&buf), vec![0.0, 0.0]);
    for id in [t, ds, f] {
        engine.close(id).unwrap();
    }
}

// ---------------------------------------------------------------------------
// 2. Links and groups
// ---------------------------------------------------------------------------

#[test]
fn groups_links_and_intermediate_creation() {
    let engine = quiet();
    let f = engine
        .file_create("links.h5", CreateDisposition::Truncate, None, None)
        .unwrap();

    let err = engine.group_create(f, "a/b", None, None).unwrap_err();
    assert_eq!(err.minor, Minor::NotFound);

    let lcpl = engine.plist_create(PlistClass::LinkCreate).unwrap();
    engine
        .plist_set(lcpl, &Property::CreateIntermediateGroup(true))
        .unwrap();
    let g = engine.group_create(f, "a/b", Some(lcpl), None).unwrap();
    assert_eq!(engine.object_name(g).unwrap(), "/a/b");
    assert!(engine.link_exists(f, "/a").unwrap());
    assert!(!engine.link_exists(f, "/nope/deeper").unwrap());

    let ds = f64_dataset(&engine, g, "data", 3);
    assert_eq!(engine.link_kind(f, "a/b/data").unwrap(), ObjectKind::Dataset);
    assert_eq!(engine.link_names(g).unwrap(), vec!["data".to_string()]);

    engine.link_move(f, "a/b/data", "moved", None).unwrap();
    assert!(!engine.link_exists(g, "data").unwrap());
    // open handles follow the object, not the path
    assert_eq!(engine.object_name(ds).unwrap(), "/moved");

    engine.link_delete(f, "moved").unwrap();
    assert!(!engine.link_exists(f, "moved").unwrap());
    let err = engine.link_delete(f, "moved").unwrap_err();
    assert_eq!(err.minor, Minor::NotFound);

    // a dataset is not a group
    let ds2 = f64_dataset(&engine, f, "d2", 1);
    assert!(engine.group_open(f, "d2").is_err());
    assert!(engine.group_create(ds2, "x", None, None).is_err());

    for id in [ds2, ds, g, lcpl, f] {
        engine.close(id).unwrap();
    }
    assert_eq!(engine.open_handles(), 0);
}

#[test]
fn committed_datatypes_and_references() {
    let engine = quiet();
    let f = engine
        .file_create("refs.h5", CreateDisposition::Truncate, None, None)
        .unwrap();
    let t = engine.type_create(&Datatype::integer(2, false)).unwrap();
    engine.type_commit(f, "u16_t", t).unwrap();
    let opened = engine.type_open(f, "u16_t").unwrap();
    assert_eq!(
        engine.type_describe(opened).unwrap(),
        Datatype::integer(2, false)
    );
    assert_eq!(engine.link_kind(f, "u16_t").unwrap(), ObjectKind::Datatype);

    let ds = f64_dataset(&engine, f, "target", 1);
    let addr = engine.reference_create(f, "target").unwrap();
    let reopened = engine.reference_open(f, addr).unwrap();
    assert_eq!(engine.handle_kind(reopened).unwrap(), HandleKind::Dataset);
    assert_eq!(engine.object_name(reopened).unwrap(), "/target");
    assert!(engine.reference_open(f, 0).is_err());
    assert!(engine.reference_open(f, 9999).is_err());

    for id in [reopened, ds, opened, t, f] {
        engine.close(id).unwrap();
    }
}

// ---------------------------------------------------------------------------
// 3. Transfers
// ---------------------------------------------------------------------------

#[test]
fn write_read_with_conversion() {
    let engine = quiet();
    let f = engine
        .file_create("conv.h5", CreateDisposition::Truncate, None, None)
        .unwrap();
    let ds = f64_dataset(&engine, f, "x", 3);

    let i32_t = engine.type_create(&Datatype::integer(4, true)).unwrap();
    let src: Vec<u8> = [1i32, 2, 3].iter().flat_map(|v| v.to_ne_bytes()).collect();
    engine.dataset_write(ds, i32_t, &src, None).unwrap();

    let f64_t = engine.type_create(&Datatype::float(8)).unwrap();
    let mut buf = vec![0u8; 24];
    engine.dataset_read(ds, f64_t, &mut buf, None).unwrap();
    assert_eq!(bytes_f64(&buf), vec![1.0, 2.0, 3.0]);

    // wrong buffer size
    let err = engine
        .dataset_read(ds, f64_t, &mut [0u8; 16], None)
        .unwrap_err();
    assert_eq!(err.minor, Minor::ShapeMismatch);

    // lossy float -> int fails and leaves the data untouched
    engine
        .dataset_write(ds, f64_t, &f64_bytes(&[0.5, 1.0, 2.0]), None)
        .unwrap();
    let u8_t = engine.type_create(&Datatype::integer(1, false)).unwrap();
    let err = engine
        .dataset_read(ds, u8_t, &mut [0u8; 3], None)
        .unwrap_err();
    assert_eq!(err.minor, Minor::Overflow);

    let str_t = engine.type_create(&Datatype::var_len_string()).unwrap();
    let err = engine
        .dataset_read(ds, str_t, &mut [0u8; 48], None)
        .unwrap_err();
    assert_eq!(err.minor, Minor::NoConversionPath);

    for id in [str_t, u8_t, f64_t, i32_t, ds, f] {
        engine.close(id).unwrap();
    }
}

#[test]
fn fixed_length_strings_follow_transfer_policy() {
    let engine = quiet();
    let f = engine
        .file_create("str.h5", CreateDisposition::Truncate, None, None)
        .unwrap();
    let file_t = engine.type_create(&Datatype::fixed_string(10)).unwrap();
    let space = engine.space_create(&Dataspace::simple(&[2])).unwrap();
    let ds = engine
        .dataset_create(f, "s", file_t, space, None, None, None)
        .unwrap();

    let mem_t = engine.type_create(&Datatype::var_len_string()).unwrap();
    let mut buf = vec![0u8; 32];
    engine
        .vlen_alloc(b"abcabcabcabcabc")
        .unwrap()
        .encode(&mut buf[0..16]);
    engine
        .vlen_alloc(b"123123123123123")
        .unwrap()
        .encode(&mut buf[16..32]);

    let err = engine.dataset_write(ds, mem_t, &buf, None).unwrap_err();
    assert_eq!(err.minor, Minor::Truncated);

    let dxpl = engine.plist_create(PlistClass::DatasetTransfer).unwrap();
    engine
        .plist_set(dxpl, &Property::StringOverflow(StringOverflow::Truncate))
        .unwrap();
    engine.dataset_write(ds, mem_t, &buf, Some(dxpl)).unwrap();
    for slot in [VarLenRef::decode(&buf[0..16]), VarLenRef::decode(&buf[16..32])] {
        engine.vlen_free(slot).unwrap();
    }
    assert_eq!(engine.vlen_live(), 0);

    let mut out = vec![0u8; 32];
    engine.dataset_read(ds, mem_t, &mut out, None).unwrap();
    let first = VarLenRef::decode(&out[0..16]);
    let second = VarLenRef::decode(&out[16..32]);
    assert_eq!(engine.vlen_payload(first).unwrap(), b"abcabcabc");
    assert_eq!(engine.vlen_payload(second).unwrap(), b"123123123");
    assert_eq!(engine.vlen_live(), 2);
    engine.vlen_free(first).unwrap();
    engine.vlen_free(second).unwrap();
    assert_eq!(engine.vlen_free(first).unwrap_err().minor, Minor::InvalidFree);
    assert_eq!(engine.vlen_live(), 0);

    for id in [dxpl, mem_t, ds, space, file_t, f] {
        engine.close(id).unwrap();
    }
}

#[test]
fn attributes_on_groups_and_datasets() {
    let engine = quiet();
    let f = engine
        .file_create("attrs.h5", CreateDisposition::Truncate, None, None)
        .unwrap();
    let g = engine.group_create(f, "group1", None, None).unwrap();
    let t = engine.type_create(&Datatype::float(8)).unwrap();
    let s = engine.space_create(&Dataspace::simple(&[2])).unwrap();

    let a = engine.attr_create(g, "scale", t, s).unwrap();
    engine.attr_write(a, t, &f64_bytes(&[0.5, 4.0]), None).unwrap();
    let err = engine.attr_create(g, "scale", t, s).unwrap_err();
    assert_eq!(err.minor, Minor::AlreadyExists);
    assert!(engine.attr_exists(g, "scale").unwrap());
    assert_eq!(engine.attr_names(g).unwrap(), vec!["scale".to_string()]);

    let again = engine.attr_open(g, "scale").unwrap();
    let mut buf = vec![0u8; 16];
    engine.attr_read(again, t, &mut buf, None).unwrap();
    assert_eq!(bytes_f64(&buf), vec![0.5, 4.0]);
    let space = engine.attr_space(again).unwrap();
    assert_eq!(engine.space_describe(space).unwrap().dimensions, vec![2]);

    engine.attr_delete(g, "scale").unwrap();
    assert!(!engine.attr_exists(g, "scale").unwrap());
    let err = engine.attr_read(again, t, &mut buf, None).unwrap_err();
    assert_eq!(err.minor, Minor::NotFound);
    assert_eq!(engine.attr_open(g, "scale").unwrap_err().minor, Minor::NotFound);

    let ds = f64_dataset(&engine, f, "d", 1);
    let da = engine.attr_create(ds, "unit", t, s).unwrap();
    assert_eq!(engine.object_name(da).unwrap(), "unit");
    // file identifiers address the root group's attributes
    assert!(!engine.attr_exists(f, "unit").unwrap());

    for id in [da, ds, space, again, a, s, t, g, f] {
        engine.close(id).unwrap();
    }
}

// ---------------------------------------------------------------------------
// 4. Layout and extents
// ---------------------------------------------------------------------------

#[test]
fn extendible_dataset_resize() {
    let engine = quiet();
    let f = engine
        .file_create("ext.h5", CreateDisposition::Truncate, None, None)
        .unwrap();
    let t = engine.type_create(&Datatype::float(8)).unwrap();
    let s = engine
        .space_create(&Dataspace::simple(&[3]).with_max_dims(&[UNLIMITED]))
        .unwrap();

    let err = engine
        .dataset_create(f, "x", t, s, None, None, None)
        .unwrap_err();
    assert_eq!(err.minor, Minor::BadValue);

    let dcpl = engine.plist_create(PlistClass::DatasetCreate).unwrap();
    engine.plist_set(dcpl, &Property::Chunk(vec![2])).unwrap();
    engine.plist_set(dcpl, &Property::Deflate(6)).unwrap();
    let err = engine.plist_set(dcpl, &Property::Deflate(11)).unwrap_err();
    assert_eq!(err.minor, Minor::BadValue);
    let err = engine
        .plist_set(dcpl, &Property::CreateIntermediateGroup(true))
        .unwrap_err();
    assert_eq!(err.minor, Minor::BadValue);

    let ds = engine
        .dataset_create(f, "x", t, s, None, Some(dcpl), None)
        .unwrap();
    engine
        .dataset_write(ds, t, &f64_bytes(&[1.0, 2.0, 3.0]), None)
        .unwrap();
    engine.dataset_set_extent(ds, &[5]).unwrap();

    let space = engine.dataset_space(ds).unwrap();
    assert_eq!(engine.space_describe(space).unwrap().dimensions, vec![5]);
    let mut buf = vec![0u8; 40];
    engine.dataset_read(ds, t, &mut buf, None).unwrap();
    assert_eq!(bytes_f64(&buf), vec![1.0, 2.0, 3.0, 0.0, 0.0]);

    let readback = engine.dataset_create_plist(ds).unwrap();
    assert_eq!(
        engine.plist_get(readback).unwrap(),
        vec![Property::Chunk(vec![2]), Property::Deflate(6)]
    );

    // contiguous datasets cannot change extent
    let fixed = f64_dataset(&engine, f, "fixed", 2);
    let err = engine.dataset_set_extent(fixed, &[4]).unwrap_err();
    assert_eq!(err.minor, Minor::Unsupported);

    for id in [fixed, readback, space, ds, dcpl, s, t, f] {
        engine.close(id).unwrap();
    }
}

#[test]
fn oversized_extents_fail_without_side_effects() {
    let engine = quiet();
    let f = engine
        .file_create("big.h5", CreateDisposition::Truncate, None, None)
        .unwrap();

    let err = engine
        .space_create(&Dataspace::simple(&[1 << 62, 8]))
        .unwrap_err();
    assert_eq!(err.minor, Minor::BadValue);

    // the count fits in u64 but the bytes do not fit in memory
    let t = engine.type_create(&Datatype::float(8)).unwrap();
    let s = engine.space_create(&Dataspace::simple(&[1 << 61])).unwrap();
    let lcpl = engine.plist_create(PlistClass::LinkCreate).unwrap();
    engine
        .plist_set(lcpl, &Property::CreateIntermediateGroup(true))
        .unwrap();
    let err = engine
        .dataset_create(f, "a/b/huge", t, s, Some(lcpl), None, None)
        .unwrap_err();
    assert_eq!(err.minor, Minor::BadValue);
    assert!(!engine.link_exists(f, "a").unwrap());
    assert_eq!(engine.attr_create(f, "huge", t, s).unwrap_err().minor, Minor::BadValue);

    let err = engine.space_set_extents(s, &[u64::MAX, 3]).unwrap_err();
    assert_eq!(err.minor, Minor::BadValue);

    let ext = engine
        .space_create(&Dataspace::simple(&[1]).with_max_dims(&[UNLIMITED]))
        .unwrap();
    let dcpl = engine.plist_create(PlistClass::DatasetCreate).unwrap();
    engine.plist_set(dcpl, &Property::Chunk(vec![4])).unwrap();
    let ds = engine
        .dataset_create(f, "grow", t, ext, None, Some(dcpl), None)
        .unwrap();
    let err = engine.dataset_set_extent(ds, &[1 << 62]).unwrap_err();
    assert_eq!(err.minor, Minor::BadValue);
    let space = engine.dataset_space(ds).unwrap();
    assert_eq!(engine.space_describe(space).unwrap().dimensions, vec![1]);

    for id in [space, ds, dcpl, ext, lcpl, s, t, f] {
        engine.close(id).unwrap();
    }
    assert_eq!(engine.open_handles(), 0);
}

#[test]
fn shrinking_frees_dropped_payloads() {
    let engine = quiet();
    let f = engine
        .file_create("shrink.h5", CreateDisposition::Truncate, None, None)
        .unwrap();
    let t = engine.type_create(&Datatype::var_len_string()).unwrap();
    let s = engine
        .space_create(&Dataspace::simple(&[2]).with_max_dims(&[4]))
        .unwrap();
    let dcpl = engine.plist_create(PlistClass::DatasetCreate).unwrap();
    engine.plist_set(dcpl, &Property::Chunk(vec![1])).unwrap();
    let ds = engine
        .dataset_create(f, "names", t, s, None, Some(dcpl), None)
        .unwrap();

    let mut buf = vec![0u8; 32];
    let a = engine.vlen_alloc(b"alpha").unwrap();
    let b = engine.vlen_alloc(b"beta").unwrap();
    a.encode(&mut buf[..16]);
    b.encode(&mut buf[16..]);
    engine.dataset_write(ds, t, &buf, None).unwrap();
    engine.vlen_free(a).unwrap();
    engine.vlen_free(b).unwrap();

    engine.dataset_set_extent(ds, &[1]).unwrap();
    let err = engine.dataset_set_extent(ds, &[5]).unwrap_err();
    assert_eq!(err.minor, Minor::BadValue);

    let mut out = vec![0u8; 16];
    engine.dataset_read(ds, t, &mut out, None).unwrap();
    let slot = VarLenRef::decode(&out);
    assert_eq!(engine.vlen_payload(slot).unwrap(), b"alpha");
    engine.vlen_free(slot).unwrap();
    assert_eq!(engine.vlen_live(), 0);

    for id in [ds, dcpl, s, t, f] {
        engine.close(id).unwrap();
    }
}

// ---------------------------------------------------------------------------
// 5. Identifiers
// ---------------------------------------------------------------------------

#[test]
fn kind_checks_and_closed_identifiers() {
    let engine = quiet();
    let t = engine.type_create(&Datatype::float(8)).unwrap();
    assert!(engine.is_valid(t));
    assert_eq!(engine.space_describe(t).unwrap_err().minor, Minor::BadId);
    engine.close(t).unwrap();
    assert!(!engine.is_valid(t));
    assert_eq!(engine.close(t).unwrap_err().minor, Minor::BadId);
    assert_eq!(engine.type_describe(t).unwrap_err().minor, Minor::BadId);

    let err = engine
        .type_create(&Datatype::integer(3, true))
        .unwrap_err();
    assert_eq!(err.minor, Minor::BadValue);
    assert_eq!(engine.open_handles(), 0);
}
