//! Records and enumerations mapped with `#[derive(H5Type)]`.
#![cfg(feature = "derive")]

use std::sync::Arc;

use h5bind::engine::{Datatype, VarLenRef};
use h5bind::{
    AttributeOwner, Engine, Error, File, H5Type, Location, MemEngine, OpenMode, VlenSource,
};

fn file() -> (Arc<MemEngine>, File) {
    let mem = Arc::new(MemEngine::new());
    let engine: Arc<dyn Engine> = mem.clone();
    let file = File::open_in(&engine, "derive.h5", OpenMode::Truncate).unwrap();
    (mem, file)
}

#[derive(H5Type, Debug, Clone, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

#[derive(H5Type, Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
enum Color {
    Red = 1,
    Green = 2,
    #[h5bind(name = "BLUE")]
    Blue = 4,
}

#[derive(H5Type, Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
enum Primary {
    Red = 1,
    Green = 2,
}

#[derive(H5Type, Debug, Clone, PartialEq)]
struct Marker {
    id: u16,
    #[h5bind(name = "where")]
    position: Point,
    color: Color,
    label: String,
}

fn markers() -> Vec<Marker> {
    vec![
        Marker {
            id: 1,
            position: Point { x: 0.5, y: -1.0 },
            color: Color::Green,
            label: "origin".into(),
        },
        Marker {
            id: 9,
            position: Point { x: 3.0, y: 4.0 },
            color: Color::Blue,
            label: String::new(),
        },
    ]
}

struct NoPayloads;

impl VlenSource for NoPayloads {
    fn load(&mut self, _slot: VarLenRef) -> h5bind::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[test]
fn record_members_are_packed_in_declaration_order() {
    let Datatype::Compound { size, members } = Marker::type_descriptor().unwrap() else {
        panic!("expected a compound");
    };
    let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["id", "where", "color", "label"]);
    let offsets: Vec<u64> = members.iter().map(|m| m.byte_offset).collect();
    assert_eq!(offsets[..3], [0, 2, 18]);
    assert_eq!(u64::from(size), 19 + u64::from(members[3].datatype.type_size()));
}

#[test]
fn enum_members_carry_their_discriminants() {
    let Datatype::Enumeration { base_type, members } = Color::type_descriptor().unwrap() else {
        panic!("expected an enumeration");
    };
    assert_eq!(*base_type, Datatype::integer(1, false));
    let pairs: Vec<(&str, i64)> = members.iter().map(|m| (m.name.as_str(), m.value)).collect();
    assert_eq!(pairs, [("Red", 1), ("Green", 2), ("BLUE", 4)]);
}

#[test]
fn descriptors_are_cached_per_type() {
    assert_eq!(Point::type_descriptor().unwrap(), Point::type_descriptor().unwrap());
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

#[test]
fn nested_records_with_strings_round_trip() {
    let (mem, file) = file();
    let ds = file.create_dataset_from("markers", &markers()).unwrap();
    assert_eq!(mem.vlen_live(), 0);

    let back: Vec<Marker> = ds.read().unwrap();
    assert_eq!(back, markers());
    assert_eq!(mem.vlen_live(), 0);
}

#[test]
fn scalar_record_as_attribute() {
    let (_mem, file) = file();
    let group = file.create_group("scene").unwrap();
    let origin = Point { x: 1.0, y: 2.0 };
    group.create_attribute_from("origin", &origin).unwrap();

    let back: Point = group.attribute("origin").unwrap().read().unwrap();
    assert_eq!(back, origin);
}

#[test]
fn enumeration_dataset_round_trips() {
    let (_mem, file) = file();
    let colors = vec![Color::Blue, Color::Red, Color::Green];
    let ds = file.create_dataset_from("colors", &colors).unwrap();
    let back: Vec<Color> = ds.read().unwrap();
    assert_eq!(back, colors);
}

#[test]
fn unknown_enum_member_is_a_conversion_error() {
    let (_mem, file) = file();
    let ds = file
        .create_dataset_from("colors", &vec![Color::Red, Color::Blue])
        .unwrap();
    let err = ds.read::<Vec<Primary>>().unwrap_err();
    assert!(matches!(err, Error::Conversion { .. }), "{err}");

    let ds = file.create_dataset_from("primaries", &vec![Primary::Green]).unwrap();
    let back: Vec<Color> = ds.read().unwrap();
    assert_eq!(back, [Color::Green]);
}

#[test]
fn decoding_a_stray_discriminant_fails() {
    let err = Color::decode(&[3], &mut NoPayloads).unwrap_err();
    assert!(matches!(err, Error::Conversion { .. }), "{err}");
    assert_eq!(Color::decode(&[4], &mut NoPayloads).unwrap(), Color::Blue);
}
