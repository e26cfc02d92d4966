//! Path-based dump and load.

use std::sync::Arc;

use h5bind::easy::{self, DumpMode, DumpOptions};
use h5bind::{Engine, Error, File, Location, MemEngine, OpenMode, Property};

fn file() -> (Arc<MemEngine>, File) {
    let mem = Arc::new(MemEngine::new());
    let engine: Arc<dyn Engine> = mem.clone();
    let file = File::open_in(&engine, "easy.h5", OpenMode::Truncate).unwrap();
    (mem, file)
}

#[test]
fn dump_creates_intermediate_groups_and_flushes() {
    let (mem, file) = file();
    easy::dump(&file, "/path/to/A", &vec![1.0f64, 2.0, 3.0], DumpMode::Create).unwrap();
    assert!(file.group("/path/to").is_ok());
    assert_eq!(mem.flush_count(), 1);

    let a: Vec<f64> = easy::load(&file, "/path/to/A").unwrap();
    assert_eq!(a, [1.0, 2.0, 3.0]);
    assert_eq!(easy::get_shape(&file, "/path/to/A").unwrap(), [3]);
    assert_eq!(easy::get_size(&file, "/path/to/A").unwrap(), 3);
}

#[test]
fn overwrite_requires_the_same_shape() {
    let (_mem, file) = file();
    let grid = vec![vec![1i32, 2], vec![3, 4]];
    easy::dump(&file, "grid", &grid, DumpMode::Create).unwrap();

    assert!(easy::dump(&file, "grid", &grid, DumpMode::Create).is_err());

    let replaced = vec![vec![5i32, 6], vec![7, 8]];
    easy::dump(&file, "grid", &replaced, DumpMode::Overwrite).unwrap();
    let back: Vec<Vec<i32>> = easy::load(&file, "grid").unwrap();
    assert_eq!(back, replaced);

    let err = easy::dump(&file, "grid", &vec![1i32; 4], DumpMode::Overwrite).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
}

#[test]
fn overwrite_of_a_missing_path_creates_it() {
    let (_mem, file) = file();
    easy::dump(&file, "fresh", &7u8, DumpMode::Overwrite).unwrap();
    let back: u8 = easy::load(&file, "fresh").unwrap();
    assert_eq!(back, 7);
}

#[test]
fn compression_chunks_the_whole_value() {
    let (mem, file) = file();
    let options = DumpOptions::new().compression(8).flush(false);
    let ds = easy::dump_with(&file, "/c/B", &vec![1.0f64, 2.0, 3.0], &options).unwrap();
    let props = ds.creation_properties().unwrap();
    assert_eq!(props.chunk_dims(), Some(&[3u64][..]));
    assert!(props.properties().contains(&Property::Deflate(8)));
    assert_eq!(mem.flush_count(), 0);

    let options = DumpOptions::new().compression(8).chunk_size(&[2]);
    let ds = easy::dump_with(&file, "/c/D", &vec![1.0f64, 2.0, 3.0], &options).unwrap();
    assert_eq!(ds.creation_properties().unwrap().chunk_dims(), Some(&[2u64][..]));
}

#[test]
fn dump_at_grows_an_extendible_dataset() {
    let (_mem, file) = file();
    easy::dump_at(&file, "/series", &10i32, &[0, 0]).unwrap();
    easy::dump_at(&file, "/series", &11i32, &[0, 1]).unwrap();
    easy::dump_at(&file, "/series", &20i32, &[2, 0]).unwrap();

    assert_eq!(easy::get_shape(&file, "/series").unwrap(), [3, 2]);
    let all: Vec<Vec<i32>> = easy::load(&file, "/series").unwrap();
    assert_eq!(all, [vec![10, 11], vec![0, 0], vec![20, 0]]);
    assert_eq!(easy::load_at::<i32>(&file, "/series", &[0, 1]).unwrap(), 11);

    let err = easy::load_at::<i32>(&file, "/series", &[3, 0]).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
    let err = easy::dump_at(&file, "/series", &1i32, &[1]).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
}

#[test]
fn dump_at_rejects_unreachable_indices() {
    let (_mem, file) = file();
    let err = easy::dump_at(&file, "/far", &1u8, &[u64::MAX]).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
    assert!(!file.exists("/far").unwrap());

    easy::dump_at(&file, "/near", &1u8, &[0]).unwrap();
    let err = easy::dump_at(&file, "/near", &2u8, &[u64::MAX]).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
    assert_eq!(easy::get_shape(&file, "/near").unwrap(), [1]);
}

#[test]
fn attributes_by_path() {
    let (_mem, file) = file();
    easy::dump(&file, "/data/x", &vec![1u16, 2], DumpMode::Create).unwrap();
    easy::dump_attribute(&file, "/data/x", "units", &"mm".to_string(), DumpMode::Create).unwrap();
    easy::dump_attribute(&file, "/data", "count", &2u32, DumpMode::Create).unwrap();

    let units: String = easy::load_attribute(&file, "/data/x", "units").unwrap();
    assert_eq!(units, "mm");

    easy::dump_attribute(&file, "/data", "count", &3u32, DumpMode::Overwrite).unwrap();
    let count: u32 = easy::load_attribute(&file, "/data", "count").unwrap();
    assert_eq!(count, 3);

    assert!(easy::dump_attribute(&file, "/data", "count", &4u32, DumpMode::Create).is_err());
    let err = easy::load_attribute::<u32>(&file, "/missing", "count").unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }), "{err}");
}
