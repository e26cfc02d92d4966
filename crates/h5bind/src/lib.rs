//! Typed marshalling between Rust containers and hierarchical array stores.
//!
//! `h5bind` maps Rust values onto the objects of an HDF5-style store: files
//! hold groups, groups hold datasets and committed datatypes, and any of
//! them can carry attributes. Datasets and attributes are n-dimensional
//! arrays of one element type.
//!
//! The binding layer is generic over an [`Engine`], the native primitive
//! layer. [`MemEngine`] is an in-process engine; [`default_engine`] returns
//! a shared instance used by [`File::open`].
//!
//! ```
//! use h5bind::{AttributeOwner, File, Location, OpenMode};
//!
//! let file = File::open("crate-doc.h5", OpenMode::Truncate)?;
//! let group = file.create_group("runs")?;
//! let dataset = group.create_dataset_from("grid", &vec![vec![1i32, 2, 3], vec![4, 5, 6]])?;
//! dataset.create_attribute_from("units", &String::from("m/s"))?;
//!
//! assert_eq!(dataset.shape()?, [2, 3]);
//! let grid: Vec<Vec<i32>> = file.dataset("/runs/grid")?.read()?;
//! assert_eq!(grid[1], [4, 5, 6]);
//! # Ok::<(), h5bind::Error>(())
//! ```
//!
//! # Element types and containers
//!
//! [`H5Type`] maps a Rust type to one native element type. It is provided
//! for numbers, `bool`, `String`, [`FixedString`], [`ObjectRef`] and
//! fixed-size arrays; records and enumerations get it from
//! `#[derive(H5Type)]` or [`pod_record!`].
//!
//! [`H5Data`] describes how a container of elements is shaped: `Vec`,
//! `VecDeque`, arrays, slices and their nestings, plus `ndarray` arrays
//! with the `ndarray` feature.
//!
//! # Concurrency
//!
//! All handle types are `Send + Sync`. The binding layer does no locking of
//! its own, so with an engine that is not reentrant the caller must
//! serialize every engine call, including the release that happens when the
//! last clone of a handle is dropped.

extern crate self as h5bind;

mod attribute;
mod dataset;
pub mod easy;
mod error;
mod file;
mod group;
mod handle;
mod marshal;
#[cfg(feature = "ndarray")]
mod ndarray_ext;
mod props;
mod resolve;
pub mod shape;
pub mod type_builders;
mod types;

use std::sync::{Arc, OnceLock};

pub use h5bind_engine as engine;
pub use h5bind_engine::{
    lib_version, Engine, MemEngine, ObjectKind, PlistClass, Property, StringOverflow, UNLIMITED,
};

pub use attribute::{Attribute, AttributeOwner};
pub use dataset::{Dataset, DatasetOptions};
pub use error::{map_engine_error, Error, ErrorMapper, Result, SilenceGuard};
pub use file::{File, OpenMode};
pub use group::{Group, Location, Object};
pub use handle::{AsHandle, Handle};
pub use props::{PropertyList, PropertyListBuilder};
pub use resolve::{resolve, DataSpace, DataType};
pub use shape::{H5Data, H5DataRead, Shape};
pub use type_builders::{
    record_descriptor, register_pod_record, register_record, registered_record, CompoundType,
    EnumType,
};
pub use types::{FixedString, H5Type, ObjectRef, VlenSink, VlenSource};

#[cfg(feature = "derive")]
pub use h5bind_derive::H5Type;

#[doc(hidden)]
pub mod __private {
    pub use bytemuck;
}

/// The process-wide engine behind [`File::open`].
pub fn default_engine() -> Arc<dyn Engine> {
    static ENGINE: OnceLock<Arc<dyn Engine>> = OnceLock::new();
    Arc::clone(ENGINE.get_or_init(|| Arc::new(MemEngine::new())))
}
