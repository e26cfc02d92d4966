//! Native layer for h5bind.
//!
//! This crate defines the descriptors that cross the boundary between the
//! typed binding layer and a storage engine: element [`Datatype`]s,
//! [`Dataspace`] extents, [`Property`] values, and engine error codes. The
//! [`Engine`] trait lists every primitive the binding layer consumes, and
//! [`MemEngine`] implements it in process memory.
//!
//! # Buffer layout
//!
//! Buffers passed to `dataset_write`/`dataset_read` hold packed,
//! native-endian elements of the memory datatype. Variable-length strings
//! occupy 16-byte slots: a `u64` heap reference followed by a `u64` byte
//! length (see [`VarLenRef`]).

pub mod dataspace;
pub mod datatype;
pub mod engine;
pub mod error;
pub mod mem;
pub mod plist;

pub use dataspace::{Dataspace, DataspaceType, UNLIMITED};
pub use datatype::{
    CharacterSet, CompoundMember, Datatype, DatatypeByteOrder, EnumMember, StringPadding,
    REFERENCE_SIZE, VLEN_SLOT_SIZE,
};
pub use engine::{CreateDisposition, Engine, FileMode, HandleKind, Hid, ObjectKind, VarLenRef};
pub use error::{EngineError, EngineResult, ErrorRecord, Major, Minor};
pub use mem::MemEngine;
pub use plist::{lib_version, PlistClass, Property, StringOverflow};
