//! The engine boundary.
//!
//! [`Engine`] is the complete set of native primitives the binding layer
//! consumes: handle lifecycle, files, links, datasets, attributes, type and
//! space descriptors, property lists, object references, the variable-length
//! payload heap and error-stack control. Identifiers are opaque [`Hid`]s; the
//! caller owns every identifier an engine call returns and must release it
//! with [`Engine::close`].

use std::fmt;

use byteorder::{ByteOrder, NativeEndian};

use crate::dataspace::Dataspace;
use crate::datatype::{Datatype, VLEN_SLOT_SIZE};
use crate::error::{EngineResult, ErrorRecord};
use crate::plist::{PlistClass, Property};

/// Opaque native identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hid(pub i64);

impl Hid {
    /// Identifier that never refers to a live resource.
    pub const INVALID: Hid = Hid(-1);
}

impl fmt::Display for Hid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hid:{}", self.0)
    }
}

/// Kind of resource an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    File,
    Group,
    Dataset,
    Attribute,
    Datatype,
    Dataspace,
    PropertyList,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandleKind::File => "file",
            HandleKind::Group => "group",
            HandleKind::Dataset => "dataset",
            HandleKind::Attribute => "attribute",
            HandleKind::Datatype => "datatype",
            HandleKind::Dataspace => "dataspace",
            HandleKind::PropertyList => "property list",
        };
        f.write_str(s)
    }
}

/// Kind of object a link points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Group,
    Dataset,
    /// A committed (named) datatype.
    Datatype,
}

/// Access intent when opening an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    ReadOnly,
    ReadWrite,
}

/// Behavior when creating a file that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateDisposition {
    /// Discard the existing contents.
    Truncate,
    /// Fail if the file exists.
    Exclusive,
}

/// Content of one variable-length slot: heap reference plus byte length.
///
/// Id 0 is the null reference and stands for an empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VarLenRef {
    pub id: u64,
    pub len: u64,
}

impl VarLenRef {
    /// Null reference (empty payload).
    pub const NULL: VarLenRef = VarLenRef { id: 0, len: 0 };

    /// Whether this is the null reference.
    pub fn is_null(&self) -> bool {
        self.id == 0
    }

    /// Write the slot in native byte order. `out` must hold at least
    /// [`VLEN_SLOT_SIZE`] bytes.
    pub fn encode(&self, out: &mut [u8]) {
        NativeEndian::write_u64(&mut out[0..8], self.id);
        NativeEndian::write_u64(&mut out[8..16], self.len);
    }

    /// Read a slot written by [`VarLenRef::encode`].
    pub fn decode(raw: &[u8]) -> Self {
        debug_assert!(raw.len() >= VLEN_SLOT_SIZE as usize);
        VarLenRef {
            id: NativeEndian::read_u64(&raw[0..8]),
            len: NativeEndian::read_u64(&raw[8..16]),
        }
    }
}

/// Native storage engine primitives.
///
/// Optional property list arguments (`Option<Hid>`) fall back to the
/// engine defaults. Failing calls return the innermost [`EngineError`]
/// and leave a record on the calling thread's error stack, which
/// [`Engine::take_error_stack`] drains.
///
/// [`EngineError`]: crate::error::EngineError
pub trait Engine: Send + Sync + fmt::Debug {
    // ---- identifiers ----

    /// Release an identifier. Closing an unknown identifier fails.
    fn close(&self, id: Hid) -> EngineResult<()>;
    /// Whether `id` refers to a live resource.
    fn is_valid(&self, id: Hid) -> bool;
    /// Kind of resource behind `id`.
    fn handle_kind(&self, id: Hid) -> EngineResult<HandleKind>;
    /// Absolute path of an object, the file name for files, or the
    /// attribute name for attributes.
    fn object_name(&self, id: Hid) -> EngineResult<String>;

    // ---- files ----

    fn file_create(
        &self,
        name: &str,
        disposition: CreateDisposition,
        fcpl: Option<Hid>,
        fapl: Option<Hid>,
    ) -> EngineResult<Hid>;
    fn file_open(&self, name: &str, mode: FileMode, fapl: Option<Hid>) -> EngineResult<Hid>;
    fn file_exists(&self, name: &str) -> bool;
    fn file_flush(&self, file: Hid) -> EngineResult<()>;

    // ---- links and groups ----

    fn group_create(
        &self,
        loc: Hid,
        name: &str,
        lcpl: Option<Hid>,
        gcpl: Option<Hid>,
    ) -> EngineResult<Hid>;
    fn group_open(&self, loc: Hid, name: &str) -> EngineResult<Hid>;
    /// Whether `name` resolves to an object. Missing intermediate groups
    /// yield `false`, not an error.
    fn link_exists(&self, loc: Hid, name: &str) -> EngineResult<bool>;
    /// Link names in a group, in name order.
    fn link_names(&self, loc: Hid) -> EngineResult<Vec<String>>;
    fn link_kind(&self, loc: Hid, name: &str) -> EngineResult<ObjectKind>;
    fn link_delete(&self, loc: Hid, name: &str) -> EngineResult<()>;
    fn link_move(&self, loc: Hid, src: &str, dst: &str, lcpl: Option<Hid>) -> EngineResult<()>;

    // ---- datatypes ----

    fn type_create(&self, datatype: &Datatype) -> EngineResult<Hid>;
    fn type_describe(&self, datatype: Hid) -> EngineResult<Datatype>;
    /// Store a copy of a transient datatype under `name`.
    fn type_commit(&self, loc: Hid, name: &str, datatype: Hid) -> EngineResult<()>;
    fn type_open(&self, loc: Hid, name: &str) -> EngineResult<Hid>;

    // ---- dataspaces ----

    fn space_create(&self, space: &Dataspace) -> EngineResult<Hid>;
    fn space_describe(&self, space: Hid) -> EngineResult<Dataspace>;
    fn space_set_extents(&self, space: Hid, dims: &[u64]) -> EngineResult<()>;

    // ---- property lists ----

    fn plist_create(&self, class: PlistClass) -> EngineResult<Hid>;
    fn plist_class(&self, plist: Hid) -> EngineResult<PlistClass>;
    /// Attach an option, replacing an option of the same name.
    fn plist_set(&self, plist: Hid, prop: &Property) -> EngineResult<()>;
    fn plist_get(&self, plist: Hid) -> EngineResult<Vec<Property>>;

    // ---- datasets ----

    #[allow(clippy::too_many_arguments)]
    fn dataset_create(
        &self,
        loc: Hid,
        name: &str,
        datatype: Hid,
        space: Hid,
        lcpl: Option<Hid>,
        dcpl: Option<Hid>,
        dapl: Option<Hid>,
    ) -> EngineResult<Hid>;
    fn dataset_open(&self, loc: Hid, name: &str, dapl: Option<Hid>) -> EngineResult<Hid>;
    /// A new dataspace identifier describing the current extents.
    fn dataset_space(&self, dataset: Hid) -> EngineResult<Hid>;
    /// A new datatype identifier describing the stored element type.
    fn dataset_type(&self, dataset: Hid) -> EngineResult<Hid>;
    /// A new property list identifier holding the creation options.
    fn dataset_create_plist(&self, dataset: Hid) -> EngineResult<Hid>;
    fn dataset_set_extent(&self, dataset: Hid, dims: &[u64]) -> EngineResult<()>;
    /// Write the whole dataset from `buf`, laid out as elements of `mem_type`.
    fn dataset_write(
        &self,
        dataset: Hid,
        mem_type: Hid,
        buf: &[u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()>;
    /// Read the whole dataset into `buf` as elements of `mem_type`.
    /// Variable-length payloads are allocated on the engine heap and owned
    /// by the caller until passed to [`Engine::vlen_free`].
    fn dataset_read(
        &self,
        dataset: Hid,
        mem_type: Hid,
        buf: &mut [u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()>;

    // ---- attributes ----

    fn attr_create(&self, obj: Hid, name: &str, datatype: Hid, space: Hid) -> EngineResult<Hid>;
    fn attr_open(&self, obj: Hid, name: &str) -> EngineResult<Hid>;
    fn attr_exists(&self, obj: Hid, name: &str) -> EngineResult<bool>;
    /// Attribute names, in name order.
    fn attr_names(&self, obj: Hid) -> EngineResult<Vec<String>>;
    fn attr_delete(&self, obj: Hid, name: &str) -> EngineResult<()>;
    fn attr_space(&self, attr: Hid) -> EngineResult<Hid>;
    fn attr_type(&self, attr: Hid) -> EngineResult<Hid>;
    fn attr_write(
        &self,
        attr: Hid,
        mem_type: Hid,
        buf: &[u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()>;
    fn attr_read(
        &self,
        attr: Hid,
        mem_type: Hid,
        buf: &mut [u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()>;

    // ---- object references ----

    /// Address of the object `name` resolves to.
    fn reference_create(&self, loc: Hid, name: &str) -> EngineResult<u64>;
    /// Open the object at `address` in the file containing `loc`.
    fn reference_open(&self, loc: Hid, address: u64) -> EngineResult<Hid>;

    // ---- variable-length payloads ----

    fn vlen_alloc(&self, payload: &[u8]) -> EngineResult<VarLenRef>;
    fn vlen_payload(&self, slot: VarLenRef) -> EngineResult<Vec<u8>>;
    /// Free a payload. The null reference is accepted and ignored.
    fn vlen_free(&self, slot: VarLenRef) -> EngineResult<()>;
    /// Number of live payloads on the engine heap.
    fn vlen_live(&self) -> usize;

    // ---- error reporting ----

    /// Enable or disable automatic error printing for the calling thread,
    /// returning the previous setting.
    fn set_error_printing(&self, enabled: bool) -> bool;
    /// Drain the calling thread's error stack, innermost frame first.
    fn take_error_stack(&self) -> Vec<ErrorRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlen_slot_layout() {
        let slot = VarLenRef { id: 7, len: 42 };
        let mut raw = [0u8; VLEN_SLOT_SIZE as usize];
        slot.encode(&mut raw);
        assert_eq!(NativeEndian::read_u64(&raw[..8]), 7);
        assert_eq!(NativeEndian::read_u64(&raw[8..]), 42);
        assert_eq!(VarLenRef::decode(&raw), slot);
        assert!(VarLenRef::decode(&[0u8; 16]).is_null());
    }
}
