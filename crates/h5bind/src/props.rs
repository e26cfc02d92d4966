//! Property lists: typed option bundles for create, access and transfer
//! calls.
//!
//! A [`PropertyList`] is plain data. It is validated as options are added
//! and turned into an engine property list only for the duration of the
//! call that consumes it, so one list can configure any number of calls.
//!
//! ```
//! use h5bind::PropertyListBuilder;
//!
//! let dcpl = PropertyListBuilder::dataset_create()
//!     .chunk(&[64, 64])?
//!     .deflate(6)?
//!     .build();
//! assert_eq!(dcpl.chunk_dims(), Some(&[64u64, 64][..]));
//! # Ok::<(), h5bind::Error>(())
//! ```

use std::sync::Arc;

use h5bind_engine::{plist, Engine, HandleKind, PlistClass, Property, StringOverflow};

use crate::error::{Error, Result};
use crate::handle::Handle;

/// A validated set of options for one [`PlistClass`].
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyList {
    class: PlistClass,
    props: Vec<Property>,
}

impl PropertyList {
    /// An empty list of `class`, equivalent to engine defaults.
    pub fn empty(class: PlistClass) -> Self {
        Self {
            class,
            props: Vec::new(),
        }
    }

    pub fn class(&self) -> PlistClass {
        self.class
    }

    pub fn properties(&self) -> &[Property] {
        &self.props
    }

    /// Chunk dimensions, if chunked storage is requested.
    pub fn chunk_dims(&self) -> Option<&[u64]> {
        plist::chunk_dims(&self.props)
    }

    pub fn string_overflow(&self) -> StringOverflow {
        plist::string_overflow(&self.props)
    }

    pub fn creates_intermediate_groups(&self) -> bool {
        plist::create_intermediate(&self.props)
    }

    /// Reconstruct a list from the options an engine list holds.
    pub(crate) fn from_engine(class: PlistClass, props: Vec<Property>) -> Self {
        Self { class, props }
    }

    /// Create the engine property list backing one call.
    pub(crate) fn realize(&self, engine: &Arc<dyn Engine>) -> Result<Handle> {
        let class = self.class;
        let handle = Handle::acquire(
            engine,
            HandleKind::PropertyList,
            || format!("creating {class} property list"),
            |e| e.plist_create(class),
        )?;
        let id = handle.id()?;
        for prop in &self.props {
            handle.mapper().call(
                || format!("setting {} on {class} property list", prop.name()),
                |e| e.plist_set(id, prop),
            )?;
        }
        Ok(handle)
    }

    pub(crate) fn expect_class(&self, class: PlistClass) -> Result<()> {
        if self.class != class {
            return Err(Error::InvalidProperty(format!(
                "expected a {class} property list, got {}",
                self.class
            )));
        }
        Ok(())
    }
}

/// Realize an optional list of the expected class.
pub(crate) fn realize_opt(
    engine: &Arc<dyn Engine>,
    list: Option<&PropertyList>,
    class: PlistClass,
) -> Result<Option<Handle>> {
    list.map(|list| {
        list.expect_class(class)?;
        list.realize(engine)
    })
    .transpose()
}

/// The identifier of an optional realized list.
pub(crate) fn opt_id(handle: &Option<Handle>) -> Result<Option<h5bind_engine::Hid>> {
    handle.as_ref().map(Handle::id).transpose()
}

/// Accumulates options for one property list class.
///
/// Adding an option that does not apply to the class, or whose value is out
/// of range, fails with [`Error::InvalidProperty`]. Adding an option twice
/// keeps the last value.
#[derive(Debug, Clone)]
pub struct PropertyListBuilder {
    list: PropertyList,
}

impl PropertyListBuilder {
    pub fn new(class: PlistClass) -> Self {
        Self {
            list: PropertyList::empty(class),
        }
    }

    pub fn file_create() -> Self {
        Self::new(PlistClass::FileCreate)
    }

    pub fn file_access() -> Self {
        Self::new(PlistClass::FileAccess)
    }

    pub fn group_create() -> Self {
        Self::new(PlistClass::GroupCreate)
    }

    pub fn link_create() -> Self {
        Self::new(PlistClass::LinkCreate)
    }

    pub fn dataset_create() -> Self {
        Self::new(PlistClass::DatasetCreate)
    }

    pub fn dataset_access() -> Self {
        Self::new(PlistClass::DatasetAccess)
    }

    pub fn dataset_transfer() -> Self {
        Self::new(PlistClass::DatasetTransfer)
    }

    /// Add `prop`, replacing an earlier option of the same kind.
    pub fn add(mut self, prop: Property) -> Result<Self> {
        let class = self.list.class;
        if !prop.is_applicable(class) {
            return Err(Error::InvalidProperty(format!(
                "{} does not apply to a {class} property list",
                prop.name()
            )));
        }
        prop.validate()
            .map_err(|e| Error::InvalidProperty(e.message))?;
        plist::upsert(&mut self.list.props, prop);
        Ok(self)
    }

    pub fn chunk(self, dims: &[u64]) -> Result<Self> {
        self.add(Property::Chunk(dims.to_vec()))
    }

    /// Deflate compression, level 0-9.
    pub fn deflate(self, level: u32) -> Result<Self> {
        self.add(Property::Deflate(level))
    }

    pub fn shuffle(self) -> Result<Self> {
        self.add(Property::Shuffle)
    }

    /// File format version bounds; see [`lib_version`](h5bind_engine::lib_version).
    pub fn lib_version_bounds(self, low: u8, high: u8) -> Result<Self> {
        self.add(Property::LibVersionBounds { low, high })
    }

    pub fn metadata_block_size(self, bytes: u64) -> Result<Self> {
        self.add(Property::MetadataBlockSize(bytes))
    }

    pub fn estimated_link_info(self, entries: u32, name_length: u32) -> Result<Self> {
        self.add(Property::EstimatedLinkInfo {
            entries,
            name_length,
        })
    }

    pub fn link_phase_change(self, max_compact: u32, min_dense: u32) -> Result<Self> {
        self.add(Property::LinkPhaseChange {
            max_compact,
            min_dense,
        })
    }

    pub fn attribute_phase_change(self, max_compact: u32, min_dense: u32) -> Result<Self> {
        self.add(Property::AttributePhaseChange {
            max_compact,
            min_dense,
        })
    }

    pub fn create_intermediate_groups(self, enabled: bool) -> Result<Self> {
        self.add(Property::CreateIntermediateGroup(enabled))
    }

    /// Raw chunk cache sizing; `w0` is the preemption weight in `0..=1`.
    pub fn chunk_cache(self, slots: usize, bytes: usize, w0: f64) -> Result<Self> {
        self.add(Property::ChunkCache { slots, bytes, w0 })
    }

    /// Policy for strings longer than a fixed-length destination.
    pub fn string_overflow(self, policy: StringOverflow) -> Result<Self> {
        self.add(Property::StringOverflow(policy))
    }

    pub fn build(self) -> PropertyList {
        self.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5bind_engine::MemEngine;

    #[test]
    fn options_are_checked_against_the_class() {
        let err = PropertyListBuilder::group_create().chunk(&[4]).unwrap_err();
        assert!(matches!(err, Error::InvalidProperty(_)), "{err}");
        assert!(err.to_string().contains("group create"), "{err}");

        let err = PropertyListBuilder::dataset_create().deflate(10).unwrap_err();
        assert!(matches!(err, Error::InvalidProperty(_)));

        let err = PropertyListBuilder::group_create()
            .link_phase_change(10, 20)
            .unwrap_err();
        assert!(err.to_string().contains("min_dense"), "{err}");
    }

    #[test]
    fn last_value_wins() {
        let list = PropertyListBuilder::dataset_create()
            .chunk(&[2])
            .unwrap()
            .chunk(&[8])
            .unwrap()
            .build();
        assert_eq!(list.properties().len(), 1);
        assert_eq!(list.chunk_dims(), Some(&[8u64][..]));
    }

    #[test]
    fn realized_lists_carry_every_option() {
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
        let list = PropertyListBuilder::dataset_create()
            .chunk(&[4, 4])
            .unwrap()
            .shuffle()
            .unwrap()
            .deflate(3)
            .unwrap()
            .build();
        // a list is reusable: realize it twice
        for _ in 0..2 {
            let handle = list.realize(&engine).unwrap();
            let id = handle.id().unwrap();
            assert_eq!(engine.plist_get(id).unwrap(), list.properties());
        }
    }

    #[test]
    fn optional_lists_must_match_the_call() {
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
        let dxpl = PropertyListBuilder::dataset_transfer()
            .string_overflow(StringOverflow::Truncate)
            .unwrap()
            .build();
        assert!(realize_opt(&engine, Some(&dxpl), PlistClass::DatasetCreate).is_err());
        let realized = realize_opt(&engine, Some(&dxpl), PlistClass::DatasetTransfer).unwrap();
        assert!(opt_id(&realized).unwrap().is_some());
        assert!(realize_opt(&engine, None, PlistClass::DatasetTransfer)
            .unwrap()
            .is_none());
    }
}
