//! Datasets: named n-dimensional arrays inside a file.

use std::fmt;

use h5bind_engine::{Datatype, Engine, EngineResult, HandleKind, Hid, PlistClass, UNLIMITED};

use crate::error::Result;
use crate::handle::{AsHandle, Handle};
use crate::marshal::{self, Container};
use crate::props::PropertyList;
use crate::resolve::{DataSpace, DataType};
use crate::shape::{H5Data, H5DataRead};
use crate::types::H5Type;

/// Creation options for a dataset.
///
/// ```
/// use h5bind::{DatasetOptions, PropertyListBuilder, UNLIMITED};
///
/// let options = DatasetOptions::new()
///     .max_dims(&[UNLIMITED])
///     .create(PropertyListBuilder::dataset_create().chunk(&[1024])?.build());
/// # Ok::<(), h5bind::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct DatasetOptions {
    pub(crate) stored_type: Option<Datatype>,
    pub(crate) max_dims: Option<Vec<u64>>,
    pub(crate) link_create: Option<PropertyList>,
    pub(crate) create: Option<PropertyList>,
    pub(crate) access: Option<PropertyList>,
}

impl DatasetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store elements as `datatype` instead of the written element type;
    /// the engine converts on every transfer.
    pub fn stored_as(mut self, datatype: Datatype) -> Self {
        self.stored_type = Some(datatype);
        self
    }

    /// Maximum extents; [`UNLIMITED`] makes a dimension growable. Extendible
    /// datasets need chunked storage.
    pub fn max_dims(mut self, max_dims: &[u64]) -> Self {
        self.max_dims = Some(max_dims.to_vec());
        self
    }

    /// Every dimension unlimited.
    pub fn resizable(self, rank: usize) -> Self {
        self.max_dims(&vec![UNLIMITED; rank])
    }

    pub fn link_create(mut self, lcpl: PropertyList) -> Self {
        self.link_create = Some(lcpl);
        self
    }

    pub fn create(mut self, dcpl: PropertyList) -> Self {
        self.create = Some(dcpl);
        self
    }

    pub fn access(mut self, dapl: PropertyList) -> Self {
        self.access = Some(dapl);
        self
    }
}

/// An open dataset.
#[derive(Clone)]
pub struct Dataset {
    handle: Handle,
    path: String,
}

impl Dataset {
    pub(crate) fn from_handle(handle: Handle) -> Result<Self> {
        let id = handle.id()?;
        let path = handle
            .mapper()
            .call(|| format!("naming dataset {id}"), |e| e.object_name(id))?;
        Ok(Self { handle, path })
    }

    /// Absolute path at the time the dataset was opened.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Release the dataset for every clone. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        tracing::debug!(path = %self.path, "closing dataset");
        self.handle.close()
    }

    /// Current extents.
    pub fn shape(&self) -> Result<Vec<u64>> {
        Ok(self.space()?.shape().into_dims())
    }

    pub fn space(&self) -> Result<DataSpace> {
        let id = self.handle.id()?;
        let space = Handle::acquire(
            self.handle.engine(),
            HandleKind::Dataspace,
            || format!("getting the dataspace of {}", self.describe()),
            |e| e.dataset_space(id),
        )?;
        DataSpace::from_handle(space)
    }

    /// The stored element type.
    pub fn dtype(&self) -> Result<DataType> {
        let id = self.handle.id()?;
        let datatype = Handle::acquire(
            self.handle.engine(),
            HandleKind::Datatype,
            || format!("getting the datatype of {}", self.describe()),
            |e| e.dataset_type(id),
        )?;
        DataType::from_handle(datatype)
    }

    /// The options the dataset was created with.
    pub fn creation_properties(&self) -> Result<PropertyList> {
        let id = self.handle.id()?;
        let plist = Handle::acquire(
            self.handle.engine(),
            HandleKind::PropertyList,
            || format!("getting the creation properties of {}", self.describe()),
            |e| e.dataset_create_plist(id),
        )?;
        let plist_id = plist.id()?;
        let props = plist
            .mapper()
            .call(|| format!("reading property list {plist_id}"), |e| e.plist_get(plist_id))?;
        Ok(PropertyList::from_engine(PlistClass::DatasetCreate, props))
    }

    /// Change the current extents of a chunked dataset. Elements outside
    /// the old extents read as zero.
    pub fn resize(&self, dims: &[u64]) -> Result<()> {
        let id = self.handle.id()?;
        self.handle.mapper().call(
            || format!("resizing {} to {dims:?}", self.describe()),
            |e| e.dataset_set_extent(id, dims),
        )?;
        tracing::debug!(path = %self.path, ?dims, "resized dataset");
        Ok(())
    }

    /// Read the whole dataset into a new container.
    ///
    /// Stored extents equal to 1 are dropped or added as needed to match the
    /// container's rank.
    pub fn read<T: H5DataRead>(&self) -> Result<T> {
        marshal::read(self, None)
    }

    pub fn read_with<T: H5DataRead>(&self, dxpl: &PropertyList) -> Result<T> {
        marshal::read(self, Some(dxpl))
    }

    /// Read into an existing container of exactly the stored shape, reusing
    /// its storage.
    pub fn read_into<T: H5DataRead>(&self, value: &mut T) -> Result<()> {
        marshal::read_into(self, value, None)
    }

    pub fn read_into_with<T: H5DataRead>(&self, value: &mut T, dxpl: &PropertyList) -> Result<()> {
        marshal::read_into(self, value, Some(dxpl))
    }

    /// Every element in row-major order, whatever the stored rank.
    pub fn read_flat<E: H5Type + H5DataRead<Element = E>>(&self) -> Result<Vec<E>> {
        marshal::read_flat(self, None)
    }

    /// Overwrite every element from a row-major slice holding exactly as
    /// many elements as the dataset.
    pub fn write_flat<E: H5Type + H5Data<Element = E>>(&self, elements: &[E]) -> Result<()> {
        marshal::write_flat(self, elements, None)
    }

    /// Overwrite the whole dataset with `value`.
    pub fn write<V: H5Data + ?Sized>(&self, value: &V) -> Result<()> {
        marshal::write(self, value, None)
    }

    pub fn write_with<V: H5Data + ?Sized>(&self, value: &V, dxpl: &PropertyList) -> Result<()> {
        marshal::write(self, value, Some(dxpl))
    }
}

impl AsHandle for Dataset {
    fn as_handle(&self) -> &Handle {
        &self.handle
    }
}

impl Container for Dataset {
    fn handle(&self) -> &Handle {
        &self.handle
    }

    fn describe(&self) -> String {
        format!("dataset '{}'", self.path)
    }

    fn extents(&self) -> Result<Vec<u64>> {
        self.shape()
    }

    fn write_raw(
        &self,
        engine: &dyn Engine,
        id: Hid,
        mem_type: Hid,
        buf: &[u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()> {
        engine.dataset_write(id, mem_type, buf, dxpl)
    }

    fn read_raw(
        &self,
        engine: &dyn Engine,
        id: Hid,
        mem_type: Hid,
        buf: &mut [u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()> {
        engine.dataset_read(id, mem_type, buf, dxpl)
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .finish()
    }
}
