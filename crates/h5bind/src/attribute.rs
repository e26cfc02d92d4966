//! Attributes: small named arrays attached to files, groups and datasets.

use std::fmt;

use h5bind_engine::{Dataspace, Datatype, Engine, EngineResult, HandleKind, Hid};

use crate::error::Result;
use crate::handle::{AsHandle, Handle};
use crate::marshal::{self, Container};
use crate::props::PropertyList;
use crate::resolve::{DataSpace, DataType};
use crate::shape::{H5Data, H5DataRead};
use crate::types::H5Type;

/// An open attribute.
#[derive(Clone)]
pub struct Attribute {
    handle: Handle,
    name: String,
    owner: String,
}

impl Attribute {
    fn new(handle: Handle, name: &str, owner: String) -> Self {
        Self {
            handle,
            name: name.to_string(),
            owner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) -> Result<()> {
        self.handle.close()
    }

    pub fn shape(&self) -> Result<Vec<u64>> {
        Ok(self.space()?.shape().into_dims())
    }

    pub fn space(&self) -> Result<DataSpace> {
        let id = self.handle.id()?;
        let space = Handle::acquire(
            self.handle.engine(),
            HandleKind::Dataspace,
            || format!("getting the dataspace of {}", self.describe()),
            |e| e.attr_space(id),
        )?;
        DataSpace::from_handle(space)
    }

    pub fn dtype(&self) -> Result<DataType> {
        let id = self.handle.id()?;
        let datatype = Handle::acquire(
            self.handle.engine(),
            HandleKind::Datatype,
            || format!("getting the datatype of {}", self.describe()),
            |e| e.attr_type(id),
        )?;
        DataType::from_handle(datatype)
    }

    pub fn read<T: H5DataRead>(&self) -> Result<T> {
        marshal::read(self, None)
    }

    pub fn read_with<T: H5DataRead>(&self, dxpl: &PropertyList) -> Result<T> {
        marshal::read(self, Some(dxpl))
    }

    pub fn read_into<T: H5DataRead>(&self, value: &mut T) -> Result<()> {
        marshal::read_into(self, value, None)
    }

    pub fn write<V: H5Data + ?Sized>(&self, value: &V) -> Result<()> {
        marshal::write(self, value, None)
    }

    pub fn write_with<V: H5Data + ?Sized>(&self, value: &V, dxpl: &PropertyList) -> Result<()> {
        marshal::write(self, value, Some(dxpl))
    }
}

impl AsHandle for Attribute {
    fn as_handle(&self) -> &Handle {
        &self.handle
    }
}

impl Container for Attribute {
    fn handle(&self) -> &Handle {
        &self.handle
    }

    fn describe(&self) -> String {
        format!("attribute '{}' of '{}'", self.name, self.owner)
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
        engine.attr_write(id, mem_type, buf, dxpl)
    }

    fn read_raw(
        &self,
        engine: &dyn Engine,
        id: Hid,
        mem_type: Hid,
        buf: &mut [u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()> {
        engine.attr_read(id, mem_type, buf, dxpl)
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}

fn owner_name(handle: &Handle) -> Result<String> {
    let id = handle.id()?;
    handle
        .mapper()
        .call(|| format!("naming {id}"), |e| e.object_name(id))
}

/// Attribute operations shared by files, groups and datasets.
pub trait AttributeOwner: AsHandle {
    /// Create an attribute of element type `T` with extents `dims`.
    fn create_attribute<T: H5Type>(&self, name: &str, dims: &[u64]) -> Result<Attribute> {
        self.create_attribute_as(name, &T::type_descriptor()?, dims)
    }

    /// Create an attribute with an explicit stored element type.
    fn create_attribute_as(&self, name: &str, datatype: &Datatype, dims: &[u64]) -> Result<Attribute> {
        let handle = self.as_handle();
        let engine = handle.engine();
        let obj = handle.id()?;
        let owner = owner_name(handle)?;
        let dtype = DataType::from_descriptor(engine, datatype)?;
        let space = DataSpace::from_descriptor(engine, &Dataspace::simple(dims))?;
        let (type_id, space_id) = (dtype.id()?, space.id()?);
        let attr = Handle::acquire(
            engine,
            HandleKind::Attribute,
            || format!("creating attribute '{name}' on '{owner}'"),
            |e| e.attr_create(obj, name, type_id, space_id),
        )?;
        tracing::debug!(name, %owner, %datatype, ?dims, "created attribute");
        Ok(Attribute::new(attr, name, owner))
    }

    /// Create an attribute shaped like `value` and write it.
    fn create_attribute_from<V: H5Data + ?Sized>(&self, name: &str, value: &V) -> Result<Attribute> {
        let shape = value.shape()?;
        let attr = self.create_attribute::<V::Element>(name, shape.dims())?;
        attr.write(value)?;
        Ok(attr)
    }

    fn attribute(&self, name: &str) -> Result<Attribute> {
        let handle = self.as_handle();
        let obj = handle.id()?;
        let owner = owner_name(handle)?;
        let attr = Handle::acquire(
            handle.engine(),
            HandleKind::Attribute,
            || format!("opening attribute '{name}' of '{owner}'"),
            |e| e.attr_open(obj, name),
        )?;
        tracing::debug!(name, %owner, "opened attribute");
        Ok(Attribute::new(attr, name, owner))
    }

    fn has_attribute(&self, name: &str) -> Result<bool> {
        let handle = self.as_handle();
        let obj = handle.id()?;
        handle
            .mapper()
            .call(|| format!("checking attribute '{name}'"), |e| e.attr_exists(obj, name))
    }

    /// Attribute names in name order.
    fn attribute_names(&self) -> Result<Vec<String>> {
        let handle = self.as_handle();
        let obj = handle.id()?;
        handle
            .mapper()
            .call(|| format!("listing attributes of {obj}"), |e| e.attr_names(obj))
    }

    fn delete_attribute(&self, name: &str) -> Result<()> {
        let handle = self.as_handle();
        let obj = handle.id()?;
        handle
            .mapper()
            .call(|| format!("deleting attribute '{name}'"), |e| e.attr_delete(obj, name))?;
        tracing::debug!(name, "deleted attribute");
        Ok(())
    }
}

impl AttributeOwner for crate::dataset::Dataset {}
