//! Groups, links and the operations shared by files and groups.

use std::fmt;
use std::sync::Arc;

use h5bind_engine::{Dataspace, Datatype, HandleKind, ObjectKind, PlistClass};

use crate::attribute::AttributeOwner;
use crate::dataset::{Dataset, DatasetOptions};
use crate::error::{Error, Result};
use crate::handle::{AsHandle, Handle};
use crate::props::{opt_id, realize_opt, PropertyList};
use crate::resolve::{DataSpace, DataType};
use crate::shape::H5Data;
use crate::types::{H5Type, ObjectRef};

/// An open group.
#[derive(Clone)]
pub struct Group {
    handle: Handle,
    path: String,
}

impl Group {
    pub(crate) fn from_handle(handle: Handle) -> Result<Self> {
        let id = handle.id()?;
        let path = handle
            .mapper()
            .call(|| format!("naming group {id}"), |e| e.object_name(id))?;
        Ok(Self { handle, path })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn close(&self) -> Result<()> {
        tracing::debug!(path = %self.path, "closing group");
        self.handle.close()
    }
}

impl AsHandle for Group {
    fn as_handle(&self) -> &Handle {
        &self.handle
    }
}

impl Location for Group {}
impl AttributeOwner for Group {}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Any object reachable through a link.
#[derive(Debug, Clone)]
pub enum Object {
    Group(Group),
    Dataset(Dataset),
    Datatype(DataType),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Group(_) => ObjectKind::Group,
            Object::Dataset(_) => ObjectKind::Dataset,
            Object::Datatype(_) => ObjectKind::Datatype,
        }
    }

    pub fn into_group(self) -> Result<Group> {
        match self {
            Object::Group(group) => Ok(group),
            other => Err(other.wrong_kind("group")),
        }
    }

    pub fn into_dataset(self) -> Result<Dataset> {
        match self {
            Object::Dataset(dataset) => Ok(dataset),
            other => Err(other.wrong_kind("dataset")),
        }
    }

    fn wrong_kind(&self, wanted: &str) -> Error {
        Error::IncompatibleType {
            context: format!("expecting a {wanted}"),
            detail: format!("object is a {:?}", self.kind()),
        }
    }

    fn from_handle(handle: Handle, kind: HandleKind) -> Result<Self> {
        match kind {
            HandleKind::Group => Ok(Object::Group(Group::from_handle(handle)?)),
            HandleKind::Dataset => Ok(Object::Dataset(Dataset::from_handle(handle)?)),
            HandleKind::Datatype => Ok(Object::Datatype(DataType::from_handle(handle)?)),
            other => Err(Error::Engine {
                context: "opening a linked object".into(),
                detail: format!("engine returned a {other} identifier"),
            }),
        }
    }
}

/// Link and object operations shared by files and groups.
///
/// Names are paths relative to the location; absolute paths start at the
/// file root.
pub trait Location: AsHandle {
    /// Absolute path of this location (`/` for a file).
    fn location_path(&self) -> Result<String> {
        let handle = self.as_handle();
        let id = handle.id()?;
        if handle.kind() == HandleKind::File {
            return Ok("/".into());
        }
        handle
            .mapper()
            .call(|| format!("naming {id}"), |e| e.object_name(id))
    }

    fn create_group(&self, name: &str) -> Result<Group> {
        self.create_group_with(name, None, None)
    }

    /// Create a group with link creation and group creation options.
    fn create_group_with(
        &self,
        name: &str,
        lcpl: Option<&PropertyList>,
        gcpl: Option<&PropertyList>,
    ) -> Result<Group> {
        let handle = self.as_handle();
        let engine = handle.engine();
        let loc = handle.id()?;
        let lcpl = realize_opt(engine, lcpl, PlistClass::LinkCreate)?;
        let gcpl = realize_opt(engine, gcpl, PlistClass::GroupCreate)?;
        let (lcpl_id, gcpl_id) = (opt_id(&lcpl)?, opt_id(&gcpl)?);
        let group = Handle::acquire(
            engine,
            HandleKind::Group,
            || format!("creating group '{name}'"),
            |e| e.group_create(loc, name, lcpl_id, gcpl_id),
        )?;
        tracing::debug!(name, "created group");
        Group::from_handle(group)
    }

    fn group(&self, name: &str) -> Result<Group> {
        let handle = self.as_handle();
        let loc = handle.id()?;
        let group = Handle::acquire(
            handle.engine(),
            HandleKind::Group,
            || format!("opening group '{name}'"),
            |e| e.group_open(loc, name),
        )?;
        tracing::debug!(name, "opened group");
        Group::from_handle(group)
    }

    /// Whether `name` resolves to an object. Missing intermediate groups
    /// yield `false`.
    fn exists(&self, name: &str) -> Result<bool> {
        let handle = self.as_handle();
        let loc = handle.id()?;
        handle
            .mapper()
            .call(|| format!("checking link '{name}'"), |e| e.link_exists(loc, name))
    }

    /// Link names in this group, in name order.
    fn member_names(&self) -> Result<Vec<String>> {
        let handle = self.as_handle();
        let loc = handle.id()?;
        handle
            .mapper()
            .call(|| format!("listing members of {loc}"), |e| e.link_names(loc))
    }

    fn object_kind(&self, name: &str) -> Result<ObjectKind> {
        let handle = self.as_handle();
        let loc = handle.id()?;
        handle
            .mapper()
            .call(|| format!("inspecting link '{name}'"), |e| e.link_kind(loc, name))
    }

    /// Remove the link `name`.
    fn unlink(&self, name: &str) -> Result<()> {
        let handle = self.as_handle();
        let loc = handle.id()?;
        handle
            .mapper()
            .call(|| format!("unlinking '{name}'"), |e| e.link_delete(loc, name))?;
        tracing::debug!(name, "unlinked");
        Ok(())
    }

    /// Move the link `src` to `dst`.
    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let handle = self.as_handle();
        let loc = handle.id()?;
        handle.mapper().call(
            || format!("moving '{src}' to '{dst}'"),
            |e| e.link_move(loc, src, dst, None),
        )?;
        tracing::debug!(src, dst, "moved link");
        Ok(())
    }

    /// Create a dataset of element type `T` with fixed extents `dims`.
    fn create_dataset<T: H5Type>(&self, name: &str, dims: &[u64]) -> Result<Dataset> {
        self.create_dataset_with::<T>(name, dims, &DatasetOptions::default())
    }

    /// Create a dataset of element type `T`, or of the options' stored type.
    fn create_dataset_with<T: H5Type>(
        &self,
        name: &str,
        dims: &[u64],
        options: &DatasetOptions,
    ) -> Result<Dataset> {
        let datatype = match &options.stored_type {
            Some(datatype) => datatype.clone(),
            None => T::type_descriptor()?,
        };
        create_dataset_as(self.as_handle(), name, &datatype, dims, options)
    }

    /// Create a dataset shaped like `value` and write it.
    fn create_dataset_from<V: H5Data + ?Sized>(&self, name: &str, value: &V) -> Result<Dataset> {
        self.create_dataset_from_with(name, value, &DatasetOptions::new())
    }

    /// Create a dataset shaped like `value` with creation options, and
    /// write it.
    fn create_dataset_from_with<V: H5Data + ?Sized>(
        &self,
        name: &str,
        value: &V,
        options: &DatasetOptions,
    ) -> Result<Dataset> {
        let shape = value.shape()?;
        let dataset = self.create_dataset_with::<V::Element>(name, shape.dims(), options)?;
        dataset.write(value)?;
        Ok(dataset)
    }

    fn dataset(&self, name: &str) -> Result<Dataset> {
        self.dataset_with(name, None)
    }

    /// Open a dataset with access options.
    fn dataset_with(&self, name: &str, dapl: Option<&PropertyList>) -> Result<Dataset> {
        let handle = self.as_handle();
        let engine = handle.engine();
        let loc = handle.id()?;
        let dapl = realize_opt(engine, dapl, PlistClass::DatasetAccess)?;
        let dapl_id = opt_id(&dapl)?;
        let dataset = Handle::acquire(
            engine,
            HandleKind::Dataset,
            || format!("opening dataset '{name}'"),
            |e| e.dataset_open(loc, name, dapl_id),
        )?;
        tracing::debug!(name, "opened dataset");
        Dataset::from_handle(dataset)
    }

    /// Open whatever `name` links to.
    fn get(&self, name: &str) -> Result<Object> {
        match self.object_kind(name)? {
            ObjectKind::Group => self.group(name).map(Object::Group),
            ObjectKind::Dataset => self.dataset(name).map(Object::Dataset),
            ObjectKind::Datatype => self.open_datatype(name).map(Object::Datatype),
        }
    }

    /// Store a copy of `datatype` under `name`.
    fn commit_datatype(&self, name: &str, datatype: &DataType) -> Result<()> {
        let handle = self.as_handle();
        let loc = handle.id()?;
        let type_id = datatype.id()?;
        handle.mapper().call(
            || format!("committing datatype '{name}'"),
            |e| e.type_commit(loc, name, type_id),
        )?;
        tracing::debug!(name, %datatype, "committed datatype");
        Ok(())
    }

    fn open_datatype(&self, name: &str) -> Result<DataType> {
        let handle = self.as_handle();
        let loc = handle.id()?;
        let datatype = Handle::acquire(
            handle.engine(),
            HandleKind::Datatype,
            || format!("opening datatype '{name}'"),
            |e| e.type_open(loc, name),
        )?;
        DataType::from_handle(datatype)
    }

    /// A reference to the object `name` resolves to.
    fn reference(&self, name: &str) -> Result<ObjectRef> {
        let handle = self.as_handle();
        let loc = handle.id()?;
        let address = handle.mapper().call(
            || format!("referencing '{name}'"),
            |e| e.reference_create(loc, name),
        )?;
        Ok(ObjectRef::new(address))
    }

    /// Open the object `reference` points to, in this location's file.
    fn dereference(&self, reference: ObjectRef) -> Result<Object> {
        let handle = self.as_handle();
        let engine = handle.engine();
        let loc = handle.id()?;
        let address = reference.address();
        let (id, kind) = handle.mapper().acquire(
            || format!("dereferencing object at {address}"),
            |e| {
                let id = e.reference_open(loc, address)?;
                match e.handle_kind(id) {
                    Ok(kind) => Ok((id, kind)),
                    Err(err) => {
                        e.close(id).ok();
                        Err(err)
                    }
                }
            },
        )?;
        tracing::debug!(address, %kind, "dereferenced object");
        Object::from_handle(Handle::from_raw(Arc::clone(engine), id, kind), kind)
    }
}

/// Create a dataset with an explicit stored element type.
fn create_dataset_as(
    handle: &Handle,
    name: &str,
    datatype: &Datatype,
    dims: &[u64],
    options: &DatasetOptions,
) -> Result<Dataset> {
    let engine = handle.engine();
    let loc = handle.id()?;
    let mut space = Dataspace::simple(dims);
    if let Some(max_dims) = &options.max_dims {
        space = space.with_max_dims(max_dims);
    }
    let dtype = DataType::from_descriptor(engine, datatype)?;
    let space = DataSpace::from_descriptor(engine, &space)?;
    let lcpl = realize_opt(engine, options.link_create.as_ref(), PlistClass::LinkCreate)?;
    let dcpl = realize_opt(engine, options.create.as_ref(), PlistClass::DatasetCreate)?;
    let dapl = realize_opt(engine, options.access.as_ref(), PlistClass::DatasetAccess)?;
    let ids = (
        dtype.id()?,
        space.id()?,
        opt_id(&lcpl)?,
        opt_id(&dcpl)?,
        opt_id(&dapl)?,
    );
    let dataset = Handle::acquire(
        engine,
        HandleKind::Dataset,
        || format!("creating dataset '{name}'"),
        |e| e.dataset_create(loc, name, ids.0, ids.1, ids.2, ids.3, ids.4),
    )?;
    tracing::debug!(name, %datatype, ?dims, "created dataset");
    Dataset::from_handle(dataset)
}
