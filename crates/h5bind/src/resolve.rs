//! Engine-side type and extent objects.

use std::fmt;
use std::sync::Arc;

use h5bind_engine::{Dataspace, Datatype, Engine, HandleKind, Hid};

use crate::error::Result;
use crate::handle::Handle;
use crate::shape::Shape;
use crate::types::H5Type;

/// An engine datatype together with its descriptor.
#[derive(Debug, Clone)]
pub struct DataType {
    handle: Handle,
    descriptor: Datatype,
}

impl DataType {
    /// Register `descriptor` with the engine.
    pub fn from_descriptor(engine: &Arc<dyn Engine>, descriptor: &Datatype) -> Result<Self> {
        let handle = Handle::acquire(
            engine,
            HandleKind::Datatype,
            || format!("creating {descriptor} datatype"),
            |e| e.type_create(descriptor),
        )?;
        Ok(Self {
            handle,
            descriptor: descriptor.clone(),
        })
    }

    /// Wrap an identifier the engine returned, reading its descriptor.
    pub(crate) fn from_handle(handle: Handle) -> Result<Self> {
        let id = handle.id()?;
        let descriptor = handle
            .mapper()
            .call(|| format!("describing datatype {id}"), |e| e.type_describe(id))?;
        Ok(Self { handle, descriptor })
    }

    pub fn descriptor(&self) -> &Datatype {
        &self.descriptor
    }

    /// Element size in bytes.
    pub fn size(&self) -> usize {
        self.descriptor.type_size() as usize
    }

    pub fn id(&self) -> Result<Hid> {
        self.handle.id()
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Whether the engine can convert values of type `T` to and from this
    /// type without a class change.
    pub fn matches<T: H5Type>(&self) -> Result<bool> {
        Ok(T::type_descriptor()? == self.descriptor)
    }
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.descriptor.fmt(f)
    }
}

/// The native datatype of `T`, created on `engine`.
pub fn resolve<T: H5Type>(engine: &Arc<dyn Engine>) -> Result<DataType> {
    DataType::from_descriptor(engine, &T::type_descriptor()?)
}

/// An engine dataspace together with its descriptor.
#[derive(Debug, Clone)]
pub struct DataSpace {
    handle: Handle,
    descriptor: Dataspace,
}

impl DataSpace {
    pub fn from_descriptor(engine: &Arc<dyn Engine>, descriptor: &Dataspace) -> Result<Self> {
        let handle = Handle::acquire(
            engine,
            HandleKind::Dataspace,
            || format!("creating dataspace {:?}", descriptor.dimensions),
            |e| e.space_create(descriptor),
        )?;
        Ok(Self {
            handle,
            descriptor: descriptor.clone(),
        })
    }

    /// Fixed extents `dims`; no dimensions means a scalar.
    pub fn simple(engine: &Arc<dyn Engine>, dims: &[u64]) -> Result<Self> {
        Self::from_descriptor(engine, &Dataspace::simple(dims))
    }

    pub(crate) fn from_handle(handle: Handle) -> Result<Self> {
        let id = handle.id()?;
        let descriptor = handle
            .mapper()
            .call(|| format!("describing dataspace {id}"), |e| e.space_describe(id))?;
        Ok(Self { handle, descriptor })
    }

    pub fn descriptor(&self) -> &Dataspace {
        &self.descriptor
    }

    pub fn shape(&self) -> Shape {
        Shape::new(self.descriptor.dimensions.clone())
    }

    pub fn max_dims(&self) -> &[u64] {
        self.descriptor.max_dims()
    }

    pub fn num_elements(&self) -> u64 {
        self.descriptor.num_elements()
    }

    pub fn id(&self) -> Result<Hid> {
        self.handle.id()
    }

    /// Change the current extents of this (detached) dataspace.
    pub fn set_extents(&mut self, dims: &[u64]) -> Result<()> {
        let id = self.handle.id()?;
        self.handle.mapper().call(
            || format!("setting dataspace extents to {dims:?}"),
            |e| e.space_set_extents(id, dims),
        )?;
        self.descriptor = Self::from_handle(self.handle.clone())?.descriptor;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5bind_engine::{MemEngine, UNLIMITED};

    #[test]
    fn resolved_types_describe_themselves() {
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
        let dt = resolve::<u32>(&engine).unwrap();
        assert_eq!(dt.size(), 4);
        assert!(dt.matches::<u32>().unwrap());
        assert!(!dt.matches::<i32>().unwrap());
        let again = DataType::from_handle(dt.handle().clone()).unwrap();
        assert_eq!(again, dt);
    }

    #[test]
    fn dataspace_extents_can_change() {
        let engine: Arc<dyn Engine> = Arc::new(MemEngine::new());
        let desc = Dataspace::simple(&[2]).with_max_dims(&[UNLIMITED]);
        let mut space = DataSpace::from_descriptor(&engine, &desc).unwrap();
        space.set_extents(&[5]).unwrap();
        assert_eq!(space.shape().dims(), &[5]);
        assert_eq!(space.max_dims(), &[UNLIMITED]);
        assert_eq!(DataSpace::simple(&engine, &[]).unwrap().num_elements(), 1);
    }
}
