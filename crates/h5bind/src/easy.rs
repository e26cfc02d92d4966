//! One-call dumping and loading of whole values by path.
//!
//! ```
//! use h5bind::easy::{self, DumpMode};
//! use h5bind::{File, OpenMode};
//!
//! let file = File::open("easy-doc.h5", OpenMode::Truncate)?;
//! easy::dump(&file, "/path/to/A", &vec![1.0f64, 2.0, 3.0], DumpMode::Create)?;
//! easy::dump(&file, "/path/to/A", &vec![4.0f64, 5.0, 6.0], DumpMode::Overwrite)?;
//!
//! let a: Vec<f64> = easy::load(&file, "/path/to/A")?;
//! assert_eq!(a, [4.0, 5.0, 6.0]);
//! assert_eq!(easy::get_shape(&file, "/path/to/A")?, [3]);
//! # Ok::<(), h5bind::Error>(())
//! ```

use crate::attribute::{Attribute, AttributeOwner};
use crate::dataset::{Dataset, DatasetOptions};
use crate::error::{Error, Result};
use crate::file::File;
use crate::group::{Location, Object};
use crate::props::PropertyListBuilder;
use crate::shape::{H5Data, H5DataRead, Shape};
use crate::types::H5Type;

/// Chunk extent per dimension of datasets created by [`dump_at`].
const EXTENDIBLE_CHUNK: u64 = 10;

/// What [`dump`] does when the path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpMode {
    /// Fail.
    #[default]
    Create,
    /// Replace the contents, which must have the same shape.
    Overwrite,
}

/// Options for [`dump_with`] and [`dump_at_with`].
#[derive(Debug, Clone)]
pub struct DumpOptions {
    mode: DumpMode,
    deflate: Option<u32>,
    chunk: Option<Vec<u64>>,
    flush: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            mode: DumpMode::Create,
            deflate: None,
            chunk: None,
            flush: true,
        }
    }
}

impl DumpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: DumpMode) -> Self {
        self.mode = mode;
        self
    }

    /// Compress new datasets with deflate at `level` (0-9). Without an
    /// explicit chunk size, the whole value is one chunk.
    pub fn compression(mut self, level: u32) -> Self {
        self.deflate = Some(level);
        self
    }

    pub fn chunk_size(mut self, dims: &[u64]) -> Self {
        self.chunk = Some(dims.to_vec());
        self
    }

    /// Flush the file after every dump. On by default.
    pub fn flush(mut self, flush: bool) -> Self {
        self.flush = flush;
        self
    }

    fn dataset_options(&self, dims: &[u64]) -> Result<DatasetOptions> {
        let lcpl = PropertyListBuilder::link_create()
            .create_intermediate_groups(true)?
            .build();
        let mut options = DatasetOptions::new().link_create(lcpl);
        if dims.is_empty() {
            return Ok(options);
        }
        let mut dcpl = PropertyListBuilder::dataset_create();
        match (&self.chunk, self.deflate) {
            (Some(chunk), _) => dcpl = dcpl.chunk(chunk)?,
            (None, Some(_)) => {
                let whole: Vec<u64> = dims.iter().map(|&d| d.max(1)).collect();
                dcpl = dcpl.chunk(&whole)?;
            }
            (None, None) => {}
        }
        if let Some(level) = self.deflate {
            dcpl = dcpl.deflate(level)?;
        }
        options = options.create(dcpl.build());
        Ok(options)
    }

    fn finish(&self, file: &File) -> Result<()> {
        if self.flush {
            file.flush()?;
        }
        Ok(())
    }
}

/// Write `value` to a dataset at `path`, creating missing groups on the
/// way.
pub fn dump<V>(file: &File, path: &str, value: &V, mode: DumpMode) -> Result<Dataset>
where
    V: H5Data + ?Sized,
{
    dump_with(file, path, value, &DumpOptions::new().mode(mode))
}

pub fn dump_with<V>(file: &File, path: &str, value: &V, options: &DumpOptions) -> Result<Dataset>
where
    V: H5Data + ?Sized,
{
    let shape = value.shape()?;
    let dataset = if options.mode == DumpMode::Overwrite && file.exists(path)? {
        let dataset = file.dataset(path)?;
        let stored = dataset.shape()?;
        if stored.as_slice() != shape.dims() {
            let context = format!("overwriting '{path}'");
            return Err(Error::shape_mismatch(context, &stored, shape.dims()));
        }
        dataset.write(value)?;
        dataset
    } else {
        file.create_dataset_from_with(path, value, &options.dataset_options(shape.dims())?)?
    };
    options.finish(file)?;
    tracing::debug!(file = file.name(), path, %shape, "dumped");
    Ok(dataset)
}

/// Read the whole dataset at `path`.
pub fn load<T: H5DataRead>(file: &File, path: &str) -> Result<T> {
    file.dataset(path)?.read()
}

/// Store one element at `index` of an extendible dataset, creating or
/// growing it as needed. Elements never written read as zero.
pub fn dump_at<T>(file: &File, path: &str, value: &T, index: &[u64]) -> Result<Dataset>
where
    T: H5Type + H5DataRead<Element = T> + Clone,
{
    dump_at_with(file, path, value, index, &DumpOptions::new())
}

pub fn dump_at_with<T>(
    file: &File,
    path: &str,
    value: &T,
    index: &[u64],
    options: &DumpOptions,
) -> Result<Dataset>
where
    T: H5Type + H5DataRead<Element = T> + Clone,
{
    let context = || format!("dumping '{path}' at {index:?}");
    let needed = index
        .iter()
        .map(|&i| i.checked_add(1))
        .collect::<Option<Vec<u64>>>()
        .ok_or_else(|| Error::ShapeMismatch {
            context: context(),
            detail: "index exceeds the largest extent".into(),
        })?;

    let dataset = if file.exists(path)? {
        let dataset = file.dataset(path)?;
        let dims = dataset.shape()?;
        if dims.len() != index.len() {
            return Err(Error::ShapeMismatch {
                context: context(),
                detail: format!("index has rank {}, dataset has shape {dims:?}", index.len()),
            });
        }
        let grown: Vec<u64> = dims.iter().zip(&needed).map(|(&d, &n)| d.max(n)).collect();
        if grown != dims {
            dataset.resize(&grown)?;
        }
        dataset
    } else {
        let chunk = match &options.chunk {
            Some(chunk) => chunk.clone(),
            None => vec![EXTENDIBLE_CHUNK; index.len()],
        };
        let mut dcpl = PropertyListBuilder::dataset_create().chunk(&chunk)?;
        if let Some(level) = options.deflate {
            dcpl = dcpl.deflate(level)?;
        }
        let lcpl = PropertyListBuilder::link_create()
            .create_intermediate_groups(true)?
            .build();
        let dataset_options = DatasetOptions::new()
            .resizable(index.len())
            .link_create(lcpl)
            .create(dcpl.build());
        file.create_dataset_with::<T>(path, &needed, &dataset_options)?
    };

    let shape = Shape::new(dataset.shape()?);
    let offset = flat_offset(&shape, index).ok_or_else(|| Error::ShapeMismatch {
        context: context(),
        detail: format!("index is outside shape {shape}"),
    })?;
    let mut elements: Vec<T> = dataset.read_flat()?;
    elements[offset] = value.clone();
    dataset.write_flat(&elements)?;
    options.finish(file)?;
    Ok(dataset)
}

/// Read the element at `index` of the dataset at `path`.
pub fn load_at<T>(file: &File, path: &str, index: &[u64]) -> Result<T>
where
    T: H5Type + H5DataRead<Element = T>,
{
    let dataset = file.dataset(path)?;
    let shape = Shape::new(dataset.shape()?);
    let offset = flat_offset(&shape, index).ok_or_else(|| Error::ShapeMismatch {
        context: format!("loading '{path}' at {index:?}"),
        detail: format!("index is outside shape {shape}"),
    })?;
    let mut elements: Vec<T> = dataset.read_flat()?;
    Ok(elements.swap_remove(offset))
}

/// Row-major position of `index`, if it lies inside `shape`.
fn flat_offset(shape: &Shape, index: &[u64]) -> Option<usize> {
    if index.len() != shape.rank() || index.iter().zip(shape.dims()).any(|(&i, &d)| i >= d) {
        return None;
    }
    let offset: u64 = index.iter().zip(shape.strides()).map(|(&i, s)| i * s).sum();
    usize::try_from(offset).ok()
}

/// Write `value` as attribute `name` of the group or dataset at `path`.
pub fn dump_attribute<V>(
    file: &File,
    path: &str,
    name: &str,
    value: &V,
    mode: DumpMode,
) -> Result<Attribute>
where
    V: H5Data + ?Sized,
{
    let attribute = match file.get(path)? {
        Object::Group(group) => dump_attribute_on(&group, path, name, value, mode)?,
        Object::Dataset(dataset) => dump_attribute_on(&dataset, path, name, value, mode)?,
        Object::Datatype(_) => return Err(no_attributes(path)),
    };
    file.flush()?;
    Ok(attribute)
}

fn dump_attribute_on<O, V>(
    owner: &O,
    path: &str,
    name: &str,
    value: &V,
    mode: DumpMode,
) -> Result<Attribute>
where
    O: AttributeOwner,
    V: H5Data + ?Sized,
{
    if mode == DumpMode::Create || !owner.has_attribute(name)? {
        return owner.create_attribute_from(name, value);
    }
    let attribute = owner.attribute(name)?;
    let shape = value.shape()?;
    let stored = attribute.shape()?;
    if stored.as_slice() != shape.dims() {
        let context = format!("overwriting attribute '{name}' of '{path}'");
        return Err(Error::shape_mismatch(context, &stored, shape.dims()));
    }
    attribute.write(value)?;
    Ok(attribute)
}

pub fn load_attribute<T: H5DataRead>(file: &File, path: &str, name: &str) -> Result<T> {
    match file.get(path)? {
        Object::Group(group) => group.attribute(name)?.read(),
        Object::Dataset(dataset) => dataset.attribute(name)?.read(),
        Object::Datatype(_) => Err(no_attributes(path)),
    }
}

fn no_attributes(path: &str) -> Error {
    Error::IncompatibleType {
        context: format!("accessing attributes of '{path}'"),
        detail: "object is a committed datatype".into(),
    }
}

/// Number of elements of the dataset at `path`.
pub fn get_size(file: &File, path: &str) -> Result<u64> {
    Ok(file.dataset(path)?.space()?.num_elements())
}

pub fn get_shape(file: &File, path: &str) -> Result<Vec<u64>> {
    file.dataset(path)?.shape()
}
