//! Files: the root of an object hierarchy.

use std::fmt;
use std::sync::Arc;

use h5bind_engine::{CreateDisposition, Engine, FileMode, HandleKind, PlistClass};

use crate::attribute::AttributeOwner;
use crate::error::Result;
use crate::group::{Group, Location};
use crate::handle::{AsHandle, Handle};
use crate::props::{opt_id, realize_opt, PropertyList};

/// How [`File::open`] treats an existing or missing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing file for reading.
    ReadOnly,
    /// Open an existing file for reading and writing.
    ReadWrite,
    /// Create a file, replacing an existing one that is not open.
    Truncate,
    /// Create a file, failing if it exists.
    Excl,
    /// Same as [`OpenMode::Excl`].
    Create,
    /// Open an existing file for writing, or create it.
    OpenOrCreate,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        self != OpenMode::ReadOnly
    }
}

/// An open file.
///
/// ```
/// use h5bind::{File, Location, OpenMode};
///
/// let file = File::open("doc-file.h5", OpenMode::Truncate)?;
/// file.create_dataset_from("x", &vec![1.0f64, 2.0, 3.0])?;
/// let x: Vec<f64> = file.dataset("x")?.read()?;
/// assert_eq!(x, [1.0, 2.0, 3.0]);
/// # Ok::<(), h5bind::Error>(())
/// ```
#[derive(Clone)]
pub struct File {
    handle: Handle,
    name: String,
    mode: OpenMode,
}

impl File {
    /// Open `name` on the process-wide [`default_engine`](crate::default_engine).
    pub fn open(name: &str, mode: OpenMode) -> Result<Self> {
        Self::open_in(&crate::default_engine(), name, mode)
    }

    /// Create `name`, replacing any existing file.
    pub fn create(name: &str) -> Result<Self> {
        Self::open(name, OpenMode::Truncate)
    }

    pub fn open_in(engine: &Arc<dyn Engine>, name: &str, mode: OpenMode) -> Result<Self> {
        Self::open_with(engine, name, mode, None, None)
    }

    /// Open with file creation and file access options. Creation options
    /// are ignored when an existing file is opened.
    pub fn open_with(
        engine: &Arc<dyn Engine>,
        name: &str,
        mode: OpenMode,
        fcpl: Option<&PropertyList>,
        fapl: Option<&PropertyList>,
    ) -> Result<Self> {
        let fcpl = realize_opt(engine, fcpl, PlistClass::FileCreate)?;
        let fapl = realize_opt(engine, fapl, PlistClass::FileAccess)?;
        let (fcpl_id, fapl_id) = (opt_id(&fcpl)?, opt_id(&fapl)?);

        let create = |disposition| {
            Handle::acquire(
                engine,
                HandleKind::File,
                || format!("creating file '{name}'"),
                |e| e.file_create(name, disposition, fcpl_id, fapl_id),
            )
        };
        let open = |file_mode| {
            Handle::acquire(
                engine,
                HandleKind::File,
                || format!("opening file '{name}'"),
                |e| e.file_open(name, file_mode, fapl_id),
            )
        };
        let handle = match mode {
            OpenMode::ReadOnly => open(FileMode::ReadOnly)?,
            OpenMode::ReadWrite => open(FileMode::ReadWrite)?,
            OpenMode::Truncate => create(CreateDisposition::Truncate)?,
            OpenMode::Excl | OpenMode::Create => create(CreateDisposition::Exclusive)?,
            OpenMode::OpenOrCreate if engine.file_exists(name) => open(FileMode::ReadWrite)?,
            OpenMode::OpenOrCreate => create(CreateDisposition::Exclusive)?,
        };
        tracing::debug!(file = name, ?mode, "opened file");
        Ok(Self {
            handle,
            name: name.to_string(),
            mode,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        self.handle.engine()
    }

    /// The root group.
    pub fn root(&self) -> Result<Group> {
        self.group("/")
    }

    pub fn flush(&self) -> Result<()> {
        let id = self.handle.id()?;
        self.handle
            .mapper()
            .call(|| format!("flushing file '{}'", self.name), |e| e.file_flush(id))
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Close the file for every clone. Objects opened from it stay usable
    /// until they are dropped.
    pub fn close(&self) -> Result<()> {
        tracing::debug!(file = %self.name, "closing file");
        self.handle.close()
    }
}

impl AsHandle for File {
    fn as_handle(&self) -> &Handle {
        &self.handle
    }
}

impl Location for File {}
impl AttributeOwner for File {}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("handle", &self.handle)
            .finish()
    }
}
