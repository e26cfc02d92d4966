//! In-memory reference engine.
//!
//! [`MemEngine`] keeps every file as an object graph in process memory for
//! the lifetime of the engine value. It implements the full [`Engine`]
//! contract: a handle table with kind checks, read-only files, link paths
//! with optional intermediate groups, chunked and extendible datasets,
//! attributes, committed datatypes, object references, element conversion,
//! per-file and per-engine payload heaps, and a per-thread error stack with
//! switchable error printing.

mod convert;
mod heap;
mod store;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::dataspace::{Dataspace, UNLIMITED};
use crate::datatype::Datatype;
use crate::engine::{
    CreateDisposition, Engine, FileMode, HandleKind, Hid, ObjectKind, VarLenRef,
};
use crate::error::{EngineError, EngineResult, ErrorRecord, Major, Minor};
use crate::plist::{self, PlistClass, Property, StringOverflow};

use heap::PayloadHeap;
use store::{DatasetNode, FileStore, NodeBody, NodeId, Stored, ROOT};

/// What an identifier refers to.
#[derive(Debug, Clone)]
enum Entry {
    File {
        file: String,
        writable: bool,
    },
    Object {
        file: String,
        node: NodeId,
        kind: HandleKind,
        writable: bool,
    },
    Attribute {
        file: String,
        owner: NodeId,
        name: String,
        writable: bool,
    },
    Datatype(Datatype),
    Dataspace(Dataspace),
    Plist {
        class: PlistClass,
        props: Vec<Property>,
    },
}

impl Entry {
    fn kind(&self) -> HandleKind {
        match self {
            Entry::File { .. } => HandleKind::File,
            Entry::Object { kind, .. } => *kind,
            Entry::Attribute { .. } => HandleKind::Attribute,
            Entry::Datatype(_) => HandleKind::Datatype,
            Entry::Dataspace(_) => HandleKind::Dataspace,
            Entry::Plist { .. } => HandleKind::PropertyList,
        }
    }

    fn file(&self) -> Option<&str> {
        match self {
            Entry::File { file, .. }
            | Entry::Object { file, .. }
            | Entry::Attribute { file, .. } => Some(file),
            _ => None,
        }
    }
}

/// An object inside a file that a call operates on.
#[derive(Debug, Clone)]
struct Loc {
    file: String,
    node: NodeId,
    writable: bool,
}

#[derive(Debug, Default)]
struct State {
    next_hid: i64,
    handles: HashMap<Hid, Entry>,
    files: BTreeMap<String, FileStore>,
    heap: PayloadHeap,
    silenced: HashSet<ThreadId>,
    errors: HashMap<ThreadId, Vec<ErrorRecord>>,
    flushes: usize,
}

fn bad_id(id: Hid, what: &str) -> EngineError {
    EngineError::new(Major::Id, Minor::BadId, format!("{id} is not a valid {what}"))
}

fn read_only(file: &str) -> EngineError {
    EngineError::new(
        Major::File,
        Minor::ReadOnly,
        format!("file '{file}' was opened read-only"),
    )
}

impl State {
    fn register(&mut self, entry: Entry) -> Hid {
        self.next_hid += 1;
        let id = Hid(self.next_hid);
        tracing::trace!(%id, kind = %entry.kind(), "engine handle opened");
        self.handles.insert(id, entry);
        id
    }

    fn entry(&self, id: Hid) -> EngineResult<&Entry> {
        self.handles.get(&id).ok_or_else(|| bad_id(id, "identifier"))
    }

    fn store(&self, file: &str) -> EngineResult<&FileStore> {
        self.files.get(file).ok_or_else(|| {
            EngineError::new(Major::File, Minor::NotFound, format!("no file '{file}'"))
        })
    }

    fn store_mut(&mut self, file: &str) -> EngineResult<&mut FileStore> {
        self.files.get_mut(file).ok_or_else(|| {
            EngineError::new(Major::File, Minor::NotFound, format!("no file '{file}'"))
        })
    }

    /// A file or group identifier, as the starting point of link paths.
    fn location(&self, id: Hid) -> EngineResult<Loc> {
        match self.entry(id)? {
            Entry::File { file, writable } => Ok(Loc {
                file: file.clone(),
                node: ROOT,
                writable: *writable,
            }),
            Entry::Object {
                file,
                node,
                kind: HandleKind::Group,
                writable,
            } => Ok(Loc {
                file: file.clone(),
                node: *node,
                writable: *writable,
            }),
            _ => Err(bad_id(id, "file or group")),
        }
    }

    /// A file, group or dataset identifier, as the owner of attributes.
    fn attribute_owner(&self, id: Hid) -> EngineResult<Loc> {
        match self.entry(id)? {
            Entry::Object {
                file,
                node,
                kind: HandleKind::Dataset,
                writable,
            } => Ok(Loc {
                file: file.clone(),
                node: *node,
                writable: *writable,
            }),
            _ => self
                .location(id)
                .map_err(|_| bad_id(id, "file, group or dataset")),
        }
    }

    fn dataset(&self, id: Hid) -> EngineResult<Loc> {
        match self.entry(id)? {
            Entry::Object {
                file,
                node,
                kind: HandleKind::Dataset,
                writable,
            } => Ok(Loc {
                file: file.clone(),
                node: *node,
                writable: *writable,
            }),
            _ => Err(bad_id(id, "dataset")),
        }
    }

    fn attribute(&self, id: Hid) -> EngineResult<(Loc, String)> {
        match self.entry(id)? {
            Entry::Attribute {
                file,
                owner,
                name,
                writable,
            } => Ok((
                Loc {
                    file: file.clone(),
                    node: *owner,
                    writable: *writable,
                },
                name.clone(),
            )),
            _ => Err(bad_id(id, "attribute")),
        }
    }

    fn datatype(&self, id: Hid) -> EngineResult<Datatype> {
        match self.entry(id)? {
            Entry::Datatype(t) => Ok(t.clone()),
            _ => Err(bad_id(id, "datatype")),
        }
    }

    fn dataspace(&self, id: Hid) -> EngineResult<Dataspace> {
        match self.entry(id)? {
            Entry::Dataspace(s) => Ok(s.clone()),
            _ => Err(bad_id(id, "dataspace")),
        }
    }

    /// Options of an optional property list of the expected class.
    fn plist(&self, id: Option<Hid>, expected: PlistClass) -> EngineResult<Vec<Property>> {
        let Some(id) = id else {
            return Ok(Vec::new());
        };
        match self.entry(id)? {
            Entry::Plist { class, props } if *class == expected => Ok(props.clone()),
            Entry::Plist { class, .. } => Err(EngineError::new(
                Major::Plist,
                Minor::BadValue,
                format!("expected a {expected} property list, got a {class} list"),
            )),
            _ => Err(bad_id(id, "property list")),
        }
    }

    fn is_file_open(&self, file: &str) -> bool {
        self.handles.values().any(|e| e.file() == Some(file))
    }

    /// Stored data of a dataset or attribute.
    fn stored(&self, loc: &Loc, attr: Option<&str>) -> EngineResult<&Stored> {
        let node = self.store(&loc.file)?.node(loc.node)?;
        match attr {
            Some(name) => node.attrs.get(name).ok_or_else(|| {
                EngineError::new(
                    Major::Attribute,
                    Minor::NotFound,
                    format!("attribute '{name}' no longer exists"),
                )
            }),
            None => match &node.body {
                NodeBody::Dataset(d) => Ok(&d.stored),
                _ => Err(EngineError::new(
                    Major::Dataset,
                    Minor::BadValue,
                    "object is not a dataset",
                )),
            },
        }
    }

    /// Convert caller elements into a stored dataset or attribute.
    fn write(
        &mut self,
        loc: &Loc,
        attr: Option<&str>,
        mem_type: &Datatype,
        buf: &[u8],
        policy: StringOverflow,
    ) -> EngineResult<()> {
        if !loc.writable {
            return Err(read_only(&loc.file));
        }
        let major = if attr.is_some() {
            Major::Attribute
        } else {
            Major::Dataset
        };
        let State { files, heap, .. } = self;
        let store = files
            .get_mut(&loc.file)
            .ok_or_else(|| EngineError::new(Major::File, Minor::NotFound, "file vanished"))?;
        let (node, file_heap) = store.node_and_heap(loc.node)?;
        let stored = match (attr, &mut node.body) {
            (Some(name), _) => node.attrs.get_mut(name).ok_or_else(|| {
                EngineError::new(major, Minor::NotFound, format!("attribute '{name}' no longer exists"))
            })?,
            (None, NodeBody::Dataset(d)) => &mut d.stored,
            (None, _) => {
                return Err(EngineError::new(major, Minor::BadValue, "object is not a dataset"))
            }
        };
        let expected = store::byte_len(&stored.space, mem_type)?;
        if buf.len() != expected {
            return Err(EngineError::new(
                major,
                Minor::ShapeMismatch,
                format!(
                    "buffer holds {} bytes, {} elements of {mem_type} need {expected}",
                    buf.len(),
                    stored.space.num_elements()
                ),
            ));
        }
        let mut data = vec![0u8; stored.data.len()];
        convert::convert_elements(
            mem_type,
            buf,
            heap,
            &stored.datatype,
            &mut data,
            file_heap,
            policy,
        )?;
        convert::release_payloads(&stored.datatype, &stored.data, file_heap);
        stored.data = data;
        Ok(())
    }

    /// Convert stored elements into a caller buffer. Payloads land on the
    /// engine heap.
    fn read(
        &mut self,
        loc: &Loc,
        attr: Option<&str>,
        mem_type: &Datatype,
        buf: &mut [u8],
        policy: StringOverflow,
    ) -> EngineResult<()> {
        let major = if attr.is_some() {
            Major::Attribute
        } else {
            Major::Dataset
        };
        let State { files, heap, .. } = self;
        let store = files
            .get(&loc.file)
            .ok_or_else(|| EngineError::new(Major::File, Minor::NotFound, "file vanished"))?;
        let node = store.node(loc.node)?;
        let stored = match (attr, &node.body) {
            (Some(name), _) => node.attrs.get(name).ok_or_else(|| {
                EngineError::new(major, Minor::NotFound, format!("attribute '{name}' no longer exists"))
            })?,
            (None, NodeBody::Dataset(d)) => &d.stored,
            (None, _) => {
                return Err(EngineError::new(major, Minor::BadValue, "object is not a dataset"))
            }
        };
        let expected = store::byte_len(&stored.space, mem_type)?;
        if buf.len() != expected {
            return Err(EngineError::new(
                major,
                Minor::ShapeMismatch,
                format!(
                    "buffer holds {} bytes, {} elements of {mem_type} need {expected}",
                    buf.len(),
                    stored.space.num_elements()
                ),
            ));
        }
        convert::convert_elements(
            &stored.datatype,
            &stored.data,
            &store.heap,
            mem_type,
            buf,
            heap,
            policy,
        )
    }

    /// Register a handle for the object at `node`.
    fn open_node(&mut self, loc: &Loc, node: NodeId) -> EngineResult<Hid> {
        let object = self.store(&loc.file)?.node(node)?;
        let entry = match &object.body {
            NodeBody::Group { .. } => Entry::Object {
                file: loc.file.clone(),
                node,
                kind: HandleKind::Group,
                writable: loc.writable,
            },
            NodeBody::Dataset(_) => Entry::Object {
                file: loc.file.clone(),
                node,
                kind: HandleKind::Dataset,
                writable: loc.writable,
            },
            NodeBody::Datatype(t) => Entry::Datatype(t.clone()),
        };
        Ok(self.register(entry))
    }
}

/// Check the storage layout rules of a new dataset.
fn check_layout(space: &Dataspace, dcpl: &[Property]) -> EngineResult<()> {
    let bad = |msg: String| Err(EngineError::new(Major::Dataset, Minor::BadValue, msg));
    space
        .validate()
        .map_err(|msg| EngineError::new(Major::Dataspace, Minor::BadValue, msg))?;
    let chunk = plist::chunk_dims(dcpl);
    let filtered = dcpl
        .iter()
        .any(|p| matches!(p, Property::Deflate(_) | Property::Shuffle));
    match chunk {
        None if space.is_extendible() => {
            return bad("extendible datasets require a chunked layout".into())
        }
        None if filtered => return bad("compression filters require a chunked layout".into()),
        None => {}
        Some(dims) => {
            if dims.len() != space.rank() {
                return bad(format!(
                    "chunk rank {} differs from dataspace rank {}",
                    dims.len(),
                    space.rank()
                ));
            }
            for (i, (&c, &m)) in dims.iter().zip(space.max_dims()).enumerate() {
                if m != UNLIMITED && c > m {
                    return bad(format!(
                        "chunk dimension {i} ({c}) exceeds maximum extent {m}"
                    ));
                }
            }
        }
    }
    Ok(())
}

/// In-memory implementation of [`Engine`].
#[derive(Debug, Default)]
pub struct MemEngine {
    state: Mutex<State>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live identifiers of any kind.
    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Number of successful flushes so far.
    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    /// Names of all files held by the engine.
    pub fn file_names(&self) -> Vec<String> {
        self.state.lock().files.keys().cloned().collect()
    }

    /// Run one engine call. Clears the calling thread's error stack first
    /// and records the failure, if any, on it afterwards.
    fn run<T>(
        &self,
        function: &'static str,
        f: impl FnOnce(&mut State) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut state = self.state.lock();
        let thread = thread::current().id();
        state.errors.remove(&thread);
        let result = f(&mut *state);
        if let Err(err) = &result {
            let record = ErrorRecord {
                major: err.major,
                minor: err.minor,
                function,
                description: err.message.clone(),
            };
            if !state.silenced.contains(&thread) {
                tracing::error!(target: "h5bind_engine", "{record}");
            }
            state.errors.entry(thread).or_default().push(record);
        }
        result
    }
}

impl Engine for MemEngine {
    fn close(&self, id: Hid) -> EngineResult<()> {
        self.run("close", |st| {
            let entry = st.handles.remove(&id).ok_or_else(|| bad_id(id, "identifier"))?;
            tracing::trace!(%id, kind = %entry.kind(), "engine handle closed");
            Ok(())
        })
    }

    fn is_valid(&self, id: Hid) -> bool {
        self.state.lock().handles.contains_key(&id)
    }

    fn handle_kind(&self, id: Hid) -> EngineResult<HandleKind> {
        self.run("handle_kind", |st| Ok(st.entry(id)?.kind()))
    }

    fn object_name(&self, id: Hid) -> EngineResult<String> {
        self.run("object_name", |st| match st.entry(id)? {
            Entry::File { file, .. } => Ok(file.clone()),
            Entry::Object { file, node, .. } => Ok(st.store(file)?.path_of(*node)),
            Entry::Attribute { name, .. } => Ok(name.clone()),
            other => Err(EngineError::new(
                Major::Id,
                Minor::Unsupported,
                format!("a {} has no name", other.kind()),
            )),
        })
    }

    fn file_create(
        &self,
        name: &str,
        disposition: CreateDisposition,
        fcpl: Option<Hid>,
        fapl: Option<Hid>,
    ) -> EngineResult<Hid> {
        self.run("file_create", |st| {
            let fcpl = st.plist(fcpl, PlistClass::FileCreate)?;
            st.plist(fapl, PlistClass::FileAccess)?;
            if st.files.contains_key(name) {
                match disposition {
                    CreateDisposition::Exclusive => {
                        return Err(EngineError::new(
                            Major::File,
                            Minor::CantOpen,
                            format!("unable to create '{name}': file exists"),
                        ))
                    }
                    CreateDisposition::Truncate if st.is_file_open(name) => {
                        return Err(EngineError::new(
                            Major::File,
                            Minor::CantOpen,
                            format!("unable to truncate '{name}': file is already open"),
                        ))
                    }
                    CreateDisposition::Truncate => {}
                }
            }
            st.files.insert(name.to_string(), FileStore::new(fcpl));
            Ok(st.register(Entry::File {
                file: name.to_string(),
                writable: true,
            }))
        })
    }

    fn file_open(&self, name: &str, mode: FileMode, fapl: Option<Hid>) -> EngineResult<Hid> {
        self.run("file_open", |st| {
            st.plist(fapl, PlistClass::FileAccess)?;
            if !st.files.contains_key(name) {
                return Err(EngineError::new(
                    Major::File,
                    Minor::CantOpen,
                    format!("unable to open '{name}': no such file"),
                ));
            }
            Ok(st.register(Entry::File {
                file: name.to_string(),
                writable: mode == FileMode::ReadWrite,
            }))
        })
    }

    fn file_exists(&self, name: &str) -> bool {
        self.state.lock().files.contains_key(name)
    }

    fn file_flush(&self, file: Hid) -> EngineResult<()> {
        self.run("file_flush", |st| {
            let name = st
                .entry(file)?
                .file()
                .ok_or_else(|| bad_id(file, "file object"))?
                .to_string();
            st.store(&name)?;
            st.flushes += 1;
            tracing::debug!(file = %name, "flushed");
            Ok(())
        })
    }

    fn group_create(
        &self,
        loc: Hid,
        name: &str,
        lcpl: Option<Hid>,
        gcpl: Option<Hid>,
    ) -> EngineResult<Hid> {
        self.run("group_create", |st| {
            let at = st.location(loc)?;
            let intermediate = plist::create_intermediate(&st.plist(lcpl, PlistClass::LinkCreate)?);
            let gcpl = st.plist(gcpl, PlistClass::GroupCreate)?;
            if !at.writable {
                return Err(read_only(&at.file));
            }
            let store = st.store_mut(&at.file)?;
            let (parent, leaf) = store.parent_of(at.node, name, intermediate)?;
            let id = store.insert(NodeBody::Group {
                links: BTreeMap::new(),
                gcpl,
            });
            store.link(parent, &leaf, id)?;
            Ok(st.register(Entry::Object {
                file: at.file,
                node: id,
                kind: HandleKind::Group,
                writable: true,
            }))
        })
    }

    fn group_open(&self, loc: Hid, name: &str) -> EngineResult<Hid> {
        self.run("group_open", |st| {
            let at = st.location(loc)?;
            let node = st.store(&at.file)?.resolve(at.node, name)?;
            if st.store(&at.file)?.node(node)?.kind() != ObjectKind::Group {
                return Err(EngineError::new(
                    Major::Link,
                    Minor::BadValue,
                    format!("'{name}' is not a group"),
                ));
            }
            st.open_node(&at, node)
        })
    }

    fn link_exists(&self, loc: Hid, name: &str) -> EngineResult<bool> {
        self.run("link_exists", |st| {
            let at = st.location(loc)?;
            Ok(st.store(&at.file)?.exists(at.node, name))
        })
    }

    fn link_names(&self, loc: Hid) -> EngineResult<Vec<String>> {
        self.run("link_names", |st| {
            let at = st.location(loc)?;
            st.store(&at.file)?.link_names(at.node)
        })
    }

    fn link_kind(&self, loc: Hid, name: &str) -> EngineResult<ObjectKind> {
        self.run("link_kind", |st| {
            let at = st.location(loc)?;
            let store = st.store(&at.file)?;
            Ok(store.node(store.resolve(at.node, name)?)?.kind())
        })
    }

    fn link_delete(&self, loc: Hid, name: &str) -> EngineResult<()> {
        self.run("link_delete", |st| {
            let at = st.location(loc)?;
            if !at.writable {
                return Err(read_only(&at.file));
            }
            let store = st.store_mut(&at.file)?;
            let (parent, leaf) = store.parent_of(at.node, name, false)?;
            store.unlink(parent, &leaf)?;
            Ok(())
        })
    }

    fn link_move(&self, loc: Hid, src: &str, dst: &str, lcpl: Option<Hid>) -> EngineResult<()> {
        self.run("link_move", |st| {
            let at = st.location(loc)?;
            let intermediate = plist::create_intermediate(&st.plist(lcpl, PlistClass::LinkCreate)?);
            if !at.writable {
                return Err(read_only(&at.file));
            }
            let store = st.store_mut(&at.file)?;
            if store.exists(at.node, dst) {
                return Err(EngineError::new(
                    Major::Link,
                    Minor::AlreadyExists,
                    format!("destination '{dst}' already exists"),
                ));
            }
            let (src_parent, src_leaf) = store.parent_of(at.node, src, false)?;
            let target = store.resolve(src_parent, &src_leaf)?;
            let (dst_parent, dst_leaf) = store.parent_of(at.node, dst, intermediate)?;
            store.unlink(src_parent, &src_leaf)?;
            store.link(dst_parent, &dst_leaf, target)
        })
    }

    fn type_create(&self, datatype: &Datatype) -> EngineResult<Hid> {
        self.run("type_create", |st| {
            datatype
                .validate()
                .map_err(|msg| EngineError::new(Major::Datatype, Minor::BadValue, msg))?;
            Ok(st.register(Entry::Datatype(datatype.clone())))
        })
    }

    fn type_describe(&self, datatype: Hid) -> EngineResult<Datatype> {
        self.run("type_describe", |st| st.datatype(datatype))
    }

    fn type_commit(&self, loc: Hid, name: &str, datatype: Hid) -> EngineResult<()> {
        self.run("type_commit", |st| {
            let at = st.location(loc)?;
            let dtype = st.datatype(datatype)?;
            if !at.writable {
                return Err(read_only(&at.file));
            }
            let store = st.store_mut(&at.file)?;
            let (parent, leaf) = store.parent_of(at.node, name, false)?;
            let id = store.insert(NodeBody::Datatype(dtype));
            store.link(parent, &leaf, id)
        })
    }

    fn type_open(&self, loc: Hid, name: &str) -> EngineResult<Hid> {
        self.run("type_open", |st| {
            let at = st.location(loc)?;
            let store = st.store(&at.file)?;
            let node = store.resolve(at.node, name)?;
            let dtype = match &store.node(node)?.body {
                NodeBody::Datatype(t) => t.clone(),
                _ => {
                    return Err(EngineError::new(
                        Major::Datatype,
                        Minor::BadValue,
                        format!("'{name}' is not a committed datatype"),
                    ))
                }
            };
            Ok(st.register(Entry::Datatype(dtype)))
        })
    }

    fn space_create(&self, space: &Dataspace) -> EngineResult<Hid> {
        self.run("space_create", |st| {
            space
                .validate()
                .map_err(|msg| EngineError::new(Major::Dataspace, Minor::BadValue, msg))?;
            Ok(st.register(Entry::Dataspace(space.clone())))
        })
    }

    fn space_describe(&self, space: Hid) -> EngineResult<Dataspace> {
        self.run("space_describe", |st| st.dataspace(space))
    }

    fn space_set_extents(&self, space: Hid, dims: &[u64]) -> EngineResult<()> {
        self.run("space_set_extents", |st| {
            let current = st.dataspace(space)?;
            let updated = if current.rank() == dims.len() && current.max_dimensions.is_some() {
                let mut s = current;
                s.set_extent(dims)
                    .map_err(|msg| EngineError::new(Major::Dataspace, Minor::BadValue, msg))?;
                s
            } else {
                let fresh = Dataspace::simple(dims);
                fresh
                    .validate()
                    .map_err(|msg| EngineError::new(Major::Dataspace, Minor::BadValue, msg))?;
                fresh
            };
            st.handles.insert(space, Entry::Dataspace(updated));
            Ok(())
        })
    }

    fn plist_create(&self, class: PlistClass) -> EngineResult<Hid> {
        self.run("plist_create", |st| {
            Ok(st.register(Entry::Plist {
                class,
                props: Vec::new(),
            }))
        })
    }

    fn plist_class(&self, id: Hid) -> EngineResult<PlistClass> {
        self.run("plist_class", |st| match st.entry(id)? {
            Entry::Plist { class, .. } => Ok(*class),
            _ => Err(bad_id(id, "property list")),
        })
    }

    fn plist_set(&self, id: Hid, prop: &Property) -> EngineResult<()> {
        self.run("plist_set", |st| {
            let Some(Entry::Plist { class, props }) = st.handles.get_mut(&id) else {
                return Err(bad_id(id, "property list"));
            };
            if !prop.is_applicable(*class) {
                return Err(EngineError::new(
                    Major::Plist,
                    Minor::BadValue,
                    format!("'{}' does not apply to a {class} property list", prop.name()),
                ));
            }
            prop.validate()?;
            plist::upsert(props, prop.clone());
            Ok(())
        })
    }

    fn plist_get(&self, id: Hid) -> EngineResult<Vec<Property>> {
        self.run("plist_get", |st| match st.entry(id)? {
            Entry::Plist { props, .. } => Ok(props.clone()),
            _ => Err(bad_id(id, "property list")),
        })
    }

    fn dataset_create(
        &self,
        loc: Hid,
        name: &str,
        datatype: Hid,
        space: Hid,
        lcpl: Option<Hid>,
        dcpl: Option<Hid>,
        dapl: Option<Hid>,
    ) -> EngineResult<Hid> {
        self.run("dataset_create", |st| {
            let at = st.location(loc)?;
            let dtype = st.datatype(datatype)?;
            let dspace = st.dataspace(space)?;
            let intermediate = plist::create_intermediate(&st.plist(lcpl, PlistClass::LinkCreate)?);
            let dcpl = st.plist(dcpl, PlistClass::DatasetCreate)?;
            st.plist(dapl, PlistClass::DatasetAccess)?;
            if !at.writable {
                return Err(read_only(&at.file));
            }
            check_layout(&dspace, &dcpl)?;
            let stored = Stored::new(dtype, dspace)?;
            let store = st.store_mut(&at.file)?;
            let (parent, leaf) = store.parent_of(at.node, name, intermediate)?;
            if store.exists(parent, &leaf) {
                return Err(EngineError::new(
                    Major::Dataset,
                    Minor::AlreadyExists,
                    format!("'{name}' already exists"),
                ));
            }
            let id = store.insert(NodeBody::Dataset(DatasetNode {
                stored,
                dcpl,
            }));
            store.link(parent, &leaf, id)?;
            Ok(st.register(Entry::Object {
                file: at.file,
                node: id,
                kind: HandleKind::Dataset,
                writable: true,
            }))
        })
    }

    fn dataset_open(&self, loc: Hid, name: &str, dapl: Option<Hid>) -> EngineResult<Hid> {
        self.run("dataset_open", |st| {
            let at = st.location(loc)?;
            st.plist(dapl, PlistClass::DatasetAccess)?;
            let store = st.store(&at.file)?;
            let node = store.resolve(at.node, name)?;
            if store.node(node)?.kind() != ObjectKind::Dataset {
                return Err(EngineError::new(
                    Major::Dataset,
                    Minor::BadValue,
                    format!("'{name}' is not a dataset"),
                ));
            }
            st.open_node(&at, node)
        })
    }

    fn dataset_space(&self, dataset: Hid) -> EngineResult<Hid> {
        self.run("dataset_space", |st| {
            let at = st.dataset(dataset)?;
            let space = st.stored(&at, None)?.space.clone();
            Ok(st.register(Entry::Dataspace(space)))
        })
    }

    fn dataset_type(&self, dataset: Hid) -> EngineResult<Hid> {
        self.run("dataset_type", |st| {
            let at = st.dataset(dataset)?;
            let dtype = st.stored(&at, None)?.datatype.clone();
            Ok(st.register(Entry::Datatype(dtype)))
        })
    }

    fn dataset_create_plist(&self, dataset: Hid) -> EngineResult<Hid> {
        self.run("dataset_create_plist", |st| {
            let at = st.dataset(dataset)?;
            let props = match &st.store(&at.file)?.node(at.node)?.body {
                NodeBody::Dataset(d) => d.dcpl.clone(),
                _ => Vec::new(),
            };
            Ok(st.register(Entry::Plist {
                class: PlistClass::DatasetCreate,
                props,
            }))
        })
    }

    fn dataset_set_extent(&self, dataset: Hid, dims: &[u64]) -> EngineResult<()> {
        self.run("dataset_set_extent", |st| {
            let at = st.dataset(dataset)?;
            if !at.writable {
                return Err(read_only(&at.file));
            }
            let store = st.store_mut(&at.file)?;
            if let NodeBody::Dataset(d) = &store.node(at.node)?.body {
                if plist::chunk_dims(&d.dcpl).is_none() {
                    return Err(EngineError::new(
                        Major::Dataset,
                        Minor::Unsupported,
                        "only chunked datasets can change extent",
                    ));
                }
            }
            store.resize_dataset(at.node, dims)
        })
    }

    fn dataset_write(
        &self,
        dataset: Hid,
        mem_type: Hid,
        buf: &[u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()> {
        self.run("dataset_write", |st| {
            let at = st.dataset(dataset)?;
            let mem_type = st.datatype(mem_type)?;
            let policy = plist::string_overflow(&st.plist(dxpl, PlistClass::DatasetTransfer)?);
            st.write(&at, None, &mem_type, buf, policy)
        })
    }

    fn dataset_read(
        &self,
        dataset: Hid,
        mem_type: Hid,
        buf: &mut [u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()> {
        self.run("dataset_read", |st| {
            let at = st.dataset(dataset)?;
            let mem_type = st.datatype(mem_type)?;
            let policy = plist::string_overflow(&st.plist(dxpl, PlistClass::DatasetTransfer)?);
            st.read(&at, None, &mem_type, buf, policy)
        })
    }

    fn attr_create(&self, obj: Hid, name: &str, datatype: Hid, space: Hid) -> EngineResult<Hid> {
        self.run("attr_create", |st| {
            let owner = st.attribute_owner(obj)?;
            let dtype = st.datatype(datatype)?;
            let dspace = st.dataspace(space)?;
            if !owner.writable {
                return Err(read_only(&owner.file));
            }
            if dspace.is_extendible() {
                return Err(EngineError::new(
                    Major::Attribute,
                    Minor::BadValue,
                    "attributes cannot have extendible dataspaces",
                ));
            }
            let stored = Stored::new(dtype, dspace)?;
            let node = st.store_mut(&owner.file)?.node_mut(owner.node)?;
            if node.attrs.contains_key(name) {
                return Err(EngineError::new(
                    Major::Attribute,
                    Minor::AlreadyExists,
                    format!("attribute '{name}' already exists"),
                ));
            }
            node.attrs
                .insert(name.to_string(), stored);
            Ok(st.register(Entry::Attribute {
                file: owner.file,
                owner: owner.node,
                name: name.to_string(),
                writable: true,
            }))
        })
    }

    fn attr_open(&self, obj: Hid, name: &str) -> EngineResult<Hid> {
        self.run("attr_open", |st| {
            let owner = st.attribute_owner(obj)?;
            let node = st.store(&owner.file)?.node(owner.node)?;
            if !node.attrs.contains_key(name) {
                return Err(EngineError::new(
                    Major::Attribute,
                    Minor::NotFound,
                    format!("no attribute named '{name}'"),
                ));
            }
            Ok(st.register(Entry::Attribute {
                file: owner.file,
                owner: owner.node,
                name: name.to_string(),
                writable: owner.writable,
            }))
        })
    }

    fn attr_exists(&self, obj: Hid, name: &str) -> EngineResult<bool> {
        self.run("attr_exists", |st| {
            let owner = st.attribute_owner(obj)?;
            Ok(st
                .store(&owner.file)?
                .node(owner.node)?
                .attrs
                .contains_key(name))
        })
    }

    fn attr_names(&self, obj: Hid) -> EngineResult<Vec<String>> {
        self.run("attr_names", |st| {
            let owner = st.attribute_owner(obj)?;
            Ok(st
                .store(&owner.file)?
                .node(owner.node)?
                .attrs
                .keys()
                .cloned()
                .collect())
        })
    }

    fn attr_delete(&self, obj: Hid, name: &str) -> EngineResult<()> {
        self.run("attr_delete", |st| {
            let owner = st.attribute_owner(obj)?;
            if !owner.writable {
                return Err(read_only(&owner.file));
            }
            let store = st.store_mut(&owner.file)?;
            let (node, heap) = store.node_and_heap(owner.node)?;
            let stored = node.attrs.remove(name).ok_or_else(|| {
                EngineError::new(
                    Major::Attribute,
                    Minor::NotFound,
                    format!("no attribute named '{name}'"),
                )
            })?;
            convert::release_payloads(&stored.datatype, &stored.data, heap);
            Ok(())
        })
    }

    fn attr_space(&self, attr: Hid) -> EngineResult<Hid> {
        self.run("attr_space", |st| {
            let (owner, name) = st.attribute(attr)?;
            let space = st.stored(&owner, Some(&name))?.space.clone();
            Ok(st.register(Entry::Dataspace(space)))
        })
    }

    fn attr_type(&self, attr: Hid) -> EngineResult<Hid> {
        self.run("attr_type", |st| {
            let (owner, name) = st.attribute(attr)?;
            let dtype = st.stored(&owner, Some(&name))?.datatype.clone();
            Ok(st.register(Entry::Datatype(dtype)))
        })
    }

    fn attr_write(
        &self,
        attr: Hid,
        mem_type: Hid,
        buf: &[u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()> {
        self.run("attr_write", |st| {
            let (owner, name) = st.attribute(attr)?;
            let mem_type = st.datatype(mem_type)?;
            let policy = plist::string_overflow(&st.plist(dxpl, PlistClass::DatasetTransfer)?);
            st.write(&owner, Some(&name), &mem_type, buf, policy)
        })
    }

    fn attr_read(
        &self,
        attr: Hid,
        mem_type: Hid,
        buf: &mut [u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()> {
        self.run("attr_read", |st| {
            let (owner, name) = st.attribute(attr)?;
            let mem_type = st.datatype(mem_type)?;
            let policy = plist::string_overflow(&st.plist(dxpl, PlistClass::DatasetTransfer)?);
            st.read(&owner, Some(&name), &mem_type, buf, policy)
        })
    }

    fn reference_create(&self, loc: Hid, name: &str) -> EngineResult<u64> {
        self.run("reference_create", |st| {
            let at = st.location(loc)?;
            st.store(&at.file)?.resolve(at.node, name)
        })
    }

    fn reference_open(&self, loc: Hid, address: u64) -> EngineResult<Hid> {
        self.run("reference_open", |st| {
            let at = st.location(loc)?;
            if address == 0 {
                return Err(EngineError::new(
                    Major::Args,
                    Minor::BadValue,
                    "null object reference",
                ));
            }
            st.store(&at.file)?.node(address).map_err(|_| {
                EngineError::new(
                    Major::Link,
                    Minor::NotFound,
                    format!("no object at address {address}"),
                )
            })?;
            st.open_node(&at, address)
        })
    }

    fn vlen_alloc(&self, payload: &[u8]) -> EngineResult<VarLenRef> {
        self.run("vlen_alloc", |st| Ok(st.heap.alloc(payload)))
    }

    fn vlen_payload(&self, slot: VarLenRef) -> EngineResult<Vec<u8>> {
        self.run("vlen_payload", |st| st.heap.get(slot).map(<[u8]>::to_vec))
    }

    fn vlen_free(&self, slot: VarLenRef) -> EngineResult<()> {
        self.run("vlen_free", |st| st.heap.free(slot))
    }

    fn vlen_live(&self) -> usize {
        self.state.lock().heap.live()
    }

    fn set_error_printing(&self, enabled: bool) -> bool {
        let thread = thread::current().id();
        let mut state = self.state.lock();
        let was_enabled = !state.silenced.contains(&thread);
        if enabled {
            state.silenced.remove(&thread);
        } else {
            state.silenced.insert(thread);
        }
        was_enabled
    }

    fn take_error_stack(&self) -> Vec<ErrorRecord> {
        let thread = thread::current().id();
        self.state.lock().errors.remove(&thread).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_stack_records_last_failure() {
        let engine = MemEngine::new();
        engine.set_error_printing(false);
        let err = engine.close(Hid(99)).unwrap_err();
        assert_eq!(err.minor, Minor::BadId);
        let stack = engine.take_error_stack();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].function, "close");
        assert!(engine.take_error_stack().is_empty());

        // a successful call clears the stale stack
        engine.close(Hid(98)).unwrap_err();
        let plist = engine.plist_create(PlistClass::DatasetCreate).unwrap();
        assert!(engine.take_error_stack().is_empty());
        engine.close(plist).unwrap();
    }

    #[test]
    fn error_printing_is_per_thread() {
        let engine = MemEngine::new();
        assert!(engine.set_error_printing(false));
        assert!(!engine.set_error_printing(false));
        std::thread::scope(|s| {
            s.spawn(|| assert!(engine.set_error_printing(true)));
        });
        assert!(!engine.set_error_printing(true));
    }

    #[test]
    fn layout_rules() {
        let extendible = Dataspace::simple(&[4]).with_max_dims(&[UNLIMITED]);
        assert!(check_layout(&extendible, &[]).is_err());
        assert!(check_layout(&extendible, &[Property::Chunk(vec![2])]).is_ok());
        let fixed = Dataspace::simple(&[4, 4]);
        assert!(check_layout(&fixed, &[Property::Deflate(3)]).is_err());
        assert!(check_layout(&fixed, &[Property::Chunk(vec![2])]).is_err());
        assert!(check_layout(&fixed, &[Property::Chunk(vec![2, 8])]).is_err());
        assert!(check_layout(&fixed, &[Property::Chunk(vec![2, 2]), Property::Shuffle]).is_ok());
    }
}
