//! Object graph of one in-memory file.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::engine::ObjectKind;
use crate::error::{EngineError, EngineResult, Major, Minor};
use crate::plist::Property;

use super::convert;
use super::heap::PayloadHeap;

/// Object address inside a file. Also the payload of object references.
pub(crate) type NodeId = u64;

/// Address of the root group.
pub(crate) const ROOT: NodeId = 1;

/// Typed, shaped element storage of a dataset or attribute.
#[derive(Debug, Clone)]
pub(crate) struct Stored {
    pub datatype: Datatype,
    pub space: Dataspace,
    pub data: Vec<u8>,
}

impl Stored {
    /// Zero-filled storage for `space`.
    pub fn new(datatype: Datatype, space: Dataspace) -> EngineResult<Self> {
        let data = zeroed(&space, &datatype)?;
        Ok(Self {
            datatype,
            space,
            data,
        })
    }
}

/// Bytes occupied by `space` elements of `datatype`.
pub(crate) fn byte_len(space: &Dataspace, datatype: &Datatype) -> EngineResult<usize> {
    space.byte_len(datatype.type_size()).ok_or_else(|| {
        EngineError::new(
            Major::Dataspace,
            Minor::BadValue,
            format!(
                "extents {:?} of {datatype} do not fit in memory",
                space.dimensions
            ),
        )
    })
}

/// A zero-filled element buffer for `space`, failing instead of aborting
/// when it cannot be allocated.
fn zeroed(space: &Dataspace, datatype: &Datatype) -> EngineResult<Vec<u8>> {
    let len = byte_len(space, datatype)?;
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        EngineError::new(
            Major::Dataspace,
            Minor::BadValue,
            format!("cannot allocate {len} bytes: {e}"),
        )
    })?;
    data.resize(len, 0);
    Ok(data)
}

#[derive(Debug)]
pub(crate) struct DatasetNode {
    pub stored: Stored,
    pub dcpl: Vec<Property>,
}

#[derive(Debug)]
pub(crate) enum NodeBody {
    Group {
        links: BTreeMap<String, NodeId>,
        gcpl: Vec<Property>,
    },
    Dataset(DatasetNode),
    Datatype(Datatype),
}

#[derive(Debug)]
pub(crate) struct Node {
    pub body: NodeBody,
    pub attrs: BTreeMap<String, Stored>,
}

impl Node {
    pub fn kind(&self) -> ObjectKind {
        match self.body {
            NodeBody::Group { .. } => ObjectKind::Group,
            NodeBody::Dataset(_) => ObjectKind::Dataset,
            NodeBody::Datatype(_) => ObjectKind::Datatype,
        }
    }
}

fn not_found(message: String) -> EngineError {
    EngineError::new(Major::Link, Minor::NotFound, message)
}

/// Split a link path into its components. Empty components and `.` are
/// ignored, so `"/a//b/"` and `"a/./b"` name the same object.
fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

#[derive(Debug)]
pub(crate) struct FileStore {
    nodes: HashMap<NodeId, Node>,
    next_node: NodeId,
    pub heap: PayloadHeap,
    pub fcpl: Vec<Property>,
}

impl FileStore {
    pub fn new(fcpl: Vec<Property>) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT,
            Node {
                body: NodeBody::Group {
                    links: BTreeMap::new(),
                    gcpl: Vec::new(),
                },
                attrs: BTreeMap::new(),
            },
        );
        Self {
            nodes,
            next_node: ROOT + 1,
            heap: PayloadHeap::default(),
            fcpl,
        }
    }

    pub fn node(&self, id: NodeId) -> EngineResult<&Node> {
        self.nodes.get(&id).ok_or_else(|| {
            EngineError::new(
                Major::Id,
                Minor::BadValue,
                format!("no object at address {id}"),
            )
        })
    }

    pub fn node_mut(&mut self, id: NodeId) -> EngineResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or_else(|| {
            EngineError::new(
                Major::Id,
                Minor::BadValue,
                format!("no object at address {id}"),
            )
        })
    }

    /// Node and heap borrowed together, for conversions writing into the
    /// file heap.
    pub fn node_and_heap(&mut self, id: NodeId) -> EngineResult<(&mut Node, &mut PayloadHeap)> {
        let node = self.nodes.get_mut(&id).ok_or_else(|| {
            EngineError::new(
                Major::Id,
                Minor::BadValue,
                format!("no object at address {id}"),
            )
        })?;
        Ok((node, &mut self.heap))
    }

    fn links(&self, group: NodeId) -> EngineResult<&BTreeMap<String, NodeId>> {
        match &self.node(group)?.body {
            NodeBody::Group { links, .. } => Ok(links),
            _ => Err(EngineError::new(
                Major::Link,
                Minor::BadValue,
                format!("object at address {group} is not a group"),
            )),
        }
    }

    fn links_mut(&mut self, group: NodeId) -> EngineResult<&mut BTreeMap<String, NodeId>> {
        match &mut self.node_mut(group)?.body {
            NodeBody::Group { links, .. } => Ok(links),
            _ => Err(EngineError::new(
                Major::Link,
                Minor::BadValue,
                format!("object at address {group} is not a group"),
            )),
        }
    }

    pub fn link_names(&self, group: NodeId) -> EngineResult<Vec<String>> {
        Ok(self.links(group)?.keys().cloned().collect())
    }

    /// Follow `path` from `start` (or from the root for absolute paths).
    pub fn resolve(&self, start: NodeId, path: &str) -> EngineResult<NodeId> {
        let mut current = if path.starts_with('/') { ROOT } else { start };
        for part in components(path) {
            let links = self.links(current).map_err(|_| {
                not_found(format!("'{path}': component before '{part}' is not a group"))
            })?;
            current = *links
                .get(part)
                .ok_or_else(|| not_found(format!("'{path}': no link named '{part}'")))?;
        }
        Ok(current)
    }

    /// Whether `path` resolves; broken intermediate components yield `false`.
    pub fn exists(&self, start: NodeId, path: &str) -> bool {
        self.resolve(start, path).is_ok()
    }

    /// Split `path` into its parent group and final link name, creating
    /// missing intermediate groups when `create_intermediate` is set.
    pub fn parent_of(
        &mut self,
        start: NodeId,
        path: &str,
        create_intermediate: bool,
    ) -> EngineResult<(NodeId, String)> {
        let parts: Vec<&str> = components(path).collect();
        let Some((leaf, dirs)) = parts.split_last() else {
            return Err(EngineError::new(
                Major::Link,
                Minor::BadValue,
                format!("'{path}' does not name a link"),
            ));
        };
        let mut current = if path.starts_with('/') { ROOT } else { start };
        for dir in dirs {
            let existing = self.links(current)?.get(*dir).copied();
            current = match existing {
                Some(id) => id,
                None if create_intermediate => {
                    let id = self.insert(NodeBody::Group {
                        links: BTreeMap::new(),
                        gcpl: Vec::new(),
                    });
                    self.links_mut(current)?.insert(dir.to_string(), id);
                    id
                }
                None => {
                    return Err(not_found(format!(
                        "'{path}': intermediate group '{dir}' does not exist"
                    )))
                }
            };
        }
        // The parent must be a group.
        self.links(current)?;
        Ok((current, leaf.to_string()))
    }

    pub fn insert(&mut self, body: NodeBody) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(
            id,
            Node {
                body,
                attrs: BTreeMap::new(),
            },
        );
        id
    }

    pub fn link(&mut self, parent: NodeId, name: &str, target: NodeId) -> EngineResult<()> {
        let links = self.links_mut(parent)?;
        if links.contains_key(name) {
            return Err(EngineError::new(
                Major::Link,
                Minor::AlreadyExists,
                format!("a link named '{name}' already exists"),
            ));
        }
        links.insert(name.to_string(), target);
        Ok(())
    }

    pub fn unlink(&mut self, parent: NodeId, name: &str) -> EngineResult<NodeId> {
        self.links_mut(parent)?
            .remove(name)
            .ok_or_else(|| not_found(format!("no link named '{name}'")))
    }

    /// First absolute path leading to `target`, or an empty string for
    /// objects that are no longer linked.
    pub fn path_of(&self, target: NodeId) -> String {
        if target == ROOT {
            return "/".to_string();
        }
        let mut seen = HashSet::new();
        let mut queue = vec![(ROOT, String::new())];
        while let Some((id, path)) = queue.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Ok(links) = self.links(id) {
                for (name, &child) in links {
                    let child_path = format!("{path}/{name}");
                    if child == target {
                        return child_path;
                    }
                    queue.push((child, child_path));
                }
            }
        }
        String::new()
    }

    /// Change the extents of a dataset, keeping elements whose coordinates
    /// survive and zero-filling the rest.
    pub fn resize_dataset(&mut self, id: NodeId, dims: &[u64]) -> EngineResult<()> {
        let (node, heap) = self.node_and_heap(id)?;
        let NodeBody::Dataset(dataset) = &mut node.body else {
            return Err(EngineError::new(
                Major::Dataset,
                Minor::BadValue,
                format!("object at address {id} is not a dataset"),
            ));
        };
        let stored = &mut dataset.stored;
        let old_dims = stored.space.dimensions.clone();
        let mut space = stored.space.clone();
        space
            .set_extent(dims)
            .map_err(|msg| EngineError::new(Major::Dataspace, Minor::BadValue, msg))?;

        let elem = stored.datatype.type_size() as usize;
        let mut data = zeroed(&space, &stored.datatype)?;
        relayout(&stored.data, &old_dims, &mut data, dims, elem);

        let kept: HashSet<u64> = convert::payload_slots(&stored.datatype, &data)
            .iter()
            .map(|s| s.id)
            .collect();
        for slot in convert::payload_slots(&stored.datatype, &stored.data) {
            if !kept.contains(&slot.id) {
                heap.free(slot)?;
            }
        }
        stored.space = space;
        stored.data = data;
        Ok(())
    }
}

/// Copy the overlapping hyperslab of two row-major arrays.
fn relayout(src: &[u8], src_dims: &[u64], dst: &mut [u8], dst_dims: &[u64], elem: usize) {
    let rank = src_dims.len();
    if rank == 0 {
        let n = elem.min(src.len()).min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        return;
    }
    let common: Vec<usize> = src_dims
        .iter()
        .zip(dst_dims)
        .map(|(&a, &b)| a.min(b) as usize)
        .collect();
    if common.contains(&0) {
        return;
    }
    let stride = |dims: &[u64]| -> Vec<usize> {
        let mut s = vec![1usize; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            s[i] = s[i + 1] * dims[i + 1] as usize;
        }
        s
    };
    let src_stride = stride(src_dims);
    let dst_stride = stride(dst_dims);
    let row = common[rank - 1] * elem;
    let mut index = vec![0usize; rank - 1];
    loop {
        let src_off: usize = index.iter().zip(&src_stride).map(|(i, s)| i * s).sum();
        let dst_off: usize = index.iter().zip(&dst_stride).map(|(i, s)| i * s).sum();
        dst[dst_off * elem..dst_off * elem + row]
            .copy_from_slice(&src[src_off * elem..src_off * elem + row]);

        // odometer over all but the last dimension
        let mut d = rank - 1;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            index[d] += 1;
            if index[d] < common[d] {
                break;
            }
            index[d] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_and_intermediate_groups() {
        let mut store = FileStore::new(Vec::new());
        assert!(store.parent_of(ROOT, "a/b/c", false).is_err());
        let (parent, leaf) = store.parent_of(ROOT, "/a/b/c", true).unwrap();
        assert_eq!(leaf, "c");
        assert_eq!(store.resolve(ROOT, "a/b").unwrap(), parent);
        assert!(store.exists(ROOT, "/a"));
        assert!(!store.exists(ROOT, "/a/b/c"));
        assert_eq!(store.path_of(parent), "/a/b");
        assert_eq!(store.resolve(parent, "/").unwrap(), ROOT);
    }

    #[test]
    fn link_conflicts() {
        let mut store = FileStore::new(Vec::new());
        let g = store.insert(NodeBody::Datatype(Datatype::float(8)));
        store.link(ROOT, "t", g).unwrap();
        let err = store.link(ROOT, "t", g).unwrap_err();
        assert_eq!(err.minor, Minor::AlreadyExists);
        assert_eq!(store.unlink(ROOT, "t").unwrap(), g);
        assert_eq!(store.path_of(g), "");
        // a datatype is not a group
        store.link(ROOT, "t", g).unwrap();
        assert!(!store.exists(ROOT, "t/x"));
    }

    #[test]
    fn relayout_grows_and_shrinks() {
        // 2x3 -> 3x2
        let src: Vec<u8> = (1..=6).collect();
        let mut dst = vec![0u8; 6];
        relayout(&src, &[2, 3], &mut dst, &[3, 2], 1);
        assert_eq!(dst, vec![1, 2, 4, 5, 0, 0]);

        let mut grown = vec![0u8; 8];
        relayout(&src[..3], &[3], &mut grown, &[8], 1);
        assert_eq!(grown, vec![1, 2, 3, 0, 0, 0, 0, 0]);
    }
}
