//! Property values understood by the engine.
//!
//! A property list is a class ([`PlistClass`]) plus an ordered bag of
//! [`Property`] values. Each property is only meaningful for some classes;
//! [`Property::applies_to`] encodes that table and [`Property::validate`]
//! checks value ranges.

use std::fmt;

use crate::error::{EngineError, Major, Minor};

/// Library version bound constants.
pub mod lib_version {
    /// Earliest version, readable by every library release.
    pub const EARLIEST: u8 = 0;
    /// 1.8 format features.
    pub const V18: u8 = 1;
    /// 1.10 format features (SWMR, paged aggregation).
    pub const V110: u8 = 2;
    /// 1.12 format features.
    pub const V112: u8 = 3;
    /// Latest version.
    pub const LATEST: u8 = 4;
}

/// Maximum compact attribute/link count accepted by phase-change settings.
pub const MAX_COMPACT_LIMIT: u32 = 65535;

/// Class of a property list, i.e. the call it configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlistClass {
    FileCreate,
    FileAccess,
    GroupCreate,
    LinkCreate,
    DatasetCreate,
    DatasetAccess,
    DatasetTransfer,
}

impl fmt::Display for PlistClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlistClass::FileCreate => "file create",
            PlistClass::FileAccess => "file access",
            PlistClass::GroupCreate => "group create",
            PlistClass::LinkCreate => "link create",
            PlistClass::DatasetCreate => "dataset create",
            PlistClass::DatasetAccess => "dataset access",
            PlistClass::DatasetTransfer => "dataset transfer",
        };
        f.write_str(s)
    }
}

/// What to do when a string does not fit a fixed-length destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StringOverflow {
    /// Fail the transfer with a truncation error.
    #[default]
    Reject,
    /// Cut the string to the destination capacity.
    Truncate,
}

/// A single engine-tunable option.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    /// Library version bounds (low, high); see [`lib_version`].
    LibVersionBounds { low: u8, high: u8 },
    /// Metadata block allocation size in bytes.
    MetadataBlockSize(u64),
    /// Expected number of links and average link name length in a group.
    EstimatedLinkInfo { entries: u32, name_length: u32 },
    /// Compact/dense storage thresholds for links.
    LinkPhaseChange { max_compact: u32, min_dense: u32 },
    /// Compact/dense storage thresholds for attributes.
    AttributePhaseChange { max_compact: u32, min_dense: u32 },
    /// Create missing intermediate groups along a path.
    CreateIntermediateGroup(bool),
    /// Chunk dimensions (enables chunked storage).
    Chunk(Vec<u64>),
    /// Deflate compression level (0-9).
    Deflate(u32),
    /// Shuffle filter before compression.
    Shuffle,
    /// Raw chunk cache: slot count, byte size and preemption weight.
    ChunkCache { slots: usize, bytes: usize, w0: f64 },
    /// Fixed-length string overflow policy for transfers.
    StringOverflow(StringOverflow),
}

impl Property {
    /// Stable name of the option, used for replacement and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Property::LibVersionBounds { .. } => "lib_version_bounds",
            Property::MetadataBlockSize(_) => "metadata_block_size",
            Property::EstimatedLinkInfo { .. } => "estimated_link_info",
            Property::LinkPhaseChange { .. } => "link_phase_change",
            Property::AttributePhaseChange { .. } => "attribute_phase_change",
            Property::CreateIntermediateGroup(_) => "create_intermediate_group",
            Property::Chunk(_) => "chunk",
            Property::Deflate(_) => "deflate",
            Property::Shuffle => "shuffle",
            Property::ChunkCache { .. } => "chunk_cache",
            Property::StringOverflow(_) => "string_overflow",
        }
    }

    /// Property list classes this option may be attached to.
    pub fn applies_to(&self) -> &'static [PlistClass] {
        use PlistClass::*;
        match self {
            Property::LibVersionBounds { .. } | Property::MetadataBlockSize(_) => &[FileAccess],
            Property::EstimatedLinkInfo { .. } | Property::LinkPhaseChange { .. } => {
                &[FileCreate, GroupCreate]
            }
            Property::AttributePhaseChange { .. } => &[FileCreate, GroupCreate, DatasetCreate],
            Property::CreateIntermediateGroup(_) => &[LinkCreate],
            Property::Chunk(_) | Property::Deflate(_) | Property::Shuffle => &[DatasetCreate],
            Property::ChunkCache { .. } => &[DatasetAccess],
            Property::StringOverflow(_) => &[DatasetTransfer],
        }
    }

    /// Whether the option may be attached to a list of `class`.
    pub fn is_applicable(&self, class: PlistClass) -> bool {
        self.applies_to().contains(&class)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), EngineError> {
        let bad = |msg: String| Err(EngineError::new(Major::Plist, Minor::BadValue, msg));
        match self {
            Property::LibVersionBounds { low, high } => {
                if low > high || *high > lib_version::LATEST {
                    return bad(format!("invalid version bounds ({low}, {high})"));
                }
            }
            Property::MetadataBlockSize(_) | Property::CreateIntermediateGroup(_) => {}
            Property::Shuffle | Property::StringOverflow(_) => {}
            Property::EstimatedLinkInfo { name_length, .. } => {
                if *name_length > MAX_COMPACT_LIMIT {
                    return bad(format!("estimated name length {name_length} too large"));
                }
            }
            Property::LinkPhaseChange {
                max_compact,
                min_dense,
            }
            | Property::AttributePhaseChange {
                max_compact,
                min_dense,
            } => {
                if *max_compact > MAX_COMPACT_LIMIT {
                    return bad(format!("max_compact {max_compact} exceeds {MAX_COMPACT_LIMIT}"));
                }
                if min_dense > max_compact {
                    return bad(format!(
                        "min_dense {min_dense} must not exceed max_compact {max_compact}"
                    ));
                }
            }
            Property::Chunk(dims) => {
                if dims.is_empty() || dims.contains(&0) {
                    return bad(format!("invalid chunk dimensions {dims:?}"));
                }
            }
            Property::Deflate(level) => {
                if *level > 9 {
                    return bad(format!("deflate level {level} out of range 0-9"));
                }
            }
            Property::ChunkCache { w0, .. } => {
                if !(0.0..=1.0).contains(w0) {
                    return bad(format!("chunk cache w0 {w0} out of range 0-1"));
                }
            }
        }
        Ok(())
    }
}

/// Insert `prop` into `props`, replacing an option of the same name.
///
/// Filter options keep their insertion order since the filter pipeline is
/// order dependent.
pub fn upsert(props: &mut Vec<Property>, prop: Property) {
    match props.iter_mut().find(|p| p.name() == prop.name()) {
        Some(slot) => *slot = prop,
        None => props.push(prop),
    }
}

/// Find the chunk dimensions in a dataset creation list.
pub fn chunk_dims(props: &[Property]) -> Option<&[u64]> {
    props.iter().find_map(|p| match p {
        Property::Chunk(dims) => Some(dims.as_slice()),
        _ => None,
    })
}

/// Find the string overflow policy in a transfer list, defaulting to reject.
pub fn string_overflow(props: &[Property]) -> StringOverflow {
    props
        .iter()
        .find_map(|p| match p {
            Property::StringOverflow(policy) => Some(*policy),
            _ => None,
        })
        .unwrap_or_default()
}

/// Whether a link creation list asks for intermediate groups.
pub fn create_intermediate(props: &[Property]) -> bool {
    props
        .iter()
        .any(|p| matches!(p, Property::CreateIntermediateGroup(true)))
}
