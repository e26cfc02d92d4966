//! Record and enumeration layouts, and the process-wide record registry.
//!
//! A record type is described once, as a [`CompoundType`] or [`EnumType`],
//! and registered under its Rust `TypeId`. Later lookups return the same
//! descriptor, so every read and write of the type uses one layout.
//!
//! ```
//! use h5bind::{CompoundType, H5Type};
//!
//! let point = CompoundType::new("Point")
//!     .field("x", f64::type_descriptor()?)
//!     .field("y", f64::type_descriptor()?)
//!     .field("tag", u8::type_descriptor()?)
//!     .build()?;
//! assert_eq!(point.type_size(), 24);
//! # Ok::<(), h5bind::Error>(())
//! ```

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::OnceLock;

use h5bind_engine::{CompoundMember, Datatype, EnumMember};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::H5Type;

fn layout_error(record: &str, detail: impl Into<String>) -> Error {
    Error::InvalidRecordLayout {
        record: record.to_string(),
        detail: detail.into(),
    }
}

/// Natural alignment of a native type in a C-like record.
fn alignment(datatype: &Datatype) -> u64 {
    match datatype {
        Datatype::FixedPoint { size, .. } | Datatype::FloatingPoint { size, .. } => *size as u64,
        Datatype::String { .. } => 1,
        Datatype::VarLenString { .. } | Datatype::Reference => 8,
        Datatype::Compound { members, .. } => members
            .iter()
            .map(|m| alignment(&m.datatype))
            .max()
            .unwrap_or(1),
        Datatype::Enumeration { base_type, .. } | Datatype::Array { base_type, .. } => {
            alignment(base_type)
        }
    }
}

fn align_up(offset: u64, align: u64) -> u64 {
    offset.div_ceil(align.max(1)) * align.max(1)
}

// ---------------------------------------------------------------------------
// CompoundType
// ---------------------------------------------------------------------------

struct FieldSpec {
    name: String,
    offset: Option<u64>,
    datatype: Datatype,
}

/// Builder for a record (compound) layout.
///
/// Fields added with [`field`](Self::field) are placed in declaration
/// order, aligned like a C struct unless [`packed`](Self::packed) is set.
/// [`field_at`](Self::field_at) pins a field to an explicit offset.
pub struct CompoundType {
    name: String,
    fields: Vec<FieldSpec>,
    size: Option<u64>,
    packed: bool,
}

impl CompoundType {
    /// Start a record layout; `name` is used in diagnostics.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            size: None,
            packed: false,
        }
    }

    /// Place fields back to back without padding.
    pub fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    /// Append a field after the previous one.
    pub fn field(mut self, name: impl Into<String>, datatype: Datatype) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            offset: None,
            datatype,
        });
        self
    }

    /// Append a field of type `T`.
    pub fn field_of<T: H5Type>(self, name: impl Into<String>) -> Result<Self> {
        Ok(self.field(name, T::type_descriptor()?))
    }

    /// Add a field at an explicit byte offset.
    pub fn field_at(mut self, name: impl Into<String>, offset: u64, datatype: Datatype) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            offset: Some(offset),
            datatype,
        });
        self
    }

    /// Fix the total record size instead of deriving it from the fields.
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Validate the layout and produce the compound descriptor.
    ///
    /// Fails with [`Error::InvalidRecordLayout`] on an empty record,
    /// duplicate or empty field names, overlapping fields, or fields that
    /// end past the record size.
    pub fn build(self) -> Result<Datatype> {
        let record = self.name.as_str();
        if self.fields.is_empty() {
            return Err(layout_error(record, "record has no fields"));
        }

        let mut seen = HashSet::new();
        let mut members = Vec::with_capacity(self.fields.len());
        let mut cursor = 0u64;
        let mut max_align = 1u64;
        for field in self.fields {
            if field.name.is_empty() {
                return Err(layout_error(record, "field with an empty name"));
            }
            if !seen.insert(field.name.clone()) {
                return Err(layout_error(record, format!("duplicate field '{}'", field.name)));
            }
            field
                .datatype
                .validate()
                .map_err(|e| layout_error(record, format!("field '{}': {e}", field.name)))?;
            let align = alignment(&field.datatype);
            max_align = max_align.max(align);
            let offset = match field.offset {
                Some(offset) => offset,
                None if self.packed => cursor,
                None => align_up(cursor, align),
            };
            cursor = cursor.max(offset + field.datatype.type_size() as u64);
            members.push(CompoundMember {
                name: field.name,
                byte_offset: offset,
                datatype: field.datatype,
            });
        }

        let size = match self.size {
            Some(size) => size,
            None if self.packed => cursor,
            None => align_up(cursor, max_align),
        };

        let mut spans: Vec<(u64, u64, &str)> = members
            .iter()
            .map(|m| {
                let start = m.byte_offset;
                (start, start + m.datatype.type_size() as u64, m.name.as_str())
            })
            .collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.0 < prev.1 {
                return Err(layout_error(
                    record,
                    format!("fields '{}' and '{}' overlap", prev.2, next.2),
                ));
            }
        }
        if let Some(&(_, end, name)) = spans.iter().max_by_key(|s| s.1) {
            if end > size {
                return Err(layout_error(
                    record,
                    format!("field '{name}' ends at byte {end}, past record size {size}"),
                ));
            }
        }
        let size = u32::try_from(size)
            .map_err(|_| layout_error(record, format!("record size {size} is too large")))?;

        Ok(Datatype::Compound { size, members })
    }
}

// ---------------------------------------------------------------------------
// EnumType
// ---------------------------------------------------------------------------

/// Builder for an enumeration: named values over an integer base type.
pub struct EnumType {
    name: String,
    base: Result<Datatype>,
    members: Vec<EnumMember>,
}

impl EnumType {
    /// Enumeration over the integer type `B`.
    pub fn new<B: H5Type>(name: impl Into<String>) -> Self {
        Self::with_base(name, B::type_descriptor())
    }

    /// Enumeration over an explicit base descriptor.
    pub fn with_base(name: impl Into<String>, base: Result<Datatype>) -> Self {
        Self {
            name: name.into(),
            base,
            members: Vec::new(),
        }
    }

    pub fn member(mut self, name: impl Into<String>, value: i64) -> Self {
        self.members.push(EnumMember {
            name: name.into(),
            value,
        });
        self
    }

    /// Validate names and values against the base type.
    pub fn build(self) -> Result<Datatype> {
        let record = self.name.as_str();
        let base = self.base?;
        base.validate().map_err(|e| layout_error(record, e))?;
        let (size, signed) = match base {
            Datatype::FixedPoint { size, signed, .. } => (size, signed),
            ref other => {
                return Err(layout_error(
                    record,
                    format!("enumeration base must be an integer, not {other}"),
                ))
            }
        };
        if self.members.is_empty() {
            return Err(layout_error(record, "enumeration has no members"));
        }
        let bits = size * 8;
        let (min, max): (i128, i128) = if signed {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        };
        let mut names = HashSet::new();
        let mut values = HashSet::new();
        for m in &self.members {
            if !names.insert(m.name.as_str()) {
                return Err(layout_error(record, format!("duplicate member '{}'", m.name)));
            }
            if !values.insert(m.value) {
                return Err(layout_error(
                    record,
                    format!("member '{}' reuses value {}", m.name, m.value),
                ));
            }
            if !(min..=max).contains(&(m.value as i128)) {
                return Err(layout_error(
                    record,
                    format!("member '{}' value {} does not fit the base type", m.name, m.value),
                ));
            }
        }
        Ok(Datatype::Enumeration {
            base_type: Box::new(base),
            members: self.members,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

fn registry() -> &'static RwLock<HashMap<TypeId, Datatype>> {
    static REGISTRY: OnceLock<RwLock<HashMap<TypeId, Datatype>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register the layout of record type `T`.
///
/// Registering the same layout again is a no-op; registering a different
/// one fails with [`Error::InvalidRecordLayout`].
pub fn register_record<T: 'static>(datatype: Datatype) -> Result<Datatype> {
    let record = type_name::<T>();
    match &datatype {
        Datatype::Compound { .. } | Datatype::Enumeration { .. } => {}
        other => {
            return Err(layout_error(
                record,
                format!("only records and enumerations are registered, not {other}"),
            ))
        }
    }
    datatype.validate().map_err(|e| layout_error(record, e))?;

    let mut map = registry().write();
    if let Some(existing) = map.get(&TypeId::of::<T>()) {
        if *existing != datatype {
            return Err(layout_error(record, "already registered with a different layout"));
        }
        return Ok(existing.clone());
    }
    tracing::debug!(record, size = datatype.type_size(), "registered record layout");
    map.insert(TypeId::of::<T>(), datatype.clone());
    Ok(datatype)
}

/// The registered layout of `T`, if any.
pub fn registered_record<T: 'static>() -> Option<Datatype> {
    registry().read().get(&TypeId::of::<T>()).cloned()
}

/// The registered layout of `T`, building and registering it on first use.
pub fn record_descriptor<T: 'static>(build: impl FnOnce() -> Result<Datatype>) -> Result<Datatype> {
    if let Some(datatype) = registered_record::<T>() {
        return Ok(datatype);
    }
    register_record::<T>(build()?)
}

/// Byte range of every member of a record layout, in member order.
#[doc(hidden)]
pub fn member_ranges(datatype: &Datatype) -> Result<Vec<Range<usize>>> {
    match datatype {
        Datatype::Compound { members, .. } => Ok(members
            .iter()
            .map(|m| {
                let start = m.byte_offset as usize;
                start..start + m.datatype.type_size() as usize
            })
            .collect()),
        other => Err(Error::IncompatibleType {
            context: "locating record members".into(),
            detail: format!("{other} is not a record"),
        }),
    }
}

/// Descriptor of a field of a plain-old-data record, checked against the
/// field's in-memory size.
pub fn pod_field<F: H5Type>(record: &str, field: &str) -> Result<Datatype> {
    let datatype = F::type_descriptor()?;
    if datatype.has_vlen() {
        return Err(layout_error(record, format!("field '{field}' is variable-length")));
    }
    if datatype.type_size() as usize != std::mem::size_of::<F>() {
        return Err(layout_error(
            record,
            format!(
                "field '{field}' occupies {} bytes in memory but {} in its native type",
                std::mem::size_of::<F>(),
                datatype.type_size()
            ),
        ));
    }
    Ok(datatype)
}

/// Build `compound` as the layout of the plain-old-data type `T` and
/// register it. The layout must span exactly `size_of::<T>()` bytes.
pub fn register_pod_record<T: bytemuck::Pod>(compound: CompoundType) -> Result<Datatype> {
    let datatype = compound.build()?;
    if datatype.type_size() as usize != std::mem::size_of::<T>() {
        return Err(layout_error(
            type_name::<T>(),
            format!(
                "layout spans {} bytes but the type occupies {}",
                datatype.type_size(),
                std::mem::size_of::<T>()
            ),
        ));
    }
    register_record::<T>(datatype)
}

/// Implement [`H5Type`](crate::H5Type) for a `#[repr(C)]` plain-old-data
/// struct, using its real field offsets.
///
/// The struct must implement `bytemuck::Pod`. Reads and writes of slices of
/// it skip per-element encoding entirely.
///
/// ```
/// use h5bind::pod_record;
///
/// #[repr(C)]
/// #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
/// struct Size2D {
///     width: f64,
///     height: f64,
/// }
///
/// pod_record!(Size2D { width: f64, height: f64 });
/// ```
#[macro_export]
macro_rules! pod_record {
    ($ty:ident { $($field:ident : $fty:ty),+ $(,)? }) => {
        impl $crate::H5Type for $ty {
            fn type_descriptor() -> $crate::Result<$crate::engine::Datatype> {
                if let ::core::option::Option::Some(datatype) = $crate::registered_record::<Self>() {
                    return ::core::result::Result::Ok(datatype);
                }
                let record = ::core::stringify!($ty);
                let compound = $crate::CompoundType::new(record)
                    $(.field_at(
                        ::core::stringify!($field),
                        ::core::mem::offset_of!($ty, $field) as u64,
                        $crate::type_builders::pod_field::<$fty>(record, ::core::stringify!($field))?,
                    ))+
                    .size(::core::mem::size_of::<$ty>() as u64);
                $crate::register_pod_record::<Self>(compound)
            }

            fn encode(
                &self,
                out: &mut [u8],
                _: &mut dyn $crate::VlenSink,
            ) -> $crate::Result<()> {
                out.copy_from_slice($crate::__private::bytemuck::bytes_of(self));
                ::core::result::Result::Ok(())
            }

            fn decode(raw: &[u8], _: &mut dyn $crate::VlenSource) -> $crate::Result<Self> {
                ::core::result::Result::Ok($crate::__private::bytemuck::pod_read_unaligned(raw))
            }

            fn as_bytes(elements: &[Self]) -> ::core::option::Option<&[u8]> {
                ::core::option::Option::Some($crate::__private::bytemuck::cast_slice(elements))
            }

            fn as_bytes_mut(elements: &mut [Self]) -> ::core::option::Option<&mut [u8]> {
                ::core::option::Option::Some($crate::__private::bytemuck::cast_slice_mut(elements))
            }
        }

        $crate::__impl_scalar_data!($ty);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_layout_pads_like_c() {
        let dt = CompoundType::new("Mixed")
            .field("a", Datatype::integer(1, false))
            .field("b", Datatype::float(8))
            .field("c", Datatype::integer(2, true))
            .build()
            .unwrap();
        match dt {
            Datatype::Compound { size, members } => {
                let offsets: Vec<u64> = members.iter().map(|m| m.byte_offset).collect();
                assert_eq!(offsets, vec![0, 8, 16]);
                assert_eq!(size, 24);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn packed_layout_has_no_padding() {
        let dt = CompoundType::new("Packed")
            .packed()
            .field("a", Datatype::integer(1, false))
            .field("b", Datatype::float(8))
            .build()
            .unwrap();
        assert_eq!(dt.type_size(), 9);
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        let overlap = CompoundType::new("Overlap")
            .field_at("a", 0, Datatype::float(8))
            .field_at("b", 4, Datatype::float(8))
            .build();
        assert!(matches!(overlap, Err(Error::InvalidRecordLayout { .. })));

        let dup = CompoundType::new("Dup")
            .field("a", Datatype::float(8))
            .field("a", Datatype::float(4))
            .build();
        assert!(matches!(dup, Err(Error::InvalidRecordLayout { .. })));

        let short = CompoundType::new("Short")
            .field("a", Datatype::float(8))
            .size(4)
            .build();
        let err = short.unwrap_err();
        assert!(err.to_string().contains("past record size 4"), "{err}");

        assert!(CompoundType::new("Empty").build().is_err());
    }

    #[test]
    fn enum_values_must_fit_the_base() {
        let ok = EnumType::new::<u8>("Color")
            .member("RED", 0)
            .member("GREEN", 1)
            .build()
            .unwrap();
        assert_eq!(ok.type_size(), 1);

        let too_big = EnumType::new::<u8>("Color").member("HUGE", 300).build();
        assert!(matches!(too_big, Err(Error::InvalidRecordLayout { .. })));

        let reused = EnumType::new::<i32>("E").member("A", 1).member("B", 1).build();
        assert!(reused.is_err());

        let float_base = EnumType::new::<f32>("E").member("A", 1).build();
        assert!(float_base.is_err());

        for width in [0, 3, 16] {
            let odd = EnumType::with_base("E", Ok(Datatype::integer(width, false)))
                .member("A", 0)
                .build();
            assert!(matches!(odd, Err(Error::InvalidRecordLayout { .. })), "width {width}");
        }
    }

    #[test]
    fn registry_keeps_the_first_layout() {
        struct Marker;
        let a = CompoundType::new("Marker")
            .field("v", Datatype::integer(4, true))
            .build()
            .unwrap();
        let b = CompoundType::new("Marker")
            .field("w", Datatype::integer(4, true))
            .build()
            .unwrap();
        assert!(registered_record::<Marker>().is_none());
        register_record::<Marker>(a.clone()).unwrap();
        register_record::<Marker>(a.clone()).unwrap();
        assert!(register_record::<Marker>(b).is_err());
        assert_eq!(registered_record::<Marker>(), Some(a));
    }

    #[test]
    fn pod_records_must_cover_the_type() {
        #[repr(C)]
        #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
        struct Pair {
            a: u32,
            b: u32,
        }
        let half = CompoundType::new("Pair").field("a", Datatype::integer(4, false));
        assert!(register_pod_record::<Pair>(half).is_err());
        let full = CompoundType::new("Pair")
            .field("a", Datatype::integer(4, false))
            .field("b", Datatype::integer(4, false));
        assert_eq!(register_pod_record::<Pair>(full).unwrap().type_size(), 8);
    }
}
