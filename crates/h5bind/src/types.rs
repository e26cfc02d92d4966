//! Element types: the mapping from Rust values to native datatypes.
//!
//! [`H5Type`] is implemented for the numeric primitives, `bool`, `String`,
//! [`FixedString`], [`ObjectRef`], fixed-size arrays `[T; N]`, and (with the
//! `float16` feature) `half::f16`. Records get it from `#[derive(H5Type)]`
//! or [`pod_record!`](crate::pod_record).
//!
//! Encoding writes one element into a slot of exactly
//! `type_descriptor()?.type_size()` bytes, in native byte order.
//! Variable-length payloads go through a [`VlenSink`] on write and come back
//! through a [`VlenSource`] on read.

use h5bind_engine::{CharacterSet, Datatype, EnumMember, StringPadding, VarLenRef};

use crate::error::{Error, Result};

/// Destination for variable-length payloads produced while encoding.
pub trait VlenSink {
    /// Store `payload` and return the slot that refers to it.
    fn store(&mut self, payload: &[u8]) -> Result<VarLenRef>;
}

/// Origin of variable-length payloads referenced by decoded slots.
pub trait VlenSource {
    /// Fetch the payload `slot` refers to. The null slot yields an empty
    /// payload.
    fn load(&mut self, slot: VarLenRef) -> Result<Vec<u8>>;
}

/// A Rust type that maps to one native element type.
pub trait H5Type: Sized + 'static {
    /// The native element type. Records build theirs once and cache it.
    fn type_descriptor() -> Result<Datatype>;

    /// Write `self` into `out`, which is exactly one element slot wide.
    fn encode(&self, out: &mut [u8], vlen: &mut dyn VlenSink) -> Result<()>;

    /// Read one element from `raw`.
    fn decode(raw: &[u8], vlen: &mut dyn VlenSource) -> Result<Self>;

    /// The bytes of a slice of elements when its memory layout is identical
    /// to the native element layout.
    fn as_bytes(elements: &[Self]) -> Option<&[u8]> {
        let _ = elements;
        None
    }

    /// Mutable counterpart of [`H5Type::as_bytes`].
    fn as_bytes_mut(elements: &mut [Self]) -> Option<&mut [u8]> {
        let _ = elements;
        None
    }
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

macro_rules! impl_numeric {
    ($($ty:ty => $descriptor:expr),* $(,)?) => {$(
        impl H5Type for $ty {
            fn type_descriptor() -> Result<Datatype> {
                Ok($descriptor)
            }

            fn encode(&self, out: &mut [u8], _: &mut dyn VlenSink) -> Result<()> {
                out.copy_from_slice(&self.to_ne_bytes());
                Ok(())
            }

            fn decode(raw: &[u8], _: &mut dyn VlenSource) -> Result<Self> {
                Ok(bytemuck::pod_read_unaligned(raw))
            }

            fn as_bytes(elements: &[Self]) -> Option<&[u8]> {
                Some(bytemuck::cast_slice(elements))
            }

            fn as_bytes_mut(elements: &mut [Self]) -> Option<&mut [u8]> {
                Some(bytemuck::cast_slice_mut(elements))
            }
        }
    )*};
}

impl_numeric! {
    i8 => Datatype::integer(1, true),
    i16 => Datatype::integer(2, true),
    i32 => Datatype::integer(4, true),
    i64 => Datatype::integer(8, true),
    u8 => Datatype::integer(1, false),
    u16 => Datatype::integer(2, false),
    u32 => Datatype::integer(4, false),
    u64 => Datatype::integer(8, false),
    f32 => Datatype::float(4),
    f64 => Datatype::float(8),
}

#[cfg(target_pointer_width = "64")]
impl_numeric! {
    isize => Datatype::integer(8, true),
    usize => Datatype::integer(8, false),
}

#[cfg(feature = "float16")]
impl H5Type for half::f16 {
    fn type_descriptor() -> Result<Datatype> {
        Ok(Datatype::float(2))
    }

    fn encode(&self, out: &mut [u8], _: &mut dyn VlenSink) -> Result<()> {
        out.copy_from_slice(&self.to_bits().to_ne_bytes());
        Ok(())
    }

    fn decode(raw: &[u8], _: &mut dyn VlenSource) -> Result<Self> {
        Ok(half::f16::from_bits(bytemuck::pod_read_unaligned(raw)))
    }
}

// ---------------------------------------------------------------------------
// bool
// ---------------------------------------------------------------------------

/// `bool` is stored as an enumeration `{FALSE = 0, TRUE = 1}` over `i8`.
impl H5Type for bool {
    fn type_descriptor() -> Result<Datatype> {
        Ok(Datatype::Enumeration {
            base_type: Box::new(Datatype::integer(1, true)),
            members: vec![
                EnumMember {
                    name: "FALSE".into(),
                    value: 0,
                },
                EnumMember {
                    name: "TRUE".into(),
                    value: 1,
                },
            ],
        })
    }

    fn encode(&self, out: &mut [u8], _: &mut dyn VlenSink) -> Result<()> {
        out[0] = u8::from(*self);
        Ok(())
    }

    fn decode(raw: &[u8], _: &mut dyn VlenSource) -> Result<Self> {
        match raw[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Conversion {
                context: "decoding bool".into(),
                detail: format!("value {other} is neither FALSE nor TRUE"),
            }),
        }
    }

    fn as_bytes(elements: &[Self]) -> Option<&[u8]> {
        // every bool is 0 or 1, so the bytes are valid enum values; the
        // reverse is not true, hence no `as_bytes_mut`.
        Some(bytemuck::cast_slice(elements))
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// Variable-length UTF-8 string.
impl H5Type for String {
    fn type_descriptor() -> Result<Datatype> {
        Ok(Datatype::var_len_string())
    }

    fn encode(&self, out: &mut [u8], vlen: &mut dyn VlenSink) -> Result<()> {
        vlen.store(self.as_bytes())?.encode(out);
        Ok(())
    }

    fn decode(raw: &[u8], vlen: &mut dyn VlenSource) -> Result<Self> {
        let payload = vlen.load(VarLenRef::decode(raw))?;
        Ok(String::from_utf8(payload)?)
    }
}

/// Fixed-width string of `N` bytes, NUL-padded.
///
/// Content shorter than `N` bytes is padded with NULs; content of exactly
/// `N` bytes carries no terminator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedString<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedString<N> {
    /// Copy `s`, failing with [`Error::Conversion`] if it does not fit.
    pub fn new(s: &str) -> Result<Self> {
        if s.len() > N {
            return Err(Error::Conversion {
                context: format!("building FixedString<{N}>"),
                detail: format!("{} bytes do not fit in {N}", s.len()),
            });
        }
        Ok(Self::truncated(s))
    }

    /// Copy as much of `s` as fits, cutting at a character boundary.
    pub fn truncated(s: &str) -> Self {
        let mut end = s.len().min(N);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; N];
        bytes[..end].copy_from_slice(&s.as_bytes()[..end]);
        Self { bytes }
    }

    /// Content up to the first NUL.
    pub fn as_str(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes[..self.len()])
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.iter().position(|&b| b == 0).unwrap_or(N)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The full slot, padding included.
    pub fn as_raw(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> Default for FixedString<N> {
    fn default() -> Self {
        Self { bytes: [0; N] }
    }
}

impl<const N: usize> std::fmt::Debug for FixedString<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FixedString<{N}>({:?})", String::from_utf8_lossy(&self.bytes[..self.len()]))
    }
}

impl<const N: usize> std::fmt::Display for FixedString<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes[..self.len()]))
    }
}

impl<const N: usize> TryFrom<&str> for FixedString<N> {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl<const N: usize> H5Type for FixedString<N> {
    fn type_descriptor() -> Result<Datatype> {
        if N == 0 {
            return Err(Error::UnsupportedLayout("FixedString<0> has no storage".into()));
        }
        Ok(Datatype::String {
            size: N as u32,
            padding: StringPadding::NullPad,
            charset: CharacterSet::Utf8,
        })
    }

    fn encode(&self, out: &mut [u8], _: &mut dyn VlenSink) -> Result<()> {
        out.copy_from_slice(&self.bytes);
        Ok(())
    }

    fn decode(raw: &[u8], _: &mut dyn VlenSource) -> Result<Self> {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(raw);
        Ok(Self { bytes })
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Reference to an object in the same file.
///
/// Obtained from [`Location::reference`](crate::Location::reference) and
/// resolved with [`Location::dereference`](crate::Location::dereference).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub struct ObjectRef {
    address: u64,
}

impl ObjectRef {
    pub(crate) fn new(address: u64) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// Whether this reference points nowhere (a default-initialized slot).
    pub fn is_null(&self) -> bool {
        self.address == 0
    }
}

impl H5Type for ObjectRef {
    fn type_descriptor() -> Result<Datatype> {
        Ok(Datatype::Reference)
    }

    fn encode(&self, out: &mut [u8], _: &mut dyn VlenSink) -> Result<()> {
        out.copy_from_slice(bytemuck::bytes_of(self));
        Ok(())
    }

    fn decode(raw: &[u8], _: &mut dyn VlenSource) -> Result<Self> {
        Ok(bytemuck::pod_read_unaligned(raw))
    }

    fn as_bytes(elements: &[Self]) -> Option<&[u8]> {
        Some(bytemuck::cast_slice(elements))
    }

    fn as_bytes_mut(elements: &mut [Self]) -> Option<&mut [u8]> {
        Some(bytemuck::cast_slice_mut(elements))
    }
}

// ---------------------------------------------------------------------------
// Fixed-size arrays
// ---------------------------------------------------------------------------

/// `[T; N]` as a record member maps to an array datatype of `N` elements.
///
/// As a container element (`Vec<[T; N]>`), arrays instead add a dimension;
/// see [`H5Data`](crate::H5Data).
impl<T: H5Type, const N: usize> H5Type for [T; N] {
    fn type_descriptor() -> Result<Datatype> {
        if N == 0 {
            return Err(Error::UnsupportedLayout("zero-length array element".into()));
        }
        Ok(Datatype::Array {
            base_type: Box::new(T::type_descriptor()?),
            dimensions: vec![N as u32],
        })
    }

    fn encode(&self, out: &mut [u8], vlen: &mut dyn VlenSink) -> Result<()> {
        let step = out.len() / N;
        for (item, slot) in self.iter().zip(out.chunks_exact_mut(step)) {
            item.encode(slot, vlen)?;
        }
        Ok(())
    }

    fn decode(raw: &[u8], vlen: &mut dyn VlenSource) -> Result<Self> {
        let step = raw.len() / N;
        let items = raw
            .chunks_exact(step)
            .map(|slot| T::decode(slot, vlen))
            .collect::<Result<Vec<T>>>()?;
        items
            .try_into()
            .map_err(|_| Error::UnsupportedLayout(format!("array slot does not hold {N} elements")))
    }

    fn as_bytes(elements: &[Self]) -> Option<&[u8]> {
        T::as_bytes(elements.as_flattened())
    }

    fn as_bytes_mut(elements: &mut [Self]) -> Option<&mut [u8]> {
        T::as_bytes_mut(elements.as_flattened_mut())
    }
}
