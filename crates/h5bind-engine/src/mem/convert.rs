//! Element conversion between datatypes.
//!
//! Every element is decoded into an intermediate [`Value`] and re-encoded
//! for the destination type. Integers widen through `i128`, floats through
//! `f64`; narrowing is range checked and never silent. Records match their
//! members by name and enumerations map by member name, falling back to the
//! numeric value.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};

use crate::datatype::{CharacterSet, Datatype, DatatypeByteOrder, StringPadding};
use crate::engine::VarLenRef;
use crate::error::{EngineError, EngineResult, Major, Minor};
use crate::plist::StringOverflow;

use super::heap::PayloadHeap;

/// Decoded element.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Int(i128),
    Float(f64),
    Bytes(Vec<u8>),
    Enum { name: Option<String>, value: i64 },
    Record(Vec<(String, Value)>),
    List(Vec<Value>),
    Ref(u64),
}

impl Value {
    fn class(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Bytes(_) => "string",
            Value::Enum { .. } => "enum",
            Value::Record(_) => "compound",
            Value::List(_) => "array",
            Value::Ref(_) => "reference",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bytes(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            Value::Enum { name: Some(n), .. } => f.write_str(n),
            Value::Enum { name: None, value } => write!(f, "{value}"),
            Value::Record(_) | Value::List(_) => f.write_str(self.class()),
            Value::Ref(a) => write!(f, "@{a}"),
        }
    }
}

fn conversion(minor: Minor, message: String) -> EngineError {
    EngineError::new(Major::Conversion, minor, message)
}

fn no_path(src: &Datatype, dst: &Datatype) -> EngineError {
    conversion(
        Minor::NoConversionPath,
        format!("no conversion path from {src} to {dst}"),
    )
}

/// Check that every element of `src` can in principle be converted to
/// `dst`. Value-dependent failures (overflow, truncation) are reported
/// by [`convert_elements`].
pub(crate) fn check_path(src: &Datatype, dst: &Datatype) -> EngineResult<()> {
    use Datatype::*;
    match (src, dst) {
        (FixedPoint { .. } | FloatingPoint { .. }, FixedPoint { .. } | FloatingPoint { .. }) => {
            Ok(())
        }
        (String { .. } | VarLenString { .. }, String { .. } | VarLenString { .. }) => Ok(()),
        (Enumeration { .. }, Enumeration { .. }) => Ok(()),
        (Reference, Reference) => Ok(()),
        (Compound { members: sm, .. }, Compound { members: dm, .. }) => {
            for d in dm {
                let s = sm.iter().find(|s| s.name == d.name).ok_or_else(|| {
                    conversion(
                        Minor::NoConversionPath,
                        format!("source record has no member '{}'", d.name),
                    )
                })?;
                check_path(&s.datatype, &d.datatype)?;
            }
            Ok(())
        }
        (
            Array {
                base_type: sb,
                dimensions: sd,
            },
            Array {
                base_type: db,
                dimensions: dd,
            },
        ) => {
            let sc: u32 = sd.iter().product();
            let dc: u32 = dd.iter().product();
            if sc != dc {
                return Err(no_path(src, dst));
            }
            check_path(sb, db)
        }
        _ => Err(no_path(src, dst)),
    }
}

/// Convert a packed buffer of `src` elements into `dst` elements.
///
/// Variable-length payloads are read from `src_heap` and copied into
/// `dst_heap`. On failure every payload allocated by this call is freed
/// again and `dst` is left untouched.
pub(crate) fn convert_elements(
    src_type: &Datatype,
    src: &[u8],
    src_heap: &PayloadHeap,
    dst_type: &Datatype,
    dst: &mut [u8],
    dst_heap: &mut PayloadHeap,
    policy: StringOverflow,
) -> EngineResult<()> {
    check_path(src_type, dst_type)?;
    let ss = src_type.type_size() as usize;
    let ds = dst_type.type_size() as usize;
    let count = if ss == 0 { 0 } else { src.len() / ss };
    if src.len() != count * ss || dst.len() != count * ds {
        return Err(EngineError::new(
            Major::Args,
            Minor::ShapeMismatch,
            format!(
                "buffer sizes {} and {} do not hold the same number of {ss}- and {ds}-byte elements",
                src.len(),
                dst.len()
            ),
        ));
    }

    if src_type == dst_type && !src_type.has_vlen() {
        dst.copy_from_slice(src);
        return Ok(());
    }

    let mut out = vec![0u8; dst.len()];
    let mut encoder = Encoder {
        heap: dst_heap,
        policy,
        allocated: Vec::new(),
    };
    let result: EngineResult<()> = (|| {
        for i in 0..count {
            let value = decode(src_type, &src[i * ss..(i + 1) * ss], src_heap)?;
            encoder.encode(dst_type, &value, &mut out[i * ds..(i + 1) * ds])?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => {
            dst.copy_from_slice(&out);
            Ok(())
        }
        Err(err) => {
            for slot in encoder.allocated {
                // Freshly allocated above; cannot fail.
                let _ = encoder.heap.free(slot);
            }
            Err(err)
        }
    }
}

/// Free every variable-length payload referenced by a packed buffer.
pub(crate) fn release_payloads(dtype: &Datatype, data: &[u8], heap: &mut PayloadHeap) {
    let size = dtype.type_size() as usize;
    if size == 0 || !dtype.has_vlen() {
        return;
    }
    let offsets = dtype.vlen_offsets();
    for element in data.chunks_exact(size) {
        for &off in &offsets {
            let slot = VarLenRef::decode(&element[off..]);
            if let Err(err) = heap.free(slot) {
                tracing::warn!("releasing stored payload: {err}");
            }
        }
    }
}

/// Every variable-length reference inside a packed buffer.
pub(crate) fn payload_slots(dtype: &Datatype, data: &[u8]) -> Vec<VarLenRef> {
    let size = dtype.type_size() as usize;
    if size == 0 || !dtype.has_vlen() {
        return Vec::new();
    }
    let offsets = dtype.vlen_offsets();
    data.chunks_exact(size)
        .flat_map(|e| offsets.iter().map(move |&off| VarLenRef::decode(&e[off..])))
        .filter(|s| !s.is_null())
        .collect()
}

// ---------------------------------------------------------------------------
// decoding
// ---------------------------------------------------------------------------

fn read_int(raw: &[u8], size: usize, order: DatatypeByteOrder, signed: bool) -> i128 {
    match (order, signed) {
        (DatatypeByteOrder::LittleEndian, true) => LittleEndian::read_int(raw, size) as i128,
        (DatatypeByteOrder::LittleEndian, false) => LittleEndian::read_uint(raw, size) as i128,
        (DatatypeByteOrder::BigEndian, true) => BigEndian::read_int(raw, size) as i128,
        (DatatypeByteOrder::BigEndian, false) => BigEndian::read_uint(raw, size) as i128,
    }
}

fn read_float(raw: &[u8], size: u32, order: DatatypeByteOrder) -> EngineResult<f64> {
    let little = order == DatatypeByteOrder::LittleEndian;
    match size {
        4 if little => Ok(LittleEndian::read_f32(raw) as f64),
        4 => Ok(BigEndian::read_f32(raw) as f64),
        8 if little => Ok(LittleEndian::read_f64(raw)),
        8 => Ok(BigEndian::read_f64(raw)),
        #[cfg(feature = "float16")]
        2 => {
            let bits = if little {
                LittleEndian::read_u16(raw)
            } else {
                BigEndian::read_u16(raw)
            };
            Ok(half::f16::from_bits(bits).to_f64())
        }
        _ => Err(conversion(
            Minor::Unsupported,
            format!("{}-byte floats are not supported", size),
        )),
    }
}

fn strip_padding(raw: &[u8], padding: StringPadding) -> Vec<u8> {
    let end = match padding {
        StringPadding::NullTerminate | StringPadding::NullPad => {
            raw.iter().position(|&b| b == 0).unwrap_or(raw.len())
        }
        StringPadding::SpacePad => raw
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |p| p + 1),
    };
    raw[..end].to_vec()
}

fn decode(dtype: &Datatype, raw: &[u8], heap: &PayloadHeap) -> EngineResult<Value> {
    Ok(match dtype {
        Datatype::FixedPoint {
            size,
            byte_order,
            signed,
        } => Value::Int(read_int(raw, *size as usize, *byte_order, *signed)),
        Datatype::FloatingPoint { size, byte_order } => {
            Value::Float(read_float(raw, *size, *byte_order)?)
        }
        Datatype::String { padding, .. } => Value::Bytes(strip_padding(raw, *padding)),
        Datatype::VarLenString { .. } => {
            Value::Bytes(heap.get(VarLenRef::decode(raw))?.to_vec())
        }
        Datatype::Compound { members, .. } => {
            let mut fields = Vec::with_capacity(members.len());
            for m in members {
                let start = m.byte_offset as usize;
                let end = start + m.datatype.type_size() as usize;
                fields.push((m.name.clone(), decode(&m.datatype, &raw[start..end], heap)?));
            }
            Value::Record(fields)
        }
        Datatype::Enumeration { base_type, members } => {
            let value = match decode(base_type, raw, heap)? {
                Value::Int(v) => v as i64,
                _ => return Err(no_path(dtype, base_type)),
            };
            let name = members
                .iter()
                .find(|m| m.value == value)
                .map(|m| m.name.clone());
            Value::Enum { name, value }
        }
        Datatype::Array {
            base_type,
            dimensions,
        } => {
            let count: u32 = dimensions.iter().product();
            let step = base_type.type_size() as usize;
            let mut items = Vec::with_capacity(count as usize);
            for i in 0..count as usize {
                items.push(decode(base_type, &raw[i * step..(i + 1) * step], heap)?);
            }
            Value::List(items)
        }
        Datatype::Reference => Value::Ref(NativeEndian::read_u64(raw)),
    })
}

// ---------------------------------------------------------------------------
// encoding
// ---------------------------------------------------------------------------

fn int_range(size: u32, signed: bool) -> (i128, i128) {
    let bits = size * 8;
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

fn is_char_boundary(bytes: &[u8], index: usize) -> bool {
    index >= bytes.len() || (bytes[index] & 0xC0) != 0x80
}

/// Fit a string payload into a fixed-length slot according to `policy`.
pub(crate) fn fit_fixed_string(
    bytes: &[u8],
    out: &mut [u8],
    padding: StringPadding,
    charset: CharacterSet,
    policy: StringOverflow,
) -> EngineResult<()> {
    let capacity = match padding {
        StringPadding::NullTerminate => out.len().saturating_sub(1),
        StringPadding::NullPad | StringPadding::SpacePad => out.len(),
    };
    let mut take = bytes.len();
    if take > capacity {
        match policy {
            StringOverflow::Reject => {
                return Err(conversion(
                    Minor::Truncated,
                    format!(
                        "string of {} bytes does not fit a {}-byte fixed-length slot",
                        bytes.len(),
                        out.len()
                    ),
                ))
            }
            StringOverflow::Truncate => {
                take = capacity;
                if charset == CharacterSet::Utf8 {
                    while take > 0 && !is_char_boundary(bytes, take) {
                        take -= 1;
                    }
                }
            }
        }
    }
    out[..take].copy_from_slice(&bytes[..take]);
    let fill = if padding == StringPadding::SpacePad {
        b' '
    } else {
        0
    };
    out[take..].fill(fill);
    Ok(())
}

struct Encoder<'h> {
    heap: &'h mut PayloadHeap,
    policy: StringOverflow,
    allocated: Vec<VarLenRef>,
}

impl Encoder<'_> {
    fn write_int(
        &self,
        out: &mut [u8],
        size: u32,
        order: DatatypeByteOrder,
        signed: bool,
        v: i128,
    ) -> EngineResult<()> {
        let (min, max) = int_range(size, signed);
        if v < min || v > max {
            return Err(conversion(
                Minor::Overflow,
                format!(
                    "{v} does not fit {}{}",
                    if signed { "i" } else { "u" },
                    size * 8
                ),
            ));
        }
        let n = size as usize;
        match (order, signed) {
            (DatatypeByteOrder::LittleEndian, true) => LittleEndian::write_int(out, v as i64, n),
            (DatatypeByteOrder::LittleEndian, false) => LittleEndian::write_uint(out, v as u64, n),
            (DatatypeByteOrder::BigEndian, true) => BigEndian::write_int(out, v as i64, n),
            (DatatypeByteOrder::BigEndian, false) => BigEndian::write_uint(out, v as u64, n),
        }
        Ok(())
    }

    fn write_float(
        &self,
        out: &mut [u8],
        size: u32,
        order: DatatypeByteOrder,
        v: f64,
    ) -> EngineResult<()> {
        let little = order == DatatypeByteOrder::LittleEndian;
        match size {
            8 if little => LittleEndian::write_f64(out, v),
            8 => BigEndian::write_f64(out, v),
            4 => {
                let narrow = v as f32;
                if v.is_finite() && narrow.is_infinite() {
                    return Err(conversion(
                        Minor::Overflow,
                        format!("{v} overflows f32"),
                    ));
                }
                if little {
                    LittleEndian::write_f32(out, narrow)
                } else {
                    BigEndian::write_f32(out, narrow)
                }
            }
            #[cfg(feature = "float16")]
            2 => {
                let narrow = half::f16::from_f64(v);
                if v.is_finite() && narrow.is_infinite() {
                    return Err(conversion(
                        Minor::Overflow,
                        format!("{v} overflows f16"),
                    ));
                }
                if little {
                    LittleEndian::write_u16(out, narrow.to_bits())
                } else {
                    BigEndian::write_u16(out, narrow.to_bits())
                }
            }
            _ => {
                return Err(conversion(
                    Minor::Unsupported,
                    format!("{size}-byte floats are not supported"),
                ))
            }
        }
        Ok(())
    }

    fn encode(&mut self, dtype: &Datatype, value: &Value, out: &mut [u8]) -> EngineResult<()> {
        match (dtype, value) {
            (
                Datatype::FixedPoint {
                    size,
                    byte_order,
                    signed,
                },
                Value::Int(v),
            ) => self.write_int(out, *size, *byte_order, *signed, *v),
            (
                Datatype::FixedPoint {
                    size,
                    byte_order,
                    signed,
                },
                Value::Float(f),
            ) => {
                if !f.is_finite() || f.fract() != 0.0 || f.abs() >= 2f64.powi(127) {
                    return Err(conversion(
                        Minor::Overflow,
                        format!("{f} cannot be represented as an integer without loss"),
                    ));
                }
                self.write_int(out, *size, *byte_order, *signed, *f as i128)
            }
            (Datatype::FloatingPoint { size, byte_order }, Value::Int(v)) => {
                self.write_float(out, *size, *byte_order, *v as f64)
            }
            (Datatype::FloatingPoint { size, byte_order }, Value::Float(f)) => {
                self.write_float(out, *size, *byte_order, *f)
            }
            (
                Datatype::String {
                    padding, charset, ..
                },
                Value::Bytes(b),
            ) => fit_fixed_string(b, out, *padding, *charset, self.policy),
            (Datatype::VarLenString { .. }, Value::Bytes(b)) => {
                let slot = self.heap.alloc(b);
                if !slot.is_null() {
                    self.allocated.push(slot);
                }
                slot.encode(out);
                Ok(())
            }
            (Datatype::Enumeration { base_type, members }, Value::Enum { name, value }) => {
                let member = name
                    .as_ref()
                    .and_then(|n| members.iter().find(|m| &m.name == n))
                    .or_else(|| members.iter().find(|m| m.value == *value))
                    .ok_or_else(|| {
                        conversion(
                            Minor::Overflow,
                            format!("{value} is not a member of {dtype}"),
                        )
                    })?;
                self.encode(base_type, &Value::Int(member.value as i128), out)
            }
            (Datatype::Compound { members, .. }, Value::Record(fields)) => {
                out.fill(0);
                for m in members {
                    let (_, field) = fields.iter().find(|(n, _)| n == &m.name).ok_or_else(|| {
                        conversion(
                            Minor::NoConversionPath,
                            format!("source record has no member '{}'", m.name),
                        )
                    })?;
                    let start = m.byte_offset as usize;
                    let end = start + m.datatype.type_size() as usize;
                    self.encode(&m.datatype, field, &mut out[start..end])?;
                }
                Ok(())
            }
            (
                Datatype::Array {
                    base_type,
                    dimensions,
                },
                Value::List(items),
            ) => {
                let count: u32 = dimensions.iter().product();
                if items.len() != count as usize {
                    return Err(conversion(
                        Minor::NoConversionPath,
                        format!("{} array items for {dtype}", items.len()),
                    ));
                }
                let step = base_type.type_size() as usize;
                for (i, item) in items.iter().enumerate() {
                    self.encode(base_type, item, &mut out[i * step..(i + 1) * step])?;
                }
                Ok(())
            }
            (Datatype::Reference, Value::Ref(addr)) => {
                NativeEndian::write_u64(out, *addr);
                Ok(())
            }
            (dst, v) => Err(conversion(
                Minor::NoConversionPath,
                format!("cannot convert {} value {v} to {dst}", v.class()),
            )),
        }
    }
}
