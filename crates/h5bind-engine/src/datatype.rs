//! Native element type descriptors.
//!
//! A [`Datatype`] describes the layout of one element slot in a buffer or a
//! stored dataset: integers and floats of a given width and byte order,
//! fixed-length and variable-length strings, compound records, enumerations,
//! fixed-size arrays and object references.

use std::fmt;

/// Size in bytes of a variable-length slot: heap reference (`u64`) followed
/// by the payload length in bytes (`u64`), both native-endian.
pub const VLEN_SLOT_SIZE: u32 = 16;

/// Size in bytes of an object reference slot.
pub const REFERENCE_SIZE: u32 = 8;

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatatypeByteOrder {
    LittleEndian,
    BigEndian,
}

impl DatatypeByteOrder {
    /// Byte order of the host.
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            DatatypeByteOrder::LittleEndian
        } else {
            DatatypeByteOrder::BigEndian
        }
    }
}

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringPadding {
    /// Terminated by a NUL byte; capacity is `size - 1` characters.
    NullTerminate,
    /// Padded with NUL bytes; capacity is `size`.
    NullPad,
    /// Padded with spaces; capacity is `size`.
    SpacePad,
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    /// Member name.
    pub name: String,
    /// Byte offset within the compound.
    pub byte_offset: u64,
    /// Member datatype.
    pub datatype: Datatype,
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    /// Member name.
    pub name: String,
    /// Integer value, interpreted through the enumeration's base type.
    pub value: i64,
}

/// Element datatype descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Datatype {
    /// Integer of `size` bytes.
    FixedPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
        signed: bool,
    },
    /// IEEE float of `size` bytes (2, 4 or 8).
    FloatingPoint {
        size: u32,
        byte_order: DatatypeByteOrder,
    },
    /// Fixed-length string of `size` bytes.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Variable-length string stored through a heap indirection slot.
    VarLenString { charset: CharacterSet },
    /// Record with named, ordered, typed members.
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Named integer values over an integer base type.
    Enumeration {
        base_type: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Fixed-size n-dimensional array of a base type.
    Array {
        base_type: Box<Datatype>,
        dimensions: Vec<u32>,
    },
    /// Reference to another object in the same file.
    Reference,
}

impl Datatype {
    /// Native-endian integer type.
    pub fn integer(size: u32, signed: bool) -> Self {
        Datatype::FixedPoint {
            size,
            byte_order: DatatypeByteOrder::native(),
            signed,
        }
    }

    /// Native-endian float type.
    pub fn float(size: u32) -> Self {
        Datatype::FloatingPoint {
            size,
            byte_order: DatatypeByteOrder::native(),
        }
    }

    /// Null-terminated UTF-8 fixed-length string of `size` bytes.
    pub fn fixed_string(size: u32) -> Self {
        Datatype::String {
            size,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Utf8,
        }
    }

    /// Variable-length UTF-8 string.
    pub fn var_len_string() -> Self {
        Datatype::VarLenString {
            charset: CharacterSet::Utf8,
        }
    }

    /// Size of one element in bytes.
    pub fn type_size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::String { size, .. }
            | Datatype::Compound { size, .. } => *size,
            Datatype::VarLenString { .. } => VLEN_SLOT_SIZE,
            Datatype::Enumeration { base_type, .. } => base_type.type_size(),
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                let count: u32 = dimensions.iter().product();
                base_type.type_size() * count
            }
            Datatype::Reference => REFERENCE_SIZE,
        }
    }

    /// Whether any part of this type is stored through heap indirection.
    pub fn has_vlen(&self) -> bool {
        match self {
            Datatype::VarLenString { .. } => true,
            Datatype::Compound { members, .. } => members.iter().any(|m| m.datatype.has_vlen()),
            Datatype::Array { base_type, .. } => base_type.has_vlen(),
            _ => false,
        }
    }

    /// Byte offsets of every variable-length slot inside one element.
    pub fn vlen_offsets(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_vlen_offsets(0, &mut out);
        out
    }

    fn collect_vlen_offsets(&self, base: usize, out: &mut Vec<usize>) {
        match self {
            Datatype::VarLenString { .. } => out.push(base),
            Datatype::Compound { members, .. } => {
                for m in members {
                    m.datatype
                        .collect_vlen_offsets(base + m.byte_offset as usize, out);
                }
            }
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                if base_type.has_vlen() {
                    let count: u32 = dimensions.iter().product();
                    let step = base_type.type_size() as usize;
                    for i in 0..count as usize {
                        base_type.collect_vlen_offsets(base + i * step, out);
                    }
                }
            }
            _ => {}
        }
    }

    /// Short class name used in diagnostics.
    pub fn class_name(&self) -> &'static str {
        match self {
            Datatype::FixedPoint { .. } => "integer",
            Datatype::FloatingPoint { .. } => "float",
            Datatype::String { .. } => "string",
            Datatype::VarLenString { .. } => "vlen string",
            Datatype::Compound { .. } => "compound",
            Datatype::Enumeration { .. } => "enum",
            Datatype::Array { .. } => "array",
            Datatype::Reference => "reference",
        }
    }

    /// Check internal consistency: sizes, member bounds, enum base class.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Datatype::FixedPoint { size, .. } => match size {
                1 | 2 | 4 | 8 => Ok(()),
                _ => Err(format!("unsupported integer width {size}")),
            },
            Datatype::FloatingPoint { size, .. } => match size {
                2 | 4 | 8 => Ok(()),
                _ => Err(format!("unsupported float width {size}")),
            },
            Datatype::String { size, padding, .. } => {
                if *size == 0 {
                    return Err("fixed-length string of size 0".into());
                }
                if *size == 1 && *padding == StringPadding::NullTerminate {
                    return Err("null-terminated string needs at least 2 bytes".into());
                }
                Ok(())
            }
            Datatype::VarLenString { .. } | Datatype::Reference => Ok(()),
            Datatype::Compound { size, members } => {
                if members.is_empty() {
                    return Err("compound type without members".into());
                }
                for m in members {
                    m.datatype.validate()?;
                    let end = m.byte_offset + m.datatype.type_size() as u64;
                    if end > *size as u64 {
                        return Err(format!(
                            "member '{}' ends at byte {end}, past compound size {size}",
                            m.name
                        ));
                    }
                }
                Ok(())
            }
            Datatype::Enumeration { base_type, .. } => match base_type.as_ref() {
                Datatype::FixedPoint { .. } => base_type.validate(),
                other => Err(format!("enum base must be an integer, got {other}")),
            },
            Datatype::Array {
                base_type,
                dimensions,
            } => {
                if dimensions.is_empty() || dimensions.contains(&0) {
                    return Err(format!("invalid array dimensions {dimensions:?}"));
                }
                base_type.validate()
            }
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::FixedPoint { size, signed, .. } => {
                let prefix = if *signed { "i" } else { "u" };
                write!(f, "{prefix}{}", size * 8)
            }
            Datatype::FloatingPoint { size, .. } => write!(f, "f{}", size * 8),
            Datatype::String { size, .. } => write!(f, "string[{size}]"),
            Datatype::VarLenString { .. } => write!(f, "vlen_string"),
            Datatype::Compound { members, .. } => {
                write!(f, "compound{{")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", m.name, m.datatype)?;
                }
                write!(f, "}}")
            }
            Datatype::Enumeration { base_type, members } => {
                let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
                write!(f, "enum<{base_type}>[{}]", names.join(", "))
            }
            Datatype::Array {
                base_type,
                dimensions,
            } => write!(f, "array<{base_type}, {dimensions:?}>"),
            Datatype::Reference => write!(f, "reference"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Datatype {
        Datatype::Compound {
            size: 24,
            members: vec![
                CompoundMember {
                    name: "label".into(),
                    byte_offset: 0,
                    datatype: Datatype::var_len_string(),
                },
                CompoundMember {
                    name: "x".into(),
                    byte_offset: 16,
                    datatype: Datatype::float(8),
                },
            ],
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(Datatype::integer(4, true).type_size(), 4);
        assert_eq!(Datatype::var_len_string().type_size(), VLEN_SLOT_SIZE);
        assert_eq!(point().type_size(), 24);
        let arr = Datatype::Array {
            base_type: Box::new(Datatype::float(8)),
            dimensions: vec![2, 3],
        };
        assert_eq!(arr.type_size(), 48);
    }

    #[test]
    fn vlen_offsets_inside_records_and_arrays() {
        assert!(point().has_vlen());
        assert_eq!(point().vlen_offsets(), vec![0]);
        let arr = Datatype::Array {
            base_type: Box::new(point()),
            dimensions: vec![2],
        };
        assert_eq!(arr.vlen_offsets(), vec![0, 24]);
        assert!(!Datatype::float(4).has_vlen());
    }

    #[test]
    fn validate_rejects_member_past_end() {
        let bad = Datatype::Compound {
            size: 8,
            members: vec![CompoundMember {
                name: "x".into(),
                byte_offset: 4,
                datatype: Datatype::float(8),
            }],
        };
        assert!(bad.validate().is_err());
        assert!(point().validate().is_ok());
    }

    #[test]
    fn display() {
        assert_eq!(Datatype::integer(4, true).to_string(), "i32");
        assert_eq!(Datatype::integer(1, false).to_string(), "u8");
        assert_eq!(Datatype::fixed_string(10).to_string(), "string[10]");
        assert_eq!(point().to_string(), "compound{label: vlen_string, x: f64}");
    }
}
