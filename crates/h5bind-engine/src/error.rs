//! Engine error codes and the per-thread error stack records.
//!
//! Every fallible [`Engine`](crate::engine::Engine) call returns an
//! [`EngineError`] describing the innermost failure. The engine additionally
//! pushes one [`ErrorRecord`] per frame onto the calling thread's error stack,
//! which callers drain with `take_error_stack` to build a full diagnostic.

use std::fmt;

/// Subsystem in which an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Major {
    /// Invalid arguments passed to an engine call.
    Args,
    /// Identifier table (unknown or closed handles).
    Id,
    /// File creation, opening and flushing.
    File,
    /// Links and groups.
    Link,
    /// Datasets.
    Dataset,
    /// Attributes.
    Attribute,
    /// Datatype descriptors.
    Datatype,
    /// Dataspace descriptors.
    Dataspace,
    /// Property lists.
    Plist,
    /// Variable-length payload heap.
    Heap,
    /// Element type conversion.
    Conversion,
}

impl fmt::Display for Major {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Major::Args => "Invalid arguments to routine",
            Major::Id => "Object ID",
            Major::File => "File accessibility",
            Major::Link => "Links",
            Major::Dataset => "Dataset",
            Major::Attribute => "Attribute",
            Major::Datatype => "Datatype",
            Major::Dataspace => "Dataspace",
            Major::Plist => "Property lists",
            Major::Heap => "Heap",
            Major::Conversion => "Datatype conversion",
        };
        f.write_str(s)
    }
}

/// Specific failure reason within a [`Major`] subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Minor {
    /// The identifier is unknown, closed, or of the wrong kind.
    BadId,
    /// A named object or link does not exist.
    NotFound,
    /// A named object or link already exists.
    AlreadyExists,
    /// The file could not be opened or created.
    CantOpen,
    /// A write was attempted through a read-only file.
    ReadOnly,
    /// An argument value is out of range or inconsistent.
    BadValue,
    /// Buffer or extent sizes do not agree.
    ShapeMismatch,
    /// A numeric value does not fit the destination type.
    Overflow,
    /// A string does not fit a fixed-length destination.
    Truncated,
    /// No conversion exists between the two type classes.
    NoConversionPath,
    /// A heap reference was freed twice or never allocated.
    InvalidFree,
    /// The operation is not supported for this object.
    Unsupported,
}

impl fmt::Display for Minor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Minor::BadId => "Inappropriate type or closed identifier",
            Minor::NotFound => "Object not found",
            Minor::AlreadyExists => "Object already exists",
            Minor::CantOpen => "Unable to open file",
            Minor::ReadOnly => "Write intent on read-only file",
            Minor::BadValue => "Bad value",
            Minor::ShapeMismatch => "Extent or buffer size mismatch",
            Minor::Overflow => "Numeric overflow",
            Minor::Truncated => "String truncation",
            Minor::NoConversionPath => "No conversion path",
            Minor::InvalidFree => "Invalid free of heap object",
            Minor::Unsupported => "Feature is unsupported",
        };
        f.write_str(s)
    }
}

/// Innermost failure returned by an engine call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("({major}) {minor}: {message}")]
pub struct EngineError {
    /// Subsystem of the failure.
    pub major: Major,
    /// Specific reason.
    pub minor: Minor,
    /// Human-readable detail.
    pub message: String,
}

impl EngineError {
    /// Create a new error.
    pub fn new(major: Major, minor: Minor, message: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            message: message.into(),
        }
    }
}

/// One frame of the engine's error stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Subsystem of this frame.
    pub major: Major,
    /// Reason of this frame.
    pub minor: Minor,
    /// Engine routine that pushed the frame.
    pub function: &'static str,
    /// Detail text.
    pub description: String,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}(): ({}) {}: {}",
            self.function, self.major, self.minor, self.description
        )
    }
}

/// Result alias for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display() {
        let err = EngineError::new(Major::Dataset, Minor::NotFound, "'x' does not exist");
        assert_eq!(
            err.to_string(),
            "(Dataset) Object not found: 'x' does not exist"
        );
    }

    #[test]
    fn record_display_names_function() {
        let rec = ErrorRecord {
            major: Major::Conversion,
            minor: Minor::Overflow,
            function: "dataset_write",
            description: "300 does not fit u8".into(),
        };
        assert!(rec.to_string().starts_with("dataset_write(): (Datatype conversion)"));
    }
}
