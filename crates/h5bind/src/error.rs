//! Error taxonomy and the engine error mapper.
//!
//! Engine calls go through [`ErrorMapper`], which silences the engine's
//! automatic error printing for the duration of the call ([`SilenceGuard`]),
//! drains the engine error stack on failure and converts the innermost
//! engine code into an [`Error`] variant carrying the whole stack as detail.

use h5bind_engine::{Engine, EngineError, EngineResult, ErrorRecord, Major, Minor};
use thiserror::Error;

/// Errors produced by the binding layer.
///
/// `context` fields name the operation and object involved, e.g.
/// `reading dataset '/x'`; `detail` carries the underlying reason.
#[derive(Debug, Error)]
pub enum Error {
    /// A native resource could not be acquired, or a closed handle was used.
    #[error("resource error: {context}: {detail}")]
    Resource { context: String, detail: String },

    /// A named object, link or attribute does not exist.
    #[error("not found: {context}: {detail}")]
    NotFound { context: String, detail: String },

    /// The element types cannot be converted into each other.
    #[error("incompatible type: {context}: {detail}")]
    IncompatibleType { context: String, detail: String },

    /// A container's memory layout cannot be marshalled.
    #[error("unsupported layout: {0}")]
    UnsupportedLayout(String),

    /// Sibling sub-sequences at one nesting depth differ in length.
    #[error("ragged shape at depth {depth}: expected extent {expected}, found {found}")]
    RaggedShape {
        depth: usize,
        expected: u64,
        found: u64,
    },

    /// A user-defined record or enumeration layout is inconsistent.
    #[error("invalid record layout for '{record}': {detail}")]
    InvalidRecordLayout { record: String, detail: String },

    /// A buffer, container or selection does not have the required shape.
    #[error("shape mismatch: {context}: {detail}")]
    ShapeMismatch { context: String, detail: String },

    /// A value could not be converted without loss (overflow, truncation).
    #[error("conversion error: {context}: {detail}")]
    Conversion { context: String, detail: String },

    /// A property is not applicable to the list or is out of range.
    #[error("invalid property: {0}")]
    InvalidProperty(String),

    /// A string payload is not valid UTF-8.
    #[error("invalid UTF-8 string payload")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Any other engine failure.
    #[error("engine error: {context}: {detail}")]
    Engine { context: String, detail: String },
}

/// Result alias for the binding layer.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shape mismatch between an expected and an actual extent list.
    pub fn shape_mismatch(context: impl Into<String>, expected: &[u64], actual: &[u64]) -> Self {
        Error::ShapeMismatch {
            context: context.into(),
            detail: format!("expected shape {expected:?}, got {actual:?}"),
        }
    }

    /// Use of a handle after it was closed.
    pub fn closed(context: impl Into<String>) -> Self {
        Error::Resource {
            context: context.into(),
            detail: "handle is closed".into(),
        }
    }
}

/// Scoped suppression of the engine's automatic error printing.
///
/// Restores the previous setting when dropped, including during unwinding.
#[must_use = "printing is restored as soon as the guard is dropped"]
pub struct SilenceGuard<'e> {
    engine: &'e dyn Engine,
    previous: bool,
}

impl<'e> SilenceGuard<'e> {
    pub fn new(engine: &'e dyn Engine) -> Self {
        let previous = engine.set_error_printing(false);
        Self { engine, previous }
    }
}

impl Drop for SilenceGuard<'_> {
    fn drop(&mut self) {
        self.engine.set_error_printing(self.previous);
    }
}

/// Runs engine calls and converts their failures into [`Error`]s.
#[derive(Clone, Copy)]
pub struct ErrorMapper<'e> {
    engine: &'e dyn Engine,
}

impl<'e> ErrorMapper<'e> {
    pub fn new(engine: &'e dyn Engine) -> Self {
        Self { engine }
    }

    /// Run an engine call. `context` is only evaluated on failure.
    pub fn call<T>(
        &self,
        context: impl FnOnce() -> String,
        op: impl FnOnce(&dyn Engine) -> EngineResult<T>,
    ) -> Result<T> {
        self.run(context, op, false)
    }

    /// Run an engine call that creates or opens a resource. Failures
    /// without a more specific mapping become [`Error::Resource`].
    pub fn acquire<T>(
        &self,
        context: impl FnOnce() -> String,
        op: impl FnOnce(&dyn Engine) -> EngineResult<T>,
    ) -> Result<T> {
        self.run(context, op, true)
    }

    fn run<T>(
        &self,
        context: impl FnOnce() -> String,
        op: impl FnOnce(&dyn Engine) -> EngineResult<T>,
        acquiring: bool,
    ) -> Result<T> {
        let _silence = SilenceGuard::new(self.engine);
        op(self.engine).map_err(|err| {
            let stack = self.engine.take_error_stack();
            map_engine_error(err, &stack, context(), acquiring)
        })
    }
}

/// Join the error stack frames into one diagnostic, innermost first.
fn describe(err: &EngineError, stack: &[ErrorRecord]) -> String {
    if stack.is_empty() {
        return err.to_string();
    }
    stack
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convert an engine failure into the taxonomy.
pub fn map_engine_error(
    err: EngineError,
    stack: &[ErrorRecord],
    context: String,
    acquiring: bool,
) -> Error {
    let detail = describe(&err, stack);
    match (err.major, err.minor) {
        (_, Minor::NotFound) => Error::NotFound { context, detail },
        (_, Minor::Overflow | Minor::Truncated) => Error::Conversion { context, detail },
        (_, Minor::NoConversionPath) | (Major::Conversion, Minor::Unsupported) => {
            Error::IncompatibleType { context, detail }
        }
        (_, Minor::BadId) => Error::Resource { context, detail },
        (_, Minor::ShapeMismatch) => Error::ShapeMismatch { context, detail },
        (Major::Plist, Minor::BadValue) => Error::InvalidProperty(format!("{context}: {detail}")),
        _ if acquiring => Error::Resource { context, detail },
        _ => Error::Engine { context, detail },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5bind_engine::{Hid, MemEngine};

    #[test]
    fn mapping_table() {
        let map = |major, minor, acquiring| {
            map_engine_error(
                EngineError::new(major, minor, "x"),
                &[],
                "ctx".into(),
                acquiring,
            )
        };
        assert!(matches!(map(Major::Link, Minor::NotFound, false), Error::NotFound { .. }));
        assert!(matches!(
            map(Major::Conversion, Minor::Truncated, false),
            Error::Conversion { .. }
        ));
        assert!(matches!(
            map(Major::Conversion, Minor::NoConversionPath, false),
            Error::IncompatibleType { .. }
        ));
        assert!(matches!(
            map(Major::Conversion, Minor::Unsupported, false),
            Error::IncompatibleType { .. }
        ));
        assert!(matches!(map(Major::Dataset, Minor::Unsupported, false), Error::Engine { .. }));
        assert!(matches!(map(Major::Id, Minor::BadId, false), Error::Resource { .. }));
        assert!(matches!(
            map(Major::Plist, Minor::BadValue, false),
            Error::InvalidProperty(_)
        ));
        assert!(matches!(map(Major::File, Minor::CantOpen, true), Error::Resource { .. }));
        assert!(matches!(map(Major::File, Minor::CantOpen, false), Error::Engine { .. }));
    }

    #[test]
    fn mapper_restores_printing_and_drains_stack() {
        let engine = MemEngine::new();
        let mapper = ErrorMapper::new(&engine);
        let err = mapper
            .call(|| "closing".into(), |e| e.close(Hid(12345)))
            .unwrap_err();
        match err {
            Error::Resource { context, detail } => {
                assert_eq!(context, "closing");
                assert!(detail.starts_with("close(): "), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(engine.take_error_stack().is_empty());
        // printing was on before the call and is on again afterwards
        assert!(engine.set_error_printing(true));
    }

    #[test]
    fn guard_restores_on_unwind() {
        let engine = MemEngine::new();
        engine.set_error_printing(false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            engine.set_error_printing(true);
            let _guard = SilenceGuard::new(&engine);
            panic!("boom");
        }));
        assert!(result.is_err());
        // the guard put back the state it found (enabled)
        assert!(engine.set_error_printing(false));
    }

    #[test]
    fn shape_mismatch_detail() {
        let err = Error::shape_mismatch("reading dataset '/x'", &[3], &[2]);
        assert_eq!(
            err.to_string(),
            "shape mismatch: reading dataset '/x': expected shape [3], got [2]"
        );
    }
}
