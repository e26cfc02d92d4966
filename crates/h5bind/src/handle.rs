//! Shared ownership of native identifiers.
//!
//! A [`Handle`] owns one engine identifier. Clones share it; the identifier
//! is released exactly once, either by an explicit [`Handle::close`] or when
//! the last clone is dropped.
//!
//! # Concurrency
//!
//! `Handle` is `Send + Sync`, but the binding layer adds no locking of its
//! own: when the engine is not reentrant, callers must serialize all engine
//! access, including the drop of the last clone of a handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use h5bind_engine::{Engine, EngineResult, HandleKind, Hid};

use crate::error::{Error, ErrorMapper, Result, SilenceGuard};

struct Inner {
    engine: Arc<dyn Engine>,
    id: Hid,
    kind: HandleKind,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _silence = SilenceGuard::new(&*self.engine);
        match self.engine.close(self.id) {
            Ok(()) => tracing::debug!(id = %self.id, kind = %self.kind, "released"),
            Err(err) => {
                self.engine.take_error_stack();
                tracing::warn!(id = %self.id, kind = %self.kind, "release failed: {err}");
            }
        }
    }
}

/// Reference-counted owner of one engine identifier.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<Inner>,
}

impl Handle {
    /// Take ownership of an identifier returned by `engine`.
    pub fn from_raw(engine: Arc<dyn Engine>, id: Hid, kind: HandleKind) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                id,
                kind,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Run a creating or opening engine call and own its result.
    pub fn acquire(
        engine: &Arc<dyn Engine>,
        kind: HandleKind,
        context: impl FnOnce() -> String,
        op: impl FnOnce(&dyn Engine) -> EngineResult<Hid>,
    ) -> Result<Self> {
        let id = ErrorMapper::new(&**engine).acquire(context, op)?;
        tracing::debug!(%id, %kind, "acquired");
        Ok(Self::from_raw(Arc::clone(engine), id, kind))
    }

    /// The identifier, or [`Error::Resource`] once closed.
    pub fn id(&self) -> Result<Hid> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::closed(format!("using {} handle", self.inner.kind)));
        }
        Ok(self.inner.id)
    }

    pub fn kind(&self) -> HandleKind {
        self.inner.kind
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.inner.engine
    }

    /// Error mapper bound to this handle's engine.
    pub fn mapper(&self) -> ErrorMapper<'_> {
        ErrorMapper::new(&*self.inner.engine)
    }

    /// Whether the identifier is still open.
    pub fn is_valid(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && self.inner.engine.is_valid(self.inner.id)
    }

    /// Release the identifier now, for every clone. Closing twice is a
    /// no-op.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (id, kind) = (self.inner.id, self.inner.kind);
        self.mapper()
            .acquire(|| format!("closing {kind} {id}"), |e| e.close(id))?;
        tracing::debug!(%id, %kind, "closed");
        Ok(())
    }

    /// Number of clones sharing the identifier.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Objects backed by one [`Handle`].
pub trait AsHandle {
    fn as_handle(&self) -> &Handle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5bind_engine::{Datatype, MemEngine, PlistClass};

    fn engine() -> (Arc<MemEngine>, Arc<dyn Engine>) {
        let mem = Arc::new(MemEngine::new());
        let dyn_engine: Arc<dyn Engine> = mem.clone();
        (mem, dyn_engine)
    }

    #[test]
    fn last_clone_releases() {
        let (mem, engine) = engine();
        let h = Handle::acquire(&engine, HandleKind::Datatype, String::new, |e| {
            e.type_create(&Datatype::float(8))
        })
        .unwrap();
        let copy = h.clone();
        assert_eq!(h.share_count(), 2);
        drop(h);
        assert_eq!(mem.open_handles(), 1);
        assert!(copy.is_valid());
        drop(copy);
        assert_eq!(mem.open_handles(), 0);
    }

    #[test]
    fn close_is_idempotent_and_shared() {
        let (mem, engine) = engine();
        let h = Handle::acquire(&engine, HandleKind::PropertyList, String::new, |e| {
            e.plist_create(PlistClass::DatasetCreate)
        })
        .unwrap();
        let copy = h.clone();
        h.close().unwrap();
        h.close().unwrap();
        assert!(!copy.is_valid());
        assert!(matches!(copy.id(), Err(Error::Resource { .. })));
        assert_eq!(mem.open_handles(), 0);
        drop(copy);
        drop(h);
        assert_eq!(mem.open_handles(), 0);
    }

    #[test]
    fn failed_acquire_is_a_resource_error() {
        let (_mem, engine) = engine();
        let err = Handle::acquire(
            &engine,
            HandleKind::File,
            || "opening 'nope.h5'".into(),
            |e| e.file_open("nope.h5", h5bind_engine::FileMode::ReadOnly, None),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Resource { .. }), "{err}");
    }

    #[test]
    fn handles_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Handle>();
    }
}
