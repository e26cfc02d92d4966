//! Flattening containers into transfer buffers and rebuilding them.
//!
//! Writes encode every element into a packed buffer of the element's
//! memory type, unless the container already holds its elements that way,
//! in which case its own storage is handed to the engine. Reads go the
//! other way. Variable-length payloads live on the engine heap for the
//! duration of one transfer; a [`PayloadGuard`] frees each of them exactly
//! once, on success and on failure alike.

use std::borrow::Cow;
use std::marker::PhantomData;
use std::slice::ChunksExact;

use h5bind_engine::{Datatype, Engine, EngineResult, Hid, PlistClass, VarLenRef};

use crate::error::{Error, ErrorMapper, Result};
use crate::handle::Handle;
use crate::props::{opt_id, realize_opt, PropertyList};
use crate::resolve::DataType;
use crate::shape::{fit_rank, H5Data, H5DataRead, Shape};
use crate::types::{H5Type, VlenSink, VlenSource};

/// Owns variable-length payloads on the engine heap until dropped.
pub(crate) struct PayloadGuard<'e> {
    engine: &'e dyn Engine,
    slots: Vec<VarLenRef>,
}

impl<'e> PayloadGuard<'e> {
    pub(crate) fn new(engine: &'e dyn Engine) -> Self {
        Self {
            engine,
            slots: Vec::new(),
        }
    }

    /// Take ownership of every slot in a buffer of `datatype` elements.
    fn adopt(&mut self, datatype: &Datatype, bytes: &[u8]) {
        let offsets = datatype.vlen_offsets();
        if offsets.is_empty() {
            return;
        }
        let size = datatype.type_size() as usize;
        for element in bytes.chunks_exact(size) {
            for &offset in &offsets {
                let slot = VarLenRef::decode(&element[offset..offset + 16]);
                if !slot.is_null() {
                    self.slots.push(slot);
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

impl VlenSink for PayloadGuard<'_> {
    fn store(&mut self, payload: &[u8]) -> Result<VarLenRef> {
        let slot = ErrorMapper::new(self.engine).call(
            || format!("allocating a {}-byte payload", payload.len()),
            |e| e.vlen_alloc(payload),
        )?;
        if !slot.is_null() {
            self.slots.push(slot);
        }
        Ok(slot)
    }
}

impl VlenSource for PayloadGuard<'_> {
    fn load(&mut self, slot: VarLenRef) -> Result<Vec<u8>> {
        if slot.is_null() {
            return Ok(Vec::new());
        }
        ErrorMapper::new(self.engine).call(
            || format!("reading payload {}", slot.id),
            |e| e.vlen_payload(slot),
        )
    }
}

impl Drop for PayloadGuard<'_> {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            if let Err(err) = ErrorMapper::new(self.engine)
                .call(|| format!("freeing payload {}", slot.id), |e| e.vlen_free(slot))
            {
                tracing::warn!("leaked variable-length payload: {err}");
            }
        }
    }
}

/// A packed buffer of elements, ready for the engine.
pub(crate) struct Buffer<'a> {
    bytes: Cow<'a, [u8]>,
    payloads: PayloadGuard<'a>,
}

impl Buffer<'_> {
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the buffer borrows the container's own storage.
    pub(crate) fn is_borrowed(&self) -> bool {
        matches!(self.bytes, Cow::Borrowed(_))
    }

    pub(crate) fn payload_count(&self) -> usize {
        self.payloads.len()
    }
}

/// Encode every element of `value` as `E::type_descriptor()` slots.
pub(crate) fn flatten<'a, T>(
    engine: &'a dyn Engine,
    value: &'a T,
    shape: &Shape,
    datatype: &Datatype,
) -> Result<Buffer<'a>>
where
    T: H5Data + ?Sized,
{
    let mut payloads = PayloadGuard::new(engine);
    if let Some(bytes) = value.as_contiguous().and_then(T::Element::as_bytes) {
        return Ok(Buffer {
            bytes: Cow::Borrowed(bytes),
            payloads,
        });
    }

    let size = datatype.type_size() as usize;
    let count = element_count(shape)?;
    let mut bytes = vec![0u8; buffer_len(shape, datatype)?];
    {
        let mut slots = bytes.chunks_exact_mut(size);
        value.for_each_element(&mut |element| {
            let slot = slots.next().ok_or_else(|| {
                Error::UnsupportedLayout(format!("container yields more than {count} elements"))
            })?;
            element.encode(slot, &mut payloads)
        })?;
    }
    Ok(Buffer {
        bytes: Cow::Owned(bytes),
        payloads,
    })
}

fn element_count(shape: &Shape) -> Result<usize> {
    usize::try_from(shape.num_elements())
        .map_err(|_| Error::UnsupportedLayout(format!("shape {shape} does not fit in memory")))
}

/// Bytes of a packed buffer holding `shape` elements of `datatype`.
fn buffer_len(shape: &Shape, datatype: &Datatype) -> Result<usize> {
    element_count(shape)?
        .checked_mul(datatype.type_size() as usize)
        .ok_or_else(|| Error::UnsupportedLayout(format!("shape {shape} does not fit in memory")))
}

/// Decodes consecutive element slots, stopping at the first failure.
struct Decoded<'b, 'e, E> {
    slots: ChunksExact<'b, u8>,
    payloads: &'b mut PayloadGuard<'e>,
    error: Option<Error>,
    _element: PhantomData<E>,
}

impl<'b, 'e, E: H5Type> Decoded<'b, 'e, E> {
    fn new(bytes: &'b [u8], size: usize, payloads: &'b mut PayloadGuard<'e>) -> Self {
        Self {
            slots: bytes.chunks_exact(size),
            payloads,
            error: None,
            _element: PhantomData,
        }
    }

    /// The first decoding failure, if any.
    fn finish(self) -> Result<()> {
        self.error.map_or(Ok(()), Err)
    }
}

impl<E: H5Type> Iterator for Decoded<'_, '_, E> {
    type Item = E;

    fn next(&mut self) -> Option<E> {
        if self.error.is_some() {
            return None;
        }
        let slot = self.slots.next()?;
        match E::decode(slot, &mut *self.payloads) {
            Ok(element) => Some(element),
            Err(err) => {
                self.error = Some(err);
                None
            }
        }
    }
}

/// Rebuild a container of extents `dims` from a packed buffer.
pub(crate) fn unflatten<T: H5DataRead>(
    bytes: &[u8],
    datatype: &Datatype,
    dims: &[u64],
    payloads: &mut PayloadGuard<'_>,
) -> Result<T> {
    let mut decoded = Decoded::<T::Element>::new(bytes, datatype.type_size() as usize, payloads);
    let result = T::from_elements(dims, &mut decoded);
    decoded.finish()?;
    result
}

/// Decode a packed buffer fully, then refill `value` in place.
pub(crate) fn unflatten_into<T: H5DataRead>(
    bytes: &[u8],
    datatype: &Datatype,
    value: &mut T,
    payloads: &mut PayloadGuard<'_>,
) -> Result<()> {
    let mut decoded = Decoded::<T::Element>::new(bytes, datatype.type_size() as usize, payloads);
    let elements: Vec<T::Element> = decoded.by_ref().collect();
    decoded.finish()?;
    value.fill_from(&mut elements.into_iter())
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// A dataset or attribute: something holding a whole array of elements.
pub(crate) trait Container {
    fn handle(&self) -> &Handle;

    /// `dataset '/x'` or `attribute 'units' of '/x'`.
    fn describe(&self) -> String;

    fn extents(&self) -> Result<Vec<u64>>;

    fn write_raw(
        &self,
        engine: &dyn Engine,
        id: Hid,
        mem_type: Hid,
        buf: &[u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()>;

    fn read_raw(
        &self,
        engine: &dyn Engine,
        id: Hid,
        mem_type: Hid,
        buf: &mut [u8],
        dxpl: Option<Hid>,
    ) -> EngineResult<()>;
}

/// Engine-side objects that stay alive for one transfer.
struct Transfer {
    id: Hid,
    mem_type: DataType,
    dxpl: Option<Handle>,
}

impl Transfer {
    fn prepare<C: Container>(
        target: &C,
        descriptor: &Datatype,
        dxpl: Option<&PropertyList>,
    ) -> Result<Self> {
        let handle = target.handle();
        let id = handle.id()?;
        let engine = handle.engine();
        Ok(Self {
            id,
            mem_type: DataType::from_descriptor(engine, descriptor)?,
            dxpl: realize_opt(engine, dxpl, PlistClass::DatasetTransfer)?,
        })
    }
}

/// Write the whole of `value` to `target`.
pub(crate) fn write<C, T>(target: &C, value: &T, dxpl: Option<&PropertyList>) -> Result<()>
where
    C: Container,
    T: H5Data + ?Sized,
{
    let shape = value.shape()?;
    let stored = target.extents()?;
    if !shape.is_compatible_with(&stored) {
        let context = format!("writing {}", target.describe());
        return Err(Error::shape_mismatch(context, &stored, shape.dims()));
    }
    write_shaped(target, value, &shape, dxpl)
}

/// Write every element of `target` from `elements` in row-major order,
/// whatever the stored rank.
pub(crate) fn write_flat<C, E>(target: &C, elements: &[E], dxpl: Option<&PropertyList>) -> Result<()>
where
    C: Container,
    E: H5Type + H5Data<Element = E>,
{
    let stored = Shape::new(target.extents()?);
    if element_count(&stored)? != elements.len() {
        let context = format!("writing {}", target.describe());
        return Err(Error::shape_mismatch(context, stored.dims(), &[elements.len() as u64]));
    }
    write_shaped(target, elements, &stored, dxpl)
}

fn write_shaped<C, T>(target: &C, value: &T, shape: &Shape, dxpl: Option<&PropertyList>) -> Result<()>
where
    C: Container,
    T: H5Data + ?Sized,
{
    let context = || format!("writing {}", target.describe());
    let descriptor = T::Element::type_descriptor()?;
    let transfer = Transfer::prepare(target, &descriptor, dxpl)?;
    let engine = &**target.handle().engine();
    let buffer = flatten(engine, value, shape, &descriptor)?;
    let (mem_type, dxpl_id) = (transfer.mem_type.id()?, opt_id(&transfer.dxpl)?);
    target.handle().mapper().call(context, |e| {
        target.write_raw(e, transfer.id, mem_type, buffer.bytes(), dxpl_id)
    })?;
    tracing::trace!(
        object = %target.describe(),
        %shape,
        bytes = buffer.bytes().len(),
        borrowed = buffer.is_borrowed(),
        payloads = buffer.payload_count(),
        "wrote"
    );
    Ok(())
}

/// Read `target` into a new container.
pub(crate) fn read<C, T>(target: &C, dxpl: Option<&PropertyList>) -> Result<T>
where
    C: Container,
    T: H5DataRead,
{
    let context = || format!("reading {}", target.describe());
    let stored = target.extents()?;
    let dims = fit_rank(&stored, T::MIN_RANK, T::MAX_RANK).ok_or_else(|| Error::ShapeMismatch {
        context: context(),
        detail: format!(
            "stored shape {stored:?} cannot be read as rank {}..={}",
            T::MIN_RANK,
            T::MAX_RANK
        ),
    })?;
    read_shaped(target, &stored, &dims, dxpl)
}

/// Read every element of `target` in row-major order, whatever its rank.
pub(crate) fn read_flat<C, E>(target: &C, dxpl: Option<&PropertyList>) -> Result<Vec<E>>
where
    C: Container,
    E: H5Type + H5DataRead<Element = E>,
{
    let stored = target.extents()?;
    let count = element_count(&Shape::new(stored.clone()))?;
    read_shaped(target, &stored, &[count as u64], dxpl)
}

/// Read `stored` extents from `target` and rebuild them as `dims`, which
/// hold the same number of elements.
fn read_shaped<C, T>(target: &C, stored: &[u64], dims: &[u64], dxpl: Option<&PropertyList>) -> Result<T>
where
    C: Container,
    T: H5DataRead,
{
    let context = || format!("reading {}", target.describe());
    let descriptor = T::Element::type_descriptor()?;
    let transfer = Transfer::prepare(target, &descriptor, dxpl)?;
    let engine = &**target.handle().engine();
    let mut bytes = vec![0u8; buffer_len(&Shape::new(stored), &descriptor)?];
    let (mem_type, dxpl_id) = (transfer.mem_type.id()?, opt_id(&transfer.dxpl)?);
    target.handle().mapper().call(context, |e| {
        target.read_raw(e, transfer.id, mem_type, &mut bytes, dxpl_id)
    })?;

    let mut payloads = PayloadGuard::new(engine);
    payloads.adopt(&descriptor, &bytes);
    tracing::trace!(object = %target.describe(), ?dims, bytes = bytes.len(), "read");
    unflatten(&bytes, &descriptor, dims, &mut payloads)
}

/// Read `target` into `value`, whose shape must equal the stored one. On
/// failure `value` is left unchanged.
pub(crate) fn read_into<C, T>(target: &C, value: &mut T, dxpl: Option<&PropertyList>) -> Result<()>
where
    C: Container,
    T: H5DataRead,
{
    let context = || format!("reading {}", target.describe());
    let shape = value.shape()?;
    let stored = target.extents()?;
    if shape.dims() != stored.as_slice() {
        return Err(Error::shape_mismatch(context(), &stored, shape.dims()));
    }

    let descriptor = T::Element::type_descriptor()?;
    let transfer = Transfer::prepare(target, &descriptor, dxpl)?;
    let engine = &**target.handle().engine();
    let (mem_type, dxpl_id) = (transfer.mem_type.id()?, opt_id(&transfer.dxpl)?);

    if let Some(bytes) = value.as_contiguous_mut().and_then(T::Element::as_bytes_mut) {
        target.handle().mapper().call(context, |e| {
            target.read_raw(e, transfer.id, mem_type, bytes, dxpl_id)
        })?;
        tracing::trace!(object = %target.describe(), %shape, "read in place");
        return Ok(());
    }

    let mut bytes = vec![0u8; buffer_len(&shape, &descriptor)?];
    target.handle().mapper().call(context, |e| {
        target.read_raw(e, transfer.id, mem_type, &mut bytes, dxpl_id)
    })?;
    let mut payloads = PayloadGuard::new(engine);
    payloads.adopt(&descriptor, &bytes);
    tracing::trace!(object = %target.describe(), %shape, bytes = bytes.len(), "read");
    unflatten_into(&bytes, &descriptor, value, &mut payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5bind_engine::MemEngine;

    #[test]
    fn contiguous_numbers_are_borrowed() {
        let engine = MemEngine::new();
        let value = vec![1.0f64, 2.0, 3.0];
        let shape = value.shape().unwrap();
        let buffer = flatten(&engine, &value, &shape, &Datatype::float(8)).unwrap();
        assert!(buffer.is_borrowed());
        assert_eq!(buffer.bytes().as_ptr(), value.as_ptr().cast::<u8>());
    }

    #[test]
    fn nested_vectors_are_packed() {
        let engine = MemEngine::new();
        let value = vec![vec![1u16, 2], vec![3, 4]];
        let shape = value.shape().unwrap();
        let buffer = flatten(&engine, &value, &shape, &Datatype::integer(2, false)).unwrap();
        assert!(!buffer.is_borrowed());
        let back: Vec<u16> = buffer
            .bytes()
            .chunks_exact(2)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(back, vec![1, 2, 3, 4]);
    }

    #[test]
    fn payloads_are_freed_with_the_buffer() {
        let engine = MemEngine::new();
        let value = vec!["a".to_string(), String::new(), "ccc".to_string()];
        let shape = value.shape().unwrap();
        let buffer = flatten(&engine, &value, &shape, &Datatype::var_len_string()).unwrap();
        // the empty string needs no payload
        assert_eq!(buffer.payload_count(), 2);
        assert_eq!(engine.vlen_live(), 2);

        let mut source = PayloadGuard::new(&engine);
        let text: Vec<String> =
            unflatten(buffer.bytes(), &Datatype::var_len_string(), &[3], &mut source).unwrap();
        assert_eq!(text, value);
        drop(buffer);
        assert_eq!(engine.vlen_live(), 0);
    }

    #[test]
    fn adopted_payloads_are_freed_after_decoding() {
        let engine = MemEngine::new();
        let value = vec!["x".to_string(), "yy".to_string()];
        let descriptor = Datatype::var_len_string();
        let mut bytes = vec![0u8; 32];
        for (text, slot) in value.iter().zip(bytes.chunks_exact_mut(16)) {
            engine.vlen_alloc(text.as_bytes()).unwrap().encode(slot);
        }
        assert_eq!(engine.vlen_live(), 2);
        let mut guard = PayloadGuard::new(&engine);
        guard.adopt(&descriptor, &bytes);
        let text: Vec<String> = unflatten(&bytes, &descriptor, &[2], &mut guard).unwrap();
        assert_eq!(text, value);
        drop(guard);
        assert_eq!(engine.vlen_live(), 0);
    }

    #[test]
    fn decode_errors_surface_and_leave_target_unchanged() {
        let engine = MemEngine::new();
        let mut guard = PayloadGuard::new(&engine);
        let mut target = vec![true, false];
        let err = unflatten_into(&[1, 9], &bool::type_descriptor().unwrap(), &mut target, &mut guard)
            .unwrap_err();
        assert!(matches!(err, Error::Conversion { .. }), "{err}");
        assert_eq!(target, vec![true, false]);
    }
}
