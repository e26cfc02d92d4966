//! Payload heap for variable-length data.

use std::collections::HashMap;

use crate::engine::VarLenRef;
use crate::error::{EngineError, EngineResult, Major, Minor};

/// Id-addressed byte payloads. Id 0 is reserved for the null reference.
#[derive(Debug)]
pub(crate) struct PayloadHeap {
    next_id: u64,
    objects: HashMap<u64, Vec<u8>>,
}

impl Default for PayloadHeap {
    fn default() -> Self {
        Self {
            next_id: 1,
            objects: HashMap::new(),
        }
    }
}

impl PayloadHeap {
    /// Store a payload. Empty payloads map to the null reference.
    pub fn alloc(&mut self, payload: &[u8]) -> VarLenRef {
        if payload.is_empty() {
            return VarLenRef::NULL;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, payload.to_vec());
        VarLenRef {
            id,
            len: payload.len() as u64,
        }
    }

    pub fn get(&self, slot: VarLenRef) -> EngineResult<&[u8]> {
        if slot.is_null() {
            return Ok(&[]);
        }
        let data = self.objects.get(&slot.id).ok_or_else(|| {
            EngineError::new(
                Major::Heap,
                Minor::BadValue,
                format!("heap object {} does not exist", slot.id),
            )
        })?;
        if data.len() as u64 != slot.len {
            return Err(EngineError::new(
                Major::Heap,
                Minor::BadValue,
                format!(
                    "heap object {} holds {} bytes, slot says {}",
                    slot.id,
                    data.len(),
                    slot.len
                ),
            ));
        }
        Ok(data)
    }

    pub fn free(&mut self, slot: VarLenRef) -> EngineResult<()> {
        if slot.is_null() {
            return Ok(());
        }
        match self.objects.remove(&slot.id) {
            Some(_) => Ok(()),
            None => Err(EngineError::new(
                Major::Heap,
                Minor::InvalidFree,
                format!("heap object {} is not allocated", slot.id),
            )),
        }
    }

    pub fn live(&self) -> usize {
        self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_get_free() {
        let mut heap = PayloadHeap::default();
        let slot = heap.alloc(b"hello");
        assert_eq!(slot.len, 5);
        assert_eq!(heap.get(slot).unwrap(), b"hello");
        assert_eq!(heap.live(), 1);
        heap.free(slot).unwrap();
        assert_eq!(heap.live(), 0);
        let err = heap.free(slot).unwrap_err();
        assert_eq!(err.minor, Minor::InvalidFree);
    }

    #[test]
    fn empty_payload_is_null() {
        let mut heap = PayloadHeap::default();
        let slot = heap.alloc(b"");
        assert!(slot.is_null());
        assert_eq!(heap.live(), 0);
        assert!(heap.get(slot).unwrap().is_empty());
        heap.free(slot).unwrap();
    }
}
