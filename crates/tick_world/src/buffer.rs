//! Shared byte storage behind every object view.
//!
//! A room blob is read into one [`BufferView`]; every object of the room is a
//! handle into it. Detaching the buffer invalidates all of those handles at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Capability for privileged buffer access. Only this crate can mint one.
#[derive(Debug)]
pub struct InternalAccess {
    _private: (),
}

impl InternalAccess {
    pub(crate) const fn new() -> Self {
        Self { _private: () }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("{reason}")]
    Released { reason: Arc<str> },
    #[error("bytes {offset}..{end} out of bounds for buffer of {size} bytes")]
    OutOfBounds {
        offset: usize,
        end: usize,
        size: usize,
    },
    #[error("malformed {field} in record at offset {offset}")]
    Malformed { offset: usize, field: &'static str },
}

enum Storage {
    Live(Vec<u8>),
    Released(Arc<str>),
}

struct BufferCell {
    storage: RwLock<Storage>,
    dirty: AtomicBool,
}

/// Cheaply clonable handle to shared room storage.
#[derive(Clone)]
pub struct BufferView {
    cell: Arc<BufferCell>,
}

impl std::fmt::Debug for BufferView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.cell.storage.read() {
            Storage::Live(bytes) => format!("live({} bytes)", bytes.len()),
            Storage::Released(_) => "released".to_string(),
        };
        f.debug_struct("BufferView").field("state", &state).finish()
    }
}

impl BufferView {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self {
            cell: Arc::new(BufferCell {
                storage: RwLock::new(Storage::Live(bytes)),
                dirty: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(&*self.cell.storage.read(), Storage::Released(_))
    }

    pub fn same_buffer(&self, other: &BufferView) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn len(&self, _access: &InternalAccess) -> Result<usize, BufferError> {
        self.read(|bytes| bytes.len())
    }

    pub fn to_vec(&self, _access: &InternalAccess) -> Result<Vec<u8>, BufferError> {
        self.read(|bytes| bytes.to_vec())
    }

    /// Releases the storage. Returns `false` when it was already released, in
    /// which case the first reason is kept.
    pub fn detach(&self, _access: &InternalAccess, reason: &str) -> bool {
        let mut storage = self.cell.storage.write();
        if matches!(&*storage, Storage::Released(_)) {
            return false;
        }
        *storage = Storage::Released(Arc::from(reason));
        true
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.cell.dirty.load(Ordering::Relaxed)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, BufferError> {
        match &*self.cell.storage.read() {
            Storage::Live(bytes) => Ok(f(bytes)),
            Storage::Released(reason) => Err(BufferError::Released {
                reason: reason.clone(),
            }),
        }
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> Result<R, BufferError> {
        match &mut *self.cell.storage.write() {
            Storage::Live(bytes) => {
                self.cell.dirty.store(true, Ordering::Relaxed);
                Ok(f(bytes))
            }
            Storage::Released(reason) => Err(BufferError::Released {
                reason: reason.clone(),
            }),
        }
    }

    /// Appends a record and returns its offset.
    pub(crate) fn append(&self, record: &[u8]) -> Result<usize, BufferError> {
        self.write(|bytes| {
            let offset = bytes.len();
            bytes.extend_from_slice(record);
            offset
        })
    }

    fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N], BufferError> {
        self.read(|bytes| slice_array::<N>(bytes, offset))?
    }

    pub(crate) fn write_bytes(&self, offset: usize, value: &[u8]) -> Result<(), BufferError> {
        self.write(|bytes| {
            let size = bytes.len();
            match bytes.get_mut(offset..offset + value.len()) {
                Some(slot) => {
                    slot.copy_from_slice(value);
                    Ok(())
                }
                None => Err(BufferError::OutOfBounds {
                    offset,
                    end: offset + value.len(),
                    size,
                }),
            }
        })?
    }

    pub(crate) fn read_u8(&self, offset: usize) -> Result<u8, BufferError> {
        Ok(self.read_array::<1>(offset)?[0])
    }

    pub(crate) fn read_u16(&self, offset: usize) -> Result<u16, BufferError> {
        Ok(u16::from_le_bytes(self.read_array(offset)?))
    }

    pub(crate) fn read_u32(&self, offset: usize) -> Result<u32, BufferError> {
        Ok(u32::from_le_bytes(self.read_array(offset)?))
    }

    pub(crate) fn read_i32(&self, offset: usize) -> Result<i32, BufferError> {
        Ok(i32::from_le_bytes(self.read_array(offset)?))
    }

    pub(crate) fn read_u64(&self, offset: usize) -> Result<u64, BufferError> {
        Ok(u64::from_le_bytes(self.read_array(offset)?))
    }

    pub(crate) fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>, BufferError> {
        self.read(|bytes| match bytes.get(offset..offset + len) {
            Some(slice) => Ok(slice.to_vec()),
            None => Err(BufferError::OutOfBounds {
                offset,
                end: offset + len,
                size: bytes.len(),
            }),
        })?
    }

    pub(crate) fn write_u8(&self, offset: usize, value: u8) -> Result<(), BufferError> {
        self.write_bytes(offset, &[value])
    }

    pub(crate) fn write_u32(&self, offset: usize, value: u32) -> Result<(), BufferError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    pub(crate) fn write_i32(&self, offset: usize, value: i32) -> Result<(), BufferError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    pub(crate) fn write_u64(&self, offset: usize, value: u64) -> Result<(), BufferError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }
}

pub(crate) fn slice_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], BufferError> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or(BufferError::OutOfBounds {
            offset,
            end: offset + N,
            size: bytes.len(),
        })
}
