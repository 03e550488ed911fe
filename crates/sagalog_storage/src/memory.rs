//! Volatile backend over a shared byte buffer.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io;
use std::ops::Range;
use std::sync::Arc;

/// Byte store kept in a heap buffer.
///
/// Nothing is persisted. Handles made with [`InMemoryBackend::share`] all
/// point at one buffer, so a queue can be closed and reopened over the same
/// bytes, which is how tests simulate a restart without a file system.
///
/// # Example
///
/// ```rust
/// use sagalog_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let view = backend.share();
/// backend.append(b"record").unwrap();
/// assert_eq!(view.size().unwrap(), 6);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    buf: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer holding `bytes`, e.g. a hand-crafted damaged queue.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            buf: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Returns another handle onto the same buffer.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            buf: Arc::clone(&self.buf),
        }
    }

    /// Copies out the current contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.buf.read().clone()
    }
}

fn span(buf_len: usize, offset: u64, len: usize) -> StorageResult<Range<usize>> {
    let out_of_range = || StorageError::ReadPastEnd {
        offset,
        len,
        size: buf_len as u64,
    };
    let start = usize::try_from(offset).map_err(|_| out_of_range())?;
    match start.checked_add(len) {
        Some(end) if end <= buf_len => Ok(start..end),
        _ => Err(out_of_range()),
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let buf = self.buf.read();
        let range = span(buf.len(), offset, len)?;
        Ok(buf[range].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut buf = self.buf.write();
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut buf = self.buf.write();
        let range = span(buf.len(), offset, data.len())?;
        buf[range].copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.buf.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut buf = self.buf.write();
        match usize::try_from(new_size) {
            Ok(len) if len <= buf.len() => {
                buf.truncate(len);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot grow buffer from {} to {} by truncation", buf.len(), new_size),
            )
            .into()),
        }
    }
}
