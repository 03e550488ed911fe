//! Durable, append-only record queue with removal from the head.
//!
//! A [`QueueFile`] stores opaque byte records in append order on top of any
//! [`StorageBackend`]. It supports appending at the tail, removing a prefix of
//! records from the head, clearing, and forward iteration.
//!
//! ## Layout
//!
//! ```text
//! | magic (4) | version (2) | reserved (2) | head (8) | tail (8) | crc32 (4) | pad (4) |   header, 32 bytes
//! | length (4) | payload (N) | crc32 (4) |                                                record, repeated
//! ```
//!
//! All integers are little-endian. `head` is the offset of the first live
//! record; everything between the header and `head` is dead space left by
//! earlier head removals. `tail` is zero except while a compaction is being
//! finished, when it marks the end of the live records. The record CRC
//! covers the length and the payload.
//!
//! ## Compaction
//!
//! Once the dead prefix reaches [`COMPACTION_THRESHOLD`] bytes and outgrows
//! the live records, the live records are copied down to the start of the
//! dead space, which cannot overlap them. The header is then switched to the
//! copy with `tail` set, the file is cut at `tail`, and `tail` is cleared.
//! The header switch is the commit point: before it the old head still
//! points at intact records, after it open finishes the cut.
//!
//! ## Recovery Policy
//!
//! Tolerated (treated as a crash mid-operation):
//!
//! - **Torn tail**: a trailing record whose length prefix or payload is
//!   incomplete is truncated away on open.
//! - **Head past end**: a clear that truncated the file but crashed before
//!   rewriting the header; the queue reopens empty.
//! - **Unfinished compaction**: bytes past a recorded `tail` are cut.
//! - **Torn creation**: a file shorter than the header is reinitialised.
//!
//! Fatal (`StorageError::Corrupted`):
//!
//! - Invalid magic bytes, unsupported version, or header CRC mismatch
//! - A recorded `tail` beyond the end of the file
//! - A complete record whose CRC does not match
//!
//! ## Failed Writes
//!
//! A record whose append or sync fails is cut off again before the error is
//! returned, so it is never visible. When that cut, or a header write, fails
//! too, the queue is poisoned: every later operation returns
//! [`StorageError::Poisoned`] until the queue is reopened.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::fmt;
use tracing::{debug, warn};

/// Magic bytes identifying a queue file.
pub const QUEUE_MAGIC: [u8; 4] = *b"SGLQ";

/// Current queue format version.
pub const QUEUE_VERSION: u16 = 2;

/// Size of the queue header in bytes.
pub const HEADER_SIZE: u64 = 32;

/// Dead bytes at the front of the queue before compaction is considered.
pub const COMPACTION_THRESHOLD: u64 = 4096;

/// Length prefix plus trailing CRC.
const RECORD_OVERHEAD: u64 = 8;

/// A crash-safe queue of byte records.
pub struct QueueFile {
    backend: Box<dyn StorageBackend>,
    /// Offset of the first live record.
    head: u64,
    /// Number of live records.
    len: usize,
    /// Whether to sync after every append.
    sync_on_write: bool,
    poisoned: bool,
}

impl QueueFile {
    /// Opens a queue over the given backend, syncing after every append.
    ///
    /// An empty backend is initialised with a fresh header. An existing one
    /// is validated and scanned; a torn tail is truncated away.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if the header or a complete record fails
    /// validation, or an I/O error from the backend.
    pub fn open(backend: Box<dyn StorageBackend>) -> StorageResult<Self> {
        Self::open_with_options(backend, true)
    }

    /// Opens a queue, choosing whether appends are synced before returning.
    ///
    /// Head removal, clearing and compaction always sync.
    ///
    /// # Errors
    ///
    /// See [`QueueFile::open`].
    pub fn open_with_options(
        backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> StorageResult<Self> {
        let mut queue = Self {
            backend,
            head: HEADER_SIZE,
            len: 0,
            sync_on_write,
            poisoned: false,
        };

        let mut size = queue.backend.size()?;
        if size < HEADER_SIZE {
            if size > 0 {
                warn!(size, "queue header incomplete, reinitialising");
                queue.backend.truncate(0)?;
            }
            queue.backend.append(&encode_header(HEADER_SIZE, 0))?;
            queue.backend.sync()?;
            return Ok(queue);
        }

        let header = decode_header(&queue.backend.read_at(0, HEADER_SIZE as usize)?)?;
        if header.tail != 0 {
            if header.tail > size {
                return Err(StorageError::corrupted(format!(
                    "queue tail {} past end of file {}",
                    header.tail, size
                )));
            }
            warn!(tail = header.tail, size, "finishing interrupted compaction");
            queue.backend.truncate(header.tail)?;
            queue.write_header(header.head, 0)?;
            size = header.tail;
        }

        if header.head >= size {
            if header.head > size {
                warn!(head = header.head, size, "queue head past end, completing interrupted clear");
            }
            queue.reset()?;
            return Ok(queue);
        }
        queue.head = header.head;
        queue.recover(size)?;

        debug!(records = queue.len, head = queue.head, "queue opened");
        Ok(queue)
    }

    /// Scans live records, counting them and dropping a torn tail.
    fn recover(&mut self, size: u64) -> StorageResult<()> {
        let mut offset = self.head;
        let mut count = 0usize;

        while offset < size {
            match read_record(self.backend.as_ref(), offset, size)? {
                Some((_, next)) => {
                    offset = next;
                    count += 1;
                }
                None => {
                    warn!(
                        valid_end = offset,
                        size, "truncating torn record at end of queue"
                    );
                    self.backend.truncate(offset)?;
                    self.backend.sync()?;
                    break;
                }
            }
        }

        self.len = count;
        if count == 0 && self.head != HEADER_SIZE {
            self.reset()?;
        }
        Ok(())
    }

    fn ensure_usable(&self) -> StorageResult<()> {
        if self.poisoned {
            return Err(StorageError::Poisoned);
        }
        Ok(())
    }

    /// Poisons the queue if a step that rewrites the header failed, since
    /// storage may or may not reflect it.
    fn poison_on_error<T>(&mut self, result: StorageResult<T>) -> StorageResult<T> {
        if let Err(e) = &result {
            warn!(error = %e, "queue poisoned");
            self.poisoned = true;
        }
        result
    }

    /// Appends a record at the tail.
    ///
    /// On error the record is not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exceeds 4 GiB or the backend fails, and
    /// `Poisoned` if an earlier failure could not be undone.
    pub fn append(&mut self, data: &[u8]) -> StorageResult<()> {
        self.ensure_usable()?;
        let len = u32::try_from(data.len()).map_err(|_| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("record of {} bytes exceeds the maximum size", data.len()),
            ))
        })?;

        let len_bytes = len.to_le_bytes();
        let mut frame = Vec::with_capacity(data.len() + RECORD_OVERHEAD as usize);
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(data);
        frame.extend_from_slice(&record_crc(&len_bytes, data).to_le_bytes());

        let end = self.backend.size()?;
        if let Err(e) = self.write_frame(&frame) {
            if let Err(rollback) = self.backend.truncate(end) {
                warn!(error = %rollback, end, "failed to roll back append");
                self.poisoned = true;
            }
            return Err(e);
        }
        self.len += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> StorageResult<()> {
        self.backend.append(frame)?;
        if self.sync_on_write {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Removes the first `count` records.
    ///
    /// Removing every record reclaims all space; otherwise a large enough
    /// dead prefix is compacted away.
    ///
    /// # Errors
    ///
    /// Returns an error if `count` exceeds the number of records or the
    /// backend fails.
    pub fn remove_from_head(&mut self, count: usize) -> StorageResult<()> {
        self.ensure_usable()?;
        if count == 0 {
            return Ok(());
        }
        if count > self.len {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot remove {} records from a queue of {}",
                    count, self.len
                ),
            )));
        }
        if count == self.len {
            return self.clear();
        }

        let size = self.backend.size()?;
        let mut offset = self.head;
        for _ in 0..count {
            let len = read_len(self.backend.as_ref(), offset)?;
            offset += RECORD_OVERHEAD + u64::from(len);
            if offset > size {
                return Err(StorageError::corrupted(format!(
                    "record at {} extends past end of queue",
                    offset
                )));
            }
        }

        let written = self.write_header(offset, 0);
        self.poison_on_error(written)?;
        self.head = offset;
        self.len -= count;

        if let Err(e) = self.compact() {
            if self.poisoned {
                return Err(e);
            }
            warn!(error = %e, "queue compaction skipped");
        }
        Ok(())
    }

    /// Moves the live records to the front once the dead prefix is large
    /// enough and bigger than them.
    fn compact(&mut self) -> StorageResult<()> {
        let size = self.backend.size()?;
        let dead = self.head - HEADER_SIZE;
        let live = size - self.head;
        if dead < COMPACTION_THRESHOLD || dead <= live {
            return Ok(());
        }

        // The copy only overwrites dead space, since live < dead.
        let live_len = usize::try_from(live)
            .map_err(|_| StorageError::corrupted(format!("live region of {live} bytes")))?;
        let records = self.backend.read_at(self.head, live_len)?;
        self.backend.write_at(HEADER_SIZE, &records)?;
        self.backend.sync()?;

        let tail = HEADER_SIZE + live;
        let committed = self.write_header(HEADER_SIZE, tail);
        self.poison_on_error(committed)?;
        self.head = HEADER_SIZE;

        let finished = match self.backend.truncate(tail) {
            Ok(()) => self.write_header(HEADER_SIZE, 0),
            Err(e) => Err(e),
        };
        self.poison_on_error(finished)?;

        debug!(reclaimed = dead, live, "queue compacted");
        Ok(())
    }

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn clear(&mut self) -> StorageResult<()> {
        self.ensure_usable()?;
        let reset = self.reset();
        self.poison_on_error(reset)?;
        self.len = 0;
        Ok(())
    }

    /// Truncates back to the header first and resets the head second, so a
    /// crash between the two leaves a head past the end.
    fn reset(&mut self) -> StorageResult<()> {
        self.backend.truncate(HEADER_SIZE)?;
        self.write_header(HEADER_SIZE, 0)?;
        self.head = HEADER_SIZE;
        Ok(())
    }

    fn write_header(&mut self, head: u64, tail: u64) -> StorageResult<()> {
        self.backend.write_at(0, &encode_header(head, tail))?;
        self.backend.sync()?;
        Ok(())
    }

    /// Returns an iterator over the live records, head first.
    ///
    /// A poisoned queue yields a single `Poisoned` error.
    #[must_use]
    pub fn iter(&self) -> QueueIter<'_> {
        QueueIter {
            queue: self,
            offset: self.head,
            remaining: self.len,
            poisoned: self.poisoned,
        }
    }

    /// Returns the number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the queue holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if a failed write could not be undone.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns the size of the underlying storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn storage_size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Syncs and releases the underlying backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails; the backend is released
    /// either way.
    pub fn close(mut self) -> StorageResult<()> {
        self.backend.flush()?;
        self.backend.sync()
    }
}

impl fmt::Debug for QueueFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFile")
            .field("head", &self.head)
            .field("len", &self.len)
            .field("sync_on_write", &self.sync_on_write)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

/// Forward iterator over the records of a [`QueueFile`].
///
/// Each record's CRC is verified as it is read; a mismatch yields an error
/// and ends iteration.
pub struct QueueIter<'a> {
    queue: &'a QueueFile,
    offset: u64,
    remaining: usize,
    poisoned: bool,
}

impl Iterator for QueueIter<'_> {
    type Item = StorageResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.poisoned {
            self.poisoned = false;
            self.remaining = 0;
            return Some(Err(StorageError::Poisoned));
        }
        if self.remaining == 0 {
            return None;
        }

        let backend = self.queue.backend.as_ref();
        let result = backend.size().and_then(|size| {
            read_record(backend, self.offset, size)?.ok_or_else(|| {
                StorageError::corrupted(format!(
                    "record at {} extends past end of queue",
                    self.offset
                ))
            })
        });

        match result {
            Ok((payload, next)) => {
                self.offset = next;
                self.remaining -= 1;
                Some(Ok(payload))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.poisoned {
            (1, Some(1))
        } else {
            (0, Some(self.remaining))
        }
    }
}

impl<'a> IntoIterator for &'a QueueFile {
    type Item = StorageResult<Vec<u8>>;
    type IntoIter = QueueIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn record_crc(len_bytes: &[u8; 4], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(len_bytes);
    hasher.update(payload);
    hasher.finalize()
}

fn read_len(backend: &dyn StorageBackend, offset: u64) -> StorageResult<u32> {
    let bytes = backend.read_at(offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads the record at `offset`.
///
/// Returns `Ok(None)` when the record is incomplete (torn tail), otherwise
/// the payload and the offset of the following record.
fn read_record(
    backend: &dyn StorageBackend,
    offset: u64,
    size: u64,
) -> StorageResult<Option<(Vec<u8>, u64)>> {
    if size.saturating_sub(offset) < 4 {
        return Ok(None);
    }
    let len = read_len(backend, offset)?;
    let end = offset + RECORD_OVERHEAD + u64::from(len);
    if end > size {
        return Ok(None);
    }

    let payload = backend.read_at(offset + 4, len as usize)?;
    let stored = backend.read_at(offset + 4 + u64::from(len), 4)?;
    let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
    let computed = record_crc(&len.to_le_bytes(), &payload);
    if stored != computed {
        return Err(StorageError::corrupted(format!(
            "record checksum mismatch at offset {}: expected {:08x}, got {:08x}",
            offset, stored, computed
        )));
    }

    Ok(Some((payload, end)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    head: u64,
    tail: u64,
}

fn encode_header(head: u64, tail: u64) -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..4].copy_from_slice(&QUEUE_MAGIC);
    header[4..6].copy_from_slice(&QUEUE_VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&head.to_le_bytes());
    header[16..24].copy_from_slice(&tail.to_le_bytes());
    let crc = crc32fast::hash(&header[0..24]);
    header[24..28].copy_from_slice(&crc.to_le_bytes());
    header
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn decode_header(header: &[u8]) -> StorageResult<Header> {
    if header.len() < HEADER_SIZE as usize || header[0..4] != QUEUE_MAGIC {
        return Err(StorageError::corrupted("invalid queue magic"));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != QUEUE_VERSION {
        return Err(StorageError::corrupted(format!(
            "unsupported queue version {}",
            version
        )));
    }

    let stored = u32::from_le_bytes([header[24], header[25], header[26], header[27]]);
    let computed = crc32fast::hash(&header[0..24]);
    if stored != computed {
        return Err(StorageError::corrupted(format!(
            "queue header checksum mismatch: expected {:08x}, got {:08x}",
            stored, computed
        )));
    }

    let head = le_u64(&header[8..16]);
    let tail = le_u64(&header[16..24]);
    if head < HEADER_SIZE {
        return Err(StorageError::corrupted(format!(
            "queue head {} points inside the header",
            head
        )));
    }
    if tail != 0 && tail < head {
        return Err(StorageError::corrupted(format!(
            "queue tail {} before head {}",
            tail, head
        )));
    }
    Ok(Header { head, tail })
}
