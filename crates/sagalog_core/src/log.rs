//! The durable saga log.

use crate::entry::{decode, encode, CodecError, EntryId, SagaLogEntry, SagaLogEntryBuilder};
use crate::error::{CoreError, CoreResult};
use crate::log_id::SagaLogId;
use parking_lot::Mutex;
use sagalog_storage::{QueueFile, StorageBackend, StorageResult};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// An append-only, crash-recoverable log of saga lifecycle entries.
///
/// Entries are stored one per record in a [`QueueFile`]. Every mutation and
/// every full scan runs under a single per-log lock, so concurrent writers
/// observe a total order and receive strictly increasing ids.
///
/// Truncation is positional: [`SagaLog::truncate`] drops every record up to
/// and including the first one carrying the given id. Callers must only
/// truncate once every entry before that point belongs to a finished saga.
pub struct SagaLog {
    id: SagaLogId,
    state: Mutex<Option<LogState>>,
}

struct LogState {
    queue: QueueFile,
    /// `None` once `u64::MAX` has been used.
    next_id: Option<EntryId>,
}

/// Moves the generator past `id`. Stays `None` once exhausted.
fn advance_past(next_id: Option<EntryId>, id: EntryId) -> Option<EntryId> {
    match next_id {
        Some(next) if id >= next => id.next(),
        other => other,
    }
}

impl SagaLog {
    /// Opens a log over the given storage backend, syncing every write.
    ///
    /// # Errors
    ///
    /// See [`SagaLog::open_with_options`].
    pub fn open(id: SagaLogId, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        Self::open_with_options(id, backend, true)
    }

    /// Opens a log, choosing whether writes are synced before returning.
    ///
    /// Existing records are scanned once so that generated ids continue past
    /// the largest stored id.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be opened or a stored record
    /// does not decode.
    pub fn open_with_options(
        id: SagaLogId,
        backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> CoreResult<Self> {
        let queue = QueueFile::open_with_options(backend, sync_on_write)?;

        let mut next_id = Some(EntryId::new(0));
        for record in &queue {
            next_id = advance_past(next_id, decode(&record?)?.id());
        }

        match next_id {
            Some(next_id) => debug!(log = %id, records = queue.len(), %next_id, "saga log opened"),
            None => warn!(log = %id, records = queue.len(), "saga log opened with id space exhausted"),
        }

        Ok(Self {
            id,
            state: Mutex::new(Some(LogState { queue, next_id })),
        })
    }

    /// Returns the identity of this log.
    #[must_use]
    pub fn id(&self) -> &SagaLogId {
        &self.id
    }

    /// Returns an empty entry builder.
    #[must_use]
    pub fn builder(&self) -> SagaLogEntryBuilder {
        SagaLogEntryBuilder::new()
    }

    /// Appends an entry and returns it.
    ///
    /// A builder without an id receives the next generated id. A
    /// caller-supplied id is kept as-is; if it is not below the generator,
    /// the generator moves past it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntry` if the builder does not form a valid entry,
    /// `IdSpaceExhausted` if an id must be generated after `u64::MAX` was
    /// used, `LogClosed` after [`SagaLog::close`], or a storage error.
    pub fn write(&self, builder: SagaLogEntryBuilder) -> CoreResult<SagaLogEntry> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CoreError::LogClosed)?;

        let entry = match (builder.entry_id(), state.next_id) {
            (Some(_), _) => builder.build()?,
            (None, Some(next_id)) => builder.id(next_id).build()?,
            (None, None) => {
                return Err(CoreError::IdSpaceExhausted {
                    log_id: self.id.clone(),
                })
            }
        };
        state.queue.append(&encode(&entry))?;
        state.next_id = advance_past(state.next_id, entry.id());

        Ok(entry)
    }

    /// Removes every entry up to and including the first entry with `id`.
    ///
    /// Does nothing if no stored entry has that id.
    ///
    /// # Errors
    ///
    /// Returns `LogClosed` after [`SagaLog::close`], or a storage or codec
    /// error.
    pub fn truncate(&self, id: EntryId) -> CoreResult<()> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CoreError::LogClosed)?;

        let mut position = None;
        for (index, record) in state.queue.iter().enumerate() {
            if decode(&record?)?.id() == id {
                position = Some(index + 1);
                break;
            }
        }

        match position {
            Some(count) => {
                state.queue.remove_from_head(count)?;
                debug!(log = %self.id, %id, removed = count, "saga log truncated");
            }
            None => debug!(log = %self.id, %id, "truncate target not found"),
        }
        Ok(())
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns `LogClosed` after [`SagaLog::close`], or a storage error.
    pub fn truncate_all(&self) -> CoreResult<()> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(CoreError::LogClosed)?;
        let removed = state.queue.len();
        state.queue.clear()?;
        debug!(log = %self.id, removed, "saga log cleared");
        Ok(())
    }

    /// Returns every stored entry in append order.
    ///
    /// These are the entries of sagas not yet truncated away, which is what
    /// a recovering orchestrator replays.
    ///
    /// # Errors
    ///
    /// Returns `LogClosed` after [`SagaLog::close`], or a storage or codec
    /// error.
    pub fn read_incomplete_sagas(&self) -> CoreResult<Vec<SagaLogEntry>> {
        let records = {
            let guard = self.state.lock();
            let state = guard.as_ref().ok_or(CoreError::LogClosed)?;
            state.queue.iter().collect::<StorageResult<Vec<_>>>()?
        };

        records
            .iter()
            .map(|record| decode(record).map_err(CoreError::from))
            .collect()
    }

    /// Returns the stored entries of one saga execution in append order.
    ///
    /// # Errors
    ///
    /// See [`SagaLog::read_incomplete_sagas`].
    pub fn read_entries(&self, execution_id: &str) -> CoreResult<Vec<SagaLogEntry>> {
        let mut entries = self.read_incomplete_sagas()?;
        entries.retain(|entry| entry.execution_id() == execution_id);
        Ok(entries)
    }

    /// Returns the stored entries of one saga execution grouped by node id.
    ///
    /// Each group keeps append order.
    ///
    /// # Errors
    ///
    /// See [`SagaLog::read_incomplete_sagas`].
    pub fn snapshot_by_node_id(
        &self,
        execution_id: &str,
    ) -> CoreResult<BTreeMap<String, Vec<SagaLogEntry>>> {
        let mut snapshot: BTreeMap<String, Vec<SagaLogEntry>> = BTreeMap::new();
        for entry in self.read_entries(execution_id)? {
            snapshot
                .entry(entry.node_id().to_string())
                .or_default()
                .push(entry);
        }
        Ok(snapshot)
    }

    /// Returns the decimal text form of an id.
    #[must_use]
    pub fn id_to_string(&self, id: EntryId) -> String {
        id.to_string()
    }

    /// Parses an id from its decimal text form.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the text is not a decimal `u64`.
    pub fn id_from_string(&self, text: &str) -> CoreResult<EntryId> {
        Ok(text.parse()?)
    }

    /// Returns the 8-byte big-endian form of an id.
    #[must_use]
    pub fn id_to_bytes(&self, id: EntryId) -> [u8; 8] {
        id.to_bytes()
    }

    /// Parses an id from its 8-byte big-endian form.
    ///
    /// # Errors
    ///
    /// Returns a codec error if `bytes` is not exactly 8 bytes long.
    pub fn id_from_bytes(&self, bytes: &[u8]) -> CoreResult<EntryId> {
        EntryId::from_slice(bytes).ok_or_else(|| {
            CodecError::InvalidEntryId(format!("expected 8 bytes, got {}", bytes.len())).into()
        })
    }

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns `LogClosed` after [`SagaLog::close`].
    pub fn len(&self) -> CoreResult<usize> {
        let guard = self.state.lock();
        guard
            .as_ref()
            .map(|state| state.queue.len())
            .ok_or(CoreError::LogClosed)
    }

    /// Returns true if no entries are stored.
    ///
    /// # Errors
    ///
    /// Returns `LogClosed` after [`SagaLog::close`].
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns true if the log has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().is_none()
    }

    /// Syncs and releases the underlying storage.
    ///
    /// Closing twice is a no-op. Every other operation fails with
    /// `LogClosed` afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails; the storage is released
    /// either way.
    pub fn close(&self) -> CoreResult<()> {
        let Some(state) = self.state.lock().take() else {
            return Ok(());
        };
        debug!(log = %self.id, "saga log closed");
        state.queue.close()?;
        Ok(())
    }
}

impl Drop for SagaLog {
    fn drop(&mut self) {
        if self.state.get_mut().is_some() {
            warn!(log = %self.id, "saga log dropped without being closed");
        }
    }
}

impl fmt::Debug for SagaLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaLog")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
