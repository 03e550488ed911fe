//! The log pool.
//!
//! A [`SagaLogPool`] is the process-wide registry of open saga logs. It
//! keeps at most one [`SagaLog`] per identity, records which owner holds
//! which log, and lists every log in the cluster through its
//! [`LogBackend`].
//!
//! ## Lifecycle of an identity
//!
//! ```text
//! Unregistered --connect--> Connected --acquire--> Owned
//!                               ^                    |
//!                               +------release-------+
//! Connected | Owned --remove--> Unregistered
//! any state --shutdown--> Unregistered
//! ```
//!
//! Acquiring an unregistered identity connects it first. Ownership is
//! bookkeeping inside this process only; exclusion across processes comes
//! from the lock each file-backed log holds on its file.

mod backend;
mod ownership;

pub use backend::{FileLogBackend, InMemoryLogBackend, LogBackend};
pub use ownership::{SagaLogOwner, SagaLogOwnership};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::log::SagaLog;
use crate::log_id::SagaLogId;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry and ownership arbiter for the logs of one cluster instance.
pub struct SagaLogPool {
    cluster_instance_id: String,
    backend: Box<dyn LogBackend>,
    /// Open logs, at most one per identity.
    logs: RwLock<HashMap<SagaLogId, Arc<SagaLog>>>,
    /// Per-identity slots serializing opens of the same log. A slot is held
    /// across `LogBackend::open`; the maps above are only locked briefly
    /// while it is held, never the other way round.
    opening: Mutex<HashMap<SagaLogId, Arc<Mutex<()>>>>,
    /// Current owner of each owned log.
    ownerships: Mutex<HashMap<SagaLogId, SagaLogOwnership>>,
}

impl SagaLogPool {
    /// Creates a pool for `cluster_instance_id` over a backend.
    pub fn new(cluster_instance_id: impl Into<String>, backend: impl LogBackend + 'static) -> Self {
        Self {
            cluster_instance_id: cluster_instance_id.into(),
            backend: Box::new(backend),
            logs: RwLock::new(HashMap::new()),
            opening: Mutex::new(HashMap::new()),
            ownerships: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a file-backed pool from configuration.
    ///
    /// The configuration is validated and the log folder created.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unusable configuration, or an I/O
    /// error if the folder cannot be created.
    pub fn initialize(config: &Config) -> CoreResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.folder)?;
        info!(
            folder = %config.folder.display(),
            cluster_instance_id = %config.cluster_instance_id,
            "saga log pool initialized"
        );
        let backend = FileLogBackend::new(&config.folder).sync_on_write(config.sync_on_write);
        Ok(Self::new(config.cluster_instance_id.clone(), backend))
    }

    /// Creates a pool over fresh in-memory storage.
    #[must_use]
    pub fn in_memory(cluster_instance_id: impl Into<String>) -> Self {
        Self::new(cluster_instance_id, InMemoryLogBackend::new())
    }

    /// Returns the cluster instance this pool runs as.
    #[must_use]
    pub fn local_cluster_instance_id(&self) -> &str {
        &self.cluster_instance_id
    }

    /// Composes the identity of a log. Does not touch storage.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLogId` if the parts are not a valid identity.
    pub fn id_for(&self, cluster_instance_id: &str, log_name: &str) -> CoreResult<SagaLogId> {
        self.backend.id_for(cluster_instance_id, log_name)
    }

    /// Composes the identity of a log owned by this cluster instance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLogId` if the name is not valid.
    pub fn register_instance_local_id_for(&self, log_name: &str) -> CoreResult<SagaLogId> {
        self.id_for(&self.cluster_instance_id, log_name)
    }

    /// Lists every log in storage, across all cluster instances.
    ///
    /// Other processes may create or delete logs concurrently, so the
    /// result is a best-effort snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be listed.
    pub fn cluster_wide_log_ids(&self) -> CoreResult<HashSet<SagaLogId>> {
        Ok(self.backend.list()?.into_iter().collect())
    }

    /// Returns the identities of the logs open in this process.
    #[must_use]
    pub fn instance_local_log_ids(&self) -> HashSet<SagaLogId> {
        self.logs.read().keys().cloned().collect()
    }

    /// Returns the ownership records held in this process.
    #[must_use]
    pub fn instance_local_ownerships(&self) -> HashSet<SagaLogOwnership> {
        self.ownerships.lock().values().cloned().collect()
    }

    /// Returns the open log for `id`, opening it if needed.
    ///
    /// Every call for the same identity returns the same instance until it
    /// is removed. Opening one log does not hold up lookups or opens of
    /// other logs.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened.
    pub fn connect(&self, id: &SagaLogId) -> CoreResult<Arc<SagaLog>> {
        if let Some(log) = self.logs.read().get(id) {
            return Ok(Arc::clone(log));
        }

        let slot = Arc::clone(self.opening.lock().entry(id.clone()).or_default());
        let _opening = slot.lock();
        if let Some(log) = self.logs.read().get(id) {
            return Ok(Arc::clone(log));
        }

        let opened = self.backend.open(id).map(Arc::new);
        if let Ok(log) = &opened {
            self.logs.write().insert(id.clone(), Arc::clone(log));
            debug!(log = %id, "saga log connected");
        }
        self.finish_opening(id, &slot, opened.is_ok());
        opened
    }

    /// Drops the opening slot of `id` once it is no longer needed.
    ///
    /// After a successful open every later caller finds the log registered.
    /// After a failed one the slot is kept while other callers wait on it,
    /// so they keep serializing on the same slot.
    fn finish_opening(&self, id: &SagaLogId, slot: &Arc<Mutex<()>>, opened: bool) {
        let mut opening = self.opening.lock();
        // The map and this caller hold one reference each; waiters add more.
        let unshared = Arc::strong_count(slot) == 2;
        if opening.get(id).is_some_and(|current| Arc::ptr_eq(current, slot)) && (opened || unshared) {
            opening.remove(id);
        }
    }

    /// Takes ownership of `id` for `owner` and returns the connected log.
    ///
    /// Acquiring a log the same owner already holds succeeds and returns the
    /// same instance.
    ///
    /// # Errors
    ///
    /// Returns `OwnershipConflict` without connecting if another owner
    /// holds the log. If connecting fails, the ownership taken by this call
    /// is given back and the error returned.
    pub fn acquire(&self, owner: &SagaLogOwner, id: &SagaLogId) -> CoreResult<Arc<SagaLog>> {
        let created = match self.ownerships.lock().entry(id.clone()) {
            Entry::Occupied(entry) => {
                let held_by = entry.get().owner();
                if held_by != owner {
                    warn!(log = %id, requested_by = %owner, %held_by, "saga log ownership conflict");
                    return Err(CoreError::OwnershipConflict {
                        log_id: id.clone(),
                        requested_by: owner.clone(),
                        held_by: held_by.clone(),
                    });
                }
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(SagaLogOwnership::new(owner.clone(), id.clone()));
                true
            }
        };

        match self.connect(id) {
            Ok(log) => {
                if created {
                    info!(log = %id, %owner, "saga log acquired");
                }
                Ok(log)
            }
            Err(e) => {
                if created {
                    let mut ownerships = self.ownerships.lock();
                    if ownerships.get(id).is_some_and(|o| o.owner() == owner) {
                        ownerships.remove(id);
                    }
                }
                Err(e)
            }
        }
    }

    /// Releases every log held by `owner`. The logs stay connected.
    ///
    /// Returns the number of logs released.
    pub fn release_owner(&self, owner: &SagaLogOwner) -> usize {
        let mut ownerships = self.ownerships.lock();
        let before = ownerships.len();
        ownerships.retain(|_, ownership| ownership.owner() != owner);
        let released = before - ownerships.len();
        if released > 0 {
            info!(%owner, released, "saga log owner released");
        }
        released
    }

    /// Releases ownership of `id`, whoever holds it. The log stays connected.
    ///
    /// Returns true if the log was owned.
    pub fn release(&self, id: &SagaLogId) -> bool {
        let released = self.ownerships.lock().remove(id);
        if let Some(ownership) = &released {
            info!(log = %id, owner = %ownership.owner(), "saga log released");
        }
        released.is_some()
    }

    /// Releases, closes, and unregisters the log for `id`.
    ///
    /// Returns false if the log was not connected.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the log fails; it is unregistered either
    /// way.
    pub fn remove(&self, id: &SagaLogId) -> CoreResult<bool> {
        self.release(id);
        let Some(log) = self.logs.write().remove(id) else {
            return Ok(false);
        };
        log.close()?;
        info!(log = %id, "saga log removed");
        Ok(true)
    }

    /// Removes the log for `id` and deletes its storage.
    ///
    /// Returns true if storage existed and was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the log or deleting its storage fails.
    pub fn delete(&self, id: &SagaLogId) -> CoreResult<bool> {
        self.remove(id)?;
        let deleted = self.backend.delete(id)?;
        if deleted {
            info!(log = %id, "saga log deleted");
        }
        Ok(deleted)
    }

    /// Closes every open log and clears the registry and ownership table.
    ///
    /// Calling it again, or with nothing open, is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first error from closing a log. Every log is closed and
    /// both tables are cleared regardless.
    pub fn shutdown(&self) -> CoreResult<()> {
        let logs: Vec<_> = self.logs.write().drain().collect();
        self.ownerships.lock().clear();

        let mut result = Ok(());
        for (id, log) in &logs {
            if let Err(e) = log.close() {
                warn!(log = %id, error = %e, "failed to close saga log");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if !logs.is_empty() {
            info!(closed = logs.len(), "saga log pool shut down");
        }
        result
    }
}

impl fmt::Debug for SagaLogPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaLogPool")
            .field("cluster_instance_id", &self.cluster_instance_id)
            .field("logs", &self.logs.read().len())
            .field("opening", &self.opening.lock().len())
            .field("ownerships", &self.ownerships.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::tempdir;

    /// Backend whose `open` of one log name parks until the test lets it go.
    struct GatedBackend {
        inner: InMemoryLogBackend,
        gated: &'static str,
        entered: Arc<Barrier>,
        release: Arc<Barrier>,
    }

    impl LogBackend for GatedBackend {
        fn id_for(&self, cluster_instance_id: &str, log_name: &str) -> CoreResult<SagaLogId> {
            self.inner.id_for(cluster_instance_id, log_name)
        }

        fn list(&self) -> CoreResult<Vec<SagaLogId>> {
            self.inner.list()
        }

        fn open(&self, id: &SagaLogId) -> CoreResult<SagaLog> {
            if id.log_name() == self.gated {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.open(id)
        }

        fn delete(&self, id: &SagaLogId) -> CoreResult<bool> {
            self.inner.delete(id)
        }
    }

    fn owner(name: &str) -> SagaLogOwner {
        SagaLogOwner::new(name)
    }

    #[test]
    fn id_for_is_structural() {
        let pool = SagaLogPool::in_memory("test01");
        assert_eq!(
            pool.id_for("A", "somelogid").unwrap(),
            pool.id_for("A", "somelogid").unwrap()
        );
        assert_ne!(
            pool.id_for("A", "somelogid").unwrap(),
            pool.id_for("A", "otherlogid").unwrap()
        );
        assert_ne!(
            pool.id_for("A", "somelogid").unwrap(),
            pool.id_for("B", "otherlogid").unwrap()
        );
        assert!(pool.instance_local_log_ids().is_empty());
    }

    #[test]
    fn register_instance_local_id_uses_own_cluster() {
        let pool = SagaLogPool::in_memory("test01");
        let id = pool.register_instance_local_id_for("l1").unwrap();
        assert_eq!(id.cluster_instance_id(), "test01");
        assert_eq!(pool.local_cluster_instance_id(), "test01");
    }

    #[test]
    fn connect_is_memoized() {
        let pool = SagaLogPool::in_memory("test01");
        let id = pool.register_instance_local_id_for("anyId").unwrap();
        let a = pool.connect(&id).unwrap();
        let b = pool.connect(&id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.instance_local_log_ids(), HashSet::from([id]));
    }

    #[test]
    fn concurrent_connect_yields_one_instance() {
        let pool = Arc::new(SagaLogPool::in_memory("test01"));
        let id = pool.register_instance_local_id_for("shared").unwrap();
        let logs: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let id = id.clone();
                thread::spawn(move || pool.connect(&id).unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        assert!(logs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn slow_open_does_not_block_other_logs() {
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let pool = Arc::new(SagaLogPool::new(
            "test01",
            GatedBackend {
                inner: InMemoryLogBackend::new(),
                gated: "slow",
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            },
        ));
        let slow = pool.register_instance_local_id_for("slow").unwrap();
        let fast = pool.register_instance_local_id_for("fast").unwrap();

        let opener = {
            let pool = Arc::clone(&pool);
            let slow = slow.clone();
            thread::spawn(move || pool.connect(&slow).unwrap())
        };
        entered.wait();

        // The slow open is parked inside the backend right now.
        let fast_log = pool.connect(&fast).unwrap();
        assert!(Arc::ptr_eq(&fast_log, &pool.connect(&fast).unwrap()));
        assert_eq!(pool.instance_local_log_ids(), HashSet::from([fast.clone()]));
        assert!(format!("{pool:?}").contains("opening: 1"));

        release.wait();
        let slow_log = opener.join().unwrap();
        assert!(Arc::ptr_eq(&slow_log, &pool.connect(&slow).unwrap()));
        assert_eq!(pool.instance_local_log_ids(), HashSet::from([fast, slow]));
        assert!(format!("{pool:?}").contains("opening: 0"));
    }

    #[test]
    fn failed_open_leaves_no_registration() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let pool = SagaLogPool::new("test01", FileLogBackend::new(&blocker));
        let id = pool.register_instance_local_id_for("x").unwrap();

        assert!(pool.connect(&id).is_err());
        assert!(pool.instance_local_log_ids().is_empty());
        assert!(format!("{pool:?}").contains("opening: 0"));
    }

    #[test]
    fn acquire_conflict_leaves_record_unchanged() {
        let pool = SagaLogPool::in_memory("test01");
        let id = pool.register_instance_local_id_for("x").unwrap();
        pool.acquire(&owner("A"), &id).unwrap();

        let err = pool.acquire(&owner("B"), &id).unwrap_err();
        assert!(err.is_ownership_conflict());
        match err {
            CoreError::OwnershipConflict {
                log_id,
                requested_by,
                held_by,
            } => {
                assert_eq!(log_id, id);
                assert_eq!(requested_by, owner("B"));
                assert_eq!(held_by, owner("A"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let ownerships = pool.instance_local_ownerships();
        assert_eq!(ownerships.len(), 1);
        assert!(ownerships.iter().all(|o| o.owner() == &owner("A")));
    }

    #[test]
    fn acquire_twice_by_same_owner() {
        let pool = SagaLogPool::in_memory("test01");
        let id = pool.register_instance_local_id_for("x").unwrap();
        let first = pool.acquire(&owner("A"), &id).unwrap();
        let second = pool.acquire(&owner("A"), &id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.instance_local_ownerships().len(), 1);
    }

    #[test]
    fn concurrent_acquire_has_one_winner() {
        let pool = Arc::new(SagaLogPool::in_memory("test01"));
        let id = pool.register_instance_local_id_for("contested").unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                let id = id.clone();
                thread::spawn(move || pool.acquire(&owner(&format!("owner-{i}")), &id).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(pool.instance_local_ownerships().len(), 1);
    }

    #[test]
    fn release_owner_removes_only_that_owner() {
        let pool = SagaLogPool::in_memory("test01");
        let x = pool.register_instance_local_id_for("x").unwrap();
        let y = pool.register_instance_local_id_for("y").unwrap();
        let z = pool.register_instance_local_id_for("z").unwrap();
        pool.acquire(&owner("A"), &x).unwrap();
        pool.acquire(&owner("A"), &y).unwrap();
        pool.acquire(&owner("B"), &z).unwrap();

        assert_eq!(pool.release_owner(&owner("A")), 2);
        let remaining: Vec<_> = pool.instance_local_ownerships().into_iter().collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].log_id(), &z);

        // Logs stay connected and x can now be taken by B.
        assert_eq!(pool.instance_local_log_ids().len(), 3);
        pool.acquire(&owner("B"), &x).unwrap();
    }

    #[test]
    fn release_by_id() {
        let pool = SagaLogPool::in_memory("test01");
        let id = pool.register_instance_local_id_for("x").unwrap();
        pool.acquire(&owner("A"), &id).unwrap();
        assert!(pool.release(&id));
        assert!(!pool.release(&id));
        pool.acquire(&owner("B"), &id).unwrap();
    }

    #[test]
    fn snapshots_are_independent() {
        let pool = SagaLogPool::in_memory("test01");
        let id = pool.register_instance_local_id_for("x").unwrap();
        pool.acquire(&owner("A"), &id).unwrap();

        let mut ids = pool.instance_local_log_ids();
        let mut ownerships = pool.instance_local_ownerships();
        ids.clear();
        ownerships.clear();

        assert_eq!(pool.instance_local_log_ids().len(), 1);
        assert_eq!(pool.instance_local_ownerships().len(), 1);
    }

    #[test]
    fn remove_closes_and_unregisters() {
        let pool = SagaLogPool::in_memory("test01");
        let id = pool.register_instance_local_id_for("x").unwrap();
        let log = pool.acquire(&owner("A"), &id).unwrap();
        let entry = log.write(log.builder().end_saga("ex-1")).unwrap();

        assert!(pool.remove(&id).unwrap());
        assert!(log.is_closed());
        assert!(pool.instance_local_log_ids().is_empty());
        assert!(pool.instance_local_ownerships().is_empty());
        assert!(!pool.remove(&id).unwrap());

        // Storage survives removal; a new connect sees the entry.
        let reconnected = pool.connect(&id).unwrap();
        assert!(!Arc::ptr_eq(&log, &reconnected));
        assert_eq!(reconnected.read_incomplete_sagas().unwrap(), vec![entry]);
    }

    #[test]
    fn delete_drops_storage() {
        let pool = SagaLogPool::in_memory("test01");
        let id = pool.register_instance_local_id_for("x").unwrap();
        let log = pool.connect(&id).unwrap();
        log.write(log.builder().end_saga("ex-1")).unwrap();

        assert!(pool.delete(&id).unwrap());
        assert!(pool.cluster_wide_log_ids().unwrap().is_empty());
        assert!(!pool.delete(&id).unwrap());

        let fresh = pool.connect(&id).unwrap();
        assert!(fresh.is_empty().unwrap());
    }

    #[test]
    fn shutdown_closes_everything() {
        let pool = SagaLogPool::in_memory("test01");
        let x = pool.register_instance_local_id_for("x").unwrap();
        let y = pool.register_instance_local_id_for("y").unwrap();
        let log_x = pool.acquire(&owner("A"), &x).unwrap();
        let log_y = pool.connect(&y).unwrap();

        pool.shutdown().unwrap();
        assert!(log_x.is_closed());
        assert!(log_y.is_closed());
        assert!(pool.instance_local_log_ids().is_empty());
        assert!(pool.instance_local_ownerships().is_empty());

        pool.shutdown().unwrap();
    }

    #[test]
    fn cluster_wide_ids_match_connected_logs() {
        let dir = tempdir().unwrap();
        let pool = SagaLogPool::initialize(&Config::new(dir.path(), "test01")).unwrap();

        let l1 = pool.register_instance_local_id_for("l1").unwrap();
        pool.connect(&l1).unwrap();
        let l2 = pool.register_instance_local_id_for("l2").unwrap();
        pool.connect(&l2).unwrap();
        let x1 = pool.id_for("otherInstance", "x1").unwrap();
        pool.connect(&x1).unwrap();

        assert_eq!(pool.cluster_wide_log_ids().unwrap(), HashSet::from([l1, l2, x1]));
        pool.shutdown().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn listing_matches_connect_through_symlinked_folder() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let pool = SagaLogPool::new("test01", FileLogBackend::new(link.join("logs")));
        let id = pool.register_instance_local_id_for("l1").unwrap();
        pool.connect(&id).unwrap();

        assert!(real.join("logs").join(id.file_name()).is_file());
        assert_eq!(pool.cluster_wide_log_ids().unwrap(), HashSet::from([id.clone()]));
        assert_eq!(pool.instance_local_log_ids(), HashSet::from([id]));
        pool.shutdown().unwrap();
    }

    #[test]
    fn initialize_rejects_invalid_config() {
        let err = SagaLogPool::initialize(&Config::new("", "01")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
    }

    #[test]
    fn file_pool_connect_after_remove_reopens_file() {
        let dir = tempdir().unwrap();
        let pool = SagaLogPool::initialize(&Config::new(dir.path().join("logs"), "test01")).unwrap();
        let id = pool.register_instance_local_id_for("anyId").unwrap();

        let log = pool.connect(&id).unwrap();
        let entry = log.write(log.builder().end_saga("ex-1")).unwrap();
        pool.remove(&id).unwrap();

        let log = pool.connect(&id).unwrap();
        assert_eq!(log.read_incomplete_sagas().unwrap(), vec![entry]);
        pool.shutdown().unwrap();
    }
}
