//! # SagaLog Core
//!
//! Durable saga logs and the pool that owns them.
//!
//! This crate provides:
//! - The entry model and its text codec
//! - [`SagaLog`], an append-only log with positional truncation and
//!   incomplete-saga recovery
//! - [`SagaLogId`], the mapping between a log identity and its file
//! - [`SagaLogPool`], the process-wide registry and ownership arbiter
//!
//! ## Example
//!
//! ```rust
//! use sagalog_core::{SagaLogOwner, SagaLogPool};
//!
//! let pool = SagaLogPool::in_memory("01");
//! let id = pool.register_instance_local_id_for("orders").unwrap();
//! let log = pool.acquire(&SagaLogOwner::new("executor-1"), &id).unwrap();
//!
//! let start = log.write(log.builder().start_saga("ex-1", "Order", "{}")).unwrap();
//! log.write(log.builder().end_saga("ex-1")).unwrap();
//! assert_eq!(log.read_entries("ex-1").unwrap()[0], start);
//!
//! pool.shutdown().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entry;
mod error;
mod log;
mod log_id;
mod pool;

pub use config::{Config, CLUSTER_INSTANCE_ID_KEY, FOLDER_KEY};
pub use entry::{
    decode, encode, CodecError, EntryId, EntryType, SagaLogEntry, SagaLogEntryBuilder,
    SAGA_NODE_ID,
};
pub use error::{CoreError, CoreResult};
pub use log::SagaLog;
pub use log_id::{SagaLogId, LOG_FILE_SUFFIX, LOG_ID_SEPARATOR};
pub use pool::{
    FileLogBackend, InMemoryLogBackend, LogBackend, SagaLogOwner, SagaLogOwnership, SagaLogPool,
};
