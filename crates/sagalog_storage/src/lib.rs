//! # SagaLog Storage
//!
//! Storage backends and the durable record queue underneath SagaLog.
//!
//! This crate provides the lowest-level storage abstraction for SagaLog.
//! Storage backends are **opaque byte stores** and the queue stores
//! **opaque records** - neither interprets saga log entries.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, overwrite, flush)
//! - [`QueueFile`] layers a crash-safe record queue over any backend
//! - The queue compacts its dead prefix in place and refuses further use
//!   once a failed write could not be rolled back
//! - Must be `Send + Sync` for concurrent access
//! - The log layer owns all entry format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral storage
//! - [`FileBackend`] - For persistent, advisory-locked storage
//!
//! ## Example
//!
//! ```rust
//! use sagalog_storage::{InMemoryBackend, QueueFile};
//!
//! let mut queue = QueueFile::open(Box::new(InMemoryBackend::new())).unwrap();
//! queue.append(b"hello world").unwrap();
//! queue.remove_from_head(1).unwrap();
//! assert!(queue.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod queue;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use queue::{
    QueueFile, QueueIter, COMPACTION_THRESHOLD, HEADER_SIZE, QUEUE_MAGIC, QUEUE_VERSION,
};
