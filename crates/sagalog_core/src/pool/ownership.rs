//! Log ownership records.

use crate::log_id::SagaLogId;
use std::fmt;
use std::time::SystemTime;

/// Opaque token identifying whoever holds a log, usually an executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SagaLogOwner(String);

impl SagaLogOwner {
    /// Creates an owner token.
    #[must_use]
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self(owner_id.into())
    }

    /// Returns the owner id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SagaLogOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SagaLogOwner {
    fn from(owner_id: &str) -> Self {
        Self::new(owner_id)
    }
}

impl From<String> for SagaLogOwner {
    fn from(owner_id: String) -> Self {
        Self(owner_id)
    }
}

/// Record that an owner holds a log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SagaLogOwnership {
    owner: SagaLogOwner,
    log_id: SagaLogId,
    acquired_at: SystemTime,
}

impl SagaLogOwnership {
    pub(crate) fn new(owner: SagaLogOwner, log_id: SagaLogId) -> Self {
        Self {
            owner,
            log_id,
            acquired_at: SystemTime::now(),
        }
    }

    /// Returns the owner.
    #[must_use]
    pub fn owner(&self) -> &SagaLogOwner {
        &self.owner
    }

    /// Returns the owned log.
    #[must_use]
    pub fn log_id(&self) -> &SagaLogId {
        &self.log_id
    }

    /// Returns when the log was acquired.
    #[must_use]
    pub fn acquired_at(&self) -> SystemTime {
        self.acquired_at
    }
}

impl fmt::Display for SagaLogOwnership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} owned by {}", self.log_id, self.owner)
    }
}
