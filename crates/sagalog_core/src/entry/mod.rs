//! Saga log entries.
//!
//! An entry records one lifecycle event of a saga execution. Entries are
//! immutable once built; the log assigns ids to builders that lack one.
//!
//! ## Invariants
//!
//! - `execution_id` and `node_id` are non-empty and contain no whitespace
//! - `saga_name` is present iff the entry type is [`EntryType::StartSaga`]
//! - `node_id` is [`SAGA_NODE_ID`] for saga-scoped entries
//! - `json_data`, when present, starts with `{` and appears only on
//!   [`EntryType::StartSaga`] and [`EntryType::EndAction`]

mod codec;
mod id;

pub use codec::{decode, encode, CodecError};
pub use id::EntryId;

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::str::FromStr;

/// Node id marking an entry as saga-scoped rather than action-scoped.
pub const SAGA_NODE_ID: &str = "S";

/// Kind of saga lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryType {
    /// A saga execution started.
    StartSaga,
    /// A saga execution completed.
    EndSaga,
    /// An action started.
    StartAction,
    /// An action completed.
    EndAction,
    /// The saga or one of its actions aborted.
    Abort,
    /// Compensation of an action completed.
    CompensationDone,
}

impl EntryType {
    /// Every entry type, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::StartSaga,
        Self::EndSaga,
        Self::StartAction,
        Self::EndAction,
        Self::Abort,
        Self::CompensationDone,
    ];

    /// Returns the on-disk name of this entry type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartSaga => "StartSaga",
            Self::EndSaga => "EndSaga",
            Self::StartAction => "StartAction",
            Self::EndAction => "EndAction",
            Self::Abort => "Abort",
            Self::CompensationDone => "CompensationDone",
        }
    }

    /// Returns true if entries of this type may carry a JSON payload.
    #[must_use]
    pub const fn carries_json(self) -> bool {
        matches!(self, Self::StartSaga | Self::EndAction)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CodecError::UnknownEntryType(s.to_string()))
    }
}

/// An immutable saga log entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SagaLogEntry {
    id: EntryId,
    execution_id: String,
    entry_type: EntryType,
    node_id: String,
    saga_name: Option<String>,
    json_data: Option<String>,
}

impl SagaLogEntry {
    /// Returns a builder with no fields set.
    #[must_use]
    pub fn builder() -> SagaLogEntryBuilder {
        SagaLogEntryBuilder::default()
    }

    /// Returns the entry id.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Returns the saga execution this entry belongs to.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Returns the entry type.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// Returns the action name, or [`SAGA_NODE_ID`] for saga-scoped entries.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Returns the saga name, present only on [`EntryType::StartSaga`].
    #[must_use]
    pub fn saga_name(&self) -> Option<&str> {
        self.saga_name.as_deref()
    }

    /// Returns the opaque JSON payload, if any.
    #[must_use]
    pub fn json_data(&self) -> Option<&str> {
        self.json_data.as_deref()
    }

    /// Returns true if the entry concerns the saga as a whole.
    #[must_use]
    pub fn is_saga_scoped(&self) -> bool {
        self.node_id == SAGA_NODE_ID
    }
}

impl fmt::Display for SagaLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.id, self.execution_id, self.entry_type, self.node_id
        )?;
        if let Some(saga_name) = &self.saga_name {
            write!(f, " {saga_name}")?;
        }
        if let Some(json_data) = &self.json_data {
            write!(f, " {json_data}")?;
        }
        Ok(())
    }
}

/// Builder for [`SagaLogEntry`].
///
/// The convenience constructors (`start_saga`, `end_action`, ...) set the
/// fields each lifecycle event requires. The id may be left unset when the
/// builder is handed to [`crate::SagaLog::write`], which assigns one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SagaLogEntryBuilder {
    id: Option<EntryId>,
    execution_id: Option<String>,
    entry_type: Option<EntryType>,
    node_id: Option<String>,
    saga_name: Option<String>,
    json_data: Option<String>,
}

impl SagaLogEntryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry marking the start of a saga execution.
    #[must_use]
    pub fn start_saga(
        self,
        execution_id: impl Into<String>,
        saga_name: impl Into<String>,
        saga_input_json: impl Into<String>,
    ) -> Self {
        self.entry_type(EntryType::StartSaga)
            .execution_id(execution_id)
            .node_id(SAGA_NODE_ID)
            .saga_name(saga_name)
            .json_data(saga_input_json)
    }

    /// Entry marking the end of a saga execution.
    #[must_use]
    pub fn end_saga(self, execution_id: impl Into<String>) -> Self {
        self.entry_type(EntryType::EndSaga)
            .execution_id(execution_id)
            .node_id(SAGA_NODE_ID)
    }

    /// Entry marking the start of an action.
    #[must_use]
    pub fn start_action(self, execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        self.entry_type(EntryType::StartAction)
            .execution_id(execution_id)
            .node_id(node_id)
    }

    /// Entry marking the end of an action, with its output.
    #[must_use]
    pub fn end_action(
        self,
        execution_id: impl Into<String>,
        node_id: impl Into<String>,
        action_output_json: impl Into<String>,
    ) -> Self {
        self.entry_type(EntryType::EndAction)
            .execution_id(execution_id)
            .node_id(node_id)
            .json_data(action_output_json)
    }

    /// Entry marking an abort of an action, or of the saga when `node_id`
    /// is [`SAGA_NODE_ID`].
    #[must_use]
    pub fn abort(self, execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        self.entry_type(EntryType::Abort)
            .execution_id(execution_id)
            .node_id(node_id)
    }

    /// Entry marking completed compensation of an action.
    #[must_use]
    pub fn comp_done(self, execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        self.entry_type(EntryType::CompensationDone)
            .execution_id(execution_id)
            .node_id(node_id)
    }

    /// Sets the entry id.
    #[must_use]
    pub fn id(mut self, id: EntryId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the execution id.
    #[must_use]
    pub fn execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    /// Sets the entry type.
    #[must_use]
    pub fn entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    /// Sets the node id.
    #[must_use]
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Sets the saga name.
    #[must_use]
    pub fn saga_name(mut self, saga_name: impl Into<String>) -> Self {
        self.saga_name = Some(saga_name.into());
        self
    }

    /// Sets the JSON payload.
    #[must_use]
    pub fn json_data(mut self, json_data: impl Into<String>) -> Self {
        self.json_data = Some(json_data.into());
        self
    }

    /// Returns the id set on this builder, if any.
    #[must_use]
    pub fn entry_id(&self) -> Option<EntryId> {
        self.id
    }

    /// Validates the fields and builds the entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEntry` naming the first violated invariant.
    pub fn build(self) -> CoreResult<SagaLogEntry> {
        self.try_build().map_err(CoreError::invalid_entry)
    }

    pub(crate) fn try_build(self) -> Result<SagaLogEntry, String> {
        let id = self.id.ok_or("id is not set")?;
        let execution_id = self.execution_id.ok_or("execution id is not set")?;
        let entry_type = self.entry_type.ok_or("entry type is not set")?;
        let node_id = self.node_id.ok_or("node id is not set")?;

        check_token("execution id", &execution_id)?;
        check_token("node id", &node_id)?;

        let saga_scoped = node_id == SAGA_NODE_ID;
        match entry_type {
            EntryType::StartSaga | EntryType::EndSaga if !saga_scoped => {
                return Err(format!(
                    "{entry_type} must use node id {SAGA_NODE_ID:?}, got {node_id:?}"
                ));
            }
            EntryType::StartAction | EntryType::EndAction | EntryType::CompensationDone
                if saga_scoped =>
            {
                return Err(format!(
                    "{entry_type} is action-scoped and cannot use node id {SAGA_NODE_ID:?}"
                ));
            }
            _ => {}
        }

        match (&self.saga_name, entry_type) {
            (None, EntryType::StartSaga) => return Err("StartSaga requires a saga name".into()),
            (Some(_), t) if t != EntryType::StartSaga => {
                return Err(format!("{t} cannot carry a saga name"));
            }
            (Some(name), _) if name.contains('{') => {
                return Err(format!("saga name {name:?} contains '{{'"));
            }
            _ => {}
        }

        if let Some(json) = &self.json_data {
            if !entry_type.carries_json() {
                return Err(format!("{entry_type} cannot carry JSON data"));
            }
            if !json.starts_with('{') {
                return Err(format!("JSON data must start with '{{', got {json:?}"));
            }
        }

        Ok(SagaLogEntry {
            id,
            execution_id,
            entry_type,
            node_id,
            saga_name: self.saga_name,
            json_data: self.json_data,
        })
    }
}

fn check_token(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} is empty"));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(format!("{field} {value:?} contains whitespace"));
    }
    Ok(())
}
