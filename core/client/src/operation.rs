//! Dispatched operation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use skybucket_common::{Error, ErrorKind, ResponseId, Result};
use skybucket_storage::{DownloadLocator, ObjectMetadata};

/// Auto-generated correlation token of a dispatched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Upload,
    Download,
    Delete,
    List,
    Metadata,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Upload => "upload",
            OperationKind::Download => "download",
            OperationKind::Delete => "delete",
            OperationKind::List => "list",
            OperationKind::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Payload of a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OperationOutput {
    /// Storage metadata of the uploaded object.
    Uploaded(ObjectMetadata),
    /// Where the object can be fetched from.
    Located(DownloadLocator),
    /// Success marker without payload.
    Deleted,
    /// Names under the reference.
    Listed(Vec<String>),
    /// Attributes of the object.
    Described(ObjectMetadata),
}

/// Failure of an operation, as published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for OperationError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Record of one dispatched operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub response_id: Option<ResponseId>,
    pub kind: OperationKind,
    /// Reference value at dispatch time.
    pub reference: String,
    pub status: OperationStatus,
    pub result: Option<OperationOutput>,
    pub error: Option<OperationError>,
    pub dispatched_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    pub(crate) fn new(
        kind: OperationKind,
        response_id: Option<ResponseId>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            id: OperationId::generate(),
            response_id,
            kind,
            reference: reference.into(),
            status: OperationStatus::Pending,
            result: None,
            error: None,
            dispatched_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Move to a terminal status. Returns `false` if already terminal.
    pub(crate) fn resolve(&mut self, outcome: Result<OperationOutput>) -> bool {
        if self.is_terminal() {
            return false;
        }
        match outcome {
            Ok(output) => {
                self.status = OperationStatus::Succeeded;
                self.result = Some(output);
            }
            Err(err) => {
                self.status = OperationStatus::Failed;
                self.error = Some(OperationError::from(&err));
            }
        }
        self.resolved_at = Some(Utc::now());
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status != OperationStatus::Pending
    }

    pub fn succeeded(&self) -> bool {
        self.status == OperationStatus::Succeeded
    }

    /// Error kind, if the operation failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Bounded history of operation records, keyed by id.
///
/// Pending records are never evicted; once over `limit`, the oldest terminal
/// records are dropped first.
pub(crate) struct OperationTable {
    records: HashMap<OperationId, PendingOperation>,
    order: VecDeque<OperationId>,
    limit: usize,
}

impl OperationTable {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            limit,
        }
    }

    pub(crate) fn insert(&mut self, op: PendingOperation) {
        self.order.push_back(op.id);
        self.records.insert(op.id, op);
        self.evict();
    }

    /// Resolve a record and return its terminal snapshot.
    pub(crate) fn resolve(
        &mut self,
        id: OperationId,
        outcome: Result<OperationOutput>,
    ) -> Option<PendingOperation> {
        let record = self.records.get_mut(&id)?;
        if !record.resolve(outcome) {
            return None;
        }
        let snapshot = record.clone();
        self.evict();
        Some(snapshot)
    }

    pub(crate) fn get(&self, id: OperationId) -> Option<PendingOperation> {
        self.records.get(&id).cloned()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.records.values().filter(|op| !op.is_terminal()).count()
    }

    fn evict(&mut self) {
        while self.records.len() > self.limit {
            let records = &self.records;
            let Some(pos) = self
                .order
                .iter()
                .position(|id| records.get(id).is_some_and(PendingOperation::is_terminal))
            else {
                break;
            };
            if let Some(id) = self.order.remove(pos) {
                self.records.remove(&id);
            }
        }
    }
}
