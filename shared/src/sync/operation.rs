use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Record, RecordKey, UnixTimeMs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    BulkInsert,
    BulkDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Committed,
    RolledBack,
}

/// Bookkeeping for one in-flight mutation. Dropped once settled, never
/// persisted.
#[derive(Debug, Clone)]
pub struct OptimisticOperation<T> {
    pub op_id: String,
    pub kind: OperationKind,
    pub targets: Vec<RecordKey>,
    /// Pre-operation copy used to roll back an update.
    pub snapshot: Option<Record<T>>,
    pub status: OperationStatus,
    pub started_at: UnixTimeMs,
}

impl<T> OptimisticOperation<T> {
    #[must_use]
    pub fn new(kind: OperationKind, targets: Vec<RecordKey>, snapshot: Option<Record<T>>) -> Self {
        Self {
            op_id: Uuid::new_v4().to_string(),
            kind,
            targets,
            snapshot,
            status: OperationStatus::Pending,
            started_at: UnixTimeMs::now(),
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::Pending
    }

    #[must_use]
    pub fn touches(&self, key: &RecordKey) -> bool {
        self.targets.contains(key)
    }

    /// Marks the operation settled. Only a pending operation can settle.
    pub fn settle(&mut self, status: OperationStatus) -> bool {
        if !self.is_pending() || status == OperationStatus::Pending {
            return false;
        }
        self.status = status;
        true
    }
}
