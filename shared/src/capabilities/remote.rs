use serde_json::Value;
use std::marker::PhantomData;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::filter::DateRange;
use crate::model::{ModelError, Record, RecordFields, RecordId, UnixTimeMs, UserId};
use crate::{AppError, ErrorKind};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// The request never reached the store or the reply never came back.
    #[error("remote unreachable: {0}")]
    Network(String),

    /// The store answered and refused the write.
    #[error("remote rejected request: {0}")]
    Rejected(AppError),

    #[error("remote returned a malformed row: {0}")]
    Malformed(#[from] ModelError),
}

impl RemoteError {
    #[must_use]
    pub fn rejected(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Rejected(AppError::new(kind, message))
    }

    #[must_use]
    pub fn to_app_error(&self) -> AppError {
        match self {
            RemoteError::Network(message) => {
                AppError::new(ErrorKind::Network, "remote unreachable")
                    .with_internal(message.clone())
            }
            RemoteError::Rejected(err) => err.clone(),
            RemoteError::Malformed(err) => {
                AppError::new(ErrorKind::Serialization, "malformed remote row")
                    .with_internal(err.to_string())
            }
        }
    }

    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

/// One collection of the authoritative remote store, scoped to the signed-in
/// owner. Every call is a single request; batches succeed or fail as a whole.
#[async_trait::async_trait]
pub trait RemoteCollection<T: RecordFields>: Send + Sync {
    /// Rows whose date falls inside `range`, newest first.
    async fn list(&self, range: Option<&DateRange>) -> Result<Vec<Record<T>>, RemoteError>;

    /// Inserts every item in one request and returns the created rows in
    /// input order, with server-assigned ids and timestamps.
    async fn insert(&self, items: Vec<T>) -> Result<Vec<Record<T>>, RemoteError>;

    async fn update(&self, id: &RecordId, patch: &T::Patch) -> Result<(), RemoteError>;

    async fn delete(&self, ids: &[RecordId]) -> Result<(), RemoteError>;
}

// ============================================================================
// Local-only backend
// ============================================================================

#[derive(Debug)]
struct LocalState {
    rows: Vec<Value>,
    next_id: u64,
    last_created_ms: u64,
}

/// Remote collection kept in process memory as raw JSON rows. Used for the
/// local-only mode and as the authoritative store in tests. Rows pass through
/// the same normalization as rows from a hosted backend, so legacy rows can be
/// seeded with [`LocalRemote::seed_rows`].
#[derive(Debug)]
pub struct LocalRemote<T> {
    owner: Option<UserId>,
    state: RwLock<LocalState>,
    _fields: PhantomData<fn() -> T>,
}

impl<T: RecordFields> LocalRemote<T> {
    #[must_use]
    pub fn new(owner: Option<UserId>) -> Self {
        Self {
            owner,
            state: RwLock::new(LocalState {
                rows: Vec::new(),
                next_id: 1,
                last_created_ms: 0,
            }),
            _fields: PhantomData,
        }
    }

    /// Ids handed out start at `next_id`.
    #[must_use]
    pub fn starting_at(mut self, next_id: u64) -> Self {
        self.state.get_mut().next_id = next_id;
        self
    }

    pub async fn seed_rows(&self, rows: impl IntoIterator<Item = Value>) {
        let mut state = self.state.write().await;
        for row in rows {
            if let Some(id) = row.get("id").and_then(Value::as_u64) {
                state.next_id = state.next_id.max(id.saturating_add(1));
            }
            state.rows.push(row);
        }
    }

    /// Every row as normalized records, ignoring the owner scope.
    pub async fn snapshot(&self) -> Vec<Record<T>> {
        let state = self.state.read().await;
        let mut records: Vec<Record<T>> = state
            .rows
            .iter()
            .filter_map(|row| Record::from_row(row.clone()).ok())
            .collect();
        sort_newest_first(&mut records);
        records
    }

    fn visible(&self, record: &Record<T>) -> bool {
        match (&self.owner, &record.owner) {
            (Some(owner), Some(row_owner)) => owner == row_owner,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Canonical row for `fields`. Legacy column names never survive a write.
    fn row_for(
        id: Value,
        created_ms: u64,
        owner: Option<&UserId>,
        fields: &T,
    ) -> Result<Value, RemoteError> {
        let mut row = match serde_json::to_value(fields) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(RemoteError::rejected(
                    ErrorKind::Validation,
                    format!("{} fields must serialize to an object, got {other}", T::NOUN),
                ))
            }
            Err(e) => return Err(RemoteError::rejected(ErrorKind::Serialization, e.to_string())),
        };
        row.insert("id".into(), id);
        row.insert("created_at".into(), Value::from(created_ms));
        if let Some(owner) = owner {
            row.insert("user_id".into(), Value::from(owner.as_str()));
        }
        Ok(Value::Object(row))
    }
}

fn sort_newest_first<T>(records: &mut [Record<T>]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}

#[async_trait::async_trait]
impl<T: RecordFields> RemoteCollection<T> for LocalRemote<T> {
    async fn list(&self, range: Option<&DateRange>) -> Result<Vec<Record<T>>, RemoteError> {
        let state = self.state.read().await;
        let mut records = Vec::with_capacity(state.rows.len());
        for row in &state.rows {
            match Record::<T>::from_row(row.clone()) {
                Ok(record) => {
                    if self.visible(&record) && range.map_or(true, |r| r.matches(&record)) {
                        records.push(record);
                    }
                }
                Err(e) => warn!(collection = T::COLLECTION, error = %e, "Skipping unreadable row"),
            }
        }
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn insert(&self, items: Vec<T>) -> Result<Vec<Record<T>>, RemoteError> {
        for item in &items {
            item.validate()
                .map_err(|e| RemoteError::rejected(ErrorKind::Validation, e.to_string()))?;
        }

        let mut state = self.state.write().await;
        let mut rows = Vec::with_capacity(items.len());
        let mut next_id = state.next_id;
        let mut last_created_ms = state.last_created_ms;
        for item in &items {
            let created_ms = UnixTimeMs::now().0.max(last_created_ms.saturating_add(1));
            rows.push(Self::row_for(
                Value::from(next_id),
                created_ms,
                self.owner.as_ref(),
                item,
            )?);
            next_id = next_id.saturating_add(1);
            last_created_ms = created_ms;
        }

        let created = rows
            .iter()
            .map(|row| Record::from_row(row.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        state.rows.extend(rows);
        state.next_id = next_id;
        state.last_created_ms = last_created_ms;
        debug!(collection = T::COLLECTION, count = created.len(), "Inserted rows");
        Ok(created)
    }

    async fn update(&self, id: &RecordId, patch: &T::Patch) -> Result<(), RemoteError> {
        let mut state = self.state.write().await;
        let row = state
            .rows
            .iter_mut()
            .find(|row| row_id(row).as_deref() == Some(id.as_str()))
            .ok_or_else(|| {
                RemoteError::rejected(ErrorKind::NotFound, format!("{} {id} not found", T::NOUN))
            })?;

        let mut record = Record::<T>::from_row(row.clone())?;
        if !self.visible(&record) {
            return Err(RemoteError::rejected(
                ErrorKind::Authorization,
                format!("{} {id} belongs to another user", T::NOUN),
            ));
        }

        record.fields.apply(patch);
        record
            .fields
            .validate()
            .map_err(|e| RemoteError::rejected(ErrorKind::Validation, e.to_string()))?;

        let id_value = row.get("id").cloned().unwrap_or_else(|| Value::from(id.as_str()));
        *row = Self::row_for(
            id_value,
            record.created_at.0,
            record.owner.as_ref(),
            &record.fields,
        )?;
        Ok(())
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<(), RemoteError> {
        let mut state = self.state.write().await;
        let before = state.rows.len();
        let owner = self.owner.clone();
        state.rows.retain(|row| {
            let Some(existing) = row_id(row) else {
                return true;
            };
            let owned = owner.as_ref().map_or(true, |o| {
                row.get("user_id").and_then(Value::as_str) == Some(o.as_str())
            });
            !(owned && ids.iter().any(|id| id.as_str() == existing))
        });
        debug!(
            collection = T::COLLECTION,
            removed = before - state.rows.len(),
            "Deleted rows"
        );
        Ok(())
    }
}
