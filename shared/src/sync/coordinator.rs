use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use tracing::{debug, info, instrument, warn};

use super::mirror::Mirror;
use super::operation::{OperationKind, OperationStatus, OptimisticOperation};
use crate::capabilities::{ConfirmationGateway, NotificationKind, RemoteCollection, RemoteError};
use crate::config::{ConfigError, SyncConfig};
use crate::filter::DateRange;
use crate::model::{
    split_lines, LineItem, ModelError, Record, RecordFields, RecordId, RecordKey, Task, TaskPatch,
    UnixTimeMs,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("record {0} not found")]
    NotFound(RecordKey),

    #[error("record {0} already has a change in flight")]
    Busy(RecordKey),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("remote returned {actual} records, expected {expected}")]
    UnexpectedResponse { expected: usize, actual: usize },

    #[error(transparent)]
    Validation(#[from] ModelError),

    #[error("batch of {count} items exceeds the limit of {max}")]
    BatchTooLarge { count: usize, max: usize },
}

impl SyncError {
    /// Message suitable for a notification toast.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Remote(e) => e.to_app_error().user_facing_message(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(usize),
    /// The user answered no; nothing changed and nothing was sent.
    Declined,
    /// The filtered view held no synced records.
    Nothing,
}

struct CoordinatorState<T> {
    mirror: Mirror<T>,
    pending: HashMap<String, OptimisticOperation<T>>,
}

impl<T: RecordFields> CoordinatorState<T> {
    fn ensure_idle(&self, key: &RecordKey) -> Result<(), SyncError> {
        if self.pending.values().any(|op| op.touches(key)) {
            return Err(SyncError::Busy(key.clone()));
        }
        Ok(())
    }

    fn begin(&mut self, op: OptimisticOperation<T>) -> String {
        let op_id = op.op_id.clone();
        debug!(op_id = %op_id, kind = ?op.kind, "Operation pending");
        self.pending.insert(op_id.clone(), op);
        op_id
    }

    fn finish(&mut self, op_id: &str, status: OperationStatus) -> Option<OptimisticOperation<T>> {
        let mut op = self.pending.remove(op_id)?;
        op.settle(status);
        debug!(op_id, kind = ?op.kind, status = ?op.status, "Operation settled");
        Some(op)
    }
}

fn plural<T: RecordFields>(count: usize) -> String {
    if count == 1 {
        T::NOUN.to_string()
    } else {
        format!("{}s", T::NOUN)
    }
}

fn exactly<T>(expected: usize, records: Vec<Record<T>>) -> Result<Vec<Record<T>>, SyncError> {
    if records.len() == expected {
        Ok(records)
    } else {
        Err(SyncError::UnexpectedResponse {
            expected,
            actual: records.len(),
        })
    }
}

/// Applies optimistic changes to one collection's mirror and reconciles them
/// with the remote. The state lock is never held across a remote call or a
/// confirmation prompt.
///
/// `reconcile` orders full re-fetches against acknowledgements: a refresh
/// holds it from listing to replacing the mirror, and every acknowledgement
/// takes it before touching the mirror, so an acknowledged change is always
/// applied on top of the newest listing.
pub struct MutationCoordinator<T, R: ?Sized, G: ?Sized> {
    remote: Arc<R>,
    gateway: Arc<G>,
    config: SyncConfig,
    reconcile: Mutex<()>,
    state: RwLock<CoordinatorState<T>>,
}

impl<T, R, G> MutationCoordinator<T, R, G>
where
    T: RecordFields,
    R: RemoteCollection<T> + ?Sized,
    G: ConfirmationGateway + ?Sized,
{
    pub fn new(remote: Arc<R>, gateway: Arc<G>, config: SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            remote,
            gateway,
            config,
            reconcile: Mutex::new(()),
            state: RwLock::new(CoordinatorState {
                mirror: Mirror::new(),
                pending: HashMap::new(),
            }),
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn records(&self) -> Vec<Record<T>> {
        self.state.read().await.mirror.records().to_vec()
    }

    /// Records in the currently filtered view, in mirror order.
    pub async fn view(&self, range: &DateRange) -> Vec<Record<T>> {
        self.state
            .read()
            .await
            .mirror
            .filtered(range)
            .cloned()
            .collect()
    }

    pub async fn snapshot(&self) -> Mirror<T> {
        self.state.read().await.mirror.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.read().await.pending.len()
    }

    /// Replaces the mirror with the remote listing.
    #[instrument(skip(self), fields(collection = T::COLLECTION))]
    pub async fn refresh(&self) -> Result<usize, SyncError> {
        let _reconcile = self.reconcile.lock().await;
        let records = self.remote.list(None).await?;
        let count = records.len();
        self.state.write().await.mirror.replace_all(records);
        info!(count, "Mirror refreshed");
        Ok(count)
    }

    // ========================================================================
    // Single-record mutations
    // ========================================================================

    /// Prepends a placeholder immediately, then swaps in the created record
    /// or removes the placeholder if the remote call fails.
    #[instrument(skip(self, body), fields(collection = T::COLLECTION))]
    pub async fn insert(&self, body: T) -> Result<Record<T>, SyncError> {
        body.validate()?;

        let placeholder = Record::placeholder(body.clone(), None, UnixTimeMs::now());
        let key = placeholder.key();
        let op_id = {
            let mut state = self.state.write().await;
            state.mirror.prepend(placeholder);
            state.begin(OptimisticOperation::new(
                OperationKind::Insert,
                vec![key.clone()],
                None,
            ))
        };

        let result = self
            .remote
            .insert(vec![body])
            .await
            .map_err(SyncError::from)
            .and_then(|records| exactly(1, records));

        let (reconcile, mut state) = self.acknowledge().await;
        match result.map(|mut records| records.remove(0)) {
            Ok(record) => {
                // A refresh may already have replaced the placeholder.
                if !state.mirror.replace(&key, record.clone())
                    && state.mirror.position(&record.key()).is_none()
                {
                    state.mirror.prepend(record.clone());
                }
                state.finish(&op_id, OperationStatus::Committed);
                drop(state);
                drop(reconcile);

                info!(id = ?record.id, "Insert committed");
                self.notify_success(&format!("Added {}", T::NOUN));
                Ok(record)
            }
            Err(e) => {
                state.mirror.remove(&key);
                state.finish(&op_id, OperationStatus::RolledBack);
                drop(state);
                drop(reconcile);

                warn!(error = %e, "Insert rolled back");
                self.notify_failure(&format!("Could not add {}", T::NOUN), &e);
                Err(e)
            }
        }
    }

    /// Applies `patch` in place immediately and restores the previous
    /// fields exactly if the remote call fails.
    #[instrument(skip(self, patch), fields(collection = T::COLLECTION, id = %id))]
    pub async fn update(&self, id: &RecordId, patch: T::Patch) -> Result<Record<T>, SyncError> {
        let key = RecordKey::Remote(id.clone());
        let (op_id, updated) = {
            let mut state = self.state.write().await;
            state.ensure_idle(&key)?;

            let record = state
                .mirror
                .get_mut(&key)
                .ok_or_else(|| SyncError::NotFound(key.clone()))?;
            let mut fields = record.fields.clone();
            fields.apply(&patch);
            fields.validate()?;

            let snapshot = record.clone();
            record.fields = fields;
            let updated = record.clone();

            let op_id = state.begin(OptimisticOperation::new(
                OperationKind::Update,
                vec![key.clone()],
                Some(snapshot),
            ));
            (op_id, updated)
        };

        let result = self.remote.update(id, &patch).await;

        let (reconcile, mut state) = self.acknowledge().await;
        match result {
            Ok(()) => {
                // A refresh may have brought back the pre-update fields.
                let updated = match state.mirror.get_mut(&key) {
                    Some(record) => {
                        record.fields.apply(&patch);
                        record.clone()
                    }
                    None => updated,
                };
                state.finish(&op_id, OperationStatus::Committed);
                drop(state);
                drop(reconcile);

                info!("Update committed");
                self.notify_success(&format!("Updated {}", T::NOUN));
                Ok(updated)
            }
            Err(e) => {
                if let Some(snapshot) = state
                    .finish(&op_id, OperationStatus::RolledBack)
                    .and_then(|op| op.snapshot)
                {
                    state.mirror.replace(&key, snapshot);
                }
                drop(state);
                drop(reconcile);

                let err = SyncError::from(e);
                warn!(error = %err, "Update rolled back");
                self.notify_failure(&format!("Could not update {}", T::NOUN), &err);
                Err(err)
            }
        }
    }

    /// Asks for confirmation, then removes the record optimistically. On
    /// failure the whole collection is re-fetched instead of re-inserting.
    #[instrument(skip(self), fields(collection = T::COLLECTION, id = %id))]
    pub async fn delete(&self, id: &RecordId) -> Result<DeleteOutcome, SyncError> {
        let key = RecordKey::Remote(id.clone());
        {
            let state = self.state.read().await;
            state.ensure_idle(&key)?;
            if state.mirror.get(&key).is_none() {
                return Err(SyncError::NotFound(key));
            }
        }

        let confirmed = self
            .gateway
            .confirm(
                &format!("Delete this {}?", T::NOUN),
                "This cannot be undone.",
            )
            .await;
        if !confirmed {
            debug!("Delete declined");
            return Ok(DeleteOutcome::Declined);
        }

        let op_id = {
            let mut state = self.state.write().await;
            state.ensure_idle(&key)?;
            if state.mirror.remove(&key).is_none() {
                return Err(SyncError::NotFound(key));
            }
            state.begin(OptimisticOperation::new(
                OperationKind::Delete,
                vec![key.clone()],
                None,
            ))
        };

        let result = self.remote.delete(std::slice::from_ref(id)).await;

        match result {
            Ok(()) => {
                let (reconcile, mut state) = self.acknowledge().await;
                // A refresh may have listed the row again before the delete landed.
                state.mirror.remove(&key);
                state.finish(&op_id, OperationStatus::Committed);
                drop(state);
                drop(reconcile);

                info!("Delete committed");
                self.notify_success(&format!("Deleted {}", T::NOUN));
                Ok(DeleteOutcome::Deleted(1))
            }
            Err(e) => {
                let (reconcile, mut state) = self.acknowledge().await;
                state.finish(&op_id, OperationStatus::RolledBack);
                drop(state);
                drop(reconcile);

                let err = SyncError::from(e);
                warn!(error = %err, "Delete failed, re-fetching collection");
                self.notify_failure(&format!("Could not delete {}", T::NOUN), &err);
                if let Err(refresh_err) = self.refresh().await {
                    warn!(error = %refresh_err, "Re-fetch after failed delete also failed");
                }
                Err(err)
            }
        }
    }

    // ========================================================================
    // Bulk mutations (applied on acknowledgement only)
    // ========================================================================

    /// Deletes every synced record in the filtered view with one remote
    /// call. Either all of them leave the mirror or none do.
    #[instrument(skip(self, range), fields(collection = T::COLLECTION))]
    pub async fn bulk_delete(&self, range: &DateRange) -> Result<DeleteOutcome, SyncError> {
        let ids = self.state.read().await.mirror.synced_ids_in(range);
        if ids.is_empty() {
            return Ok(DeleteOutcome::Nothing);
        }
        let count = ids.len();
        let noun = plural::<T>(count);

        let confirmed = self
            .gateway
            .confirm(
                &format!("Delete {count} {noun}?"),
                &format!("All {count} {noun} in the current view will be permanently deleted."),
            )
            .await;
        if !confirmed {
            debug!(count, "Bulk delete declined");
            return Ok(DeleteOutcome::Declined);
        }

        let keys: Vec<RecordKey> = ids.iter().cloned().map(RecordKey::Remote).collect();
        let op_id = {
            let mut state = self.state.write().await;
            for key in &keys {
                state.ensure_idle(key)?;
            }
            state.begin(OptimisticOperation::new(
                OperationKind::BulkDelete,
                keys,
                None,
            ))
        };

        let result = self.remote.delete(&ids).await;

        let (reconcile, mut state) = self.acknowledge().await;
        match result {
            Ok(()) => {
                let removed = state.mirror.remove_ids(&ids);
                state.finish(&op_id, OperationStatus::Committed);
                drop(state);
                drop(reconcile);

                info!(count, removed, "Bulk delete committed");
                self.notify_success(&format!("Deleted {count} {noun}"));
                Ok(DeleteOutcome::Deleted(count))
            }
            Err(e) => {
                state.finish(&op_id, OperationStatus::RolledBack);
                drop(state);
                drop(reconcile);

                let err = SyncError::from(e);
                warn!(count, error = %err, "Bulk delete failed, mirror unchanged");
                self.notify_failure(&format!("Could not delete {count} {noun}"), &err);
                Err(err)
            }
        }
    }

    /// Creates every item with one remote call and prepends the created
    /// records together, in input order.
    #[instrument(skip(self, items), fields(collection = T::COLLECTION, count = items.len()))]
    pub async fn bulk_insert(&self, items: Vec<T>) -> Result<Vec<Record<T>>, SyncError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let count = items.len();
        if count > self.config.max_bulk_items {
            return Err(SyncError::BatchTooLarge {
                count,
                max: self.config.max_bulk_items,
            });
        }
        for item in &items {
            item.validate()?;
        }

        let op_id = self.state.write().await.begin(OptimisticOperation::new(
            OperationKind::BulkInsert,
            Vec::new(),
            None,
        ));

        let result = self
            .remote
            .insert(items)
            .await
            .map_err(SyncError::from)
            .and_then(|records| exactly(count, records));

        let (reconcile, mut state) = self.acknowledge().await;
        match result {
            Ok(records) => {
                let fresh: Vec<Record<T>> = records
                    .iter()
                    .filter(|r| state.mirror.position(&r.key()).is_none())
                    .cloned()
                    .collect();
                state.mirror.prepend_all(fresh);
                state.finish(&op_id, OperationStatus::Committed);
                drop(state);
                drop(reconcile);

                info!(count, "Bulk insert committed");
                self.notify_success(&format!("Added {count} {}", plural::<T>(count)));
                Ok(records)
            }
            Err(e) => {
                state.finish(&op_id, OperationStatus::RolledBack);
                drop(state);
                drop(reconcile);

                warn!(count, error = %e, "Bulk insert failed, nothing added");
                self.notify_failure(
                    &format!("Could not add {count} {}", plural::<T>(count)),
                    &e,
                );
                Err(e)
            }
        }
    }

    /// Write access for settling an operation. Waits out a refresh that is
    /// between its listing and its mirror swap.
    async fn acknowledge(
        &self,
    ) -> (MutexGuard<'_, ()>, RwLockWriteGuard<'_, CoordinatorState<T>>) {
        let reconcile = self.reconcile.lock().await;
        (reconcile, self.state.write().await)
    }

    fn notify_success(&self, message: &str) {
        if self.config.notify_success {
            self.gateway.notify(NotificationKind::Success, message);
        }
    }

    fn notify_failure(&self, context: &str, err: &SyncError) {
        self.gateway.notify(
            NotificationKind::Error,
            &format!("{context}: {}", err.user_message()),
        );
    }
}

impl<T, R, G> MutationCoordinator<T, R, G>
where
    T: LineItem,
    R: RemoteCollection<T> + ?Sized,
    G: ConfirmationGateway + ?Sized,
{
    /// Bulk-inserts one item per non-empty line of pasted text.
    pub async fn bulk_insert_lines(&self, text: &str) -> Result<Vec<Record<T>>, SyncError> {
        let items: Vec<T> = split_lines(text).filter_map(T::from_line).collect();
        self.bulk_insert(items).await
    }
}

impl<R, G> MutationCoordinator<Task, R, G>
where
    R: RemoteCollection<Task> + ?Sized,
    G: ConfirmationGateway + ?Sized,
{
    pub async fn toggle(&self, id: &RecordId) -> Result<Record<Task>, SyncError> {
        let key = RecordKey::Remote(id.clone());
        let completed = self
            .state
            .read()
            .await
            .mirror
            .get(&key)
            .map(|r| r.fields.completed)
            .ok_or(SyncError::NotFound(key))?;

        self.update(
            id,
            TaskPatch {
                completed: Some(!completed),
                ..TaskPatch::default()
            },
        )
        .await
    }
}
