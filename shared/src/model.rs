use chrono::{DateTime, NaiveDate};
use serde::{de::DeserializeOwned, de::Error as _, Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(RecordId);
typed_id!(UserId);
typed_id!(LocalId);

impl LocalId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Unix timestamp in milliseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(
            u64::try_from(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis(),
            )
            .unwrap_or(u64::MAX),
        )
    }

    #[must_use]
    pub fn saturating_add(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Fabricated locally, not yet acknowledged by the remote.
    Placeholder,
    Synced,
}

/// Identity of a record inside a mirror. Placeholders are only addressable by
/// their local id until the remote assigns one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Local(LocalId),
    Remote(RecordId),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Local(id) => write!(f, "local:{id}"),
            RecordKey::Remote(id) => write!(f, "{id}"),
        }
    }
}

/// Domain fields of one collection. Implemented by [`Transaction`] and [`Task`].
pub trait RecordFields:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Patch: Clone + fmt::Debug + Serialize + Send + Sync + 'static;

    /// Remote collection (table) name.
    const COLLECTION: &'static str;
    /// Singular noun used in prompts and notifications.
    const NOUN: &'static str;

    fn apply(&mut self, patch: &Self::Patch);

    /// Date the record is filed under, if the collection has one.
    fn date(&self) -> Option<NaiveDate> {
        None
    }

    fn validate(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Fields that can be built from one line of pasted free text.
pub trait LineItem: RecordFields {
    fn from_line(line: &str) -> Option<Self>;
}

/// Non-empty, trimmed lines of a multi-line paste, in input order.
pub fn split_lines(input: &str) -> impl Iterator<Item = &str> {
    input.lines().map(str::trim).filter(|l| !l.is_empty())
}

// ============================================================================
// Records
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record<T> {
    pub id: Option<RecordId>,
    pub local_id: LocalId,
    pub owner: Option<UserId>,
    pub created_at: UnixTimeMs,
    pub status: SyncStatus,
    pub fields: T,
}

impl<T: RecordFields> Record<T> {
    #[must_use]
    pub fn placeholder(fields: T, owner: Option<UserId>, now: UnixTimeMs) -> Self {
        Self {
            id: None,
            local_id: LocalId::generate(),
            owner,
            created_at: now,
            status: SyncStatus::Placeholder,
            fields,
        }
    }

    #[must_use]
    pub fn synced(id: RecordId, owner: Option<UserId>, created_at: UnixTimeMs, fields: T) -> Self {
        Self {
            local_id: LocalId::new(format!("remote-{id}")),
            id: Some(id),
            owner,
            created_at,
            status: SyncStatus::Synced,
            fields,
        }
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.status == SyncStatus::Placeholder
    }

    #[must_use]
    pub fn key(&self) -> RecordKey {
        match &self.id {
            Some(id) => RecordKey::Remote(id.clone()),
            None => RecordKey::Local(self.local_id.clone()),
        }
    }

    /// Normalizes a raw remote row into the canonical in-memory schema.
    ///
    /// Accepts numeric or string ids, RFC 3339 or epoch-millisecond
    /// `created_at`, and the legacy field names each collection declares.
    pub fn from_row(row: serde_json::Value) -> Result<Self, ModelError> {
        let row: Row<T> =
            serde_json::from_value(row).map_err(|e| ModelError::InvalidRow(e.to_string()))?;

        let id = match row.id {
            RawId::Int(n) => RecordId::new(n.to_string()),
            RawId::Text(s) if !s.trim().is_empty() => RecordId::new(s.trim()),
            RawId::Text(_) => return Err(ModelError::InvalidRow("empty id".into())),
        };

        let created_at = match row.created_at {
            RawTimestamp::Millis(ms) => UnixTimeMs(ms),
            RawTimestamp::Text(text) => {
                let parsed = DateTime::parse_from_rfc3339(&text)
                    .map_err(|_| ModelError::InvalidTimestamp(text.clone()))?;
                UnixTimeMs(
                    u64::try_from(parsed.timestamp_millis())
                        .map_err(|_| ModelError::InvalidTimestamp(text))?,
                )
            }
        };

        Ok(Self::synced(
            id,
            row.user_id.map(UserId::new),
            created_at,
            row.fields,
        ))
    }
}

#[derive(Deserialize)]
struct Row<T> {
    id: RawId,
    #[serde(default, alias = "owner")]
    user_id: Option<String>,
    created_at: RawTimestamp,
    #[serde(flatten)]
    fields: T,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(u64),
    Text(String),
}

#[allow(clippy::cast_possible_truncation)]
fn deserialize_amount<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAmount {
        Int(i64),
        Float(f64),
        Text(String),
    }

    let from_float = |v: f64| {
        if v.is_finite() {
            Ok(v.round() as i64)
        } else {
            Err(D::Error::custom(format!("amount {v} is not finite")))
        }
    };

    match RawAmount::deserialize(deserializer)? {
        RawAmount::Int(v) => Ok(v),
        RawAmount::Float(v) => from_float(v),
        RawAmount::Text(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(v) => Ok(v),
                Err(_) => from_float(
                    s.parse::<f64>()
                        .map_err(|_| D::Error::custom(format!("invalid amount '{s}'")))?,
                ),
            }
        }
    }
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Income,
    #[default]
    Expense,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(alias = "tanggal")]
    pub date: NaiveDate,
    #[serde(default, alias = "jenis")]
    pub description: String,
    /// Magnitude in minor units; the sign comes from `kind`.
    #[serde(alias = "total", deserialize_with = "deserialize_amount")]
    pub amount: i64,
    #[serde(default)]
    pub kind: EntryKind,
}

impl Transaction {
    pub fn new(
        date: NaiveDate,
        description: impl Into<String>,
        amount: i64,
        kind: EntryKind,
    ) -> Result<Self, ModelError> {
        let tx = Self {
            date,
            description: description.into().trim().to_string(),
            amount,
            kind,
        };
        tx.validate()?;
        Ok(tx)
    }

    #[must_use]
    pub fn signed_amount(&self) -> i64 {
        match self.kind {
            EntryKind::Income => self.amount,
            EntryKind::Expense => -self.amount,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntryKind>,
}

impl RecordFields for Transaction {
    type Patch = TransactionPatch;

    const COLLECTION: &'static str = "transactions";
    const NOUN: &'static str = "transaction";

    fn apply(&mut self, patch: &TransactionPatch) {
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(description) = &patch.description {
            self.description.clone_from(description);
        }
        if let Some(amount) = patch.amount {
            self.amount = amount;
        }
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
    }

    fn date(&self) -> Option<NaiveDate> {
        Some(self.date)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.amount < 0 {
            return Err(ModelError::Validation(format!(
                "amount must not be negative, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(alias = "task")]
    pub text: String,
    #[serde(default, alias = "is_completed")]
    pub completed: bool,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Result<Self, ModelError> {
        let task = Self {
            text: text.into().trim().to_string(),
            completed: false,
        };
        task.validate()?;
        Ok(task)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl RecordFields for Task {
    type Patch = TaskPatch;

    const COLLECTION: &'static str = "todos";
    const NOUN: &'static str = "task";

    fn apply(&mut self, patch: &TaskPatch) {
        if let Some(text) = &patch.text {
            self.text.clone_from(text);
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.text.trim().is_empty() {
            return Err(ModelError::Validation("task text cannot be empty".into()));
        }
        Ok(())
    }
}

impl LineItem for Task {
    fn from_line(line: &str) -> Option<Self> {
        Task::new(line).ok()
    }
}
