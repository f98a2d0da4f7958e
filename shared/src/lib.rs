// lib.rs - offline shell cache and optimistic sync core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod cache;
pub mod capabilities;
pub mod config;
pub mod filter;
pub mod model;
pub mod prefs;
pub mod session;
pub mod summary;
pub mod sync;

use serde::{Deserialize, Serialize};
pub use cache::{
    CacheVersionManager, Interception, OfflineShell, RequestInterceptor, ResponseSource,
    WorkerState,
};
pub use capabilities::{
    CacheStorage, ClientRegistry, ConfirmationGateway, LocalRemote, Network, NotificationKind,
    RemoteCollection, RemoteError,
};
pub use config::{ConfigError, ShellConfig, SyncConfig};
pub use filter::{DateRange, Period};
pub use model::{
    EntryKind, LineItem, Record, RecordFields, RecordId, SyncStatus, Task, TaskPatch,
    Transaction, TransactionPatch, UnixTimeMs, UserId,
};
pub use prefs::{FilePreferences, MemoryPreferences, PreferenceStore, PrefsError};
pub use session::{AppContext, Session, Theme};
pub use summary::{Summary, TaskSummary};
pub use sync::{DeleteOutcome, Mirror, MutationCoordinator, SyncError};

pub const DEFAULT_CACHE_VERSION: &str = "cashlog-cache-v1";
pub const DEFAULT_SHELL_DOCUMENT: &str = "/index.html";
pub const DEFAULT_MAX_BULK_ITEMS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Storage,
    Serialization,
    InvalidState,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Conflict | Self::RateLimited | Self::Storage => {
                ErrorSeverity::Transient
            }

            Self::Serialization | Self::Internal | Self::InvalidState => ErrorSeverity::Fatal,

            Self::Authentication
            | Self::Authorization
            | Self::Validation
            | Self::NotFound
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    /// Whether re-triggering the same action later may succeed. The sync layer
    /// never retries on its own; this only shapes what the user is told.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Storage | Self::Conflict
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "You appear to be offline. Your change was not saved.".into()
            }
            ErrorKind::Timeout => "The server took too long to respond. Please try again.".into(),
            ErrorKind::Authentication => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Authorization => {
                "You don't have permission to change this item.".into()
            }
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::NotFound => "The item no longer exists.".into(),
            ErrorKind::Conflict => {
                "This item changed elsewhere. Please refresh and try again.".into()
            }
            ErrorKind::RateLimited => {
                "Too many requests. Please wait a moment and try again.".into()
            }
            ErrorKind::Storage => "Unable to save data on this device.".into(),
            ErrorKind::Serialization => {
                "The server sent data this version of the app cannot read.".into()
            }
            ErrorKind::InvalidState => "The app is in an invalid state. Please reload.".into(),
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}
