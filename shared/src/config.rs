use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::capabilities::{CacheName, Method, Request, RequestKey};
use crate::{DEFAULT_CACHE_VERSION, DEFAULT_MAX_BULK_ITEMS, DEFAULT_SHELL_DOCUMENT};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

fn default_version() -> String {
    DEFAULT_CACHE_VERSION.to_string()
}

fn default_shell_urls() -> Vec<String> {
    vec!["/".to_string(), DEFAULT_SHELL_DOCUMENT.to_string()]
}

fn default_shell_document() -> String {
    DEFAULT_SHELL_DOCUMENT.to_string()
}

const fn default_true() -> bool {
    true
}

/// Offline shell settings. Bumping `version` is the only way to force the
/// shell assets to be fetched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_version")]
    pub version: String,

    pub origin: Url,

    #[serde(default = "default_shell_urls")]
    pub shell_urls: Vec<String>,

    /// Served when a read fails with nothing cached.
    #[serde(default = "default_shell_document")]
    pub shell_document: String,

    #[serde(default = "default_true")]
    pub skip_waiting: bool,

    #[serde(default = "default_true")]
    pub claim_clients: bool,
}

impl ShellConfig {
    pub fn for_origin(origin: &str) -> Result<Self, ConfigError> {
        let origin = Url::parse(origin).map_err(|e| ConfigError::InvalidUrl {
            url: origin.to_string(),
            reason: e.to_string(),
        })?;
        let config = Self {
            version: default_version(),
            origin,
            shell_urls: default_shell_urls(),
            shell_document: default_shell_document(),
            skip_waiting: true,
            claim_clients: true,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache_name()?;

        match self.origin.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "origin scheme must be http or https, got '{other}'"
                )))
            }
        }

        if self.shell_urls.is_empty() {
            return Err(ConfigError::Validation(
                "shell_urls must list at least one resource".into(),
            ));
        }

        let mut shell = Vec::with_capacity(self.shell_urls.len());
        for path in &self.shell_urls {
            let url = self.resolve(path)?;
            if url.origin() != self.origin.origin() {
                return Err(ConfigError::Validation(format!(
                    "shell resource '{path}' is not same-origin"
                )));
            }
            shell.push(url);
        }

        let document = self.resolve(&self.shell_document)?;
        if !shell.contains(&document) {
            return Err(ConfigError::Validation(format!(
                "shell_document '{}' must be one of shell_urls",
                self.shell_document
            )));
        }

        Ok(())
    }

    pub fn cache_name(&self) -> Result<CacheName, ConfigError> {
        CacheName::new(self.version.clone()).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.origin.join(path).map_err(|e| ConfigError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// One GET request per shell resource, in configured order.
    pub fn shell_requests(&self) -> Result<Vec<Request>, ConfigError> {
        self.shell_urls
            .iter()
            .map(|path| Ok(Request::from_url(Method::Get, self.resolve(path)?)))
            .collect()
    }

    pub fn shell_document_key(&self) -> Result<RequestKey, ConfigError> {
        Ok(RequestKey::new(Method::Get, &self.resolve(&self.shell_document)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Success toasts are optional; failures are always reported.
    pub notify_success: bool,
    pub max_bulk_items: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            notify_success: true,
            max_bulk_items: DEFAULT_MAX_BULK_ITEMS,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bulk_items == 0 {
            return Err(ConfigError::Validation(
                "max_bulk_items must be > 0".into(),
            ));
        }
        Ok(())
    }
}
