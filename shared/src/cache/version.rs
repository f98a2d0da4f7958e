use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::capabilities::{
    CacheError, CacheName, CacheStorage, ClientRegistry, HttpError, Network, Request, RequestKey,
    Response,
};
use crate::config::{ConfigError, ShellConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install or activation failed; the previous version stays in charge.
    Redundant,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to fetch shell resource {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("shell resource {url} is not cacheable (status {status})")]
    Unstorable { url: String, status: u16 },

    #[error("cannot {action} while {actual:?}")]
    InvalidState {
        action: &'static str,
        actual: WorkerState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The namespace already held every shell resource.
    AlreadyInstalled,
    Installed { entries: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationOutcome {
    /// Stale namespaces removed, in name order.
    pub deleted: Vec<String>,
    pub claimed: usize,
}

/// Owns the lifecycle of the versioned shell cache: one namespace per
/// version tag, populated on install and made the only one on activate.
pub struct CacheVersionManager<S, N> {
    storage: Arc<S>,
    network: Arc<N>,
    cache_name: CacheName,
    shell: Vec<Request>,
    claim_clients: bool,
    state: RwLock<WorkerState>,
}

impl<S: CacheStorage, N: Network> CacheVersionManager<S, N> {
    pub fn new(
        config: &ShellConfig,
        storage: Arc<S>,
        network: Arc<N>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            storage,
            network,
            cache_name: config.cache_name()?,
            shell: config.shell_requests()?,
            claim_clients: config.claim_clients,
            state: RwLock::new(WorkerState::Parsed),
        })
    }

    #[must_use]
    pub fn cache_name(&self) -> &CacheName {
        &self.cache_name
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Populates the namespace for the current version with the shell
    /// resources. All of them are stored or none are.
    #[instrument(skip(self), fields(version = %self.cache_name))]
    pub async fn install(&self) -> Result<InstallOutcome, LifecycleError> {
        let previous = {
            let mut state = self.state.write().await;
            let previous = *state;
            match previous {
                WorkerState::Parsed | WorkerState::Installed | WorkerState::Activated => {
                    *state = WorkerState::Installing;
                }
                actual => {
                    return Err(LifecycleError::InvalidState {
                        action: "install",
                        actual,
                    })
                }
            }
            previous
        };

        match self.is_populated().await {
            Ok(true) => {
                debug!("Shell already cached, nothing to install");
                self.settle_install(previous).await;
                return Ok(InstallOutcome::AlreadyInstalled);
            }
            Ok(false) => {}
            Err(e) => return Err(self.abort_install(previous, false, e.into()).await),
        }

        let created = match self.storage.open(&self.cache_name).await {
            Ok(created) => created,
            Err(e) => return Err(self.abort_install(previous, false, e.into()).await),
        };

        let entries = match self.fetch_shell().await {
            Ok(entries) => entries,
            Err(e) => return Err(self.abort_install(previous, created, e).await),
        };
        let count = entries.len();

        if let Err(e) = self.storage.put_all(&self.cache_name, entries).await {
            return Err(self.abort_install(previous, created, e.into()).await);
        }

        self.settle_install(previous).await;
        info!(entries = count, "Shell cached");
        Ok(InstallOutcome::Installed { entries: count })
    }

    /// Deletes every namespace other than the current one, then claims open
    /// clients if configured to.
    #[instrument(skip(self, clients), fields(version = %self.cache_name))]
    pub async fn activate<C>(&self, clients: &C) -> Result<ActivationOutcome, LifecycleError>
    where
        C: ClientRegistry + ?Sized,
    {
        {
            let mut state = self.state.write().await;
            match *state {
                WorkerState::Installed | WorkerState::Activated => {
                    *state = WorkerState::Activating;
                }
                actual => {
                    return Err(LifecycleError::InvalidState {
                        action: "activate",
                        actual,
                    })
                }
            }
        }

        let deleted = match self.collect_garbage().await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(error = %e, "Activation failed");
                *self.state.write().await = WorkerState::Redundant;
                return Err(e.into());
            }
        };

        let claimed = if self.claim_clients {
            clients.claim().await
        } else {
            0
        };

        *self.state.write().await = WorkerState::Activated;
        info!(deleted = deleted.len(), claimed, "Cache version activated");
        Ok(ActivationOutcome { deleted, claimed })
    }

    async fn is_populated(&self) -> Result<bool, CacheError> {
        if !self.storage.names().await?.contains(self.cache_name.as_str()) {
            return Ok(false);
        }
        let keys = self.storage.keys(&self.cache_name).await?;
        Ok(self.shell.iter().all(|request| keys.contains(&request.key())))
    }

    async fn fetch_shell(&self) -> Result<Vec<(RequestKey, Response)>, LifecycleError> {
        let mut entries = Vec::with_capacity(self.shell.len());
        for request in &self.shell {
            let response = self
                .network
                .fetch(request)
                .await
                .map_err(|source| LifecycleError::Fetch {
                    url: request.url.to_string(),
                    source,
                })?;
            if !response.is_storable() {
                return Err(LifecycleError::Unstorable {
                    url: request.url.to_string(),
                    status: response.status,
                });
            }
            entries.push((request.key(), response));
        }
        Ok(entries)
    }

    async fn collect_garbage(&self) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for name in self.storage.names().await? {
            if name == self.cache_name.as_str() {
                continue;
            }
            if self.storage.delete(&name).await? {
                debug!(cache = %name, "Deleted stale cache");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    async fn settle_install(&self, previous: WorkerState) {
        *self.state.write().await = match previous {
            WorkerState::Activated => WorkerState::Activated,
            _ => WorkerState::Installed,
        };
    }

    async fn abort_install(
        &self,
        previous: WorkerState,
        created: bool,
        err: LifecycleError,
    ) -> LifecycleError {
        if created {
            if let Err(e) = self.storage.delete(self.cache_name.as_str()).await {
                warn!(error = %e, "Failed to remove partially created cache");
            }
        }
        // An already-active worker keeps serving its namespace.
        *self.state.write().await = match previous {
            WorkerState::Activated => WorkerState::Activated,
            _ => WorkerState::Redundant,
        };
        error!(error = %err, "Install failed");
        err
    }
}
