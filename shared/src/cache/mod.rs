//! Offline shell: versioned cache lifecycle and read interception.

pub mod interceptor;
#[cfg(not(target_arch = "wasm32"))]
pub mod sqlite;
pub mod version;

use std::sync::Arc;
use tracing::{info, instrument};

pub use self::interceptor::{
    InterceptError, Interception, RequestInterceptor, ResponseSource, Revalidation,
};
#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteCacheStorage;
pub use self::version::{
    ActivationOutcome, CacheVersionManager, InstallOutcome, LifecycleError, WorkerState,
};

use crate::capabilities::{CacheStorage, ClientRegistry, Network, Request};
use crate::config::{ConfigError, ShellConfig};

/// The background half of the app for one version tag. Lifecycle events and
/// intercepted reads are handled one at a time by the host.
pub struct OfflineShell<S, N> {
    config: ShellConfig,
    manager: CacheVersionManager<S, N>,
    interceptor: RequestInterceptor<S, N>,
}

impl<S, N> OfflineShell<S, N>
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    pub fn new(
        config: ShellConfig,
        storage: Arc<S>,
        network: Arc<N>,
    ) -> Result<Self, ConfigError> {
        let manager =
            CacheVersionManager::new(&config, Arc::clone(&storage), Arc::clone(&network))?;
        let interceptor = RequestInterceptor::new(&config, storage, network)?;
        Ok(Self {
            config,
            manager,
            interceptor,
        })
    }

    /// Installs, then activates straight away when `skip_waiting` is set.
    /// Otherwise the shell stays `Installed` until [`Self::activate`].
    #[instrument(skip(self, clients), fields(version = %self.config.version))]
    pub async fn start<C>(&self, clients: &C) -> Result<WorkerState, LifecycleError>
    where
        C: ClientRegistry + ?Sized,
    {
        self.manager.install().await?;
        if self.config.skip_waiting {
            self.manager.activate(clients).await?;
        } else {
            info!("Installed, waiting for activation");
        }
        Ok(self.manager.state().await)
    }

    pub async fn activate<C>(&self, clients: &C) -> Result<ActivationOutcome, LifecycleError>
    where
        C: ClientRegistry + ?Sized,
    {
        self.manager.activate(clients).await
    }

    pub async fn respond(&self, request: Request) -> Result<Interception, InterceptError> {
        self.interceptor.respond(request).await
    }

    pub async fn state(&self) -> WorkerState {
        self.manager.state().await
    }

    #[must_use]
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    #[must_use]
    pub fn manager(&self) -> &CacheVersionManager<S, N> {
        &self.manager
    }
}
