use std::sync::atomic::{AtomicUsize, Ordering};

/// Already-open application sessions controlled by the offline shell.
#[async_trait::async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Takes control of every open session so newly activated logic applies
    /// without a reload. Returns how many sessions were claimed.
    async fn claim(&self) -> usize;
}

/// Fixed number of open sessions, counting how often they were claimed.
#[derive(Debug, Default)]
pub struct StaticClients {
    open: usize,
    claims: AtomicUsize,
}

impl StaticClients {
    #[must_use]
    pub fn new(open: usize) -> Self {
        Self {
            open,
            claims: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn claim_count(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClientRegistry for StaticClients {
    async fn claim(&self) -> usize {
        self.claims.fetch_add(1, Ordering::SeqCst);
        self.open
    }
}
