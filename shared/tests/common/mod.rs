#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use shared::capabilities::{
    ConfirmationGateway, HttpError, Method, Network, NotificationKind,
    RemoteCollection, RemoteError, Request, Response, ResponseType,
};
use shared::{DateRange, LocalRemote, Record, RecordFields, RecordId};
use tokio::sync::Notify;

// ============================================================================
// Remote
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Insert(usize),
    Update(String),
    Delete(Vec<String>),
}

/// Wraps a [`LocalRemote`] with failure injection, a call log, and gates that
/// hold a call open so tests can look at the mirror mid-flight. A write can be
/// held before it reaches the store or after it has been stored but before the
/// caller sees the acknowledgement. A listing is held after it has been read.
pub struct FailableRemote<T: RecordFields> {
    pub inner: LocalRemote<T>,
    failure: Mutex<Option<RemoteError>>,
    hold_next: AtomicBool,
    hold_after_commit: AtomicBool,
    hold_listing: AtomicBool,
    entered: Notify,
    release: Notify,
    calls: Mutex<Vec<Call>>,
}

impl<T: RecordFields> FailableRemote<T> {
    pub fn new(inner: LocalRemote<T>) -> Self {
        Self {
            inner,
            failure: Mutex::new(None),
            hold_next: AtomicBool::new(false),
            hold_after_commit: AtomicBool::new(false),
            hold_listing: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every write fails with `err` until cleared. Listing still works.
    pub fn set_failure(&self, err: Option<RemoteError>) {
        *self.failure.lock().unwrap() = err;
    }

    pub fn fail_offline(&self) {
        self.set_failure(Some(RemoteError::Network("connection refused".into())));
    }

    pub fn hold_next_call(&self) {
        self.hold_next.store(true, Ordering::SeqCst);
    }

    /// Holds the next successful write after it has been stored.
    pub fn hold_after_commit(&self) {
        self.hold_after_commit.store(true, Ordering::SeqCst);
    }

    /// Holds the next listing after it has been read from the store.
    pub fn hold_next_listing(&self) {
        self.hold_listing.store(true, Ordering::SeqCst);
    }

    pub async fn wait_until_held(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn write_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| *c != Call::List)
            .collect()
    }

    async fn enter(&self, call: Call) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(call);
        // Lets joined futures interleave on a single-threaded runtime.
        tokio::task::yield_now().await;
        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.hold().await;
        }
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn leave<V>(&self, result: Result<V, RemoteError>) -> Result<V, RemoteError> {
        if result.is_ok() && self.hold_after_commit.swap(false, Ordering::SeqCst) {
            self.hold().await;
        }
        result
    }

    async fn hold(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[async_trait::async_trait]
impl<T: RecordFields> RemoteCollection<T> for FailableRemote<T> {
    async fn list(&self, range: Option<&DateRange>) -> Result<Vec<Record<T>>, RemoteError> {
        self.calls.lock().unwrap().push(Call::List);
        let result = self.inner.list(range).await;
        if self.hold_listing.swap(false, Ordering::SeqCst) {
            self.hold().await;
        }
        result
    }

    async fn insert(&self, items: Vec<T>) -> Result<Vec<Record<T>>, RemoteError> {
        self.enter(Call::Insert(items.len())).await?;
        let result = self.inner.insert(items).await;
        self.leave(result).await
    }

    async fn update(&self, id: &RecordId, patch: &T::Patch) -> Result<(), RemoteError> {
        self.enter(Call::Update(id.to_string())).await?;
        let result = self.inner.update(id, patch).await;
        self.leave(result).await
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<(), RemoteError> {
        self.enter(Call::Delete(ids.iter().map(ToString::to_string).collect()))
            .await?;
        let result = self.inner.delete(ids).await;
        self.leave(result).await
    }
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Default)]
pub struct ScriptedGateway {
    answers: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<(String, String)>>,
    notifications: Mutex<Vec<(NotificationKind, String)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues answers for upcoming prompts. Unscripted prompts are declined.
    pub fn answer(&self, answers: impl IntoIterator<Item = bool>) {
        self.answers.lock().unwrap().extend(answers);
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<(NotificationKind, String)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter(|(kind, _)| *kind == NotificationKind::Error)
            .map(|(_, message)| message)
            .collect()
    }
}

#[async_trait::async_trait]
impl ConfirmationGateway for ScriptedGateway {
    async fn confirm(&self, title: &str, body: &str) -> bool {
        self.prompts
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        self.answers.lock().unwrap().pop_front().unwrap_or(false)
    }

    fn notify(&self, kind: NotificationKind, message: &str) {
        self.notifications
            .lock()
            .unwrap()
            .push((kind, message.to_string()));
    }
}

// ============================================================================
// Network
// ============================================================================

/// Serves fixed responses by URL. Unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    log: Mutex<Vec<(Method, String)>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, body: &str) {
        self.route_response(url, Response::ok(body.to_string()));
    }

    pub fn route_response(&self, url: &str, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fetched(&self) -> Vec<(Method, String)> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, HttpError> {
        self.log
            .lock()
            .unwrap()
            .push((request.method, request.url.to_string()));
        if self.offline.load(Ordering::SeqCst) {
            return Err(HttpError::Network("net::ERR_INTERNET_DISCONNECTED".into()));
        }
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| Response::new(404, ResponseType::Basic, "not found")))
    }
}
