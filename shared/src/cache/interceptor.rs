use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::capabilities::{
    CacheError, CacheName, CacheStorage, HttpError, Network, Request, RequestKey, Response,
};
use crate::config::{ConfigError, ShellConfig};

#[derive(Debug, Error)]
pub enum InterceptError {
    /// A non-cacheable request failed; nothing is substituted for writes.
    #[error(transparent)]
    Network(#[from] HttpError),

    #[error("offline and no shell document cached for {url}")]
    Offline {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Matched an entry in the active namespace.
    Cache,
    Network,
    /// Network failed with no entry; the cached shell document was served.
    ShellFallback,
    /// Not a cacheable read; passed straight to the network.
    Bypass,
}

/// Background refresh of a cache hit. The host drives it to completion
/// after handing the cached response to the page, the way a service worker
/// extends its fetch event.
pub struct Revalidation(BoxFuture<'static, ()>);

impl Revalidation {
    pub async fn finish(self) {
        self.0.await;
    }
}

impl fmt::Debug for Revalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Revalidation(..)")
    }
}

#[derive(Debug)]
pub struct Interception {
    pub response: Response,
    pub source: ResponseSource,
    pub revalidation: Option<Revalidation>,
}

impl Interception {
    fn new(response: Response, source: ResponseSource) -> Self {
        Self {
            response,
            source,
            revalidation: None,
        }
    }
}

/// Cache-first handling of outbound reads against the active namespace.
pub struct RequestInterceptor<S, N> {
    storage: Arc<S>,
    network: Arc<N>,
    cache_name: CacheName,
    origin: Url,
    shell_document: RequestKey,
}

impl<S, N> RequestInterceptor<S, N>
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
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
            origin: config.origin.clone(),
            shell_document: config.shell_document_key()?,
        })
    }

    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn respond(&self, request: Request) -> Result<Interception, InterceptError> {
        if !request.method.is_cacheable_read() {
            let response = self.network.fetch(&request).await?;
            return Ok(Interception::new(response, ResponseSource::Bypass));
        }

        let key = request.key();
        match self.storage.lookup(&self.cache_name, &key).await {
            Ok(Some(cached)) => {
                debug!("Serving from cache");
                return Ok(Interception {
                    response: cached,
                    source: ResponseSource::Cache,
                    revalidation: Some(self.revalidate(request, key)),
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cache lookup failed, trying network"),
        }

        match self.network.fetch(&request).await {
            Ok(response) => {
                if storable(&self.origin, &request, &response) {
                    if let Err(e) = self
                        .storage
                        .put(&self.cache_name, key, response.clone())
                        .await
                    {
                        warn!(error = %e, "Failed to cache response");
                    }
                }
                Ok(Interception::new(response, ResponseSource::Network))
            }
            Err(e) => self.shell_fallback(&request, e).await,
        }
    }

    async fn shell_fallback(
        &self,
        request: &Request,
        cause: HttpError,
    ) -> Result<Interception, InterceptError> {
        match self.storage.lookup(&self.cache_name, &self.shell_document).await? {
            Some(shell) => {
                warn!(error = %cause, "Network failed, serving shell document");
                Ok(Interception::new(shell, ResponseSource::ShellFallback))
            }
            None => Err(InterceptError::Offline {
                url: request.url.to_string(),
                source: cause,
            }),
        }
    }

    fn revalidate(&self, request: Request, key: RequestKey) -> Revalidation {
        let storage = Arc::clone(&self.storage);
        let network = Arc::clone(&self.network);
        let cache_name = self.cache_name.clone();
        let origin = self.origin.clone();

        Revalidation(Box::pin(async move {
            match network.fetch(&request).await {
                Ok(response) if storable(&origin, &request, &response) => {
                    match storage.put(&cache_name, key, response).await {
                        Ok(()) => debug!(url = %request.url, "Refreshed cached entry"),
                        Err(e) => {
                            warn!(url = %request.url, error = %e, "Failed to refresh cached entry");
                        }
                    }
                }
                Ok(response) => {
                    debug!(
                        url = %request.url,
                        status = response.status,
                        "Skipping unstorable refresh"
                    );
                }
                Err(e) => {
                    debug!(url = %request.url, error = %e, "Refresh failed, keeping cached entry");
                }
            }
        }))
    }
}

fn storable(origin: &Url, request: &Request, response: &Response) -> bool {
    request.method.is_cacheable_read() && request.is_same_origin(origin) && response.is_storable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MemoryCacheStorage, Method, ResponseType};
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Server {
        offline: AtomicBool,
        calls: AtomicUsize,
        next: Mutex<Option<Response>>,
    }

    impl Server {
        fn respond_with(&self, response: Response) {
            *self.next.lock().unwrap() = Some(response);
        }
    }

    #[async_trait::async_trait]
    impl Network for Server {
        async fn fetch(&self, request: &Request) -> Result<Response, HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(HttpError::Network("offline".into()));
            }
            let scripted = self.next.lock().unwrap().clone();
            Ok(scripted.unwrap_or_else(|| Response::ok(format!("fresh {}", request.url.path()))))
        }
    }

    fn setup() -> (
        RequestInterceptor<MemoryCacheStorage, Server>,
        Arc<MemoryCacheStorage>,
        Arc<Server>,
    ) {
        let storage = Arc::new(MemoryCacheStorage::new());
        let network = Arc::new(Server::default());
        let config = ShellConfig::for_origin("https://cashlog.example").unwrap();
        let interceptor =
            RequestInterceptor::new(&config, storage.clone(), network.clone()).unwrap();
        (interceptor, storage, network)
    }

    fn v1() -> CacheName {
        CacheName::new("cashlog-cache-v1").unwrap()
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores() {
        let (interceptor, storage, _) = setup();
        let request = Request::get("https://cashlog.example/app.js").unwrap();

        let out = interceptor.respond(request.clone()).await.unwrap();

        assert_eq!(out.source, ResponseSource::Network);
        assert!(storage.lookup(&v1(), &request.key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hit_serves_cached_then_refreshes() {
        let (interceptor, storage, network) = setup();
        let request = Request::get("https://cashlog.example/app.js").unwrap();
        storage
            .put(&v1(), request.key(), Response::ok("stale"))
            .await
            .unwrap();

        let out = interceptor.respond(request.clone()).await.unwrap();

        assert_eq!(out.source, ResponseSource::Cache);
        assert_eq!(out.response.body, bytes::Bytes::from("stale"));
        assert_eq!(network.calls.load(Ordering::SeqCst), 0);

        out.revalidation.unwrap().finish().await;

        let refreshed = storage.lookup(&v1(), &request.key()).await.unwrap().unwrap();
        assert_eq!(refreshed.body, bytes::Bytes::from("fresh /app.js"));
    }

    #[tokio::test]
    async fn test_refresh_keeps_entry_on_error_response() {
        let (interceptor, storage, network) = setup();
        let request = Request::get("https://cashlog.example/app.js").unwrap();
        storage
            .put(&v1(), request.key(), Response::ok("stale"))
            .await
            .unwrap();
        network.respond_with(Response::new(500, ResponseType::Basic, "boom"));

        let out = interceptor.respond(request.clone()).await.unwrap();
        out.revalidation.unwrap().finish().await;

        let kept = storage.lookup(&v1(), &request.key()).await.unwrap().unwrap();
        assert_eq!(kept.body, bytes::Bytes::from("stale"));
    }

    #[tokio::test]
    async fn test_writes_bypass_cache() {
        let (interceptor, storage, _) = setup();
        let request = Request::new(Method::Post, "https://cashlog.example/api").unwrap();

        let out = interceptor.respond(request.clone()).await.unwrap();

        assert_eq!(out.source, ResponseSource::Bypass);
        assert!(storage.lookup(&v1(), &request.key()).await.unwrap().is_none());
        assert!(storage.names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_propagates() {
        let (interceptor, _, network) = setup();
        network.offline.store(true, Ordering::SeqCst);
        let request = Request::new(Method::Delete, "https://cashlog.example/api/1").unwrap();

        let result = interceptor.respond(request).await;

        assert_matches!(result, Err(InterceptError::Network(_)));
    }

    #[tokio::test]
    async fn test_non_success_and_opaque_not_stored() {
        let (interceptor, storage, network) = setup();

        network.respond_with(Response::new(404, ResponseType::Basic, "missing"));
        let missing = Request::get("https://cashlog.example/missing").unwrap();
        let out = interceptor.respond(missing.clone()).await.unwrap();
        assert_eq!(out.response.status, 404);
        assert!(storage.lookup(&v1(), &missing.key()).await.unwrap().is_none());

        network.respond_with(Response::new(200, ResponseType::Opaque, ""));
        let font = Request::get("https://fonts.example/font.woff2").unwrap();
        interceptor.respond(font.clone()).await.unwrap();
        assert!(storage.lookup(&v1(), &font.key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_miss_serves_shell() {
        let (interceptor, storage, network) = setup();
        let shell = Request::get("https://cashlog.example/index.html").unwrap();
        storage
            .put(&v1(), shell.key(), Response::ok("<html>shell</html>"))
            .await
            .unwrap();
        network.offline.store(true, Ordering::SeqCst);

        let out = interceptor
            .respond(Request::navigate("https://cashlog.example/reports").unwrap())
            .await
            .unwrap();

        assert_eq!(out.source, ResponseSource::ShellFallback);
        assert_eq!(out.response.body, bytes::Bytes::from("<html>shell</html>"));
    }

    #[tokio::test]
    async fn test_offline_without_shell_is_error() {
        let (interceptor, _, network) = setup();
        network.offline.store(true, Ordering::SeqCst);

        let result = interceptor
            .respond(Request::get("https://cashlog.example/").unwrap())
            .await;

        assert_matches!(result, Err(InterceptError::Offline { .. }));
    }

    #[tokio::test]
    async fn test_other_namespaces_are_ignored() {
        let (interceptor, storage, _) = setup();
        let request = Request::get("https://cashlog.example/app.js").unwrap();
        storage
            .put(&CacheName::new("cashlog-cache-v0").unwrap(), request.key(), Response::ok("old"))
            .await
            .unwrap();

        let out = interceptor.respond(request).await.unwrap();

        assert_eq!(out.source, ResponseSource::Network);
    }
}
