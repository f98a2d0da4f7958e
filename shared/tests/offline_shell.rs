mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::ScriptedNetwork;
use shared::cache::{InterceptError, LifecycleError, SqliteCacheStorage};
use shared::capabilities::{
    CacheName, CacheStorage, MemoryCacheStorage, Method, Request, Response, ResponseType,
    StaticClients,
};
use shared::{OfflineShell, ResponseSource, ShellConfig, WorkerState};

const ORIGIN: &str = "https://cashlog.example";

fn config(version: &str, shell: &[&str]) -> ShellConfig {
    let mut config = ShellConfig::for_origin(ORIGIN).unwrap().with_version(version);
    config.shell_urls = shell.iter().map(ToString::to_string).collect();
    config.validate().unwrap();
    config
}

fn network() -> Arc<ScriptedNetwork> {
    let network = ScriptedNetwork::new();
    network.route("https://cashlog.example/", "<html>root</html>");
    network.route("https://cashlog.example/index.html", "<html>shell</html>");
    network.route("https://cashlog.example/app.js", "console.log('v1')");
    Arc::new(network)
}

fn url(path: &str) -> String {
    format!("{ORIGIN}{path}")
}

#[tokio::test]
async fn install_then_activate_populates_only_the_current_version() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let network = network();
    let clients = StaticClients::new(2);
    let shell = OfflineShell::new(
        config("cashlog-v1", &["/", "/index.html"]),
        Arc::clone(&storage),
        Arc::clone(&network),
    )
    .unwrap();

    assert_eq!(shell.state().await, WorkerState::Parsed);
    assert_eq!(shell.start(&clients).await.unwrap(), WorkerState::Activated);

    let names = storage.names().await.unwrap();
    assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["cashlog-v1"]);

    let keys = storage
        .keys(&CacheName::new("cashlog-v1").unwrap())
        .await
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(clients.claim_count(), 1);
}

#[tokio::test]
async fn shell_waits_for_activation_without_skip_waiting() {
    let mut cfg = config("cashlog-v1", &["/", "/index.html"]);
    cfg.skip_waiting = false;
    let clients = StaticClients::new(1);
    let shell = OfflineShell::new(cfg, Arc::new(MemoryCacheStorage::new()), network()).unwrap();

    assert_eq!(shell.start(&clients).await.unwrap(), WorkerState::Installed);
    assert_eq!(clients.claim_count(), 0);

    let outcome = shell.activate(&clients).await.unwrap();
    assert!(outcome.deleted.is_empty());
    assert_eq!(outcome.claimed, 1);
    assert_eq!(shell.state().await, WorkerState::Activated);
}

#[tokio::test]
async fn new_version_deletes_old_namespace_on_activation() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let network = network();
    let clients = StaticClients::new(1);

    let v1 = OfflineShell::new(
        config("cashlog-v1", &["/", "/index.html", "/app.js"]),
        Arc::clone(&storage),
        Arc::clone(&network),
    )
    .unwrap();
    v1.start(&clients).await.unwrap();

    let cached = v1.respond(Request::get(&url("/app.js")).unwrap()).await.unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);

    let mut waiting = config("cashlog-v2", &["/", "/index.html"]);
    waiting.skip_waiting = false;
    let v2 = OfflineShell::new(waiting, Arc::clone(&storage), Arc::clone(&network)).unwrap();
    v2.start(&clients).await.unwrap();

    // Both namespaces coexist until the new version activates.
    assert_eq!(storage.names().await.unwrap().len(), 2);

    let outcome = v2.activate(&clients).await.unwrap();
    assert_eq!(outcome.deleted, vec!["cashlog-v1".to_string()]);
    assert_eq!(
        storage.names().await.unwrap().into_iter().collect::<Vec<_>>(),
        vec!["cashlog-v2"]
    );

    network.clear_log();
    let fresh = v2.respond(Request::get(&url("/app.js")).unwrap()).await.unwrap();
    assert_eq!(fresh.source, ResponseSource::Network);
    assert_eq!(network.fetched(), vec![(Method::Get, url("/app.js"))]);
}

#[tokio::test]
async fn reinstalling_same_version_is_a_no_op() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let network = network();
    let clients = StaticClients::new(0);
    let cfg = config("cashlog-v1", &["/", "/index.html"]);

    OfflineShell::new(cfg.clone(), Arc::clone(&storage), Arc::clone(&network))
        .unwrap()
        .start(&clients)
        .await
        .unwrap();
    network.clear_log();

    let again = OfflineShell::new(cfg, Arc::clone(&storage), Arc::clone(&network)).unwrap();
    assert_eq!(again.start(&clients).await.unwrap(), WorkerState::Activated);
    assert!(network.fetched().is_empty());
}

#[tokio::test]
async fn failed_install_leaves_previous_version_serving() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let network = network();
    let clients = StaticClients::new(1);

    let v1 = OfflineShell::new(
        config("cashlog-v1", &["/", "/index.html"]),
        Arc::clone(&storage),
        Arc::clone(&network),
    )
    .unwrap();
    v1.start(&clients).await.unwrap();

    network.route_response(
        "https://cashlog.example/index.html",
        Response::new(500, ResponseType::Basic, "boom"),
    );
    let v2 = OfflineShell::new(
        config("cashlog-v2", &["/", "/index.html"]),
        Arc::clone(&storage),
        Arc::clone(&network),
    )
    .unwrap();

    let result = v2.start(&clients).await;
    assert_matches!(result, Err(LifecycleError::Unstorable { status: 500, .. }));
    assert_eq!(v2.state().await, WorkerState::Redundant);

    // The partial v2 namespace is gone and v1 is untouched.
    assert_eq!(
        storage.names().await.unwrap().into_iter().collect::<Vec<_>>(),
        vec!["cashlog-v1"]
    );
    network.set_offline(true);
    let served = v1
        .respond(Request::get(&url("/index.html")).unwrap())
        .await
        .unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body.as_ref(), b"<html>shell</html>");
}

#[tokio::test]
async fn offline_navigation_falls_back_to_shell_document() {
    let network = network();
    let shell = OfflineShell::new(
        config("cashlog-v1", &["/", "/index.html"]),
        Arc::new(MemoryCacheStorage::new()),
        Arc::clone(&network),
    )
    .unwrap();
    shell.start(&StaticClients::new(0)).await.unwrap();
    network.set_offline(true);

    let page = shell
        .respond(Request::navigate(&url("/transactions?period=month")).unwrap())
        .await
        .unwrap();

    assert_eq!(page.source, ResponseSource::ShellFallback);
    assert_eq!(page.response.body.as_ref(), b"<html>shell</html>");
}

#[tokio::test]
async fn offline_without_installed_shell_reports_offline() {
    let network = network();
    network.set_offline(true);
    let shell = OfflineShell::new(
        config("cashlog-v1", &["/", "/index.html"]),
        Arc::new(MemoryCacheStorage::new()),
        network,
    )
    .unwrap();

    let result = shell.respond(Request::get(&url("/app.js")).unwrap()).await;

    assert_matches!(result, Err(InterceptError::Offline { .. }));
}

#[tokio::test]
async fn writes_and_unstorable_reads_never_reach_the_cache() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let network = network();
    network.route_response(
        "https://cashlog.example/missing.png",
        Response::new(404, ResponseType::Basic, "nope"),
    );
    network.route_response(
        "https://cashlog.example/widget.js",
        Response::new(200, ResponseType::Opaque, ""),
    );
    let shell = OfflineShell::new(
        config("cashlog-v1", &["/", "/index.html"]),
        Arc::clone(&storage),
        Arc::clone(&network),
    )
    .unwrap();
    shell.start(&StaticClients::new(0)).await.unwrap();
    let name = CacheName::new("cashlog-v1").unwrap();
    let before = storage.keys(&name).await.unwrap().len();

    let post = Request::new(Method::Post, &url("/"))
        .unwrap()
        .with_body(r#"{"task":"x"}"#);
    let posted = shell.respond(post).await.unwrap();
    assert_eq!(posted.source, ResponseSource::Bypass);

    let missing = shell
        .respond(Request::get(&url("/missing.png")).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.response.status, 404);

    let opaque = shell
        .respond(Request::get(&url("/widget.js")).unwrap())
        .await
        .unwrap();
    assert_eq!(opaque.source, ResponseSource::Network);

    assert_eq!(storage.keys(&name).await.unwrap().len(), before);
}

#[tokio::test]
async fn cache_hit_revalidates_in_background() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let network = network();
    let shell = OfflineShell::new(
        config("cashlog-v1", &["/", "/index.html", "/app.js"]),
        Arc::clone(&storage),
        Arc::clone(&network),
    )
    .unwrap();
    shell.start(&StaticClients::new(0)).await.unwrap();

    network.route("https://cashlog.example/app.js", "console.log('v1.1')");
    let first = shell.respond(Request::get(&url("/app.js")).unwrap()).await.unwrap();
    assert_eq!(first.response.body.as_ref(), b"console.log('v1')");
    first.revalidation.unwrap().finish().await;

    let second = shell.respond(Request::get(&url("/app.js")).unwrap()).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body.as_ref(), b"console.log('v1.1')");
}

#[tokio::test]
async fn sqlite_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shell.db");
    let network = network();

    {
        let storage = Arc::new(SqliteCacheStorage::open(&path).unwrap());
        let shell = OfflineShell::new(
            config("cashlog-v1", &["/", "/index.html"]),
            storage,
            Arc::clone(&network),
        )
        .unwrap();
        shell.start(&StaticClients::new(0)).await.unwrap();
    }

    network.set_offline(true);
    let storage = Arc::new(SqliteCacheStorage::open(&path).unwrap());
    let shell = OfflineShell::new(
        config("cashlog-v1", &["/", "/index.html"]),
        storage,
        network,
    )
    .unwrap();

    let page = shell
        .respond(Request::navigate(&url("/todos")).unwrap())
        .await
        .unwrap();
    assert_eq!(page.source, ResponseSource::ShellFallback);
    assert_eq!(page.response.body.as_ref(), b"<html>shell</html>");
}
