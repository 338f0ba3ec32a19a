use qoe_devkit::TestHarness;
use qoe_offline_worker::cache::{CacheStorage, DiskCacheStorage};
use qoe_offline_worker::notify::MemoryNotifier;
use qoe_offline_worker::opener::MemoryOpener;
use qoe_offline_worker::server::SOURCE_HEADER;
use qoe_offline_worker::{start_with, Lifecycle, Platform, RunningWorker, WorkerConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn config(origin: &str, data_dir: &Path, cache_name: &str) -> WorkerConfig {
    WorkerConfig {
        cache_name: cache_name.to_string(),
        asset_origin: origin.to_string(),
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        data_dir: Some(data_dir.to_path_buf()),
        fetch_timeout_secs: 2,
        ..WorkerConfig::default()
    }
}

async fn start(config: WorkerConfig) -> (RunningWorker, Arc<MemoryNotifier>) {
    let sink = Arc::new(MemoryNotifier::new());
    let platform = Platform {
        sink: sink.clone(),
        opener: Arc::new(MemoryOpener::new()),
        clicks: None,
    };
    (start_with(config, platform).await.unwrap(), sink)
}

#[tokio::test]
async fn test_serves_cache_when_origin_is_down() {
    let harness = TestHarness::with_app_assets().await.unwrap();
    let data = tempfile::tempdir().unwrap();
    let (worker, _) = start(config(&harness.stub.asset_origin(), data.path(), "qoeapp-cache-v1")).await;
    worker.handle.ready().await.unwrap();

    let client = reqwest::Client::new();
    let url = format!("{}index.html", worker.public_url());

    let online = client.get(&url).send().await.unwrap();
    assert_eq!(online.headers()[SOURCE_HEADER], "network");
    assert_eq!(online.text().await.unwrap(), "asset /app/index.html");

    harness.stub.shutdown().await;

    let offline = client.get(&url).send().await.unwrap();
    assert_eq!(offline.status(), 200);
    assert_eq!(offline.headers()[SOURCE_HEADER], "cache");
    assert_eq!(offline.text().await.unwrap(), "asset /app/index.html");

    let root = client.get(worker.public_url()).send().await.unwrap();
    assert_eq!(root.headers()[SOURCE_HEADER], "cache");
    assert_eq!(root.text().await.unwrap(), "asset /app/");

    let missing = client
        .get(format!("{}style.css", worker.public_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 503);
    assert_eq!(missing.headers()[SOURCE_HEADER], "unavailable");

    worker.shutdown();
}

#[tokio::test]
async fn test_install_fails_when_an_asset_is_missing() {
    let harness = TestHarness::with_app_assets().await.unwrap();
    harness.stub.remove_asset("/app/manifest.json");
    let data = tempfile::tempdir().unwrap();

    let (worker, _) = start(config(&harness.stub.asset_origin(), data.path(), "qoeapp-cache-v1")).await;
    assert!(worker.handle.ready().await.is_err());
    assert_eq!(worker.handle.lifecycle(), Lifecycle::Redundant);

    let health: serde_json::Value = reqwest::get(format!("{}health", worker.public_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["lifecycle"], "redundant");
    assert_eq!(health["active"], false);

    let storage = DiskCacheStorage::open(data.path().join("cache")).await.unwrap();
    assert!(storage.keys().await.unwrap().is_empty());

    worker.shutdown();
}

#[tokio::test]
async fn test_new_generation_replaces_old_one() {
    let harness = TestHarness::with_app_assets().await.unwrap();
    let data = tempfile::tempdir().unwrap();

    let (first, _) = start(config(&harness.stub.asset_origin(), data.path(), "qoeapp-cache-v1")).await;
    first.handle.ready().await.unwrap();
    first.shutdown();

    let (second, _) = start(config(&harness.stub.asset_origin(), data.path(), "qoeapp-cache-v2")).await;
    second.handle.ready().await.unwrap();

    let storage = DiskCacheStorage::open(data.path().join("cache")).await.unwrap();
    assert_eq!(storage.keys().await.unwrap(), vec!["qoeapp-cache-v2".to_string()]);
    assert!(storage.lookup("qoeapp-cache-v2", "/network.js").await.unwrap().is_some());

    second.shutdown();
}

#[tokio::test]
async fn test_push_endpoint_shows_notification() {
    let harness = TestHarness::with_app_assets().await.unwrap();
    let data = tempfile::tempdir().unwrap();
    let (worker, sink) = start(config(&harness.stub.asset_origin(), data.path(), "qoeapp-cache-v1")).await;
    worker.handle.ready().await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}push", worker.public_url()))
        .body(r#"{"title":"Alert","body":"Slow link"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    for _ in 0..100 {
        if sink.shown_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let visible = sink.visible();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].title, "Alert");
    assert_eq!(visible[0].body, "Slow link");
    assert_eq!(visible[0].tag, "qoe");

    worker.shutdown();
}

#[tokio::test]
async fn test_subscription_points_at_push_endpoint() {
    let harness = TestHarness::with_app_assets().await.unwrap();
    let data = tempfile::tempdir().unwrap();
    let (worker, _) = start(config(&harness.stub.asset_origin(), data.path(), "qoeapp-cache-v1")).await;
    worker.handle.ready().await.unwrap();

    let subscription = worker.handle.subscribe(&[4, 1, 2]).await.unwrap();
    assert_eq!(subscription.endpoint, format!("{}push", worker.public_url()));
    assert!(data.path().join("subscription.json").exists());

    worker.shutdown();
}
