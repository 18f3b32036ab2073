use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use satsuma::app;
use satsuma_catalog::{CatalogError, CatalogFetcher, TrackNode};
use satsuma_core::TransferId;
use satsuma_engine::{
    DownloadEngine, EngineError, TransferProbe, TransferRequest, TransferState, TransferUpdate,
};

/// Catalog fake serving a fixed tree per id.
struct ScriptedCatalog {
    trees: Mutex<HashMap<String, Vec<TrackNode>>>,
}

impl ScriptedCatalog {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            trees: Mutex::new(HashMap::new()),
        })
    }

    fn set_tree(&self, id: &str, nodes: Vec<TrackNode>) {
        self.trees
            .lock()
            .expect("trees lock")
            .insert(id.to_string(), nodes);
    }
}

#[async_trait::async_trait]
impl CatalogFetcher for ScriptedCatalog {
    async fn fetch_tree(&self, id: &str) -> Result<Vec<TrackNode>, CatalogError> {
        self.trees
            .lock()
            .expect("trees lock")
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }
}

/// Engine fake that settles every transfer as soon as it is issued:
/// `Complete` normally, `Interrupted` for URLs containing "broken".
struct InstantEngine {
    events: mpsc::Sender<TransferUpdate>,
    next_id: AtomicU64,
}

impl InstantEngine {
    fn new(events: mpsc::Sender<TransferUpdate>) -> Arc<Self> {
        Arc::new(Self {
            events,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait::async_trait]
impl DownloadEngine for InstantEngine {
    async fn issue(&self, request: TransferRequest) -> Result<TransferId, EngineError> {
        let id = TransferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let state = if request.url.contains("broken") {
            TransferState::Interrupted
        } else {
            TransferState::Complete
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = events
                .send(TransferUpdate {
                    id,
                    state: TransferState::Downloading,
                })
                .await;
            let _ = events.send(TransferUpdate { id, state }).await;
        });
        Ok(id)
    }

    async fn lookup(&self, _id: TransferId) -> Option<TransferProbe> {
        None
    }
}

fn sample_tree() -> Vec<TrackNode> {
    vec![
        TrackNode::Folder {
            title: "Bonus".to_string(),
            children: vec![TrackNode::File {
                title: "01.mp3".to_string(),
                download_url: Some("https://cdn.example/t/1".to_string()),
            }],
        },
        TrackNode::File {
            title: "02.mp3".to_string(),
            download_url: Some("https://cdn.example/t/2".to_string()),
        },
    ]
}

fn available_port() -> u16 {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").expect("bind port");
    socket.local_addr().expect("local addr").port()
}

fn start_app(state_dir: &Path, addr: SocketAddr, catalog: Arc<ScriptedCatalog>) -> JoinHandle<()> {
    let (event_tx, event_rx) = mpsc::channel(64);
    let engine = InstantEngine::new(event_tx);
    let options = app::Options {
        state_dir: state_dir.to_path_buf(),
        listen: addr,
        concurrency: 3,
    };
    tokio::spawn(async move {
        app::run(options, catalog, engine, event_rx)
            .await
            .expect("app run");
    })
}

async fn api_get(client: &reqwest::Client, addr: SocketAddr, path: &str) -> reqwest::Response {
    timeout(
        Duration::from_secs(3),
        client.get(format!("http://{addr}{path}")).send(),
    )
    .await
    .expect("request timeout")
    .expect("request send")
}

async fn queue_json(client: &reqwest::Client, addr: SocketAddr) -> serde_json::Value {
    api_get(client, addr, "/api/queue")
        .await
        .json()
        .await
        .expect("queue json")
}

async fn wait_for_server(client: &reqwest::Client, addr: SocketAddr) {
    for _ in 0..100 {
        if client
            .get(format!("http://{addr}/api/queue"))
            .send()
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never came up on {addr}");
}

async fn wait_for_item_status(
    client: &reqwest::Client,
    addr: SocketAddr,
    id: &str,
    status: &str,
) -> serde_json::Value {
    for _ in 0..200 {
        let queue = queue_json(client, addr).await;
        let item = queue["items"]
            .as_array()
            .expect("items")
            .iter()
            .find(|item| item["id"] == id)
            .cloned();
        if let Some(item) = item
            && item["status"] == status
        {
            return item;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("item {id} never reached status {status}");
}

#[tokio::test]
async fn full_download_flow_over_the_observer_api() {
    let temp = tempfile::tempdir().expect("tempdir");
    let addr: SocketAddr = format!("127.0.0.1:{}", available_port())
        .parse()
        .expect("addr");
    let catalog = ScriptedCatalog::new();
    let catalog_tree = sample_tree();
    catalog.set_tree("WK900", catalog_tree);

    let server = start_app(temp.path(), addr, catalog.clone());
    let client = reqwest::Client::new();
    wait_for_server(&client, addr).await;

    // fresh daemon, empty queue
    let queue = queue_json(&client, addr).await;
    assert_eq!(queue["items"].as_array().expect("items").len(), 0);

    // settings are sanitized before they are stored
    let response = client
        .put(format!("http://{addr}/api/settings"))
        .json(&serde_json::json!({ "root": "..\\media//library" }))
        .send()
        .await
        .expect("settings");
    let body: serde_json::Value = response.json().await.expect("settings json");
    assert_eq!(body["root"], "media/library");

    // track listing for the selection UI
    let tracks: serde_json::Value = api_get(&client, addr, "/api/tracks/WK900")
        .await
        .json()
        .await
        .expect("tracks json");
    assert_eq!(tracks.as_array().expect("tracks").len(), 2);
    let missing = api_get(&client, addr, "/api/tracks/WK404").await;
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    // add by id: the daemon resolves the tree and downloads everything
    let response = client
        .post(format!("http://{addr}/api/queue"))
        .json(&serde_json::json!({ "id": "WK900" }))
        .send()
        .await
        .expect("add");
    let snapshot: serde_json::Value = response.json().await.expect("add json");
    assert_eq!(snapshot["items"][0]["id"], "WK900");

    let item = wait_for_item_status(&client, addr, "WK900", "completed").await;
    assert_eq!(item["progress"], 100);
    assert_eq!(item["completed_files"], 2);
    assert_eq!(item["total_files"], 2);
    let files = item["files"].as_array().expect("files");
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["path"], "WK900/Bonus/01.mp3");
    assert!(files.iter().all(|f| f["status"] == "completed"));

    // explicit selection with a failing transfer settles to error
    let response = client
        .post(format!("http://{addr}/api/queue"))
        .json(&serde_json::json!({
            "id": "WK901",
            "files": [
                { "url": "https://cdn.example/ok/1", "path": "WK901/01.mp3" },
                { "url": "https://cdn.example/broken/2", "path": "WK901/02.mp3" }
            ]
        }))
        .send()
        .await
        .expect("add selection");
    assert!(response.status().is_success());

    let item = wait_for_item_status(&client, addr, "WK901", "error").await;
    assert_eq!(item["progress"], 50);

    // clear-completed removes only the completed item
    let response = client
        .post(format!("http://{addr}/api/queue/clear-completed"))
        .send()
        .await
        .expect("clear");
    let snapshot: serde_json::Value = response.json().await.expect("clear json");
    let items = snapshot["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "WK901");

    // cancel drops the rest
    let response = client
        .delete(format!("http://{addr}/api/queue/WK901"))
        .send()
        .await
        .expect("cancel");
    let snapshot: serde_json::Value = response.json().await.expect("cancel json");
    assert_eq!(snapshot["items"].as_array().expect("items").len(), 0);

    server.abort();
}

#[tokio::test]
async fn queue_state_survives_a_restart() {
    let temp = tempfile::tempdir().expect("tempdir");
    let catalog = ScriptedCatalog::new();
    let client = reqwest::Client::new();

    let first_addr: SocketAddr = format!("127.0.0.1:{}", available_port())
        .parse()
        .expect("addr");
    let first = start_app(temp.path(), first_addr, catalog.clone());
    wait_for_server(&client, first_addr).await;

    client
        .post(format!("http://{first_addr}/api/queue"))
        .json(&serde_json::json!({
            "id": "WK950",
            "files": [
                { "url": "https://cdn.example/broken/1", "path": "WK950/01.mp3" }
            ]
        }))
        .send()
        .await
        .expect("add");
    wait_for_item_status(&client, first_addr, "WK950", "error").await;

    first.abort();
    let _ = first.await;

    let second_addr: SocketAddr = format!("127.0.0.1:{}", available_port())
        .parse()
        .expect("addr");
    let _second = start_app(temp.path(), second_addr, catalog);
    wait_for_server(&client, second_addr).await;

    let queue = queue_json(&client, second_addr).await;
    let items = queue["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "WK950");
    assert_eq!(items[0]["status"], "error");
}
