//! API tests driven in-process against the router with mock
//! collaborators behind the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use archivedl_core::{
    testing::{MockDownloadEngine, MockSearchResolver},
    Config, DownloadEngine, SearchResolver, StorageConfig, TaskOrchestrator, WorkerConfig,
};
use archivedl_server::api::create_router;
use archivedl_server::state::AppState;

/// Test fixture: an in-process server with mock collaborators.
struct TestFixture {
    router: Router,
    resolver: Arc<MockSearchResolver>,
    engine: Arc<MockDownloadEngine>,
    temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
struct TestResponse {
    status: StatusCode,
    body: Value,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let config = Config {
            storage: StorageConfig {
                download_dir: temp_dir.path().join("downloads"),
                data_dir: temp_dir.path().join("data"),
            },
            worker: WorkerConfig {
                dequeue_timeout_secs: 1,
            },
            ..Default::default()
        };

        let resolver = Arc::new(MockSearchResolver::new());
        let engine = Arc::new(MockDownloadEngine::new());

        let orchestrator = Arc::new(TaskOrchestrator::new(
            config.worker.clone(),
            Arc::clone(&resolver) as Arc<dyn SearchResolver>,
            Arc::clone(&engine) as Arc<dyn DownloadEngine>,
        ));

        let state = Arc::new(AppState::new(config, orchestrator));
        let router = create_router(state);

        Self {
            router,
            resolver,
            engine,
            temp_dir,
        }
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                builder.body(Body::from(body.to_string())).unwrap()
            }
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Poll a task until it reaches `expected` or the timeout elapses.
    async fn wait_for_state(&self, task_id: &str, expected: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let path = format!("/api/v1/tasks/{}", task_id);
        loop {
            let response = self.get(&path).await;
            if response.body["state"] == expected {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_submit_requires_identifiers_or_terms() {
    let fixture = TestFixture::new();
    let response = fixture.post("/api/v1/tasks", json!({})).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("at least one identifier or search term"));

    // Whitespace-only entries do not count.
    let response = fixture
        .post("/api/v1/tasks", json!({"identifiers": ["  ", ""]}))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_rejects_bad_identifier() {
    let fixture = TestFixture::new();
    let response = fixture
        .post("/api/v1/tasks", json!({"identifiers": ["has space"]}))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("invalid identifier"));
}

#[tokio::test]
async fn test_submit_rejects_escaping_output_folder() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            "/api/v1/tasks",
            json!({"identifiers": ["itemA"], "output_folder": "../outside"}),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = fixture
        .post(
            "/api/v1/tasks",
            json!({"identifiers": ["itemA"], "output_folder": "/abs/path"}),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_and_track_to_completion() {
    let fixture = TestFixture::new();

    let response = fixture
        .post(
            "/api/v1/tasks",
            json!({
                "identifiers": ["itemA"],
                "output_folder": "batch-1",
                "options": {"thread_count": 2, "verify": false}
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let task_id = response.body["task_id"].as_str().unwrap().to_string();

    assert!(fixture.wait_for_state(&task_id, "completed", WAIT).await);

    let response = fixture.get(&format!("/api/v1/tasks/{}", task_id)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["id"], task_id.as_str());
    assert_eq!(response.body["identifiers"], json!(["itemA"]));
    assert!(response.body["end_time"].is_string());
    assert_eq!(response.body["errors"], json!([]));

    assert_eq!(fixture.engine.started().await, vec!["itemA".to_string()]);
    // The requested output folder was created under the download dir.
    assert!(fixture.temp_dir.path().join("downloads/batch-1").is_dir());
}

#[tokio::test]
async fn test_search_terms_are_resolved() {
    let fixture = TestFixture::new();
    fixture
        .resolver
        .set_results("topic", vec!["x1".to_string()])
        .await;

    let response = fixture
        .post("/api/v1/tasks", json!({"search_terms": ["topic"]}))
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let task_id = response.body["task_id"].as_str().unwrap().to_string();

    assert!(fixture.wait_for_state(&task_id, "completed", WAIT).await);
    assert_eq!(fixture.engine.started().await, vec!["x1".to_string()]);
}

#[tokio::test]
async fn test_get_unknown_task_is_404() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/tasks/nope").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_unknown_task_is_404() {
    let fixture = TestFixture::new();
    let response = fixture.post("/api/v1/tasks/nope/stop", json!({})).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_terminal_task_is_conflict() {
    let fixture = TestFixture::new();

    let response = fixture
        .post("/api/v1/tasks", json!({"identifiers": ["itemA"]}))
        .await;
    let task_id = response.body["task_id"].as_str().unwrap().to_string();
    assert!(fixture.wait_for_state(&task_id, "completed", WAIT).await);

    let response = fixture
        .post(&format!("/api/v1/tasks/{}/stop", task_id), json!({}))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_stop_running_task() {
    let fixture = TestFixture::new();
    fixture.engine.set_hold(true).await;

    let response = fixture
        .post("/api/v1/tasks", json!({"identifiers": ["x1", "x2"]}))
        .await;
    let task_id = response.body["task_id"].as_str().unwrap().to_string();

    assert!(fixture.engine.wait_for_start("x1", WAIT).await);

    let response = fixture
        .post(&format!("/api/v1/tasks/{}/stop", task_id), json!({}))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["previous_state"], "running");
    assert_eq!(response.body["state"], "stopped");

    fixture.engine.release_one();
    assert!(fixture.wait_for_state(&task_id, "stopped", WAIT).await);
    assert_eq!(fixture.engine.started().await, vec!["x1".to_string()]);
}

#[tokio::test]
async fn test_list_tasks() {
    let fixture = TestFixture::new();

    let first = fixture
        .post("/api/v1/tasks", json!({"identifiers": ["itemA"]}))
        .await;
    let first_id = first.body["task_id"].as_str().unwrap().to_string();
    assert!(fixture.wait_for_state(&first_id, "completed", WAIT).await);

    let response = fixture.get("/api/v1/tasks").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["tasks"][0]["id"], first_id.as_str());
}

#[tokio::test]
async fn test_status_overview() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/status").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["worker_alive"], false);
    assert_eq!(response.body["queue_depth"], 0);
}

#[tokio::test]
async fn test_config_endpoint() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/config").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["server"]["port"], 9124);
    assert!(response.body["engine"]["url"].is_string());
}

#[tokio::test]
async fn test_verify_endpoint() {
    let fixture = TestFixture::new();

    // Lay out a downloaded item and its manifest by hand.
    // md5("hello") = 5d41402abc4b2a76b9719d911017c592
    let data_folder = fixture.temp_dir.path().join("verify-data");
    std::fs::create_dir_all(data_folder.join("itemA")).unwrap();
    std::fs::write(data_folder.join("itemA/hello.txt"), "hello").unwrap();

    let manifest_path = fixture.temp_dir.path().join("manifest.txt");
    std::fs::write(
        &manifest_path,
        "itemA|hello.txt|5d41402abc4b2a76b9719d911017c592\n",
    )
    .unwrap();

    let response = fixture
        .post(
            "/api/v1/verify",
            json!({
                "manifest_path": manifest_path,
                "data_folder": data_folder,
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["files_checked"], 1);
    assert_eq!(response.body["verified"], 1);
    assert_eq!(response.body["missing"], json!([]));
}

#[tokio::test]
async fn test_verify_requires_manifest_reference() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            "/api/v1/verify",
            json!({"data_folder": fixture.temp_dir.path()}),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_verify_missing_manifest_is_404() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            "/api/v1/verify",
            json!({
                "task_id": "no-such-task",
                "data_folder": fixture.temp_dir.path(),
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
