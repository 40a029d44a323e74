//! HTTP surface exercised in-process with `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use reelforge_core::traits::Ledger;
use reelforge_core::types::{Task, TaskOrigin, TaskStatus};
use reelforge_gateway::{AppState, build_router};
use reelforge_pipeline::Lane;
use reelforge_testkit::TestBed;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn call(bed: &TestBed, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let app = build_router(AppState::new(bed.control.clone()));
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_reports_every_lane() {
    let bed = TestBed::new();
    let (status, body) = call(&bed, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["lanes"].as_array().unwrap().len(), Lane::ALL.len());
}

#[tokio::test]
async fn test_submit_then_inspect_task() {
    let bed = TestBed::new();
    let (status, _) = call(
        &bed,
        "POST",
        "/api/channels",
        Some(json!({"id": "C1", "display_name": "Coffee", "niche": "food", "credential_blob": "[]"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &bed,
        "POST",
        "/api/tasks",
        Some(json!({"source_url": "https://www.youtube.com/watch?v=gw1", "title": "Gw", "target_channel_id": "C1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert!(task_id.starts_with("task"));

    let outcome = bed
        .control
        .dispatcher()
        .dispatch(&task_id, Lane::Manual)
        .unwrap()
        .outcome()
        .await
        .unwrap();
    assert_eq!(outcome.status, TaskStatus::Completed, "{:?}", outcome.error);

    let (status, body) = call(&bed, "GET", &format!("/api/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task"]["status"], "completed");
    let history: Vec<&str> = body["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["status"].as_str().unwrap())
        .collect();
    assert_eq!(history.last(), Some(&"completed"));

    let (_, body) = call(&bed, "GET", "/api/tasks?limit=5", None).await;
    assert_eq!(body["tasks"].as_array().unwrap().len(), 1);

    let (status, body) = call(
        &bed,
        "POST",
        "/api/metrics",
        Some(json!({"task_id": task_id, "ctr": 0.04, "views": 900})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sample"]["views"], 900);
}

#[tokio::test]
async fn test_error_statuses() {
    let bed = TestBed::new();

    let (status, body) = call(&bed, "POST", "/api/tasks", Some(json!({"title": "no url"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);

    let (status, _) = call(
        &bed,
        "POST",
        "/api/tasks",
        Some(json!({"source_url": "https://youtu.be/x", "target_channel_id": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&bed, "GET", "/api/tasks/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&bed, "DELETE", "/api/schedules/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &bed,
        "POST",
        "/api/metrics",
        Some(json!({"task_id": "nope", "ctr": 0.5})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_schedule_lifecycle() {
    let bed = TestBed::new();
    bed.channel("C1");

    let (status, body) = call(
        &bed,
        "POST",
        "/api/schedules",
        Some(json!({
            "title": "Evening drop",
            "payload": {"source_url": "https://www.youtube.com/watch?v=ev1", "title": "Ev"},
            "publish_time_local": "2030-01-01T18:00:00",
            "target_channel_id": "C1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let id = body["schedule"]["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(body["schedule"]["status"], "scheduled");

    let (_, body) = call(&bed, "GET", "/api/schedules", None).await;
    assert_eq!(body["schedules"].as_array().unwrap().len(), 1);

    let (status, _) = call(&bed, "DELETE", &format!("/api/schedules/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(bed.ledger.list_schedules().unwrap().is_empty());
}

#[tokio::test]
async fn test_channel_listing_hides_session_material() {
    let bed = TestBed::new();
    bed.channel("C1");
    let (status, body) = call(
        &bed,
        "POST",
        "/api/channels",
        Some(json!({"id": "C2", "display_name": "Paused one", "paused": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channel"]["status"], "paused");

    let (_, body) = call(&bed, "GET", "/api/channels", None).await;
    let channels = body["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 2);
    assert!(channels.iter().all(|c| c.get("credential_blob").is_none()));
}

#[tokio::test]
async fn test_schedule_id_with_path_separator_is_rejected() {
    let bed = TestBed::new();
    let (status, body) = call(
        &bed,
        "POST",
        "/api/schedules",
        Some(json!({
            "id": "../../tmp/evil",
            "payload": {"source_url": "https://www.youtube.com/watch?v=ev1"},
            "publish_time_local": "2030-01-01T18:00:00"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert!(bed.ledger.list_schedules().unwrap().is_empty());
}

#[tokio::test]
async fn test_radar_breakout_feed() {
    let bed = TestBed::new();
    bed.put_task("manual1", "C1");
    let radar = Task::new(
        "radar_abc_1",
        json!({"source_url": "https://www.youtube.com/watch?v=abc_1", "title": "Breakout"}),
        TaskOrigin::Radar,
        None,
    );
    bed.ledger.upsert_task(&radar).unwrap();

    let (status, body) = call(&bed, "GET", "/api/tasks?origin=radar", None).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["id"], "radar_abc_1");
    assert_eq!(tasks[0]["origin"], "radar");

    let (_, body) = call(&bed, "GET", "/api/tasks", None).await;
    assert_eq!(body["tasks"].as_array().unwrap().len(), 2);

    let (status, _) = call(&bed, "GET", "/api/tasks?origin=telepathy", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
