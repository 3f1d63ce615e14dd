//! Integration tests for the HTTP API, driving the real axum router
//! in-process with `tower::ServiceExt::oneshot` against a Postgres test
//! database, mirroring `docflow-engine`'s `tests/postgres_integration_test.rs`
//! pattern.
//!
//! Skipped (not failed) when neither `TEST_DATABASE_URL` nor `DATABASE_URL`
//! is set.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use docflow_api::{build_router, AppState};
use docflow_core::Settings;
use docflow_engine::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")).ok()
}

fn write_file(dir: &std::path::Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

async fn test_state() -> (AppState, tempfile::TempDir, tempfile::TempDir, tempfile::TempDir) {
    let db_url = test_database_url().expect("TEST_DATABASE_URL or DATABASE_URL must be set");

    let workflow_dir = tempfile::tempdir().unwrap();
    let param_dir = tempfile::tempdir().unwrap();
    let file_store = tempfile::tempdir().unwrap();
    write_file(
        workflow_dir.path(),
        "single_step.yaml",
        "id: single_step\nname: Single step\nitem_steps:\n  - step_type: validate\n    handler: validate\n",
    );
    write_file(param_dir.path(), "default.yaml", "id: default\nname: Default\nsource: app\nconfig: {}\n");

    let mut settings = Settings::from_env().unwrap();
    settings.doc_db_url = db_url;
    settings.workflow_dir = workflow_dir.path().to_string_lossy().into_owned();
    settings.param_dir = param_dir.path().to_string_lossy().into_owned();
    settings.file_store_target = "fs".to_string();
    settings.document_store_dir = file_store.path().join("raw").to_string_lossy().into_owned();
    settings.api_auth_token = Some("test-token".to_string());

    let engine = Engine::connect(settings).await.expect("connecting to test database");
    (AppState { engine: Arc::new(engine) }, workflow_dir, param_dir, file_store)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_is_reachable_without_auth() {
    if test_database_url().is_none() {
        eprintln!("skipping: TEST_DATABASE_URL/DATABASE_URL not set");
        return;
    }
    let (state, _wf, _pd, _fs) = test_state().await;
    let app = build_router(state);

    let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn api_routes_reject_requests_without_a_bearer_token() {
    if test_database_url().is_none() {
        eprintln!("skipping: TEST_DATABASE_URL/DATABASE_URL not set");
        return;
    }
    let (state, _wf, _pd, _fs) = test_state().await;
    let app = build_router(state);

    let response =
        app.oneshot(Request::builder().uri("/api/v1/batch/").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_batch_then_list_it_round_trips_through_the_router() {
    if test_database_url().is_none() {
        eprintln!("skipping: TEST_DATABASE_URL/DATABASE_URL not set");
        return;
    }
    let (state, _wf, _pd, _fs) = test_state().await;
    let app = build_router(state);

    let create_body = serde_json::to_vec(&json!({ "source": "integration-test", "name": "batch one" })).unwrap();
    let create_request = Request::builder()
        .method("POST")
        .uri("/api/v1/batch/")
        .header("content-type", "application/json")
        .header("authorization", "Bearer test-token")
        .body(Body::from(create_body))
        .unwrap();
    let create_response = app.clone().oneshot(create_request).await.unwrap();
    assert_eq!(create_response.status(), StatusCode::OK);
    let created = body_json(create_response).await;
    let batch_id = created["id"].as_i64().expect("batch id in response");

    let list_request = Request::builder()
        .uri("/api/v1/batch/")
        .header("authorization", "Bearer test-token")
        .body(Body::empty())
        .unwrap();
    let list_response = app.oneshot(list_request).await.unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);
    let batches = body_json(list_response).await;
    assert!(batches.as_array().unwrap().iter().any(|b| b["id"] == batch_id));
}

#[tokio::test]
async fn param_set_upload_rejects_duplicate_ids() {
    if test_database_url().is_none() {
        eprintln!("skipping: TEST_DATABASE_URL/DATABASE_URL not set");
        return;
    }
    let (state, _wf, _pd, _fs) = test_state().await;
    let app = build_router(state);

    let yaml = "id: dup-from-api\nname: Dup\nsource: app\nconfig: {}\n";
    let form_body = format!("yaml_content={}", urlencoding_minimal(yaml));

    let first = Request::builder()
        .method("POST")
        .uri("/api/v1/workflow/param-sets")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("authorization", "Bearer test-token")
        .body(Body::from(form_body.clone()))
        .unwrap();
    let first_response = app.clone().oneshot(first).await.unwrap();
    assert_eq!(first_response.status(), StatusCode::OK);

    let second = Request::builder()
        .method("POST")
        .uri("/api/v1/workflow/param-sets")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("authorization", "Bearer test-token")
        .body(Body::from(form_body))
        .unwrap();
    let second_response = app.oneshot(second).await.unwrap();
    assert_eq!(second_response.status(), StatusCode::CONFLICT);
}

/// Minimal `application/x-www-form-urlencoded` value-escaping for the one
/// YAML blob this test suite posts; not a general-purpose encoder.
fn urlencoding_minimal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b'\n' => out.push_str("%0A"),
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
