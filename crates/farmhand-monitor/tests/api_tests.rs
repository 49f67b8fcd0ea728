//! Integration tests for the monitoring API.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use farmhand_monitor::{AppState, create_router};
use serde_json::{Value, json};

// ============================================================================
// Test helpers
// ============================================================================

fn test_server() -> TestServer {
    let state = Arc::new(AppState::in_memory().expect("sqlite in-memory"));
    TestServer::new(create_router(state)).expect("test server")
}

fn meta() -> Value {
    json!({"time": "2018-10-20T18:15:00Z", "host": "submit01"})
}

async fn create(server: &TestServer, label: &str, body: Value) -> axum_test::TestResponse {
    server.put(&format!("/api/v0/task/{label}")).json(&body).await
}

async fn event(server: &TestServer, path: &str, body: Value) -> axum_test::TestResponse {
    server.patch(&format!("/api/v0/task/{path}")).json(&body).await
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_returns_ok() {
    let server = test_server();
    let response = server.get("/api/v0/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().is_some());
}

// ============================================================================
// Task creation
// ============================================================================

#[tokio::test]
async fn test_create_task_returns_descriptor() {
    let server = test_server();
    let response = create(
        &server,
        "mc-2018",
        json!({
            "typeLabel": "simulation",
            "config": {"backend": "HTCondor"},
            "processes": {"prep": null, "sim": 10, "reco": [10, 8]},
            "depGraph": {
                "version": 1,
                "nodes": ["prep", "sim", "reco"],
                "edges": [["prep", "sim"], ["sim", "reco"]]
            },
            "tags": ["mc"],
            "username": "alice",
            "meta": meta()
        }),
    )
    .await;
    response.assert_status(StatusCode::CREATED);

    let body: Value = response.json();
    assert_eq!(body["label"], "mc-2018");
    assert_eq!(body["typeLabel"], "simulation");
    assert_eq!(body["host"], "submit01");
    assert_eq!(body["processes"][0]["name"], "prep");
    assert_eq!(body["processes"][0]["state"], "unstarted");
    let arrays = body["arrays"].as_array().unwrap();
    assert_eq!(arrays.len(), 2);
    assert_eq!(arrays[0]["name"], "reco");
    assert_eq!(arrays[0]["faultTolerance"], 2);
    assert_eq!(arrays[1]["jobCount"], 10);
    assert_eq!(arrays[1]["unstarted"], 10);
    assert_eq!(body["depGraph"]["edges"].as_array().unwrap().len(), 2);

    let listed: Value = server.get("/api/v0/tasks").await.json();
    assert_eq!(listed[0]["label"], "mc-2018");
    assert_eq!(listed[0]["processCount"], 21);
}

#[tokio::test]
async fn test_duplicate_task_returns_409_and_keeps_first() {
    let server = test_server();
    create(&server, "t1", json!({"processes": {"a": null}}))
        .await
        .assert_status(StatusCode::CREATED);

    let response = create(&server, "t1", json!({"processes": {"b": null, "c": 5}})).await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "conflict");

    let task: Value = server.get("/api/v0/task/t1").await.json();
    let processes = task["processes"].as_array().unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0]["name"], "a");
    assert!(task["arrays"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_task_bodies_return_400() {
    let server = test_server();
    for body in [
        json!({"processes": {}}),
        json!({}),
        json!({"processes": {"sim": 0}}),
        json!({"processes": {"sim": [3, 4]}}),
        json!({"processes": {"sim": 2}, "depGraph": {"version": 1, "nodes": ["a"], "edges": [["a", "b"]]}}),
        json!({"processes": "nope"}),
    ] {
        let response = create(&server, "bad", body.clone()).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let error: Value = response.json();
        assert_eq!(error["error"], "bad_request", "body {body}");
    }
    server
        .get("/api/v0/task/bad")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_task_returns_404() {
    let server = test_server();
    let response = server.get("/api/v0/task/missing").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"], "not_found");

    event(&server, "missing/process/a", json!({"type": "started"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// ============================================================================
// Process lifecycle
// ============================================================================

#[tokio::test]
async fn test_beat_creates_process_and_termination_is_absorbing() {
    let server = test_server();
    create(&server, "t1", json!({"processes": {"a": null}})).await;

    let first = event(
        &server,
        "t1/process/worker",
        json!({"type": "beat", "current": 1, "upper": 10, "!meta": meta()}),
    )
    .await;
    first.assert_status(StatusCode::CREATED);
    let body: Value = first.json();
    assert_eq!(body, json!({"created": true, "state": "active", "keepGoing": true}));

    let end = event(
        &server,
        "t1/process/worker",
        json!({"type": "terminated", "exitCode": 0, "payload": {"events": 1000}}),
    )
    .await;
    end.assert_status_ok();
    let body: Value = end.json();
    assert_eq!(body["state"], "terminated");
    assert_eq!(body["keepGoing"], true);

    let late = event(&server, "t1/process/worker", json!({"type": "beat", "current": 2})).await;
    late.assert_status_ok();
    let body: Value = late.json();
    assert_eq!(body["state"], "terminated");
    assert_eq!(body["keepGoing"], false);

    let process: Value = server.get("/api/v0/task/t1/process/worker").await.json();
    assert_eq!(process["state"], "terminated");
    assert_eq!(process["exitCode"], 0);
    let events = process["events"].as_array().unwrap();
    let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["beat", "terminated", "beat"]);
    assert_eq!(events[0]["host"], "submit01");
    assert_eq!(events[0]["upper"], 10);
    assert_eq!(events[1]["payload"]["events"], 1000);
}

#[tokio::test]
async fn test_declared_process_first_event_is_created() {
    let server = test_server();
    create(&server, "t1", json!({"processes": {"a": null}})).await;

    event(&server, "t1/process/a", json!({"type": "started"}))
        .await
        .assert_status(StatusCode::CREATED);
    event(&server, "t1/process/a", json!({"type": "started"}))
        .await
        .assert_status_ok();

    let task: Value = server.get("/api/v0/task/t1").await.json();
    assert_eq!(task["processes"][0]["state"], "active");
    assert_eq!(task["processes"][0]["eventCount"], 2);
}

#[tokio::test]
async fn test_array_member_events() {
    let server = test_server();
    create(&server, "t1", json!({"processes": {"sim": [3, 2]}})).await;

    event(&server, "t1/array/sim/1", json!({"type": "terminated", "exitCode": 0}))
        .await
        .assert_status(StatusCode::CREATED);

    let body: Value = event(&server, "t1/array/sim/2", json!({"type": "terminated", "exitCode": 3}))
        .await
        .json();
    assert_eq!(body["keepGoing"], true);

    let body: Value = event(&server, "t1/array/sim/3", json!({"type": "beat"})).await.json();
    assert_eq!(body["keepGoing"], true);
    let body: Value = event(&server, "t1/array/sim/3", json!({"type": "terminated", "exitCode": 1}))
        .await
        .json();
    assert_eq!(body["keepGoing"], false);

    let task: Value = server.get("/api/v0/task/t1").await.json();
    let sim = &task["arrays"][0];
    assert_eq!(sim["succeeded"], 1);
    assert_eq!(sim["failed"], 2);
    assert_eq!(sim["unstarted"], 0);
}

#[tokio::test]
async fn test_array_errors() {
    let server = test_server();
    create(&server, "t1", json!({"processes": {"sim": 2}})).await;

    let response = event(&server, "t1/array/reco/1", json!({"type": "started"})).await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert!(body["message"].as_str().unwrap().contains("array reco"));

    event(&server, "t1/array/sim/3", json!({"type": "started"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    event(&server, "t1/array/sim/x", json!({"type": "started"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    event(&server, "t1/array/sim/1", json!({"type": "exploded"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let unseen: Value = server.get("/api/v0/task/t1/array/sim/2").await.json();
    assert_eq!(unseen["state"], "unstarted");
    assert_eq!(unseen["signature"], "sim:2");
    assert!(unseen["events"].as_array().unwrap().is_empty());
}
