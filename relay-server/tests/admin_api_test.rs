// admin_api_test.rs
//
// Admin endpoints exercised in-process through `tower::ServiceExt::oneshot`.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use gym_bridge_relay_server::{
    agent_hub::AgentHub,
    api::{create_router, AppState},
    config::Config,
    db::Database,
    log_buffer::create_log_buffer,
    notifier::{NewNotification, Notifier},
};
use gym_bridge_protocol::DeviceType;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

struct TestApp {
    router: Router,
    hub: AgentHub,
}

async fn create_app() -> TestApp {
    let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
    let hub = AgentHub::new(Arc::new(Notifier::new()), Duration::from_secs(90));
    let state = AppState {
        db,
        hub: hub.clone(),
        log_buffer: create_log_buffer(),
        allowed_origins: vec![],
        cors_disabled: true,
        config: Arc::new(Config::default()),
    };
    TestApp {
        router: create_router(state),
        hub,
    }
}

async fn call(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register_agent(app: &TestApp, agent_id: &str, gym_id: i64) {
    let (status, _) = call(
        app,
        "POST",
        "/api/agents",
        Some(json!({"agent_id": agent_id, "gym_id": gym_id, "token": format!("{}-secret", agent_id)})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn reader(agent_id: &str, ip: &str) -> Value {
    json!({
        "agent_id": agent_id,
        "name": "Leitor Recepção",
        "ip_address": ip,
        "device_type": "control_id"
    })
}

#[tokio::test]
async fn test_health_reports_counts() {
    let app = create_app().await;

    let (status, body) = call(&app, "GET", "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connected_agents"], 0);
    assert_eq!(body["pending_commands"], 0);
}

#[tokio::test]
async fn test_register_agent_hides_token() {
    let app = create_app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/agents",
        Some(json!({"agent_id": "academia-1", "gym_id": 1, "token": "super-secret"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["agent_id"], "academia-1");
    assert!(body.get("token").is_none());
}

#[tokio::test]
async fn test_register_agent_rejects_short_token() {
    let app = create_app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/agents",
        Some(json!({"agent_id": "academia-1", "gym_id": 1, "token": "abc"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_unknown_agent_is_not_found() {
    let app = create_app().await;

    let (status, body) = call(&app, "GET", "/api/agents/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["instance"], "/api/agents/ghost");

    let (status, _) = call(&app, "DELETE", "/api/agents/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_command_to_offline_agent_is_unavailable() {
    let app = create_app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/agents/academia-1/commands",
        Some(json!({"action": "loadUsers", "device_ip": "192.168.2.142"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().contains("academia-1"));
}

#[tokio::test]
async fn test_unknown_action_is_rejected() {
    let app = create_app().await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/agents/academia-1/commands",
        Some(json!({"action": "formatDisk"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_device_crud() {
    let app = create_app().await;
    register_agent(&app, "academia-1", 1).await;

    let (status, created) = call(
        &app,
        "POST",
        "/api/gyms/1/devices",
        Some(reader("academia-1", "192.168.2.142")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["port"], 80);
    assert!(created.get("password").is_none());

    let (status, duplicate) = call(
        &app,
        "POST",
        "/api/gyms/1/devices",
        Some(reader("academia-1", "192.168.2.142")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(duplicate["status"], 409);

    let (_, list) = call(&app, "GET", "/api/gyms/1/devices", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let id = created["id"].as_i64().unwrap();
    let (status, _) = call(&app, "DELETE", &format!("/api/devices/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "DELETE", &format!("/api/devices/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_device_must_belong_to_agents_gym() {
    let app = create_app().await;
    register_agent(&app, "academia-1", 1).await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/gyms/2/devices",
        Some(reader("academia-1", "192.168.2.142")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        "/api/gyms/1/devices",
        Some(reader("academia-9", "192.168.2.142")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_device_command_checks_action_family() {
    let app = create_app().await;
    register_agent(&app, "academia-1", 1).await;
    let (_, created) = call(
        &app,
        "POST",
        "/api/gyms/1/devices",
        Some(reader("academia-1", "192.168.2.142")),
    )
    .await;
    let id = created["id"].as_i64().unwrap();

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/devices/{}/commands", id),
        Some(json!({"action": "toletus_releaseEntry"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Right family, but the agent is offline
    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/devices/{}/commands", id),
        Some(json!({"action": "loadUsers"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = call(&app, "POST", "/api/devices/999/commands", Some(json!({"action": "loadUsers"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notifications_list_and_clear() {
    let app = create_app().await;
    app.hub
        .notifier()
        .add_notification(NewNotification {
            device_ip: "192.168.2.142".to_string(),
            command_id: "enrollFace".to_string(),
            device_type: DeviceType::ControlId,
            agent_id: "academia-1".to_string(),
            request_id: "req-1".to_string(),
            timeout: Duration::from_secs(60),
        })
        .await
        .unwrap();

    let (status, list) = call(&app, "GET", "/api/notifications", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    // Same address and command, but another gym's agent
    let other = "/api/notifications?agent_id=academia-2&device_ip=192.168.2.142&command=enrollFace";
    let (status, _) = call(&app, "DELETE", other, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = "/api/notifications?agent_id=academia-1&device_ip=192.168.2.142&command=enrollFace";
    let (status, _) = call(&app, "DELETE", uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&app, "DELETE", uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reader_status_for_gym() {
    let app = create_app().await;

    let (status, _) = call(&app, "GET", "/api/gyms/1/reader/status", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    register_agent(&app, "academia-1", 1).await;
    call(
        &app,
        "POST",
        "/api/gyms/1/devices",
        Some(reader("academia-1", "192.168.2.142")),
    )
    .await;

    // Agent offline: the reader counts as offline, not as an error
    let (status, body) = call(&app, "GET", "/api/gyms/1/reader/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_ip"], "192.168.2.142");
    assert_eq!(body["online"], false);
}
