use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bond_api::{build_router, AppState};
use bond_engine::{BondEngine, EngineConfig};
use bond_storage::MemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_app() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = BondEngine::new(store.clone(), EngineConfig::default()).unwrap();
    (build_router(Arc::new(AppState::new(engine))), store)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn bond_with(app: &Router, owner: &str, others: &[&str]) -> String {
    let (status, bond) = call(app, "POST", "/api/bonds", Some(owner), Some(json!({"name": "Home"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let bond_id = bond["id"].as_str().unwrap().to_string();
    for other in others {
        let (status, _) = call(app, "POST", &format!("/api/bonds/{}/join", bond_id), Some(*other), None).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    bond_id
}

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_identity_is_unauthenticated() {
    let (app, _) = test_app();
    let (status, body) = call(&app, "GET", "/api/bonds", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], 401);
}

#[tokio::test]
async fn test_bearer_identity_is_accepted() {
    let (app, _) = test_app();
    bond_with(&app, "alice", &[]).await;

    let request = Request::builder()
        .uri("/api/bonds")
        .header("authorization", "Bearer alice")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_co_signature_flow() {
    let (app, _) = test_app();
    let bond_id = bond_with(&app, "alice", &["carol"]).await;

    let (status, contract) = call(
        &app,
        "POST",
        &format!("/api/bonds/{}/contracts", bond_id),
        Some("alice"),
        Some(json!({"title": "Chores", "terms": "Alternate dishes", "propose": true})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(contract["status"], "pending_signature");
    let contract_uri = format!("/api/contracts/{}", contract["id"].as_str().unwrap());

    let (status, signed) = call(&app, "POST", &format!("{}/sign", contract_uri), Some("alice"), Some(json!({"payload": {"initials": "A"}}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(signed["activated"], false);

    let (_, view) = call(&app, "GET", &contract_uri, Some("carol"), None).await;
    assert_eq!(view["missing"], json!(["carol"]));
    assert_eq!(view["quorum_satisfied"], false);

    let (status, signed) = call(&app, "POST", &format!("{}/sign", contract_uri), Some("carol"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(signed["activated"], true);
    assert_eq!(signed["contract"]["status"], "active");

    let (status, evaluated) = call(&app, "POST", &format!("{}/evaluate", contract_uri), Some("carol"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(evaluated["activated"], false);

    let (status, body) = call(&app, "POST", &format!("{}/sign", contract_uri), Some("carol"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], 409);

    let (_, activity) = call(&app, "GET", &format!("/api/bonds/{}/activity", bond_id), Some("alice"), None).await;
    let activations = activity
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["event_type"] == "contract_activated")
        .count();
    assert_eq!(activations, 1);
}

#[tokio::test]
async fn test_error_statuses() {
    let (app, _) = test_app();
    let bond_id = bond_with(&app, "alice", &["carol"]).await;

    let (status, _) = call(&app, "POST", &format!("/api/bonds/{}/join", bond_id), Some("carol"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, "GET", &format!("/api/bonds/{}/members", bond_id), Some("mallory"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, "GET", "/api/bonds/not-a-uuid/members", Some("alice"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 400);

    let missing = format!("/api/contracts/{}", bond_common::ContractId::generate());
    let (status, _) = call(&app, "GET", &missing, Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/bonds/{}/contracts", bond_id),
        Some("alice"),
        Some(json!({"title": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/bonds/{}/tasks/t1/complete", bond_id),
        Some("alice"),
        Some(json!({"points": "ten"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_points_endpoints() {
    let (app, _) = test_app();
    let bond_id = bond_with(&app, "alice", &["carol"]).await;
    let task_uri = format!("/api/bonds/{}/tasks/laundry/complete", bond_id);

    let (status, award) = call(&app, "POST", &task_uri, Some("alice"), Some(json!({"points": 10}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(award["balance"], 10);
    let (status, _) = call(&app, "POST", &task_uri, Some("alice"), Some(json!({"points": 10}))).await;
    assert_eq!(status, StatusCode::OK);

    let redeem = Request::builder()
        .method("POST")
        .uri(format!("/api/bonds/{}/rewards/movie/redeem", bond_id))
        .header("x-user-id", "alice")
        .header("idempotency-key", "r-1")
        .header("content-type", "application/json")
        .body(Body::from(json!({"cost": 15}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(redeem).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let blank_key = Request::builder()
        .method("POST")
        .uri(format!("/api/bonds/{}/rewards/movie/redeem", bond_id))
        .header("x-user-id", "alice")
        .header("idempotency-key", "   ")
        .header("content-type", "application/json")
        .body(Body::from(json!({"cost": 15}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(blank_key).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/bonds/{}/adjustments", bond_id),
        Some("alice"),
        Some(json!({"user_id": "alice", "delta": 100})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, report) = call(&app, "GET", "/api/points/balance", Some("alice"), None).await;
    assert_eq!(report["balance"], -5);
    assert_eq!(report["overdrawn"], true);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/bonds/{}/adjustments", bond_id),
        Some("carol"),
        Some(json!({"user_id": "alice", "delta": 5, "note": "makeup"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(&app, "POST", &format!("/api/bonds/{}/check-in", bond_id), Some("alice"), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, history) = call(&app, "GET", "/api/points/history", Some("alice"), None).await;
    assert_eq!(history.as_array().unwrap().len(), 4);

    let (_, streak) = call(&app, "GET", "/api/points/streak", Some("alice"), None).await;
    assert_eq!(streak["current"], 1);

    let (status, prefs) = call(&app, "PUT", "/api/me/timezone", Some("alice"), Some(json!({"utc_offset_minutes": 120}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(prefs["utc_offset_minutes"], 120);
    let (status, _) = call(&app, "PUT", "/api/me/timezone", Some("alice"), Some(json!({"utc_offset_minutes": 9000}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, "PUT", "/api/me/timezone", Some("alice"), Some(json!({"utc_offset_minutes": i32::MIN}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_notifications_endpoints() {
    let (app, _) = test_app();
    let bond_id = bond_with(&app, "alice", &["carol"]).await;
    call(
        &app,
        "POST",
        &format!("/api/bonds/{}/achievements/first-week/unlock", bond_id),
        Some("alice"),
        Some(json!({"points": 50})),
    )
    .await;

    let (status, unread) = call(&app, "GET", "/api/notifications?unread=true", Some("carol"), None).await;
    assert_eq!(status, StatusCode::OK);
    let unread = unread.as_array().unwrap().clone();
    assert_eq!(unread[0]["event_type"], "achievement_unlocked");

    let id = unread[0]["id"].as_str().unwrap();
    let (status, _) = call(&app, "POST", &format!("/api/notifications/{}/read", id), Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, read) = call(&app, "POST", &format!("/api/notifications/{}/read", id), Some("carol"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(read["read_at"].is_string());

    let (_, remaining) = call(&app, "GET", "/api/notifications?unread=true", Some("carol"), None).await;
    assert_eq!(remaining.as_array().unwrap().len(), unread.len() - 1);
}

#[tokio::test]
async fn test_store_failure_does_not_leak_details() {
    let (app, store) = test_app();
    store.set_unavailable(true);

    let (status, body) = call(&app, "GET", "/api/points/balance", Some("alice"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["message"], "internal error");

    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
}
