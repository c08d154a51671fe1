mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use flick::handlers::router;

async fn call(h: &Harness, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = router(h.core.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn user_json(id: &str, gender: &str, looking_for: &str, phone: &str, east_meters: f64) -> Value {
    let location = east_of_origin(east_meters);
    json!({
        "id": id,
        "name": id,
        "age": 25,
        "gender": gender,
        "looking_for": looking_for,
        "phone_number": phone,
        "location": { "latitude": location.latitude, "longitude": location.longitude },
    })
}

#[tokio::test]
async fn test_health() {
    let h = harness(settings());
    let response = router(h.core.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_flick_and_exchange_flow() {
    let h = harness(settings());
    let (status, _) = call(&h, Method::POST, "/api/users", Some(user_json("alice", "female", "male", "555-0100", 0.0))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&h, Method::POST, "/api/users", Some(user_json("bob", "male", "female", "555-0200", 40.0))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&h, Method::POST, "/api/flicks", Some(json!({"from_user_id": "bob", "to_user_id": "alice"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());

    let (_, body) = call(&h, Method::POST, "/api/flicks", Some(json!({"from_user_id": "alice", "to_user_id": "bob"}))).await;
    assert_eq!(body["outcome"], "sent");
    let (_, body) = call(&h, Method::POST, "/api/flicks", Some(json!({"from_user_id": "bob", "to_user_id": "alice"}))).await;
    assert_eq!(body["outcome"], "matched");

    let (_, body) = call(&h, Method::GET, "/api/users/alice/matches", None).await;
    assert_eq!(body[0]["user_id"], "bob");

    let (status, body) = call(&h, Method::POST, "/api/exchanges", Some(json!({"from_user_id": "alice", "to_user_id": "bob"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], true);
    assert_eq!(body["exchange"]["their_phone"], Value::Null);
    let exchange_id = body["exchange"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &h,
        Method::POST,
        &format!("/api/exchanges/{}/accept", exchange_id),
        Some(json!({"user_id": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["their_phone"], "555-0100");

    let (_, body) = call(&h, Method::GET, "/api/users/alice/exchange", None).await;
    assert_eq!(body["their_phone"], "555-0200");

    let (_, body) = call(
        &h,
        Method::POST,
        &format!("/api/exchanges/{}/close", exchange_id),
        Some(json!({"user_id": "alice"})),
    )
    .await;
    assert_eq!(body["destroyed"], true);
    let (_, body) = call(&h, Method::GET, "/api/users/alice/exchange", None).await;
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_nearby_endpoint() {
    let h = harness(settings());
    call(&h, Method::POST, "/api/users", Some(user_json("alice", "female", "male", "555-0100", 0.0))).await;
    call(&h, Method::POST, "/api/users", Some(user_json("bob", "male", "female", "555-0200", 40.0))).await;
    call(&h, Method::POST, "/api/users", Some(user_json("carl", "male", "female", "555-0300", 400.0))).await;

    let origin = origin();
    let (status, body) = call(
        &h,
        Method::POST,
        "/api/nearby",
        Some(json!({
            "user_id": "alice",
            "location": { "latitude": origin.latitude, "longitude": origin.longitude },
            "filter_by_preferences": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let users = body.as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], "bob");
    assert_eq!(users[0]["distance_meters"], 40);
    assert!(users[0].get("phone_number").is_none());
}

#[tokio::test]
async fn test_error_statuses() {
    let h = harness(settings());

    let (status, _) = call(
        &h,
        Method::POST,
        "/api/nearby",
        Some(json!({"user_id": "alice", "location": {"latitude": 95.0, "longitude": 0.0}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&h, Method::POST, "/api/users/ghost/status", Some(json!({"status": true}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&h, Method::POST, "/api/heartbeat", Some(json!({"user_id": "ghost"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    h.store.fail_next(10);
    let (status, _) = call(&h, Method::GET, "/api/users/alice/matches", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_status_and_logout() {
    let h = harness(settings());
    call(&h, Method::POST, "/api/users", Some(user_json("alice", "female", "male", "555-0100", 0.0))).await;

    let (status, body) = call(&h, Method::POST, "/api/users/alice/status", Some(json!({"status": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["heartbeat_running"], true);

    let (status, body) = call(&h, Method::POST, "/api/logout", Some(json!({"user_id": "alice"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_stopped"], true);
    assert_eq!(body["user_deleted"], true);
}

#[tokio::test]
async fn test_festival_room_flow() {
    let h = harness(settings());
    call(&h, Method::POST, "/api/users", Some(user_json("alice", "female", "male", "555-0100", 0.0))).await;
    call(&h, Method::POST, "/api/users", Some(user_json("bob", "male", "female", "555-0200", 30.0))).await;
    call(&h, Method::POST, "/api/users", Some(user_json("carol", "male", "female", "555-0300", 40.0))).await;

    let (status, _) = call(
        &h,
        Method::POST,
        "/api/festivals",
        Some(json!({"id": "coachella2024", "name": "Coachella 2024", "sponsor": "Heineken"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&h, Method::POST, "/api/festivals/join", Some(json!({"user_id": "alice", "festival_id": "unknown"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    for id in ["alice", "bob"] {
        let (status, body) = call(&h, Method::POST, "/api/festivals/join", Some(json!({"user_id": id, "festival_id": "coachella2024"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Coachella 2024");
    }

    let (status, body) = call(&h, Method::GET, "/api/users/alice/festival", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "coachella2024");

    let location = origin();
    let (_, body) = call(
        &h,
        Method::POST,
        "/api/nearby",
        Some(json!({"user_id": "alice", "location": {"latitude": location.latitude, "longitude": location.longitude}})),
    )
    .await;
    let nearby = body.as_array().unwrap();
    assert_eq!(nearby.len(), 1);
    assert_eq!(nearby[0]["id"], "bob");

    let (status, body) = call(&h, Method::GET, "/api/festivals/coachella2024/members/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert!(body[0].get("phone_number").is_none());

    let (_, body) = call(&h, Method::GET, "/api/festivals/coachella2024/stats", None).await;
    assert_eq!(body["active_users"], 2);
    assert_eq!(body["matches"], 0);

    let (_, body) = call(&h, Method::POST, "/api/festivals/leave", Some(json!({"user_id": "bob"}))).await;
    assert_eq!(body["left"], true);
    let (status, _) = call(&h, Method::GET, "/api/festivals/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
