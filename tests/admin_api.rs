mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use batik_store::api;
use batik_store::domain::aggregates::OrderStatus;
use batik_store::repository::Store;
use common::{checkout_request, World};

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_as(app, None, method, uri, body).await
}

async fn send_as(app: &Router, user: Option<Uuid>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        request = request.header("x-user-id", user.to_string());
    }
    let request = request.body(body.map_or_else(Body::empty, |b| Body::from(b.to_string()))).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_admin_order_lifecycle() {
    let world = World::new().await;
    for _ in 0..3 {
        world.state.checkout.place_order(&world.cart(), checkout_request(None, None, None)).await.unwrap();
    }
    let app = api::router(world.state.clone());

    let (status, page) = send(&app, "GET", "/api/v1/admin/orders?page=1&per_page=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    let id = page["data"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "PUT", &format!("/api/v1/admin/orders/{id}/status"), Some(json!({ "status": "lost" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/admin/orders/{id}"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, order) = send(&app, "PUT", &format!("/api/v1/admin/orders/{id}/fulfilment"),
        Some(json!({ "tracking_number": "JNE123", "admin_notes": "packed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["tracking_number"], "JNE123");

    let (status, order) = send(&app, "PUT", &format!("/api/v1/admin/orders/{id}/status"), Some(json!({ "status": "cancelled" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "cancelled");
    assert_eq!(world.mail.queued().await.len(), 0);

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/admin/orders/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", &format!("/api/v1/orders/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_forged_webhook_forbidden() {
    let world = World::new().await;
    let app = api::router(world.state.clone());
    let body = json!({
        "order_id": "unknown-1", "transaction_status": "settlement", "status_code": "200",
        "gross_amount": "1000.00", "signature_key": "deadbeef"
    });
    let (status, reply) = send(&app, "POST", "/api/v1/payments/notifications", Some(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(reply["error"].is_string());
}

#[tokio::test]
async fn test_only_owner_cancels_order() {
    let world = World::new().await;
    let owned = world.state.checkout
        .place_order(&world.cart(), checkout_request(Some(world.user_id), None, None))
        .await
        .unwrap()
        .snapshot
        .order;
    let guest = world.state.checkout
        .place_order(&world.cart(), checkout_request(None, Some("tamu@example.com"), None))
        .await
        .unwrap()
        .snapshot
        .order;
    let app = api::router(world.state.clone());
    let cancel = |id: Uuid| format!("/api/v1/orders/{id}/cancel");

    let (status, _) = send(&app, "POST", &cancel(owned.id), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send_as(&app, Some(Uuid::new_v4()), "POST", &cancel(owned.id), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send_as(&app, Some(world.user_id), "POST", &cancel(guest.id), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send_as(&app, Some(world.user_id), "POST", &cancel(Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(world.store.order(owned.id).await.unwrap().unwrap().status, OrderStatus::Pending);

    let (status, order) = send_as(&app, Some(world.user_id), "POST", &cancel(owned.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "cancelled");
    assert_eq!(world.store.order(guest.id).await.unwrap().unwrap().status, OrderStatus::Pending);
}
