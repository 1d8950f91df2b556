mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tower::ServiceExt;

use batik_store::api;
use batik_store::domain::aggregates::{OrderStatus, PaymentStatus};
use batik_store::services::MailKind;
use batik_store::StoreError;
use common::{checkout_request, World};

#[tokio::test]
async fn test_checkout_with_coupon_and_shipping() {
    let world = World::new().await;
    let cart = world.cart();

    let placed = world.state.checkout
        .place_order(&cart, checkout_request(Some(world.user_id), None, Some("hemat15")))
        .await
        .unwrap();
    assert!(placed.cart.is_empty());

    let order = &placed.snapshot.order;
    assert_eq!(placed.snapshot.items.len(), 2);
    let lines: Decimal = placed.snapshot.items.iter().map(|i| i.line_total()).sum();
    assert_eq!(lines, dec!(750000));
    assert_eq!(order.discount, dec!(112500));
    assert_eq!(order.shipping_cost, dec!(18000));
    assert_eq!(order.total_price, lines + order.shipping_cost - order.discount);
    assert_eq!(order.total_amount, Some(order.total_price));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.order_number.is_some());

    let payment = world.state.payments.create_session(order.id).await;
    assert!(payment.success, "{:?}", payment.message);
    let request = world.gateway.last_request().unwrap();
    assert_eq!(request.transaction_details.gross_amount, 655_500);
    let listed: i64 = request.item_details.iter().map(|d| d.price * i64::from(d.quantity)).sum();
    assert_eq!(listed, request.transaction_details.gross_amount);

    let stored = world.state.orders.detail(order.id).await.unwrap();
    assert_eq!(stored.order.payment_token, payment.token);
    assert_eq!(stored.shipping_address.unwrap().order_id, Some(order.id));

    // Asking again hands back the stored session.
    let again = world.state.payments.create_session(order.id).await;
    assert_eq!(again.token, payment.token);
    assert_eq!(world.gateway.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_insufficient_stock_writes_nothing() {
    let world = World::new().await;
    let mut restocked = world.kemeja.clone();
    restocked.sizes[1].stock = 10;
    let cart = batik_store::domain::aggregates::Cart::new()
        .add(&world.kain, 1, None).unwrap()
        .add(&restocked, 5, Some("M")).unwrap();

    let err = world.state.checkout
        .place_order(&cart, checkout_request(Some(world.user_id), None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InsufficientStock { ref size, .. } if size.as_deref() == Some("M")));
    assert_eq!(world.store.order_count().await, 0);
    assert!(world.mail.queued().await.is_empty());
}

#[tokio::test]
async fn test_creation_mails_follow_recipient() {
    let world = World::new().await;

    world.state.checkout.place_order(&world.cart(), checkout_request(Some(world.user_id), None, None)).await.unwrap();
    let mails = world.mail.queued().await;
    assert_eq!(mails.iter().map(|m| m.kind).collect::<Vec<_>>(), [MailKind::OrderConfirmation, MailKind::PaymentInstructions]);
    assert!(mails.iter().all(|m| m.to == "sari@example.com"));

    world.state.checkout.place_order(&world.cart(), checkout_request(None, None, None)).await.unwrap();
    assert_eq!(world.mail.queued().await.len(), 2);

    world.state.checkout.place_order(&world.cart(), checkout_request(None, Some("tamu@example.com"), None)).await.unwrap();
    assert_eq!(world.mail.queued().await.len(), 4);
}

#[tokio::test]
async fn test_rejected_coupons() {
    let world = World::new().await;
    for code in ["LAMA", "NOPE"] {
        let err = world.state.checkout
            .place_order(&world.cart(), checkout_request(Some(world.user_id), None, Some(code)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidCoupon(_)), "{code}: {err}");
    }
    assert_eq!(world.store.order_count().await, 0);
}

#[tokio::test]
async fn test_quote_applies_and_removes_coupon() {
    let world = World::new().await;
    let cart = world.cart();
    let with = world.state.checkout.quote(&cart, Some("HEMAT15"), dec!(18000)).await.unwrap();
    let without = world.state.checkout.quote(&cart, None, dec!(18000)).await.unwrap();
    assert_eq!(with.totals.discount, dec!(112500));
    assert_eq!(without.totals.total, dec!(768000));
    assert_eq!(with.coupon_code.as_deref(), Some("HEMAT15"));
}

#[tokio::test]
async fn test_payment_failure_is_structured() {
    let world = World::new().await;
    let placed = world.state.checkout.place_order(&world.cart(), checkout_request(None, None, None)).await.unwrap();
    *world.gateway.fail_sessions.lock().unwrap() = true;

    let result = world.state.payments.create_session(placed.snapshot.order.id).await;
    assert!(!result.success);
    assert!(result.token.is_none());
    assert!(!result.message.unwrap().contains("unauthorized"));
}

#[tokio::test]
async fn test_checkout_over_http() {
    let world = World::new().await;
    let app = api::router(world.state.clone());

    let add = serde_json::json!({ "product_id": world.kemeja.id, "quantity": 1, "size": "S" });
    let response = app.clone()
        .oneshot(Request::post("/api/v1/cart/sess-1").header("content-type", "application/json").body(Body::from(add.to_string())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cart: serde_json::Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    let key = format!("{}-S", world.kemeja.id);
    assert_eq!(cart["items"][&key]["quantity"], 1);
    assert_eq!(cart["total"], 250000.0);

    let body = serde_json::json!({
        "guest_name": "Sari",
        "address": {
            "full_name": "Sari Wulandari", "address": "Jl. Malioboro 12", "city": "Yogyakarta",
            "province": "DI Yogyakarta", "postal_code": "55271", "phone": "081234567890"
        },
        "shipping": { "courier": "jne", "service": "reg", "cost": 18000 }
    });
    let response = app.clone()
        .oneshot(Request::post("/api/v1/checkout/sess-1").header("content-type", "application/json").body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let placed: serde_json::Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(placed["payment"]["success"], true);
    assert!(placed["order"]["order"]["order_number"].as_str().unwrap().starts_with("ORD-"));

    assert!(world.state.carts.get("sess-1").await.is_empty());
}

#[tokio::test]
async fn test_empty_cart_checkout_rejected_over_http() {
    let world = World::new().await;
    let app = api::router(world.state.clone());
    let body = serde_json::json!({
        "guest_name": "Sari",
        "address": {
            "full_name": "Sari", "address": "Jl. Solo 1", "city": "Solo",
            "province": "Jawa Tengah", "postal_code": "57111", "phone": "081234567890"
        },
        "shipping": { "courier": "jne", "service": "reg", "cost": 18000 }
    });
    let response = app
        .oneshot(Request::post("/api/v1/checkout/empty").header("content-type", "application/json").body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
