use axum::{extract::{Path, Query, State}, http::{HeaderMap, StatusCode}, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::domain::aggregates::{Cart, Order, OrderStatus};
use crate::domain::events::OrderSnapshot;
use crate::domain::value_objects::ItemKey;
use crate::gateway::TransactionReport;
use crate::repository::FulfilmentUpdate;
use crate::services::{CheckoutRequest, OrderDetail, PaymentResult, Quote, RateQuote, ReconcileOutcome, StatusCheck};
use crate::{Result, StoreError};

/// Set by the authenticating proxy in front of this service.
const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)] pub struct AddToCartRequest { pub product_id: Uuid, pub quantity: u32, pub size: Option<String> }
#[derive(Debug, Deserialize)] pub struct UpdateQuantityRequest { pub quantity: u32 }
#[derive(Debug, Deserialize)] pub struct RatesRequest { pub destination_postal_code: String, pub couriers: Option<Vec<String>> }
#[derive(Debug, Deserialize)] pub struct QuoteRequest { pub coupon_code: Option<String>, pub shipping_cost: Option<Decimal> }
#[derive(Debug, Deserialize)] pub struct StatusRequest { pub status: OrderStatus }
#[derive(Debug, Deserialize)] pub struct ListParams { pub page: Option<u32>, pub per_page: Option<u32> }
#[derive(Debug, Serialize)] pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: i64, pub page: u32 }

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order: OrderSnapshot,
    pub payment: PaymentResult,
}

pub async fn get_cart(State(s): State<AppState>, Path(session): Path<String>) -> Json<Cart> {
    Json(s.carts.get(&session).await)
}

pub async fn add_to_cart(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<AddToCartRequest>) -> Result<Json<Cart>> {
    let product = s.store.product(r.product_id).await?.ok_or_else(|| StoreError::NotFound(format!("Product {}", r.product_id)))?;
    let cart = s.carts.get(&session).await.add(&product, r.quantity, r.size.as_deref())?;
    s.carts.put(&session, cart.clone()).await;
    Ok(Json(cart))
}

pub async fn update_cart_item(State(s): State<AppState>, Path((session, key)): Path<(String, String)>, Json(r): Json<UpdateQuantityRequest>) -> Result<Json<Cart>> {
    let cart = s.carts.get(&session).await.update_quantity(&ItemKey::from(key.as_str()), r.quantity)?;
    s.carts.put(&session, cart.clone()).await;
    Ok(Json(cart))
}

pub async fn remove_cart_item(State(s): State<AppState>, Path((session, key)): Path<(String, String)>) -> Result<Json<Cart>> {
    let cart = s.carts.get(&session).await.remove(&ItemKey::from(key.as_str()))?;
    s.carts.put(&session, cart.clone()).await;
    Ok(Json(cart))
}

pub async fn clear_cart(State(s): State<AppState>, Path(session): Path<String>) -> Json<Cart> {
    let cart = s.carts.get(&session).await.cleared();
    s.carts.put(&session, cart.clone()).await;
    Json(cart)
}

pub async fn shipping_rates(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<RatesRequest>) -> Json<RateQuote> {
    let cart = s.carts.get(&session).await;
    Json(s.shipping.rates_for_cart(&cart, &r.destination_postal_code, r.couriers).await)
}

pub async fn quote(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<QuoteRequest>) -> Result<Json<Quote>> {
    let cart = s.carts.get(&session).await;
    let quote = s.checkout.quote(&cart, r.coupon_code.as_deref(), r.shipping_cost.unwrap_or(Decimal::ZERO)).await?;
    Ok(Json(quote))
}

/// Places the order, then opens its payment session. A failed session still
/// leaves a placed order the customer can pay for later.
pub async fn checkout(
    State(s): State<AppState>,
    Path(session): Path<String>,
    headers: HeaderMap,
    Json(mut r): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>)> {
    r.user_id = user_id(&headers)?;
    let cart = s.carts.get(&session).await;
    let placed = s.checkout.place_order(&cart, r).await?;
    s.carts.put(&session, placed.cart).await;

    let payment = s.payments.create_session(placed.snapshot.order.id).await;
    let order = match s.store.order(placed.snapshot.order.id).await? {
        Some(order) => OrderSnapshot { order, items: placed.snapshot.items },
        None => placed.snapshot,
    };
    Ok((StatusCode::CREATED, Json(CheckoutResponse { order, payment })))
}

pub async fn payment_notification(State(s): State<AppState>, Json(report): Json<TransactionReport>) -> Result<Json<ReconcileOutcome>> {
    Ok(Json(s.payments.handle_notification(report).await?))
}

pub async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OrderDetail>> {
    Ok(Json(s.orders.detail(id).await?))
}

pub async fn retry_payment(State(s): State<AppState>, Path(id): Path<Uuid>) -> Json<PaymentResult> {
    Json(s.payments.create_session(id).await)
}

pub async fn sync_payment_status(State(s): State<AppState>, Path(id): Path<Uuid>) -> Json<StatusCheck> {
    Json(s.payments.sync_status(id).await)
}

pub async fn cancel_order(State(s): State<AppState>, Path(id): Path<Uuid>, headers: HeaderMap) -> Result<Json<Order>> {
    let user = user_id(&headers)?.ok_or_else(|| StoreError::Unauthorized("sign in to cancel an order".into()))?;
    Ok(Json(s.orders.cancel_for_customer(id, user).await?))
}

pub async fn list_orders(State(s): State<AppState>, Query(p): Query<ListParams>) -> Result<Json<PaginatedResponse<Order>>> {
    let page = p.page.unwrap_or(1).max(1);
    let (data, total) = s.orders.list(page, p.per_page.unwrap_or(20)).await?;
    Ok(Json(PaginatedResponse { data, total, page }))
}

pub async fn update_status(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<StatusRequest>) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_status(id, r.status).await?))
}

pub async fn update_fulfilment(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<FulfilmentUpdate>) -> Result<Json<Order>> {
    Ok(Json(s.orders.update_fulfilment(id, r).await?))
}

pub async fn delete_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    s.orders.delete_cancelled(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn user_id(headers: &HeaderMap) -> Result<Option<Uuid>> {
    let Some(raw) = headers.get(USER_HEADER) else { return Ok(None) };
    raw.to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .map(Some)
        .ok_or_else(|| StoreError::Validation(format!("{USER_HEADER} is not a valid user id")))
}
