//! HTTP surface. Handlers stay thin: they pull the session cart, call a
//! service, and store whatever cart the service hands back.

mod handlers;

use axum::{http::StatusCode, response::{IntoResponse, Response}, routing::{delete, get, patch, post, put}, Json, Router};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::config::{PaymentConfig, ShippingConfig};
use crate::domain::aggregates::Cart;
use crate::gateway::{CourierRates, PaymentGateway};
use crate::repository::Store;
use crate::services::{
    CheckoutService, EventDispatcher, MailQueue, NotificationHandler, OrderService, PaymentService, ShippingService,
    StockCommitHandler,
};
use crate::StoreError;

/// Session carts keyed by session id. Carts live only as long as the process.
#[derive(Clone, Default)]
pub struct CartSessions {
    carts: Arc<RwLock<HashMap<String, Cart>>>,
}

impl CartSessions {
    pub fn new() -> Self { Self::default() }

    /// The session's cart, or an empty one on first access.
    pub async fn get(&self, session: &str) -> Cart {
        self.carts.read().await.get(session).cloned().unwrap_or_default()
    }

    pub async fn put(&self, session: &str, cart: Cart) {
        self.carts.write().await.insert(session.to_string(), cart);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub carts: CartSessions,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub shipping: Arc<ShippingService>,
}

impl AppState {
    /// Wires the services around one store. Stock is committed before any
    /// customer mail is queued for the same event.
    pub fn new(
        store: Arc<dyn Store>,
        mail: Arc<dyn MailQueue>,
        gateway: Arc<dyn PaymentGateway>,
        rates: Arc<dyn CourierRates>,
        payment: &PaymentConfig,
        shipping: &ShippingConfig,
    ) -> Self {
        let dispatcher = EventDispatcher::new()
            .with_handler(Arc::new(StockCommitHandler::new(store.clone())))
            .with_handler(Arc::new(NotificationHandler::new(store.clone(), mail)));

        let orders = Arc::new(OrderService::new(store.clone(), dispatcher.clone()));
        let checkout = Arc::new(CheckoutService::new(store.clone(), dispatcher));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            gateway,
            orders.clone(),
            payment.server_key.clone(),
            payment.finish_url.clone(),
        ));
        let shipping = Arc::new(ShippingService::new(
            rates,
            shipping.origin_postal_code.clone(),
            shipping.couriers.clone(),
            shipping.item_weight_grams,
        ));
        Self { store, carts: CartSessions::new(), checkout, orders, payments, shipping }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "batik-store"})) }))
        .route("/api/v1/cart/:session", get(handlers::get_cart).post(handlers::add_to_cart).delete(handlers::clear_cart))
        .route("/api/v1/cart/:session/items/:key", patch(handlers::update_cart_item).delete(handlers::remove_cart_item))
        .route("/api/v1/cart/:session/shipping-rates", post(handlers::shipping_rates))
        .route("/api/v1/cart/:session/quote", post(handlers::quote))
        .route("/api/v1/checkout/:session", post(handlers::checkout))
        .route("/api/v1/payments/notifications", post(handlers::payment_notification))
        .route("/api/v1/orders/:id", get(handlers::get_order))
        .route("/api/v1/orders/:id/payment", post(handlers::retry_payment))
        .route("/api/v1/orders/:id/payment-status", post(handlers::sync_payment_status))
        .route("/api/v1/orders/:id/cancel", post(handlers::cancel_order))
        .route("/api/v1/admin/orders", get(handlers::list_orders))
        .route("/api/v1/admin/orders/:id", delete(handlers::delete_order))
        .route("/api/v1/admin/orders/:id/status", put(handlers::update_status))
        .route("/api/v1/admin/orders/:id/fulfilment", put(handlers::update_fulfilment))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

const TRY_AGAIN: &str = "Something went wrong, please try again";

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            StoreError::Validation(_)
            | StoreError::InsufficientStock { .. }
            | StoreError::InvalidCoupon(_)
            | StoreError::InvariantViolation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            StoreError::Unauthorized(_) => (StatusCode::FORBIDDEN, self.to_string()),
            StoreError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            StoreError::Gateway(_) => {
                error!(error = %self, "gateway failure");
                (StatusCode::BAD_GATEWAY, TRY_AGAIN.to_string())
            }
            StoreError::Queue(_) | StoreError::Config(_) | StoreError::Storage(_) => {
                error!(error = %self, "internal failure");
                (StatusCode::INTERNAL_SERVER_ERROR, TRY_AGAIN.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
