//! Persistence seam. `PgStore` backs production, `MemoryStore` backs tests and
//! database-less runs; both honour the same transactional guarantees.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, Order, OrderItem, OrderStatus, PaymentStatus, Product, ShippingAddress, StatusTransition};
use crate::domain::events::OrderSnapshot;
use crate::domain::value_objects::PaymentReference;
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Everything checkout has decided about an order before it is written.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub user_id: Option<Uuid>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub address: ShippingAddress,
    pub items: Vec<NewOrderItem>,
    pub total_price: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub coupon_id: Option<Uuid>,
    pub courier: Option<String>,
    pub courier_service: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub price: Decimal,
    pub size: Option<String>,
}

/// Back-office fields an admin may edit without touching statuses.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FulfilmentUpdate {
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub admin_notes: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn product(&self, id: Uuid) -> Result<Option<Product>>;
    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>>;
    async fn user_email(&self, user_id: Uuid) -> Result<Option<String>>;

    /// Writes address, order and items in one transaction, assigning the
    /// order number and filling the address back-reference.
    async fn create_order(&self, draft: NewOrder) -> Result<OrderSnapshot>;

    async fn order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>>;
    async fn shipping_address(&self, id: Uuid) -> Result<Option<ShippingAddress>>;
    async fn order_by_payment_reference(&self, reference: &PaymentReference) -> Result<Option<Order>>;
    /// Newest first, `page` is 1-based.
    async fn list_orders(&self, page: u32, per_page: u32) -> Result<(Vec<Order>, i64)>;

    async fn save_payment_session(&self, order_id: Uuid, token: &str, url: &str, reference: &PaymentReference) -> Result<()>;

    /// Compare-and-set: writes `transition.to`/`payment_to` only while the order
    /// still holds `from`/`payment_from`. `None` means the order moved underneath.
    async fn apply_transition(&self, order_id: Uuid, transition: &StatusTransition) -> Result<Option<Order>>;

    /// Decrements stock for every line of the order, at most once per order.
    /// Returns `false` when stock was already committed.
    async fn commit_stock(&self, order_id: Uuid) -> Result<bool>;

    /// Records a gateway event key; `false` when it was seen before.
    async fn record_payment_event(&self, key: &str, order_id: Uuid) -> Result<bool>;

    /// Drops a recorded key so a redelivery of a failed event is processed again.
    async fn forget_payment_event(&self, key: &str) -> Result<()>;

    async fn update_fulfilment(&self, order_id: Uuid, update: &FulfilmentUpdate) -> Result<Option<Order>>;

    /// Deletes the order only while it is cancelled.
    async fn delete_cancelled_order(&self, order_id: Uuid) -> Result<bool>;

    /// Fills missing order numbers and total amounts on legacy rows.
    async fn backfill_legacy_orders(&self) -> Result<u64>;
}

/// Builds the in-memory order for a draft; persistence adds the number.
pub(crate) fn draft_order(draft: &NewOrder, address_id: Uuid, now: DateTime<Utc>) -> Order {
    Order {
        id: Uuid::now_v7(),
        order_number: None,
        user_id: draft.user_id,
        guest_name: draft.guest_name.clone(),
        guest_email: draft.guest_email.clone(),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        total_price: draft.total_price,
        total_amount: None,
        shipping_cost: draft.shipping_cost,
        discount: draft.discount,
        courier: draft.courier.clone(),
        courier_service: draft.courier_service.clone(),
        coupon_id: draft.coupon_id,
        shipping_address_id: Some(address_id),
        payment_token: None,
        payment_url: None,
        payment_reference: None,
        tracking_number: None,
        tracking_url: None,
        notes: draft.notes.clone(),
        admin_notes: None,
        stock_committed: false,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn draft_items(draft: &NewOrder, order_id: Uuid) -> Vec<OrderItem> {
    draft.items.iter().map(|item| OrderItem {
        id: Uuid::now_v7(),
        order_id,
        product_id: item.product_id,
        product_name: item.product_name.clone(),
        quantity: item.quantity,
        price: item.price,
        size: item.size.clone(),
    }).collect()
}
