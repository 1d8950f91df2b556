//! In-process store. Every operation takes the single state lock, so each one
//! is all-or-nothing just like a database transaction.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{draft_items, draft_order, FulfilmentUpdate, NewOrder, Store};
use crate::domain::aggregates::{Coupon, Order, OrderItem, OrderStatus, Product, ShippingAddress, StatusTransition};
use crate::domain::events::OrderSnapshot;
use crate::domain::value_objects::{OrderNumber, PaymentReference};
use crate::{Result, StoreError};

#[derive(Default)]
struct State {
    products: HashMap<Uuid, Product>,
    coupons: HashMap<String, Coupon>,
    users: HashMap<Uuid, String>,
    addresses: HashMap<Uuid, ShippingAddress>,
    orders: HashMap<Uuid, Order>,
    items: HashMap<Uuid, Vec<OrderItem>>,
    payment_events: HashSet<String>,
}

impl State {
    fn next_number(&self, date: chrono::NaiveDate) -> OrderNumber {
        let prefix = OrderNumber::day_prefix(date);
        let highest = self.orders.values()
            .filter_map(|o| o.order_number.as_ref())
            .filter(|n| n.as_str().starts_with(&prefix))
            .filter_map(OrderNumber::sequence)
            .max()
            .unwrap_or(0);
        OrderNumber::new(date, highest.saturating_add(1))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn insert_coupon(&self, coupon: Coupon) {
        let code = Coupon::normalize_code(&coupon.code);
        self.state.lock().await.coupons.insert(code, coupon);
    }

    pub async fn insert_user(&self, user_id: Uuid, email: impl Into<String>) {
        self.state.lock().await.users.insert(user_id, email.into());
    }

    /// Stores an order as-is, e.g. a legacy row without a number.
    pub async fn insert_order(&self, order: Order, items: Vec<OrderItem>) {
        let mut state = self.state.lock().await;
        state.items.insert(order.id, items);
        state.orders.insert(order.id, order);
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.state.lock().await.coupons.get(&Coupon::normalize_code(code)).cloned())
    }

    async fn user_email(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn create_order(&self, draft: NewOrder) -> Result<OrderSnapshot> {
        if draft.items.is_empty() {
            return Err(StoreError::Validation("An order needs at least one item".into()));
        }
        let mut state = self.state.lock().await;

        let address_id = Uuid::now_v7();
        let mut order = draft_order(&draft, address_id, Utc::now());
        order.apply_creation_defaults(|date| state.next_number(date));
        let items = draft_items(&draft, order.id);

        let mut address = draft.address;
        address.id = address_id;
        if address.order_id.is_none() {
            address.order_id = Some(order.id);
        }

        state.addresses.insert(address_id, address);
        state.items.insert(order.id, items.clone());
        state.orders.insert(order.id, order.clone());
        Ok(OrderSnapshot { order, items })
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        Ok(self.state.lock().await.items.get(&order_id).cloned().unwrap_or_default())
    }

    async fn shipping_address(&self, id: Uuid) -> Result<Option<ShippingAddress>> {
        Ok(self.state.lock().await.addresses.get(&id).cloned())
    }

    async fn order_by_payment_reference(&self, reference: &PaymentReference) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.values()
            .find(|o| o.payment_reference.as_ref() == Some(reference))
            .cloned())
    }

    async fn list_orders(&self, page: u32, per_page: u32) -> Result<(Vec<Order>, i64)> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = orders.len() as i64;
        let skip = (page.max(1) as usize - 1) * per_page as usize;
        Ok((orders.into_iter().skip(skip).take(per_page as usize).collect(), total))
    }

    async fn save_payment_session(&self, order_id: Uuid, token: &str, url: &str, reference: &PaymentReference) -> Result<()> {
        let mut state = self.state.lock().await;
        let order = state.orders.get_mut(&order_id).ok_or_else(|| StoreError::NotFound(format!("Order {order_id}")))?;
        order.payment_token = Some(token.to_string());
        order.payment_url = Some(url.to_string());
        order.payment_reference = Some(reference.clone());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn apply_transition(&self, order_id: Uuid, transition: &StatusTransition) -> Result<Option<Order>> {
        let mut state = self.state.lock().await;
        let order = state.orders.get_mut(&order_id).ok_or_else(|| StoreError::NotFound(format!("Order {order_id}")))?;
        if order.status != transition.from || order.payment_status != transition.payment_from {
            return Ok(None);
        }
        order.apply(transition);
        Ok(Some(order.clone()))
    }

    async fn commit_stock(&self, order_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let order = state.orders.get_mut(&order_id).ok_or_else(|| StoreError::NotFound(format!("Order {order_id}")))?;
        if order.stock_committed {
            return Ok(false);
        }
        order.stock_committed = true;
        for item in state.items.get(&order_id).into_iter().flatten() {
            if let Some(product) = state.products.get_mut(&item.product_id) {
                product.decrement(item.size.as_deref(), item.quantity);
            }
        }
        Ok(true)
    }

    async fn record_payment_event(&self, key: &str, _order_id: Uuid) -> Result<bool> {
        Ok(self.state.lock().await.payment_events.insert(key.to_string()))
    }

    async fn forget_payment_event(&self, key: &str) -> Result<()> {
        self.state.lock().await.payment_events.remove(key);
        Ok(())
    }

    async fn update_fulfilment(&self, order_id: Uuid, update: &FulfilmentUpdate) -> Result<Option<Order>> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get_mut(&order_id) else { return Ok(None) };
        if update.tracking_number.is_some() { order.tracking_number = update.tracking_number.clone(); }
        if update.tracking_url.is_some() { order.tracking_url = update.tracking_url.clone(); }
        if update.admin_notes.is_some() { order.admin_notes = update.admin_notes.clone(); }
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn delete_cancelled_order(&self, order_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.orders.get(&order_id).is_some_and(|o| o.status == OrderStatus::Cancelled) {
            return Ok(false);
        }
        if let Some(order) = state.orders.remove(&order_id) {
            if let Some(address_id) = order.shipping_address_id {
                state.addresses.remove(&address_id);
            }
        }
        state.items.remove(&order_id);
        Ok(true)
    }

    async fn backfill_legacy_orders(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut pending: Vec<Order> = state.orders.values()
            .filter(|o| o.order_number.is_none() || o.total_amount.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|o| o.created_at);

        let mut fixed = 0;
        for mut order in pending {
            if order.apply_creation_defaults(|date| state.next_number(date)) {
                fixed += 1;
                state.orders.insert(order.id, order);
            }
        }
        Ok(fixed)
    }
}
