//! Checkout: turns a session cart into a persisted order.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::EventDispatcher;
use crate::domain::aggregates::{Cart, Coupon, ShippingAddress};
use crate::domain::events::{OrderEvent, OrderSnapshot};
use crate::repository::{NewOrder, NewOrderItem, Store};
use crate::{Result, StoreError};

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ShippingSelection {
    #[validate(length(min = 1, max = 50))]
    pub courier: String,
    #[validate(length(min = 1, max = 50))]
    pub service: String,
    #[validate(custom = "non_negative")]
    pub cost: Decimal,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    /// Set by the caller from the authenticated session, never from the body.
    #[serde(skip)]
    pub user_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub guest_name: Option<String>,
    #[validate(email)]
    pub guest_email: Option<String>,
    #[validate]
    pub address: ShippingAddress,
    #[validate]
    pub shipping: ShippingSelection,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[validate(length(max = 1000))]
    #[serde(default)]
    pub notes: Option<String>,
}

fn non_negative(value: &Decimal) -> std::result::Result<(), ValidationError> {
    if value.is_sign_negative() {
        return Err(ValidationError::new("negative"));
    }
    Ok(())
}

/// Money breakdown shown before and stored with an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub fn compute(subtotal: Decimal, shipping_cost: Decimal, coupon: Option<&Coupon>) -> Self {
        let discount = coupon.map_or(Decimal::ZERO, |c| c.discount_for(subtotal));
        let total = (subtotal + shipping_cost - discount).max(Decimal::ZERO);
        Self { subtotal, shipping_cost, discount, total }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Quote {
    #[serde(flatten)]
    pub totals: Totals,
    pub coupon_code: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlacedOrder {
    #[serde(flatten)]
    pub snapshot: OrderSnapshot,
    /// The session cart to store once the order exists.
    #[serde(skip)]
    pub cart: Cart,
}

pub struct CheckoutService {
    store: Arc<dyn Store>,
    dispatcher: EventDispatcher,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn Store>, dispatcher: EventDispatcher) -> Self { Self { store, dispatcher } }

    /// Prices the cart with an optional coupon and shipping cost, without writing anything.
    pub async fn quote(&self, cart: &Cart, coupon_code: Option<&str>, shipping_cost: Decimal) -> Result<Quote> {
        let lines = self.price_lines(cart).await?;
        let coupon = self.coupon(coupon_code).await?;
        let totals = Totals::compute(subtotal(&lines), shipping_cost.max(Decimal::ZERO), coupon.as_ref());
        Ok(Quote { totals, coupon_code: coupon.map(|c| c.code) })
    }

    /// Validates stock and coupon, then writes the order and its items in one
    /// transaction. `OrderEvent::Created` fires only after that commit.
    #[instrument(skip(self, cart, request), fields(lines = cart.item_count(), user_id = ?request.user_id))]
    pub async fn place_order(&self, cart: &Cart, request: CheckoutRequest) -> Result<PlacedOrder> {
        request.validate()?;
        if request.user_id.is_none() && request.guest_name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            return Err(StoreError::Validation("Please enter your name".into()));
        }
        if cart.is_empty() {
            return Err(StoreError::Validation("Your cart is empty".into()));
        }

        let lines = self.price_lines(cart).await?;
        let coupon = self.coupon(request.coupon_code.as_deref()).await?;
        let totals = Totals::compute(subtotal(&lines), request.shipping.cost, coupon.as_ref());

        let draft = NewOrder {
            user_id: request.user_id,
            guest_name: request.guest_name.filter(|_| request.user_id.is_none()),
            guest_email: request.guest_email.filter(|_| request.user_id.is_none()),
            address: request.address,
            items: lines,
            total_price: totals.total,
            shipping_cost: totals.shipping_cost,
            discount: totals.discount,
            coupon_id: coupon.map(|c| c.id),
            courier: Some(request.shipping.courier),
            courier_service: Some(request.shipping.service),
            notes: request.notes.filter(|n| !n.trim().is_empty()),
        };
        let snapshot = self.store.create_order(draft).await?;
        info!(order = %snapshot.order.label(), total = %snapshot.order.total_price, "order placed");

        self.dispatcher.dispatch(&OrderEvent::Created(snapshot.clone())).await;
        Ok(PlacedOrder { snapshot, cart: cart.cleared() })
    }

    /// Re-reads every product so prices and stock come from the catalogue,
    /// not from the session snapshot.
    async fn price_lines(&self, cart: &Cart) -> Result<Vec<NewOrderItem>> {
        let mut lines = Vec::with_capacity(cart.item_count());
        for (key, line) in cart.items() {
            let product = self.store.product(line.id).await?
                .ok_or_else(|| StoreError::Validation(format!("{} is no longer available", line.name)))?;
            if !product.can_supply(line.size.as_deref(), line.quantity) {
                warn!(item = %key, requested = line.quantity, available = product.available_stock(line.size.as_deref()), "insufficient stock");
                return Err(StoreError::InsufficientStock { product: product.name, size: line.size.clone() });
            }
            lines.push(NewOrderItem {
                product_id: product.id,
                product_name: product.name,
                quantity: line.quantity,
                price: product.price,
                size: line.size.clone(),
            });
        }
        Ok(lines)
    }

    async fn coupon(&self, code: Option<&str>) -> Result<Option<Coupon>> {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else { return Ok(None) };
        let coupon = self.store.coupon_by_code(code).await?
            .ok_or_else(|| StoreError::InvalidCoupon(format!("{code} does not exist")))?;
        if !coupon.is_valid_at(Utc::now()) {
            return Err(StoreError::InvalidCoupon(format!("{code} is expired or inactive")));
        }
        Ok(Some(coupon))
    }
}

fn subtotal(lines: &[NewOrderItem]) -> Decimal {
    lines.iter().map(|l| l.price * Decimal::from(l.quantity)).sum()
}
