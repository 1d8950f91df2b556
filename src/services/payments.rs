//! Payment sessions and gateway status intake.
//!
//! Gateway failures never escape as errors from session creation or status
//! checks: they are logged with full context and returned as `success: false`
//! with a message fit for the customer.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{OrderService, ReconcileOutcome};
use crate::domain::aggregates::{Order, OrderItem, OrderStatus, PaymentStatus, ShippingAddress};
use crate::domain::value_objects::{minor_units, PaymentReference};
use crate::gateway::{
    notification_signature, signature_matches, CustomerDetails, ItemDetail, PaymentGateway, SnapAddress, SnapCallbacks, SnapRequest,
    TransactionDetails, TransactionReport,
};
use crate::repository::Store;
use crate::{Result, StoreError};

const TRY_AGAIN: &str = "Payment service is unavailable right now, please try again";
const ITEM_NAME_LIMIT: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PaymentResult {
    fn ok(token: impl Into<String>, redirect_url: impl Into<String>) -> Self {
        Self { success: true, token: Some(token.into()), redirect_url: Some(redirect_url.into()), message: None }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self { success: false, token: None, redirect_url: None, message: Some(message.into()) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusCheck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReconcileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct PaymentService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<OrderService>,
    server_key: String,
    finish_url: Option<String>,
}

impl PaymentService {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, orders: Arc<OrderService>, server_key: impl Into<String>, finish_url: Option<String>) -> Self {
        Self { store, gateway, orders, server_key: server_key.into(), finish_url }
    }

    /// Opens a payment session for the order and stores its token and URL.
    ///
    /// An order that already has a session gets the stored one back.
    #[instrument(skip(self))]
    pub async fn create_session(&self, order_id: Uuid) -> PaymentResult {
        match self.try_create_session(order_id).await {
            Ok(result) => result,
            Err(StoreError::Gateway(detail)) => {
                error!(%order_id, %detail, "payment session request failed");
                PaymentResult::failure(TRY_AGAIN)
            }
            Err(e @ (StoreError::NotFound(_) | StoreError::Validation(_))) => PaymentResult::failure(e.to_string()),
            Err(e) => {
                error!(%order_id, error = %e, "payment session could not be stored");
                PaymentResult::failure(TRY_AGAIN)
            }
        }
    }

    async fn try_create_session(&self, order_id: Uuid) -> Result<PaymentResult> {
        let order = self.store.order(order_id).await?.ok_or_else(|| StoreError::NotFound(format!("Order {order_id}")))?;
        if order.payment_status == PaymentStatus::Paid {
            return Err(StoreError::Validation(format!("Order {} is already paid", order.label())));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(StoreError::Validation(format!("Order {} was cancelled", order.label())));
        }
        if let (Some(token), Some(url)) = (&order.payment_token, &order.payment_url) {
            return Ok(PaymentResult::ok(token, url));
        }

        let items = self.store.order_items(order_id).await?;
        let address = match order.shipping_address_id {
            Some(id) => self.store.shipping_address(id).await?,
            None => None,
        };
        let email = match order.user_id {
            Some(user_id) => self.store.user_email(user_id).await?,
            None => order.guest_email.clone(),
        };
        // First session keeps the derived reference so legacy lookups agree.
        let reference = match &order.payment_reference {
            None => order.payment_reference(),
            Some(_) => PaymentReference::derive(order.id, Utc::now()),
        };
        let request = build_snap_request(&order, &items, address.as_ref(), email, &reference, self.finish_url.as_deref())?;

        let session = self.gateway.create_transaction(&request).await?;
        self.store.save_payment_session(order.id, &session.token, &session.redirect_url, &reference).await?;
        info!(order = %order.label(), %reference, "payment session created");
        Ok(PaymentResult::ok(session.token, session.redirect_url))
    }

    /// Handles an HTTP notification from the gateway.
    ///
    /// Signature and amount are checked first; each (transaction, status)
    /// pair is processed once even when the gateway redelivers it.
    #[instrument(skip(self, report), fields(reference = %report.order_id, status = %report.transaction_status))]
    pub async fn handle_notification(&self, report: TransactionReport) -> Result<ReconcileOutcome> {
        self.verify_signature(&report)?;
        let order = self.order_for_reference(&PaymentReference::new(report.order_id.clone())).await?;
        check_amount(&order, &report)?;

        let key = report.event_key();
        if !self.store.record_payment_event(&key, order.id).await? {
            info!(order = %order.label(), %key, "duplicate notification ignored");
            return Ok(ReconcileOutcome::Duplicate);
        }
        match self.orders.reconcile(order.id, report.transaction_status, report.fraud_status).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.store.forget_payment_event(&key).await?;
                Err(e)
            }
        }
    }

    /// Polls the gateway for the order's transaction and reconciles the result.
    #[instrument(skip(self))]
    pub async fn sync_status(&self, order_id: Uuid) -> StatusCheck {
        let order = match self.store.order(order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return StatusCheck { success: false, outcome: None, message: Some(format!("Order {order_id} not found")) },
            Err(e) => {
                error!(%order_id, error = %e, "order lookup failed");
                return StatusCheck { success: false, outcome: None, message: Some(TRY_AGAIN.into()) };
            }
        };

        let reference = order.payment_reference();
        let report = match self.gateway.transaction_status(&reference).await {
            Ok(report) => report,
            Err(e) => {
                error!(order = %order.label(), %reference, error = %e, "status lookup failed");
                return StatusCheck { success: false, outcome: None, message: Some(TRY_AGAIN.into()) };
            }
        };
        if let Err(e) = check_amount(&order, &report) {
            return StatusCheck { success: false, outcome: None, message: Some(e.to_string()) };
        }

        match self.orders.reconcile(order.id, report.transaction_status, report.fraud_status).await {
            Ok(outcome) => StatusCheck { success: true, outcome: Some(outcome), message: None },
            Err(e) => {
                warn!(order = %order.label(), error = %e, "reconciliation failed");
                StatusCheck { success: false, outcome: None, message: Some(e.to_string()) }
            }
        }
    }

    fn verify_signature(&self, report: &TransactionReport) -> Result<()> {
        let expected = notification_signature(
            &report.order_id,
            &report.status_code,
            report.gross_amount.as_deref().unwrap_or_default(),
            &self.server_key,
        );
        match report.signature_key.as_deref() {
            Some(given) if signature_matches(given, &expected) => Ok(()),
            _ => {
                warn!(reference = %report.order_id, "notification signature mismatch");
                Err(StoreError::Unauthorized("invalid notification signature".into()))
            }
        }
    }

    /// Stored reference first, then the order id embedded in a derived one.
    async fn order_for_reference(&self, reference: &PaymentReference) -> Result<Order> {
        if let Some(order) = self.store.order_by_payment_reference(reference).await? {
            return Ok(order);
        }
        if let Some(order_id) = reference.order_id() {
            if let Some(order) = self.store.order(order_id).await? {
                return Ok(order);
            }
        }
        Err(StoreError::NotFound(format!("Order for payment {reference}")))
    }
}

/// Rejects reports whose amount differs from the order total, compared in the
/// same whole units the session was created with.
fn check_amount(order: &Order, report: &TransactionReport) -> Result<()> {
    let Some(raw) = report.gross_amount.as_deref() else { return Ok(()) };
    let reported = Decimal::from_str(raw.trim()).ok().and_then(minor_units);
    if reported != minor_units(order.total_price) {
        warn!(order = %order.label(), reported = raw, expected = %order.total_price, "gross amount mismatch");
        return Err(StoreError::Validation(format!("amount {raw} does not match order {}", order.label())));
    }
    Ok(())
}

/// Builds the session request. Shipping and discount ride along as extra
/// lines, and a rounding line absorbs any remainder, so the item lines always
/// add up to `gross_amount`.
pub fn build_snap_request(
    order: &Order,
    items: &[OrderItem],
    address: Option<&ShippingAddress>,
    email: Option<String>,
    reference: &PaymentReference,
    finish_url: Option<&str>,
) -> Result<SnapRequest> {
    let whole = |amount: Decimal| minor_units(amount).ok_or_else(|| StoreError::Validation(format!("amount {amount} is out of range")));
    let gross_amount = whole(order.total_price)?;

    let mut details = Vec::with_capacity(items.len() + 3);
    for item in items {
        let name = match &item.size {
            Some(size) => format!("{} ({size})", item.product_name),
            None => item.product_name.clone(),
        };
        details.push(ItemDetail { id: item.product_id.to_string(), price: whole(item.price)?, quantity: item.quantity, name: truncate(&name) });
    }
    if order.shipping_cost > Decimal::ZERO {
        let carrier = [order.courier.as_deref(), order.courier_service.as_deref()]
            .into_iter()
            .flatten()
            .map(str::to_uppercase)
            .collect::<Vec<_>>()
            .join(" ");
        let name = if carrier.is_empty() { "Shipping".to_string() } else { format!("Shipping {carrier}") };
        details.push(ItemDetail { id: "SHIPPING".into(), price: whole(order.shipping_cost)?, quantity: 1, name: truncate(&name) });
    }
    if order.discount > Decimal::ZERO {
        details.push(ItemDetail { id: "DISCOUNT".into(), price: -whole(order.discount)?, quantity: 1, name: "Discount".into() });
    }
    let listed: i64 = details.iter().map(|d| d.price * i64::from(d.quantity)).sum();
    if listed != gross_amount {
        details.push(ItemDetail { id: "ROUNDING".into(), price: gross_amount - listed, quantity: 1, name: "Rounding adjustment".into() });
    }

    let name = address.map(|a| a.full_name.clone())
        .or_else(|| order.guest_name.clone())
        .unwrap_or_else(|| "Customer".into());
    let phone = address.map(|a| a.phone.clone()).unwrap_or_default();
    let shipping_address = SnapAddress {
        first_name: name.clone(),
        phone: phone.clone(),
        address: address.map(|a| a.address.clone()).unwrap_or_default(),
        city: address.map(|a| a.city.clone()).unwrap_or_default(),
        postal_code: address.map(|a| a.postal_code.clone()).unwrap_or_default(),
        country_code: "IDN".into(),
    };

    Ok(SnapRequest {
        transaction_details: TransactionDetails { order_id: reference.to_string(), gross_amount },
        customer_details: CustomerDetails { first_name: name, email, phone, shipping_address },
        item_details: details,
        callbacks: finish_url.map(|finish| SnapCallbacks { finish: finish.to_string() }),
    })
}

fn truncate(name: &str) -> String {
    name.chars().take(ITEM_NAME_LIMIT).collect()
}
