//! Order Aggregate

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::domain::value_objects::{OrderNumber, PaymentReference};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Absent only on legacy rows awaiting backfill.
    pub order_number: Option<OrderNumber>,
    pub user_id: Option<Uuid>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_price: Decimal,
    pub total_amount: Option<Decimal>,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub courier: Option<String>,
    pub courier_service: Option<String>,
    pub coupon_id: Option<Uuid>,
    pub shipping_address_id: Option<Uuid>,
    pub payment_token: Option<String>,
    pub payment_url: Option<String>,
    pub payment_reference: Option<PaymentReference>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub notes: Option<String>,
    pub admin_notes: Option<String>,
    pub stock_committed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub price: Decimal,
    pub size: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal { self.price * Decimal::from(self.quantity) }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[serde(default = "Uuid::nil")]
    pub id: Uuid,
    /// Back-reference filled once the owning order exists.
    #[serde(default)]
    pub order_id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    #[validate(length(min = 1))]
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub province: String,
    #[validate(length(min = 5, max = 10))]
    pub postal_code: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    #[serde(alias = "delivered")]
    Completed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Challenge,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "completed" | "delivered" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Challenge => "challenge",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "challenge" => Ok(Self::Challenge),
            "failed" => Ok(Self::Failed),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A planned move from the order's current statuses to new ones.
///
/// Persistence applies it only while the order still holds `from`/`payment_from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub payment_from: PaymentStatus,
    pub payment_to: PaymentStatus,
}

impl StatusTransition {
    pub fn status_changed(&self) -> bool { self.from != self.to }
    pub fn payment_changed(&self) -> bool { self.payment_from != self.payment_to }
    pub fn is_noop(&self) -> bool { !self.status_changed() && !self.payment_changed() }
    pub fn enters_processing(&self) -> bool { self.status_changed() && self.to == OrderStatus::Processing }
}

impl Order {
    /// Fills fields a fresh or legacy order may lack, leaving present values alone.
    ///
    /// `next_number` is asked for a number only when one is missing.
    pub fn apply_creation_defaults(&mut self, next_number: impl FnOnce(NaiveDate) -> OrderNumber) -> bool {
        let mut changed = false;
        if self.order_number.is_none() {
            self.order_number = Some(next_number(self.created_at.date_naive()));
            changed = true;
        }
        if self.total_amount.is_none() {
            self.total_amount = Some(self.total_price);
            changed = true;
        }
        changed
    }

    /// Gateway identifier for this order, rebuilt for legacy rows.
    pub fn payment_reference(&self) -> PaymentReference {
        self.payment_reference.clone().unwrap_or_else(|| PaymentReference::derive(self.id, self.created_at))
    }

    /// Validates a move to `status`, keeping the payment status as is.
    pub fn plan_status(&self, status: OrderStatus) -> Result<StatusTransition, OrderError> {
        self.plan(status, self.payment_status)
    }

    /// Validates a move to `status`/`payment_status`.
    ///
    /// The cancel check runs against the payment status the order holds now.
    pub fn plan(&self, status: OrderStatus, payment_status: PaymentStatus) -> Result<StatusTransition, OrderError> {
        if status == OrderStatus::Cancelled && self.status != OrderStatus::Cancelled && self.payment_status == PaymentStatus::Paid {
            return Err(OrderError::CancelAfterPaid(self.label()));
        }
        Ok(StatusTransition { from: self.status, to: status, payment_from: self.payment_status, payment_to: payment_status })
    }

    pub fn apply(&mut self, transition: &StatusTransition) {
        self.status = transition.to;
        self.payment_status = transition.payment_to;
        self.touch();
    }

    pub fn ensure_deletable(&self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Cancelled { return Err(OrderError::NotCancelled(self.label())); }
        Ok(())
    }

    pub fn label(&self) -> String {
        self.order_number.as_ref().map(|n| n.to_string()).unwrap_or_else(|| self.id.to_string())
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, Error)]
pub enum OrderError {
    #[error("Order {0} has been paid and can no longer be cancelled")]
    CancelAfterPaid(String),
    #[error("Only cancelled orders can be deleted; {0} is not cancelled")]
    NotCancelled(String),
    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}

#[cfg(test)]
pub(crate) fn sample_order() -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(), order_number: None, user_id: None, guest_name: Some("Sari".into()), guest_email: None,
        status: OrderStatus::Pending, payment_status: PaymentStatus::Pending,
        total_price: Decimal::new(150_000, 0), total_amount: None, shipping_cost: Decimal::ZERO, discount: Decimal::ZERO,
        courier: None, courier_service: None, coupon_id: None, shipping_address_id: None,
        payment_token: None, payment_url: None, payment_reference: None, tracking_number: None, tracking_url: None,
        notes: None, admin_notes: None, stock_committed: false, created_at: now, updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_defaults_fill_once() {
        let mut order = sample_order();
        assert!(order.apply_creation_defaults(|d| OrderNumber::new(d, 1)));
        let number = order.order_number.clone().unwrap();
        assert!(number.as_str().ends_with("-0001"));
        assert_eq!(order.total_amount, Some(Decimal::new(150_000, 0)));

        order.total_price = Decimal::new(99, 0);
        assert!(!order.apply_creation_defaults(|d| OrderNumber::new(d, 7)));
        assert_eq!(order.order_number, Some(number));
        assert_eq!(order.total_amount, Some(Decimal::new(150_000, 0)));
    }

    #[test]
    fn test_cancel_after_paid_rejected() {
        let mut order = sample_order();
        order.payment_status = PaymentStatus::Paid;
        order.status = OrderStatus::Processing;
        let before = order.clone();
        assert!(matches!(order.plan_status(OrderStatus::Cancelled), Err(OrderError::CancelAfterPaid(_))));
        assert_eq!(order, before);
        assert!(order.plan_status(OrderStatus::Shipped).is_ok());
    }

    #[test]
    fn test_transition_flags() {
        let order = sample_order();
        let t = order.plan(OrderStatus::Processing, PaymentStatus::Paid).unwrap();
        assert!(t.enters_processing());
        let same = order.plan(OrderStatus::Pending, PaymentStatus::Challenge).unwrap();
        assert!(!same.status_changed());
        assert!(same.payment_changed());
        assert!(order.plan_status(OrderStatus::Pending).unwrap().is_noop());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("delivered".parse::<OrderStatus>().unwrap(), OrderStatus::Completed);
        assert_eq!(serde_json::from_str::<OrderStatus>("\"delivered\"").unwrap(), OrderStatus::Completed);
        assert!("lost".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_legacy_payment_reference() {
        let order = sample_order();
        assert_eq!(order.payment_reference().order_id(), Some(order.id));
    }
}
