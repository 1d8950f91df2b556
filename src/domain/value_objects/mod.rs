//! Value Objects for the store

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Human-facing order identifier, `ORD-YYYYMMDD-NNNN`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    pub const PREFIX: &'static str = "ORD";

    /// Builds the number for the `sequence`-th order of `date` (1-based).
    pub fn new(date: NaiveDate, sequence: u32) -> Self {
        Self(format!("{}-{:04}", Self::day_prefix(date), sequence))
    }

    /// `ORD-YYYYMMDD`, shared by every order placed on `date`.
    pub fn day_prefix(date: NaiveDate) -> String {
        format!("{}-{}", Self::PREFIX, date.format("%Y%m%d"))
    }

    pub fn parse(value: &str) -> Result<Self, OrderNumberError> {
        let mut parts = value.splitn(3, '-');
        let (prefix, date, seq) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(d), Some(s)) => (p, d, s),
            _ => return Err(OrderNumberError::Malformed(value.to_string())),
        };
        if prefix != Self::PREFIX
            || NaiveDate::parse_from_str(date, "%Y%m%d").is_err()
            || seq.len() < 4
            || !seq.chars().all(|c| c.is_ascii_digit())
        {
            return Err(OrderNumberError::Malformed(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    /// The trailing per-day sequence, `NNNN`.
    pub fn sequence(&self) -> Option<u32> {
        self.0.rsplit('-').next().and_then(|seq| seq.parse().ok())
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for OrderNumber {
    type Error = OrderNumberError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<OrderNumber> for String {
    fn from(value: OrderNumber) -> Self { value.0 }
}

#[derive(Debug, Clone, Error)]
pub enum OrderNumberError {
    #[error("malformed order number: {0}")]
    Malformed(String),
}

/// Cart line key: `{product_id}` or `{product_id}-{size}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(product_id: Uuid, size: Option<&str>) -> Self {
        match size {
            Some(size) => Self(format!("{product_id}-{size}")),
            None => Self(product_id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl From<&str> for ItemKey {
    fn from(value: &str) -> Self { Self(value.to_string()) }
}

/// Rounds a decimal amount to whole currency units for the gateway.
///
/// Session creation and status checks both go through here so the amounts
/// they compare always agree.
pub fn minor_units(amount: Decimal) -> Option<i64> {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Identifier an order carries at the payment gateway.
///
/// New sessions store it verbatim. Orders from before that column existed are
/// addressed as `{order_id}-{created_at unix seconds}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl PaymentReference {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    pub fn derive(order_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self(format!("{}-{}", order_id, created_at.timestamp()))
    }

    /// Recovers the order id from a derived reference.
    pub fn order_id(&self) -> Option<Uuid> {
        self.0.get(..36).and_then(|head| Uuid::parse_str(head).ok())
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
