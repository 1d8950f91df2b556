//! Gateway payment statuses and how they map onto an order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::aggregates::{OrderStatus, PaymentStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Capture,
    Settlement,
    Pending,
    Deny,
    Cancel,
    Expire,
    #[serde(other)]
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FraudStatus {
    Accept,
    Challenge,
    Deny,
    #[serde(other)]
    Other,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Settlement => "settlement",
            Self::Pending => "pending",
            Self::Deny => "deny",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Statuses an order should hold for a gateway report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
}

/// Maps a gateway report onto order statuses.
///
/// Returns `None` for statuses with no order-side meaning (refunds,
/// authorisations and the like), which callers leave alone.
pub fn resolve(transaction: TransactionStatus, fraud: Option<FraudStatus>) -> Option<Resolution> {
    let (payment_status, status) = match transaction {
        TransactionStatus::Capture if fraud == Some(FraudStatus::Challenge) => (PaymentStatus::Challenge, OrderStatus::Pending),
        TransactionStatus::Capture | TransactionStatus::Settlement => (PaymentStatus::Paid, OrderStatus::Processing),
        TransactionStatus::Pending => (PaymentStatus::Pending, OrderStatus::Pending),
        TransactionStatus::Deny | TransactionStatus::Cancel | TransactionStatus::Expire => (PaymentStatus::Failed, OrderStatus::Cancelled),
        TransactionStatus::Other => return None,
    };
    Some(Resolution { payment_status, status })
}
