//! Domain events
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::{Order, OrderItem, OrderStatus};

/// Order and line items as they stood when an event was raised.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OrderEvent {
    /// Raised after the creating transaction commits.
    Created(OrderSnapshot),
    /// Raised only when the order status actually moved.
    StatusChanged { snapshot: OrderSnapshot, from: OrderStatus, to: OrderStatus },
}

impl OrderEvent {
    pub fn snapshot(&self) -> &OrderSnapshot {
        match self {
            Self::Created(snapshot) => snapshot,
            Self::StatusChanged { snapshot, .. } => snapshot,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Created(_) => "order_created",
            Self::StatusChanged { .. } => "order_status_changed",
        }
    }
}
