//! Order lifecycle: status changes from the back-office and from the gateway.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::EventDispatcher;
use crate::domain::aggregates::{Order, OrderItem, OrderStatus, PaymentStatus, ShippingAddress, StatusTransition};
use crate::domain::events::{OrderEvent, OrderSnapshot};
use crate::domain::reconciliation::{self, FraudStatus, TransactionStatus};
use crate::repository::{FulfilmentUpdate, Store};
use crate::{Result, StoreError};

const TRANSITION_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub shipping_address: Option<ShippingAddress>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied { status: OrderStatus, payment_status: PaymentStatus, status_changed: bool },
    Unchanged { status: OrderStatus, payment_status: PaymentStatus },
    Ignored { reason: String },
    Duplicate,
}

pub struct OrderService {
    store: Arc<dyn Store>,
    dispatcher: EventDispatcher,
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, dispatcher: EventDispatcher) -> Self { Self { store, dispatcher } }

    pub async fn detail(&self, order_id: Uuid) -> Result<OrderDetail> {
        let order = self.require(order_id).await?;
        let items = self.store.order_items(order_id).await?;
        let shipping_address = match order.shipping_address_id {
            Some(id) => self.store.shipping_address(id).await?,
            None => None,
        };
        Ok(OrderDetail { order, items, shipping_address })
    }

    pub async fn list(&self, page: u32, per_page: u32) -> Result<(Vec<Order>, i64)> {
        self.store.list_orders(page.max(1), per_page.clamp(1, 100)).await
    }

    /// Back-office status change. Cancelling a paid order is refused.
    #[instrument(skip(self))]
    pub async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order> {
        let (order, _) = self.transition(order_id, |order| order.plan_status(status).map(Some).map_err(StoreError::from)).await?;
        Ok(order)
    }

    pub async fn cancel(&self, order_id: Uuid) -> Result<Order> {
        self.update_status(order_id, OrderStatus::Cancelled).await
    }

    /// Customer-initiated cancel. Only the registered owner may cancel.
    #[instrument(skip(self))]
    pub async fn cancel_for_customer(&self, order_id: Uuid, user_id: Uuid) -> Result<Order> {
        let order = self.require(order_id).await?;
        if order.user_id != Some(user_id) {
            warn!(order = %order.label(), %user_id, "cancel attempted by non-owner");
            return Err(StoreError::Unauthorized(format!("order {} belongs to another customer", order.label())));
        }
        self.cancel(order_id).await
    }

    /// Applies a gateway report to the order.
    ///
    /// Re-applying a report the order already reflects writes nothing and
    /// raises no event. A paid order keeps its statuses against any report
    /// that is not itself a payment, cancellations included, and a shipped or
    /// completed order stays put when its payment is reported again.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, order_id: Uuid, transaction: TransactionStatus, fraud: Option<FraudStatus>) -> Result<ReconcileOutcome> {
        let Some(resolution) = reconciliation::resolve(transaction, fraud) else {
            info!(%order_id, %transaction, "gateway status carries no order change");
            return Ok(ReconcileOutcome::Ignored { reason: format!("status {transaction} is not reconciled") });
        };

        let mut stale = false;
        let (order, transition) = self.transition(order_id, |order| {
            if order.payment_status == PaymentStatus::Paid {
                if resolution.payment_status != PaymentStatus::Paid {
                    stale = true;
                    return Ok(None);
                }
                // A repeated payment never pulls a dispatched order back.
                if matches!(order.status, OrderStatus::Shipped | OrderStatus::Completed) {
                    return Ok(None);
                }
            }
            order.plan(resolution.status, resolution.payment_status).map(Some).map_err(StoreError::from)
        }).await?;

        if stale {
            warn!(order = %order.label(), %transaction, "stale report for a paid order ignored");
            return Ok(ReconcileOutcome::Ignored { reason: format!("order is already paid, {transaction} ignored") });
        }
        Ok(match transition {
            Some(t) => ReconcileOutcome::Applied { status: t.to, payment_status: t.payment_to, status_changed: t.status_changed() },
            None => ReconcileOutcome::Unchanged { status: order.status, payment_status: order.payment_status },
        })
    }

    pub async fn update_fulfilment(&self, order_id: Uuid, update: FulfilmentUpdate) -> Result<Order> {
        self.store.update_fulfilment(order_id, &update).await?
            .ok_or_else(|| StoreError::NotFound(format!("Order {order_id}")))
    }

    /// Hard-deletes an order, which is only allowed once it is cancelled.
    #[instrument(skip(self))]
    pub async fn delete_cancelled(&self, order_id: Uuid) -> Result<()> {
        let order = self.require(order_id).await?;
        order.ensure_deletable()?;
        if !self.store.delete_cancelled_order(order_id).await? {
            return Err(StoreError::Conflict(format!("order {} changed before it could be deleted", order.label())));
        }
        info!(order = %order.label(), "cancelled order deleted");
        Ok(())
    }

    pub async fn backfill_legacy_orders(&self) -> Result<u64> {
        let fixed = self.store.backfill_legacy_orders().await?;
        info!(fixed, "legacy orders backfilled");
        Ok(fixed)
    }

    async fn require(&self, order_id: Uuid) -> Result<Order> {
        self.store.order(order_id).await?.ok_or_else(|| StoreError::NotFound(format!("Order {order_id}")))
    }

    /// Plans against a fresh read, writes with compare-and-set, and raises
    /// `StatusChanged` only when the status itself moved.
    async fn transition<F>(&self, order_id: Uuid, mut plan: F) -> Result<(Order, Option<StatusTransition>)>
    where
        F: FnMut(&Order) -> Result<Option<StatusTransition>>,
    {
        for _ in 0..TRANSITION_ATTEMPTS {
            let order = self.require(order_id).await?;
            let transition = match plan(&order)? {
                Some(t) if !t.is_noop() => t,
                _ => return Ok((order, None)),
            };
            let Some(updated) = self.store.apply_transition(order_id, &transition).await? else {
                warn!(order = %order.label(), "order changed while updating status, retrying");
                continue;
            };

            info!(order = %updated.label(), from = %transition.from, to = %transition.to,
                payment_from = %transition.payment_from, payment_to = %transition.payment_to, "order status updated");
            if transition.status_changed() {
                let items = self.store.order_items(order_id).await?;
                let event = OrderEvent::StatusChanged {
                    snapshot: OrderSnapshot { order: updated.clone(), items },
                    from: transition.from,
                    to: transition.to,
                };
                self.dispatcher.dispatch(&event).await;
            }
            return Ok((updated, Some(transition)));
        }
        Err(StoreError::Conflict(format!("order {order_id} is being updated concurrently, try again")))
    }
}
