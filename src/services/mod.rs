//! Application services and the order event fan-out.

pub mod checkout;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod shipping;
pub mod stock;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use crate::domain::events::OrderEvent;
use crate::Result;

pub use checkout::{CheckoutRequest, CheckoutService, PlacedOrder, Quote, ShippingSelection, Totals};
pub use notifications::{InMemoryMailQueue, MailKind, MailQueue, NatsMailQueue, NotificationHandler, QueuedMail};
pub use orders::{OrderDetail, OrderService, ReconcileOutcome};
pub use payments::{PaymentResult, PaymentService, StatusCheck};
pub use shipping::{RateQuote, ShippingService};
pub use stock::StockCommitHandler;

/// A consumer of order events. Each handler runs independently of the others.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, event: &OrderEvent) -> Result<()>;
}

/// Runs handlers in registration order after the triggering write committed.
///
/// A failing handler is logged and does not stop the ones after it.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self { Self::default() }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub async fn dispatch(&self, event: &OrderEvent) {
        let order_id = event.snapshot().order.id;
        for handler in &self.handlers {
            match handler.handle(event).await {
                Ok(()) => debug!(%order_id, event = event.name(), handler = handler.name(), "event handled"),
                Err(e) => error!(%order_id, event = event.name(), handler = handler.name(), error = %e, "event handler failed"),
            }
        }
    }
}
