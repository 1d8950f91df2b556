//! Stock commit on payment confirmation.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::EventHandler;
use crate::domain::aggregates::OrderStatus;
use crate::domain::events::OrderEvent;
use crate::repository::Store;
use crate::Result;

/// Decrements stock when an order moves into processing.
pub struct StockCommitHandler {
    store: Arc<dyn Store>,
}

impl StockCommitHandler {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }
}

#[async_trait]
impl EventHandler for StockCommitHandler {
    fn name(&self) -> &'static str { "stock_commit" }

    async fn handle(&self, event: &OrderEvent) -> Result<()> {
        let OrderEvent::StatusChanged { snapshot, from, to: OrderStatus::Processing } = event else {
            return Ok(());
        };
        if *from == OrderStatus::Processing {
            return Ok(());
        }
        let order = &snapshot.order;
        if self.store.commit_stock(order.id).await? {
            info!(order = %order.label(), lines = snapshot.items.len(), "stock committed");
        } else {
            warn!(order = %order.label(), "stock already committed, skipping");
        }
        Ok(())
    }
}
