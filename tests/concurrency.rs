mod common;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use batik_store::domain::aggregates::{Coupon, Order, OrderItem, OrderStatus, PaymentStatus, Product, ShippingAddress, StatusTransition};
use batik_store::domain::events::OrderSnapshot;
use batik_store::domain::reconciliation::TransactionStatus;
use batik_store::domain::value_objects::PaymentReference;
use batik_store::repository::{FulfilmentUpdate, MemoryStore, NewOrder, Store};
use batik_store::services::{
    EventDispatcher, InMemoryMailQueue, MailKind, NotificationHandler, OrderService, ReconcileOutcome, StockCommitHandler,
};
use batik_store::{Result, StoreError};
use common::{checkout_request, World};

/// Wraps the memory store to force the interleavings a busy database produces.
struct ContendedStore {
    inner: Arc<MemoryStore>,
    /// Yield after every order read so concurrent callers plan on the same row.
    yield_after_read: bool,
    /// Every compare-and-set loses, as if another writer always got there first.
    lose_every_write: bool,
}

#[async_trait]
impl Store for ContendedStore {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> { self.inner.product(id).await }
    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> { self.inner.coupon_by_code(code).await }
    async fn user_email(&self, user_id: Uuid) -> Result<Option<String>> { self.inner.user_email(user_id).await }
    async fn create_order(&self, draft: NewOrder) -> Result<OrderSnapshot> { self.inner.create_order(draft).await }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let order = self.inner.order(id).await?;
        if self.yield_after_read {
            tokio::task::yield_now().await;
        }
        Ok(order)
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> { self.inner.order_items(order_id).await }
    async fn shipping_address(&self, id: Uuid) -> Result<Option<ShippingAddress>> { self.inner.shipping_address(id).await }
    async fn order_by_payment_reference(&self, reference: &PaymentReference) -> Result<Option<Order>> {
        self.inner.order_by_payment_reference(reference).await
    }
    async fn list_orders(&self, page: u32, per_page: u32) -> Result<(Vec<Order>, i64)> { self.inner.list_orders(page, per_page).await }
    async fn save_payment_session(&self, order_id: Uuid, token: &str, url: &str, reference: &PaymentReference) -> Result<()> {
        self.inner.save_payment_session(order_id, token, url, reference).await
    }

    async fn apply_transition(&self, order_id: Uuid, transition: &StatusTransition) -> Result<Option<Order>> {
        if self.lose_every_write {
            return Ok(None);
        }
        self.inner.apply_transition(order_id, transition).await
    }

    async fn commit_stock(&self, order_id: Uuid) -> Result<bool> { self.inner.commit_stock(order_id).await }
    async fn record_payment_event(&self, key: &str, order_id: Uuid) -> Result<bool> { self.inner.record_payment_event(key, order_id).await }
    async fn forget_payment_event(&self, key: &str) -> Result<()> { self.inner.forget_payment_event(key).await }
    async fn update_fulfilment(&self, order_id: Uuid, update: &FulfilmentUpdate) -> Result<Option<Order>> {
        self.inner.update_fulfilment(order_id, update).await
    }
    async fn delete_cancelled_order(&self, order_id: Uuid) -> Result<bool> { self.inner.delete_cancelled_order(order_id).await }
    async fn backfill_legacy_orders(&self) -> Result<u64> { self.inner.backfill_legacy_orders().await }
}

/// An order service over `store` with its own mail queue.
fn order_service(store: ContendedStore) -> (OrderService, Arc<InMemoryMailQueue>) {
    let store: Arc<dyn Store> = Arc::new(store);
    let mail = Arc::new(InMemoryMailQueue::new());
    let dispatcher = EventDispatcher::new()
        .with_handler(Arc::new(StockCommitHandler::new(store.clone())))
        .with_handler(Arc::new(NotificationHandler::new(store.clone(), mail.clone())));
    (OrderService::new(store, dispatcher), mail)
}

async fn placed_order(world: &World) -> Uuid {
    world.state.checkout
        .place_order(&world.cart(), checkout_request(Some(world.user_id), None, None))
        .await
        .unwrap()
        .snapshot
        .order
        .id
}

#[tokio::test]
async fn test_concurrent_settlements_apply_once() {
    let world = World::new().await;
    let id = placed_order(&world).await;
    let (orders, mail) = order_service(ContendedStore { inner: world.store.clone(), yield_after_read: true, lose_every_write: false });

    let (first, second) = tokio::join!(
        orders.reconcile(id, TransactionStatus::Settlement, None),
        orders.reconcile(id, TransactionStatus::Settlement, None),
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    let applied = outcomes.iter()
        .filter(|o| matches!(o, ReconcileOutcome::Applied { status_changed: true, .. }))
        .count();
    assert_eq!(applied, 1, "{outcomes:?}");
    assert!(outcomes.contains(&ReconcileOutcome::Unchanged { status: OrderStatus::Processing, payment_status: PaymentStatus::Paid }));

    assert_eq!(world.stock(world.kemeja.id, Some("S")).await, 2);
    assert_eq!(world.stock(world.kemeja.id, Some("M")).await, 0);
    let mails = mail.queued().await;
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].kind, MailKind::StatusUpdate);

    let order = world.store.order(id).await.unwrap().unwrap();
    assert_eq!((order.status, order.payment_status), (OrderStatus::Processing, PaymentStatus::Paid));
    assert!(order.stock_committed);
}

#[tokio::test]
async fn test_lost_writes_end_in_conflict() {
    let world = World::new().await;
    let id = placed_order(&world).await;
    let before = world.store.order(id).await.unwrap().unwrap();
    let (orders, mail) = order_service(ContendedStore { inner: world.store.clone(), yield_after_read: false, lose_every_write: true });

    let err = orders.reconcile(id, TransactionStatus::Settlement, None).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "{err}");
    let err = orders.update_status(id, OrderStatus::Cancelled).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "{err}");

    assert_eq!(world.store.order(id).await.unwrap().unwrap(), before);
    assert_eq!(world.stock(world.kemeja.id, Some("S")).await, 3);
    assert!(mail.queued().await.is_empty());
}
