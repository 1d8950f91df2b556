//! Customer mail fan-out. Mails are queued, never sent inline; delivery is the
//! mail worker's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::EventHandler;
use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::events::{OrderEvent, OrderSnapshot};
use crate::repository::Store;
use crate::{Result, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailKind {
    OrderConfirmation,
    PaymentInstructions,
    StatusUpdate,
}

/// Unit of work for the mail worker, carrying the order as it was when queued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedMail {
    pub kind: MailKind,
    pub to: String,
    pub snapshot: OrderSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<OrderStatus>,
}

#[async_trait]
pub trait MailQueue: Send + Sync {
    async fn enqueue(&self, mail: QueuedMail) -> Result<()>;
}

/// Publishes mails as JSON on a NATS subject.
pub struct NatsMailQueue {
    client: async_nats::Client,
    subject: String,
}

impl NatsMailQueue {
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self {
        Self { client, subject: subject.into() }
    }
}

#[async_trait]
impl MailQueue for NatsMailQueue {
    async fn enqueue(&self, mail: QueuedMail) -> Result<()> {
        let payload = serde_json::to_vec(&mail).map_err(|e| StoreError::Queue(e.to_string()))?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| StoreError::Queue(e.to_string()))?;
        Ok(())
    }
}

/// Keeps queued mails in process. Used by tests and runs without NATS.
#[derive(Default)]
pub struct InMemoryMailQueue {
    mails: Mutex<Vec<QueuedMail>>,
}

impl InMemoryMailQueue {
    pub fn new() -> Self { Self::default() }

    pub async fn queued(&self) -> Vec<QueuedMail> { self.mails.lock().await.clone() }
}

#[async_trait]
impl MailQueue for InMemoryMailQueue {
    async fn enqueue(&self, mail: QueuedMail) -> Result<()> {
        info!(kind = ?mail.kind, to = %mail.to, order = %mail.snapshot.order.label(), "mail queued in memory");
        self.mails.lock().await.push(mail);
        Ok(())
    }
}

/// Queues customer mails for order events.
///
/// The recipient is the registered user's address, or the guest's when one
/// was given; orders with neither get no mail.
pub struct NotificationHandler {
    store: Arc<dyn Store>,
    queue: Arc<dyn MailQueue>,
}

impl NotificationHandler {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn MailQueue>) -> Self { Self { store, queue } }

    async fn recipient(&self, order: &Order) -> Result<Option<String>> {
        let email = match order.user_id {
            Some(user_id) => self.store.user_email(user_id).await?,
            None => order.guest_email.clone(),
        };
        Ok(email.filter(|e| !e.trim().is_empty()))
    }

    async fn queue(&self, kind: MailKind, to: &str, snapshot: &OrderSnapshot, previous_status: Option<OrderStatus>) -> Result<()> {
        self.queue.enqueue(QueuedMail { kind, to: to.to_string(), snapshot: snapshot.clone(), previous_status }).await
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    fn name(&self) -> &'static str { "customer_mail" }

    async fn handle(&self, event: &OrderEvent) -> Result<()> {
        let snapshot = event.snapshot();
        let Some(to) = self.recipient(&snapshot.order).await? else {
            debug!(order = %snapshot.order.label(), "no recipient, mail skipped");
            return Ok(());
        };
        match event {
            OrderEvent::Created(snapshot) => {
                self.queue(MailKind::OrderConfirmation, &to, snapshot, None).await?;
                self.queue(MailKind::PaymentInstructions, &to, snapshot, None).await?;
            }
            OrderEvent::StatusChanged { snapshot, from, .. } => {
                self.queue(MailKind::StatusUpdate, &to, snapshot, Some(*from)).await?;
            }
        }
        Ok(())
    }
}
