//! Outbound adapters for the payment gateway and the courier-rate aggregator.

pub mod biteship;
pub mod midtrans;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::value_objects::PaymentReference;
use crate::StoreError;

pub use biteship::{BiteshipClient, RateItem, RateOption, RateRequest};
pub use midtrans::{
    notification_signature, signature_matches, CustomerDetails, ItemDetail, MidtransClient, SnapAddress, SnapCallbacks, SnapRequest, SnapSession,
    TransactionDetails, TransactionReport,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Malformed(String),
    #[error("transaction {0} is unknown to the gateway")]
    UnknownTransaction(String),
}

impl From<GatewayError> for StoreError {
    fn from(err: GatewayError) -> Self {
        StoreError::Gateway(err.to_string())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a hosted payment session and returns its token and redirect URL.
    async fn create_transaction(&self, request: &SnapRequest) -> Result<SnapSession, GatewayError>;

    /// Current status of the transaction carrying `reference`.
    async fn transaction_status(&self, reference: &PaymentReference) -> Result<TransactionReport, GatewayError>;
}

#[async_trait]
pub trait CourierRates: Send + Sync {
    async fn rates(&self, request: &RateRequest) -> Result<Vec<RateOption>, GatewayError>;
}

/// Builds the shared HTTP client; every outbound call is bounded by `timeout`.
pub fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, StoreError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| StoreError::Config(format!("cannot build HTTP client: {e}")))
}
