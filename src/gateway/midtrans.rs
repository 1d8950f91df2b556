//! Midtrans Snap client: session creation, status lookup and notification signatures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::{error, instrument};

use super::{GatewayError, PaymentGateway};
use crate::config::PaymentConfig;
use crate::domain::reconciliation::{FraudStatus, TransactionStatus};
use crate::domain::value_objects::PaymentReference;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapRequest {
    pub transaction_details: TransactionDetails,
    pub customer_details: CustomerDetails,
    pub item_details: Vec<ItemDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callbacks: Option<SnapCallbacks>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionDetails {
    pub order_id: String,
    pub gross_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerDetails {
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub phone: String,
    pub shipping_address: SnapAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapAddress {
    pub first_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDetail {
    pub id: String,
    pub price: i64,
    pub quantity: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapCallbacks {
    pub finish: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapSession {
    pub token: String,
    pub redirect_url: String,
}

/// Transaction state as reported by the status endpoint or an HTTP notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReport {
    pub order_id: String,
    pub transaction_status: TransactionStatus,
    #[serde(default)]
    pub fraud_status: Option<FraudStatus>,
    pub status_code: String,
    #[serde(default)]
    pub gross_amount: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub signature_key: Option<String>,
}

impl TransactionReport {
    /// Key identifying this delivery of this status, for duplicate detection.
    pub fn event_key(&self) -> String {
        let transaction = self.transaction_id.as_deref().unwrap_or(&self.order_id);
        format!("{}:{}", transaction, self.transaction_status)
    }
}

/// `sha512(order_id + status_code + gross_amount + server_key)`, hex encoded.
pub fn notification_signature(order_id: &str, status_code: &str, gross_amount: &str, server_key: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compares a received signature with the expected one without exiting
/// early on the first differing byte. Malformed hex never matches.
pub fn signature_matches(given: &str, expected: &str) -> bool {
    let (Ok(given), Ok(expected)) = (hex::decode(given.trim()), hex::decode(expected)) else {
        return false;
    };
    given.len() == expected.len() && given.iter().zip(&expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

#[derive(Deserialize)]
struct SnapErrorBody {
    #[serde(default)]
    error_messages: Vec<String>,
}

#[derive(Clone)]
pub struct MidtransClient {
    http: reqwest::Client,
    server_key: String,
    snap_base_url: String,
    api_base_url: String,
}

impl MidtransClient {
    pub fn new(http: reqwest::Client, config: &PaymentConfig) -> Self {
        Self {
            http,
            server_key: config.server_key.clone(),
            snap_base_url: config.snap_base_url.trim_end_matches('/').to_string(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for MidtransClient {
    #[instrument(skip(self, request), fields(order_id = %request.transaction_details.order_id, gross_amount = request.transaction_details.gross_amount))]
    async fn create_transaction(&self, request: &SnapRequest) -> Result<SnapSession, GatewayError> {
        let response = self.http
            .post(format!("{}/transactions", self.snap_base_url))
            .basic_auth(&self.server_key, Some(""))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let detail = serde_json::from_str::<SnapErrorBody>(&body)
                .ok()
                .filter(|b| !b.error_messages.is_empty())
                .map(|b| b.error_messages.join("; "))
                .unwrap_or_else(|| body.clone());
            error!(http_status = status.as_u16(), request = ?request, response = %body, "snap session rejected");
            return Err(GatewayError::Rejected { status: status.as_u16(), body: detail });
        }
        serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(format!("{e}: {body}")))
    }

    #[instrument(skip(self))]
    async fn transaction_status(&self, reference: &PaymentReference) -> Result<TransactionReport, GatewayError> {
        let response = self.http
            .get(format!("{}/{}/status", self.api_base_url, reference))
            .basic_auth(&self.server_key, Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!(http_status = status.as_u16(), response = %body, "status lookup rejected");
            return Err(GatewayError::Rejected { status: status.as_u16(), body });
        }

        // Unknown transactions come back as HTTP 200 with a 404 status_code.
        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(format!("{e}: {body}")))?;
        if value.get("status_code").and_then(|c| c.as_str()) == Some("404") {
            return Err(GatewayError::UnknownTransaction(reference.to_string()));
        }
        serde_json::from_value(value).map_err(|e| GatewayError::Malformed(format!("{e}: {body}")))
    }
}
