//! Biteship courier-rate client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use super::{CourierRates, GatewayError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateRequest {
    pub origin_postal_code: u32,
    pub destination_postal_code: u32,
    /// Comma-joined courier codes.
    pub couriers: String,
    pub items: Vec<RateItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateItem {
    pub name: String,
    /// Declared value of the whole line.
    pub value: i64,
    /// Grams per unit.
    pub weight: u32,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateOption {
    #[serde(rename(deserialize = "courier_code"))]
    pub courier: String,
    pub courier_name: String,
    #[serde(rename(deserialize = "courier_service_code"), alias = "service_code")]
    pub service: String,
    #[serde(rename(deserialize = "courier_service_name"), alias = "service_name")]
    pub service_name: String,
    pub price: i64,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Deserialize)]
struct RatesBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    pricing: Vec<RateOption>,
}

#[derive(Clone)]
pub struct BiteshipClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl BiteshipClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, base_url: &str) -> Self {
        Self { http, api_key: api_key.into(), base_url: base_url.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl CourierRates for BiteshipClient {
    #[instrument(skip(self, request), fields(couriers = %request.couriers, destination = request.destination_postal_code))]
    async fn rates(&self, request: &RateRequest) -> Result<Vec<RateOption>, GatewayError> {
        let response = self.http
            .post(format!("{}/rates/couriers", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!(http_status = status.as_u16(), request = ?request, response = %body, "rate lookup rejected");
            return Err(GatewayError::Rejected { status: status.as_u16(), body });
        }

        let parsed: RatesBody = serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(format!("{e}: {body}")))?;
        if !parsed.success {
            return Err(GatewayError::Malformed(parsed.message.unwrap_or_else(|| "rate lookup unsuccessful".into())));
        }
        Ok(parsed.pricing)
    }
}
