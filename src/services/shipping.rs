//! Courier rate lookup for a cart.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, instrument, warn};

use crate::domain::aggregates::Cart;
use crate::domain::value_objects::minor_units;
use crate::gateway::{CourierRates, RateItem, RateOption, RateRequest};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RateQuote {
    pub success: bool,
    pub rates: Vec<RateOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RateQuote {
    fn failure(message: impl Into<String>) -> Self {
        Self { success: false, rates: Vec::new(), message: Some(message.into()) }
    }
}

pub struct ShippingService {
    rates: Arc<dyn CourierRates>,
    origin_postal_code: String,
    couriers: Vec<String>,
    item_weight_grams: u32,
}

impl ShippingService {
    pub fn new(rates: Arc<dyn CourierRates>, origin_postal_code: impl Into<String>, couriers: Vec<String>, item_weight_grams: u32) -> Self {
        Self { rates, origin_postal_code: origin_postal_code.into(), couriers, item_weight_grams }
    }

    /// Asks the aggregator for delivery options to `destination`.
    ///
    /// `couriers` narrows the configured list; every failure comes back as
    /// `success: false` with a message.
    #[instrument(skip(self, cart), fields(lines = cart.item_count()))]
    pub async fn rates_for_cart(&self, cart: &Cart, destination: &str, couriers: Option<Vec<String>>) -> RateQuote {
        if cart.is_empty() {
            return RateQuote::failure("Your cart is empty");
        }
        let Some(destination_postal_code) = postal_code(destination) else {
            return RateQuote::failure("Destination postal code is invalid");
        };
        let Some(origin_postal_code) = postal_code(&self.origin_postal_code) else {
            error!(origin = %self.origin_postal_code, "origin postal code is misconfigured");
            return RateQuote::failure("Shipping rates are unavailable right now, please try again");
        };

        let couriers = couriers
            .map(|list| list.into_iter().map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty()).collect::<Vec<_>>())
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| self.couriers.clone());

        let request = RateRequest {
            origin_postal_code,
            destination_postal_code,
            couriers: couriers.join(","),
            items: self.manifest(cart),
        };
        match self.rates.rates(&request).await {
            Ok(rates) if rates.is_empty() => {
                warn!(destination = destination_postal_code, "no courier serves this destination");
                RateQuote { success: true, rates, message: Some("No courier serves this destination".into()) }
            }
            Ok(rates) => RateQuote { success: true, rates, message: None },
            Err(e) => {
                error!(destination = destination_postal_code, error = %e, "rate lookup failed");
                RateQuote::failure("Shipping rates are unavailable right now, please try again")
            }
        }
    }

    /// One manifest line per cart line, valued at price times quantity.
    fn manifest(&self, cart: &Cart) -> Vec<RateItem> {
        cart.items()
            .map(|(_, line)| RateItem {
                name: line.name.clone(),
                value: minor_units(line.price * Decimal::from(line.quantity)).unwrap_or(0),
                weight: self.item_weight_grams,
                quantity: line.quantity,
            })
            .collect()
    }
}

fn postal_code(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Product, ProductSize};
    use crate::gateway::GatewayError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<RateRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl CourierRates for Recorder {
        async fn rates(&self, request: &RateRequest) -> Result<Vec<RateOption>, GatewayError> {
            self.seen.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(GatewayError::Rejected { status: 500, body: "down".into() });
            }
            Ok(vec![RateOption {
                courier: "jne".into(), courier_name: "JNE".into(), service: "reg".into(), service_name: "Reguler".into(),
                price: 18_000, duration: Some("2 - 3 days".into()),
            }])
        }
    }

    fn cart() -> Cart {
        let product = Product {
            id: Uuid::new_v4(), name: "Kemeja Parang".into(), slug: "kemeja-parang".into(),
            price: Decimal::new(250_000, 0), image: None, stock: 0,
            sizes: vec![ProductSize { size: "M".into(), stock: 5 }],
        };
        Cart::new().add(&product, 2, Some("M")).unwrap()
    }

    #[tokio::test]
    async fn test_manifest_values_lines() {
        let recorder = Arc::new(Recorder::default());
        let service = ShippingService::new(recorder.clone(), "55281", vec!["jne".into(), "jnt".into()], 1000);

        let quote = service.rates_for_cart(&cart(), "12950", None).await;
        assert!(quote.success);
        assert_eq!(quote.rates.len(), 1);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen[0].couriers, "jne,jnt");
        assert_eq!(seen[0].origin_postal_code, 55281);
        assert_eq!(seen[0].items[0].value, 500_000);
        assert_eq!(seen[0].items[0].weight, 1000);
        assert_eq!(seen[0].items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_failures_are_structured() {
        let recorder = Arc::new(Recorder { fail: true, ..Default::default() });
        let service = ShippingService::new(recorder, "55281", vec!["jne".into()], 1000);

        let quote = service.rates_for_cart(&cart(), "12950", Some(vec!["SiCepat".into()])).await;
        assert!(!quote.success);
        assert!(quote.message.is_some());

        let bad = service.rates_for_cart(&cart(), "12-950", None).await;
        assert!(!bad.success);
    }
}
