#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use batik_store::api::AppState;
use batik_store::config::{PaymentConfig, ShippingConfig};
use batik_store::domain::aggregates::{Cart, Coupon, Product, ProductSize, ShippingAddress};
use batik_store::domain::reconciliation::{FraudStatus, TransactionStatus};
use batik_store::domain::value_objects::PaymentReference;
use batik_store::gateway::{
    notification_signature, CourierRates, GatewayError, PaymentGateway, RateOption, RateRequest, SnapRequest, SnapSession,
    TransactionReport,
};
use batik_store::repository::{MemoryStore, Store};
use batik_store::services::{CheckoutRequest, InMemoryMailQueue, ShippingSelection};

pub const SERVER_KEY: &str = "SB-Mid-server-test";

/// Payment gateway double: records session requests and answers status
/// lookups with whatever the test scripted.
#[derive(Default)]
pub struct FakeGateway {
    pub requests: Mutex<Vec<SnapRequest>>,
    pub status: Mutex<Option<(TransactionStatus, Option<FraudStatus>)>>,
    pub fail_sessions: Mutex<bool>,
}

impl FakeGateway {
    pub fn script_status(&self, status: TransactionStatus, fraud: Option<FraudStatus>) {
        *self.status.lock().unwrap() = Some((status, fraud));
    }

    pub fn last_request(&self) -> Option<SnapRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_transaction(&self, request: &SnapRequest) -> Result<SnapSession, GatewayError> {
        if *self.fail_sessions.lock().unwrap() {
            return Err(GatewayError::Rejected { status: 401, body: "unauthorized".into() });
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(SnapSession {
            token: format!("tok-{}", request.transaction_details.order_id),
            redirect_url: format!("https://pay.test/{}", request.transaction_details.order_id),
        })
    }

    async fn transaction_status(&self, reference: &PaymentReference) -> Result<TransactionReport, GatewayError> {
        let scripted = *self.status.lock().unwrap();
        let Some((status, fraud)) = scripted else {
            return Err(GatewayError::UnknownTransaction(reference.to_string()));
        };
        let gross = self.requests.lock().unwrap().last().map(|r| r.transaction_details.gross_amount).unwrap_or_default();
        Ok(TransactionReport {
            order_id: reference.to_string(),
            transaction_status: status,
            fraud_status: fraud,
            status_code: "200".into(),
            gross_amount: Some(format!("{gross}.00")),
            transaction_id: Some(format!("tx-{reference}")),
            status_message: None,
            signature_key: None,
        })
    }
}

pub struct FakeRates;

#[async_trait]
impl CourierRates for FakeRates {
    async fn rates(&self, _request: &RateRequest) -> Result<Vec<RateOption>, GatewayError> {
        Ok(vec![RateOption {
            courier: "jne".into(), courier_name: "JNE".into(), service: "reg".into(), service_name: "Reguler".into(),
            price: 18_000, duration: Some("2 - 3 days".into()),
        }])
    }
}

pub struct World {
    pub store: Arc<MemoryStore>,
    pub mail: Arc<InMemoryMailQueue>,
    pub gateway: Arc<FakeGateway>,
    pub state: AppState,
    pub kemeja: Product,
    pub kain: Product,
    pub user_id: Uuid,
}

impl World {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let kemeja = Product {
            id: Uuid::new_v4(), name: "Kemeja Batik Parang".into(), slug: "kemeja-batik-parang".into(),
            price: Decimal::new(250_000, 0), image: Some("/img/parang.jpg".into()), stock: 0,
            sizes: vec![ProductSize { size: "S".into(), stock: 3 }, ProductSize { size: "M".into(), stock: 2 }],
        };
        let kain = Product {
            id: Uuid::new_v4(), name: "Kain Batik Tulis".into(), slug: "kain-batik-tulis".into(),
            price: Decimal::new(500_000, 0), image: None, stock: 4, sizes: vec![],
        };
        store.insert_product(kemeja.clone()).await;
        store.insert_product(kain.clone()).await;
        store.insert_coupon(Coupon {
            id: Uuid::new_v4(), code: "HEMAT15".into(), discount_percent: Decimal::new(15, 0),
            valid_from: None, valid_until: None, active: true,
        }).await;
        store.insert_coupon(Coupon {
            id: Uuid::new_v4(), code: "LAMA".into(), discount_percent: Decimal::new(50, 0),
            valid_from: None, valid_until: None, active: false,
        }).await;
        let user_id = Uuid::new_v4();
        store.insert_user(user_id, "sari@example.com").await;

        let mail = Arc::new(InMemoryMailQueue::new());
        let gateway = Arc::new(FakeGateway::default());
        let payment = PaymentConfig {
            server_key: SERVER_KEY.into(),
            snap_base_url: "http://snap.invalid".into(),
            api_base_url: "http://api.invalid".into(),
            finish_url: Some("https://batik.test/orders/finish".into()),
        };
        let shipping = ShippingConfig {
            api_key: "test".into(),
            base_url: "http://rates.invalid".into(),
            origin_postal_code: "55281".into(),
            couriers: vec!["jne".into(), "jnt".into()],
            item_weight_grams: 1000,
        };
        let state = AppState::new(store.clone(), mail.clone(), gateway.clone(), Arc::new(FakeRates), &payment, &shipping);
        Self { store, mail, gateway, state, kemeja, kain, user_id }
    }

    /// Two sized lines, S and M.
    pub fn cart(&self) -> Cart {
        Cart::new()
            .add(&self.kemeja, 1, Some("S")).unwrap()
            .add(&self.kemeja, 2, Some("M")).unwrap()
    }

    pub async fn stock(&self, product: Uuid, size: Option<&str>) -> i32 {
        self.store.product(product).await.unwrap().unwrap().available_stock(size)
    }
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        id: Uuid::nil(), order_id: None, full_name: "Sari Wulandari".into(), address: "Jl. Malioboro 12".into(),
        city: "Yogyakarta".into(), province: "DI Yogyakarta".into(), postal_code: "55271".into(), phone: "081234567890".into(),
    }
}

pub fn checkout_request(user_id: Option<Uuid>, guest_email: Option<&str>, coupon: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        user_id,
        guest_name: Some("Sari".into()),
        guest_email: guest_email.map(Into::into),
        address: address(),
        shipping: ShippingSelection { courier: "jne".into(), service: "reg".into(), cost: Decimal::new(18_000, 0) },
        coupon_code: coupon.map(Into::into),
        notes: None,
    }
}

/// A gateway notification signed the way the gateway signs it.
pub fn signed_report(reference: &str, status: &str, gross_amount: &str, transaction_id: &str) -> TransactionReport {
    let status_code = if status == "settlement" || status == "capture" { "200" } else { "201" };
    serde_json::from_value(serde_json::json!({
        "order_id": reference,
        "transaction_status": status,
        "status_code": status_code,
        "gross_amount": gross_amount,
        "transaction_id": transaction_id,
        "signature_key": notification_signature(reference, status_code, gross_amount, SERVER_KEY),
    }))
    .unwrap()
}
