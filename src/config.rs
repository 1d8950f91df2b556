//! Runtime configuration, read from the environment (and `.env` when present).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{Result, StoreError};

const MIDTRANS_SANDBOX_SNAP: &str = "https://app.sandbox.midtrans.com/snap/v1";
const MIDTRANS_SANDBOX_API: &str = "https://api.sandbox.midtrans.com/v2";
const MIDTRANS_SNAP: &str = "https://app.midtrans.com/snap/v1";
const MIDTRANS_API: &str = "https://api.midtrans.com/v2";
const BITESHIP_API: &str = "https://api.biteship.com/v1";
const DEFAULT_COURIERS: &str = "jne,jnt,sicepat,anteraja,pos";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub mail_subject: String,
    pub http_timeout: Duration,
    pub payment: PaymentConfig,
    pub shipping: ShippingConfig,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub server_key: String,
    pub snap_base_url: String,
    pub api_base_url: String,
    pub finish_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShippingConfig {
    pub api_key: String,
    pub base_url: String,
    pub origin_postal_code: String,
    pub couriers: Vec<String>,
    pub item_weight_grams: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let production = parse_or("MIDTRANS_PRODUCTION", false)?;
        let (snap, api) = if production { (MIDTRANS_SNAP, MIDTRANS_API) } else { (MIDTRANS_SANDBOX_SNAP, MIDTRANS_SANDBOX_API) };

        let couriers = optional("SHIPPING_COURIERS").unwrap_or_else(|| DEFAULT_COURIERS.to_string());

        let config = Self {
            port: parse_or("PORT", 8083)?,
            database_url: optional("DATABASE_URL"),
            nats_url: optional("NATS_URL"),
            mail_subject: optional("MAIL_SUBJECT").unwrap_or_else(|| "store.mail".to_string()),
            http_timeout: Duration::from_secs(parse_or("HTTP_TIMEOUT_SECS", 15)?),
            payment: PaymentConfig {
                server_key: required("MIDTRANS_SERVER_KEY")?,
                snap_base_url: optional("MIDTRANS_SNAP_URL").unwrap_or_else(|| snap.to_string()),
                api_base_url: optional("MIDTRANS_API_URL").unwrap_or_else(|| api.to_string()),
                finish_url: optional("PAYMENT_FINISH_URL"),
            },
            shipping: ShippingConfig {
                api_key: required("BITESHIP_API_KEY")?,
                base_url: optional("BITESHIP_BASE_URL").unwrap_or_else(|| BITESHIP_API.to_string()),
                origin_postal_code: required("SHIPPING_ORIGIN_POSTAL_CODE")?,
                couriers: split_couriers(&couriers),
                item_weight_grams: parse_or("SHIPPING_ITEM_WEIGHT_GRAMS", 1000)?,
            },
        };
        tracing::info!(port = config.port, postgres = config.database_url.is_some(), nats = config.nats_url.is_some(), "configuration loaded");
        Ok(config)
    }
}

pub fn split_couriers(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|c| !c.is_empty()).map(str::to_lowercase).collect()
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| StoreError::Config(format!("missing environment variable {name}")))
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.trim().parse().map_err(|e| StoreError::Config(format!("invalid {name}={raw}: {e}"))),
        None => Ok(default),
    }
}
