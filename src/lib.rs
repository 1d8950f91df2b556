//! Batik Store order back-end
//!
//! Storefront checkout and back-office order handling for a batik retailer.
//!
//! ## Features
//! - Session carts with per-size lines
//! - Checkout into persisted orders with coupons and shipping
//! - Payment sessions and status reconciliation against the gateway
//! - Stock commit and customer mail fan-out on status transitions
//! - Courier rate lookup

pub mod api;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod repository;
pub mod services;

use thiserror::Error;

use crate::domain::aggregates::{CartError, OrderError};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("Insufficient stock for {product}{}", size_suffix(.size))]
    InsufficientStock { product: String, size: Option<String> },

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("{0}")]
    InvariantViolation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Mail queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<OrderError> for StoreError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::CancelAfterPaid(_) => StoreError::InvariantViolation(err.to_string()),
            OrderError::NotCancelled(_) => StoreError::InvariantViolation(err.to_string()),
            OrderError::UnknownStatus(_) => StoreError::Validation(err.to_string()),
        }
    }
}

impl From<CartError> for StoreError {
    fn from(err: CartError) -> Self {
        StoreError::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for StoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        StoreError::Validation(err.to_string())
    }
}

fn size_suffix(size: &Option<String>) -> String {
    size.as_ref().map(|s| format!(" (size {s})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, StoreError>;
