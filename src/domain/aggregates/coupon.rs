//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_percent: Decimal,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Coupon {
    /// Coupon codes are matched case-insensitively and stored upper-case.
    pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

    /// Active and `now` inside the window. Open bounds are unbounded.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.valid_from.map_or(true, |from| now >= from)
            && self.valid_until.map_or(true, |until| now <= until)
    }

    /// Percentage of the subtotal, never more than the subtotal itself.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let discount = (subtotal * self.discount_percent / Decimal::ONE_HUNDRED).round_dp(2);
        discount.clamp(Decimal::ZERO, subtotal.max(Decimal::ZERO))
    }
}
