//! Product Aggregate

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub price: Decimal,
    pub image: Option<String>,
    /// General stock, used when the product has no sizes.
    pub stock: i32,
    pub sizes: Vec<ProductSize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSize {
    pub size: String,
    pub stock: i32,
}

impl Product {
    pub fn has_sizes(&self) -> bool { !self.sizes.is_empty() }

    /// Stock that backs a line for `size`.
    ///
    /// Sized products only answer for a known size; unsized products ignore
    /// the argument and report general stock.
    pub fn available_stock(&self, size: Option<&str>) -> i32 {
        if !self.has_sizes() {
            return self.stock;
        }
        size.and_then(|wanted| self.sizes.iter().find(|s| s.size == wanted))
            .map(|s| s.stock)
            .unwrap_or(0)
    }

    pub fn can_supply(&self, size: Option<&str>, quantity: u32) -> bool {
        i64::from(self.available_stock(size)) >= i64::from(quantity)
    }

    /// Removes `quantity` from the stock that backs `size`.
    pub fn decrement(&mut self, size: Option<&str>, quantity: u32) {
        let quantity = i32::try_from(quantity).unwrap_or(i32::MAX);
        if !self.has_sizes() {
            self.stock -= quantity;
            return;
        }
        if let Some(entry) = size.and_then(|wanted| self.sizes.iter_mut().find(|s| s.size == wanted)) {
            entry.stock -= quantity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shirt() -> Product {
        Product {
            id: Uuid::new_v4(), name: "Kemeja Parang".into(), slug: "kemeja-parang".into(),
            price: Decimal::new(250_000, 0), image: None, stock: 0,
            sizes: vec![ProductSize { size: "S".into(), stock: 2 }, ProductSize { size: "M".into(), stock: 0 }],
        }
    }

    #[test]
    fn test_sized_stock() {
        let p = shirt();
        assert!(p.can_supply(Some("S"), 2));
        assert!(!p.can_supply(Some("S"), 3));
        assert!(!p.can_supply(Some("M"), 1));
        assert!(!p.can_supply(Some("XL"), 1));
        assert!(!p.can_supply(None, 1));
    }

    #[test]
    fn test_general_stock() {
        let mut p = shirt();
        p.sizes.clear();
        p.stock = 5;
        assert!(p.can_supply(None, 5));
        p.decrement(None, 4);
        assert_eq!(p.available_stock(None), 1);
    }
}
