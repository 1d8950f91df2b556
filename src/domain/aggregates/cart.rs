//! Cart Aggregate
//!
//! A session cart is a plain value: every mutation hands back a new cart and
//! leaves the original untouched, so the caller decides when to store it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::Product;
use crate::domain::value_objects::ItemKey;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    items: BTreeMap<ItemKey, CartLine>,
    #[serde(with = "rust_decimal::serde::float")]
    total: Decimal,
}

/// Product snapshot plus quantity, as exchanged with the storefront.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: Uuid,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub image: Option<String>,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub slug: String,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal { self.price * Decimal::from(self.quantity) }
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    pub fn items(&self) -> impl Iterator<Item = (&ItemKey, &CartLine)> { self.items.iter() }
    pub fn line(&self, key: &ItemKey) -> Option<&CartLine> { self.items.get(key) }
    pub fn total(&self) -> Decimal { self.total }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Adds `quantity` of `product`, merging into an existing line with the same key.
    pub fn add(&self, product: &Product, quantity: u32, size: Option<&str>) -> Result<Cart, CartError> {
        if quantity == 0 { return Err(CartError::InvalidQuantity); }
        let size = match (product.has_sizes(), size) {
            (true, None) => return Err(CartError::SizeRequired(product.name.clone())),
            (true, Some(s)) if !product.sizes.iter().any(|ps| ps.size == s) => {
                return Err(CartError::UnknownSize { product: product.name.clone(), size: s.to_string() })
            }
            (true, Some(s)) => Some(s.to_string()),
            (false, _) => None,
        };

        let key = ItemKey::new(product.id, size.as_deref());
        let wanted = self.items.get(&key).map_or(0, |l| l.quantity).saturating_add(quantity);
        if !product.can_supply(size.as_deref(), wanted) {
            return Err(CartError::ExceedsStock { product: product.name.clone(), available: product.available_stock(size.as_deref()).max(0) });
        }

        let mut next = self.clone();
        next.items.insert(key, CartLine {
            id: product.id, name: product.name.clone(), price: product.price, image: product.image.clone(),
            quantity: wanted, size, slug: product.slug.clone(),
        });
        Ok(next.recalculated())
    }

    /// Sets a line's quantity. Zero removes the line.
    pub fn update_quantity(&self, key: &ItemKey, quantity: u32) -> Result<Cart, CartError> {
        if !self.items.contains_key(key) { return Err(CartError::ItemNotFound(key.to_string())); }
        let mut next = self.clone();
        if quantity == 0 {
            next.items.remove(key);
        } else if let Some(line) = next.items.get_mut(key) {
            line.quantity = quantity;
        }
        Ok(next.recalculated())
    }

    pub fn remove(&self, key: &ItemKey) -> Result<Cart, CartError> {
        let mut next = self.clone();
        next.items.remove(key).ok_or_else(|| CartError::ItemNotFound(key.to_string()))?;
        Ok(next.recalculated())
    }

    pub fn cleared(&self) -> Cart { Cart::new() }

    fn recalculated(mut self) -> Self {
        self.total = self.items.values().map(CartLine::line_total).sum();
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum CartError {
    #[error("Cart item {0} not found")]
    ItemNotFound(String),
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
    #[error("Please choose a size for {0}")]
    SizeRequired(String),
    #[error("{product} is not available in size {size}")]
    UnknownSize { product: String, size: String },
    #[error("Only {available} of {product} left in stock")]
    ExceedsStock { product: String, available: i32 },
}
