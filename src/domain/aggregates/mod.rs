//! Aggregates module
pub mod cart;
pub mod coupon;
pub mod order;
pub mod product;

pub use cart::{Cart, CartError, CartLine};
pub use coupon::Coupon;
pub use order::{Order, OrderError, OrderItem, OrderStatus, PaymentStatus, ShippingAddress, StatusTransition};
pub use product::{Product, ProductSize};
