//! Postgres store over sqlx.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{draft_items, draft_order, FulfilmentUpdate, NewOrder, Store};
use crate::domain::aggregates::{Coupon, Order, OrderError, OrderItem, OrderStatus, Product, ProductSize, ShippingAddress, StatusTransition};
use crate::domain::events::OrderSnapshot;
use crate::domain::value_objects::{OrderNumber, PaymentReference};
use crate::{Result, StoreError};

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: Option<String>,
    user_id: Option<Uuid>,
    guest_name: Option<String>,
    guest_email: Option<String>,
    status: String,
    payment_status: String,
    total_price: Decimal,
    total_amount: Option<Decimal>,
    shipping_cost: Decimal,
    discount: Decimal,
    courier: Option<String>,
    courier_service: Option<String>,
    coupon_id: Option<Uuid>,
    shipping_address_id: Option<Uuid>,
    payment_token: Option<String>,
    payment_url: Option<String>,
    payment_reference: Option<String>,
    tracking_number: Option<String>,
    tracking_url: Option<String>,
    notes: Option<String>,
    admin_notes: Option<String>,
    stock_committed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(r: OrderRow) -> Result<Self> {
        let corrupt = |what: String| StoreError::Validation(format!("order {} has {what}", r.id));
        Ok(Order {
            id: r.id,
            order_number: r.order_number.as_deref().map(OrderNumber::parse).transpose().map_err(|e| corrupt(e.to_string()))?,
            user_id: r.user_id,
            guest_name: r.guest_name,
            guest_email: r.guest_email,
            status: r.status.parse().map_err(|e: OrderError| corrupt(e.to_string()))?,
            payment_status: r.payment_status.parse().map_err(|e: OrderError| corrupt(e.to_string()))?,
            total_price: r.total_price,
            total_amount: r.total_amount,
            shipping_cost: r.shipping_cost,
            discount: r.discount,
            courier: r.courier,
            courier_service: r.courier_service,
            coupon_id: r.coupon_id,
            shipping_address_id: r.shipping_address_id,
            payment_token: r.payment_token,
            payment_url: r.payment_url,
            payment_reference: r.payment_reference.map(PaymentReference::new),
            tracking_number: r.tracking_number,
            tracking_url: r.tracking_url,
            notes: r.notes,
            admin_notes: r.admin_notes,
            stock_committed: r.stock_committed,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow { id: Uuid, order_id: Uuid, product_id: Uuid, product_name: String, quantity: i32, price: Decimal, size: Option<String> }

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        OrderItem {
            id: r.id, order_id: r.order_id, product_id: r.product_id, product_name: r.product_name,
            quantity: u32::try_from(r.quantity).unwrap_or(0), price: r.price, size: r.size,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow { id: Uuid, name: String, slug: String, price: Decimal, image: Option<String>, stock: i32 }

#[derive(Debug, sqlx::FromRow)]
struct SizeRow { size: String, stock: i32 }

#[derive(Debug, sqlx::FromRow)]
struct CouponRow { id: Uuid, code: String, discount_percent: Decimal, valid_from: Option<DateTime<Utc>>, valid_until: Option<DateTime<Utc>>, active: bool }

#[derive(Debug, sqlx::FromRow)]
struct AddressRow { id: Uuid, order_id: Option<Uuid>, full_name: String, address: String, city: String, province: String, postal_code: String, phone: String }

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Serialises number assignment until the surrounding transaction ends.
    async fn lock_numbering(conn: &mut PgConnection) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('orders.order_number'))").execute(conn).await?;
        Ok(())
    }

    /// One past the highest sequence of the day, so numbers freed by deleted
    /// orders are never handed out while a later one is still live.
    async fn next_number(conn: &mut PgConnection, date: NaiveDate) -> Result<OrderNumber> {
        let prefix = format!("{}-", OrderNumber::day_prefix(date));
        let (highest,): (Option<i32>,) = sqlx::query_as("SELECT MAX(SUBSTRING(order_number FROM $2)::int) FROM orders WHERE order_number LIKE $1")
            .bind(format!("{prefix}%"))
            .bind(i32::try_from(prefix.len() + 1).unwrap_or(14))
            .fetch_one(conn)
            .await?;
        let highest = highest.and_then(|h| u32::try_from(h).ok()).unwrap_or(0);
        Ok(OrderNumber::new(date, highest.saturating_add(1)))
    }

    async fn fetch_order(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn require_order(&self, id: Uuid) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_order(&mut conn, id).await?.ok_or_else(|| StoreError::NotFound(format!("Order {id}")))
    }
}

fn quantity(q: u32) -> Result<i32> {
    i32::try_from(q).map_err(|_| StoreError::Validation(format!("quantity {q} is out of range")))
}

#[async_trait]
impl Store for PgStore {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        let Some(row) = sqlx::query_as::<_, ProductRow>("SELECT id, name, slug, price, image, stock FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let sizes = sqlx::query_as::<_, SizeRow>("SELECT size, stock FROM product_sizes WHERE product_id = $1 ORDER BY size")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(Some(Product {
            id: row.id, name: row.name, slug: row.slug, price: row.price, image: row.image, stock: row.stock,
            sizes: sizes.into_iter().map(|s| ProductSize { size: s.size, stock: s.stock }).collect(),
        }))
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1")
            .bind(Coupon::normalize_code(code))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Coupon {
            id: r.id, code: r.code, discount_percent: r.discount_percent, valid_from: r.valid_from, valid_until: r.valid_until, active: r.active,
        }))
    }

    async fn user_email(&self, user_id: Uuid) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(email,)| email))
    }

    async fn create_order(&self, draft: NewOrder) -> Result<OrderSnapshot> {
        if draft.items.is_empty() {
            return Err(StoreError::Validation("An order needs at least one item".into()));
        }
        let mut tx = self.pool.begin().await?;

        let address_id = Uuid::now_v7();
        let mut order = draft_order(&draft, address_id, Utc::now());
        Self::lock_numbering(&mut tx).await?;
        let number = Self::next_number(&mut tx, order.created_at.date_naive()).await?;
        order.apply_creation_defaults(|_| number);
        let items = draft_items(&draft, order.id);

        let a = &draft.address;
        sqlx::query("INSERT INTO shipping_addresses (id, order_id, full_name, address, city, province, postal_code, phone) VALUES ($1, NULL, $2, $3, $4, $5, $6, $7)")
            .bind(address_id).bind(&a.full_name).bind(&a.address).bind(&a.city).bind(&a.province).bind(&a.postal_code).bind(&a.phone)
            .execute(&mut *tx).await?;

        sqlx::query("INSERT INTO orders (id, order_number, user_id, guest_name, guest_email, status, payment_status, total_price, total_amount, shipping_cost, discount, courier, courier_service, coupon_id, shipping_address_id, notes, stock_committed, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, FALSE, $17, $17)")
            .bind(order.id).bind(order.order_number.as_ref().map(OrderNumber::as_str)).bind(order.user_id)
            .bind(&order.guest_name).bind(&order.guest_email).bind(order.status.as_str()).bind(order.payment_status.as_str())
            .bind(order.total_price).bind(order.total_amount).bind(order.shipping_cost).bind(order.discount)
            .bind(&order.courier).bind(&order.courier_service).bind(order.coupon_id).bind(order.shipping_address_id)
            .bind(&order.notes).bind(order.created_at)
            .execute(&mut *tx).await?;

        for item in &items {
            sqlx::query("INSERT INTO order_items (id, order_id, product_id, product_name, quantity, price, size) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                .bind(item.id).bind(item.order_id).bind(item.product_id).bind(&item.product_name)
                .bind(quantity(item.quantity)?).bind(item.price).bind(&item.size)
                .execute(&mut *tx).await?;
        }

        sqlx::query("UPDATE shipping_addresses SET order_id = $1 WHERE id = $2 AND order_id IS NULL")
            .bind(order.id).bind(address_id)
            .execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(OrderSnapshot { order, items })
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_order(&mut conn, id).await
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    async fn shipping_address(&self, id: Uuid) -> Result<Option<ShippingAddress>> {
        let row = sqlx::query_as::<_, AddressRow>("SELECT * FROM shipping_addresses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| ShippingAddress {
            id: r.id, order_id: r.order_id, full_name: r.full_name, address: r.address, city: r.city,
            province: r.province, postal_code: r.postal_code, phone: r.phone,
        }))
    }

    async fn order_by_payment_reference(&self, reference: &PaymentReference) -> Result<Option<Order>> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE payment_reference = $1")
            .bind(reference.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn list_orders(&self, page: u32, per_page: u32) -> Result<(Vec<Order>, i64)> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders ORDER BY created_at DESC LIMIT $1 OFFSET $2")
            .bind(i64::from(per_page))
            .bind(i64::from(page.max(1) - 1) * i64::from(per_page))
            .fetch_all(&self.pool)
            .await?;
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders").fetch_one(&self.pool).await?;
        let orders = rows.into_iter().map(Order::try_from).collect::<Result<Vec<_>>>()?;
        Ok((orders, total))
    }

    async fn save_payment_session(&self, order_id: Uuid, token: &str, url: &str, reference: &PaymentReference) -> Result<()> {
        let done = sqlx::query("UPDATE orders SET payment_token = $2, payment_url = $3, payment_reference = $4, updated_at = NOW() WHERE id = $1")
            .bind(order_id).bind(token).bind(url).bind(reference.as_str())
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Order {order_id}")));
        }
        Ok(())
    }

    async fn apply_transition(&self, order_id: Uuid, transition: &StatusTransition) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("UPDATE orders SET status = $2, payment_status = $3, updated_at = NOW() WHERE id = $1 AND status = $4 AND payment_status = $5 RETURNING *")
            .bind(order_id)
            .bind(transition.to.as_str())
            .bind(transition.payment_to.as_str())
            .bind(transition.from.as_str())
            .bind(transition.payment_from.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Order::try_from(row)?)),
            None => self.require_order(order_id).await.map(|_| None),
        }
    }

    async fn commit_stock(&self, order_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query("UPDATE orders SET stock_committed = TRUE WHERE id = $1 AND stock_committed = FALSE")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return self.require_order(order_id).await.map(|_| false);
        }

        let items = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .fetch_all(&mut *tx)
            .await?;
        for item in items {
            match &item.size {
                Some(size) => {
                    sqlx::query("UPDATE product_sizes SET stock = stock - $3 WHERE product_id = $1 AND size = $2")
                        .bind(item.product_id).bind(size).bind(item.quantity)
                        .execute(&mut *tx).await?;
                }
                None => {
                    sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1")
                        .bind(item.product_id).bind(item.quantity)
                        .execute(&mut *tx).await?;
                }
            }
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn record_payment_event(&self, key: &str, order_id: Uuid) -> Result<bool> {
        let inserted = sqlx::query("INSERT INTO payment_events (key, order_id, received_at) VALUES ($1, $2, NOW()) ON CONFLICT (key) DO NOTHING")
            .bind(key)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(inserted.rows_affected() == 1)
    }

    async fn forget_payment_event(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM payment_events WHERE key = $1").bind(key).execute(&self.pool).await?;
        Ok(())
    }

    async fn update_fulfilment(&self, order_id: Uuid, update: &FulfilmentUpdate) -> Result<Option<Order>> {
        sqlx::query_as::<_, OrderRow>("UPDATE orders SET tracking_number = COALESCE($2, tracking_number), tracking_url = COALESCE($3, tracking_url), admin_notes = COALESCE($4, admin_notes), updated_at = NOW() WHERE id = $1 RETURNING *")
            .bind(order_id)
            .bind(&update.tracking_number)
            .bind(&update.tracking_url)
            .bind(&update.admin_notes)
            .fetch_optional(&self.pool)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn delete_cancelled_order(&self, order_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let deleted: Option<(Option<Uuid>,)> = sqlx::query_as("DELETE FROM orders WHERE id = $1 AND status = $2 RETURNING shipping_address_id")
            .bind(order_id)
            .bind(OrderStatus::Cancelled.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let Some((address_id,)) = deleted else {
            tx.rollback().await?;
            return Ok(false);
        };
        if let Some(address_id) = address_id {
            sqlx::query("DELETE FROM shipping_addresses WHERE id = $1").bind(address_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn backfill_legacy_orders(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        Self::lock_numbering(&mut tx).await?;
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE order_number IS NULL OR total_amount IS NULL ORDER BY created_at")
            .fetch_all(&mut *tx)
            .await?;

        let mut fixed = 0;
        for row in rows {
            let mut order = Order::try_from(row)?;
            let number = match order.order_number {
                Some(_) => None,
                None => Some(Self::next_number(&mut tx, order.created_at.date_naive()).await?),
            };
            if !order.apply_creation_defaults(|date| number.unwrap_or_else(|| OrderNumber::new(date, 1))) {
                continue;
            }
            sqlx::query("UPDATE orders SET order_number = COALESCE(order_number, $2), total_amount = COALESCE(total_amount, $3) WHERE id = $1")
                .bind(order.id)
                .bind(order.order_number.as_ref().map(OrderNumber::as_str))
                .bind(order.total_amount)
                .execute(&mut *tx)
                .await?;
            fixed += 1;
        }
        tx.commit().await?;
        Ok(fixed)
    }
}
