//! Fills order numbers and total amounts on orders written before those
//! columns were populated. Safe to run repeatedly.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batik_store::repository::PgStore;
use batik_store::services::{EventDispatcher, OrderService};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let url = std::env::var("DATABASE_URL").context("DATABASE_URL must point at the store database")?;
    let db = PgPoolOptions::new().max_connections(2).connect(&url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let orders = OrderService::new(Arc::new(PgStore::new(db)), EventDispatcher::new());
    let fixed = orders.backfill_legacy_orders().await?;
    tracing::info!(fixed, "backfill finished");
    Ok(())
}
