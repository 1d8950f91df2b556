//! Batik Store - storefront order back-end

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batik_store::api::{self, AppState};
use batik_store::config::AppConfig;
use batik_store::gateway::{self, BiteshipClient, MidtransClient};
use batik_store::repository::{MemoryStore, PgStore, Store};
use batik_store::services::{InMemoryMailQueue, MailQueue, NatsMailQueue};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = AppConfig::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            Arc::new(PgStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let mail: Arc<dyn MailQueue> = match &config.nats_url {
        Some(url) => Arc::new(NatsMailQueue::new(async_nats::connect(url.as_str()).await?, config.mail_subject.clone())),
        None => {
            tracing::warn!("NATS_URL not set, mails are queued in memory");
            Arc::new(InMemoryMailQueue::new())
        }
    };

    let http = gateway::http_client(config.http_timeout)?;
    let payments = Arc::new(MidtransClient::new(http.clone(), &config.payment));
    let rates = Arc::new(BiteshipClient::new(http, config.shipping.api_key.clone(), &config.shipping.base_url));
    let state = AppState::new(store, mail, payments, rates, &config.payment, &config.shipping);

    let app = api::router(state);
    tracing::info!("Batik Store listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}
