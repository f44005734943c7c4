//! Jewelcraft Commerce service entrypoint.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jewelcraft_commerce::config::Config;
use jewelcraft_commerce::email::Mailer;
use jewelcraft_commerce::gateway::RazorpayClient;
use jewelcraft_commerce::shipping::shiprocket::ShiprocketClient;
use jewelcraft_commerce::shipping::sync;
use jewelcraft_commerce::{routes, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let port = config.port;

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let gateway = RazorpayClient::new(&config);
    let carrier = Arc::new(ShiprocketClient::new(&config));
    let mailer = Mailer::new(&config);
    let shipment_sync = sync::spawn(db.clone(), carrier.clone());

    let state = AppState {
        db,
        config: Arc::new(config),
        gateway,
        carrier,
        mailer,
        shipment_sync,
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("jewelcraft-commerce listening on 0.0.0.0:{port}");
    axum::serve(listener, app).await?;
    Ok(())
}
