//! Jewelcraft Commerce - storefront backend
//!
//! The interesting part is the order pipeline: stock-safe checkout from a
//! cart, Razorpay payment verification (client callback and webhook, both
//! idempotent), asynchronous Shiprocket shipment creation and best-effort
//! tracking normalization.

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod shipping;

use config::Config;
use email::Mailer;
use gateway::RazorpayClient;
use shipping::shiprocket::ShiprocketClient;
use shipping::sync::SyncHandle;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub gateway: RazorpayClient,
    pub carrier: Arc<ShiprocketClient>,
    pub mailer: Mailer,
    pub shipment_sync: SyncHandle,
}
