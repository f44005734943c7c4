//! Route table and middleware layers.

use axum::routing::{get, post, put};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{orders, payments};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route("/orders/admin/all", get(orders::admin_list_orders))
        .route("/orders/admin/:id/status", put(orders::admin_update_status))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/cancel", put(orders::cancel_order))
        .route("/orders/:id/tracking", get(orders::get_tracking))
        .route("/payments/create-order", post(payments::create_payment_order))
        .route("/payments/verify", post(payments::verify_payment))
        // Webhook carries no auth token; the body signature is its auth.
        .route("/payments/webhook", post(payments::webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy", "service": "jewelcraft-commerce"}))
}
