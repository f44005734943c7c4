//! Payment API handlers: gateway order creation, the client verify
//! callback and the Razorpay webhook.
//!
//! The verify path and the webhook both drive the same transition to
//! `SUCCESS` + `PROCESSING`; whichever lands second repeats an identical
//! write, so no coordination between them is needed.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::gateway::{self, OrderNotes};
use crate::handlers::orders::fetch_order;
use crate::models::{ApiResponse, MessageResponse, OrderStatus, Payment, PaymentStatus};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentOrderRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrderResponse {
    pub razorpay_order_id: String,
    pub amount: Decimal,
    pub currency: String,
    /// Publishable key for the checkout widget. The secret never leaves
    /// the server.
    pub key: String,
}

/// Creates the remote gateway order for a pending local order and upserts
/// the payment row.
pub async fn create_payment_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreatePaymentOrderRequest>,
) -> AppResult<Json<ApiResponse<PaymentOrderResponse>>> {
    let order = fetch_order(&state.db, req.order_id).await?;
    if order.user_id != user.sub {
        return Err(AppError::Forbidden);
    }
    if order.status != OrderStatus::Pending {
        return Err(AppError::Conflict("Order is not in pending status".into()));
    }

    let existing = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE order_id = $1")
        .bind(order.id)
        .fetch_optional(&state.db)
        .await?;
    if existing
        .as_ref()
        .is_some_and(|payment| payment.status == PaymentStatus::Success)
    {
        return Err(AppError::Conflict("Payment already completed".into()));
    }

    let amount_minor = (order.total * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("order total out of range")))?;

    let notes = OrderNotes {
        order_id: order.id,
        user_id: user.sub,
    };
    let gateway_order = state
        .gateway
        .create_order(amount_minor, "INR", &order.id.to_string(), &notes)
        .await?;

    sqlx::query(
        "INSERT INTO payments (order_id, razorpay_order_id, amount, currency) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (order_id) DO UPDATE \
         SET razorpay_order_id = EXCLUDED.razorpay_order_id, status = 'PENDING', updated_at = NOW()",
    )
    .bind(order.id)
    .bind(&gateway_order.id)
    .bind(order.total)
    .bind(&gateway_order.currency)
    .execute(&state.db)
    .await?;

    Ok(Json(ApiResponse::new(PaymentOrderResponse {
        amount: Decimal::new(gateway_order.amount, 2),
        razorpay_order_id: gateway_order.id,
        currency: gateway_order.currency,
        key: state.gateway.key_id().to_string(),
    })))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1))]
    pub razorpay_order_id: String,
    #[validate(length(min = 1))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1))]
    pub razorpay_signature: String,
}

/// Client-side completion callback. The signature check comes before any
/// state is read, so a forged request learns nothing.
pub async fn verify_payment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<VerifyPaymentRequest>,
) -> AppResult<Json<MessageResponse>> {
    req.validate()
        .map_err(|err| AppError::Validation(err.to_string()))?;

    if !gateway::verify_payment_signature(
        &req.razorpay_order_id,
        &req.razorpay_payment_id,
        &req.razorpay_signature,
        &state.config.razorpay_key_secret,
    ) {
        return Err(AppError::Signature);
    }

    let order = fetch_order(&state.db, req.order_id).await?;
    if order.user_id != user.sub {
        return Err(AppError::Forbidden);
    }

    // The gateway, not the client, is authoritative for the outcome.
    let payment = state.gateway.fetch_payment(&req.razorpay_payment_id).await?;

    if payment.status == "captured" {
        record_capture(
            &state,
            order.id,
            &req.razorpay_payment_id,
            payment.method.as_deref(),
        )
        .await?;
        state.shipment_sync.enqueue(order.id);
        tracing::info!(order_id = %order.id, "shipment sync triggered by payment verification");
    } else {
        record_failure(
            &state,
            order.id,
            &req.razorpay_payment_id,
            payment.method.as_deref(),
        )
        .await?;
    }

    Ok(Json(MessageResponse::new("Payment verified successfully")))
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    payload: Option<WebhookPayload>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    payment: Option<WebhookPaymentWrapper>,
}

#[derive(Debug, Deserialize)]
struct WebhookPaymentWrapper {
    entity: Option<PaymentEntity>,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    method: Option<String>,
    #[serde(default)]
    notes: Value,
}

impl WebhookEvent {
    fn payment_entity(&self) -> Option<&PaymentEntity> {
        self.payload.as_ref()?.payment.as_ref()?.entity.as_ref()
    }
}

/// The order id travels in the notes we attach when creating the gateway
/// order; an event without it cannot be correlated and is ignored.
fn order_id_from_notes(notes: &Value) -> Option<Uuid> {
    notes.get("orderId")?.as_str()?.parse().ok()
}

/// Razorpay webhook. Unauthenticated channel: the HMAC over the raw body
/// is the only thing that makes the event trustworthy, so it is checked
/// against the raw bytes before anything is parsed or touched.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get("x-razorpay-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !gateway::verify_webhook_signature(&body, signature, state.config.webhook_secret()) {
        return Err(AppError::Signature);
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|_| AppError::Validation("Malformed webhook payload".into()))?;

    match event.event.as_str() {
        "payment.captured" => {
            if let Some(entity) = event.payment_entity() {
                match order_id_from_notes(&entity.notes) {
                    Some(order_id) => {
                        record_capture(&state, order_id, &entity.id, entity.method.as_deref())
                            .await?;
                        state.shipment_sync.enqueue(order_id);
                        tracing::info!(%order_id, "shipment sync triggered by webhook");
                    }
                    None => {
                        tracing::warn!(
                            payment_id = %entity.id,
                            "payment.captured event without order note, ignoring"
                        );
                    }
                }
            }
        }
        "payment.failed" => {
            if let Some(entity) = event.payment_entity() {
                match order_id_from_notes(&entity.notes) {
                    Some(order_id) => {
                        record_failure(&state, order_id, &entity.id, entity.method.as_deref())
                            .await?;
                    }
                    None => {
                        tracing::warn!(
                            payment_id = %entity.id,
                            "payment.failed event without order note, ignoring"
                        );
                    }
                }
            }
        }
        other => tracing::debug!(event = other, "ignoring webhook event"),
    }

    Ok(Json(json!({ "received": true })))
}

/// Marks the payment captured and moves the order into processing, in one
/// transaction. Replaying the same capture repeats identical writes, so
/// the verify path and the webhook can both run it safely.
async fn record_capture(
    state: &AppState,
    order_id: Uuid,
    razorpay_payment_id: &str,
    method: Option<&str>,
) -> AppResult<()> {
    let mut tx = state.db.begin().await?;

    sqlx::query(
        "UPDATE payments \
         SET razorpay_payment_id = $2, status = 'SUCCESS', method = $3, updated_at = NOW() \
         WHERE order_id = $1",
    )
    .bind(order_id)
    .bind(razorpay_payment_id)
    .bind(method)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE orders SET status = 'PROCESSING' WHERE id = $1 AND status = 'PENDING'")
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// A failure never overwrites a success: a late or replayed
/// `payment.failed` after capture is a no-op.
async fn record_failure(
    state: &AppState,
    order_id: Uuid,
    razorpay_payment_id: &str,
    method: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE payments \
         SET razorpay_payment_id = $2, status = 'FAILED', method = $3, updated_at = NOW() \
         WHERE order_id = $1 AND status <> 'SUCCESS'",
    )
    .bind(order_id)
    .bind(razorpay_payment_id)
    .bind(method)
    .execute(&state.db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_event_parses_captured_payload() {
        let body = json!({
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_29QQoUBi66xm2f",
                        "amount": 45000,
                        "method": "upi",
                        "notes": {
                            "orderId": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
                            "userId": "8fa85f64-5717-4562-b3fc-2c963f66afa1"
                        }
                    }
                }
            }
        });

        let event: WebhookEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.event, "payment.captured");
        let entity = event.payment_entity().unwrap();
        assert_eq!(entity.id, "pay_29QQoUBi66xm2f");
        assert_eq!(entity.method.as_deref(), Some("upi"));
        assert_eq!(
            order_id_from_notes(&entity.notes),
            "3fa85f64-5717-4562-b3fc-2c963f66afa6".parse().ok()
        );
    }

    #[test]
    fn notes_without_order_id_yield_none() {
        assert_eq!(order_id_from_notes(&json!({})), None);
        assert_eq!(order_id_from_notes(&json!([])), None);
        assert_eq!(order_id_from_notes(&json!({"userId": "u1"})), None);
        assert_eq!(order_id_from_notes(&json!({"orderId": 42})), None);
        assert_eq!(
            order_id_from_notes(&json!({"orderId": "not-a-uuid"})),
            None
        );
    }

    #[test]
    fn webhook_event_tolerates_missing_payload() {
        let event: WebhookEvent =
            serde_json::from_value(json!({"event": "order.paid"})).unwrap();
        assert!(event.payment_entity().is_none());
    }

    #[test]
    fn verify_request_rejects_blank_fields() {
        let req = VerifyPaymentRequest {
            order_id: Uuid::new_v4(),
            razorpay_order_id: "order_abc".into(),
            razorpay_payment_id: String::new(),
            razorpay_signature: "sig".into(),
        };
        assert!(req.validate().is_err());
    }
}
