//! Razorpay client: remote order creation, payment lookup and signature
//! verification.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Remote payment-intent object, created before the customer pays.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    pub status: String,
    pub method: Option<String>,
}

/// Correlation notes attached to the remote order; the webhook echoes
/// these back, which is how events are tied to local orders.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotes {
    pub order_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: &'a OrderNotes,
}

#[derive(Debug, Clone)]
pub struct RazorpayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl RazorpayClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: config.razorpay_base_url.trim_end_matches('/').to_string(),
            key_id: config.razorpay_key_id.clone(),
            key_secret: config.razorpay_key_secret.clone(),
        }
    }

    /// Publishable key, safe to hand to the checkout frontend.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Creates a remote order for `amount` minor units. Failures surface to
    /// the caller; the user is waiting on this request and must be told to
    /// retry.
    pub async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
        notes: &OrderNotes,
    ) -> Result<GatewayOrder, AppError> {
        let body = CreateOrderBody {
            amount,
            currency,
            receipt,
            notes,
        };

        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("razorpay order create failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "razorpay order create returned {status}: {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("razorpay order response malformed: {err}")))
    }

    /// Fetches the authoritative payment status by payment id.
    pub async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, AppError> {
        let response = self
            .http
            .get(format!("{}/payments/{payment_id}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("razorpay payment fetch failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "razorpay payment fetch returned {status}: {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("razorpay payment response malformed: {err}")))
    }
}

/// Checkout signature: HMAC-SHA256 over `"{order_id}|{payment_id}"`, hex
/// encoded, exact match.
pub fn verify_payment_signature(
    razorpay_order_id: &str,
    razorpay_payment_id: &str,
    signature: &str,
    secret: &str,
) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{razorpay_order_id}|{razorpay_payment_id}").as_bytes());
    hex::encode(mac.finalize().into_bytes()) == signature
}

/// Webhook signature: HMAC-SHA256 over the raw request body. The raw bytes
/// matter; re-serializing the parsed payload would not round-trip.
pub fn verify_webhook_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes()) == signature
}
