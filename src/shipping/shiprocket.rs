//! Shiprocket API client.
//!
//! Shipping is an optional integration: without credentials the client is
//! soft-disabled and every operation becomes a logged no-op. Carrier
//! failures never propagate; a Shiprocket outage must not corrupt order
//! state.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::Config;

/// Shiprocket tokens are valid for 10 days; cache for 9 so a refresh
/// always happens inside the validity window.
const TOKEN_TTL: Duration = Duration::from_secs(9 * 24 * 60 * 60);
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const TRACK_TIMEOUT: Duration = Duration::from_secs(10);
const CREATE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Process-lifetime bearer-token cache. Callers pass the clock in, so
/// expiry is testable. Concurrent refreshes are tolerated; the loser of
/// the race just overwrites with an equally valid token.
#[derive(Debug, Default)]
pub struct TokenCache {
    inner: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, now: Instant) -> Option<String> {
        let guard = self.inner.lock().expect("token cache poisoned");
        guard
            .as_ref()
            .filter(|cached| now < cached.expires_at)
            .map(|cached| cached.token.clone())
    }

    pub fn store(&self, token: String, now: Instant, ttl: Duration) {
        let mut guard = self.inner.lock().expect("token cache poisoned");
        *guard = Some(CachedToken {
            token,
            expires_at: now + ttl,
        });
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipmentIds {
    pub order_id: i64,
    pub shipment_id: i64,
}

#[derive(Debug, Clone)]
pub struct ShipmentItem {
    pub name: String,
    pub sku: String,
    pub quantity: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone)]
pub struct ShipmentOrderInput {
    pub order_id: Uuid,
    pub order_date: String,
    pub total: Decimal,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub items: Vec<ShipmentItem>,
}

#[derive(Debug, Serialize)]
struct PayloadItem {
    name: String,
    sku: String,
    units: i32,
    selling_price: Decimal,
}

/// Adhoc order payload. The storefront ships to the billing address only,
/// so shipping fields duplicate billing with `shipping_is_billing` set.
#[derive(Debug, Serialize)]
pub(crate) struct CreateShipmentPayload {
    order_id: String,
    order_date: String,
    pickup_location: String,
    channel_id: String,
    comment: String,
    billing_customer_name: String,
    billing_last_name: String,
    billing_address: String,
    billing_address_2: String,
    billing_city: String,
    billing_pincode: String,
    billing_state: String,
    billing_country: String,
    billing_email: String,
    billing_phone: String,
    shipping_is_billing: bool,
    shipping_customer_name: String,
    shipping_last_name: String,
    shipping_address: String,
    shipping_address_2: String,
    shipping_city: String,
    shipping_pincode: String,
    shipping_state: String,
    shipping_country: String,
    shipping_email: String,
    shipping_phone: String,
    order_items: Vec<PayloadItem>,
    payment_method: String,
    sub_total: Decimal,
    length: i32,
    breadth: i32,
    height: i32,
    weight: f64,
}

pub struct ShiprocketClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    pickup_location: String,
    tokens: TokenCache,
}

impl ShiprocketClient {
    pub fn new(config: &Config) -> Self {
        let credentials = match (&config.shiprocket_email, &config.shiprocket_password) {
            (Some(email), Some(password)) => Some(Credentials {
                email: email.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        if credentials.is_none() {
            tracing::warn!("Shiprocket credentials not configured, shipping sync is disabled");
        }

        Self {
            http: reqwest::Client::new(),
            base_url: config.shiprocket_base_url.trim_end_matches('/').to_string(),
            credentials,
            pickup_location: config.shiprocket_pickup_location.clone(),
            tokens: TokenCache::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    async fn token(&self) -> Option<String> {
        let credentials = self.credentials.as_ref()?;
        if let Some(token) = self.tokens.get(Instant::now()) {
            return Some(token);
        }

        match self.login(credentials).await {
            Ok(token) => {
                self.tokens.store(token.clone(), Instant::now(), TOKEN_TTL);
                Some(token)
            }
            Err(err) => {
                tracing::error!("Shiprocket auth failed: {err}");
                None
            }
        }
    }

    async fn login(&self, credentials: &Credentials) -> anyhow::Result<String> {
        let response = self
            .http
            .post(format!("{}/auth/login", self.base_url))
            .timeout(AUTH_TIMEOUT)
            .json(&json!({
                "email": credentials.email,
                "password": credentials.password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("login returned {}", response.status());
        }

        let body: LoginResponse = response.json().await?;
        body.token.ok_or_else(|| anyhow!("login response missing token"))
    }

    /// Creates a carrier order. Returns `None` on any failure: missing
    /// token, HTTP error, or a response without usable ids.
    pub async fn create_order(&self, input: &ShipmentOrderInput) -> Option<ShipmentIds> {
        let Some(token) = self.token().await else {
            tracing::warn!("Shiprocket order create skipped: no auth token");
            return None;
        };

        let payload = build_order_payload(input, &self.pickup_location);
        let response = match self
            .http
            .post(format!("{}/orders/create/adhoc", self.base_url))
            .bearer_auth(&token)
            .timeout(CREATE_TIMEOUT)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::error!("Shiprocket order create failed: {err}");
                return None;
            }
        };

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                tracing::error!("Shiprocket order create response unreadable: {err}");
                return None;
            }
        };

        if status.as_u16() >= 400 {
            tracing::error!(%status, %body, "Shiprocket order create API error");
            return None;
        }

        let ids = extract_ids(&body);
        if ids.is_none() {
            tracing::warn!(%body, "Shiprocket order create response missing order_id/shipment_id");
        }
        ids
    }

    pub async fn track_by_shipment_id(&self, shipment_id: i64) -> Option<Value> {
        self.track(&format!("courier/track/shipment/{shipment_id}"))
            .await
    }

    pub async fn track_by_order_id(&self, order_id: i64) -> Option<Value> {
        self.track(&format!("courier/track/order/{order_id}")).await
    }

    /// Tracking is best-effort enrichment: 404 means "not yet available",
    /// anything else that fails is logged and treated the same way.
    async fn track(&self, path: &str) -> Option<Value> {
        let token = self.token().await?;
        match self
            .http
            .get(format!("{}/{path}", self.base_url))
            .bearer_auth(&token)
            .timeout(TRACK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => None,
            Ok(response) if !response.status().is_success() => {
                tracing::error!(status = %response.status(), path, "Shiprocket tracking failed");
                None
            }
            Ok(response) => response.json().await.ok(),
            Err(err) => {
                tracing::error!(path, "Shiprocket tracking failed: {err}");
                None
            }
        }
    }
}

pub(crate) fn build_order_payload(
    input: &ShipmentOrderInput,
    pickup_location: &str,
) -> CreateShipmentPayload {
    let address_2 = input.address_line2.clone().unwrap_or_default();
    CreateShipmentPayload {
        order_id: input.order_id.to_string(),
        order_date: input.order_date.clone(),
        pickup_location: pickup_location.to_string(),
        channel_id: String::new(),
        comment: "Order from website".into(),
        billing_customer_name: input.customer_name.clone(),
        billing_last_name: String::new(),
        billing_address: input.address_line1.clone(),
        billing_address_2: address_2.clone(),
        billing_city: input.city.clone(),
        billing_pincode: input.postal_code.clone(),
        billing_state: input.state.clone(),
        billing_country: input.country.clone(),
        billing_email: input.customer_email.clone(),
        billing_phone: input.customer_phone.clone(),
        shipping_is_billing: true,
        shipping_customer_name: input.customer_name.clone(),
        shipping_last_name: String::new(),
        shipping_address: input.address_line1.clone(),
        shipping_address_2: address_2,
        shipping_city: input.city.clone(),
        shipping_pincode: input.postal_code.clone(),
        shipping_state: input.state.clone(),
        shipping_country: input.country.clone(),
        shipping_email: input.customer_email.clone(),
        shipping_phone: input.customer_phone.clone(),
        order_items: input
            .items
            .iter()
            .map(|item| PayloadItem {
                name: item.name.clone(),
                sku: item.sku.clone(),
                units: item.quantity,
                selling_price: item.price,
            })
            .collect(),
        payment_method: "prepaid".into(),
        sub_total: input.total,
        length: 10,
        breadth: 10,
        height: 10,
        weight: shipment_weight(&input.items),
    }
}

/// Half a kilo per unit, with a 0.5 floor so an empty or single-item
/// shipment is still rateable.
pub(crate) fn shipment_weight(items: &[ShipmentItem]) -> f64 {
    let units: i32 = items.iter().map(|item| item.quantity).sum();
    (f64::from(units) * 0.5).max(0.5)
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn pick_id(payload: &Value, root: &Value, snake: &str, camel: &str) -> Option<i64> {
    [
        payload.get(snake),
        payload.get(camel),
        root.get(snake),
        root.get(camel),
    ]
    .into_iter()
    .flatten()
    .find_map(as_i64)
}

/// Shiprocket responds with ids either nested under `data` or flat, in
/// snake_case or camelCase, as numbers or numeric strings.
pub(crate) fn extract_ids(body: &Value) -> Option<ShipmentIds> {
    let payload = body.get("data").filter(|v| v.is_object()).unwrap_or(body);
    let order_id = pick_id(payload, body, "order_id", "orderId")?;
    let shipment_id = pick_id(payload, body, "shipment_id", "shipmentId")?;
    Some(ShipmentIds {
        order_id,
        shipment_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn token_cache_honors_expiry() {
        let cache = TokenCache::new();
        let now = Instant::now();
        assert_eq!(cache.get(now), None);

        cache.store("tok-1".into(), now, Duration::from_secs(60));
        assert_eq!(cache.get(now + Duration::from_secs(59)), Some("tok-1".into()));
        assert_eq!(cache.get(now + Duration::from_secs(60)), None);
        assert_eq!(cache.get(now + Duration::from_secs(120)), None);
    }

    #[test]
    fn token_cache_replaces_on_store() {
        let cache = TokenCache::new();
        let now = Instant::now();
        cache.store("tok-1".into(), now, Duration::from_secs(10));
        cache.store("tok-2".into(), now, Duration::from_secs(10));
        assert_eq!(cache.get(now), Some("tok-2".into()));
    }

    #[test]
    fn weight_has_a_half_kilo_floor() {
        assert_eq!(shipment_weight(&[]), 0.5);

        let one = vec![ShipmentItem {
            name: "Ring".into(),
            sku: "ring".into(),
            quantity: 1,
            price: dec!(100),
        }];
        assert_eq!(shipment_weight(&one), 0.5);

        let three = vec![
            ShipmentItem {
                name: "Ring".into(),
                sku: "ring".into(),
                quantity: 2,
                price: dec!(100),
            },
            ShipmentItem {
                name: "Chain".into(),
                sku: "chain".into(),
                quantity: 1,
                price: dec!(250),
            },
        ];
        assert_eq!(shipment_weight(&three), 1.5);
    }

    #[test]
    fn extract_ids_reads_nested_data() {
        let body = json!({"data": {"order_id": 101, "shipment_id": 202}});
        assert_eq!(
            extract_ids(&body),
            Some(ShipmentIds {
                order_id: 101,
                shipment_id: 202
            })
        );
    }

    #[test]
    fn extract_ids_reads_flat_response() {
        let body = json!({"order_id": 101, "shipment_id": 202});
        assert_eq!(
            extract_ids(&body),
            Some(ShipmentIds {
                order_id: 101,
                shipment_id: 202
            })
        );
    }

    #[test]
    fn extract_ids_accepts_camel_case_and_string_numbers() {
        let body = json!({"data": {"orderId": "101", "shipmentId": "202"}});
        assert_eq!(
            extract_ids(&body),
            Some(ShipmentIds {
                order_id: 101,
                shipment_id: 202
            })
        );
    }

    #[test]
    fn extract_ids_requires_both_ids() {
        assert_eq!(extract_ids(&json!({"data": {"order_id": 101}})), None);
        assert_eq!(extract_ids(&json!({"message": "pickup location missing"})), None);
    }

    #[test]
    fn payload_duplicates_billing_into_shipping() {
        let input = ShipmentOrderInput {
            order_id: Uuid::nil(),
            order_date: "2025-03-01".into(),
            total: dec!(450),
            customer_name: "Asha Rao".into(),
            customer_phone: "9999999999".into(),
            customer_email: "asha@example.com".into(),
            address_line1: "12 MG Road".into(),
            address_line2: Some("Flat 4B".into()),
            city: "Bengaluru".into(),
            state: "Karnataka".into(),
            postal_code: "560001".into(),
            country: "India".into(),
            items: vec![ShipmentItem {
                name: "Silver Chain".into(),
                sku: "silver-chain".into(),
                quantity: 2,
                price: dec!(225),
            }],
        };

        let payload = build_order_payload(&input, "Primary");
        assert!(payload.shipping_is_billing);
        assert_eq!(payload.shipping_address, payload.billing_address);
        assert_eq!(payload.shipping_pincode, payload.billing_pincode);
        assert_eq!(payload.payment_method, "prepaid");
        assert_eq!(payload.pickup_location, "Primary");
        assert_eq!(payload.weight, 1.0);
        assert_eq!(payload.order_items.len(), 1);
        assert_eq!(payload.order_items[0].units, 2);
    }
}
