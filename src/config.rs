//! Service configuration, loaded once at startup from the environment.

use anyhow::{Context, Result};

/// Runtime configuration.
///
/// | Env var | Required | Default |
/// |---------|----------|---------|
/// | `DATABASE_URL` | yes | none |
/// | `PORT` | no | 8080 |
/// | `JWT_SECRET` | yes | none |
/// | `RAZORPAY_KEY_ID` | yes | none |
/// | `RAZORPAY_KEY_SECRET` | yes | none |
/// | `RAZORPAY_WEBHOOK_SECRET` | no | falls back to key secret |
/// | `RAZORPAY_BASE_URL` | no | `https://api.razorpay.com/v1` |
/// | `SHIPROCKET_EMAIL` / `SHIPROCKET_API_PASSWORD` | no | shipping disabled when unset |
/// | `SHIPROCKET_PICKUP_LOCATION` | no | `Primary` |
/// | `SHIPROCKET_BASE_URL` | no | `https://apiv2.shiprocket.in/v1/external` |
/// | `EMAIL_API_URL` / `EMAIL_API_KEY` | no | email disabled when unset |
/// | `EMAIL_FROM` | no | `Creative Universe <orders@creativeuniverse.in>` |
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,

    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_webhook_secret: Option<String>,
    pub razorpay_base_url: String,

    pub shiprocket_email: Option<String>,
    pub shiprocket_password: Option<String>,
    pub shiprocket_pickup_location: String,
    pub shiprocket_base_url: String,

    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
    pub email_from: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            jwt_secret: required("JWT_SECRET")?,

            razorpay_key_id: required("RAZORPAY_KEY_ID")?,
            razorpay_key_secret: required("RAZORPAY_KEY_SECRET")?,
            razorpay_webhook_secret: optional("RAZORPAY_WEBHOOK_SECRET"),
            razorpay_base_url: std::env::var("RAZORPAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".into()),

            shiprocket_email: optional("SHIPROCKET_EMAIL"),
            shiprocket_password: optional("SHIPROCKET_API_PASSWORD"),
            shiprocket_pickup_location: std::env::var("SHIPROCKET_PICKUP_LOCATION")
                .unwrap_or_else(|_| "Primary".into()),
            shiprocket_base_url: std::env::var("SHIPROCKET_BASE_URL")
                .unwrap_or_else(|_| "https://apiv2.shiprocket.in/v1/external".into()),

            email_api_url: optional("EMAIL_API_URL"),
            email_api_key: optional("EMAIL_API_KEY"),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Creative Universe <orders@creativeuniverse.in>".into()),
        })
    }

    /// Webhook events are signed with their own secret when one is
    /// configured, otherwise with the key secret.
    pub fn webhook_secret(&self) -> &str {
        self.razorpay_webhook_secret
            .as_deref()
            .unwrap_or(&self.razorpay_key_secret)
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
impl Config {
    /// Minimal config for unit tests; no external service is reachable.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            port: 0,
            jwt_secret: "test-jwt-secret".into(),
            razorpay_key_id: "rzp_test_key".into(),
            razorpay_key_secret: "rzp_test_secret".into(),
            razorpay_webhook_secret: None,
            razorpay_base_url: "http://127.0.0.1:1/v1".into(),
            shiprocket_email: None,
            shiprocket_password: None,
            shiprocket_pickup_location: "Primary".into(),
            shiprocket_base_url: "http://127.0.0.1:1/v1/external".into(),
            email_api_url: None,
            email_api_key: None,
            email_from: "Creative Universe <orders@test.local>".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_secret_falls_back_to_key_secret() {
        let mut config = Config::for_tests();
        assert_eq!(config.webhook_secret(), "rzp_test_secret");

        config.razorpay_webhook_secret = Some("whsec_dedicated".into());
        assert_eq!(config.webhook_secret(), "whsec_dedicated");
    }
}
