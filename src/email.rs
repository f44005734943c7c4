//! Transactional email via an HTTPS email API (Resend-compatible shape).
//!
//! Soft-disabled when no API credentials are configured; sending never
//! fails the caller.

use serde_json::json;

use crate::config::Config;
use crate::models::{Order, OrderItemWithProduct};

#[derive(Debug, Clone)]
struct EmailApi {
    url: String,
    key: String,
}

#[derive(Debug, Clone)]
pub struct Mailer {
    http: reqwest::Client,
    api: Option<EmailApi>,
    from: String,
}

impl Mailer {
    pub fn new(config: &Config) -> Self {
        let api = match (&config.email_api_url, &config.email_api_key) {
            (Some(url), Some(key)) => Some(EmailApi {
                url: url.clone(),
                key: key.clone(),
            }),
            _ => None,
        };
        if api.is_none() {
            tracing::warn!("email credentials not configured, email features are disabled");
        }

        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
            api,
            from: config.email_from.clone(),
        }
    }

    /// Sends one HTML email. Failures are logged and swallowed.
    pub async fn send(&self, to: &str, subject: &str, html: &str) {
        let Some(api) = &self.api else {
            tracing::warn!(to, "email not configured, skipping send");
            return;
        };

        let body = json!({
            "from": self.from,
            "to": [to],
            "subject": subject,
            "html": html,
        });

        match self
            .http
            .post(&api.url)
            .bearer_auth(&api.key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                tracing::info!(to, subject, "email sent");
            }
            Ok(response) => {
                tracing::error!(to, status = %response.status(), "email API rejected send");
            }
            Err(err) => {
                tracing::error!(to, "email send failed: {err}");
            }
        }
    }
}

pub fn order_confirmation_subject(order: &Order) -> String {
    format!(
        "Order Confirmation #{} - Creative Universe",
        &order.id.to_string()[..8]
    )
}

pub fn order_confirmation_html(order: &Order, items: &[OrderItemWithProduct]) -> String {
    let rows: String = items
        .iter()
        .map(|item| {
            format!(
                "<div class=\"item\">{} &times; {} &mdash; &#8377;{}</div>",
                item.product_name, item.quantity, item.price
            )
        })
        .collect();

    format!(
        "<!DOCTYPE html>\n<html>\n<body style=\"font-family: Arial, sans-serif; color: #333;\">\n\
         <div style=\"max-width: 600px; margin: 0 auto; padding: 20px;\">\n\
         <div style=\"background: #000; color: #fff; padding: 20px; text-align: center;\">\n\
         <h1>Thank you for your order!</h1>\n\
         </div>\n\
         <div style=\"padding: 20px; background: #f9f9f9;\">\n\
         <p>Your order <strong>#{}</strong> has been placed and is awaiting payment confirmation.</p>\n\
         <div style=\"background: #fff; padding: 15px; border-radius: 5px;\">\n{}\n\
         <div style=\"padding-top: 10px; font-weight: bold;\">Total: &#8377;{}</div>\n\
         </div>\n\
         </div>\n\
         <div style=\"text-align: center; padding: 20px; color: #666; font-size: 12px;\">\n\
         Creative Universe\n\
         </div>\n\
         </div>\n</body>\n</html>",
        &order.id.to_string()[..8],
        rows,
        order.total
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn sample_order() -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            address_id: Uuid::new_v4(),
            total: dec!(450.00),
            status: OrderStatus::Pending,
            shiprocket_order_id: None,
            shiprocket_shipment_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn confirmation_html_lists_items_and_total() {
        let order = sample_order();
        let items = vec![OrderItemWithProduct {
            id: Uuid::new_v4(),
            order_id: order.id,
            product_id: Uuid::new_v4(),
            quantity: 2,
            price: dec!(225.00),
            product_name: "Silver Chain".into(),
            product_slug: Some("silver-chain".into()),
        }];

        let html = order_confirmation_html(&order, &items);
        assert!(html.contains("Silver Chain"));
        assert!(html.contains("450"));
        assert!(html.contains(&order.id.to_string()[..8]));
    }

    #[test]
    fn confirmation_subject_uses_short_order_id() {
        let order = sample_order();
        let subject = order_confirmation_subject(&order);
        assert!(subject.contains(&order.id.to_string()[..8]));
        assert!(subject.ends_with("Creative Universe"));
    }

    #[tokio::test]
    async fn unconfigured_mailer_send_is_a_no_op() {
        let mailer = Mailer::new(&crate::config::Config::for_tests());
        mailer.send("user@example.com", "Hello", "<p>Hi</p>").await;
    }
}
