//! Background shipment sync.
//!
//! Payment success must never wait on the carrier, so handlers hand the
//! order id to a bounded queue and move on. A single worker task drains
//! the queue, which also serializes sync attempts: a duplicate trigger for
//! the same order lands behind the first and hits the already-has-ids
//! guard.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Address, Order, OrderItemWithProduct};
use crate::shipping::shiprocket::{ShipmentItem, ShipmentOrderInput, ShiprocketClient};

const QUEUE_DEPTH: usize = 32;

#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Uuid>,
}

impl SyncHandle {
    /// Queues a sync attempt without blocking. A full queue or a stopped
    /// worker drops the request; the failure is logged for operators and
    /// the order stays consistent either way.
    pub fn enqueue(&self, order_id: Uuid) {
        if let Err(err) = self.tx.try_send(order_id) {
            tracing::error!(%order_id, "shipment sync queue rejected order: {err}");
        }
    }
}

pub fn spawn(db: PgPool, carrier: Arc<ShiprocketClient>) -> SyncHandle {
    let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);

    tokio::spawn(async move {
        tracing::info!("shipment sync worker started");
        while let Some(order_id) = rx.recv().await {
            if let Err(err) = sync_order(&db, &carrier, order_id).await {
                tracing::error!(%order_id, "shipment sync failed: {err}");
            }
        }
        tracing::info!("shipment sync worker stopped");
    });

    SyncHandle { tx }
}

/// Creates the carrier shipment for a paid order and persists its ids.
/// Skips are logged, not errors: the order may have raced away, shipping
/// may be unconfigured, or the ids may already be set.
async fn sync_order(db: &PgPool, carrier: &ShiprocketClient, order_id: Uuid) -> AppResult<()> {
    let Some(order) = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(db)
        .await?
    else {
        tracing::warn!(%order_id, "shipment sync skipped: order not found");
        return Ok(());
    };

    if order.shiprocket_order_id.is_some() {
        tracing::debug!(%order_id, "shipment sync skipped: order already has carrier ids");
        return Ok(());
    }

    let Some(address) = sqlx::query_as::<_, Address>("SELECT * FROM addresses WHERE id = $1")
        .bind(order.address_id)
        .fetch_optional(db)
        .await?
    else {
        tracing::warn!(%order_id, "shipment sync skipped: no address for order");
        return Ok(());
    };

    let customer_email: String = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
        .bind(order.user_id)
        .fetch_one(db)
        .await?;

    let items = sqlx::query_as::<_, OrderItemWithProduct>(
        "SELECT oi.id, oi.order_id, oi.product_id, oi.quantity, oi.price, \
                p.name AS product_name, p.slug AS product_slug \
         FROM order_items oi JOIN products p ON p.id = oi.product_id \
         WHERE oi.order_id = $1",
    )
    .bind(order_id)
    .fetch_all(db)
    .await?;

    let input = ShipmentOrderInput {
        order_id: order.id,
        order_date: order.created_at.format("%Y-%m-%d").to_string(),
        total: order.total,
        customer_name: address.full_name,
        customer_phone: address.phone,
        customer_email,
        address_line1: address.address_line1,
        address_line2: address.address_line2,
        city: address.city,
        state: address.state,
        postal_code: address.postal_code,
        country: address.country,
        items: items
            .into_iter()
            .map(|item| ShipmentItem {
                name: item.product_name,
                // SKU falls back to the product id when no slug exists
                sku: item
                    .product_slug
                    .unwrap_or_else(|| item.product_id.to_string()),
                quantity: item.quantity,
                price: item.price,
            })
            .collect(),
    };

    let Some(ids) = carrier.create_order(&input).await else {
        tracing::warn!(%order_id, "shipment sync: carrier returned no ids");
        return Ok(());
    };

    // Ids are written at most once; losing a double-submit race turns this
    // into a no-op instead of an overwrite.
    let updated = sqlx::query(
        "UPDATE orders SET shiprocket_order_id = $2, shiprocket_shipment_id = $3 \
         WHERE id = $1 AND shiprocket_order_id IS NULL",
    )
    .bind(order_id)
    .bind(ids.order_id)
    .bind(ids.shipment_id)
    .execute(db)
    .await?;

    if updated.rows_affected() == 0 {
        tracing::warn!(%order_id, "shipment sync: ids already present, keeping existing");
    } else {
        tracing::info!(
            %order_id,
            carrier_order_id = ids.order_id,
            carrier_shipment_id = ids.shipment_id,
            "shipment sync complete"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_after_worker_stops_does_not_panic() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = SyncHandle { tx };
        handle.enqueue(Uuid::new_v4());
    }

    #[tokio::test]
    async fn enqueue_drops_when_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = SyncHandle { tx };
        handle.enqueue(Uuid::new_v4());
        handle.enqueue(Uuid::new_v4());

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
