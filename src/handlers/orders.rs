//! Order API handlers: checkout, cancellation, retrieval, tracking and the
//! admin order views.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::email;
use crate::error::{AppError, AppResult};
use crate::models::{
    Address, ApiResponse, CartLine, MessageResponse, Order, OrderItemWithProduct, OrderStatus,
    Payment, UserSummary,
};
use crate::shipping::tracking::{self, TrackingInfo};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub address_id: Uuid,
}

/// Order with its line items, address and payment, the graph clients
/// render order pages from.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub order_items: Vec<OrderItemWithProduct>,
    pub address: Option<Address>,
    pub payment: Option<Payment>,
}

/// Validates every cart line against current stock and returns the order
/// total. The offending product is named so the shopper knows what to
/// drop.
fn validate_lines(lines: &[CartLine]) -> Result<Decimal, AppError> {
    if lines.is_empty() {
        return Err(AppError::Validation("Cart is empty".into()));
    }

    let mut total = Decimal::ZERO;
    for line in lines {
        if !line.in_stock || line.stock < line.quantity {
            return Err(AppError::Conflict(format!(
                "Product {} is out of stock",
                line.name
            )));
        }
        total += line.price * Decimal::from(line.quantity);
    }
    Ok(total)
}

/// Checkout. Stock validation, order + line item creation, stock
/// decrement and cart clearing commit atomically; two shoppers racing for
/// the last unit serialize on the locked product rows.
pub async fn create_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<OrderDetail>>)> {
    let address = sqlx::query_as::<_, Address>("SELECT * FROM addresses WHERE id = $1")
        .bind(req.address_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("Address"))?;
    if address.user_id != user.sub {
        return Err(AppError::Forbidden);
    }

    let mut tx = state.db.begin().await?;

    // Lock the product rows behind the cart in a stable order so
    // concurrent checkouts serialize on the stock check.
    let lines = sqlx::query_as::<_, CartLine>(
        "SELECT c.product_id, c.quantity, p.name, p.slug, p.price, p.stock, p.in_stock \
         FROM cart_items c JOIN products p ON p.id = c.product_id \
         WHERE c.user_id = $1 ORDER BY p.id FOR UPDATE OF p",
    )
    .bind(user.sub)
    .fetch_all(&mut *tx)
    .await?;

    let total = validate_lines(&lines)?;

    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO orders (user_id, address_id, total) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(user.sub)
    .bind(req.address_id)
    .bind(total)
    .fetch_one(&mut *tx)
    .await?;

    for line in &lines {
        sqlx::query(
            "INSERT INTO order_items (order_id, product_id, quantity, price) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(order.id)
        .bind(line.product_id)
        .bind(line.quantity)
        .bind(line.price)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE products SET stock = stock - $2, in_stock = stock - $2 > 0 WHERE id = $1")
            .bind(line.product_id)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(user.sub)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let order_items = fetch_order_items(&state.db, order.id).await?;
    send_confirmation_email(&state, &order, &order_items).await;

    let detail = OrderDetail {
        order,
        order_items,
        address: Some(address),
        payment: None,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::new(detail))))
}

/// Caller's orders, newest first.
pub async fn list_orders(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<ApiResponse<Vec<OrderDetail>>>> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user.sub)
    .fetch_all(&state.db)
    .await?;

    let mut details = Vec::with_capacity(orders.len());
    for order in orders {
        details.push(load_detail(&state.db, order).await?);
    }
    Ok(Json(ApiResponse::new(details)))
}

pub async fn get_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    let order = fetch_order(&state.db, id).await?;
    if order.user_id != user.sub && !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(Json(ApiResponse::new(load_detail(&state.db, order).await?)))
}

/// Cancels an order that has not shipped and puts its units back on the
/// shelf.
pub async fn cancel_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    let order = fetch_order(&state.db, id).await?;
    if order.user_id != user.sub {
        return Err(AppError::Forbidden);
    }
    match order.status {
        OrderStatus::Cancelled => {
            return Err(AppError::Conflict("Order is already cancelled".into()))
        }
        OrderStatus::Shipped | OrderStatus::Delivered => {
            return Err(AppError::Conflict(
                "Cannot cancel shipped or delivered order".into(),
            ))
        }
        OrderStatus::Pending | OrderStatus::Processing => {}
    }

    let mut tx = state.db.begin().await?;

    // Status re-checked under the transaction; a concurrent transition
    // turns this into a conflict instead of a double restock.
    let updated = sqlx::query(
        "UPDATE orders SET status = 'CANCELLED' \
         WHERE id = $1 AND status IN ('PENDING', 'PROCESSING')",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "Order cannot be cancelled in its current state".into(),
        ));
    }

    let items =
        sqlx::query_as::<_, (Uuid, i32)>("SELECT product_id, quantity FROM order_items WHERE order_id = $1")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
    for (product_id, quantity) in items {
        sqlx::query("UPDATE products SET stock = stock + $2, in_stock = TRUE WHERE id = $1")
            .bind(product_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(Json(MessageResponse::new("Order cancelled")))
}

#[derive(Debug, Serialize)]
pub struct TrackingResponse {
    pub tracking: Option<TrackingInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Live shipment tracking. Absence of tracking is information, not an
/// error; the order itself is always authoritative.
pub async fn get_tracking(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<TrackingResponse>>> {
    let order = fetch_order(&state.db, id).await?;
    if order.user_id != user.sub && !user.is_admin() {
        return Err(AppError::Forbidden);
    }

    if order.shiprocket_shipment_id.is_none() && order.shiprocket_order_id.is_none() {
        return Ok(Json(ApiResponse::new(TrackingResponse {
            tracking: None,
            message: Some("No shipment for this order yet.".into()),
        })));
    }

    let mut raw = None;
    if let Some(shipment_id) = order.shiprocket_shipment_id {
        raw = state.carrier.track_by_shipment_id(shipment_id).await;
    }
    if raw.is_none() {
        if let Some(carrier_order_id) = order.shiprocket_order_id {
            raw = state.carrier.track_by_order_id(carrier_order_id).await;
        }
    }

    let tracking = raw.as_ref().map(tracking::normalize);
    Ok(Json(ApiResponse::new(TrackingResponse {
        tracking,
        message: None,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AdminOrderDetail {
    #[serde(flatten)]
    pub detail: OrderDetail,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Serialize)]
pub struct PaginatedOrders {
    pub success: bool,
    pub data: Vec<AdminOrderDetail>,
    pub pagination: Pagination,
}

/// Admin: all orders, optionally filtered by status, paginated.
pub async fn admin_list_orders(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<AdminListQuery>,
) -> AppResult<Json<PaginatedOrders>> {
    if !user.is_admin() {
        return Err(AppError::AdminOnly);
    }

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = i64::from((page - 1) * limit);

    let status = query
        .status
        .as_deref()
        .map(|raw| {
            OrderStatus::parse(raw)
                .ok_or_else(|| AppError::Validation("Invalid order status".into()))
        })
        .transpose()?;

    let (orders, total) = match status {
        Some(status) => {
            let orders = sqlx::query_as::<_, Order>(
                "SELECT * FROM orders WHERE status = $1 ORDER BY created_at DESC \
                 LIMIT $2 OFFSET $3",
            )
            .bind(status)
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&state.db)
            .await?;
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = $1")
                .bind(status)
                .fetch_one(&state.db)
                .await?;
            (orders, total)
        }
        None => {
            let orders = sqlx::query_as::<_, Order>(
                "SELECT * FROM orders ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            )
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&state.db)
            .await?;
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
                .fetch_one(&state.db)
                .await?;
            (orders, total)
        }
    };

    let mut data = Vec::with_capacity(orders.len());
    for order in orders {
        let owner = sqlx::query_as::<_, UserSummary>(
            "SELECT id, email, name, role FROM users WHERE id = $1",
        )
        .bind(order.user_id)
        .fetch_optional(&state.db)
        .await?;
        data.push(AdminOrderDetail {
            detail: load_detail(&state.db, order).await?,
            user: owner,
        });
    }

    let pages = (total + i64::from(limit) - 1) / i64::from(limit);
    Ok(Json(PaginatedOrders {
        success: true,
        data,
        pagination: Pagination {
            page,
            limit,
            total,
            pages,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// Admin: force an order status.
pub async fn admin_update_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    if !user.is_admin() {
        return Err(AppError::AdminOnly);
    }
    let status = OrderStatus::parse(&req.status)
        .ok_or_else(|| AppError::Validation("Invalid order status".into()))?;

    let order =
        sqlx::query_as::<_, Order>("UPDATE orders SET status = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(status)
            .fetch_optional(&state.db)
            .await?
            .ok_or(AppError::NotFound("Order"))?;

    Ok(Json(ApiResponse::new(load_detail(&state.db, order).await?)))
}

pub(crate) async fn fetch_order(db: &PgPool, id: Uuid) -> AppResult<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("Order"))
}

async fn fetch_order_items(db: &PgPool, order_id: Uuid) -> AppResult<Vec<OrderItemWithProduct>> {
    Ok(sqlx::query_as::<_, OrderItemWithProduct>(
        "SELECT oi.id, oi.order_id, oi.product_id, oi.quantity, oi.price, \
                p.name AS product_name, p.slug AS product_slug \
         FROM order_items oi JOIN products p ON p.id = oi.product_id \
         WHERE oi.order_id = $1",
    )
    .bind(order_id)
    .fetch_all(db)
    .await?)
}

async fn load_detail(db: &PgPool, order: Order) -> AppResult<OrderDetail> {
    let order_items = fetch_order_items(db, order.id).await?;
    let address = sqlx::query_as::<_, Address>("SELECT * FROM addresses WHERE id = $1")
        .bind(order.address_id)
        .fetch_optional(db)
        .await?;
    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE order_id = $1")
        .bind(order.id)
        .fetch_optional(db)
        .await?;
    Ok(OrderDetail {
        order,
        order_items,
        address,
        payment,
    })
}

/// Confirmation email is best effort and detached; a mail outage never
/// fails a checkout.
async fn send_confirmation_email(state: &AppState, order: &Order, items: &[OrderItemWithProduct]) {
    let owner = match sqlx::query_as::<_, UserSummary>(
        "SELECT id, email, name, role FROM users WHERE id = $1",
    )
    .bind(order.user_id)
    .fetch_optional(&state.db)
    .await
    {
        Ok(Some(owner)) => owner,
        Ok(None) => return,
        Err(err) => {
            tracing::error!(order_id = %order.id, "failed to load user for confirmation email: {err}");
            return;
        }
    };

    let mailer = state.mailer.clone();
    let subject = email::order_confirmation_subject(order);
    let html = email::order_confirmation_html(order, items);
    tokio::spawn(async move {
        mailer.send(&owner.email, &subject, &html).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(name: &str, quantity: i32, price: Decimal, stock: i32, in_stock: bool) -> CartLine {
        CartLine {
            product_id: Uuid::new_v4(),
            quantity,
            name: name.into(),
            slug: None,
            price,
            stock,
            in_stock,
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        let err = validate_lines(&[]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn total_is_sum_of_price_times_quantity() {
        let lines = vec![
            line("Gold Ring", 2, dec!(100), 5, true),
            line("Silver Chain", 1, dec!(250.50), 3, true),
        ];
        assert_eq!(validate_lines(&lines).unwrap(), dec!(450.50));
    }

    #[test]
    fn insufficient_stock_names_the_product() {
        let lines = vec![
            line("Gold Ring", 2, dec!(100), 5, true),
            line("Pearl Pendant", 4, dec!(300), 3, true),
        ];
        let err = validate_lines(&lines).unwrap_err();
        match err {
            AppError::Conflict(message) => assert!(message.contains("Pearl Pendant")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn out_of_stock_flag_rejects_even_with_stock_count() {
        let lines = vec![line("Gold Ring", 1, dec!(100), 5, false)];
        assert!(matches!(
            validate_lines(&lines),
            Err(AppError::Conflict(_))
        ));
    }
}
