use std::collections::BTreeMap;

use chrono::{Datelike, Utc};
use uuid::Uuid;

use crate::{
    dto::orders::{
        CheckoutRequest, OrderDetail, OrderList, OrderStats, OrderTracking, OrderWithItems,
        RevenueStats, TrackingStep, UpdateOrderStatusRequest,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Address, Order, OrderItem, OrderStatus, Product, User},
    notify::Notification,
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, RevenueQuery},
    services::{cart_service, product_service::crossed_low_stock},
    state::AppState,
    store::{OrderFilter, StoreTx},
};

const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// `ORD-<year>-<8 upper-case hex digits>`.
pub fn generate_order_number() -> String {
    let year = Utc::now().year();
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", year, suffix)
}

async fn unique_order_number(tx: &mut dyn StoreTx) -> AppResult<String> {
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let candidate = generate_order_number();
        if tx.find_order_by_number(&candidate).await?.is_none() {
            return Ok(candidate);
        }
    }
    Err(AppError::Internal(anyhow::anyhow!(
        "could not allocate a unique order number"
    )))
}

async fn owned_address(
    tx: &mut dyn StoreTx,
    user_id: Uuid,
    address_id: Uuid,
    what: &str,
) -> AppResult<Address> {
    tx.find_address(address_id)
        .await?
        .filter(|a| a.user_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("{what} address not found")))
}

async fn load_user(tx: &mut dyn StoreTx, user_id: Uuid) -> AppResult<User> {
    tx.find_user(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

/// Moves `order` to `next` and persists it.
///
/// Returns the previous status when the status actually changed and `None`
/// when `next` equals the current status. Cancelling puts every ordered
/// quantity back onto its product's stock.
pub async fn apply_status(
    tx: &mut dyn StoreTx,
    order: &mut Order,
    next: OrderStatus,
) -> AppResult<Option<OrderStatus>> {
    let current = order.status;
    if current == next {
        return Ok(None);
    }
    if !current.can_transition_to(next) {
        return Err(AppError::BadRequest(format!(
            "Cannot change order status from {} to {}",
            current, next
        )));
    }

    let now = Utc::now();
    match next {
        OrderStatus::Cancelled => {
            let mut items = tx.list_order_items(order.id).await?;
            // same lock order as checkout
            items.sort_by_key(|item| item.product_id);
            for item in items {
                let Some(mut product) = tx.lock_product(item.product_id).await? else {
                    tracing::warn!(product_id = %item.product_id, "restock skipped, product is gone");
                    continue;
                };
                product.stock = product.stock.saturating_add(item.quantity);
                product.updated_at = now;
                tx.update_product(&product).await?;
            }
        }
        OrderStatus::Shipped => {
            order.shipped_at.get_or_insert(now);
        }
        OrderStatus::Delivered => {
            order.delivered_at.get_or_insert(now);
        }
        _ => {}
    }

    order.status = next;
    order.updated_at = now;
    tx.update_order(order).await?;
    Ok(Some(current))
}

pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let threshold = state.config.low_stock_threshold;
    let mut tx = state.store.begin().await?;

    let customer = load_user(tx.as_mut(), user.user_id).await?;
    let mut cart = tx
        .find_cart_by_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::bad_request("Cart is empty"))?;
    let mut lines = tx.list_cart_items(cart.id).await?;
    if lines.is_empty() {
        return Err(AppError::bad_request("Cart is empty"));
    }

    let errors = cart_service::validate_cart_stock(tx.as_mut(), &lines).await?;
    if !errors.is_empty() {
        return Err(AppError::BadRequest(errors.join("; ")));
    }

    let shipping = owned_address(
        tx.as_mut(),
        user.user_id,
        payload.shipping_address_id,
        "Shipping",
    )
    .await?;
    let billing_id = payload.billing_address_id.unwrap_or(shipping.id);
    let billing = owned_address(tx.as_mut(), user.user_id, billing_id, "Billing").await?;

    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let order_number = unique_order_number(tx.as_mut()).await?;

    let mut total_price: i64 = 0;
    let mut items: Vec<OrderItem> = Vec::with_capacity(lines.len());
    let mut running_low: Vec<Product> = Vec::new();

    // product rows are always locked in id order
    lines.sort_by_key(|line| line.product_id);
    for line in &lines {
        // re-read under lock, the validation above ran without one
        let mut product = tx
            .lock_product(line.product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::NotFound(format!("Product {} not found", line.product_id)))?;
        if line.quantity > product.stock {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for {}: requested {}, available {}",
                product.name, line.quantity, product.stock
            )));
        }

        let item = OrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_id: product.id,
            product_name: product.name.clone(),
            price: product.price,
            quantity: line.quantity,
            created_at: now,
        };
        total_price = item
            .total_price()
            .and_then(|line| total_price.checked_add(line))
            .ok_or_else(cart_service::total_too_large)?;
        items.push(item);

        let before = product.stock;
        product.stock -= line.quantity;
        product.updated_at = now;
        tx.update_product(&product).await?;
        if crossed_low_stock(before, product.stock, threshold) {
            running_low.push(product);
        }
    }

    let order = Order {
        id: order_id,
        order_number,
        user_id: user.user_id,
        status: OrderStatus::Pending,
        total_price,
        shipping_address_id: shipping.id,
        billing_address_id: billing.id,
        notes: payload
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
        shipped_at: None,
        delivered_at: None,
        created_at: now,
        updated_at: now,
    };
    tx.insert_order(&order).await?;
    for item in &items {
        tx.insert_order_item(item).await?;
    }

    tx.clear_cart_items(cart.id).await?;
    cart.updated_at = now;
    tx.update_cart(&cart).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %user.user_id,
        order_number = %order.order_number,
        total_price = order.total_price,
        "order created"
    );

    state
        .notifier
        .dispatch(Notification::OrderCreated {
            order: order.clone(),
            items: items.clone(),
            customer,
            shipping,
        })
        .await;
    for product in running_low {
        state
            .notifier
            .dispatch(Notification::ProductStockLow { product })
            .await;
    }

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let filter = OrderFilter {
        user_id: Some(user.user_id),
        status: query.status,
        sort_order: query.sort_order.unwrap_or_default(),
        limit: Some(limit as u64),
        offset: offset as u64,
        ..Default::default()
    };

    let mut tx = state.store.begin().await?;
    let (orders, total) = tx.list_orders(&filter).await?;

    let meta = Meta::new(page, limit, total as i64);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

async fn detail(tx: &mut dyn StoreTx, order: Order) -> AppResult<OrderDetail> {
    let items = tx.list_order_items(order.id).await?;
    let shipping_address = tx
        .find_address(order.shipping_address_id)
        .await?
        .map(|a| a.formatted());
    let billing_address = tx
        .find_address(order.billing_address_id)
        .await?
        .map(|a| a.formatted());
    Ok(OrderDetail {
        order,
        items,
        shipping_address,
        billing_address,
    })
}

async fn own_order_by_number(
    tx: &mut dyn StoreTx,
    user: &AuthUser,
    order_number: &str,
) -> AppResult<Order> {
    tx.find_order_by_number(order_number)
        .await?
        .filter(|o| o.user_id == user.user_id)
        .ok_or_else(|| AppError::not_found("Order not found"))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderDetail>> {
    let mut tx = state.store.begin().await?;
    let order = tx
        .find_order(id)
        .await?
        .filter(|o| o.user_id == user.user_id)
        .ok_or_else(|| AppError::not_found("Order not found"))?;
    let data = detail(tx.as_mut(), order).await?;
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

pub async fn get_order_by_number(
    state: &AppState,
    user: &AuthUser,
    order_number: &str,
) -> AppResult<ApiResponse<OrderDetail>> {
    let mut tx = state.store.begin().await?;
    let order = own_order_by_number(tx.as_mut(), user, order_number).await?;
    let data = detail(tx.as_mut(), order).await?;
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    order_number: &str,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let mut tx = state.store.begin().await?;
    let mut order = own_order_by_number(tx.as_mut(), user, order_number).await?;
    if !order.status.can_be_cancelled() {
        return Err(AppError::BadRequest(format!(
            "Order {} can no longer be cancelled",
            order.order_number
        )));
    }

    let previous = apply_status(tx.as_mut(), &mut order, OrderStatus::Cancelled).await?;
    let customer = load_user(tx.as_mut(), order.user_id).await?;
    let items = tx.list_order_items(order.id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.user_id, order_number = %order.order_number, "order cancelled");
    if let Some(old) = previous {
        state
            .notifier
            .dispatch(Notification::OrderStatusChanged {
                order: order.clone(),
                customer,
                old,
                new: order.status,
            })
            .await;
    }

    Ok(ApiResponse::success(
        "Order cancelled",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

fn tracking(order: &Order) -> OrderTracking {
    let reached_index = OrderStatus::FLOW.iter().position(|s| *s == order.status);
    let mut timeline: Vec<TrackingStep> = OrderStatus::FLOW
        .iter()
        .enumerate()
        .map(|(idx, status)| {
            let reached = match reached_index {
                Some(current) => idx <= current,
                // cancelled orders only ever reached the first step for sure
                None => idx == 0,
            };
            let at = match status {
                OrderStatus::Pending => Some(order.created_at),
                OrderStatus::Shipped => order.shipped_at,
                OrderStatus::Delivered => order.delivered_at,
                _ => None,
            };
            TrackingStep {
                status: *status,
                label: status.label().to_string(),
                reached,
                at,
            }
        })
        .collect();

    if order.status == OrderStatus::Cancelled {
        timeline.push(TrackingStep {
            status: OrderStatus::Cancelled,
            label: OrderStatus::Cancelled.label().to_string(),
            reached: true,
            at: Some(order.updated_at),
        });
    }

    OrderTracking {
        order_number: order.order_number.clone(),
        status: order.status,
        status_label: order.status.label().to_string(),
        can_be_cancelled: order.status.can_be_cancelled(),
        is_completed: order.status.is_completed(),
        timeline,
    }
}

pub async fn track_order(
    state: &AppState,
    user: &AuthUser,
    order_number: &str,
) -> AppResult<ApiResponse<OrderTracking>> {
    let mut tx = state.store.begin().await?;
    let order = own_order_by_number(tx.as_mut(), user, order_number).await?;
    Ok(ApiResponse::success("OK", tracking(&order), None))
}

fn stats(orders: &[Order]) -> OrderStats {
    let mut by_status: BTreeMap<String, u64> = OrderStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for order in orders {
        *by_status.entry(order.status.as_str().to_string()).or_default() += 1;
    }

    let counted: Vec<&Order> = orders
        .iter()
        .filter(|o| o.status != OrderStatus::Cancelled)
        .collect();
    let total_spent = counted
        .iter()
        .fold(0i64, |acc, o| acc.saturating_add(o.total_price));
    let average_order_value = if counted.is_empty() {
        0
    } else {
        total_spent / counted.len() as i64
    };

    OrderStats {
        total_orders: orders.len() as u64,
        by_status,
        total_spent,
        average_order_value,
    }
}

pub async fn order_stats(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<OrderStats>> {
    let mut tx = state.store.begin().await?;
    let filter = OrderFilter {
        user_id: Some(user.user_id),
        ..Default::default()
    };
    let (orders, _) = tx.list_orders(&filter).await?;
    Ok(ApiResponse::success("OK", stats(&orders), None))
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();
    let filter = OrderFilter {
        status: query.status,
        sort_order: query.sort_order.unwrap_or_default(),
        limit: Some(limit as u64),
        offset: offset as u64,
        ..Default::default()
    };

    let mut tx = state.store.begin().await?;
    let (orders, total) = tx.list_orders(&filter).await?;
    let meta = Meta::new(page, limit, total as i64);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderDetail>> {
    ensure_admin(user)?;
    let mut tx = state.store.begin().await?;
    let order = tx
        .find_order(id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;
    let data = detail(tx.as_mut(), order).await?;
    Ok(ApiResponse::success("OK", data, Some(Meta::empty())))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let mut tx = state.store.begin().await?;
    let mut order = tx
        .find_order(id)
        .await?
        .ok_or_else(|| AppError::not_found("Order not found"))?;

    let previous = apply_status(tx.as_mut(), &mut order, payload.status).await?;
    let customer = load_user(tx.as_mut(), order.user_id).await?;
    let items = tx.list_order_items(order.id).await?;
    tx.commit().await?;

    match previous {
        Some(old) => {
            tracing::info!(
                order_number = %order.order_number,
                from = %old,
                to = %order.status,
                "order status changed"
            );
            state
                .notifier
                .dispatch(Notification::OrderStatusChanged {
                    order: order.clone(),
                    customer,
                    old,
                    new: order.status,
                })
                .await;
        }
        None => tracing::debug!(order_number = %order.order_number, "order status unchanged"),
    }

    Ok(ApiResponse::success(
        "Order status updated",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn revenue_stats(
    state: &AppState,
    user: &AuthUser,
    query: RevenueQuery,
) -> AppResult<ApiResponse<RevenueStats>> {
    ensure_admin(user)?;
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::bad_request("`from` must not be after `to`"));
        }
    }

    let mut tx = state.store.begin().await?;
    let filter = OrderFilter {
        created_from: query.from,
        created_to: query.to,
        ..Default::default()
    };
    let (orders, _) = tx.list_orders(&filter).await?;

    let counted: Vec<&Order> = orders
        .iter()
        .filter(|o| o.status != OrderStatus::Cancelled)
        .collect();
    let revenue = counted
        .iter()
        .fold(0i64, |acc, o| acc.saturating_add(o.total_price));
    let order_count = counted.len() as u64;
    let average_order_value = if order_count == 0 {
        0
    } else {
        revenue / order_count as i64
    };

    Ok(ApiResponse::success(
        "OK",
        RevenueStats {
            from: query.from,
            to: query.to,
            order_count,
            revenue,
            average_order_value,
        },
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: OrderStatus, total_price: i64) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            order_number: generate_order_number(),
            user_id: Uuid::new_v4(),
            status,
            total_price,
            shipping_address_id: Uuid::new_v4(),
            billing_address_id: Uuid::new_v4(),
            notes: None,
            shipped_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn order_number_has_year_and_hex_suffix() {
        let number = generate_order_number();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1], Utc::now().year().to_string());
        assert_eq!(parts[2].len(), 8);
        assert!(
            parts[2]
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        );
    }

    #[test]
    fn stats_ignore_cancelled_orders_in_totals() {
        let orders = vec![
            order(OrderStatus::Delivered, 3000),
            order(OrderStatus::Pending, 1000),
            order(OrderStatus::Cancelled, 9000),
        ];
        let stats = stats(&orders);
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.total_spent, 4000);
        assert_eq!(stats.average_order_value, 2000);
        assert_eq!(stats.by_status["cancelled"], 1);
        assert_eq!(stats.by_status["shipped"], 0);
    }

    #[test]
    fn tracking_marks_reached_steps() {
        let mut shipped = order(OrderStatus::Shipped, 100);
        shipped.shipped_at = Some(Utc::now());
        let view = tracking(&shipped);
        let reached: Vec<bool> = view.timeline.iter().map(|s| s.reached).collect();
        assert_eq!(reached, vec![true, true, true, true, false]);
        assert!(!view.can_be_cancelled);
        assert!(view.timeline[3].at.is_some());

        let cancelled = tracking(&order(OrderStatus::Cancelled, 100));
        assert_eq!(cancelled.timeline.len(), 6);
        assert!(cancelled.is_completed);
    }
}
