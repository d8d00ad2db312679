use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Order, OrderItem, OrderStatus};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub shipping_address_id: Uuid,
    /// Defaults to the shipping address.
    pub billing_address_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub shipping_address: Option<String>,
    pub billing_address: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackingStep {
    pub status: OrderStatus,
    pub label: String,
    pub reached: bool,
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderTracking {
    pub order_number: String,
    pub status: OrderStatus,
    pub status_label: String,
    pub can_be_cancelled: bool,
    pub is_completed: bool,
    pub timeline: Vec<TrackingStep>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderStats {
    pub total_orders: u64,
    pub by_status: BTreeMap<String, u64>,
    /// Sum over non-cancelled orders, in cents.
    pub total_spent: i64,
    pub average_order_value: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevenueStats {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub order_count: u64,
    pub revenue: i64,
    pub average_order_value: i64,
}
