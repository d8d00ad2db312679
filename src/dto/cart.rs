use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MergeCartRequest {
    pub items: Vec<AddToCartRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemDto {
    pub id: Uuid,
    pub product: Product,
    pub quantity: i32,
    pub line_total: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartSummary {
    pub cart_id: Uuid,
    pub items: Vec<CartItemDto>,
    /// Number of distinct lines.
    pub total_items: usize,
    pub total_quantity: i64,
    pub total_price: i64,
    pub is_empty: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartCount {
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MergeCartResult {
    pub merged: usize,
    pub skipped: Vec<String>,
    pub cart: CartSummary,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PurgeCartsResult {
    pub removed: usize,
}
