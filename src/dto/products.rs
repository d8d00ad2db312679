use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub category_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub stock: i32,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub category_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub stock: Option<i32>,
    pub is_featured: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StockOperation {
    Set,
    Add,
    Subtract,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStockRequest {
    pub quantity: i32,
    pub operation: StockOperation,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteProductResult {
    pub id: Uuid,
    /// True when the product was only deactivated because orders reference it.
    pub deactivated: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct ProductList {
    #[schema(value_type = Vec<Product>)]
    pub items: Vec<Product>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BestSeller {
    #[serde(flatten)]
    pub product: Product,
    /// Units sold over orders that were not cancelled.
    pub total_sold: i64,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct BestSellerList {
    #[schema(value_type = Vec<BestSeller>)]
    pub items: Vec<BestSeller>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Availability {
    pub product_id: Uuid,
    pub available: bool,
    pub requested: i32,
    pub stock: i32,
    pub is_active: bool,
}
