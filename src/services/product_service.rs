use chrono::Utc;
use uuid::Uuid;

use crate::{
    dto::products::{
        Availability, BestSeller, BestSellerList, CreateProductRequest, DeleteProductResult,
        ProductList, StockOperation, UpdateProductRequest, UpdateStockRequest,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{MAX_PRICE, Product},
    notify::{Notification, format_price},
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
    store::{ProductFilter, StoreTx},
};

pub const FEATURED_LIMIT: u64 = 8;
pub const BEST_SELLERS_LIMIT: u64 = 8;
pub const MAX_BEST_SELLERS_LIMIT: u64 = 50;

/// True when a stock change moves a product from above the threshold to at
/// or below it.
pub fn crossed_low_stock(before: i32, after: i32, threshold: i32) -> bool {
    before > threshold && after <= threshold
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "product".to_string()
    } else {
        slug
    }
}

/// First free slug among `base`, `base-1`, `base-2`, ... ignoring the product
/// being renamed.
async fn unique_slug(tx: &mut dyn StoreTx, name: &str, exclude: Option<Uuid>) -> AppResult<String> {
    let base = slugify(name);
    let mut candidate = base.clone();
    let mut n = 1;
    loop {
        match tx.find_product_by_slug(&candidate).await? {
            Some(existing) if Some(existing.id) != exclude => {
                candidate = format!("{base}-{n}");
                n += 1;
            }
            _ => return Ok(candidate),
        }
    }
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Product name is required"));
    }
    Ok(name.to_string())
}

fn validate_price(price: i64) -> AppResult<()> {
    if price <= 0 {
        return Err(AppError::bad_request("Price must be greater than zero"));
    }
    if price > MAX_PRICE {
        return Err(AppError::BadRequest(format!(
            "Price cannot exceed {}",
            format_price(MAX_PRICE)
        )));
    }
    Ok(())
}

fn validate_stock(stock: i32) -> AppResult<()> {
    if stock < 0 {
        return Err(AppError::bad_request("Stock cannot be negative"));
    }
    Ok(())
}

async fn active_category(tx: &mut dyn StoreTx, category_id: Uuid) -> AppResult<()> {
    tx.find_category(category_id)
        .await?
        .filter(|c| c.is_active)
        .ok_or_else(|| AppError::not_found("Category not found"))?;
    Ok(())
}

async fn existing_product(tx: &mut dyn StoreTx, id: Uuid) -> AppResult<Product> {
    tx.find_product(id)
        .await?
        .ok_or_else(|| AppError::not_found("Product not found"))
}

/// Saves a stock change and reports the product when it just went low.
async fn save_with_stock_check(
    state: &AppState,
    mut tx: Box<dyn StoreTx>,
    product: &Product,
    stock_before: i32,
) -> AppResult<()> {
    tx.update_product(product).await?;
    tx.commit().await?;
    if crossed_low_stock(stock_before, product.stock, state.config.low_stock_threshold) {
        tracing::warn!(product_id = %product.id, stock = product.stock, "product stock is low");
        state
            .notifier
            .dispatch(Notification::ProductStockLow {
                product: product.clone(),
            })
            .await;
    }
    Ok(())
}

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
    include_inactive: bool,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let filter = ProductFilter {
        search: query.q.map(|q| q.trim().to_string()).filter(|q| !q.is_empty()),
        category_id: query.category_id,
        min_price: query.min_price,
        max_price: query.max_price,
        featured: query.featured,
        in_stock: query.in_stock,
        include_inactive,
        sort_by: query.sort_by.unwrap_or_default(),
        sort_order: query.sort_order.unwrap_or_default(),
        limit: Some(limit as u64),
        offset: offset as u64,
    };

    let mut tx = state.store.begin().await?;
    let (items, total) = tx.list_products(&filter).await?;

    let meta = Meta::new(page, limit, total as i64);
    Ok(ApiResponse::success(
        "Products",
        ProductList { items },
        Some(meta),
    ))
}

pub async fn featured_products(state: &AppState) -> AppResult<ApiResponse<ProductList>> {
    let filter = ProductFilter {
        featured: Some(true),
        sort_by: ProductSortBy::CreatedAt,
        sort_order: SortOrder::Desc,
        limit: Some(FEATURED_LIMIT),
        ..Default::default()
    };
    let mut tx = state.store.begin().await?;
    let (items, _) = tx.list_products(&filter).await?;
    Ok(ApiResponse::success(
        "Featured products",
        ProductList { items },
        None,
    ))
}

/// Active products ranked by units sold. Products that never sold follow,
/// newest first, so the list is filled up to `limit`.
pub async fn best_sellers(
    state: &AppState,
    limit: Option<u64>,
) -> AppResult<ApiResponse<BestSellerList>> {
    let limit = limit
        .unwrap_or(BEST_SELLERS_LIMIT)
        .clamp(1, MAX_BEST_SELLERS_LIMIT) as usize;

    let mut tx = state.store.begin().await?;
    let mut items = Vec::with_capacity(limit);
    for (product_id, total_sold) in tx.units_sold().await? {
        if items.len() == limit {
            break;
        }
        if let Some(product) = tx.find_product(product_id).await?.filter(|p| p.is_active) {
            items.push(BestSeller {
                product,
                total_sold,
            });
        }
    }

    if items.len() < limit {
        let filter = ProductFilter {
            sort_by: ProductSortBy::CreatedAt,
            sort_order: SortOrder::Desc,
            limit: Some((limit + items.len()) as u64),
            ..Default::default()
        };
        let (newest, _) = tx.list_products(&filter).await?;
        for product in newest {
            if items.len() == limit {
                break;
            }
            if items.iter().all(|b| b.product.id != product.id) {
                items.push(BestSeller {
                    product,
                    total_sold: 0,
                });
            }
        }
    }

    Ok(ApiResponse::success(
        "Best sellers",
        BestSellerList { items },
        None,
    ))
}

pub async fn check_availability(
    state: &AppState,
    id: Uuid,
    quantity: Option<i32>,
) -> AppResult<ApiResponse<Availability>> {
    let requested = quantity.unwrap_or(1);
    if requested <= 0 {
        return Err(AppError::bad_request("Quantity must be at least 1"));
    }

    let mut tx = state.store.begin().await?;
    let product = existing_product(tx.as_mut(), id).await?;
    let availability = Availability {
        product_id: product.id,
        available: product.is_active && product.stock >= requested,
        requested,
        stock: product.stock,
        is_active: product.is_active,
    };
    Ok(ApiResponse::success("Availability", availability, None))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let mut tx = state.store.begin().await?;
    let product = tx
        .find_product(id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::not_found("Product not found"))?;
    Ok(ApiResponse::success("Product", product, None))
}

pub async fn get_product_by_slug(state: &AppState, slug: &str) -> AppResult<ApiResponse<Product>> {
    let mut tx = state.store.begin().await?;
    let product = tx
        .find_product_by_slug(slug)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::not_found("Product not found"))?;
    Ok(ApiResponse::success("Product", product, None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let name = validate_name(&payload.name)?;
    validate_price(payload.price)?;
    validate_stock(payload.stock)?;

    let mut tx = state.store.begin().await?;
    active_category(tx.as_mut(), payload.category_id).await?;
    let slug = unique_slug(tx.as_mut(), &name, None).await?;

    let now = Utc::now();
    let product = Product {
        id: Uuid::new_v4(),
        category_id: payload.category_id,
        name,
        slug,
        description: payload.description,
        price: payload.price,
        stock: payload.stock,
        is_active: true,
        is_featured: payload.is_featured,
        created_at: now,
        updated_at: now,
    };
    tx.insert_product(&product).await?;
    tx.commit().await?;

    tracing::info!(product_id = %product.id, slug = %product.slug, "product created");
    Ok(ApiResponse::success(
        "Product created",
        product,
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let mut tx = state.store.begin().await?;
    let mut product = existing_product(tx.as_mut(), id).await?;
    let stock_before = product.stock;

    if let Some(category_id) = payload.category_id {
        active_category(tx.as_mut(), category_id).await?;
        product.category_id = category_id;
    }
    if let Some(name) = payload.name {
        let name = validate_name(&name)?;
        if name != product.name {
            product.slug = unique_slug(tx.as_mut(), &name, Some(product.id)).await?;
            product.name = name;
        }
    }
    if let Some(description) = payload.description {
        product.description = Some(description);
    }
    if let Some(price) = payload.price {
        validate_price(price)?;
        product.price = price;
    }
    if let Some(stock) = payload.stock {
        validate_stock(stock)?;
        product.stock = stock;
    }
    if let Some(featured) = payload.is_featured {
        product.is_featured = featured;
    }
    if let Some(active) = payload.is_active {
        product.is_active = active;
    }
    product.updated_at = Utc::now();

    save_with_stock_check(state, tx, &product, stock_before).await?;
    Ok(ApiResponse::success(
        "Product updated",
        product,
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<DeleteProductResult>> {
    ensure_admin(user)?;
    let mut tx = state.store.begin().await?;
    let mut product = existing_product(tx.as_mut(), id).await?;

    let deactivated = tx.product_has_orders(id).await?;
    if deactivated {
        product.is_active = false;
        product.updated_at = Utc::now();
        tx.update_product(&product).await?;
    } else {
        tx.delete_product(id).await?;
    }
    tx.commit().await?;

    tracing::info!(product_id = %id, deactivated, "product removed");
    let message = if deactivated {
        "Product has orders and was deactivated"
    } else {
        "Product deleted"
    };
    Ok(ApiResponse::success(
        message,
        DeleteProductResult { id, deactivated },
        Some(Meta::empty()),
    ))
}

pub async fn update_stock(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateStockRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.quantity < 0 {
        return Err(AppError::bad_request("Quantity cannot be negative"));
    }

    let mut tx = state.store.begin().await?;
    let mut product = tx
        .lock_product(id)
        .await?
        .ok_or_else(|| AppError::not_found("Product not found"))?;
    let stock_before = product.stock;

    product.stock = match payload.operation {
        StockOperation::Set => payload.quantity,
        StockOperation::Add => product
            .stock
            .checked_add(payload.quantity)
            .ok_or_else(|| AppError::bad_request("Stock is too large"))?,
        StockOperation::Subtract => {
            let next = product.stock - payload.quantity;
            if next < 0 {
                return Err(AppError::BadRequest(format!(
                    "Cannot subtract {} from {}: only {} in stock",
                    payload.quantity, product.name, product.stock
                )));
            }
            next
        }
    };
    product.updated_at = Utc::now();

    save_with_stock_check(state, tx, &product, stock_before).await?;
    tracing::info!(product_id = %product.id, from = stock_before, to = product.stock, "stock updated");
    Ok(ApiResponse::success(
        "Stock updated",
        product,
        Some(Meta::empty()),
    ))
}

pub async fn toggle_featured(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let mut tx = state.store.begin().await?;
    let mut product = existing_product(tx.as_mut(), id).await?;
    product.is_featured = !product.is_featured;
    product.updated_at = Utc::now();
    tx.update_product(&product).await?;
    tx.commit().await?;
    Ok(ApiResponse::success("Product updated", product, None))
}

pub async fn toggle_active(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let mut tx = state.store.begin().await?;
    let mut product = existing_product(tx.as_mut(), id).await?;
    product.is_active = !product.is_active;
    product.updated_at = Utc::now();
    tx.update_product(&product).await?;
    tx.commit().await?;
    Ok(ApiResponse::success("Product updated", product, None))
}

pub async fn list_low_stock(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let mut tx = state.store.begin().await?;
    let items = tx.list_low_stock(state.config.low_stock_threshold).await?;
    let total = items.len() as i64;
    Ok(ApiResponse::success(
        "Low stock products",
        ProductList { items },
        Some(Meta::new(1, total, total)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercase_and_dashed() {
        assert_eq!(slugify("Blue Coffee Mug"), "blue-coffee-mug");
        assert_eq!(slugify("  Tea & Cake!! "), "tea-cake");
        assert_eq!(slugify("***"), "product");
    }

    #[test]
    fn prices_must_be_positive_and_bounded() {
        assert!(validate_price(1).is_ok());
        assert!(validate_price(MAX_PRICE).is_ok());
        assert!(validate_price(0).is_err());
        assert!(validate_price(MAX_PRICE + 1).is_err());
        assert!(validate_price(i64::MAX / 2).is_err());
    }

    #[test]
    fn low_stock_fires_only_on_the_way_down() {
        assert!(crossed_low_stock(6, 5, 5));
        assert!(crossed_low_stock(10, 0, 5));
        assert!(!crossed_low_stock(5, 4, 5));
        assert!(!crossed_low_stock(3, 8, 5));
        assert!(!crossed_low_stock(9, 6, 5));
    }
}
