use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    dto::cart::{
        AddToCartRequest, CartCount, CartItemDto, CartSummary, CartValidation, MergeCartRequest,
        MergeCartResult, PurgeCartsResult, UpdateCartItemRequest,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Cart, CartItem, line_total},
    response::{ApiResponse, Meta},
    state::AppState,
    store::StoreTx,
};

pub const DEFAULT_ABANDONED_AFTER_DAYS: i64 = 30;
pub const MAX_ABANDONED_AFTER_DAYS: i64 = 3650;
pub const MAX_QUICK_ADD_QUANTITY: i32 = 99;

pub(crate) fn total_too_large() -> AppError {
    AppError::bad_request("Total amount is too large")
}

/// Returns the user's cart, creating an empty one on first use.
pub(crate) async fn cart_for_user(tx: &mut dyn StoreTx, user_id: Uuid) -> AppResult<Cart> {
    if let Some(cart) = tx.find_cart_by_user(user_id).await? {
        return Ok(cart);
    }
    let now = Utc::now();
    let cart = Cart {
        id: Uuid::new_v4(),
        user_id,
        created_at: now,
        updated_at: now,
    };
    tx.insert_cart(&cart).await?;
    Ok(cart)
}

async fn touch(tx: &mut dyn StoreTx, cart: &mut Cart) -> AppResult<()> {
    cart.updated_at = Utc::now();
    tx.update_cart(cart).await
}

fn ensure_positive(quantity: i32) -> AppResult<()> {
    if quantity <= 0 {
        return Err(AppError::bad_request("Quantity must be greater than zero"));
    }
    Ok(())
}

/// Adds `quantity` of a product to the cart, merging with an existing line.
/// All checks run before anything is written.
pub(crate) async fn add_item(
    tx: &mut dyn StoreTx,
    cart: &mut Cart,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<CartItem> {
    ensure_positive(quantity)?;

    let product = tx
        .find_product(product_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::not_found("Product not found"))?;

    if !product.is_in_stock() {
        return Err(AppError::BadRequest(format!(
            "{} is out of stock",
            product.name
        )));
    }

    let existing = tx.find_cart_item_by_product(cart.id, product.id).await?;
    let requested = existing
        .as_ref()
        .map_or(quantity, |line| line.quantity.saturating_add(quantity));
    if requested > product.stock {
        return Err(AppError::BadRequest(format!(
            "Insufficient stock for {}: requested {}, available {}",
            product.name, requested, product.stock
        )));
    }

    let now = Utc::now();
    let item = match existing {
        Some(mut line) => {
            line.quantity = requested;
            line.updated_at = now;
            tx.update_cart_item(&line).await?;
            line
        }
        None => {
            let line = CartItem {
                id: Uuid::new_v4(),
                cart_id: cart.id,
                product_id: product.id,
                quantity,
                created_at: now,
                updated_at: now,
            };
            tx.insert_cart_item(&line).await?;
            line
        }
    };
    touch(tx, cart).await?;
    Ok(item)
}

/// Human-readable problems with the cart lines against live product state.
/// Empty when every line can be ordered as is.
pub async fn validate_cart_stock(
    tx: &mut dyn StoreTx,
    items: &[CartItem],
) -> AppResult<Vec<String>> {
    let mut errors = Vec::new();
    for item in items {
        match tx.find_product(item.product_id).await? {
            Some(product) if !product.is_active => {
                errors.push(format!("{} is no longer available", product.name));
            }
            Some(product) if !product.is_in_stock() => {
                errors.push(format!("{} is out of stock", product.name));
            }
            Some(product) if item.quantity > product.stock => errors.push(format!(
                "Only {} of {} available, {} requested",
                product.stock, product.name, item.quantity
            )),
            Some(_) => {}
            None => errors.push(format!("Product {} no longer exists", item.product_id)),
        }
    }
    Ok(errors)
}

pub(crate) async fn summarize(tx: &mut dyn StoreTx, cart: &Cart) -> AppResult<CartSummary> {
    let lines = tx.list_cart_items(cart.id).await?;
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        // lines of deleted products are dropped with the product
        let Some(product) = tx.find_product(line.product_id).await? else {
            continue;
        };
        let total = line_total(product.price, line.quantity).ok_or_else(total_too_large)?;
        items.push(CartItemDto {
            id: line.id,
            product,
            quantity: line.quantity,
            line_total: total,
        });
    }

    let total_quantity = items.iter().map(|i| i64::from(i.quantity)).sum();
    let total_price = items
        .iter()
        .try_fold(0i64, |acc, i| acc.checked_add(i.line_total))
        .ok_or_else(total_too_large)?;
    Ok(CartSummary {
        cart_id: cart.id,
        total_items: items.len(),
        total_quantity,
        total_price,
        is_empty: items.is_empty(),
        items,
    })
}

async fn owned_item(tx: &mut dyn StoreTx, cart: &Cart, item_id: Uuid) -> AppResult<CartItem> {
    tx.find_cart_item(item_id)
        .await?
        .filter(|item| item.cart_id == cart.id)
        .ok_or_else(|| AppError::not_found("Cart item not found"))
}

pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartSummary>> {
    let mut tx = state.store.begin().await?;
    let cart = cart_for_user(tx.as_mut(), user.user_id).await?;
    let summary = summarize(tx.as_mut(), &cart).await?;
    tx.commit().await?;
    Ok(ApiResponse::success("OK", summary, Some(Meta::empty())))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartSummary>> {
    let mut tx = state.store.begin().await?;
    let mut cart = cart_for_user(tx.as_mut(), user.user_id).await?;
    let item = add_item(tx.as_mut(), &mut cart, payload.product_id, payload.quantity).await?;
    let summary = summarize(tx.as_mut(), &cart).await?;
    tx.commit().await?;

    tracing::debug!(
        user_id = %user.user_id,
        product_id = %item.product_id,
        quantity = item.quantity,
        "cart line saved"
    );
    Ok(ApiResponse::success(
        "Added to cart",
        summary,
        Some(Meta::empty()),
    ))
}

pub async fn update_cart_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartSummary>> {
    ensure_positive(payload.quantity)?;

    let mut tx = state.store.begin().await?;
    let mut cart = cart_for_user(tx.as_mut(), user.user_id).await?;
    let mut item = owned_item(tx.as_mut(), &cart, item_id).await?;

    let product = tx
        .find_product(item.product_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::not_found("Product not found"))?;
    if payload.quantity > product.stock {
        return Err(AppError::BadRequest(format!(
            "Insufficient stock for {}: requested {}, available {}",
            product.name, payload.quantity, product.stock
        )));
    }

    item.quantity = payload.quantity;
    item.updated_at = Utc::now();
    tx.update_cart_item(&item).await?;
    touch(tx.as_mut(), &mut cart).await?;
    let summary = summarize(tx.as_mut(), &cart).await?;
    tx.commit().await?;

    Ok(ApiResponse::success(
        "Cart updated",
        summary,
        Some(Meta::empty()),
    ))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<CartSummary>> {
    let mut tx = state.store.begin().await?;
    let mut cart = cart_for_user(tx.as_mut(), user.user_id).await?;
    let item = owned_item(tx.as_mut(), &cart, item_id).await?;
    tx.delete_cart_item(item.id).await?;
    touch(tx.as_mut(), &mut cart).await?;
    let summary = summarize(tx.as_mut(), &cart).await?;
    tx.commit().await?;

    Ok(ApiResponse::success(
        "Removed from cart",
        summary,
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartSummary>> {
    let mut tx = state.store.begin().await?;
    let mut cart = cart_for_user(tx.as_mut(), user.user_id).await?;
    tx.clear_cart_items(cart.id).await?;
    touch(tx.as_mut(), &mut cart).await?;
    let summary = summarize(tx.as_mut(), &cart).await?;
    tx.commit().await?;

    Ok(ApiResponse::success(
        "Cart cleared",
        summary,
        Some(Meta::empty()),
    ))
}

async fn units_in_cart(tx: &mut dyn StoreTx, cart_id: Uuid) -> AppResult<i64> {
    Ok(tx
        .list_cart_items(cart_id)
        .await?
        .iter()
        .map(|item| i64::from(item.quantity))
        .sum())
}

pub async fn cart_count(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartCount>> {
    let mut tx = state.store.begin().await?;
    let count = match tx.find_cart_by_user(user.user_id).await? {
        Some(cart) => units_in_cart(tx.as_mut(), cart.id).await?,
        None => 0,
    };
    Ok(ApiResponse::success("OK", CartCount { count }, None))
}

/// Adds a product from a listing page and answers with the new unit count.
pub async fn quick_add(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    quantity: i32,
) -> AppResult<ApiResponse<CartCount>> {
    if !(1..=MAX_QUICK_ADD_QUANTITY).contains(&quantity) {
        return Err(AppError::BadRequest(format!(
            "Quantity must be between 1 and {MAX_QUICK_ADD_QUANTITY}"
        )));
    }

    let mut tx = state.store.begin().await?;
    let mut cart = cart_for_user(tx.as_mut(), user.user_id).await?;
    add_item(tx.as_mut(), &mut cart, product_id, quantity).await?;
    let count = units_in_cart(tx.as_mut(), cart.id).await?;
    tx.commit().await?;

    tracing::debug!(user_id = %user.user_id, %product_id, quantity, "quick add");
    Ok(ApiResponse::success("Added to cart", CartCount { count }, None))
}

pub async fn validate_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<CartValidation>> {
    let mut tx = state.store.begin().await?;
    let mut errors = Vec::new();
    match tx.find_cart_by_user(user.user_id).await? {
        Some(cart) => {
            let items = tx.list_cart_items(cart.id).await?;
            if items.is_empty() {
                errors.push("Cart is empty".to_string());
            }
            errors.extend(validate_cart_stock(tx.as_mut(), &items).await?);
        }
        None => errors.push("Cart is empty".to_string()),
    }

    let valid = errors.is_empty();
    let message = if valid { "Cart is valid" } else { "Cart is invalid" };
    Ok(ApiResponse::success(
        message,
        CartValidation { valid, errors },
        None,
    ))
}

/// Folds lines collected before login into the user's cart. Lines that
/// fail validation are reported and skipped.
pub async fn merge_guest_cart(
    state: &AppState,
    user: &AuthUser,
    payload: MergeCartRequest,
) -> AppResult<ApiResponse<MergeCartResult>> {
    let mut tx = state.store.begin().await?;
    let mut cart = cart_for_user(tx.as_mut(), user.user_id).await?;

    let mut merged = 0;
    let mut skipped = Vec::new();
    for line in payload.items {
        match add_item(tx.as_mut(), &mut cart, line.product_id, line.quantity).await {
            Ok(_) => merged += 1,
            Err(AppError::BadRequest(msg) | AppError::NotFound(msg)) => {
                skipped.push(format!("{}: {}", line.product_id, msg));
            }
            Err(err) => return Err(err),
        }
    }

    let summary = summarize(tx.as_mut(), &cart).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.user_id, merged, skipped = skipped.len(), "guest cart merged");
    Ok(ApiResponse::success(
        "Cart merged",
        MergeCartResult {
            merged,
            skipped,
            cart: summary,
        },
        None,
    ))
}

pub async fn purge_abandoned_carts(
    state: &AppState,
    user: &AuthUser,
    days: Option<i64>,
) -> AppResult<ApiResponse<PurgeCartsResult>> {
    ensure_admin(user)?;
    let days = days.unwrap_or(DEFAULT_ABANDONED_AFTER_DAYS);
    if !(1..=MAX_ABANDONED_AFTER_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {MAX_ABANDONED_AFTER_DAYS}"
        )));
    }

    let cutoff = Utc::now() - Duration::days(days);
    let mut tx = state.store.begin().await?;
    let carts = tx.list_carts_untouched_since(cutoff).await?;
    for cart in &carts {
        tx.delete_cart(cart.id).await?;
    }
    tx.commit().await?;

    tracing::info!(removed = carts.len(), days, "abandoned carts purged");
    Ok(ApiResponse::success(
        "Abandoned carts removed",
        PurgeCartsResult {
            removed: carts.len(),
        },
        None,
    ))
}
