use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use uuid::Uuid;

use crate::{
    dto::cart::{
        AddToCartRequest, CartCount, CartSummary, CartValidation, MergeCartRequest,
        MergeCartResult, UpdateCartItemRequest,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/count", get(cart_count))
        .route("/validate", get(validate_cart))
        .route("/merge", post(merge_cart))
        .route("/quick-add/{product_id}/{quantity}", post(quick_add))
        .route("/items/{id}", put(update_cart_item).delete(remove_from_cart))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Cart of the current user", body = ApiResponse<CartSummary>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CartSummary>>> {
    let resp = cart_service::get_cart(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Add or merge a cart line", body = ApiResponse<CartSummary>),
        (status = 400, description = "Invalid quantity or insufficient stock"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<CartSummary>>> {
    let resp = cart_service::add_to_cart(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/cart/items/{id}",
    params(
        ("id" = Uuid, Path, description = "Cart item ID")
    ),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Cart line updated", body = ApiResponse<CartSummary>),
        (status = 400, description = "Invalid quantity or insufficient stock"),
        (status = 404, description = "Cart item not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> AppResult<Json<ApiResponse<CartSummary>>> {
    let resp = cart_service::update_cart_item(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart/items/{id}",
    params(
        ("id" = Uuid, Path, description = "Cart item ID")
    ),
    responses(
        (status = 200, description = "Cart line removed", body = ApiResponse<CartSummary>),
        (status = 404, description = "Cart item not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<CartSummary>>> {
    let resp = cart_service::remove_from_cart(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart",
    responses(
        (status = 200, description = "Cart emptied", body = ApiResponse<CartSummary>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CartSummary>>> {
    let resp = cart_service::clear_cart(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart/quick-add/{product_id}/{quantity}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID"),
        ("quantity" = i32, Path, description = "Units to add, 1 to 99")
    ),
    responses(
        (status = 200, description = "Units now in the cart", body = ApiResponse<CartCount>),
        (status = 400, description = "Invalid quantity or not enough stock"),
        (status = 404, description = "Product not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn quick_add(
    State(state): State<AppState>,
    user: AuthUser,
    Path((product_id, quantity)): Path<(Uuid, i32)>,
) -> AppResult<Json<ApiResponse<CartCount>>> {
    let resp = cart_service::quick_add(&state, &user, product_id, quantity).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/cart/count",
    responses(
        (status = 200, description = "Total quantity in the cart", body = ApiResponse<CartCount>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn cart_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CartCount>>> {
    let resp = cart_service::cart_count(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/cart/validate",
    responses(
        (status = 200, description = "Cart can be ordered", body = ApiResponse<CartValidation>),
        (status = 400, description = "Cart has problems", body = ApiResponse<CartValidation>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn validate_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<(StatusCode, Json<ApiResponse<CartValidation>>)> {
    let resp = cart_service::validate_cart(&state, &user).await?;
    let valid = resp.data.as_ref().is_some_and(|v| v.valid);
    let status = if valid {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(resp)))
}

#[utoipa::path(
    post,
    path = "/api/cart/merge",
    request_body = MergeCartRequest,
    responses(
        (status = 200, description = "Guest cart merged", body = ApiResponse<MergeCartResult>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn merge_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<MergeCartRequest>,
) -> AppResult<Json<ApiResponse<MergeCartResult>>> {
    let resp = cart_service::merge_guest_cart(&state, &user, payload).await?;
    Ok(Json(resp))
}
