use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::orders::{CheckoutRequest, OrderDetail, OrderList, OrderStats, OrderTracking, OrderWithItems},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(checkout))
        .route("/stats", get(order_stats))
        .route("/{id}", get(get_order))
        .route("/number/{order_number}", get(get_order_by_number))
        .route("/number/{order_number}/cancel", post(cancel_order))
        .route("/number/{order_number}/tracking", get(track_order))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("sort_order" = Option<String>, Query, description = "Sort order: asc, desc")
    ),
    responses(
        (status = 200, description = "Orders of the current user", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created from the cart", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Empty cart or insufficient stock"),
        (status = 404, description = "Address not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<OrderWithItems>>)> {
    let resp = order_service::checkout(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/orders/stats",
    responses(
        (status = 200, description = "Order statistics of the current user", body = ApiResponse<OrderStats>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn order_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<OrderStats>>> {
    let resp = order_service::order_stats(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderDetail>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    let resp = order_service::get_order(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/number/{order_number}",
    params(
        ("order_number" = String, Path, description = "Order number, e.g. ORD-2025-0A1B2C3D")
    ),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderDetail>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_number): Path<String>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    let resp = order_service::get_order_by_number(&state, &user, &order_number).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/orders/number/{order_number}/cancel",
    params(
        ("order_number" = String, Path, description = "Order number")
    ),
    responses(
        (status = 200, description = "Order cancelled and stock restored", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Order can no longer be cancelled"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_number): Path<String>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = order_service::cancel_order(&state, &user, &order_number).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/number/{order_number}/tracking",
    params(
        ("order_number" = String, Path, description = "Order number")
    ),
    responses(
        (status = 200, description = "Order timeline", body = ApiResponse<OrderTracking>),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn track_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_number): Path<String>,
) -> AppResult<Json<ApiResponse<OrderTracking>>> {
    let resp = order_service::track_order(&state, &user, &order_number).await?;
    Ok(Json(resp))
}
