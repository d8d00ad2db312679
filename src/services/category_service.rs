use chrono::Utc;
use uuid::Uuid;

use crate::{
    dto::categories::{CategoryList, CreateCategoryRequest},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Category,
    response::ApiResponse,
    state::AppState,
};

pub async fn list_categories(state: &AppState) -> AppResult<ApiResponse<CategoryList>> {
    let mut tx = state.store.begin().await?;
    let items = tx.list_categories(false).await?;
    Ok(ApiResponse::success("Categories", CategoryList { items }, None))
}

pub async fn get_category(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Category>> {
    let mut tx = state.store.begin().await?;
    let category = tx
        .find_category(id)
        .await?
        .filter(|c| c.is_active)
        .ok_or_else(|| AppError::not_found("Category not found"))?;
    Ok(ApiResponse::success("Category", category, None))
}

pub async fn create_category(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCategoryRequest,
) -> AppResult<ApiResponse<Category>> {
    ensure_admin(user)?;
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("Category name is required"));
    }

    let mut tx = state.store.begin().await?;
    if tx.find_category_by_name(&name).await?.is_some() {
        return Err(AppError::bad_request("Category already exists"));
    }

    let category = Category {
        id: Uuid::new_v4(),
        name,
        description: payload.description,
        is_active: true,
        created_at: Utc::now(),
    };
    tx.insert_category(&category).await?;
    tx.commit().await?;

    tracing::info!(category_id = %category.id, "category created");
    Ok(ApiResponse::success("Category created", category, None))
}
