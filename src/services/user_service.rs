use chrono::Utc;
use uuid::Uuid;

use crate::{
    dto::users::{AddressDto, AddressList, AddressRequest, UpdateProfileRequest, UserStats},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Address, OrderStatus, User},
    response::ApiResponse,
    services::auth_service::{normalize_email, validate_email},
    state::AppState,
    store::{OrderFilter, StoreTx},
};

fn required(value: &str, field: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Trimmed copy of the request with every mandatory field present.
fn clean_address(payload: &AddressRequest) -> AppResult<AddressRequest> {
    Ok(AddressRequest {
        first_name: required(&payload.first_name, "First name")?,
        last_name: required(&payload.last_name, "Last name")?,
        street: required(&payload.street, "Street")?,
        city: required(&payload.city, "City")?,
        zip_code: required(&payload.zip_code, "Zip code")?,
        country: required(&payload.country, "Country")?,
        phone: payload
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        is_default: payload.is_default,
    })
}

async fn owned_address(tx: &mut dyn StoreTx, user: &AuthUser, id: Uuid) -> AppResult<Address> {
    tx.find_address(id)
        .await?
        .filter(|a| a.user_id == user.user_id)
        .ok_or_else(|| AppError::not_found("Address not found"))
}

/// Makes `address` the user's only default address.
async fn make_default(tx: &mut dyn StoreTx, address: &mut Address) -> AppResult<()> {
    tx.clear_default_addresses(address.user_id, Some(address.id))
        .await?;
    if !address.is_default {
        address.is_default = true;
        address.updated_at = Utc::now();
        tx.update_address(address).await?;
    }
    Ok(())
}

pub async fn get_profile(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<User>> {
    let mut tx = state.store.begin().await?;
    let profile = tx
        .find_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(ApiResponse::success("OK", profile, None))
}

pub async fn user_stats(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<UserStats>> {
    let mut tx = state.store.begin().await?;
    let profile = tx
        .find_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    let filter = OrderFilter {
        user_id: Some(profile.id),
        ..Default::default()
    };
    let (orders, total_orders) = tx.list_orders(&filter).await?;
    let addresses = tx.list_addresses(profile.id).await?;

    let delivered: Vec<_> = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Delivered)
        .collect();
    let stats = UserStats {
        total_orders,
        completed_orders: delivered.len() as u64,
        total_spent: delivered
            .iter()
            .fold(0i64, |acc, o| acc.saturating_add(o.total_price)),
        total_addresses: addresses.len(),
        member_since: profile.created_at,
    };
    Ok(ApiResponse::success("User stats", stats, None))
}

pub async fn update_profile(
    state: &AppState,
    user: &AuthUser,
    payload: UpdateProfileRequest,
) -> AppResult<ApiResponse<User>> {
    let mut tx = state.store.begin().await?;
    let mut profile = tx
        .find_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if let Some(first_name) = payload.first_name {
        profile.first_name = required(&first_name, "First name")?;
    }
    if let Some(last_name) = payload.last_name {
        profile.last_name = required(&last_name, "Last name")?;
    }
    if let Some(email) = payload.email {
        let email = normalize_email(&email);
        validate_email(&email)?;
        if email != profile.email {
            if tx.find_user_by_email(&email).await?.is_some() {
                return Err(AppError::bad_request("Email is already taken"));
            }
            profile.email = email;
        }
    }
    profile.updated_at = Utc::now();
    tx.update_user(&profile).await?;
    tx.commit().await?;

    tracing::info!(user_id = %profile.id, "profile updated");
    Ok(ApiResponse::success("Profile updated", profile, None))
}

pub async fn list_addresses(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<AddressList>> {
    let mut tx = state.store.begin().await?;
    let items = tx
        .list_addresses(user.user_id)
        .await?
        .into_iter()
        .map(AddressDto::from)
        .collect();
    Ok(ApiResponse::success("OK", AddressList { items }, None))
}

pub async fn get_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<AddressDto>> {
    let mut tx = state.store.begin().await?;
    let address = owned_address(tx.as_mut(), user, id).await?;
    Ok(ApiResponse::success("OK", address.into(), None))
}

pub async fn create_address(
    state: &AppState,
    user: &AuthUser,
    payload: AddressRequest,
) -> AppResult<ApiResponse<AddressDto>> {
    let payload = clean_address(&payload)?;
    let mut tx = state.store.begin().await?;

    let first = tx.list_addresses(user.user_id).await?.is_empty();
    let is_default = payload.is_default || first;
    if is_default {
        tx.clear_default_addresses(user.user_id, None).await?;
    }

    let now = Utc::now();
    let address = Address {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        first_name: payload.first_name,
        last_name: payload.last_name,
        street: payload.street,
        city: payload.city,
        zip_code: payload.zip_code,
        country: payload.country,
        phone: payload.phone,
        is_default,
        created_at: now,
        updated_at: now,
    };
    tx.insert_address(&address).await?;
    tx.commit().await?;

    Ok(ApiResponse::success("Address created", address.into(), None))
}

/// Updates the address fields. `is_default: true` promotes it; `false`
/// leaves the current default in place, use another address's set-default
/// to move it.
pub async fn update_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: AddressRequest,
) -> AppResult<ApiResponse<AddressDto>> {
    let payload = clean_address(&payload)?;
    let mut tx = state.store.begin().await?;
    let mut address = owned_address(tx.as_mut(), user, id).await?;

    address.first_name = payload.first_name;
    address.last_name = payload.last_name;
    address.street = payload.street;
    address.city = payload.city;
    address.zip_code = payload.zip_code;
    address.country = payload.country;
    address.phone = payload.phone;
    address.updated_at = Utc::now();
    tx.update_address(&address).await?;
    if payload.is_default {
        make_default(tx.as_mut(), &mut address).await?;
    }
    tx.commit().await?;

    Ok(ApiResponse::success("Address updated", address.into(), None))
}

pub async fn set_default_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<AddressDto>> {
    let mut tx = state.store.begin().await?;
    let mut address = owned_address(tx.as_mut(), user, id).await?;
    make_default(tx.as_mut(), &mut address).await?;
    tx.commit().await?;

    tracing::debug!(user_id = %user.user_id, address_id = %id, "default address changed");
    Ok(ApiResponse::success("Default address updated", address.into(), None))
}

pub async fn delete_address(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let mut tx = state.store.begin().await?;
    let address = owned_address(tx.as_mut(), user, id).await?;

    let others: Vec<Address> = tx
        .list_addresses(user.user_id)
        .await?
        .into_iter()
        .filter(|a| a.id != address.id)
        .collect();
    if others.is_empty() {
        return Err(AppError::bad_request("Cannot delete your only address"));
    }

    tx.delete_address(address.id).await?;
    if address.is_default {
        // newest remaining address takes over
        let mut successor = others[0].clone();
        make_default(tx.as_mut(), &mut successor).await?;
    }
    tx.commit().await?;

    Ok(ApiResponse::success(
        "Address deleted",
        serde_json::json!({ "id": id }),
        None,
    ))
}
