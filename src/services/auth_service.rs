use std::collections::HashMap;

use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use password_hash::rand_core::{OsRng, RngCore};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dto::auth::{
        AuthCheck, ChangePasswordRequest, Claims, ForgotPasswordRequest, LoginRequest,
        LoginResponse, RefreshResponse, RegisterRequest, ResetPasswordRequest, ResetTokenCheck,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{ROLE_USER, User},
    notify::Notification,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const RESET_REQUESTS_PER_HOUR: usize = 3;
pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for this email, a reset link has been sent";

struct ResetToken {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct ResetBook {
    requests: HashMap<String, Vec<DateTime<Utc>>>,
    tokens: HashMap<String, ResetToken>,
}

/// Password reset bookkeeping: request throttling per email and the
/// outstanding single-use tokens.
#[derive(Default)]
pub struct ResetTokens {
    book: Mutex<ResetBook>,
}

impl ResetTokens {
    /// Records a reset request for `email`. Returns false when the email
    /// already used up its requests for the last hour.
    async fn allow_request(&self, email: &str, now: DateTime<Utc>) -> bool {
        let mut book = self.book.lock().await;
        let window_start = now - Duration::hours(1);
        // forget every email whose window has passed, not only this one
        book.requests.retain(|_, times| {
            times.retain(|at| *at > window_start);
            !times.is_empty()
        });
        book.tokens.retain(|_, t| t.expires_at > now);

        let requests = book.requests.entry(email.to_string()).or_default();
        if requests.len() >= RESET_REQUESTS_PER_HOUR {
            return false;
        }
        requests.push(now);
        true
    }

    /// Issues a fresh token for `user_id`, revoking any earlier one.
    async fn issue(&self, user_id: Uuid, now: DateTime<Utc>) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

        let mut book = self.book.lock().await;
        book.tokens.retain(|_, t| t.user_id != user_id && t.expires_at > now);
        book.tokens.insert(
            token.clone(),
            ResetToken {
                user_id,
                expires_at: now + Duration::minutes(RESET_TOKEN_TTL_MINUTES),
            },
        );
        token
    }

    /// Owner of `token` if it is still valid, without consuming it.
    async fn peek(&self, token: &str, now: DateTime<Utc>) -> Option<Uuid> {
        let book = self.book.lock().await;
        book.tokens
            .get(token)
            .filter(|t| t.expires_at > now)
            .map(|t| t.user_id)
    }

    /// Consumes `token`. Expired and unknown tokens yield `None`.
    async fn redeem(&self, token: &str, now: DateTime<Utc>) -> Option<Uuid> {
        let mut book = self.book.lock().await;
        let entry = book.tokens.remove(token)?;
        (entry.expires_at > now).then_some(entry.user_id)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> AppResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AppError::bad_request("Invalid email address"));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn issue_token(config: &AppConfig, user: &User) -> AppResult<LoginResponse> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(config.jwt_ttl_hours))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role.clone(),
        exp: expiration.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?;

    Ok(LoginResponse {
        token,
        expires_at: expiration.timestamp(),
    })
}

pub fn decode_token(secret: &str, token: &str) -> AppResult<Claims> {
    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;
    Ok(decoded.claims)
}

fn required(value: &str, field: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    Ok(value.to_string())
}

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    let email = normalize_email(&payload.email);
    validate_email(&email)?;
    validate_password(&payload.password)?;
    let first_name = required(&payload.first_name, "First name")?;
    let last_name = required(&payload.last_name, "Last name")?;

    let mut tx = state.store.begin().await?;
    if tx.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::BadRequest("Email is already taken".to_string()));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email,
        password_hash: hash_password(&payload.password)?,
        first_name,
        last_name,
        role: ROLE_USER.to_string(),
        created_at: now,
        updated_at: now,
    };
    tx.insert_user(&user).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, "user registered");
    state
        .notifier
        .dispatch(Notification::Welcome { user: user.clone() })
        .await;

    Ok(ApiResponse::success("User created", user, None))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let email = normalize_email(&payload.email);
    let mut tx = state.store.begin().await?;
    let user = tx.find_user_by_email(&email).await?;
    drop(tx);

    let user = match user {
        Some(u) => u,
        None => return Err(AppError::Unauthorized("Invalid email or password".into())),
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(AppError::Unauthorized("Invalid email or password".into()));
    }

    let resp = issue_token(&state.config, &user)?;
    tracing::info!(user_id = %user.id, "user logged in");

    Ok(ApiResponse::success("Logged in", resp, Some(Meta::empty())))
}

pub async fn me(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<User>> {
    let mut tx = state.store.begin().await?;
    let found = tx
        .find_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(ApiResponse::success("OK", found, None))
}

async fn current_user(state: &AppState, user: &AuthUser) -> AppResult<User> {
    let mut tx = state.store.begin().await?;
    tx.find_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Account no longer exists".into()))
}

/// Fresh token for a caller whose current token is still valid.
pub async fn refresh_token(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<RefreshResponse>> {
    let account = current_user(state, user).await?;
    let session = issue_token(&state.config, &account)?;
    tracing::debug!(user_id = %account.id, "token refreshed");
    Ok(ApiResponse::success(
        "Token refreshed",
        RefreshResponse {
            session,
            user: account,
        },
        None,
    ))
}

pub async fn check_auth(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<AuthCheck>> {
    let account = current_user(state, user).await?;
    Ok(ApiResponse::success(
        "Authenticated",
        AuthCheck {
            authenticated: true,
            user_id: account.id,
            email: account.email,
            role: account.role,
        },
        None,
    ))
}

/// Tells whether a reset token can still be redeemed, without using it up.
pub async fn verify_reset_token(
    state: &AppState,
    token: &str,
) -> AppResult<ApiResponse<ResetTokenCheck>> {
    let invalid = || AppError::bad_request("Invalid or expired reset token");
    let user_id = state
        .reset_tokens
        .peek(token.trim(), Utc::now())
        .await
        .ok_or_else(invalid)?;

    let mut tx = state.store.begin().await?;
    let user = tx.find_user(user_id).await?.ok_or_else(invalid)?;
    Ok(ApiResponse::success(
        "Reset token is valid",
        ResetTokenCheck {
            valid: true,
            email: user.email,
        },
        None,
    ))
}

pub async fn change_password(
    state: &AppState,
    user: &AuthUser,
    payload: ChangePasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    validate_password(&payload.new_password)?;

    let mut tx = state.store.begin().await?;
    let mut account = tx
        .find_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if !verify_password(&payload.current_password, &account.password_hash)? {
        return Err(AppError::bad_request("Current password is incorrect"));
    }

    account.password_hash = hash_password(&payload.new_password)?;
    account.updated_at = Utc::now();
    tx.update_user(&account).await?;
    tx.commit().await?;

    tracing::info!(user_id = %account.id, "password changed");
    Ok(ApiResponse::success(
        "Password changed",
        serde_json::json!({ "id": account.id }),
        None,
    ))
}

pub async fn forgot_password(
    state: &AppState,
    payload: ForgotPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let email = normalize_email(&payload.email);
    let now = Utc::now();

    if !state.reset_tokens.allow_request(&email, now).await {
        return Err(AppError::TooManyRequests(
            "Too many password reset requests, try again later".into(),
        ));
    }

    let mut tx = state.store.begin().await?;
    let user = tx.find_user_by_email(&email).await?;
    drop(tx);

    match user {
        Some(user) => {
            let token = state.reset_tokens.issue(user.id, now).await;
            tracing::info!(user_id = %user.id, "password reset requested");
            state
                .notifier
                .dispatch(Notification::PasswordReset { user, token })
                .await;
        }
        None => tracing::debug!("password reset requested for unknown email"),
    }

    Ok(ApiResponse::success(
        FORGOT_PASSWORD_MESSAGE,
        serde_json::json!({}),
        None,
    ))
}

pub async fn reset_password(
    state: &AppState,
    payload: ResetPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    validate_password(&payload.password)?;

    let user_id = state
        .reset_tokens
        .redeem(payload.token.trim(), Utc::now())
        .await
        .ok_or_else(|| AppError::bad_request("Invalid or expired reset token"))?;

    let mut tx = state.store.begin().await?;
    let mut user = tx
        .find_user(user_id)
        .await?
        .ok_or_else(|| AppError::bad_request("Invalid or expired reset token"))?;
    user.password_hash = hash_password(&payload.password)?;
    user.updated_at = Utc::now();
    tx.update_user(&user).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, "password reset");
    Ok(ApiResponse::success(
        "Password has been reset",
        serde_json::json!({ "id": user.id }),
        None,
    ))
}
