#![allow(dead_code)]

pub mod contended;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    dto::{
        auth::RegisterRequest, categories::CreateCategoryRequest, products::CreateProductRequest,
        users::AddressRequest,
    },
    middleware::auth::AuthUser,
    models::{Product, ROLE_ADMIN, ROLE_USER},
    notify::{MailError, Mailer},
    services::{auth_service, category_service, product_service, user_service},
    state::AppState,
    store::{MemoryStore, Store},
};
use uuid::Uuid;

pub const JWT_SECRET: &str = "test-secret";

/// Mailer that keeps every sent message for later assertions.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingMailer {
    pub fn templates(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(template, _, _)| template.clone())
            .collect()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, to, _)| to == recipient)
            .map(|(template, _, _)| template.clone())
            .collect()
    }

    /// Context of the latest message rendered from `template`.
    pub fn last_context(&self, template: &str) -> Option<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _, _)| t == template)
            .map(|(_, _, context)| context.clone())
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, template: &str, recipient: &str, context: Value) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((template.to_string(), recipient.to_string(), context));
        Ok(())
    }
}

pub fn test_state() -> (AppState, Arc<RecordingMailer>) {
    state_with_store(Arc::new(MemoryStore::new()))
}

pub fn state_with_store(store: Arc<dyn Store>) -> (AppState, Arc<RecordingMailer>) {
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::new(store, mailer.clone(), AppConfig::for_memory(JWT_SECRET));
    (state, mailer)
}

pub fn admin() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: ROLE_ADMIN.to_string(),
    }
}

pub async fn register(state: &AppState, email: &str) -> AuthUser {
    let user = auth_service::register_user(
        state,
        RegisterRequest {
            email: email.to_string(),
            password: "password123".to_string(),
            first_name: "Test".to_string(),
            last_name: "Customer".to_string(),
        },
    )
    .await
    .unwrap()
    .data
    .unwrap();
    AuthUser {
        user_id: user.id,
        role: ROLE_USER.to_string(),
    }
}

pub async fn category(state: &AppState, name: &str) -> Uuid {
    category_service::create_category(
        state,
        &admin(),
        CreateCategoryRequest {
            name: name.to_string(),
            description: None,
        },
    )
    .await
    .unwrap()
    .data
    .unwrap()
    .id
}

pub async fn product(state: &AppState, category_id: Uuid, name: &str, price: i64, stock: i32) -> Product {
    product_service::create_product(
        state,
        &admin(),
        CreateProductRequest {
            category_id,
            name: name.to_string(),
            description: None,
            price,
            stock,
            is_featured: false,
        },
    )
    .await
    .unwrap()
    .data
    .unwrap()
}

pub fn address_request(street: &str, is_default: bool) -> AddressRequest {
    AddressRequest {
        first_name: "Test".to_string(),
        last_name: "Customer".to_string(),
        street: street.to_string(),
        city: "Springfield".to_string(),
        zip_code: "12345".to_string(),
        country: "US".to_string(),
        phone: None,
        is_default,
    }
}

pub async fn address(state: &AppState, user: &AuthUser, street: &str) -> Uuid {
    user_service::create_address(state, user, address_request(street, false))
        .await
        .unwrap()
        .data
        .unwrap()
        .address
        .id
}

pub async fn stock_of(state: &AppState, id: Uuid) -> i32 {
    product_service::get_product(state, id)
        .await
        .unwrap()
        .data
        .unwrap()
        .stock
}
