use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::Address;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AddressRequest {
    pub first_name: String,
    pub last_name: String,
    pub street: String,
    pub city: String,
    pub zip_code: String,
    pub country: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddressDto {
    #[serde(flatten)]
    pub address: Address,
    pub formatted: String,
}

impl From<Address> for AddressDto {
    fn from(address: Address) -> Self {
        let formatted = address.formatted();
        Self { address, formatted }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct AddressList {
    #[schema(value_type = Vec<AddressDto>)]
    pub items: Vec<AddressDto>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserStats {
    pub total_orders: u64,
    /// Delivered orders.
    pub completed_orders: u64,
    /// Sum over delivered orders, in cents.
    pub total_spent: i64,
    pub total_addresses: usize,
    pub member_since: DateTime<Utc>,
}
