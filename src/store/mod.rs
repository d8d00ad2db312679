//! Persistence seam.
//!
//! Services talk to a [`Store`] and do all reads and writes inside a
//! [`StoreTx`]. A transaction is applied by [`StoreTx::commit`]; dropping it
//! without committing discards every change made through it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Address, Cart, CartItem, Category, Order, OrderItem, OrderStatus, Product, User},
    routes::params::{ProductSortBy, SortOrder},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub category_id: Option<Uuid>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub featured: Option<bool>,
    pub in_stock: Option<bool>,
    /// Admin listings see deactivated products too.
    pub include_inactive: bool,
    pub sort_by: ProductSortBy,
    pub sort_order: SortOrder,
    pub limit: Option<u64>,
    pub offset: u64,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub sort_order: SortOrder,
    pub limit: Option<u64>,
    pub offset: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn commit(self: Box<Self>) -> AppResult<()>;

    // users
    async fn find_user(&mut self, id: Uuid) -> AppResult<Option<User>>;
    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>>;
    async fn insert_user(&mut self, user: &User) -> AppResult<()>;
    async fn update_user(&mut self, user: &User) -> AppResult<()>;

    // categories
    async fn list_categories(&mut self, include_inactive: bool) -> AppResult<Vec<Category>>;
    async fn find_category(&mut self, id: Uuid) -> AppResult<Option<Category>>;
    async fn find_category_by_name(&mut self, name: &str) -> AppResult<Option<Category>>;
    async fn insert_category(&mut self, category: &Category) -> AppResult<()>;

    // products
    async fn find_product(&mut self, id: Uuid) -> AppResult<Option<Product>>;
    /// Reads a product and holds it against concurrent writers until the
    /// transaction ends.
    async fn lock_product(&mut self, id: Uuid) -> AppResult<Option<Product>>;
    async fn find_product_by_slug(&mut self, slug: &str) -> AppResult<Option<Product>>;
    async fn list_products(&mut self, filter: &ProductFilter) -> AppResult<(Vec<Product>, u64)>;
    /// Active products with `0 < stock <= threshold`, lowest stock first.
    async fn list_low_stock(&mut self, threshold: i32) -> AppResult<Vec<Product>>;
    async fn insert_product(&mut self, product: &Product) -> AppResult<()>;
    async fn update_product(&mut self, product: &Product) -> AppResult<()>;
    async fn delete_product(&mut self, id: Uuid) -> AppResult<()>;
    async fn product_has_orders(&mut self, id: Uuid) -> AppResult<bool>;
    /// Units sold per product over orders that were not cancelled, highest
    /// first. Products never sold are absent.
    async fn units_sold(&mut self) -> AppResult<Vec<(Uuid, i64)>>;

    // carts
    async fn find_cart_by_user(&mut self, user_id: Uuid) -> AppResult<Option<Cart>>;
    async fn insert_cart(&mut self, cart: &Cart) -> AppResult<()>;
    async fn update_cart(&mut self, cart: &Cart) -> AppResult<()>;
    async fn list_carts_untouched_since(&mut self, before: DateTime<Utc>) -> AppResult<Vec<Cart>>;
    async fn delete_cart(&mut self, id: Uuid) -> AppResult<()>;

    // cart items, oldest first
    async fn list_cart_items(&mut self, cart_id: Uuid) -> AppResult<Vec<CartItem>>;
    async fn find_cart_item(&mut self, id: Uuid) -> AppResult<Option<CartItem>>;
    async fn find_cart_item_by_product(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<CartItem>>;
    async fn insert_cart_item(&mut self, item: &CartItem) -> AppResult<()>;
    async fn update_cart_item(&mut self, item: &CartItem) -> AppResult<()>;
    async fn delete_cart_item(&mut self, id: Uuid) -> AppResult<()>;
    async fn clear_cart_items(&mut self, cart_id: Uuid) -> AppResult<()>;

    // orders
    async fn insert_order(&mut self, order: &Order) -> AppResult<()>;
    async fn insert_order_item(&mut self, item: &OrderItem) -> AppResult<()>;
    async fn find_order(&mut self, id: Uuid) -> AppResult<Option<Order>>;
    async fn find_order_by_number(&mut self, order_number: &str) -> AppResult<Option<Order>>;
    async fn list_orders(&mut self, filter: &OrderFilter) -> AppResult<(Vec<Order>, u64)>;
    async fn update_order(&mut self, order: &Order) -> AppResult<()>;
    async fn list_order_items(&mut self, order_id: Uuid) -> AppResult<Vec<OrderItem>>;

    // addresses, default first then newest
    async fn list_addresses(&mut self, user_id: Uuid) -> AppResult<Vec<Address>>;
    async fn find_address(&mut self, id: Uuid) -> AppResult<Option<Address>>;
    async fn insert_address(&mut self, address: &Address) -> AppResult<()>;
    async fn update_address(&mut self, address: &Address) -> AppResult<()>;
    async fn delete_address(&mut self, id: Uuid) -> AppResult<()>;
    /// Clears `is_default` on every address of `user_id` except `keep`.
    async fn clear_default_addresses(&mut self, user_id: Uuid, keep: Option<Uuid>)
    -> AppResult<()>;
}
