use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storefront_api::{
    error::AppResult,
    models::{Address, Cart, CartItem, Category, Order, OrderItem, Product, User},
    store::{MemoryStore, OrderFilter, ProductFilter, Store, StoreTx},
};
use uuid::Uuid;

/// Memory store that records every product lock and can report a lower
/// stock under lock than an unlocked read sees, as if another checkout took
/// the units in between.
#[derive(Default)]
pub struct ContendedStore {
    inner: MemoryStore,
    locks: Arc<Mutex<Vec<Uuid>>>,
    stock_under_lock: Arc<Mutex<HashMap<Uuid, i32>>>,
}

impl ContendedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Product ids in the order they were locked, across all transactions.
    pub fn locked(&self) -> Vec<Uuid> {
        self.locks.lock().unwrap().clone()
    }

    pub fn clear_locks(&self) {
        self.locks.lock().unwrap().clear();
    }

    pub fn sell_elsewhere(&self, product_id: Uuid, remaining: i32) {
        self.stock_under_lock
            .lock()
            .unwrap()
            .insert(product_id, remaining);
    }
}

#[async_trait]
impl Store for ContendedStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        Ok(Box::new(ContendedTx {
            inner: self.inner.begin().await?,
            locks: self.locks.clone(),
            stock_under_lock: self.stock_under_lock.clone(),
        }))
    }
}

struct ContendedTx {
    inner: Box<dyn StoreTx>,
    locks: Arc<Mutex<Vec<Uuid>>>,
    stock_under_lock: Arc<Mutex<HashMap<Uuid, i32>>>,
}

#[async_trait]
impl StoreTx for ContendedTx {
    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.inner.commit().await
    }

    async fn lock_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        self.locks.lock().unwrap().push(id);
        let remaining = self.stock_under_lock.lock().unwrap().get(&id).copied();
        let product = self.inner.lock_product(id).await?;
        Ok(product.map(|mut p| {
            if let Some(stock) = remaining {
                p.stock = stock;
            }
            p
        }))
    }

    async fn find_user(&mut self, id: Uuid) -> AppResult<Option<User>> {
        self.inner.find_user(id).await
    }

    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        self.inner.find_user_by_email(email).await
    }

    async fn insert_user(&mut self, user: &User) -> AppResult<()> {
        self.inner.insert_user(user).await
    }

    async fn update_user(&mut self, user: &User) -> AppResult<()> {
        self.inner.update_user(user).await
    }

    async fn list_categories(&mut self, include_inactive: bool) -> AppResult<Vec<Category>> {
        self.inner.list_categories(include_inactive).await
    }

    async fn find_category(&mut self, id: Uuid) -> AppResult<Option<Category>> {
        self.inner.find_category(id).await
    }

    async fn find_category_by_name(&mut self, name: &str) -> AppResult<Option<Category>> {
        self.inner.find_category_by_name(name).await
    }

    async fn insert_category(&mut self, category: &Category) -> AppResult<()> {
        self.inner.insert_category(category).await
    }

    async fn find_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        self.inner.find_product(id).await
    }

    async fn find_product_by_slug(&mut self, slug: &str) -> AppResult<Option<Product>> {
        self.inner.find_product_by_slug(slug).await
    }

    async fn list_products(&mut self, filter: &ProductFilter) -> AppResult<(Vec<Product>, u64)> {
        self.inner.list_products(filter).await
    }

    async fn list_low_stock(&mut self, threshold: i32) -> AppResult<Vec<Product>> {
        self.inner.list_low_stock(threshold).await
    }

    async fn insert_product(&mut self, product: &Product) -> AppResult<()> {
        self.inner.insert_product(product).await
    }

    async fn update_product(&mut self, product: &Product) -> AppResult<()> {
        self.inner.update_product(product).await
    }

    async fn delete_product(&mut self, id: Uuid) -> AppResult<()> {
        self.inner.delete_product(id).await
    }

    async fn product_has_orders(&mut self, id: Uuid) -> AppResult<bool> {
        self.inner.product_has_orders(id).await
    }

    async fn units_sold(&mut self) -> AppResult<Vec<(Uuid, i64)>> {
        self.inner.units_sold().await
    }

    async fn find_cart_by_user(&mut self, user_id: Uuid) -> AppResult<Option<Cart>> {
        self.inner.find_cart_by_user(user_id).await
    }

    async fn insert_cart(&mut self, cart: &Cart) -> AppResult<()> {
        self.inner.insert_cart(cart).await
    }

    async fn update_cart(&mut self, cart: &Cart) -> AppResult<()> {
        self.inner.update_cart(cart).await
    }

    async fn list_carts_untouched_since(&mut self, before: DateTime<Utc>) -> AppResult<Vec<Cart>> {
        self.inner.list_carts_untouched_since(before).await
    }

    async fn delete_cart(&mut self, id: Uuid) -> AppResult<()> {
        self.inner.delete_cart(id).await
    }

    async fn list_cart_items(&mut self, cart_id: Uuid) -> AppResult<Vec<CartItem>> {
        self.inner.list_cart_items(cart_id).await
    }

    async fn find_cart_item(&mut self, id: Uuid) -> AppResult<Option<CartItem>> {
        self.inner.find_cart_item(id).await
    }

    async fn find_cart_item_by_product(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<CartItem>> {
        self.inner.find_cart_item_by_product(cart_id, product_id).await
    }

    async fn insert_cart_item(&mut self, item: &CartItem) -> AppResult<()> {
        self.inner.insert_cart_item(item).await
    }

    async fn update_cart_item(&mut self, item: &CartItem) -> AppResult<()> {
        self.inner.update_cart_item(item).await
    }

    async fn delete_cart_item(&mut self, id: Uuid) -> AppResult<()> {
        self.inner.delete_cart_item(id).await
    }

    async fn clear_cart_items(&mut self, cart_id: Uuid) -> AppResult<()> {
        self.inner.clear_cart_items(cart_id).await
    }

    async fn insert_order(&mut self, order: &Order) -> AppResult<()> {
        self.inner.insert_order(order).await
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> AppResult<()> {
        self.inner.insert_order_item(item).await
    }

    async fn find_order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        self.inner.find_order(id).await
    }

    async fn find_order_by_number(&mut self, order_number: &str) -> AppResult<Option<Order>> {
        self.inner.find_order_by_number(order_number).await
    }

    async fn list_orders(&mut self, filter: &OrderFilter) -> AppResult<(Vec<Order>, u64)> {
        self.inner.list_orders(filter).await
    }

    async fn update_order(&mut self, order: &Order) -> AppResult<()> {
        self.inner.update_order(order).await
    }

    async fn list_order_items(&mut self, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
        self.inner.list_order_items(order_id).await
    }

    async fn list_addresses(&mut self, user_id: Uuid) -> AppResult<Vec<Address>> {
        self.inner.list_addresses(user_id).await
    }

    async fn find_address(&mut self, id: Uuid) -> AppResult<Option<Address>> {
        self.inner.find_address(id).await
    }

    async fn insert_address(&mut self, address: &Address) -> AppResult<()> {
        self.inner.insert_address(address).await
    }

    async fn update_address(&mut self, address: &Address) -> AppResult<()> {
        self.inner.update_address(address).await
    }

    async fn delete_address(&mut self, id: Uuid) -> AppResult<()> {
        self.inner.delete_address(id).await
    }

    async fn clear_default_addresses(
        &mut self,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> AppResult<()> {
        self.inner.clear_default_addresses(user_id, keep).await
    }
}
