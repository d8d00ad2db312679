use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{OrderFilter, ProductFilter, Store, StoreTx};
use crate::{
    error::{AppError, AppResult},
    models::{Address, Cart, CartItem, Category, Order, OrderItem, OrderStatus, Product, User},
    routes::params::{ProductSortBy, SortOrder},
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    categories: HashMap<Uuid, Category>,
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Cart>,
    cart_items: HashMap<Uuid, CartItem>,
    orders: HashMap<Uuid, Order>,
    order_items: HashMap<Uuid, OrderItem>,
    addresses: HashMap<Uuid, Address>,
}

/// Process-local store used by tests and `APP_STORE=memory`.
///
/// A transaction owns the only lock on the tables and writes to a private
/// copy taken on its first write. Transactions are fully serialized and a
/// dropped transaction leaves no trace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open(&self) -> MemoryTx {
        MemoryTx {
            guard: self.tables.clone().lock_owned().await,
            work: None,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        Ok(Box::new(self.open().await))
    }
}

/// Reads go to the locked tables until the first write copies them.
struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Option<Tables>,
}

impl MemoryTx {
    fn read(&self) -> &Tables {
        self.work.as_ref().unwrap_or(&*self.guard)
    }

    fn write(&mut self) -> &mut Tables {
        let committed: &Tables = &self.guard;
        self.work.get_or_insert_with(|| committed.clone())
    }
}

fn missing(what: &str, id: Uuid) -> AppError {
    AppError::Internal(anyhow::anyhow!("{what} {id} does not exist"))
}

fn paginate<T>(rows: Vec<T>, limit: Option<u64>, offset: u64) -> Vec<T> {
    let iter = rows.into_iter().skip(offset as usize);
    match limit {
        Some(limit) => iter.take(limit as usize).collect(),
        None => iter.collect(),
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn product_matches(product: &Product, filter: &ProductFilter) -> bool {
    if !filter.include_inactive && !product.is_active {
        return false;
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.is_empty()) {
        let in_description = product
            .description
            .as_deref()
            .is_some_and(|d| contains_ci(d, term));
        if !contains_ci(&product.name, term) && !in_description {
            return false;
        }
    }
    if filter.category_id.is_some_and(|id| id != product.category_id) {
        return false;
    }
    if filter.min_price.is_some_and(|min| product.price < min) {
        return false;
    }
    if filter.max_price.is_some_and(|max| product.price > max) {
        return false;
    }
    if filter.featured.is_some_and(|f| f != product.is_featured) {
        return false;
    }
    if filter.in_stock.is_some_and(|s| s != product.is_in_stock()) {
        return false;
    }
    true
}

fn compare_products(a: &Product, b: &Product, sort_by: ProductSortBy) -> Ordering {
    let primary = match sort_by {
        ProductSortBy::CreatedAt => a.created_at.cmp(&b.created_at),
        ProductSortBy::Price => a.price.cmp(&b.price),
        ProductSortBy::Name => a.name.cmp(&b.name),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, work } = *self;
        if let Some(work) = work {
            *guard = work;
        }
        Ok(())
    }

    async fn find_user(&mut self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        Ok(self
            .read()
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_user(&mut self, user: &User) -> AppResult<()> {
        self.write().users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> AppResult<()> {
        let slot = self
            .write()
            .users
            .get_mut(&user.id)
            .ok_or_else(|| missing("user", user.id))?;
        *slot = user.clone();
        Ok(())
    }

    async fn list_categories(&mut self, include_inactive: bool) -> AppResult<Vec<Category>> {
        let mut rows: Vec<Category> = self
            .read()
            .categories
            .values()
            .filter(|c| include_inactive || c.is_active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn find_category(&mut self, id: Uuid) -> AppResult<Option<Category>> {
        Ok(self.read().categories.get(&id).cloned())
    }

    async fn find_category_by_name(&mut self, name: &str) -> AppResult<Option<Category>> {
        Ok(self
            .read()
            .categories
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn insert_category(&mut self, category: &Category) -> AppResult<()> {
        self.write().categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn find_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(self.read().products.get(&id).cloned())
    }

    async fn lock_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        // The transaction already holds the whole store.
        self.find_product(id).await
    }

    async fn find_product_by_slug(&mut self, slug: &str) -> AppResult<Option<Product>> {
        Ok(self
            .read()
            .products
            .values()
            .find(|p| p.slug == slug)
            .cloned())
    }

    async fn list_products(&mut self, filter: &ProductFilter) -> AppResult<(Vec<Product>, u64)> {
        let mut rows: Vec<Product> = self
            .read()
            .products
            .values()
            .filter(|p| product_matches(p, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let ord = compare_products(a, b, filter.sort_by);
            match filter.sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        let total = rows.len() as u64;
        Ok((paginate(rows, filter.limit, filter.offset), total))
    }

    async fn list_low_stock(&mut self, threshold: i32) -> AppResult<Vec<Product>> {
        let mut rows: Vec<Product> = self
            .read()
            .products
            .values()
            .filter(|p| p.is_active && p.stock > 0 && p.stock <= threshold)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.stock.cmp(&b.stock).then_with(|| a.name.cmp(&b.name)));
        Ok(rows)
    }

    async fn insert_product(&mut self, product: &Product) -> AppResult<()> {
        self.write().products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> AppResult<()> {
        let slot = self
            .write()
            .products
            .get_mut(&product.id)
            .ok_or_else(|| missing("product", product.id))?;
        *slot = product.clone();
        Ok(())
    }

    async fn delete_product(&mut self, id: Uuid) -> AppResult<()> {
        self.write().products.remove(&id);
        self.write().cart_items.retain(|_, item| item.product_id != id);
        Ok(())
    }

    async fn product_has_orders(&mut self, id: Uuid) -> AppResult<bool> {
        Ok(self.read().order_items.values().any(|i| i.product_id == id))
    }

    async fn units_sold(&mut self) -> AppResult<Vec<(Uuid, i64)>> {
        let tables = self.read();
        let mut sold: HashMap<Uuid, i64> = HashMap::new();
        for item in tables.order_items.values() {
            let counted = tables
                .orders
                .get(&item.order_id)
                .is_some_and(|o| o.status != OrderStatus::Cancelled);
            if counted {
                *sold.entry(item.product_id).or_default() += i64::from(item.quantity);
            }
        }
        let mut rows: Vec<(Uuid, i64)> = sold.into_iter().collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(rows)
    }

    async fn find_cart_by_user(&mut self, user_id: Uuid) -> AppResult<Option<Cart>> {
        Ok(self
            .read()
            .carts
            .values()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn insert_cart(&mut self, cart: &Cart) -> AppResult<()> {
        self.write().carts.insert(cart.id, cart.clone());
        Ok(())
    }

    async fn update_cart(&mut self, cart: &Cart) -> AppResult<()> {
        let slot = self
            .write()
            .carts
            .get_mut(&cart.id)
            .ok_or_else(|| missing("cart", cart.id))?;
        *slot = cart.clone();
        Ok(())
    }

    async fn list_carts_untouched_since(&mut self, before: DateTime<Utc>) -> AppResult<Vec<Cart>> {
        let mut rows: Vec<Cart> = self
            .read()
            .carts
            .values()
            .filter(|c| c.updated_at < before)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.updated_at);
        Ok(rows)
    }

    async fn delete_cart(&mut self, id: Uuid) -> AppResult<()> {
        self.write().carts.remove(&id);
        self.write().cart_items.retain(|_, item| item.cart_id != id);
        Ok(())
    }

    async fn list_cart_items(&mut self, cart_id: Uuid) -> AppResult<Vec<CartItem>> {
        let mut rows: Vec<CartItem> = self
            .read()
            .cart_items
            .values()
            .filter(|i| i.cart_id == cart_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn find_cart_item(&mut self, id: Uuid) -> AppResult<Option<CartItem>> {
        Ok(self.read().cart_items.get(&id).cloned())
    }

    async fn find_cart_item_by_product(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<CartItem>> {
        Ok(self
            .read()
            .cart_items
            .values()
            .find(|i| i.cart_id == cart_id && i.product_id == product_id)
            .cloned())
    }

    async fn insert_cart_item(&mut self, item: &CartItem) -> AppResult<()> {
        let duplicate = self
            .read()
            .cart_items
            .values()
            .any(|i| i.cart_id == item.cart_id && i.product_id == item.product_id);
        if duplicate {
            return Err(AppError::Internal(anyhow::anyhow!(
                "cart {} already has a line for product {}",
                item.cart_id,
                item.product_id
            )));
        }
        self.write().cart_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_cart_item(&mut self, item: &CartItem) -> AppResult<()> {
        let slot = self
            .write()
            .cart_items
            .get_mut(&item.id)
            .ok_or_else(|| missing("cart item", item.id))?;
        *slot = item.clone();
        Ok(())
    }

    async fn delete_cart_item(&mut self, id: Uuid) -> AppResult<()> {
        self.write().cart_items.remove(&id);
        Ok(())
    }

    async fn clear_cart_items(&mut self, cart_id: Uuid) -> AppResult<()> {
        self.write().cart_items.retain(|_, item| item.cart_id != cart_id);
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> AppResult<()> {
        self.write().orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> AppResult<()> {
        self.write().order_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn find_order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.read().orders.get(&id).cloned())
    }

    async fn find_order_by_number(&mut self, order_number: &str) -> AppResult<Option<Order>> {
        Ok(self
            .read()
            .orders
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn list_orders(&mut self, filter: &OrderFilter) -> AppResult<(Vec<Order>, u64)> {
        let mut rows: Vec<Order> = self
            .read()
            .orders
            .values()
            .filter(|o| filter.user_id.is_none_or(|id| id == o.user_id))
            .filter(|o| filter.status.is_none_or(|s| s == o.status))
            .filter(|o| filter.created_from.is_none_or(|from| o.created_at >= from))
            .filter(|o| filter.created_to.is_none_or(|to| o.created_at <= to))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let ord = a
                .created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_number.cmp(&b.order_number));
            match filter.sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        let total = rows.len() as u64;
        Ok((paginate(rows, filter.limit, filter.offset), total))
    }

    async fn update_order(&mut self, order: &Order) -> AppResult<()> {
        let slot = self
            .write()
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| missing("order", order.id))?;
        *slot = order.clone();
        Ok(())
    }

    async fn list_order_items(&mut self, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
        let mut rows: Vec<OrderItem> = self
            .read()
            .order_items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_addresses(&mut self, user_id: Uuid) -> AppResult<Vec<Address>> {
        let mut rows: Vec<Address> = self
            .read()
            .addresses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    async fn find_address(&mut self, id: Uuid) -> AppResult<Option<Address>> {
        Ok(self.read().addresses.get(&id).cloned())
    }

    async fn insert_address(&mut self, address: &Address) -> AppResult<()> {
        self.write().addresses.insert(address.id, address.clone());
        Ok(())
    }

    async fn update_address(&mut self, address: &Address) -> AppResult<()> {
        let slot = self
            .write()
            .addresses
            .get_mut(&address.id)
            .ok_or_else(|| missing("address", address.id))?;
        *slot = address.clone();
        Ok(())
    }

    async fn delete_address(&mut self, id: Uuid) -> AppResult<()> {
        self.write().addresses.remove(&id);
        Ok(())
    }

    async fn clear_default_addresses(
        &mut self,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> AppResult<()> {
        let now = Utc::now();
        for address in self.write().addresses.values_mut() {
            if address.user_id == user_id && address.is_default && Some(address.id) != keep {
                address.is_default = false;
                address.updated_at = now;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str, price: i64, stock: i32) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            category_id: Uuid::nil(),
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: None,
            price,
            stock,
            is_active: true,
            is_featured: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_discards_changes() {
        let store = MemoryStore::new();
        let mug = product("Mug", 1200, 4);

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_product(&mug).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_product(mug.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::new();
        let mug = product("Mug", 1200, 4);

        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&mug).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let found = tx.find_product(mug.id).await.unwrap().unwrap();
        assert_eq!(found.stock, 4);
    }

    #[tokio::test]
    async fn lists_products_with_filters_and_sort() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let mut hidden = product("Hidden lamp", 900, 3);
        hidden.is_active = false;
        for p in [
            product("Desk lamp", 4500, 2),
            product("Floor lamp", 9900, 0),
            product("Mug", 1200, 10),
            hidden,
        ] {
            tx.insert_product(&p).await.unwrap();
        }

        let filter = ProductFilter {
            search: Some("LAMP".into()),
            sort_by: ProductSortBy::Price,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let (rows, total) = tx.list_products(&filter).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows[0].name, "Desk lamp");
        assert_eq!(rows[1].name, "Floor lamp");

        let in_stock = ProductFilter {
            search: Some("lamp".into()),
            in_stock: Some(true),
            include_inactive: true,
            ..Default::default()
        };
        let (rows, _) = tx.list_products(&in_stock).await.unwrap();
        let names: Vec<_> = rows.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"Hidden lamp"));
        assert!(!names.contains(&"Floor lamp"));
    }

    #[tokio::test]
    async fn low_stock_excludes_sold_out_products() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for p in [
            product("A", 100, 0),
            product("B", 100, 5),
            product("C", 100, 1),
            product("D", 100, 6),
        ] {
            tx.insert_product(&p).await.unwrap();
        }
        let rows = tx.list_low_stock(5).await.unwrap();
        let names: Vec<_> = rows.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["C", "B"]);
    }

    #[tokio::test]
    async fn rejects_second_line_for_same_product() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let now = Utc::now();
        let line = CartItem {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity: 1,
            created_at: now,
            updated_at: now,
        };
        tx.insert_cart_item(&line).await.unwrap();
        let again = CartItem {
            id: Uuid::new_v4(),
            ..line.clone()
        };
        assert!(tx.insert_cart_item(&again).await.is_err());
    }

    #[tokio::test]
    async fn reads_do_not_copy_the_tables() {
        let store = MemoryStore::new();
        let mug = product("Mug", 1200, 4);

        let mut tx = store.open().await;
        tx.find_product(mug.id).await.unwrap();
        tx.list_products(&ProductFilter::default()).await.unwrap();
        assert!(tx.work.is_none());

        tx.insert_product(&mug).await.unwrap();
        assert!(tx.work.is_some());
        assert!(tx.guard.products.is_empty());
        assert!(tx.find_product(mug.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn read_only_commit_keeps_the_tables() {
        let store = MemoryStore::new();
        let mug = product("Mug", 1200, 4);
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&mug).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.find_product(mug.id).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_product(mug.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn search_wildcards_are_plain_characters() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product("Desk lamp", 4500, 2)).await.unwrap();
        tx.insert_product(&product("Mug 100% cotton_cosy", 1200, 3))
            .await
            .unwrap();

        for (term, expected) in [("%", 1), ("_", 1), ("\\", 0), ("lamp", 1)] {
            let filter = ProductFilter {
                search: Some(term.into()),
                ..Default::default()
            };
            let (_, total) = tx.list_products(&filter).await.unwrap();
            assert_eq!(total, expected, "search {term:?}");
        }
    }
}
