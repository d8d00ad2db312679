use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction,
    EntityTrait, Order as SqlOrder, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
    sea_query::{Expr, Func, LikeExpr, LockType},
};
use uuid::Uuid;

use super::{OrderFilter, ProductFilter, Store, StoreTx};
use crate::{
    entity::{
        Addresses, CartItems, Carts, Categories, OrderItems, Orders, Products, Users, addresses,
        cart_items, carts, categories, order_items, orders, products, users,
    },
    error::{AppError, AppResult},
    models::{Address, Cart, CartItem, Category, Order, OrderItem, OrderStatus, Product, User},
    routes::params::{ProductSortBy, SortOrder},
};

/// sea-orm backed store over PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    conn: DatabaseConnection,
}

impl PgStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let txn = self.conn.begin().await?;
        Ok(Box::new(PgTx { txn }))
    }
}

struct PgTx {
    txn: DatabaseTransaction,
}

fn ts(value: DateTime<Utc>) -> DateTime<FixedOffset> {
    value.into()
}

fn sql_order(order: SortOrder) -> SqlOrder {
    match order {
        SortOrder::Asc => SqlOrder::Asc,
        SortOrder::Desc => SqlOrder::Desc,
    }
}

const LIKE_ESCAPE: char = '\\';

/// Lowercased `%term%` with the LIKE wildcards of `term` escaped.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn like_pattern(term: &str) -> LikeExpr {
    LikeExpr::new(escape_like(term)).escape(LIKE_ESCAPE)
}

fn user_from_entity(model: users::Model) -> User {
    User {
        id: model.id,
        email: model.email,
        password_hash: model.password_hash,
        first_name: model.first_name,
        last_name: model.last_name,
        role: model.role,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn user_active(user: &User) -> users::ActiveModel {
    users::ActiveModel {
        id: Set(user.id),
        email: Set(user.email.clone()),
        password_hash: Set(user.password_hash.clone()),
        first_name: Set(user.first_name.clone()),
        last_name: Set(user.last_name.clone()),
        role: Set(user.role.clone()),
        created_at: Set(ts(user.created_at)),
        updated_at: Set(ts(user.updated_at)),
    }
}

fn category_from_entity(model: categories::Model) -> Category {
    Category {
        id: model.id,
        name: model.name,
        description: model.description,
        is_active: model.is_active,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn product_from_entity(model: products::Model) -> Product {
    Product {
        id: model.id,
        category_id: model.category_id,
        name: model.name,
        slug: model.slug,
        description: model.description,
        price: model.price,
        stock: model.stock,
        is_active: model.is_active,
        is_featured: model.is_featured,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn product_active(product: &Product) -> products::ActiveModel {
    products::ActiveModel {
        id: Set(product.id),
        category_id: Set(product.category_id),
        name: Set(product.name.clone()),
        slug: Set(product.slug.clone()),
        description: Set(product.description.clone()),
        price: Set(product.price),
        stock: Set(product.stock),
        is_active: Set(product.is_active),
        is_featured: Set(product.is_featured),
        created_at: Set(ts(product.created_at)),
        updated_at: Set(ts(product.updated_at)),
    }
}

fn cart_from_entity(model: carts::Model) -> Cart {
    Cart {
        id: model.id,
        user_id: model.user_id,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn cart_item_from_entity(model: cart_items::Model) -> CartItem {
    CartItem {
        id: model.id,
        cart_id: model.cart_id,
        product_id: model.product_id,
        quantity: model.quantity,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn cart_item_active(item: &CartItem) -> cart_items::ActiveModel {
    cart_items::ActiveModel {
        id: Set(item.id),
        cart_id: Set(item.cart_id),
        product_id: Set(item.product_id),
        quantity: Set(item.quantity),
        created_at: Set(ts(item.created_at)),
        updated_at: Set(ts(item.updated_at)),
    }
}

fn order_from_entity(model: orders::Model) -> AppResult<Order> {
    let status = model
        .status
        .parse::<OrderStatus>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!(err)))?;
    Ok(Order {
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        status,
        total_price: model.total_price,
        shipping_address_id: model.shipping_address_id,
        billing_address_id: model.billing_address_id,
        notes: model.notes,
        shipped_at: model.shipped_at.map(|dt| dt.with_timezone(&Utc)),
        delivered_at: model.delivered_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn order_active(order: &Order) -> orders::ActiveModel {
    orders::ActiveModel {
        id: Set(order.id),
        order_number: Set(order.order_number.clone()),
        user_id: Set(order.user_id),
        status: Set(order.status.as_str().to_string()),
        total_price: Set(order.total_price),
        shipping_address_id: Set(order.shipping_address_id),
        billing_address_id: Set(order.billing_address_id),
        notes: Set(order.notes.clone()),
        shipped_at: Set(order.shipped_at.map(ts)),
        delivered_at: Set(order.delivered_at.map(ts)),
        created_at: Set(ts(order.created_at)),
        updated_at: Set(ts(order.updated_at)),
    }
}

fn order_item_from_entity(model: order_items::Model) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name: model.product_name,
        price: model.price,
        quantity: model.quantity,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn address_from_entity(model: addresses::Model) -> Address {
    Address {
        id: model.id,
        user_id: model.user_id,
        first_name: model.first_name,
        last_name: model.last_name,
        street: model.street,
        city: model.city,
        zip_code: model.zip_code,
        country: model.country,
        phone: model.phone,
        is_default: model.is_default,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn address_active(address: &Address) -> addresses::ActiveModel {
    addresses::ActiveModel {
        id: Set(address.id),
        user_id: Set(address.user_id),
        first_name: Set(address.first_name.clone()),
        last_name: Set(address.last_name.clone()),
        street: Set(address.street.clone()),
        city: Set(address.city.clone()),
        zip_code: Set(address.zip_code.clone()),
        country: Set(address.country.clone()),
        phone: Set(address.phone.clone()),
        is_default: Set(address.is_default),
        created_at: Set(ts(address.created_at)),
        updated_at: Set(ts(address.updated_at)),
    }
}

fn product_condition(filter: &ProductFilter) -> Condition {
    let mut condition = Condition::all();
    if !filter.include_inactive {
        condition = condition.add(products::Column::IsActive.eq(true));
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.is_empty()) {
        let pattern = like_pattern(term);
        condition = condition.add(
            Condition::any()
                .add(Expr::expr(Func::lower(Expr::col(products::Column::Name))).like(pattern.clone()))
                .add(Expr::expr(Func::lower(Expr::col(products::Column::Description))).like(pattern)),
        );
    }
    if let Some(category_id) = filter.category_id {
        condition = condition.add(products::Column::CategoryId.eq(category_id));
    }
    if let Some(min) = filter.min_price {
        condition = condition.add(products::Column::Price.gte(min));
    }
    if let Some(max) = filter.max_price {
        condition = condition.add(products::Column::Price.lte(max));
    }
    if let Some(featured) = filter.featured {
        condition = condition.add(products::Column::IsFeatured.eq(featured));
    }
    match filter.in_stock {
        Some(true) => condition = condition.add(products::Column::Stock.gt(0)),
        Some(false) => condition = condition.add(products::Column::Stock.eq(0)),
        None => {}
    }
    condition
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn find_user(&mut self, id: Uuid) -> AppResult<Option<User>> {
        let row = Users::find_by_id(id).one(&self.txn).await?;
        Ok(row.map(user_from_entity))
    }

    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        let row = Users::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(users::Column::Email))).eq(email.to_lowercase()),
            )
            .one(&self.txn)
            .await?;
        Ok(row.map(user_from_entity))
    }

    async fn insert_user(&mut self, user: &User) -> AppResult<()> {
        user_active(user).insert(&self.txn).await?;
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> AppResult<()> {
        user_active(user).update(&self.txn).await?;
        Ok(())
    }

    async fn list_categories(&mut self, include_inactive: bool) -> AppResult<Vec<Category>> {
        let mut finder = Categories::find();
        if !include_inactive {
            finder = finder.filter(categories::Column::IsActive.eq(true));
        }
        let rows = finder
            .order_by_asc(categories::Column::Name)
            .all(&self.txn)
            .await?;
        Ok(rows.into_iter().map(category_from_entity).collect())
    }

    async fn find_category(&mut self, id: Uuid) -> AppResult<Option<Category>> {
        let row = Categories::find_by_id(id).one(&self.txn).await?;
        Ok(row.map(category_from_entity))
    }

    async fn find_category_by_name(&mut self, name: &str) -> AppResult<Option<Category>> {
        let row = Categories::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(categories::Column::Name)))
                    .eq(name.to_lowercase()),
            )
            .one(&self.txn)
            .await?;
        Ok(row.map(category_from_entity))
    }

    async fn insert_category(&mut self, category: &Category) -> AppResult<()> {
        categories::ActiveModel {
            id: Set(category.id),
            name: Set(category.name.clone()),
            description: Set(category.description.clone()),
            is_active: Set(category.is_active),
            created_at: Set(ts(category.created_at)),
        }
        .insert(&self.txn)
        .await?;
        Ok(())
    }

    async fn find_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        let row = Products::find_by_id(id).one(&self.txn).await?;
        Ok(row.map(product_from_entity))
    }

    async fn lock_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        let row = Products::find_by_id(id)
            .lock(LockType::Update)
            .one(&self.txn)
            .await?;
        Ok(row.map(product_from_entity))
    }

    async fn find_product_by_slug(&mut self, slug: &str) -> AppResult<Option<Product>> {
        let row = Products::find()
            .filter(products::Column::Slug.eq(slug))
            .one(&self.txn)
            .await?;
        Ok(row.map(product_from_entity))
    }

    async fn list_products(&mut self, filter: &ProductFilter) -> AppResult<(Vec<Product>, u64)> {
        let order = sql_order(filter.sort_order);
        let column = match filter.sort_by {
            ProductSortBy::CreatedAt => products::Column::CreatedAt,
            ProductSortBy::Price => products::Column::Price,
            ProductSortBy::Name => products::Column::Name,
        };
        let finder = Products::find().filter(product_condition(filter));
        let total = finder.clone().count(&self.txn).await?;

        let mut finder = finder
            .order_by(column, order.clone())
            .order_by(products::Column::Id, order)
            .offset(filter.offset);
        if let Some(limit) = filter.limit {
            finder = finder.limit(limit);
        }
        let rows = finder.all(&self.txn).await?;
        Ok((rows.into_iter().map(product_from_entity).collect(), total))
    }

    async fn list_low_stock(&mut self, threshold: i32) -> AppResult<Vec<Product>> {
        let rows = Products::find()
            .filter(
                Condition::all()
                    .add(products::Column::IsActive.eq(true))
                    .add(products::Column::Stock.gt(0))
                    .add(products::Column::Stock.lte(threshold)),
            )
            .order_by_asc(products::Column::Stock)
            .order_by_asc(products::Column::Name)
            .all(&self.txn)
            .await?;
        Ok(rows.into_iter().map(product_from_entity).collect())
    }

    async fn insert_product(&mut self, product: &Product) -> AppResult<()> {
        product_active(product).insert(&self.txn).await?;
        Ok(())
    }

    async fn update_product(&mut self, product: &Product) -> AppResult<()> {
        product_active(product).update(&self.txn).await?;
        Ok(())
    }

    async fn delete_product(&mut self, id: Uuid) -> AppResult<()> {
        CartItems::delete_many()
            .filter(cart_items::Column::ProductId.eq(id))
            .exec(&self.txn)
            .await?;
        Products::delete_by_id(id).exec(&self.txn).await?;
        Ok(())
    }

    async fn product_has_orders(&mut self, id: Uuid) -> AppResult<bool> {
        let count = OrderItems::find()
            .filter(order_items::Column::ProductId.eq(id))
            .count(&self.txn)
            .await?;
        Ok(count > 0)
    }

    async fn units_sold(&mut self) -> AppResult<Vec<(Uuid, i64)>> {
        let sold = Expr::col((order_items::Entity, order_items::Column::Quantity)).sum();
        let rows: Vec<(Uuid, i64)> = OrderItems::find()
            .select_only()
            .column(order_items::Column::ProductId)
            .column_as(sold.clone(), "sold")
            .inner_join(Orders)
            .filter(orders::Column::Status.ne(OrderStatus::Cancelled.as_str()))
            .group_by(order_items::Column::ProductId)
            .order_by_desc(sold)
            .order_by_asc(order_items::Column::ProductId)
            .into_tuple()
            .all(&self.txn)
            .await?;
        Ok(rows)
    }

    async fn find_cart_by_user(&mut self, user_id: Uuid) -> AppResult<Option<Cart>> {
        let row = Carts::find()
            .filter(carts::Column::UserId.eq(user_id))
            .one(&self.txn)
            .await?;
        Ok(row.map(cart_from_entity))
    }

    async fn insert_cart(&mut self, cart: &Cart) -> AppResult<()> {
        carts::ActiveModel {
            id: Set(cart.id),
            user_id: Set(cart.user_id),
            created_at: Set(ts(cart.created_at)),
            updated_at: Set(ts(cart.updated_at)),
        }
        .insert(&self.txn)
        .await?;
        Ok(())
    }

    async fn update_cart(&mut self, cart: &Cart) -> AppResult<()> {
        Carts::update_many()
            .col_expr(carts::Column::UpdatedAt, Expr::value(ts(cart.updated_at)))
            .filter(carts::Column::Id.eq(cart.id))
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn list_carts_untouched_since(&mut self, before: DateTime<Utc>) -> AppResult<Vec<Cart>> {
        let rows = Carts::find()
            .filter(carts::Column::UpdatedAt.lt(ts(before)))
            .order_by_asc(carts::Column::UpdatedAt)
            .all(&self.txn)
            .await?;
        Ok(rows.into_iter().map(cart_from_entity).collect())
    }

    async fn delete_cart(&mut self, id: Uuid) -> AppResult<()> {
        CartItems::delete_many()
            .filter(cart_items::Column::CartId.eq(id))
            .exec(&self.txn)
            .await?;
        Carts::delete_by_id(id).exec(&self.txn).await?;
        Ok(())
    }

    async fn list_cart_items(&mut self, cart_id: Uuid) -> AppResult<Vec<CartItem>> {
        let rows = CartItems::find()
            .filter(cart_items::Column::CartId.eq(cart_id))
            .order_by_asc(cart_items::Column::CreatedAt)
            .order_by_asc(cart_items::Column::Id)
            .all(&self.txn)
            .await?;
        Ok(rows.into_iter().map(cart_item_from_entity).collect())
    }

    async fn find_cart_item(&mut self, id: Uuid) -> AppResult<Option<CartItem>> {
        let row = CartItems::find_by_id(id).one(&self.txn).await?;
        Ok(row.map(cart_item_from_entity))
    }

    async fn find_cart_item_by_product(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<CartItem>> {
        let row = CartItems::find()
            .filter(
                Condition::all()
                    .add(cart_items::Column::CartId.eq(cart_id))
                    .add(cart_items::Column::ProductId.eq(product_id)),
            )
            .one(&self.txn)
            .await?;
        Ok(row.map(cart_item_from_entity))
    }

    async fn insert_cart_item(&mut self, item: &CartItem) -> AppResult<()> {
        cart_item_active(item).insert(&self.txn).await?;
        Ok(())
    }

    async fn update_cart_item(&mut self, item: &CartItem) -> AppResult<()> {
        cart_item_active(item).update(&self.txn).await?;
        Ok(())
    }

    async fn delete_cart_item(&mut self, id: Uuid) -> AppResult<()> {
        CartItems::delete_by_id(id).exec(&self.txn).await?;
        Ok(())
    }

    async fn clear_cart_items(&mut self, cart_id: Uuid) -> AppResult<()> {
        CartItems::delete_many()
            .filter(cart_items::Column::CartId.eq(cart_id))
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> AppResult<()> {
        order_active(order).insert(&self.txn).await?;
        Ok(())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> AppResult<()> {
        order_items::ActiveModel {
            id: Set(item.id),
            order_id: Set(item.order_id),
            product_id: Set(item.product_id),
            product_name: Set(item.product_name.clone()),
            price: Set(item.price),
            quantity: Set(item.quantity),
            created_at: Set(ts(item.created_at)),
        }
        .insert(&self.txn)
        .await?;
        Ok(())
    }

    async fn find_order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        Orders::find_by_id(id)
            .one(&self.txn)
            .await?
            .map(order_from_entity)
            .transpose()
    }

    async fn find_order_by_number(&mut self, order_number: &str) -> AppResult<Option<Order>> {
        Orders::find()
            .filter(orders::Column::OrderNumber.eq(order_number))
            .one(&self.txn)
            .await?
            .map(order_from_entity)
            .transpose()
    }

    async fn list_orders(&mut self, filter: &OrderFilter) -> AppResult<(Vec<Order>, u64)> {
        let mut condition = Condition::all();
        if let Some(user_id) = filter.user_id {
            condition = condition.add(orders::Column::UserId.eq(user_id));
        }
        if let Some(status) = filter.status {
            condition = condition.add(orders::Column::Status.eq(status.as_str()));
        }
        if let Some(from) = filter.created_from {
            condition = condition.add(orders::Column::CreatedAt.gte(ts(from)));
        }
        if let Some(to) = filter.created_to {
            condition = condition.add(orders::Column::CreatedAt.lte(ts(to)));
        }

        let finder = Orders::find().filter(condition);
        let total = finder.clone().count(&self.txn).await?;

        let order = sql_order(filter.sort_order);
        let mut finder = finder
            .order_by(orders::Column::CreatedAt, order.clone())
            .order_by(orders::Column::OrderNumber, order)
            .offset(filter.offset);
        if let Some(limit) = filter.limit {
            finder = finder.limit(limit);
        }
        let rows = finder
            .all(&self.txn)
            .await?
            .into_iter()
            .map(order_from_entity)
            .collect::<AppResult<Vec<_>>>()?;
        Ok((rows, total))
    }

    async fn update_order(&mut self, order: &Order) -> AppResult<()> {
        order_active(order).update(&self.txn).await?;
        Ok(())
    }

    async fn list_order_items(&mut self, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
        let rows = OrderItems::find()
            .filter(order_items::Column::OrderId.eq(order_id))
            .order_by_asc(order_items::Column::CreatedAt)
            .order_by_asc(order_items::Column::Id)
            .all(&self.txn)
            .await?;
        Ok(rows.into_iter().map(order_item_from_entity).collect())
    }

    async fn list_addresses(&mut self, user_id: Uuid) -> AppResult<Vec<Address>> {
        let rows = Addresses::find()
            .filter(addresses::Column::UserId.eq(user_id))
            .order_by_desc(addresses::Column::IsDefault)
            .order_by_desc(addresses::Column::CreatedAt)
            .order_by_asc(addresses::Column::Id)
            .all(&self.txn)
            .await?;
        Ok(rows.into_iter().map(address_from_entity).collect())
    }

    async fn find_address(&mut self, id: Uuid) -> AppResult<Option<Address>> {
        let row = Addresses::find_by_id(id).one(&self.txn).await?;
        Ok(row.map(address_from_entity))
    }

    async fn insert_address(&mut self, address: &Address) -> AppResult<()> {
        address_active(address).insert(&self.txn).await?;
        Ok(())
    }

    async fn update_address(&mut self, address: &Address) -> AppResult<()> {
        address_active(address).update(&self.txn).await?;
        Ok(())
    }

    async fn delete_address(&mut self, id: Uuid) -> AppResult<()> {
        Addresses::delete_by_id(id).exec(&self.txn).await?;
        Ok(())
    }

    async fn clear_default_addresses(
        &mut self,
        user_id: Uuid,
        keep: Option<Uuid>,
    ) -> AppResult<()> {
        let mut condition = Condition::all()
            .add(addresses::Column::UserId.eq(user_id))
            .add(addresses::Column::IsDefault.eq(true));
        if let Some(keep) = keep {
            condition = condition.add(addresses::Column::Id.ne(keep));
        }
        Addresses::update_many()
            .col_expr(addresses::Column::IsDefault, Expr::value(false))
            .col_expr(addresses::Column::UpdatedAt, Expr::value(ts(Utc::now())))
            .filter(condition)
            .exec(&self.txn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::sea_query::{PostgresQueryBuilder, Query};

    use super::*;

    fn where_clause(term: &str) -> String {
        Query::select()
            .column(products::Column::Id)
            .from(products::Entity)
            .and_where(Expr::col(products::Column::Name).like(like_pattern(term)))
            .to_string(PostgresQueryBuilder)
    }

    #[test]
    fn search_terms_match_wildcards_literally() {
        assert_eq!(escape_like("50%_Off"), r"%50\%\_off%");
        assert_eq!(escape_like(r"a\b"), r"%a\\b%");
        assert_eq!(escape_like("Lamp"), "%lamp%");
    }

    #[test]
    fn search_condition_declares_the_escape_character() {
        let sql = where_clause("Lamp");
        assert!(sql.contains("'%lamp%'"), "{sql}");
        assert!(sql.contains("ESCAPE"), "{sql}");
    }
}
