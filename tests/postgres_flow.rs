use std::sync::Arc;

use sea_orm::{ConnectionTrait, Statement};
use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    dto::{
        auth::RegisterRequest,
        cart::AddToCartRequest,
        categories::CreateCategoryRequest,
        orders::{CheckoutRequest, UpdateOrderStatusRequest},
        products::CreateProductRequest,
        users::AddressRequest,
    },
    middleware::auth::AuthUser,
    models::{OrderStatus, ROLE_ADMIN, ROLE_USER},
    notify::LogMailer,
    services::{
        auth_service, cart_service, category_service, order_service, product_service,
        user_service,
    },
    state::AppState,
    store::PgStore,
};
use uuid::Uuid;

// Same checkout flow as the in-memory tests, against a real database.
#[tokio::test]
async fn checkout_and_cancel_against_postgres() -> anyhow::Result<()> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run postgres flow tests.");
            return Ok(());
        }
    };

    let conn = create_orm_conn(&database_url).await?;
    run_migrations(&conn).await?;
    conn.execute(Statement::from_string(
        conn.get_database_backend(),
        "TRUNCATE TABLE order_items, orders, cart_items, carts, addresses, products, categories, users CASCADE",
    ))
    .await?;

    let config = AppConfig::for_memory("test-secret");
    let mailer = Arc::new(LogMailer::new(config.mail_from.clone()));
    let state = AppState::new(Arc::new(PgStore::new(conn)), mailer, config);

    let registered = auth_service::register_user(
        &state,
        RegisterRequest {
            email: "pg@example.com".into(),
            password: "password123".into(),
            first_name: "Pg".into(),
            last_name: "User".into(),
        },
    )
    .await?
    .data
    .expect("user");
    let user = AuthUser {
        user_id: registered.id,
        role: ROLE_USER.into(),
    };
    let admin = AuthUser {
        user_id: Uuid::new_v4(),
        role: ROLE_ADMIN.into(),
    };

    let category = category_service::create_category(
        &state,
        &admin,
        CreateCategoryRequest {
            name: "Widgets".into(),
            description: None,
        },
    )
    .await?
    .data
    .expect("category");
    let widget = product_service::create_product(
        &state,
        &admin,
        CreateProductRequest {
            category_id: category.id,
            name: "Test Widget".into(),
            description: Some("A product for testing".into()),
            price: 1000,
            stock: 10,
            is_featured: false,
        },
    )
    .await?
    .data
    .expect("product");
    assert_eq!(widget.slug, "test-widget");

    let shipping = user_service::create_address(
        &state,
        &user,
        AddressRequest {
            first_name: "Pg".into(),
            last_name: "User".into(),
            street: "1 Database Dr".into(),
            city: "Query City".into(),
            zip_code: "54321".into(),
            country: "US".into(),
            phone: None,
            is_default: false,
        },
    )
    .await?
    .data
    .expect("address");
    assert!(shipping.address.is_default);

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id: widget.id,
            quantity: 2,
        },
    )
    .await?;

    let placed = order_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            shipping_address_id: shipping.address.id,
            billing_address_id: None,
            notes: None,
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(placed.order.total_price, 2000);
    let stock = product_service::get_product(&state, widget.id).await?.data.expect("product").stock;
    assert_eq!(stock, 8);

    let confirmed = order_service::update_order_status(
        &state,
        &admin,
        placed.order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Confirmed,
        },
    )
    .await?
    .data
    .expect("order");
    assert_eq!(confirmed.order.status, OrderStatus::Confirmed);

    order_service::cancel_order(&state, &user, &placed.order.order_number).await?;
    let stock = product_service::get_product(&state, widget.id).await?.data.expect("product").stock;
    assert_eq!(stock, 10);

    Ok(())
}
