use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
    models::{ROLE_ADMIN, ROLE_USER},
    services::{auth_service::hash_password, product_service::slugify},
};
use sqlx::PgPool;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    let url = config
        .database_url
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;

    let orm = create_orm_conn(&url).await?;
    run_migrations(&orm).await?;
    let pool = orm.get_postgres_connection_pool();

    let admin_id = ensure_user(pool, "admin@example.com", "admin12345", ROLE_ADMIN).await?;
    let user_id = ensure_user(pool, "user@example.com", "user12345", ROLE_USER).await?;
    ensure_address(pool, user_id).await?;
    seed_catalog(pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(pool: &PgPool, email: &str, password: &str, role: &str) -> anyhow::Result<Uuid> {
    let password_hash = hash_password(password).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, first_name, last_name, role)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind("Demo")
    .bind(if role == ROLE_ADMIN { "Admin" } else { "Customer" })
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(id)
}

async fn ensure_address(pool: &PgPool, user_id: Uuid) -> anyhow::Result<()> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM addresses WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO addresses (id, user_id, first_name, last_name, street, city, zip_code, country, is_default)
        VALUES ($1, $2, 'Demo', 'Customer', '1 Market Street', 'Springfield', '12345', 'US', TRUE)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .execute(pool)
    .await?;
    println!("Seeded default address");
    Ok(())
}

async fn seed_catalog(pool: &PgPool) -> anyhow::Result<()> {
    let categories = [
        ("Apparel", "Clothes for Rustaceans"),
        ("Kitchen", "Mugs and more"),
        ("Books", "Reading material"),
    ];
    for (name, description) in categories {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .execute(pool)
        .await?;
    }

    let products = [
        ("Apparel", "Axum Hoodie", "Warm hoodie for Rustaceans", 5500, 50, true),
        ("Kitchen", "Ferris Mug", "Coffee tastes better with Ferris", 1200, 100, true),
        ("Apparel", "Rust Sticker Pack", "Decorate your laptop", 500, 4, false),
        ("Books", "Async Rust Handbook", "Learn async Rust patterns", 2500, 75, false),
    ];
    for (category, name, description, price, stock, featured) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, category_id, name, slug, description, price, stock, is_featured)
            SELECT $1, c.id, $2, $3, $4, $5, $6, $7 FROM categories c WHERE c.name = $8
            ON CONFLICT (slug) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(slugify(name))
        .bind(description)
        .bind(price as i64)
        .bind(stock as i32)
        .bind(featured)
        .bind(category)
        .execute(pool)
        .await?;
    }

    println!("Seeded catalog");
    Ok(())
}
