use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, run_migrations},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    let url = config
        .database_url
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
    let orm = create_orm_conn(&url).await?;
    run_migrations(&orm).await?;
    println!("Migrations applied");
    Ok(())
}
