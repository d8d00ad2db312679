use std::{env, str::FromStr};

use anyhow::{Context, anyhow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(anyhow!("unknown APP_STORE backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub mail_from: String,
    pub admin_email: String,
    pub low_stock_threshold: i32,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match env::var("APP_STORE") {
            Ok(value) => value.parse()?,
            Err(_) => StoreBackend::Postgres,
        };
        let database_url = env::var("DATABASE_URL").ok();
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(anyhow!("DATABASE_URL is required when APP_STORE=postgres"));
        }
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let jwt_ttl_hours = env::var("JWT_TTL_HOURS")
            .ok()
            .and_then(|h| h.parse::<i64>().ok())
            .unwrap_or(24);
        let mail_from =
            env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@storefront.local".to_string());
        let admin_email =
            env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@storefront.local".to_string());
        let low_stock_threshold = env::var("LOW_STOCK_THRESHOLD")
            .ok()
            .and_then(|t| t.parse::<i32>().ok())
            .unwrap_or(5);
        Ok(Self {
            host,
            port,
            store,
            database_url,
            jwt_secret,
            jwt_ttl_hours,
            mail_from,
            admin_email,
            low_stock_threshold,
        })
    }

    /// Settings for tests and local runs against the in-memory store.
    pub fn for_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            store: StoreBackend::Memory,
            database_url: None,
            jwt_secret: jwt_secret.into(),
            jwt_ttl_hours: 24,
            mail_from: "no-reply@storefront.local".to_string(),
            admin_email: "admin@storefront.local".to_string(),
            low_stock_threshold: 5,
        }
    }
}
