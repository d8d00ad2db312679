use std::sync::Arc;

use crate::{
    config::{AppConfig, StoreBackend},
    db,
    notify::{LogMailer, Mailer, Notifier},
    services::auth_service::ResetTokens,
    store::{MemoryStore, PgStore, Store},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub notifier: Notifier,
    pub config: Arc<AppConfig>,
    pub reset_tokens: Arc<ResetTokens>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn Mailer>, config: AppConfig) -> Self {
        let notifier = Notifier::new(mailer, config.admin_email.clone());
        Self {
            store,
            notifier,
            config: Arc::new(config),
            reset_tokens: Arc::new(ResetTokens::default()),
        }
    }

    /// State over an empty in-memory store with a logging mailer.
    pub fn in_memory(config: AppConfig) -> Self {
        let mailer = Arc::new(LogMailer::new(config.mail_from.clone()));
        Self::new(Arc::new(MemoryStore::new()), mailer, config)
    }

    /// Builds the state for the backend selected in `config`, migrating the
    /// database first when it is PostgreSQL.
    pub async fn connect(config: AppConfig) -> anyhow::Result<Self> {
        match config.store {
            StoreBackend::Memory => {
                tracing::warn!("using the in-memory store, data is lost on restart");
                Ok(Self::in_memory(config))
            }
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
                let conn = db::create_orm_conn(&url).await?;
                db::run_migrations(&conn).await?;
                let mailer = Arc::new(LogMailer::new(config.mail_from.clone()));
                Ok(Self::new(Arc::new(PgStore::new(conn)), mailer, config))
            }
        }
    }
}
