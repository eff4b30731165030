use std::time::Duration;

use sqlx::{
    PgPool,
    migrate::MigrateError,
    postgres::PgPoolOptions,
};
use thiserror::Error;
use tracing::info;

pub mod models;

#[derive(Debug, Error)]
pub enum DBServiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] MigrateError),
}

/// Connection pool shared by every model query.
#[derive(Clone)]
pub struct DBService {
    pub pool: PgPool,
}

impl DBService {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Connect to Postgres and apply pending migrations.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, DBServiceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(max_connections, "Database pool ready, migrations applied");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}
