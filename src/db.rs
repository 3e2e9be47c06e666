use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Wizard snapshots are small and written once per transition, a handful of connections is plenty.
const MAX_CONNECTIONS: u32 = 5;

/// Postgres pool backing shared wizard sessions.
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Connects and verifies the database answers before the server starts accepting requests.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        tracing::debug!("Wizard database answered health check");

        Ok(Self { pool })
    }
}
