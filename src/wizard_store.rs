use crate::errors::{AppError, ResultExt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::time::Duration;

/// Key-value storage for serialized wizard snapshots.
///
/// Stands in for the browser's local storage: one opaque string per key, written on every
/// mutation and read back when a session resumes.
#[async_trait]
pub trait WizardStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn save(&self, key: &str, payload: String) -> Result<(), AppError>;
    async fn clear(&self, key: &str) -> Result<(), AppError>;
}

/// Stored form of a snapshot: the JSON payload next to its SHA-256. Rows edited or cut short
/// outside the service fail the check and are dropped rather than resumed.
#[derive(Serialize, Deserialize)]
struct Sealed {
    sha256: String,
    payload: String,
}

fn digest(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Wraps a snapshot payload with its checksum for storage.
pub fn seal(payload: String) -> Result<String, AppError> {
    let sealed = Sealed {
        sha256: digest(&payload),
        payload,
    };
    Ok(serde_json::to_string(&sealed)?)
}

/// Payload of a sealed snapshot, or `None` when it is unreadable or was altered.
pub fn unseal(stored: &str) -> Option<String> {
    let sealed: Sealed = match serde_json::from_str(stored) {
        Ok(sealed) => sealed,
        Err(e) => {
            tracing::warn!("Wizard snapshot is not a sealed envelope: {}", e);
            return None;
        }
    };

    if digest(&sealed.payload) != sealed.sha256 {
        tracing::warn!(
            "Wizard snapshot rejected: checksum mismatch ({} bytes)",
            sealed.payload.len()
        );
        return None;
    }
    Some(sealed.payload)
}

/// In-process store. Entries also expire on their own after `backstop_ttl` so abandoned
/// sessions do not accumulate; staleness itself is decided by the wizard's clock.
#[derive(Clone)]
pub struct MemoryWizardStore {
    entries: Cache<String, String>,
}

impl MemoryWizardStore {
    pub fn new(backstop_ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(backstop_ttl)
                .max_capacity(10_000)
                .build(),
        }
    }
}

impl Default for MemoryWizardStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 3600))
    }
}

#[async_trait]
impl WizardStore for MemoryWizardStore {
    async fn load(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.get(key).await)
    }

    async fn save(&self, key: &str, payload: String) -> Result<(), AppError> {
        self.entries.insert(key.to_string(), payload).await;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}

/// Postgres-backed store, shared by every instance of the service.
#[derive(Clone)]
pub struct PgWizardStore {
    pool: PgPool,
}

impl PgWizardStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the snapshot table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wizard_sessions (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                saved_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating wizard_sessions table")?;
        Ok(())
    }

    /// Deletes snapshots not written since `cutoff`.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM wizard_sessions WHERE saved_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("purging stale wizard sessions")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WizardStore for PgWizardStore {
    async fn load(&self, key: &str) -> Result<Option<String>, AppError> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM wizard_sessions WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading wizard session {}", key))?;
        Ok(payload)
    }

    async fn save(&self, key: &str, payload: String) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO wizard_sessions (key, payload, saved_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key)
            DO UPDATE SET payload = EXCLUDED.payload, saved_at = NOW()
            "#,
        )
        .bind(key)
        .bind(payload)
        .execute(&self.pool)
        .await
        .with_context(|| format!("saving wizard session {}", key))?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM wizard_sessions WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("clearing wizard session {}", key))?;
        Ok(())
    }
}
