use serde::Deserialize;
use std::time::Duration;

/// Default client-side timeout for backend calls (30 minutes).
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 1_800_000;
/// Default number of UFs sent per `/clients/phones/by-ufs` call.
pub const DEFAULT_PHONE_LOOKUP_BATCH_SIZE: usize = 100;
/// Default staleness bound for resumed wizard sessions.
pub const DEFAULT_WIZARD_TTL_MINUTES: i64 = 30;
/// Default maximum rows accepted in one import.
pub const DEFAULT_MAX_IMPORT_ROWS: usize = 20_000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub backend_url: String,
    pub backend_token: Option<String>,
    pub database_url: Option<String>,
    pub backend_timeout_ms: u64,
    pub phone_lookup_batch_size: usize,
    pub wizard_ttl_minutes: i64,
    pub max_import_rows: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            backend_url: std::env::var("AQUA_BACKEND_URL")
                .map_err(|_| anyhow::anyhow!("AQUA_BACKEND_URL environment variable required"))
                .and_then(|url| validate_http_url("AQUA_BACKEND_URL", &url))?,
            backend_token: std::env::var("AQUA_BACKEND_TOKEN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| {
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })
                .transpose()?,
            backend_timeout_ms: parse_or("BACKEND_TIMEOUT_MS", DEFAULT_BACKEND_TIMEOUT_MS)?,
            phone_lookup_batch_size: parse_or(
                "PHONE_LOOKUP_BATCH_SIZE",
                DEFAULT_PHONE_LOOKUP_BATCH_SIZE,
            )
            .and_then(|size| {
                if size == 0 || size > 1000 {
                    anyhow::bail!("PHONE_LOOKUP_BATCH_SIZE must be between 1 and 1000");
                }
                Ok(size)
            })?,
            wizard_ttl_minutes: parse_or("WIZARD_TTL_MINUTES", DEFAULT_WIZARD_TTL_MINUTES)
                .and_then(|ttl| {
                    if ttl <= 0 {
                        anyhow::bail!("WIZARD_TTL_MINUTES must be positive");
                    }
                    Ok(ttl)
                })?,
            max_import_rows: parse_or("MAX_IMPORT_ROWS", DEFAULT_MAX_IMPORT_ROWS)?,
        };

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Backend URL: {}", config.backend_url);
        tracing::debug!(
            "Backend token configured: {}",
            config.backend_token.is_some()
        );
        if config.database_url.is_some() {
            tracing::info!("Wizard state will be persisted in Postgres");
        } else {
            tracing::info!("DATABASE_URL not set, wizard state kept in memory");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Configuration pointing at a given backend with every other knob at its default.
    pub fn for_backend(backend_url: impl Into<String>) -> Self {
        Self {
            port: 3000,
            backend_url: backend_url.into(),
            backend_token: None,
            database_url: None,
            backend_timeout_ms: DEFAULT_BACKEND_TIMEOUT_MS,
            phone_lookup_batch_size: DEFAULT_PHONE_LOOKUP_BATCH_SIZE,
            wizard_ttl_minutes: DEFAULT_WIZARD_TTL_MINUTES,
            max_import_rows: DEFAULT_MAX_IMPORT_ROWS,
        }
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn wizard_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.wizard_ttl_minutes)
    }
}

fn validate_http_url(name: &str, raw: &str) -> anyhow::Result<String> {
    if raw.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    let parsed =
        url::Url::parse(raw).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_http_url_trims_trailing_slash() {
        let url = validate_http_url("X", "https://backend.example.com/").unwrap();
        assert_eq!(url, "https://backend.example.com");
    }

    #[test]
    fn test_validate_http_url_rejects_other_schemes() {
        assert!(validate_http_url("X", "ftp://backend.example.com").is_err());
        assert!(validate_http_url("X", "not a url").is_err());
        assert!(validate_http_url("X", "  ").is_err());
    }

    #[test]
    fn test_for_backend_defaults() {
        let config = Config::for_backend("http://localhost:4000");
        assert_eq!(config.backend_timeout(), Duration::from_millis(1_800_000));
        assert_eq!(config.phone_lookup_batch_size, 100);
        assert_eq!(config.wizard_ttl(), chrono::Duration::minutes(30));
    }
}
