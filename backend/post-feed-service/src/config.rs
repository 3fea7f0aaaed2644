/// Configuration management for Post Feed Service
///
/// Loads configuration from environment variables.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Database configuration (absent: in-memory store)
    pub database: Option<DatabaseConfig>,
    /// Feed aggregation settings
    pub feed: FeedConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port for health checks and metrics
    pub http_port: u16,
    /// Emit logs as JSON
    pub json_logs: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Feed aggregation and pagination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Levels of forward/comment/ref posts resolved before collapsing to empty
    #[serde(default = "default_max_depth")]
    pub max_depth: u8,
    /// Post id candidates tried before giving up
    #[serde(default = "default_id_attempts")]
    pub id_attempts: u32,
    /// Upper bound for a cursor page
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
    /// Per-request deadline applied by callers that do not set their own
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            id_attempts: default_id_attempts(),
            max_page_size: default_max_page_size(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_max_depth() -> u8 {
    3
}

fn default_id_attempts() -> u32 {
    10
}

fn default_max_page_size() -> i64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{}: {}", key, e)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env_parse("PORT")
                .context("Invalid PORT")?
                .unwrap_or(8016), // post-feed-service default HTTP port
            json_logs: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        let database = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(DatabaseConfig {
                url,
                max_connections: env_parse("DB_MAX_CONNECTIONS")
                    .context("Invalid DB_MAX_CONNECTIONS")?
                    .unwrap_or_else(default_max_connections),
                min_connections: env_parse("DB_MIN_CONNECTIONS")
                    .context("Invalid DB_MIN_CONNECTIONS")?
                    .unwrap_or_else(default_min_connections),
            }),
            _ => None,
        };

        let feed = FeedConfig {
            max_depth: env_parse("FEED_MAX_DEPTH")
                .context("Invalid FEED_MAX_DEPTH")?
                .unwrap_or_else(default_max_depth),
            id_attempts: env_parse("FEED_ID_ATTEMPTS")
                .context("Invalid FEED_ID_ATTEMPTS")?
                .unwrap_or_else(default_id_attempts),
            max_page_size: env_parse("FEED_MAX_PAGE_SIZE")
                .context("Invalid FEED_MAX_PAGE_SIZE")?
                .unwrap_or_else(default_max_page_size),
            request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS")
                .context("Invalid REQUEST_TIMEOUT_MS")?
                .unwrap_or_else(default_request_timeout_ms),
        };

        if feed.max_depth > crate::plan::MAX_DEPTH_LIMIT {
            anyhow::bail!(
                "FEED_MAX_DEPTH must be at most {}",
                crate::plan::MAX_DEPTH_LIMIT
            );
        }
        if feed.id_attempts == 0 {
            anyhow::bail!("FEED_ID_ATTEMPTS must be at least 1");
        }
        if feed.max_page_size <= 0 {
            anyhow::bail!("FEED_MAX_PAGE_SIZE must be positive");
        }

        Ok(Config {
            app,
            database,
            feed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "PORT",
            "LOG_FORMAT",
            "DATABASE_URL",
            "DB_MAX_CONNECTIONS",
            "DB_MIN_CONNECTIONS",
            "FEED_MAX_DEPTH",
            "FEED_ID_ATTEMPTS",
            "FEED_MAX_PAGE_SIZE",
            "REQUEST_TIMEOUT_MS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_default_values() {
        clear_env();

        let config = Config::from_env().unwrap();

        assert_eq!(config.app.env, "development");
        assert_eq!(config.app.host, "0.0.0.0");
        assert_eq!(config.app.http_port, 8016);
        assert!(config.database.is_none());
        assert_eq!(config.feed.max_depth, 3);
        assert_eq!(config.feed.id_attempts, 10);
        assert_eq!(config.feed.max_page_size, 100);
    }

    #[test]
    #[serial]
    fn test_database_section_from_env() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("DB_MAX_CONNECTIONS", "7");

        let config = Config::from_env().unwrap();
        let db = config.database.expect("database config");
        assert_eq!(db.url, "postgres://test");
        assert_eq!(db.max_connections, 7);
        assert_eq!(db.min_connections, 5);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_rejects_depth_above_limit() {
        clear_env();
        std::env::set_var("FEED_MAX_DEPTH", "9");
        assert!(Config::from_env().is_err());

        std::env::set_var("FEED_MAX_DEPTH", "8");
        assert_eq!(Config::from_env().unwrap().feed.max_depth, 8);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_rejects_zero_id_attempts() {
        clear_env();
        std::env::set_var("FEED_ID_ATTEMPTS", "0");

        assert!(Config::from_env().is_err());

        clear_env();
    }
}
