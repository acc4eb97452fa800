use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Which persistence gateway the service runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local store, lost on restart. Intended for local runs only.
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
    pub connect_timeout_secs: u64,
}

/// Read-receipt retry tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadReceiptConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for ReadReceiptConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database: Option<DatabaseConfig>,
    pub port: u16,
    pub read_receipts: ReadReceiptConfig,
    pub pending_notifications_per_user: usize,
}

impl Config {
    fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
        match env::var(key) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
            Err(_) => Ok(default),
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let store_backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(AppError::Config(format!(
                    "STORE_BACKEND must be postgres or memory, got {other:?}"
                )))
            }
        };

        let database = match store_backend {
            StoreBackend::Postgres => {
                let url = env::var("DATABASE_URL")
                    .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
                Some(DatabaseConfig {
                    url,
                    max_connections: Self::parse_or("DB_MAX_CONNECTIONS", 20)?,
                    connect_timeout_secs: Self::parse_or("DB_CONNECT_TIMEOUT_SECS", 5)?,
                })
            }
            StoreBackend::Memory => None,
        };

        let port = Self::parse_or("PORT", 8080)?;

        let read_receipts = ReadReceiptConfig {
            max_retries: Self::parse_or("READ_RECEIPT_MAX_RETRIES", 3)?,
            base_delay: Duration::from_millis(Self::parse_or("READ_RECEIPT_BASE_DELAY_MS", 50)?),
        };

        let pending_notifications_per_user = Self::parse_or("PENDING_NOTIFICATIONS_PER_USER", 500)?;
        if pending_notifications_per_user == 0 {
            return Err(AppError::Config(
                "PENDING_NOTIFICATIONS_PER_USER must be at least 1".into(),
            ));
        }

        Ok(Self {
            store_backend,
            database,
            port,
            read_receipts,
            pending_notifications_per_user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "STORE_BACKEND",
        "DATABASE_URL",
        "PORT",
        "DB_MAX_CONNECTIONS",
        "DB_CONNECT_TIMEOUT_SECS",
        "READ_RECEIPT_MAX_RETRIES",
        "READ_RECEIPT_BASE_DELAY_MS",
        "PENDING_NOTIFICATIONS_PER_USER",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_with_database_url() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/marketplace");

        let config = Config::from_env().unwrap();
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.port, 8080);
        assert_eq!(config.read_receipts, ReadReceiptConfig::default());
        assert_eq!(config.pending_notifications_per_user, 500);

        let db = config.database.unwrap();
        assert_eq!(db.url, "postgres://localhost/marketplace");
        assert_eq!(db.max_connections, 20);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_database_url_fails() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("DATABASE_URL")));
    }

    #[test]
    #[serial]
    fn test_memory_backend_needs_no_database() {
        clear_env();
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("READ_RECEIPT_MAX_RETRIES", "5");
        env::set_var("READ_RECEIPT_BASE_DELAY_MS", "20");

        let config = Config::from_env().unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert!(config.database.is_none());
        assert_eq!(config.read_receipts.max_retries, 5);
        assert_eq!(config.read_receipts.base_delay, Duration::from_millis(20));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_rejected() {
        clear_env();
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("PORT", "not-a-port");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, AppError::Config(msg) if msg.contains("PORT")));

        clear_env();
    }
}
