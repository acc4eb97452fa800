use crate::config::DatabaseConfig;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::time::Duration;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{error, info};

const BASELINE_SCHEMA: &str = include_str!("../migrations/0001_marketplace_chat.sql");

#[derive(Debug, thiserror::Error)]
pub enum DbInitError {
    #[error("invalid DATABASE_URL: {0}")]
    InvalidUrl(tokio_postgres::Error),
    #[error("build pool: {0}")]
    Build(String),
    #[error("connect: {0}")]
    Connect(String),
    #[error("connection check timed out after {0}s")]
    Timeout(u64),
    #[error("apply schema: {0}")]
    Schema(tokio_postgres::Error),
}

/// Build the deadpool-postgres pool, verify connectivity and apply the baseline schema
pub async fn init_pool(cfg: &DatabaseConfig) -> Result<Pool, DbInitError> {
    info!(
        max_connections = cfg.max_connections,
        connect_timeout_secs = cfg.connect_timeout_secs,
        "Creating database pool"
    );

    let pg_config: PgConfig = cfg.url.parse().map_err(DbInitError::InvalidUrl)?;
    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(cfg.max_connections)
        .build()
        .map_err(|e| DbInitError::Build(e.to_string()))?;

    let verify = async {
        let client = pool
            .get()
            .await
            .map_err(|e| DbInitError::Connect(e.to_string()))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| DbInitError::Connect(e.to_string()))?;
        client
            .batch_execute(BASELINE_SCHEMA)
            .await
            .map_err(DbInitError::Schema)?;
        Ok::<(), DbInitError>(())
    };

    match tokio::time::timeout(Duration::from_secs(cfg.connect_timeout_secs), verify).await {
        Ok(Ok(())) => {
            info!("Database pool created and verified successfully");
            Ok(pool)
        }
        Ok(Err(e)) => {
            error!(error = %e, "Database connection verification failed");
            Err(e)
        }
        Err(_) => {
            error!(
                timeout_secs = cfg.connect_timeout_secs,
                "Database connection verification timeout"
            );
            Err(DbInitError::Timeout(cfg.connect_timeout_secs))
        }
    }
}
