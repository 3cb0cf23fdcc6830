use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Which `ChatStore` implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local store, contents lost on restart
    Memory,
}

impl StoreBackend {
    fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(AppError::Config(format!(
                "STORE_BACKEND must be 'postgres' or 'memory', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// How often the server pings each connection
    pub heartbeat_interval: Duration,
    /// Connections silent for longer than this are dropped
    pub client_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LoadMonitorConfig {
    pub check_interval: Duration,
    /// Active socket count above which a warning is logged
    pub high_load_socket_threshold: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: usize,
    pub port: u16,
    pub websocket: WebSocketConfig,
    pub load_monitor: LoadMonitorConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let store_backend = match env::var("STORE_BACKEND") {
            Ok(value) => StoreBackend::parse(&value)?,
            Err(_) => StoreBackend::Postgres,
        };

        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config("DATABASE_URL missing".into()));
        }

        let heartbeat_interval = Duration::from_secs(env_or("WS_HEARTBEAT_INTERVAL_SECS", 5));
        let client_timeout = Duration::from_secs(env_or("WS_CLIENT_TIMEOUT_SECS", 30));
        if client_timeout <= heartbeat_interval {
            return Err(AppError::Config(
                "WS_CLIENT_TIMEOUT_SECS must exceed WS_HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }

        Ok(Self {
            store_backend,
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 16),
            port: env_or("PORT", 3000),
            websocket: WebSocketConfig {
                heartbeat_interval,
                client_timeout,
            },
            load_monitor: LoadMonitorConfig {
                check_interval: Duration::from_secs(env_or("LOAD_CHECK_INTERVAL_SECS", 60)),
                high_load_socket_threshold: env_or("HIGH_LOAD_SOCKET_THRESHOLD", 500),
            },
        })
    }

    /// In-memory configuration for tests and local experiments
    pub fn test_defaults() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: None,
            db_max_connections: 4,
            port: 0,
            websocket: WebSocketConfig {
                heartbeat_interval: Duration::from_secs(5),
                client_timeout: Duration::from_secs(30),
            },
            load_monitor: LoadMonitorConfig {
                check_interval: Duration::from_secs(60),
                high_load_socket_threshold: 500,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parse() {
        assert_eq!(
            StoreBackend::parse("postgres").unwrap(),
            StoreBackend::Postgres
        );
        assert_eq!(StoreBackend::parse(" Memory ").unwrap(), StoreBackend::Memory);
        assert!(matches!(
            StoreBackend::parse("mongo"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_defaults_are_consistent() {
        let cfg = Config::test_defaults();
        assert!(cfg.websocket.client_timeout > cfg.websocket.heartbeat_interval);
        assert_eq!(cfg.store_backend, StoreBackend::Memory);
    }
}
