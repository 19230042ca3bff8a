use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub rate_limit: RateLimitConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin (the calendar UI).
    pub frontend_url: String,
    /// Mount `POST /seed`, which inserts sample entries. Development only.
    pub seed_endpoint_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for `/entries`
    pub entries_per_second: u32,
    /// Burst size for `/entries`
    pub entries_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// Longest accepted read window in days; 0 disables the check.
    pub max_window_days: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "4000".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                seed_endpoint_enabled: match env::var("SEED_ENDPOINT_ENABLED") {
                    Ok(v) => parse_flag(&v)
                        .ok_or_else(|| ConfigError::InvalidValue("SEED_ENDPOINT_ENABLED".to_string()))?,
                    Err(_) => false,
                },
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/calendar.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            rate_limit: RateLimitConfig {
                entries_per_second: env::var("RATE_LIMIT_ENTRIES_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                entries_burst: env::var("RATE_LIMIT_ENTRIES_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
            query: QueryConfig {
                max_window_days: env::var("QUERY_MAX_WINDOW_DAYS")
                    .unwrap_or_else(|_| "3660".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("QUERY_MAX_WINDOW_DAYS".to_string()))?,
            },
        })
    }
}

/// Accepted values: "true"/"false", "1"/"0", "yes"/"no".
fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 4000,
                frontend_url: "http://localhost:3000".to_string(),
                seed_endpoint_enabled: false,
            },
            database: DatabaseConfig {
                url: "sqlite://data/calendar.db".to_string(),
                max_connections: 5,
            },
            rate_limit: RateLimitConfig {
                entries_per_second: 10,
                entries_burst: 50,
            },
            query: QueryConfig {
                max_window_days: 3660,
            },
        }
    }
}
