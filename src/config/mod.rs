/// Configuration management for the Conflux engine
///
/// Handles server configuration, storage location, and engine parameters.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage configuration
    pub database: DatabaseConfig,
    /// Engine tuning and bootstrap values
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Storage configuration for the entity store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the SQLite database file (default: "data")
    pub data_dir: String,
}

/// Engine bootstrap and housekeeping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// API key seeded as the admin user on startup, if set
    pub admin_api_key: Option<String>,
    /// Executions older than this many days are removed by the cleanup sweep
    pub cleanup_days: i64,
    /// Base name for worker app images ("<base>:<app>_<version>")
    pub base_image_name: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("CONFLUX_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("CONFLUX_PORT")
                    .unwrap_or_else(|_| "3007".to_string())
                    .parse()
                    .unwrap_or(3007),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("CONFLUX_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            },
            engine: EngineConfig {
                admin_api_key: std::env::var("CONFLUX_ADMIN_APIKEY").ok(),
                cleanup_days: std::env::var("CONFLUX_CLEANUP_DAYS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
                base_image_name: std::env::var("CONFLUX_BASE_IMAGE")
                    .unwrap_or_else(|_| "conflux".to_string()),
            },
        }
    }
}
