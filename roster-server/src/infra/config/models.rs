use std::path::PathBuf;

use roster_core::PipelineConfig;

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub connector: ConnectorConfig,
    pub pipeline: PipelineConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Without a URL the run store stays in memory.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Where the file-backed connector reads tenant rosters from, and the
/// consumer identity it reports.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub roster_dir: PathBuf,
    pub consumer_id: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            roster_dir: PathBuf::from("./rosters"),
            consumer_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
