use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use roster_core::PipelineConfig;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub connector: FileConnectorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileConnectorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roster_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_id: Option<String>,
}

/// Values picked up from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub sync_batch_size: Option<usize>,
    pub roster_dir: Option<PathBuf>,
    pub consumer_id: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the overlay from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        Self {
            config_path: non_blank("ROSTER_CONFIG").map(PathBuf::from),
            server_host: non_blank("SERVER_HOST"),
            server_port: non_blank("SERVER_PORT").and_then(|s| s.parse().ok()),
            database_url: non_blank("DATABASE_URL"),
            redis_url: non_blank("REDIS_URL"),
            sync_batch_size: non_blank("SYNC_BATCH_SIZE")
                .and_then(|s| s.parse().ok()),
            roster_dir: non_blank("ROSTER_DATA_DIR").map(PathBuf::from),
            consumer_id: non_blank("ROSTER_CONSUMER_ID"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn blank_and_unparsable_values_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SERVER_PORT", "not-a-port"),
            ("DATABASE_URL", "   "),
            ("SYNC_BATCH_SIZE", "25"),
            ("REDIS_URL", "redis://cache:6379"),
        ]);
        let env = EnvConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(env.server_port, None);
        assert_eq!(env.database_url, None);
        assert_eq!(env.sync_batch_size, Some(25));
        assert_eq!(env.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn pipeline_section_is_optional_in_files() {
        let file: FileConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [pipeline.batch]
            batch_size = 20
            "#,
        )
        .unwrap();

        assert_eq!(file.server.port, Some(8080));
        assert_eq!(file.pipeline.batch.batch_size, 20);
        assert_eq!(file.pipeline.retry.max_attempts, 3);
        assert!(file.redis.is_none());
    }
}
