use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::core::store::StoreConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub read_connections: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreSettings {
    pub persist_after_secs: u64,
    pub evict_after_secs: u64,
    pub cleanup_period_secs: u64,
    pub write_queue_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            persist_after_secs: 30,
            evict_after_secs: 60,
            cleanup_period_secs: 5,
            write_queue_capacity: 1024,
        }
    }
}

impl StoreSettings {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            persist_after: Duration::from_secs(self.persist_after_secs),
            evict_after: Duration::from_secs(self.evict_after_secs),
            cleanup_period: Duration::from_secs(self.cleanup_period_secs.max(1)),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpstreamConfig {
    pub endpoint: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: miui_search_sdk::DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("database.path", "./miui.db")?
            .set_default("database.read_connections", 4)?
            .set_default("store.persist_after_secs", 30)?
            .set_default("store.evict_after_secs", 60)?
            .set_default("store.cleanup_period_secs", 5)?
            .set_default("store.write_queue_capacity", 1024)?
            .set_default("upstream.endpoint", miui_search_sdk::DEFAULT_ENDPOINT)?
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("MIUI_PROXY").separator("__"))
            // plain variables understood by existing deployments
            .set_override_option("server.port", non_empty_env("PORT"))?
            .set_override_option("database.path", non_empty_env("DB_PATH"))?
            .build()?;

        s.try_deserialize()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_settings_convert() {
        let config = StoreSettings::default().store_config();
        assert_eq!(config.persist_after, Duration::from_secs(30));
        assert_eq!(config.evict_after, Duration::from_secs(60));
        assert_eq!(config.cleanup_period, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_period_is_clamped() {
        let settings = StoreSettings {
            cleanup_period_secs: 0,
            ..StoreSettings::default()
        };
        assert_eq!(settings.store_config().cleanup_period, Duration::from_secs(1));
    }

    #[test]
    fn test_defaults_deserialize() {
        let settings: Settings = Config::builder()
            .set_default("server.host", "127.0.0.1")
            .unwrap()
            .set_default("server.port", 9000)
            .unwrap()
            .set_default("database.path", "test.db")
            .unwrap()
            .set_default("database.read_connections", 2)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.store.write_queue_capacity, 1024);
        assert_eq!(settings.upstream.endpoint, miui_search_sdk::DEFAULT_ENDPOINT);
    }
}
