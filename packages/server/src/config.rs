//! Process configuration: environment variables plus the YAML files
//! under `CONFIG_DIR`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub redis_host: String,
    pub redis_port: u16,
    pub search_provider: SearchProvider,
    pub brave_api_key: Option<String>,
    pub retrain_schedule: String,
    pub retrain_enabled: bool,
    pub http_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProvider {
    Mock,
    Brave,
    Google,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let search_provider = match env::var("JOBATO_SEARCH_PROVIDER")
            .unwrap_or_else(|_| "mock".to_string())
            .as_str()
        {
            "mock" => SearchProvider::Mock,
            "brave" => SearchProvider::Brave,
            "google" => SearchProvider::Google,
            other => anyhow::bail!("unsupported JOBATO_SEARCH_PROVIDER: {other}"),
        };

        if search_provider == SearchProvider::Brave && env::var("BRAVE_SEARCH_API_KEY").is_err() {
            anyhow::bail!("BRAVE_SEARCH_API_KEY must be set when JOBATO_SEARCH_PROVIDER=brave");
        }

        Ok(Self {
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            config_dir: PathBuf::from(
                env::var("CONFIG_DIR").unwrap_or_else(|_| "config/ml".to_string()),
            ),
            redis_host: env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            redis_port: env::var("REDIS_PORT")
                .unwrap_or_else(|_| "6379".to_string())
                .parse()
                .context("REDIS_PORT must be a valid number")?,
            search_provider,
            brave_api_key: env::var("BRAVE_SEARCH_API_KEY").ok(),
            retrain_schedule: env::var("RETRAIN_SCHEDULE").unwrap_or_else(|_| "0 6 * * *".to_string()),
            retrain_enabled: env::var("RETRAIN_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            http_port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
        })
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

fn read_yaml<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigFileError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `ml-config.yaml`'s `evalWorkers` key, clamped to [1, 10].
#[derive(Debug, Deserialize, Default)]
pub struct MlConfig {
    #[serde(rename = "evalWorkers")]
    pub eval_workers: Option<u32>,
}

pub fn load_eval_workers(config_dir: &Path) -> Result<u32, ConfigFileError> {
    let config: MlConfig = read_yaml(&config_dir.join("ml-config.yaml"))?;
    Ok(config.eval_workers.unwrap_or(3).clamp(1, 10))
}

/// `quota.yaml`.
#[derive(Debug, Deserialize)]
pub struct QuotaConfig {
    #[serde(rename = "dailyLimit")]
    pub daily_limit: i64,
    #[serde(rename = "concurrencyLimit")]
    pub concurrency_limit: u32,
    #[serde(rename = "resetPolicy")]
    pub reset_policy: ResetPolicy,
}

#[derive(Debug, Deserialize)]
pub struct ResetPolicy {
    #[serde(rename = "timeZone")]
    pub time_zone: String,
    #[serde(rename = "resetHour")]
    pub reset_hour: u8,
}

pub fn load_quota_config(config_dir: &Path) -> Result<QuotaConfig, ConfigFileError> {
    let path = config_dir.join("quota.yaml");
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigFileError::Read {
        path: path.clone(),
        source,
    })?;
    let config: QuotaConfig =
        serde_yaml::from_str(&content).map_err(|source| ConfigFileError::Parse {
            path: path.clone(),
            source,
        })?;
    if config.daily_limit <= 0 {
        return Err(ConfigFileError::Invalid(
            "dailyLimit must be greater than zero".to_string(),
        ));
    }
    if config.concurrency_limit == 0 {
        return Err(ConfigFileError::Invalid(
            "concurrencyLimit must be greater than zero".to_string(),
        ));
    }
    if config.reset_policy.reset_hour > 23 {
        return Err(ConfigFileError::Invalid(
            "resetHour must be between 0 and 23".to_string(),
        ));
    }
    if config.reset_policy.time_zone.trim().is_empty() {
        return Err(ConfigFileError::Invalid(
            "timeZone must not be empty".to_string(),
        ));
    }
    Ok(config)
}

/// `cache.yaml`.
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(rename = "ttlHours")]
    pub ttl_hours: i64,
    #[serde(rename = "revisitThrottleDays")]
    pub revisit_throttle_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 12,
            revisit_throttle_days: 7,
        }
    }
}

pub fn load_cache_config(config_dir: &Path) -> Result<CacheConfig, ConfigFileError> {
    read_yaml(&config_dir.join("cache.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn quota_config_rejects_zero_daily_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("quota.yaml")).unwrap();
        writeln!(
            file,
            "dailyLimit: 0\nconcurrencyLimit: 1\nresetPolicy:\n  timeZone: UTC\n  resetHour: 0"
        )
        .unwrap();
        let err = load_quota_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigFileError::Invalid(_)));
    }

    #[test]
    fn cache_config_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_cache_config(dir.path()).unwrap();
        assert_eq!(config.ttl_hours, 12);
        assert_eq!(config.revisit_throttle_days, 7);
    }
}
