use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::Error;

fn default_base_url() -> String {
    "https://intel.ingress.com".to_string()
}

fn default_max_workers() -> usize {
    10
}

fn default_chunk_size() -> usize {
    5
}

fn default_max_rounds() -> u32 {
    10
}

fn default_request_retries() -> u32 {
    5
}

fn default_detail_retries() -> u32 {
    5
}

fn default_backoff_min_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    2000
}

fn default_detail_backoff_min_ms() -> u64 {
    2000
}

fn default_detail_backoff_max_ms() -> u64 {
    4000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub cookies: Option<String>,
    /// Routing through a proxy limits the client to one request at a time.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
    #[serde(default = "default_detail_retries")]
    pub detail_retries: u32,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_detail_backoff_min_ms")]
    pub detail_backoff_min_ms: u64,
    #[serde(default = "default_detail_backoff_max_ms")]
    pub detail_backoff_max_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub require_complete: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cookies: None,
            proxy: None,
            max_workers: default_max_workers(),
            chunk_size: default_chunk_size(),
            max_rounds: default_max_rounds(),
            request_retries: default_request_retries(),
            detail_retries: default_detail_retries(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            detail_backoff_min_ms: default_detail_backoff_min_ms(),
            detail_backoff_max_ms: default_detail_backoff_max_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            require_complete: false,
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    pub fn effective_workers(&self) -> usize {
        if self.proxy.is_some() {
            1
        } else {
            self.max_workers
        }
    }

    pub fn backoff_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.backoff_min_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn detail_backoff_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.detail_backoff_min_ms),
            Duration::from_millis(self.detail_backoff_max_ms),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let checks = [
            (self.max_workers == 0, "max_workers must be at least 1"),
            (self.chunk_size == 0, "chunk_size must be at least 1"),
            (self.max_rounds == 0, "max_rounds must be at least 1"),
            (self.request_retries == 0, "request_retries must be at least 1"),
            (self.detail_retries == 0, "detail_retries must be at least 1"),
            (
                self.backoff_min_ms > self.backoff_max_ms,
                "backoff_min_ms exceeds backoff_max_ms",
            ),
            (
                self.detail_backoff_min_ms > self.detail_backoff_max_ms,
                "detail_backoff_min_ms exceeds detail_backoff_max_ms",
            ),
            (
                self.read_timeout_secs < self.connect_timeout_secs,
                "read_timeout_secs is shorter than connect_timeout_secs",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(Error::Config((*reason).to_string())),
            None => Ok(()),
        }
    }
}

pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<ClientConfig> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ClientConfig = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Rejected config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, file: impl AsRef<Path>, config: &ClientConfig) -> Result<()> {
        let path = self.base_dir.join(file);
        let yaml = serde_yaml::to_string(config)?;
        fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_backend_limits() {
        let config = ClientConfig::default();
        assert_eq!(config.chunk_size, 5);
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.effective_workers(), 10);
        assert!(config.read_timeout() > config.connect_timeout());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_proxy_forces_single_worker() {
        let config = ClientConfig {
            proxy: Some("socks5://127.0.0.1:1080".into()),
            ..ClientConfig::default()
        };
        assert_eq!(config.effective_workers(), 1);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("client.yaml"), "max_rounds: 3\nrequire_complete: true\n").unwrap();
        let config = ConfigLoader::new(dir.path()).load("client.yaml").unwrap();
        assert_eq!(config.max_rounds, 3);
        assert!(config.require_complete);
        assert_eq!(config.base_url, "https://intel.ingress.com");
        assert_eq!(config.backoff_range().1, Duration::from_millis(2000));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        let config = ClientConfig {
            cookies: Some("sessionid=abc; csrftoken=xyz".into()),
            ..ClientConfig::default()
        };
        loader.save("saved.yaml", &config).unwrap();
        assert_eq!(loader.load("saved.yaml").unwrap(), config);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = ClientConfig {
            chunk_size: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.yaml"), "backoff_min_ms: 9000\n").unwrap();
        assert!(ConfigLoader::new(dir.path()).load("bad.yaml").is_err());
    }
}
