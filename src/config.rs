use crate::key::KeyFactory;
use crate::transport::{HttpTransport, TransportRegistry};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_PREFIX: &str = "RPC_QUERY_";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid environment configuration: {0}")]
    Env(#[from] envy::Error),
}

/// Read from `RPC_QUERY_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Comma-separated header names folded into query keys.
    #[serde(default)]
    pub cache_headers: Vec<String>,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: None,
            cache_headers: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> ConfigResult<Config> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> ConfigResult<Config>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter(vars)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn key_factory(&self, registry: Arc<TransportRegistry>) -> KeyFactory {
        let names = self
            .cache_headers
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty());
        KeyFactory::new(registry).with_cache_headers(names)
    }

    pub fn transport(&self, client: reqwest::Client) -> HttpTransport {
        HttpTransport::new(client, &self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(vars(&[("PATH", "/usr/bin")])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_prefixed_values() {
        let config = Config::from_vars(vars(&[
            ("RPC_QUERY_BASE_URL", "https://api.example.com/"),
            ("RPC_QUERY_TIMEOUT_MS", "2500"),
            ("RPC_QUERY_CACHE_HEADERS", "Authorization,x-tenant"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://api.example.com/");
        assert_eq!(config.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.cache_headers, vec!["Authorization", "x-tenant"]);
        assert_eq!(
            config.transport(reqwest::Client::new()).base_url(),
            "https://api.example.com"
        );
    }

    #[test]
    fn test_invalid_timeout() {
        let result = Config::from_vars(vars(&[("RPC_QUERY_TIMEOUT_MS", "soon")]));
        assert!(matches!(result, Err(ConfigError::Env(_))));
    }
}
