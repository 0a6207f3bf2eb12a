//! Client configuration.

use std::time::Duration;

use accufetch_core::config::parse_flag;
use accufetch_core::EngineConfig;

/// Default batch endpoint
pub const DEFAULT_URL: &str = "http://localhost:8000/api/accumulated";

/// Configuration for an HTTP-backed engine
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Batch endpoint URL
    pub url: String,

    /// Per-batch HTTP timeout
    pub timeout: Duration,

    /// Engine settings
    pub engine: EngineConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            timeout: Duration::from_secs(30),
            engine: EngineConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a config for the given endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self { engine: EngineConfig::from_env(), ..Self::default() };

        if let Ok(val) = std::env::var("ACCUFETCH_URL") {
            config.url = val;
        }

        if let Ok(val) = std::env::var("ACCUFETCH_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.timeout = Duration::from_secs(n);
            }
        }

        if let Ok(val) = std::env::var("ACCUFETCH_START_PAUSED") {
            config.engine.start_interrupted = parse_flag(&val);
        }

        config
    }

    /// Base URL (scheme and authority) of the batch endpoint, used to build
    /// sibling endpoint URLs.
    pub fn base_url(&self) -> &str {
        let after_scheme = self.url.find("://").map(|i| i + 3).unwrap_or(0);
        match self.url[after_scheme..].find('/') {
            Some(i) => &self.url[..after_scheme + i],
            None => &self.url,
        }
    }
}
