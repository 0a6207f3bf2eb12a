//! Configuration for the batching engine.

/// Configuration for an [`AccumulatedFetching`](crate::AccumulatedFetching) engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name used in log fields to tell engines apart
    pub name: String,

    /// Start with the interrupt flag set: requests accumulate but nothing
    /// is dispatched until `set_interrupted(false)`
    pub start_interrupted: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { name: "accufetch".to_string(), start_interrupted: false }
    }
}

impl EngineConfig {
    /// Create a config with the given engine name
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Create a config that starts paused
    pub fn paused() -> Self {
        Self { start_interrupted: true, ..Self::default() }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ACCUFETCH_ENGINE_NAME") {
            if !val.trim().is_empty() {
                config.name = val;
            }
        }

        if let Ok(val) = std::env::var("ACCUFETCH_START_PAUSED") {
            config.start_interrupted = parse_flag(&val);
        }

        config
    }
}

/// Parse a boolean-ish environment value ("1", "true", "yes", "on")
pub fn parse_flag(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
