use serde::Deserialize;

/// Top-level broker configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub server: ServerConfig,
    pub topic: TopicDefaults,
    pub sweep: SweepConfig,
}

/// Server configuration (HTTP listen address, worker pull timeout).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// How long a pull request may wait for a message before answering empty.
    pub pull_timeout_ms: u64,
}

/// Defaults applied to every topic created on first use.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicDefaults {
    pub pending_timeout_ms: u64,
    /// Ready-queue capacity per topic. Pushes beyond it stay durable but are
    /// only queued again by startup replay.
    pub ready_capacity: usize,
    pub dispatch_channel_capacity: usize,
}

/// Recovery sweep configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7700".to_string(),
            pull_timeout_ms: 30_000,
        }
    }
}

impl Default for TopicDefaults {
    fn default() -> Self {
        Self {
            pending_timeout_ms: crate::topic_config::TopicConfig::DEFAULT_PENDING_TIMEOUT_MS,
            ready_capacity: 1_000_000,
            dispatch_channel_capacity: 1024,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}
