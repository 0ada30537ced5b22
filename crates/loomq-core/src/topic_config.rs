use serde::{Deserialize, Serialize};

/// Topic configuration stored in the `topics` column family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicConfig {
    pub name: String,
    /// How long a worker may hold a message before the sweep hands it to someone else.
    pub pending_timeout_ms: u64,
}

impl TopicConfig {
    /// Default redelivery deadline: 30 seconds.
    pub const DEFAULT_PENDING_TIMEOUT_MS: u64 = 30_000;

    /// Longest accepted topic name, in bytes.
    pub const MAX_NAME_LEN: usize = 255;

    pub fn new(name: String) -> Self {
        Self {
            name,
            pending_timeout_ms: Self::DEFAULT_PENDING_TIMEOUT_MS,
        }
    }

    pub fn with_pending_timeout_ms(mut self, pending_timeout_ms: u64) -> Self {
        self.pending_timeout_ms = pending_timeout_ms;
        self
    }

    /// Check that `name` can be used as a topic name.
    pub fn validate_name(name: &str) -> Result<(), String> {
        if name.is_empty() {
            return Err("topic name must not be empty".into());
        }
        if name.len() > Self::MAX_NAME_LEN {
            return Err(format!(
                "topic name must be at most {} bytes",
                Self::MAX_NAME_LEN
            ));
        }
        Ok(())
    }
}
