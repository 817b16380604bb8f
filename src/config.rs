//! Replica configuration.

use std::time::Duration;

/// Static configuration for a batching replica.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Total number of replicas in the group.
    ///
    /// Default: 3
    pub replicas: usize,
    /// Inactivity window after which a batch attempt is forced even if the
    /// command volume threshold was not hit.
    ///
    /// Default: 1s
    pub batch_timeout: Duration,
    /// Number of logged commands after which a batch attempt is forced.
    /// Must be at least 1.
    ///
    /// Default: 100
    pub max_batch_commands: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            batch_timeout: Duration::from_millis(1000),
            max_batch_commands: 100,
        }
    }
}

impl BatchConfig {
    /// Majority quorum size for this group.
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.replicas / 2 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_is_majority() {
        let mut config = BatchConfig::default();
        assert_eq!(config.quorum(), 2);

        config.replicas = 5;
        assert_eq!(config.quorum(), 3);

        config.replicas = 4;
        assert_eq!(config.quorum(), 3);
    }
}
