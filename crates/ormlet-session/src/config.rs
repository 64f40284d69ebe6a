//! Session configuration.

use ormlet_core::LoadingStrategy;
use serde::{Deserialize, Serialize};

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Loading strategy for records whose query did not pick one.
    pub loading: LoadingStrategy,
    /// Whether to count deferred and explicit loads per relation.
    pub n1_detection: bool,
    /// Loads of one relation before an N+1 warning is logged.
    pub n1_threshold: usize,
    /// Log every lowered plan at debug level before it is sent.
    pub trace_plans: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            loading: LoadingStrategy::Deferred,
            n1_detection: true,
            n1_threshold: 3,
            trace_plans: false,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with the given default loading strategy.
    pub fn new(loading: LoadingStrategy) -> Self {
        Self {
            loading,
            ..Default::default()
        }
    }

    /// Set the default loading strategy.
    pub fn loading(mut self, strategy: LoadingStrategy) -> Self {
        self.loading = strategy;
        self
    }

    /// Enable/disable N+1 detection.
    pub fn n1_detection(mut self, enabled: bool) -> Self {
        self.n1_detection = enabled;
        self
    }

    /// Set the N+1 warning threshold.
    pub fn n1_threshold(mut self, threshold: usize) -> Self {
        self.n1_threshold = threshold;
        self
    }

    /// Enable/disable plan tracing.
    pub fn trace_plans(mut self, enabled: bool) -> Self {
        self.trace_plans = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_setters() {
        let config = SessionConfig::default();
        assert_eq!(config.loading, LoadingStrategy::Deferred);
        assert_eq!(config.n1_threshold, 3);

        let config = SessionConfig::new(LoadingStrategy::Explicit)
            .n1_threshold(10)
            .trace_plans(true);
        assert_eq!(config.loading, LoadingStrategy::Explicit);
        assert_eq!(config.n1_threshold, 10);
        assert!(config.trace_plans);
    }

    #[test]
    fn config_deserializes_from_json() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"loading":"Eager","n1_detection":false,"n1_threshold":5,"trace_plans":false}"#,
        )
        .unwrap();
        assert_eq!(config.loading, LoadingStrategy::Eager);
        assert!(!config.n1_detection);
    }
}
