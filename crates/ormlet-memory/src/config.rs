//! Memory store configuration.

/// Memory store configuration.
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Maximum number of connections open at once
    pub max_connections: usize,
    /// Reject writes whose foreign keys point at missing rows
    pub enforce_foreign_keys: bool,
    /// Rows scanned between checks of the abort signal
    pub abort_check_interval: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            enforce_foreign_keys: true,
            abort_check_interval: 64,
        }
    }
}

impl MemoryStoreConfig {
    /// Create a configuration with the given connection limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Default::default()
        }
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    /// Enable or disable foreign key checks on writes.
    pub fn enforce_foreign_keys(mut self, enabled: bool) -> Self {
        self.enforce_foreign_keys = enabled;
        self
    }

    /// Set how many rows a scan reads between abort checks (minimum 1).
    pub fn abort_check_interval(mut self, rows: usize) -> Self {
        self.abort_check_interval = rows.max(1);
        self
    }
}
