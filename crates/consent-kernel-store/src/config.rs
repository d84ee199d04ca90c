//! Store configuration.

use std::time::Duration;

/// Tuning for [`SqliteStore`](crate::SqliteStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Compare-and-swap attempts after the first before giving up with
    /// [`StoreError::Conflict`](crate::StoreError::Conflict).
    pub max_cas_retries: u32,
    /// How long SQLite waits on a lock held by another connection.
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_cas_retries: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}
