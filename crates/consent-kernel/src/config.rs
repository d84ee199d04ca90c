//! Engine configuration.

use std::time::Duration;

use consent_kernel_core::DocumentPolicy;

/// Configuration for the [`ConsentKernel`](crate::ConsentKernel).
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Limits applied to documents on Grant and on registration.
    pub document_policy: DocumentPolicy,
    /// Reject grants naming documents that are not in the registry.
    pub require_registered_documents: bool,
    /// How far an identity proof's `issued_at` may sit from `now`, either
    /// way. Nonces are remembered for this long.
    pub proof_window: Duration,
    /// Expiry sweeper configuration.
    pub sweeper: SweeperConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            document_policy: DocumentPolicy::default(),
            require_registered_documents: false,
            proof_window: Duration::from_secs(5 * 60),
            sweeper: SweeperConfig::default(),
        }
    }
}

/// Configuration for the [`ExpirySweeper`](crate::ExpirySweeper).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Upper bound on requests expired per sweep. `None` means all due.
    pub batch_limit: Option<usize>,
}

impl KernelConfig {
    pub(crate) fn proof_window_ms(&self) -> i64 {
        i64::try_from(self.proof_window.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_limit: None,
        }
    }
}
