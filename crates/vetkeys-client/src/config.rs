//! Client configuration.

use std::time::Duration;

use serde::Deserialize;
use vetkeys_core::DerivationContexts;

/// Tunables of the key-state machine and the send path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on waiting for one key resolution
    pub resolution_timeout: Duration,

    /// Maximum number of resubmissions after a stale-epoch rejection
    pub send_retry_limit: u32,

    /// Pause between resubmissions
    pub send_retry_backoff: Duration,

    /// Recovery window for channels without an explicit one
    pub default_recovery_window: Duration,

    /// Derivation context prefixes shared with the issuance service
    pub contexts: DerivationContexts,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resolution_timeout: Duration::from_secs(30),
            send_retry_limit: 100,
            send_retry_backoff: Duration::from_millis(100),
            default_recovery_window: Duration::from_secs(7 * 24 * 60 * 60),
            contexts: DerivationContexts::default(),
        }
    }
}
