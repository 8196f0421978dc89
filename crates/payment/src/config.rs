//! Orchestrator timeouts.

use std::time::Duration;

/// Timeouts applied by the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// How long `finalize` waits for the gateway approval before asking the
    /// gateway for the order status instead. The approve call itself is not
    /// cancelled.
    pub approve_timeout: Duration,
    /// Upper bound for each post-approval step.
    pub step_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            approve_timeout: Duration::from_secs(10),
            step_timeout: Duration::from_secs(5),
        }
    }
}
