//! Error types for chatload trials.

use load_types::AgentKey;
use std::time::Duration;

use crate::platform::{NodeId, PlatformError};

/// Main error type for trial operations.
///
/// Every variant here aborts the trial. Conditions the trial recovers
/// from (failed polls, failed sends, missed deadlines) are logged or
/// reported in the trial outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Platform call failed where no recovery is possible.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Worker endpoints exhausted before the pool reached its target size.
    #[error("insufficient capacity: ran out of worker endpoints after acquiring {acquired} of {required} nodes")]
    Capacity {
        /// Machines acquired before the list ran out.
        acquired: usize,
        /// Machines the trial needs.
        required: usize,
    },

    /// App installation failed or produced unusable agents.
    #[error("provisioning failed on node {node}: {reason}")]
    Provision {
        /// Node the install ran on.
        node: NodeId,
        /// What went wrong.
        reason: String,
    },

    /// An active agent never saw the full participant set.
    #[error("agent {agent} sees {observed} of {expected} active agents after {waited:?}")]
    ReadinessTimeout {
        /// Agent that did not converge.
        agent: AgentKey,
        /// Last reported active count.
        observed: usize,
        /// Configured active count.
        expected: usize,
        /// Time spent waiting on this agent.
        waited: Duration,
    },

    /// Nothing to run the trial with.
    #[error("no agents available: {0}")]
    NoAgents(String),
}

/// Result type alias for trial operations.
pub type Result<T> = std::result::Result<T, BenchError>;
