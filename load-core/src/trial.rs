//! Trial sequencing.
//!
//! ```text
//! acquire pool → provision → (local) share peers → create channel
//!   → select active set → announce → readiness barrier
//!   → detect (gossip | signal) → teardown
//! ```
//!
//! Teardown runs whenever the pool was acquired, whatever happened after.

use load_types::chat::CreateChannelInput;
use std::time::Duration;
use tracing::{info, warn};

use crate::barrier::{announce_presence, ReadinessBarrier};
use crate::client::ChatClient;
use crate::config::{BenchConfig, TrialKind};
use crate::convergence::{ConvergenceDetector, GossipPoller, Outcome, SignalCollector, TrialContext};
use crate::error::{BenchError, Result};
use crate::platform::Platform;
use crate::pool::WorkerPool;
use crate::provision::AgentProvisioner;
use crate::select::ActiveSet;

/// One trial's measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    /// Propagation mode measured.
    pub kind: TrialKind,
    /// Messages injected.
    pub messages: usize,
    /// Agents that generated load.
    pub active_agents: usize,
    /// Latency or delivery diagnostics.
    pub outcome: Outcome,
}

impl TrialResult {
    /// Convergence latency, if the trial converged.
    pub fn elapsed(&self) -> Option<Duration> {
        self.outcome.elapsed()
    }
}

/// Runs trials against a platform.
pub struct TrialRunner<'a, P: Platform + ?Sized> {
    platform: &'a P,
    config: &'a BenchConfig,
}

impl<'a, P: Platform + ?Sized> TrialRunner<'a, P> {
    /// Runner using `config` for every phase.
    pub fn new(platform: &'a P, config: &'a BenchConfig) -> Self {
        Self { platform, config }
    }

    /// Run one trial of `kind`.
    ///
    /// Fatal conditions come back as errors; a missed deadline is an
    /// [`Outcome::NotConverged`].
    pub async fn run(&self, kind: TrialKind) -> Result<TrialResult> {
        self.config.validate()?;
        if kind == TrialKind::Signal && self.config.trial.active_agents < 2 {
            return Err(BenchError::NoAgents(
                "signal trials need at least 2 active agents".into(),
            ));
        }

        info!(%kind, messages = self.config.trial.messages, "starting trial");
        let pool = WorkerPool::acquire(self.platform, &self.config.pool, &self.config.network).await?;

        let result = self.measure(&pool, kind).await;

        let failed = pool.teardown(self.platform).await;
        if failed > 0 {
            warn!(failed, "some nodes did not shut down cleanly");
        }

        match &result {
            Ok(trial) => match trial.elapsed() {
                Some(elapsed) => info!(%kind, ?elapsed, "trial converged"),
                None => info!(%kind, "trial did not converge"),
            },
            Err(e) => warn!(%kind, "trial failed: {}", e),
        }
        result
    }

    async fn measure(&self, pool: &WorkerPool, kind: TrialKind) -> Result<TrialResult> {
        let platform = self.platform;
        let trial = &self.config.trial;

        let groups = AgentProvisioner::new(&self.config.app.source, self.config.pool.instances)
            .provision(platform, pool.nodes())
            .await?;

        if self.config.network.is_local() {
            platform.share_peer_info(pool.nodes()).await?;
        }

        let creator = groups
            .iter()
            .find_map(|group| group.agents.first())
            .ok_or_else(|| BenchError::NoAgents("provisioning yielded no agents".into()))?;
        let channel = ChatClient::new(platform, creator)
            .create_channel(&CreateChannelInput::for_trial())
            .await?;

        let active = ActiveSet::select(&groups, trial.active_agents);
        if active.is_empty() {
            return Err(BenchError::NoAgents("active set is empty".into()));
        }

        announce_presence(platform, &active).await?;
        ReadinessBarrier::from_config(active.len(), &self.config.readiness)
            .wait(platform, &active)
            .await?;

        let ctx = TrialContext {
            nodes: pool.nodes(),
            groups: &groups,
            active: &active,
            channel: &channel,
            messages: trial.messages,
        };
        let outcome = match kind {
            TrialKind::Gossip => GossipPoller::from_config(trial).detect(platform, &ctx).await?,
            TrialKind::Signal => SignalCollector::from_config(trial).detect(platform, &ctx).await?,
        };

        Ok(TrialResult {
            kind,
            messages: trial.messages,
            active_agents: active.len(),
            outcome,
        })
    }
}
