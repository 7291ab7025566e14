//! Presence announcement and the readiness barrier.
//!
//! Trial timings must not include peer discovery, so load is only injected
//! once every active agent sees the whole active set.

use futures_util::future::try_join_all;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::ChatClient;
use crate::config::ReadinessConfig;
use crate::error::{BenchError, Result};
use crate::platform::{Agent, Platform};
use crate::select::ActiveSet;

/// Have every active agent announce itself as a chatter, concurrently.
pub async fn announce_presence<P: Platform + ?Sized>(platform: &P, active: &ActiveSet) -> Result<()> {
    try_join_all(active.agents().iter().map(|agent| async move {
        ChatClient::new(platform, agent).refresh_chatter().await
    }))
    .await?;
    debug!(agents = active.len(), "presence announced");
    Ok(())
}

/// Waits until every active agent sees the expected number of chatters.
#[derive(Debug, Clone)]
pub struct ReadinessBarrier {
    expected: usize,
    interval: Duration,
    max_wait: Option<Duration>,
}

impl ReadinessBarrier {
    /// Barrier expecting `expected` chatters, polling every `interval`, unbounded.
    pub fn new(expected: usize, interval: Duration) -> Self {
        Self {
            expected,
            interval,
            max_wait: None,
        }
    }

    /// Barrier using configured timing.
    pub fn from_config(expected: usize, config: &ReadinessConfig) -> Self {
        Self::new(expected, config.interval()).with_max_wait(config.max_wait())
    }

    /// Bound the wait per agent. `None` waits forever.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Check agents one at a time, in selection order.
    ///
    /// Query errors are fatal.
    pub async fn wait<P: Platform + ?Sized>(&self, platform: &P, active: &ActiveSet) -> Result<()> {
        let started = Instant::now();
        for agent in active.agents() {
            self.wait_for(platform, agent).await?;
        }
        info!(
            agents = active.len(),
            waited_ms = started.elapsed().as_millis() as u64,
            "readiness barrier passed"
        );
        Ok(())
    }

    async fn wait_for<P: Platform + ?Sized>(&self, platform: &P, agent: &Agent) -> Result<()> {
        let client = ChatClient::new(platform, agent);
        let started = Instant::now();
        loop {
            let stats = client.agent_stats().await?;
            if stats.agents == self.expected {
                debug!(agent = %agent.key, "agent sees every active chatter");
                return Ok(());
            }

            let waited = started.elapsed();
            if let Some(max_wait) = self.max_wait {
                if waited >= max_wait {
                    return Err(BenchError::ReadinessTimeout {
                        agent: agent.key.clone(),
                        observed: stats.agents,
                        expected: self.expected,
                        waited,
                    });
                }
            }

            debug!(
                agent = %agent.key,
                observed = stats.agents,
                expected = self.expected,
                "waiting for peer discovery"
            );
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppSource, NetworkConfig};
    use crate::platform::{MockPlatform, MockSettings, NodeSpec};
    use crate::provision::AgentProvisioner;
    use load_types::Operation;

    async fn active_set(platform: &MockPlatform, count: usize) -> ActiveSet {
        let spec = NodeSpec {
            count,
            network: NetworkConfig::default(),
        };
        let nodes = platform.create_nodes(&spec, None).await.unwrap();
        let app = AppSource::Path("chat.dna.gz".into());
        let groups = AgentProvisioner::new(&app, 1)
            .provision(platform, &nodes)
            .await
            .unwrap();
        ActiveSet::select(&groups, count)
    }

    fn slow_discovery() -> MockPlatform {
        MockPlatform::with_settings(MockSettings {
            discovery_delay: Duration::from_secs(5),
            ..MockSettings::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn passes_once_discovery_completes() {
        let platform = slow_discovery();
        let active = active_set(&platform, 3).await;
        announce_presence(&platform, &active).await.unwrap();
        assert_eq!(platform.chatter_count(), 3);

        let started = Instant::now();
        ReadinessBarrier::new(3, Duration::from_secs(2))
            .wait(&platform, &active)
            .await
            .unwrap();
        // The first agent polls at 0, 2 and 4 s before the 5 s discovery delay passes.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(6) && waited < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_times_out() {
        let platform = slow_discovery();
        let active = active_set(&platform, 2).await;
        announce_presence(&platform, &active).await.unwrap();

        let err = ReadinessBarrier::new(2, Duration::from_secs(1))
            .with_max_wait(Some(Duration::from_secs(3)))
            .wait(&platform, &active)
            .await
            .unwrap_err();
        match err {
            BenchError::ReadinessTimeout {
                agent,
                observed,
                expected,
                waited,
            } => {
                assert_eq!(agent, active.agents()[0].key);
                assert_eq!(observed, 1);
                assert_eq!(expected, 2);
                assert!(waited >= Duration::from_secs(3));
            }
            other => panic!("expected readiness timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn query_error_is_fatal() {
        let platform = MockPlatform::new();
        let active = active_set(&platform, 2).await;
        platform.fail_next_calls(Operation::AgentStats, 1);

        let result = ReadinessBarrier::new(2, Duration::from_millis(10))
            .wait(&platform, &active)
            .await;
        assert!(matches!(result, Err(BenchError::Platform(_))));
    }

    #[tokio::test]
    async fn announce_failure_is_fatal() {
        let platform = MockPlatform::new();
        let active = active_set(&platform, 2).await;
        platform.fail_next_calls(Operation::RefreshChatter, 1);

        assert!(announce_presence(&platform, &active).await.is_err());
    }
}
