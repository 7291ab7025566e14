//! Poll-based convergence for gossip trials.
//!
//! `Injecting → Polling → Converged`. The receiving replica is the first
//! agent of the first node. Progress is logged only when the observed count
//! changes; a count that has not moved is re-queried after the poll interval.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ConvergenceDetector, DeliveryReport, Outcome, TrialContext};
use crate::client::ChatClient;
use crate::config::TrialConfig;
use crate::error::{BenchError, Result};
use crate::inject::LoadInjector;
use crate::platform::Platform;

/// Watches one replica until it holds every injected message.
#[derive(Debug, Clone)]
pub struct GossipPoller {
    interval: Duration,
    max_wait: Option<Duration>,
}

impl GossipPoller {
    /// Poll every `interval`, without a bound.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_wait: None,
        }
    }

    /// Poller using configured timing.
    pub fn from_config(config: &TrialConfig) -> Self {
        Self::new(config.poll_interval()).with_max_wait(config.max_poll_wait())
    }

    /// Give up after `max_wait` from the start of sending. `None` polls forever.
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }
}

#[async_trait]
impl ConvergenceDetector for GossipPoller {
    async fn detect<P: Platform + ?Sized>(
        &self,
        platform: &P,
        ctx: &TrialContext<'_>,
    ) -> Result<Outcome> {
        let receiver = ctx
            .groups
            .first()
            .and_then(|group| group.agents.first())
            .ok_or_else(|| BenchError::NoAgents("no receiving agent".into()))?;
        let client = ChatClient::new(platform, receiver);
        let expected = ctx.messages;

        let started = Instant::now();
        let injected = LoadInjector::without_signal(platform, ctx.channel)
            .inject(ctx.active, ctx.messages)
            .await;
        if injected.failed > 0 {
            warn!(
                failed = injected.failed,
                expected, "some messages were not created; the receiver may never converge"
            );
        }

        let mut last_count: Option<usize> = None;
        loop {
            match client.message_count(&ctx.channel.channel).await {
                Ok(count) if last_count != Some(count) => {
                    info!(count, expected, receiver = %receiver.key, "receiver message count");
                    last_count = Some(count);
                    if count >= expected {
                        if count > expected {
                            warn!(count, expected, "receiver holds more messages than were sent");
                        }
                        return Ok(Outcome::Converged {
                            elapsed: started.elapsed(),
                        });
                    }
                    continue;
                }
                Ok(_) => {}
                Err(e) => warn!("message count query failed: {}", e),
            }

            if let Some(max_wait) = self.max_wait {
                if started.elapsed() >= max_wait {
                    let received = last_count.unwrap_or(0);
                    warn!(expected, received, waited = ?started.elapsed(), "gossip did not converge");
                    return Ok(Outcome::NotConverged(DeliveryReport::new(expected, received)));
                }
            }
            debug!(interval = ?self.interval, "no progress, sleeping");
            tokio::time::sleep(self.interval).await;
        }
    }
}
