//! Push-based convergence for signal trials.
//!
//! `Idle → Sending → AwaitingReceipts → {Completed | TimedOut}`.
//!
//! Every node's signal handler feeds one channel. The task that drains it
//! owns the [`ReceiptTally`], so each receipt is counted and checked for
//! completion in a single step, with no shared counters and no locks.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use load_types::AgentKey;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ConvergenceDetector, DeliveryReport, Outcome, TrialContext};
use crate::config::TrialConfig;
use crate::error::Result;
use crate::inject::LoadInjector;
use crate::platform::Platform;

/// Receipts counted for the current trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptTally {
    expected: usize,
    total: usize,
    per_recipient: BTreeMap<AgentKey, usize>,
}

impl ReceiptTally {
    /// Empty tally waiting for `expected` receipts.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            total: 0,
            per_recipient: BTreeMap::new(),
        }
    }

    /// Count one receipt. Returns whether the tally is now complete.
    pub fn record(&mut self, recipient: AgentKey) -> bool {
        *self.per_recipient.entry(recipient).or_default() += 1;
        self.total += 1;
        if self.total > self.expected {
            warn!(
                total = self.total,
                expected = self.expected,
                "more receipts than expected"
            );
        }
        self.is_complete()
    }

    /// Whether every expected receipt has arrived.
    pub fn is_complete(&self) -> bool {
        self.total >= self.expected
    }

    /// Receipts counted so far.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Receipts needed.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Receipts per recipient.
    pub fn per_recipient(&self) -> &BTreeMap<AgentKey, usize> {
        &self.per_recipient
    }

    /// Delivery diagnostics for a trial that missed its deadline.
    pub fn into_report(self) -> DeliveryReport {
        DeliveryReport {
            expected: self.expected,
            received: self.total,
            per_recipient: self.per_recipient,
        }
    }
}

/// Counts signal receipts until all arrive or the deadline passes.
#[derive(Debug, Clone)]
pub struct SignalCollector {
    period: Duration,
}

impl SignalCollector {
    /// Collector whose deadline is `period` after sending starts.
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Collector using the configured period.
    pub fn from_config(config: &TrialConfig) -> Self {
        Self::new(config.period())
    }

    /// Receipts a burst must produce: every active agent but the sender gets each message.
    pub fn expected_receipts(messages: usize, active: usize) -> usize {
        messages * active.saturating_sub(1)
    }
}

#[async_trait]
impl ConvergenceDetector for SignalCollector {
    async fn detect<P: Platform + ?Sized>(
        &self,
        platform: &P,
        ctx: &TrialContext<'_>,
    ) -> Result<Outcome> {
        let expected = Self::expected_receipts(ctx.messages, ctx.active.len());

        let (sink, mut receipts) = mpsc::unbounded_channel();
        try_join_all(
            ctx.nodes
                .iter()
                .map(|node| platform.register_signal_handler(node, sink.clone())),
        )
        .await?;
        drop(sink);
        debug!(nodes = ctx.nodes.len(), expected, "signal handlers registered");

        let mut tally = ReceiptTally::new(expected);
        let started = Instant::now();
        let deadline = started + self.period;

        let collect = async {
            if tally.is_complete() {
                return Some(started.elapsed());
            }
            while let Some(event) = receipts.recv().await {
                if tally.record(event.recipient) {
                    return Some(started.elapsed());
                }
            }
            None
        };
        let injector = LoadInjector::with_signal(platform, ctx.channel);
        let (injected, collected) = tokio::join!(
            injector.inject(ctx.active, ctx.messages),
            tokio::time::timeout_at(deadline, collect),
        );
        debug!(
            created = injected.created,
            notified = injected.notified,
            failed = injected.failed,
            "signal burst sent"
        );

        match collected {
            Ok(Some(elapsed)) => {
                info!(receipts = tally.total(), ?elapsed, "all signals delivered");
                Ok(Outcome::Converged { elapsed })
            }
            Ok(None) => {
                warn!(
                    received = tally.total(),
                    expected, "signal streams closed before delivery completed"
                );
                Ok(Outcome::NotConverged(tally.into_report()))
            }
            Err(_) => {
                let report = tally.into_report();
                warn!(
                    expected = report.expected,
                    received = report.received,
                    percent = report.percent(),
                    "signal deadline elapsed after {:?}",
                    self.period
                );
                for (recipient, count) in &report.per_recipient {
                    debug!(%recipient, count, "receipts");
                }
                Ok(Outcome::NotConverged(report))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::announce_presence;
    use crate::client::ChatClient;
    use crate::config::{AppSource, NetworkConfig};
    use crate::platform::{MockPlatform, MockSettings, NodeHandle, NodeSpec};
    use crate::provision::{AgentGroup, AgentProvisioner};
    use crate::select::ActiveSet;
    use load_types::chat::{ChannelData, CreateChannelInput};

    fn key(byte: u8) -> AgentKey {
        AgentKey::from_bytes(&[byte]).unwrap()
    }

    #[test]
    fn tally_completes_on_last_receipt() {
        let mut tally = ReceiptTally::new(3);
        assert!(!tally.record(key(1)));
        assert!(!tally.record(key(2)));
        assert!(tally.record(key(1)));
        assert_eq!(tally.per_recipient()[&key(1)], 2);
        assert_eq!(tally.per_recipient()[&key(2)], 1);
    }

    #[test]
    fn empty_expectation_is_complete() {
        assert!(ReceiptTally::new(0).is_complete());
    }

    #[test]
    fn expected_excludes_sender() {
        assert_eq!(SignalCollector::expected_receipts(20, 5), 80);
        assert_eq!(SignalCollector::expected_receipts(10, 3), 20);
        assert_eq!(SignalCollector::expected_receipts(10, 1), 0);
        assert_eq!(SignalCollector::expected_receipts(10, 0), 0);
    }

    struct Fixture {
        nodes: Vec<NodeHandle>,
        groups: Vec<AgentGroup>,
        active: ActiveSet,
        channel: ChannelData,
    }

    async fn fixture(platform: &MockPlatform, agents: usize) -> Fixture {
        let spec = NodeSpec {
            count: agents,
            network: NetworkConfig::default(),
        };
        let nodes = platform.create_nodes(&spec, None).await.unwrap();
        let app = AppSource::Path("chat.dna.gz".into());
        let groups = AgentProvisioner::new(&app, 1)
            .provision(platform, &nodes)
            .await
            .unwrap();
        let active = ActiveSet::select(&groups, agents);
        announce_presence(platform, &active).await.unwrap();
        let channel = ChatClient::new(platform, &active.agents()[0])
            .create_channel(&CreateChannelInput::for_trial())
            .await
            .unwrap();
        Fixture {
            nodes,
            groups,
            active,
            channel,
        }
    }

    fn ctx(f: &Fixture, messages: usize) -> TrialContext<'_> {
        TrialContext {
            nodes: &f.nodes,
            groups: &f.groups,
            active: &f.active,
            channel: &f.channel,
            messages,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completes_before_deadline() {
        let platform = MockPlatform::with_settings(MockSettings {
            signal_delay: Duration::from_millis(300),
            ..MockSettings::default()
        });
        let f = fixture(&platform, 3).await;

        let outcome = SignalCollector::new(Duration::from_secs(10))
            .detect(&platform, &ctx(&f, 5))
            .await
            .unwrap();

        let elapsed = outcome.elapsed().expect("converged");
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reports_partial_delivery() {
        let platform = MockPlatform::with_settings(MockSettings {
            signal_delay: Duration::from_secs(30),
            ..MockSettings::default()
        });
        let f = fixture(&platform, 3).await;

        let outcome = SignalCollector::new(Duration::from_secs(5))
            .detect(&platform, &ctx(&f, 4))
            .await
            .unwrap();

        match outcome {
            Outcome::NotConverged(report) => {
                assert_eq!(report.expected, 8);
                assert!(report.received < report.expected);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
