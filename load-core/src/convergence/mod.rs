//! Convergence detection.
//!
//! Both trial kinds share one shell (setup, injection, teardown) and differ
//! only in how they decide that a burst has fully propagated:
//!
//! - [`GossipPoller`] polls one receiving replica's message count
//! - [`SignalCollector`] counts push notifications against a deadline
//!
//! Each detector owns the injection so it can start its clock at the first
//! send.

mod poller;
mod signal;

pub use poller::GossipPoller;
pub use signal::{ReceiptTally, SignalCollector};

use async_trait::async_trait;
use load_types::chat::ChannelData;
use load_types::AgentKey;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;
use crate::platform::{NodeHandle, Platform};
use crate::provision::AgentGroup;
use crate::select::ActiveSet;

/// Everything a detector needs from setup.
#[derive(Debug, Clone, Copy)]
pub struct TrialContext<'a> {
    /// Every node in the pool.
    pub nodes: &'a [NodeHandle],
    /// Agents grouped by node, in node order.
    pub groups: &'a [AgentGroup],
    /// Load-generating agents.
    pub active: &'a ActiveSet,
    /// Shared trial channel.
    pub channel: &'a ChannelData,
    /// Messages to inject.
    pub messages: usize,
}

/// Delivery counts for a trial that did not converge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Deliveries needed for convergence.
    pub expected: usize,
    /// Deliveries observed.
    pub received: usize,
    /// Deliveries per recipient, when tracked.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub per_recipient: BTreeMap<AgentKey, usize>,
}

impl DeliveryReport {
    /// Report without a per-recipient breakdown.
    pub fn new(expected: usize, received: usize) -> Self {
        Self {
            expected,
            received,
            per_recipient: BTreeMap::new(),
        }
    }

    /// Share of expected deliveries observed, in percent.
    pub fn percent(&self) -> f64 {
        if self.expected == 0 {
            return 100.0;
        }
        self.received as f64 * 100.0 / self.expected as f64
    }
}

/// How a measurement ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Full propagation, timed from the first send.
    Converged {
        /// Time from start of sending to convergence.
        elapsed: Duration,
    },
    /// Deadline or wait bound hit first. Not an error.
    NotConverged(DeliveryReport),
}

impl Outcome {
    /// Convergence latency, if the trial converged.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Outcome::Converged { elapsed } => Some(*elapsed),
            Outcome::NotConverged(_) => None,
        }
    }

    /// Whether the trial converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Outcome::Converged { .. })
    }
}

/// Injects a burst and measures how long it takes to propagate.
#[async_trait]
pub trait ConvergenceDetector: Send + Sync {
    /// Run injection and detection. Partial delivery is an [`Outcome`], not an error.
    async fn detect<P: Platform + ?Sized>(
        &self,
        platform: &P,
        ctx: &TrialContext<'_>,
    ) -> Result<Outcome>;
}
