//! Trial reporting.
//!
//! Pure functions over finished [`TrialResult`]s: one serializable record per
//! trial and a summary across a series.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::config::TrialKind;
use crate::convergence::Outcome;
use crate::trial::TrialResult;

/// Serializable view of one trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialRecord {
    /// Position in the series, starting at 1.
    pub trial: usize,
    /// Propagation mode.
    pub kind: TrialKind,
    /// Messages injected.
    pub messages: usize,
    /// Agents that generated load.
    pub active_agents: usize,
    /// Whether the burst fully propagated.
    pub converged: bool,
    /// Convergence latency in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    /// Deliveries needed, when the trial did not converge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
    /// Deliveries observed, when the trial did not converge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<usize>,
    /// Share of deliveries observed, when the trial did not converge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

impl TrialRecord {
    /// Record for the `trial`th result of a series.
    pub fn new(trial: usize, result: &TrialResult) -> Self {
        let (expected, received, percent) = match &result.outcome {
            Outcome::Converged { .. } => (None, None, None),
            Outcome::NotConverged(report) => (
                Some(report.expected),
                Some(report.received),
                Some(report.percent()),
            ),
        };
        Self {
            trial,
            kind: result.kind,
            messages: result.messages,
            active_agents: result.active_agents,
            converged: result.outcome.is_converged(),
            elapsed_ms: result.elapsed().map(millis),
            expected,
            received,
            percent,
        }
    }
}

impl fmt::Display for TrialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trial {} [{}] {} messages, {} agents: ",
            self.trial, self.kind, self.messages, self.active_agents
        )?;
        match (self.elapsed_ms, self.expected, self.received, self.percent) {
            (Some(ms), ..) => write!(f, "converged in {:.1} ms", ms),
            (None, Some(expected), Some(received), Some(percent)) => write!(
                f,
                "no result ({} of {} delivered, {:.1}%)",
                received, expected, percent
            ),
            _ => write!(f, "no result"),
        }
    }
}

/// Aggregate over a series of trials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialSummary {
    /// Trials run.
    pub trials: usize,
    /// Trials that converged.
    pub converged: usize,
    /// Fastest convergence, in milliseconds.
    pub min_ms: Option<f64>,
    /// Mean convergence over converged trials, in milliseconds.
    pub mean_ms: Option<f64>,
    /// Slowest convergence, in milliseconds.
    pub max_ms: Option<f64>,
    /// Per-trial records.
    pub records: Vec<TrialRecord>,
}

impl TrialSummary {
    /// Summarize `results` in run order.
    pub fn from_results(results: &[TrialResult]) -> Self {
        let records: Vec<TrialRecord> = results
            .iter()
            .enumerate()
            .map(|(i, result)| TrialRecord::new(i + 1, result))
            .collect();
        let latencies: Vec<f64> = records.iter().filter_map(|r| r.elapsed_ms).collect();

        let min_ms = latencies.iter().copied().reduce(f64::min);
        let max_ms = latencies.iter().copied().reduce(f64::max);
        let mean_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        Self {
            trials: records.len(),
            converged: latencies.len(),
            min_ms,
            mean_ms,
            max_ms,
            records,
        }
    }
}

impl fmt::Display for TrialSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} trials converged", self.converged, self.trials)?;
        if let (Some(min), Some(mean), Some(max)) = (self.min_ms, self.mean_ms, self.max_ms) {
            write!(f, "; min {:.1} ms, mean {:.1} ms, max {:.1} ms", min, mean, max)?;
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::DeliveryReport;

    fn converged(ms: u64) -> TrialResult {
        TrialResult {
            kind: TrialKind::Signal,
            messages: 20,
            active_agents: 5,
            outcome: Outcome::Converged {
                elapsed: Duration::from_millis(ms),
            },
        }
    }

    fn timed_out(received: usize) -> TrialResult {
        TrialResult {
            kind: TrialKind::Signal,
            messages: 20,
            active_agents: 5,
            outcome: Outcome::NotConverged(DeliveryReport::new(80, received)),
        }
    }

    #[test]
    fn summary_ignores_unconverged_latency() {
        let summary =
            TrialSummary::from_results(&[converged(100), timed_out(40), converged(300)]);

        assert_eq!(summary.trials, 3);
        assert_eq!(summary.converged, 2);
        assert_eq!(summary.min_ms, Some(100.0));
        assert_eq!(summary.mean_ms, Some(200.0));
        assert_eq!(summary.max_ms, Some(300.0));
        assert_eq!(
            summary.to_string(),
            "2/3 trials converged; min 100.0 ms, mean 200.0 ms, max 300.0 ms"
        );
    }

    #[test]
    fn summary_of_nothing_converged() {
        let summary = TrialSummary::from_results(&[timed_out(79)]);
        assert_eq!(summary.converged, 0);
        assert_eq!(summary.mean_ms, None);
        assert_eq!(summary.to_string(), "0/1 trials converged");
    }

    #[test]
    fn record_display() {
        assert_eq!(
            TrialRecord::new(1, &converged(1234)).to_string(),
            "trial 1 [signal] 20 messages, 5 agents: converged in 1234.0 ms"
        );
        assert_eq!(
            TrialRecord::new(2, &timed_out(60)).to_string(),
            "trial 2 [signal] 20 messages, 5 agents: no result (60 of 80 delivered, 75.0%)"
        );
    }

    #[test]
    fn record_json_omits_missing_fields() {
        let json = serde_json::to_value(TrialRecord::new(1, &converged(50))).unwrap();
        assert_eq!(json["kind"], "signal");
        assert_eq!(json["converged"], true);
        assert!(json.get("expected").is_none());

        let json = serde_json::to_value(TrialRecord::new(1, &timed_out(3))).unwrap();
        assert!(json.get("elapsed_ms").is_none());
        assert_eq!(json["received"], 3);
    }

    #[test]
    fn record_percent_matches_delivery_report() {
        let result = timed_out(60);
        let record = TrialRecord::new(1, &result);
        match &result.outcome {
            Outcome::NotConverged(report) => assert_eq!(record.percent, Some(report.percent())),
            other => panic!("expected no result, got {:?}", other),
        }
        assert_eq!(TrialRecord::new(1, &converged(10)).percent, None);
    }
}
