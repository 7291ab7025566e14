//! Run trials and report.

use anyhow::{Context, Result};
use load_core::{
    BenchConfig, CommandPlatform, MockPlatform, Platform, TrialKind, TrialRecord, TrialRunner,
    TrialSummary,
};
use tracing::{debug, info};

/// Flags of the `run` command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Trial kind override.
    pub kind: Option<TrialKind>,
    /// Message count override.
    pub messages: Option<usize>,
    /// Signal deadline override.
    pub period_ms: Option<u64>,
    /// Sequential trials to run.
    pub trials: usize,
    /// Use the simulated swarm.
    pub mock: bool,
    /// Emit JSON instead of text.
    pub json: bool,
}

/// Run the run command.
pub async fn run(mut config: BenchConfig, options: RunOptions) -> Result<()> {
    if let Some(kind) = options.kind {
        config.trial.kind = kind;
    }
    if let Some(messages) = options.messages {
        config.trial.messages = messages;
    }
    if let Some(period_ms) = options.period_ms {
        config.trial.period_ms = period_ms;
    }
    if options.trials == 0 {
        anyhow::bail!("--trials must be at least 1");
    }
    config.validate().context("Invalid configuration")?;

    if options.mock {
        let platform = MockPlatform::new();
        run_trials(&platform, &config, &options).await
    } else {
        let platform = CommandPlatform::new(config.platform.clone())
            .context("Failed to set up node-control platform")?;
        run_trials(&platform, &config, &options).await
    }
}

async fn run_trials<P: Platform + ?Sized>(
    platform: &P,
    config: &BenchConfig,
    options: &RunOptions,
) -> Result<()> {
    let kind = config.trial.kind;
    let runner = TrialRunner::new(platform, config);
    let mut results = Vec::with_capacity(options.trials);

    for trial in 1..=options.trials {
        info!(trial, of = options.trials, %kind, "running trial");
        let result = runner
            .run(kind)
            .await
            .with_context(|| format!("Trial {} of {} failed", trial, options.trials))?;
        if !options.json {
            println!("{}", TrialRecord::new(trial, &result));
        }
        results.push(result);
    }

    let summary = TrialSummary::from_results(&results);
    debug!(
        trials = summary.trials,
        converged = summary.converged,
        "all trials finished"
    );
    if options.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!();
        println!("{}", summary);
    }

    Ok(())
}
