//! Validate and print configuration.

use anyhow::{Context, Result};
use load_core::{BenchConfig, TrialKind};

/// Run the check command.
pub fn run(config: &BenchConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    println!("=== chatload configuration ===");
    println!();

    println!("Pool:");
    if config.pool.endpoints.is_empty() {
        println!("  Endpoints:  none (nodes start locally)");
    } else {
        println!("  Endpoints:  {}", config.pool.endpoints.len());
        for endpoint in &config.pool.endpoints {
            println!("    - {}", endpoint);
        }
    }
    println!(
        "  Nodes:      {} × {} conductors = {}",
        config.pool.nodes,
        config.pool.conductors,
        config.target_nodes()
    );
    println!("  Instances:  {} per conductor", config.pool.instances);
    println!("  App:        {}", config.app.source);
    println!();

    println!("Network:");
    println!(
        "  Mode:       {}",
        if config.network.is_local() { "local" } else { "networked" }
    );
    if let Some(url) = &config.network.bootstrap_url {
        println!("  Bootstrap:  {}", url);
    }
    if let Some(url) = &config.network.proxy_url {
        println!("  Proxy:      {}", url);
    }
    println!();

    let trial = &config.trial;
    println!("Trial:");
    println!("  Kind:       {}", trial.kind);
    println!("  Messages:   {}", trial.messages);
    println!("  Active:     {} agents", trial.active_agents);
    match trial.kind {
        TrialKind::Signal => println!("  Deadline:   {:?}", trial.period()),
        TrialKind::Gossip => {
            println!("  Poll every: {:?}", trial.poll_interval());
            match trial.max_poll_wait() {
                Some(max) => println!("  Give up:    after {:?}", max),
                None => println!("  Give up:    never"),
            }
        }
    }
    println!();

    println!("Readiness:");
    println!("  Poll every: {:?}", config.readiness.interval());
    match config.readiness.max_wait() {
        Some(max) => println!("  Give up:    after {:?}", max),
        None => println!("  Give up:    never"),
    }
    println!();

    println!("Configuration OK");
    Ok(())
}
