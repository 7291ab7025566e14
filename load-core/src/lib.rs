//! # chatload-core
//!
//! Orchestrates load trials against a swarm of chat nodes and measures how
//! long a burst of messages takes to propagate.
//!
//! ## Features
//!
//! - **Partial-failure pool**: unreachable worker endpoints are skipped
//! - **Readiness barrier**: load starts only once peer discovery settles
//! - **Concurrent injection**: one joined fan-out per burst
//! - **Two detectors**: gossip polling and signal receipt counting
//! - **Guaranteed teardown**: every acquired node is shut down
//!
//! ## Architecture
//!
//! ```text
//! TrialRunner
//!   ├── WorkerPool ─────────┐
//!   ├── AgentProvisioner    │
//!   ├── ActiveSet           ├──► Platform (mock | node-control command)
//!   ├── ReadinessBarrier    │
//!   └── ConvergenceDetector ┘
//!         ├── GossipPoller
//!         └── SignalCollector
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use chatload_core::{BenchConfig, MockPlatform, TrialKind, TrialRunner};
//!
//! let config = BenchConfig::default();
//! let platform = MockPlatform::new();
//! let result = TrialRunner::new(&platform, &config)
//!     .run(TrialKind::Signal)
//!     .await?;
//! println!("{:?}", result.elapsed());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod client;
pub mod config;
pub mod convergence;
pub mod error;
pub mod inject;
pub mod platform;
pub mod pool;
pub mod provision;
pub mod report;
pub mod select;
pub mod trial;

pub use barrier::{announce_presence, ReadinessBarrier};
pub use client::ChatClient;
pub use config::{BenchConfig, ConfigError, NetworkMode, TrialKind};
pub use convergence::{
    ConvergenceDetector, DeliveryReport, GossipPoller, Outcome, ReceiptTally, SignalCollector,
    TrialContext,
};
pub use error::{BenchError, Result};
pub use inject::{InjectionReport, LoadInjector};
pub use platform::{
    Agent, CommandPlatform, MockPlatform, MockSettings, NodeHandle, NodeId, Platform,
    PlatformError, WorkerEndpoint,
};
pub use pool::WorkerPool;
pub use provision::{AgentGroup, AgentProvisioner};
pub use report::{TrialRecord, TrialSummary};
pub use select::ActiveSet;
pub use trial::{TrialResult, TrialRunner};
