//! Platform abstraction for chatload.
//!
//! The orchestrator never talks to the chat application directly. Every
//! node lifecycle step and every app call goes through [`Platform`], which
//! hides whether nodes are simulated in memory ([`MockPlatform`]) or driven
//! through a node-control executable locally and over SSH
//! ([`CommandPlatform`]).
//!
//! # Design
//!
//! The trait is async and call-oriented:
//! - `create_nodes()` / `shutdown_node()` manage node processes
//! - `install_app()` yields the agents hosted on a node
//! - `call()` invokes one chat entry point as one agent
//! - `register_signal_handler()` routes push notifications into a sink
//! - `share_peer_info()` short-circuits discovery in local mode

mod command;
mod mock;

pub use command::{CommandError, CommandOutput, CommandPlatform, CommandTarget};
pub use mock::{MockPlatform, MockSettings};

use async_trait::async_trait;
use load_types::{AgentKey, Operation, SignalEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{AppSource, NetworkConfig};

/// Where a node's signal handler delivers notifications.
pub type SignalSink = mpsc::UnboundedSender<SignalEvent>;

/// Platform errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Worker endpoint could not start nodes.
    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable {
        /// Endpoint that failed.
        endpoint: String,
        /// Failure detail.
        reason: String,
    },

    /// App install failed on a node.
    #[error("install failed on node {node}: {reason}")]
    Install {
        /// Node the install ran on.
        node: NodeId,
        /// Failure detail.
        reason: String,
    },

    /// An app call returned an error.
    #[error("call {op} failed: {reason}")]
    Call {
        /// Entry point called.
        op: Operation,
        /// Failure detail.
        reason: String,
    },

    /// Node is not (or no longer) managed by this platform.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Node-control command failed.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Payload could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identifier a platform assigns to a running node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a platform-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a remote execution host, as written in configuration.
///
/// `host` or `user@host`; an explicit user overrides `platform.ssh_user`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerEndpoint(String);

impl WorkerEndpoint {
    /// Wrap an endpoint address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A running node and where it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    /// Platform-assigned id.
    pub id: NodeId,
    /// Worker the node runs on; `None` for local nodes.
    pub endpoint: Option<WorkerEndpoint>,
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}@{}", self.id, endpoint),
            None => write!(f, "{}@local", self.id),
        }
    }
}

/// One installed app instance: who it is and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    /// Agent identity.
    pub key: AgentKey,
    /// Node hosting the instance.
    pub node: NodeId,
    /// Installed app id.
    pub app_id: String,
    /// Execution handle the platform routes calls through.
    pub cell: String,
}

/// What to start on a worker.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Node processes to start.
    pub count: usize,
    /// Network settings for every node.
    pub network: NetworkConfig,
}

/// Seam between the orchestrator and the nodes it drives.
///
/// Implementations must be usable from a single task issuing many calls
/// concurrently; no call may assume another has finished.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Start `spec.count` nodes on `endpoint`, or locally when `None`.
    async fn create_nodes(
        &self,
        spec: &NodeSpec,
        endpoint: Option<&WorkerEndpoint>,
    ) -> Result<Vec<NodeHandle>, PlatformError>;

    /// Stop a node and release everything attached to it.
    async fn shutdown_node(&self, node: &NodeHandle) -> Result<(), PlatformError>;

    /// Install `instances` copies of the app and return their agents.
    async fn install_app(
        &self,
        node: &NodeHandle,
        app: &AppSource,
        instances: usize,
    ) -> Result<Vec<Agent>, PlatformError>;

    /// Invoke one chat entry point as `agent`.
    async fn call(
        &self,
        agent: &Agent,
        op: Operation,
        payload: Value,
    ) -> Result<Value, PlatformError>;

    /// Deliver every signal emitted on `node` into `sink`.
    async fn register_signal_handler(
        &self,
        node: &NodeHandle,
        sink: SignalSink,
    ) -> Result<(), PlatformError>;

    /// Make every node aware of every other node without real discovery.
    async fn share_peer_info(&self, nodes: &[NodeHandle]) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_handle_display() {
        let remote = NodeHandle {
            id: NodeId::new("n1"),
            endpoint: Some(WorkerEndpoint::new("10.0.0.7")),
        };
        let local = NodeHandle {
            id: NodeId::new("n2"),
            endpoint: None,
        };
        assert_eq!(remote.to_string(), "n1@10.0.0.7");
        assert_eq!(local.to_string(), "n2@local");
    }

    #[test]
    fn platform_error_display() {
        let err = PlatformError::Call {
            op: Operation::ListMessages,
            reason: "timeout".into(),
        };
        assert_eq!(err.to_string(), "call list_messages failed: timeout");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PlatformError>();
    }
}
