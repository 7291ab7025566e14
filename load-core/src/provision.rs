//! App installation across the pool.
//!
//! Unlike acquisition there is no skipping here: a node either yields
//! exactly the requested agents or the whole trial fails.

use futures_util::future::try_join_all;
use std::collections::HashSet;
use tracing::info;

use crate::config::AppSource;
use crate::error::{BenchError, Result};
use crate::platform::{Agent, NodeHandle, Platform};

/// Agents installed on one node, in install order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentGroup {
    /// Hosting node.
    pub node: NodeHandle,
    /// Agents on that node.
    pub agents: Vec<Agent>,
}

/// Installs the app on every node of a pool.
pub struct AgentProvisioner<'a> {
    app: &'a AppSource,
    instances: usize,
}

impl<'a> AgentProvisioner<'a> {
    /// Install `instances` copies of `app` per node.
    pub fn new(app: &'a AppSource, instances: usize) -> Self {
        Self { app, instances }
    }

    /// Install on every node concurrently. Groups come back in node order.
    pub async fn provision<P: Platform + ?Sized>(
        &self,
        platform: &P,
        nodes: &[NodeHandle],
    ) -> Result<Vec<AgentGroup>> {
        let groups = try_join_all(nodes.iter().map(|node| self.install(platform, node))).await?;

        let mut seen = HashSet::new();
        for group in &groups {
            for agent in &group.agents {
                if !seen.insert(&agent.key) {
                    return Err(BenchError::Provision {
                        node: group.node.id.clone(),
                        reason: format!("duplicate agent key {}", agent.key),
                    });
                }
            }
        }

        info!(nodes = groups.len(), agents = seen.len(), app = %self.app, "app installed");
        Ok(groups)
    }

    async fn install<P: Platform + ?Sized>(
        &self,
        platform: &P,
        node: &NodeHandle,
    ) -> Result<AgentGroup> {
        let provision_error = |reason: String| BenchError::Provision {
            node: node.id.clone(),
            reason,
        };

        let agents = platform
            .install_app(node, self.app, self.instances)
            .await
            .map_err(|e| provision_error(e.to_string()))?;

        if agents.len() != self.instances {
            return Err(provision_error(format!(
                "expected {} agents, got {}",
                self.instances,
                agents.len()
            )));
        }
        if let Some(stray) = agents.iter().find(|agent| agent.node != node.id) {
            return Err(provision_error(format!(
                "agent {} reports node {}",
                stray.key, stray.node
            )));
        }

        Ok(AgentGroup {
            node: node.clone(),
            agents,
        })
    }
}
