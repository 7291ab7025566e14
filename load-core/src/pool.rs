//! Worker pool acquisition and teardown.
//!
//! Endpoints are tried in configuration order, each at most once per
//! acquisition. An endpoint that fails is logged and skipped; running out of
//! endpoints before the pool is full is fatal, and whatever was started is
//! shut down again before the error is returned.
//!
//! With no endpoints configured every batch is started locally and any
//! failure is fatal.

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::config::{NetworkConfig, PoolConfig};
use crate::error::{BenchError, Result};
use crate::platform::{NodeHandle, NodeSpec, Platform};

/// Nodes acquired for one trial.
#[derive(Debug)]
pub struct WorkerPool {
    nodes: Vec<NodeHandle>,
}

impl WorkerPool {
    /// Acquire `pool.nodes × pool.conductors` nodes, `pool.conductors` per endpoint.
    pub async fn acquire<P: Platform + ?Sized>(
        platform: &P,
        pool: &PoolConfig,
        network: &NetworkConfig,
    ) -> Result<Self> {
        let target = pool.nodes * pool.conductors;
        let spec = NodeSpec {
            count: pool.conductors,
            network: network.clone(),
        };
        let mut acquired: Vec<NodeHandle> = Vec::with_capacity(target);

        if pool.endpoints.is_empty() {
            info!(target, "no worker endpoints configured, starting nodes locally");
            while acquired.len() < target {
                match platform.create_nodes(&spec, None).await {
                    Ok(handles) if handles.is_empty() => {
                        let err = BenchError::Capacity {
                            acquired: acquired.len(),
                            required: target,
                        };
                        release(platform, &acquired).await;
                        return Err(err);
                    }
                    Ok(handles) => acquired.extend(handles),
                    Err(e) => {
                        release(platform, &acquired).await;
                        return Err(e.into());
                    }
                }
            }
        } else {
            for endpoint in &pool.endpoints {
                if acquired.len() >= target {
                    break;
                }
                match platform.create_nodes(&spec, Some(endpoint)).await {
                    Ok(handles) => {
                        debug!(%endpoint, started = handles.len(), "worker endpoint ready");
                        acquired.extend(handles);
                    }
                    Err(e) => {
                        warn!(%endpoint, "skipping worker endpoint: {}", e);
                    }
                }
            }
        }

        if acquired.len() > target {
            let surplus = acquired.split_off(target);
            debug!(surplus = surplus.len(), "releasing surplus nodes");
            release(platform, &surplus).await;
        }

        if acquired.len() < target {
            let err = BenchError::Capacity {
                acquired: acquired.len(),
                required: target,
            };
            release(platform, &acquired).await;
            return Err(err);
        }

        info!(nodes = acquired.len(), "worker pool acquired");
        Ok(Self { nodes: acquired })
    }

    /// Acquired nodes, in acquisition order.
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    /// Number of acquired nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the pool holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Shut down every node concurrently. Returns how many shutdowns failed.
    pub async fn teardown<P: Platform + ?Sized>(self, platform: &P) -> usize {
        let failed = release(platform, &self.nodes).await;
        if failed == 0 {
            info!(nodes = self.nodes.len(), "worker pool torn down");
        }
        failed
    }
}

/// Shut down `nodes` concurrently, logging failures.
async fn release<P: Platform + ?Sized>(platform: &P, nodes: &[NodeHandle]) -> usize {
    let results = join_all(nodes.iter().map(|node| async move {
        (node, platform.shutdown_node(node).await)
    }))
    .await;

    let mut failed = 0;
    for (node, result) in results {
        if let Err(e) = result {
            warn!(%node, "node shutdown failed: {}", e);
            failed += 1;
        }
    }
    failed
}
