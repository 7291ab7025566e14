//! Active-set selection.

use tracing::warn;

use crate::platform::Agent;
use crate::provision::AgentGroup;

/// Agents that generate load and take part in measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSet {
    agents: Vec<Agent>,
    requested: usize,
}

impl ActiveSet {
    /// Take the first `count` agents in node order, then agent order within a node.
    ///
    /// Asking for more agents than exist yields every agent and a warning.
    pub fn select(groups: &[AgentGroup], count: usize) -> Self {
        let agents: Vec<Agent> = groups
            .iter()
            .flat_map(|group| group.agents.iter())
            .take(count)
            .cloned()
            .collect();

        if agents.len() < count {
            warn!(
                requested = count,
                available = agents.len(),
                "fewer agents than the requested active count, using all of them"
            );
        }

        Self {
            agents,
            requested: count,
        }
    }

    /// Selected agents, in selection order.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Number of selected agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Active count that was asked for.
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Whether fewer agents were available than requested.
    pub fn is_short(&self) -> bool {
        self.agents.len() < self.requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{NodeHandle, NodeId};
    use load_types::AgentKey;

    fn groups(shape: &[usize]) -> Vec<AgentGroup> {
        shape
            .iter()
            .enumerate()
            .map(|(n, &count)| {
                let node = NodeId::new(format!("node-{}", n));
                AgentGroup {
                    node: NodeHandle {
                        id: node.clone(),
                        endpoint: None,
                    },
                    agents: (0..count)
                        .map(|i| Agent {
                            key: AgentKey::from_bytes(&[n as u8, i as u8]).unwrap(),
                            node: node.clone(),
                            app_id: format!("chat-{}", i),
                            cell: format!("cell-{}", i),
                        })
                        .collect(),
                }
            })
            .collect()
    }

    fn picked(set: &ActiveSet) -> Vec<(u8, u8)> {
        set.agents()
            .iter()
            .map(|a| (a.key.as_bytes()[0], a.key.as_bytes()[1]))
            .collect()
    }

    #[test]
    fn takes_node_order_then_agent_order() {
        let set = ActiveSet::select(&groups(&[2, 3, 1]), 4);
        assert_eq!(picked(&set), vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert!(!set.is_short());
    }

    #[test]
    fn short_selection_returns_everything() {
        let set = ActiveSet::select(&groups(&[1, 1]), 5);
        assert_eq!(set.len(), 2);
        assert_eq!(set.requested(), 5);
        assert!(set.is_short());
    }

    #[test]
    fn exact_count_is_not_short() {
        let set = ActiveSet::select(&groups(&[2, 2]), 4);
        assert_eq!(set.len(), 4);
        assert!(!set.is_short());
    }

    #[test]
    fn selection_is_deterministic() {
        let input = groups(&[3, 0, 2]);
        assert_eq!(ActiveSet::select(&input, 4), ActiveSet::select(&input, 4));
        assert_eq!(picked(&ActiveSet::select(&input, 4)), vec![(0, 0), (0, 1), (0, 2), (2, 0)]);
    }

    #[test]
    fn zero_requested_selects_nothing() {
        let set = ActiveSet::select(&groups(&[2]), 0);
        assert!(set.is_empty());
        assert!(!set.is_short());
    }
}
