//! Mock platform for testing.
//!
//! Simulates a swarm of chat nodes in memory: messages become visible on
//! other replicas after a gossip delay, signals reach active chatters after
//! a delivery delay, and chatters discover each other after a discovery
//! delay unless peer info was shared. Failures can be injected per endpoint,
//! per install, and per operation.

use super::{Agent, NodeHandle, NodeId, NodeSpec, Platform, PlatformError, SignalSink, WorkerEndpoint};
use crate::config::AppSource;
use async_trait::async_trait;
use load_types::chat::{
    ChannelData, CreateChannelInput, ListMessagesInput, MessageBody, MessageData, MessageInput,
    SignalMessageData, SignalPayload,
};
use load_types::{AgentKey, ChannelId, Operation, SignalEvent};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Endpoint name standing in for local node starts.
const LOCAL_ENDPOINT: &str = "local";

/// Timing of the simulated swarm.
#[derive(Debug, Clone)]
pub struct MockSettings {
    /// Time before a message is visible on replicas other than its author's.
    pub gossip_delay: Duration,
    /// Time between `signal_chatters` and delivery to each recipient.
    pub signal_delay: Duration,
    /// Time before a new chatter shows up in other agents' stats.
    pub discovery_delay: Duration,
    /// Random extra delay (0..=jitter) added to gossip and signal delays.
    pub jitter: Duration,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            gossip_delay: Duration::from_millis(50),
            signal_delay: Duration::from_millis(10),
            discovery_delay: Duration::from_millis(500),
            jitter: Duration::ZERO,
        }
    }
}

/// Mock platform for testing.
///
/// Cloning shares the simulated swarm, so a test can keep a handle for
/// inspection while the trial owns another.
#[derive(Debug, Default, Clone)]
pub struct MockPlatform {
    inner: Arc<Mutex<MockPlatformInner>>,
}

#[derive(Debug)]
struct MockNode {
    running: bool,
    sink: Option<SignalSink>,
}

#[derive(Debug)]
struct MockMessage {
    channel: ChannelId,
    author: AgentKey,
    body: MessageBody,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct MockPlatformInner {
    settings: MockSettings,
    next_node: u64,
    nodes: BTreeMap<NodeId, MockNode>,
    agents: HashMap<AgentKey, NodeId>,
    chatters: Vec<(AgentKey, Instant)>,
    peers_shared: bool,
    messages: Vec<MockMessage>,
    unreachable: HashSet<WorkerEndpoint>,
    install_failure: Option<String>,
    call_failures: HashMap<Operation, usize>,
    attempts: Vec<Option<WorkerEndpoint>>,
    shutdowns: Vec<NodeId>,
}

impl MockPlatformInner {
    fn delay(&self, base: Duration) -> Duration {
        let jitter_ms = self.settings.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    fn running_node(&self, id: &NodeId) -> Result<&MockNode, PlatformError> {
        self.nodes
            .get(id)
            .filter(|node| node.running)
            .ok_or_else(|| PlatformError::UnknownNode(id.clone()))
    }
}

impl MockPlatform {
    /// Create a new mock platform with default timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock platform with the given timing.
    pub fn with_settings(settings: MockSettings) -> Self {
        let platform = Self::default();
        platform.inner.lock().unwrap().settings = settings;
        platform
    }

    /// Make every node start on `endpoint` fail. `"local"` targets local starts.
    pub fn mark_unreachable(&self, endpoint: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.unreachable.insert(WorkerEndpoint::new(endpoint));
    }

    /// Make every subsequent app install fail with the given reason.
    pub fn fail_installs(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.install_failure = Some(reason.to_string());
    }

    /// Make the next `count` calls of `op` fail.
    pub fn fail_next_calls(&self, op: Operation, count: usize) {
        let mut inner = self.inner.lock().unwrap();
        *inner.call_failures.entry(op).or_default() += count;
    }

    /// Endpoints `create_nodes` was called with, in order (`None` = local).
    pub fn attempted_endpoints(&self) -> Vec<Option<WorkerEndpoint>> {
        let inner = self.inner.lock().unwrap();
        inner.attempts.clone()
    }

    /// Nodes ever started.
    pub fn nodes_started(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.nodes.len()
    }

    /// Nodes started and not yet shut down.
    pub fn live_nodes(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.nodes.values().filter(|node| node.running).count()
    }

    /// Nodes shut down, in shutdown order.
    pub fn shutdown_nodes(&self) -> Vec<NodeId> {
        let inner = self.inner.lock().unwrap();
        inner.shutdowns.clone()
    }

    /// Messages committed across the swarm.
    pub fn messages_created(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.messages.len()
    }

    /// Agents that announced themselves as chatters.
    pub fn chatter_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.chatters.len()
    }

    /// Whether `share_peer_info` has run.
    pub fn peers_shared(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.peers_shared
    }

    fn handle_call(&self, agent: &Agent, op: Operation, payload: Value) -> Result<Value, PlatformError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(remaining) = inner.call_failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::Call {
                    op,
                    reason: "injected failure".into(),
                });
            }
        }

        let node = inner
            .agents
            .get(&agent.key)
            .cloned()
            .ok_or_else(|| PlatformError::Call {
                op,
                reason: format!("unknown agent {}", agent.key),
            })?;
        inner.running_node(&node)?;
        let now = Instant::now();

        match op {
            Operation::CreateChannel => {
                let input: CreateChannelInput = serde_json::from_value(payload)?;
                let mut extra = Map::new();
                extra.insert(
                    "info".into(),
                    json!({ "name": input.name, "created_by": agent.key }),
                );
                extra.insert("latest_chunk".into(), json!(0));
                let data = ChannelData {
                    channel: input.channel,
                    extra,
                };
                Ok(serde_json::to_value(data)?)
            }
            Operation::CreateMessage => {
                let input: MessageInput = serde_json::from_value(payload)?;
                let visible_at = now + inner.delay(inner.settings.gossip_delay);
                inner.messages.push(MockMessage {
                    channel: input.channel.uuid,
                    author: agent.key.clone(),
                    body: input.message.clone(),
                    visible_at,
                });
                let mut extra = Map::new();
                extra.insert("entry_hash".into(), json!(input.message.uuid));
                extra.insert("created_by".into(), json!(agent.key));
                Ok(serde_json::to_value(MessageData {
                    message: input.message,
                    extra,
                })?)
            }
            Operation::SignalChatters => {
                let input: SignalMessageData = serde_json::from_value(payload)?;
                let signal = serde_json::to_value(SignalPayload::Message(input))?;
                let recipients: Vec<AgentKey> = inner
                    .chatters
                    .iter()
                    .map(|(key, _)| key.clone())
                    .filter(|key| key != &agent.key)
                    .collect();

                let mut sent = Vec::new();
                for recipient in recipients {
                    let sink = inner
                        .agents
                        .get(&recipient)
                        .and_then(|node| inner.nodes.get(node))
                        .filter(|node| node.running)
                        .and_then(|node| node.sink.clone());
                    let Some(sink) = sink else {
                        continue;
                    };
                    let delay = inner.delay(inner.settings.signal_delay);
                    let event = SignalEvent {
                        recipient: recipient.clone(),
                        payload: signal.clone(),
                    };
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = sink.send(event);
                    });
                    sent.push(recipient);
                }
                Ok(json!({ "total": sent.len(), "sent": sent }))
            }
            Operation::ListMessages => {
                let input: ListMessagesInput = serde_json::from_value(payload)?;
                let messages: Vec<Value> = inner
                    .messages
                    .iter()
                    .filter(|m| m.channel == input.channel.uuid)
                    .filter(|m| m.author == agent.key || m.visible_at <= now)
                    .map(|m| json!({ "message": m.body }))
                    .collect();
                Ok(json!({ "messages": messages }))
            }
            Operation::AgentStats => {
                let discovery = inner.settings.discovery_delay;
                let seen = inner
                    .chatters
                    .iter()
                    .filter(|(key, at)| {
                        key == &agent.key || inner.peers_shared || *at + discovery <= now
                    })
                    .count();
                Ok(json!({ "agents": seen, "active": seen }))
            }
            Operation::RefreshChatter => {
                if !inner.chatters.iter().any(|(key, _)| key == &agent.key) {
                    inner.chatters.push((agent.key.clone(), now));
                }
                Ok(Value::Null)
            }
        }
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn create_nodes(
        &self,
        spec: &NodeSpec,
        endpoint: Option<&WorkerEndpoint>,
    ) -> Result<Vec<NodeHandle>, PlatformError> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts.push(endpoint.cloned());

        let address = endpoint
            .cloned()
            .unwrap_or_else(|| WorkerEndpoint::new(LOCAL_ENDPOINT));
        if inner.unreachable.contains(&address) {
            return Err(PlatformError::Unreachable {
                endpoint: address.to_string(),
                reason: "connection refused".into(),
            });
        }

        let mut handles = Vec::with_capacity(spec.count);
        for _ in 0..spec.count {
            inner.next_node += 1;
            let id = NodeId::new(format!("node-{}", inner.next_node));
            inner.nodes.insert(
                id.clone(),
                MockNode {
                    running: true,
                    sink: None,
                },
            );
            handles.push(NodeHandle {
                id,
                endpoint: endpoint.cloned(),
            });
        }
        Ok(handles)
    }

    async fn shutdown_node(&self, node: &NodeHandle) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .nodes
            .get_mut(&node.id)
            .ok_or_else(|| PlatformError::UnknownNode(node.id.clone()))?;
        if !state.running {
            return Ok(());
        }
        state.running = false;
        state.sink = None;
        inner.shutdowns.push(node.id.clone());

        // Agents leave the swarm with their node.
        let inner = &mut *inner;
        inner.agents.retain(|_, host| *host != node.id);
        let agents = &inner.agents;
        inner.chatters.retain(|(key, _)| agents.contains_key(key));
        Ok(())
    }

    async fn install_app(
        &self,
        node: &NodeHandle,
        _app: &AppSource,
        instances: usize,
    ) -> Result<Vec<Agent>, PlatformError> {
        let mut inner = self.inner.lock().unwrap();
        inner.running_node(&node.id)?;

        if let Some(reason) = inner.install_failure.clone() {
            return Err(PlatformError::Install {
                node: node.id.clone(),
                reason,
            });
        }

        let mut agents = Vec::with_capacity(instances);
        for i in 0..instances {
            let key = AgentKey::random();
            inner.agents.insert(key.clone(), node.id.clone());
            agents.push(Agent {
                key,
                node: node.id.clone(),
                app_id: format!("chat-{}", i),
                cell: format!("{}/cell-{}", node.id, i),
            });
        }
        Ok(agents)
    }

    async fn call(
        &self,
        agent: &Agent,
        op: Operation,
        payload: Value,
    ) -> Result<Value, PlatformError> {
        self.handle_call(agent, op, payload)
    }

    async fn register_signal_handler(
        &self,
        node: &NodeHandle,
        sink: SignalSink,
    ) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock().unwrap();
        inner.running_node(&node.id)?;
        if let Some(state) = inner.nodes.get_mut(&node.id) {
            state.sink = Some(sink);
        }
        Ok(())
    }

    async fn share_peer_info(&self, nodes: &[NodeHandle]) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock().unwrap();
        for node in nodes {
            inner.running_node(&node.id)?;
        }
        inner.peers_shared = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use load_types::chat::{ChannelSpec, ListMessages};

    fn spec(count: usize) -> NodeSpec {
        NodeSpec {
            count,
            network: NetworkConfig::default(),
        }
    }

    async fn one_agent(platform: &MockPlatform) -> (NodeHandle, Agent) {
        let node = platform.create_nodes(&spec(1), None).await.unwrap().remove(0);
        let agent = platform
            .install_app(&node, &AppSource::Path("chat.dna.gz".into()), 1)
            .await
            .unwrap()
            .remove(0);
        (node, agent)
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_and_is_recorded() {
        let platform = MockPlatform::new();
        platform.mark_unreachable("10.0.0.1");

        let endpoint = WorkerEndpoint::new("10.0.0.1");
        let result = platform.create_nodes(&spec(2), Some(&endpoint)).await;
        assert!(matches!(result, Err(PlatformError::Unreachable { .. })));
        assert_eq!(platform.attempted_endpoints(), vec![Some(endpoint)]);
        assert_eq!(platform.nodes_started(), 0);
    }

    #[tokio::test]
    async fn install_yields_requested_agents() {
        let platform = MockPlatform::new();
        let node = platform.create_nodes(&spec(1), None).await.unwrap().remove(0);
        let agents = platform
            .install_app(&node, &AppSource::Path("chat.dna.gz".into()), 3)
            .await
            .unwrap();
        assert_eq!(agents.len(), 3);
        assert!(agents.iter().all(|a| a.node == node.id));
    }

    #[tokio::test]
    async fn injected_call_failure_is_consumed() {
        let platform = MockPlatform::new();
        let (_node, agent) = one_agent(&platform).await;
        platform.fail_next_calls(Operation::RefreshChatter, 1);

        assert!(platform
            .call(&agent, Operation::RefreshChatter, Value::Null)
            .await
            .is_err());
        assert!(platform
            .call(&agent, Operation::RefreshChatter, Value::Null)
            .await
            .is_ok());
        assert_eq!(platform.chatter_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_become_visible_after_gossip_delay() {
        let platform = MockPlatform::new();
        let (_n1, author) = one_agent(&platform).await;
        let (_n2, reader) = one_agent(&platform).await;
        let channel = ChannelSpec::for_trial();

        platform
            .call(
                &author,
                Operation::CreateMessage,
                serde_json::to_value(MessageInput::numbered(0, &channel)).unwrap(),
            )
            .await
            .unwrap();

        let list = serde_json::to_value(ListMessagesInput::first_chunk(&channel)).unwrap();
        let seen = |value: Value| serde_json::from_value::<ListMessages>(value).unwrap().messages.len();

        let own = platform.call(&author, Operation::ListMessages, list.clone()).await.unwrap();
        let other = platform.call(&reader, Operation::ListMessages, list.clone()).await.unwrap();
        assert_eq!(seen(own), 1);
        assert_eq!(seen(other), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let other = platform.call(&reader, Operation::ListMessages, list).await.unwrap();
        assert_eq!(seen(other), 1);
    }

    #[tokio::test]
    async fn shutdown_removes_hosted_chatters() {
        let platform = MockPlatform::new();
        let (old_node, old_agent) = one_agent(&platform).await;
        platform
            .call(&old_agent, Operation::RefreshChatter, Value::Null)
            .await
            .unwrap();
        platform.shutdown_node(&old_node).await.unwrap();
        assert_eq!(platform.chatter_count(), 0);

        let (_node, agent) = one_agent(&platform).await;
        platform
            .call(&agent, Operation::RefreshChatter, Value::Null)
            .await
            .unwrap();
        let stats = platform
            .call(&agent, Operation::AgentStats, Value::Null)
            .await
            .unwrap();
        assert_eq!(stats["agents"], 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_detaches_node() {
        let platform = MockPlatform::new();
        let (node, agent) = one_agent(&platform).await;

        platform.shutdown_node(&node).await.unwrap();
        platform.shutdown_node(&node).await.unwrap();
        assert_eq!(platform.shutdown_nodes(), vec![node.id.clone()]);
        assert_eq!(platform.live_nodes(), 0);
        assert!(platform
            .call(&agent, Operation::AgentStats, Value::Null)
            .await
            .is_err());
    }
}
