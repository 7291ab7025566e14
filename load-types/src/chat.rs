//! RPC payloads understood by the chat application under test.
//!
//! Field names and shapes match what the app's entry points deserialize,
//! so these serialize to exactly the JSON the platform forwards.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::{AgentKey, ChannelId, MessageId, TypesError};

/// Name of the app module that exposes the chat entry points.
pub const ZOME_NAME: &str = "chat";

/// Category given to the channel every trial creates.
pub const TRIAL_CHANNEL_CATEGORY: &str = "General";

/// Display name given to the channel every trial creates.
pub const TRIAL_CHANNEL_NAME: &str = "Test Channel";

/// Chat entry points a trial calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Create the shared trial channel
    CreateChannel,
    /// Commit one message to a channel
    CreateMessage,
    /// Push a created message to every active chatter
    SignalChatters,
    /// List messages visible on this agent's replica
    ListMessages,
    /// Count chatters this agent sees as active
    AgentStats,
    /// Announce this agent as an active chatter
    RefreshChatter,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Operation; 6] = [
        Operation::CreateChannel,
        Operation::CreateMessage,
        Operation::SignalChatters,
        Operation::ListMessages,
        Operation::AgentStats,
        Operation::RefreshChatter,
    ];

    /// Entry point name as exported by the app.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateChannel => "create_channel",
            Operation::CreateMessage => "create_message",
            Operation::SignalChatters => "signal_chatters",
            Operation::ListMessages => "list_messages",
            Operation::AgentStats => "agent_stats",
            Operation::RefreshChatter => "refresh_chatter",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| TypesError::UnknownOperation(s.to_string()))
    }
}

/// Channel reference carried by every message (`channel` in the app).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Display category.
    pub category: String,
    /// Generated channel id.
    pub uuid: ChannelId,
}

impl ChannelSpec {
    /// A fresh channel in the trial category.
    pub fn for_trial() -> Self {
        Self {
            category: TRIAL_CHANNEL_CATEGORY.to_string(),
            uuid: ChannelId::new(),
        }
    }
}

/// Input to `create_channel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChannelInput {
    /// Display name.
    pub name: String,
    /// Channel reference.
    pub channel: ChannelSpec,
}

impl CreateChannelInput {
    /// Input for the shared trial channel.
    pub fn for_trial() -> Self {
        Self {
            name: TRIAL_CHANNEL_NAME.to_string(),
            channel: ChannelSpec::for_trial(),
        }
    }
}

/// Output of `create_channel`.
///
/// Only the channel reference is interpreted; everything else the app
/// returns is kept verbatim so it can be echoed back in signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    /// Channel reference.
    pub channel: ChannelSpec,
    /// Remaining fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Predecessor marker for threaded messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastSeen {
    /// No predecessor. Serializes as `{"First": null}`.
    First(()),
    /// Entry hash of the last message seen.
    Message(String),
}

/// Message body (`message` in the app).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Generated message id.
    pub uuid: MessageId,
    /// Text content.
    pub content: String,
}

/// Input to `create_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInput {
    /// Predecessor marker.
    pub last_seen: LastSeen,
    /// Owning channel.
    pub channel: ChannelSpec,
    /// Body.
    pub message: MessageBody,
    /// Time chunk the message is filed under.
    pub chunk: u32,
}

impl MessageInput {
    /// The `seq`th message of a burst, with content `message <seq>`.
    pub fn numbered(seq: usize, channel: &ChannelSpec) -> Self {
        Self {
            last_seen: LastSeen::First(()),
            channel: channel.clone(),
            message: MessageBody {
                uuid: MessageId::new(),
                content: format!("message {}", seq),
            },
            chunk: 0,
        }
    }
}

/// Output of `create_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    /// Body as committed.
    pub message: MessageBody,
    /// Remaining fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Input to `signal_chatters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessageData {
    /// The message just created.
    pub message_data: MessageData,
    /// The channel it belongs to.
    pub channel_data: ChannelData,
}

/// Range of time chunks to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// First chunk (inclusive).
    pub start: u32,
    /// Last chunk (exclusive).
    pub end: u32,
}

/// Input to `list_messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMessagesInput {
    /// Channel to list.
    pub channel: ChannelSpec,
    /// Whether listing also refreshes this agent's chatter status.
    pub active_chatter: bool,
    /// Chunk range.
    pub chunk: Chunk,
}

impl ListMessagesInput {
    /// List the first chunk without touching chatter status.
    pub fn first_chunk(channel: &ChannelSpec) -> Self {
        Self {
            channel: channel.clone(),
            active_chatter: false,
            chunk: Chunk { start: 0, end: 1 },
        }
    }
}

/// Output of `list_messages`. Messages are only counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListMessages {
    /// Visible messages.
    pub messages: Vec<Value>,
}

/// Output of `agent_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    /// Chatters this agent currently sees as active.
    pub agents: usize,
    /// Chatters that posted recently.
    #[serde(default)]
    pub active: usize,
}

/// Signal emitted by the app to the UI of a receiving agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal_name", content = "signal_payload")]
pub enum SignalPayload {
    /// A new message arrived.
    Message(SignalMessageData),
    /// A new channel was created.
    Channel(ChannelData),
}

/// A push notification as observed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// Agent whose app instance emitted the signal.
    pub recipient: AgentKey,
    /// Opaque signal body.
    #[serde(default)]
    pub payload: Value,
}
