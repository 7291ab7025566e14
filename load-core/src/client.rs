//! Typed access to the chat app's entry points.
//!
//! [`ChatClient`] binds one [`Agent`] to a [`Platform`] and turns the
//! platform's untyped `call()` into the handful of typed operations a trial
//! needs.
//!
//! ```text
//! Trial phase → ChatClient → Platform::call → node → chat app
//! ```

use load_types::chat::{
    AgentStats, ChannelData, ChannelSpec, CreateChannelInput, ListMessages, ListMessagesInput,
    MessageData, MessageInput, SignalMessageData,
};
use load_types::Operation;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::platform::{Agent, Platform, PlatformError};

/// Chat operations issued as a single agent.
pub struct ChatClient<'a, P: Platform + ?Sized> {
    platform: &'a P,
    agent: &'a Agent,
}

impl<'a, P: Platform + ?Sized> ChatClient<'a, P> {
    /// Bind `agent` to `platform`.
    pub fn new(platform: &'a P, agent: &'a Agent) -> Self {
        Self { platform, agent }
    }

    async fn invoke<I, O>(&self, op: Operation, input: &I) -> Result<O, PlatformError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let payload = serde_json::to_value(input)?;
        let output = self.platform.call(self.agent, op, payload).await?;
        Ok(serde_json::from_value(output)?)
    }

    /// Create a channel.
    pub async fn create_channel(
        &self,
        input: &CreateChannelInput,
    ) -> Result<ChannelData, PlatformError> {
        self.invoke(Operation::CreateChannel, input).await
    }

    /// Commit one message.
    pub async fn create_message(&self, input: &MessageInput) -> Result<MessageData, PlatformError> {
        self.invoke(Operation::CreateMessage, input).await
    }

    /// Push a created message to every active chatter. The app's reply is
    /// not interpreted.
    pub async fn signal_chatters(&self, data: &SignalMessageData) -> Result<Value, PlatformError> {
        self.invoke(Operation::SignalChatters, data).await
    }

    /// Number of messages in the first chunk of `channel` visible to this agent.
    pub async fn message_count(&self, channel: &ChannelSpec) -> Result<usize, PlatformError> {
        let listed: ListMessages = self
            .invoke(Operation::ListMessages, &ListMessagesInput::first_chunk(channel))
            .await?;
        Ok(listed.messages.len())
    }

    /// Chatter counts as seen by this agent.
    pub async fn agent_stats(&self) -> Result<AgentStats, PlatformError> {
        self.invoke(Operation::AgentStats, &()).await
    }

    /// Announce this agent as an active chatter.
    pub async fn refresh_chatter(&self) -> Result<(), PlatformError> {
        let _: Value = self.invoke(Operation::RefreshChatter, &()).await?;
        Ok(())
    }
}
