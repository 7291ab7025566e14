//! Concurrent message injection.
//!
//! Message `i` is sent by active agent `i mod K`. Every send is issued before
//! any is awaited and failures never cancel siblings; they are logged and
//! counted in the [`InjectionReport`].

use futures_util::future::join_all;
use load_types::chat::{ChannelData, MessageInput, SignalMessageData};
use serde::Serialize;
use tracing::{debug, warn};

use crate::client::ChatClient;
use crate::platform::{Agent, Platform};
use crate::select::ActiveSet;

/// What happened to one burst of messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InjectionReport {
    /// Messages attempted.
    pub attempted: usize,
    /// Messages committed.
    pub created: usize,
    /// Messages pushed to chatters (signal variant only).
    pub notified: usize,
    /// Sends where creation or notification failed.
    pub failed: usize,
}

enum SendOutcome {
    Created,
    Notified,
    CreateFailed,
    NotifyFailed,
}

/// Fires a burst of messages into the trial channel.
pub struct LoadInjector<'a, P: Platform + ?Sized> {
    platform: &'a P,
    channel: &'a ChannelData,
    notify: bool,
}

impl<'a, P: Platform + ?Sized> LoadInjector<'a, P> {
    /// Create messages only; delivery is left to gossip.
    pub fn without_signal(platform: &'a P, channel: &'a ChannelData) -> Self {
        Self {
            platform,
            channel,
            notify: false,
        }
    }

    /// Follow every creation with `signal_chatters` on the same agent.
    pub fn with_signal(platform: &'a P, channel: &'a ChannelData) -> Self {
        Self {
            platform,
            channel,
            notify: true,
        }
    }

    /// Send `messages` messages round-robin across `active` and wait for all of them.
    pub async fn inject(&self, active: &ActiveSet, messages: usize) -> InjectionReport {
        let agents = active.agents();
        let mut report = InjectionReport {
            attempted: messages,
            ..InjectionReport::default()
        };
        if agents.is_empty() {
            warn!(messages, "no active agents, nothing injected");
            report.failed = messages;
            return report;
        }

        let sends = (0..messages).map(|seq| self.send(seq, &agents[seq % agents.len()]));
        for outcome in join_all(sends).await {
            match outcome {
                SendOutcome::Created => report.created += 1,
                SendOutcome::Notified => {
                    report.created += 1;
                    report.notified += 1;
                }
                SendOutcome::CreateFailed => report.failed += 1,
                SendOutcome::NotifyFailed => {
                    report.created += 1;
                    report.failed += 1;
                }
            }
        }

        debug!(
            attempted = report.attempted,
            created = report.created,
            notified = report.notified,
            failed = report.failed,
            "injection finished"
        );
        report
    }

    async fn send(&self, seq: usize, agent: &Agent) -> SendOutcome {
        let client = ChatClient::new(self.platform, agent);
        let input = MessageInput::numbered(seq, &self.channel.channel);

        let created = match client.create_message(&input).await {
            Ok(created) => created,
            Err(e) => {
                warn!(seq, agent = %agent.key, "create_message failed: {}", e);
                return SendOutcome::CreateFailed;
            }
        };
        if !self.notify {
            return SendOutcome::Created;
        }

        let data = SignalMessageData {
            message_data: created,
            channel_data: self.channel.clone(),
        };
        match client.signal_chatters(&data).await {
            Ok(_) => SendOutcome::Notified,
            Err(e) => {
                warn!(seq, agent = %agent.key, "signal_chatters failed: {}", e);
                SendOutcome::NotifyFailed
            }
        }
    }
}
