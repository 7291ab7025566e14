//! # chatload-types
//!
//! Shared types for the chatload trial orchestrator.
//!
//! - [`AgentKey`], [`ChannelId`], [`MessageId`] - Identity types
//! - [`chat`] - RPC payloads of the chat application under test
//! - [`SignalEvent`] - Push notifications observed on a node
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chat;
mod error;
mod ids;

pub use chat::{Operation, SignalEvent};
pub use error::TypesError;
pub use ids::{AgentKey, ChannelId, MessageId};
