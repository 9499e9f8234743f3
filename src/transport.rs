//! Voice transport contract
//!
//! The real-time voice session itself is an external collaborator; this
//! module only fixes the contract the session bridge relies on: start a
//! session from an opaque assistant payload, receive the session's event
//! stream, and stop it on demand.
//!
//! `scripted` provides a replay implementation used by the `simulate` CLI
//! command and by tests.

use crate::protocol::TransportEvent;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

mod scripted;

pub use scripted::{ScriptedStep, ScriptedTransport};

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport connection error: {0}")]
    Connection(String),
    #[error("Session start rejected: {0}")]
    Rejected(String),
    #[error("Transport serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A confirmed session: its correlation id plus the serial event stream.
///
/// The transport delivers events in order on this channel; dropping the
/// receiver is how a consumer walks away from a dead session.
pub struct StartedSession {
    pub call_id: String,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Start/stop/event-stream contract with the voice session vendor.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Request a new session using the opaque agent configuration.
    async fn start(
        &self,
        assistant: &serde_json::Value,
    ) -> Result<StartedSession, TransportError>;

    /// Request termination of the current session.
    async fn stop(&self) -> Result<(), TransportError>;
}

/// Builds a transport client from a public key credential.
///
/// The bridge constructs its client lazily, once a key arrives with the
/// activation configuration.
pub type TransportFactory = Arc<dyn Fn(&str) -> Arc<dyn VoiceTransport> + Send + Sync>;
