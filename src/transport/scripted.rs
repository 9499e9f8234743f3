//! Scripted replay transport
//!
//! Replays a fixed event list with per-step delays, standing in for the
//! vendor SDK in the `simulate` command and in tests. Stop requests are
//! counted so tests can assert teardown happened exactly once.

use crate::protocol::TransportEvent;
use crate::transport::{StartedSession, TransportError, VoiceTransport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One step of a scripted call: wait, then emit.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScriptedStep {
    #[serde(default)]
    pub delay_ms: u64,
    pub event: TransportEvent,
}

impl ScriptedStep {
    pub fn new(delay_ms: u64, event: TransportEvent) -> Self {
        Self { delay_ms, event }
    }
}

pub struct ScriptedTransport {
    steps: Vec<ScriptedStep>,
    /// Set when start is asked to fail instead of producing a session.
    reject_with: Option<String>,
    replay: Mutex<Option<CancellationToken>>,
    stop_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps,
            reject_with: None,
            replay: Mutex::new(None),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// A transport whose start call always rejects, for failure paths.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            reject_with: Some(reason.into()),
            replay: Mutex::new(None),
            stop_calls: AtomicUsize::new(0),
        }
    }

    /// How many times stop has been requested on this transport.
    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn cancel_replay(&self) {
        if let Ok(mut replay) = self.replay.lock()
            && let Some(token) = replay.take()
        {
            token.cancel();
        }
    }
}

#[async_trait]
impl VoiceTransport for ScriptedTransport {
    async fn start(
        &self,
        _assistant: &serde_json::Value,
    ) -> Result<StartedSession, TransportError> {
        if let Some(reason) = &self.reject_with {
            return Err(TransportError::Rejected(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let steps = self.steps.clone();

        let replay_token = token.clone();
        tokio::spawn(async move {
            for step in steps {
                if step.delay_ms > 0 {
                    tokio::select! {
                        _ = replay_token.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_millis(step.delay_ms)) => {}
                    }
                }
                if replay_token.is_cancelled() || tx.send(step.event).is_err() {
                    return;
                }
            }
        });

        if let Ok(mut replay) = self.replay.lock() {
            // A previous replay, if any, dies with its receiver.
            if let Some(old) = replay.replace(token) {
                old.cancel();
            }
        }

        Ok(StartedSession {
            call_id: format!("call_{}", Uuid::new_v4().simple()),
            events: rx,
        })
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel_replay();
        Ok(())
    }
}
