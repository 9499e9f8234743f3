//! Session bridge
//!
//! Owns the lifecycle of exactly one voice call and multiplexes the
//! transport's event stream into UI-visible signals: the four-state
//! session lifecycle, the loading indicator, the ordered transcript
//! sequence, and mid-call function-call dispatch.
//!
//! State is single-writer: every transition happens inside this module,
//! under one lock, so the interdependent booleans the widget UI consumes
//! can never desynchronize.

use crate::protocol::{
    PostCallPayload, SessionState, SpeechStatus, TranscriptKind, TranscriptLine, TransportEvent,
};
use crate::report::CallReporter;
use crate::transport::{TransportFactory, VoiceTransport};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Host-side action dispatch for mid-call function/tool calls.
pub type FunctionCallFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Sink for finalized transcript lines, invoked in delivery order.
pub type LineSinkFn = Arc<dyn Fn(TranscriptLine) + Send + Sync>;

/// Accessor for the contact-field snapshot read at call end.
pub type FieldsSnapshotFn = Arc<dyn Fn() -> HashMap<String, String> + Send + Sync>;

/// Injected collaborators of the bridge.
pub struct BridgeHooks {
    pub on_function_call: FunctionCallFn,
    /// Finalized transcript lines are forwarded here for rendering.
    pub lines: Option<LineSinkFn>,
    pub fields_snapshot: FieldsSnapshotFn,
    pub reporter: Arc<dyn CallReporter>,
}

impl Default for BridgeHooks {
    fn default() -> Self {
        Self {
            on_function_call: Arc::new(|_| {}),
            lines: None,
            fields_snapshot: Arc::new(HashMap::new),
            reporter: Arc::new(crate::report::LoggingReporter),
        }
    }
}

#[derive(Clone)]
pub struct SessionBridge {
    inner: Arc<BridgeInner>,
}

struct ClientHandle {
    public_key: String,
    transport: Arc<dyn VoiceTransport>,
}

struct BridgeInner {
    factory: TransportFactory,
    hooks: BridgeHooks,
    client: Mutex<Option<ClientHandle>>,
    state: Mutex<SessionState>,
    loading: AtomicBool,
    call_id: Mutex<Option<String>>,
    character: Mutex<String>,
    transcript: Mutex<Vec<TranscriptLine>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionBridge {
    pub fn new(factory: TransportFactory, hooks: BridgeHooks) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                factory,
                hooks,
                client: Mutex::new(None),
                state: Mutex::new(SessionState::Idle),
                loading: AtomicBool::new(false),
                call_id: Mutex::new(None),
                character: Mutex::new(String::new()),
                transcript: Mutex::new(Vec::new()),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Construct the transport client once a public key is available.
    ///
    /// No-op when already initialized with the same key. Without a key the
    /// bridge stays inert: a valid resting state, not an error.
    pub fn initialize(&self, public_key: &str) {
        if public_key.is_empty() {
            tracing::warn!("no public key in configuration; session bridge stays inert");
            return;
        }
        let Ok(mut client) = self.inner.client.lock() else {
            return;
        };
        if client
            .as_ref()
            .is_some_and(|c| c.public_key == public_key)
        {
            return;
        }
        tracing::info!("constructing voice transport client");
        *client = Some(ClientHandle {
            public_key: public_key.to_string(),
            transport: (self.inner.factory)(public_key),
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.client.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    pub fn state(&self) -> SessionState {
        self.inner
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Idle)
    }

    /// UI loading indicator: true from start request until first speech.
    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    pub fn call_id(&self) -> Option<String> {
        self.inner.call_id.lock().ok().and_then(|c| c.clone())
    }

    /// Snapshot of the transcript sequence, in delivery order.
    pub fn transcript(&self) -> Vec<TranscriptLine> {
        self.inner
            .transcript
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Request a new session with the given opaque agent configuration.
    ///
    /// A start while not Idle is a silent no-op: only one session exists
    /// at a time. A transport rejection clears the loading indicator and
    /// returns the bridge to Idle; no retry is attempted.
    pub async fn start(&self, assistant: &serde_json::Value, character: &str) {
        let transport = {
            let Ok(client) = self.inner.client.lock() else {
                return;
            };
            match client.as_ref() {
                Some(c) => Arc::clone(&c.transport),
                None => {
                    tracing::warn!("start requested before bridge initialization; ignoring");
                    return;
                }
            }
        };

        {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if *state != SessionState::Idle {
                tracing::debug!(state = state.as_str(), "start ignored while session exists");
                return;
            }
            *state = SessionState::Starting;
        }

        self.inner.loading.store(true, Ordering::SeqCst);
        if let Ok(mut name) = self.inner.character.lock() {
            *name = character.to_string();
        }
        tracing::info!(character, "starting voice session");

        let session = match transport.start(assistant).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "voice session failed to start");
                self.inner.loading.store(false, Ordering::SeqCst);
                if let Ok(mut state) = self.inner.state.lock() {
                    *state = SessionState::Idle;
                }
                return;
            }
        };

        // The user may have closed the overlay while the start was in
        // flight; in that case the session is already being torn down and
        // this confirmation is stale.
        {
            let Ok(state) = self.inner.state.lock() else {
                return;
            };
            if *state != SessionState::Starting {
                tracing::debug!("session confirmed after teardown began; dropping");
                return;
            }
        }

        if let Ok(mut call_id) = self.inner.call_id.lock() {
            *call_id = Some(session.call_id.clone());
        }
        tracing::info!(call_id = %session.call_id, "voice session created");

        let inner = Arc::clone(&self.inner);
        let mut events = session.events;
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                inner.handle_event(event);
            }
        });
        if let Ok(mut slot) = self.inner.pump.lock()
            && let Some(old) = slot.replace(pump)
        {
            old.abort();
        }
    }

    /// Request session termination and transmit the post-call data.
    ///
    /// Idempotent from Idle. Always attempts transport teardown, even when
    /// no speech was ever detected. Report delivery is fire-and-forget and
    /// never blocks or reverts the reset to Idle.
    pub async fn stop(&self) {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            match *state {
                SessionState::Idle | SessionState::Stopping => return,
                SessionState::Starting | SessionState::Active => {
                    *state = SessionState::Stopping;
                }
            }
        }
        tracing::info!("stopping voice session");

        let transport = self
            .inner
            .client
            .lock()
            .ok()
            .and_then(|c| c.as_ref().map(|c| Arc::clone(&c.transport)));
        if let Some(transport) = transport
            && let Err(e) = transport.stop().await
        {
            tracing::warn!(error = %e, "transport teardown failed");
        }

        if let Ok(mut pump) = self.inner.pump.lock()
            && let Some(task) = pump.take()
        {
            task.abort();
        }

        // The payload is keyed by the call id; without a confirmed session
        // there is nothing to report against.
        let call_id = self.inner.call_id.lock().ok().and_then(|mut c| c.take());
        match call_id {
            Some(call_id) => {
                let name = self
                    .inner
                    .character
                    .lock()
                    .map(|c| c.clone())
                    .unwrap_or_default();
                let payload = PostCallPayload {
                    call_id,
                    name,
                    fields: (self.inner.hooks.fields_snapshot)(),
                };

                let reporter = Arc::clone(&self.inner.hooks.reporter);
                tokio::spawn(async move {
                    if let Err(e) = reporter.deliver(&payload).await {
                        tracing::warn!(error = %e, "post-call report delivery failed");
                    }
                });
            }
            None => {
                tracing::debug!("session was never confirmed; skipping post-call report");
            }
        }

        if let Ok(mut transcript) = self.inner.transcript.lock() {
            transcript.clear();
        }
        self.inner.loading.store(false, Ordering::SeqCst);
        if let Ok(mut state) = self.inner.state.lock() {
            *state = SessionState::Idle;
        }
    }

    #[cfg(test)]
    pub(crate) fn handle_event(&self, event: TransportEvent) {
        self.inner.handle_event(event);
    }
}

impl BridgeInner {
    /// Classify one inbound transport event and dispatch it.
    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::SpeechUpdate { status } => {
                // Only the first speech signal matters: it confirms the
                // call went live. Later updates (and stop signals) are
                // ignored.
                if status != SpeechStatus::Started {
                    return;
                }
                let Ok(mut state) = self.state.lock() else {
                    return;
                };
                if *state == SessionState::Starting {
                    *state = SessionState::Active;
                    self.loading.store(false, Ordering::SeqCst);
                    tracing::info!("voice session active");
                }
            }
            TransportEvent::Transcript {
                role,
                transcript_type,
                transcript,
            } => {
                if transcript_type != TranscriptKind::Final {
                    return;
                }
                let line = TranscriptLine::new(transcript, role.direction());
                if let Ok(mut lines) = self.transcript.lock() {
                    lines.push(line.clone());
                }
                if let Some(sink) = &self.hooks.lines {
                    sink(line);
                }
            }
            TransportEvent::FunctionCall { function_call } => {
                tracing::debug!(name = %function_call.name, "function call requested");
                (self.hooks.on_function_call)(&function_call.name);
            }
            TransportEvent::ToolCalls { tool_calls } => {
                let mut calls = tool_calls.iter();
                if let Some(first) = calls.next() {
                    tracing::debug!(name = %first.function.name, "tool call requested");
                    (self.hooks.on_function_call)(&first.function.name);
                }
                for skipped in calls {
                    tracing::debug!(name = %skipped.function.name, "extra tool call not acted on");
                }
            }
            TransportEvent::Disconnected { reason } => {
                // State stays stop-driven: teardown happens when the user
                // closes the overlay, not on transport hiccups.
                tracing::warn!(reason = reason.as_deref().unwrap_or("unknown"), "transport disconnected");
            }
            TransportEvent::ConnectError { message } => {
                tracing::warn!(
                    message = message.as_deref().unwrap_or("unknown"),
                    "transport connection error"
                );
            }
            TransportEvent::Unknown => {
                tracing::debug!("ignoring unknown transport event kind");
            }
        }
    }
}
