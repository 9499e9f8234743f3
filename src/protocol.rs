use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a single voice session.
///
/// Owned exclusively by the session bridge; transitions are
/// Idle -> Starting -> Active -> Stopping -> Idle, never skipping
/// Stopping on an explicit stop from Active.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Starting => "Connecting",
            SessionState::Active => "In call",
            SessionState::Stopping => "Ending",
        }
    }
}

/// Who produced an utterance on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
}

impl Role {
    /// Map the speaker to the display direction of its transcript line.
    pub fn direction(&self) -> Direction {
        match self {
            Role::Assistant => Direction::Received,
            Role::User => Direction::Sent,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpeechStatus {
    #[default]
    Started,
    Stopped,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptKind {
    Partial,
    Final,
}

/// One finalized utterance, tagged by display direction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLine {
    pub content: String,
    pub direction: Direction,
}

impl TranscriptLine {
    pub fn new(content: impl Into<String>, direction: Direction) -> Self {
        Self {
            content: content.into(),
            direction,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// A mid-call request from the assistant for a named host-side action.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Tool-call form of the same signal; may carry several calls at once.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolCall {
    pub function: ToolFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// Events emitted by the voice transport during a session.
///
/// The transport's wire messages are loosely typed objects distinguished
/// by a `type` string; this closes them into a tagged sum with an
/// `Unknown` variant for forward compatibility.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum TransportEvent {
    /// The assistant started or stopped speaking.
    SpeechUpdate {
        #[serde(default)]
        status: SpeechStatus,
    },
    /// A transcript fragment; only `Final` fragments are rendered.
    Transcript {
        role: Role,
        transcript_type: TranscriptKind,
        transcript: String,
    },
    /// Single function invocation request.
    FunctionCall { function_call: FunctionCall },
    /// Batched tool invocation request.
    ToolCalls { tool_calls: Vec<ToolCall> },
    /// Transport lost its connection.
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Transport failed to establish its connection.
    #[serde(rename = "connect_error")]
    ConnectError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Any event kind this build does not know about.
    #[serde(other)]
    Unknown,
}

impl TransportEvent {
    /// Create a speech-update event (assistant started speaking)
    pub fn speech_started() -> Self {
        TransportEvent::SpeechUpdate {
            status: SpeechStatus::Started,
        }
    }

    /// Create a final transcript event
    pub fn final_transcript(role: Role, text: impl Into<String>) -> Self {
        TransportEvent::Transcript {
            role,
            transcript_type: TranscriptKind::Final,
            transcript: text.into(),
        }
    }

    /// Create a partial transcript event
    pub fn partial_transcript(role: Role, text: impl Into<String>) -> Self {
        TransportEvent::Transcript {
            role,
            transcript_type: TranscriptKind::Partial,
            transcript: text.into(),
        }
    }

    /// Create a function-call event
    pub fn function_call(name: impl Into<String>) -> Self {
        TransportEvent::FunctionCall {
            function_call: FunctionCall {
                name: name.into(),
                parameters: None,
            },
        }
    }

    /// Create a tool-calls event from a list of function names
    pub fn tool_calls<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TransportEvent::ToolCalls {
            tool_calls: names
                .into_iter()
                .map(|name| ToolCall {
                    function: ToolFunction {
                        name: name.into(),
                        arguments: None,
                    },
                })
                .collect(),
        }
    }
}

/// Payload transmitted once a call ends, keyed by the session's call id.
///
/// Collected contact fields are flattened alongside the fixed keys so the
/// receiving endpoint sees `{ call_id, name, email_address, ... }`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PostCallPayload {
    pub call_id: String,
    /// Display name of the character that handled the call.
    pub name: String,
    #[serde(flatten)]
    pub fields: HashMap<String, String>,
}
