use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speaker of a conversational turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A normalized conversational turn
///
/// Immutable once emitted. A later interim message supersedes the previous
/// one in the subscriber's own list; the session never mutates or
/// deduplicates messages after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,

    /// When the message was decoded
    pub timestamp: DateTime<Utc>,

    /// True for a partial transcript superseding a prior interim message
    pub interim: bool,
}

impl VoiceMessage {
    fn new(role: Role, content: String, interim: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            interim,
        }
    }

    pub fn user(content: String) -> Self {
        Self::new(Role::User, content, false)
    }

    pub fn assistant(content: String) -> Self {
        Self::new(Role::Assistant, content, false)
    }

    pub fn interim_assistant(content: String) -> Self {
        Self::new(Role::Assistant, content, true)
    }
}

/// Events the session emits to the hosting UI layer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Socket open and handshake sent
    Connected,
    /// Session torn down, by either side
    Disconnected,
    /// Finalized user or assistant message
    Message(VoiceMessage),
    /// Partial assistant transcript
    InterimMessage(VoiceMessage),
    /// Assistant text about to be rendered as speech
    Speaking(String),
    /// Energy of one processed audio chunk, for waveform display
    Rms(f32),
    /// Utterance recording started (fallback path)
    RecordingStarted,
    /// Utterance recording stopped and uploaded
    RecordingStopped,
    /// Transport or protocol failure; the session stays usable
    Error(String),
    /// Reconnection budget exhausted; a fresh connect() is still accepted
    ReconnectionFailed,
    /// Opaque metadata frame from the service
    ChatMetadata(serde_json::Value),
}
