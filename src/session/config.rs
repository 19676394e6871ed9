use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a voice conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "conversation-<uuid>")
    pub session_id: String,

    /// Voice service WebSocket endpoint
    pub endpoint: String,

    /// API key, embedded as a query parameter on the connection URI
    pub api_key: String,

    /// Target sample rate for outbound audio (the service expects 16kHz)
    pub sample_rate: u32,

    /// Number of audio channels (the service expects mono)
    pub channels: u16,

    /// Duration of each outbound audio chunk in milliseconds
    pub chunk_ms: u64,

    /// Maximum reconnection attempts after a non-normal close
    pub max_reconnect_attempts: u32,

    /// Base delay for linear reconnect backoff (attempt N waits N * base)
    pub reconnect_base_delay: Duration,

    /// RMS energy above which a chunk counts as local speech
    pub speech_threshold: f32,

    /// Silence duration after which the assistant is resumed
    pub silence_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("conversation-{}", uuid::Uuid::new_v4()),
            endpoint: "wss://localhost:9443/v1/voice".to_string(),
            api_key: String::new(),
            sample_rate: 16000,
            channels: 1,
            chunk_ms: 100, // ~10 frames/sec
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_secs(1),
            speech_threshold: 0.015,
            silence_window: Duration::from_millis(800),
        }
    }
}
