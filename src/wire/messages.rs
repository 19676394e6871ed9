use base64::Engine;
use serde::{Deserialize, Serialize};

/// Audio format block of the `session_settings` handshake frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Outbound frames sent to the voice service
///
/// The `type` field on the wire drives dispatch on the remote side, so the
/// enum is internally tagged with snake_case variant names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Configuration handshake, sent once immediately after connect
    SessionSettings {
        config_id: String,
        audio: AudioFormat,
    },
    /// Seed text injected as assistant speech (system prompt)
    AssistantInput { text: String },
    /// One chunk of base64-encoded PCM16LE audio (~100ms)
    AudioInput {
        data: String,
        encoding: String,
        sample_rate: u32,
        channels: u16,
    },
    /// Typed user text (fallback for environments without audio capture)
    UserInput { text: String },
    PauseAssistantMessage,
    ResumeAssistantMessage,
}

impl ClientFrame {
    pub fn session_settings(config_id: &str, sample_rate: u32, channels: u16) -> Self {
        Self::SessionSettings {
            config_id: config_id.to_string(),
            audio: AudioFormat {
                encoding: "linear16".to_string(),
                sample_rate,
                channels,
            },
        }
    }

    /// Build an audio frame from raw PCM bytes
    pub fn audio_input(pcm_bytes: &[u8], sample_rate: u32, channels: u16) -> Self {
        Self::AudioInput {
            data: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
            encoding: "linear16".to_string(),
            sample_rate,
            channels,
        }
    }
}
