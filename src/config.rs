use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::session::SessionConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub voice: VoiceServiceConfig,
    pub audio: AudioSettings,
    pub turn: TurnSettings,
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct VoiceServiceConfig {
    /// WebSocket endpoint of the voice service
    pub endpoint: String,
    /// API key; usually supplied via SERENO__VOICE__API_KEY instead of the file
    #[serde(default)]
    pub api_key: String,
    /// Selected voice configuration id
    pub config_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct TurnSettings {
    /// RMS energy above which a chunk counts as speech
    pub speech_threshold: f32,
    /// Silence duration before the assistant is resumed, in milliseconds
    pub silence_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReconnectSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SERENO").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Session configuration derived from the loaded settings
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.voice.endpoint.clone(),
            api_key: self.voice.api_key.clone(),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            chunk_ms: self.audio.chunk_ms,
            max_reconnect_attempts: self.reconnect.max_attempts,
            reconnect_base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            speech_threshold: self.turn.speech_threshold,
            silence_window: Duration::from_millis(self.turn.silence_ms),
            ..SessionConfig::default()
        }
    }
}
