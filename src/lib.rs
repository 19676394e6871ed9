pub mod audio;
pub mod config;
pub mod session;
pub mod wire;

pub use audio::{
    decode_pcm16, downsample, encode_pcm16, rms, CaptureBlock, CaptureSource, CpalSource,
    FrameChunker, ScriptedSource, UtteranceRecorder,
};
pub use config::Config;
pub use session::{Role, SessionConfig, SessionEvent, TurnCommand, TurnTaking, VoiceMessage, VoiceSession};
pub use wire::{AudioFormat, ClientFrame, FrameDecoder, ServerEvent, VoiceSocket};
