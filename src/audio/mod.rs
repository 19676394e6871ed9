pub mod capture;
pub mod chunker;
pub mod recorder;

pub use capture::{CaptureBlock, CaptureSource, CpalSource, ScriptedSource};
pub use chunker::{decode_pcm16, downsample, encode_pcm16, rms, FrameChunker};
pub use recorder::UtteranceRecorder;
