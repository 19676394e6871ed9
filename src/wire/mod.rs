pub mod client;
pub mod decode;
pub mod messages;

pub use client::{SocketInput, SocketReader, VoiceSocket};
pub use decode::{extract_text, FrameDecoder, ServerEvent};
pub use messages::{AudioFormat, ClientFrame};
