//! Voice conversation session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - The socket connection and handshake with the voice service
//! - Bounded reconnection after connection loss
//! - Microphone streaming (chunking, downsampling, transmission)
//! - Turn-taking between the user and the assistant
//! - Event fan-out to the hosting UI layer

mod config;
pub mod events;
mod session;
mod turn;

pub use config::SessionConfig;
pub use events::{Role, SessionEvent, VoiceMessage};
pub use session::VoiceSession;
pub use turn::{TurnCommand, TurnTaking};
