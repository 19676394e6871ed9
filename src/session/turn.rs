// Energy-based turn-taking
//
// The voice service is full-duplex: it keeps talking over the user unless
// told to pause. This controller approximates natural turn-taking with a
// purely local heuristic: one energy threshold to detect the user speaking,
// one silence timer to hand the turn back. It sees every processed audio
// chunk (~10/sec), so resume latency is bounded by the silence window plus
// one chunk period.

use std::time::{Duration, Instant};

/// Command to send over the wire when the turn changes hands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnCommand {
    PauseAssistant,
    ResumeAssistant,
}

/// Two-state pause/resume controller
///
/// Invariant: `paused` is true exactly when a pause command has been issued
/// more recently than any resume command.
pub struct TurnTaking {
    speech_threshold: f32,
    silence_window: Duration,
    paused: bool,
    last_speech: Option<Instant>,
}

impl TurnTaking {
    pub fn new(speech_threshold: f32, silence_window: Duration) -> Self {
        Self {
            speech_threshold,
            silence_window,
            paused: false,
            last_speech: None,
        }
    }

    /// Feed one chunk's RMS energy; returns a command when the turn flips
    ///
    /// The caller supplies the clock so the hysteresis is testable without
    /// real waiting.
    pub fn on_chunk(&mut self, rms: f32, now: Instant) -> Option<TurnCommand> {
        if rms > self.speech_threshold {
            self.last_speech = Some(now);

            if !self.paused {
                self.paused = true;
                return Some(TurnCommand::PauseAssistant);
            }

            return None;
        }

        if self.paused {
            if let Some(last) = self.last_speech {
                if now.duration_since(last) >= self.silence_window {
                    self.paused = false;
                    return Some(TurnCommand::ResumeAssistant);
                }
            }
        }

        None
    }

    /// Sync state after a manual pause/resume sent outside the VAD path
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused {
            self.last_speech = None;
        }
    }

    /// Back to the default assistant-speaking state (used on connect)
    pub fn reset(&mut self) {
        self.paused = false;
        self.last_speech = None;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}
