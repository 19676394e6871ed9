// Inbound frame decoding for the voice service
//
// The service's message schema is not stable across message types: text can
// arrive as a bare string, under a `text` field, inside a `message` object,
// or nested one level deeper. Rather than bespoke parsing per type, a single
// recursive extractor pulls the first non-empty text out of any candidate
// value, and an ordered dispatch table maps each frame to at most one
// domain event.

use serde_json::Value;
use tracing::debug;

use crate::session::events::{Role, VoiceMessage};

/// One decoded domain event per inbound frame
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Opaque chat metadata passthrough
    ChatMetadata(Value),
    /// Finalized user or assistant message
    Message(VoiceMessage),
    /// Partial assistant transcript; supersedes the previous interim in the UI
    Interim(VoiceMessage),
    /// Explicit error frame from the service
    Error(String),
}

/// Stateful frame decoder
///
/// Holds the seed (system prompt) text sent at connect time so an echoed
/// copy arriving back as assistant speech can be recognized and dropped.
pub struct FrameDecoder {
    seed: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { seed: None }
    }

    /// Record the seed text for echo suppression
    pub fn set_seed(&mut self, text: impl Into<String>) {
        self.seed = Some(text.into());
    }

    pub fn clear_seed(&mut self) {
        self.seed = None;
    }

    /// Decode one raw text frame into at most one domain event
    ///
    /// Frames that parse but match no known shape and carry no text are
    /// dropped silently; many service frames are legitimately non-textual.
    pub fn decode(&mut self, raw: &str) -> Option<ServerEvent> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!("Ignoring unparseable frame: {}", e);
                return None;
            }
        };

        let frame_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // 1. Metadata passthrough
        if frame_type == "chat_metadata" {
            return Some(ServerEvent::ChatMetadata(value));
        }

        let interim = is_interim(&frame_type, &value);
        let role_field = explicit_role(&value);

        // 2. Finalized assistant text
        if !interim
            && !type_suggests_user(&frame_type)
            && (type_suggests_assistant(&frame_type) || role_field == Some(Role::Assistant))
        {
            if let Some(text) = first_text(assistant_candidates(&value)) {
                return self.assistant_event(text);
            }
        }

        // 3. Finalized user text
        if !interim && (type_suggests_user(&frame_type) || role_field == Some(Role::User)) {
            if let Some(text) = first_text(user_candidates(&value)) {
                return Some(ServerEvent::Message(VoiceMessage::user(text)));
            }
        }

        // 4. Interim assistant transcript
        if interim {
            if let Some(text) = first_text(interim_candidates(&value)) {
                return Some(ServerEvent::Interim(VoiceMessage::interim_assistant(text)));
            }
        }

        // 5. Explicit error frame
        if frame_type == "error" {
            let message = value
                .get("message")
                .and_then(extract_text)
                .or_else(|| value.get("error").and_then(extract_text))
                .unwrap_or_else(|| value.to_string());
            return Some(ServerEvent::Error(message));
        }

        // 6. Fallback: any text-shaped candidate, role inferred from the
        // type name or an explicit role field
        let text = first_text(assistant_candidates(&value))
            .or_else(|| first_text(user_candidates(&value)))
            .or_else(|| first_text(interim_candidates(&value)))?;

        if type_suggests_user(&frame_type) || role_field == Some(Role::User) {
            Some(ServerEvent::Message(VoiceMessage::user(text)))
        } else {
            self.assistant_event(text)
        }
    }

    /// Finalized assistant text, subject to seed-echo suppression
    ///
    /// An exact match against the recorded seed is discarded silently and
    /// clears the seed, so an identical later frame is delivered normally.
    fn assistant_event(&mut self, text: String) -> Option<ServerEvent> {
        if self.seed.as_deref() == Some(text.as_str()) {
            debug!("Suppressing echoed seed text ({} chars)", text.len());
            self.seed = None;
            return None;
        }
        Some(ServerEvent::Message(VoiceMessage::assistant(text)))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the first non-empty text out of an arbitrary payload value
///
/// Checked in order: the value itself as a string, its `text` field, the
/// first array element yielding text, then any nested object or array.
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => (!s.is_empty()).then(|| s.clone()),
        Value::Array(items) => items.iter().find_map(extract_text),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("text") {
                if !s.is_empty() {
                    return Some(s.clone());
                }
            }
            map.values()
                .filter(|v| v.is_object() || v.is_array())
                .find_map(extract_text)
        }
        _ => None,
    }
}

fn first_text<'a>(candidates: impl IntoIterator<Item = Option<&'a Value>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find_map(extract_text)
}

fn assistant_candidates(value: &Value) -> [Option<&Value>; 4] {
    [
        value.get("output").and_then(|o| o.get("text")),
        value.get("content"),
        value.get("message").and_then(|m| m.get("content")),
        // `message.text` counts as assistant speech only when the nested
        // role says so
        value
            .get("message")
            .filter(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
            .and_then(|m| m.get("text")),
    ]
}

fn user_candidates(value: &Value) -> [Option<&Value>; 7] {
    [
        value.get("user_input").and_then(|u| u.get("text")),
        value.get("transcript").and_then(|t| t.get("text")),
        value.get("user_transcript").and_then(|t| t.get("text")),
        value.get("transcript"),
        value.get("input_audio_transcription"),
        value.get("user_message").and_then(|m| m.get("content")),
        value.get("message").and_then(|m| m.get("content")),
    ]
}

fn interim_candidates(value: &Value) -> [Option<&Value>; 5] {
    [
        value.get("interim_output"),
        value.get("interim_transcript"),
        value.get("text"),
        value.get("content"),
        value.get("message"),
    ]
}

fn type_suggests_assistant(frame_type: &str) -> bool {
    frame_type.contains("assistant")
        || frame_type.contains("output")
        || frame_type.contains("response")
}

fn type_suggests_user(frame_type: &str) -> bool {
    frame_type.contains("user")
        || frame_type.contains("transcript")
        || frame_type.contains("transcription")
        || frame_type.contains("input")
}

fn is_interim(frame_type: &str, value: &Value) -> bool {
    frame_type.contains("interim")
        || value.get("is_interim").and_then(Value::as_bool) == Some(true)
        || value.get("isInterim").and_then(Value::as_bool) == Some(true)
}

fn explicit_role(value: &Value) -> Option<Role> {
    let role = value
        .get("message")
        .and_then(|m| m.get("role"))
        .or_else(|| value.get("role"))
        .and_then(Value::as_str)?;

    match role {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_text_plain_string() {
        assert_eq!(extract_text(&json!("hello")), Some("hello".to_string()));
        assert_eq!(extract_text(&json!("")), None);
    }

    #[test]
    fn test_extract_text_text_field() {
        assert_eq!(
            extract_text(&json!({"text": "hello"})),
            Some("hello".to_string())
        );
    }

    #[test]
    fn test_extract_text_array_takes_first_nonempty() {
        assert_eq!(
            extract_text(&json!(["", {"text": "second"}])),
            Some("second".to_string())
        );
    }

    #[test]
    fn test_extract_text_nested_object() {
        assert_eq!(
            extract_text(&json!({"segment": {"text": "nested"}})),
            Some("nested".to_string())
        );
    }

    #[test]
    fn test_extract_text_non_textual() {
        assert_eq!(extract_text(&json!(42)), None);
        assert_eq!(extract_text(&json!({"count": 3})), None);
        assert_eq!(extract_text(&json!(null)), None);
    }

    #[test]
    fn test_decode_one_event_per_frame() {
        // A frame matching both assistant and fallback shapes still
        // produces exactly one event
        let mut decoder = FrameDecoder::new();
        let raw = json!({
            "type": "assistant_message",
            "content": "outer",
            "message": {"role": "assistant", "content": "inner"}
        })
        .to_string();

        let event = decoder.decode(&raw);
        match event {
            Some(ServerEvent::Message(msg)) => assert_eq!(msg.content, "outer"),
            other => panic!("expected one message event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_textless_frame_is_silent() {
        let mut decoder = FrameDecoder::new();
        let raw = json!({"type": "audio_output", "data": "AAAA"}).to_string();
        assert!(decoder.decode(&raw).is_none());
    }

    #[test]
    fn test_decode_garbage_is_silent() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode("not json at all").is_none());
    }
}
