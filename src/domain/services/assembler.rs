#[cfg(test)]
#[path = "assembler_test.rs"]
mod tests;

use serde_json::Value;

use crate::domain::models::AssembledFragment;
use crate::domain::models::ChatError;

const FRAME_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";
const IGNORED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// JSON pointers searched in order for streamed text. The upstream payload
/// shape depends on the provider behind the backend, so several layouts are
/// tried before giving up.
pub const DEFAULT_TEXT_PATHS: [&str; 9] = [
    "/choices/0/delta/content",
    "/choices/0/message/content",
    "/choices/0/text",
    "/response",
    "/text",
    "/content",
    "/message/content",
    "/delta/content",
    "/data/text",
];

pub const DEFAULT_CONVERSATION_ID_PATHS: [&str; 4] = [
    "/conversation_id",
    "/conversationId",
    "/data/conversation_id",
    "/metadata/conversation_id",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPaths {
    pub text: Vec<String>,
    pub conversation_id: Vec<String>,
}

impl Default for KeyPaths {
    fn default() -> KeyPaths {
        return KeyPaths {
            text: DEFAULT_TEXT_PATHS.iter().map(|e| return e.to_string()).collect(),
            conversation_id: DEFAULT_CONVERSATION_ID_PATHS
                .iter()
                .map(|e| return e.to_string())
                .collect(),
        };
    }
}

/// Strips transport framing from a raw line. Returns `None` for blank lines,
/// heartbeats, and event-stream fields that carry no payload.
fn unframe(raw: &str) -> Option<&str> {
    let mut cleaned = raw.trim();
    if cleaned.is_empty() || cleaned.starts_with(':') {
        return None;
    }
    if IGNORED_FIELDS
        .iter()
        .any(|field| return cleaned.starts_with(field))
    {
        return None;
    }
    if let Some(stripped) = cleaned.strip_prefix(FRAME_PREFIX) {
        cleaned = stripped.trim();
    }
    if cleaned.is_empty() {
        return None;
    }

    return Some(cleaned);
}

fn parse_fragment(text: &str) -> Result<Value, ChatError> {
    return serde_json::from_str::<Value>(text)
        .map_err(|err| return ChatError::MalformedFragment(format!("{err}: {text}")));
}

fn find_string(value: &Value, paths: &[String]) -> Option<String> {
    for path in paths {
        match value.pointer(path) {
            Some(Value::String(text)) if !text.is_empty() => {
                return Some(text.to_string());
            }
            Some(Value::Number(num)) => {
                return Some(num.to_string());
            }
            _ => continue,
        }
    }

    return None;
}

/// Turns raw transport fragments from a single response into display text.
/// One assembler is used per stream.
pub struct ResponseAssembler {
    paths: KeyPaths,
    final_text: String,
    conversation_id_seen: bool,
    done: bool,
}

impl Default for ResponseAssembler {
    fn default() -> ResponseAssembler {
        return ResponseAssembler::new(KeyPaths::default());
    }
}

impl ResponseAssembler {
    pub fn new(paths: KeyPaths) -> ResponseAssembler {
        return ResponseAssembler {
            paths,
            final_text: "".to_string(),
            conversation_id_seen: false,
            done: false,
        };
    }

    pub fn consume_fragment(&mut self, raw: &str) -> AssembledFragment {
        let cleaned = match unframe(raw) {
            Some(cleaned) => cleaned,
            None => return AssembledFragment::default(),
        };

        if cleaned == DONE_SENTINEL {
            self.done = true;
            return AssembledFragment::default();
        }

        let value = match parse_fragment(cleaned) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping fragment");
                return AssembledFragment::default();
            }
        };

        return self.extract_payload(&value);
    }

    /// Pulls text and a conversation id out of an already parsed payload.
    /// Also used for buffered responses.
    pub fn extract_payload(&mut self, value: &Value) -> AssembledFragment {
        let text = match value {
            Value::String(text) if !text.is_empty() => Some(text.to_string()),
            _ => find_string(value, &self.paths.text),
        };
        if let Some(text) = &text {
            self.final_text += text;
        }

        let mut conversation_id = None;
        if !self.conversation_id_seen {
            conversation_id = find_string(value, &self.paths.conversation_id);
            if conversation_id.is_some() {
                self.conversation_id_seen = true;
            }
        }

        return AssembledFragment {
            text,
            conversation_id,
        };
    }

    pub fn final_text(&self) -> &str {
        return &self.final_text;
    }

    pub fn is_done(&self) -> bool {
        return self.done;
    }
}
