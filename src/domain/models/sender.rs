use serde_derive::Deserialize;
use serde_derive::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    /// Parses the sender field of a stored message. The history resource
    /// labels model output as `llm` or `ai` depending on the server version,
    /// so anything that isn't the user is treated as the assistant.
    pub fn parse(text: &str) -> Sender {
        if text.trim().eq_ignore_ascii_case("user") {
            return Sender::User;
        }

        return Sender::Assistant;
    }

    /// Role name used when replaying history to the completion endpoint.
    pub fn role(&self) -> &'static str {
        match self {
            Sender::User => return "user",
            Sender::Assistant => return "assistant",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sender::User => return write!(f, "You"),
            Sender::Assistant => return write!(f, "Assistant"),
        }
    }
}
