/// An OpenAI style streaming chunk carrying `text`, framed as a server-sent
/// event line.
pub fn delta_fragment(text: &str) -> String {
    let payload = serde_json::json!({
        "choices": [{ "delta": { "content": text } }]
    });

    return format!("data: {payload}");
}

/// A chunk that carries both a conversation id and text, the way the backend
/// announces a newly created conversation.
pub fn conversation_fragment(conversation_id: &str, text: &str) -> String {
    let payload = serde_json::json!({
        "conversation_id": conversation_id,
        "choices": [{ "delta": { "content": text } }]
    });

    return format!("data: {payload}");
}

pub fn done_fragment() -> String {
    return "data: [DONE]".to_string();
}

/// Joins fragments into a full event-stream response body.
pub fn sse_body(fragments: &[String]) -> String {
    return fragments
        .iter()
        .map(|fragment| return format!("{fragment}\n\n"))
        .collect::<Vec<String>>()
        .join("");
}
