use super::HistoryMessage;
use super::ModelRef;
use super::SubmissionRequest;
use crate::domain::models::Message;
use crate::domain::models::Sender;

#[test]
fn it_requires_a_model_name() {
    assert!(!ModelRef::default().is_selected());
    assert!(!ModelRef::new("ollama", "  ").is_selected());
    assert!(ModelRef::new("ollama", "llama3").is_selected());
}

#[test]
fn it_builds_history_from_finalized_messages() {
    let mut placeholder = Message::placeholder();
    placeholder.content = "partial".to_string();

    let messages = vec![
        Message::new(Sender::User, "Hello"),
        Message::new(Sender::Assistant, "Hi!"),
        Message::new(Sender::Assistant, ""),
        placeholder,
    ];

    let history = HistoryMessage::from_messages(&messages);
    assert_eq!(
        history,
        vec![
            HistoryMessage {
                role: "user".to_string(),
                content: "Hello".to_string(),
            },
            HistoryMessage {
                role: "assistant".to_string(),
                content: "Hi!".to_string(),
            },
        ]
    );
}

#[test]
fn it_serializes_the_payload() -> anyhow::Result<()> {
    let mut model = ModelRef::new("ollama", "llama3");
    model.server_id = "srv_1".to_string();
    model.settings_id = "ollama_servers_settings".to_string();

    let mut request = SubmissionRequest::new("Hello", model);
    request.user_id = "current".to_string();
    request.conversation_id = Some("conv_1".to_string());
    request.history = vec![HistoryMessage {
        role: "assistant".to_string(),
        content: "How can I help?".to_string(),
    }];

    let body = serde_json::to_string(&request.payload())?;
    insta::assert_snapshot!(body, @r###"{"provider":"ollama","settings_id":"ollama_servers_settings","server_id":"srv_1","model":"llama3","messages":[{"role":"assistant","content":"How can I help?"},{"role":"user","content":"Hello"}],"params":{"temperature":0.7,"max_tokens":2048},"stream":true,"user_id":"current","conversation_id":"conv_1","conversation_type":"chat"}"###);

    return Ok(());
}
