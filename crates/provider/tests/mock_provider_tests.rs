//! Mock Provider Tests
//!
//! The Provider trait is mocked with mockall the same way the agent crate
//! fakes its reasoning backend.

use async_trait::async_trait;
use mockall::mock;
use netsage_provider::{ChatParams, ChatResponse, Message, Provider, ProviderError};
use serde_json::json;

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

#[tokio::test]
async fn test_mock_provider_chat_returns_text() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Ok(ChatResponse::text("Final Answer: S6 is up")));

    let response = mock.chat(ChatParams::default()).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("Final Answer: S6 is up"));
    assert!(!response.has_tool_calls());
}

#[tokio::test]
async fn test_mock_provider_receives_transcript_message() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .withf(|params| {
            params.messages.len() == 2 && params.messages[1].content.contains("device S6")
        })
        .times(1)
        .returning(|_| Ok(ChatResponse::tool_call("telemetry_nl", json!({"query": "S6"}))));

    let params = ChatParams {
        messages: vec![
            Message::system("You are a network assistant"),
            Message::user("Question: tell me about device S6"),
        ],
        ..Default::default()
    };

    let response = mock.chat(params).await.unwrap();
    assert_eq!(response.tool_calls[0].name, "telemetry_nl");
}

#[tokio::test]
async fn test_mock_provider_errors() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Err(ProviderError::RateLimited));

    let result = mock.chat(ChatParams::default()).await;
    assert!(matches!(result, Err(ProviderError::RateLimited)));
}

#[test]
fn test_mock_provider_configuration() {
    let mut mock = MockProvider::new();
    mock.expect_is_configured().returning(|| false);
    mock.expect_default_model().returning(|| "mock-model".to_string());

    assert!(!mock.is_configured());
    assert_eq!(mock.default_model(), "mock-model");
}
