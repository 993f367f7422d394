//! HTTP-level tests for the OpenRouter provider against a mockito server

use mockito::Matcher;
use netsage_provider::{ChatParams, Message, OpenRouterProvider, Provider, ProviderError};

fn provider(server: &mockito::ServerGuard) -> OpenRouterProvider {
    OpenRouterProvider::new("test-key", Some(server.url()), Some("test/model".to_string()))
}

#[tokio::test]
async fn test_chat_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJsonString(
            r#"{"model":"test/model"}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"content":"Final Answer: fine"},"finish_reason":"stop"}]}"#)
        .create_async()
        .await;

    let params = ChatParams {
        messages: vec![Message::user("status?")],
        ..Default::default()
    };
    let response = provider(&server).chat(params).await.unwrap();

    assert_eq!(response.content.as_deref(), Some("Final Answer: fine"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_chat_api_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":{"message":"bad model"}}"#)
        .create_async()
        .await;

    let result = provider(&server).chat(ChatParams::default()).await;
    match result {
        Err(ProviderError::Api(msg)) => assert!(msg.contains("bad model")),
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_chat_rate_limited() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body("{}")
        .create_async()
        .await;

    let result = provider(&server).chat(ChatParams::default()).await;
    assert!(matches!(result, Err(ProviderError::RateLimited)));
}

#[tokio::test]
async fn test_chat_without_key() {
    let provider = OpenRouterProvider::new("", None, None);
    let result = provider.chat(ChatParams::default()).await;
    assert!(matches!(result, Err(ProviderError::NoApiKey)));
}
