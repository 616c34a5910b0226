use std::time::Duration;

use hd_domain::config::{AuthConfig, ProviderConfig, ProviderKind};
use hd_domain::error::Error;
use hd_providers::openai_compat::OpenAiCompatProvider;
use hd_providers::{ChatMessage, ChatRequest, LlmProvider};
use mockito::Matcher;
use serde_json::json;

fn config(base_url: String, kind: ProviderKind) -> ProviderConfig {
    ProviderConfig {
        id: "test".into(),
        kind,
        base_url,
        auth: AuthConfig {
            key: Some("sk-test".into()),
            ..Default::default()
        },
        default_model: Some("gpt-4o-mini".into()),
    }
}

fn request() -> ChatRequest {
    ChatRequest {
        messages: vec![
            ChatMessage::system("You help with media digitization."),
            ChatMessage::user("How much for photo scanning?"),
        ],
        max_tokens: Some(200),
        ..Default::default()
    }
}

#[tokio::test]
async fn chat_sends_bearer_and_model() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "max_tokens": 200,
            "messages": [
                { "role": "system", "content": "You help with media digitization." },
                { "role": "user", "content": "How much for photo scanning?" }
            ]
        })))
        .with_status(200)
        .with_body(
            json!({
                "model": "gpt-4o-mini",
                "choices": [{ "message": { "content": "Scanning starts at $0.39 per photo." } }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let provider = OpenAiCompatProvider::from_config(
        &config(server.url(), ProviderKind::OpenaiCompat),
        Duration::from_secs(5),
    )
    .unwrap();
    let resp = provider.chat(&request()).await.unwrap();
    assert_eq!(resp.content, "Scanning starts at $0.39 per photo.");
    mock.assert_async().await;
}

#[tokio::test]
async fn azure_uses_deployment_url_and_api_key_header() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/openai/deployments/gpt-4o-mini/chat/completions")
        .match_query(Matcher::UrlEncoded("api-version".into(), "2024-10-21".into()))
        .match_header("api-key", "sk-test")
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"hi"}}]}"#)
        .create_async()
        .await;

    let provider = OpenAiCompatProvider::from_config(
        &config(server.url(), ProviderKind::AzureOpenai),
        Duration::from_secs(5),
    )
    .unwrap();
    provider.chat(&request()).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn http_error_keeps_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body("rate limited")
        .create_async()
        .await;

    let provider = OpenAiCompatProvider::from_config(
        &config(server.url(), ProviderKind::OpenaiCompat),
        Duration::from_secs(5),
    )
    .unwrap();
    let err = provider.chat(&request()).await.unwrap_err();
    match err {
        Error::Provider { provider, message } => {
            assert_eq!(provider, "test");
            assert!(message.contains("429"));
            assert!(message.contains("rate limited"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn empty_completion_is_an_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"   "}}]}"#)
        .create_async()
        .await;

    let provider = OpenAiCompatProvider::from_config(
        &config(server.url(), ProviderKind::OpenaiCompat),
        Duration::from_secs(5),
    )
    .unwrap();
    assert!(provider.chat(&request()).await.is_err());
}
