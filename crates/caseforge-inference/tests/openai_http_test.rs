//! HTTP-level behaviour of the OpenAI-compatible backend against a stub server.

#![cfg(feature = "openai")]

use caseforge_core::{EmbeddingBackend, Error, GenerationBackend};
use caseforge_inference::openai::{OpenAIBackend, OpenAIConfig};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> OpenAIBackend {
    OpenAIBackend::new(OpenAIConfig {
        base_url: server.uri(),
        api_key: Some("test-key".to_string()),
        embed_model: "test-embed".to_string(),
        gen_model: "test-gen".to_string(),
        embed_dimension: 2,
        ..OpenAIConfig::default()
    })
}

#[tokio::test]
async fn test_embeddings_sent_with_bearer_and_reordered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"embedding": [0.3, 0.4], "index": 1},
                {"embedding": [0.1, 0.2], "index": 0}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vectors = backend(&server)
        .embed_texts(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors[0].as_slice(), &[0.1, 0.2]);
    assert_eq!(vectors[1].as_slice(), &[0.3, 0.4]);
}

#[tokio::test]
async fn test_rate_limit_error_body_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": {"message": "Rate limit reached", "type": "rate_limit_exceeded"}
        })))
        .mount(&server)
        .await;

    let err = backend(&server).generate("hi").await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("Rate limit reached"));
}

#[tokio::test]
async fn test_auth_error_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": {"message": "Incorrect API key", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .embed_texts(&["x".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermanentService(_)));
}

#[tokio::test]
async fn test_chat_completion_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "[]"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let content = backend(&server)
        .generate_with_system("system", "prompt")
        .await
        .unwrap();
    assert_eq!(content, "[]");
}

#[tokio::test]
async fn test_empty_choices_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
        .mount(&server)
        .await;

    let err = backend(&server).generate("hi").await.unwrap_err();
    assert!(matches!(err, Error::PermanentService(_)));
}
