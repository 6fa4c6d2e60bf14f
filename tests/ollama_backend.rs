//! Integration tests for the Ollama adapter against a mock server

use modelpool::backends::{BackendClient, SharedClient, create_client};
use modelpool::clock::system_clock;
use modelpool::config::{BackendType, Endpoint, TimeoutsConfig};
use modelpool::error::BackendError;
use modelpool::types::{ChatMessage, EmbedRequest, InferenceRequest};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ollama(server: &MockServer) -> SharedClient {
    let endpoint = Endpoint::new(server.uri(), BackendType::Ollama).with_name("ollama-test");
    create_client(&endpoint, &TimeoutsConfig::default(), system_clock())
        .expect("should build ollama client")
}

#[tokio::test]
async fn test_generate_sends_prompt_with_default_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "llama3.2:1b",
            "prompt": "Why is the sky blue?",
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.2:1b",
            "response": "Rayleigh scattering.",
            "done": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ollama(&server);
    let response = client
        .generate(&InferenceRequest::prompt("Why is the sky blue?"))
        .await
        .unwrap();

    assert_eq!(response.content(), "Rayleigh scattering.");
    assert_eq!(response.model, "llama3.2:1b");
    assert!(response.done);
    assert_eq!(client.state().total_requests(), 1);
    assert_eq!(client.state().active_requests(), 0);
}

#[tokio::test]
async fn test_chat_sends_messages_and_requested_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "qwen2.5:3b",
            "messages": [{"role": "user", "content": "hi"}],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "qwen2.5:3b",
            "message": {"role": "assistant", "content": "hello there"},
            "done": true,
        })))
        .mount(&server)
        .await;

    let request =
        InferenceRequest::messages(vec![ChatMessage::user("hi")]).with_model("qwen2.5:3b");
    let response = ollama(&server).chat(&request).await.unwrap();

    assert_eq!(response.content(), "hello there");
    assert_eq!(response.model, "qwen2.5:3b");
}

#[tokio::test]
async fn test_chat_stream_forwards_ndjson_chunks() {
    let server = MockServer::start().await;
    let body = [
        r#"{"model":"llama3.2:1b","message":{"role":"assistant","content":"Hel"},"done":false}"#,
        r#"{"model":"llama3.2:1b","message":{"role":"assistant","content":"lo"},"done":false}"#,
        r#"{"model":"llama3.2:1b","message":{"role":"assistant","content":""},"done":true}"#,
    ]
    .join("\n");
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "application/x-ndjson"),
        )
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::channel(16);
    let response = ollama(&server)
        .chat_stream(&InferenceRequest::prompt("hi"), tx)
        .await
        .unwrap();

    assert_eq!(response.content(), "Hello");
    assert!(response.done);

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    let contents: Vec<_> = chunks.iter().map(|c| c.content()).collect();
    assert_eq!(contents, ["Hel", "lo", "Hello"]);
    assert!(!chunks[0].done);
    assert!(chunks[2].done);
}

#[tokio::test]
async fn test_error_status_is_retryable_with_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": "model runner crashed"})),
        )
        .mount(&server)
        .await;

    let client = ollama(&server);
    let err = client
        .generate(&InferenceRequest::prompt("hi"))
        .await
        .unwrap_err();

    match &err {
        BackendError::Status {
            status, message, ..
        } => {
            assert_eq!(*status, 500);
            assert_eq!(message, "model runner crashed");
        }
        other => panic!("expected status error, got {:?}", other),
    }
    assert!(err.is_retryable());

    let status = client.state().processing_status();
    assert_eq!(status.history.len(), 1);
    assert!(!status.history[0].success);
}

#[tokio::test]
async fn test_null_body_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;

    let err = ollama(&server)
        .generate(&InferenceRequest::prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Normalize(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_catalog_and_running_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {
                    "name": "llama3.2:1b",
                    "size": 1321098329u64,
                    "modified_at": "2024-10-01T10:00:00Z",
                    "details": {"family": "llama", "format": "gguf", "parameter_size": "1.2B"}
                },
                {"model": "phi3:mini"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3.2:1b"}]
        })))
        .mount(&server)
        .await;

    let client = ollama(&server);
    let models = client.list_models().await.unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].family.as_deref(), Some("llama"));
    assert_eq!(models[0].parameter_size.as_deref(), Some("1.2B"));
    assert_eq!(models[1].name, "phi3:mini");

    let running = client.refresh_running_models().await.unwrap();
    assert_eq!(running, ["llama3.2:1b"]);
    assert_eq!(client.state().running_models(), running);
    assert_eq!(client.load_score(), 1);
}

#[tokio::test]
async fn test_health_reads_version_and_running_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "0.5.7"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "a"}, {"name": "b"}]
        })))
        .mount(&server)
        .await;

    let health = ollama(&server).get_health().await.unwrap();
    assert_eq!(health.version, "0.5.7");
    assert_eq!(health.running_models, 2);
}

#[tokio::test]
async fn test_health_fails_when_server_is_gone() {
    let server = MockServer::start().await;
    let client = ollama(&server);
    drop(server);

    let err = client.get_health().await.unwrap_err();
    assert!(matches!(err, BackendError::Transport { .. }));
}

#[tokio::test]
async fn test_model_management_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/delete"))
        .and(body_partial_json(json!({"model": "old:latest"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/copy"))
        .and(body_partial_json(json!({"source": "a", "destination": "b"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .and(body_partial_json(json!({"model": "phi3", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [[0.5, -0.25]]
        })))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/api/blobs/sha256:missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = ollama(&server);
    client.delete_model("old:latest").await.unwrap();
    client.copy_model("a", "b").await.unwrap();
    assert_eq!(client.pull_model("phi3").await.unwrap().status, "success");

    let embed = EmbedRequest {
        model: "nomic-embed-text".to_string(),
        input: vec!["hello".to_string()],
    };
    assert_eq!(client.embed(&embed).await.unwrap(), vec![vec![0.5, -0.25]]);
    assert!(!client.blob_exists("sha256:missing").await.unwrap());
}
