use super::*;
use std::io::Cursor;

fn stream_from(body: &str) -> ChatStream {
    ChatStream::new(Box::new(Cursor::new(body.as_bytes().to_vec())))
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        embedding_model: "test-embed".to_string(),
        chat_model: "test-chat".to_string(),
        batch_size: 128,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.embedding_model, "test-embed");
    assert_eq!(client.chat_model(), "test-chat");
    assert_eq!(client.model_id(), "test-embed");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry_attempts, 5);

    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1, "at least one attempt is always made");
}

#[test]
fn empty_batch_skips_network() {
    let client = OllamaClient::new(&OllamaConfig {
        host: "unreachable.invalid".to_string(),
        ..OllamaConfig::default()
    })
    .expect("Failed to create client");

    let embeddings = client
        .generate_embeddings_batch(&[])
        .expect("empty batch should not call the server");
    assert!(embeddings.is_empty());
}

#[test]
fn tagged_model_names() {
    assert!(model_matches("llama3.2:latest", "llama3.2"));
    assert!(model_matches("llama3.2:latest", "llama3.2:latest"));
    assert!(model_matches("nomic-embed-text:v1.5", "nomic-embed-text:v1.5"));
    assert!(!model_matches("nomic-embed-text:v1.5", "nomic-embed-text"));
    assert!(!model_matches("mistral:latest", "llama3.2"));
}

#[test]
fn installed_model_lookup() {
    let response: ModelsResponse = serde_json::from_str(
        r#"{"models":[{"name":"llama3.2:latest"},{"name":"mistral:7b","size":4109865159}]}"#,
    )
    .expect("tags response should parse");

    let find = |name: &str| response.models.iter().find(|m| m.matches(name)).map(|m| m.name.as_str());
    assert_eq!(find("llama3.2"), Some("llama3.2:latest"));
    assert_eq!(find("mistral:7b"), Some("mistral:7b"));
    assert_eq!(find("mistral"), None);
}

#[test]
fn chat_stream_yields_fragments_in_order() {
    let body = concat!(
        r#"{"model":"llama3.2","message":{"role":"assistant","content":"The "},"done":false}"#,
        "\n",
        r#"{"model":"llama3.2","message":{"role":"assistant","content":"fox is "},"done":false}"#,
        "\n\n",
        r#"{"model":"llama3.2","message":{"role":"assistant","content":"brown."},"done":false}"#,
        "\n",
        r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true}"#,
        "\n",
    );

    let fragments: Vec<String> = stream_from(body)
        .collect::<crate::Result<Vec<_>>>()
        .expect("stream should complete");

    assert_eq!(fragments, vec!["The ", "fox is ", "brown."]);
}

#[test]
fn chat_stream_reports_server_error() {
    let body = concat!(
        r#"{"message":{"role":"assistant","content":"partial"},"done":false}"#,
        "\n",
        r#"{"error":"model runner crashed"}"#,
        "\n",
    );

    let mut stream = stream_from(body);
    assert_eq!(
        stream.next().map(|r| r.expect("first fragment ok")),
        Some("partial".to_string())
    );
    match stream.next() {
        Some(Err(RagError::Connection(message))) => assert_eq!(message, "model runner crashed"),
        other => panic!("expected connection error, got {:?}", other),
    }
    assert!(stream.next().is_none(), "stream is not restartable after an error");
}

#[test]
fn chat_stream_truncated_is_error() {
    let body = concat!(
        r#"{"message":{"role":"assistant","content":"cut"},"done":false}"#,
        "\n"
    );

    let results: Vec<crate::Result<String>> = stream_from(body).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(RagError::Connection(_))));
}

#[test]
fn chat_stream_malformed_line_is_error() {
    let results: Vec<crate::Result<String>> = stream_from("not json\n").collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(RagError::Connection(_))));
}
