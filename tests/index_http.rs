use std::time::Duration;

use serde_json::json;
use support_rag::config::IndexConfig;
use support_rag::core::errors::ApiError;
use support_rag::rag::{IndexRecord, PineconeIndex, RecordMetadata, VectorIndex};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn index(server: &MockServer) -> PineconeIndex {
    PineconeIndex::new(
        &IndexConfig {
            host: server.uri(),
            api_key: "index-key".to_string(),
        },
        Duration::from_secs(5),
        0,
    )
    .expect("index client should build")
}

fn record() -> IndexRecord {
    IndexRecord {
        id: "abc123".to_string(),
        values: vec![0.1, 0.2],
        metadata: RecordMetadata {
            chunk_text: "How do I pay?".to_string(),
            category: "website".to_string(),
            url: "https://www.aven.com/support".to_string(),
        },
    }
}

#[tokio::test]
async fn upsert_sends_one_namespaced_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/vectors/upsert"))
        .and(header("Api-Key", "index-key"))
        .and(body_partial_json(json!({
            "namespace": "aven",
            "vectors": [{
                "id": "abc123",
                "values": [0.1, 0.2],
                "metadata": {
                    "chunk_text": "How do I pay?",
                    "category": "website",
                    "url": "https://www.aven.com/support",
                },
            }],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "upsertedCount": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    index(&server).upsert("aven", record()).await.unwrap();
}

#[tokio::test]
async fn query_requests_metadata_but_not_vectors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_partial_json(json!({
            "namespace": "aven",
            "topK": 15,
            "includeMetadata": true,
            "includeValues": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "matches": [
                { "id": "a", "score": 0.9, "metadata": { "chunk_text": "A" } },
                { "id": "b", "score": 0.5 },
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let matches = index(&server)
        .query("aven", &[0.1, 0.2], 15)
        .await
        .unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].chunk_text(), "A");
    // a match without metadata degrades to empty text
    assert_eq!(matches[1].chunk_text(), "");
}

#[tokio::test]
async fn query_with_no_matches_is_empty_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "matches": [] })))
        .mount(&server)
        .await;

    let matches = index(&server).query("aven", &[0.1], 15).await.unwrap();
    assert!(matches.is_empty());
}

#[tokio::test]
async fn index_errors_surface_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Api key missing" })),
        )
        .mount(&server)
        .await;

    let err = index(&server).query("aven", &[0.1], 15).await.unwrap_err();
    match err {
        ApiError::Upstream {
            status, message, ..
        } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Api key missing");
        }
        other => panic!("expected Upstream, got {other:?}"),
    }
}
