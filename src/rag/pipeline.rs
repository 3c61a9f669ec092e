//! Query pipeline: validate -> embed -> retrieve -> assemble -> rewrite.
//!
//! The rewritten conversation is what actually gets forwarded to the
//! completion model; the caller's last message never reaches it directly.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use super::context::assemble_context;
use super::index::VectorIndex;
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, ChatRequest, LlmProvider};

pub const DEFAULT_MAX_TOKENS: u32 = 150;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

pub const RETRIEVAL_NAMESPACE: &str = "aven";
pub const RETRIEVAL_TOP_K: usize = 15;

const REWRITE_MAX_TOKENS: u32 = 500;
const REWRITE_TEMPERATURE: f32 = 0.7;

/// A chat request that passed validation, defaults applied.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// Validates a raw request body and applies defaults. Pure; no outbound
/// calls happen before this passes.
pub fn validate(body: &Value) -> Result<ValidatedRequest, ApiError> {
    let messages = body
        .get("messages")
        .and_then(|v| v.as_array())
        .filter(|list| !list.is_empty())
        .ok_or_else(|| ApiError::Validation("Messages array is required".to_string()))?;

    let messages: Vec<ChatMessage> = messages
        .iter()
        .map(|m| ChatMessage {
            role: m
                .get("role")
                .and_then(|v| v.as_str())
                .unwrap_or("user")
                .to_string(),
            content: m
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        })
        .collect();

    if messages.last().map(|m| m.content.is_empty()).unwrap_or(true) {
        return Err(ApiError::Validation(
            "Last message must have content".to_string(),
        ));
    }

    Ok(ValidatedRequest {
        messages,
        max_tokens: body
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: body
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or(DEFAULT_TEMPERATURE),
        stream: body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false),
    })
}

fn rewrite_prompt(context: &str, query: &str) -> String {
    format!(
        "Answer my question based on the following context: {context}\n\nQuestion: {query}\n\nAnswer:"
    )
}

fn legacy_prompt(query: &str) -> String {
    format!(
        "You are an expert customer support agent who knows everything about Aven answer the user query: {query}"
    )
}

pub struct QueryPipeline {
    llm: Arc<dyn LlmProvider>,
    index: Arc<dyn VectorIndex>,
    retrieval: bool,
}

impl QueryPipeline {
    pub fn new(llm: Arc<dyn LlmProvider>, index: Arc<dyn VectorIndex>, retrieval: bool) -> Self {
        Self {
            llm,
            index,
            retrieval,
        }
    }

    /// Runs embed -> retrieve -> assemble -> rewrite and returns the
    /// conversation to forward: the original messages with only the last
    /// content replaced by the context-grounded answer.
    async fn rewrite_conversation(
        &self,
        request: &ValidatedRequest,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let Some(last) = request.messages.last() else {
            return Err(ApiError::Validation(
                "Messages array is required".to_string(),
            ));
        };
        let query = last.content.clone();

        let prompt = if self.retrieval {
            let vector = self.llm.embed(&query).await?;
            let matches = self
                .index
                .query(RETRIEVAL_NAMESPACE, &vector, RETRIEVAL_TOP_K)
                .await?;
            tracing::debug!(matches = matches.len(), "retrieved context chunks");
            rewrite_prompt(&assemble_context(&matches), &query)
        } else {
            legacy_prompt(&query)
        };

        let completion = self
            .llm
            .chat(
                ChatRequest::new(vec![ChatMessage::user(prompt)])
                    .with_max_tokens(REWRITE_MAX_TOKENS)
                    .with_temperature(REWRITE_TEMPERATURE),
            )
            .await?;

        let answer = completion["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        if answer.is_empty() {
            // Forwarding the raw query instead would silently skip grounding,
            // so this is fatal for the whole request.
            return Err(ApiError::Rewrite(
                "rewrite completion contained no content".to_string(),
            ));
        }

        let mut messages = request.messages.clone();
        if let Some(last) = messages.last_mut() {
            last.content = answer.to_string();
        }
        Ok(messages)
    }

    fn relay_request(&self, request: &ValidatedRequest, messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest::new(messages)
            .with_max_tokens(request.max_tokens)
            .with_temperature(request.temperature)
    }

    /// Full pipeline, non-streaming: returns the upstream completion object
    /// verbatim.
    pub async fn complete(&self, request: &ValidatedRequest) -> Result<Value, ApiError> {
        let messages = self.rewrite_conversation(request).await?;
        self.llm.chat(self.relay_request(request, messages)).await
    }

    /// Full pipeline, streaming: returns the upstream chunk stream.
    pub async fn complete_stream(
        &self,
        request: &ValidatedRequest,
    ) -> Result<mpsc::Receiver<Result<Value, ApiError>>, ApiError> {
        let messages = self.rewrite_conversation(request).await?;
        self.llm
            .stream_chat(self.relay_request(request, messages))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::index::{IndexRecord, MatchMetadata, RetrievedMatch};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn completion_with_content(content: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    fn matched(text: &str) -> RetrievedMatch {
        RetrievedMatch {
            metadata: Some(MatchMetadata {
                chunk_text: text.to_string(),
            }),
        }
    }

    #[derive(Default)]
    struct MockLlm {
        embed_calls: Mutex<Vec<String>>,
        embed_fails: bool,
        chat_calls: Mutex<Vec<ChatRequest>>,
        chat_responses: Mutex<VecDeque<Value>>,
        stream_chunks: Vec<Value>,
    }

    impl MockLlm {
        fn with_chat_responses(responses: Vec<Value>) -> Self {
            Self {
                chat_responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn name(&self) -> &str {
            "mock"
        }

        async fn chat(&self, request: ChatRequest) -> Result<Value, ApiError> {
            self.chat_calls.lock().unwrap().push(request);
            self.chat_responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ApiError::Internal("unexpected chat call".to_string()))
        }

        async fn stream_chat(
            &self,
            request: ChatRequest,
        ) -> Result<mpsc::Receiver<Result<Value, ApiError>>, ApiError> {
            self.chat_calls.lock().unwrap().push(request);
            let (tx, rx) = mpsc::channel(self.stream_chunks.len().max(1));
            for chunk in &self.stream_chunks {
                tx.try_send(Ok(chunk.clone())).unwrap();
            }
            Ok(rx)
        }

        async fn embed(&self, input: &str) -> Result<Vec<f32>, ApiError> {
            self.embed_calls.lock().unwrap().push(input.to_string());
            if self.embed_fails {
                return Err(ApiError::Upstream {
                    status: 500,
                    code: None,
                    message: "embedding backend down".to_string(),
                });
            }
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    #[derive(Default)]
    struct MockIndex {
        query_calls: Mutex<Vec<(String, usize, Vec<f32>)>>,
        matches: Vec<RetrievedMatch>,
    }

    #[async_trait]
    impl VectorIndex for MockIndex {
        async fn upsert(&self, _namespace: &str, _record: IndexRecord) -> Result<(), ApiError> {
            Err(ApiError::Internal("unexpected upsert".to_string()))
        }

        async fn query(
            &self,
            namespace: &str,
            vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<RetrievedMatch>, ApiError> {
            self.query_calls
                .lock()
                .unwrap()
                .push((namespace.to_string(), top_k, vector.to_vec()));
            Ok(self.matches.clone())
        }
    }

    fn request(content: &str) -> ValidatedRequest {
        ValidatedRequest {
            messages: vec![ChatMessage::user(content)],
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            stream: false,
        }
    }

    // ---- validation ----

    #[test]
    fn validate_rejects_missing_messages() {
        for body in [
            json!({}),
            json!({ "messages": "not an array" }),
            json!({ "messages": [] }),
            json!({ "messages": null }),
        ] {
            let err = validate(&body).unwrap_err();
            assert!(
                matches!(err, ApiError::Validation(ref msg) if msg == "Messages array is required"),
                "unexpected error for {body}: {err:?}"
            );
        }
    }

    #[test]
    fn validate_rejects_empty_last_content() {
        for body in [
            json!({ "messages": [{ "role": "user" }] }),
            json!({ "messages": [{ "role": "user", "content": "" }] }),
            json!({ "messages": [{ "role": "user", "content": "hi" }, { "role": "assistant", "content": "" }] }),
        ] {
            let err = validate(&body).unwrap_err();
            assert!(
                matches!(err, ApiError::Validation(ref msg) if msg == "Last message must have content"),
                "unexpected error for {body}: {err:?}"
            );
        }
    }

    #[test]
    fn validate_applies_defaults() {
        let body = json!({ "messages": [{ "role": "user", "content": "hi" }] });
        let request = validate(&body).unwrap();
        assert_eq!(request.max_tokens, 150);
        assert_eq!(request.temperature, 0.7);
        assert!(!request.stream);
    }

    #[test]
    fn validate_keeps_caller_parameters_and_ignores_extras() {
        let body = json!({
            "model": "ignored-model",
            "call": "extra",
            "messages": [{ "role": "user", "content": "hi" }],
            "max_tokens": 42,
            "temperature": 0.1,
            "stream": true,
        });
        let request = validate(&body).unwrap();
        assert_eq!(request.max_tokens, 42);
        assert!((request.temperature - 0.1).abs() < f32::EPSILON);
        assert!(request.stream);
    }

    // ---- pipeline ----

    #[tokio::test]
    async fn retrieval_grounds_the_rewrite_and_relays_the_answer() {
        let final_completion = json!({ "id": "cmpl-1", "choices": [] });
        let llm = Arc::new(MockLlm::with_chat_responses(vec![
            completion_with_content("Aven is a home-equity credit card."),
            final_completion.clone(),
        ]));
        let index = Arc::new(MockIndex {
            matches: vec![matched("A"), matched("B")],
            ..MockIndex::default()
        });
        let pipeline = QueryPipeline::new(llm.clone(), index.clone(), true);

        let response = pipeline.complete(&request("What is Aven?")).await.unwrap();
        assert_eq!(response, final_completion);

        // embed was called on the raw query
        assert_eq!(llm.embed_calls.lock().unwrap().as_slice(), ["What is Aven?"]);

        // the index saw the fixed namespace and top-k
        let query_calls = index.query_calls.lock().unwrap();
        assert_eq!(query_calls.len(), 1);
        assert_eq!(query_calls[0].0, "aven");
        assert_eq!(query_calls[0].1, 15);

        let chat_calls = llm.chat_calls.lock().unwrap();
        assert_eq!(chat_calls.len(), 2);

        // rewrite call: single synthetic message embedding context and query
        let rewrite = &chat_calls[0];
        assert_eq!(rewrite.messages.len(), 1);
        assert!(rewrite.messages[0].content.contains("context: A\n\nB"));
        assert!(rewrite.messages[0].content.contains("Question: What is Aven?"));
        assert_eq!(rewrite.max_tokens, Some(500));

        // relay call: same conversation, last content replaced
        let relay = &chat_calls[1];
        assert_eq!(relay.messages.len(), 1);
        assert_eq!(relay.messages[0].role, "user");
        assert_eq!(
            relay.messages[0].content,
            "Aven is a home-equity credit card."
        );
        assert_eq!(relay.max_tokens, Some(150));
    }

    #[tokio::test]
    async fn earlier_messages_are_forwarded_untouched() {
        let llm = Arc::new(MockLlm::with_chat_responses(vec![
            completion_with_content("rewritten"),
            json!({ "ok": true }),
        ]));
        let index = Arc::new(MockIndex::default());
        let pipeline = QueryPipeline::new(llm.clone(), index, true);

        let mut req = request("latest question");
        req.messages.insert(0, ChatMessage::user("earlier question"));
        req.messages.insert(
            1,
            ChatMessage {
                role: "assistant".to_string(),
                content: "earlier answer".to_string(),
            },
        );
        pipeline.complete(&req).await.unwrap();

        let chat_calls = llm.chat_calls.lock().unwrap();
        let relay = &chat_calls[1];
        assert_eq!(relay.messages.len(), 3);
        assert_eq!(relay.messages[0].content, "earlier question");
        assert_eq!(relay.messages[1].content, "earlier answer");
        assert_eq!(relay.messages[2].content, "rewritten");
    }

    #[tokio::test]
    async fn zero_matches_degrades_to_empty_context() {
        let llm = Arc::new(MockLlm::with_chat_responses(vec![
            completion_with_content("best effort answer"),
            json!({ "ok": true }),
        ]));
        let index = Arc::new(MockIndex::default());
        let pipeline = QueryPipeline::new(llm.clone(), index, true);

        pipeline.complete(&request("anything?")).await.unwrap();

        let chat_calls = llm.chat_calls.lock().unwrap();
        assert!(chat_calls[0].messages[0]
            .content
            .starts_with("Answer my question based on the following context: \n\n"));
    }

    #[tokio::test]
    async fn embed_failure_short_circuits_the_pipeline() {
        let llm = Arc::new(MockLlm {
            embed_fails: true,
            ..MockLlm::default()
        });
        let index = Arc::new(MockIndex::default());
        let pipeline = QueryPipeline::new(llm.clone(), index.clone(), true);

        let err = pipeline.complete(&request("hi")).await.unwrap_err();
        assert!(matches!(err, ApiError::Upstream { status: 500, .. }));

        // neither the index nor the completion model was reached
        assert!(index.query_calls.lock().unwrap().is_empty());
        assert!(llm.chat_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_rewrite_is_fatal() {
        let llm = Arc::new(MockLlm::with_chat_responses(vec![completion_with_content(
            "",
        )]));
        let index = Arc::new(MockIndex::default());
        let pipeline = QueryPipeline::new(llm.clone(), index, true);

        let err = pipeline.complete(&request("hi")).await.unwrap_err();
        assert!(matches!(err, ApiError::Rewrite(_)));
        // the relay call never happened
        assert_eq!(llm.chat_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn legacy_mode_skips_embedding_and_retrieval() {
        let llm = Arc::new(MockLlm::with_chat_responses(vec![
            completion_with_content("legacy answer"),
            json!({ "ok": true }),
        ]));
        let index = Arc::new(MockIndex::default());
        let pipeline = QueryPipeline::new(llm.clone(), index.clone(), false);

        pipeline.complete(&request("Can I pay early?")).await.unwrap();

        assert!(llm.embed_calls.lock().unwrap().is_empty());
        assert!(index.query_calls.lock().unwrap().is_empty());

        let chat_calls = llm.chat_calls.lock().unwrap();
        assert!(chat_calls[0].messages[0]
            .content
            .contains("expert customer support agent"));
        assert!(chat_calls[0].messages[0].content.contains("Can I pay early?"));
    }

    #[tokio::test]
    async fn streaming_relays_the_upstream_chunks() {
        let llm = Arc::new(MockLlm {
            chat_responses: Mutex::new(vec![completion_with_content("rewritten")].into()),
            stream_chunks: vec![json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 })],
            ..MockLlm::default()
        });
        let index = Arc::new(MockIndex::default());
        let pipeline = QueryPipeline::new(llm, index, true);

        let mut rx = pipeline.complete_stream(&request("hi")).await.unwrap();
        let mut seen = Vec::new();
        while let Some(chunk) = rx.recv().await {
            seen.push(chunk.unwrap());
        }
        assert_eq!(
            seen,
            vec![json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 })]
        );
    }
}
