use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::errors::ApiError;
use crate::rag::pipeline::validate;
use crate::state::AppState;

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    method: Method,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    if method != Method::POST {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Not Found" })),
        )
            .into_response());
    }

    let Json(body) = payload.map_err(|err| ApiError::internal(err.body_text()))?;
    let request = validate(&body).map_err(|err| {
        tracing::warn!("rejected chat request: {}", err);
        err
    })?;
    tracing::info!(
        messages = request.messages.len(),
        stream = request.stream,
        "chat completion request"
    );

    if request.stream {
        let chunks = state.pipeline.complete_stream(&request).await.map_err(|err| {
            tracing::error!("chat pipeline failed: {}", err);
            err
        })?;
        Ok((
            [
                (header::CONTENT_TYPE, "text/plain"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(sse_frames(chunks)),
        )
            .into_response())
    } else {
        let completion = state.pipeline.complete(&request).await.map_err(|err| {
            tracing::error!("chat pipeline failed: {}", err);
            err
        })?;
        Ok(Json(completion).into_response())
    }
}

/// Frames upstream chunks as `data: <json>\n\n` in arrival order, ending
/// with a single `data: [DONE]\n\n` sentinel. A mid-flight upstream error
/// terminates the stream with that error instead of the sentinel; headers
/// are already on the wire at that point, so abrupt termination is the only
/// signal left.
///
/// The receiver is owned by the returned stream: if the client disconnects,
/// the stream (and receiver) drop, which unwinds through the provider's
/// relay task and closes the upstream connection.
fn sse_frames(
    chunks: mpsc::Receiver<Result<Value, ApiError>>,
) -> impl Stream<Item = Result<Bytes, ApiError>> {
    stream::unfold(Some(chunks), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Ok(chunk)) => {
                let frame = format!("data: {}\n\n", chunk);
                Some((Ok(Bytes::from(frame)), Some(rx)))
            }
            Some(Err(err)) => {
                tracing::error!("upstream stream failed mid-flight: {}", err);
                Some((Err(err), None))
            }
            None => Some((Ok(Bytes::from("data: [DONE]\n\n")), None)),
        }
    })
}
