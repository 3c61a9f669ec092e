use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};

use crate::core::errors::ApiError;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sends a request, retrying transport failures and 429/5xx responses up to
/// `max_retries` times with a fixed backoff. Other non-success responses are
/// returned as-is so the caller can map the error body.
///
/// Only used for non-streaming calls; the fail-fast contract for permanent
/// (4xx) failures is unchanged.
pub async fn send_with_retry(
    builder: RequestBuilder,
    max_retries: u32,
) -> Result<Response, ApiError> {
    let mut attempt = 0;
    loop {
        let request = match builder.try_clone() {
            Some(request) => request,
            // Non-clonable bodies can't be retried; send once.
            None => return builder.send().await.map_err(ApiError::transport),
        };

        match request.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                if attempt < max_retries && is_retryable(response.status()) {
                    tracing::warn!(
                        status = %response.status(),
                        attempt,
                        "retrying upstream request"
                    );
                    attempt += 1;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                if attempt < max_retries {
                    tracing::warn!(error = %err, attempt, "retrying upstream request");
                    attempt += 1;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    continue;
                }
                return Err(ApiError::transport(err));
            }
        }
    }
}
