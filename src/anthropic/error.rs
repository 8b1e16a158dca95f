//! Error type for the Anthropic Messages client.

use thiserror::Error;

/// Failures talking to the Anthropic API.
///
/// - [`RateLimited`](AnthropicError::RateLimited): HTTP 429
/// - [`ApiError`](AnthropicError::ApiError): any other non-success status
/// - [`EmptyResponse`](AnthropicError::EmptyResponse): success without a text block
/// - [`NetworkError`](AnthropicError::NetworkError): transport failure
#[derive(Debug, Error)]
pub enum AnthropicError {
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("response contained no text content")]
    EmptyResponse,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let cases = [
            (
                AnthropicError::RateLimited {
                    retry_after_ms: 20_000,
                },
                "rate limited, retry after 20000ms",
            ),
            (
                AnthropicError::ApiError {
                    status: 529,
                    message: "Overloaded".into(),
                },
                "API error (status 529): Overloaded",
            ),
            (
                AnthropicError::EmptyResponse,
                "response contained no text content",
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<AnthropicError>();
    }
}
