use std::time::Duration;

use block_limit::Denial;
use tower::BoxError;

/// Errors produced by the Tower Block middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BlockError {
    /// The request was denied by the quota, by an active block, or because
    /// the counting store could not be consulted.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header when the wait is known.
    #[error(
        "you have reached the maximum number of requests or actions allowed within a certain time frame"
    )]
    Denied {
        /// How long the client should wait before retrying, if known.
        retry_after: Option<Duration>,
    },

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl From<Denial> for BlockError {
    fn from(denial: Denial) -> Self {
        Self::Denied {
            retry_after: denial.retry_after(),
        }
    }
}

impl BlockError {
    /// Recover a `BlockError` from a boxed service error, wrapping anything
    /// else as [`BlockError::Inner`].
    pub fn from_box(err: BoxError) -> Self {
        match err.downcast::<BlockError>() {
            Ok(err) => *err,
            Err(other) => Self::Inner(other.to_string()),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for BlockError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, msg, headers) = match self {
            Self::Denied { retry_after } => {
                let header = retry_after.map(|wait| {
                    let secs = u64::try_from(wait.as_millis().div_ceil(1000))
                        .unwrap_or(u64::MAX)
                        .max(1);
                    (
                        axum::http::header::RETRY_AFTER,
                        axum::http::HeaderValue::from(secs),
                    )
                });
                (StatusCode::TOO_MANY_REQUESTS, format!("{self}\n"), header)
            }
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), None),
        };

        let mut response = (status, msg).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

/// Error handler for `axum::error_handling::HandleErrorLayer`.
#[cfg(feature = "axum")]
pub async fn handle_block_error(err: BoxError) -> axum::response::Response {
    use axum::response::IntoResponse;

    BlockError::from_box(err).into_response()
}
