use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;

/// Raw underlying failure attached to a query error. Shared so that every
/// waiter on a single-flight request receives the same cause.
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// ConfigError
///
/// Raised by `AppConfig::load` when the environment cannot produce a usable
/// configuration for the selected `APP_ENV`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

/// QueryError
///
/// The error state surfaced to a view when a list, page or mutation request
/// fails. Cloneable because one in-flight request may have many waiters.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The backend answered with a non-success status.
    #[error("backend responded {status}: {message}")]
    Backend {
        status: u16,
        message: String,
        raw: String,
    },

    /// The request never produced a response (connect, timeout, TLS).
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        #[source]
        cause: Cause,
    },

    /// The response body did not match the expected envelope or item shape.
    #[error("could not decode response: {message}")]
    Decode {
        message: String,
        #[source]
        cause: Cause,
    },

    /// A cached value was read back as a different type than was stored.
    #[error("cached value for {key} has an unexpected type")]
    TypeMismatch { key: String },
}

impl QueryError {
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: err.to_string(),
            cause: Arc::new(err),
        }
    }

    pub fn decode<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Decode {
            message: err.to_string(),
            cause: Arc::new(err),
        }
    }

    /// The human-readable message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Backend { message, .. }
            | Self::Transport { message, .. }
            | Self::Decode { message, .. } => message,
            Self::TypeMismatch { .. } => "cached value has an unexpected type",
        }
    }
}

/// ErrorResponse
///
/// JSON body returned for every failed console request.
#[derive(Debug, Serialize, TS, ToSchema)]
#[ts(export)]
pub struct ErrorResponse {
    pub message: String,
}

/// ConsoleError
///
/// HTTP-facing error wrapper. Backend client errors (4xx) keep their status so
/// validation and authorization failures reach the UI unchanged; everything
/// else upstream is reported as a bad gateway.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("not found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("authentication required")]
    Unauthorized,
}

impl ConsoleError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Query(QueryError::Backend { status, .. }) if (400..500).contains(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Query(QueryError::TypeMismatch { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Query(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "console request failed");
        } else {
            tracing::debug!(error = %self, "console request rejected");
        }

        let message = match &self {
            Self::Query(err) => err.message().to_string(),
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_client_errors_keep_their_status() {
        let err = ConsoleError::Query(QueryError::Backend {
            status: 422,
            message: "invalid student code".to_string(),
            raw: String::new(),
        });
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn upstream_failures_map_to_bad_gateway() {
        let err = ConsoleError::Query(QueryError::Backend {
            status: 500,
            message: "boom".to_string(),
            raw: String::new(),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = ConsoleError::Query(QueryError::transport(io));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn transport_error_keeps_raw_cause() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = QueryError::transport(io);
        assert_eq!(err.message(), "refused");
        assert!(err.source().is_some());
    }
}
