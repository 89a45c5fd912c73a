use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryError;

/// WireMeta
///
/// Pagination metadata exactly as the university backend returns it.
/// `current_page` is one-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WireMeta {
    pub current_page: u32,
    pub total_pages: u32,
    pub total: u64,
    pub per_page: u32,
}

/// WirePage
///
/// Raw listing envelope: `{ items, meta }`. Items stay untyped until the
/// dispatcher decodes them into the caller's entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WirePage {
    pub items: Vec<Value>,
    pub meta: WireMeta,
}

/// A concrete listing call, already translated to the backend's page base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPageRequest {
    /// Path below the backend base URL, placeholders already filled.
    pub path: String,
    /// Query string pairs (`page`, `limit`, filters, `sort`, `order`).
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
}

/// A state-changing call. Never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

/// Backend Trait
///
/// Interface boundary to the REST backend. Handlers and dispatchers only see
/// this trait, so tests swap in an in-memory implementation.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_page(&self, request: BackendPageRequest) -> Result<WirePage, QueryError>;

    async fn send(&self, request: MutationRequest) -> Result<Value, QueryError>;
}

pub type BackendState = Arc<dyn Backend>;

/// HttpBackend
///
/// `reqwest` implementation of [`Backend`]. Timeouts are the client's
/// defaults; there is no retry at this layer.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, QueryError> {
        let response = request.send().await.map_err(QueryError::transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(QueryError::transport)?;

        if !status.is_success() {
            return Err(backend_error(status, &body));
        }
        Ok(body.to_vec())
    }
}

/// Builds the error for a non-success response, preferring the backend's
/// own `message` field.
fn backend_error(status: StatusCode, body: &[u8]) -> QueryError {
    let raw = String::from_utf8_lossy(body).into_owned();
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|json| json.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    QueryError::Backend {
        status: status.as_u16(),
        message,
        raw,
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_page(&self, request: BackendPageRequest) -> Result<WirePage, QueryError> {
        tracing::debug!(path = %request.path, query = ?request.query, "backend page request");

        let mut builder = self.client.get(self.url(&request.path)).query(&request.query);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        let body = self.execute(builder).await?;
        serde_json::from_slice::<WirePage>(&body).map_err(QueryError::decode)
    }

    async fn send(&self, request: MutationRequest) -> Result<Value, QueryError> {
        tracing::info!(method = %request.method, path = %request.path, "backend mutation");

        let mut builder = self.client.request(request.method, self.url(&request.path));
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let body = self.execute(builder).await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(QueryError::decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_prefers_message_field() {
        let err = backend_error(StatusCode::FORBIDDEN, br#"{"message":"not your department"}"#);
        match err {
            QueryError::Backend { status, message, .. } => {
                assert_eq!(status, 403);
                assert_eq!(message, "not your department");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn backend_error_falls_back_to_status_text() {
        let err = backend_error(StatusCode::BAD_GATEWAY, b"<html>oops</html>");
        assert_eq!(err.message(), "Bad Gateway");
    }

    #[test]
    fn wire_page_decodes_backend_envelope() {
        let raw = r#"{"items":[{"id":1}],"meta":{"current_page":1,"total_pages":4,"total":37,"per_page":10}}"#;
        let page: WirePage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.meta.total_pages, 4);
        assert_eq!(page.meta.total, 37);
    }

    #[test]
    fn url_joins_without_double_slash() {
        let backend = HttpBackend::new("http://backend/api/");
        assert_eq!(backend.url("/admin/students"), "http://backend/api/admin/students");
    }
}
