use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::error::{AppError, ErrorCode, Result};
use crate::workflow::{CancellationToken, Stage};

// ============================================================================
// Stream Handle
// ============================================================================

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Live response body bound to the token of the stage run that opened it.
pub struct StreamHandle {
    body: ByteStream,
    token: CancellationToken,
}

impl StreamHandle {
    pub fn new(body: ByteStream, token: CancellationToken) -> Self {
        Self { body, token }
    }

    /// In-memory body, used by scripted transports.
    pub fn from_chunks<I, B>(chunks: I, token: CancellationToken) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes>> = chunks.into_iter().map(|c| Ok(c.into())).collect();
        Self::new(Box::pin(stream::iter(chunks)), token)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn into_parts(self) -> (ByteStream, CancellationToken) {
        (self.body, self.token)
    }
}

// ============================================================================
// Transport Seam
// ============================================================================

pub trait Transport {
    /// POST `body` to the stage endpoint and hand back the streamed response.
    fn start_stream<B: Serialize>(
        &self,
        stage: Stage,
        body: &B,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<StreamHandle>> + Send;

    /// POST `body` and decode a single JSON response (standardize-analyze).
    fn post_json<B: Serialize>(
        &self,
        stage: Stage,
        body: &B,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<serde_json::Value>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointPaths {
    pub translate: String,
    pub glossary: String,
    pub analyze: String,
    pub apply: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            translate: "/api/translate/stream".to_string(),
            glossary: "/api/glossary/extract".to_string(),
            analyze: "/api/standardize/analyze".to_string(),
            apply: "/api/standardize/apply".to_string(),
        }
    }
}

impl EndpointPaths {
    pub fn path(&self, stage: Stage) -> &str {
        match stage {
            Stage::Translate => &self.translate,
            Stage::Glossary => &self.glossary,
            Stage::Analyze => &self.analyze,
            Stage::Apply => &self.apply,
        }
    }
}

// ============================================================================
// reqwest Transport
// ============================================================================

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    paths: EndpointPaths,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>, paths: EndpointPaths) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_token,
            paths,
        }
    }

    pub fn url_for(&self, stage: Stage) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.paths.path(stage).trim_start_matches('/')
        )
    }

    fn request<B: Serialize>(&self, stage: Stage, body: &B, accept: &'static str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(self.url_for(stage))
            .header(ACCEPT, accept)
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        request
    }
}

async fn send(
    stage: Stage,
    request: reqwest::RequestBuilder,
    token: &CancellationToken,
) -> Result<reqwest::Response> {
    token.check()?;
    let response = tokio::select! {
        _ = token.cancelled() => return Err(AppError::aborted()),
        response = request.send() => response?,
    };

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = tokio::select! {
        _ = token.cancelled() => return Err(AppError::aborted()),
        body = response.text() => body.unwrap_or_default(),
    };
    let error = classify_failure(stage.operation(), status.as_u16(), &body);
    log::warn!(
        "⚠️  {} request rejected with status {}: {}",
        stage.operation(),
        status,
        error.message
    );
    Err(error)
}

impl Transport for HttpTransport {
    fn start_stream<B: Serialize>(
        &self,
        stage: Stage,
        body: &B,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<StreamHandle>> + Send {
        let request = self.request(stage, body, "text/event-stream");
        let token = token.clone();
        async move {
            let response = send(stage, request, &token).await?;
            // The caller may have stopped the stage while headers were in flight.
            token.check()?;
            log::debug!("📡 {} stream opened", stage.operation());
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| AppError::network(format!("Stream read failed: {}", e))));
            Ok(StreamHandle::new(Box::pin(body), token))
        }
    }

    fn post_json<B: Serialize>(
        &self,
        stage: Stage,
        body: &B,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<serde_json::Value>> + Send {
        let request = self.request(stage, body, "application/json");
        let token = token.clone();
        async move {
            let response = send(stage, request, &token).await?;
            let value = tokio::select! {
                _ = token.cancelled() => return Err(AppError::aborted()),
                value = response.json::<serde_json::Value>() => value,
            };
            value.map_err(|e| AppError::protocol(format!("{} returned an unreadable body: {}", stage.operation(), e)))
        }
    }
}

// ============================================================================
// Failure Classification
// ============================================================================

/// Map a non-2xx status to a typed failure without assuming the body is JSON.
pub fn classify_failure(operation: &str, status: u16, body: &str) -> AppError {
    let details = serde_json::json!({ "status": status });
    let error = match status {
        401 => AppError::authentication(),
        403 => AppError::authorization(operation.to_lowercase()),
        400 => AppError::bad_request(server_message(body).unwrap_or_else(|| {
            format!("Invalid parameters for {}.", operation.to_lowercase())
        })),
        s if s >= 500 => AppError::service_unavailable(operation),
        s => AppError::new(
            ErrorCode::BadRequest,
            server_message(body).unwrap_or_else(|| format!("{} failed with status {}", operation, s)),
        ),
    };
    error.with_details(details)
}

fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "detail", "error"].iter().find_map(|key| match value.get(key)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Null => None,
        other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => Some(other.to_string()),
        _ => None,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::convert::Infallible;

    #[test]
    fn test_classify_auth_statuses() {
        assert_eq!(classify_failure("Translation", 401, "").code, ErrorCode::Unauthorized);
        let forbidden = classify_failure("Translation", 403, "{}");
        assert_eq!(forbidden.code, ErrorCode::Forbidden);
        assert!(forbidden.message.contains("translation"));
    }

    #[test]
    fn test_classify_bad_request_body() {
        let err = classify_failure("Translation", 400, r#"{"detail":"texts must not be empty"}"#);
        assert_eq!(err.code, ErrorCode::BadRequest);
        assert_eq!(err.message, "texts must not be empty");

        let err = classify_failure("Translation", 400, "<html>nope</html>");
        assert_eq!(err.message, "Invalid parameters for translation.");
    }

    #[test]
    fn test_classify_server_errors() {
        for status in [500, 502, 503, 504] {
            let err = classify_failure("Glossary extraction", status, r#"{"message":"db down"}"#);
            assert_eq!(err.code, ErrorCode::ServiceUnavailable);
            assert!(err.message.contains("temporarily unavailable"));
        }
    }

    #[test]
    fn test_classify_other_statuses() {
        let err = classify_failure("Standardization", 429, r#"{"error":"slow down"}"#);
        assert_eq!(err.message, "slow down");
        let err = classify_failure("Standardization", 404, "");
        assert_eq!(err.message, "Standardization failed with status 404");
        assert_eq!(err.details.unwrap()["status"], 404);
    }

    async fn spawn_backend() -> String {
        async fn stream_ok() -> Response {
            let chunks = vec![
                Ok::<_, Infallible>("data: {\"type\":\"initialization\",\"total_items\":1}\n"),
                Ok("data: {\"type\":\"completion\"}\n"),
            ];
            Response::builder()
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(futures::stream::iter(chunks)))
                .unwrap()
        }
        async fn unauthorized() -> impl IntoResponse {
            (StatusCode::UNAUTHORIZED, "token expired")
        }
        async fn bad_request() -> impl IntoResponse {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"detail": "target_language missing"})),
            )
        }
        async fn analyze(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
            let count = body["items"].as_array().map(|a| a.len()).unwrap_or(0);
            Json(serde_json::json!({
                "inconsistent_terms": {"consciousness": ["awareness", "consciousness"]},
                "items_seen": count
            }))
        }

        async fn slow() -> impl IntoResponse {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            (StatusCode::OK, "late")
        }

        let app = Router::new()
            .route("/slow", post(slow))
            .route("/api/translate/stream", post(stream_ok))
            .route("/api/glossary/extract", post(unauthorized))
            .route("/api/standardize/apply", post(bad_request))
            .route("/api/standardize/analyze", post(analyze));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn transport(base: String) -> HttpTransport {
        HttpTransport::new(base, Some("secret".to_string()), EndpointPaths::default())
    }

    #[test]
    fn test_url_join() {
        let t = HttpTransport::new("http://host:1/", None, EndpointPaths::default());
        assert_eq!(t.url_for(Stage::Analyze), "http://host:1/api/standardize/analyze");
    }

    #[tokio::test]
    async fn test_stream_success() {
        let t = transport(spawn_backend().await);
        let handle = t
            .start_stream(Stage::Translate, &serde_json::json!({"texts": ["a"]}), &CancellationToken::new())
            .await
            .unwrap();
        let (mut body, _) = handle.into_parts();
        let mut text = Vec::new();
        while let Some(chunk) = body.next().await {
            text.extend_from_slice(&chunk.unwrap());
        }
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("initialization"));
        assert!(text.contains("completion"));
    }

    #[tokio::test]
    async fn test_stream_unauthorized() {
        let t = transport(spawn_backend().await);
        let err = t
            .start_stream(Stage::Glossary, &serde_json::json!({}), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn test_stream_bad_request_message() {
        let t = transport(spawn_backend().await);
        let err = t
            .start_stream(Stage::Apply, &serde_json::json!({}), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::BadRequest);
        assert_eq!(err.message, "target_language missing");
    }

    #[tokio::test]
    async fn test_cancelled_token_never_sends() {
        let t = transport(spawn_backend().await);
        let token = CancellationToken::new();
        token.cancel();
        let err = t
            .start_stream(Stage::Translate, &serde_json::json!({}), &token)
            .await
            .err()
            .unwrap();
        assert!(err.is_aborted());
    }

    fn slow_transport(base: String) -> HttpTransport {
        let paths = EndpointPaths {
            translate: "/slow".to_string(),
            analyze: "/slow".to_string(),
            ..EndpointPaths::default()
        };
        HttpTransport::new(base, None, paths)
    }

    fn cancel_after(token: &CancellationToken, millis: u64) {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
            token.cancel();
        });
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_headers() {
        let t = slow_transport(spawn_backend().await);
        let token = CancellationToken::new();
        cancel_after(&token, 50);

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            t.start_stream(Stage::Translate, &serde_json::json!({"texts": ["a"]}), &token),
        )
        .await
        .expect("cancel ends the request");
        assert!(result.err().unwrap().is_aborted());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_json() {
        let t = slow_transport(spawn_backend().await);
        let token = CancellationToken::new();
        cancel_after(&token, 50);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            t.post_json(Stage::Analyze, &serde_json::json!({"items": []}), &token),
        )
        .await
        .expect("cancel ends the request");
        assert!(result.unwrap_err().is_aborted());
    }

    #[tokio::test]
    async fn test_post_json() {
        let t = transport(spawn_backend().await);
        let value = tokio_test::assert_ok!(
            t.post_json(
                Stage::Analyze,
                &serde_json::json!({"items": [{"original_text": "a"}]}),
                &CancellationToken::new(),
            )
            .await
        );
        assert_eq!(value["items_seen"], 1);
        assert_eq!(value["inconsistent_terms"]["consciousness"][0], "awareness");
    }

    #[tokio::test]
    async fn test_from_chunks() {
        let handle = StreamHandle::from_chunks(vec!["ab", "c"], CancellationToken::new());
        let (body, _) = handle.into_parts();
        let chunks: Vec<_> = body.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec![Bytes::from("ab"), Bytes::from("c")]);
    }
}
