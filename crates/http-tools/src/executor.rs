//! Sending built requests.

use crate::error::{HttpToolsError, Result};
use crate::request::HttpRequest;
use crate::safety::{OutboundHttpSafety, redact_url};
use async_trait::async_trait;
use base64::Engine as _;
use mime::Mime;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A response as returned by the upstream API. Non-2xx statuses are not errors.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Body as JSON: parsed when the content type is JSON (or the text parses), otherwise a
    /// string, or a base64 envelope for binary payloads. An empty body is `null`.
    #[must_use]
    pub fn body_value(&self) -> Value {
        if self.body.is_empty() {
            return Value::Null;
        }
        let Some(text) = self.text() else {
            return json!({
                "encoding": "base64",
                "mimeType": self.content_type(),
                "data": base64::engine::general_purpose::STANDARD.encode(&self.body),
            });
        };
        if is_json_content_type(self.content_type()) {
            if let Ok(v) = serde_json::from_str(text) {
                return v;
            }
            tracing::debug!("Response declared JSON but did not parse; returning text");
        }
        Value::String(text.to_string())
    }
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let Ok(m) = ct.parse::<Mime>() else {
        return false;
    };
    m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON)
}

/// Sends [`HttpRequest`]s.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// # Errors
    ///
    /// Transport failures, timeouts, cancellation, and policy violations. HTTP error statuses
    /// are returned as normal responses.
    async fn execute(&self, request: HttpRequest, cancel: &CancellationToken)
    -> Result<HttpResponse>;
}

/// [`HttpExecutor`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
    timeout: Duration,
    safety: OutboundHttpSafety,
}

impl ReqwestExecutor {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built for the requested redirect policy.
    pub fn new(timeout: Duration, safety: OutboundHttpSafety) -> Result<Self> {
        let client = Client::builder()
            .redirect(safety.redirect_policy())
            .build()
            .map_err(HttpToolsError::from)?;
        Ok(Self {
            client,
            timeout,
            safety,
        })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn safety(&self) -> &OutboundHttpSafety {
        &self.safety
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.safety.check_url(&request.url).await?;
        tracing::debug!(method = %request.method, url = %redact_url(&request.url), "Sending request");

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = read_body_limited(response, self.safety.max_response_bytes).await?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Default for ReqwestExecutor {
    fn default() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            safety: OutboundHttpSafety::permissive(),
        }
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HttpToolsError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.send(request)) => {
                res.map_err(|_| HttpToolsError::Timeout(self.timeout))?
            }
        }
    }
}

async fn read_body_limited(
    mut response: reqwest::Response,
    max_bytes: Option<usize>,
) -> Result<Vec<u8>> {
    let Some(max) = max_bytes else {
        return Ok(response.bytes().await?.to_vec());
    };

    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(HttpToolsError::ResponseTooLarge { limit: max });
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(HttpToolsError::ResponseTooLarge { limit: max });
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}
