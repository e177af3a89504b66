//! Canned-response connection for tests.
//!
//! [`MockTransport`] replays a programmed list of [`MockResponse`]s in order,
//! one per call, and fails with [`MockError::Exhausted`] once the list runs
//! out. Plug it under a real chain with
//! [`Connection::bare`](crate::Connection::bare).
//!
//! ```ignore
//! let mock = MockTransport::new(vec![
//!     MockResponse::timeout(),
//!     MockResponse::ok_json(&json!({"id": "d-1"})),
//! ]);
//! let transport = Transport::builder()
//!     .with_connection(Connection::bare(mock.clone()))
//!     .retry(RetryConfig::fast())
//!     .build()?;
//! ```

use crate::envelope::APPLICATION_JSON;
use crate::error::HttpError;
use crate::response::{ResponseBody, full_body};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use thiserror::Error;
use tower::Service;

/// Failures produced by the mock itself, boxed into `HttpError::Transport`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MockError {
    /// More calls than programmed responses
    #[error("mock transport exhausted: no response #{index} for {method} {url}")]
    Exhausted {
        method: Method,
        url: String,
        index: usize,
    },

    /// The incoming request did not match the response's assertion
    #[error("request #{index} did not match expectation: {reason}")]
    AssertionFailed { index: usize, reason: String },

    /// Programmed application error
    #[error("{0}")]
    Custom(String),
}

/// Error a [`MockResponse`] can be programmed to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CannedError {
    /// I/O error of kind `TimedOut`; classified as a timeout and retried
    Timeout,
    /// I/O error of kind `ConnectionRefused`; never retried
    ConnectionRefused,
    /// Arbitrary non-timeout failure with the given message
    Custom(String),
}

impl CannedError {
    fn to_http_error(&self) -> HttpError {
        match self {
            Self::Timeout => HttpError::Transport(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "mock: request timed out",
            ))),
            Self::ConnectionRefused => HttpError::Transport(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock: connection refused",
            ))),
            Self::Custom(message) => HttpError::Transport(Box::new(MockError::Custom(message.clone()))),
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Fail(CannedError),
}

/// One programmed reply: a response or an error, optionally with checks on
/// the request that consumes it.
#[derive(Debug, Clone)]
pub struct MockResponse {
    outcome: Outcome,
    assertion: Option<RequestAssertion>,
}

impl MockResponse {
    /// Empty-bodied response with `status`
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            outcome: Outcome::Reply {
                status,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            },
            assertion: None,
        }
    }

    /// JSON response with `status`
    #[must_use]
    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        Self::new(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))
            .with_body(body.to_string())
    }

    /// `200 OK` JSON response
    #[must_use]
    pub fn ok_json(body: &serde_json::Value) -> Self {
        Self::json(StatusCode::OK, body)
    }

    /// `text/html` response, as sent by intercepting proxies
    #[must_use]
    pub fn html(status: StatusCode, page: impl Into<Bytes>) -> Self {
        Self::new(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))
            .with_body(page)
    }

    /// Programmed error instead of a response
    #[must_use]
    pub fn error(error: CannedError) -> Self {
        Self {
            outcome: Outcome::Fail(error),
            assertion: None,
        }
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::error(CannedError::Timeout)
    }

    #[must_use]
    pub fn connection_refused() -> Self {
        Self::error(CannedError::ConnectionRefused)
    }

    /// Add a response header; ignored on error outcomes
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if let Outcome::Reply { headers, .. } = &mut self.outcome {
            headers.append(name, value);
        }
        self
    }

    /// Replace the response body; ignored on error outcomes
    #[must_use]
    pub fn with_body(mut self, bytes: impl Into<Bytes>) -> Self {
        if let Outcome::Reply { body, .. } = &mut self.outcome {
            *body = bytes.into();
        }
        self
    }

    /// Check the request that consumes this reply
    #[must_use]
    pub fn expect(mut self, assertion: RequestAssertion) -> Self {
        self.assertion = Some(assertion);
        self
    }
}

/// Expectations on one incoming request. Unset fields are not checked.
#[derive(Debug, Clone, Default)]
pub struct RequestAssertion {
    method: Option<Method>,
    path: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    json_body: Option<serde_json::Value>,
}

impl RequestAssertion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Exact URI path, still percent-encoded
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Header that must be present with exactly this value
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Body that must parse as JSON equal to `value`
    #[must_use]
    pub fn json_body(mut self, value: serde_json::Value) -> Self {
        self.json_body = Some(value);
        self
    }

    fn check(&self, parts: &http::request::Parts, body: &[u8]) -> Result<(), String> {
        if let Some(method) = &self.method
            && parts.method != *method
        {
            return Err(format!("method: expected {method}, got {}", parts.method));
        }
        if let Some(path) = &self.path
            && parts.uri.path() != path
        {
            return Err(format!("path: expected {path}, got {}", parts.uri.path()));
        }
        for (name, expected) in &self.headers {
            let actual = parts
                .headers
                .get(name.as_str())
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
            if actual.as_deref() != Some(expected.as_str()) {
                let actual = actual.map_or_else(|| "nothing".to_owned(), |v| format!("'{v}'"));
                return Err(format!("header {name}: expected '{expected}', got {actual}"));
            }
        }
        if let Some(expected) = &self.body
            && body != expected.as_ref()
        {
            return Err(format!(
                "body: expected '{}', got '{}'",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(body)
            ));
        }
        if let Some(expected) = &self.json_body {
            let actual: serde_json::Value =
                serde_json::from_slice(body).map_err(|e| format!("body is not JSON: {e}"))?;
            if actual != *expected {
                return Err(format!("json body: expected {expected}, got {actual}"));
            }
        }
        Ok(())
    }
}

struct Inner {
    responses: RwLock<Vec<MockResponse>>,
    cursor: AtomicUsize,
}

/// Connection that replays programmed responses in order.
///
/// Clones share the list and the cursor. Each call claims exactly one cursor
/// position, whether it ends in a response, a programmed error or
/// exhaustion, so concurrent callers never see the same or a skipped entry.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    #[must_use]
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            inner: Arc::new(Inner {
                responses: RwLock::new(responses),
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    /// Append a response after the ones already programmed
    pub fn push(&self, response: MockResponse) {
        self.inner.responses.write().push(response);
    }

    /// Number of calls served so far, including failed and exhausted ones
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inner.cursor.load(Ordering::SeqCst)
    }

    /// Programmed responses not consumed yet
    #[must_use]
    pub fn remaining(&self) -> usize {
        let responses = self.inner.responses.read();
        responses.len().saturating_sub(self.calls())
    }

    /// Claim the next cursor position and resolve it.
    fn next(&self, method: &Method, url: &str) -> Result<(usize, MockResponse), MockError> {
        let responses = self.inner.responses.read();
        let index = self.inner.cursor.fetch_add(1, Ordering::SeqCst);
        responses
            .get(index)
            .cloned()
            .map(|response| (index, response))
            .ok_or_else(|| MockError::Exhausted {
                method: method.clone(),
                url: url.to_owned(),
                index,
            })
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("calls", &self.calls())
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl Service<Request<Full<Bytes>>> for MockTransport {
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let claimed = self.next(req.method(), &req.uri().to_string());

        Box::pin(async move {
            let (index, response) = claimed.map_err(|e| HttpError::Transport(Box::new(e)))?;

            // Drain the request body so assertions can look at it
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(never) => match never {},
            };

            if let Some(assertion) = &response.assertion
                && let Err(reason) = assertion.check(&parts, &body)
            {
                return Err(HttpError::Transport(Box::new(MockError::AssertionFailed {
                    index,
                    reason,
                })));
            }

            match response.outcome {
                Outcome::Fail(error) => Err(error.to_http_error()),
                Outcome::Reply {
                    status,
                    headers,
                    body,
                } => {
                    let mut reply = Response::new(full_body(body));
                    *reply.status_mut() = status;
                    *reply.headers_mut() = headers;
                    Ok(reply)
                }
            }
        })
    }
}
