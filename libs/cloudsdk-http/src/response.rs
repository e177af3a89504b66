use crate::envelope::ErrorEnvelope;
use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame};
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Maximum body preview size for error messages (8KB).
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Type alias for the boxed response body that supports decompression.
///
/// This type can hold either a raw body or a decompressed body (gzip/br/deflate).
/// The body is type-erased so layers can swap it for a buffered copy.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Wrap fully buffered bytes as a [`ResponseBody`].
#[must_use]
pub fn full_body(bytes: Bytes) -> ResponseBody {
    Full::new(bytes)
        .map_err(|never| -> Box<dyn std::error::Error + Send + Sync> { match never {} })
        .boxed()
}

/// HTTP response wrapper with body-reading helpers
///
/// - `resp.error_for_status()?` - Check status without reading body
/// - `resp.bytes().await?` - Read raw bytes
/// - `resp.checked_bytes().await?` - Read bytes with status check
/// - `resp.json::<T>().await?` - Parse as JSON with status check
///
/// All body reads enforce the configured `max_body_size` limit.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    /// Wrap a raw response, applying `max_body_size` to later reads
    #[must_use]
    pub fn new(inner: Response<ResponseBody>, max_body_size: usize) -> Self {
        Self {
            inner,
            max_body_size,
        }
    }

    /// Get the response status code
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Get the response headers
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Consume the wrapper and return the inner response with boxed body
    ///
    /// The body has already been through the decompression layer.
    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Check status and return error for non-2xx responses
    ///
    /// Does NOT read the response body, so the error never carries an envelope.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::HttpStatus` if the response status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.inner.status().is_success() {
            return Ok(self);
        }

        Err(HttpError::HttpStatus {
            status: self.inner.status(),
            body_preview: String::new(),
            content_type: content_type(self.inner.headers()),
        })
    }

    /// Read response body as bytes without status check
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if body exceeds limit.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner.into_body(), self.max_body_size).await
    }

    /// Read response body as bytes with status check
    ///
    /// # Errors
    /// Returns `HttpError::Api` if status is not 2xx and the body is an error envelope.
    /// Returns `HttpError::HttpStatus` for any other non-2xx response.
    /// Returns `HttpError::BodyTooLarge` if body exceeds limit.
    pub async fn checked_bytes(self) -> Result<Bytes, HttpError> {
        checked_body(self.inner, self.max_body_size).await
    }

    /// Parse response body as JSON with status check
    ///
    /// # Errors
    /// Same as [`checked_bytes`](Self::checked_bytes), plus `HttpError::Json`
    /// if parsing fails.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body_bytes = checked_body(self.inner, self.max_body_size).await?;
        let value = serde_json::from_slice(&body_bytes)?;
        Ok(value)
    }

    /// Read response body as text (UTF-8, lossy) with status check
    ///
    /// # Errors
    /// Same as [`checked_bytes`](Self::checked_bytes).
    pub async fn text(self) -> Result<String, HttpError> {
        let body_bytes = checked_body(self.inner, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Returns the configured max body size for this response.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

async fn checked_body(
    response: Response<ResponseBody>,
    max_body_size: usize,
) -> Result<Bytes, HttpError> {
    let status = response.status();
    if status.is_success() {
        return read_body_limited(response.into_body(), max_body_size).await;
    }

    let content_type = content_type(response.headers());
    // BodyTooLarge must not hide the status error
    let body = match read_body_limited(response.into_body(), max_body_size).await {
        Ok(bytes) => bytes,
        Err(HttpError::BodyTooLarge { .. }) => {
            return Err(HttpError::HttpStatus {
                status,
                body_preview: "<body too large for preview>".to_owned(),
                content_type,
            });
        }
        Err(e) => return Err(e),
    };

    if let Some(envelope) = ErrorEnvelope::parse(&body) {
        return Err(HttpError::Api { status, envelope });
    }

    let preview = &body[..body.len().min(ERROR_BODY_PREVIEW_LIMIT)];
    Err(HttpError::HttpStatus {
        status,
        body_preview: String::from_utf8_lossy(preview).into_owned(),
        content_type,
    })
}

/// Collect a body into memory, failing once more than `limit` bytes arrive.
///
/// The limit applies to decompressed bytes.
///
/// # Errors
/// Returns `HttpError::BodyTooLarge` past the limit and `HttpError::Transport`
/// if reading a frame fails.
pub async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    match buffer_body(body, limit).await? {
        BufferedBody::Complete(bytes) => Ok(bytes),
        BufferedBody::Overflow { head, .. } => Err(HttpError::BodyTooLarge {
            limit,
            actual: head.len(),
        }),
    }
}

/// Outcome of [`buffer_body`].
pub enum BufferedBody {
    Complete(Bytes),
    /// `head` holds every byte read so far and is longer than the limit;
    /// `rest` is the unread remainder.
    Overflow { head: Bytes, rest: ResponseBody },
}

/// Read frames until the body ends or more than `limit` bytes arrived.
///
/// # Errors
/// Returns `HttpError::Transport` if reading a frame fails.
pub async fn buffer_body(
    mut body: ResponseBody,
    limit: usize,
) -> Result<BufferedBody, HttpError> {
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            collected.extend_from_slice(chunk);
            if collected.len() > limit {
                return Ok(BufferedBody::Overflow {
                    head: Bytes::from(collected),
                    rest: body,
                });
            }
        }
    }

    Ok(BufferedBody::Complete(Bytes::from(collected)))
}

/// Body that yields `head` first and then whatever `rest` still holds.
#[must_use]
pub fn prefixed_body(head: Bytes, rest: ResponseBody) -> ResponseBody {
    Prefixed {
        head: Some(head),
        rest,
    }
    .boxed()
}

struct Prefixed {
    head: Option<Bytes>,
    rest: ResponseBody,
}

impl Body for Prefixed {
    type Data = Bytes;
    type Error = Box<dyn std::error::Error + Send + Sync>;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        if let Some(head) = self.head.take() {
            return Poll::Ready(Some(Ok(Frame::data(head))));
        }
        Pin::new(&mut self.rest).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.head.is_none() && self.rest.is_end_stream()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn response(status: StatusCode, content_type: &str, body: &'static [u8]) -> HttpResponse {
        let inner = Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, content_type)
            .body(full_body(Bytes::from_static(body)))
            .unwrap();
        HttpResponse::new(inner, 1024 * 1024)
    }

    #[tokio::test]
    async fn test_success_body_is_returned() {
        let resp = response(StatusCode::OK, "application/json", br#"{"id":"d-1"}"#);
        let value: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(value["id"], "d-1");
    }

    #[tokio::test]
    async fn test_envelope_body_maps_to_api_error() {
        let resp = response(
            StatusCode::NOT_FOUND,
            "application/json",
            br#"{"errors":[{"code":"deployments.not_found","message":"no such deployment"}]}"#,
        );
        let err = resp.checked_bytes().await.unwrap_err();
        match err {
            HttpError::Api { status, envelope } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(envelope.errors[0].code, "deployments.not_found");
            }
            other => panic!("expected Api, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_other_body_maps_to_http_status() {
        let resp = response(StatusCode::BAD_GATEWAY, "text/html", b"<html>oops</html>");
        let err = resp.text().await.unwrap_err();
        match err {
            HttpError::HttpStatus {
                status,
                body_preview,
                content_type,
            } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(body_preview, "<html>oops</html>");
                assert_eq!(content_type.as_deref(), Some("text/html"));
            }
            other => panic!("expected HttpStatus, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_preview_is_truncated() {
        let big = vec![b'x'; ERROR_BODY_PREVIEW_LIMIT * 2];
        let inner = Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(full_body(Bytes::from(big)))
            .unwrap();
        let err = HttpResponse::new(inner, 1024 * 1024)
            .checked_bytes()
            .await
            .unwrap_err();
        match err {
            HttpError::HttpStatus { body_preview, .. } => {
                assert_eq!(body_preview.len(), ERROR_BODY_PREVIEW_LIMIT);
            }
            other => panic!("expected HttpStatus, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_body_limit_enforced() {
        let inner = Response::builder()
            .status(StatusCode::OK)
            .body(full_body(Bytes::from_static(b"0123456789")))
            .unwrap();
        let err = HttpResponse::new(inner, 4).bytes().await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::BodyTooLarge {
                limit: 4,
                actual: 10
            }
        ));
    }

    #[tokio::test]
    async fn test_overflow_keeps_every_byte() {
        let body = full_body(Bytes::from_static(b"0123456789"));
        let BufferedBody::Overflow { head, rest } = buffer_body(body, 4).await.unwrap() else {
            panic!("expected overflow");
        };
        assert_eq!(&head[..], b"0123456789");

        let replayed = prefixed_body(head, rest).collect().await.unwrap().to_bytes();
        assert_eq!(&replayed[..], b"0123456789");
    }

    #[test]
    fn test_error_for_status_does_not_read_body() {
        let resp = response(StatusCode::CONFLICT, "application/json", b"{}");
        let err = resp.error_for_status().unwrap_err();
        assert!(matches!(
            err,
            HttpError::HttpStatus { status, ref body_preview, .. }
                if status == StatusCode::CONFLICT && body_preview.is_empty()
        ));
    }
}
