use crate::config::TransportSecurity;
use crate::envelope::APPLICATION_JSON;
use crate::error::{HttpError, InvalidUriKind};
use crate::response::HttpResponse;
use crate::transport::{BufferedService, round_trip};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::Request;
use http_body_util::Full;
use serde::Serialize;

/// HTTP request builder with fluent API
///
/// Created by [`Transport::request`](crate::Transport::request) and the
/// per-method shortcuts. Header errors are captured and surfaced by
/// [`send()`](RequestBuilder::send) so the chain reads without `?` at each step.
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    method: http::Method,
    url: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
    json: bool,
    /// Error captured during building (deferred to `send()`)
    error: Option<HttpError>,
    transport_security: TransportSecurity,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        method: http::Method,
        url: String,
        transport_security: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            method,
            url,
            headers: Vec::new(),
            body: Bytes::new(),
            json: false,
            error: None,
            transport_security,
        }
    }

    /// Add a single header to the request
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.push((name, value));
            }
            (Err(e), _) => {
                self.error = Some(HttpError::InvalidHeaderName(e));
            }
            (_, Err(e)) => {
                self.error = Some(HttpError::InvalidHeaderValue(e));
            }
        }
        self
    }

    /// Add a header from already-validated parts
    pub fn typed_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    /// Set request body as JSON
    ///
    /// Content-Type becomes `application/json` unless the caller set one.
    ///
    /// # Errors
    ///
    /// Returns `Err(HttpError::Json)` if serialization fails, or a header
    /// error captured earlier in the chain.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        self.body = Bytes::from(serde_json::to_vec(body)?);
        self.json = true;
        Ok(self)
    }

    /// Set request body as raw bytes
    pub fn body_bytes(mut self, body: Bytes) -> Self {
        self.body = body;
        self.json = false;
        self
    }

    /// Parse the URL and check its scheme against the transport security mode.
    fn validate_url(&self) -> Result<http::Uri, HttpError> {
        let uri: http::Uri =
            self.url
                .parse()
                .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                    url: self.url.clone(),
                    kind: InvalidUriKind::ParseError,
                    reason: e.to_string(),
                })?;

        if uri.authority().is_none() {
            return Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") => match self.transport_security {
                TransportSecurity::AllowInsecureHttp => Ok(uri),
                TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                }),
            },
            Some(scheme) => Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            }),
        }
    }

    /// Build the `http::Request` without sending it
    ///
    /// # Errors
    ///
    /// Returns a deferred header error, a URL error, or `RequestBuild`.
    pub fn build(mut self) -> Result<Request<Full<Bytes>>, HttpError> {
        self.take_request().map(|(request, _)| request)
    }

    fn take_request(&mut self) -> Result<(Request<Full<Bytes>>, BufferedService), HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let uri = self.validate_url()?;
        let mut builder = Request::builder().method(self.method.clone()).uri(uri);

        let has_content_type = self.headers.iter().any(|(name, _)| name == CONTENT_TYPE);
        if self.json && !has_content_type {
            builder = builder.header(CONTENT_TYPE, APPLICATION_JSON);
        }

        for (name, value) in std::mem::take(&mut self.headers) {
            builder = builder.header(name, value);
        }

        let request = builder.body(Full::new(std::mem::take(&mut self.body)))?;
        Ok((request, self.service.clone()))
    }

    /// Send the request and return the response
    ///
    /// Every HTTP status comes back as `Ok`; use the [`HttpResponse`] readers
    /// to turn non-2xx statuses into errors.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` if building failed, the URL is rejected, or the
    /// chain fails (transport, TLS, timeout after retries).
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        let (request, service) = self.take_request()?;
        let inner = round_trip(service, request).await?;
        Ok(HttpResponse::new(inner, self.max_body_size))
    }
}
