use crate::config::{
    RetryConfig, TlsRootConfig, TlsVerification, TraceConfig, TransportConfig, TransportSecurity,
};
use crate::error::HttpError;
use crate::layers::{ProxyErrorLayer, RetryLayer, TraceLayer, UserAgentLayer};
use crate::response::ResponseBody;
use crate::tls;
use crate::trace::{TraceSink, Tracer};
use crate::transport::{BufferedService, Connection, InnerService, Transport};
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::{Layer, ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

type AuthWrap = Box<dyn FnOnce(InnerService) -> InnerService + Send>;

/// Builder for constructing a [`Transport`] with a layered tower middleware stack.
pub struct TransportBuilder {
    config: TransportConfig,
    auth_layer: Option<AuthWrap>,
    connection: Option<Connection>,
}

impl TransportBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            config,
            auth_layer: None,
            connection: None,
        }
    }

    /// Set the per-attempt timeout
    ///
    /// Each retry attempt gets its own timeout; there is no overall deadline.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the user agent string
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the retry configuration
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the maximum response body size
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set transport security mode
    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow insecure HTTP connections (for testing only)
    ///
    /// Only available in debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "cloudsdk_http::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Set the TLS root certificate strategy
    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Accept any server certificate
    ///
    /// For self-signed installations and development environments only.
    #[must_use]
    pub fn skip_tls_verify(mut self) -> Self {
        self.config.tls_verification = TlsVerification::SkipVerify;
        self
    }

    /// Set request/response dump settings
    #[must_use]
    pub fn trace(mut self, trace: TraceConfig) -> Self {
        self.config.trace = trace;
        self
    }

    /// Dump every attempt into `sink`, redacting credentials
    #[must_use]
    pub fn trace_to(mut self, sink: TraceSink) -> Self {
        self.config.trace = TraceConfig::to(sink);
        self
    }

    /// Keep or drop the `Authorization` value in dumps (default: redacted)
    #[must_use]
    pub fn redact_auth(mut self, redact: bool) -> Self {
        self.config.trace.redact_auth = redact;
        self
    }

    /// Insert an auth layer inside the retry loop.
    ///
    /// Stack position: `Retry -> this layer -> Trace -> Timeout`.
    ///
    /// Every attempt re-runs the layer, and the trace dump shows what it
    /// added. Only one auth layer can be set; a second call replaces the first.
    #[must_use]
    pub fn with_auth_layer(
        mut self,
        wrap: impl FnOnce(InnerService) -> InnerService + Send + 'static,
    ) -> Self {
        self.auth_layer = Some(Box::new(wrap));
        self
    }

    /// Build on top of an existing connection instead of a new hyper client
    ///
    /// A [`Connection::Decorated`] transport is returned from `build()` as is.
    #[must_use]
    pub fn with_connection(mut self, connection: impl Into<Connection>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Set the buffer capacity for concurrent request handling
    ///
    /// A capacity of 0 is clamped to 1; tower's Buffer panics with 0.
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// Set the idle connection timeout for the connection pool
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum number of idle connections per host
    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Build the transport with all configured layers
    ///
    /// Must be called within a tokio runtime: the buffer worker is spawned here.
    /// No network I/O happens during the build.
    ///
    /// # Errors
    /// Returns `HttpError::MissingTraceSink` if tracing is enabled without a
    /// sink, `HttpError::InvalidHeaderValue` for a bad user agent, and
    /// `HttpError::Tls` if TLS initialization fails.
    pub fn build(self) -> Result<Transport, HttpError> {
        let tracer = match (self.config.trace.enabled, &self.config.trace.sink) {
            (false, _) => None,
            (true, Some(sink)) => Some(Tracer::new(sink.clone(), self.config.trace.redact_auth)),
            (true, None) => return Err(HttpError::MissingTraceSink),
        };

        let connection = match self.connection {
            Some(Connection::Decorated(transport)) => {
                tracing::debug!("connection already decorated; returning it unchanged");
                return Ok(transport);
            }
            Some(Connection::Bare(service)) => service,
            None => build_hyper_connection(&self.config)?,
        };

        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let ua_layer = UserAgentLayer::try_new(&self.config.user_agent)?;
        let timeout = self.config.request_timeout;

        // =======================================================================
        // Tower Layer Stack (outer to inner)
        // =======================================================================
        //
        //   Buffer -> UserAgent -> [ProxyError unless tracing] -> Retry ->
        //   [AuthLayer?] -> [Trace if tracing] -> Timeout -> Decompression ->
        //   connection
        //
        // Timeout is per attempt and produces the retryable HttpError::Timeout.
        // Trace sits inside Retry so each attempt is numbered and dumped.
        // ProxyError sits outside Retry so it only sees the final response.
        //
        // =======================================================================
        let mut service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(DecompressionLayer::new())
            .service(connection)
            .map_response(map_decompression_response)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout))
            .boxed_clone();

        if let Some(tracer) = &tracer {
            service = TraceLayer::new(tracer.clone(), self.config.max_body_size)
                .layer(service)
                .boxed_clone();
        }

        if let Some(wrap) = self.auth_layer {
            service = wrap(service);
        }

        service = RetryLayer::with_tracer(self.config.retry.clone(), tracer.clone())
            .layer(service)
            .boxed_clone();

        if tracer.is_none() {
            service = ProxyErrorLayer.layer(service).boxed_clone();
        }

        let service = ua_layer.layer(service).boxed_clone();

        // Buffer spawns a background task that drives the chain, giving
        // Clone + Send + Sync without a mutex.
        let buffer_capacity = self.config.buffer_capacity.max(1);
        let buffered: BufferedService = Buffer::new(service, buffer_capacity);

        Ok(Transport {
            service: buffered,
            max_body_size: self.config.max_body_size,
            transport_security: self.config.transport,
        })
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_hyper_connection(config: &TransportConfig) -> Result<InnerService, HttpError> {
    let https = build_https_connector(config.tls_roots, config.tls_verification, config.transport)?;

    let mut client_builder = Client::builder(TokioExecutor::new());

    // pool_timer is required for pool_idle_timeout to work
    client_builder
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .http2_only(false);

    if let Some(idle_timeout) = config.pool_idle_timeout {
        client_builder.pool_idle_timeout(idle_timeout);
    }

    let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

    Ok(hyper_client
        .map_response(map_incoming_response)
        .map_err(HttpError::from)
        .boxed_clone())
}

/// Map tower errors to `HttpError` with the actual timeout duration
///
/// Errors that already are `HttpError` are unboxed rather than wrapped.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

fn map_incoming_response(response: Response<hyper::body::Incoming>) -> Response<ResponseBody> {
    let (parts, body) = response.into_parts();
    let boxed: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed)
}

/// Map the decompression response to our boxed response body type.
fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// Build the HTTPS connector for the configured roots and verification mode.
///
/// HTTP/2 is negotiated through ALPN alongside HTTP/1.1.
///
/// # Errors
///
/// Returns `HttpError::Tls` if native roots are requested but none are usable,
/// or the crypto provider cannot be set up.
fn build_https_connector(
    tls_roots: TlsRootConfig,
    verification: TlsVerification,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let allow_http = transport == TransportSecurity::AllowInsecureHttp;

    let builder = match (verification, tls_roots) {
        (TlsVerification::SkipVerify, _) => {
            tracing::warn!(
                target: "cloudsdk_http::security",
                "TLS certificate verification disabled; any server certificate is accepted"
            );
            let client_config =
                tls::skip_verify_client_config().map_err(|e| HttpError::Tls(Box::new(e)))?;
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(client_config)
        }
        (TlsVerification::Verify, TlsRootConfig::WebPki) => {
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_provider_and_webpki_roots(tls::get_crypto_provider())
                .map_err(|e| HttpError::Tls(Box::new(e)))?
        }
        (TlsVerification::Verify, TlsRootConfig::Native) => {
            let client_config =
                tls::native_roots_client_config().map_err(|e| HttpError::Tls(e.into()))?;
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(client_config)
        }
    };

    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
