use crate::trace::TraceSink;
use std::time::Duration;

/// Default User-Agent string for outbound requests (`<product>/<version>`)
pub const DEFAULT_USER_AGENT: &str = concat!("cloudsdk-rs/", env!("CARGO_PKG_VERSION"));

/// Default per-attempt request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the first attempt
pub const DEFAULT_RETRIES: usize = 2;

/// Default ceiling for the randomized retry backoff
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Retry policy for timed-out attempts
///
/// Only errors classified as timeouts are retried; the budget is a count,
/// never a wall-clock deadline. Each wait is drawn independently from
/// [`jittered_backoff`](crate::jittered_backoff) against the same ceiling.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt (0 = no retries)
    /// Total attempts = 1 (initial) + `max_retries`
    pub max_retries: usize,

    /// Upper bound of every backoff wait (default: 1s)
    pub backoff_ceiling: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRIES,
            backoff_ceiling: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl RetryConfig {
    /// Create config with no retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Create a policy with `max_retries` retries and the given backoff ceiling
    #[must_use]
    pub fn new(max_retries: usize, backoff_ceiling: Duration) -> Self {
        Self {
            max_retries,
            backoff_ceiling,
        }
    }

    /// Fast policy for tests (3 retries, 1ms ceiling)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            backoff_ceiling: Duration::from_millis(1),
        }
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Server certificate verification mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Validate the server certificate chain and hostname
    #[default]
    Verify,
    /// Accept any server certificate.
    ///
    /// Escape hatch for self-signed installations and development
    /// environments. Handshake signatures are still checked.
    SkipVerify,
}

/// Transport security configuration
///
/// Controls whether the client enforces TLS or allows insecure HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (for testing with mock servers only)
    ///
    /// **WARNING**: This should only be used for local testing with mock servers.
    /// Never use in production as it exposes traffic to interception.
    AllowInsecureHttp,
}

/// Request/response dump settings
///
/// When `enabled`, every attempt is written to `sink` as a numbered dump and
/// the proxy-error normalizer is left out of the chain so the raw body stays
/// visible. A missing sink with `enabled` set is a construction error.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Write full request/response dumps (default: false)
    pub enabled: bool,

    /// Replace the `Authorization` header value in dumps (default: true)
    pub redact_auth: bool,

    /// Destination for dumps; required when `enabled`
    pub sink: Option<TraceSink>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redact_auth: true,
            sink: None,
        }
    }
}

impl TraceConfig {
    /// Enabled tracing into `sink` with credential redaction
    #[must_use]
    pub fn to(sink: TraceSink) -> Self {
        Self {
            enabled: true,
            redact_auth: true,
            sink: Some(sink),
        }
    }
}

/// Transport configuration
///
/// Built once when a client is created and never mutated afterwards. The
/// request timeout travels with this value to every attempt; there is no
/// process-wide default.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-attempt timeout (default: 30 seconds)
    ///
    /// Expiry produces [`HttpError::Timeout`](crate::HttpError::Timeout),
    /// which the retry layer treats as retryable.
    pub request_timeout: Duration,

    /// User-Agent header value (default: `cloudsdk-rs/<version>`)
    pub user_agent: String,

    /// Retry policy for timed-out attempts
    pub retry: RetryConfig,

    /// Transport security mode (default: `TlsOnly`)
    ///
    /// Use `AllowInsecureHttp` only for testing with local mock servers.
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Server certificate verification (default: `Verify`)
    pub tls_verification: TlsVerification,

    /// Request/response dump settings (default: disabled)
    pub trace: TraceConfig,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// Buffer capacity for concurrent request handling (default: 1024)
    pub buffer_capacity: usize,

    /// Timeout for idle connections in the pool (default: 90 seconds)
    ///
    /// Set to `None` to use hyper-util's default idle timeout.
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: RetryConfig::default(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            tls_verification: TlsVerification::default(),
            trace: TraceConfig::default(),
            max_body_size: 10 * 1024 * 1024, // 10 MB
            buffer_capacity: 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl TransportConfig {
    /// Create configuration for testing with mock servers (allows insecure HTTP)
    ///
    /// **WARNING**: This configuration allows plain HTTP connections.
    /// Use only for local testing with mock servers, never in production.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::disabled(),
            transport: TransportSecurity::AllowInsecureHttp,
            max_body_size: 1024 * 1024, // 1 MB
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }
}
