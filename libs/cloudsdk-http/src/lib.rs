#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Decorated HTTP transport for the cloud control-plane SDK
//!
//! Every request made by an SDK client goes through one tower stack built by
//! [`TransportBuilder`]:
//! - the configured User-Agent is always stamped on the request
//! - attempts that time out are retried a bounded number of times with a
//!   randomized wait; nothing else is retried
//! - HTML error pages injected by proxies are rewritten into the canonical
//!   JSON [`ErrorEnvelope`]
//! - optionally, every attempt is dumped to a [`TraceSink`] with the
//!   `Authorization` value redacted
//! - TLS via rustls (HTTPS only by default), with a skip-verify escape hatch
//! - transparent response decompression (gzip, brotli, deflate)
//!
//! # Example
//!
//! ```ignore
//! use cloudsdk_http::{RetryConfig, Transport};
//! use std::time::Duration;
//!
//! let transport = Transport::builder()
//!     .timeout(Duration::from_secs(10))
//!     .retry(RetryConfig::new(3, Duration::from_secs(1)))
//!     .build()?;
//!
//! let platform: serde_json::Value = transport
//!     .get("https://cloud.example.com:12443/api/v1/platform")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```

mod builder;
mod config;
mod envelope;
mod error;
mod layers;
pub mod mock;
mod request;
mod response;
mod tls;
pub mod trace;
mod transport;

pub use builder::TransportBuilder;
pub use config::{
    DEFAULT_RETRIES, DEFAULT_RETRY_BACKOFF, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, RetryConfig,
    TlsRootConfig, TlsVerification, TraceConfig, TransportConfig, TransportSecurity,
};
pub use envelope::{APPLICATION_JSON, ErrorEntry, ErrorEnvelope};
pub use error::{HttpError, InvalidUriKind, TimeoutAware};
pub use layers::{
    ProxyErrorLayer, ProxyErrorService, RetryLayer, RetryService, TraceLayer, TraceService,
    UserAgentLayer, UserAgentService, is_html, jitter_from, jittered_backoff,
};
pub use mock::{MockResponse, MockTransport};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, ResponseBody, full_body};
pub use trace::{SharedBuffer, TraceSink, Tracer};
pub use transport::{Connection, InnerService, ServiceFuture, Transport};
