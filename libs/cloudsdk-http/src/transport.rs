use crate::builder::TransportBuilder;
use crate::config::TransportSecurity;
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::response::{HttpResponse, ResponseBody};
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::buffer::Buffer;
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};

/// Type-erased service between layer composition steps.
///
/// Also the shape of a bare connection and of the hook accepted by
/// [`TransportBuilder::with_auth_layer`].
pub type InnerService = BoxCloneService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

/// Type alias for the future type of the inner service
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Type alias for the buffered service
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// What a transport is built on top of.
///
/// A `Bare` connection gets the whole decorator chain. A `Decorated`
/// one is already a finished [`Transport`] and is handed back unchanged, so
/// building twice never stacks a second chain on top of the first.
pub enum Connection {
    Bare(InnerService),
    Decorated(Transport),
}

impl Connection {
    /// Wrap any round-trip service as a bare connection.
    #[must_use]
    pub fn bare<S>(service: S) -> Self
    where
        S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        Self::Bare(BoxCloneService::new(service))
    }
}

impl From<Transport> for Connection {
    fn from(transport: Transport) -> Self {
        Self::Decorated(transport)
    }
}

/// Decorated HTTP transport
///
/// Owns the whole chain: identity header, proxy-error normalization, timeout
/// retries, optional request signing and tracing, per-attempt timeout and
/// transparent decompression. Built once through [`TransportBuilder`] and
/// never reconfigured.
///
/// `Transport` is `Clone + Send + Sync` and cheap to clone: the chain runs
/// behind a `tower::buffer::Buffer`, so clones share one worker and can be
/// driven from many tasks without a mutex.
///
/// It is itself a `tower::Service` with the same request/response contract as
/// the connection underneath it.
#[derive(Clone)]
pub struct Transport {
    pub(crate) service: BufferedService,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
}

impl Transport {
    /// Create a builder for configuring the transport
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    /// Start a request against an absolute URL
    ///
    /// The URL must carry a scheme and host; `http://` additionally needs
    /// [`TransportSecurity::AllowInsecureHttp`].
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(
            self.service.clone(),
            self.max_body_size,
            method,
            url.to_owned(),
            self.transport_security,
        )
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Run an already-built request through the chain
    ///
    /// # Errors
    /// Returns the chain's `HttpError`, or `ServiceClosed` if the buffer
    /// worker is gone.
    pub async fn send(&self, request: Request<Full<Bytes>>) -> Result<HttpResponse, HttpError> {
        let inner = round_trip(self.service.clone(), request).await?;
        Ok(HttpResponse::new(inner, self.max_body_size))
    }

    /// Maximum response body size applied by [`HttpResponse`] readers.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// Transport security mode used for URL scheme validation.
    #[must_use]
    pub fn transport_security(&self) -> TransportSecurity {
        self.transport_security
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .finish_non_exhaustive()
    }
}

impl Service<Request<Full<Bytes>>> for Transport {
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx).map_err(map_buffer_error)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map_err(map_buffer_error) })
    }
}

/// Wait for the buffer to accept a request, then drive it to completion.
pub async fn round_trip(
    mut service: BufferedService,
    request: Request<Full<Bytes>>,
) -> Result<Response<ResponseBody>, HttpError> {
    service
        .ready()
        .await
        .map_err(map_buffer_error)?
        .call(request)
        .await
        .map_err(map_buffer_error)
}

/// Map buffer errors to `HttpError`
///
/// Errors from the chain come back boxed and are unwrapped; anything else
/// means the buffer worker has shut down.
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_map_buffer_error_unwraps_http_error() {
        let boxed: tower::BoxError = Box::new(HttpError::MissingTraceSink);
        assert!(matches!(
            map_buffer_error(boxed),
            HttpError::MissingTraceSink
        ));
    }

    #[test]
    fn test_map_buffer_error_other_is_service_closed() {
        let boxed: tower::BoxError = "worker gone".into();
        assert!(matches!(map_buffer_error(boxed), HttpError::ServiceClosed));
    }

    #[test]
    fn test_transport_is_send_sync_clone() {
        fn assert_traits<T: Send + Sync + Clone>() {}
        assert_traits::<Transport>();
    }
}
