use crate::error::HttpError;
use http::header::{HeaderName, USER_AGENT};
use http::{HeaderValue, Request};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Stamps the product identity on every outbound request.
///
/// The header is `User-Agent` unless another name is given with
/// [`UserAgentLayer::with_header`]. Any value the caller set under that name
/// is dropped first, so exactly one value reaches the wire.
#[derive(Clone, Debug)]
pub struct UserAgentLayer {
    name: HeaderName,
    identity: HeaderValue,
}

impl UserAgentLayer {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if `identity` cannot be sent as a header value
    pub fn try_new(identity: impl AsRef<str>) -> Result<Self, HttpError> {
        Ok(Self {
            name: USER_AGENT,
            identity: HeaderValue::from_str(identity.as_ref())?,
        })
    }

    /// Send the identity under `name` instead of `User-Agent`.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName) -> Self {
        self.name = name;
        self
    }

    /// Value stamped on every request.
    #[must_use]
    pub fn identity(&self) -> &HeaderValue {
        &self.identity
    }
}

impl<S> Layer<S> for UserAgentLayer {
    type Service = UserAgentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UserAgentService {
            inner,
            stamp: self.clone(),
        }
    }
}

/// Created by [`UserAgentLayer`].
#[derive(Clone, Debug)]
pub struct UserAgentService<S> {
    inner: S,
    stamp: UserAgentLayer,
}

impl<S, B> Service<Request<B>> for UserAgentService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // insert() drops every earlier value under the same name
        req.headers_mut()
            .insert(self.stamp.name.clone(), self.stamp.identity.clone());
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::HeaderMap;
    use std::convert::Infallible;
    use tower::ServiceExt;

    /// Hands the request headers back as the response.
    #[derive(Clone)]
    struct Headers;

    impl Service<Request<()>> for Headers {
        type Response = HeaderMap;
        type Error = Infallible;
        type Future = std::future::Ready<Result<HeaderMap, Infallible>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<()>) -> Self::Future {
            std::future::ready(Ok(req.into_parts().0.headers))
        }
    }

    async fn stamped(layer: &UserAgentLayer, req: Request<()>) -> HeaderMap {
        layer.layer(Headers).oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn test_identity_added() {
        let layer = UserAgentLayer::try_new("cloudsdk-rs/1.0.0").unwrap();
        let headers = stamped(&layer, Request::new(())).await;

        assert_eq!(headers[USER_AGENT], "cloudsdk-rs/1.0.0");
    }

    #[tokio::test]
    async fn test_caller_values_replaced() {
        let layer = UserAgentLayer::try_new("cloudsdk-rs/1.0.0").unwrap();
        let req = Request::builder()
            .header(USER_AGENT, "curl/8.0")
            .header(USER_AGENT, "another/3.0")
            .body(())
            .unwrap();
        let headers = stamped(&layer, req).await;

        let values: Vec<_> = headers.get_all(USER_AGENT).iter().collect();
        assert_eq!(values, [layer.identity()]);
    }

    #[tokio::test]
    async fn test_custom_header_name() {
        let name = HeaderName::from_static("x-sdk-identity");
        let layer = UserAgentLayer::try_new("ecctl/1.14.0")
            .unwrap()
            .with_header(name.clone());
        let headers = stamped(&layer, Request::new(())).await;

        assert_eq!(headers[&name], "ecctl/1.14.0");
        assert!(headers.get(USER_AGENT).is_none());
    }

    #[test]
    fn test_invalid_identity_rejected() {
        assert!(matches!(
            UserAgentLayer::try_new("bad\nagent"),
            Err(HttpError::InvalidHeaderValue(_))
        ));
    }
}
