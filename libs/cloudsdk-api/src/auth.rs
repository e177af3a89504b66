use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use cloudsdk_http::{HttpError, TransportBuilder};
use http::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use http::{Request, Response};
use secrecy::{ExposeSecret, SecretString};
use tower::{Layer, Service, ServiceExt};

/// Credential capability that adds proof of identity to an outgoing request.
///
/// Runs once per attempt, so a signer that refreshes credentials sees every
/// retry.
pub trait RequestSigner: fmt::Debug + Send + Sync {
    /// # Errors
    ///
    /// Returns an [`HttpError`] if the credential cannot be encoded as a
    /// header value.
    fn sign(&self, headers: &mut HeaderMap) -> Result<(), HttpError>;
}

fn authorization(scheme: &str, secret: &SecretString) -> Result<HeaderValue, HttpError> {
    let mut value = HeaderValue::try_from(format!("{scheme} {}", secret.expose_secret()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// `Authorization: ApiKey <key>`
#[derive(Debug, Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }
}

impl RequestSigner for ApiKey {
    fn sign(&self, headers: &mut HeaderMap) -> Result<(), HttpError> {
        headers.insert(AUTHORIZATION, authorization("ApiKey", &self.0)?);
        Ok(())
    }
}

/// `Authorization: Bearer <token>`
#[derive(Debug, Clone)]
pub struct BearerToken(SecretString);

impl BearerToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl RequestSigner for BearerToken {
    fn sign(&self, headers: &mut HeaderMap) -> Result<(), HttpError> {
        headers.insert(AUTHORIZATION, authorization("Bearer", &self.0)?);
        Ok(())
    }
}

/// Tower layer that runs a [`RequestSigner`] on every request.
#[derive(Clone, Debug)]
pub struct SignerLayer {
    signer: Arc<dyn RequestSigner>,
}

impl SignerLayer {
    #[must_use]
    pub fn new(signer: Arc<dyn RequestSigner>) -> Self {
        Self { signer }
    }
}

impl<S> Layer<S> for SignerLayer {
    type Service = SignerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SignerService {
            inner,
            signer: Arc::clone(&self.signer),
        }
    }
}

/// Created by [`SignerLayer`].
#[derive(Clone, Debug)]
pub struct SignerService<S> {
    inner: S,
    signer: Arc<dyn RequestSigner>,
}

impl<S, B, ResBody> Service<Request<B>> for SignerService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        if let Err(e) = self.signer.sign(req.headers_mut()) {
            return Box::pin(async { Err(e) });
        }

        // Clone-swap pattern (Tower Service contract).
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move { inner.call(req).await })
    }
}

/// Extension trait for installing a signer on a [`TransportBuilder`].
pub trait TransportBuilderExt {
    /// Sign every attempt with `signer`, inside the retry loop.
    #[must_use]
    fn with_signer(self, signer: Arc<dyn RequestSigner>) -> Self;
}

impl TransportBuilderExt for TransportBuilder {
    fn with_signer(self, signer: Arc<dyn RequestSigner>) -> Self {
        let layer = SignerLayer::new(signer);
        self.with_auth_layer(move |svc| {
            tower::ServiceBuilder::new()
                .layer(layer)
                .service(svc)
                .boxed_clone()
        })
    }
}
