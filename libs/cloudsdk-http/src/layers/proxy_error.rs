use crate::envelope::{APPLICATION_JSON, ErrorEnvelope};
use crate::error::HttpError;
use crate::response::{ResponseBody, full_body};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that rewrites HTML error pages into the canonical error envelope
///
/// Load balancers and intercepting proxies answer with generic HTML pages
/// instead of the upstream JSON error. Any response whose content type is
/// `text/html` gets its body replaced by
/// [`ErrorEnvelope::for_proxy_error`] and its content type set to JSON.
/// Only installed when request tracing is off, so traced runs keep the raw page.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyErrorLayer;

impl<S> Layer<S> for ProxyErrorLayer {
    type Service = ProxyErrorService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ProxyErrorService { inner }
    }
}

#[derive(Clone)]
pub struct ProxyErrorService<S> {
    inner: S,
}

impl<S> Service<Request<Full<Bytes>>> for ProxyErrorService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let response = fut.await?;
            if !is_html(response.headers()) {
                return Ok(response);
            }
            normalize(response, &method, &path)
        })
    }
}

/// `true` when the content type names an HTML document.
#[must_use]
pub fn is_html(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    match value.parse::<mime::Mime>() {
        Ok(mime) => mime.type_() == mime::TEXT && mime.subtype() == mime::HTML,
        Err(_) => value.to_ascii_lowercase().contains("text/html"),
    }
}

fn normalize(
    response: Response<ResponseBody>,
    method: &Method,
    path: &str,
) -> Result<Response<ResponseBody>, HttpError> {
    let (mut parts, _page) = response.into_parts();
    let envelope = ErrorEnvelope::for_proxy_error(parts.status, method, path);
    let body = envelope.to_bytes()?;

    tracing::debug!(
        status = parts.status.as_u16(),
        method = %method,
        path = %path,
        "Replaced HTML error page with error envelope"
    );

    parts
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    Ok(Response::from_parts(parts, full_body(body)))
}
