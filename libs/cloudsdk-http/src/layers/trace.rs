use crate::error::HttpError;
use crate::response::{BufferedBody, ResponseBody, buffer_body, full_body, prefixed_body};
use crate::trace::Tracer;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that writes numbered request/response dumps to the trace sink
///
/// Sits inside the retry loop, so every attempt gets its own number.
/// The response body is buffered to produce the dump and handed on as a
/// fresh in-memory body, so callers still read it in full. A body over
/// `max_body_size` is dumped truncated and passed on unchanged.
#[derive(Clone)]
pub struct TraceLayer {
    tracer: Tracer,
    max_body_size: usize,
}

impl TraceLayer {
    #[must_use]
    pub fn new(tracer: Tracer, max_body_size: usize) -> Self {
        Self {
            tracer,
            max_body_size,
        }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            tracer: self.tracer.clone(),
            max_body_size: self.max_body_size,
        }
    }
}

#[derive(Clone)]
pub struct TraceService<S> {
    inner: S,
    tracer: Tracer,
    max_body_size: usize,
}

impl<S> Service<Request<Full<Bytes>>> for TraceService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let tracer = self.tracer.clone();
        let max_body_size = self.max_body_size;

        Box::pin(async move {
            let number = tracer.next_request_number();

            let (parts, body) = req.into_parts();
            let body_bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(never) => match never {},
            };
            tracer.request(number, &parts, &body_bytes);

            let req = Request::from_parts(parts, Full::new(body_bytes));
            let response = match inner.call(req).await {
                Ok(response) => response,
                Err(err) => {
                    tracer.note(&format!("request #{number} failed: {err}"));
                    return Err(err);
                }
            };

            let (parts, body) = response.into_parts();
            let body = match buffer_body(body, max_body_size).await? {
                BufferedBody::Complete(bytes) => {
                    tracer.response(number, &parts, &bytes);
                    full_body(bytes)
                }
                // Dump the first max_body_size bytes and leave the limit to the reader
                BufferedBody::Overflow { head, rest } => {
                    tracer.response(number, &parts, &head[..max_body_size]);
                    tracer.note(&format!(
                        "response #{number} body exceeds {max_body_size} bytes, dump truncated"
                    ));
                    prefixed_body(head, rest)
                }
            };

            Ok(Response::from_parts(parts, body))
        })
    }
}
