use crate::config::RetryConfig;
use crate::error::{HttpError, TimeoutAware};
use crate::response::ResponseBody;
use crate::trace::Tracer;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Tower layer that retries timed-out attempts with randomized backoff
///
/// Only errors reporting [`TimeoutAware::is_timeout`] are retried. Responses,
/// whatever their status, and every other error pass through on the first
/// occurrence.
#[derive(Clone)]
pub struct RetryLayer {
    config: RetryConfig,
    tracer: Option<Tracer>,
}

impl RetryLayer {
    /// Create a new `RetryLayer` with the specified configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            tracer: None,
        }
    }

    /// Also write "retrying" / "giving up" notices to the trace sink
    #[must_use]
    pub fn with_tracer(config: RetryConfig, tracer: Option<Tracer>) -> Self {
        Self { config, tracer }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
            tracer: self.tracer.clone(),
        }
    }
}

/// Service that implements the timeout retry loop
///
/// The budget is a retry count; there is no wall-clock cap. Every wait is a
/// fresh draw from [`jittered_backoff`] against the same ceiling.
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
    tracer: Option<Tracer>,
}

impl<S> Service<Request<Full<Bytes>>> for RetryService<S>
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
        // Swap so we consume the instance that was poll_ready'd,
        // leaving a fresh clone for the next poll_ready cycle.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();
        let tracer = self.tracer.clone();

        let (parts, body) = req.into_parts();
        let http_version = parts.version;
        let extensions = parts.extensions.clone();
        let parts = Arc::new(parts);

        Box::pin(async move {
            let method = parts.method.clone();
            let host = parts
                .uri
                .authority()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);

            let mut remaining = config.max_retries;
            loop {
                // The same request is replayed on every attempt
                let mut req = Request::from_parts((*parts).clone(), body.clone());
                *req.version_mut() = http_version;
                *req.extensions_mut() = extensions.clone();

                let mut svc = inner.clone();
                svc.ready().await?;

                let err = match svc.call(req).await {
                    Err(err) if err.is_timeout() => err,
                    other => return other,
                };

                if remaining == 0 {
                    tracing::warn!(
                        retries = config.max_retries,
                        error = %err,
                        method = %method,
                        host = %host,
                        "Request timed out, retries exhausted"
                    );
                    if let Some(tracer) = &tracer {
                        tracer.note(&format!(
                            "request timed out, giving up after {} retries",
                            config.max_retries
                        ));
                    }
                    return Err(err);
                }

                let backoff = jittered_backoff(config.backoff_ceiling);
                remaining -= 1;

                tracing::debug!(
                    retry = config.max_retries - remaining,
                    remaining,
                    error = %err,
                    method = %method,
                    host = %host,
                    backoff_ms = backoff.as_millis(),
                    "Retrying request after timeout"
                );
                if let Some(tracer) = &tracer {
                    tracer.note(&format!(
                        "request timed out, retrying in {}ms ({remaining} retries left)",
                        backoff.as_millis()
                    ));
                }
                tokio::time::sleep(backoff).await;
            }
        })
    }
}

/// Draw a randomized wait for one retry.
///
/// The wait is `ceiling / (1 + r * 10)` with `r` uniform in `[0, 1)`, so it
/// lies in `(ceiling / 11, ceiling]`. This is not exponential backoff: every
/// retry draws independently against the same ceiling.
#[must_use]
pub fn jittered_backoff(ceiling: Duration) -> Duration {
    let r: f64 = rand::rng().random();
    jitter_from(ceiling, r)
}

/// Deterministic core of [`jittered_backoff`] for a given draw `r`.
///
/// Non-finite draws are treated as 0 and the draw is clamped to `[0, 1]`.
#[must_use]
pub fn jitter_from(ceiling: Duration, r: f64) -> Duration {
    let r = if r.is_finite() { r.clamp(0.0, 1.0) } else { 0.0 };
    ceiling.div_f64(1.0 + r * 10.0)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::response::full_body;
    use crate::trace::{SharedBuffer, TraceSink};
    use http::{Method, StatusCode};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Step {
        Timeout,
        Refused,
        Status(StatusCode),
    }

    /// Plays back a fixed script of outcomes and counts calls.
    #[derive(Clone)]
    struct ScriptedService {
        steps: Arc<Mutex<VecDeque<Step>>>,
        calls: Arc<Mutex<usize>>,
    }

    impl ScriptedService {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Arc::new(Mutex::new(steps.into())),
                calls: Arc::new(Mutex::new(0)),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl Service<Request<Full<Bytes>>> for ScriptedService {
        type Response = Response<ResponseBody>;
        type Error = HttpError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Full<Bytes>>) -> Self::Future {
            *self.calls.lock().unwrap() += 1;
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Step::Status(StatusCode::OK));
            Box::pin(async move {
                match step {
                    Step::Timeout => Err(HttpError::Timeout(Duration::from_millis(5))),
                    Step::Refused => Err(HttpError::Transport(Box::new(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    )))),
                    Step::Status(status) => Ok(Response::builder()
                        .status(status)
                        .body(full_body(Bytes::new()))
                        .unwrap()),
                }
            })
        }
    }

    fn request(method: Method) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri("http://example.com/api/v1/platform")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap()
    }

    fn fast(max_retries: usize) -> RetryConfig {
        RetryConfig::new(max_retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_successful_request_not_retried() {
        let service = ScriptedService::new(vec![]);
        let mut retry = RetryLayer::new(fast(3)).layer(service.clone());

        let resp = retry.call(request(Method::GET)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_then_success() {
        let service = ScriptedService::new(vec![Step::Timeout, Step::Timeout]);
        let buffer = SharedBuffer::new();
        let tracer = Tracer::new(TraceSink::new(buffer.clone()), true);
        let layer = RetryLayer::with_tracer(fast(2), Some(tracer));
        let mut retry = layer.layer(service.clone());

        let resp = retry.call(request(Method::GET)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(service.calls(), 3);

        let out = buffer.contents();
        assert_eq!(out.matches("retrying").count(), 2);
        assert_eq!(out.matches("giving up").count(), 0);
        assert!(out.contains("(1 retries left)"));
        assert!(out.contains("(0 retries left)"));
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_retries() {
        let service =
            ScriptedService::new(vec![Step::Timeout, Step::Timeout, Step::Timeout, Step::Timeout]);
        let buffer = SharedBuffer::new();
        let tracer = Tracer::new(TraceSink::new(buffer.clone()), true);
        let mut retry = RetryLayer::with_tracer(fast(3), Some(tracer)).layer(service.clone());

        let err = retry.call(request(Method::GET)).await.unwrap_err();
        assert!(matches!(err, HttpError::Timeout(_)));
        assert_eq!(service.calls(), 4);

        let out = buffer.contents();
        assert_eq!(out.matches("retrying").count(), 3);
        assert_eq!(out.matches("giving up").count(), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_returns_first_timeout() {
        let service = ScriptedService::new(vec![Step::Timeout]);
        let mut retry = RetryLayer::new(RetryConfig::disabled()).layer(service.clone());

        let err = retry.call(request(Method::GET)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_timeout_error_not_retried() {
        let service = ScriptedService::new(vec![Step::Refused]);
        let mut retry = RetryLayer::new(fast(5)).layer(service.clone());

        let err = retry.call(request(Method::GET)).await.unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)));
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_error_status_not_retried() {
        let service = ScriptedService::new(vec![Step::Status(StatusCode::SERVICE_UNAVAILABLE)]);
        let mut retry = RetryLayer::new(fast(5)).layer(service.clone());

        let resp = retry.call(request(Method::GET)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_post_retried_on_timeout() {
        let service = ScriptedService::new(vec![Step::Timeout]);
        let mut retry = RetryLayer::new(fast(1)).layer(service.clone());

        let resp = retry.call(request(Method::POST)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(service.calls(), 2);
    }

    #[test]
    fn test_jitter_bounds() {
        let ceiling = Duration::from_secs(1);
        for _ in 0..1000 {
            let wait = jittered_backoff(ceiling);
            assert!(wait > Duration::ZERO, "wait must never be zero");
            assert!(wait <= ceiling, "wait {wait:?} above ceiling");
            assert!(wait > ceiling / 11 - Duration::from_nanos(1));
        }
    }

    #[test]
    fn test_jitter_formula() {
        let ceiling = Duration::from_secs(1);
        assert_eq!(jitter_from(ceiling, 0.0), ceiling);
        assert_eq!(jitter_from(ceiling, 0.5), ceiling.div_f64(6.0));
        assert_eq!(jitter_from(ceiling, f64::NAN), ceiling);
        assert_eq!(jitter_from(ceiling, 7.0), ceiling.div_f64(11.0));
        assert_eq!(jitter_from(Duration::ZERO, 0.3), Duration::ZERO);
    }
}
