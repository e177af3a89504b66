#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Concurrent callers sharing one canned-response list.

use bytes::Bytes;
use cloudsdk_http::mock::MockError;
use cloudsdk_http::{
    Connection, HttpError, MockResponse, MockTransport, RetryConfig, SharedBuffer, TraceSink,
    Transport,
};
use http::{Request, StatusCode};
use http_body_util::Full;
use std::collections::HashSet;
use tower::ServiceExt;

const PROGRAMMED: usize = 40;
const CALLERS: usize = 64;

fn programmed() -> Vec<MockResponse> {
    (0..PROGRAMMED)
        .map(|i| {
            MockResponse::new(StatusCode::OK).with_header(
                http::header::HeaderName::from_static("x-index"),
                http::HeaderValue::from(i),
            )
        })
        .collect()
}

fn exhausted_index(err: &HttpError) -> usize {
    let HttpError::Transport(source) = err else {
        panic!("expected Transport error, got {err}");
    };
    match source.downcast_ref::<MockError>() {
        Some(MockError::Exhausted { index, .. }) => *index,
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn direct_calls_consume_each_response_once() {
    let mock = MockTransport::new(programmed());

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let mock = mock.clone();
            tokio::spawn(async move {
                let req = Request::builder()
                    .uri("https://h/api/v1/platform")
                    .body(Full::new(Bytes::new()))
                    .unwrap();
                mock.oneshot(req).await
            })
        })
        .collect();

    let mut served = HashSet::new();
    let mut exhausted = HashSet::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(resp) => {
                let index: usize = resp.headers()["x-index"].to_str().unwrap().parse().unwrap();
                assert!(served.insert(index), "response #{index} served twice");
            }
            Err(err) => {
                assert!(exhausted.insert(exhausted_index(&err)));
            }
        }
    }

    assert_eq!(served.len(), PROGRAMMED);
    assert_eq!(served, (0..PROGRAMMED).collect());
    assert_eq!(exhausted, (PROGRAMMED..CALLERS).collect());
    assert_eq!(mock.calls(), CALLERS);
    assert_eq!(mock.remaining(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn calls_through_transport_consume_each_response_once() {
    let mock = MockTransport::new(programmed());
    let buffer = SharedBuffer::new();
    let transport = Transport::builder()
        .with_connection(Connection::bare(mock.clone()))
        .retry(RetryConfig::disabled())
        .trace_to(TraceSink::new(buffer.clone()))
        .build()
        .unwrap();

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .get("https://cloud.example.com/api/v1/platform")
                    .send()
                    .await
            })
        })
        .collect();

    let mut ok = 0;
    let mut failed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(resp) => {
                assert_eq!(resp.status(), StatusCode::OK);
                ok += 1;
            }
            Err(err) => {
                assert!(exhausted_index(&err) >= PROGRAMMED);
                failed += 1;
            }
        }
    }

    assert_eq!(ok, PROGRAMMED);
    assert_eq!(failed, CALLERS - PROGRAMMED);

    // Every attempt got its own trace number
    let out = buffer.contents();
    for n in 1..=CALLERS {
        assert!(out.contains(&format!("End of Request #{n} ")), "missing #{n}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn push_while_calling_never_skips_an_entry() {
    let mock = MockTransport::new(Vec::new());
    let writer = {
        let mock = mock.clone();
        tokio::spawn(async move {
            for _ in 0..PROGRAMMED {
                mock.push(MockResponse::new(StatusCode::OK));
                tokio::task::yield_now().await;
            }
        })
    };

    let mut seen = HashSet::new();
    for _ in 0..PROGRAMMED {
        let req = Request::builder()
            .uri("https://h/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        match mock.clone().oneshot(req).await {
            Ok(_) => {}
            Err(err) => {
                assert!(seen.insert(exhausted_index(&err)));
            }
        }
    }
    writer.await.unwrap();
    assert_eq!(mock.calls(), PROGRAMMED);
}
