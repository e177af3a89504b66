//! Human-readable request/response dumps.
//!
//! Each attempt is bracketed by numbered banners:
//!
//! ```text
//! ==================== Start of Request #1 ====================
//! GET /api/v1/platform HTTP/1.1
//! Host: cloud.example.com:12443
//! Authorization: [REDACTED]
//! User-Agent: cloudsdk-rs/0.1.0
//!
//! ==================== End of Request #1 ====================
//! ```
//!
//! Redaction works on the serialized text: only a line that starts with
//! `Authorization: ` is rewritten, whatever the credential scheme.

use parking_lot::Mutex;
use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

/// Marker written in place of a redacted credential.
pub const REDACTED: &str = "[REDACTED]";

const BANNER: &str = "====================";

#[allow(clippy::expect_used)] // good regex, it doesn't panic
static AUTHORIZATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Authorization: [^\r\n]*").expect("static regex should not panic")
});

/// Shared, thread-safe output for trace dumps.
///
/// Cloning is cheap; all clones write to the same underlying writer.
/// Write failures are logged and otherwise ignored so tracing never fails a call.
#[derive(Clone)]
pub struct TraceSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl TraceSink {
    #[must_use]
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Sink writing to the process standard error.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    pub(crate) fn write_text(&self, text: &str) {
        let mut writer = self.writer.lock();
        if let Err(e) = writer
            .write_all(text.as_bytes())
            .and_then(|()| writer.flush())
        {
            tracing::warn!(error = %e, "failed to write trace output");
        }
    }
}

impl fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TraceSink")
    }
}

/// In-memory writer whose clones share one buffer.
///
/// Handy as a [`TraceSink`] target when the dump has to be inspected.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, decoded as lossy UTF-8.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Per-chain trace state: the sink, the redaction switch and the request counter.
#[derive(Clone, Debug)]
pub struct Tracer {
    sink: TraceSink,
    redact_auth: bool,
    counter: Arc<AtomicU64>,
}

impl Tracer {
    #[must_use]
    pub fn new(sink: TraceSink, redact_auth: bool) -> Self {
        Self {
            sink,
            redact_auth,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Claim the next request number (1-based).
    ///
    /// Concurrent callers always get distinct numbers; their order in the
    /// sink is not guaranteed.
    #[must_use]
    pub fn next_request_number(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of requests numbered so far.
    #[must_use]
    pub fn requests_traced(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn request(&self, number: u64, parts: &http::request::Parts, body: &[u8]) {
        let dump = dump_request(parts, body);
        let dump = if self.redact_auth {
            redact_authorization(&dump)
        } else {
            Cow::Borrowed(dump.as_str())
        };
        self.sink.write_text(&framed("Request", number, &dump));
    }

    pub fn response(&self, number: u64, parts: &http::response::Parts, body: &[u8]) {
        let dump = dump_response(parts, body);
        self.sink.write_text(&framed("Response", number, &dump));
    }

    /// Write a one-line notice (retry progress and the like).
    pub fn note(&self, message: &str) {
        self.sink.write_text(&format!("{message}\n"));
    }
}

fn framed(kind: &str, number: u64, dump: &str) -> String {
    format!(
        "{BANNER} Start of {kind} #{number} {BANNER}\n{dump}\n{BANNER} End of {kind} #{number} {BANNER}\n"
    )
}

/// Replace the value of every `Authorization:` line with [`REDACTED`].
#[must_use]
pub fn redact_authorization(dump: &str) -> Cow<'_, str> {
    AUTHORIZATION_LINE.replace_all(dump, format!("Authorization: {REDACTED}").as_str())
}

/// Serialize a request the way it goes on the wire (HTTP/1.1 framing).
#[must_use]
pub fn dump_request(parts: &http::request::Parts, body: &[u8]) -> String {
    let target = parts
        .uri
        .path_and_query()
        .map_or("/", http::uri::PathAndQuery::as_str);
    let mut out = format!(
        "{} {} {}\r\n",
        parts.method,
        target,
        version_str(parts.version)
    );
    if let Some(authority) = parts.uri.authority() {
        out.push_str("Host: ");
        out.push_str(authority.as_str());
        out.push_str("\r\n");
    }
    push_headers(&mut out, &parts.headers, Some(&http::header::HOST));
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(body));
    out
}

/// Serialize a response with its status line, headers and body.
#[must_use]
pub fn dump_response(parts: &http::response::Parts, body: &[u8]) -> String {
    let mut out = format!(
        "{} {} {}\r\n",
        version_str(parts.version),
        parts.status.as_str(),
        parts.status.canonical_reason().unwrap_or_default()
    );
    push_headers(&mut out, &parts.headers, None);
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(body));
    out
}

fn push_headers(out: &mut String, headers: &http::HeaderMap, skip: Option<&http::HeaderName>) {
    let mut lines: Vec<(String, Cow<'_, str>)> = headers
        .iter()
        .filter(|(name, _)| skip != Some(*name))
        .map(|(name, value)| {
            (
                canonical_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()),
            )
        })
        .collect();
    lines.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in lines {
        out.push_str(&name);
        out.push_str(": ");
        out.push_str(&value);
        out.push_str("\r\n");
    }
}

/// `user-agent` -> `User-Agent`
#[must_use]
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
            })
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn version_str(version: http::Version) -> &'static str {
    match version {
        http::Version::HTTP_09 => "HTTP/0.9",
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_2 => "HTTP/2.0",
        http::Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{Request, Response, StatusCode};

    fn request_parts(auth: Option<&str>) -> http::request::Parts {
        let mut builder = Request::builder()
            .method("POST")
            .uri("https://cloud.example.com:12443/api/v1/users?verbose=true")
            .header("user-agent", "cloudsdk-rs/1.0")
            .header("content-type", "application/json");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("user-agent"), "User-Agent");
        assert_eq!(canonical_header_name("authorization"), "Authorization");
        assert_eq!(canonical_header_name("x-request-id"), "X-Request-Id");
        assert_eq!(canonical_header_name("etag"), "Etag");
    }

    #[test]
    fn test_dump_request_layout() {
        let dump = dump_request(&request_parts(None), br#"{"name":"x"}"#);
        assert_eq!(
            dump,
            "POST /api/v1/users?verbose=true HTTP/1.1\r\n\
             Host: cloud.example.com:12443\r\n\
             Content-Type: application/json\r\n\
             User-Agent: cloudsdk-rs/1.0\r\n\
             \r\n\
             {\"name\":\"x\"}"
        );
    }

    #[test]
    fn test_dump_response_layout() {
        let (parts, ()) = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("content-type", "application/json")
            .body(())
            .unwrap()
            .into_parts();
        let dump = dump_response(&parts, b"{}");
        assert_eq!(
            dump,
            "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\n\r\n{}"
        );
    }

    #[test]
    fn test_redaction_replaces_any_scheme() {
        for credential in ["ApiKey c2VjcmV0", "Bearer eyJhbGciOi.x.y", "Basic dXNlcjpwYXNz"] {
            let dump = dump_request(&request_parts(Some(credential)), b"");
            let redacted = redact_authorization(&dump);
            assert!(!redacted.contains(credential));
            assert!(redacted.contains("Authorization: [REDACTED]\r\n"));
            assert!(redacted.contains("User-Agent: cloudsdk-rs/1.0\r\n"));
        }
    }

    #[test]
    fn test_redaction_only_touches_authorization_lines() {
        let text = "X-Authorization: keep\r\nAuthorization: drop\r\n\r\nAuthorization in body";
        let redacted = redact_authorization(text);
        assert_eq!(
            redacted,
            "X-Authorization: keep\r\nAuthorization: [REDACTED]\r\n\r\nAuthorization in body"
        );
    }

    #[test]
    fn test_tracer_request_with_and_without_redaction() {
        let buffer = SharedBuffer::new();
        let tracer = Tracer::new(TraceSink::new(buffer.clone()), true);
        let n = tracer.next_request_number();
        tracer.request(n, &request_parts(Some("ApiKey topsecret")), b"");
        let out = buffer.contents();
        assert!(out.starts_with("==================== Start of Request #1 ===================="));
        assert!(out.contains("==================== End of Request #1 ===================="));
        assert!(!out.contains("topsecret"));

        let buffer = SharedBuffer::new();
        let tracer = Tracer::new(TraceSink::new(buffer.clone()), false);
        let n = tracer.next_request_number();
        tracer.request(n, &request_parts(Some("ApiKey topsecret")), b"");
        assert!(buffer.contents().contains("Authorization: ApiKey topsecret\r\n"));
    }

    #[test]
    fn test_counter_is_shared_between_clones() {
        let tracer = Tracer::new(TraceSink::new(std::io::sink()), true);
        let clone = tracer.clone();
        assert_eq!(tracer.next_request_number(), 1);
        assert_eq!(clone.next_request_number(), 2);
        assert_eq!(tracer.requests_traced(), 2);
    }

    #[test]
    fn test_counter_concurrent_increments_are_not_lost() {
        let tracer = Tracer::new(TraceSink::new(std::io::sink()), true);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracer = tracer.clone();
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| tracer.next_request_number())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut numbers: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), 8000);
        assert_eq!(tracer.requests_traced(), 8000);
    }
}
