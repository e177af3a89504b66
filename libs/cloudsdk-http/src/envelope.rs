//! Canonical JSON error envelope returned by the control-plane API.
//!
//! ```json
//! {"errors":[{"code":"<code>","fields":["<field path>"],"message":"<text>"}]}
//! ```
//!
//! Upstream API errors arrive in this shape; intermediary error pages are
//! rewritten into it by the proxy-error layer so decoding never sees HTML.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content type used for the envelope and every substituted body.
pub const APPLICATION_JSON: &str = "application/json";

/// A single API error entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Machine-readable error code
    pub code: String,
    /// Field paths the error refers to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    /// Human-readable description
    pub message: String,
}

impl ErrorEntry {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            fields: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.get_or_insert_with(Vec::new).push(field.into());
        self
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(fields) = self.fields.as_ref().filter(|v| !v.is_empty()) {
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}

/// List of error entries as sent by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorEntry>,
}

impl ErrorEnvelope {
    /// Parse a response body; `None` unless it is an envelope with at least one entry.
    #[must_use]
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(body)
            .ok()
            .filter(|envelope| !envelope.errors.is_empty())
    }

    /// Envelope standing in for an intermediary's non-JSON error page.
    ///
    /// The code is the numeric status, the single field records
    /// `"<METHOD> <escaped path>"`, and the message is the status reason.
    #[must_use]
    pub fn for_proxy_error(status: http::StatusCode, method: &http::Method, path: &str) -> Self {
        let entry = ErrorEntry::new(
            status.as_u16().to_string(),
            status.canonical_reason().unwrap_or_default(),
        )
        .with_field(format!("{method} {path}"));
        Self {
            errors: vec![entry],
        }
    }

    /// Serialize to a JSON body.
    ///
    /// # Errors
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_proxy_error_wire_shape() {
        let envelope = ErrorEnvelope::for_proxy_error(
            http::StatusCode::BAD_GATEWAY,
            &http::Method::GET,
            "/api/v1/regions/us-east-1/platform",
        );
        let value: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"errors": [{
                "code": "502",
                "fields": ["GET /api/v1/regions/us-east-1/platform"],
                "message": "Bad Gateway"
            }]})
        );
    }

    #[test]
    fn test_proxy_error_key_order() {
        let envelope = ErrorEnvelope::for_proxy_error(
            http::StatusCode::SERVICE_UNAVAILABLE,
            &http::Method::POST,
            "/api/v1/users",
        );
        let text = String::from_utf8(envelope.to_bytes().unwrap().to_vec()).unwrap();
        assert_eq!(
            text,
            r#"{"errors":[{"code":"503","fields":["POST /api/v1/users"],"message":"Service Unavailable"}]}"#
        );
    }

    #[test]
    fn test_parse_api_body() {
        let body = br#"{"errors":[{"code":"deployments.not_found","message":"not found"}]}"#;
        let envelope = ErrorEnvelope::parse(body).unwrap();
        assert_eq!(envelope.errors.len(), 1);
        assert_eq!(envelope.errors[0].code, "deployments.not_found");
        assert_eq!(envelope.errors[0].fields, None);
    }

    #[test]
    fn test_parse_rejects_other_bodies() {
        assert!(ErrorEnvelope::parse(b"<html>bad gateway</html>").is_none());
        assert!(ErrorEnvelope::parse(br#"{"errors":[]}"#).is_none());
        assert!(ErrorEnvelope::parse(br#"{"message":"nope"}"#).is_none());
    }

    #[test]
    fn test_display_joins_entries() {
        let envelope = ErrorEnvelope {
            errors: vec![
                ErrorEntry::new("a.code", "first").with_field("body.name"),
                ErrorEntry::new("b.code", "second"),
            ],
        };
        assert_eq!(
            envelope.to_string(),
            "a.code: first (body.name); b.code: second"
        );
    }
}
