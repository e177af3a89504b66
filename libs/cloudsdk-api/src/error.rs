use cloudsdk_http::{HttpError, TimeoutAware};
use http::StatusCode;
use std::fmt;
use thiserror::Error;

use crate::operation::OperationError;

/// Prefix carried by every [`ApiError`] message.
pub const API_ERROR_PREFIX: &str = "api error";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while assembling an [`ApiClient`](crate::ApiClient).
///
/// All of them are detected before any network I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api host is required")]
    MissingHost,

    #[error("invalid api host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("invalid region '{region}': {reason}")]
    InvalidRegion { region: String, reason: &'static str },

    #[error("a request signer is required")]
    MissingSigner,

    #[error(transparent)]
    Transport(#[from] HttpError),
}

/// One entry of an [`ApiError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiErrorItem {
    /// Machine-readable code; absent for failures that never reached the API.
    pub code: Option<String>,
    pub message: String,
    pub fields: Vec<String>,
}

impl ApiErrorItem {
    #[must_use]
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: Vec::new(),
        }
    }
}

impl fmt::Display for ApiErrorItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "{code}: ")?;
        }
        f.write_str(&self.message)?;
        if !self.fields.is_empty() {
            write!(f, " ({})", self.fields.join(", "))?;
        }
        Ok(())
    }
}

/// Aggregated error surfaced to SDK callers
///
/// Every failure path ends here: structured API error bodies contribute one
/// item per entry, anything else becomes a single item carrying the original
/// message. The list is never empty.
///
/// ```text
/// api error: 2 errors occurred:
///     * deployments.not_found: Deployment [d-1] was not found (deployment_id)
///     * root.unauthorized: The supplied authentication is invalid
/// ```
#[derive(Debug, Error)]
#[error("{}: {}", API_ERROR_PREFIX, Items(.items))]
pub struct ApiError {
    status: Option<StatusCode>,
    items: Vec<ApiErrorItem>,
    #[source]
    source: Option<BoxError>,
}

impl ApiError {
    /// Build an aggregate from already-collected items.
    ///
    /// An empty list is replaced by one generic item so the aggregate is
    /// never empty.
    #[must_use]
    pub fn from_items(status: Option<StatusCode>, items: Vec<ApiErrorItem>) -> Self {
        let items = if items.is_empty() {
            vec![ApiErrorItem::new(None, "unknown error")]
        } else {
            items
        };
        Self {
            status,
            items,
            source: None,
        }
    }

    fn wrap(status: Option<StatusCode>, source: BoxError) -> Self {
        Self {
            status,
            items: vec![ApiErrorItem::new(None, source.to_string())],
            source: Some(source),
        }
    }

    /// HTTP status of the failed response, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    #[must_use]
    pub fn items(&self) -> &[ApiErrorItem] {
        &self.items
    }

    /// Codes of all items that carry one, in order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| item.code.as_deref())
    }

    /// The transport error this aggregate was built from, if any.
    #[must_use]
    pub fn http_error(&self) -> Option<&HttpError> {
        self.source.as_ref()?.downcast_ref::<HttpError>()
    }
}

impl TimeoutAware for ApiError {
    fn is_timeout(&self) -> bool {
        self.http_error().is_some_and(TimeoutAware::is_timeout)
    }
}

impl From<HttpError> for ApiError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Api { status, envelope } => {
                let items = envelope
                    .errors
                    .iter()
                    .map(|entry| ApiErrorItem {
                        code: Some(entry.code.clone()),
                        message: entry.message.clone(),
                        fields: entry.fields.clone().unwrap_or_default(),
                    })
                    .collect();
                let mut api = Self::from_items(Some(status), items);
                api.source = Some(Box::new(HttpError::Api { status, envelope }));
                api
            }
            HttpError::HttpStatus { status, .. } => Self::wrap(Some(status), Box::new(err)),
            other => Self::wrap(None, Box::new(other)),
        }
    }
}

impl From<OperationError> for ApiError {
    fn from(err: OperationError) -> Self {
        Self::wrap(None, Box::new(err))
    }
}

/// Flatten an optional transport error into the caller-facing aggregate.
///
/// No error in, no error out: callers never see an empty aggregate.
#[must_use]
pub fn unwrap_error(err: Option<HttpError>) -> Option<ApiError> {
    err.map(ApiError::from)
}

/// Map the error side of a transport result into an [`ApiError`].
pub trait ApiResultExt<T> {
    /// # Errors
    ///
    /// Returns the unwrapped [`ApiError`] when `self` is `Err`.
    fn api_err(self) -> Result<T, ApiError>;
}

impl<T, E> ApiResultExt<T> for Result<T, E>
where
    E: Into<ApiError>,
{
    fn api_err(self) -> Result<T, ApiError> {
        self.map_err(Into::into)
    }
}

struct Items<'a>(&'a [ApiErrorItem]);

impl fmt::Display for Items<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            f.write_str("1 error occurred:\n")?;
        } else {
            writeln!(f, "{} errors occurred:", self.0.len())?;
        }
        for item in self.0 {
            writeln!(f, "\t* {item}")?;
        }
        f.write_str("\n")
    }
}
