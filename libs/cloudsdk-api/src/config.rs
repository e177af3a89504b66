use std::sync::Arc;

use cloudsdk_http::TransportConfig;

use crate::auth::RequestSigner;
use crate::error::ConfigError;
use crate::region::Region;

/// Everything [`ApiClient::new`](crate::ApiClient::new) needs.
///
/// ```ignore
/// let config = ApiConfig::new("https://cloud.example.com:12443")
///     .with_region(Region::new("us-east-1")?)
///     .with_signer(Arc::new(ApiKey::new(key)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    /// `scheme://host[:port]` of the API endpoint.
    pub host: String,
    /// Region-scoped resources go to `/api/v1/regions/<region>` when set.
    pub region: Option<Region>,
    pub signer: Option<Arc<dyn RequestSigner>>,
    pub transport: TransportConfig,
}

impl ApiConfig {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Check the host and return its normalized origin.
    ///
    /// The host must be an absolute `http`/`https` URL with no path, query or
    /// fragment. A trailing `/` is accepted and dropped.
    pub(crate) fn origin(&self) -> Result<String, ConfigError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ConfigError::MissingHost);
        }
        let invalid = |reason: &str| ConfigError::InvalidHost {
            host: self.host.clone(),
            reason: reason.to_owned(),
        };

        let uri: http::Uri = host
            .parse()
            .map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        match uri.scheme_str() {
            Some("https" | "http") => {}
            Some(_) => return Err(invalid("scheme must be http or https")),
            None => return Err(invalid("missing scheme")),
        }
        if uri.authority().is_none() {
            return Err(invalid("missing host"));
        }
        if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
            return Err(invalid("must not contain a path or query"));
        }

        Ok(host.trim_end_matches('/').to_owned())
    }

    pub(crate) fn require_signer(&self) -> Result<Arc<dyn RequestSigner>, ConfigError> {
        self.signer.clone().ok_or(ConfigError::MissingSigner)
    }
}
