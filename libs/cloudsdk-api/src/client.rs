use std::sync::Arc;

use cloudsdk_http::{
    APPLICATION_JSON, Connection, HttpResponse, MockResponse, MockTransport, RequestBuilder,
    Transport, TransportBuilder, TransportConfig,
};
use http::HeaderValue;
use http::header::ACCEPT;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::auth::{ApiKey, TransportBuilderExt};
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResultExt, ConfigError};
use crate::operation::{Operation, OperationError};
use crate::region::{Region, RegionRouter};

/// Host used by [`ApiClient::mock`]. Never resolved.
pub const MOCK_HOST: &str = "https://mock.cloudsdk.invalid";

/// API key used by [`ApiClient::mock`].
pub const MOCK_API_KEY: &str = "dummy";

/// Region-aware API client
///
/// Binds a [`RegionRouter`] to one decorated [`Transport`]. Operation
/// functions describe a call with an [`Operation`]; the client renders its
/// path, picks the base path and sends it through the transport. Failures come
/// back as [`ApiError`].
///
/// Cheap to clone; clones share the transport and its connection pool.
#[derive(Clone, Debug)]
pub struct ApiClient {
    transport: Transport,
    router: RegionRouter,
}

impl ApiClient {
    /// Build a client with a fresh hyper connection.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for a missing or malformed host, a missing
    /// signer, or an invalid transport configuration.
    pub fn new(config: ApiConfig) -> Result<Self, ConfigError> {
        Self::build(config, None)
    }

    /// Build a client on top of an existing connection.
    ///
    /// A [`Connection::Decorated`] transport is used as is: it is assumed to
    /// be fully configured already, so neither the transport settings nor the
    /// signer from `config` are applied to it.
    ///
    /// # Errors
    ///
    /// Same as [`ApiClient::new`].
    pub fn with_connection(
        config: ApiConfig,
        connection: impl Into<Connection>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, Some(connection.into()))
    }

    /// Client over a canned-response transport, for tests.
    ///
    /// # Errors
    ///
    /// Only fails if the test transport cannot be built.
    pub fn mock(responses: Vec<MockResponse>) -> Result<Self, ConfigError> {
        Self::mock_with(&MockTransport::new(responses), None)
    }

    /// Like [`ApiClient::mock`], sharing `mock` so the test can inspect it.
    ///
    /// # Errors
    ///
    /// Only fails if the test transport cannot be built.
    pub fn mock_with(mock: &MockTransport, region: Option<Region>) -> Result<Self, ConfigError> {
        let config = ApiConfig {
            region,
            ..ApiConfig::new(MOCK_HOST)
                .with_signer(Arc::new(ApiKey::new(MOCK_API_KEY)))
                .with_transport(TransportConfig::for_testing())
        };
        Self::with_connection(config, Connection::bare(mock.clone()))
    }

    fn build(config: ApiConfig, connection: Option<Connection>) -> Result<Self, ConfigError> {
        let origin = config.origin()?;
        let signer = config.require_signer()?;

        let mut builder = TransportBuilder::with_config(config.transport).with_signer(signer);
        if let Some(connection) = connection {
            builder = builder.with_connection(connection);
        }
        let transport = builder.build()?;

        tracing::debug!(
            origin = %origin,
            region = config.region.as_ref().map_or("", Region::as_str),
            "api client ready"
        );

        Ok(Self {
            transport,
            router: RegionRouter::new(&origin, config.region),
        })
    }

    #[must_use]
    pub fn router(&self) -> &RegionRouter {
        &self.router
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Start a request for `operation` against its routed base path.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationError`] if the path cannot be rendered.
    pub fn request(&self, operation: &Operation) -> Result<RequestBuilder, OperationError> {
        let path = operation.render()?;
        let url = self.router.route(operation).url(&path);
        tracing::trace!(method = %operation.method(), url = %url, "api request");
        Ok(self
            .transport
            .request(operation.method().clone(), &url)
            .typed_header(ACCEPT, HeaderValue::from_static(APPLICATION_JSON)))
    }

    /// Send `operation` without a body.
    ///
    /// Non-2xx responses are returned as is; use the [`HttpResponse`]
    /// readers to turn them into errors.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] for render or transport failures.
    pub async fn send(&self, operation: &Operation) -> Result<HttpResponse, ApiError> {
        self.request(operation)?.send().await.api_err()
    }

    /// Send `operation` and decode a JSON success body.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`]; a structured API error body contributes one
    /// item per entry.
    pub async fn execute<T: DeserializeOwned>(&self, operation: &Operation) -> Result<T, ApiError> {
        self.send(operation).await?.json().await.api_err()
    }

    /// Send `operation` with a JSON body and decode a JSON success body.
    ///
    /// # Errors
    ///
    /// Same as [`ApiClient::execute`], plus body serialization failures.
    pub async fn execute_json<B, T>(&self, operation: &Operation, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(operation)?
            .json(body)?
            .send()
            .await?
            .json()
            .await
            .api_err()
    }
}
