#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! # `cloudsdk-api` - caller-facing side of the control-plane SDK
//!
//! - **Routing** (`region` module) - deployment resources are addressed on the
//!   regionless `/api/v1` prefix, everything else on
//!   `/api/v1/regions/<region>` when a region is configured
//! - **Operations** (`operation` module) - method plus path pattern, with
//!   percent-encoded parameter substitution
//! - **Signers** (`auth` module) - `ApiKey` and `BearerToken` credentials
//!   installed as a tower layer inside the transport's retry loop
//! - **Errors** (`error` module) - every failure flattened into one
//!   `"api error"` aggregate
//!
//! ## Example
//!
//! ```rust,ignore
//! use cloudsdk_api::{ApiClient, ApiConfig, ApiKey, Operation, Region};
//! use http::Method;
//! use std::sync::Arc;
//!
//! let client = ApiClient::new(
//!     ApiConfig::new("https://cloud.example.com:12443")
//!         .with_region(Region::new("us-east-1")?)
//!         .with_signer(Arc::new(ApiKey::new(api_key))),
//! )?;
//!
//! let deployment: serde_json::Value = client
//!     .execute(&Operation::new(Method::GET, "/deployments/{deployment_id}").param("deployment_id", id))
//!     .await?;
//! ```

pub mod auth;
mod client;
mod config;
pub mod error;
pub mod operation;
pub mod region;

pub use auth::{
    ApiKey, BearerToken, RequestSigner, SignerLayer, SignerService, TransportBuilderExt,
};
pub use client::{ApiClient, MOCK_API_KEY, MOCK_HOST};
pub use config::ApiConfig;
pub use error::{
    API_ERROR_PREFIX, ApiError, ApiErrorItem, ApiResultExt, ConfigError, unwrap_error,
};
pub use operation::{Operation, OperationError};
pub use region::{API_PREFIX, BasePath, REGIONLESS_FAMILIES, Region, RegionRouter};
