//! Base-path selection for region-scoped and regionless API resources.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::operation::Operation;

/// Path prefix of every API operation.
pub const API_PREFIX: &str = "/api/v1";

/// Path-pattern families that are addressed without a region.
///
/// Deployment records are global by identifier, so they stay on the
/// regionless prefix even when a region is configured.
pub const REGIONLESS_FAMILIES: &[&str] = &["/deployments"];

/// Identifier of a regional control plane, embedded in region-scoped paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region(String);

impl Region {
    /// Validate a region identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRegion`] for an empty identifier or one
    /// with anything but ASCII letters, digits, `.`, `_` or `-`. The id goes
    /// into the path verbatim, so characters such as `/`, `?`, `#` or `%`
    /// would change the target URL.
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("must not be empty")
        } else if id.chars().any(char::is_whitespace) {
            Some("must not contain whitespace")
        } else if !id.chars().all(is_region_char) {
            Some("may only contain ASCII letters, digits, '.', '_' and '-'")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ConfigError::InvalidRegion { region: id, reason }),
            None => Ok(Self(id)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_region_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Origin plus path prefix requests are addressed to.
///
/// Two base paths built for the same client share one transport; they differ
/// only in `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePath {
    origin: String,
    prefix: String,
}

impl BasePath {
    fn new(origin: &str, prefix: String) -> Self {
        Self {
            origin: origin.to_owned(),
            prefix,
        }
    }

    /// `scheme://host[:port]` without a trailing slash.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Absolute URL for a rendered operation path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}{path}", self.origin, self.prefix)
    }
}

/// Chooses between the region-scoped and regionless base path per operation.
///
/// Without a region both base paths are identical and the choice is a no-op.
#[derive(Debug, Clone)]
pub struct RegionRouter {
    regionless: BasePath,
    regional: BasePath,
    region: Option<Region>,
    regionless_families: Vec<String>,
}

impl RegionRouter {
    #[must_use]
    pub fn new(origin: &str, region: Option<Region>) -> Self {
        let origin = origin.trim_end_matches('/');
        let regionless = BasePath::new(origin, API_PREFIX.to_owned());
        let regional = match &region {
            Some(region) => BasePath::new(origin, format!("{API_PREFIX}/regions/{region}")),
            None => regionless.clone(),
        };

        Self {
            regionless,
            regional,
            region,
            regionless_families: REGIONLESS_FAMILIES
                .iter()
                .map(|family| (*family).to_owned())
                .collect(),
        }
    }

    /// Add a path family that is always addressed without a region.
    #[must_use]
    pub fn with_regionless_family(mut self, family: impl Into<String>) -> Self {
        self.regionless_families.push(family.into());
        self
    }

    #[must_use]
    pub fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    #[must_use]
    pub fn regionless(&self) -> &BasePath {
        &self.regionless
    }

    #[must_use]
    pub fn regional(&self) -> &BasePath {
        &self.regional
    }

    /// Base path for an operation.
    ///
    /// Only the path pattern is consulted; the method plays no part.
    #[must_use]
    pub fn route(&self, operation: &Operation) -> &BasePath {
        self.select(operation.pattern())
    }

    /// Base path for a raw path pattern such as `/deployments/{deployment_id}`.
    #[must_use]
    pub fn select(&self, pattern: &str) -> &BasePath {
        if self
            .regionless_families
            .iter()
            .any(|family| pattern.starts_with(family.as_str()))
        {
            &self.regionless
        } else {
            &self.regional
        }
    }
}
