use http::Method;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("missing value for path parameter '{name}' in '{pattern}'")]
    MissingParam { name: String, pattern: String },

    #[error("malformed path pattern '{pattern}': {reason}")]
    MalformedPattern {
        pattern: String,
        reason: &'static str,
    },
}

/// One API call: method plus a path pattern relative to the API prefix.
///
/// ```ignore
/// let op = Operation::new(Method::GET, "/deployments/{deployment_id}")
///     .param("deployment_id", "d-1")
///     .query("show_metadata", "true");
/// assert_eq!(op.render()?, "/deployments/d-1?show_metadata=true");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    method: Method,
    pattern: String,
    params: Vec<(String, String)>,
    query: Vec<(String, String)>,
}

impl Operation {
    #[must_use]
    pub fn new(method: Method, pattern: impl Into<String>) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            params: Vec::new(),
            query: Vec::new(),
        }
    }

    /// Bind a `{name}` placeholder. A later binding for the same name wins.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.params.retain(|(bound, _)| *bound != name);
        self.params.push((name, value.into()));
        self
    }

    /// Append a query-string pair.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Substitute placeholders and append the query string.
    ///
    /// Parameter values and query pairs are percent-encoded.
    ///
    /// # Errors
    ///
    /// - [`OperationError::MissingParam`] when a placeholder has no binding
    /// - [`OperationError::MalformedPattern`] when the pattern is not absolute
    ///   or has an unbalanced brace
    pub fn render(&self) -> Result<String, OperationError> {
        if !self.pattern.starts_with('/') {
            return Err(self.malformed("must start with '/'"));
        }

        let mut path = String::with_capacity(self.pattern.len());
        let mut rest = self.pattern.as_str();
        while let Some(open) = rest.find(['{', '}']) {
            if rest.as_bytes()[open] == b'}' {
                return Err(self.malformed("unexpected '}'"));
            }
            path.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or_else(|| self.malformed("unclosed '{'"))?;
            let name = &after[..close];
            if name.is_empty() || name.contains('{') {
                return Err(self.malformed("empty or nested placeholder"));
            }
            let value = self.lookup(name).ok_or_else(|| OperationError::MissingParam {
                name: name.to_owned(),
                pattern: self.pattern.clone(),
            })?;
            path.push_str(&urlencoding::encode(value));
            rest = &after[close + 1..];
        }
        path.push_str(rest);

        for (i, (name, value)) in self.query.iter().enumerate() {
            path.push(if i == 0 { '?' } else { '&' });
            path.push_str(&urlencoding::encode(name));
            path.push('=');
            path.push_str(&urlencoding::encode(value));
        }

        Ok(path)
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value.as_str())
    }

    fn malformed(&self, reason: &'static str) -> OperationError {
        OperationError::MalformedPattern {
            pattern: self.pattern.clone(),
            reason,
        }
    }
}
