//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the resource server as an
//! `Arc<CoreConfig>`. Nothing in request handling reads environment variables; the binaries call
//! the `*_from_env_value` helpers below and hand the parsed values to [`CoreConfig::new`].

use crate::constants::{DEFAULT_BASE_URL, DEFAULT_SEARCH_CEILING};
use crate::{CoordinationError, CoordinationResult};
use fhir::Identifier;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// What a search does when the store reports more matches than the ceiling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchOverflow {
    /// Fail the request so that no authorised result is silently dropped.
    #[default]
    Reject,
    /// Return the capped result set and log a warning.
    Warn,
}

impl FromStr for SearchOverflow {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(SearchOverflow::Reject),
            "warn" => Ok(SearchOverflow::Warn),
            other => Err(CoordinationError::InvalidInput(format!(
                "search overflow mode must be 'reject' or 'warn', got '{other}'"
            ))),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    local_organizations: Vec<Identifier>,
    observer: Identifier,
    base_url: String,
    search_ceiling: usize,
    search_overflow: SearchOverflow,
    workflows_file: Option<PathBuf>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Arguments
    ///
    /// * `local_organizations` - Identities of the organisations operating this deployment.
    /// * `observer` - Identity stamped on every AuditEvent as the recording system.
    /// * `base_url` - Public base URL of the FHIR endpoint, used for notification source URLs.
    /// * `search_ceiling` - Maximum number of resources one search may return.
    /// * `search_overflow` - Behaviour when a search exceeds the ceiling.
    ///
    /// # Errors
    ///
    /// Returns `CoordinationError::InvalidInput` if:
    /// - any identifier is missing its system or value,
    /// - `base_url` is empty,
    /// - `search_ceiling` is zero.
    pub fn new(
        local_organizations: Vec<Identifier>,
        observer: Identifier,
        base_url: String,
        search_ceiling: usize,
        search_overflow: SearchOverflow,
    ) -> CoordinationResult<Self> {
        if !is_complete(&observer) {
            return Err(CoordinationError::InvalidInput(
                "observer identifier must have a system and a value".into(),
            ));
        }
        if local_organizations.iter().any(|id| !is_complete(id)) {
            return Err(CoordinationError::InvalidInput(
                "local organization identifiers must have a system and a value".into(),
            ));
        }

        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(CoordinationError::InvalidInput(
                "base_url cannot be empty".into(),
            ));
        }
        if search_ceiling == 0 {
            return Err(CoordinationError::InvalidInput(
                "search_ceiling must be greater than zero".into(),
            ));
        }

        Ok(Self {
            local_organizations,
            observer,
            base_url,
            search_ceiling,
            search_overflow,
            workflows_file: None,
        })
    }

    /// Load workflow definitions from `path` instead of the built-in set.
    pub fn with_workflows_file(mut self, path: Option<PathBuf>) -> Self {
        self.workflows_file = path;
        self
    }

    pub fn local_organizations(&self) -> &[Identifier] {
        &self.local_organizations
    }

    pub fn observer(&self) -> &Identifier {
        &self.observer
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn search_ceiling(&self) -> usize {
        self.search_ceiling
    }

    pub fn search_overflow(&self) -> SearchOverflow {
        self.search_overflow
    }

    pub fn workflows_file(&self) -> Option<&Path> {
        self.workflows_file.as_deref()
    }

    /// Absolute URL of a stored resource, used as the notification source.
    pub fn resource_url(&self, reference: &str) -> String {
        format!("{}/{}", self.base_url, reference.trim_start_matches('/'))
    }
}

fn is_complete(identifier: &Identifier) -> bool {
    identifier.system.as_deref().is_some_and(|s| !s.is_empty())
        && identifier.value.as_deref().is_some_and(|v| !v.is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a comma-separated list of `system|value` identifier tokens.
///
/// If `value` is `None` or empty/whitespace, returns an empty list.
pub fn identifiers_from_env_value(value: Option<String>) -> CoordinationResult<Vec<Identifier>> {
    let Some(value) = non_empty(value) else {
        return Ok(Vec::new());
    };

    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| Identifier::parse_token(token).map_err(CoordinationError::from))
        .collect()
}

/// Parse a single mandatory `system|value` identifier token.
pub fn identifier_from_env_value(
    name: &str,
    value: Option<String>,
) -> CoordinationResult<Identifier> {
    let value = non_empty(value)
        .ok_or_else(|| CoordinationError::InvalidInput(format!("{name} must be set")))?;
    Ok(Identifier::parse_token(&value)?)
}

/// Parse the search ceiling, falling back to [`DEFAULT_SEARCH_CEILING`].
pub fn search_ceiling_from_env_value(value: Option<String>) -> CoordinationResult<usize> {
    match non_empty(value) {
        None => Ok(DEFAULT_SEARCH_CEILING),
        Some(v) => v.parse::<usize>().map_err(|_| {
            CoordinationError::InvalidInput(format!("search ceiling must be a number, got '{v}'"))
        }),
    }
}

/// Parse the search overflow mode, falling back to [`SearchOverflow::Reject`].
pub fn search_overflow_from_env_value(value: Option<String>) -> CoordinationResult<SearchOverflow> {
    non_empty(value)
        .map(|v| v.parse())
        .transpose()
        .map(Option::unwrap_or_default)
}

/// Resolve the public base URL, falling back to [`DEFAULT_BASE_URL`].
pub fn base_url_from_env_value(value: Option<String>) -> String {
    non_empty(value).unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Resolve the optional workflow definitions file.
pub fn workflows_file_from_env_value(value: Option<String>) -> Option<PathBuf> {
    non_empty(value).map(PathBuf::from)
}
