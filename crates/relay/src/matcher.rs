//! Detection of platform-hosted file URLs inside workflow inputs.
//!
//! Which strings count as "a file stored on the host platform" depends
//! on the deployment, so the rule is injected as an [`ImageUrlMatcher`].
//! [`PlatformUrlPattern`] covers the common regex-shaped case, and any
//! `Fn(&str) -> bool` closure works too.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::RelayError;

/// Default shape of a platform file URL: http(s), any host, and a
/// `/files/` path segment, with an optional signed query string.
pub const DEFAULT_FILE_URL_PATTERN: &str =
    r"^https?://[^/\s]+/(?:[^\s?#]*/)?files/[^\s?#]+(?:\?[^\s#]*)?$";

static DEFAULT_FILE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_FILE_URL_PATTERN).expect("valid regex"));

/// Decides whether a workflow input value references a platform file.
pub trait ImageUrlMatcher: Send + Sync {
    fn matches(&self, value: &str) -> bool;
}

impl<F> ImageUrlMatcher for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, value: &str) -> bool {
        self(value)
    }
}

/// Regex-based matcher.
#[derive(Debug, Clone)]
pub struct PlatformUrlPattern {
    regex: Regex,
}

impl PlatformUrlPattern {
    /// Build a matcher from a full regex.
    pub fn new(pattern: &str) -> Result<Self, RelayError> {
        let regex = Regex::new(pattern)
            .map_err(|e| RelayError::Config(format!("Invalid file URL pattern: {e}")))?;
        Ok(Self { regex })
    }

    /// Match URLs on exactly `host` (any port) whose path starts with
    /// `path_prefix`, e.g. `for_host("storage.example.com", "/files/")`.
    pub fn for_host(host: &str, path_prefix: &str) -> Result<Self, RelayError> {
        if host.is_empty() {
            return Err(RelayError::Config("File URL host must not be empty".into()));
        }
        let prefix = format!("/{}", path_prefix.trim_start_matches('/'));
        Self::new(&format!(
            r"^https?://{}(?::\d+)?{}[^\s#]+$",
            regex::escape(host),
            regex::escape(&prefix),
        ))
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl Default for PlatformUrlPattern {
    fn default() -> Self {
        Self {
            regex: DEFAULT_FILE_URL_RE.clone(),
        }
    }
}

impl ImageUrlMatcher for PlatformUrlPattern {
    fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}
