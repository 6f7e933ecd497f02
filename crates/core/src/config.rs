//! Installation-wide ComfyUI connection settings.
//!
//! A [`ComfyUIConfig`] is supplied once per plugin installation and
//! passed explicitly into every component that talks to the server.

use std::time::Duration;

use url::Url;

use crate::error::CoreError;

/// Default budget for a job to reach its terminal event (5 minutes).
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 300;

/// Default timeout for a single REST call.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Connection settings for one ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// Base HTTP URL, e.g. `http://host:8188`, without trailing slash.
    pub server_url: String,
    /// Optional bearer token sent as `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
    /// Wall-clock budget from submission to the terminal event.
    pub execution_timeout: Duration,
    /// Timeout for each individual REST request.
    pub request_timeout: Duration,
}

impl ComfyUIConfig {
    /// Create a configuration with default timeouts and no token.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: normalize_url(&server_url.into()),
            auth_token: None,
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Set the bearer token. An empty or blank token means none.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = if token.trim().is_empty() {
            None
        } else {
            Some(token)
        };
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Load configuration from the credentials the host injects as
    /// environment variables.
    ///
    /// | Env Var                          | Default |
    /// |----------------------------------|---------|
    /// | `COMFYUI_SERVER_URL`             | --      |
    /// | `COMFYUI_AUTH_KEY`               | none    |
    /// | `COMFYUI_EXECUTION_TIMEOUT_SECS` | `300`   |
    /// | `COMFYUI_REQUEST_TIMEOUT_SECS`   | `60`    |
    pub fn from_env() -> Result<Self, CoreError> {
        let server_url = std::env::var("COMFYUI_SERVER_URL").map_err(|_| {
            CoreError::Validation("COMFYUI_SERVER_URL environment variable is required".into())
        })?;

        let mut config = Self::new(server_url);

        if let Ok(token) = std::env::var("COMFYUI_AUTH_KEY") {
            config = config.with_auth_token(token);
        }
        if let Some(secs) = env_secs("COMFYUI_EXECUTION_TIMEOUT_SECS")? {
            config.execution_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("COMFYUI_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the server URL parses as `http(s)://host[:port]` with
    /// nothing after the authority, and that both timeouts are non-zero.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.server_url.is_empty() {
            return Err(CoreError::Validation(
                "ComfyUI server URL is required".into(),
            ));
        }

        let invalid = |reason: &str| {
            CoreError::Validation(format!(
                "Invalid ComfyUI server URL '{}': {reason}",
                self.server_url
            ))
        };

        let url = Url::parse(&self.server_url).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => invalid("missing scheme"),
            url::ParseError::EmptyHost => invalid("missing host"),
            other => invalid(&other.to_string()),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }
        // Endpoint paths are appended to the base verbatim.
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("must not carry a path, query or fragment"));
        }

        if self.execution_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(CoreError::Validation("Timeouts must be non-zero".into()));
        }

        Ok(())
    }

    /// WebSocket base URL derived from the HTTP base URL
    /// (`http` -> `ws`, `https` -> `wss`).
    pub fn ws_url(&self) -> String {
        if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.server_url.clone()
        }
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn env_secs(name: &str) -> Result<Option<u64>, CoreError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CoreError::Validation(format!("{name} must be a valid u64"))),
        Err(_) => Ok(None),
    }
}
