use std::time::Duration;

use crate::errors::StreamError;
use crate::model::RunId;

/// Configuration for the HTTP run backend.
#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    /// Base URL of the agent API (for example `https://api.example.com/api`).
    pub base_url: String,
    /// Optional bearer token forwarded on every request.
    pub bearer_token: Option<String>,
    /// Timeout for status and stop requests. The event stream itself is not
    /// bounded by it.
    pub timeout: Duration,
}

impl HttpBackendConfig {
    /// Creates a config with default timeout for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Builds a config from `AGENT_STREAM_BASE_URL` and the optional
    /// `AGENT_STREAM_TOKEN`.
    pub fn from_env() -> Result<Self, StreamError> {
        let base_url = std::env::var("AGENT_STREAM_BASE_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(StreamError::Config(
                "missing AGENT_STREAM_BASE_URL for HTTP backend".into(),
            ));
        }
        let mut config = Self::new(base_url.trim());
        if let Ok(token) = std::env::var("AGENT_STREAM_TOKEN")
            && !token.trim().is_empty()
        {
            config.bearer_token = Some(token.trim().to_string());
        }
        Ok(config)
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the bearer token.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Overrides the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run_url(&self, run_id: &RunId) -> String {
        format!(
            "{}/agent-run/{}",
            self.base_url.trim_end_matches('/'),
            run_id.as_str()
        )
    }

    pub(crate) fn status_url(&self, run_id: &RunId) -> String {
        self.run_url(run_id)
    }

    pub(crate) fn stream_url(&self, run_id: &RunId) -> String {
        format!("{}/stream", self.run_url(run_id))
    }

    pub(crate) fn stop_url(&self, run_id: &RunId) -> String {
        format!("{}/stop", self.run_url(run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_trim_trailing_slash() {
        let config = HttpBackendConfig::new("http://localhost:8000/api/");
        let run = RunId::new("run-1");
        assert_eq!(config.status_url(&run), "http://localhost:8000/api/agent-run/run-1");
        assert_eq!(
            config.stream_url(&run),
            "http://localhost:8000/api/agent-run/run-1/stream"
        );
        assert_eq!(
            config.stop_url(&run),
            "http://localhost:8000/api/agent-run/run-1/stop"
        );
    }

    #[test]
    fn builder_setters_override_defaults() {
        let config = HttpBackendConfig::new("http://a")
            .base_url("http://b")
            .bearer_token("secret")
            .timeout(Duration::from_secs(5));
        assert_eq!(config.base_url, "http://b");
        assert_eq!(config.bearer_token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
