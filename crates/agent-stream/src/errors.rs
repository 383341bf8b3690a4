use crate::model::RunId;

/// Errors returned by a `RunBackend` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The run does not exist on the backend.
    #[error("agent run not found ({run_id}): {message}")]
    NotFound { run_id: RunId, message: String },
    /// Backend answered with a non-success HTTP status.
    #[error("backend returned status {status}: {message}")]
    Http { status: u16, message: String },
    /// Transport or stream I/O failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Backend response shape was invalid.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl BackendError {
    pub fn not_found(run_id: RunId, message: impl Into<String>) -> Self {
        Self::NotFound {
            run_id,
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound { message, .. }
            | Self::Http { message, .. }
            | Self::Transport { message }
            | Self::Protocol { message } => message,
        }
    }

    /// Returns true for the "run not found / does not exist" class.
    ///
    /// Backends are not consistent about status codes here, so message text is
    /// inspected as well.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Http { status: 404, .. } => true,
            other => {
                let message = other.message().to_ascii_lowercase();
                message.contains("not found")
                    || message.contains("does not exist")
                    || message.contains("404")
            }
        }
    }
}

/// A stream line that could not be turned into an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("line is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("JSON does not match a known message shape: {0}")]
    UnknownShape(String),
}

/// Top-level error type for the public stream API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid engine or backend configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// The stop request did not reach the backend. The run is still
    /// considered stopped locally.
    #[error("failed to stop agent run {run_id}: {source}")]
    StopRequest {
        run_id: RunId,
        #[source]
        source: BackendError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_class_matches_variants_and_messages() {
        assert!(BackendError::not_found(RunId::new("r"), "gone").is_not_found());
        assert!(BackendError::http(404, "missing").is_not_found());
        assert!(BackendError::transport("Agent run does not exist").is_not_found());
        assert!(BackendError::protocol("run Not Found").is_not_found());
        assert!(!BackendError::http(500, "boom").is_not_found());
        assert!(!BackendError::transport("connection reset").is_not_found());
    }

    #[test]
    fn stop_request_error_keeps_source() {
        let err = StreamError::StopRequest {
            run_id: RunId::new("run-1"),
            source: BackendError::http(503, "unavailable"),
        };
        assert!(err.to_string().contains("run-1"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
