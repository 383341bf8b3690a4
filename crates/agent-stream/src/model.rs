use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Creates an id from any string-like value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(
    /// Identifier of one agent execution, as assigned by the backend.
    RunId
);

string_id!(
    /// Identifier of a conversation. A thread owns at most one live stream.
    ThreadId
);

/// Lifecycle status of the stream session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// No run has been started on this session yet.
    #[default]
    Idle,
    /// A subscription is open but no event has arrived yet.
    Connecting,
    /// At least one event has been applied for the current run.
    Streaming,
    /// The run finished normally.
    Completed,
    /// The run was stopped on request.
    Stopped,
    /// The backend reported the run as failed.
    Failed,
    /// Protocol error, transport fault or unrecognized backend status.
    Error,
    /// The run does not exist or is no longer running.
    AgentNotRunning,
}

impl StreamStatus {
    /// Returns true for statuses that end a run's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Stopped | Self::Failed | Self::Error | Self::AgentNotRunning
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::AgentNotRunning => "agent_not_running",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative run status as reported by the backend status endpoint.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunStatusReport {
    /// Raw backend status (`running`, `completed`, `stopped`, `failed`, ...).
    pub status: String,
    /// Optional error detail attached by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunStatusReport {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("running")
    }
}

/// One sequenced piece of assistant text.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextFragment {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
}

impl TextFragment {
    pub fn new(content: impl Into<String>, sequence: Option<i64>) -> Self {
        Self {
            content: content.into(),
            sequence,
        }
    }
}

/// The single in-flight tool invocation.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallState {
    pub tool_index: Option<i64>,
    pub name: Option<String>,
    pub arguments: Option<serde_json::Value>,
    pub xml_tag_name: Option<String>,
}
