use crate::decoder::FinalizedMessage;
use crate::model::StreamStatus;

/// Consumer hooks invoked by the supervisor.
///
/// Every method defaults to a no-op. Hooks are never called while the
/// supervisor holds an internal lock, so they may call back into it.
pub trait StreamCallbacks: Send + Sync {
    /// A structurally complete message with a stable id.
    fn on_message(&self, _message: FinalizedMessage) {}
    fn on_status_change(&self, _status: StreamStatus) {}
    /// A user-facing error or warning.
    fn on_error(&self, _message: &str) {}
    /// The run reached a terminal status.
    fn on_close(&self, _status: StreamStatus) {}
    /// First text fragment of a new assistant message.
    fn on_assistant_start(&self) {}
    fn on_assistant_chunk(&self, _content: &str) {}
}

/// Callbacks that ignore every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCallbacks;

impl StreamCallbacks for NoopCallbacks {}

/// Downstream state a finished run may have changed as a side effect.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CacheScope {
    AgentConfig,
    ToolCredentials,
    Triggers,
    KnowledgeBase,
    ConfigVersions,
}

impl CacheScope {
    /// Every scope invalidated when a run finalizes.
    pub const ALL: [CacheScope; 5] = [
        CacheScope::AgentConfig,
        CacheScope::ToolCredentials,
        CacheScope::Triggers,
        CacheScope::KnowledgeBase,
        CacheScope::ConfigVersions,
    ];
}

/// Receives cache invalidation requests after finalization.
pub trait CacheInvalidator: Send + Sync {
    /// `agent_id` narrows the scope when the session knows its agent.
    fn invalidate(&self, scope: CacheScope, agent_id: Option<&str>);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _scope: CacheScope, _agent_id: Option<&str>) {}
}
