//! Common imports for embedding a stream supervisor.
pub use crate::{
    BackendError, CacheInvalidator, CacheScope, FinalizedMessage, RunBackend, RunId,
    StreamCallbacks, StreamConfig, StreamError, StreamStatus, StreamSupervisor, ThreadId,
    Transcript,
};
