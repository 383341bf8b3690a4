//! Reconciles the live event stream of a remote agent run into ordered,
//! fenced application state.
//!
//! A [`StreamSupervisor`] is bound to one conversation thread and streams at
//! most one run at a time. It checks the run's status before subscribing,
//! renders assistant text in sequence order, tracks the in-flight tool call,
//! and settles every run into a single terminal status, even when the
//! transport closes without saying why.
//!
//! # Usage (HTTP backend)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use agent_stream::backend::http::HttpRunBackend;
//! use agent_stream::prelude::*;
//!
//! struct PrintCallbacks;
//!
//! impl StreamCallbacks for PrintCallbacks {
//!     fn on_assistant_chunk(&self, content: &str) {
//!         print!("{content}");
//!     }
//!
//!     fn on_close(&self, status: StreamStatus) {
//!         println!("\nrun finished: {status}");
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let supervisor = StreamSupervisor::builder("thread-1")
//!     .backend(Arc::new(HttpRunBackend::from_env()?))
//!     .callbacks(Arc::new(PrintCallbacks))
//!     .config(StreamConfig::from_env()?)
//!     .build()?;
//!
//! supervisor.start_streaming("run-1").await?;
//! # Ok(())
//! # }
//! ```

/// Progressive, throttled rendering of assistant text.
pub mod accumulator;
/// Run backend contract and the HTTP implementation.
pub mod backend;
/// Consumer hooks and cache invalidation.
pub mod callbacks;
/// Timing configuration.
pub mod config;
/// Stream line decoding.
pub mod decoder;
/// Public error types.
pub mod errors;
/// Stale-run fencing.
pub mod guard;
/// Identifiers and session-level value types.
pub mod model;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Terminal status classification.
pub mod reconciler;
/// Stream supervisor and its builder.
pub mod supervisor;
/// In-flight tool call tracking.
pub mod tool_call;

pub use accumulator::{ContentAccumulator, Transcript};
pub use backend::{LineStream, RunBackend};
pub use callbacks::{
    CacheInvalidator, CacheScope, NoopCallbacks, NoopInvalidator, StreamCallbacks,
};
pub use config::StreamConfig;
pub use decoder::{FinalizedMessage, MessageKind, StreamEvent, StreamMessage, decode_line};
pub use errors::{BackendError, DecodeError, StreamError};
pub use guard::{FencingToken, RunGuard};
pub use model::{RunId, RunStatusReport, StreamStatus, TextFragment, ThreadId, ToolCallState};
pub use observability::init_observability;
pub use reconciler::Reconciliation;
pub use supervisor::{StreamSupervisor, StreamSupervisorBuilder};
pub use tool_call::ToolCallTracker;
