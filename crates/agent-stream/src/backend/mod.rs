//! Collaborator boundary: the transport, the status endpoint and the stop
//! endpoint.
//!
//! The supervisor only talks to a `RunBackend`. `http` ships a reqwest-based
//! implementation; tests use scripted in-memory backends.

pub mod http;

use std::pin::Pin;

use crate::errors::BackendError;
use crate::model::{RunId, RunStatusReport};

/// Raw transport lines for one run, in delivery order.
///
/// The stream ending is a close; an `Err` item is a transport error. Both lead
/// to a status reconciliation.
pub type LineStream =
    Pin<Box<dyn futures::Stream<Item = Result<String, BackendError>> + Send + 'static>>;

/// Backend operations the stream engine depends on.
#[async_trait::async_trait]
pub trait RunBackend: Send + Sync {
    /// Opens the event stream for `run_id`.
    ///
    /// Opening is lazy: the connection is made when the stream is first polled.
    /// Dropping the stream releases the subscription.
    fn open_stream(&self, run_id: &RunId) -> LineStream;

    /// Queries the authoritative status of a run.
    async fn query_status(&self, run_id: &RunId) -> Result<RunStatusReport, BackendError>;

    /// Asks the backend to stop a run. Best effort.
    async fn request_stop(&self, run_id: &RunId) -> Result<(), BackendError>;
}
