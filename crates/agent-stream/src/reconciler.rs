//! Maps the authoritative run status onto a terminal stream status.

use crate::errors::BackendError;
use crate::model::{RunStatusReport, StreamStatus};

/// Warning surfaced when the stream closes while the backend still reports the
/// run as running.
pub const DISCONNECT_WARNING: &str =
    "Stream disconnected unexpectedly; the agent might still be running";

/// Result of a close-time status check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reconciliation {
    /// Backend reports a recognized terminal status.
    Finished(StreamStatus),
    /// The run does not exist or is no longer known to the backend.
    NotRunning,
    /// The stream closed although the run is still running.
    Disconnected,
    /// Unrecognized backend status or a failing status query.
    Failed { reason: String },
}

impl Reconciliation {
    /// Terminal status the session finalizes with.
    pub fn status(&self) -> StreamStatus {
        match self {
            Self::Finished(status) => *status,
            Self::NotRunning => StreamStatus::AgentNotRunning,
            Self::Disconnected | Self::Failed { .. } => StreamStatus::Error,
        }
    }
}

/// Outcome of the status check performed before opening a subscription.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PreCheck {
    Running,
    /// The run cannot be streamed; finalize with this status.
    NotRunning(StreamStatus),
    /// The status query itself failed for a reason other than "not found".
    Failed { reason: String },
}

impl PreCheck {
    /// Terminal status for a run that will not be subscribed, if any.
    pub fn terminal_status(&self) -> Option<StreamStatus> {
        match self {
            Self::Running => None,
            Self::NotRunning(status) => Some(*status),
            Self::Failed { .. } => Some(StreamStatus::Error),
        }
    }
}

/// Maps the backend's terminal statuses. Returns `None` for anything else,
/// including `running`.
pub fn map_backend_status(status: &str) -> Option<StreamStatus> {
    match status.trim().to_ascii_lowercase().as_str() {
        "completed" => Some(StreamStatus::Completed),
        "stopped" => Some(StreamStatus::Stopped),
        "failed" => Some(StreamStatus::Failed),
        _ => None,
    }
}

/// Classifies the status query issued after the stream closed.
pub fn reconcile_close(result: Result<RunStatusReport, BackendError>) -> Reconciliation {
    match result {
        Ok(report) if report.is_running() => Reconciliation::Disconnected,
        Ok(report) => match map_backend_status(&report.status) {
            Some(status) => Reconciliation::Finished(status),
            None => Reconciliation::Failed {
                reason: format!("unrecognized run status {:?}", report.status),
            },
        },
        Err(err) if err.is_not_found() => Reconciliation::NotRunning,
        Err(err) => Reconciliation::Failed {
            reason: err.to_string(),
        },
    }
}

/// Classifies the status query issued before opening a subscription.
///
/// Statuses map as at close time: known terminal statuses keep their own
/// status, anything unrecognized is `Error`. `AgentNotRunning` is reserved for
/// a query that reports the run as missing.
pub fn reconcile_precheck(result: Result<RunStatusReport, BackendError>) -> PreCheck {
    match result {
        Ok(report) if report.is_running() => PreCheck::Running,
        Ok(report) => PreCheck::NotRunning(
            map_backend_status(&report.status).unwrap_or(StreamStatus::Error),
        ),
        Err(err) if err.is_not_found() => PreCheck::NotRunning(StreamStatus::AgentNotRunning),
        Err(err) => PreCheck::Failed {
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunId;

    fn report(status: &str) -> Result<RunStatusReport, BackendError> {
        Ok(RunStatusReport::new(status))
    }

    #[test]
    fn maps_known_terminal_statuses() {
        assert_eq!(
            reconcile_close(report("completed")).status(),
            StreamStatus::Completed
        );
        assert_eq!(reconcile_close(report("stopped")).status(), StreamStatus::Stopped);
        assert_eq!(reconcile_close(report("failed")).status(), StreamStatus::Failed);
        assert_eq!(reconcile_close(report("paused")).status(), StreamStatus::Error);
    }

    #[test]
    fn not_found_query_failure_is_agent_not_running() {
        let result = Err(BackendError::transport("Agent run not found"));
        assert_eq!(reconcile_close(result), Reconciliation::NotRunning);
        let result = Err(BackendError::not_found(RunId::new("r"), "missing"));
        assert_eq!(reconcile_close(result).status(), StreamStatus::AgentNotRunning);
    }

    #[test]
    fn other_query_failures_are_errors() {
        let result = Err(BackendError::http(500, "internal"));
        assert!(matches!(reconcile_close(result), Reconciliation::Failed { .. }));
    }

    #[test]
    fn still_running_after_close_is_a_disconnect() {
        let outcome = reconcile_close(report("running"));
        assert_eq!(outcome, Reconciliation::Disconnected);
        assert_eq!(outcome.status(), StreamStatus::Error);
    }

    #[test]
    fn unrecognized_status_maps_the_same_before_open_and_after_close() {
        for status in ["queued", "paused", ""] {
            assert_eq!(
                reconcile_precheck(report(status)).terminal_status(),
                Some(reconcile_close(report(status)).status())
            );
        }
    }

    #[test]
    fn precheck_classification() {
        assert_eq!(reconcile_precheck(report("running")), PreCheck::Running);
        assert_eq!(
            reconcile_precheck(report("completed")),
            PreCheck::NotRunning(StreamStatus::Completed)
        );
        assert_eq!(
            reconcile_precheck(report("queued")),
            PreCheck::NotRunning(StreamStatus::Error)
        );
        assert_eq!(
            reconcile_precheck(Err(BackendError::http(404, "nope"))),
            PreCheck::NotRunning(StreamStatus::AgentNotRunning)
        );
        let failed = reconcile_precheck(Err(BackendError::transport("connection refused")));
        assert!(matches!(&failed, PreCheck::Failed { reason } if reason.contains("refused")));
        assert_eq!(failed.terminal_status(), Some(StreamStatus::Error));
        assert_eq!(PreCheck::Running.terminal_status(), None);
    }
}
