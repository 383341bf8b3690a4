//! Fencing for asynchronous work scheduled against a run.
//!
//! Every deferred operation captures a `FencingToken` by value when it is
//! scheduled and asks the `RunGuard` whether the token is still current before
//! applying any effect. A mismatch turns the operation into a no-op, which is
//! what keeps thread switches and rapid re-subscription from corrupting state.

use std::fmt;

use crate::model::{RunId, ThreadId};

/// `(thread_id, run_id)` captured when an asynchronous operation is scheduled.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FencingToken {
    pub thread_id: ThreadId,
    pub run_id: RunId,
}

impl FencingToken {
    pub fn new(thread_id: ThreadId, run_id: RunId) -> Self {
        Self { thread_id, run_id }
    }
}

impl fmt::Display for FencingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.thread_id, self.run_id)
    }
}

/// Outcome of a start request once its pre-check status is known.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StartDecision {
    /// A newer start or a thread switch superseded this request.
    Stale,
    /// The run is already the active, subscribed run.
    AlreadyActive,
    /// The run is running: open a subscription, replacing `replaced` if set.
    Open { replaced: Option<RunId> },
    /// The run is not running and nothing else is active: finalize it.
    Finalize,
    /// The run is not running but a different run is active and healthy.
    Conflict { active: RunId },
}

/// Live `(thread, run)` registers every token is compared against.
#[derive(Clone, Debug)]
pub struct RunGuard {
    thread_id: ThreadId,
    active_run: Option<RunId>,
    requested_run: Option<RunId>,
}

impl RunGuard {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            active_run: None,
            requested_run: None,
        }
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Run that currently owns the session (subscribed or being finalized).
    pub fn active_run(&self) -> Option<&RunId> {
        self.active_run.as_ref()
    }

    /// True when `token` still names the live thread and active run.
    pub fn admits(&self, token: &FencingToken) -> bool {
        token.thread_id == self.thread_id && self.active_run.as_ref() == Some(&token.run_id)
    }

    /// Registers `run_id` as the latest start request and returns its token.
    pub fn request_start(&mut self, run_id: RunId) -> FencingToken {
        self.requested_run = Some(run_id.clone());
        FencingToken::new(self.thread_id.clone(), run_id)
    }

    /// True when `token` is still the latest start request on the live thread.
    pub fn admits_start(&self, token: &FencingToken) -> bool {
        token.thread_id == self.thread_id && self.requested_run.as_ref() == Some(&token.run_id)
    }

    /// Applies the start rules once the pre-check result is known.
    ///
    /// A run that is not running only finalizes when no different run is
    /// active; a healthy run on the same thread is never torn down by a stale
    /// start.
    pub fn resolve_start(&mut self, token: &FencingToken, running: bool) -> StartDecision {
        if !self.admits_start(token) {
            return StartDecision::Stale;
        }
        self.requested_run = None;

        let active = self.active_run.clone();
        if running {
            if active.as_ref() == Some(&token.run_id) {
                return StartDecision::AlreadyActive;
            }
            self.active_run = Some(token.run_id.clone());
            return StartDecision::Open { replaced: active };
        }

        match active {
            Some(active) if active != token.run_id => StartDecision::Conflict { active },
            _ => {
                self.active_run = Some(token.run_id.clone());
                StartDecision::Finalize
            }
        }
    }

    /// Releases the active run if it is `run_id`. Returns false when the run is
    /// no longer current, which makes finalization idempotent.
    pub fn release(&mut self, run_id: &RunId) -> bool {
        if self.active_run.as_ref() == Some(run_id) {
            self.active_run = None;
            true
        } else {
            false
        }
    }

    /// Moves the guard to another thread. Returns the run that was active on the
    /// previous thread, if any; every token issued before becomes stale.
    pub fn switch_thread(&mut self, thread_id: ThreadId) -> Option<RunId> {
        if thread_id == self.thread_id {
            return None;
        }
        self.thread_id = thread_id;
        self.requested_run = None;
        self.active_run.take()
    }
}
