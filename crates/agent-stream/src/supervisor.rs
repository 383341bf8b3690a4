//! Public entry point: owns start/stop, the single active subscription and
//! the session record, and wires decoder, accumulator, tracker, guard and
//! reconciler together.
//!
//! All session state sits behind one mutex that is never held across an await
//! and never held while consumer callbacks run. Spawned work (the subscription
//! reader, the liveness check) captures a `FencingToken` and a `Weak` handle;
//! once the token is stale the work is a no-op.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::accumulator::{ContentAccumulator, Transcript};
use crate::backend::{LineStream, RunBackend};
use crate::callbacks::{
    CacheInvalidator, CacheScope, NoopCallbacks, NoopInvalidator, StreamCallbacks,
};
use crate::config::StreamConfig;
use crate::decoder::{
    ChunkStatus, FinalizedMessage, MessageKind, StatusContent, StatusType, StreamEvent,
    StreamMessage, decode_line,
};
use crate::errors::{BackendError, StreamError};
use crate::guard::{FencingToken, RunGuard, StartDecision};
use crate::model::{RunId, StreamStatus, TextFragment, ThreadId, ToolCallState};
use crate::reconciler::{
    DISCONNECT_WARNING, PreCheck, Reconciliation, reconcile_close, reconcile_precheck,
};
use crate::tool_call::ToolCallTracker;

const DEFAULT_AGENT_ERROR: &str = "agent reported an error";

/// The open transport subscription of the active run.
struct Subscription {
    id: uuid::Uuid,
    run_id: RunId,
    release_tx: watch::Sender<bool>,
}

impl Subscription {
    fn release(self) {
        debug!(subscription_id = %self.id, run_id = %self.run_id, "releasing stream subscription");
        let _ = self.release_tx.send(true);
    }
}

/// Session record. Exactly one per supervisor, i.e. per conversation view.
struct StreamSession {
    guard: RunGuard,
    status: StreamStatus,
    subscription: Option<Subscription>,
    tool_call: ToolCallTracker,
    error: Option<String>,
    last_message_at: Option<Instant>,
}

impl StreamSession {
    fn new(thread_id: ThreadId) -> Self {
        Self {
            guard: RunGuard::new(thread_id),
            status: StreamStatus::Idle,
            subscription: None,
            tool_call: ToolCallTracker::new(),
            error: None,
            last_message_at: None,
        }
    }

    /// True while `token` is current and `subscription_id` is still the open
    /// subscription. Reopening the same run yields a new subscription id.
    fn owns(&self, token: &FencingToken, subscription_id: uuid::Uuid) -> bool {
        self.guard.admits(token)
            && self
                .subscription
                .as_ref()
                .is_some_and(|subscription| subscription.id == subscription_id)
    }
}

/// Consumer notifications collected under the session lock and delivered
/// after it is released.
enum Effect {
    Status(StreamStatus),
    Error(String),
    Message(FinalizedMessage),
    AssistantStart,
    AssistantChunk(String),
    Closed(StreamStatus),
}

struct Inner {
    backend: Arc<dyn RunBackend>,
    callbacks: Arc<dyn StreamCallbacks>,
    invalidator: Arc<dyn CacheInvalidator>,
    config: StreamConfig,
    agent_id: Option<String>,
    accumulator: ContentAccumulator,
    session: Mutex<StreamSession>,
}

/// Streams one agent run at a time for a conversation and reconciles it into
/// stable state.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct StreamSupervisor {
    inner: Arc<Inner>,
}

impl StreamSupervisor {
    /// Starts a builder for a supervisor bound to `thread_id`.
    pub fn builder(thread_id: impl Into<ThreadId>) -> StreamSupervisorBuilder {
        StreamSupervisorBuilder::new(thread_id.into())
    }

    /// Starts streaming `run_id` on the current thread.
    ///
    /// The run's status is checked first; a subscription is opened only when
    /// the backend confirms it is running. Otherwise the session finalizes
    /// with the mapped terminal status, unless a different healthy run is
    /// already active, which is left untouched.
    pub async fn start_streaming(&self, run_id: impl Into<RunId>) -> Result<(), StreamError> {
        let run_id = run_id.into();
        if run_id.as_str().trim().is_empty() {
            return Err(StreamError::Validation("run id must not be empty".into()));
        }

        let token = self.inner.lock().guard.request_start(run_id.clone());
        debug!(
            thread_id = %token.thread_id,
            run_id = %run_id,
            "checking run status before subscribing"
        );
        let precheck = reconcile_precheck(self.inner.backend.query_status(&run_id).await);

        let mut effects = Vec::new();
        {
            let mut session = self.inner.lock();
            let decision = session
                .guard
                .resolve_start(&token, precheck == PreCheck::Running);
            match decision {
                StartDecision::Stale => {
                    debug!(run_id = %run_id, "start superseded before its status check returned");
                }
                StartDecision::AlreadyActive => {
                    debug!(run_id = %run_id, "run is already streaming");
                }
                StartDecision::Conflict { active } => {
                    warn!(
                        run_id = %run_id,
                        active_run = %active,
                        precheck = ?precheck,
                        "run is not running; leaving the active run untouched"
                    );
                }
                StartDecision::Finalize => {
                    let status = precheck.terminal_status().unwrap_or(StreamStatus::Error);
                    match &precheck {
                        PreCheck::Failed { reason } => {
                            error!(run_id = %run_id, reason = %reason, "run status check failed");
                            session.error = Some(reason.clone());
                            effects.push(Effect::Error(reason.clone()));
                        }
                        _ if status == StreamStatus::Error => {
                            warn!(
                                run_id = %run_id,
                                precheck = ?precheck,
                                "run reported an unrecognized status; not subscribing"
                            );
                        }
                        _ => {
                            info!(
                                run_id = %run_id,
                                status = %status,
                                "run is not running; not subscribing"
                            );
                        }
                    }
                    self.inner
                        .finalize_locked(&mut session, status, &run_id, &mut effects);
                }
                StartDecision::Open { replaced } => {
                    if let Some(replaced) = replaced {
                        info!(
                            run_id = %run_id,
                            replaced_run = %replaced,
                            "replacing active run subscription"
                        );
                    }
                    if let Some(previous) = session.subscription.take() {
                        previous.release();
                    }
                    self.inner.accumulator.reset();
                    session.tool_call.clear();
                    session.error = None;
                    session.last_message_at = None;
                    session.status = StreamStatus::Connecting;
                    effects.push(Effect::Status(StreamStatus::Connecting));
                    let subscription = self.inner.subscribe(token.clone());
                    self.inner.schedule_liveness_check(token, subscription.id);
                    session.subscription = Some(subscription);
                }
            }
        }
        self.inner.dispatch(effects);
        Ok(())
    }

    /// Switches to `thread_id` (tearing down another thread's subscription)
    /// and starts streaming `run_id` there.
    pub async fn start_streaming_for(
        &self,
        thread_id: impl Into<ThreadId>,
        run_id: impl Into<RunId>,
    ) -> Result<(), StreamError> {
        self.switch_thread(thread_id);
        self.start_streaming(run_id).await
    }

    /// Stops the active run.
    ///
    /// The session is finalized as `Stopped` before the stop request is sent.
    /// A failing stop request is returned as `StreamError::StopRequest` but
    /// does not revert the local state. No-op when no run is active.
    pub async fn stop_streaming(&self) -> Result<(), StreamError> {
        let mut effects = Vec::new();
        let run_id = {
            let mut session = self.inner.lock();
            let Some(run_id) = session.guard.active_run().cloned() else {
                debug!("stop requested without an active run");
                return Ok(());
            };
            info!(run_id = %run_id, "stopping agent run");
            self.inner
                .finalize_locked(&mut session, StreamStatus::Stopped, &run_id, &mut effects);
            run_id
        };
        self.inner.dispatch(effects);

        match self.inner.backend.request_stop(&run_id).await {
            Ok(()) => Ok(()),
            Err(source) => {
                error!(
                    run_id = %run_id,
                    error = %source,
                    "stop request failed; run stays stopped locally"
                );
                Err(StreamError::StopRequest { run_id, source })
            }
        }
    }

    /// Moves the session to another conversation.
    ///
    /// Any subscription of the previous thread is released and its late events
    /// are ignored. The status returns to `Idle` without an `on_close`.
    pub fn switch_thread(&self, thread_id: impl Into<ThreadId>) {
        let thread_id = thread_id.into();
        let mut effects = Vec::new();
        {
            let mut session = self.inner.lock();
            if session.guard.thread_id() == &thread_id {
                return;
            }
            let previous_thread = session.guard.thread_id().clone();
            let previous_run = session.guard.switch_thread(thread_id.clone());
            debug!(
                from = %previous_thread,
                to = %thread_id,
                previous_run = ?previous_run,
                "switching thread"
            );
            if let Some(subscription) = session.subscription.take() {
                subscription.release();
            }
            self.inner.accumulator.reset();
            session.tool_call.clear();
            session.error = None;
            session.last_message_at = None;
            if session.status != StreamStatus::Idle {
                session.status = StreamStatus::Idle;
                effects.push(Effect::Status(StreamStatus::Idle));
            }
        }
        self.inner.dispatch(effects);
    }

    pub fn status(&self) -> StreamStatus {
        self.inner.lock().status
    }

    /// Run currently owning the session.
    pub fn run_id(&self) -> Option<RunId> {
        self.inner.lock().guard.active_run().cloned()
    }

    pub fn thread_id(&self) -> ThreadId {
        self.inner.lock().guard.thread_id().clone()
    }

    /// Ordered transcript of the in-progress assistant message.
    pub fn transcript(&self) -> String {
        self.inner.accumulator.transcript()
    }

    /// Observes throttled transcript updates.
    pub fn subscribe_transcript(&self) -> watch::Receiver<Transcript> {
        self.inner.accumulator.subscribe()
    }

    /// The tool call currently in flight.
    pub fn tool_call(&self) -> Option<ToolCallState> {
        self.inner.lock().tool_call.current().cloned()
    }

    /// Last error surfaced for the current or most recent run.
    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// When the current run last delivered an event.
    pub fn last_message_at(&self) -> Option<Instant> {
        self.inner.lock().last_message_at
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, StreamSession> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens the transport stream for `token` and spawns its reader.
    fn subscribe(self: &Arc<Self>, token: FencingToken) -> Subscription {
        let (release_tx, release_rx) = watch::channel(false);
        let id = uuid::Uuid::new_v4();
        let lines = self.backend.open_stream(&token.run_id);
        info!(
            subscription_id = %id,
            thread_id = %token.thread_id,
            run_id = %token.run_id,
            "opened stream subscription"
        );
        let run_id = token.run_id.clone();
        tokio::spawn(read_stream(Arc::downgrade(self), token, id, lines, release_rx));
        Subscription {
            id,
            run_id,
            release_tx,
        }
    }

    fn schedule_liveness_check(
        self: &Arc<Self>,
        token: FencingToken,
        subscription_id: uuid::Uuid,
    ) {
        let weak = Arc::downgrade(self);
        let window = self.config.liveness_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = weak.upgrade() {
                inner.check_liveness(&token, subscription_id).await;
            }
        });
    }

    /// Re-checks a subscription that never delivered an event.
    async fn check_liveness(&self, token: &FencingToken, subscription_id: uuid::Uuid) {
        {
            let session = self.lock();
            if !session.owns(token, subscription_id) || session.status != StreamStatus::Connecting {
                return;
            }
        }
        debug!(run_id = %token.run_id, "no events within liveness window; re-checking run status");
        let precheck = reconcile_precheck(self.backend.query_status(&token.run_id).await);

        let mut effects = Vec::new();
        {
            let mut session = self.lock();
            if !session.owns(token, subscription_id) {
                trace!(run_id = %token.run_id, "dropping stale liveness result");
                return;
            }
            match precheck {
                PreCheck::Running => {
                    debug!(run_id = %token.run_id, "run still running; keeping subscription");
                }
                PreCheck::NotRunning(status) => {
                    info!(
                        run_id = %token.run_id,
                        status = %status,
                        "subscription opened for a run that is no longer running"
                    );
                    self.finalize_locked(&mut session, status, &token.run_id, &mut effects);
                }
                PreCheck::Failed { reason } => {
                    warn!(
                        run_id = %token.run_id,
                        reason = %reason,
                        "liveness status check failed; keeping subscription"
                    );
                }
            }
        }
        self.dispatch(effects);
    }

    /// Applies one raw line. Returns false once the reader should stop.
    fn handle_line(
        &self,
        token: &FencingToken,
        subscription_id: uuid::Uuid,
        line: &str,
    ) -> bool {
        let event = match decode_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => return true,
            Err(err) => {
                debug!(run_id = %token.run_id, error = %err, "dropping undecodable stream line");
                return true;
            }
        };

        let mut effects = Vec::new();
        let keep_reading = {
            let mut session = self.lock();
            if !session.owns(token, subscription_id) {
                trace!(run_id = %token.run_id, "ignoring event for a stale run");
                return false;
            }
            self.apply_event(&mut session, token, event, &mut effects)
        };
        self.dispatch(effects);
        keep_reading
    }

    fn apply_event(
        &self,
        session: &mut StreamSession,
        token: &FencingToken,
        event: StreamEvent,
        effects: &mut Vec<Effect>,
    ) -> bool {
        session.last_message_at = Some(Instant::now());
        if session.status == StreamStatus::Connecting {
            session.status = StreamStatus::Streaming;
            effects.push(Effect::Status(StreamStatus::Streaming));
        }

        match event {
            StreamEvent::Completed => {
                info!(run_id = %token.run_id, "stream signalled completion");
                self.finalize_locked(session, StreamStatus::Completed, &token.run_id, effects);
                false
            }
            StreamEvent::Error { message } => {
                self.fail_locked(session, &token.run_id, message, effects);
                false
            }
            StreamEvent::Message(message) => self.apply_message(session, token, message, effects),
        }
    }

    fn apply_message(
        &self,
        session: &mut StreamSession,
        token: &FencingToken,
        message: StreamMessage,
        effects: &mut Vec<Effect>,
    ) -> bool {
        match message.kind {
            MessageKind::Assistant => match message.stream_status() {
                Some(ChunkStatus::Chunk) => {
                    if let Some(text) = message.assistant_text().filter(|text| !text.is_empty()) {
                        let fragment = TextFragment::new(text.clone(), message.sequence);
                        if self.accumulator.push(fragment) {
                            effects.push(Effect::AssistantStart);
                        }
                        effects.push(Effect::AssistantChunk(text));
                    }
                }
                Some(ChunkStatus::Complete) => {
                    self.accumulator.reset();
                    session.tool_call.clear();
                    emit_message(message, effects);
                }
                None => emit_message(message, effects),
            },
            MessageKind::Tool => {
                session.tool_call.on_tool_result();
                emit_message(message, effects);
            }
            MessageKind::Status => {
                let content = message.status_content().unwrap_or_default();
                return self.apply_status(session, token, content, effects);
            }
            MessageKind::User | MessageKind::System => emit_message(message, effects),
        }
        true
    }

    fn apply_status(
        &self,
        session: &mut StreamSession,
        token: &FencingToken,
        content: StatusContent,
        effects: &mut Vec<Effect>,
    ) -> bool {
        match content.status_type {
            Some(StatusType::ToolStarted) => {
                session.tool_call.start(ToolCallState {
                    tool_index: content.tool_index,
                    name: content.function_name,
                    arguments: content.arguments,
                    xml_tag_name: content.xml_tag_name,
                });
            }
            Some(StatusType::ToolCompleted | StatusType::ToolFailed | StatusType::ToolError) => {
                session.tool_call.finish(content.tool_index);
            }
            Some(StatusType::Finish) => {
                debug!(
                    run_id = %token.run_id,
                    finish_reason = ?content.finish_reason,
                    "agent reported finish"
                );
            }
            Some(StatusType::ThreadRunEnd) => {
                debug!(run_id = %token.run_id, "thread run ended");
            }
            Some(StatusType::Error) => {
                let message = content
                    .message
                    .unwrap_or_else(|| DEFAULT_AGENT_ERROR.to_string());
                self.fail_locked(session, &token.run_id, message, effects);
                return false;
            }
            Some(StatusType::Other) | None => {
                trace!(run_id = %token.run_id, "ignoring status message");
            }
        }
        true
    }

    /// Protocol error: surfaced to the consumer and terminal.
    fn fail_locked(
        &self,
        session: &mut StreamSession,
        run_id: &RunId,
        message: String,
        effects: &mut Vec<Effect>,
    ) {
        error!(run_id = %run_id, message = %message, "agent run reported an error");
        session.error = Some(message.clone());
        effects.push(Effect::Error(message));
        self.finalize_locked(session, StreamStatus::Error, run_id, effects);
    }

    /// Stream error or end: ask the backend what actually happened.
    async fn handle_stream_closed(
        &self,
        token: &FencingToken,
        subscription_id: uuid::Uuid,
        err: Option<BackendError>,
    ) {
        if !self.lock().owns(token, subscription_id) {
            return;
        }
        match &err {
            Some(err) => {
                warn!(
                    run_id = %token.run_id,
                    error = %err,
                    "stream errored; reconciling run status"
                );
            }
            None => debug!(run_id = %token.run_id, "stream closed; reconciling run status"),
        }
        let outcome = reconcile_close(self.backend.query_status(&token.run_id).await);

        let mut effects = Vec::new();
        {
            let mut session = self.lock();
            if !session.owns(token, subscription_id) {
                trace!(run_id = %token.run_id, "dropping stale reconciliation");
                return;
            }
            match &outcome {
                Reconciliation::Finished(status) => {
                    info!(run_id = %token.run_id, status = %status, "run finished");
                }
                Reconciliation::NotRunning => {
                    info!(run_id = %token.run_id, "run no longer exists");
                }
                Reconciliation::Disconnected => {
                    warn!(run_id = %token.run_id, "{DISCONNECT_WARNING}");
                    session.error = Some(DISCONNECT_WARNING.to_string());
                    effects.push(Effect::Error(DISCONNECT_WARNING.to_string()));
                }
                Reconciliation::Failed { reason } => {
                    error!(
                        run_id = %token.run_id,
                        reason = %reason,
                        "could not reconcile run status"
                    );
                    session.error = Some(reason.clone());
                    effects.push(Effect::Error(reason.clone()));
                }
            }
            self.finalize_locked(&mut session, outcome.status(), &token.run_id, &mut effects);
        }
        self.dispatch(effects);
    }

    /// Single teardown path for every terminal classification.
    ///
    /// Skipped when `run_id` is no longer the active run, so a second call for
    /// the same run has no effect.
    fn finalize_locked(
        &self,
        session: &mut StreamSession,
        status: StreamStatus,
        run_id: &RunId,
        effects: &mut Vec<Effect>,
    ) -> bool {
        if !session.guard.release(run_id) {
            debug!(
                run_id = %run_id,
                status = %status,
                "finalize skipped; run is no longer current"
            );
            return false;
        }
        if let Some(subscription) = session.subscription.take() {
            subscription.release();
        }
        self.accumulator.reset();
        session.tool_call.clear();
        session.status = status;
        session.last_message_at = None;
        effects.push(Effect::Closed(status));
        true
    }

    #[cfg(test)]
    fn finalize(&self, status: StreamStatus, run_id: &RunId) -> bool {
        let mut effects = Vec::new();
        let finalized = {
            let mut session = self.lock();
            self.finalize_locked(&mut session, status, run_id, &mut effects)
        };
        self.dispatch(effects);
        finalized
    }

    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Status(status) => self.callbacks.on_status_change(status),
                Effect::Error(message) => self.callbacks.on_error(&message),
                Effect::Message(message) => self.callbacks.on_message(message),
                Effect::AssistantStart => self.callbacks.on_assistant_start(),
                Effect::AssistantChunk(content) => self.callbacks.on_assistant_chunk(&content),
                Effect::Closed(status) => {
                    self.callbacks.on_status_change(status);
                    self.callbacks.on_close(status);
                    for scope in CacheScope::ALL {
                        self.invalidator.invalidate(scope, self.agent_id.as_deref());
                    }
                }
            }
        }
    }
}

fn emit_message(message: StreamMessage, effects: &mut Vec<Effect>) {
    if let Some(message) = FinalizedMessage::from_message(message) {
        effects.push(Effect::Message(message));
    }
}

/// Reader task of one subscription. Lines are applied in delivery order.
async fn read_stream(
    inner: Weak<Inner>,
    token: FencingToken,
    subscription_id: uuid::Uuid,
    mut lines: LineStream,
    mut release_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = release_rx.changed() => {
                match changed {
                    Ok(()) if !*release_rx.borrow() => {}
                    _ => {
                        trace!(subscription_id = %subscription_id, "subscription reader released");
                        return;
                    }
                }
            }
            next = lines.next() => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                match next {
                    Some(Ok(line)) => {
                        if !inner.handle_line(&token, subscription_id, &line) {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        inner
                            .handle_stream_closed(&token, subscription_id, Some(err))
                            .await;
                        return;
                    }
                    None => {
                        inner.handle_stream_closed(&token, subscription_id, None).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Builder for `StreamSupervisor`.
pub struct StreamSupervisorBuilder {
    thread_id: ThreadId,
    backend: Option<Arc<dyn RunBackend>>,
    callbacks: Arc<dyn StreamCallbacks>,
    invalidator: Arc<dyn CacheInvalidator>,
    config: StreamConfig,
    agent_id: Option<String>,
}

impl StreamSupervisorBuilder {
    fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            backend: None,
            callbacks: Arc::new(NoopCallbacks),
            invalidator: Arc::new(NoopInvalidator),
            config: StreamConfig::default(),
            agent_id: None,
        }
    }

    /// Sets the backend providing the stream, status and stop endpoints.
    pub fn backend(mut self, backend: Arc<dyn RunBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn callbacks(mut self, callbacks: Arc<dyn StreamCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = invalidator;
        self
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Agent whose cached state is invalidated when a run finalizes.
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn build(self) -> Result<StreamSupervisor, StreamError> {
        let Some(backend) = self.backend else {
            return Err(StreamError::Config("a run backend is required".into()));
        };
        if self.thread_id.as_str().trim().is_empty() {
            return Err(StreamError::Validation("thread id must not be empty".into()));
        }
        self.config.validate()?;
        Ok(StreamSupervisor {
            inner: Arc::new(Inner {
                backend,
                callbacks: self.callbacks,
                invalidator: self.invalidator,
                accumulator: ContentAccumulator::new(self.config.throttle_interval),
                config: self.config,
                agent_id: self.agent_id.filter(|id| !id.trim().is_empty()),
                session: Mutex::new(StreamSession::new(self.thread_id)),
            }),
        })
    }
}
