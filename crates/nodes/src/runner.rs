//! The runner: executes a [`Pipeline`] against one session at a time and
//! streams one [`Event`] per completed step.
//!
//! ## Execution model
//!
//! A run is a lazy, single-pass stream. Nothing happens until the consumer
//! polls it; each `yield` suspends the run until the consumer asks for the
//! next event, so at most one undelivered event exists at any time. A
//! consumer that drops the stream stops the run before its next step starts
//! (the in-flight invocation is dropped with it).
//!
//! Steps run strictly in order. Step *i + 1* is started only after step *i*'s
//! output has been merged into the session. The first failure ends the run
//! with a terminal event carrying the error; later steps never start.
//!
//! Request problems (unknown session, busy session, empty message, shutdown)
//! are reported the same way: a single terminal event, no step executed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use pipeline::{
    BatonError, Event, Message, Namespace, OwnerId, Pipeline, RunId, RunStatus, Session,
    SessionId, SessionState,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::registry::{SessionHandle, SessionRegistry};

/// Boxed stream of run events returned by [`Runner::run`].
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Runner-wide settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Namespace sessions are created in. Defaults to the pipeline name.
    pub namespace: Option<Namespace>,
    /// Capacity of the runner's own registry (ignored with
    /// [`Runner::with_registry`]).
    pub max_sessions: usize,
    /// Default overall deadline per run. `None` means no deadline.
    pub run_timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            max_sessions: 1024,
            run_timeout: None,
        }
    }
}

/// Per-run overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overall deadline for this run, replacing the runner default.
    pub timeout: Option<Duration>,
    /// Caller-held token; cancelling it ends the run with
    /// [`BatonError::Cancelled`].
    pub cancel: Option<CancellationToken>,
}

/// Result of [`Runner::submit`].
pub struct Submission {
    /// The session the run executes against.
    pub session: SessionHandle,
    /// The run's events.
    pub events: EventStream,
}

/// Executes one pipeline for any number of independent sessions.
///
/// Construct once at start-up and share by reference (or `Arc`); call
/// [`Runner::shutdown`] before exit to drain in-flight runs.
pub struct Runner {
    pipeline: Arc<Pipeline>,
    namespace: Namespace,
    registry: Arc<SessionRegistry>,
    run_timeout: Option<Duration>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Runner {
    /// Creates a runner with its own session registry.
    pub fn new(pipeline: Pipeline, config: RunnerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        Self::with_registry(pipeline, config, registry)
    }

    /// Creates a runner that shares `registry` with other runners. Sessions
    /// stay isolated by namespace.
    pub fn with_registry(
        pipeline: Pipeline,
        config: RunnerConfig,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let namespace = config
            .namespace
            .unwrap_or_else(|| Namespace::from(pipeline.name()));
        Self {
            pipeline: Arc::new(pipeline),
            namespace,
            registry,
            run_timeout: config.run_timeout,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// The pipeline this runner executes.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The namespace this runner's sessions live in.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Number of runs currently executing.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Returns `true` once [`Runner::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.tracker.is_closed()
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Allocates a fresh, empty session for `owner` in this runner's namespace.
    ///
    /// # Errors
    ///
    /// [`BatonError::ResourceExhausted`] when the registry is full,
    /// [`BatonError::ShutDown`] after shutdown started.
    pub fn create_session(&self, owner: OwnerId) -> Result<SessionHandle, BatonError> {
        if self.is_shutting_down() {
            return Err(BatonError::ShutDown);
        }
        self.registry.create(owner, self.namespace.clone())
    }

    /// The handle for an existing session of `owner` in this namespace.
    pub fn handle(&self, owner: OwnerId, id: SessionId) -> SessionHandle {
        SessionHandle {
            id,
            owner,
            namespace: self.namespace.clone(),
        }
    }

    /// A snapshot of the whole session (state, cursor, status).
    pub fn session(&self, handle: &SessionHandle) -> Result<Session, BatonError> {
        self.registry.snapshot(handle)
    }

    /// A snapshot of the session's state.
    pub fn session_state(&self, handle: &SessionHandle) -> Result<SessionState, BatonError> {
        self.registry
            .snapshot(handle)
            .map(|session| session.state().clone())
    }

    /// Destroys a session that is not running.
    pub fn discard_session(&self, handle: &SessionHandle) -> Result<Session, BatonError> {
        self.registry.discard(handle)
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Runs the pipeline against `session` for `message` with default options.
    pub fn run(&self, session: &SessionHandle, message: Message) -> EventStream {
        self.run_with(session, message, RunOptions::default())
    }

    /// Runs the pipeline against `session` for `message`.
    ///
    /// The returned stream is lazy: no step starts until it is polled.
    pub fn run_with(
        &self,
        session: &SessionHandle,
        message: Message,
        options: RunOptions,
    ) -> EventStream {
        let run = RunContext {
            run_id: RunId::new_random(),
            handle: session.clone(),
            message,
            pipeline: Arc::clone(&self.pipeline),
            registry: Arc::clone(&self.registry),
            tracker: self.tracker.clone(),
            cancel: RunCancellation {
                shutdown: self.shutdown.clone(),
                caller: options.cancel,
            },
            timeout: options.timeout.or(self.run_timeout),
        };
        Box::pin(execute(run))
    }

    /// Runs against an existing session of `owner`, or a fresh one when
    /// `session` is `None`.
    ///
    /// A session created here stays registered, and counts against
    /// `max_sessions`, until [`Runner::discard_session`] is called with
    /// [`Submission::session`]. Hosts that submit one-off requests must
    /// discard each session once its stream has ended.
    ///
    /// # Errors
    ///
    /// Session creation errors are returned directly; everything after that
    /// arrives through the stream.
    pub fn submit(
        &self,
        owner: OwnerId,
        session: Option<SessionId>,
        text: impl Into<String>,
    ) -> Result<Submission, BatonError> {
        let handle = match session {
            Some(id) => self.handle(owner, id),
            None => self.create_session(owner)?,
        };
        let events = self.run(&handle, Message::user_text(text));
        Ok(Submission {
            session: handle,
            events,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stops accepting runs and drains the ones in flight.
    ///
    /// Runs get `grace` to finish on their own. Whatever is still running after
    /// that is cancelled (emitting a terminal [`BatonError::Cancelled`] event)
    /// and given another `grace` to deliver it.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.tracker.close();
        info!(
            pipeline = %self.pipeline.name(),
            in_flight = self.tracker.len(),
            "runner shutting down"
        );
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            return;
        }

        warn!(in_flight = self.tracker.len(), "grace period elapsed; cancelling runs");
        self.shutdown.cancel();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                in_flight = self.tracker.len(),
                "runs did not finish after cancellation; consumers are not draining"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Run execution
// ---------------------------------------------------------------------------

struct RunContext {
    run_id: RunId,
    handle: SessionHandle,
    message: Message,
    pipeline: Arc<Pipeline>,
    registry: Arc<SessionRegistry>,
    tracker: TaskTracker,
    cancel: RunCancellation,
    timeout: Option<Duration>,
}

/// Cancellation from either the runner's shutdown or the caller's token.
struct RunCancellation {
    shutdown: CancellationToken,
    caller: Option<CancellationToken>,
}

impl RunCancellation {
    fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled() || self.caller.as_ref().is_some_and(|c| c.is_cancelled())
    }

    async fn cancelled(&self) {
        match &self.caller {
            Some(caller) => tokio::select! {
                () = self.shutdown.cancelled() => {}
                () = caller.cancelled() => {}
            },
            None => self.shutdown.cancelled().await,
        }
    }
}

/// Awaits `fut`, giving up at `deadline`.
async fn until<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn status_for(err: &BatonError) -> RunStatus {
    match err {
        BatonError::Cancelled => RunStatus::Cancelled,
        _ => RunStatus::Failed,
    }
}

fn execute(run: RunContext) -> impl Stream<Item = Event> + Send + 'static {
    async_stream::stream! {
        let RunContext {
            run_id,
            handle,
            message,
            pipeline,
            registry,
            tracker,
            cancel,
            timeout,
        } = run;
        let session_id = handle.id;
        let span = info_span!(
            "pipeline_run",
            %run_id,
            %session_id,
            pipeline = %pipeline.name(),
        );

        // Count the run before checking for shutdown, so a concurrent
        // `shutdown` either sees it in flight or this check sees it closed.
        let in_flight = tracker.token();
        if tracker.is_closed() {
            drop(in_flight);
            warn!(parent: &span, "run rejected: runner is shutting down");
            yield Event::failed(run_id, session_id, 0, BatonError::ShutDown);
            return;
        }
        if let Err(err) = message.validate() {
            drop(in_flight);
            warn!(parent: &span, error = %err, "run rejected");
            yield Event::failed(run_id, session_id, 0, err);
            return;
        }
        let lease = match registry.claim(&handle) {
            Ok(lease) => lease,
            Err(err) => {
                drop(in_flight);
                warn!(parent: &span, error = %err, "run rejected");
                yield Event::failed(run_id, session_id, 0, err);
                return;
            }
        };
        lease.begin_run(run_id);
        let message = Arc::new(message);
        let deadline = timeout.map(|t| Instant::now() + t);
        let timed_out = || BatonError::TimedOut {
            after_ms: timeout.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
        };
        info!(parent: &span, steps = pipeline.len(), "run started");

        let mut sequence = 0u64;
        for (index, step) in pipeline.steps().iter().enumerate() {
            let stop = if cancel.is_cancelled() {
                Some(BatonError::Cancelled)
            } else if deadline.is_some_and(|d| Instant::now() >= d) {
                Some(timed_out())
            } else {
                None
            };
            if let Some(err) = stop {
                warn!(parent: &span, step = %step.name(), error = %err, "run stopped before step");
                lease.finish(status_for(&err));
                yield Event::failed(run_id, session_id, sequence, err);
                return;
            }

            let outcome = match lease.input_for(step, index, &message) {
                Ok(input) => {
                    debug!(parent: &span, step = %step.name(), index, "step started");
                    let step_span = info_span!(
                        parent: &span,
                        "step",
                        step = %step.name(),
                        index,
                        output_key = %step.output_key(),
                    );
                    let invocation = step.capability().invoke(&input).instrument(step_span);
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => Err(BatonError::Cancelled),
                        result = until(deadline, invocation) => match result {
                            Some(Ok(value)) => Ok(value),
                            Some(Err(err)) => Err(BatonError::step_failed(step.name(), index, err)),
                            None => Err(timed_out()),
                        },
                    }
                }
                Err(err) => Err(err),
            };

            match outcome {
                Ok(value) => {
                    lease.commit(step.output_key().clone(), value.clone());
                    info!(
                        parent: &span,
                        step = %step.name(),
                        index,
                        output_key = %step.output_key(),
                        "step completed"
                    );
                    yield Event::step_completed(
                        run_id,
                        session_id,
                        sequence,
                        step.name().clone(),
                        step.output_key().clone(),
                        value,
                    );
                    sequence += 1;
                }
                Err(err) => {
                    warn!(
                        parent: &span,
                        step = %step.name(),
                        index,
                        kind = err.kind(),
                        error = %err,
                        "run halted"
                    );
                    lease.finish(status_for(&err));
                    yield Event::failed(run_id, session_id, sequence, err);
                    return;
                }
            }
        }

        lease.finish(RunStatus::Completed);
        info!(parent: &span, events = sequence, "run completed");
        yield Event::completed(run_id, session_id, sequence);
    }
}
