//! Sessions: isolated, addressable containers for one pipeline's state.
//!
//! A [`Session`] owns exactly one [`SessionState`] and a cursor into the
//! pipeline's step list. Only the runner mutates it; everyone else receives
//! clones.

use serde::{Deserialize, Serialize};

use crate::{Namespace, OutputKey, OwnerId, RunId, SessionId, SessionState, StateValue, Timestamp};

/// Where the session's most recent run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run has started yet.
    Idle,
    /// A run is in progress.
    Running,
    /// The last run executed every step.
    Completed,
    /// The last run stopped at a failing step, a timeout, or a rejection.
    Failed,
    /// The last run was cancelled or abandoned by its consumer.
    Cancelled,
}

/// One isolated execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    owner: OwnerId,
    namespace: Namespace,
    state: SessionState,
    cursor: usize,
    status: RunStatus,
    last_run: Option<RunId>,
    runs: u32,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl Session {
    /// Creates an empty session.
    pub fn new(owner: OwnerId, namespace: Namespace) -> Self {
        let now = Timestamp::now();
        Self {
            id: SessionId::new_random(),
            owner,
            namespace,
            state: SessionState::new(),
            cursor: 0,
            status: RunStatus::Idle,
            last_run: None,
            runs: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The session's identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Who the session belongs to.
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// The application namespace the session was created in.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Outputs accumulated so far.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Index of the next step to execute in the current (or last) run.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Status of the current (or last) run.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// The current (or last) run, if any.
    pub fn last_run(&self) -> Option<RunId> {
        self.last_run
    }

    /// How many runs this session has hosted.
    pub fn run_count(&self) -> u32 {
        self.runs
    }

    /// When the session was created.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// When the session last changed.
    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Returns `true` if the session was created for `owner` in `namespace`.
    pub fn belongs_to(&self, owner: &OwnerId, namespace: &Namespace) -> bool {
        &self.owner == owner && &self.namespace == namespace
    }

    // -----------------------------------------------------------------------
    // Runner-side mutations
    // -----------------------------------------------------------------------

    /// Marks the start of a new traversal: the cursor returns to step 0 and
    /// existing state is kept.
    pub fn begin_run(&mut self, run_id: RunId) {
        self.cursor = 0;
        self.status = RunStatus::Running;
        self.last_run = Some(run_id);
        self.runs += 1;
        self.touch();
    }

    /// Merges one step's output and advances the cursor past that step.
    pub fn commit_step(&mut self, key: OutputKey, value: StateValue) {
        self.state.insert(key, value);
        self.cursor += 1;
        self.touch();
    }

    /// Records how the current run ended.
    pub fn finish_run(&mut self, status: RunStatus) {
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn session() -> Session {
        Session::new(OwnerId::new("user").unwrap(), Namespace::new("insights").unwrap())
    }

    #[test]
    fn new_session_is_idle_and_empty() {
        let s = session();
        assert_eq!(s.status(), RunStatus::Idle);
        assert!(s.state().is_empty());
        assert_eq!(s.cursor(), 0);
        assert_eq!(s.run_count(), 0);
    }

    #[test]
    fn commits_advance_cursor_and_new_run_resets_it() {
        let mut s = session();
        s.begin_run(RunId::new_random());
        s.commit_step(OutputKey::new("a").unwrap(), json!(1));
        s.commit_step(OutputKey::new("b").unwrap(), json!(2));
        assert_eq!(s.cursor(), 2);
        s.finish_run(RunStatus::Completed);

        s.begin_run(RunId::new_random());
        assert_eq!(s.cursor(), 0);
        assert_eq!(s.state().len(), 2);
        assert_eq!(s.run_count(), 2);
        assert_eq!(s.status(), RunStatus::Running);
    }

    #[test]
    fn ownership_checks_owner_and_namespace() {
        let s = session();
        let owner = OwnerId::new("user").unwrap();
        assert!(s.belongs_to(&owner, &Namespace::new("insights").unwrap()));
        assert!(!s.belongs_to(&owner, &Namespace::new("campaign").unwrap()));
        assert!(!s.belongs_to(&OwnerId::new("other").unwrap(), s.namespace()));
    }
}
