//! Process-wide session registry.
//!
//! Each session lives in its own cell with its own lock, so runs on distinct
//! sessions never contend. Within a session the runner is the single writer:
//! it holds a [`RunLease`] for the duration of a run, and every reader gets a
//! cloned snapshot.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use pipeline::{
    BatonError, InvocationError, Message, Namespace, OutputKey, OwnerId, RunId, RunStatus,
    Session, SessionId, SessionState, StateValue, StepDescriptor, StepInput,
};
use tracing::debug;

/// The address a caller uses to refer to a session it created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    /// The session's identifier.
    pub id: SessionId,
    /// Who the session belongs to.
    pub owner: OwnerId,
    /// The application namespace the session was created in.
    pub namespace: Namespace,
}

struct SessionCell {
    session: RwLock<Session>,
    busy: AtomicBool,
}

/// Bounded map of live sessions.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionCell>>,
    live: AtomicUsize,
    capacity: usize,
}

impl SessionRegistry {
    /// Creates a registry holding at most `capacity` sessions.
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Maximum number of live sessions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Returns `true` when no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates a fresh, empty session.
    ///
    /// # Errors
    ///
    /// [`BatonError::ResourceExhausted`] when the registry is at capacity.
    pub fn create(
        &self,
        owner: OwnerId,
        namespace: Namespace,
    ) -> Result<SessionHandle, BatonError> {
        let capacity = self.capacity;
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|_| BatonError::ResourceExhausted { capacity })?;

        let session = Session::new(owner.clone(), namespace.clone());
        let id = session.id();
        let cell = Arc::new(SessionCell {
            session: RwLock::new(session),
            busy: AtomicBool::new(false),
        });
        let _ = self.sessions.insert(id, cell);
        debug!(session_id = %id, %owner, %namespace, "session created");

        Ok(SessionHandle {
            id,
            owner,
            namespace,
        })
    }

    /// A snapshot of the session, if `handle` addresses a live session it owns.
    pub fn snapshot(&self, handle: &SessionHandle) -> Result<Session, BatonError> {
        let cell = self.lookup(handle)?;
        let session = cell.session.read().clone();
        Ok(session)
    }

    /// Destroys a session and returns its final contents.
    ///
    /// # Errors
    ///
    /// [`BatonError::SessionNotFound`] for unknown or foreign sessions,
    /// [`BatonError::SessionBusy`] while a run is in progress.
    pub fn discard(&self, handle: &SessionHandle) -> Result<Session, BatonError> {
        let cell = self.lookup(handle)?;
        // Hold the busy flag through removal so no run can claim the cell in
        // between. It is never released: a discarded cell stays unclaimable.
        self.acquire(&cell, handle)?;
        if self.sessions.remove(&handle.id).is_none() {
            return Err(BatonError::SessionNotFound {
                session_id: handle.id,
            });
        }
        let _ = self.live.fetch_sub(1, Ordering::AcqRel);
        debug!(session_id = %handle.id, "session discarded");
        let session = cell.session.read().clone();
        Ok(session)
    }

    /// Takes exclusive write access to a session for one run.
    ///
    /// # Errors
    ///
    /// [`BatonError::SessionNotFound`] for unknown or foreign sessions,
    /// [`BatonError::SessionBusy`] if another run holds the session.
    pub fn claim(&self, handle: &SessionHandle) -> Result<RunLease, BatonError> {
        let cell = self.lookup(handle)?;
        self.acquire(&cell, handle)?;
        Ok(RunLease { cell })
    }

    fn acquire(&self, cell: &SessionCell, handle: &SessionHandle) -> Result<(), BatonError> {
        if cell
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Ok(());
        }
        if self.sessions.contains_key(&handle.id) {
            Err(BatonError::SessionBusy {
                session_id: handle.id,
            })
        } else {
            Err(BatonError::SessionNotFound {
                session_id: handle.id,
            })
        }
    }

    fn lookup(&self, handle: &SessionHandle) -> Result<Arc<SessionCell>, BatonError> {
        let not_found = || BatonError::SessionNotFound {
            session_id: handle.id,
        };
        let cell = self
            .sessions
            .get(&handle.id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(not_found)?;
        if !cell.session.read().belongs_to(&handle.owner, &handle.namespace) {
            return Err(not_found());
        }
        Ok(cell)
    }
}

/// Exclusive write access to one session for the duration of a run.
///
/// Dropping the lease releases the session. A lease dropped while its run is
/// still marked running (the consumer abandoned the stream) records the run
/// as cancelled.
pub struct RunLease {
    cell: Arc<SessionCell>,
}

impl RunLease {
    /// Starts a new traversal: cursor back to 0, state kept.
    pub fn begin_run(&self, run_id: RunId) {
        self.cell.session.write().begin_run(run_id);
    }

    /// Builds the read-only view for `step` from the current state.
    ///
    /// # Errors
    ///
    /// [`BatonError::StepExecutionError`] if a declared dependency is absent.
    pub fn input_for(
        &self,
        step: &StepDescriptor,
        index: usize,
        message: &Arc<Message>,
    ) -> Result<StepInput, BatonError> {
        let state = self.state();
        let mut resolved = std::collections::BTreeMap::new();
        for key in step.required_keys() {
            let Some(value) = state.get(key.as_str()) else {
                return Err(BatonError::step_failed(
                    step.name(),
                    index,
                    InvocationError::permanent(format!("required state key '{key}' is missing")),
                ));
            };
            let _ = resolved.insert(key.clone(), value.clone());
        }
        Ok(StepInput::new(
            step.name().clone(),
            index,
            state,
            Arc::clone(message),
            resolved,
        ))
    }

    /// A snapshot of the session state.
    pub fn state(&self) -> SessionState {
        self.cell.session.read().state().clone()
    }

    /// Merges one step's output and advances the cursor.
    pub fn commit(&self, key: OutputKey, value: StateValue) {
        self.cell.session.write().commit_step(key, value);
    }

    /// Records how the run ended.
    pub fn finish(&self, status: RunStatus) {
        self.cell.session.write().finish_run(status);
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        {
            let mut session = self.cell.session.write();
            if session.status() == RunStatus::Running {
                session.finish_run(RunStatus::Cancelled);
            }
        }
        self.cell.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use serde_json::json;

    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("user").unwrap()
    }

    fn ns(n: &str) -> Namespace {
        Namespace::new(n).unwrap()
    }

    #[test]
    fn capacity_is_enforced_and_freed_by_discard() {
        let registry = SessionRegistry::new(2);
        let a = registry.create(owner(), ns("insights")).unwrap();
        let _b = registry.create(owner(), ns("insights")).unwrap();

        let err = registry.create(owner(), ns("insights")).unwrap_err();
        assert_eq!(err, BatonError::ResourceExhausted { capacity: 2 });

        registry.discard(&a).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.create(owner(), ns("insights")).is_ok());
    }

    #[test]
    fn foreign_namespace_is_not_found() {
        let registry = SessionRegistry::new(4);
        let handle = registry.create(owner(), ns("insights")).unwrap();
        let foreign = SessionHandle {
            namespace: ns("campaign"),
            ..handle.clone()
        };

        assert_eq!(registry.snapshot(&foreign).unwrap_err().kind(), "session_not_found");
        assert!(registry.snapshot(&handle).is_ok());
    }

    #[test]
    fn second_claim_is_busy_until_lease_drops() {
        let registry = SessionRegistry::new(4);
        let handle = registry.create(owner(), ns("code")).unwrap();

        let lease = registry.claim(&handle).unwrap();
        assert_eq!(registry.claim(&handle).err().unwrap().kind(), "session_busy");
        assert_eq!(registry.discard(&handle).unwrap_err().kind(), "session_busy");

        drop(lease);
        assert!(registry.claim(&handle).is_ok());
    }

    #[test]
    fn discarded_session_cannot_be_claimed() {
        let registry = SessionRegistry::new(4);
        let handle = registry.create(owner(), ns("code")).unwrap();

        registry.discard(&handle).unwrap();
        assert_eq!(registry.claim(&handle).err().unwrap().kind(), "session_not_found");
        assert_eq!(registry.discard(&handle).unwrap_err().kind(), "session_not_found");
        assert!(registry.is_empty());
    }

    #[test]
    fn claim_and_discard_never_both_win() {
        let registry = Arc::new(SessionRegistry::new(4));
        for _ in 0..2_000 {
            let handle = registry.create(owner(), ns("campaign")).unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let claimer = {
                let (registry, handle, barrier) =
                    (Arc::clone(&registry), handle.clone(), Arc::clone(&barrier));
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.claim(&handle)
                })
            };
            barrier.wait();
            let discarded = registry.discard(&handle);
            let lease = claimer.join().unwrap();

            assert!(
                lease.is_ok() != discarded.is_ok(),
                "exactly one of claim and discard must succeed"
            );
            drop(lease);
            if registry.snapshot(&handle).is_ok() {
                registry.discard(&handle).unwrap();
            }
            assert!(registry.is_empty());
        }
    }

    #[test]
    fn abandoned_lease_marks_run_cancelled() {
        let registry = SessionRegistry::new(4);
        let handle = registry.create(owner(), ns("code")).unwrap();

        let lease = registry.claim(&handle).unwrap();
        lease.begin_run(RunId::new_random());
        lease.commit(OutputKey::new("generated_code").unwrap(), json!("print(1)"));
        drop(lease);

        let session = registry.snapshot(&handle).unwrap();
        assert_eq!(session.status(), RunStatus::Cancelled);
        assert_eq!(session.cursor(), 1);
        assert_eq!(session.state().len(), 1);
    }
}
