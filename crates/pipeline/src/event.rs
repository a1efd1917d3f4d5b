//! Events emitted by a run, one per completed step plus one terminal event.
//!
//! Events carry values, never references into the session: a consumer can
//! hold, mutate or drop them without any effect on the run that produced them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{BatonError, OutputKey, RunId, SessionId, StateValue, StepName, Timestamp};

/// An immutable progress notification from a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The run that produced this event.
    pub run_id: RunId,
    /// The session the run executed against.
    pub session_id: SessionId,
    /// Zero-based position in the run's event stream.
    pub sequence: u64,
    /// The step that completed (or failed). `None` for terminal events not
    /// attributable to a step (completion, rejection, cancellation).
    pub step: Option<StepName>,
    /// State entries this event changed. Empty for terminal events.
    pub delta: BTreeMap<OutputKey, StateValue>,
    /// `true` for the last event of a run.
    pub is_terminal: bool,
    /// Why the run stopped short. Only ever set on terminal events.
    pub error: Option<BatonError>,
    /// When the event was produced.
    pub timestamp: Timestamp,
}

impl Event {
    /// A non-terminal event reporting that `step` wrote `value` under `key`.
    pub fn step_completed(
        run_id: RunId,
        session_id: SessionId,
        sequence: u64,
        step: StepName,
        key: OutputKey,
        value: StateValue,
    ) -> Self {
        let mut delta = BTreeMap::new();
        delta.insert(key, value);
        Self {
            run_id,
            session_id,
            sequence,
            step: Some(step),
            delta,
            is_terminal: false,
            error: None,
            timestamp: Timestamp::now(),
        }
    }

    /// The terminal event of a run where every step succeeded.
    pub fn completed(run_id: RunId, session_id: SessionId, sequence: u64) -> Self {
        Self {
            run_id,
            session_id,
            sequence,
            step: None,
            delta: BTreeMap::new(),
            is_terminal: true,
            error: None,
            timestamp: Timestamp::now(),
        }
    }

    /// The terminal event of a run that stopped short because of `error`.
    pub fn failed(run_id: RunId, session_id: SessionId, sequence: u64, error: BatonError) -> Self {
        let step = error.failed_step().map(|(step, _)| step.clone());
        Self {
            run_id,
            session_id,
            sequence,
            step,
            delta: BTreeMap::new(),
            is_terminal: true,
            error: Some(error),
            timestamp: Timestamp::now(),
        }
    }

    /// Returns `true` for a terminal event without an error.
    pub fn is_success(&self) -> bool {
        self.is_terminal && self.error.is_none()
    }

    /// The single `(key, value)` a step event carries.
    pub fn output(&self) -> Option<(&OutputKey, &StateValue)> {
        if self.is_terminal {
            return None;
        }
        self.delta.iter().next()
    }

    /// The value this event wrote under `key`, if any.
    pub fn value(&self, key: &str) -> Option<&StateValue> {
        self.delta.get(key)
    }
}
