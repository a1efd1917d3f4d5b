//! Event consumers: fold a run's stream into the values a presenter needs.

use std::fmt::Display;

use futures::{Stream, StreamExt};
use pipeline::{BatonError, Event, RunId, SessionState};
use tracing::warn;

/// What a run produced, as seen through its events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// The run, once its first event arrived.
    pub run_id: Option<RunId>,
    /// Every delta applied in order (last write wins per key).
    pub outputs: SessionState,
    /// Number of events received, terminal included.
    pub events: usize,
    /// The terminal event's error, if the run stopped short.
    pub error: Option<BatonError>,
    /// `true` if a terminal event was received.
    pub finished: bool,
}

impl RunReport {
    /// Returns `true` if the run reached its terminal event without an error.
    pub fn succeeded(&self) -> bool {
        self.finished && self.error.is_none()
    }

    /// The output under `key` as text.
    pub fn text(&self, key: &str) -> Option<String> {
        self.outputs.get_text(key)
    }

    fn apply(&mut self, event: &Event) {
        self.run_id.get_or_insert(event.run_id);
        self.outputs.merge(&event.delta);
        self.events += 1;
        if event.is_terminal {
            self.finished = true;
            self.error.clone_from(&event.error);
        }
    }
}

/// Drains `events` and returns the accumulated report.
pub async fn collect<S>(events: S) -> RunReport
where
    S: Stream<Item = Event>,
{
    let mut events = std::pin::pin!(events);
    let mut report = RunReport::default();
    while let Some(event) = events.next().await {
        report.apply(&event);
    }
    report
}

/// Calls `handler` for every event, in order, while accumulating a report.
///
/// A handler error stops consumption immediately. The stream is dropped, so
/// the run halts before its next step; the session keeps the outputs of every
/// step that already completed.
///
/// # Errors
///
/// [`BatonError::StreamConsumerError`] carrying the handler's message.
pub async fn consume<S, F, E>(events: S, mut handler: F) -> Result<RunReport, BatonError>
where
    S: Stream<Item = Event>,
    F: FnMut(&Event) -> Result<(), E>,
    E: Display,
{
    let mut events = std::pin::pin!(events);
    let mut report = RunReport::default();
    while let Some(event) = events.next().await {
        if let Err(err) = handler(&event) {
            warn!(
                run_id = %event.run_id,
                sequence = event.sequence,
                error = %err,
                "event handler failed"
            );
            return Err(BatonError::StreamConsumerError {
                message: err.to_string(),
            });
        }
        report.apply(&event);
    }
    Ok(report)
}
