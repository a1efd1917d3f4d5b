//! Progressive rendering of run events for a terminal.

use std::io::{self, Write};

use pipeline::{value_as_text, Event};

/// Writes each completed step as `== step (output_key) ==` followed by its
/// value. Terminal events print nothing; the caller reports errors.
pub fn render_event(out: &mut impl Write, event: &Event) -> io::Result<()> {
    if event.is_terminal {
        return Ok(());
    }
    let step = event.step.as_ref().map_or("?", |s| s.as_str());
    for (key, value) in &event.delta {
        writeln!(out, "== {step} ({key}) ==")?;
        writeln!(out, "{}", value_as_text(value))?;
        writeln!(out)?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use pipeline::{BatonError, OutputKey, RunId, SessionId, StepName};
    use serde_json::json;

    use super::*;

    #[test]
    fn step_output_is_printed_under_a_header() {
        let event = Event::step_completed(
            RunId::new_random(),
            SessionId::new_random(),
            0,
            StepName::new("text_to_sql").unwrap(),
            OutputKey::new("sql_query").unwrap(),
            json!("SELECT 1"),
        );
        let mut out = Vec::new();
        render_event(&mut out, &event).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "== text_to_sql (sql_query) ==\nSELECT 1\n\n"
        );
    }

    #[test]
    fn terminal_events_print_nothing() {
        let event = Event::failed(
            RunId::new_random(),
            SessionId::new_random(),
            3,
            BatonError::Cancelled,
        );
        let mut out = Vec::new();
        render_event(&mut out, &event).unwrap();
        assert!(out.is_empty());
    }
}
