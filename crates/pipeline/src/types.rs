//! Shared value types: timestamps, input messages, and the session state map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BatonError, OutputKey};

/// A value stored in [`SessionState`]: text or any structured data.
pub type StateValue = serde_json::Value;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Who produced a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The caller submitting work.
    User,
    /// A model response.
    Model,
    /// Out-of-band instructions.
    System,
}

/// One content part of a [`Message`]. Only text is supported today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Part {
    /// Plain text.
    Text(String),
}

impl Part {
    /// Returns the text of this part, if it is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
        }
    }
}

/// An immutable input unit for one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    parts: Vec<Part>,
}

impl Message {
    /// Creates a message from explicit parts.
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// Creates a single-part user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::Text(text.into())])
    }

    /// Who produced this message.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The content parts, in order.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// All text parts joined by newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rejects messages with no parts or with only whitespace text.
    pub fn validate(&self) -> Result<(), BatonError> {
        if self.parts.is_empty() {
            return Err(BatonError::invalid_message("message has no content parts"));
        }
        let has_text = self
            .parts
            .iter()
            .filter_map(Part::as_text)
            .any(|t| !t.trim().is_empty());
        if !has_text {
            return Err(BatonError::invalid_message("message text is empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// All outputs produced so far in a session, keyed by [`OutputKey`].
///
/// Writes are last-write-wins per key. Iteration order is the key order, so
/// two snapshots with the same contents compare and print identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState(BTreeMap<OutputKey, StateValue>);

impl SessionState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.0.get(key)
    }

    /// Returns `true` if `key` has been written.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Writes `value` under `key`, returning the value it replaced.
    pub fn insert(&mut self, key: OutputKey, value: StateValue) -> Option<StateValue> {
        self.0.insert(key, value)
    }

    /// Merges every entry of `delta` into this state, overwriting existing keys.
    pub fn merge(&mut self, delta: &BTreeMap<OutputKey, StateValue>) {
        for (key, value) in delta {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&OutputKey, &StateValue)> {
        self.0.iter()
    }

    /// Number of keys written.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value under `key` as text: strings verbatim, other values as
    /// compact JSON.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.get(key).map(value_as_text)
    }
}

impl FromIterator<(OutputKey, StateValue)> for SessionState {
    fn from_iter<I: IntoIterator<Item = (OutputKey, StateValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Renders a state value as text: strings verbatim, everything else as compact JSON.
pub fn value_as_text(value: &StateValue) -> String {
    match value {
        StateValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(k: &str) -> OutputKey {
        OutputKey::new(k).unwrap()
    }

    #[test]
    fn whitespace_message_is_invalid() {
        let err = Message::user_text("  \n ").validate().unwrap_err();
        assert_eq!(err.kind(), "invalid_message");

        let err = Message::new(Role::User, Vec::new()).validate().unwrap_err();
        assert_eq!(err.kind(), "invalid_message");

        assert!(Message::user_text("top 5 products").validate().is_ok());
    }

    #[test]
    fn message_text_joins_parts() {
        let msg = Message::new(
            Role::User,
            vec![Part::Text("a".into()), Part::Text("b".into())],
        );
        assert_eq!(msg.text(), "a\nb");
    }

    #[test]
    fn merge_is_last_write_wins() {
        let mut state = SessionState::new();
        state.insert(key("campaign_text"), json!("draft"));

        let mut delta = BTreeMap::new();
        delta.insert(key("campaign_text"), json!("final"));
        delta.insert(key("notes"), json!({"len": 2}));
        state.merge(&delta);

        assert_eq!(state.get("campaign_text"), Some(&json!("final")));
        assert_eq!(state.get_text("notes").as_deref(), Some(r#"{"len":2}"#));
        assert_eq!(state.len(), 2);
    }
}
