//! Instruction templates that read earlier step outputs from session state.
//!
//! Syntax:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `{key}` | Value of `key`; the step declares `key` as a dependency |
//! | `{key?}` | Value of `key`, or nothing when the key is absent |
//! | `{{` / `}}` | Literal `{` / `}` |
//!
//! Keys are parsed once, at pipeline construction, so that a reference to a
//! key no earlier step produces is a [`BatonError::ConfigurationError`] rather
//! than a run-time surprise.

use thiserror::Error;

use crate::{value_as_text, BatonError, OutputKey, SessionState};

/// A required template key was absent from the session state at render time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("state key '{key}' is not available")]
pub struct MissingStateKey {
    /// The key that could not be resolved.
    pub key: OutputKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder { key: OutputKey, optional: bool },
}

/// A parsed instruction template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses `source`.
    ///
    /// # Errors
    ///
    /// [`BatonError::ConfigurationError`] for an unterminated `{` or a
    /// placeholder whose key contains characters other than ASCII letters,
    /// digits, `_`, `-` and `.`.
    pub fn parse(source: impl Into<String>) -> Result<Self, BatonError> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(BatonError::configuration(format!(
                            "unterminated placeholder starting at byte {offset} in instruction template"
                        )));
                    }
                    let (name, optional) = match name.strip_suffix('?') {
                        Some(stripped) => (stripped, true),
                        None => (name.as_str(), false),
                    };
                    let key = parse_key(name)?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder { key, optional });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { source, segments })
    }

    /// The original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Keys referenced with `{key}`, in first-appearance order, without duplicates.
    pub fn required_keys(&self) -> Vec<OutputKey> {
        self.keys(false)
    }

    /// Keys referenced with `{key?}`, in first-appearance order, without duplicates.
    pub fn optional_keys(&self) -> Vec<OutputKey> {
        self.keys(true)
    }

    fn keys(&self, want_optional: bool) -> Vec<OutputKey> {
        let mut keys: Vec<OutputKey> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder { key, optional } = segment {
                if *optional == want_optional && !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }

    /// Substitutes state values into the template.
    ///
    /// String values are inserted verbatim; other JSON values as compact JSON.
    pub fn render(&self, state: &SessionState) -> Result<String, MissingStateKey> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { key, optional } => match state.get(key.as_str()) {
                    Some(value) => out.push_str(&value_as_text(value)),
                    None if *optional => {}
                    None => return Err(MissingStateKey { key: key.clone() }),
                },
            }
        }
        Ok(out)
    }
}

fn parse_key(name: &str) -> Result<OutputKey, BatonError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(BatonError::configuration(format!(
            "invalid placeholder '{{{name}}}' in instruction template"
        )));
    }
    OutputKey::new(name)
        .ok_or_else(|| BatonError::configuration("empty placeholder in instruction template"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn state(entries: &[(&str, serde_json::Value)]) -> SessionState {
        entries
            .iter()
            .map(|(k, v)| (OutputKey::new(*k).unwrap(), v.clone()))
            .collect()
    }

    #[test]
    fn renders_required_and_optional_keys() {
        let t = Template::parse("Review this:\n{generated_code}\nNotes: {notes?}").unwrap();
        let rendered = t
            .render(&state(&[("generated_code", json!("fn main() {}"))]))
            .unwrap();
        assert_eq!(rendered, "Review this:\nfn main() {}\nNotes: ");
        assert_eq!(t.required_keys(), vec![OutputKey::new("generated_code").unwrap()]);
        assert_eq!(t.optional_keys(), vec![OutputKey::new("notes").unwrap()]);
    }

    #[test]
    fn doubled_braces_are_literal() {
        let t = Template::parse(r#"data = {{"category": ["A"]}} from {sql_query}"#).unwrap();
        assert_eq!(t.required_keys().len(), 1);
        let rendered = t.render(&state(&[("sql_query", json!("SELECT 1"))])).unwrap();
        assert_eq!(rendered, r#"data = {"category": ["A"]} from SELECT 1"#);
    }

    #[test]
    fn structured_values_render_as_json() {
        let t = Template::parse("rows: {rows}").unwrap();
        let rendered = t.render(&state(&[("rows", json!([1, 2]))])).unwrap();
        assert_eq!(rendered, "rows: [1,2]");
    }

    #[test]
    fn missing_required_key_fails_render() {
        let t = Template::parse("{strategy_text}").unwrap();
        let err = t.render(&SessionState::new()).unwrap_err();
        assert_eq!(err.key.as_str(), "strategy_text");
    }

    #[test]
    fn malformed_templates_are_configuration_errors() {
        for bad in ["open {brace", "{}", "{has space}", "{?}"] {
            let err = Template::parse(bad).unwrap_err();
            assert_eq!(err.kind(), "configuration_error", "template: {bad}");
        }
    }

    #[test]
    fn repeated_keys_are_reported_once() {
        let t = Template::parse("{a} and {a} then {b}").unwrap();
        let keys: Vec<_> = t.required_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["a", "b"]);
    }
}
