//! Newtype domain identifiers.
//!
//! Every concept with an identity gets its own newtype so that, for example, a
//! [`StepName`] can never be passed where an [`OutputKey`] is expected even
//! though both are strings underneath.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display, Borrow<str>.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for UUID-backed newtypes (internally generated).
// Generates: struct (Copy), new_random(), from_uuid(), as_uuid(), Display.
// ---------------------------------------------------------------------------
macro_rules! uuid_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID (e.g. one parsed from a request path).
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying [`Uuid`].
            pub fn as_uuid(self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id! {
    /// Identifies one session: an isolated state container for pipeline runs.
    SessionId
}

uuid_id! {
    /// Identifies a single traversal of a pipeline (one `run` call).
    ///
    /// Propagated through spans and every emitted event so all activity from
    /// one run can be correlated.
    RunId
}

string_id! {
    /// Identifies a step within a pipeline. Unique per pipeline.
    StepName
}

string_id! {
    /// A session-state key under which a step publishes its output.
    ///
    /// Later steps read earlier outputs by naming these keys.
    OutputKey
}

string_id! {
    /// Identifies a named pipeline (e.g. `"insights"`, `"campaign"`).
    PipelineName
}

string_id! {
    /// Identifies who a session belongs to (a user, tenant or request origin).
    OwnerId
}

string_id! {
    /// Groups sessions per application. Defaults to the pipeline name.
    Namespace
}

impl From<&PipelineName> for Namespace {
    fn from(name: &PipelineName) -> Self {
        Self(name.as_str().to_owned())
    }
}
