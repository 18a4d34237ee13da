//! Task identity

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a task within a graph.
///
/// Hierarchical by convention, with colon-separated segments
/// (e.g. `:app:compileJvm`). Two names are equal iff their string forms
/// are equal, so a `TaskName` is safe to use as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    /// Create a new task name.
    ///
    /// Panics if `name` is blank: task names come from the wiring layer, so
    /// a blank one is a bug there rather than user input.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.trim().is_empty(), "task name must not be blank");
        Self(name)
    }

    /// The raw string form of this name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Colon-separated segments, skipping empty ones (a leading `:` is
    /// conventional and does not contribute a segment).
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(':').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
