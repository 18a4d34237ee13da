//! Artifact declarations used for implicit dependency inference
//!
//! A task may declare the filesystem locations it *produces* and, through
//! selectors, the artifacts it *consumes*. The graph builder matches
//! consumers to producers once, at graph-build time, and turns every match
//! into a dependency edge.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Type tag distinguishing artifact flavors (e.g. `"classes"`, `"sources"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKind(String);

impl ArtifactKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A declared filesystem location a task produces or consumes.
///
/// The path is normalized lexically on construction, so two declarations of
/// the same location compare equal regardless of spelling. Artifacts at the
/// same normalized path are the same artifact for producer-uniqueness
/// purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    kind: ArtifactKind,
    path: PathBuf,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: normalize_path(&path.into()),
        }
    }

    pub fn kind(&self) -> &ArtifactKind {
        &self.kind
    }

    /// The normalized path of this artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.path.display())
    }
}

/// Lexical path normalization: drops `.` components and folds `..` into the
/// preceding segment where possible. No filesystem access.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(Component::ParentDir);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Cardinality a consumer imposes on the producers matching one selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantifier {
    /// Exactly one artifact must match.
    Single,
    /// One or more artifacts must match.
    AtLeastOne,
    /// Any number of matches, including none.
    AnyOrNone,
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Single => "exactly one",
            Self::AtLeastOne => "at least one",
            Self::AnyOrNone => "any number of",
        };
        f.write_str(text)
    }
}

type ArtifactPredicate = Arc<dyn Fn(&Artifact) -> bool + Send + Sync>;

/// Declarative query a task uses to consume artifacts produced elsewhere.
///
/// Selectors are fixed at task construction time and evaluated once, by the
/// graph builder's auto-wiring pass.
#[derive(Clone)]
pub struct ArtifactSelector {
    kind: ArtifactKind,
    predicate: ArtifactPredicate,
    description: String,
    quantifier: Quantifier,
}

impl ArtifactSelector {
    pub fn new(
        kind: ArtifactKind,
        description: impl Into<String>,
        quantifier: Quantifier,
        predicate: impl Fn(&Artifact) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            predicate: Arc::new(predicate),
            description: description.into(),
            quantifier,
        }
    }

    /// Selector accepting every artifact of the given kind.
    pub fn any_of_kind(kind: ArtifactKind, quantifier: Quantifier) -> Self {
        let description = format!("of kind `{kind}`");
        Self::new(kind, description, quantifier, |_| true)
    }

    pub fn matches(&self, artifact: &Artifact) -> bool {
        artifact.kind() == &self.kind && (self.predicate)(artifact)
    }

    /// Human-readable description used in wiring error messages.
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantifier(&self) -> Quantifier {
        self.quantifier
    }
}

impl fmt::Debug for ArtifactSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactSelector")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("quantifier", &self.quantifier)
            .finish_non_exhaustive()
    }
}

/// Artifacts resolved for one selector, in the consumer's selector order.
#[derive(Debug, Clone)]
pub struct ResolvedArtifacts {
    pub description: String,
    pub artifacts: Vec<Artifact>,
}

/// Artifact facet of a [`Task`](crate::Task).
///
/// Tasks implementing this take part in the builder's auto-wiring pass:
/// their produced artifacts are matched against other tasks' selectors, and
/// their own selectors are resolved and handed back via [`bind_consumed`].
///
/// [`bind_consumed`]: ArtifactAware::bind_consumed
pub trait ArtifactAware: Send + Sync {
    /// Artifacts this task writes.
    fn produces(&self) -> Vec<Artifact> {
        Vec::new()
    }

    /// Selectors over artifacts this task reads.
    fn consumes(&self) -> Vec<ArtifactSelector> {
        Vec::new()
    }

    /// One-time hand-off of the resolved selector matches, one entry per
    /// selector in [`consumes`](ArtifactAware::consumes) order. Only called
    /// when `consumes` is non-empty.
    fn bind_consumed(&self, resolved: Vec<ResolvedArtifacts>) {
        let _ = resolved;
    }
}

/// Write-once holder consuming tasks embed to receive their wiring results.
#[derive(Debug, Default)]
pub struct ConsumedArtifacts(OnceLock<Vec<ResolvedArtifacts>>);

impl ConsumedArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the wiring results. Panics on a second bind: the builder hands
    /// results over exactly once per graph.
    pub fn bind(&self, resolved: Vec<ResolvedArtifacts>) {
        if self.0.set(resolved).is_err() {
            panic!("consumed artifacts bound twice");
        }
    }

    /// The resolved artifacts, selector order preserved. Panics if read
    /// before the graph was built.
    pub fn get(&self) -> &[ResolvedArtifacts] {
        match self.0.get() {
            Some(resolved) => resolved,
            None => panic!("consumed artifacts read before the graph was built"),
        }
    }
}
