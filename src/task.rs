//! Configured tasks and the contract a task body implements.
use std::collections::BTreeSet;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use crate::product::{ProductId, Scope};
use crate::views::{ProvidedProducts, UsedProducts};

/// Result from a single executed task body.
pub type TaskResult<T> = anyhow::Result<T, anyhow::Error>;

/// Builds a fresh task body for one execution.
pub type TaskFactory = Arc<dyn Fn() -> Box<dyn Runnable> + Send + Sync>;

/// Cheap contributor to a task's up-to-date fingerprint, e.g. a tool version
/// or a digest of the task's settings.
pub type SkipHint = Arc<dyn Fn() -> String + Send + Sync>;

/// Identifies a task within a build: the scope it belongs to and its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    scope: Scope,
    name: Arc<str>,
}

impl TaskKey {
    pub fn new(scope: Scope, name: impl AsRef<str>) -> Self {
        Self {
            scope,
            name: Arc::from(name.as_ref()),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// An ordinary build step.
    Standard,
    /// Internal wiring, hidden from user-facing listings.
    Intermediate,
    /// Named alias over a set of products, produces nothing itself.
    Goal,
}

impl Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskType::Standard => "standard",
            TaskType::Intermediate => "intermediate",
            TaskType::Goal => "goal",
        })
    }
}

/// What a task body reports back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ok,
    Failed,
    /// The body decided its previous output is still valid.
    Skipped,
    /// The body ran but had nothing to do.
    Empty,
}

/// A task body. It is expected to complete its declared product exactly
/// once through [`ProvidedProducts`] before returning a non-failed status.
pub trait Runnable: Send {
    fn run(&mut self, provided: &ProvidedProducts, used: &UsedProducts) -> TaskResult<TaskStatus>;
}

impl<F> Runnable for F
where
    F: FnMut(&ProvidedProducts, &UsedProducts) -> TaskResult<TaskStatus> + Send,
{
    fn run(&mut self, provided: &ProvidedProducts, used: &UsedProducts) -> TaskResult<TaskStatus> {
        self(provided, used)
    }
}

/// A task as declared during plugin configuration.
///
/// Immutable once registered, except that goals may gain further consumed
/// products and contributing plugins when several plugins declare the same
/// goal.
#[derive(Clone)]
pub struct ConfiguredTask {
    pub(crate) key: TaskKey,
    pub(crate) plugins: BTreeSet<String>,
    pub(crate) factory: TaskFactory,
    pub(crate) provides: Option<ProductId>,
    pub(crate) uses: BTreeSet<ProductId>,
    pub(crate) uses_optionally: BTreeSet<ProductId>,
    pub(crate) imports: BTreeSet<ProductId>,
    pub(crate) imports_all: BTreeSet<ProductId>,
    pub(crate) skip_hints: Vec<SkipHint>,
    pub(crate) description: Option<String>,
    pub(crate) kind: TaskType,
}

impl ConfiguredTask {
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        self.key.name()
    }

    pub fn kind(&self) -> TaskType {
        self.kind
    }

    /// Plugins that registered (or contributed to) this task.
    pub fn plugins(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(String::as_str)
    }

    pub fn provides(&self) -> Option<&ProductId> {
        self.provides.as_ref()
    }

    /// Mandatory inputs.
    pub fn uses(&self) -> &BTreeSet<ProductId> {
        &self.uses
    }

    pub fn uses_optionally(&self) -> &BTreeSet<ProductId> {
        &self.uses_optionally
    }

    pub fn imports(&self) -> &BTreeSet<ProductId> {
        &self.imports
    }

    pub fn imports_all(&self) -> &BTreeSet<ProductId> {
        &self.imports_all
    }

    pub fn skip_hints(&self) -> &[SkipHint] {
        &self.skip_hints
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_goal(&self) -> bool {
        self.kind == TaskType::Goal
    }

    /// Every product the task may read, mandatory and optional.
    pub fn consumed(&self) -> impl Iterator<Item = &ProductId> {
        self.uses.iter().chain(&self.uses_optionally)
    }

    /// Instantiates a fresh body for one run.
    pub fn create(&self) -> Box<dyn Runnable> {
        (self.factory)()
    }
}

impl Debug for ConfiguredTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredTask")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("plugins", &self.plugins)
            .field("provides", &self.provides)
            .field("uses", &self.uses)
            .field("uses_optionally", &self.uses_optionally)
            .field("imports", &self.imports)
            .field("imports_all", &self.imports_all)
            .field("skip_hints", &self.skip_hints.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = TaskKey::new(Scope::new("core"), "compileJava");
        assert_eq!(key.to_string(), "core:compileJava");
        assert_eq!(key.name(), "compileJava");
        assert_eq!(key.scope().name(), "core");
    }

    #[test]
    fn test_type_display() {
        assert_eq!(TaskType::Standard.to_string(), "standard");
        assert_eq!(TaskType::Intermediate.to_string(), "intermediate");
        assert_eq!(TaskType::Goal.to_string(), "goal");
    }
}
