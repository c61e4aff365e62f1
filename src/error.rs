use thiserror::Error;

use crate::product::{ProductId, Scope};
use crate::task::TaskKey;

/// Errors raised while building or walking a [`DependencyGraph`](crate::DependencyGraph).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node '{0}' was already added to the graph")]
    DuplicateNode(String),

    #[error("Node '{0}' is not part of the graph")]
    UnknownNode(String),

    #[error("Cycle detected at node '{0}'")]
    Cycle(String),
}

/// Configuration errors, all detected before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid product id '{0}', expected [a-z][a-zA-Z]*")]
    InvalidProductId(String),

    #[error("Task '{0}' is already registered")]
    DuplicateTask(TaskKey),

    #[error("Product '{product}' is provided by both '{first}' and '{second}'")]
    DuplicateProduct {
        product: ProductId,
        first: TaskKey,
        second: TaskKey,
    },

    #[error("Task '{task}' is missing required field '{field}'")]
    MissingField { task: String, field: &'static str },

    #[error("Task '{task}' uses product '{product}' which no task provides")]
    UnknownProduct { task: TaskKey, product: ProductId },

    #[error("No task provides '{0}'")]
    UnknownTarget(String),

    #[error("Cyclic product dependency:\n{0}")]
    Cycle(#[from] GraphError),

    #[error("Settings for plugin '{plugin}':\n{source}")]
    Settings {
        plugin: String,
        source: serde_json::Error,
    },

    #[error("Invalid engine configuration:\n{0}")]
    Engine(serde_json::Error),
}

/// Violations of the producer/consumer contract, always a defect in the task
/// that triggered them.
#[derive(Debug, Error, Clone)]
pub enum ProductError {
    #[error("Product '{0}' was already completed")]
    AlreadyCompleted(ProductId),

    #[error("Task '{task}' did not declare product '{product}'")]
    NotDeclared { task: TaskKey, product: String },

    #[error("Product '{0}' is not registered")]
    NotRegistered(ProductId),

    #[error("Product '{product}' is not a {expected}")]
    WrongShape {
        product: ProductId,
        expected: &'static str,
    },

    #[error("Product '{0}' will never be completed, its producer did not finish")]
    Unavailable(ProductId),

    #[error("Task '{task}' did not complete its product '{product}'")]
    NotCompleted { task: TaskKey, product: ProductId },

    #[error("Scope '{scope}' cannot import '{product}': {reason}")]
    Import {
        scope: Scope,
        product: ProductId,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Error while configuring the build.\n{0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Build failed: {} task(s) failed, {} not run", failed.len(), not_run.len())]
    Failed {
        failed: Vec<TaskKey>,
        not_run: Vec<TaskKey>,
    },
}
