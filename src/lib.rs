#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod engine;
mod error;
mod fingerprint;
mod graph;
mod imports;
#[cfg(feature = "logging")]
mod logging;
mod product;
mod promise;
mod registry;
mod repository;
mod task;
mod views;

pub use crate::config::{EngineConfig, Settings};
pub use crate::engine::{
    BuildReport, Engine, InProcess, Isolation, Plan, TaskOutcome, TaskReport, WorkerPool,
};
pub use crate::error::*;
pub use crate::fingerprint::{Fingerprint, FingerprintStore, MemoryFingerprintStore};
pub use crate::graph::DependencyGraph;
pub use crate::imports::{Imports, NoImports, ScopeImports};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::product::{Dynamic, ProductId, Scope};
pub use crate::promise::{DEFAULT_WARN_AFTER, MIN_WARN_AFTER, ProductPromise};
pub use crate::registry::{TaskBuilder, TaskRegistry};
pub use crate::repository::ProductRepository;
pub use crate::task::{
    ConfiguredTask, Runnable, SkipHint, TaskFactory, TaskKey, TaskResult, TaskStatus, TaskType,
};
pub use crate::views::{ProvidedProducts, UsedProducts};
