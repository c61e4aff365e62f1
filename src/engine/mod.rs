//! Runs a resolved plan on a [`WorkerPool`].
//!
//! Every task of the plan is submitted up front, in plan order. A task that
//! needs a product blocks its worker inside [`UsedProducts::read_product`]
//! until the producer completes it, so the product promises, not the
//! scheduler, gate execution. Jobs start in submission order and the plan
//! lists producers before consumers, so the oldest unfinished job always has
//! its inputs ready and even a single worker makes progress.

mod isolation;
mod pool;
mod report;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::time::Instant;

use indicatif::ProgressStyle;
use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use isolation::panic_message;
pub use isolation::{InProcess, Isolation};
pub use pool::WorkerPool;
pub use report::{BuildReport, TaskOutcome, TaskReport};

use crate::config::EngineConfig;
use crate::error::{BuildError, ProductError};
use crate::fingerprint::{Fingerprint, FingerprintStore};
use crate::imports::{Imports, NoImports};
use crate::registry::TaskRegistry;
use crate::repository::ProductRepository;
use crate::task::{ConfiguredTask, TaskStatus};
use crate::views::{ProvidedProducts, UsedProducts};

/// The tasks needed for a request, in execution order, and the promises of
/// every product they provide.
#[derive(Debug)]
pub struct Plan<'r> {
    tasks: Vec<&'r ConfiguredTask>,
    repository: Arc<ProductRepository>,
}

impl<'r> Plan<'r> {
    pub fn tasks(&self) -> &[&'r ConfiguredTask] {
        &self.tasks
    }

    /// Products of this plan, e.g. for other scopes to import from.
    pub fn repository(&self) -> &Arc<ProductRepository> {
        &self.repository
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

pub struct Engine {
    pool: WorkerPool,
    config: EngineConfig,
    imports: Arc<dyn Imports>,
    isolation: Arc<dyn Isolation>,
    fingerprints: Option<Arc<dyn FingerprintStore>>,
}

impl Engine {
    pub fn new(pool: WorkerPool, config: EngineConfig) -> Self {
        Self {
            pool,
            config,
            imports: Arc::new(NoImports),
            isolation: Arc::new(InProcess),
            fingerprints: None,
        }
    }

    /// Engine with a fresh pool sized by `config`.
    pub fn from_config(config: EngineConfig) -> Result<Self, BuildError> {
        let pool = WorkerPool::new(config.worker_count())?;
        Ok(Self::new(pool, config))
    }

    pub fn with_imports(mut self, imports: Arc<dyn Imports>) -> Self {
        self.imports = imports;
        self
    }

    pub fn with_isolation(mut self, isolation: Arc<dyn Isolation>) -> Self {
        self.isolation = isolation;
        self
    }

    /// Enables skip hints: tasks whose fingerprint matches the recorded one
    /// are not run again.
    pub fn with_fingerprints(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.fingerprints = Some(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Resolves `requested` against `registry` and allocates the promises of
    /// the resulting plan. Configuration errors surface here, before any task
    /// runs.
    pub fn plan<'r, S: AsRef<str>>(
        &self,
        registry: &'r TaskRegistry,
        requested: &[S],
    ) -> Result<Plan<'r>, BuildError> {
        let tasks = registry.resolve(requested)?;

        let mut repository = ProductRepository::with_warn_after(self.config.promise_warn_after);
        for task in &tasks {
            if let Some(product) = task.provides() {
                repository.create_product(registry.scope(), product.clone(), task.key().clone())?;
            }
        }

        Ok(Plan {
            tasks,
            repository: Arc::new(repository),
        })
    }

    /// Plans and runs `requested`. Task failures are part of the returned
    /// report, only configuration errors fail the call.
    pub fn run<S: AsRef<str>>(
        &self,
        registry: &TaskRegistry,
        requested: &[S],
    ) -> Result<BuildReport, BuildError> {
        let plan = self.plan(registry, requested)?;
        Ok(self.run_plan(&plan))
    }

    /// Like [`Engine::run`], but any failed or skipped-over task fails the
    /// build.
    pub fn execute<S: AsRef<str>>(
        &self,
        registry: &TaskRegistry,
        requested: &[S],
    ) -> Result<BuildReport, BuildError> {
        let report = self.run(registry, requested)?;

        if report.is_success() {
            return Ok(report);
        }

        Err(BuildError::Failed {
            failed: report.failed().map(|task| task.key.clone()).collect(),
            not_run: report.not_run().map(|task| task.key.clone()).collect(),
        })
    }

    pub fn run_plan(&self, plan: &Plan<'_>) -> BuildReport {
        let started = Instant::now();
        let total = plan.tasks.len();
        let halted = AtomicBool::new(false);

        let root_span = tracing::span!(Level::INFO, "build", tasks = total);
        if self.config.progress {
            root_span.pb_set_length(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            {
                root_span.pb_set_style(&style.progress_chars("=>-"));
            }
            root_span.pb_set_message("Running tasks...");
        }
        let _enter = root_span.enter();

        tracing::info!(tasks = total, workers = self.pool.workers(), "starting build");

        let mut slots: Vec<Option<TaskReport>> = vec![None; total];

        self.pool.inner().in_place_scope_fifo(|s| {
            let (sender, receiver) = channel::<(usize, TaskReport)>();

            for (index, &task) in plan.tasks.iter().enumerate() {
                let sender = sender.clone();
                let repository = plan.repository.clone();
                let halted = &halted;
                let parent = root_span.clone();

                s.spawn_fifo(move |_| {
                    let report = self.run_task(task, repository, halted, &parent);
                    // the receiver outlives every job
                    let _ = sender.send((index, report));
                });
            }

            drop(sender);

            // Sits here while the workers run the tasks.
            for (index, report) in receiver {
                if self.config.progress {
                    root_span.pb_inc(1);
                }
                slots[index] = Some(report);
            }
        });

        let tasks: Vec<TaskReport> = slots
            .into_iter()
            .zip(&plan.tasks)
            .map(|(slot, task)| {
                slot.unwrap_or_else(|| TaskReport {
                    key: task.key().clone(),
                    kind: task.kind(),
                    outcome: TaskOutcome::NotRun,
                    start: started,
                    duration: Default::default(),
                })
            })
            .collect();

        let report = BuildReport {
            tasks,
            duration: started.elapsed(),
        };

        tracing::info!(
            elapsed = ?report.duration,
            failed = report.failed().count(),
            not_run = report.not_run().count(),
            "build finished"
        );

        report
    }

    fn run_task(
        &self,
        task: &ConfiguredTask,
        repository: Arc<ProductRepository>,
        halted: &AtomicBool,
        parent: &Span,
    ) -> TaskReport {
        let span = tracing::span!(parent: parent, Level::INFO, "task", name = %task.key());
        let _enter = span.enter();

        let provided = ProvidedProducts::for_task(task, repository.clone());
        let used = UsedProducts::for_task(task, repository, self.imports.clone());
        let _release = Release(&provided);

        let start = Instant::now();
        // skip hints and the fingerprint store run outside the isolation
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.outcome(task, &provided, &used, halted)
        }))
        .unwrap_or_else(|panic| TaskOutcome::Failed(panic_message(panic.as_ref())));
        let duration = start.elapsed();

        match &outcome {
            TaskOutcome::Failed(msg) => {
                if self.config.fail_fast {
                    halted.store(true, Ordering::Release);
                }
                tracing::error!(elapsed = ?duration, "task failed: {msg}");
            }
            TaskOutcome::NotRun => {
                tracing::info!("task not run");
            }
            outcome => tracing::debug!(elapsed = ?duration, %outcome, "task finished"),
        }

        TaskReport {
            key: task.key().clone(),
            kind: task.kind(),
            outcome,
            start,
            duration,
        }
    }

    fn outcome(
        &self,
        task: &ConfiguredTask,
        provided: &ProvidedProducts,
        used: &UsedProducts,
        halted: &AtomicBool,
    ) -> TaskOutcome {
        if halted.load(Ordering::Acquire) {
            return TaskOutcome::NotRun;
        }

        let unavailable = used.unavailable();
        if !unavailable.is_empty() {
            let inputs: Vec<&str> = unavailable.iter().map(|id| id.as_str()).collect();
            tracing::debug!(?inputs, "inputs will never be completed");
            return TaskOutcome::NotRun;
        }

        let fingerprint = self
            .fingerprints
            .as_ref()
            .and_then(|_| Fingerprint::of_hints(task.skip_hints()));
        if let Some(fingerprint) = fingerprint
            && self.reuse(task, provided, fingerprint)
        {
            return TaskOutcome::Skipped;
        }

        let status = match self.isolation.execute(task, provided, used) {
            Ok(TaskStatus::Failed) => {
                return self.failure(anyhow::anyhow!("Task reported failure"));
            }
            Ok(status) => status,
            Err(err) => return self.failure(err),
        };

        if let Some(product) = task.provides().filter(|_| !provided.is_complete()) {
            let violation = ProductError::NotCompleted {
                task: task.key().clone(),
                product: product.clone(),
            };
            tracing::error!(error = %violation, "product contract violated");
            return TaskOutcome::Failed(violation.to_string());
        }

        if let (Some(fingerprint), Some(store)) = (fingerprint, &self.fingerprints) {
            store.store(task.key(), fingerprint, provided.value());
        }

        match status {
            TaskStatus::Empty => TaskOutcome::Empty,
            TaskStatus::Skipped => TaskOutcome::Skipped,
            _ => TaskOutcome::Ok,
        }
    }

    fn failure(&self, err: anyhow::Error) -> TaskOutcome {
        // released by an upstream failure rather than failing on its own
        let released = err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<ProductError>(),
                Some(ProductError::Unavailable(_))
            )
        });
        if released {
            return TaskOutcome::NotRun;
        }

        if let Some(violation) = err.downcast_ref::<ProductError>()
            && !matches!(
                violation,
                ProductError::Unavailable(_) | ProductError::Import { .. }
            )
        {
            tracing::error!(error = %violation, "product contract violated");
        }

        TaskOutcome::Failed(format!("{err:#}"))
    }

    /// Re-emits the recorded product when the fingerprint is unchanged.
    fn reuse(&self, task: &ConfiguredTask, provided: &ProvidedProducts, fingerprint: Fingerprint) -> bool {
        let Some(store) = &self.fingerprints else {
            return false;
        };

        let Some((recorded, product)) = store.load(task.key()) else {
            return false;
        };

        if recorded != fingerprint {
            tracing::debug!(%recorded, current = %fingerprint, "fingerprint changed");
            return false;
        }

        match (task.provides(), product) {
            (None, _) => true,
            (Some(id), Some(value)) => match provided.complete_dynamic(id.as_str(), value) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(error = %err, "cannot re-emit recorded product");
                    false
                }
            },
            (Some(_), None) => false,
        }
    }
}

/// Abandons the task's product unless it was completed, also when the job
/// unwinds, so consumers are never left waiting on a dead producer.
struct Release<'a>(&'a ProvidedProducts);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.abandon();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
