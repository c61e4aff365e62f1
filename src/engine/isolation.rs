use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::task::{ConfiguredTask, TaskResult, TaskStatus};
use crate::views::{ProvidedProducts, UsedProducts};

/// How a task body is executed relative to the engine.
///
/// The engine only needs a status back; where the body actually runs (this
/// process, a child process, a loaded library) is up to the implementation.
pub trait Isolation: Send + Sync {
    fn execute(
        &self,
        task: &ConfiguredTask,
        provided: &ProvidedProducts,
        used: &UsedProducts,
    ) -> TaskResult<TaskStatus>;
}

/// Runs bodies on the worker thread itself, turning panics into failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcess;

impl Isolation for InProcess {
    fn execute(
        &self,
        task: &ConfiguredTask,
        provided: &ProvidedProducts,
        used: &UsedProducts,
    ) -> TaskResult<TaskStatus> {
        // The body only sees its own views, a panic cannot leave shared
        // state half-written beyond an uncompleted promise.
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut body = task.create();
            body.run(provided, used)
        }));

        result.unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(panic.as_ref()))))
    }
}

/// Renders a panic payload caught by `catch_unwind`.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    }
}
