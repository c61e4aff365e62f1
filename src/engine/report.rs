use std::fmt::{self, Display};
use std::time::{Duration, Instant};

use console::style;

use crate::task::{TaskKey, TaskType};

/// Terminal state of one task in a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Ok,
    /// Ran, had nothing to do.
    Empty,
    /// Not run because its previous product is still valid.
    Skipped,
    /// The rendered error chain.
    Failed(String),
    /// Never started, an input it needed can no longer be produced.
    NotRun,
}

impl TaskOutcome {
    /// Whether the task's product is available to downstream tasks.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Ok | TaskOutcome::Empty | TaskOutcome::Skipped)
    }
}

impl Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Ok => f.write_str("ok"),
            TaskOutcome::Empty => f.write_str("empty"),
            TaskOutcome::Skipped => f.write_str("skipped"),
            TaskOutcome::Failed(msg) => write!(f, "failed: {msg}"),
            TaskOutcome::NotRun => f.write_str("not run"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub key: TaskKey,
    pub kind: TaskType,
    pub outcome: TaskOutcome,
    pub start: Instant,
    pub duration: Duration,
}

/// Everything the engine knows about a finished build, tasks in plan order.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub tasks: Vec<TaskReport>,
    pub duration: Duration,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|task| task.outcome.is_success())
    }

    pub fn get(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|task| task.key.name() == name)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks
            .iter()
            .filter(|task| matches!(task.outcome, TaskOutcome::Failed(_)))
    }

    pub fn not_run(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks
            .iter()
            .filter(|task| task.outcome == TaskOutcome::NotRun)
    }

    /// Tasks whose body actually ran to a successful end.
    pub fn executed(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks
            .iter()
            .filter(|task| matches!(task.outcome, TaskOutcome::Ok | TaskOutcome::Empty))
    }
}

impl Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for task in &self.tasks {
            let status = match &task.outcome {
                TaskOutcome::Ok => style("ok").green(),
                TaskOutcome::Empty => style("empty").dim(),
                TaskOutcome::Skipped => style("skipped").blue(),
                TaskOutcome::Failed(_) => style("failed").red(),
                TaskOutcome::NotRun => style("not run").yellow(),
            };

            write!(f, "{status:>8} {} ", task.key)?;
            if task.kind != TaskType::Standard {
                write!(f, "[{}] ", task.kind)?;
            }
            writeln!(f, "{:.2?}", task.duration)?;

            if let TaskOutcome::Failed(msg) = &task.outcome {
                writeln!(f, "         {}", style(msg).red())?;
            }
        }

        let failed = self.failed().count();
        let not_run = self.not_run().count();
        let verdict = if failed + not_run == 0 {
            style("BUILD SUCCESSFUL").green().bold()
        } else {
            style("BUILD FAILED").red().bold()
        };

        write!(
            f,
            "{verdict} in {:.2?}: {} tasks, {failed} failed, {not_run} not run",
            self.duration,
            self.tasks.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::Scope;

    fn report(name: &str, outcome: TaskOutcome) -> TaskReport {
        TaskReport {
            key: TaskKey::new(Scope::default(), name),
            kind: TaskType::Standard,
            outcome,
            start: Instant::now(),
            duration: Duration::from_millis(3),
        }
    }

    #[test]
    fn test_queries() {
        let build = BuildReport {
            tasks: vec![
                report("compile", TaskOutcome::Ok),
                report("lint", TaskOutcome::Skipped),
                report("test", TaskOutcome::Failed("2 tests failed".into())),
                report("jar", TaskOutcome::NotRun),
            ],
            duration: Duration::from_millis(12),
        };

        assert!(!build.is_success());
        assert_eq!(build.failed().count(), 1);
        assert_eq!(build.not_run().next().unwrap().key.name(), "jar");
        assert_eq!(build.executed().count(), 1);
        assert_eq!(build.get("lint").unwrap().outcome, TaskOutcome::Skipped);
        assert!(build.get("missing").is_none());
    }

    #[test]
    fn test_summary() {
        let build = BuildReport {
            tasks: vec![report("compile", TaskOutcome::Ok)],
            duration: Duration::from_millis(5),
        };

        let text = console::strip_ansi_codes(&build.to_string()).into_owned();
        assert!(text.contains("main:compile"));
        assert!(text.contains("BUILD SUCCESSFUL"));
        assert!(text.contains("1 tasks, 0 failed, 0 not run"));
    }
}
