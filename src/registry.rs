//! The task registry of one build scope.
//!
//! Plugins register their tasks here during configuration. Once every plugin
//! is configured, [`TaskRegistry::resolve`] turns a set of requested products
//! (or goal names) into the ordered list of tasks that satisfies them.
//!
//! ## Wiring
//!
//! Tasks never reference each other directly. A task consuming product `p`
//! depends on whichever task provides `p`, so the task graph is derived from
//! product names alone:
//!
//! ```text
//! compile  (provides "classes")
//!    ^
//!    |  "classes"
//! test     (provides "testReport", uses "classes")
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Display};
use std::sync::Arc;

use crate::error::ConfigError;
use crate::graph::DependencyGraph;
use crate::product::{ProductId, Scope, product_ids};
use crate::task::{
    ConfiguredTask, Runnable, SkipHint, TaskFactory, TaskKey, TaskResult, TaskStatus, TaskType,
};
use crate::views::{ProvidedProducts, UsedProducts};

pub struct TaskRegistry {
    scope: Scope,
    tasks: Vec<ConfiguredTask>,
    by_name: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            tasks: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Starts the declaration of a task contributed by `plugin`.
    pub fn task(&mut self, plugin: impl Into<String>, name: impl Into<String>) -> TaskBuilder<'_> {
        TaskBuilder {
            registry: self,
            plugin: plugin.into(),
            name: name.into(),
            provides: None,
            uses: Vec::new(),
            uses_optionally: Vec::new(),
            imports: Vec::new(),
            imports_all: Vec::new(),
            intermediate: false,
            skip_hints: Vec::new(),
            description: None,
            factory: None,
        }
    }

    /// Declares goal `goal` as depending on `uses`.
    ///
    /// When another plugin already declared the same goal, the products are
    /// merged into the existing goal instead, so plugins can extend a shared
    /// goal such as `check` without knowing about each other.
    pub fn register_goal<I, S>(
        &mut self,
        plugin: impl Into<String>,
        goal: impl Into<String>,
        uses: I,
    ) -> Result<&ConfiguredTask, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let plugin = plugin.into();
        let goal = goal.into();
        let uses = product_ids(uses)?;

        if goal.is_empty() {
            return Err(ConfigError::MissingField {
                task: goal,
                field: "name",
            });
        }

        if let Some(&index) = self.by_name.get(&goal) {
            let task = &mut self.tasks[index];
            if !task.is_goal() {
                return Err(ConfigError::DuplicateTask(task.key.clone()));
            }

            tracing::debug!(goal = %task.key, %plugin, "merging goal");
            task.uses.extend(uses);
            task.plugins.insert(plugin);
            return Ok(&self.tasks[index]);
        }

        let task = ConfiguredTask {
            key: TaskKey::new(self.scope.clone(), &goal),
            plugins: BTreeSet::from([plugin]),
            factory: goal_factory(),
            provides: None,
            uses: uses.into_iter().collect(),
            uses_optionally: BTreeSet::new(),
            imports: BTreeSet::new(),
            imports_all: BTreeSet::new(),
            skip_hints: Vec::new(),
            description: Some(format!("Goal {goal}")),
            kind: TaskType::Goal,
        };

        self.insert(task)
    }

    fn insert(&mut self, task: ConfiguredTask) -> Result<&ConfiguredTask, ConfigError> {
        if self.by_name.contains_key(task.name()) {
            return Err(ConfigError::DuplicateTask(task.key));
        }

        if let Some(product) = task.provides() {
            if let Some(first) = self.tasks.iter().find(|t| t.provides() == Some(product)) {
                return Err(ConfigError::DuplicateProduct {
                    product: product.clone(),
                    first: first.key.clone(),
                    second: task.key.clone(),
                });
            }
        }

        let index = self.tasks.len();
        self.by_name.insert(task.name().to_string(), index);
        self.tasks.push(task);
        Ok(&self.tasks[index])
    }

    pub fn get(&self, name: &str) -> Option<&ConfiguredTask> {
        self.by_name.get(name).map(|&index| &self.tasks[index])
    }

    /// All tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &ConfiguredTask> {
        self.tasks.iter()
    }

    /// Tasks shown to users, intermediate wiring excluded.
    pub fn listing(&self) -> impl Iterator<Item = &ConfiguredTask> {
        self.tasks
            .iter()
            .filter(|task| task.kind() != TaskType::Intermediate)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Maps each product to the task providing it, rejecting products
    /// provided twice.
    pub fn producers(&self) -> Result<HashMap<&ProductId, &ConfiguredTask>, ConfigError> {
        let mut producers: HashMap<&ProductId, &ConfiguredTask> = HashMap::new();

        for task in &self.tasks {
            let Some(product) = task.provides() else {
                continue;
            };

            if let Some(first) = producers.insert(product, task) {
                return Err(ConfigError::DuplicateProduct {
                    product: product.clone(),
                    first: first.key.clone(),
                    second: task.key.clone(),
                });
            }
        }

        Ok(producers)
    }

    /// Checks the whole registry: products are provided once, every
    /// mandatory input has a producer, and the product graph is acyclic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.graph().map(|_| ())
    }

    /// Builds the task graph, one edge from each consumer to the producer of
    /// every product it uses.
    pub fn graph(&self) -> Result<DependencyGraph<TaskKey>, ConfigError> {
        let producers = self.producers()?;
        let mut unmet = Vec::new();

        for task in &self.tasks {
            for product in task.uses() {
                if !producers.contains_key(product) {
                    tracing::error!(task = %task.key, %product, "no task provides used product");
                    unmet.push((task, product));
                }
            }
        }

        if let Some((task, product)) = unmet.into_iter().next() {
            return Err(ConfigError::UnknownProduct {
                task: task.key.clone(),
                product: product.clone(),
            });
        }

        let mut graph = DependencyGraph::new();
        for task in &self.tasks {
            graph.add_node(task.key.clone())?;
        }

        for task in &self.tasks {
            // optional inputs only wire up when someone provides them
            for product in task.consumed() {
                if let Some(producer) = producers.get(product) {
                    graph.add_edge(&task.key, &producer.key)?;
                }
            }
        }

        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Resolves the execution plan for `requested`, which may name products
    /// or goals. The plan lists every needed task exactly once, each after
    /// the producers of its inputs.
    pub fn resolve<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<&ConfiguredTask>, ConfigError> {
        let graph = self.graph()?;
        let producers = self.producers()?;

        let targets = requested
            .iter()
            .map(|name| {
                let name = name.as_ref();
                ProductId::new(name)
                    .ok()
                    .and_then(|id| producers.get(&id).copied())
                    .or_else(|| self.get(name).filter(|task| task.is_goal()))
                    .map(|task| task.key.clone())
                    .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let plan = graph
            .resolve(&targets)?
            .into_iter()
            .filter_map(|key| self.get(key.name()))
            .collect::<Vec<_>>();

        tracing::debug!(
            requested = requested.len(),
            tasks = plan.len(),
            "resolved execution plan"
        );

        Ok(plan)
    }
}

impl Display for TaskRegistry {
    /// Renders the product graph as a Mermaid diagram, edges labelled with
    /// the product flowing from producer to consumer.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for (index, task) in self.tasks.iter().enumerate() {
            let name = task.key.to_string().replace('"', "\\\"");
            writeln!(f, "    {index}[\"{name}\"]")?;
        }

        let producers: HashMap<&ProductId, usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter_map(|(index, task)| task.provides().map(|product| (product, index)))
            .collect();

        for (index, task) in self.tasks.iter().enumerate() {
            for product in task.consumed() {
                if let Some(source) = producers.get(product) {
                    writeln!(f, "    {source} -- \"{product}\" --> {index}")?;
                }
            }
        }

        Ok(())
    }
}

fn goal_factory() -> TaskFactory {
    Arc::new(|| -> Box<dyn Runnable> {
        Box::new(|_: &ProvidedProducts, used: &UsedProducts| {
            used.wait_all()?;
            Ok(TaskStatus::Ok)
        })
    })
}

/// Declaration of a single task, finished with [`TaskBuilder::register`].
pub struct TaskBuilder<'a> {
    registry: &'a mut TaskRegistry,
    plugin: String,
    name: String,
    provides: Option<String>,
    uses: Vec<String>,
    uses_optionally: Vec<String>,
    imports: Vec<String>,
    imports_all: Vec<String>,
    intermediate: bool,
    skip_hints: Vec<SkipHint>,
    description: Option<String>,
    factory: Option<TaskFactory>,
}

fn strings<I, S>(items: I) -> impl Iterator<Item = String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().map(|s| s.as_ref().to_string())
}

impl<'a> TaskBuilder<'a> {
    pub fn provides(mut self, product: impl Into<String>) -> Self {
        self.provides = Some(product.into());
        self
    }

    pub fn uses<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.uses.extend(strings(products));
        self
    }

    pub fn uses_optionally<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.uses_optionally.extend(strings(products));
        self
    }

    /// Products read from the scopes this scope depends on directly.
    pub fn imports<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.imports.extend(strings(products));
        self
    }

    /// Products read from every scope this scope depends on.
    pub fn imports_all<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.imports_all.extend(strings(products));
        self
    }

    /// Hides the task from user-facing listings.
    pub fn intermediate(mut self) -> Self {
        self.intermediate = true;
        self
    }

    pub fn skip_hint<F>(mut self, hint: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.skip_hints.push(Arc::new(hint));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the factory producing a fresh body for every run.
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Runnable> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Shorthand for a stateless body shared by every run.
    pub fn run<F>(self, body: F) -> Self
    where
        F: Fn(&ProvidedProducts, &UsedProducts) -> TaskResult<TaskStatus> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        self.factory(move || -> Box<dyn Runnable> {
            let body = body.clone();
            Box::new(move |provided: &ProvidedProducts, used: &UsedProducts| body(provided, used))
        })
    }

    pub fn register(self) -> Result<&'a ConfiguredTask, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField {
                task: self.name,
                field: "name",
            });
        }

        let Some(provides) = self.provides else {
            return Err(ConfigError::MissingField {
                task: self.name,
                field: "provides",
            });
        };

        let Some(factory) = self.factory else {
            return Err(ConfigError::MissingField {
                task: self.name,
                field: "factory",
            });
        };

        let task = ConfiguredTask {
            key: TaskKey::new(self.registry.scope.clone(), &self.name),
            plugins: BTreeSet::from([self.plugin]),
            factory,
            provides: Some(ProductId::new(provides)?),
            uses: product_ids(self.uses)?.into_iter().collect(),
            uses_optionally: product_ids(self.uses_optionally)?.into_iter().collect(),
            imports: product_ids(self.imports)?.into_iter().collect(),
            imports_all: product_ids(self.imports_all)?.into_iter().collect(),
            skip_hints: self.skip_hints,
            description: self.description,
            kind: if self.intermediate {
                TaskType::Intermediate
            } else {
                TaskType::Standard
            },
        };

        self.registry.insert(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &ProvidedProducts, _: &UsedProducts) -> TaskResult<TaskStatus> {
        Ok(TaskStatus::Ok)
    }

    fn add(registry: &mut TaskRegistry, name: &str, provides: &str, uses: &[&str]) {
        registry
            .task("java", name)
            .provides(provides)
            .uses(uses)
            .run(noop)
            .register()
            .unwrap();
    }

    fn names(plan: &[&ConfiguredTask]) -> Vec<String> {
        plan.iter().map(|task| task.name().to_string()).collect()
    }

    fn position(plan: &[&ConfiguredTask], name: &str) -> usize {
        plan.iter().position(|task| task.name() == name).unwrap()
    }

    #[test]
    fn test_register_requires_fields() {
        let mut registry = TaskRegistry::new(Scope::default());

        let err = registry.task("java", "compile").run(noop).register().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "provides", .. }));

        let err = registry.task("java", "compile").provides("classes").register().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "factory", .. }));

        let err = registry
            .task("java", "compile")
            .provides("Classes")
            .run(noop)
            .register()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProductId(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_task_name() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "compile", "classes", &[]);

        let err = registry
            .task("kotlin", "compile")
            .provides("kotlinClasses")
            .run(noop)
            .register()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTask(_)));
    }

    #[test]
    fn test_duplicate_product() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "compile", "classes", &[]);

        let err = registry
            .task("kotlin", "compileKotlin")
            .provides("classes")
            .run(noop)
            .register()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProduct { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unmet_product() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "test", "testReport", &["classes"]);

        assert!(matches!(
            registry.validate(),
            Err(ConfigError::UnknownProduct { .. })
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "a", "alpha", &["beta"]);
        add(&mut registry, "b", "beta", &["alpha"]);

        assert!(matches!(registry.validate(), Err(ConfigError::Cycle(_))));
        assert!(matches!(registry.resolve(&["alpha"]), Err(ConfigError::Cycle(_))));
    }

    #[test]
    fn test_goal_merge() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "checkstyle", "a", &[]);
        add(&mut registry, "spotbugs", "b", &[]);

        registry.register_goal("checkstyle", "check", ["a"]).unwrap();
        registry.register_goal("spotbugs", "check", ["b"]).unwrap();

        let goals: Vec<_> = registry.tasks().filter(|t| t.name() == "check").collect();
        assert_eq!(goals.len(), 1);

        let check = goals[0];
        assert_eq!(check.kind(), TaskType::Goal);
        assert_eq!(
            check.uses().iter().map(ProductId::as_str).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(check.plugins().collect::<Vec<_>>(), vec!["checkstyle", "spotbugs"]);
        assert!(check.provides().is_none());
    }

    #[test]
    fn test_goal_cannot_take_task_name() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "compile", "classes", &[]);

        assert!(matches!(
            registry.register_goal("java", "compile", ["classes"]),
            Err(ConfigError::DuplicateTask(_))
        ));
    }

    #[test]
    fn test_resolve_scenario() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "t1", "a", &[]);
        add(&mut registry, "t2", "b", &["a"]);
        add(&mut registry, "t3", "c", &["a"]);

        let plan = registry.resolve(&["b", "c"]).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(position(&plan, "t1") < position(&plan, "t2"));
        assert!(position(&plan, "t1") < position(&plan, "t3"));
    }

    #[test]
    fn test_resolve_only_needed() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "compile", "classes", &[]);
        add(&mut registry, "javadoc", "docs", &["classes"]);
        add(&mut registry, "test", "testReport", &["classes"]);

        assert_eq!(names(&registry.resolve(&["testReport"]).unwrap()), vec!["compile", "test"]);
    }

    #[test]
    fn test_resolve_goal_and_unknown() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "compile", "classes", &[]);
        add(&mut registry, "test", "testReport", &["classes"]);
        registry.register_goal("java", "build", ["testReport"]).unwrap();

        assert_eq!(
            names(&registry.resolve(&["build"]).unwrap()),
            vec!["compile", "test", "build"]
        );
        assert!(matches!(
            registry.resolve(&["nothing"]),
            Err(ConfigError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_optional_inputs() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "compile", "classes", &[]);
        registry
            .task("java", "jar")
            .provides("jar")
            .uses(["classes"])
            .uses_optionally(["resources", "manifest"])
            .run(noop)
            .register()
            .unwrap();
        // a missing optional producer is fine
        assert!(registry.validate().is_ok());

        add(&mut registry, "processResources", "resources", &[]);
        assert_eq!(
            names(&registry.resolve(&["jar"]).unwrap()),
            vec!["compile", "processResources", "jar"]
        );
    }

    #[test]
    fn test_listing_hides_intermediate() {
        let mut registry = TaskRegistry::new(Scope::default());
        add(&mut registry, "compile", "classes", &[]);
        registry
            .task("java", "prepareClasspath")
            .provides("classpath")
            .intermediate()
            .description("Assembles the compile classpath")
            .run(noop)
            .register()
            .unwrap();

        assert_eq!(registry.tasks().count(), 2);
        let listed: Vec<_> = registry.listing().map(|t| t.name()).collect();
        assert_eq!(listed, vec!["compile"]);
    }

    #[test]
    fn test_mermaid() {
        let mut registry = TaskRegistry::new(Scope::new("core"));
        add(&mut registry, "compile", "classes", &[]);
        add(&mut registry, "test", "testReport", &["classes"]);

        let mermaid = registry.to_string();
        assert!(mermaid.starts_with("graph LR"));
        assert!(mermaid.contains("0[\"core:compile\"]"));
        assert!(mermaid.contains("0 -- \"classes\" --> 1"));
    }
}
