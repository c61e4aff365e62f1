//! Capability-scoped views over the [`ProductRepository`].
//!
//! A task body never sees the repository itself. It gets a write-only
//! [`ProvidedProducts`] limited to what it declared it produces, and a
//! read-only [`UsedProducts`] limited to what it declared it consumes. Both
//! sets are fixed, and validated, when the view is built.

use std::any::{Any, type_name};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{ConfigError, ProductError};
use crate::imports::{Imports, NoImports};
use crate::product::{Dynamic, ProductId, product_ids};
use crate::repository::ProductRepository;
use crate::task::{ConfiguredTask, TaskKey};

fn downcast<T>(product: &ProductId, value: Dynamic) -> Result<Arc<T>, ProductError>
where
    T: Any + Send + Sync,
{
    value.downcast::<T>().map_err(|_| ProductError::WrongShape {
        product: product.clone(),
        expected: type_name::<T>(),
    })
}

/// Write-only view: completes the products a task declared it provides.
#[derive(Debug)]
pub struct ProvidedProducts {
    task: TaskKey,
    provides: BTreeSet<ProductId>,
    repository: Arc<ProductRepository>,
}

impl ProvidedProducts {
    pub fn new<I, S>(
        task: TaskKey,
        provides: I,
        repository: Arc<ProductRepository>,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            task,
            provides: product_ids(provides)?.into_iter().collect(),
            repository,
        })
    }

    pub fn for_task(task: &ConfiguredTask, repository: Arc<ProductRepository>) -> Self {
        Self {
            task: task.key().clone(),
            provides: task.provides().cloned().into_iter().collect(),
            repository,
        }
    }

    pub fn task(&self) -> &TaskKey {
        &self.task
    }

    /// Completes `product` with `value`, waking every task waiting on it.
    pub fn complete<T>(&self, product: &str, value: T) -> Result<(), ProductError>
    where
        T: Any + Send + Sync,
    {
        self.complete_dynamic(product, Arc::new(value))
    }

    pub fn complete_dynamic(&self, product: &str, value: Dynamic) -> Result<(), ProductError> {
        let Some(id) = self.provides.get(product) else {
            return Err(ProductError::NotDeclared {
                task: self.task.clone(),
                product: product.to_string(),
            });
        };

        self.repository.lookup(id)?.complete(value)
    }

    /// Whether every declared product has been completed.
    pub(crate) fn is_complete(&self) -> bool {
        self.provides.iter().all(|id| {
            self.repository
                .lookup(id)
                .is_ok_and(|promise| promise.is_completed())
        })
    }

    /// The completed value of the declared product, if there is one.
    pub(crate) fn value(&self) -> Option<Dynamic> {
        self.provides
            .iter()
            .find_map(|id| self.repository.lookup(id).ok()?.try_get())
    }

    /// Releases readers of products this task will not complete.
    pub(crate) fn abandon(&self) {
        for id in &self.provides {
            if let Ok(promise) = self.repository.lookup(id) {
                promise.abandon();
            }
        }
    }
}

/// Read-only view: blocks on the products a task declared it consumes.
pub struct UsedProducts {
    task: TaskKey,
    uses: BTreeSet<ProductId>,
    uses_optionally: BTreeSet<ProductId>,
    imports: BTreeSet<ProductId>,
    imports_all: BTreeSet<ProductId>,
    repository: Arc<ProductRepository>,
    importer: Arc<dyn Imports>,
}

impl UsedProducts {
    pub fn new<I, S>(
        task: TaskKey,
        uses: I,
        repository: Arc<ProductRepository>,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            task,
            uses: product_ids(uses)?.into_iter().collect(),
            uses_optionally: BTreeSet::new(),
            imports: BTreeSet::new(),
            imports_all: BTreeSet::new(),
            repository,
            importer: Arc::new(NoImports),
        })
    }

    pub fn for_task(
        task: &ConfiguredTask,
        repository: Arc<ProductRepository>,
        importer: Arc<dyn Imports>,
    ) -> Self {
        Self {
            task: task.key().clone(),
            uses: task.uses().clone(),
            uses_optionally: task.uses_optionally().clone(),
            imports: task.imports().clone(),
            imports_all: task.imports_all().clone(),
            repository,
            importer,
        }
    }

    pub fn task(&self) -> &TaskKey {
        &self.task
    }

    /// Reads a consumed product, blocking until its producer completes it.
    pub fn read_product<T>(&self, product: &str) -> Result<Arc<T>, ProductError>
    where
        T: Any + Send + Sync,
    {
        let id = self.declared(product)?;
        let value = self.repository.lookup(id)?.get()?;
        downcast(id, value)
    }

    /// Reads an optionally consumed product. `None` when no task provides it
    /// in this build or its producer failed.
    pub fn read_optional<T>(&self, product: &str) -> Result<Option<Arc<T>>, ProductError>
    where
        T: Any + Send + Sync,
    {
        let id = self.declared(product)?;
        let optional = self.uses_optionally.contains(id);

        let promise = match self.repository.lookup(id) {
            Ok(promise) => promise,
            Err(ProductError::NotRegistered(_)) if optional => return Ok(None),
            Err(err) => return Err(err),
        };

        match promise.get() {
            Ok(value) => downcast(id, value).map(Some),
            Err(ProductError::Unavailable(_)) if optional => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Product `product` from every scope this task's scope depends on
    /// directly.
    pub fn read_import<T>(&self, product: &str) -> Result<Vec<Arc<T>>, ProductError>
    where
        T: Any + Send + Sync,
    {
        let id = self.declared_in(&self.imports, product)?;
        self.importer
            .import(self.task.scope(), id)?
            .into_iter()
            .map(|value| downcast(id, value))
            .collect()
    }

    /// Product `product` from every scope this task's scope depends on,
    /// directly or transitively.
    pub fn read_import_all<T>(&self, product: &str) -> Result<Vec<Arc<T>>, ProductError>
    where
        T: Any + Send + Sync,
    {
        let id = self.declared_in(&self.imports_all, product)?;
        self.importer
            .import_all(self.task.scope(), id)?
            .into_iter()
            .map(|value| downcast(id, value))
            .collect()
    }

    /// Blocks until every consumed product is available. Optional products
    /// that will never arrive are not an error.
    pub fn wait_all(&self) -> Result<(), ProductError> {
        for id in &self.uses {
            self.repository.lookup(id)?.get()?;
        }

        for id in &self.uses_optionally {
            if let Ok(promise) = self.repository.lookup(id) {
                match promise.get() {
                    Ok(_) | Err(ProductError::Unavailable(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(())
    }

    /// Mandatory inputs whose producer already gave up.
    pub(crate) fn unavailable(&self) -> Vec<&ProductId> {
        self.uses
            .iter()
            .filter(|id| {
                self.repository
                    .lookup(id)
                    .is_ok_and(|promise| promise.is_abandoned())
            })
            .collect()
    }

    fn declared(&self, product: &str) -> Result<&ProductId, ProductError> {
        self.uses
            .get(product)
            .or_else(|| self.uses_optionally.get(product))
            .ok_or_else(|| self.not_declared(product))
    }

    fn declared_in<'a>(
        &self,
        set: &'a BTreeSet<ProductId>,
        product: &str,
    ) -> Result<&'a ProductId, ProductError> {
        set.get(product).ok_or_else(|| self.not_declared(product))
    }

    fn not_declared(&self, product: &str) -> ProductError {
        ProductError::NotDeclared {
            task: self.task.clone(),
            product: product.to_string(),
        }
    }
}

impl std::fmt::Debug for UsedProducts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsedProducts")
            .field("task", &self.task)
            .field("uses", &self.uses)
            .field("uses_optionally", &self.uses_optionally)
            .field("imports", &self.imports)
            .field("imports_all", &self.imports_all)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::product::Scope;
    use crate::registry::TaskRegistry;
    use crate::task::TaskStatus;

    fn key(name: &str) -> TaskKey {
        TaskKey::new(Scope::new("core"), name)
    }

    fn repository(products: &[&str]) -> Arc<ProductRepository> {
        let scope = Scope::new("core");
        let mut repo = ProductRepository::new();
        for product in products {
            repo.create_product(&scope, ProductId::new(product).unwrap(), key(product))
                .unwrap();
        }
        Arc::new(repo)
    }

    #[test]
    fn test_malformed_ids_fail_at_construction() {
        let repo = repository(&[]);
        assert!(matches!(
            ProvidedProducts::new(key("t"), ["Bad"], repo.clone()),
            Err(ConfigError::InvalidProductId(_))
        ));
        assert!(matches!(
            UsedProducts::new(key("t"), ["ok", "not_ok"], repo),
            Err(ConfigError::InvalidProductId(_))
        ));
    }

    #[test]
    fn test_complete_outside_declared_set() {
        let repo = repository(&["a", "b"]);
        let provided = ProvidedProducts::new(key("t"), ["a"], repo.clone()).unwrap();

        let err = provided.complete("b", 1u32).unwrap_err();
        assert!(matches!(err, ProductError::NotDeclared { .. }));
        assert!(!repo.lookup(&ProductId::new("b").unwrap()).unwrap().is_completed());

        provided.complete("a", 1u32).unwrap();
        assert!(provided.is_complete());
        assert!(matches!(
            provided.complete("a", 2u32),
            Err(ProductError::AlreadyCompleted(_))
        ));
    }

    #[test]
    fn test_read_outside_declared_set() {
        let repo = repository(&["x", "y"]);
        let provided = ProvidedProducts::new(key("p"), ["x", "y"], repo.clone()).unwrap();
        provided.complete("x", String::from("ok")).unwrap();

        let used = UsedProducts::new(key("c"), ["y"], repo).unwrap();
        // "x" is registered and completed, but not declared by this task
        assert!(matches!(
            used.read_product::<String>("x"),
            Err(ProductError::NotDeclared { .. })
        ));
    }

    #[test]
    fn test_read_unregistered() {
        let repo = repository(&[]);
        let used = UsedProducts::new(key("c"), ["ghost"], repo).unwrap();
        assert!(matches!(
            used.read_product::<u32>("ghost"),
            Err(ProductError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_read_optional_only_tolerates_optional_ids() {
        let mut registry = TaskRegistry::new(Scope::new("core"));
        registry
            .task("java", "jar")
            .provides("jar")
            .uses(["classes"])
            .uses_optionally(["manifest"])
            .run(|_, _| Ok(TaskStatus::Ok))
            .register()
            .unwrap();

        let jar = registry.get("jar").unwrap();
        let used = UsedProducts::for_task(jar, repository(&[]), Arc::new(NoImports));

        assert!(used.read_optional::<u32>("manifest").unwrap().is_none());
        assert!(matches!(
            used.read_optional::<u32>("classes"),
            Err(ProductError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_read_wrong_shape() {
        let repo = repository(&["a"]);
        ProvidedProducts::new(key("p"), ["a"], repo.clone())
            .unwrap()
            .complete("a", 5u32)
            .unwrap();

        let used = UsedProducts::new(key("c"), ["a"], repo).unwrap();
        assert!(matches!(
            used.read_product::<String>("a"),
            Err(ProductError::WrongShape { .. })
        ));
        assert_eq!(*used.read_product::<u32>("a").unwrap(), 5);
    }

    #[test]
    fn test_read_blocks_for_producer() {
        let repo = repository(&["classes"]);
        let provided = ProvidedProducts::new(key("compile"), ["classes"], repo.clone()).unwrap();
        let used = UsedProducts::new(key("test"), ["classes"], repo).unwrap();

        thread::scope(|s| {
            let reader = s.spawn(|| used.read_product::<Vec<String>>("classes"));
            thread::sleep(Duration::from_millis(10));
            provided
                .complete("classes", vec![String::from("Main.class")])
                .unwrap();
            assert_eq!(reader.join().unwrap().unwrap().len(), 1);
        });
    }

    #[test]
    fn test_imports_require_declaration() {
        let repo = repository(&[]);
        let used = UsedProducts::new(key("c"), ["a"], repo).unwrap();
        assert!(matches!(
            used.read_import::<u32>("a"),
            Err(ProductError::NotDeclared { .. })
        ));
        assert!(matches!(
            used.read_import_all::<u32>("a"),
            Err(ProductError::NotDeclared { .. })
        ));
    }

    #[test]
    fn test_abandon_marks_unavailable() {
        let repo = repository(&["a"]);
        let provided = ProvidedProducts::new(key("p"), ["a"], repo.clone()).unwrap();
        let used = UsedProducts::new(key("c"), ["a"], repo).unwrap();

        assert!(used.unavailable().is_empty());
        provided.abandon();
        assert_eq!(used.unavailable().len(), 1);
        assert!(matches!(
            used.read_product::<u32>("a"),
            Err(ProductError::Unavailable(_))
        ));
    }
}
