//! Cross-scope product lookup.
//!
//! Tasks may import products produced in other build scopes, typically the
//! modules their own module depends on. The engine does not resolve those on
//! its own, it delegates to an [`Imports`] implementation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{GraphError, ProductError};
use crate::graph::DependencyGraph;
use crate::product::{Dynamic, ProductId, Scope};
use crate::repository::ProductRepository;

pub trait Imports: Send + Sync {
    /// Values of `product` from the scopes `scope` depends on directly.
    fn import(&self, scope: &Scope, product: &ProductId) -> Result<Vec<Dynamic>, ProductError>;

    /// Values of `product` from every scope `scope` depends on, transitively.
    fn import_all(&self, scope: &Scope, product: &ProductId)
    -> Result<Vec<Dynamic>, ProductError>;
}

/// Single-scope builds: every import fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImports;

impl Imports for NoImports {
    fn import(&self, scope: &Scope, product: &ProductId) -> Result<Vec<Dynamic>, ProductError> {
        Err(ProductError::Import {
            scope: scope.clone(),
            product: product.clone(),
            reason: "no other scopes are part of this build".into(),
        })
    }

    fn import_all(
        &self,
        scope: &Scope,
        product: &ProductId,
    ) -> Result<Vec<Dynamic>, ProductError> {
        self.import(scope, product)
    }
}

/// Imports backed by the product repositories of other scopes.
///
/// Values are read through the other scope's promises, so an import blocks
/// until that scope's producer has run. Scopes without the product are
/// skipped; results come dependency-first.
#[derive(Default)]
pub struct ScopeImports {
    graph: DependencyGraph<Scope>,
    repositories: HashMap<Scope, Arc<ProductRepository>>,
}

impl ScopeImports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the product repository of `scope`.
    pub fn add_scope(
        &mut self,
        scope: Scope,
        repository: Arc<ProductRepository>,
    ) -> Result<(), GraphError> {
        self.graph.add_node(scope.clone())?;
        self.repositories.insert(scope, repository);
        Ok(())
    }

    /// Declares that `scope` depends on `dependency`. Both must be added.
    pub fn add_dependency(&mut self, scope: &Scope, dependency: &Scope) -> Result<(), GraphError> {
        self.graph.add_edge(scope, dependency)
    }

    fn collect<'a>(
        &self,
        scope: &Scope,
        product: &ProductId,
        scopes: impl IntoIterator<Item = &'a Scope>,
    ) -> Result<Vec<Dynamic>, ProductError> {
        let mut values = Vec::new();

        for other in scopes {
            if other == scope {
                continue;
            }

            let Some(repository) = self.repositories.get(other) else {
                continue;
            };

            if let Ok(promise) = repository.lookup(product) {
                values.push(promise.get()?);
            }
        }

        Ok(values)
    }

    fn error(&self, scope: &Scope, product: &ProductId, reason: impl ToString) -> ProductError {
        ProductError::Import {
            scope: scope.clone(),
            product: product.clone(),
            reason: reason.to_string(),
        }
    }
}

impl Imports for ScopeImports {
    fn import(&self, scope: &Scope, product: &ProductId) -> Result<Vec<Dynamic>, ProductError> {
        let direct = self
            .graph
            .dependencies(scope)
            .map_err(|err| self.error(scope, product, err))?;

        self.collect(scope, product, direct)
    }

    fn import_all(
        &self,
        scope: &Scope,
        product: &ProductId,
    ) -> Result<Vec<Dynamic>, ProductError> {
        let all = self
            .graph
            .resolve(std::slice::from_ref(scope))
            .map_err(|err| self.error(scope, product, err))?;

        self.collect(scope, product, &all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKey;

    fn id(s: &str) -> ProductId {
        ProductId::new(s).unwrap()
    }

    /// Repository of `scope` with `classes` completed as the scope name.
    fn repository(scope: &Scope) -> Arc<ProductRepository> {
        let mut repo = ProductRepository::new();
        repo.create_product(scope, id("classes"), TaskKey::new(scope.clone(), "compile"))
            .unwrap()
            .complete(Arc::new(scope.name().to_string()))
            .unwrap();
        Arc::new(repo)
    }

    fn names(values: Vec<Dynamic>) -> Vec<String> {
        values
            .into_iter()
            .map(|v| v.downcast_ref::<String>().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_no_imports() {
        assert!(matches!(
            NoImports.import(&Scope::new("app"), &id("classes")),
            Err(ProductError::Import { .. })
        ));
    }

    #[test]
    fn test_direct_and_transitive() {
        // app -> lib -> core
        let (app, lib, base) = (Scope::new("app"), Scope::new("lib"), Scope::new("core"));
        let mut imports = ScopeImports::new();
        for scope in [&app, &lib, &base] {
            imports.add_scope(scope.clone(), repository(scope)).unwrap();
        }
        imports.add_dependency(&app, &lib).unwrap();
        imports.add_dependency(&lib, &base).unwrap();

        assert_eq!(names(imports.import(&app, &id("classes")).unwrap()), vec!["lib"]);
        assert_eq!(
            names(imports.import_all(&app, &id("classes")).unwrap()),
            vec!["core", "lib"]
        );
        assert!(imports.import(&app, &id("resources")).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_scope() {
        let imports = ScopeImports::new();
        assert!(matches!(
            imports.import(&Scope::new("app"), &id("classes")),
            Err(ProductError::Import { .. })
        ));
    }
}
