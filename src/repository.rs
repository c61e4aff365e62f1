use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConfigError, ProductError};
use crate::product::{ProductId, Scope};
use crate::promise::{DEFAULT_WARN_AFTER, ProductPromise};
use crate::task::TaskKey;

/// Maps every declared product to its promise.
///
/// The repository is filled once, before any task runs, and only read
/// afterwards; the promises themselves carry all the synchronization. A
/// lookup never creates an entry, so an undeclared product is told apart from
/// one that is declared but still being computed.
#[derive(Debug)]
pub struct ProductRepository {
    warn_after: Duration,
    products: HashMap<ProductId, (TaskKey, Arc<ProductPromise>)>,
}

impl ProductRepository {
    pub fn new() -> Self {
        Self::with_warn_after(DEFAULT_WARN_AFTER)
    }

    /// Promises created by this repository log a warning after every
    /// `warn_after` spent waiting.
    pub fn with_warn_after(warn_after: Duration) -> Self {
        Self {
            warn_after,
            products: HashMap::new(),
        }
    }

    /// Allocates the promise for `product`, provided by `producer`.
    pub fn create_product(
        &mut self,
        scope: &Scope,
        product: ProductId,
        producer: TaskKey,
    ) -> Result<Arc<ProductPromise>, ConfigError> {
        if let Some((first, _)) = self.products.get(&product) {
            return Err(ConfigError::DuplicateProduct {
                product,
                first: first.clone(),
                second: producer,
            });
        }

        let promise = Arc::new(ProductPromise::with_warn_after(
            scope.clone(),
            product.clone(),
            self.warn_after,
        ));

        self.products.insert(product, (producer, promise.clone()));
        Ok(promise)
    }

    pub fn lookup(&self, product: &ProductId) -> Result<&Arc<ProductPromise>, ProductError> {
        self.products
            .get(product)
            .map(|(_, promise)| promise)
            .ok_or_else(|| ProductError::NotRegistered(product.clone()))
    }

    /// The task registered as the producer of `product`.
    pub fn producer(&self, product: &ProductId) -> Option<&TaskKey> {
        self.products.get(product).map(|(producer, _)| producer)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl Default for ProductRepository {
    fn default() -> Self {
        Self::new()
    }
}
