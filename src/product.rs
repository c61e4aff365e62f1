//! Product identifiers and build scopes.
//!
//! Products are the only coupling between independently written tasks: a
//! task names the products it produces and consumes, and the engine wires the
//! graph from those names alone.

use std::any::Any;
use std::borrow::Borrow;
use std::fmt::{self, Display};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::ConfigError;

/// A type-erased, thread-safe product value.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

static PRODUCT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-zA-Z]*$").expect("product id pattern"));

/// Name of a build artifact, e.g. `compilation` or `testReport`.
///
/// Identifiers must match `[a-z][a-zA-Z]*`. The check runs when the
/// identifier is created, so a malformed name fails during configuration and
/// never mid-build.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductId(Arc<str>);

impl ProductId {
    pub fn new(id: impl AsRef<str>) -> Result<Self, ConfigError> {
        let id = id.as_ref();
        if PRODUCT_ID.is_match(id) {
            Ok(Self(Arc::from(id)))
        } else {
            Err(ConfigError::InvalidProductId(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ProductId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ProductId {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ProductId::new(value)
    }
}

/// Validates a batch of identifiers, failing on the first malformed one.
pub(crate) fn product_ids<I, S>(ids: I) -> Result<Vec<ProductId>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter().map(ProductId::new).collect()
}

/// The module or project context a task and its products belong to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope(Arc<str>);

impl Scope {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new("main")
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
