//! Single-assignment product promises.
//!
//! A [`ProductPromise`] is the only synchronization point between tasks: the
//! producer completes it once, and every consumer blocks in
//! [`ProductPromise::get`] until that happens. A read never gives up on a slow
//! producer, it only logs how long it has been waiting.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::ProductError;
use crate::product::{Dynamic, ProductId, Scope};

/// Default interval after which a waiting reader logs a warning.
pub const DEFAULT_WARN_AFTER: Duration = Duration::from_secs(60);

/// Shortest accepted warning interval, a zero interval would spin.
pub const MIN_WARN_AFTER: Duration = Duration::from_millis(1);

enum State {
    Pending,
    Completed(Dynamic),
    /// The producer finished without completing the product.
    Abandoned,
}

pub struct ProductPromise {
    scope: Scope,
    product: ProductId,
    warn_after: Duration,
    state: Mutex<State>,
    ready: Condvar,
}

impl ProductPromise {
    pub fn new(scope: Scope, product: ProductId) -> Self {
        Self::with_warn_after(scope, product, DEFAULT_WARN_AFTER)
    }

    pub fn with_warn_after(scope: Scope, product: ProductId, warn_after: Duration) -> Self {
        Self {
            scope,
            product,
            warn_after: warn_after.max(MIN_WARN_AFTER),
            state: Mutex::new(State::Pending),
            ready: Condvar::new(),
        }
    }

    pub fn product(&self) -> &ProductId {
        &self.product
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn warn_after(&self) -> Duration {
        self.warn_after
    }

    /// Stores the value and wakes every waiting reader. Fails if the promise
    /// was completed (or abandoned) before.
    pub fn complete(&self, value: Dynamic) -> Result<(), ProductError> {
        let mut state = self.lock();

        if !matches!(*state, State::Pending) {
            return Err(ProductError::AlreadyCompleted(self.product.clone()));
        }

        *state = State::Completed(value);
        drop(state);
        self.ready.notify_all();
        tracing::debug!(product = %self.product, scope = %self.scope, "product completed");
        Ok(())
    }

    /// Marks the product as never arriving and releases every waiting reader
    /// with [`ProductError::Unavailable`]. A completed value stands.
    pub fn abandon(&self) {
        let mut state = self.lock();

        if let State::Pending = *state {
            *state = State::Abandoned;
            drop(state);
            self.ready.notify_all();
            tracing::debug!(product = %self.product, scope = %self.scope, "product abandoned");
        }
    }

    /// Blocks until the product is completed.
    ///
    /// Every `warn_after` interval spent waiting is logged, then the read
    /// carries on waiting. It only returns early when the producer abandoned
    /// the product.
    pub fn get(&self) -> Result<Dynamic, ProductError> {
        let start = Instant::now();
        let mut state = self.lock();

        loop {
            match &*state {
                State::Completed(value) => return Ok(value.clone()),
                State::Abandoned => return Err(ProductError::Unavailable(self.product.clone())),
                State::Pending => {}
            }

            let (guard, timeout) = self
                .ready
                .wait_timeout(state, self.warn_after)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;

            if timeout.timed_out() && matches!(*state, State::Pending) {
                tracing::warn!(
                    product = %self.product,
                    scope = %self.scope,
                    "still waiting for product after {:.1?}",
                    start.elapsed()
                );
            }
        }
    }

    /// Waits at most `timeout`, returning `Ok(None)` if the product is still
    /// pending afterwards.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Dynamic>, ProductError> {
        let state = self.lock();
        let (state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |state| matches!(state, State::Pending))
            .unwrap_or_else(PoisonError::into_inner);

        match &*state {
            State::Completed(value) => Ok(Some(value.clone())),
            State::Abandoned => Err(ProductError::Unavailable(self.product.clone())),
            State::Pending => Ok(None),
        }
    }

    /// Non-blocking peek at the completed value.
    pub fn try_get(&self) -> Option<Dynamic> {
        match &*self.lock() {
            State::Completed(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.lock(), State::Completed(_))
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(*self.lock(), State::Abandoned)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The lock is never held across user code, a poisoned guard still
        // holds a consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ProductPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.lock() {
            State::Pending => "pending",
            State::Completed(_) => "completed",
            State::Abandoned => "abandoned",
        };

        f.debug_struct("ProductPromise")
            .field("scope", &self.scope)
            .field("product", &self.product)
            .field("state", &state)
            .finish()
    }
}
