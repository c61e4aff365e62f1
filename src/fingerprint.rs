//! Up-to-date fingerprints built from a task's skip hints.
//!
//! The hints are concatenated and hashed with BLAKE3. When a task's current
//! fingerprint matches the one recorded after its last successful run, the
//! engine re-emits the recorded product instead of running the body.
//!
//! Only the hints are hashed. Upstream products are not part of the
//! fingerprint, so a task whose inputs changed is still skipped when its
//! hints did not. Skipping is advisory: a task's hints have to capture every
//! input that should force a rerun, such as source digests or versions.

use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::sync::{Mutex, PoisonError};

use crate::product::Dynamic;
use crate::task::{SkipHint, TaskKey};

/// 32 byte BLAKE3 digest of a task's skip hints.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl<T> From<T> for Fingerprint
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Fingerprint(value.into())
    }
}

impl Fingerprint {
    /// Hashes the concatenated hints, `None` when there are no hints.
    ///
    /// Nothing else about the task or its inputs is covered.
    pub fn of_hints(hints: &[SkipHint]) -> Option<Self> {
        if hints.is_empty() {
            return None;
        }

        let mut hasher = blake3::Hasher::new();
        for hint in hints {
            let value = hint();
            // length prefix keeps ["ab", "c"] apart from ["a", "bc"]
            hasher.update(&(value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }

        Some(hasher.finalize().into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for byte in self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Persisted fingerprints and the products recorded alongside them.
pub trait FingerprintStore: Send + Sync {
    fn load(&self, task: &TaskKey) -> Option<(Fingerprint, Option<Dynamic>)>;
    fn store(&self, task: &TaskKey, fingerprint: Fingerprint, product: Option<Dynamic>);
}

/// Keeps fingerprints for the lifetime of the process, which is enough for
/// repeated builds from one engine.
#[derive(Default)]
pub struct MemoryFingerprintStore {
    entries: Mutex<HashMap<TaskKey, (Fingerprint, Option<Dynamic>)>>,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn load(&self, task: &TaskKey) -> Option<(Fingerprint, Option<Dynamic>)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task)
            .cloned()
    }

    fn store(&self, task: &TaskKey, fingerprint: Fingerprint, product: Option<Dynamic>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.clone(), (fingerprint, product));
    }
}
