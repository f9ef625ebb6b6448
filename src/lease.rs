//! Per-animation exclusive leases.
//!
//! Export, rebuild and every version operation hold the lease for their
//! animation for their whole duration, so they never interleave on one
//! working directory. Different animations proceed in parallel.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Grants at most one live lease per key.
#[derive(Debug, Default)]
pub struct LeaseRegistry {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // A panic while holding the set cannot leave it inconsistent.
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until the lease for `key` is free, then take it.
    pub fn acquire(&self, key: &str) -> Lease<'_> {
        let mut held = self.lock();
        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.insert(key.to_string());
        tracing::trace!(key, "lease acquired");
        Lease { registry: self, key: key.to_string() }
    }

    /// Take the lease for `key` only if it is free.
    pub fn try_acquire(&self, key: &str) -> Option<Lease<'_>> {
        let mut held = self.lock();
        if !held.insert(key.to_string()) {
            return None;
        }
        Some(Lease { registry: self, key: key.to_string() })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    fn release(&self, key: &str) {
        self.lock().remove(key);
        self.released.notify_all();
        tracing::trace!(key, "lease released");
    }
}

/// An exclusive lease, released on drop.
#[derive(Debug)]
pub struct Lease<'a> {
    registry: &'a LeaseRegistry,
    key: String,
}

impl Lease<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}
