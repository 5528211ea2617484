//! `Guarded<T>`: one mutex per shared field, copy-out reads.
//!
//! Every value shared between a service worker and external callers lives in
//! its own cell. Readers always receive a clone, never a reference into
//! mutable state, and no operation ever holds two cells at once.

use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct Guarded<T> {
    inner: Mutex<T>,
}

impl<T: Clone> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> T {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current value.
    pub fn set(&self, value: T) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }
}
