//! The Grove's single write lock
//!
//! `apply_grove_patch` and `apply_bootstrap` each hold this for their full
//! duration; no other mutation happens concurrently. Proof queries also
//! acquire it briefly rather than reading through a separate lock-free
//! snapshot path. `tokio::sync::Mutex` has no shared-reader mode, so a
//! genuinely lock-free read path would need a second primitive layered on
//! top. See DESIGN.md.

use tokio::sync::{Mutex, MutexGuard};

pub struct WriteLock<T> {
    inner: Mutex<T>,
}

impl<T> WriteLock<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Mutex::new(value) }
    }

    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().await
    }
}
