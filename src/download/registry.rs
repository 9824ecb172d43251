//! Registry of running downloads and their pause handles.
//!
//! Each running orchestrator holds an [`ActiveGuard`]; dropping the guard
//! unregisters the download on every exit path, including errors and panics.
//! Entries carry a generation so a guard from an earlier run can never remove
//! the handle of a later one.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::DownloadError;

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<i64, Entry>>,
    next_generation: AtomicU64,
    released: Notify,
}

/// Cancellation handles of running downloads, keyed by download id.
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct ActiveDownloads {
    inner: Arc<Inner>,
}

impl ActiveDownloads {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<i64, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a fresh cancellation handle for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::AlreadyActive`] if `id` is already running.
    pub fn register(&self, id: i64) -> Result<ActiveGuard, DownloadError> {
        let mut entries = self.entries();
        if entries.contains_key(&id) {
            return Err(DownloadError::AlreadyActive { id });
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        entries.insert(
            id,
            Entry {
                generation,
                token: token.clone(),
            },
        );
        debug!(download_id = id, generation, "registered active download");

        Ok(ActiveGuard {
            registry: self.clone(),
            id,
            generation,
            token,
        })
    }

    /// Cancels the running download `id`.
    ///
    /// Returns false when nothing is registered under `id`.
    pub fn cancel(&self, id: i64) -> bool {
        match self.entries().get(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every running download and returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let entries = self.entries();
        for entry in entries.values() {
            entry.token.cancel();
        }
        entries.len()
    }

    /// Returns true while `id` has a registered handle.
    #[must_use]
    pub fn is_active(&self, id: i64) -> bool {
        self.entries().contains_key(&id)
    }

    /// Ids of every running download, sorted.
    #[must_use]
    pub fn active_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.entries().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Waits until `id` is no longer registered.
    pub async fn wait_released(&self, id: i64) {
        loop {
            let mut notified = pin!(self.inner.released.notified());
            notified.as_mut().enable();
            if !self.is_active(id) {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, id: i64, generation: u64) {
        let removed = {
            let mut entries = self.entries();
            if entries.get(&id).is_some_and(|e| e.generation == generation) {
                entries.remove(&id);
                true
            } else {
                false
            }
        };
        if removed {
            debug!(download_id = id, generation, "released active download");
            self.inner.released.notify_waiters();
        }
    }
}

/// Registration of one running download; unregisters on drop.
#[derive(Debug)]
pub struct ActiveGuard {
    registry: ActiveDownloads,
    id: i64,
    generation: u64,
    token: CancellationToken,
}

impl ActiveGuard {
    /// The download this guard registered.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Token cancelled by [`ActiveDownloads::cancel`].
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.registry.release(self.id, self.generation);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_register_and_drop_unregisters() {
        let registry = ActiveDownloads::new();
        {
            let guard = registry.register(1).unwrap();
            assert_eq!(guard.id(), 1);
            assert!(registry.is_active(1));
        }
        assert!(!registry.is_active(1));
        assert!(!registry.cancel(1));
    }

    #[test]
    fn test_double_register_is_rejected() {
        let registry = ActiveDownloads::new();
        let _guard = registry.register(5).unwrap();
        assert!(matches!(
            registry.register(5),
            Err(DownloadError::AlreadyActive { id: 5 })
        ));
    }

    #[test]
    fn test_cancel_only_touches_its_own_token() {
        let registry = ActiveDownloads::new();
        let a = registry.register(1).unwrap();
        let b = registry.register(2).unwrap();

        assert!(registry.cancel(1));

        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
        assert_eq!(registry.active_ids(), vec![1, 2]);
    }

    #[test]
    fn test_stale_release_keeps_newer_generation() {
        let registry = ActiveDownloads::new();
        let first = registry.register(9).unwrap();
        let stale_generation = first.generation;
        drop(first);

        let second = registry.register(9).unwrap();
        registry.release(9, stale_generation);

        assert!(registry.is_active(9));
        drop(second);
        assert!(!registry.is_active(9));
    }

    #[test]
    fn test_cancel_all_counts() {
        let registry = ActiveDownloads::new();
        let a = registry.register(1).unwrap();
        let b = registry.register(2).unwrap();
        assert_eq!(registry.cancel_all(), 2);
        assert!(a.token().is_cancelled() && b.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_released_returns_after_drop() {
        let registry = ActiveDownloads::new();
        let guard = registry.register(3).unwrap();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_released(3).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
