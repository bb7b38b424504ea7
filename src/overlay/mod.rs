//! Client-side dismissal overlay for notifications that cannot be deleted
//! at the source.

pub mod sqlite_store;

use crate::canonical::DedupKey;
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

pub use sqlite_store::SqliteKeyValueStore;

/// Durable key-value backend holding the dismissed key list. Writes replace
/// the whole list; append semantics live in [`DismissalOverlay`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_dismissed_keys(&self) -> AppResult<Vec<String>>;
    async fn set_dismissed_keys(&self, keys: &[String]) -> AppResult<()>;
}

pub struct DismissalOverlay {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl DismissalOverlay {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Adds `key`; adding a key that is already present is a no-op.
    pub async fn add(&self, key: &DedupKey) -> AppResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut keys = self.store.get_dismissed_keys().await.map_err(overlay_error)?;
        if keys.iter().any(|existing| existing == key.as_str()) {
            return Ok(());
        }
        keys.push(key.as_str().to_string());
        self.store.set_dismissed_keys(&keys).await.map_err(overlay_error)
    }

    pub async fn contains(&self, key: &DedupKey) -> bool {
        self.snapshot().await.contains(key.as_str())
    }

    /// Current dismissed set. A failed read yields an empty set.
    pub async fn snapshot(&self) -> HashSet<String> {
        match self.store.get_dismissed_keys().await {
            Ok(keys) => keys.into_iter().collect(),
            Err(error) => {
                tracing::warn!(error = %error, "dismissal overlay unreadable, treating as empty");
                HashSet::new()
            }
        }
    }
}

fn overlay_error(error: AppError) -> AppError {
    match error {
        AppError::OverlayUnavailable(_) => error,
        other => AppError::OverlayUnavailable(other.to_string()),
    }
}

/// In-process store. Failure switches let tests exercise the degraded paths.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    keys: StdMutex<Vec<String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_dismissed_keys(&self) -> AppResult<Vec<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::OverlayUnavailable("memory store read disabled".to_string()));
        }
        let keys = self
            .keys
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))?;
        Ok(keys.clone())
    }

    async fn set_dismissed_keys(&self, keys: &[String]) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::OverlayUnavailable("memory store write disabled".to_string()));
        }
        let mut stored = self
            .keys
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))?;
        *stored = keys.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DismissalOverlay, KeyValueStore, MemoryKeyValueStore};
    use crate::canonical::DedupKey;
    use crate::errors::AppError;
    use crate::models::NotificationType;
    use std::sync::Arc;

    #[tokio::test]
    async fn add_is_idempotent() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let overlay = DismissalOverlay::new(store.clone());
        let key = DedupKey::new(NotificationType::Like, "u3", Some("p3"));

        overlay.add(&key).await.expect("first add");
        overlay.add(&key).await.expect("second add");

        assert!(overlay.contains(&key).await);
        assert_eq!(store.get_dismissed_keys().await.expect("keys"), vec!["like:u3:p3".to_string()]);
    }

    #[tokio::test]
    async fn unreadable_store_reads_as_empty() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let overlay = DismissalOverlay::new(store.clone());
        overlay
            .add(&DedupKey::new(NotificationType::Follow, "u1", None))
            .await
            .expect("add");

        store.set_fail_reads(true);
        assert!(overlay.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_reported_as_overlay_unavailable() {
        let store = Arc::new(MemoryKeyValueStore::new());
        store.set_fail_writes(true);
        let overlay = DismissalOverlay::new(store);

        let err = overlay
            .add(&DedupKey::new(NotificationType::Follow, "u1", None))
            .await
            .expect_err("write should fail");
        assert!(matches!(err, AppError::OverlayUnavailable(_)));
    }

    #[tokio::test]
    async fn concurrent_adds_keep_every_key() {
        let overlay = Arc::new(DismissalOverlay::new(Arc::new(MemoryKeyValueStore::new())));
        let mut handles = Vec::new();
        for index in 0..16 {
            let overlay = overlay.clone();
            handles.push(tokio::spawn(async move {
                let key = DedupKey::new(NotificationType::Like, &format!("u{}", index), Some("p"));
                overlay.add(&key).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("add");
        }

        assert_eq!(overlay.snapshot().await.len(), 16);
    }
}
