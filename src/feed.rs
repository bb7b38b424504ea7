use crate::backend::NotificationBackend;
use crate::collector::get_notification_feed;
use crate::models::NotificationCandidate;
use crate::overlay::DismissalOverlay;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct FeedState {
    items: Vec<NotificationCandidate>,
    applied_cycle: u64,
    /// Optimistically removed ids whose store action has not resolved.
    pending_removals: HashSet<String>,
}

/// The rendered notification list for one user.
///
/// Every fetch cycle takes an increasing id. A cycle is applied only if no
/// newer cycle and no local mutation landed since it was issued, so a slow
/// response can never overwrite fresher state. Items with a pending removal
/// are filtered out of every cycle until the removal settles.
pub struct NotificationFeed {
    user_id: String,
    backend: Arc<dyn NotificationBackend>,
    overlay: Arc<DismissalOverlay>,
    state: Mutex<FeedState>,
    issued_cycles: AtomicU64,
}

impl NotificationFeed {
    pub fn new(user_id: &str, backend: Arc<dyn NotificationBackend>, overlay: Arc<DismissalOverlay>) -> Self {
        Self {
            user_id: user_id.to_string(),
            backend,
            overlay,
            state: Mutex::new(FeedState::default()),
            issued_cycles: AtomicU64::new(0),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn backend(&self) -> &Arc<dyn NotificationBackend> {
        &self.backend
    }

    pub fn overlay(&self) -> &Arc<DismissalOverlay> {
        &self.overlay
    }

    pub async fn refresh(&self) -> Vec<NotificationCandidate> {
        let cycle = self.issued_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let items = get_notification_feed(self.backend.as_ref(), &self.overlay, &self.user_id).await;

        let mut state = self.state.lock().await;
        if cycle <= state.applied_cycle {
            tracing::debug!(user_id = %self.user_id, cycle, applied = state.applied_cycle, "discarding stale fetch cycle");
            return state.items.clone();
        }
        let state = &mut *state;
        state.applied_cycle = cycle;
        state.items = items
            .into_iter()
            .filter(|candidate| !state.pending_removals.contains(&candidate.id))
            .collect();
        tracing::debug!(user_id = %self.user_id, cycle, count = state.items.len(), "applied fetch cycle");
        state.items.clone()
    }

    pub async fn items(&self) -> Vec<NotificationCandidate> {
        self.state.lock().await.items.clone()
    }

    pub async fn find(&self, id: &str) -> Option<NotificationCandidate> {
        self.state
            .lock()
            .await
            .items
            .iter()
            .find(|candidate| candidate.id == id)
            .cloned()
    }

    /// Drops `id` from the rendered list right away.
    pub async fn remove(&self, id: &str) -> Option<NotificationCandidate> {
        let mut state = self.state.lock().await;
        self.supersede_in_flight(&mut state);
        let position = state.items.iter().position(|candidate| candidate.id == id)?;
        Some(state.items.remove(position))
    }

    /// Drops `id` and keeps it hidden from every cycle until [`Self::settle`].
    pub async fn remove_pending(&self, id: &str) -> Option<NotificationCandidate> {
        let mut state = self.state.lock().await;
        self.supersede_in_flight(&mut state);
        state.pending_removals.insert(id.to_string());
        let position = state.items.iter().position(|candidate| candidate.id == id)?;
        Some(state.items.remove(position))
    }

    /// Ends a pending removal. Cycles issued while it was pending may have
    /// read the row before the store action landed, so they are discarded.
    pub async fn settle(&self, id: &str) {
        let mut state = self.state.lock().await;
        self.supersede_in_flight(&mut state);
        state.pending_removals.remove(id);
    }

    pub async fn mark_all_read(&self) -> usize {
        let mut state = self.state.lock().await;
        self.supersede_in_flight(&mut state);
        let mut flipped = 0;
        for candidate in state.items.iter_mut().filter(|candidate| !candidate.read) {
            candidate.read = true;
            flipped += 1;
        }
        flipped
    }

    pub async fn unread_count(&self) -> usize {
        self.state
            .lock()
            .await
            .items
            .iter()
            .filter(|candidate| !candidate.read)
            .count()
    }

    fn supersede_in_flight(&self, state: &mut FeedState) {
        state.applied_cycle = state.applied_cycle.max(self.issued_cycles.load(Ordering::SeqCst));
    }
}
