use crate::errors::{AppError, AppResult};
use crate::models::{FollowRow, LikeRow, NotificationRow, NotificationType};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Query/command surface of the authoritative store.
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    async fn fetch_structured_notifications(&self, user_id: &str) -> AppResult<Vec<NotificationRow>>;
    async fn fetch_likes_on_user_posts(&self, user_id: &str) -> AppResult<Vec<LikeRow>>;
    async fn fetch_follows_of_user(&self, user_id: &str) -> AppResult<Vec<FollowRow>>;
    async fn delete_structured_notification(&self, id: &str) -> AppResult<()>;
    async fn accept_follow_request(&self, requester_id: &str, requested_id: &str) -> AppResult<()>;
    async fn delete_follow_request(&self, requester_id: &str, requested_id: &str) -> AppResult<()>;
    async fn mark_notifications_read(&self, _user_id: &str) -> AppResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    FetchStructured,
    FetchLikes,
    FetchFollows,
    DeleteNotification,
    AcceptRequest,
    DeleteRequest,
    MarkRead,
}

#[derive(Debug, Default)]
struct MemoryState {
    structured: Vec<NotificationRow>,
    likes: Vec<LikeRow>,
    follows: Vec<FollowRow>,
    failing: HashMap<BackendOp, String>,
    delays: HashMap<BackendOp, Duration>,
    calls: HashMap<BackendOp, usize>,
}

/// Single-user in-memory store with per-operation failure and latency
/// injection. Rows are returned as seeded regardless of `user_id`; fetches
/// snapshot their rows before any injected delay.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_structured(&self, row: NotificationRow) {
        self.with_state(|state| state.structured.push(row));
    }

    pub fn push_like(&self, row: LikeRow) {
        self.with_state(|state| state.likes.push(row));
    }

    pub fn push_follow(&self, row: FollowRow) {
        self.with_state(|state| state.follows.push(row));
    }

    pub fn fail(&self, op: BackendOp, message: &str) {
        self.with_state(|state| {
            state.failing.insert(op, message.to_string());
        });
    }

    pub fn recover(&self, op: BackendOp) {
        self.with_state(|state| {
            state.failing.remove(&op);
        });
    }

    pub fn delay(&self, op: BackendOp, delay: Duration) {
        self.with_state(|state| {
            state.delays.insert(op, delay);
        });
    }

    pub fn clear_delay(&self, op: BackendOp) {
        self.with_state(|state| {
            state.delays.remove(&op);
        });
    }

    pub fn calls(&self, op: BackendOp) -> usize {
        self.with_state(|state| state.calls.get(&op).copied().unwrap_or(0))
    }

    pub fn structured_len(&self) -> usize {
        self.with_state(|state| state.structured.len())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    async fn enter(&self, op: BackendOp) -> AppResult<()> {
        let (delay, failure) = self.with_state(|state| {
            *state.calls.entry(op).or_insert(0) += 1;
            (state.delays.get(&op).copied(), state.failing.get(&op).cloned())
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(message) => Err(AppError::Io(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationBackend for MemoryBackend {
    async fn fetch_structured_notifications(&self, _user_id: &str) -> AppResult<Vec<NotificationRow>> {
        let rows = self.with_state(|state| state.structured.clone());
        self.enter(BackendOp::FetchStructured).await?;
        Ok(rows)
    }

    async fn fetch_likes_on_user_posts(&self, _user_id: &str) -> AppResult<Vec<LikeRow>> {
        let rows = self.with_state(|state| state.likes.clone());
        self.enter(BackendOp::FetchLikes).await?;
        Ok(rows)
    }

    async fn fetch_follows_of_user(&self, _user_id: &str) -> AppResult<Vec<FollowRow>> {
        let rows = self.with_state(|state| state.follows.clone());
        self.enter(BackendOp::FetchFollows).await?;
        Ok(rows)
    }

    async fn delete_structured_notification(&self, id: &str) -> AppResult<()> {
        self.enter(BackendOp::DeleteNotification).await?;
        self.with_state(|state| {
            let before = state.structured.len();
            state.structured.retain(|row| row.id != id);
            if state.structured.len() == before {
                return Err(AppError::NotFound(format!("Notification {} does not exist", id)));
            }
            Ok(())
        })
    }

    async fn accept_follow_request(&self, requester_id: &str, requested_id: &str) -> AppResult<()> {
        self.enter(BackendOp::AcceptRequest).await?;
        self.with_state(|state| {
            let Some(position) = state.structured.iter().position(|row| {
                row.notification_type == NotificationType::FollowRequest
                    && row.follow_request.as_ref().is_some_and(|request| {
                        request.requester_id == requester_id && request.requested_id == requested_id
                    })
            }) else {
                return Err(AppError::NotFound(format!(
                    "No pending follow request from {} to {}",
                    requester_id, requested_id
                )));
            };
            let request = state.structured.remove(position);
            state.follows.push(FollowRow {
                id: format!("accepted-{}", request.id),
                follower_id: requester_id.to_string(),
                actor: request.actor,
                created_at: Utc::now(),
            });
            Ok(())
        })
    }

    async fn delete_follow_request(&self, requester_id: &str, requested_id: &str) -> AppResult<()> {
        self.enter(BackendOp::DeleteRequest).await?;
        self.with_state(|state| {
            let before = state.structured.len();
            state.structured.retain(|row| {
                !row.follow_request.as_ref().is_some_and(|request| {
                    request.requester_id == requester_id && request.requested_id == requested_id
                })
            });
            if state.structured.len() == before {
                return Err(AppError::NotFound(format!(
                    "No pending follow request from {} to {}",
                    requester_id, requested_id
                )));
            }
            Ok(())
        })
    }

    async fn mark_notifications_read(&self, _user_id: &str) -> AppResult<()> {
        self.enter(BackendOp::MarkRead).await?;
        self.with_state(|state| {
            for row in &mut state.structured {
                row.read = true;
            }
        });
        Ok(())
    }
}
