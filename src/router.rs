use crate::errors::{AppError, AppResult};
use crate::feed::NotificationFeed;
use crate::models::{ActionOutcome, FollowRequestRef, NotificationCandidate};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Routes user actions on rendered notifications to the authoritative store
/// or the dismissal overlay.
#[derive(Clone)]
pub struct ActionRouter {
    feed: Arc<NotificationFeed>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    notification_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.notification_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowDecision {
    Accept,
    Decline,
}

impl FollowDecision {
    fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Decline => "decline",
        }
    }
}

impl ActionRouter {
    pub fn new(feed: Arc<NotificationFeed>) -> Self {
        Self {
            feed,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Removes the item immediately, then deletes the structured row or
    /// dismisses the legacy key. Any failure triggers a full fetch cycle.
    pub async fn delete_notification(&self, candidate: &NotificationCandidate) -> ActionOutcome {
        self.feed.remove_pending(&candidate.id).await;

        let origin = candidate.origin();
        // legacy rows cannot be deleted at the source
        let result = if origin.is_legacy() {
            self.feed.overlay().add(&candidate.dedup_key()).await
        } else {
            self.feed
                .backend()
                .delete_structured_notification(candidate.source_row_id())
                .await
                .map_err(|error| AppError::ActionFailed(format!("delete {}: {}", candidate.id, error)))
        };
        self.feed.settle(&candidate.id).await;

        match result {
            Ok(()) => {
                tracing::info!(
                    notification_id = %candidate.id,
                    origin = origin.as_str(),
                    "notification deleted"
                );
                ActionOutcome::Applied
            }
            Err(error) => {
                tracing::warn!(
                    notification_id = %candidate.id,
                    origin = origin.as_str(),
                    error = %error,
                    "notification delete failed, resynchronizing feed"
                );
                self.feed.refresh().await;
                ActionOutcome::Resynchronized
            }
        }
    }

    pub async fn accept_follow_request(&self, candidate: &NotificationCandidate) -> AppResult<ActionOutcome> {
        self.resolve_follow_request(candidate, FollowDecision::Accept).await
    }

    pub async fn decline_follow_request(&self, candidate: &NotificationCandidate) -> AppResult<ActionOutcome> {
        self.resolve_follow_request(candidate, FollowDecision::Decline).await
    }

    pub fn is_in_flight(&self, notification_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.contains(notification_id))
            .unwrap_or(false)
    }

    async fn resolve_follow_request(
        &self,
        candidate: &NotificationCandidate,
        decision: FollowDecision,
    ) -> AppResult<ActionOutcome> {
        let Some(FollowRequestRef {
            requester_id,
            requested_id,
            ..
        }) = candidate.follow_request.as_ref()
        else {
            return Err(AppError::NotFound(format!(
                "Notification {} carries no follow request",
                candidate.id
            )));
        };

        let _guard = match self.begin(&candidate.id) {
            Ok(guard) => guard,
            Err(error) => {
                tracing::debug!(notification_id = %candidate.id, error = %error, "follow request action suppressed");
                return Ok(ActionOutcome::Suppressed);
            }
        };

        let backend = self.feed.backend();
        let result = match decision {
            FollowDecision::Accept => backend.accept_follow_request(requester_id, requested_id).await,
            FollowDecision::Decline => backend.delete_follow_request(requester_id, requested_id).await,
        };

        match result {
            Ok(()) => {
                self.feed.remove(&candidate.id).await;
                tracing::info!(
                    notification_id = %candidate.id,
                    decision = decision.as_str(),
                    "follow request resolved"
                );
                Ok(ActionOutcome::Applied)
            }
            Err(error) => {
                tracing::error!(
                    notification_id = %candidate.id,
                    decision = decision.as_str(),
                    error = %error,
                    "follow request action failed"
                );
                Err(AppError::ActionFailed(format!(
                    "Could not {} follow request: {}",
                    decision.as_str(),
                    error
                )))
            }
        }
    }

    fn begin(&self, notification_id: &str) -> AppResult<InFlightGuard> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| AppError::Internal("in-flight mutex poisoned".to_string()))?;
        if !in_flight.insert(notification_id.to_string()) {
            return Err(AppError::ConcurrentMutation(format!(
                "Notification {} already has an action pending",
                notification_id
            )));
        }
        Ok(InFlightGuard {
            in_flight: self.in_flight.clone(),
            notification_id: notification_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ActionRouter;
    use crate::backend::{BackendOp, MemoryBackend};
    use crate::errors::AppError;
    use crate::feed::NotificationFeed;
    use crate::models::{
        ActionOutcome, FollowRequestRef, LikeRow, NotificationRow, NotificationType, PostRef,
    };
    use crate::overlay::{DismissalOverlay, MemoryKeyValueStore};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        backend: Arc<MemoryBackend>,
        store: Arc<MemoryKeyValueStore>,
        feed: Arc<NotificationFeed>,
        router: ActionRouter,
    }

    fn harness() -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(MemoryKeyValueStore::new());
        let feed = Arc::new(NotificationFeed::new(
            "me",
            backend.clone(),
            Arc::new(DismissalOverlay::new(store.clone())),
        ));
        Harness {
            backend,
            store,
            router: ActionRouter::new(feed.clone()),
            feed,
        }
    }

    fn request_row(id: &str, requester: &str, at: i64) -> NotificationRow {
        NotificationRow {
            id: id.to_string(),
            notification_type: NotificationType::FollowRequest,
            actor_id: requester.to_string(),
            actor: None,
            post_id: None,
            workout_id: None,
            post: None,
            workout: None,
            follow_request: Some(FollowRequestRef {
                id: format!("fr-{}", id),
                requester_id: requester.to_string(),
                requested_id: "me".to_string(),
            }),
            read: false,
            created_at: Utc.timestamp_opt(at, 0).unwrap(),
        }
    }

    fn like_row(id: &str, actor: &str, post: &str, at: i64) -> LikeRow {
        LikeRow {
            id: id.to_string(),
            user_id: actor.to_string(),
            post_id: post.to_string(),
            actor: None,
            post: Some(PostRef {
                id: post.to_string(),
                image_url: None,
            }),
            created_at: Utc.timestamp_opt(at, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn deleting_structured_row_hits_the_store_not_the_overlay() {
        let h = harness();
        h.backend.push_structured(NotificationRow {
            id: "n1".to_string(),
            notification_type: NotificationType::Comment,
            actor_id: "u1".to_string(),
            actor: None,
            post_id: Some("p1".to_string()),
            workout_id: None,
            post: Some(PostRef {
                id: "p1".to_string(),
                image_url: None,
            }),
            workout: None,
            follow_request: None,
            read: false,
            created_at: Utc.timestamp_opt(10, 0).unwrap(),
        });
        let items = h.feed.refresh().await;

        assert_eq!(h.router.delete_notification(&items[0]).await, ActionOutcome::Applied);
        assert!(h.feed.items().await.is_empty());
        assert_eq!(h.backend.structured_len(), 0);
        assert!(h.feed.overlay().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn deleting_legacy_like_dismisses_its_key() {
        let h = harness();
        h.backend.push_like(like_row("l1", "U3", "P3", 10));
        let items = h.feed.refresh().await;

        assert_eq!(h.router.delete_notification(&items[0]).await, ActionOutcome::Applied);
        assert_eq!(h.backend.calls(BackendOp::DeleteNotification), 0);
        assert!(h.feed.overlay().snapshot().await.contains("like:U3:P3"));
        assert!(h.feed.refresh().await.is_empty());
    }

    #[tokio::test]
    async fn failed_delete_resynchronizes_the_feed() {
        let h = harness();
        h.backend.push_like(like_row("l1", "U3", "P3", 10));
        let items = h.feed.refresh().await;
        h.store.set_fail_writes(true);

        let outcome = h.router.delete_notification(&items[0]).await;
        assert_eq!(outcome, ActionOutcome::Resynchronized);
        assert_eq!(h.feed.items().await.len(), 1);
        assert_eq!(h.backend.calls(BackendOp::FetchLikes), 2);
    }

    fn comment_row(id: &str, actor: &str, at: i64) -> NotificationRow {
        NotificationRow {
            id: id.to_string(),
            notification_type: NotificationType::Comment,
            actor_id: actor.to_string(),
            actor: None,
            post_id: Some(format!("post-{}", id)),
            workout_id: None,
            post: None,
            workout: None,
            follow_request: None,
            read: false,
            created_at: Utc.timestamp_opt(at, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn failed_structured_delete_resynchronizes_the_feed() {
        let h = harness();
        h.backend.push_structured(comment_row("n5", "u5", 10));
        let items = h.feed.refresh().await;
        h.backend.fail(BackendOp::DeleteNotification, "server error");

        let outcome = h.router.delete_notification(&items[0]).await;
        assert_eq!(outcome, ActionOutcome::Resynchronized);
        assert_eq!(h.feed.items().await, items);
        assert_eq!(h.backend.calls(BackendOp::FetchStructured), 2);
        assert!(h.feed.overlay().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn refresh_during_pending_delete_keeps_item_hidden() {
        let h = harness();
        h.backend.push_structured(comment_row("n9", "u9", 10));
        h.backend.push_structured(comment_row("n8", "u8", 5));
        let items = h.feed.refresh().await;
        h.backend.delay(BackendOp::DeleteNotification, Duration::from_millis(100));

        let pending = tokio::spawn({
            let router = h.router.clone();
            let candidate = items[0].clone();
            async move { router.delete_notification(&candidate).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let during = h.feed.refresh().await;
        assert_eq!(during.iter().map(|candidate| candidate.id.as_str()).collect::<Vec<_>>(), vec!["n8"]);

        assert_eq!(pending.await.expect("join"), ActionOutcome::Applied);
        let after = h.feed.items().await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, "n8");

        h.backend.clear_delay(BackendOp::DeleteNotification);
        assert_eq!(h.feed.refresh().await.len(), 1);
    }

    #[tokio::test]
    async fn accepting_request_removes_it_and_follow_takes_over() {
        let h = harness();
        h.backend.push_structured(request_row("n2", "U2", 150));
        let items = h.feed.refresh().await;

        let outcome = h.router.accept_follow_request(&items[0]).await.expect("accept");
        assert_eq!(outcome, ActionOutcome::Applied);
        assert!(h.feed.items().await.is_empty());
        assert!(!h.router.is_in_flight(&items[0].id));

        let refreshed = h.feed.refresh().await;
        assert_eq!(refreshed.len(), 1);
        assert_eq!(refreshed[0].notification_type, NotificationType::Follow);
    }

    #[tokio::test]
    async fn failed_decline_keeps_item_and_clears_flag() {
        let h = harness();
        h.backend.push_structured(request_row("n3", "U4", 10));
        let items = h.feed.refresh().await;
        h.backend.fail(BackendOp::DeleteRequest, "network down");

        let err = h
            .router
            .decline_follow_request(&items[0])
            .await
            .expect_err("decline should fail");
        assert!(matches!(err, AppError::ActionFailed(_)));
        assert_eq!(h.feed.items().await.len(), 1);
        assert!(!h.router.is_in_flight(&items[0].id));

        h.backend.recover(BackendOp::DeleteRequest);
        assert_eq!(
            h.router.decline_follow_request(&items[0]).await.expect("retry"),
            ActionOutcome::Applied
        );
    }

    #[tokio::test]
    async fn second_tap_while_pending_is_suppressed() {
        let h = harness();
        h.backend.push_structured(request_row("n4", "U5", 10));
        let items = h.feed.refresh().await;
        h.backend.delay(BackendOp::AcceptRequest, Duration::from_millis(80));

        let first = tokio::spawn({
            let router = h.router.clone();
            let candidate = items[0].clone();
            async move { router.accept_follow_request(&candidate).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.router.is_in_flight(&items[0].id));

        let second = h.router.accept_follow_request(&items[0]).await.expect("second");
        assert_eq!(second, ActionOutcome::Suppressed);
        assert_eq!(first.await.expect("join").expect("first"), ActionOutcome::Applied);
        assert_eq!(h.backend.calls(BackendOp::AcceptRequest), 1);
    }

    #[tokio::test]
    async fn follow_actions_need_a_follow_request_payload() {
        let h = harness();
        h.backend.push_like(like_row("l1", "U3", "P3", 10));
        let items = h.feed.refresh().await;

        let err = h.router.accept_follow_request(&items[0]).await.expect_err("no payload");
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
