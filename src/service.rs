use crate::backend::NotificationBackend;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::feed::NotificationFeed;
use crate::models::{ActionOutcome, FeedSettings, NotificationCandidate};
use crate::overlay::{DismissalOverlay, KeyValueStore, SqliteKeyValueStore};
use crate::realtime::{spawn_change_listener, RowChange};
use crate::router::ActionRouter;
use crate::swipe::{SwipeConfig, SwipeState, SwipeTracker};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const DEFAULT_VIEWPORT_WIDTH: f32 = 390.0;

/// Everything the notifications view talks to.
pub struct NotificationService {
    feed: Arc<NotificationFeed>,
    router: ActionRouter,
    swipes: Mutex<SwipeTracker>,
    swipe_config: Mutex<SwipeConfig>,
    last_alert: Mutex<Option<String>>,
}

impl NotificationService {
    /// Opens the relational store and the local dismissal store under
    /// `data_dir`.
    pub fn open(data_dir: &Path, user_id: &str) -> AppResult<Arc<Self>> {
        let db = Arc::new(Database::new(&data_dir.join("state.sqlite"))?);
        let local = Arc::new(SqliteKeyValueStore::new(&data_dir.join("local.sqlite"))?);
        let settings = db.get_settings()?;
        tracing::info!(user_id = %user_id, db_path = %db.path().display(), "notification service opened");
        Ok(Arc::new(Self::new(user_id, db, local, &settings)))
    }

    pub fn new(
        user_id: &str,
        backend: Arc<dyn NotificationBackend>,
        local: Arc<dyn KeyValueStore>,
        settings: &FeedSettings,
    ) -> Self {
        let overlay = Arc::new(DismissalOverlay::new(local));
        let feed = Arc::new(NotificationFeed::new(user_id, backend, overlay));
        Self {
            router: ActionRouter::new(feed.clone()),
            feed,
            swipes: Mutex::new(SwipeTracker::new()),
            swipe_config: Mutex::new(SwipeConfig {
                viewport_width: DEFAULT_VIEWPORT_WIDTH,
                commit_ratio: settings.swipe_commit_ratio,
                activation_offset: settings.swipe_activation_offset,
            }),
            last_alert: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> &str {
        self.feed.user_id()
    }

    /// Runs a full fetch cycle and returns the rendered list.
    pub async fn get_notification_feed(&self) -> Vec<NotificationCandidate> {
        let items = self.feed.refresh().await;
        if let Ok(mut swipes) = self.swipes.lock() {
            swipes.retain_items(items.iter().map(|candidate| candidate.id.as_str()));
        }
        items
    }

    pub async fn items(&self) -> Vec<NotificationCandidate> {
        self.feed.items().await
    }

    pub async fn delete_notification(&self, candidate: &NotificationCandidate) -> ActionOutcome {
        if let Ok(mut swipes) = self.swipes.lock() {
            swipes.forget(&candidate.id);
        }
        self.router.delete_notification(candidate).await
    }

    pub async fn accept_follow_request(&self, candidate: &NotificationCandidate) -> AppResult<ActionOutcome> {
        let result = self.router.accept_follow_request(candidate).await;
        self.record_alert(&result);
        result
    }

    pub async fn decline_follow_request(&self, candidate: &NotificationCandidate) -> AppResult<ActionOutcome> {
        let result = self.router.decline_follow_request(candidate).await;
        self.record_alert(&result);
        result
    }

    /// Marks the rendered list read at once; the store write is best effort.
    pub async fn mark_all_read(&self) -> usize {
        let flipped = self.feed.mark_all_read().await;
        if let Err(error) = self.feed.backend().mark_notifications_read(self.user_id()).await {
            tracing::warn!(user_id = %self.user_id(), error = %error, "failed to persist read state");
        }
        flipped
    }

    pub async fn unread_count(&self) -> usize {
        self.feed.unread_count().await
    }

    /// Width the commit threshold is measured against. Must be finite and
    /// positive, otherwise a leftward drag could clear a negative threshold.
    pub fn set_viewport_width(&self, width: f32) -> AppResult<()> {
        if !width.is_finite() || width <= 0.0 {
            return Err(AppError::InvalidInput(format!("viewport width {} is not a positive length", width)));
        }
        let mut config = self
            .swipe_config
            .lock()
            .map_err(|_| AppError::Internal("swipe config mutex poisoned".to_string()))?;
        config.viewport_width = width;
        Ok(())
    }

    pub fn on_drag_update(&self, item_id: &str, delta_x: f32) -> AppResult<SwipeState> {
        let config = self.swipe_config()?;
        let mut swipes = self
            .swipes
            .lock()
            .map_err(|_| AppError::Internal("swipe tracker mutex poisoned".to_string()))?;
        Ok(swipes.drag_update(item_id, delta_x, &config))
    }

    /// Ends the gesture on `item_id`. A commit deletes the item and returns
    /// the delete outcome; anything else returns `None`.
    pub async fn on_drag_release(&self, item_id: &str, delta_x: f32) -> AppResult<Option<ActionOutcome>> {
        let config = self.swipe_config()?;
        let committed = {
            let mut swipes = self
                .swipes
                .lock()
                .map_err(|_| AppError::Internal("swipe tracker mutex poisoned".to_string()))?;
            swipes.drag_release(item_id, delta_x, &config)
        };
        if !committed {
            return Ok(None);
        }

        let Some(candidate) = self.feed.find(item_id).await else {
            tracing::debug!(notification_id = %item_id, "swipe committed on an item no longer rendered");
            return Ok(None);
        };
        Ok(Some(self.router.delete_notification(&candidate).await))
    }

    pub fn swipe_state(&self, item_id: &str) -> SwipeState {
        self.swipes
            .lock()
            .map(|swipes| swipes.state(item_id))
            .unwrap_or(SwipeState::Idle)
    }

    /// Returns and clears the most recent user-visible failure.
    pub fn take_alert(&self) -> Option<String> {
        self.last_alert.lock().ok().and_then(|mut alert| alert.take())
    }

    pub fn listen_for_changes(&self, receiver: mpsc::Receiver<RowChange>) -> JoinHandle<()> {
        spawn_change_listener(self.feed.clone(), receiver)
    }

    fn swipe_config(&self) -> AppResult<SwipeConfig> {
        self.swipe_config
            .lock()
            .map(|config| *config)
            .map_err(|_| AppError::Internal("swipe config mutex poisoned".to_string()))
    }

    fn record_alert(&self, result: &AppResult<ActionOutcome>) {
        if let Err(error) = result {
            if let Ok(mut alert) = self.last_alert.lock() {
                *alert = Some(error.to_string());
            }
        }
    }
}
