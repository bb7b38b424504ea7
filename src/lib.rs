pub mod backend;
pub mod canonical;
pub mod collector;
pub mod db;
pub mod errors;
pub mod feed;
pub mod merge;
pub mod models;
pub mod overlay;
pub mod realtime;
pub mod router;
pub mod service;
pub mod swipe;

pub use crate::backend::{BackendOp, MemoryBackend, NotificationBackend};
pub use crate::canonical::DedupKey;
pub use crate::collector::get_notification_feed;
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::merge::{merge_candidates, MergeInput};
pub use crate::models::{ActionOutcome, CandidateOrigin, FeedSettings, NotificationCandidate, NotificationType};
pub use crate::overlay::{DismissalOverlay, KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
pub use crate::realtime::{ChangedTable, RowChange};
pub use crate::service::NotificationService;
pub use crate::swipe::{SwipeConfig, SwipeState};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the JSON file logger under `log_dir`. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "notifications.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
