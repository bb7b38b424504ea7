use crate::backend::NotificationBackend;
use crate::canonical::{from_legacy_follow, from_legacy_like, from_structured};
use crate::errors::{AppError, AppResult};
use crate::merge::{merge_candidates, MergeInput};
use crate::models::NotificationCandidate;
use crate::overlay::DismissalOverlay;

/// Issues the three collectors together and canonicalizes their rows. A
/// collector that fails contributes nothing.
pub async fn collect_candidates(backend: &dyn NotificationBackend, user_id: &str) -> MergeInput {
    let (structured, likes, follows) = tokio::join!(
        backend.fetch_structured_notifications(user_id),
        backend.fetch_likes_on_user_posts(user_id),
        backend.fetch_follows_of_user(user_id),
    );

    MergeInput {
        structured: degrade("structured", user_id, structured)
            .into_iter()
            .map(from_structured)
            .collect(),
        legacy_likes: degrade("legacy-likes", user_id, likes)
            .into_iter()
            .map(from_legacy_like)
            .collect(),
        legacy_follows: degrade("legacy-follows", user_id, follows)
            .into_iter()
            .map(from_legacy_follow)
            .collect(),
    }
}

/// One full fetch cycle: collect, read the overlay, merge.
pub async fn get_notification_feed(
    backend: &dyn NotificationBackend,
    overlay: &DismissalOverlay,
    user_id: &str,
) -> Vec<NotificationCandidate> {
    let (input, dismissed) = tokio::join!(collect_candidates(backend, user_id), overlay.snapshot());
    merge_candidates(input, &dismissed)
}

fn degrade<T>(source: &'static str, user_id: &str, result: AppResult<Vec<T>>) -> Vec<T> {
    match result {
        Ok(rows) => rows,
        Err(error) => {
            let error = AppError::SourceUnavailable(format!("{}: {}", source, error));
            tracing::warn!(source, user_id = %user_id, error = %error, "notification source degraded to empty");
            Vec::new()
        }
    }
}
