use crate::feed::NotificationFeed;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedTable {
    Notifications,
    Likes,
    Follows,
    FollowRequests,
}

/// Row-change event pushed by the subscription transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowChange {
    pub table: ChangedTable,
    pub user_id: String,
}

/// Runs a fetch cycle whenever a change for the feed's user arrives. Events
/// already queued behind the first one are folded into the same cycle. The
/// task ends when every sender is dropped.
pub fn spawn_change_listener(feed: Arc<NotificationFeed>, mut receiver: mpsc::Receiver<RowChange>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(change) = receiver.recv().await {
            let mut tables = vec![change.table];
            let mut relevant = change.user_id == feed.user_id();
            while let Ok(next) = receiver.try_recv() {
                relevant |= next.user_id == feed.user_id();
                tables.push(next.table);
            }
            if !relevant {
                continue;
            }

            let items = feed.refresh().await;
            tracing::debug!(
                user_id = %feed.user_id(),
                events = tables.len(),
                count = items.len(),
                "refreshed notifications after row change"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{spawn_change_listener, ChangedTable, RowChange};
    use crate::backend::{BackendOp, MemoryBackend};
    use crate::feed::NotificationFeed;
    use crate::models::FollowRow;
    use crate::overlay::{DismissalOverlay, MemoryKeyValueStore};
    use chrono::Utc;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn feed(backend: Arc<MemoryBackend>) -> Arc<NotificationFeed> {
        Arc::new(NotificationFeed::new(
            "me",
            backend,
            Arc::new(DismissalOverlay::new(Arc::new(MemoryKeyValueStore::new()))),
        ))
    }

    fn change(table: ChangedTable, user_id: &str) -> RowChange {
        RowChange {
            table,
            user_id: user_id.to_string(),
        }
    }

    #[tokio::test]
    async fn queued_changes_collapse_into_one_cycle() {
        let backend = Arc::new(MemoryBackend::new());
        backend.push_follow(FollowRow {
            id: "f1".to_string(),
            follower_id: "u1".to_string(),
            actor: None,
            created_at: Utc::now(),
        });
        let feed = feed(backend.clone());
        let (sender, receiver) = mpsc::channel(16);

        sender.send(change(ChangedTable::Follows, "me")).await.expect("send");
        sender.send(change(ChangedTable::Likes, "me")).await.expect("send");
        sender.send(change(ChangedTable::Notifications, "me")).await.expect("send");
        drop(sender);

        spawn_change_listener(feed.clone(), receiver).await.expect("listener");
        assert_eq!(backend.calls(BackendOp::FetchFollows), 1);
        assert_eq!(feed.items().await.len(), 1);
    }

    #[tokio::test]
    async fn changes_for_other_users_are_ignored() {
        let backend = Arc::new(MemoryBackend::new());
        let feed = feed(backend.clone());
        let (sender, receiver) = mpsc::channel(4);

        sender
            .send(change(ChangedTable::FollowRequests, "someone-else"))
            .await
            .expect("send");
        drop(sender);

        spawn_change_listener(feed, receiver).await.expect("listener");
        assert_eq!(backend.calls(BackendOp::FetchStructured), 0);
    }
}
