//! Maps rows from every collector into [`NotificationCandidate`] and derives
//! the [`DedupKey`] that identifies a notification across sources.
//!
//! Everything here is pure. A row with missing relations (deleted post,
//! deleted actor profile) still canonicalizes with the relation left empty.

use crate::models::{
    Actor, CandidateOrigin, FollowRow, LikeRow, NotificationCandidate, NotificationRow, NotificationType,
    ProfileRow,
};
use serde::{Deserialize, Serialize};
use std::fmt;

const LEGACY_LIKE_PREFIX: &str = "legacy-like:";
const LEGACY_FOLLOW_PREFIX: &str = "legacy-follow:";

/// Identity of a notification independent of the collector that produced it.
///
/// Only [`DedupKey::new`] builds the string, so the merge step and the
/// dismissal filter can never disagree on its shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(notification_type: NotificationType, actor_id: &str, target_id: Option<&str>) -> Self {
        match target_id {
            Some(target) => Self(format!("{}:{}:{}", notification_type.as_str(), actor_id, target)),
            None => Self(format!("{}:{}", notification_type.as_str(), actor_id)),
        }
    }

    pub fn for_candidate(candidate: &NotificationCandidate) -> Self {
        Self::new(
            candidate.notification_type,
            &candidate.actor.id,
            candidate.target_id.as_deref(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl NotificationCandidate {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::for_candidate(self)
    }

    pub fn origin(&self) -> CandidateOrigin {
        origin_of(&self.id)
    }

    /// Row id in the originating table, without the legacy tag.
    pub fn source_row_id(&self) -> &str {
        self.id
            .strip_prefix(LEGACY_LIKE_PREFIX)
            .or_else(|| self.id.strip_prefix(LEGACY_FOLLOW_PREFIX))
            .unwrap_or(&self.id)
    }
}

pub fn origin_of(candidate_id: &str) -> CandidateOrigin {
    if candidate_id.starts_with(LEGACY_LIKE_PREFIX) {
        CandidateOrigin::LegacyLike
    } else if candidate_id.starts_with(LEGACY_FOLLOW_PREFIX) {
        CandidateOrigin::LegacyFollow
    } else {
        CandidateOrigin::Structured
    }
}

pub fn from_structured(row: NotificationRow) -> NotificationCandidate {
    let target_id = match row.notification_type {
        kind if kind.is_post_related() => row.post_id.or_else(|| row.post.as_ref().map(|post| post.id.clone())),
        NotificationType::WorkoutLike => row
            .workout_id
            .or_else(|| row.workout.as_ref().map(|workout| workout.id.clone())),
        _ => None,
    };
    NotificationCandidate {
        id: row.id,
        notification_type: row.notification_type,
        created_at: row.created_at,
        read: row.read,
        actor: actor_from_profile(&row.actor_id, row.actor),
        target_id,
        post: row.post,
        workout: row.workout,
        follow_request: row.follow_request,
    }
}

pub fn from_legacy_like(row: LikeRow) -> NotificationCandidate {
    NotificationCandidate {
        id: format!("{}{}", LEGACY_LIKE_PREFIX, row.id),
        notification_type: NotificationType::Like,
        created_at: row.created_at,
        read: false,
        actor: actor_from_profile(&row.user_id, row.actor),
        target_id: Some(row.post_id),
        post: row.post,
        workout: None,
        follow_request: None,
    }
}

pub fn from_legacy_follow(row: FollowRow) -> NotificationCandidate {
    NotificationCandidate {
        id: format!("{}{}", LEGACY_FOLLOW_PREFIX, row.id),
        notification_type: NotificationType::Follow,
        created_at: row.created_at,
        read: false,
        actor: actor_from_profile(&row.follower_id, row.actor),
        target_id: None,
        post: None,
        workout: None,
        follow_request: None,
    }
}

fn actor_from_profile(actor_id: &str, profile: Option<ProfileRow>) -> Actor {
    match profile {
        Some(profile) => Actor {
            id: actor_id.to_string(),
            username: profile.username.unwrap_or_default(),
            avatar_url: profile.avatar_url,
            is_verified: profile.is_verified,
        },
        None => Actor {
            id: actor_id.to_string(),
            username: String::new(),
            avatar_url: None,
            is_verified: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{from_legacy_follow, from_legacy_like, from_structured, origin_of, DedupKey};
    use crate::models::{
        CandidateOrigin, FollowRow, LikeRow, NotificationRow, NotificationType, PostRef, ProfileRow, WorkoutRef,
    };
    use chrono::{TimeZone, Utc};

    fn profile(id: &str) -> ProfileRow {
        ProfileRow {
            id: id.to_string(),
            username: Some(format!("{}-name", id)),
            avatar_url: Some(format!("https://cdn.test/{}.png", id)),
            is_verified: true,
        }
    }

    #[test]
    fn like_key_includes_post_and_follow_key_does_not() {
        let like = DedupKey::new(NotificationType::Like, "u1", Some("p1"));
        let follow = DedupKey::new(NotificationType::Follow, "u1", None);
        assert_eq!(like.as_str(), "like:u1:p1");
        assert_eq!(follow.as_str(), "follow:u1");
    }

    #[test]
    fn like_with_deleted_post_still_canonicalizes() {
        let candidate = from_legacy_like(LikeRow {
            id: "42".to_string(),
            user_id: "u1".to_string(),
            post_id: "gone".to_string(),
            actor: None,
            post: None,
            created_at: Utc.timestamp_opt(100, 0).unwrap(),
        });

        assert!(candidate.post.is_none());
        assert_eq!(candidate.actor.id, "u1");
        assert!(candidate.actor.username.is_empty());
        assert!(!candidate.read);
        assert_eq!(candidate.dedup_key().as_str(), "like:u1:gone");
    }

    #[test]
    fn structured_rows_key_on_raw_target_when_relation_is_gone() {
        let row = |id: &str, post_id: &str| NotificationRow {
            id: id.to_string(),
            notification_type: NotificationType::Like,
            actor_id: "u1".to_string(),
            actor: None,
            post_id: Some(post_id.to_string()),
            workout_id: None,
            post: None,
            workout: None,
            follow_request: None,
            read: false,
            created_at: Utc.timestamp_opt(10, 0).unwrap(),
        };
        let first = from_structured(row("n-1", "gone-1"));
        let second = from_structured(row("n-2", "gone-2"));

        assert!(first.post.is_none());
        assert_eq!(first.dedup_key().as_str(), "like:u1:gone-1");
        assert_ne!(first.dedup_key(), second.dedup_key());
    }

    #[test]
    fn structured_and_legacy_like_share_a_key() {
        let at = Utc.timestamp_opt(100, 0).unwrap();
        let post = PostRef {
            id: "p1".to_string(),
            image_url: None,
        };
        let structured = from_structured(NotificationRow {
            id: "n-1".to_string(),
            notification_type: NotificationType::Like,
            actor_id: "u1".to_string(),
            actor: Some(profile("u1")),
            post_id: Some("p1".to_string()),
            workout_id: None,
            post: Some(post.clone()),
            workout: None,
            follow_request: None,
            read: true,
            created_at: at,
        });
        let legacy = from_legacy_like(LikeRow {
            id: "7".to_string(),
            user_id: "u1".to_string(),
            post_id: "p1".to_string(),
            actor: Some(profile("u1")),
            post: Some(post),
            created_at: at,
        });

        assert_eq!(structured.dedup_key(), legacy.dedup_key());
        assert_eq!(structured.origin(), CandidateOrigin::Structured);
        assert_eq!(legacy.origin(), CandidateOrigin::LegacyLike);
        assert_eq!(legacy.source_row_id(), "7");
        assert!(structured.read);
    }

    #[test]
    fn legacy_follow_is_tagged_and_unread() {
        let candidate = from_legacy_follow(FollowRow {
            id: "f-9".to_string(),
            follower_id: "u2".to_string(),
            actor: Some(profile("u2")),
            created_at: Utc.timestamp_opt(200, 0).unwrap(),
        });

        assert_eq!(candidate.id, "legacy-follow:f-9");
        assert_eq!(origin_of(&candidate.id), CandidateOrigin::LegacyFollow);
        assert_eq!(candidate.source_row_id(), "f-9");
        assert_eq!(candidate.actor.username, "u2-name");
        assert_eq!(candidate.dedup_key().as_str(), "follow:u2");
    }

    #[test]
    fn workout_like_keys_on_workout() {
        let candidate = from_structured(NotificationRow {
            id: "n-2".to_string(),
            notification_type: NotificationType::WorkoutLike,
            actor_id: "u4".to_string(),
            actor: None,
            post_id: None,
            workout_id: Some("w1".to_string()),
            post: None,
            workout: Some(WorkoutRef {
                id: "w1".to_string(),
                progress_image_url: None,
            }),
            follow_request: None,
            read: false,
            created_at: Utc.timestamp_opt(5, 0).unwrap(),
        });
        assert_eq!(candidate.dedup_key().as_str(), "workout_like:u4:w1");
    }
}
