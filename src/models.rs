use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Follow,
    Comment,
    WorkoutLike,
    FollowRequest,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Follow => "follow",
            Self::Comment => "comment",
            Self::WorkoutLike => "workout_like",
            Self::FollowRequest => "follow_request",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "like" => Some(Self::Like),
            "follow" => Some(Self::Follow),
            "comment" => Some(Self::Comment),
            "workout_like" => Some(Self::WorkoutLike),
            "follow_request" => Some(Self::FollowRequest),
            _ => None,
        }
    }

    /// Types whose identity includes the post they point at.
    pub fn is_post_related(self) -> bool {
        matches!(self, Self::Like | Self::Comment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRef {
    pub id: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutRef {
    pub id: String,
    pub progress_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRequestRef {
    pub id: String,
    pub requester_id: String,
    pub requested_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCandidate {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
    pub read: bool,
    pub actor: Actor,
    /// Raw id of the post or workout the notification points at. Survives
    /// even when the referenced row is gone and `post`/`workout` are empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub post: Option<PostRef>,
    pub workout: Option<WorkoutRef>,
    pub follow_request: Option<FollowRequestRef>,
}

/// Which collector produced a candidate. Recovered from the id tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateOrigin {
    Structured,
    LegacyLike,
    LegacyFollow,
}

impl CandidateOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::LegacyLike => "legacy-like",
            Self::LegacyFollow => "legacy-follow",
        }
    }

    /// Tie-break rank for identical timestamps, lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Structured => 0,
            Self::LegacyLike => 1,
            Self::LegacyFollow => 2,
        }
    }

    pub fn is_legacy(self) -> bool {
        !matches!(self, Self::Structured)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRow {
    pub id: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRow {
    pub id: String,
    pub notification_type: NotificationType,
    pub actor_id: String,
    pub actor: Option<ProfileRow>,
    pub post_id: Option<String>,
    pub workout_id: Option<String>,
    pub post: Option<PostRef>,
    pub workout: Option<WorkoutRef>,
    pub follow_request: Option<FollowRequestRef>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRow {
    pub id: String,
    pub user_id: String,
    pub post_id: String,
    pub actor: Option<ProfileRow>,
    pub post: Option<PostRef>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRow {
    pub id: String,
    pub follower_id: String,
    pub actor: Option<ProfileRow>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    pub swipe_commit_ratio: f32,
    pub swipe_activation_offset: f32,
    pub structured_fetch_limit: u32,
    pub legacy_fetch_limit: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            swipe_commit_ratio: 0.3,
            swipe_activation_offset: 10.0,
            structured_fetch_limit: 100,
            legacy_fetch_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionOutcome {
    Applied,
    Suppressed,
    Resynchronized,
}
