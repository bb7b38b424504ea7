use crate::backend::NotificationBackend;
use crate::errors::{AppError, AppResult};
use crate::models::{
    FeedSettings, FollowRequestRef, FollowRow, LikeRow, NotificationRow, NotificationType, PostRef, ProfileRow,
    WorkoutRef,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SETTINGS_KEY: &str = "feed";

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub id: String,
    pub user_id: String,
    pub actor_id: String,
    pub notification_type: NotificationType,
    pub post_id: Option<String>,
    pub workout_id: Option<String>,
    pub follow_request_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Authoritative relational store: posts, follow edges and notification rows.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn query_structured_notifications(&self, user_id: &str, limit: u32) -> AppResult<Vec<NotificationRow>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT n.id, n.type, n.actor_id,
                    a.id, a.username, a.avatar_url, a.is_verified,
                    p.id, p.image_url,
                    w.id, w.progress_image_url,
                    fr.id, fr.requester_id, fr.requested_id,
                    n.read, n.created_at,
                    n.post_id, n.workout_id
             FROM notifications n
             LEFT JOIN profiles a ON a.id = n.actor_id
             LEFT JOIN posts p ON p.id = n.post_id
             LEFT JOIN workouts w ON w.id = n.workout_id
             LEFT JOIN follow_requests fr ON fr.id = n.follow_request_id
             WHERE n.user_id = ?1
             ORDER BY n.created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], parse_notification_row)?;

        let mut result = Vec::new();
        for row in rows {
            match row? {
                Some(parsed) => result.push(parsed),
                None => tracing::debug!(user_id = %user_id, "skipping notification row with unknown type"),
            }
        }
        Ok(result)
    }

    pub fn query_likes_on_user_posts(&self, user_id: &str, limit: u32) -> AppResult<Vec<LikeRow>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT l.id, l.user_id, l.post_id,
                    a.id, a.username, a.avatar_url, a.is_verified,
                    p.id, p.image_url, l.created_at
             FROM likes l
             INNER JOIN posts p ON p.id = l.post_id AND p.user_id = ?1
             LEFT JOIN profiles a ON a.id = l.user_id
             WHERE l.user_id != ?1
             ORDER BY l.created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], |row| {
            Ok(LikeRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                post_id: row.get(2)?,
                actor: parse_profile(row, 3)?,
                post: row
                    .get::<_, Option<String>>(7)?
                    .map(|id| -> rusqlite::Result<PostRef> {
                        Ok(PostRef {
                            id,
                            image_url: row.get(8)?,
                        })
                    })
                    .transpose()?,
                created_at: parse_time(&row.get::<_, String>(9)?)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn query_follows_of_user(&self, user_id: &str, limit: u32) -> AppResult<Vec<FollowRow>> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.follower_id,
                    a.id, a.username, a.avatar_url, a.is_verified,
                    f.created_at
             FROM follows f
             LEFT JOIN profiles a ON a.id = f.follower_id
             WHERE f.following_id = ?1
             ORDER BY f.created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], |row| {
            Ok(FollowRow {
                id: row.get(0)?,
                follower_id: row.get(1)?,
                actor: parse_profile(row, 2)?,
                created_at: parse_time(&row.get::<_, String>(6)?)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn remove_notification(&self, id: &str) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let deleted = conn.execute("DELETE FROM notifications WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(AppError::NotFound(format!("Notification {} does not exist", id)));
        }
        Ok(())
    }

    /// Turns a pending request into a follow edge. The request and the
    /// notification rows pointing at it go away in the same transaction.
    pub fn accept_request(&self, requester_id: &str, requested_id: &str) -> AppResult<()> {
        let mut conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;

        let request_id: Option<String> = tx
            .query_row(
                "SELECT id FROM follow_requests WHERE requester_id = ?1 AND requested_id = ?2",
                params![requester_id, requested_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(request_id) = request_id else {
            return Err(AppError::NotFound(format!(
                "No pending follow request from {} to {}",
                requester_id, requested_id
            )));
        };

        tx.execute(
            "INSERT OR IGNORE INTO follows (id, follower_id, following_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                requester_id,
                requested_id,
                format_time(Utc::now())
            ],
        )?;
        tx.execute("DELETE FROM notifications WHERE follow_request_id = ?1", [&request_id])?;
        tx.execute("DELETE FROM follow_requests WHERE id = ?1", [&request_id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn remove_follow_request(&self, requester_id: &str, requested_id: &str) -> AppResult<()> {
        let mut conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM notifications WHERE follow_request_id IN (
               SELECT id FROM follow_requests WHERE requester_id = ?1 AND requested_id = ?2
             )",
            params![requester_id, requested_id],
        )?;
        let deleted = tx.execute(
            "DELETE FROM follow_requests WHERE requester_id = ?1 AND requested_id = ?2",
            params![requester_id, requested_id],
        )?;
        if deleted == 0 {
            return Err(AppError::NotFound(format!(
                "No pending follow request from {} to {}",
                requester_id, requested_id
            )));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn mark_all_read(&self, user_id: &str) -> AppResult<u64> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let updated = conn.execute(
            "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
            [user_id],
        )?;
        Ok(updated as u64)
    }

    pub fn upsert_profile(&self, profile: &ProfileRow) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO profiles (id, username, avatar_url, is_verified) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
               username = excluded.username,
               avatar_url = excluded.avatar_url,
               is_verified = excluded.is_verified",
            params![
                profile.id,
                profile.username,
                profile.avatar_url,
                i32::from(profile.is_verified)
            ],
        )?;
        Ok(())
    }

    pub fn insert_post(&self, id: &str, user_id: &str, image_url: Option<&str>, created_at: DateTime<Utc>) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO posts (id, user_id, image_url, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, image_url, format_time(created_at)],
        )?;
        Ok(())
    }

    pub fn insert_workout(
        &self,
        id: &str,
        user_id: &str,
        progress_image_url: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO workouts (id, user_id, progress_image_url, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, progress_image_url, format_time(created_at)],
        )?;
        Ok(())
    }

    pub fn insert_like(&self, id: &str, user_id: &str, post_id: &str, created_at: DateTime<Utc>) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO likes (id, user_id, post_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, post_id, format_time(created_at)],
        )?;
        Ok(())
    }

    pub fn insert_follow(&self, id: &str, follower_id: &str, following_id: &str, created_at: DateTime<Utc>) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO follows (id, follower_id, following_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, follower_id, following_id, format_time(created_at)],
        )?;
        Ok(())
    }

    pub fn insert_follow_request(
        &self,
        id: &str,
        requester_id: &str,
        requested_id: &str,
        created_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO follow_requests (id, requester_id, requested_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, requester_id, requested_id, format_time(created_at)],
        )?;
        Ok(())
    }

    pub fn insert_notification(&self, notification: &NewNotification) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO notifications (
               id, user_id, actor_id, type, post_id, workout_id, follow_request_id, read, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                notification.id,
                notification.user_id,
                notification.actor_id,
                notification.notification_type.as_str(),
                notification.post_id,
                notification.workout_id,
                notification.follow_request_id,
                i32::from(notification.read),
                format_time(notification.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn count_follows(&self, follower_id: &str, following_id: &str) -> AppResult<i64> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let count = conn.query_row(
            "SELECT COUNT(1) FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            params![follower_id, following_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_settings(&self) -> AppResult<FeedSettings> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<FeedSettings>(&raw).unwrap_or_default()),
            None => Ok(FeedSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<FeedSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: FeedSettings = serde_json::from_value(merged)?;

        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![SETTINGS_KEY, serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.conn.lock().map_err(|_| AppError::Internal("database mutex poisoned".to_string()))?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM settings WHERE key = ?1",
            [SETTINGS_KEY],
            |row| row.get(0),
        )?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    SETTINGS_KEY,
                    serde_json::to_string(&FeedSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationBackend for Database {
    async fn fetch_structured_notifications(&self, user_id: &str) -> AppResult<Vec<NotificationRow>> {
        let limit = self.get_settings()?.structured_fetch_limit;
        self.query_structured_notifications(user_id, limit)
    }

    async fn fetch_likes_on_user_posts(&self, user_id: &str) -> AppResult<Vec<LikeRow>> {
        let limit = self.get_settings()?.legacy_fetch_limit;
        self.query_likes_on_user_posts(user_id, limit)
    }

    async fn fetch_follows_of_user(&self, user_id: &str) -> AppResult<Vec<FollowRow>> {
        let limit = self.get_settings()?.legacy_fetch_limit;
        self.query_follows_of_user(user_id, limit)
    }

    async fn delete_structured_notification(&self, id: &str) -> AppResult<()> {
        self.remove_notification(id)
    }

    async fn accept_follow_request(&self, requester_id: &str, requested_id: &str) -> AppResult<()> {
        self.accept_request(requester_id, requested_id)
    }

    async fn delete_follow_request(&self, requester_id: &str, requested_id: &str) -> AppResult<()> {
        self.remove_follow_request(requester_id, requested_id)
    }

    async fn mark_notifications_read(&self, user_id: &str) -> AppResult<()> {
        let updated = self.mark_all_read(user_id)?;
        tracing::debug!(user_id = %user_id, updated, "marked notifications read");
        Ok(())
    }
}

fn parse_notification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<NotificationRow>> {
    let Some(notification_type) = NotificationType::parse(&row.get::<_, String>(1)?) else {
        return Ok(None);
    };

    let post = row
        .get::<_, Option<String>>(7)?
        .map(|id| -> rusqlite::Result<PostRef> {
            Ok(PostRef {
                id,
                image_url: row.get(8)?,
            })
        })
        .transpose()?;
    let workout = row
        .get::<_, Option<String>>(9)?
        .map(|id| -> rusqlite::Result<WorkoutRef> {
            Ok(WorkoutRef {
                id,
                progress_image_url: row.get(10)?,
            })
        })
        .transpose()?;
    let follow_request = row
        .get::<_, Option<String>>(11)?
        .map(|id| -> rusqlite::Result<FollowRequestRef> {
            Ok(FollowRequestRef {
                id,
                requester_id: row.get(12)?,
                requested_id: row.get(13)?,
            })
        })
        .transpose()?;

    Ok(Some(NotificationRow {
        id: row.get(0)?,
        notification_type,
        actor_id: row.get(2)?,
        actor: parse_profile(row, 3)?,
        post_id: row.get(16)?,
        workout_id: row.get(17)?,
        post,
        workout,
        follow_request,
        read: row.get::<_, i32>(14)? != 0,
        created_at: parse_time(&row.get::<_, String>(15)?)?,
    }))
}

/// Reads the four profile columns starting at `offset`; `None` when the
/// LEFT JOIN found no profile.
fn parse_profile(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Option<ProfileRow>> {
    let Some(id) = row.get::<_, Option<String>>(offset)? else {
        return Ok(None);
    };
    Ok(Some(ProfileRow {
        id,
        username: row.get(offset + 1)?,
        avatar_url: row.get(offset + 2)?,
        is_verified: row.get::<_, Option<i32>>(offset + 3)?.unwrap_or(0) != 0,
    }))
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
