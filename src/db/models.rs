//! Database Models - structs representing database tables (used by sqlx/serde).
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Admin profile. `is_admin` is the only authorization granularity.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted refresh token (hash only, never the opaque token itself).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProfileRefreshToken {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

/// Category reference row. Fetched in bulk, ordered by display_order.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub display_order: i32,
    pub icon: Option<String>,
    pub color_accent: Option<String>,
}

/// Content row as stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Uuid,
    pub thumbnail_url: Option<String>,
    pub published: bool,
    pub publish_date: Option<DateTime<Utc>>,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

/// Content row joined with its category name (admin list view).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentWithCategory {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category_id: Uuid,
    pub category_name: String,
    pub thumbnail_url: Option<String>,
    pub published: bool,
    pub publish_date: Option<DateTime<Utc>>,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

/// Embed sub-record. The set attached to a content row is always a
/// complete replacement on save, never a partial merge.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEmbed {
    pub id: Uuid,
    pub content_id: Uuid,
    pub embed_type: String,
    pub embed_url: String,
    pub display_order: i32,
}

/// Raw analytics event. Append-only; content_id carries no foreign key so
/// deleting content leaves its events orphaned rather than cascading.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: Uuid,
    pub content_id: Uuid,
    pub event_type: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Contact-form submission. Status is the only mutable field after creation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub message: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub submission_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
