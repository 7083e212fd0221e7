use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// User Models
// ============================================================================

/// Internal database row. Not serializable; use UserDto for API responses
/// to avoid accidentally exposing password_hash.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Public user shape returned by the auth endpoints.
#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        UserDto {
            id: user.id,
            username: user.username,
            created_at: user.created_at,
        }
    }
}

// ============================================================================
// Link Models
// ============================================================================

/// A bookmarked URL. Returned as-is by `POST /api/v1/links`.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkedLink {
    pub id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
}

/// Crawler output for a link. At most one row per link.
#[derive(Debug, Clone, FromRow)]
pub struct LinkDetails {
    pub link_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub favicon: Option<String>,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkDetailsDto {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub favicon: Option<String>,
}

impl From<LinkDetails> for LinkDetailsDto {
    fn from(d: LinkDetails) -> Self {
        LinkDetailsDto {
            title: d.title,
            description: d.description,
            image_url: d.image_url,
            favicon: d.favicon,
        }
    }
}

/// A link joined with its details. `details` is omitted from the JSON
/// entirely, not sent as `null`, until the crawl completes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDto {
    pub id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<LinkDetailsDto>,
}

#[derive(Debug, Serialize)]
pub struct LinkListResponse {
    pub links: Vec<LinkDto>,
}

/// Single-link view: details plus attached tags and crawl progress.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkWithTagsDto {
    #[serde(flatten)]
    pub link: LinkDto,
    pub tags: Vec<LinkTagDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_status: Option<crate::queue::JobStatus>,
}

// ============================================================================
// Tag Models
// ============================================================================

/// Who attached a tag to a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum AttachedBy {
    Ai,
    Human,
}

/// Tag with the number of the caller's links carrying it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TagDto {
    pub id: Uuid,
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct TagListResponse {
    pub tags: Vec<TagDto>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkTagDto {
    pub id: Uuid,
    pub name: String,
    pub attached_by: AttachedBy,
}
