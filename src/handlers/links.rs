use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use url::Url;
use uuid::Uuid;

use super::{
    extract::{ApiJson, ApiPath},
    shared::fetch_owned_link,
};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{
        BookmarkedLink, LinkDetails, LinkDetailsDto, LinkDto, LinkListResponse, LinkTagDto,
        LinkWithTagsDto,
    },
    queue::{self, CrawlRequest},
    state::AppState,
};

/// Longest URL accepted for bookmarking, in bytes.
pub const MAX_URL_LEN: usize = 2048;

// ============================================================================
// Input validation
// ============================================================================

/// Body of `POST /api/v1/links`. The URL is checked by `validate_link_url`
/// after trimming.
#[derive(Debug, Deserialize)]
pub struct NewLinkRequest {
    pub url: String,
}

/// Trim and check that `raw` is an absolute http(s) URL with a host.
/// Returns the trimmed string, which is what gets stored.
pub fn validate_link_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_URL_LEN {
        return Err(AppError::Validation(format!(
            "url must be 1-{MAX_URL_LEN} characters"
        )));
    }

    let parsed =
        Url::parse(trimmed).map_err(|_| AppError::Validation("url must be a valid URL".into()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        _ => {
            return Err(AppError::Validation(
                "Only http/https URLs are supported".into(),
            ))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(AppError::Validation("url has no host".into()));
    }

    Ok(trimmed.to_string())
}

// ============================================================================
// Row types
// ============================================================================

/// `links LEFT JOIN link_details`; `details_link_id` is NULL until crawled.
#[derive(sqlx::FromRow)]
struct LinkRow {
    id: Uuid,
    url: String,
    created_at: DateTime<Utc>,
    details_link_id: Option<Uuid>,
    title: Option<String>,
    description: Option<String>,
    image_url: Option<String>,
    favicon: Option<String>,
}

impl From<LinkRow> for LinkDto {
    fn from(row: LinkRow) -> Self {
        let details = row.details_link_id.map(|_| LinkDetailsDto {
            title: row.title,
            description: row.description,
            image_url: row.image_url,
            favicon: row.favicon,
        });

        LinkDto {
            id: row.id,
            url: row.url,
            created_at: row.created_at,
            details,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/links
///
/// Bookmark a URL and schedule it for crawling. The link row and its crawl
/// job are written in one transaction: either both exist or neither does.
pub async fn create_link(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<NewLinkRequest>,
) -> AppResult<(StatusCode, Json<BookmarkedLink>)> {
    let url = validate_link_url(&req.url)?;

    let mut tx = state.pool.begin().await?;

    let link = sqlx::query_as::<_, BookmarkedLink>(
        "INSERT INTO links (url, user_id)
         VALUES ($1, $2)
         RETURNING id, url, created_at, user_id",
    )
    .bind(&url)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await?;

    let job_id = queue::enqueue(
        &mut *tx,
        &CrawlRequest {
            link_id: link.id,
            url: link.url.clone(),
        },
        state.crawl_max_attempts,
    )
    .await?;

    tx.commit().await?;

    info!(link_id = %link.id, job_id = %job_id, user_id = %auth.user_id, "Link bookmarked");

    Ok((StatusCode::CREATED, Json(link)))
}

/// GET /api/v1/links
///
/// Every link owned by the caller, newest first. `details` is present only
/// once the crawler has stored it.
pub async fn list_links(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<LinkListResponse>> {
    let rows = sqlx::query_as::<_, LinkRow>(
        "SELECT l.id, l.url, l.created_at,
                d.link_id AS details_link_id,
                d.title, d.description, d.image_url, d.favicon
         FROM links l
         LEFT JOIN link_details d ON d.link_id = l.id
         WHERE l.user_id = $1
         ORDER BY l.created_at DESC, l.id",
    )
    .bind(auth.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(LinkListResponse {
        links: rows.into_iter().map(LinkDto::from).collect(),
    }))
}

/// GET /api/v1/links/:id
///
/// One owned link with details, attached tags and the latest crawl status.
pub async fn get_link(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(link_id): ApiPath<Uuid>,
) -> AppResult<Json<LinkWithTagsDto>> {
    let link = fetch_owned_link(&state.pool, link_id, auth.user_id).await?;

    let details = sqlx::query_as::<_, LinkDetails>(
        "SELECT link_id, title, description, image_url, favicon, crawled_at
         FROM link_details WHERE link_id = $1",
    )
    .bind(link.id)
    .fetch_optional(&state.pool)
    .await?;

    let tags = sqlx::query_as::<_, LinkTagDto>(
        "SELECT t.id, t.name, tl.attached_by
         FROM tags_on_links tl
         JOIN tags t ON t.id = tl.tag_id
         WHERE tl.link_id = $1
         ORDER BY t.name",
    )
    .bind(link.id)
    .fetch_all(&state.pool)
    .await?;

    let crawl_status = queue::latest_for_link(&state.pool, link.id)
        .await?
        .map(|job| job.status);

    Ok(Json(LinkWithTagsDto {
        link: LinkDto {
            id: link.id,
            url: link.url,
            created_at: link.created_at,
            details: details.map(Into::into),
        },
        tags,
        crawl_status,
    }))
}

/// DELETE /api/v1/links/:id
///
/// Owner-only. Details, tag attachments and queued jobs cascade.
pub async fn delete_link(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(link_id): ApiPath<Uuid>,
) -> AppResult<StatusCode> {
    let result = sqlx::query("DELETE FROM links WHERE id = $1 AND user_id = $2")
        .bind(link_id)
        .bind(auth.user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Link not found".into()));
    }

    info!(link_id = %link_id, user_id = %auth.user_id, "Link deleted");
    Ok(StatusCode::NO_CONTENT)
}
