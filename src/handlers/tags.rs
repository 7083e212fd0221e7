use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use super::{
    extract::{ApiJson, ApiPath},
    shared::fetch_owned_link,
};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{AttachedBy, TagDto, TagListResponse},
    state::AppState,
};

/// Maximum length of a tag name in characters, after trimming.
const MAX_TAG_NAME_CHARS: usize = 64;
/// Upper bound on attach + detach entries in one request.
const MAX_TAG_OPS: usize = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Identifies a tag either by id or by name. When both are present the id
/// wins and the name is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRef {
    pub tag_id: Option<Uuid>,
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTagsRequest {
    #[serde(default)]
    pub attach: Vec<TagRef>,
    #[serde(default)]
    pub detach: Vec<TagRef>,
}

#[derive(Debug, Serialize)]
pub struct UpdateTagsResponse {
    pub attached: Vec<Uuid>,
    pub detached: Vec<Uuid>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Trim and bound-check a tag name.
pub fn normalize_tag_name(raw: &str) -> AppResult<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_TAG_NAME_CHARS {
        return Err(AppError::Validation(format!(
            "Tag name must be between 1 and {MAX_TAG_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

/// Check every entry before touching the database.
fn validate_refs(req: &UpdateTagsRequest) -> AppResult<()> {
    if req.attach.len() + req.detach.len() > MAX_TAG_OPS {
        return Err(AppError::Validation(format!(
            "At most {MAX_TAG_OPS} tag operations per request"
        )));
    }

    for tag_ref in req.attach.iter().chain(req.detach.iter()) {
        match (&tag_ref.tag_id, &tag_ref.tag) {
            (Some(_), _) => {}
            (None, Some(name)) => {
                normalize_tag_name(name)?;
            }
            (None, None) => {
                return Err(AppError::Validation(
                    "Each tag needs a tagId or a tag name".into(),
                ))
            }
        }
    }
    Ok(())
}

async fn owned_tag_by_id(conn: &mut PgConnection, user_id: Uuid, tag_id: Uuid) -> AppResult<Uuid> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM tags WHERE id = $1 AND user_id = $2")
        .bind(tag_id)
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Tag not found".into()))
}

async fn owned_tag_by_name(
    conn: &mut PgConnection,
    user_id: Uuid,
    name: &str,
) -> AppResult<Option<Uuid>> {
    let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM tags WHERE user_id = $1 AND name = $2")
        .bind(user_id)
        .bind(name)
        .fetch_optional(conn)
        .await?;
    Ok(id)
}

/// Resolve a tag for attaching, creating it by name when absent.
async fn resolve_for_attach(
    conn: &mut PgConnection,
    user_id: Uuid,
    tag_ref: &TagRef,
) -> AppResult<Uuid> {
    if let Some(tag_id) = tag_ref.tag_id {
        return owned_tag_by_id(conn, user_id, tag_id).await;
    }

    let name = normalize_tag_name(tag_ref.tag.as_deref().unwrap_or_default())?;

    // DO UPDATE (a no-op) instead of DO NOTHING so RETURNING yields the
    // existing row's id.
    let id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO tags (user_id, name)
         VALUES ($1, $2)
         ON CONFLICT (user_id, name) DO UPDATE SET name = EXCLUDED.name
         RETURNING id",
    )
    .bind(user_id)
    .bind(&name)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

async fn resolve_for_detach(
    conn: &mut PgConnection,
    user_id: Uuid,
    tag_ref: &TagRef,
) -> AppResult<Uuid> {
    if let Some(tag_id) = tag_ref.tag_id {
        return owned_tag_by_id(conn, user_id, tag_id).await;
    }

    let name = normalize_tag_name(tag_ref.tag.as_deref().unwrap_or_default())?;
    owned_tag_by_name(conn, user_id, &name)
        .await?
        .ok_or_else(|| AppError::NotFound("Tag not found".into()))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/tags
///
/// The caller's tags with how many links carry each.
pub async fn list_tags(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<TagListResponse>> {
    let tags = sqlx::query_as::<_, TagDto>(
        "SELECT t.id, t.name, COUNT(tl.link_id) AS count
         FROM tags t
         LEFT JOIN tags_on_links tl ON tl.tag_id = t.id
         WHERE t.user_id = $1
         GROUP BY t.id, t.name
         ORDER BY t.name",
    )
    .bind(auth.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(TagListResponse { tags }))
}

/// POST /api/v1/links/:id/tags
///
/// Attach and detach tags on one of the caller's links in a single
/// transaction. Attaching an already-attached tag is a no-op; detach runs
/// after attach, so a tag named in both ends up detached.
pub async fn update_link_tags(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(link_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateTagsRequest>,
) -> AppResult<Json<UpdateTagsResponse>> {
    validate_refs(&req)?;
    fetch_owned_link(&state.pool, link_id, auth.user_id).await?;

    let mut tx = state.pool.begin().await?;

    let mut attached = Vec::with_capacity(req.attach.len());
    for tag_ref in &req.attach {
        let tag_id = resolve_for_attach(&mut tx, auth.user_id, tag_ref).await?;

        sqlx::query(
            "INSERT INTO tags_on_links (link_id, tag_id, attached_by)
             VALUES ($1, $2, $3)
             ON CONFLICT (link_id, tag_id) DO NOTHING",
        )
        .bind(link_id)
        .bind(tag_id)
        .bind(AttachedBy::Human)
        .execute(&mut *tx)
        .await?;

        if !attached.contains(&tag_id) {
            attached.push(tag_id);
        }
    }

    let mut detached = Vec::with_capacity(req.detach.len());
    for tag_ref in &req.detach {
        let tag_id = resolve_for_detach(&mut tx, auth.user_id, tag_ref).await?;

        sqlx::query("DELETE FROM tags_on_links WHERE link_id = $1 AND tag_id = $2")
            .bind(link_id)
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;

        if !detached.contains(&tag_id) {
            detached.push(tag_id);
        }
    }

    tx.commit().await?;

    info!(
        link_id = %link_id,
        attached = attached.len(),
        detached = detached.len(),
        "Link tags updated"
    );

    Ok(Json(UpdateTagsResponse { attached, detached }))
}
