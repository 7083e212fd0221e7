use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::BookmarkedLink,
};

/// Fetch a link owned by `user_id`.
///
/// Returns 404 (not 403) when the link belongs to someone else, so callers
/// cannot discover other users' link ids.
pub async fn fetch_owned_link(
    pool: &sqlx::PgPool,
    link_id: Uuid,
    user_id: Uuid,
) -> AppResult<BookmarkedLink> {
    sqlx::query_as::<_, BookmarkedLink>(
        "SELECT id, url, created_at, user_id
         FROM links WHERE id = $1 AND user_id = $2",
    )
    .bind(link_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Link not found".into()))
}
