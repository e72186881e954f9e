//! Review event model.
//!
//! Events are immutable once created; the only delete is the full progress
//! reset (plus the cascade when sections are replaced during sync).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::pool::DbPool;
use crate::error::AppError;

/// Smallest accepted review quality value.
pub const MIN_QUALITY: i64 = 0;

/// Largest accepted review quality value.
pub const MAX_QUALITY: i64 = 5;

/// One recorded review of a section.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvent {
    /// Local row ID.
    pub id: i64,

    /// Reviewed section (FK to sections).
    pub section_id: i64,

    /// Quality rating, 0-5.
    pub quality: i64,

    /// Unix timestamp of the review.
    pub reviewed_at: i64,
}

/// Append a review event.
pub async fn insert_review_event(
    pool: &DbPool,
    section_id: i64,
    quality: i64,
    reviewed_at: i64,
) -> Result<i64, AppError> {
    if !(MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
        return Err(AppError::invalid_input_field(
            format!("Quality must be between {} and {}", MIN_QUALITY, MAX_QUALITY),
            "quality",
        ));
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO review_events (section_id, quality, reviewed_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(section_id)
    .bind(quality)
    .bind(reviewed_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// List events for a section, most recent first.
pub async fn list_events_for_section(
    pool: &DbPool,
    section_id: i64,
) -> Result<Vec<ReviewEvent>, AppError> {
    let events = sqlx::query_as::<_, ReviewEvent>(
        "SELECT * FROM review_events WHERE section_id = ? ORDER BY reviewed_at DESC",
    )
    .bind(section_id)
    .fetch_all(pool)
    .await?;

    Ok(events)
}

/// Full progress reset: delete every review event.
pub async fn delete_all_review_events(pool: &DbPool) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM review_events").execute(pool).await?;
    Ok(result.rows_affected())
}
