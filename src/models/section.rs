//! Section model.
//!
//! Sections are the reviewable units, produced by the sectionizer during
//! sync. Outside of sync, only the `ignored` and `favorite` flags mutate.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::services::sectionizer::ParsedSection;

/// One heading-bounded unit of a document.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Local row ID.
    pub id: i64,

    /// Owning document (FK to documents).
    pub document_id: i64,

    /// Heading title text.
    pub title: String,

    /// Body text between this heading and the next.
    pub body: String,

    /// Heading level, 1-6.
    pub heading_level: i64,

    /// Start line offset into the owning document's raw text.
    pub start_line: i64,

    /// End line offset (exclusive).
    pub end_line: i64,

    /// Position within the document, contiguous from 0.
    pub order_index: i64,

    /// Excluded from review scheduling when set.
    pub ignored: bool,

    /// User-set priority boost.
    pub favorite: bool,
}

/// Delete all sections of a document. Their review events cascade away.
pub async fn delete_sections_for_document(
    pool: &DbPool,
    document_id: i64,
) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM sections WHERE document_id = ?")
        .bind(document_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Insert a freshly parsed batch of sections for a document.
pub async fn insert_parsed_sections(
    pool: &DbPool,
    document_id: i64,
    parsed: &[ParsedSection],
) -> Result<(), AppError> {
    for section in parsed {
        sqlx::query(
            r#"
            INSERT INTO sections (document_id, title, body, heading_level, start_line, end_line, order_index)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(&section.title)
        .bind(&section.body)
        .bind(section.level as i64)
        .bind(section.start_line as i64)
        .bind(section.end_line as i64)
        .bind(section.order_index as i64)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Look up a section by row ID.
pub async fn get_section(pool: &DbPool, id: i64) -> Result<Option<Section>, AppError> {
    let section = sqlx::query_as::<_, Section>("SELECT * FROM sections WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(section)
}

/// List a document's sections in document order.
pub async fn list_sections_for_document(
    pool: &DbPool,
    document_id: i64,
) -> Result<Vec<Section>, AppError> {
    let sections = sqlx::query_as::<_, Section>(
        "SELECT * FROM sections WHERE document_id = ? ORDER BY order_index",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(sections)
}

/// Count sections for a document.
pub async fn count_sections_for_document(
    pool: &DbPool,
    document_id: i64,
) -> Result<i64, AppError> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sections WHERE document_id = ?")
        .bind(document_id)
        .fetch_one(pool)
        .await?;

    Ok(count.0)
}

/// Set or clear the ignored flag.
pub async fn set_ignored(pool: &DbPool, id: i64, ignored: bool) -> Result<(), AppError> {
    sqlx::query("UPDATE sections SET ignored = ? WHERE id = ?")
        .bind(ignored)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Set or clear the favorite flag.
pub async fn set_favorite(pool: &DbPool, id: i64, favorite: bool) -> Result<(), AppError> {
    sqlx::query("UPDATE sections SET favorite = ? WHERE id = ?")
        .bind(favorite)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// A section joined with the context the scheduler filters on: its
/// document path and owning repository.
#[derive(Debug, Clone, FromRow)]
pub struct SectionWithContext {
    #[sqlx(flatten)]
    pub section: Section,

    /// Path of the owning document.
    pub document_path: String,

    /// Owning repository ID.
    pub repository_id: i64,
}

/// All sections across all repositories, in document order, with their
/// document path and repository attached.
pub async fn list_sections_with_context(
    pool: &DbPool,
) -> Result<Vec<SectionWithContext>, AppError> {
    let rows = sqlx::query_as::<_, SectionWithContext>(
        r#"
        SELECT s.*, d.path AS document_path, d.repository_id AS repository_id
        FROM sections s
        JOIN documents d ON d.id = s.document_id
        ORDER BY d.repository_id, d.path, s.order_index
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
