//! Synced document model.
//!
//! Documents are created and updated only by the sync engine. The content
//! token is the remote blob SHA; it changes exactly when the raw text
//! changed on the remote since the last successful fetch.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::pool::DbPool;
use crate::error::AppError;

/// A markdown document mirrored from the remote repository.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Local row ID.
    pub id: i64,

    /// Owning repository (FK to repositories).
    pub repository_id: i64,

    /// Path within the repository, unique per repository.
    pub path: String,

    /// Display name (file stem).
    pub display_name: String,

    /// Raw markdown text; None until first fetched.
    pub raw_text: Option<String>,

    /// Opaque content-version token from the remote source (blob SHA).
    pub content_token: Option<String>,

    /// Unix timestamp of the last update.
    pub updated_at: i64,
}

/// Derive a display name from a file path ("docs/intro-guide.md" -> "intro-guide").
pub fn display_name_for_path(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file)
        .to_string()
}

/// Look up a document by repository and path.
pub async fn get_document_by_path(
    pool: &DbPool,
    repository_id: i64,
    path: &str,
) -> Result<Option<Document>, AppError> {
    let doc = sqlx::query_as::<_, Document>(
        "SELECT * FROM documents WHERE repository_id = ? AND path = ?",
    )
    .bind(repository_id)
    .bind(path)
    .fetch_optional(pool)
    .await?;

    Ok(doc)
}

/// Look up a document by row ID.
pub async fn get_document(pool: &DbPool, id: i64) -> Result<Option<Document>, AppError> {
    let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(doc)
}

/// List all documents for a repository in path order.
pub async fn list_documents(
    pool: &DbPool,
    repository_id: i64,
) -> Result<Vec<Document>, AppError> {
    let docs = sqlx::query_as::<_, Document>(
        "SELECT * FROM documents WHERE repository_id = ? ORDER BY path",
    )
    .bind(repository_id)
    .fetch_all(pool)
    .await?;

    Ok(docs)
}

/// Count documents for a repository. Zero means the repository has never
/// completed a first sync, which selects the bulk strategy.
pub async fn count_documents(pool: &DbPool, repository_id: i64) -> Result<i64, AppError> {
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM documents WHERE repository_id = ?")
            .bind(repository_id)
            .fetch_one(pool)
            .await?;

    Ok(count.0)
}

/// Map of path -> content token for every document in a repository.
///
/// The incremental sync diffs the remote tree listing against this map to
/// decide which files need a content fetch.
pub async fn content_tokens_by_path(
    pool: &DbPool,
    repository_id: i64,
) -> Result<std::collections::HashMap<String, Option<String>>, AppError> {
    let rows: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT path, content_token FROM documents WHERE repository_id = ?")
            .bind(repository_id)
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().collect())
}

/// Insert a document or replace its text and token if the path exists.
/// Returns the document row ID.
pub async fn upsert_document(
    pool: &DbPool,
    repository_id: i64,
    path: &str,
    raw_text: &str,
    content_token: &str,
    updated_at: i64,
) -> Result<i64, AppError> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO documents (repository_id, path, display_name, raw_text, content_token, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(repository_id, path) DO UPDATE SET
            raw_text = excluded.raw_text,
            content_token = excluded.content_token,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(repository_id)
    .bind(path)
    .bind(display_name_for_path(path))
    .bind(raw_text)
    .bind(content_token)
    .bind(updated_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}
