//! Tracked repository model.
//!
//! A repository is the unit of synchronization: one GitHub repo whose
//! markdown documents are mirrored locally. Path preference lists
//! (include/exclude/favorites) are stored as JSON strings in SQLite and
//! parsed on access.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::pool::DbPool;
use crate::error::AppError;

/// A tracked remote repository.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Local row ID.
    pub id: i64,

    /// Repository owner (user or organization).
    pub owner: String,

    /// Repository name.
    pub name: String,

    /// Web URL of the repository.
    pub remote_url: String,

    /// Default branch to sync from.
    pub default_branch: String,

    /// JSON array of include path prefixes.
    pub include_paths: String,

    /// JSON array of exclude path prefixes.
    pub exclude_paths: String,

    /// JSON array of favorite path prefixes.
    pub favorite_paths: String,

    /// Unix timestamp of the last fully successful sync.
    pub last_synced_at: Option<i64>,
}

impl Repository {
    /// `owner/name` slug.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Parse include paths from JSON string.
    pub fn include_paths_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.include_paths).unwrap_or_default()
    }

    /// Parse exclude paths from JSON string.
    pub fn exclude_paths_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.exclude_paths).unwrap_or_default()
    }

    /// Parse favorite paths from JSON string.
    pub fn favorite_paths_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.favorite_paths).unwrap_or_default()
    }
}

/// Insert a new tracked repository and return its row ID.
pub async fn insert_repository(
    pool: &DbPool,
    owner: &str,
    name: &str,
    remote_url: &str,
    default_branch: &str,
) -> Result<i64, AppError> {
    if owner.trim().is_empty() || name.trim().is_empty() {
        return Err(AppError::invalid_input_field(
            "Repository owner and name must be non-empty",
            "owner/name",
        ));
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO repositories (owner, name, remote_url, default_branch) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(owner)
    .bind(name)
    .bind(remote_url)
    .bind(default_branch)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Look up a repository by row ID.
pub async fn get_repository(pool: &DbPool, id: i64) -> Result<Option<Repository>, AppError> {
    let repo = sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(repo)
}

/// List all tracked repositories.
pub async fn list_repositories(pool: &DbPool) -> Result<Vec<Repository>, AppError> {
    let repos =
        sqlx::query_as::<_, Repository>("SELECT * FROM repositories ORDER BY owner, name")
            .fetch_all(pool)
            .await?;

    Ok(repos)
}

/// Update the path preference lists (include/exclude/favorites).
pub async fn update_path_preferences(
    pool: &DbPool,
    id: i64,
    include_paths: &[String],
    exclude_paths: &[String],
    favorite_paths: &[String],
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE repositories SET include_paths = ?, exclude_paths = ?, favorite_paths = ? WHERE id = ?",
    )
    .bind(serde_json::to_string(include_paths)?)
    .bind(serde_json::to_string(exclude_paths)?)
    .bind(serde_json::to_string(favorite_paths)?)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a fully successful sync pass.
pub async fn touch_last_synced(pool: &DbPool, id: i64, timestamp: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE repositories SET last_synced_at = ? WHERE id = ?")
        .bind(timestamp)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete a repository; documents, sections and review events cascade away.
pub async fn delete_repository(pool: &DbPool, id: i64) -> Result<(), AppError> {
    sqlx::query("DELETE FROM repositories WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
