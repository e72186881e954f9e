//! Path include/exclude/favorite rules.
//!
//! Shared by both sync strategies and by the scheduler's filter pass. A
//! path is included if it exactly matches or is nested under any include
//! entry; an empty include list includes everything by default. Exclude
//! entries remove paths the same way, except that an explicit include
//! match takes priority over an exclude match.

use serde::{Deserialize, Serialize};

/// Reserved include-list entry meaning "include nothing". Written when a
/// user deselects every path in a hierarchical picker, which is distinct
/// from an empty list (= include all).
pub const SELECT_NONE: &str = "__none__";

/// Per-repository path rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathRules {
    /// Include path prefixes. Empty means include all.
    pub includes: Vec<String>,

    /// Exclude path prefixes.
    pub excludes: Vec<String>,

    /// Favorite path prefixes (folder-level boost, not filtering).
    pub favorites: Vec<String>,
}

/// Whether `path` equals `prefix` or sits nested under it.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

impl PathRules {
    pub fn new(includes: Vec<String>, excludes: Vec<String>, favorites: Vec<String>) -> Self {
        Self {
            includes,
            excludes,
            favorites,
        }
    }

    /// Evaluate the include/exclude rules for one path.
    pub fn is_included(&self, path: &str) -> bool {
        if self.includes.iter().any(|entry| entry == SELECT_NONE) {
            return false;
        }

        let explicitly_included = self
            .includes
            .iter()
            .any(|entry| matches_prefix(path, entry));

        // Explicit include wins over any exclude match
        if explicitly_included {
            return true;
        }

        if !self.includes.is_empty() {
            return false;
        }

        !self.excludes.iter().any(|entry| matches_prefix(path, entry))
    }

    /// Whether the path falls under any favorite path prefix.
    pub fn is_favorite(&self, path: &str) -> bool {
        self.favorites.iter().any(|entry| matches_prefix(path, entry))
    }
}

impl From<&crate::models::Repository> for PathRules {
    fn from(repo: &crate::models::Repository) -> Self {
        Self::new(
            repo.include_paths_vec(),
            repo.exclude_paths_vec(),
            repo.favorite_paths_vec(),
        )
    }
}
