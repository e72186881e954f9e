//! Content synchronization engine.
//!
//! Operates per repository, choosing one of two strategies:
//!
//! - **Bulk first sync** when no documents exist locally: one compressed
//!   snapshot of the branch is downloaded and expanded, trading one large
//!   transfer for many small ones.
//! - **Incremental sync** otherwise: one recursive tree listing, then a
//!   per-file token comparison. Files whose content-version token matches
//!   the stored document are skipped without any content fetch.
//!
//! Each file's upsert commits in its own transaction; there is no
//! cross-file rollback. A failure aborts the pass for the current
//! repository and propagates, leaving already-committed files in place.
//! The repository's last-sync timestamp advances only after a clean pass.

use std::io::{Cursor, Read};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::{document, repository};
use crate::services::github_client::{RemoteSource, TreeEntry};
use crate::services::path_filter::PathRules;
use crate::services::sectionizer::split_sections;

/// File extensions recognized as markdown documents.
const MARKDOWN_EXTENSIONS: [&str; 2] = ["md", "markdown"];

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Whether a path carries a recognized markdown extension.
fn is_markdown_path(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Result of one sync pass over a repository.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncSummary {
    /// Candidate markdown files considered after path filtering.
    pub files_scanned: i64,

    /// Files fetched, parsed and upserted.
    pub files_synced: i64,

    /// Files skipped because their content token was unchanged.
    pub files_skipped: i64,

    /// Duration of the pass in milliseconds.
    pub duration_ms: i64,
}

/// Content synchronization engine.
///
/// Constructed with an injected pool and handed a remote source per call;
/// holds no global state.
pub struct SyncEngine {
    pool: DbPool,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Synchronize one repository with its remote source.
    ///
    /// `progress` receives a monotonically increasing fraction in [0, 1],
    /// for display only.
    pub async fn sync_repository(
        &self,
        source: &dyn RemoteSource,
        repository_id: i64,
        progress: &mut dyn FnMut(f64),
    ) -> Result<SyncSummary, AppError> {
        let start = Instant::now();

        let repo = repository::get_repository(&self.pool, repository_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found_with_id("Repository", repository_id.to_string())
            })?;
        let rules = PathRules::from(&repo);

        progress(0.0);

        let existing = document::count_documents(&self.pool, repository_id).await?;
        let mut summary = if existing == 0 {
            log::info!("First sync for {}: bulk snapshot", repo.full_name());
            self.bulk_sync(source, &repo, &rules, progress).await?
        } else {
            log::info!("Incremental sync for {}", repo.full_name());
            self.incremental_sync(source, &repo, &rules, progress).await?
        };

        // Only a fully clean pass advances the consistency boundary
        repository::touch_last_synced(&self.pool, repository_id, now()).await?;
        progress(1.0);

        summary.duration_ms = start.elapsed().as_millis() as i64;
        log::info!(
            "Synced {}: {} scanned, {} synced, {} skipped in {}ms",
            repo.full_name(),
            summary.files_scanned,
            summary.files_synced,
            summary.files_skipped,
            summary.duration_ms
        );

        Ok(summary)
    }

    /// Bulk strategy: expand one branch snapshot and upsert every
    /// surviving markdown file. Used only when local storage is empty for
    /// the repository.
    async fn bulk_sync(
        &self,
        source: &dyn RemoteSource,
        repo: &repository::Repository,
        rules: &PathRules,
        progress: &mut dyn FnMut(f64),
    ) -> Result<SyncSummary, AppError> {
        let branch = source.default_branch().await?;

        // One tree listing alongside the snapshot so documents get their
        // content-version tokens on first sync; without them the next
        // incremental pass would refetch every file
        let tokens: std::collections::HashMap<String, String> = source
            .list_tree(&branch)
            .await?
            .into_iter()
            .filter(|entry| entry.is_blob())
            .map(|entry| (entry.path, entry.sha))
            .collect();

        let snapshot = source.fetch_snapshot(&branch).await?;
        let files = expand_snapshot(&snapshot, rules)?;

        let mut summary = SyncSummary {
            files_scanned: files.len() as i64,
            ..Default::default()
        };

        let total = files.len().max(1);
        for (index, (path, content)) in files.iter().enumerate() {
            let token = tokens.get(path).map(String::as_str).unwrap_or("");
            self.upsert_file(repo.id, path, content, token).await?;
            summary.files_synced += 1;
            progress((index + 1) as f64 / total as f64);
        }

        Ok(summary)
    }

    /// Incremental strategy: diff the remote tree listing against stored
    /// content tokens; fetch content only for changed or new files.
    async fn incremental_sync(
        &self,
        source: &dyn RemoteSource,
        repo: &repository::Repository,
        rules: &PathRules,
        progress: &mut dyn FnMut(f64),
    ) -> Result<SyncSummary, AppError> {
        let entries = source.list_tree(&repo.default_branch).await?;
        let candidates: Vec<TreeEntry> = entries
            .into_iter()
            .filter(|entry| {
                entry.is_blob() && is_markdown_path(&entry.path) && rules.is_included(&entry.path)
            })
            .collect();

        let stored = document::content_tokens_by_path(&self.pool, repo.id).await?;

        let mut summary = SyncSummary {
            files_scanned: candidates.len() as i64,
            ..Default::default()
        };

        let total = candidates.len().max(1);
        for (index, entry) in candidates.iter().enumerate() {
            let unchanged = stored
                .get(&entry.path)
                .and_then(|token| token.as_deref())
                .map(|token| token == entry.sha)
                .unwrap_or(false);

            if unchanged {
                // Must never fetch content for an unchanged token
                summary.files_skipped += 1;
            } else {
                let content = source
                    .fetch_file(&entry.path, &repo.default_branch)
                    .await?;
                self.upsert_file(repo.id, &entry.path, &content, &entry.sha)
                    .await?;
                summary.files_synced += 1;
            }

            progress((index + 1) as f64 / total as f64);
        }

        Ok(summary)
    }

    /// Upsert one file: replace the document's text and token, delete its
    /// existing sections (cascading away their review events), and insert
    /// the fresh parse. Commits as one self-contained transaction.
    async fn upsert_file(
        &self,
        repository_id: i64,
        path: &str,
        content: &str,
        token: &str,
    ) -> Result<(), AppError> {
        let parsed = split_sections(content);

        let mut tx = self.pool.begin().await?;

        let document_id: i64 = sqlx::query_scalar(
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
        .bind(document::display_name_for_path(path))
        .bind(content)
        .bind(token)
        .bind(now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM sections WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for section in &parsed {
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
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        log::debug!("Upserted {} ({} sections)", path, parsed.len());

        Ok(())
    }
}

/// Expand a branch snapshot (zip archive) into `(path, content)` pairs for
/// every markdown file passing the path rules.
///
/// Snapshot entries are prefixed with a `owner-repo-sha/` directory; the
/// prefix is stripped before filtering.
fn expand_snapshot(bytes: &[u8], rules: &PathRules) -> Result<Vec<(String, String)>, AppError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut files = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let Some(path) = strip_snapshot_prefix(entry.name()) else {
            continue;
        };
        if !is_markdown_path(&path) || !rules.is_included(&path) {
            continue;
        }

        let mut raw = Vec::new();
        entry.read_to_end(&mut raw)?;
        let content = String::from_utf8_lossy(&raw).into_owned();
        files.push((path, content));
    }

    // Deterministic processing order regardless of archive layout
    files.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(files)
}

/// Drop the snapshot's single top-level directory from an entry name.
fn strip_snapshot_prefix(name: &str) -> Option<String> {
    name.split_once('/')
        .map(|(_, rest)| rest.to_string())
        .filter(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{repository, section};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// In-memory remote source for sync tests.
    struct MockSource {
        branch: String,
        /// path -> (sha, content)
        files: HashMap<String, (String, String)>,
        fetch_calls: AtomicUsize,
        /// Paths whose fetch fails with a network error.
        fail_paths: Vec<String>,
    }

    impl MockSource {
        fn new(files: &[(&str, &str, &str)]) -> Self {
            Self {
                branch: "main".to_string(),
                files: files
                    .iter()
                    .map(|(path, sha, content)| {
                        (path.to_string(), (sha.to_string(), content.to_string()))
                    })
                    .collect(),
                fetch_calls: AtomicUsize::new(0),
                fail_paths: Vec::new(),
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteSource for MockSource {
        async fn default_branch(&self) -> Result<String, AppError> {
            Ok(self.branch.clone())
        }

        async fn list_tree(&self, _branch: &str) -> Result<Vec<TreeEntry>, AppError> {
            let mut entries: Vec<TreeEntry> = self
                .files
                .iter()
                .map(|(path, (sha, content))| TreeEntry {
                    path: path.clone(),
                    kind: "blob".to_string(),
                    sha: sha.clone(),
                    size: Some(content.len() as i64),
                })
                .collect();
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(entries)
        }

        async fn fetch_file(&self, path: &str, _reference: &str) -> Result<String, AppError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_paths.iter().any(|p| p == path) {
                return Err(AppError::network("connection reset"));
            }
            self.files
                .get(path)
                .map(|(_, content)| content.clone())
                .ok_or_else(|| AppError::not_found_with_id("Remote resource", path))
        }

        async fn fetch_snapshot(&self, _branch: &str) -> Result<Vec<u8>, AppError> {
            let cursor = Cursor::new(Vec::new());
            let mut writer = zip::ZipWriter::new(cursor);
            let options = zip::write::SimpleFileOptions::default();

            let mut paths: Vec<&String> = self.files.keys().collect();
            paths.sort();
            for path in paths {
                let (_, content) = &self.files[path];
                writer
                    .start_file(format!("owner-repo-abc123/{}", path), options)
                    .unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }

            Ok(writer.finish().unwrap().into_inner())
        }
    }

    async fn setup_repo() -> (DbPool, i64) {
        // keep() persists the dir; dropping the TempDir guard here would
        // delete the db file while the pool still opens new connections to it
        let dir = tempdir().unwrap().keep();
        let pool = db::initialize(&dir.join("test.db")).await.unwrap();
        let repo_id =
            repository::insert_repository(&pool, "o", "r", "https://github.com/o/r", "main")
                .await
                .unwrap();
        (pool, repo_id)
    }

    fn no_progress() -> impl FnMut(f64) {
        |_| {}
    }

    #[test]
    fn test_is_markdown_path() {
        assert!(is_markdown_path("a.md"));
        assert!(is_markdown_path("docs/guide.markdown"));
        assert!(is_markdown_path("UPPER.MD"));
        assert!(!is_markdown_path("a.txt"));
        assert!(!is_markdown_path("no-extension"));
        assert!(!is_markdown_path("archive.md.zip"));
    }

    #[test]
    fn test_strip_snapshot_prefix() {
        assert_eq!(
            strip_snapshot_prefix("owner-repo-abc/docs/a.md").as_deref(),
            Some("docs/a.md")
        );
        // Top-level directory entry itself has no inner path
        assert_eq!(strip_snapshot_prefix("owner-repo-abc/"), None);
        assert_eq!(strip_snapshot_prefix("no-prefix"), None);
    }

    #[tokio::test]
    async fn test_bulk_sync_populates_documents_and_sections() {
        let (pool, repo_id) = setup_repo().await;
        let source = MockSource::new(&[
            ("notes/a.md", "sha-a", "# One\nbody\n## Two\nmore"),
            ("notes/b.md", "sha-b", "# Only\ntext"),
            ("src/main.rs", "sha-c", "fn main() {}"),
        ]);

        let engine = SyncEngine::new(pool.clone());
        let summary = engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await
            .unwrap();

        // Non-markdown file excluded
        assert_eq!(summary.files_scanned, 2);
        assert_eq!(summary.files_synced, 2);

        let docs = document::list_documents(&pool, repo_id).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].path, "notes/a.md");
        // Tokens recorded from the tree listing
        assert_eq!(docs[0].content_token.as_deref(), Some("sha-a"));

        let sections = section::list_sections_for_document(&pool, docs[0].id)
            .await
            .unwrap();
        assert_eq!(sections.len(), 2);

        let repo = repository::get_repository(&pool, repo_id).await.unwrap().unwrap();
        assert!(repo.last_synced_at.is_some());
        // Bulk path never fetches individual files
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_incremental_skips_unchanged_tokens() {
        let (pool, repo_id) = setup_repo().await;
        let source = MockSource::new(&[
            ("a.md", "sha-a", "# A\nbody"),
            ("b.md", "sha-b", "# B\nbody"),
        ]);

        let engine = SyncEngine::new(pool.clone());
        engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await
            .unwrap();
        assert_eq!(source.fetch_count(), 0);

        // Second pass: nothing changed, so zero content fetches
        let summary = engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await
            .unwrap();
        assert_eq!(summary.files_skipped, 2);
        assert_eq!(summary.files_synced, 0);
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_incremental_refetches_changed_and_new() {
        let (pool, repo_id) = setup_repo().await;
        let mut source = MockSource::new(&[("a.md", "sha-a1", "# A\nold")]);

        let engine = SyncEngine::new(pool.clone());
        engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await
            .unwrap();

        // Change a.md and add c.md
        source.files.insert(
            "a.md".to_string(),
            ("sha-a2".to_string(), "# A\nnew\n# Extra\nmore".to_string()),
        );
        source.files.insert(
            "c.md".to_string(),
            ("sha-c".to_string(), "# C\nbody".to_string()),
        );

        let summary = engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await
            .unwrap();
        assert_eq!(summary.files_synced, 2);
        assert_eq!(summary.files_skipped, 0);
        assert_eq!(source.fetch_count(), 2);

        // Changed document carries exactly the fresh parse, no stale rows
        let doc = document::get_document_by_path(&pool, repo_id, "a.md")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.content_token.as_deref(), Some("sha-a2"));
        assert_eq!(
            section::count_sections_for_document(&pool, doc.id).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_resync_discards_review_events_with_sections() {
        let (pool, repo_id) = setup_repo().await;
        let mut source = MockSource::new(&[("a.md", "v1", "# A\nbody")]);

        let engine = SyncEngine::new(pool.clone());
        engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await
            .unwrap();

        let doc = document::get_document_by_path(&pool, repo_id, "a.md")
            .await
            .unwrap()
            .unwrap();
        let section_id = section::list_sections_for_document(&pool, doc.id).await.unwrap()[0].id;
        sqlx::query("INSERT INTO review_events (section_id, quality, reviewed_at) VALUES (?, 4, 100)")
            .bind(section_id)
            .execute(&pool)
            .await
            .unwrap();

        source
            .files
            .insert("a.md".to_string(), ("v2".to_string(), "# A\nchanged".to_string()));
        engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await
            .unwrap();

        let events: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM review_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(events.0, 0);
    }

    #[tokio::test]
    async fn test_path_rules_applied_during_sync() {
        let (pool, repo_id) = setup_repo().await;
        repository::update_path_preferences(
            &pool,
            repo_id,
            &[],
            &["drafts".to_string()],
            &[],
        )
        .await
        .unwrap();

        let source = MockSource::new(&[
            ("drafts/x.md", "s1", "# Draft\nbody"),
            ("notes/x.md", "s2", "# Note\nbody"),
        ]);

        let engine = SyncEngine::new(pool.clone());
        let summary = engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await
            .unwrap();

        assert_eq!(summary.files_synced, 1);
        assert!(document::get_document_by_path(&pool, repo_id, "drafts/x.md")
            .await
            .unwrap()
            .is_none());
        assert!(document::get_document_by_path(&pool, repo_id, "notes/x.md")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_failure_aborts_but_keeps_committed_files() {
        let (pool, repo_id) = setup_repo().await;
        let mut source = MockSource::new(&[("a.md", "v1", "# A\nbody")]);

        let engine = SyncEngine::new(pool.clone());
        engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await
            .unwrap();
        let first_sync_at = repository::get_repository(&pool, repo_id)
            .await
            .unwrap()
            .unwrap()
            .last_synced_at;

        // Both files change; b.md fails mid-pass
        source
            .files
            .insert("a.md".to_string(), ("v2".to_string(), "# A\nnew".to_string()));
        source
            .files
            .insert("b.md".to_string(), ("v1".to_string(), "# B\nbody".to_string()));
        source.fail_paths.push("b.md".to_string());

        let result = engine
            .sync_repository(&source, repo_id, &mut no_progress())
            .await;
        assert!(matches!(result, Err(AppError::Network { .. })));

        // a.md committed before the failure stays committed
        let doc = document::get_document_by_path(&pool, repo_id, "a.md")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.content_token.as_deref(), Some("v2"));

        // The consistency boundary did not advance
        let repo = repository::get_repository(&pool, repo_id).await.unwrap().unwrap();
        assert_eq!(repo.last_synced_at, first_sync_at);
    }

    #[tokio::test]
    async fn test_progress_is_monotone_within_unit_interval() {
        let (pool, repo_id) = setup_repo().await;
        let source = MockSource::new(&[
            ("a.md", "s1", "# A\nx"),
            ("b.md", "s2", "# B\nx"),
            ("c.md", "s3", "# C\nx"),
        ]);

        let engine = SyncEngine::new(pool.clone());
        let mut seen: Vec<f64> = Vec::new();
        engine
            .sync_repository(&source, repo_id, &mut |fraction| seen.push(fraction))
            .await
            .unwrap();

        assert!(!seen.is_empty());
        assert_eq!(*seen.first().unwrap(), 0.0);
        assert_eq!(*seen.last().unwrap(), 1.0);
        for pair in seen.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(seen.iter().all(|f| (0.0..=1.0).contains(f)));
    }

    #[tokio::test]
    async fn test_missing_repository_is_not_found() {
        let (pool, _) = setup_repo().await;
        let source = MockSource::new(&[]);
        let engine = SyncEngine::new(pool);

        let result = engine
            .sync_repository(&source, 9999, &mut no_progress())
            .await;
        assert!(matches!(result, Err(AppError::NotFound { .. })));
    }
}
