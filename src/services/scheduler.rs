//! Adaptive review scheduler.
//!
//! Maintains one cached, ordered queue of sections awaiting review,
//! rebuilt when missing, exhausted, or older than the freshness window.
//! Priority is recency-based (never-reviewed sections outrank everything)
//! with favorite boosts, softened by a top-K shuffle and a weighted random
//! interleave of the favorite and regular lists.
//!
//! The scheduler is single reader/writer: callers hold `&mut` and never
//! run it concurrently with itself or with sync.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::section::{self, Section, SectionWithContext};
use crate::models::repository;
use crate::services::path_filter::PathRules;
use crate::services::review_history;
use crate::services::sectionizer::is_leaf;

/// Base score assigned to sections that have never been reviewed, placing
/// them ahead of anything reviewed in the last ~3 years.
const NEVER_REVIEWED_SCORE: f64 = 1000.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Scheduler tunables. Consumed as given; not validated beyond use.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerConfig {
    /// Score multiplier for sections the user favorited directly.
    pub favorite_boost: f64,

    /// Smaller multiplier for sections whose document path falls under a
    /// favorite folder.
    pub favorite_folder_boost: f64,

    /// Probability of drawing from the favorite list during interleaving.
    pub favorite_draw_probability: f64,

    /// Minimum trimmed body length in characters.
    pub min_content_length: usize,

    /// Sections whose non-blank body lines exceed this ratio of list-item
    /// syntax are dropped (table-of-contents heuristic).
    pub list_ratio_threshold: f64,

    /// Number of top-scoring entries to shuffle within each list.
    pub shuffle_top_k: usize,

    /// Time-to-live of the cached queue in seconds.
    pub cache_freshness_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            favorite_boost: 2.0,
            favorite_folder_boost: 1.5,
            favorite_draw_probability: 0.6,
            min_content_length: 40,
            list_ratio_threshold: 0.5,
            shuffle_top_k: 50,
            cache_freshness_secs: 30,
        }
    }
}

/// A scored candidate awaiting placement in the serving queue.
#[derive(Debug, Clone)]
struct Candidate {
    section: Section,
    score: f64,
    boosted: bool,
}

/// Review scheduler with a cached serving queue.
pub struct ReviewScheduler {
    pool: DbPool,
    config: SchedulerConfig,
    queue: VecDeque<Section>,
    rebuilt_at: Option<Instant>,
}

impl ReviewScheduler {
    /// Create a new scheduler.
    pub fn new(pool: DbPool, config: SchedulerConfig) -> Self {
        Self {
            pool,
            config,
            queue: VecDeque::new(),
            rebuilt_at: None,
        }
    }

    /// Number of sections currently queued.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drop the cached queue, forcing a rebuild on the next serve.
    pub fn invalidate(&mut self) {
        self.queue.clear();
        self.rebuilt_at = None;
    }

    /// Whether the cache must be rebuilt before serving.
    fn is_stale(&self, now: Instant) -> bool {
        if self.queue.is_empty() {
            return true;
        }
        match self.rebuilt_at {
            Some(at) => {
                now.duration_since(at) > Duration::from_secs(self.config.cache_freshness_secs)
            }
            None => true,
        }
    }

    /// Pop and return the next section to review.
    ///
    /// A missing, exhausted or expired queue triggers a synchronous
    /// rebuild first. Returns `Ok(None)` only when the rebuilt candidate
    /// set is itself empty; "nothing to review" is a normal outcome, not
    /// an error.
    pub async fn next_section(&mut self) -> Result<Option<Section>, AppError> {
        self.next_section_with(&mut rand::thread_rng()).await
    }

    /// As [`next_section`](Self::next_section), with a caller-supplied RNG.
    pub async fn next_section_with<R: Rng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Option<Section>, AppError> {
        if self.is_stale(Instant::now()) {
            self.rebuild(rng).await?;
        }

        Ok(self.queue.pop_front())
    }

    /// Rebuild the cached queue from storage.
    pub async fn rebuild<R: Rng>(&mut self, rng: &mut R) -> Result<(), AppError> {
        let now_ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let rules_by_repo: HashMap<i64, PathRules> = repository::list_repositories(&self.pool)
            .await?
            .iter()
            .map(|repo| (repo.id, PathRules::from(repo)))
            .collect();

        let rows = section::list_sections_with_context(&self.pool).await?;
        let last_reviewed = review_history::last_reviewed_map(&self.pool).await?;

        // 1. Filter by current path rules and the ignored flag
        let filtered: Vec<&SectionWithContext> = rows
            .iter()
            .filter(|row| {
                !row.section.ignored
                    && rules_by_repo
                        .get(&row.repository_id)
                        .map(|rules| rules.is_included(&row.document_path))
                        .unwrap_or(false)
            })
            .collect();

        // 2. Leaf reduction, falling back to the unreduced set when it
        //    would starve the queue
        let leaves = reduce_to_leaves(&filtered);
        let pool_set: &[&SectionWithContext] = if leaves.is_empty() { &filtered } else { &leaves };

        // 3. Content-quality filters
        let substantial: Vec<&&SectionWithContext> = pool_set
            .iter()
            .filter(|row| {
                let body = row.section.body.trim();
                body.chars().count() >= self.config.min_content_length
                    && list_line_ratio(body) <= self.config.list_ratio_threshold
            })
            .collect();

        // 4. Score, 5. split into boosted and regular
        let mut favorites: Vec<Candidate> = Vec::new();
        let mut regular: Vec<Candidate> = Vec::new();
        for row in substantial {
            let base = recency_score(now_ts, last_reviewed.get(&row.section.id).copied());
            let boost = if row.section.favorite {
                self.config.favorite_boost
            } else if rules_by_repo
                .get(&row.repository_id)
                .map(|rules| rules.is_favorite(&row.document_path))
                .unwrap_or(false)
            {
                self.config.favorite_folder_boost
            } else {
                1.0
            };

            let candidate = Candidate {
                section: row.section.clone(),
                score: base * boost,
                boosted: boost > 1.0,
            };
            if candidate.boosted {
                favorites.push(candidate);
            } else {
                regular.push(candidate);
            }
        }

        // 6. Sort descending and shuffle only the top K of each list
        order_with_top_shuffle(&mut favorites, self.config.shuffle_top_k, rng);
        order_with_top_shuffle(&mut regular, self.config.shuffle_top_k, rng);

        // 7. Weighted lossless interleave
        let merged = weighted_merge(
            favorites,
            regular,
            self.config.favorite_draw_probability,
            rng,
        );

        log::debug!("Rebuilt review queue with {} sections", merged.len());

        self.queue = merged.into_iter().map(|c| c.section).collect();
        self.rebuilt_at = Some(Instant::now());

        Ok(())
    }
}

/// Recency score: 1000 for never reviewed, otherwise fractional elapsed
/// days since the most recent review. Non-decreasing in elapsed time.
fn recency_score(now_ts: i64, last_reviewed_at: Option<i64>) -> f64 {
    match last_reviewed_at {
        None => NEVER_REVIEWED_SCORE,
        Some(last) => ((now_ts - last).max(0) as f64) / SECONDS_PER_DAY,
    }
}

/// Reduce to leaf sections: a section survives unless the next section of
/// the same document sits deeper than it.
fn reduce_to_leaves<'a>(rows: &[&'a SectionWithContext]) -> Vec<&'a SectionWithContext> {
    let mut leaves = Vec::new();

    let mut index = 0;
    while index < rows.len() {
        // Rows arrive grouped by document in order-index order
        let document_id = rows[index].section.document_id;
        let end = rows[index..]
            .iter()
            .position(|row| row.section.document_id != document_id)
            .map(|offset| index + offset)
            .unwrap_or(rows.len());

        let levels: Vec<u8> = rows[index..end]
            .iter()
            .map(|row| row.section.heading_level as u8)
            .collect();
        for (offset, row) in rows[index..end].iter().enumerate() {
            if is_leaf(&levels, offset) {
                leaves.push(*row);
            }
        }

        index = end;
    }

    leaves
}

/// Fraction of non-blank lines that are list-item syntax (bullets,
/// ordered items, or bare link lines). Zero for an empty body.
fn list_line_ratio(body: &str) -> f64 {
    let non_blank: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if non_blank.is_empty() {
        return 0.0;
    }

    let listish = non_blank.iter().filter(|line| is_list_line(line)).count();
    listish as f64 / non_blank.len() as f64
}

/// Whether a trimmed line is bullet, ordered-item or link syntax.
fn is_list_line(line: &str) -> bool {
    if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("+ ") {
        return true;
    }
    // Ordered items: digits then "." or ")" then a space
    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if rest.starts_with(". ") || rest.starts_with(") ") {
            return true;
        }
    }
    // Bare link lines
    line.starts_with('[') && line.contains("](")
}

/// Sort descending by score, then shuffle only the top `k` entries. The
/// remainder keeps its sorted order, adding variety without defeating the
/// priority ordering.
fn order_with_top_shuffle<R: Rng>(candidates: &mut [Candidate], k: usize, rng: &mut R) {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let top = k.min(candidates.len());
    candidates[..top].shuffle(rng);
}

/// Weighted random interleave of two lists: draw from `favorites` with
/// probability `p`, from `regular` otherwise, removing the drawn head;
/// drain the survivor once one list empties. Lossless and duplicate-free.
fn weighted_merge<R: Rng>(
    favorites: Vec<Candidate>,
    regular: Vec<Candidate>,
    p: f64,
    rng: &mut R,
) -> Vec<Candidate> {
    let mut favorites: VecDeque<Candidate> = favorites.into();
    let mut regular: VecDeque<Candidate> = regular.into();
    let mut merged = Vec::with_capacity(favorites.len() + regular.len());

    while !favorites.is_empty() && !regular.is_empty() {
        let from_favorites = rng.gen::<f64>() < p;
        let next = if from_favorites {
            favorites.pop_front()
        } else {
            regular.pop_front()
        };
        if let Some(candidate) = next {
            merged.push(candidate);
        }
    }

    merged.extend(favorites);
    merged.extend(regular);

    merged
}
