//! Review history queries.
//!
//! The review log is append-only: events are recorded by the "mark
//! reviewed" action and only ever bulk-deleted (progress reset) or removed
//! by the section cascade during re-sync. Calendar math uses the local
//! timezone, appropriate to a single-user, single-device process.

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, TimeZone};
use serde::Serialize;
use std::collections::HashSet;

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::review_event;

/// Record one review event for a section at the current time.
pub async fn record_review(
    pool: &DbPool,
    section_id: i64,
    quality: i64,
) -> Result<i64, AppError> {
    review_event::insert_review_event(pool, section_id, quality, Local::now().timestamp()).await
}

/// Unix timestamp of the most recent review event for a section.
pub async fn last_reviewed_at(
    pool: &DbPool,
    section_id: i64,
) -> Result<Option<i64>, AppError> {
    let ts: Option<(i64,)> = sqlx::query_as(
        "SELECT MAX(reviewed_at) FROM review_events WHERE section_id = ? HAVING COUNT(*) > 0",
    )
    .bind(section_id)
    .fetch_optional(pool)
    .await?;

    Ok(ts.map(|(t,)| t))
}

/// Most recent review timestamp for every reviewed section.
pub async fn last_reviewed_map(
    pool: &DbPool,
) -> Result<std::collections::HashMap<i64, i64>, AppError> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT section_id, MAX(reviewed_at) FROM review_events GROUP BY section_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Count of distinct sections reviewed within the calendar day of `now`.
pub async fn reviewed_today(pool: &DbPool, now: DateTime<Local>) -> Result<i64, AppError> {
    let day_start = start_of_day(now.date_naive());

    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT section_id) FROM review_events WHERE reviewed_at >= ? AND reviewed_at <= ?",
    )
    .bind(day_start)
    .bind(now.timestamp())
    .fetch_one(pool)
    .await?;

    Ok(count.0)
}

/// Current streak: consecutive calendar days, walking backward from the
/// day of `now`, each containing at least one event. Zero when the most
/// recent event is more than one day before today.
pub async fn current_streak(pool: &DbPool, now: DateTime<Local>) -> Result<i64, AppError> {
    let timestamps: Vec<(i64,)> = sqlx::query_as("SELECT reviewed_at FROM review_events")
        .fetch_all(pool)
        .await?;

    let days: HashSet<NaiveDate> = timestamps
        .iter()
        .filter_map(|(ts,)| Local.timestamp_opt(*ts, 0).single())
        .map(|dt| dt.date_naive())
        .collect();

    let Some(latest) = days.iter().max().copied() else {
        return Ok(0);
    };

    let today = now.date_naive();
    let yesterday = today.pred_opt().unwrap_or(today);
    if latest < yesterday {
        return Ok(0);
    }

    let mut streak = 0i64;
    let mut day = latest;
    while days.contains(&day) {
        streak += 1;
        let Some(previous) = day.pred_opt() else { break };
        day = previous;
    }

    Ok(streak)
}

/// Pull-based statistics snapshot for display.
#[derive(Debug, Clone, Serialize)]
pub struct StudyStats {
    /// Distinct sections reviewed today.
    pub reviewed_today: i64,

    /// Current streak in days.
    pub streak_days: i64,
}

/// Compute the statistics snapshot in one call.
pub async fn study_stats(pool: &DbPool, now: DateTime<Local>) -> Result<StudyStats, AppError> {
    Ok(StudyStats {
        reviewed_today: reviewed_today(pool, now).await?,
        streak_days: current_streak(pool, now).await?,
    })
}

/// Unix timestamp of local midnight for a date.
fn start_of_day(date: NaiveDate) -> i64 {
    Local
        .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

/// Local noon on a date as a timestamp, used by tests to place events
/// unambiguously inside a calendar day.
#[cfg(test)]
fn noon_of(date: NaiveDate) -> i64 {
    Local
        .with_ymd_and_hms(date.year(), date.month(), date.day(), 12, 0, 0)
        .single()
        .unwrap()
        .timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{document, repository, section};
    use crate::services::sectionizer::split_sections;
    use tempfile::tempdir;

    async fn setup_sections(count: usize) -> (DbPool, Vec<i64>) {
        // keep() persists the dir; dropping the TempDir guard here would
        // delete the db file while the pool still opens new connections to it
        let dir = tempdir().unwrap().keep();
        let pool = db::initialize(&dir.join("test.db")).await.unwrap();
        let repo_id =
            repository::insert_repository(&pool, "o", "r", "https://github.com/o/r", "main")
                .await
                .unwrap();
        let doc_id = document::upsert_document(&pool, repo_id, "a.md", "", "sha", 1)
            .await
            .unwrap();

        let text = (0..count)
            .map(|i| format!("# S{}\nbody", i))
            .collect::<Vec<_>>()
            .join("\n");
        section::insert_parsed_sections(&pool, doc_id, &split_sections(&text))
            .await
            .unwrap();

        let ids = section::list_sections_for_document(&pool, doc_id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        (pool, ids)
    }

    fn local_noon(date: NaiveDate) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(date.year(), date.month(), date.day(), 12, 0, 0)
            .single()
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_and_last_reviewed() {
        let (pool, ids) = setup_sections(1).await;

        assert_eq!(last_reviewed_at(&pool, ids[0]).await.unwrap(), None);

        review_event::insert_review_event(&pool, ids[0], 3, 100).await.unwrap();
        review_event::insert_review_event(&pool, ids[0], 4, 200).await.unwrap();

        assert_eq!(last_reviewed_at(&pool, ids[0]).await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_reviewed_today_counts_distinct_sections() {
        let (pool, ids) = setup_sections(3).await;

        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let now = local_noon(today);

        // Two reviews of the same section count once
        review_event::insert_review_event(&pool, ids[0], 3, noon_of(today) - 3600)
            .await
            .unwrap();
        review_event::insert_review_event(&pool, ids[0], 4, noon_of(today) - 1800)
            .await
            .unwrap();
        review_event::insert_review_event(&pool, ids[1], 3, noon_of(today) - 60)
            .await
            .unwrap();
        // Yesterday's review does not count
        let yesterday = today.pred_opt().unwrap();
        review_event::insert_review_event(&pool, ids[2], 3, noon_of(yesterday))
            .await
            .unwrap();

        assert_eq!(reviewed_today(&pool, now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_streak_counts_consecutive_days() {
        let (pool, ids) = setup_sections(1).await;

        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        for offset in 0..3 {
            let day = today.checked_sub_days(Days::new(offset)).unwrap();
            review_event::insert_review_event(&pool, ids[0], 3, noon_of(day))
                .await
                .unwrap();
        }

        assert_eq!(current_streak(&pool, local_noon(today)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_streak_allows_yesterday_as_latest() {
        let (pool, ids) = setup_sections(1).await;

        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let yesterday = today.pred_opt().unwrap();
        let before = yesterday.pred_opt().unwrap();
        review_event::insert_review_event(&pool, ids[0], 3, noon_of(yesterday))
            .await
            .unwrap();
        review_event::insert_review_event(&pool, ids[0], 3, noon_of(before))
            .await
            .unwrap();

        assert_eq!(current_streak(&pool, local_noon(today)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_streak_broken_by_gap() {
        let (pool, ids) = setup_sections(1).await;

        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let two_days_ago = today.checked_sub_days(Days::new(2)).unwrap();
        review_event::insert_review_event(&pool, ids[0], 3, noon_of(two_days_ago))
            .await
            .unwrap();

        assert_eq!(current_streak(&pool, local_noon(today)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_streak_ignores_gap_further_back() {
        let (pool, ids) = setup_sections(1).await;

        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        review_event::insert_review_event(&pool, ids[0], 3, noon_of(today))
            .await
            .unwrap();
        // A lone event four days ago is not part of the run
        let old = today.checked_sub_days(Days::new(4)).unwrap();
        review_event::insert_review_event(&pool, ids[0], 3, noon_of(old))
            .await
            .unwrap();

        assert_eq!(current_streak(&pool, local_noon(today)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_history() {
        let (pool, _ids) = setup_sections(1).await;
        let now = local_noon(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());

        assert_eq!(reviewed_today(&pool, now).await.unwrap(), 0);
        assert_eq!(current_streak(&pool, now).await.unwrap(), 0);

        let stats = study_stats(&pool, now).await.unwrap();
        assert_eq!(stats.reviewed_today, 0);
        assert_eq!(stats.streak_days, 0);
    }

    #[tokio::test]
    async fn test_record_review_uses_current_time() {
        let (pool, ids) = setup_sections(1).await;

        let before = Local::now().timestamp();
        record_review(&pool, ids[0], 4).await.unwrap();
        let after = Local::now().timestamp();

        let ts = last_reviewed_at(&pool, ids[0]).await.unwrap().unwrap();
        assert!(ts >= before && ts <= after);
    }
}
