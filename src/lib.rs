//! Local-first markdown study system.
//!
//! Mirrors markdown documents from a remote GitHub repository into a local
//! SQLite database, splits them into heading-bounded sections, and serves
//! sections for review ordered by recency-based priority with weighted
//! randomization.
//!
//! The main entry points:
//!
//! - [`db::initialize`] opens the database and applies migrations.
//! - [`services::SyncEngine`] runs bulk or incremental content sync
//!   against a [`services::RemoteSource`] such as [`services::GithubClient`].
//! - [`services::ReviewScheduler`] serves the next section to review.
//! - [`services::review_history`] records reviews and computes statistics.

pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use error::AppError;
