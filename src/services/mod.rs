pub mod github_client;
pub mod path_filter;
pub mod review_history;
pub mod scheduler;
pub mod sectionizer;
pub mod sync_engine;

pub use github_client::{GithubClient, GithubClientConfig, RemoteSource, TreeEntry};
pub use path_filter::PathRules;
pub use review_history::StudyStats;
pub use scheduler::{ReviewScheduler, SchedulerConfig};
pub use sectionizer::{split_sections, ParsedSection};
pub use sync_engine::{SyncEngine, SyncSummary};
