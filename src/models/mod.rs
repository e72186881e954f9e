//! Data models for the application.
//!
//! These models represent the core entities stored in the local SQLite
//! database. All models derive Serialize for consumers and FromRow for
//! SQLx queries. Query functions live alongside their entity.

pub mod document;
pub mod repository;
pub mod review_event;
pub mod section;

// Re-exports for convenient access
pub use document::Document;
pub use repository::Repository;
pub use review_event::ReviewEvent;
pub use section::{Section, SectionWithContext};
