//! Clipy Core - clipboard history engine
//!
//! Captures clipboard changes, persists them in SQLite (with a trigram FTS
//! index and a content-addressed image store), and maintains the grouped,
//! filtered projection a history UI renders.

pub mod blob_store;
pub mod config;
pub mod content_detection;
pub mod database;
pub mod history;
pub mod interface;
pub mod logging;
pub mod migration;
pub mod models;
pub mod monitor;
pub mod privacy;
mod store;

pub use config::HistoryConfig;
pub use history::{DateBucket, DateSection, HistoryProjection, HistoryService};
pub use interface::*;
pub use models::QueryMatcher;
pub use monitor::{ClipboardMonitor, MemoryClipboard, TickOutcome};
pub use privacy::{PrivacyFilter, PrivacySettings};
pub use store::{ClipboardStore, SEARCH_RESULT_LIMIT};
