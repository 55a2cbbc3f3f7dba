//! Data models for mealscan-ai

pub mod history;
pub mod job;
pub mod partial;

pub use history::HistorySummary;
pub use job::{Job, JobManifest};
pub use partial::PartialRecord;
