//! Services for mealscan-ai

pub mod inference;
pub mod job_manager;
pub mod partial_store;
pub mod retention;
pub mod upload_store;

pub use inference::{GeminiClient, InferenceService};
pub use job_manager::{JobError, JobManager};
pub use partial_store::PartialStore;
pub use retention::RetentionSweeper;
pub use upload_store::{UploadError, UploadStore, UploadedFile};
