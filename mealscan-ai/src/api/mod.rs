//! HTTP API handlers for mealscan-ai
//!
//! Upload + stream (job based), blocking analysis, progress polling, history.

pub mod analyze;
pub mod health;
pub mod history;
pub mod sse;
pub mod status;
pub mod upload;

pub use analyze::analyze_routes;
pub use health::health_routes;
pub use history::history_routes;
pub use sse::stream_routes;
pub use status::status_routes;
pub use upload::upload_routes;
