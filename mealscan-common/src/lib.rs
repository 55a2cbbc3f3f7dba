//! # Mealscan Common Library
//!
//! Shared code for the mealscan services:
//! - Common error type
//! - Bootstrap configuration loading and root folder resolution
//! - Server-Sent Events wire encoding
//! - Timestamp and duration helpers

pub mod config;
pub mod error;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use sse::SseFrame;
