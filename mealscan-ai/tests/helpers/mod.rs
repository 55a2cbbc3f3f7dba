//! Test Helper Utilities
//!
//! Shared utilities for testing mealscan-ai

#![allow(dead_code)]

pub mod scripted_inference;
pub mod test_app;

pub use scripted_inference::ScriptedInference;
pub use test_app::{multipart_body, read_body, TestApp, BOUNDARY};
