//! Integration tests for the ingestion pipeline.
//!
//! Run with: `cargo test --test integration`

mod git_smoke;
mod locking;
mod pipeline;
mod sealing;
