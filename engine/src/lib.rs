//! Keel Engine Library
//!
//! Core functionality of the `keel` binary: the feature pipeline, the task
//! router and the experience memory. Also used by the integration tests.

/// Configuration management module
pub mod config;

/// Retry with exponential backoff
pub mod retry;

/// Model backends and the task router
pub mod llm;

/// Experience memory store
pub mod memory;

/// Feature build pipeline
pub mod pipeline;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
