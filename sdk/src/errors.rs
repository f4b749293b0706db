//! Error types and handling
//!
//! This module provides the cross-crate error type used by the Keel engine for
//! configuration, persistence and CLI-level failures. All errors implement the
//! `KeelErrorExt` trait which provides user-friendly hints and indicates
//! whether errors are recoverable.
//!
//! # Security
//!
//! Hints are static strings. They never echo API keys, request bodies or
//! collaborator payloads back to the user.

use thiserror::Error;

/// Trait for Keel error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait KeelErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require a configuration change.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: SQLite operation failures
/// - **Backend**: Model endpoint failures, routing exhaustion
/// - **Collaborator**: Pipeline collaborator failures
/// - **Validation**: Malformed memory records
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, KeelErrorExt};
///
/// let error = EngineError::Validation("missing field `summary`".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::AllBackendsExhausted("code".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Backend routing errors
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("All backends exhausted for category {0}")]
    AllBackendsExhausted(String),

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    // Pipeline errors
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Pipeline stage {stage} failed: {reason}")]
    StageFailed { stage: String, reason: String },

    // Memory errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeelErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            // Database errors
            Self::Database(_) => "Memory database operation failed. Check the data directory",

            // Backend routing errors
            Self::Backend(_) => "Model backend unavailable. Check your API key and network",
            Self::AllBackendsExhausted(_) => {
                "No model backend answered. Check the routing table and API key"
            }
            Self::UnknownBackend(_) => "Routing table names a backend that is not configured",

            // Pipeline errors
            Self::Collaborator(_) => "A collaborator service failed. Check that it is running",
            Self::StageFailed { .. } => "The build pipeline stopped. See logs for the failing stage",

            // Memory errors
            Self::Validation(_) => "The record is missing a required field or has a bad value",

            // Network errors
            Self::Network(_) => "Network operation failed. Check your connection",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::AllBackendsExhausted(_)
            | Self::UnknownBackend(_)
            | Self::PathCanonicalization(_, _) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
