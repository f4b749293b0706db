//! Keel SDK
//!
//! Shared library providing error types and the collaborator wire contract.
//! This crate is used by the engine and by anything that speaks to the
//! collaborator services.

/// Error types and handling
pub mod errors;

/// Collaborator request/response types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, KeelErrorExt};
pub use types::{normalize_result, CollaboratorRole, ToolCallRequest, ToolCallResponse};
