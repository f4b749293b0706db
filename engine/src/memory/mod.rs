//! Experience memory
//!
//! Durable incident records and architectural decisions, plus the derived
//! views built from them: lesson bundles, consolidated meta-rules and stats.
//! Storage sits behind [`ExperienceStore`]; all policy lives in
//! [`MemoryService`].

use sdk::errors::EngineError;

pub mod maintenance;
pub mod patterns;
pub mod service;
pub mod similarity;
pub mod sqlite;
pub mod store;
pub mod types;

pub use patterns::LessonPattern;
pub use service::{LessonsQuery, MaintenanceReport, MemoryService};
pub use sqlite::SqliteStore;
pub use store::{ExperienceStore, InMemoryStore};
pub use types::{
    ConsolidatedLesson, Decision, DecisionRecord, DecisionType, DeduplicationResult, ErrorType,
    Experience, ExperienceRecord, Lesson, LessonsBundle, MemoryStats, PruningResult, Severity,
};

/// Errors raised by the memory layer
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for MemoryError {
    fn from(err: sqlx::Error) -> Self {
        MemoryError::Storage(err.to_string())
    }
}

impl From<MemoryError> for EngineError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Validation(msg) => EngineError::Validation(msg),
            other => EngineError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
