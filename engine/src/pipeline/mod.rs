//! Feature build pipeline
//!
//! Sequences the five collaborator roles over one feature request, feeding
//! each stage the outputs of the ones before it and the lessons recalled from
//! memory.

pub mod collaborator;
pub mod orchestrator;
pub mod report;
pub mod research;
pub mod stages;

pub use collaborator::{normalize_for_role, Collaborator, CollaboratorError, HttpCollaborator};
pub use orchestrator::{
    FeatureBuild, FeatureRequest, Orchestrator, PipelineError, PipelineFailure, RecordOutcome,
};
pub use research::{research_library, LibraryResearch};
pub use stages::{Stage, DEFAULT_STACK};
