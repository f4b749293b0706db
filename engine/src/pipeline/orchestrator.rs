//! Feature build orchestrator
//!
//! Runs one build as a linear state machine:
//! `LoadLessons → Architect → StackResearch → Design → Generate → Review →
//! RecordExperiences → Done`. Any stage that exhausts its retries ends the run.
//! Experiences recorded along the way are best effort: a failed write is
//! reported as a [`RecordOutcome`] and never fails the run.

use super::collaborator::{normalize_for_role, Collaborator, CollaboratorError, HttpCollaborator};
use super::report;
use super::stages::{RunState, Stage, DEFAULT_STACK};
use crate::config::Config;
use crate::memory::service::{LessonsQuery, MemoryService};
use crate::memory::types::{
    DecisionRecord, DecisionType, ErrorType, ExperienceRecord, LessonsBundle, Severity,
};
use crate::retry::RetryPolicy;
use sdk::errors::EngineError;
use sdk::types::CollaboratorRole;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

const REVIEW_ROOT_CAUSE: &str = "issue detected in review";
const NO_SUGGESTION: &str = "No suggestion provided";
const NO_DESCRIPTION: &str = "Unspecified review issue";

/// What to build
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequest {
    pub spec: String,
    pub context: String,
    pub stack: String,
}

impl FeatureRequest {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            context: String::new(),
            stack: DEFAULT_STACK.to_string(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }
}

/// Result of a best-effort memory write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded(String),
    Failed(String),
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded(_))
    }
}

impl<E: std::fmt::Display> From<Result<String, E>> for RecordOutcome {
    fn from(result: Result<String, E>) -> Self {
        match result {
            Ok(id) => RecordOutcome::Recorded(id),
            Err(e) => RecordOutcome::Failed(e.to_string()),
        }
    }
}

/// Aggregated output of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct FeatureBuild {
    pub status: String,
    pub architecture: Map<String, Value>,
    pub imports: Map<String, Value>,
    pub ui_design: Map<String, Value>,
    pub code: Map<String, Value>,
    pub review: Map<String, Value>,
    pub lessons_applied: LessonsBundle,
    /// Outcomes of the post-run experience and decision writes
    pub records: Vec<RecordOutcome>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        source: CollaboratorError,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Stage { stage, .. } => *stage,
        }
    }
}

impl From<PipelineError> for EngineError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Stage { stage, source } => EngineError::StageFailed {
                stage: stage.to_string(),
                reason: source.to_string(),
            },
        }
    }
}

/// A failed run and the outcome of recording it
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub error_record: RecordOutcome,
}

impl PipelineFailure {
    pub fn user_message(&self) -> String {
        format!("Error: {}\n\nPlease check logs for details.", self.error)
    }
}

fn prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn non_blank<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub struct Orchestrator {
    collaborator: Arc<dyn Collaborator>,
    memory: Arc<MemoryService>,
    policy: RetryPolicy,
    project_id: String,
}

impl Orchestrator {
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        memory: Arc<MemoryService>,
        policy: RetryPolicy,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            collaborator,
            memory,
            policy,
            project_id: project_id.into(),
        }
    }

    /// HTTP collaborators from `[collaborators]`, retried per `[retry]`
    pub fn from_config(config: &Config, memory: Arc<MemoryService>) -> Self {
        let collaborator = Arc::new(HttpCollaborator::from_config(&config.collaborators));
        let policy = config.retry.policy(config.collaborators.timeout());
        Self::new(collaborator, memory, policy, &config.core.project_id)
    }

    /// Run the pipeline and render the result as markdown, or as a single
    /// error string when the run fails
    pub async fn build_feature_report(&self, request: &FeatureRequest) -> String {
        match self.build_feature(request).await {
            Ok(build) => report::render(&build),
            Err(failure) => failure.user_message(),
        }
    }

    pub async fn build_feature(
        &self,
        request: &FeatureRequest,
    ) -> Result<FeatureBuild, PipelineFailure> {
        info!("Building feature: {}...", prefix(&request.spec, 100));

        match self.run(request).await {
            Ok(build) => {
                info!("Feature build complete");
                Ok(build)
            }
            Err(error) => {
                error!("Error building feature: {}", error);
                let error_record = self.record_failure(request, &error).await;
                Err(PipelineFailure {
                    error,
                    error_record,
                })
            }
        }
    }

    async fn run(&self, request: &FeatureRequest) -> Result<FeatureBuild, PipelineError> {
        let lessons = self.load_lessons(request).await;
        let mut state = RunState::new(&request.spec, &request.context, &request.stack, &lessons);

        let mut stage = Stage::Architect;
        while let Some(role) = stage.role() {
            let output = self.run_stage(stage, role, &state).await?;
            state.outputs.insert(stage, output);
            stage = match stage.next() {
                Some(next) => next,
                None => break,
            };
        }

        info!(
            "Step {}/6: {}",
            Stage::RecordExperiences.step(),
            Stage::RecordExperiences.description()
        );
        let architecture = state.take_output(Stage::Architect);
        let review = state.take_output(Stage::Review);
        let records = self
            .record_run(&request.spec, &request.stack, &architecture, &review)
            .await;

        Ok(FeatureBuild {
            status: "success".to_string(),
            imports: state.take_output(Stage::StackResearch),
            ui_design: state.take_output(Stage::Design),
            code: state.take_output(Stage::Generate),
            architecture,
            review,
            lessons_applied: lessons,
            records,
        })
    }

    async fn load_lessons(&self, request: &FeatureRequest) -> LessonsBundle {
        info!(
            "Step {}/6: {}",
            Stage::LoadLessons.step(),
            Stage::LoadLessons.description()
        );
        let query = LessonsQuery::new(
            &request.spec,
            &request.stack,
            self.memory.config().lessons_limit,
        );
        let lessons = self.memory.lessons_for_task(&query).await;
        if !lessons.is_empty() {
            info!("Loaded {} lessons from memory", lessons.total_lessons);
        }
        lessons
    }

    async fn run_stage(
        &self,
        stage: Stage,
        role: CollaboratorRole,
        state: &RunState<'_>,
    ) -> Result<Map<String, Value>, PipelineError> {
        info!("Step {}/6: {}", stage.step(), stage.description());

        let arguments = state.arguments(stage).unwrap_or_else(|| json!({}));
        let label = format!("{}/{}", role, role.tool_name());
        let collaborator = &self.collaborator;

        let result = self
            .policy
            .run(&label, |_| collaborator.call(role, arguments.clone()))
            .await
            .map_err(|source| PipelineError::Stage { stage, source })?;

        Ok(normalize_for_role(role, result))
    }

    /// Store one experience per high or critical review issue, then the
    /// architecture decision
    async fn record_run(
        &self,
        spec: &str,
        stack: &str,
        architecture: &Map<String, Value>,
        review: &Map<String, Value>,
    ) -> Vec<RecordOutcome> {
        let mut outcomes = Vec::new();

        let issues = review
            .get("issues")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for issue in issues {
            let Some(severity) = non_blank(issue, "severity")
                .and_then(|s| s.parse::<Severity>().ok())
                .filter(Severity::is_severe)
            else {
                continue;
            };

            let file = non_blank(issue, "file").unwrap_or("unknown");
            let error_type = non_blank(issue, "type")
                .and_then(|t| t.parse::<ErrorType>().ok())
                .unwrap_or(ErrorType::Bug);

            let record = ExperienceRecord::new(
                &self.project_id,
                file,
                stack,
                severity,
                error_type,
                non_blank(issue, "description").unwrap_or(NO_DESCRIPTION),
                REVIEW_ROOT_CAUSE,
                non_blank(issue, "suggestion").unwrap_or(NO_SUGGESTION),
            )
            .with_tags(["code-review", "auto-generated"])
            .with_affected_components([file]);

            let outcome = RecordOutcome::from(self.memory.store_experience(record).await);
            if let RecordOutcome::Failed(reason) = &outcome {
                warn!("Failed to store review experience: {}", reason);
            }
            outcomes.push(outcome);
        }

        if !architecture.is_empty() {
            let architecture = Value::Object(architecture.clone());
            let mut decision = DecisionRecord::new(
                &self.project_id,
                "architecture",
                DecisionType::Architecture,
                format!("Architecture for: {}...", prefix(spec, 50)),
                non_blank(&architecture, "rationale").unwrap_or("Generated based on requirements"),
            );
            decision.alternatives_considered = architecture
                .get("alternatives")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let outcome = RecordOutcome::from(self.memory.remember_decision(decision).await);
            if let RecordOutcome::Failed(reason) = &outcome {
                warn!("Failed to store architecture decision: {}", reason);
            }
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn record_failure(&self, request: &FeatureRequest, error: &PipelineError) -> RecordOutcome {
        let record = ExperienceRecord::new(
            &self.project_id,
            "orchestrator",
            &request.stack,
            Severity::High,
            ErrorType::Bug,
            format!("Pipeline execution failed for: {}...", prefix(&request.spec, 50)),
            "Orchestration pipeline error",
            "Needs investigation",
        )
        .with_tags(["pipeline-error", "orchestrator"])
        .with_affected_components(["orchestrator"])
        .with_llm_comment(error.to_string());

        let outcome = RecordOutcome::from(self.memory.store_experience(record).await);
        if let RecordOutcome::Failed(reason) = &outcome {
            error!("Failed to store error experience: {}", reason);
        }
        outcome
    }
}
