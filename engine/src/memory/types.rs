//! Experience memory records
//!
//! `ExperienceRecord` and `DecisionRecord` are what callers submit. The store
//! wraps them into `Experience` and `Decision`, which add the system-assigned
//! id and timestamp. Neither is ever updated in place.

use super::MemoryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Incident severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Higher is more severe
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }

    /// Critical and high are kept forever and weigh more in lesson queries
    pub fn is_severe(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Bug,
    Security,
    Performance,
    Dx,
    Design,
    Architecture,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Dx => "dx",
            Self::Design => "design",
            Self::Architecture => "architecture",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bug" => Ok(Self::Bug),
            "security" => Ok(Self::Security),
            "performance" => Ok(Self::Performance),
            "dx" => Ok(Self::Dx),
            "design" => Ok(Self::Design),
            "architecture" => Ok(Self::Architecture),
            other => Err(format!("unknown error type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionType {
    Architecture,
    Technology,
    Pattern,
    Refactor,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::Technology => "technology",
            Self::Pattern => "pattern",
            Self::Refactor => "refactor",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "architecture" => Ok(Self::Architecture),
            "technology" => Ok(Self::Technology),
            "pattern" => Ok(Self::Pattern),
            "refactor" => Ok(Self::Refactor),
            other => Err(format!("unknown decision type '{}'", other)),
        }
    }
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

/// Experience as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub project_id: String,
    pub module: String,
    pub stack: String,
    pub severity: Severity,
    pub error_type: ErrorType,
    pub summary: String,
    pub root_cause: String,
    pub fix_applied: String,

    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub good_snippet: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub affected_components: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_extracted: Option<String>,
}

impl ExperienceRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_id: impl Into<String>,
        module: impl Into<String>,
        stack: impl Into<String>,
        severity: Severity,
        error_type: ErrorType,
        summary: impl Into<String>,
        root_cause: impl Into<String>,
        fix_applied: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            module: module.into(),
            stack: stack.into(),
            severity,
            error_type,
            summary: summary.into(),
            root_cause: root_cause.into(),
            fix_applied: fix_applied.into(),
            schema_version: default_schema_version(),
            bad_snippet: None,
            good_snippet: None,
            tags: Vec::new(),
            affected_components: Vec::new(),
            resolution_time_minutes: None,
            llm_comment: None,
            lesson_extracted: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_affected_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_components = components.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_llm_comment(mut self, comment: impl Into<String>) -> Self {
        self.llm_comment = Some(comment.into());
        self
    }

    /// Parse an untyped record, naming the offending field on failure
    pub fn from_value(value: Value) -> Result<Self, MemoryError> {
        let record: Self = serde_json::from_value(value)
            .map_err(|e| MemoryError::Validation(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    /// Reject blank required text fields
    pub fn validate(&self) -> Result<(), MemoryError> {
        let required = [
            ("project_id", &self.project_id),
            ("module", &self.module),
            ("stack", &self.stack),
            ("summary", &self.summary),
            ("root_cause", &self.root_cause),
            ("fix_applied", &self.fix_applied),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(MemoryError::Validation(format!(
                    "field `{}` must not be blank",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Stored experience
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: ExperienceRecord,
}

impl Experience {
    /// Assign a fresh id and the current time
    pub fn new(record: ExperienceRecord) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            record,
        }
    }

    /// Rebuild an experience that was stored earlier
    pub fn restore(id: impl Into<String>, created_at: DateTime<Utc>, record: ExperienceRecord) -> Self {
        Self {
            id: id.into(),
            created_at,
            record,
        }
    }

    pub fn severity(&self) -> Severity {
        self.record.severity
    }
}

/// Architectural decision as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub project_id: String,
    pub module: String,
    pub decision_type: DecisionType,
    pub decision: String,
    pub rationale: String,
    #[serde(default)]
    pub alternatives_considered: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_assessment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub made_by: Option<String>,
}

impl DecisionRecord {
    pub fn new(
        project_id: impl Into<String>,
        module: impl Into<String>,
        decision_type: DecisionType,
        decision: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            module: module.into(),
            decision_type,
            decision: decision.into(),
            rationale: rationale.into(),
            alternatives_considered: Vec::new(),
            impact_assessment: None,
            made_by: None,
        }
    }

    pub fn from_value(value: Value) -> Result<Self, MemoryError> {
        let record: Self = serde_json::from_value(value)
            .map_err(|e| MemoryError::Validation(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> Result<(), MemoryError> {
        let required = [
            ("project_id", &self.project_id),
            ("module", &self.module),
            ("decision", &self.decision),
            ("rationale", &self.rationale),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(MemoryError::Validation(format!(
                    "field `{}` must not be blank",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Stored decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub made_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: DecisionRecord,
}

impl Decision {
    pub fn new(record: DecisionRecord) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            made_at: Utc::now(),
            record,
        }
    }

    pub fn restore(id: impl Into<String>, made_at: DateTime<Utc>, record: DecisionRecord) -> Self {
        Self {
            id: id.into(),
            made_at,
            record,
        }
    }
}

/// One synthesized lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub rule: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_bad: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_good: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Lesson {
    pub fn new(rule: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            rationale: rationale.into(),
            severity: None,
            example_bad: None,
            example_good: None,
            context: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Read a lesson from model output, tolerating unknown severities and
    /// missing optional fields. `None` when there is no usable rule.
    pub fn from_value(value: &Value) -> Option<Self> {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let rule = text("rule")?;
        Some(Self {
            rule,
            rationale: text("rationale").unwrap_or_default(),
            severity: text("severity").and_then(|s| s.parse().ok()),
            example_bad: text("example_bad"),
            example_good: text("example_good"),
            context: text("context"),
        })
    }
}

/// Lessons relevant to one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonsBundle {
    pub stack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub high_level_rules: Vec<Lesson>,
    pub code_smells_to_avoid: Vec<Lesson>,
    pub security_pitfalls: Vec<Lesson>,
    pub total_lessons: usize,
    pub relevance_score: f64,
    pub generated_at: DateTime<Utc>,
}

impl LessonsBundle {
    pub fn empty(stack: impl Into<String>, module: Option<String>) -> Self {
        Self {
            stack: stack.into(),
            module,
            high_level_rules: Vec::new(),
            code_smells_to_avoid: Vec::new(),
            security_pitfalls: Vec::new(),
            total_lessons: 0,
            relevance_score: 0.0,
            generated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_lessons == 0
    }

    /// Keep `total_lessons` in step with the three lists
    pub fn recount(&mut self) {
        self.total_lessons = self.high_level_rules.len()
            + self.code_smells_to_avoid.len()
            + self.security_pitfalls.len();
    }
}

/// Meta-rule distilled from a group of similar experiences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedLesson {
    pub pattern: String,
    pub rule: String,
    pub frequency: usize,
    pub severity_distribution: BTreeMap<String, usize>,
    pub contexts: Vec<String>,
    pub confidence_score: f64,
    pub source_experiences: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationResult {
    pub duplicates_found: usize,
    pub duplicates_removed: usize,
    pub experiences_kept: usize,
    pub time_saved_minutes: usize,
    pub memory_freed_mb: f64,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruningResult {
    pub total_evaluated: usize,
    pub experiences_removed: usize,
    pub critical_kept: usize,
    pub high_kept: usize,
    pub medium_removed: usize,
    pub low_removed: usize,
    pub memory_freed_mb: f64,
    pub cutoff_days: u32,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_experiences: usize,
    pub total_decisions: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_error_type: BTreeMap<String, usize>,
    pub by_project: BTreeMap<String, usize>,
    pub lessons_cache_size: usize,
    pub lesson_queries: u64,
    pub avg_lessons_per_task: f64,
    /// Share of lesson queries that returned at least one lesson
    pub memory_hit_rate: f64,
    /// Share of lesson queries answered from the cache
    pub cache_hit_rate: f64,
    pub last_updated: DateTime<Utc>,
}
