//! Build pipeline stages and their request builders

use crate::memory::types::{Lesson, LessonsBundle};
use sdk::types::CollaboratorRole;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_STACK: &str = "python+fastapi+react";
const DEFAULT_LIBRARIES: [&str; 3] = ["react", "fastapi", "@tanstack/react-query"];
const UX_GOALS: [&str; 3] = ["responsive", "accessible", "modern"];
const LESSONS_HEADER: &str = "LESSONS LEARNED (DO NOT REPEAT THESE MISTAKES):";

/// States of one build run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LoadLessons,
    Architect,
    StackResearch,
    Design,
    Generate,
    Review,
    RecordExperiences,
    Done,
}

impl Stage {
    pub const FIRST: Stage = Stage::LoadLessons;

    /// Following state; `None` once done
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::LoadLessons => Some(Self::Architect),
            Self::Architect => Some(Self::StackResearch),
            Self::StackResearch => Some(Self::Design),
            Self::Design => Some(Self::Generate),
            Self::Generate => Some(Self::Review),
            Self::Review => Some(Self::RecordExperiences),
            Self::RecordExperiences => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// Collaborator called by this stage, if any
    pub fn role(self) -> Option<CollaboratorRole> {
        match self {
            Self::Architect => Some(CollaboratorRole::Architect),
            Self::StackResearch => Some(CollaboratorRole::StackResearch),
            Self::Design => Some(CollaboratorRole::Designer),
            Self::Generate => Some(CollaboratorRole::Coder),
            Self::Review => Some(CollaboratorRole::Auditor),
            Self::LoadLessons | Self::RecordExperiences | Self::Done => None,
        }
    }

    /// 0-based position among the working stages
    pub fn step(self) -> usize {
        self as usize
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::LoadLessons => "Loading learned lessons",
            Self::Architect => "Architecture planning",
            Self::StackResearch => "Stack research",
            Self::Design => "UI/UX design",
            Self::Generate => "Code generation",
            Self::Review => "Code review",
            Self::RecordExperiences => "Storing experiences",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadLessons => "load-lessons",
            Self::Architect => "architect",
            Self::StackResearch => "stack-research",
            Self::Design => "design",
            Self::Generate => "generate",
            Self::Review => "review",
            Self::RecordExperiences => "record-experiences",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Immutable request data plus stage outputs accumulated during one run
pub struct RunState<'a> {
    pub spec: &'a str,
    pub stack: &'a str,
    /// Caller context with the lessons text appended
    pub context: String,
    pub lessons: Value,
    pub outputs: BTreeMap<Stage, Map<String, Value>>,
}

impl<'a> RunState<'a> {
    pub fn new(spec: &'a str, context: &str, stack: &'a str, lessons: &LessonsBundle) -> Self {
        Self {
            spec,
            stack,
            context: enriched_context(context, &lessons_text(lessons)),
            lessons: serde_json::to_value(lessons).unwrap_or(Value::Null),
            outputs: BTreeMap::new(),
        }
    }

    fn output(&self, stage: Stage) -> Value {
        self.outputs
            .get(&stage)
            .cloned()
            .map(Value::Object)
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    pub fn take_output(&mut self, stage: Stage) -> Map<String, Value> {
        self.outputs.remove(&stage).unwrap_or_default()
    }

    /// Tool arguments for a collaborator stage
    pub fn arguments(&self, stage: Stage) -> Option<Value> {
        let args = match stage {
            Stage::Architect => json!({
                "spec": self.spec,
                "context": self.context,
                "lessons": self.lessons,
                "stack": self.stack,
            }),
            Stage::StackResearch => json!({ "libraries": libraries_from_stack(self.stack) }),
            Stage::Design => json!({
                "spec": self.spec,
                "architecture": self.output(Stage::Architect),
                "ux_goals": UX_GOALS,
                "lessons": self.lessons,
                "context": self.context,
            }),
            Stage::Generate => json!({
                "spec": self.spec,
                "architecture": self.output(Stage::Architect),
                "ui_design": self.output(Stage::Design),
                "imports": self.output(Stage::StackResearch),
                "lessons": self.lessons,
                "context": self.context,
            }),
            Stage::Review => json!({
                "code": self.output(Stage::Generate),
                "context": {
                    "spec": self.spec,
                    "architecture": self.output(Stage::Architect),
                    "lessons": self.lessons,
                },
            }),
            Stage::LoadLessons | Stage::RecordExperiences | Stage::Done => return None,
        };
        Some(args)
    }
}

/// Library names named by a `+`-separated stack string
pub fn libraries_from_stack(stack: &str) -> Vec<String> {
    let mut libraries: Vec<String> = Vec::new();
    for part in stack.split('+') {
        let name = part.trim().to_lowercase();
        if !name.is_empty() && !libraries.contains(&name) {
            libraries.push(name);
        }
    }

    if libraries.is_empty() {
        DEFAULT_LIBRARIES.iter().map(|s| s.to_string()).collect()
    } else {
        libraries
    }
}

fn push_section(out: &mut String, title: &str, lessons: &[Lesson]) {
    if lessons.is_empty() {
        return;
    }
    out.push_str(&format!("\n{}:\n", title));
    for lesson in lessons {
        out.push_str(&format!("- {}: {}\n", lesson.rule, lesson.rationale));
    }
}

/// Render a bundle for inclusion in collaborator context; empty when the
/// bundle holds no lessons
pub fn lessons_text(bundle: &LessonsBundle) -> String {
    if bundle.total_lessons == 0 {
        return String::new();
    }

    let mut out = format!("{}\n", LESSONS_HEADER);
    push_section(&mut out, "High-Level Rules", &bundle.high_level_rules);
    push_section(&mut out, "Code Smells to Avoid", &bundle.code_smells_to_avoid);
    push_section(&mut out, "Security Pitfalls", &bundle.security_pitfalls);
    out
}

pub fn enriched_context(context: &str, lessons_text: &str) -> String {
    if lessons_text.is_empty() {
        context.to_string()
    } else {
        format!("{}\n\n{}", context, lessons_text)
    }
}
