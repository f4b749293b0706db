//! Memory service
//!
//! Owns the experience store and every cache derived from it. Mutations
//! (store, dedup, prune) are serialized through a single writer gate and each
//! one invalidates the lessons and stats caches. Reads run concurrently.

use super::maintenance::{
    group_by_pattern, plan_deduplication, plan_pruning, prune_cutoff, severity_distribution,
};
use super::sqlite::SqliteStore;
use super::store::{ExperienceStore, InMemoryStore};
use super::types::{
    ConsolidatedLesson, Decision, DecisionRecord, DeduplicationResult, Experience,
    ExperienceRecord, Lesson, LessonsBundle, MemoryStats, PruningResult, Severity,
};
use super::Result;
use crate::config::{Config, MemoryConfig, StoreBackend};
use crate::llm::router::TaskRouter;
use crate::llm::{extract_json_object, CallOptions, Message, TaskCategory};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

const JSON_ONLY: &str = "You only produce valid JSON.";
const SYNTHESIS_TEMPERATURE: f32 = 0.1;
const MB_PER_EXPERIENCE: f64 = 0.001;
const MINUTES_SAVED_PER_DUPLICATE: usize = 5;
const MAX_EXEMPLARS: usize = 5;
const DEFAULT_CONFIDENCE: f64 = 0.7;

/// Parameters of a lessons lookup
#[derive(Debug, Clone, PartialEq)]
pub struct LessonsQuery {
    pub spec: String,
    pub stack: String,
    pub limit: usize,
    pub module: Option<String>,
    pub severity_filter: Option<Vec<Severity>>,
}

impl LessonsQuery {
    pub fn new(spec: impl Into<String>, stack: impl Into<String>, limit: usize) -> Self {
        Self {
            spec: spec.into(),
            stack: stack.into(),
            limit,
            module: None,
            severity_filter: None,
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_severities(mut self, severities: Vec<Severity>) -> Self {
        self.severity_filter = Some(severities);
        self
    }

    fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.spec.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.stack.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.module.as_deref().unwrap_or_default().as_bytes());
        format!("lessons_{}", hex::encode(hasher.finalize()))
    }

    fn admits(&self, exp: &Experience) -> bool {
        let module_ok = self
            .module
            .as_deref()
            .map_or(true, |m| exp.record.module.eq_ignore_ascii_case(m));
        let severity_ok = self
            .severity_filter
            .as_deref()
            .map_or(true, |f| f.is_empty() || f.contains(&exp.severity()));
        module_ok && severity_ok
    }
}

/// Result of a full maintenance cycle
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub deduplication: DeduplicationResult,
    pub pruning: PruningResult,
    pub consolidated: Vec<ConsolidatedLesson>,
    pub stats: MemoryStats,
}

#[derive(Default)]
struct QueryCounters {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    memory_hits: AtomicU64,
    lessons_served: AtomicU64,
}

impl QueryCounters {
    fn served(&self, bundle: &LessonsBundle) {
        if !bundle.is_empty() {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.lessons_served
            .fetch_add(bundle.total_lessons as u64, Ordering::Relaxed);
    }

    fn ratio(&self, numerator: &AtomicU64) -> f64 {
        let queries = self.queries.load(Ordering::Relaxed);
        if queries == 0 {
            0.0
        } else {
            numerator.load(Ordering::Relaxed) as f64 / queries as f64
        }
    }
}

pub struct MemoryService {
    store: Arc<dyn ExperienceStore>,
    router: Arc<TaskRouter>,
    config: MemoryConfig,
    write_gate: Mutex<()>,
    generation: AtomicU64,
    lessons_cache: RwLock<HashMap<String, LessonsBundle>>,
    stats_cache: RwLock<Option<(Instant, MemoryStats)>>,
    counters: QueryCounters,
}

impl MemoryService {
    pub fn new(store: Arc<dyn ExperienceStore>, router: Arc<TaskRouter>, config: MemoryConfig) -> Self {
        Self {
            store,
            router,
            config,
            write_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            lessons_cache: RwLock::new(HashMap::new()),
            stats_cache: RwLock::new(None),
            counters: QueryCounters::default(),
        }
    }

    /// Open the store selected by `[memory] backend`
    pub async fn from_config(config: &Config, router: Arc<TaskRouter>) -> anyhow::Result<Self> {
        let store: Arc<dyn ExperienceStore> = match config.memory.backend {
            StoreBackend::Sqlite => Arc::new(
                SqliteStore::open(&config.database_path())
                    .await
                    .context("Failed to open memory database")?,
            ),
            StoreBackend::Memory => {
                warn!("Using in-process memory store; experiences are lost on exit");
                Arc::new(InMemoryStore::new())
            }
        };

        Ok(Self::new(store, router, config.memory.clone()))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    async fn invalidate_caches(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.lessons_cache.write().await.clear();
        *self.stats_cache.write().await = None;
    }

    /// Validate and persist an experience, returning its new id
    pub async fn store_experience(&self, record: ExperienceRecord) -> Result<String> {
        record.validate()?;
        let experience = Experience::new(record);
        let id = experience.id.clone();
        let summary = preview(&experience.record.summary);

        let _gate = self.write_gate.lock().await;
        self.store.append(experience).await?;
        self.invalidate_caches().await;

        info!("Stored experience {}: {}", id, summary);
        Ok(id)
    }

    pub async fn store_experience_json(&self, value: Value) -> Result<String> {
        self.store_experience(ExperienceRecord::from_value(value)?)
            .await
    }

    /// Validate and append an architectural decision
    pub async fn remember_decision(&self, record: DecisionRecord) -> Result<String> {
        record.validate()?;
        let decision = Decision::new(record);
        let id = decision.id.clone();
        let summary = preview(&decision.record.decision);

        let _gate = self.write_gate.lock().await;
        self.store.append_decision(decision).await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.stats_cache.write().await = None;

        info!("Recorded decision {}: {}", id, summary);
        Ok(id)
    }

    /// Lessons relevant to a task
    ///
    /// Never fails: storage errors and backend exhaustion yield an empty
    /// bundle, and unparseable synthesis yields a generic one.
    pub async fn lessons_for_task(&self, query: &LessonsQuery) -> LessonsBundle {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let key = query.cache_key();

        if let Some(hit) = self.lessons_cache.read().await.get(&key).cloned() {
            debug!("Returning cached lessons");
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.counters.served(&hit);
            return hit;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let empty = || LessonsBundle::empty(&query.stack, query.module.clone());

        let experiences = match self.store.list().await {
            Ok(experiences) => experiences,
            Err(e) => {
                error!("Failed to read experiences for lessons: {}", e);
                return empty();
            }
        };

        let candidates = rank_candidates(&experiences, query, &self.config);
        if candidates.is_empty() {
            debug!("No relevant experiences for {}", preview(&query.spec));
            return empty();
        }

        let relevance = candidates.iter().map(|(score, _)| f64::from(*score)).sum::<f64>()
            / candidates.len() as f64;

        let messages = [
            Message::system(JSON_ONLY),
            Message::user(lessons_prompt(query, &candidates)),
        ];
        let options = CallOptions::default().with_temperature(SYNTHESIS_TEMPERATURE);

        let response = match self.router.call(TaskCategory::Code, &messages, &options).await {
            Ok(text) => text,
            Err(e) => {
                error!("Lesson synthesis failed: {}", e);
                return empty();
            }
        };

        let mut bundle = parse_lessons(&response, query);
        bundle.relevance_score = relevance;

        let mut cache = self.lessons_cache.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            cache.insert(key, bundle.clone());
        }
        drop(cache);

        self.counters.served(&bundle);
        info!(
            "Generated {} lessons for {}",
            bundle.total_lessons,
            preview(&query.spec)
        );
        bundle
    }

    /// Collapse near-duplicate experiences, keeping one per cluster
    pub async fn deduplicate_experiences(&self) -> Result<DeduplicationResult> {
        let _gate = self.write_gate.lock().await;

        let snapshot = self.store.list().await?;
        let plan = plan_deduplication(snapshot, self.config.similarity_threshold);
        let doomed: Vec<String> = plan.removed.iter().map(|e| e.id.clone()).collect();

        let removed = self.store.remove(&doomed).await?;
        if removed > 0 {
            self.invalidate_caches().await;
        }

        info!(
            "Deduplication removed {} experiences, kept {}",
            removed,
            plan.kept.len()
        );

        Ok(DeduplicationResult {
            duplicates_found: doomed.len(),
            duplicates_removed: removed,
            experiences_kept: plan.kept.len(),
            time_saved_minutes: removed * MINUTES_SAVED_PER_DUPLICATE,
            memory_freed_mb: removed as f64 * MB_PER_EXPERIENCE,
            processed_at: Utc::now(),
        })
    }

    /// Remove medium and low experiences older than `cutoff_days`
    pub async fn prune_stale_memories(&self, cutoff_days: u32) -> Result<PruningResult> {
        let _gate = self.write_gate.lock().await;

        let snapshot = self.store.list().await?;
        let cutoff = prune_cutoff(Utc::now(), cutoff_days);
        let plan = plan_pruning(&snapshot, cutoff);

        let removed = self.store.remove(&plan.removed_ids).await?;
        if removed > 0 {
            self.invalidate_caches().await;
        }

        info!(
            "Pruned {} experiences older than {} days",
            removed, cutoff_days
        );

        Ok(PruningResult {
            total_evaluated: snapshot.len(),
            experiences_removed: removed,
            critical_kept: plan.critical_kept,
            high_kept: plan.high_kept,
            medium_removed: plan.medium_removed,
            low_removed: plan.low_removed,
            memory_freed_mb: removed as f64 * MB_PER_EXPERIENCE,
            cutoff_days,
            processed_at: Utc::now(),
        })
    }

    /// Synthesize a meta-rule for every pattern seen at least twice
    pub async fn consolidate_lessons(&self) -> Result<Vec<ConsolidatedLesson>> {
        let snapshot = self.store.list().await?;
        let mut lessons = Vec::new();

        for (pattern, members) in group_by_pattern(&snapshot) {
            if members.len() < 2 {
                continue;
            }

            let exemplars = members
                .iter()
                .take(MAX_EXEMPLARS)
                .map(|e| format!("- {}: {}", e.record.summary, e.record.fix_applied))
                .collect::<Vec<_>>()
                .join("\n");

            let messages = [
                Message::system(JSON_ONLY),
                Message::user(consolidation_prompt(&pattern.key(), &exemplars)),
            ];
            let options = CallOptions::default().with_temperature(SYNTHESIS_TEMPERATURE);

            let response = match self.router.call(TaskCategory::Code, &messages, &options).await {
                Ok(text) => text,
                Err(e) => {
                    error!("Error consolidating lessons for {}: {}", pattern, e);
                    continue;
                }
            };

            let parsed = extract_json_object(&response).unwrap_or(Value::Null);
            let rule = parsed
                .get("rule")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("Avoid recurring pattern: {}", pattern));
            let confidence_score = parsed
                .get("confidence_score")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_CONFIDENCE)
                .clamp(0.0, 1.0);
            let contexts = parsed
                .get("contexts")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect::<Vec<_>>()
                })
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| vec![pattern.key()]);

            lessons.push(ConsolidatedLesson {
                pattern: pattern.key(),
                rule,
                frequency: members.len(),
                severity_distribution: severity_distribution(&members),
                contexts,
                confidence_score,
                source_experiences: members.iter().map(|e| e.id.clone()).collect(),
                created_at: Utc::now(),
            });
        }

        info!("Consolidated {} lessons", lessons.len());
        Ok(lessons)
    }

    /// Aggregate counts and query metrics, reused for `stats_ttl_secs`
    pub async fn memory_stats(&self) -> Result<MemoryStats> {
        let ttl = Duration::from_secs(self.config.stats_ttl_secs);
        if let Some((computed_at, stats)) = self.stats_cache.read().await.as_ref() {
            if computed_at.elapsed() < ttl {
                return Ok(stats.clone());
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let experiences = self.store.list().await?;
        let decisions = self.store.list_decisions().await?;

        let mut by_severity = BTreeMap::new();
        let mut by_error_type = BTreeMap::new();
        let mut by_project = BTreeMap::new();
        for exp in &experiences {
            *by_severity.entry(exp.severity().to_string()).or_insert(0) += 1;
            *by_error_type
                .entry(exp.record.error_type.to_string())
                .or_insert(0) += 1;
            *by_project
                .entry(exp.record.project_id.clone())
                .or_insert(0) += 1;
        }

        let counters = &self.counters;
        let stats = MemoryStats {
            total_experiences: experiences.len(),
            total_decisions: decisions.len(),
            by_severity,
            by_error_type,
            by_project,
            lessons_cache_size: self.lessons_cache.read().await.len(),
            lesson_queries: counters.queries.load(Ordering::Relaxed),
            avg_lessons_per_task: counters.ratio(&counters.lessons_served),
            memory_hit_rate: counters.ratio(&counters.memory_hits),
            cache_hit_rate: counters.ratio(&counters.cache_hits),
            last_updated: Utc::now(),
        };

        let mut cache = self.stats_cache.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            *cache = Some((Instant::now(), stats.clone()));
        }
        drop(cache);
        Ok(stats)
    }

    /// Dedupe, prune with the configured cutoff, consolidate, then report stats
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let deduplication = self.deduplicate_experiences().await?;
        let pruning = self
            .prune_stale_memories(self.config.prune_cutoff_days)
            .await?;
        let consolidated = self.consolidate_lessons().await?;
        let stats = self.memory_stats().await?;

        Ok(MaintenanceReport {
            deduplication,
            pruning,
            consolidated,
            stats,
        })
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Score admitted experiences and keep the best `2 × limit`
fn rank_candidates<'a>(
    experiences: &'a [Experience],
    query: &LessonsQuery,
    config: &MemoryConfig,
) -> Vec<(u32, &'a Experience)> {
    let weights = config.relevance;
    let stack = query.stack.to_lowercase();
    let spec = query.spec.to_lowercase();
    let spec_tokens: Vec<&str> = spec
        .split_whitespace()
        .filter(|w| w.chars().count() > 3)
        .collect();

    let mut scored: Vec<(u32, &Experience)> = experiences
        .iter()
        .filter(|exp| query.admits(exp))
        .filter_map(|exp| {
            let text = format!(
                "{} {} {}",
                exp.record.summary, exp.record.root_cause, exp.record.stack
            )
            .to_lowercase();

            let mut score = 0;
            if !stack.is_empty() && text.contains(&stack) {
                score += weights.stack_match;
            }
            if spec_tokens.iter().any(|token| text.contains(token)) {
                score += weights.spec_token_match;
            }
            if exp.severity().is_severe() {
                score += weights.severe;
            }
            (score > 0).then_some((score, exp))
        })
        .collect();

    // stable, so ties keep insertion order
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.truncate(query.limit.saturating_mul(2));
    scored
}

fn lessons_prompt(query: &LessonsQuery, candidates: &[(u32, &Experience)]) -> String {
    let blocks = candidates
        .iter()
        .map(|(_, e)| {
            let r = &e.record;
            let mut block = format!(
                "[{}] {}\nCause: {}\nFix: {}\nSeverity: {}\nModule: {}",
                r.error_type.as_str().to_uppercase(),
                r.summary,
                r.root_cause,
                r.fix_applied,
                r.severity,
                r.module
            );
            if let Some(bad) = &r.bad_snippet {
                block.push_str(&format!("\nBad code: {}", bad));
            }
            if let Some(good) = &r.good_snippet {
                block.push_str(&format!("\nGood code: {}", good));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are the memory agent of the Keel build pipeline.

CURRENT TASK:
{spec}

TECHNOLOGY STACK:
{stack}

RELEVANT EXPERIENCES:
{blocks}

Extract a set of practical lessons so these mistakes are not repeated.
Answer in JSON with the format:
{{
    "high_level_rules": [
        {{"rule": "rule", "rationale": "why", "severity": "high"}}
    ],
    "code_smells_to_avoid": [
        {{"rule": "code smell", "rationale": "explanation", "example_bad": "bad", "example_good": "good"}}
    ],
    "security_pitfalls": [
        {{"rule": "security rule", "rationale": "risk", "severity": "critical"}}
    ]
}}"#,
        spec = query.spec,
        stack = query.stack,
        blocks = blocks
    )
}

fn consolidation_prompt(pattern: &str, exemplars: &str) -> String {
    format!(
        r#"Analyze these similar experiences and extract one consolidated meta-rule.

Pattern: {pattern}
Experiences:
{exemplars}

Answer in JSON with:
{{
    "rule": "General rule that prevents all of these problems",
    "confidence_score": 0.9,
    "contexts": ["context1", "context2"]
}}"#
    )
}

fn lesson_list(value: &Value, key: &str) -> Vec<Lesson> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Lesson::from_value).collect())
        .unwrap_or_default()
}

/// Turn synthesis output into a bundle, substituting a generic rule when the
/// output holds no JSON object
fn parse_lessons(response: &str, query: &LessonsQuery) -> LessonsBundle {
    let mut bundle = LessonsBundle::empty(&query.stack, query.module.clone());

    match extract_json_object(response) {
        Some(value) => {
            bundle.high_level_rules = lesson_list(&value, "high_level_rules");
            bundle.code_smells_to_avoid = lesson_list(&value, "code_smells_to_avoid");
            bundle.security_pitfalls = lesson_list(&value, "security_pitfalls");
        }
        None => {
            warn!("Lesson synthesis returned no JSON; using generic rule");
            bundle.high_level_rules = vec![Lesson::new(
                "Carefully analyze past experiences",
                "Failed to parse the response",
            )
            .with_severity(Severity::Medium)];
        }
    }

    bundle.recount();
    bundle
}
