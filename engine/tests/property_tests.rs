use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::time::Duration;

use keel_engine::config::Config;
use keel_engine::llm::context::ContextCompactor;
use keel_engine::llm::TaskCategory;
use keel_engine::memory::maintenance::{plan_deduplication, plan_pruning, prune_cutoff};
use keel_engine::memory::{ErrorType, Experience, ExperienceRecord, Severity};
use keel_engine::retry::RetryPolicy;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Critical),
        Just(Severity::High),
        Just(Severity::Medium),
        Just(Severity::Low),
    ]
}

fn experience(index: usize, summary: String, severity: Severity, age_days: i64) -> Experience {
    Experience::restore(
        format!("exp-{}", index),
        now() - ChronoDuration::days(age_days),
        ExperienceRecord::new(
            "proj",
            "mod",
            "rust",
            severity,
            ErrorType::Bug,
            summary,
            "cause",
            "fix",
        ),
    )
}

/// Summaries drawn from a small vocabulary so that near-duplicates are common
fn experiences() -> impl Strategy<Value = Vec<Experience>> {
    let word = prop::sample::select(vec![
        "sql", "injection", "login", "endpoint", "timeout", "cache", "panic", "retry",
    ]);
    prop::collection::vec(
        (prop::collection::vec(word, 1..5), severity(), 0i64..400),
        0..12,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (words, severity, age))| experience(i, words.join(" "), severity, age))
            .collect()
    })
}

// Deduplication is idempotent
proptest! {
    #[test]
    fn test_dedup_idempotent(exps in experiences(), threshold in 0.5..=1.0f64) {
        let total = exps.len();
        let first = plan_deduplication(exps, threshold);
        prop_assert_eq!(first.kept.len() + first.removed.len(), total);

        let kept_ids: Vec<String> = first.kept.iter().map(|e| e.id.clone()).collect();
        let second = plan_deduplication(first.kept, threshold);
        prop_assert!(second.removed.is_empty());
        let again: Vec<String> = second.kept.iter().map(|e| e.id.clone()).collect();
        prop_assert_eq!(kept_ids, again);
    }
}

// Pruning never touches critical or high, and splits medium/low on age
proptest! {
    #[test]
    fn test_prune_respects_severity_and_age(
        exps in experiences(),
        cutoff_days in prop_oneof![0u32..400, any::<u32>()],
    ) {
        let cutoff = prune_cutoff(now(), cutoff_days);
        let plan = plan_pruning(&exps, cutoff);

        for exp in &exps {
            let removed = plan.removed_ids.contains(&exp.id);
            match exp.severity() {
                Severity::Critical | Severity::High => prop_assert!(!removed),
                Severity::Medium | Severity::Low => {
                    prop_assert_eq!(removed, exp.created_at < cutoff);
                }
            }
        }
        prop_assert_eq!(
            plan.removed_ids.len(),
            plan.medium_removed + plan.low_removed
        );
    }
}

// Compaction is deterministic and served from cache on repeat
proptest! {
    #[test]
    fn test_compaction_deterministic(
        spec in "\\PC{0,200}",
        files in prop::collection::vec("[a-z/]{1,20}\\.rs", 0..5),
        idx in 0usize..4,
    ) {
        let category = TaskCategory::ALL[idx];
        let mut context = Map::new();
        context.insert("spec".to_string(), Value::String(spec));
        context.insert("files".to_string(), json!(files));

        let compactor = ContextCompactor::new(50);
        let first = compactor.compact(category, &context);
        let second = compactor.compact(category, &context);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(compactor.cache_size(), 1);

        let fresh = ContextCompactor::new(50).compact(category, &context);
        prop_assert_eq!(first, fresh);
    }
}

// Backoff doubles per retry
proptest! {
    #[test]
    fn test_backoff_doubles(base_ms in 1u64..1000, retry in 0u32..10) {
        let policy = RetryPolicy::new(3, Duration::from_millis(base_ms));
        prop_assert_eq!(policy.delay_for(retry + 1), policy.delay_for(retry) * 2);
        prop_assert_eq!(policy.delay_for(0), Duration::from_millis(base_ms));
    }
}

// Configuration round-trip
proptest! {
    #[test]
    fn test_config_round_trip(
        log_level in "error|warn|info|debug|trace",
        threshold in 0.0..=1.0f64,
        attempts in 1u32..10,
        cutoff in 0u32..365,
    ) {
        let mut config = Config::default_config();
        config.core.log_level = log_level;
        config.memory.similarity_threshold = threshold;
        config.retry.max_attempts = attempts;
        config.memory.prune_cutoff_days = cutoff;
        prop_assert!(config.validate().is_ok());

        let toml_string = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_string).unwrap();

        prop_assert_eq!(config.core.log_level, parsed.core.log_level);
        prop_assert_eq!(config.memory.similarity_threshold, parsed.memory.similarity_threshold);
        prop_assert_eq!(config.retry.max_attempts, parsed.retry.max_attempts);
        prop_assert_eq!(config.memory.prune_cutoff_days, parsed.memory.prune_cutoff_days);
        prop_assert_eq!(config.llm.routing, parsed.llm.routing);
    }
}
