//! Command handlers for CLI operations
//!
//! - build: run the feature pipeline
//! - memory: store, query and maintain experiences
//! - route: send one prompt through the task router
//! - research: look up one library through the stack-research collaborator
//! - code: one-shot code generation on the code route
//! - doctor: show resolved configuration and check dependencies

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::cli::MemoryAction;
use crate::config::{Config, StoreBackend};
use crate::llm::router::TaskRouter;
use crate::llm::codegen::{quick_code, CodeLanguage, CodeRequest, CodeStyle};
use crate::llm::{CallOptions, TaskCategory};
use crate::memory::types::{DecisionRecord, ExperienceRecord, MemoryStats, Severity};
use crate::memory::{LessonsQuery, MemoryService, SqliteStore};
use crate::pipeline::research::research_library;
use crate::pipeline::{FeatureRequest, HttpCollaborator, Orchestrator};
use sdk::errors::{EngineError, KeelErrorExt};
use sdk::types::CollaboratorRole;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn router(config: &Config) -> Result<Arc<TaskRouter>> {
    let router = TaskRouter::from_config(config).map_err(|e| {
        anyhow::anyhow!("{}\nHint: {}", e, e.user_hint())
    })?;
    Ok(Arc::new(router))
}

async fn memory_service(config: &Config, router: Arc<TaskRouter>) -> Result<Arc<MemoryService>> {
    let service = MemoryService::from_config(config, router)
        .await
        .context("Failed to open experience memory")?;
    Ok(Arc::new(service))
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Run the pipeline for one feature
pub async fn handle_build(
    spec: String,
    context: String,
    stack: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let router = router(config)?;
    let memory = memory_service(config, router).await?;
    let orchestrator = Orchestrator::from_config(config, memory);

    let request = FeatureRequest::new(spec)
        .with_context(context)
        .with_stack(stack);

    match format {
        OutputFormat::Text => {
            println!("{}", orchestrator.build_feature_report(&request).await);
        }
        OutputFormat::Json => match orchestrator.build_feature(&request).await {
            Ok(build) => print_json(&build)?,
            Err(failure) => print_json(&json!({
                "status": "error",
                "stage": failure.error.stage(),
                "error": failure.user_message(),
                "error_record": failure.error_record,
            }))?,
        },
    }

    Ok(())
}

/// Dispatch a memory subcommand
pub async fn handle_memory(action: MemoryAction, config: &Config, format: OutputFormat) -> Result<()> {
    let router = router(config)?;
    let memory = memory_service(config, router).await?;

    match action {
        MemoryAction::Stats => {
            let stats = memory.memory_stats().await?;
            match format {
                OutputFormat::Text => print_stats(&stats),
                OutputFormat::Json => print_json(&stats)?,
            }
        }

        MemoryAction::Lessons {
            spec,
            stack,
            limit,
            module,
            severities,
        } => {
            let mut query =
                LessonsQuery::new(spec, stack, limit.unwrap_or(config.memory.lessons_limit));
            if let Some(module) = module {
                query = query.with_module(module);
            }
            if !severities.is_empty() {
                query = query.with_severities(severities);
            }

            let bundle = memory.lessons_for_task(&query).await;
            match format {
                OutputFormat::Text => {
                    if bundle.is_empty() {
                        println!("No relevant lessons for this task.");
                    } else {
                        println!(
                            "{}",
                            crate::pipeline::stages::lessons_text(&bundle).trim_end()
                        );
                        println!();
                        println!(
                            "{} lessons (relevance {:.2})",
                            bundle.total_lessons, bundle.relevance_score
                        );
                    }
                }
                OutputFormat::Json => print_json(&bundle)?,
            }
        }

        MemoryAction::Store { file } => {
            let record = ExperienceRecord::from_value(read_json(&file)?)?;
            let id = memory.store_experience(record).await?;
            match format {
                OutputFormat::Text => println!("✓ Stored experience {}", id),
                OutputFormat::Json => print_json(&json!({ "id": id }))?,
            }
        }

        MemoryAction::Decide { file } => {
            let record = DecisionRecord::from_value(read_json(&file)?)?;
            let id = memory.remember_decision(record).await?;
            match format {
                OutputFormat::Text => println!("✓ Recorded decision {}", id),
                OutputFormat::Json => print_json(&json!({ "id": id }))?,
            }
        }

        MemoryAction::Dedupe => {
            let result = memory.deduplicate_experiences().await?;
            match format {
                OutputFormat::Text => {
                    println!("Duplicates removed: {}", result.duplicates_removed);
                    println!("Experiences kept:   {}", result.experiences_kept);
                    println!("Time saved:         {} min", result.time_saved_minutes);
                }
                OutputFormat::Json => print_json(&result)?,
            }
        }

        MemoryAction::Prune { days } => {
            let cutoff = days.unwrap_or(config.memory.prune_cutoff_days);
            let result = memory.prune_stale_memories(cutoff).await?;
            match format {
                OutputFormat::Text => {
                    println!("Pruned older than {} days", result.cutoff_days);
                    println!("  Evaluated: {}", result.total_evaluated);
                    println!(
                        "  Removed:   {} (medium {}, low {})",
                        result.experiences_removed, result.medium_removed, result.low_removed
                    );
                    println!(
                        "  Kept:      critical {}, high {}",
                        result.critical_kept, result.high_kept
                    );
                }
                OutputFormat::Json => print_json(&result)?,
            }
        }

        MemoryAction::Consolidate => {
            let lessons = memory.consolidate_lessons().await?;
            match format {
                OutputFormat::Text => {
                    if lessons.is_empty() {
                        println!("No recurring patterns found.");
                    }
                    for lesson in &lessons {
                        println!(
                            "[{}] {} (x{}, confidence {:.2})",
                            lesson.pattern, lesson.rule, lesson.frequency, lesson.confidence_score
                        );
                    }
                }
                OutputFormat::Json => print_json(&lessons)?,
            }
        }

        MemoryAction::Maintain => {
            let report = memory.run_maintenance().await?;
            match format {
                OutputFormat::Text => {
                    println!(
                        "Deduplication: {} removed, {} kept",
                        report.deduplication.duplicates_removed,
                        report.deduplication.experiences_kept
                    );
                    println!(
                        "Pruning:       {} removed",
                        report.pruning.experiences_removed
                    );
                    println!("Consolidation: {} meta-rules", report.consolidated.len());
                    println!();
                    print_stats(&report.stats);
                }
                OutputFormat::Json => print_json(&report)?,
            }
        }
    }

    Ok(())
}

fn print_stats(stats: &MemoryStats) {
    println!("Experience Memory");
    println!("=================");
    println!("  {:<22} {}", "Experiences:", stats.total_experiences);
    println!("  {:<22} {}", "Decisions:", stats.total_decisions);
    for severity in Severity::ALL {
        let count = stats.by_severity.get(severity.as_str()).copied().unwrap_or(0);
        println!("  {:<22} {}", format!("{}:", severity), count);
    }
    println!("  {:<22} {}", "Lesson queries:", stats.lesson_queries);
    println!("  {:<22} {:.2}", "Avg lessons/task:", stats.avg_lessons_per_task);
    println!("  {:<22} {:.0}%", "Memory hit rate:", stats.memory_hit_rate * 100.0);
    println!("  {:<22} {:.0}%", "Cache hit rate:", stats.cache_hit_rate * 100.0);
}

/// Send a single prompt through the router
pub async fn handle_route(
    category: String,
    prompt: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let category: TaskCategory = category
        .parse()
        .map_err(|e: String| EngineError::Config(e))?;
    let router = router(config)?;

    let answer = router
        .route_with_context(category, prompt, None, &CallOptions::default())
        .await
        .map_err(EngineError::from)
        .map_err(|e| anyhow::anyhow!("{}\nHint: {}", e, e.user_hint()))?;

    match format {
        OutputFormat::Text => println!("{}", answer),
        OutputFormat::Json => print_json(&json!({
            "category": category,
            "answer": answer,
            "stats": router.stats(),
        }))?,
    }

    Ok(())
}

/// Research one library
pub async fn handle_research(
    library: String,
    context: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let collaborator = HttpCollaborator::from_config(&config.collaborators);
    let policy = config.retry.policy(config.collaborators.timeout());

    let research = research_library(&collaborator, &policy, &library, &context)
        .await
        .with_context(|| format!("Research for {} failed", library))?;

    match format {
        OutputFormat::Text => println!("{}", research.render(&context).trim_end()),
        OutputFormat::Json => print_json(&research)?,
    }

    Ok(())
}

/// Generate code for a description on the code route
pub async fn handle_code(
    description: String,
    language: CodeLanguage,
    style: CodeStyle,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let router = router(config)?;
    let request = CodeRequest::new(description)
        .with_language(language)
        .with_style(style);

    let code = quick_code(&router, &request).await;

    match format {
        OutputFormat::Text => println!("{}", code),
        OutputFormat::Json => print_json(&json!({
            "language": language,
            "style": style,
            "code": code,
        }))?,
    }

    Ok(())
}

/// Show resolved configuration and check the data directory, database and
/// credentials
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(String, String)> = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration".into(), "Valid".into()));

    if config.core.data_dir.exists() {
        checks.push(("Data directory".into(), "Exists".into()));
    } else {
        checks.push(("Data directory".into(), "Missing".into()));
        issues.push(format!(
            "Data directory does not exist: {:?}",
            config.core.data_dir
        ));
    }

    match config.memory.backend {
        StoreBackend::Sqlite => {
            let db_path = config.database_path();
            match SqliteStore::open(&db_path).await {
                Ok(store) => {
                    checks.push(("Memory database".into(), "OK".into()));
                    store.close().await.ok();
                }
                Err(e) => {
                    checks.push(("Memory database".into(), "Failed".into()));
                    issues.push(format!("Cannot open {}: {}", db_path.display(), e));
                }
            }
        }
        StoreBackend::Memory => {
            checks.push(("Memory database".into(), "In-process (not persisted)".into()));
        }
    }

    if std::env::var(&config.llm.api_key_env).is_ok_and(|v| !v.trim().is_empty()) {
        checks.push((config.llm.api_key_env.clone(), "Set".into()));
    } else {
        checks.push((config.llm.api_key_env.clone(), "Not set".into()));
        issues.push(format!(
            "{} is not set. Backend calls will fail.",
            config.llm.api_key_env
        ));
    }

    let routing: Vec<(String, String)> = match TaskRouter::from_config(config) {
        Ok(router) => router
            .routing_table()
            .iter()
            .map(|(category, route)| {
                (
                    category.to_string(),
                    route.chain().collect::<Vec<_>>().join(" → "),
                )
            })
            .collect(),
        Err(e) => {
            issues.push(format!("Routing table is invalid: {}", e));
            Vec::new()
        }
    };

    let collaborators: Vec<(String, String)> = CollaboratorRole::ALL
        .iter()
        .map(|role| {
            (
                role.to_string(),
                config.collaborators.endpoint(*role).to_string(),
            )
        })
        .collect();

    match format {
        OutputFormat::Text => {
            println!("Keel Diagnostics");
            println!("================");
            println!();

            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();
            println!("Routing:");
            for (category, chain) in &routing {
                println!("  {:<25} {}", format!("{}:", category), chain);
            }

            println!();
            println!("Collaborators:");
            for (role, endpoint) in &collaborators {
                println!("  {:<25} {}", format!("{}:", role), endpoint);
            }

            println!();
            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({ "name": name, "status": status })
                }).collect::<Vec<_>>(),
                "routing": routing.iter()
                    .map(|(category, chain)| (category.clone(), json!(chain)))
                    .collect::<serde_json::Map<String, serde_json::Value>>(),
                "collaborators": collaborators.iter().map(|(role, endpoint)| {
                    json!({ "role": role, "endpoint": endpoint })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            print_json(&output)?;
        }
    }

    Ok(())
}
