//! CLI interface for Keel
//!
//! Command-line interface using clap's derive API.

use crate::llm::codegen::{CodeLanguage, CodeStyle};
use crate::memory::types::Severity;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Keel feature pipeline
///
/// Drives collaborator services through architecture, research, design,
/// generation and review, and keeps a memory of what went wrong before.
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline for a feature spec
    Build {
        /// Natural-language feature description
        spec: String,

        /// Existing-code context handed to every stage
        #[arg(long, default_value = "")]
        context: String,

        /// Technology stack, `+`-separated
        #[arg(long, default_value = crate::pipeline::DEFAULT_STACK)]
        stack: String,
    },

    /// Inspect and maintain the experience memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Send one prompt through the task router
    Route {
        /// Task category (orchestration, code, critique, memory)
        category: String,

        /// Prompt text
        prompt: String,
    },

    /// Look up current version, imports and notes for one library
    Research {
        /// Library name (e.g., react, @tanstack/react-query)
        library: String,

        /// Extra context such as language or framework version
        #[arg(long, default_value = "")]
        context: String,
    },

    /// Generate a snippet on the code route without running the pipeline
    Code {
        /// What the code should do
        description: String,

        /// python, typescript or javascript
        #[arg(long, default_value = "python", value_parser = parse_language)]
        language: CodeLanguage,

        /// modern, minimal or verbose
        #[arg(long, default_value = "modern", value_parser = parse_style)]
        style: CodeStyle,
    },

    /// Show resolved configuration and routing
    Doctor,
}

/// Memory actions
#[derive(Subcommand, Debug)]
pub enum MemoryAction {
    /// Show memory statistics
    Stats,

    /// Synthesize lessons for a task
    Lessons {
        /// Task description
        spec: String,

        #[arg(long, default_value = crate::pipeline::DEFAULT_STACK)]
        stack: String,

        /// Maximum lessons per category (defaults to memory.lessons_limit)
        #[arg(long)]
        limit: Option<usize>,

        /// Only consider experiences from this module
        #[arg(long)]
        module: Option<String>,

        /// Only consider these severities (repeatable)
        #[arg(long = "severity", value_parser = parse_severity)]
        severities: Vec<Severity>,
    },

    /// Store an experience from a JSON file
    Store {
        /// Path to the experience JSON
        file: PathBuf,
    },

    /// Record an architectural decision from a JSON file
    Decide {
        /// Path to the decision JSON
        file: PathBuf,
    },

    /// Collapse near-duplicate experiences
    Dedupe,

    /// Drop stale medium and low severity experiences
    Prune {
        /// Age cutoff in days (defaults to memory.prune_cutoff_days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Distill recurring patterns into meta-rules
    Consolidate,

    /// Run dedupe, prune, consolidate and stats in sequence
    Maintain,
}

fn parse_severity(s: &str) -> Result<Severity, String> {
    s.parse()
}

fn parse_language(s: &str) -> Result<CodeLanguage, String> {
    s.parse()
}

fn parse_style(s: &str) -> Result<CodeStyle, String> {
    s.parse()
}
