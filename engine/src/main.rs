// Keel feature pipeline
// Main entry point for the keel binary

use clap::Parser;
use keel_engine::cli::{Cli, Command};
use keel_engine::config::Config;
use keel_engine::handlers::{
    handle_build, handle_code, handle_doctor, handle_memory, handle_research, handle_route,
    OutputFormat,
};
use keel_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log beats the configured level; RUST_LOG beats both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::info!(
        "Keel v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Command::Build {
            spec,
            context,
            stack,
        } => handle_build(spec, context, stack, &config, format).await,

        Command::Memory { action } => {
            tracing::debug!("Memory action: {:?}", action);
            handle_memory(action, &config, format).await
        }

        Command::Route { category, prompt } => {
            handle_route(category, prompt, &config, format).await
        }

        Command::Research { library, context } => {
            handle_research(library, context, &config, format).await
        }

        Command::Code {
            description,
            language,
            style,
        } => handle_code(description, language, style, &config, format).await,

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
