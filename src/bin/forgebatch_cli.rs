//! ForgeBatch CLI
//!
//! Commands: render, validate, templates
//! Outputs JSON to stdout, logs to stderr
//! Returns non-zero when any unit or group failed

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use forgebatch_core::group::{discover_templates, list_prefixes, open_all};
use forgebatch_core::logging::init_logging;
use forgebatch_core::{
    compute_manifest_hash, DocumentReader, FontResolver, JsonDocumentReader, OutputFormat, RenderConfig,
    RenderOrchestrator, RunOptions,
};

#[derive(Parser)]
#[command(name = "forgebatch-cli")]
#[command(about = "ForgeBatch CLI - render layered templates from datasets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON run configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    templates_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Prefix -> font mapping
    #[arg(long, global = true)]
    fonts_config: Option<PathBuf>,

    #[arg(long, global = true)]
    fonts_dir: Option<PathBuf>,

    /// Write straight into {output-dir}/{prefix}
    #[arg(long, global = true)]
    no_timestamp: bool,

    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every row of one or more template groups
    Render {
        #[arg(required = true)]
        prefixes: Vec<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Png)]
        format: OutputFormat,

        /// Only render templates with this suffix (repeatable)
        #[arg(long)]
        only: Vec<String>,
    },

    /// Check a group's dataset against its directives
    Validate { prefix: String },

    /// List template groups and their directives
    Templates { prefix: Option<String> },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            let output = serde_json::json!({ "success": false, "error": format!("{:#}", e) });
            println!("{}", output);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<RenderConfig> {
    let mut config = match &cli.config {
        Some(path) => RenderConfig::from_file(path)?,
        None => RenderConfig::default(),
    };
    if let Some(dir) = &cli.templates_dir {
        config.templates_dir = dir.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(path) = &cli.fonts_config {
        config.fonts_config = path.clone();
    }
    if let Some(dir) = &cli.fonts_dir {
        config.fonts_dir = dir.clone();
    }
    if cli.no_timestamp {
        config.timestamped_output = false;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Render { prefixes, format, only } => {
            let fonts = FontResolver::from_config_file(&config.fonts_config, &config.fonts_dir, &config.default_font);
            let manifest_path = config.output_dir.join("manifest.json");
            let mut orchestrator = RenderOrchestrator::new(config, Box::new(fonts));
            let summary = orchestrator.run(&prefixes, &RunOptions { format, only });

            if let Err(e) = summary.write_manifest(&manifest_path) {
                tracing::warn!(manifest = %manifest_path.display(), error = %e, "could not write manifest");
            }

            let groups: Vec<_> = summary
                .groups
                .iter()
                .map(|g| {
                    serde_json::json!({
                        "prefix": g.prefix,
                        "state": g.state,
                        "successes": g.successes(),
                        "failures": g.failures(),
                        "groupError": g.group_error.as_ref().map(ToString::to_string),
                        "outputDir": g.output_dir,
                    })
                })
                .collect();
            let output = serde_json::json!({
                "success": summary.all_succeeded(),
                "runId": summary.run_id,
                "successes": summary.total_successes(),
                "failures": summary.total_failures(),
                "manifestHash": summary.manifest_hash()?,
                "groups": groups,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);

            Ok(if summary.all_succeeded() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }

        Commands::Validate { prefix } => {
            let fonts = FontResolver::from_config_file(&config.fonts_config, &config.fonts_dir, &config.default_font);
            let orchestrator = RenderOrchestrator::new(config, Box::new(fonts));
            let group = match orchestrator.discover(&prefix, &[]) {
                Ok(group) => group,
                Err(e) => {
                    let output = serde_json::json!({ "valid": false, "error": e });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                    return Ok(ExitCode::FAILURE);
                }
            };
            let report = orchestrator.validate_group(&group);
            let output = serde_json::json!({
                "valid": !report.is_fatal,
                "prefix": prefix,
                "report": report,
                "messages": report.describe(),
                "reportHash": compute_manifest_hash(&report)?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);

            Ok(if report.is_fatal { ExitCode::from(2) } else { ExitCode::SUCCESS })
        }

        Commands::Templates { prefix } => {
            let reader = JsonDocumentReader::new();
            let prefixes = match prefix {
                Some(p) => vec![p],
                None => list_prefixes(&config.templates_dir, reader.extension())
                    .with_context(|| format!("listing {}", config.templates_dir.display()))?,
            };

            let mut groups = vec![];
            for prefix in prefixes {
                let paths = discover_templates(&config.templates_dir, &prefix, reader.extension(), &[])
                    .with_context(|| format!("listing {}", config.templates_dir.display()))?;
                let documents = open_all(&reader, &paths)?;
                let templates: Vec<_> = documents
                    .iter()
                    .map(|d| {
                        serde_json::json!({
                            "file": d.file_name(),
                            "suffix": d.suffix,
                            "directives": d.directives(),
                            "issues": d.directive_issues.iter().map(|i| format!("{}: {}", i.node, i.message)).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                groups.push(serde_json::json!({ "prefix": prefix, "templates": templates }));
            }

            println!("{}", serde_json::to_string_pretty(&groups)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
