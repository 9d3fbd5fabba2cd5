//! # docflow CLI
//!
//! The `docflow` binary drives the analysis pipeline from the command line.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docflow detect <file>` | Print the detected document format |
//! | `docflow chunk <file>` | Normalize and chunk without dispatching |
//! | `docflow analyze <file>` | Run the full pipeline and print the result |
//! | `docflow providers` | Show provider configuration and credential status |
//!
//! ## Examples
//!
//! ```bash
//! # Summarize a PDF with the configured primary provider
//! docflow analyze quarterly-returns.pdf --task summarize
//!
//! # Extract entities, JSON output for scripts
//! docflow analyze complaints.docx --task entities --json
//!
//! # Custom directive
//! docflow analyze report.xlsx --prompt "List every SKU with a defect count"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docflow::analyze::AnalysisOrchestrator;
use docflow::chunk::chunk_units;
use docflow::config::{load_config, Config};
use docflow::detect::detect_format;
use docflow::extract::{OcrEngine, TesseractEngine};
use docflow::models::{RunStatus, TaskDirective};
use docflow::normalize::normalize;

/// docflow — a document normalization and multi-provider AI analysis
/// pipeline.
#[derive(Parser)]
#[command(
    name = "docflow",
    about = "Document normalization and multi-provider AI analysis pipeline",
    version,
    long_about = "docflow normalizes heterogeneous documents (PDF, DOCX, XLSX, CSV, images) \
    into provider-ready text, dispatches it to a configurable AI backend with retry and \
    fallback, and reduces the per-chunk outputs into one ordered analysis result."
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./docflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect a file's format from its byte signature.
    Detect {
        /// Input file.
        file: PathBuf,
    },

    /// Normalize and chunk a file without any provider dispatch.
    ///
    /// A dry run of the pipeline's local stages: useful to preview how a
    /// document splits before spending provider tokens.
    Chunk {
        /// Input file.
        file: PathBuf,
    },

    /// Run the full analysis pipeline on a file.
    Analyze {
        /// Input file.
        file: PathBuf,

        /// Task: summarize, entities, or categorize.
        #[arg(long, default_value = "summarize")]
        task: String,

        /// Custom task prompt (overrides --task).
        #[arg(long)]
        prompt: Option<String>,

        /// Emit the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show provider configuration and credential status.
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Detect { file } => cmd_detect(&file),
        Commands::Chunk { file } => cmd_chunk(&config, &file),
        Commands::Analyze {
            file,
            task,
            prompt,
            json,
        } => cmd_analyze(config, &file, &task, prompt, json).await,
        Commands::Providers => cmd_providers(&config),
    }
}

fn read_input(file: &PathBuf) -> Result<(Vec<u8>, String)> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read input file: {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((bytes, name))
}

fn cmd_detect(file: &PathBuf) -> Result<()> {
    let (bytes, name) = read_input(file)?;
    let format = detect_format(&bytes, Some(&name))?;
    println!("{}  {}  ({} bytes)", name, format, bytes.len());
    Ok(())
}

fn cmd_chunk(config: &Config, file: &PathBuf) -> Result<()> {
    let (bytes, name) = read_input(file)?;
    let format = detect_format(&bytes, Some(&name))?;
    let source = docflow::models::SourceDocument::new(name.clone(), format, bytes).with_name(name);

    let ocr = TesseractEngine::new(config.ocr.language.clone());
    let normalized = normalize(&source, Some(&ocr), &config.ocr)?;
    let chunks = chunk_units(&normalized, config.chunking.size_budget_tokens);

    println!("format: {}", format);
    println!("units: {}", normalized.total_units());
    println!("mean confidence: {:.2}", normalized.mean_confidence);
    if normalized.degraded() {
        println!(
            "degraded: yes ({} ocr, {} low-confidence/empty)",
            normalized.ocr_units, normalized.degraded_units
        );
    }
    println!("chunks: {}", chunks.len());
    for chunk in &chunks {
        let preview: String = chunk.text.chars().take(60).collect();
        println!(
            "  #{:<4} ~{:<5} tokens  units {:?}  {}",
            chunk.sequence,
            chunk.estimated_tokens,
            chunk.unit_ordinals,
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

async fn cmd_analyze(
    config: Config,
    file: &PathBuf,
    task: &str,
    prompt: Option<String>,
    json: bool,
) -> Result<()> {
    let directive = match prompt {
        Some(custom) => TaskDirective::Custom(custom),
        None => parse_task(task)?,
    };

    let (bytes, name) = read_input(file)?;
    let orchestrator = AnalysisOrchestrator::from_config(config)?;
    let result = orchestrator
        .analyze_bytes(&name, bytes, Some(&name), directive)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("document: {}", result.document_id);
    println!(
        "status: {}",
        match result.status {
            RunStatus::Complete => "complete",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    );
    if let Some(reason) = &result.failure_reason {
        println!("reason: {}", reason);
    }
    if result.degraded {
        println!("degraded: yes (OCR fallback or empty-content pages)");
    }
    println!(
        "tokens: {} prompt + {} completion",
        result.usage.prompt_tokens, result.usage.completion_tokens
    );
    for outcome in &result.chunks {
        println!("--- chunk #{} (units {:?})", outcome.sequence, outcome.unit_ordinals);
        match (&outcome.output_text, &outcome.error_reason) {
            (Some(text), _) => {
                if let Some(provider) = &outcome.provider {
                    println!("[{}]", provider);
                }
                println!("{}", text);
            }
            (None, Some(reason)) => println!("failed: {}", reason),
            (None, None) => {}
        }
    }
    Ok(())
}

fn parse_task(task: &str) -> Result<TaskDirective> {
    match task {
        "summarize" => Ok(TaskDirective::Summarize),
        "entities" | "extract-entities" => Ok(TaskDirective::ExtractEntities),
        "categorize" => Ok(TaskDirective::Categorize),
        other => anyhow::bail!(
            "Unknown task: '{}'. Must be summarize, entities, or categorize.",
            other
        ),
    }
}

fn cmd_providers(config: &Config) -> Result<()> {
    let role = |name: &str| {
        if config.provider.primary == name {
            "PRIMARY"
        } else if config.provider.secondary.as_deref() == Some(name) {
            "SECONDARY"
        } else {
            "-"
        }
    };
    let key_status = |var: &str| {
        if std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false) {
            "OK"
        } else {
            "MISSING KEY"
        }
    };

    println!("{:<12} {:<10} {:<14} DETAIL", "PROVIDER", "ROLE", "STATUS");
    println!(
        "{:<12} {:<10} {:<14} model {}",
        "openai",
        role("openai"),
        key_status("OPENAI_API_KEY"),
        config.provider.model
    );
    println!(
        "{:<12} {:<10} {:<14} model {}",
        "anthropic",
        role("anthropic"),
        key_status("ANTHROPIC_API_KEY"),
        config
            .provider
            .secondary_model
            .as_deref()
            .unwrap_or(&config.provider.model)
    );
    println!(
        "{:<12} {:<10} {:<14} url {}",
        "ollama",
        role("ollama"),
        "LOCAL",
        config.provider.ollama_url
    );

    let ocr = TesseractEngine::new(config.ocr.language.clone());
    println!();
    println!(
        "ocr: tesseract  {}  ({})",
        if ocr.is_available() { "OK" } else { "UNAVAILABLE" },
        ocr.availability_hint()
    );
    Ok(())
}
