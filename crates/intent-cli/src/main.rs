//! Intent CLI - Command-line interface
//!
//! Usage:
//!   intent resolve <utterance>...
//!   intent recognize <text>
//!   intent standardize <text>
//!   intent check-config
//!
//! Author: hephaex@gmail.com

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use serde_json::json;

use intent_arena::{IntentResolver, ResolveContext};
use intent_core::{AppConfig, IntentCatalog, LoggingConfig};
use intent_extractor::{EntityPipeline, FileDictionarySource, PhraseStandardizer};

#[derive(Parser)]
#[command(name = "intent")]
#[command(about = "Intent recognition and tournament arbitration CLI")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overrides the configured one
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve utterances to intents; reads stdin lines when none are given
    Resolve {
        utterances: Vec<String>,

        /// Expected business domain
        #[arg(long)]
        domain: Option<String>,

        /// Reference time for relative dates (e.g. 2024-03-15T10:00:00)
        #[arg(long)]
        now: Option<NaiveDateTime>,

        /// Print resolver statistics after the results
        #[arg(long)]
        stats: bool,
    },
    /// Recognize entities in a text
    Recognize {
        text: String,

        /// Reference date for relative dates (e.g. 2024-03-15)
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Rewrite colloquial phrases to their standard form
    Standardize { text: String },
    /// Validate configuration, catalog and dictionaries
    CheckConfig,
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.data.data_dir = dir.clone();
    }
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.as_str().into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_catalog(config: &AppConfig) -> anyhow::Result<IntentCatalog> {
    let path = config.data.catalog_path();
    IntentCatalog::from_file(&path).with_context(|| format!("loading {}", path.display()))
}

fn load_pipeline(config: &AppConfig) -> anyhow::Result<EntityPipeline> {
    let source = Arc::new(FileDictionarySource::new(config.data.dictionary_path()));
    EntityPipeline::from_source(source).context("loading entity dictionaries")
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging);
    tracing::debug!(
        data_dir = %config.data.data_dir.display(),
        provider = ?config.llm.provider,
        "configuration loaded"
    );

    match cli.command {
        Commands::Resolve {
            utterances,
            domain,
            now,
            stats,
        } => {
            let resolver = IntentResolver::from_config(config)?;
            let now = now.unwrap_or_else(|| Local::now().naive_local());

            let utterances = if utterances.is_empty() {
                std::io::stdin()
                    .lock()
                    .lines()
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                utterances
            };

            let mut ctx = ResolveContext::new();
            if let Some(domain) = domain {
                ctx = ctx.with_domain_hint(domain);
            }
            for utterance in utterances.iter().filter(|u| !u.trim().is_empty()) {
                let result = resolver.resolve(utterance, now, &mut ctx).await;
                print_json(&result)?;
            }

            if stats {
                print_json(&resolver.statistics())?;
            }
        }
        Commands::Recognize { text, today } => {
            let pipeline = load_pipeline(&config)?;
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            print_json(&pipeline.recognize(&text, today))?;
        }
        Commands::Standardize { text } => {
            let catalog = load_catalog(&config)?;
            let standardizer = PhraseStandardizer::new(&catalog.phrases);
            print_json(&json!({
                "original": text,
                "standardized": standardizer.standardize(&text),
            }))?;
        }
        Commands::CheckConfig => {
            config.validate()?;
            let catalog = load_catalog(&config)?;
            let pipeline = load_pipeline(&config)?;
            // Builds the scorer, which compiles every pattern
            let resolver = IntentResolver::new(config.clone(), catalog, pipeline)?;

            print_json(&json!({
                "status": "ok",
                "intents": resolver.catalog().len(),
                "confusing_pairs": resolver.catalog().confusing_pairs.len(),
                "phrases": resolver.standardizer().len(),
                "domains": resolver.pipeline().domains(),
                "llm_provider": config.llm.provider,
                "tournament_mode": config.tournament.mode,
                "max_llm_calls": config.tournament.max_llm_calls,
            }))?;
        }
    }

    Ok(())
}
