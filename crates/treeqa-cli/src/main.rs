//! TreeQA CLI
//!
//! Command-line interface for:
//! - Answering one question and showing the refined logic tree
//! - Running benchmark datasets into resumable JSONL result files
//! - Scoring result files
//! - Rendering a stored tree as markdown

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use treeqa_core::providers::{
    create_completion_service, StaticCatalog, StaticLinker, StaticResolver, StaticRetriever,
};
use treeqa_core::{Collaborators, Engine, EpisodeReport};

mod batch;
mod config;
mod dataset;
mod eval;
mod record;

use config::AppConfig;
use dataset::DatasetFormat;

#[derive(Parser)]
#[command(name = "treeqa")]
#[command(author, version, about = "TreeQA: self-adaptive hierarchical question answering")]
struct Cli {
    /// Config file (default: ./treeqa.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Completion provider: openai | mock
    #[arg(long, global = true)]
    provider: Option<String>,
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question and print the tree, answer and metrics
    Single {
        #[arg(short, long)]
        question: String,
    },

    /// Run a benchmark dataset, appending one JSON line per question
    ///
    /// Ids already present in the output file are skipped, so an interrupted
    /// run can be restarted with the same arguments.
    Dataset {
        #[arg(short, long, value_enum)]
        format: DatasetFormat,
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Questions in flight (default from config: 5)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Only the first N dataset items
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Score a result file
    Eval {
        #[arg(short, long)]
        input: PathBuf,
        /// JSON object mapping gold answers to alias lists
        #[arg(long)]
        aliases: Option<PathBuf>,
        /// Write missed records here as JSONL
        #[arg(long)]
        errors: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print one stored tree as markdown
    Render {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        id: String,
    },
}

fn init_tracing(verbose: bool) {
    // `treeqa` prefixes every workspace crate's target.
    let default = if verbose { "treeqa=debug" } else { "treeqa=info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(provider) = cli.provider {
        config.provider.kind = provider;
    }

    match cli.command {
        Commands::Single { question } => cmd_single(&config, &question).await,
        Commands::Dataset {
            format,
            input,
            output,
            workers,
            limit,
        } => {
            let config = config.with_workers(workers);
            cmd_dataset(&config, format, &input, &output, limit).await
        }
        Commands::Eval {
            input,
            aliases,
            errors,
            json,
        } => cmd_eval(&input, aliases.as_deref(), errors.as_deref(), json),
        Commands::Render { input, id } => cmd_render(&input, &id),
    }
}

// ============================================================================
// Engine assembly
// ============================================================================

fn offline_sources() -> Collaborators {
    Collaborators {
        linker: Arc::new(StaticLinker::new()),
        resolver: Arc::new(StaticResolver::new()),
        catalog: Arc::new(StaticCatalog::new()),
        retriever: Arc::new(StaticRetriever::new()),
    }
}

fn build_engine(config: &AppConfig) -> Result<Engine> {
    let service = create_completion_service(&config.provider.kind, &config.model)
        .with_context(|| format!("failed to set up provider {}", config.provider.kind))?;
    let sources = if config.provider.kind == "mock" {
        offline_sources()
    } else {
        treeqa_wiki::collaborators(&config.wiki())?
    };
    tracing::info!(
        provider = %config.provider.kind,
        model = %service.model_name(),
        "engine ready"
    );
    Ok(Engine::new(service, sources, config.engine.clone()))
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_single(config: &AppConfig, question: &str) -> Result<()> {
    let engine = build_engine(config)?;
    println!("{} {}", "Question:".cyan().bold(), question);

    let report = engine.answer(question).await;
    print_report(&report);
    if report.is_failed() {
        return Err(anyhow!("episode failed"));
    }
    Ok(())
}

fn print_report(report: &EpisodeReport) {
    println!();
    if let Some(error) = &report.error {
        println!("{} {}", "error:".red().bold(), error);
    }
    if let Some(tree) = &report.tree {
        println!("{} {}", "Fix count:".bold(), tree.fix_count);
        println!();
        println!("{}", tree.to_markdown());
    }
    println!(
        "{} {}",
        "Final answer:".green().bold(),
        report.final_answer.as_deref().unwrap_or("-")
    );

    let m = &report.metrics;
    println!();
    println!("{}", "Metrics".bold());
    println!("  Logic init time:        {:.4}s", m.logic_init_time);
    println!("  Self-adaptive time:     {:.4}s", m.self_adaptive_time);
    println!("  Final reasoning time:   {:.4}s", m.final_reasoning_time);
    println!("  Total processing time:  {:.4}s", m.total_processing_time);
    println!("  Logic init tokens:      {}", m.logic_init_tokens);
    println!("  Self-adaptive tokens:   {}", m.self_adaptive_tokens);
    println!("  Final reasoning tokens: {}", m.final_reasoning_tokens);
    println!("  Total tokens:           {}", m.total_tokens);
    if let Some(walk) = &report.walk {
        println!(
            "  Nodes: {} visited, {} accepted, {} rejected, {} repaired, {} skipped, {} escalated",
            walk.visited, walk.accepted, walk.rejected, walk.repaired, walk.skipped, walk.escalated
        );
    }
}

async fn cmd_dataset(
    config: &AppConfig,
    format: DatasetFormat,
    input: &Path,
    output: &Path,
    limit: Option<usize>,
) -> Result<()> {
    let mut items = dataset::load(input, format)?;
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    eprintln!(
        "{} {} questions from {}",
        "Loaded".green().bold(),
        items.len(),
        input.display()
    );

    let engine = build_engine(config)?;
    let summary = batch::run_dataset(engine, items, output, config.batch.workers).await?;

    eprintln!(
        "{} {} written ({} failed), {} skipped -> {}",
        "done".green().bold(),
        summary.written,
        summary.failed,
        summary.skipped,
        output.display().to_string().bold()
    );
    Ok(())
}

fn cmd_eval(
    input: &Path,
    aliases: Option<&Path>,
    errors: Option<&Path>,
    json: bool,
) -> Result<()> {
    let records = record::read_records(input)?;
    let aliases = aliases.map(eval::load_aliases).transpose()?;
    let (report, misses) = eval::evaluate(&records, aliases.as_ref())?;

    if let Some(path) = errors {
        let lines: Vec<String> = misses
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<_, _>>()?;
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("{} {} misses -> {}", "wrote".green().bold(), misses.len(), path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Evaluation".bold());
    println!("  Records:                {} ({} failed)", report.records, report.failed);
    println!(
        "  Aliases:                {}",
        if aliases.is_some() { "yes" } else { "no" }
    );
    println!("  EM (contains):          {:.4} ({:.2}%)", report.contains_match, report.contains_match * 100.0);
    println!("  EM (exact):             {:.4}", report.exact_match);
    println!("  F1:                     {:.4}", report.f1);
    println!("  Precision:              {:.4}", report.precision);
    println!("  Recall:                 {:.4}", report.recall);
    println!("  Avg logic init time:    {:.4}s", report.avg_logic_init_time);
    println!("  Avg self-adaptive time: {:.4}s", report.avg_self_adaptive_time);
    println!("  Avg final reasoning:    {:.4}s", report.avg_final_reasoning_time);
    println!("  Avg total time:         {:.4}s", report.avg_total_processing_time);
    println!("  Avg logic init tokens:  {:.2}", report.avg_logic_init_tokens);
    println!("  Avg self-adaptive tok.: {:.2}", report.avg_self_adaptive_tokens);
    println!("  Avg final reasoning t.: {:.2}", report.avg_final_reasoning_tokens);
    println!("  Avg total tokens:       {:.2}", report.avg_total_tokens);
    println!("  Avg fix count:          {:.2}", report.avg_fix_count);
    Ok(())
}

fn cmd_render(input: &Path, id: &str) -> Result<()> {
    let records = record::read_records(input)?;
    let record = records
        .iter()
        .find(|r| r.id == id)
        .ok_or_else(|| anyhow!("no record with id {id} in {}", input.display()))?;

    match &record.processed_answer {
        Some(tree) => {
            println!("{}", tree.to_markdown());
            Ok(())
        }
        None => Err(anyhow!(
            "record {id} has no tree ({})",
            record.error.as_deref().unwrap_or("failed episode")
        )),
    }
}
