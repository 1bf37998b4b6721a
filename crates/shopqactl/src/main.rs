//! ShopQA Control - ask questions about the e-commerce dataset
//!
//! Loads the relations once, then answers one question (`ask`) or keeps a
//! session open (`repl`) so cached results live as long as the session.

mod render;
mod repl;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use shopqa_shared::{HttpLlmClient, QaConfig, Session, VERSION};

use crate::render::RenderOptions;

#[derive(Parser)]
#[command(name = "shopqactl")]
#[command(about = "ShopQA - natural-language questions over e-commerce data", long_about = None)]
#[command(version = VERSION)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/shopqa/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding customers.csv, orders.csv, ...
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Where generated charts are written
    #[arg(long, global = true, default_value = "chart.svg")]
    chart_out: PathBuf,

    /// Print the response envelope as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        /// The question, e.g. "plot customers by state"
        #[arg(required = true)]
        question: Vec<String>,
    },

    /// Interactive session
    Repl,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = QaConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data.dir = dir;
    }
    debug!("Using data directory {}", config.data.dir.display());

    let llm = HttpLlmClient::new(config.llm.clone()).context("Failed to create LLM client")?;
    let mut session = Session::open(&config.data.dir)
        .with_context(|| format!("Failed to load tables from {}", config.data.dir.display()))?;

    let options = RenderOptions {
        json: cli.json,
        chart_out: cli.chart_out,
        max_rows: config.display.max_rows,
    };

    match cli.command {
        Commands::Ask { question } => {
            let question = question.join(" ");
            if let Err(e) = repl::answer(&mut session, &llm, &config, &options, question.trim()) {
                render::print_failure(&e);
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Repl => repl::run(&mut session, &llm, &config, &options),
    }
}
