//! Terminal rendering of a response envelope.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use shopqa_shared::chart::{ChartGenerator, ChartOutput};
use shopqa_shared::config::ChartConfig;
use shopqa_shared::{LlmClient, QaError, ResponseEnvelope};

pub struct RenderOptions {
    pub json: bool,
    pub chart_out: PathBuf,
    pub max_rows: usize,
}

fn heading(title: &str) {
    println!();
    println!("{}", format!("### {}", title).cyan().bold());
}

pub fn render(
    envelope: &ResponseEnvelope,
    question: &str,
    llm: &dyn LlmClient,
    chart: &ChartConfig,
    options: &RenderOptions,
) -> Result<()> {
    if options.json {
        println!(
            "{}",
            serde_json::to_string_pretty(envelope).context("Failed to serialize response")?
        );
        return Ok(());
    }

    let data = envelope.data.as_ref().filter(|t| !t.is_empty());

    if !envelope.show_data && !envelope.plot {
        heading("Answer");
        println!("{}", envelope.answer.green());
    }

    if envelope.plot {
        match data {
            Some(table) => {
                heading("Chart");
                let enriched = table.with_datetime_parts();
                match ChartGenerator::new(llm, chart).generate(&enriched, question) {
                    ChartOutput::Image(bytes) => match fs::write(&options.chart_out, bytes) {
                        Ok(()) => println!("Chart written to {}", options.chart_out.display().bold()),
                        Err(e) => {
                            warn!("Chart write to {} failed: {}", options.chart_out.display(), e);
                            println!("{} {}", "Could not save chart:".yellow(), e);
                        }
                    },
                    ChartOutput::Error(payload) => {
                        println!("{} {}", "Plot generation failed:".yellow(), payload);
                    }
                }
            }
            None => println!("{}", "Could not generate a plot as no data was found.".yellow()),
        }
    }

    if envelope.show_data {
        if let Some(table) = data {
            heading("Data Table");
            println!("{}", format!("Total rows found: {}", table.len()).bold());
            if table.len() > options.max_rows {
                println!("{}", format!("Showing top {} rows", options.max_rows).dimmed());
            }
            println!("{}", table.to_text(options.max_rows));
        }
    }

    if !envelope.summary.is_empty() {
        heading("Summary");
        println!("{}", envelope.summary);
    }

    Ok(())
}

/// Outermost failure: generic message plus the error chain
pub fn failure_report(err: &anyhow::Error) -> String {
    match err.downcast_ref::<QaError>() {
        Some(qa) => format!("[{}] {:#}", qa.code(), err),
        None => format!("{:#}", err),
    }
}

pub fn print_failure(err: &anyhow::Error) {
    eprintln!("{}", "An unexpected error occurred during execution.".red().bold());
    eprintln!("  {}", failure_report(err));
}
