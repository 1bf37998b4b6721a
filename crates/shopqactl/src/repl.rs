//! REPL - one session, many questions
//!
//! The session (relations and result cache) lives until the user quits.
//! A failed question is reported and the loop goes on.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::io::{self, BufRead, Write};

use shopqa_shared::{LlmClient, QaConfig, Session};

use crate::render::{self, RenderOptions};

const PROMPT: &str = "shopqa> ";

/// Answer one question and render it
pub fn answer(
    session: &mut Session,
    llm: &dyn LlmClient,
    config: &QaConfig,
    options: &RenderOptions,
    question: &str,
) -> Result<()> {
    let envelope = session.ask(llm, &config.agent, question)?;
    render::render(&envelope, question, llm, &config.chart, options)
}

pub fn run(session: &mut Session, llm: &dyn LlmClient, config: &QaConfig, options: &RenderOptions) -> Result<()> {
    println!(
        "{} ({} relation(s) loaded, session {} started {})",
        "ShopQA".cyan().bold(),
        session.tables.len(),
        session.id,
        session.started_at.format("%H:%M:%S")
    );
    println!("Ask about orders, revenue, delivery or customer behavior. Type 'exit' to quit.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("{}", PROMPT.bold());
        io::stdout().flush().context("Failed to flush stdout")?;

        let line = match lines.next() {
            Some(line) => line.context("Failed to read input")?,
            None => break,
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        if let Err(e) = answer(session, llm, config, options, question) {
            render::print_failure(&e);
        }
    }

    println!(
        "Answered {} question(s), {} cached result(s).",
        session.questions_asked(),
        session.cache().len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopqa_shared::llm_client::{FakeLlmClient, LlmError};
    use shopqa_shared::TableSet;
    use std::path::PathBuf;

    fn options() -> RenderOptions {
        RenderOptions {
            json: true,
            chart_out: PathBuf::from("chart.svg"),
            max_rows: 10,
        }
    }

    #[test]
    fn test_answer_surfaces_model_failure() {
        let llm = FakeLlmClient::always_error(LlmError::Disabled);
        let mut session = Session::new(TableSet::new());
        let err = answer(&mut session, &llm, &QaConfig::default(), &options(), "total sales?").unwrap_err();
        assert!(render::failure_report(&err).starts_with("[llm] "));
    }

    #[test]
    fn test_answer_renders_plain_reply() {
        let llm = FakeLlmClient::with_texts(&[
            r#"{"show_data": false, "show_plot": false}"#,
            "There are no orders loaded.",
            "No orders are loaded right now.",
        ]);
        let mut session = Session::new(TableSet::new());
        answer(&mut session, &llm, &QaConfig::default(), &options(), "how many orders?").unwrap();
        assert_eq!(session.questions_asked(), 1);
    }
}
