//! Prose summary of an answer.

use tracing::debug;

use crate::error::QaError;
use crate::llm_client::{ChatMessage, LlmClient};
use crate::table::Table;

/// Rows of the table shown to the model
const PREVIEW_ROWS: usize = 3;

/// Prompt for a tabular answer: the record count must come first
pub fn table_summary_prompt(question: &str, table: &Table) -> String {
    format!(
        "A user asked: '{}'\n\
         In response, a data table with {} rows was found. Here are the first {} rows:\n\
         {}\n\n\
         Write a concise, 2-3 line summary. IMPORTANT: Start by stating the total number of records found. \
         Then, add a brief insight.",
        question,
        table.len(),
        PREVIEW_ROWS,
        table.to_text(PREVIEW_ROWS)
    )
}

/// Prompt for a text-only answer
pub fn answer_summary_prompt(question: &str, answer: &str) -> String {
    format!(
        "A user asked: '{}'\n\
         The direct answer is: {}\n\
         Rephrase this into a friendly, complete sentence.",
        question, answer
    )
}

pub struct Summarizer<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> Summarizer<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }

    /// One model round-trip; transport errors propagate
    pub fn summarize(&self, question: &str, answer: &str, table: Option<&Table>) -> Result<String, QaError> {
        let prompt = match table {
            Some(t) => table_summary_prompt(question, t),
            None => answer_summary_prompt(question, answer),
        };
        debug!("Summarizing (table: {})", table.is_some());
        let summary = self.llm.chat(&[ChatMessage::system(prompt)])?;
        Ok(summary.trim().to_string())
    }
}
