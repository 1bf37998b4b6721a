//! Error types for ShopQA.

use thiserror::Error;

use crate::llm_client::LlmError;

/// Top-level library error.
///
/// Only transport failures of the tool-selection loop and the summarizer
/// reach the caller as `QaError`; handler, classifier and chart failures
/// degrade to text before they get this far.
#[derive(Error, Debug)]
pub enum QaError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Render error: {0}")]
    Render(String),
}

/// Errors raised while loading the input relations.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Errors raised while interpreting a structured query or chart plan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Table '{0}' is not loaded")]
    TableNotLoaded(String),

    #[error("Unknown column '{column}' in {context}")]
    UnknownColumn { column: String, context: String },

    #[error("'{0}' is a reserved name and cannot be used for a result column")]
    ReservedName(String),

    #[error("Aggregate '{op}' needs a numeric column, '{column}' has none")]
    NotNumeric { op: String, column: String },

    #[error("Aggregate '{0}' requires a column")]
    MissingAggregateColumn(String),

    #[error("group_by requires an aggregate")]
    GroupWithoutAggregate,

    #[error("Malformed plan: {0}")]
    Malformed(String),
}

/// Errors raised while dispatching a model-requested tool call.
///
/// These never abort the agent loop; they are fed back to the model as
/// the tool result so it can correct itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    BadArguments { tool: String, reason: String },
}

impl QaError {
    /// Short machine-friendly code, printed next to the diagnostic detail.
    pub fn code(&self) -> &'static str {
        match self {
            QaError::Llm(_) => "llm",
            QaError::Data(_) => "data",
            QaError::Plan(_) => "plan",
            QaError::Config(_) => "config",
            QaError::Render(_) => "render",
        }
    }
}
