//! Shared library for ShopQA, natural-language questions over an
//! e-commerce dataset.
//!
//! A question is routed by an external model to one of five domain tools;
//! the tool asks the model for a structured query plan, runs it over the
//! session's relations and parks the resulting table in a session cache.
//! The orchestrator then summarizes the answer and decides what to show.

pub mod cache;
pub mod chart;
pub mod config;
pub mod error;
pub mod handlers;
pub mod intent;
pub mod llm_client;
pub mod orchestrator;
pub mod query_plan;
pub mod session;
pub mod summarizer;
pub mod table;
pub mod tools;

pub use cache::{make_query_id, ResultCache};
pub use chart::{ChartGenerator, ChartOutput, ChartTemplate};
pub use config::QaConfig;
pub use error::{DataError, PlanError, QaError, ToolError};
pub use handlers::{Domain, HandlerOutput};
pub use intent::{DisplayIntent, IntentClassifier};
pub use llm_client::{FakeLlmClient, HttpLlmClient, LlmClient, LlmConfig, LlmError};
pub use orchestrator::{Orchestrator, ResponseEnvelope, Stage};
pub use query_plan::{QueryOutput, QueryPlan};
pub use session::Session;
pub use table::{Table, TableKind, TableSet, Value};
pub use tools::{ToolOutput, ToolRegistry};

/// Version string shown by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
