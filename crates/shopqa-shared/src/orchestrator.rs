//! Orchestrator - question to response envelope
//!
//! Linear pipeline, one pass per question:
//!
//! ```text
//! Start -> ClassifyIntent -> SelectAndRunTool -> ParseToolOutput
//!       -> (RetrieveCachedTable) -> Summarize -> Done
//! ```
//!
//! Domain routing is done by the external model through tool calls; this
//! module only drives the bounded tool-calling loop, looks the produced
//! table up in the session cache and assembles the envelope. Classification
//! failures and unparseable tool output degrade to documented defaults.
//! Transport failures of the tool loop or the summarizer propagate.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::config::AgentConfig;
use crate::error::QaError;
use crate::intent::IntentClassifier;
use crate::llm_client::{strip_code_fences, ChatMessage, LlmClient};
use crate::summarizer::Summarizer;
use crate::table::{Table, TableSet};
use crate::tools::ToolRegistry;

pub const NO_ANSWER: &str = "Could not find an answer.";
pub const ITERATION_LIMIT: &str = "Agent stopped due to iteration limit.";

const AGENT_SYSTEM_PROMPT: &str = "You are a data retrieval assistant. Your ONLY job is to use a tool \
to get the data that answers the user's question. If the user asks for a plot or graph, focus on \
getting the necessary underlying data for it. Your final answer MUST be only the raw, unmodified \
JSON string from the tool.";

/// Pipeline stage, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    ClassifyIntent,
    SelectAndRunTool,
    ParseToolOutput,
    RetrieveCachedTable,
    Summarize,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::ClassifyIntent => write!(f, "classify_intent"),
            Self::SelectAndRunTool => write!(f, "select_and_run_tool"),
            Self::ParseToolOutput => write!(f, "parse_tool_output"),
            Self::RetrieveCachedTable => write!(f, "retrieve_cached_table"),
            Self::Summarize => write!(f, "summarize"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// What the presentation layer receives
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub answer: String,
    pub data: Option<Table>,
    pub summary: String,
    /// Always false without `data`
    pub show_data: bool,
    /// Always false without `data`
    pub plot: bool,
}

/// Split the agent's final output into answer and query id.
///
/// Anything that is not a JSON object is taken verbatim as the answer.
pub fn parse_tool_output(raw: &str) -> (String, Option<String>) {
    let cleaned = strip_code_fences(raw);
    match serde_json::from_str::<serde_json::Value>(&cleaned) {
        Ok(serde_json::Value::Object(map)) => {
            let answer = map
                .get("answer")
                .and_then(|v| v.as_str())
                .unwrap_or(raw)
                .to_string();
            let query_id = map
                .get("query_id")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
            (answer, query_id)
        }
        _ => {
            debug!("Tool output is not a JSON object, using it as the answer");
            (raw.to_string(), None)
        }
    }
}

pub struct Orchestrator<'a> {
    llm: &'a dyn LlmClient,
    registry: ToolRegistry,
    max_iterations: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(llm: &'a dyn LlmClient, config: &AgentConfig) -> Self {
        Self {
            llm,
            registry: ToolRegistry::new(),
            max_iterations: config.max_iterations,
        }
    }

    /// Answer one question
    pub fn run(&self, question: &str, tables: &TableSet, cache: &mut ResultCache) -> Result<ResponseEnvelope, QaError> {
        enter(Stage::Start);

        enter(Stage::ClassifyIntent);
        let intent = IntentClassifier::new(self.llm).classify(question);

        enter(Stage::SelectAndRunTool);
        let raw = self.run_agent(question, tables, cache)?;

        enter(Stage::ParseToolOutput);
        let (answer, query_id) = parse_tool_output(&raw);

        let data = match query_id {
            Some(id) => {
                enter(Stage::RetrieveCachedTable);
                let table = cache.get(&id).cloned();
                if table.is_none() {
                    warn!("No cached result for query id {}", id);
                }
                table
            }
            None => None,
        };

        enter(Stage::Summarize);
        let summary = Summarizer::new(self.llm).summarize(question, &answer, data.as_ref())?;

        let present = data.is_some();
        let envelope = ResponseEnvelope {
            answer,
            data,
            summary,
            show_data: intent.show_data && present,
            plot: intent.show_plot && present,
        };
        enter(Stage::Done);
        Ok(envelope)
    }

    /// Bounded tool-calling loop; returns the model's final text
    pub fn run_agent(&self, question: &str, tables: &TableSet, cache: &mut ResultCache) -> Result<String, QaError> {
        let specs = self.registry.specs();
        let mut messages = vec![
            ChatMessage::system(AGENT_SYSTEM_PROMPT),
            ChatMessage::user(question),
        ];

        for iteration in 1..=self.max_iterations {
            let reply = self.llm.chat_with_tools(&messages, &specs)?;

            if reply.tool_calls.is_empty() {
                let output = reply
                    .content
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| NO_ANSWER.to_string());
                debug!("Agent finished after {} iteration(s)", iteration);
                return Ok(output);
            }

            messages.push(ChatMessage::assistant(&reply));
            for call in &reply.tool_calls {
                let result = match self
                    .registry
                    .invoke(&call.name, &call.arguments, tables, cache, self.llm)
                {
                    Ok(output) => output.to_json(),
                    Err(e) => {
                        warn!("Tool call rejected: {}", e);
                        format!("Error: {}", e)
                    }
                };
                messages.push(ChatMessage::tool_result(call.id.clone(), result));
            }
        }

        warn!("Agent hit the iteration limit ({})", self.max_iterations);
        Ok(ITERATION_LIMIT.to_string())
    }
}

fn enter(stage: Stage) {
    info!("Stage: {}", stage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::make_query_id;
    use crate::llm_client::{AssistantReply, FakeLlmClient, LlmError};
    use crate::table::{TableKind, Value};
    use serde_json::json;

    fn customers() -> TableSet {
        TableSet::new().with(
            TableKind::Customers,
            Table::from_rows(
                "customers",
                &["customer_id", "customer_state"],
                vec![
                    vec![Value::Text("c1".into()), Value::Text("SP".into())],
                    vec![Value::Text("c2".into()), Value::Text("RJ".into())],
                    vec![Value::Text("c3".into()), Value::Text("SP".into())],
                ],
            ),
        )
    }

    fn config(max_iterations: usize) -> AgentConfig {
        AgentConfig { max_iterations }
    }

    #[test]
    fn test_parse_tool_output() {
        assert_eq!(
            parse_tool_output(r#"{"answer": "Found 2", "query_id": "customer_x"}"#),
            ("Found 2".to_string(), Some("customer_x".to_string()))
        );
        assert_eq!(
            parse_tool_output(r#"{"answer": "42"}"#),
            ("42".to_string(), None)
        );
        assert_eq!(
            parse_tool_output("There are 42 customers."),
            ("There are 42 customers.".to_string(), None)
        );
        assert_eq!(parse_tool_output("[1, 2]"), ("[1, 2]".to_string(), None));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::SelectAndRunTool.to_string(), "select_and_run_tool");
    }

    #[test]
    fn test_full_pipeline_with_table() {
        let question = "plot customers by state";
        let id = make_query_id("customer", question);
        let tool_json = json!({"answer": "Found 2 records matching your customer query.", "query_id": id}).to_string();

        let llm = FakeLlmClient::new(vec![
            Ok(AssistantReply::text(r#"{"show_data": false, "show_plot": true}"#)),
            Ok(AssistantReply::tool_call("call_1", "customer_query_tool", json!({"query": question}))),
            Ok(AssistantReply::text(
                r#"{"result": {"from": "customers", "group_by": ["customer_state"], "aggregate": {"op": "count", "column": "customer_id", "alias": "customer_count"}}}"#,
            )),
            Ok(AssistantReply::text(tool_json)),
            Ok(AssistantReply::text("There are 2 states. SP leads.")),
        ]);

        let mut cache = ResultCache::new();
        let envelope = Orchestrator::new(&llm, &config(5))
            .run(question, &customers(), &mut cache)
            .unwrap();

        assert_eq!(envelope.answer, "Found 2 records matching your customer query.");
        let data = envelope.data.unwrap();
        assert_eq!(data.columns, vec!["category", "value"]);
        assert_eq!(data.len(), 2);
        assert!(envelope.plot);
        assert!(!envelope.show_data);
        assert_eq!(envelope.summary, "There are 2 states. SP leads.");
        assert_eq!(llm.call_count(), 5);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_flags_forced_false_without_table() {
        let llm = FakeLlmClient::new(vec![
            Ok(AssistantReply::text(r#"{"show_data": true, "show_plot": true}"#)),
            Ok(AssistantReply::text("There are 3 customers.")),
            Ok(AssistantReply::text("We have 3 customers.")),
        ]);
        let mut cache = ResultCache::new();
        let envelope = Orchestrator::new(&llm, &config(5))
            .run("how many customers", &customers(), &mut cache)
            .unwrap();

        assert_eq!(envelope.answer, "There are 3 customers.");
        assert!(envelope.data.is_none());
        assert!(!envelope.show_data);
        assert!(!envelope.plot);
    }

    #[test]
    fn test_cache_miss_is_no_table() {
        let llm = FakeLlmClient::new(vec![
            Ok(AssistantReply::text(r#"{"show_data": true, "show_plot": false}"#)),
            Ok(AssistantReply::text(r#"{"answer": "Found 9", "query_id": "order_gone"}"#)),
            Ok(AssistantReply::text("Nine.")),
        ]);
        let mut cache = ResultCache::new();
        let envelope = Orchestrator::new(&llm, &config(5))
            .run("orders", &customers(), &mut cache)
            .unwrap();
        assert_eq!(envelope.answer, "Found 9");
        assert!(envelope.data.is_none());
        assert!(!envelope.show_data);
    }

    #[test]
    fn test_unknown_tool_is_fed_back() {
        let llm = FakeLlmClient::new(vec![
            Ok(AssistantReply::tool_call("call_1", "sql_tool", json!({"query": "x"}))),
            Ok(AssistantReply::text("done")),
        ]);
        let mut cache = ResultCache::new();
        let output = Orchestrator::new(&llm, &config(5))
            .run_agent("q", &customers(), &mut cache)
            .unwrap();
        assert_eq!(output, "done");

        let second = &llm.requests()[1];
        let feedback = second.last().unwrap();
        assert_eq!(feedback.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(feedback.content_str(), "Error: Unknown tool 'sql_tool'");
    }

    #[test]
    fn test_iteration_limit() {
        let llm = FakeLlmClient::new(vec![Ok(AssistantReply::tool_call(
            "call_1",
            "customer_query_tool",
            json!({"query": "  "}),
        ))]);
        let mut cache = ResultCache::new();
        let output = Orchestrator::new(&llm, &config(3))
            .run_agent("q", &customers(), &mut cache)
            .unwrap();
        assert_eq!(output, ITERATION_LIMIT);
        assert_eq!(llm.call_count(), 3);
    }

    #[test]
    fn test_empty_final_reply() {
        let llm = FakeLlmClient::new(vec![Ok(AssistantReply::text("   "))]);
        let mut cache = ResultCache::new();
        let output = Orchestrator::new(&llm, &config(3))
            .run_agent("q", &customers(), &mut cache)
            .unwrap();
        assert_eq!(output, NO_ANSWER);
    }

    #[test]
    fn test_agent_transport_error_propagates() {
        let llm = FakeLlmClient::always_error(LlmError::Timeout(120));
        let mut cache = ResultCache::new();
        let err = Orchestrator::new(&llm, &config(3))
            .run("q", &customers(), &mut cache)
            .unwrap_err();
        assert!(matches!(err, QaError::Llm(LlmError::Timeout(120))));
    }
}
