//! Tool Registry
//!
//! Exposes the five domain handlers as tools the tool-selecting model can
//! call. Each tool takes a single free-text `query` argument and returns a
//! JSON string `{"answer": ..., "query_id": ...}`. Tabular results never
//! travel through that text channel: they are parked in the session's
//! [`ResultCache`] and only the identifier is returned.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::cache::{make_query_id, ResultCache};
use crate::error::ToolError;
use crate::handlers::{self, Domain};
use crate::llm_client::{LlmClient, ToolSpec};
use crate::table::TableSet;

/// Return contract of every tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

impl ToolOutput {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.answer.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ToolArgs {
    query: String,
}

/// The domain tool catalog
pub struct ToolRegistry {
    tools: HashMap<String, Domain>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let tools = Domain::ALL.iter().map(|d| (d.tool_name(), *d)).collect();
        Self { tools }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Domain> {
        self.tools.get(name).copied()
    }

    /// Tool declarations in a stable order
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .iter()
            .map(|(name, domain)| ToolSpec {
                name: name.clone(),
                description: domain.description().to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The user's question, verbatim"
                        }
                    },
                    "required": ["query"]
                }),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Run the named tool; a non-empty table lands in the cache
    pub fn invoke(
        &self,
        name: &str,
        arguments: &str,
        tables: &TableSet,
        cache: &mut ResultCache,
        llm: &dyn LlmClient,
    ) -> Result<ToolOutput, ToolError> {
        let domain = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let query = parse_query_argument(name, arguments)?;

        debug!("Invoking {} with query {:?}", name, query);
        let output = handlers::handle(domain, &query, tables, llm);

        let query_id = match output.table {
            Some(table) if !table.is_empty() => {
                let id = make_query_id(domain.prefix(), &query);
                cache.put(id.clone(), table);
                Some(id)
            }
            _ => None,
        };

        info!(
            "Tool {} finished (query_id: {})",
            name,
            query_id.as_deref().unwrap_or("none")
        );

        Ok(ToolOutput {
            answer: output.answer,
            query_id,
        })
    }
}

/// Accepts `{"query": "..."}` or a bare JSON string
fn parse_query_argument(tool: &str, arguments: &str) -> Result<String, ToolError> {
    let bad = |reason: String| ToolError::BadArguments {
        tool: tool.to_string(),
        reason,
    };

    let value: serde_json::Value = serde_json::from_str(arguments).map_err(|e| bad(e.to_string()))?;
    let query = match value {
        serde_json::Value::String(s) => s,
        other => {
            serde_json::from_value::<ToolArgs>(other)
                .map_err(|e| bad(e.to_string()))?
                .query
        }
    };

    if query.trim().is_empty() {
        return Err(bad("empty query".to_string()));
    }
    Ok(query)
}
