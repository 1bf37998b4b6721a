//! Question-answering session.
//!
//! Owns the relations (loaded once) and the result cache for as long as
//! the user keeps asking. Each session has its own cache, so concurrent
//! sessions never see each other's results.

use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::config::AgentConfig;
use crate::error::QaError;
use crate::llm_client::LlmClient;
use crate::orchestrator::{Orchestrator, ResponseEnvelope};
use crate::table::TableSet;

pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub tables: TableSet,
    cache: ResultCache,
    questions: usize,
}

impl Session {
    pub fn new(tables: TableSet) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            tables,
            cache: ResultCache::new(),
            questions: 0,
        };
        info!(
            "Session {} started with {} relation(s)",
            session.id,
            session.tables.len()
        );
        session
    }

    /// Load the relations from a directory of CSV files
    pub fn open(data_dir: &Path) -> Result<Self, QaError> {
        Ok(Self::new(TableSet::load_dir(data_dir)?))
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn questions_asked(&self) -> usize {
        self.questions
    }

    pub fn ask(&mut self, llm: &dyn LlmClient, agent: &AgentConfig, question: &str) -> Result<ResponseEnvelope, QaError> {
        self.questions += 1;
        info!("Session {} question #{}: {}", self.id, self.questions, question);
        Orchestrator::new(llm, agent).run(question, &self.tables, &mut self.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{AssistantReply, FakeLlmClient};
    use crate::table::{Table, TableKind, Value};
    use serde_json::json;

    #[test]
    fn test_sessions_do_not_share_cache() {
        let tables = TableSet::new().with(
            TableKind::Orders,
            Table::from_rows(
                "orders",
                &["order_id", "order_status"],
                vec![
                    vec![Value::Text("o1".into()), Value::Text("delivered".into())],
                    vec![Value::Text("o2".into()), Value::Text("shipped".into())],
                ],
            ),
        );
        let llm = FakeLlmClient::new(vec![
            Ok(AssistantReply::text(r#"{"show_data": true, "show_plot": false}"#)),
            Ok(AssistantReply::tool_call("c1", "order_query_tool", json!({"query": "list orders"}))),
            Ok(AssistantReply::text(r#"{"result": {"from": "orders"}}"#)),
            Ok(AssistantReply::text(r#"{"answer": "Found 2 records matching your order query.", "query_id": "order_list_orders"}"#)),
            Ok(AssistantReply::text("Two orders.")),
        ]);

        let mut first = Session::new(tables.clone());
        let second = Session::new(tables);
        let envelope = first.ask(&llm, &AgentConfig::default(), "list orders").unwrap();

        assert!(envelope.show_data);
        assert_eq!(envelope.data.unwrap().len(), 2);
        assert_eq!(first.cache().len(), 1);
        assert!(second.cache().is_empty());
        assert_ne!(first.id, second.id);
        assert_eq!(first.questions_asked(), 1);
    }

    #[test]
    fn test_open_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::open(dir.path()).unwrap();
        assert!(session.tables.is_empty());
    }
}
