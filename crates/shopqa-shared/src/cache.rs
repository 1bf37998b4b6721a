//! Session-scoped result cache.
//!
//! Bridges the text-only tool-call channel and the tabular results: a tool
//! stores its table under a query identifier and returns only the
//! identifier; the orchestrator later looks the table up.
//!
//! Identifiers are a pure function of (domain prefix, normalized question),
//! so two questions that normalize to the same text share one slot and the
//! last write wins. Entries are never evicted; the cache lives as long as
//! the session that owns it.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::table::Table;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").unwrap());

/// Deterministic identifier: `<prefix>_<lower-cased question, non-word runs as '_'>`
pub fn make_query_id(prefix: &str, query: &str) -> String {
    let lowered = query.trim().to_lowercase();
    let clean = NON_WORD.replace_all(&lowered, "_");
    format!("{}_{}", prefix, clean)
}

/// Key-value store of tabular results for one session
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<String, Table>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite
    pub fn put(&mut self, id: impl Into<String>, table: Table) {
        let id = id.into();
        if self.entries.contains_key(&id) {
            debug!("Result cache: overwriting {}", id);
        }
        self.entries.insert(id, table);
    }

    pub fn get(&self, id: &str) -> Option<&Table> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    fn sample() -> Table {
        Table::from_rows(
            "result",
            &["category", "value"],
            vec![vec![Value::Text("boleto".into()), Value::Float(10.5)]],
        )
    }

    #[test]
    fn test_query_id_normalizes_whitespace_and_case() {
        assert_eq!(
            make_query_id("order", "  Total   Sales "),
            make_query_id("order", "total sales")
        );
        assert_eq!(make_query_id("order", "total sales"), "order_total_sales");
    }

    #[test]
    fn test_query_id_differs_per_domain() {
        assert_ne!(
            make_query_id("order", "total sales"),
            make_query_id("payment", "total sales")
        );
    }

    #[test]
    fn test_query_id_collapses_punctuation() {
        assert_eq!(
            make_query_id("customer", "Customers by state?!"),
            "customer_customers_by_state_"
        );
    }

    #[test]
    fn test_put_get() {
        let mut cache = ResultCache::new();
        cache.put("order_total_sales", sample());
        assert_eq!(cache.get("order_total_sales"), Some(&sample()));
        assert!(cache.get("nonexistent_id").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let mut cache = ResultCache::new();
        cache.put("order_x", sample());
        let mut other = sample();
        other.rows.clear();
        cache.put("order_x", other.clone());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("order_x"), Some(&other));
    }
}
