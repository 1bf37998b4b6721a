//! End-to-end pipeline tests with a scripted model.
//!
//! Tests verify:
//! - show_data/plot never outlive a missing table
//! - Tables travel through the cache, not the tool-call text
//! - Malformed classifier output falls back to the default intent
//! - The summarizer template follows table presence

use serde_json::json;
use shopqa_shared::config::AgentConfig;
use shopqa_shared::llm_client::{AssistantReply, FakeLlmClient, LlmError};
use shopqa_shared::{make_query_id, DisplayIntent, IntentClassifier, Orchestrator, ResultCache, Table, TableKind, TableSet, Value};

fn payments() -> TableSet {
    TableSet::new().with(
        TableKind::Payments,
        Table::from_rows(
            "payments",
            &["order_id", "payment_type", "payment_value"],
            vec![
                vec![Value::Text("o1".into()), Value::Text("credit_card".into()), Value::Float(100.0)],
                vec![Value::Text("o2".into()), Value::Text("boleto".into()), Value::Float(50.0)],
                vec![Value::Text("o3".into()), Value::Text("credit_card".into()), Value::Float(25.5)],
            ],
        ),
    )
}

/// Script: intent, tool call, handler plan, agent echo, summary
fn scripted(intent: &str, question: &str, plan: &str, summary: &str) -> FakeLlmClient {
    let id = make_query_id("payment", question);
    FakeLlmClient::new(vec![
        Ok(AssistantReply::text(intent)),
        Ok(AssistantReply::tool_call("call_1", "payment_query_tool", json!({"query": question}))),
        Ok(AssistantReply::text(plan)),
        Ok(AssistantReply::text(
            json!({"answer": "Found 2 records matching your payment query.", "query_id": id}).to_string(),
        )),
        Ok(AssistantReply::text(summary)),
    ])
}

const GROUP_PLAN: &str = r#"{"result": {"from": "payments", "group_by": ["payment_type"], "aggregate": {"op": "sum", "column": "payment_value", "alias": "total"}, "sort": {"column": "total", "descending": true}}}"#;

#[test]
fn test_table_flows_through_cache_into_envelope() {
    let question = "Show me the payment totals and plot them";
    let llm = scripted(
        r#"{"show_data": true, "show_plot": true}"#,
        question,
        GROUP_PLAN,
        "2 payment types found. Credit card dominates.",
    );
    let mut cache = ResultCache::new();
    let envelope = Orchestrator::new(&llm, &AgentConfig::default())
        .run(question, &payments(), &mut cache)
        .unwrap();

    assert!(envelope.show_data);
    assert!(envelope.plot);
    let data = envelope.data.unwrap();
    assert_eq!(data.columns, vec!["category", "value"]);
    assert_eq!(data.rows[0], vec![Value::Text("credit_card".into()), Value::Float(125.5)]);

    // the table itself never entered the transcript
    let transcripts = llm.requests();
    let tool_message = transcripts[3].last().unwrap();
    assert!(!tool_message.content_str().contains("credit_card"));
    assert!(tool_message.content_str().contains("payment_show_me_the_payment_totals_and_plot_them"));

    // table-present summary template
    assert!(transcripts[4][0].content_str().contains("a data table with 2 rows"));
    assert_eq!(cache.get(&make_query_id("payment", question)), Some(&data));
}

#[test]
fn test_flags_are_false_when_no_table_whatever_the_intent() {
    for intent in [
        r#"{"show_data": true, "show_plot": true}"#,
        r#"{"show_data": true, "show_plot": false}"#,
        r#"{"show_data": false, "show_plot": true}"#,
    ] {
        let llm = FakeLlmClient::new(vec![
            Ok(AssistantReply::text(intent)),
            Ok(AssistantReply::tool_call("call_1", "customer_query_tool", json!({"query": "customers"}))),
            Ok(AssistantReply::text(r#"{"answer": "Customer data not available."}"#)),
            Ok(AssistantReply::text("Sorry, no customer data is loaded.")),
        ]);
        let mut cache = ResultCache::new();
        let envelope = Orchestrator::new(&llm, &AgentConfig::default())
            .run("customers", &payments(), &mut cache)
            .unwrap();

        assert_eq!(envelope.answer, "Customer data not available.");
        assert!(envelope.data.is_none());
        assert!(!envelope.show_data);
        assert!(!envelope.plot);
        assert!(cache.is_empty());
        // text-only summary template
        let last = llm.requests().last().unwrap()[0].content_str().to_string();
        assert!(last.contains("The direct answer is: Customer data not available."));
    }
}

#[test]
fn test_truncated_classifier_json_uses_default() {
    let llm = FakeLlmClient::always_text(r#"{"show_plot": tru"#);
    let intent = IntentClassifier::new(&llm).classify("plot payments");
    assert_eq!(
        intent,
        DisplayIntent {
            show_data: true,
            show_plot: false
        }
    );
}

#[test]
fn test_malformed_classifier_does_not_abort_pipeline() {
    let question = "payment totals";
    let llm = scripted("no idea, sorry", question, GROUP_PLAN, "Two types.");
    let mut cache = ResultCache::new();
    let envelope = Orchestrator::new(&llm, &AgentConfig::default())
        .run(question, &payments(), &mut cache)
        .unwrap();

    assert!(envelope.show_data);
    assert!(!envelope.plot);
    assert!(envelope.data.is_some());
}

#[test]
fn test_raw_agent_text_becomes_answer() {
    let llm = FakeLlmClient::new(vec![
        Ok(AssistantReply::text(r#"{"show_data": false, "show_plot": false}"#)),
        Ok(AssistantReply::text("The average payment is 58.50.")),
        Ok(AssistantReply::text("On average customers pay 58.50.")),
    ]);
    let mut cache = ResultCache::new();
    let envelope = Orchestrator::new(&llm, &AgentConfig::default())
        .run("average payment", &payments(), &mut cache)
        .unwrap();
    assert_eq!(envelope.answer, "The average payment is 58.50.");
    assert_eq!(envelope.summary, "On average customers pay 58.50.");
}

#[test]
fn test_summarizer_failure_propagates() {
    let llm = FakeLlmClient::new(vec![
        Ok(AssistantReply::text(r#"{"show_data": false, "show_plot": false}"#)),
        Ok(AssistantReply::text("42")),
        Err(LlmError::Timeout(120)),
    ]);
    let mut cache = ResultCache::new();
    let err = Orchestrator::new(&llm, &AgentConfig::default())
        .run("q", &payments(), &mut cache)
        .unwrap_err();
    assert_eq!(err.code(), "llm");
}

#[test]
fn test_same_question_overwrites_cache_slot() {
    let question = "payment totals";
    let mut cache = ResultCache::new();
    for _ in 0..2 {
        let llm = scripted(r#"{"show_data": true, "show_plot": false}"#, question, GROUP_PLAN, "ok");
        Orchestrator::new(&llm, &AgentConfig::default())
            .run(question, &payments(), &mut cache)
            .unwrap();
    }
    assert_eq!(cache.len(), 1);
}
