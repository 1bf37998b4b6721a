//! Display-intent classification.
//!
//! Decides whether the user wants to see a table, a chart, both or neither.
//! The result only gates rendering; it never influences which handler runs.
//! Any failure (transport, missing JSON, bad JSON) falls back to
//! [`DisplayIntent::default`], i.e. data without a chart.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm_client::{extract_json_object, strip_code_fences, ChatMessage, LlmClient};

/// What the presentation layer should show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayIntent {
    #[serde(default = "default_show_data")]
    pub show_data: bool,
    #[serde(default)]
    pub show_plot: bool,
}

fn default_show_data() -> bool {
    true
}

impl Default for DisplayIntent {
    fn default() -> Self {
        Self {
            show_data: default_show_data(),
            show_plot: false,
        }
    }
}

const INTENT_PROMPT: &str = r#"You are an expert at understanding user intent for a data analysis chatbot.
Analyze the user's query and determine if they want to see a data table, a plot, both, or neither.

Respond with a JSON object with two boolean keys: "show_data" and "show_plot".

Follow these rules:
1. If the query asks for a visualization ("plot", "graph", "chart", "visualize") but does NOT explicitly ask for the data, set "show_plot": true and "show_data": false.
   Example: "Plot the monthly revenue" -> {"show_data": false, "show_plot": true}
2. If the query asks for a visualization AND also for the data ("show me the data and a plot", "give me the table and a chart"), set both to true.
   Example: "Show me the sales data and plot it" -> {"show_data": true, "show_plot": true}
3. If the query asks only for data or a list ("list", "show me", "what are"), set "show_data": true and "show_plot": false.
   Example: "List the top 5 products" -> {"show_data": true, "show_plot": false}
4. If the query asks for a single fact or number, set both to false.
   Example: "How many customers are there?" -> {"show_data": false, "show_plot": false}
5. When in doubt, default to {"show_data": true, "show_plot": false}.

Return only the JSON object."#;

/// Parse a classifier reply; `None` when no usable JSON object is present
pub fn parse_intent(response: &str) -> Option<DisplayIntent> {
    let cleaned = strip_code_fences(response);
    let json = extract_json_object(&cleaned)?;
    serde_json::from_str(json).ok()
}

/// Display-intent classifier backed by the external model
pub struct IntentClassifier<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> IntentClassifier<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }

    /// Never fails; see module docs for the fallback
    pub fn classify(&self, question: &str) -> DisplayIntent {
        let messages = [
            ChatMessage::system(INTENT_PROMPT),
            ChatMessage::user(format!("User query: \"{}\"", question)),
        ];

        let response = match self.llm.chat(&messages) {
            Ok(r) => r,
            Err(e) => {
                warn!("Intent classification failed: {}, using default", e);
                return DisplayIntent::default();
            }
        };

        match parse_intent(&response) {
            Some(intent) => {
                debug!("Intent: {:?}", intent);
                intent
            }
            None => {
                warn!("Could not parse intent from {:?}, using default", response);
                DisplayIntent::default()
            }
        }
    }
}
