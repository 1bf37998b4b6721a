//! Chart generation.
//!
//! The model never writes plotting code. It picks a chart from a JSON spec
//! (`kind`, `x`, `y`, optional `aggregate`, labels), which is resolved
//! against the table and drawn with plotters on the generator's [`Surface`]. Output is
//! either SVG bytes or a JSON error payload `{"error": "..."}`.

pub mod surface;

pub use surface::{ChartKind, Point, Surface, SurfaceGuard};

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::ChartConfig;
use crate::error::{PlanError, QaError};
use crate::llm_client::{extract_json_object, strip_code_fences, ChatMessage, LlmClient};
use crate::query_plan::AggOp;
use crate::table::{Table, Value};

static NON_IDENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9a-zA-Z_]").unwrap());

pub const NO_PLOT_ERROR: &str = "Generated chart did not produce a plot.";

// ============================================================================
// Types
// ============================================================================

/// Prompt template, picked by table size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartTemplate {
    /// Raw rows: the spec must aggregate before plotting
    AggregateThenPlot,
    /// Already aggregated: plot as is
    PlotPreaggregated,
}

impl ChartTemplate {
    pub fn marker(&self) -> &'static str {
        match self {
            Self::AggregateThenPlot => "TEMPLATE: aggregate_then_plot",
            Self::PlotPreaggregated => "TEMPLATE: plot_preaggregated",
        }
    }
}

/// Result of a chart request
#[derive(Debug, Clone, PartialEq)]
pub enum ChartOutput {
    /// SVG document
    Image(Vec<u8>),
    /// JSON string `{"error": "..."}`
    Error(String),
}

impl ChartOutput {
    pub fn error(message: &str) -> Self {
        ChartOutput::Error(serde_json::json!({ "error": message }).to_string())
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ChartOutput::Image(_))
    }
}

/// What the model asks to draw
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: String,
    pub y: String,
    #[serde(default)]
    pub aggregate: Option<AggOp>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub x_label: String,
    #[serde(default)]
    pub y_label: String,
    #[serde(default)]
    pub rotate_labels: bool,
}

// ============================================================================
// Pure steps
// ============================================================================

/// Lower-case and drop everything but ASCII alphanumerics and `_`
pub fn normalize_column_name(name: &str) -> String {
    NON_IDENT.replace_all(&name.to_lowercase(), "").into_owned()
}

pub fn normalize_columns(table: &Table) -> Table {
    let mut out = table.clone();
    for column in out.columns.iter_mut() {
        *column = normalize_column_name(column);
    }
    out
}

/// Strictly more rows AND strictly more columns than the thresholds
pub fn select_template(table: &Table, config: &ChartConfig) -> ChartTemplate {
    if table.len() > config.aggregate_min_rows && table.num_columns() > config.aggregate_min_columns {
        ChartTemplate::AggregateThenPlot
    } else {
        ChartTemplate::PlotPreaggregated
    }
}

pub fn build_chart_prompt(template: ChartTemplate, question: &str, columns: &[String]) -> String {
    let rules = match template {
        ChartTemplate::AggregateThenPlot => {
            "You have been given a RAW table with many rows. Your chart must first aggregate it into a meaningful summary.\n\
             RULES:\n\
             1. \"aggregate\" is REQUIRED: rows are grouped by \"x\" and \"y\" is combined with it (count, sum, mean, min, max or nunique).\n\
             2. Pick \"x\" as the grouping column and \"y\" as the measured column.\n\
             3. Set a title and both axis labels."
        }
        ChartTemplate::PlotPreaggregated => {
            "You have been given an already aggregated table. Plot it as is.\n\
             RULES:\n\
             1. For time-series data use \"kind\": \"line\". For categorical data use \"kind\": \"bar\".\n\
             2. Omit \"aggregate\" unless the question needs it.\n\
             3. Set a clear title and axis labels.\n\
             4. If x-axis labels are long, set \"rotate_labels\": true."
        }
    };

    format!(
        "{marker}\n\
         You are a data visualization expert. Describe one chart that answers the user's request.\n\
         The user's request is: \"{question}\"\n\
         The available columns are: {columns}\n\n\
         {rules}\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"kind\": \"bar|line\", \"x\": \"<column>\", \"y\": \"<column>\", \"aggregate\": \"count|sum|mean|min|max|nunique\", \
         \"title\": \"...\", \"x_label\": \"...\", \"y_label\": \"...\", \"rotate_labels\": false}}",
        marker = template.marker(),
        question = question,
        columns = columns.join(", "),
        rules = rules,
    )
}

pub fn parse_chart_spec(response: &str) -> Result<ChartSpec, PlanError> {
    let cleaned = strip_code_fences(response);
    let json = extract_json_object(&cleaned)
        .ok_or_else(|| PlanError::Malformed("no JSON chart spec in model response".to_string()))?;
    serde_json::from_str(json).map_err(|e| PlanError::Malformed(e.to_string()))
}

/// Resolve a spec against a (normalised) table into plottable points
pub fn chart_points(table: &Table, spec: &ChartSpec, template: ChartTemplate) -> Result<Vec<Point>, PlanError> {
    let x_idx = table.require_column(&normalize_column_name(&spec.x))?;
    let y_idx = table.require_column(&normalize_column_name(&spec.y))?;

    let mut pairs: Vec<(Value, f64)> = match spec.aggregate {
        Some(op) => aggregate_by(table, x_idx, y_idx, op, &spec.y)?,
        None if template == ChartTemplate::AggregateThenPlot => {
            return Err(PlanError::Malformed(
                "aggregate_then_plot requires an aggregate".to_string(),
            ));
        }
        None => table
            .rows
            .iter()
            .filter_map(|row| row[y_idx].as_f64().map(|y| (row[x_idx].clone(), y)))
            .collect(),
    };

    if spec.kind == ChartKind::Line {
        pairs.sort_by(|a, b| a.0.compare(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    }

    Ok(pairs
        .into_iter()
        .map(|(x, value)| Point {
            label: x.to_string(),
            value,
        })
        .collect())
}

fn aggregate_by(table: &Table, x_idx: usize, y_idx: usize, op: AggOp, y_name: &str) -> Result<Vec<(Value, f64)>, PlanError> {
    let mut order: Vec<(Value, Vec<&Value>)> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for row in &table.rows {
        let key = row[x_idx].group_key();
        let slot = match slots.get(&key) {
            Some(&slot) => slot,
            None => {
                order.push((row[x_idx].clone(), Vec::new()));
                slots.insert(key, order.len() - 1);
                order.len() - 1
            }
        };
        order[slot].1.push(&row[y_idx]);
    }

    let mut out = Vec::with_capacity(order.len());
    for (x, values) in order {
        if let Some(y) = op.apply(&values, y_name)?.as_f64() {
            out.push((x, y));
        }
    }
    Ok(out)
}

// ============================================================================
// Generator
// ============================================================================

pub struct ChartGenerator<'a> {
    llm: &'a dyn LlmClient,
    config: ChartConfig,
    surface: Surface,
}

impl<'a> ChartGenerator<'a> {
    pub fn new(llm: &'a dyn LlmClient, config: &ChartConfig) -> Self {
        Self {
            llm,
            config: config.clone(),
            surface: Surface::new(config.width, config.height),
        }
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Never fails; problems come back as [`ChartOutput::Error`]
    pub fn generate(&mut self, table: &Table, question: &str) -> ChartOutput {
        match self.try_generate(table, question) {
            Ok(output) => output,
            Err(e) => {
                warn!("Chart generation failed: {}", e);
                ChartOutput::error(&format!("Could not generate a valid chart. Details: {}", e))
            }
        }
    }

    fn try_generate(&mut self, table: &Table, question: &str) -> Result<ChartOutput, QaError> {
        let table = normalize_columns(table);
        let template = select_template(&table, &self.config);
        debug!("Chart template: {}", template.marker());

        let prompt = build_chart_prompt(template, question, &table.columns);
        let response = self.llm.chat(&[ChatMessage::system(prompt)])?;
        let spec = parse_chart_spec(&response)?;

        let mut surface = self.surface.begin();
        let points = chart_points(&table, &spec, template)?;
        surface.plot(spec.kind, points);
        surface.set_labels(&spec.title, &spec.x_label, &spec.y_label);
        surface.rotate_labels(spec.rotate_labels);

        if !surface.has_data() {
            warn!("Chart spec produced no plottable points");
            return Ok(ChartOutput::error(NO_PLOT_ERROR));
        }

        let svg = surface.render_svg()?;
        info!("Rendered {:?} chart, {} bytes", spec.kind, svg.len());
        Ok(ChartOutput::Image(svg.into_bytes()))
    }
}
