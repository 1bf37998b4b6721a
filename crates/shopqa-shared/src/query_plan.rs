//! Structured query plans.
//!
//! Domain handlers never execute model-written code. The model describes the
//! transformation as a JSON plan built from a fixed set of primitives
//! (join, derive, filter, group-by aggregate, sort, limit, select) and this
//! module interprets it against the session's relations.
//!
//! Interpretation order:
//! from → joins → derive → filters → aggregate → sort → limit → select

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::PlanError;
use crate::table::{Table, TableKind, TableSet, Value};

/// Names a plan may not give to a derived or aggregated column
pub const RESERVED_NAMES: &[&str] = &["df"];

// ============================================================================
// Plan schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryPlan {
    pub from: String,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub derive: Vec<Derive>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregate: Option<Aggregate>,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub sort: Option<Sort>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Join {
    pub table: String,
    pub on: String,
    #[serde(default)]
    pub how: JoinKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    Left,
    Inner,
}

/// Computed column
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Derive {
    /// `end - start` in fractional days
    DaysBetween { name: String, start: String, end: String },
    Year { name: String, column: String },
    Month { name: String, column: String },
    Date { name: String, column: String },
    Multiply { name: String, left: String, right: String },
}

impl Derive {
    pub fn name(&self) -> &str {
        match self {
            Derive::DaysBetween { name, .. }
            | Derive::Year { name, .. }
            | Derive::Month { name, .. }
            | Derive::Date { name, .. }
            | Derive::Multiply { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    IsNull,
    NotNull,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Aggregate {
    pub op: AggOp,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Aggregation primitive, shared with the chart generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggOp {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    Nunique,
}

impl AggOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggOp::Count => "count",
            AggOp::Sum => "sum",
            AggOp::Mean => "mean",
            AggOp::Min => "min",
            AggOp::Max => "max",
            AggOp::Nunique => "nunique",
        }
    }

    /// Apply to one group's values. `Count` counts non-null cells.
    pub fn apply(&self, values: &[&Value], column: &str) -> Result<Value, PlanError> {
        let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();

        match self {
            AggOp::Count => Ok(Value::Int(present.len() as i64)),
            AggOp::Nunique => {
                let mut keys: Vec<String> = present.iter().map(|v| v.group_key()).collect();
                keys.sort();
                keys.dedup();
                Ok(Value::Int(keys.len() as i64))
            }
            AggOp::Sum | AggOp::Mean => {
                let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
                if numbers.is_empty() && !present.is_empty() {
                    return Err(PlanError::NotNumeric {
                        op: self.as_str().to_string(),
                        column: column.to_string(),
                    });
                }
                if *self == AggOp::Mean {
                    if numbers.is_empty() {
                        return Ok(Value::Null);
                    }
                    return Ok(Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64));
                }
                let int_total = present.iter().try_fold(0i64, |acc, v| match v {
                    Value::Int(i) => acc.checked_add(*i),
                    _ => None,
                });
                // all-Int sums stay Int unless they overflow
                match int_total {
                    Some(total) => Ok(Value::Int(total)),
                    None => Ok(Value::Float(numbers.iter().sum())),
                }
            }
            AggOp::Min | AggOp::Max => {
                let picked = present.into_iter().reduce(|best, v| {
                    let ord = v.compare(best).unwrap_or(std::cmp::Ordering::Equal);
                    let better = if *self == AggOp::Min { ord.is_lt() } else { ord.is_gt() };
                    if better {
                        v
                    } else {
                        best
                    }
                });
                Ok(picked.cloned().unwrap_or(Value::Null))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sort {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

/// Tagged result of a plan
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Table(Table),
    Scalar(Value),
}

// ============================================================================
// Interpreter
// ============================================================================

fn check_name(name: &str) -> Result<(), PlanError> {
    let lower = name.to_lowercase();
    if RESERVED_NAMES.contains(&lower.as_str()) || TableKind::from_name(&lower).is_some() {
        return Err(PlanError::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Run a plan against the session's relations
pub fn execute(plan: &QueryPlan, tables: &TableSet) -> Result<QueryOutput, PlanError> {
    let mut table = tables.get_by_name(&plan.from)?.clone();
    table.name = "result".to_string();

    for join in &plan.joins {
        let right = tables.get_by_name(&join.table)?;
        table = hash_join(&table, right, &join.on, join.how)?;
    }

    for derive in &plan.derive {
        apply_derive(&mut table, derive)?;
    }

    for filter in &plan.filters {
        apply_filter(&mut table, filter)?;
    }

    debug!(
        "Plan over '{}': {} rows after joins/filters",
        plan.from,
        table.len()
    );

    match &plan.aggregate {
        Some(aggregate) if plan.group_by.is_empty() => {
            let values = aggregate_input(&table, aggregate)?;
            let refs: Vec<&Value> = values.iter().collect();
            let column = aggregate.column.as_deref().unwrap_or("*");
            return Ok(QueryOutput::Scalar(aggregate.op.apply(&refs, column)?));
        }
        Some(aggregate) => {
            table = group_aggregate(&table, &plan.group_by, aggregate)?;
        }
        None if !plan.group_by.is_empty() => return Err(PlanError::GroupWithoutAggregate),
        None => {}
    }

    if let Some(sort) = &plan.sort {
        let idx = table.require_column(&sort.column)?;
        table.rows.sort_by(|a, b| {
            let ord = a[idx].compare(&b[idx]).unwrap_or(std::cmp::Ordering::Equal);
            if sort.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    if let Some(limit) = plan.limit {
        table.rows.truncate(limit);
    }

    if !plan.select.is_empty() {
        table = project(&table, &plan.select)?;
    }

    Ok(QueryOutput::Table(table))
}

fn hash_join(left: &Table, right: &Table, on: &str, how: JoinKind) -> Result<Table, PlanError> {
    let left_key = left.require_column(on)?;
    let right_key = right.require_column(on)?;

    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in right.rows.iter().enumerate() {
        if !row[right_key].is_null() {
            index.entry(row[right_key].group_key()).or_default().push(i);
        }
    }

    let right_cols: Vec<usize> = (0..right.num_columns()).filter(|&i| i != right_key).collect();
    let mut columns = left.columns.clone();
    for &i in &right_cols {
        let name = &right.columns[i];
        if left.column_index(name).is_some() {
            columns.push(format!("{}_{}", name, right.name));
        } else {
            columns.push(name.clone());
        }
    }

    let mut joined = Table::new(left.name.clone(), columns);
    for row in &left.rows {
        let matches = if row[left_key].is_null() {
            None
        } else {
            index.get(&row[left_key].group_key())
        };
        match matches {
            Some(hits) => {
                for &hit in hits {
                    let mut out = row.clone();
                    out.extend(right_cols.iter().map(|&i| right.rows[hit][i].clone()));
                    joined.push_row(out);
                }
            }
            None if how == JoinKind::Left => {
                let mut out = row.clone();
                out.extend(right_cols.iter().map(|_| Value::Null));
                joined.push_row(out);
            }
            None => {}
        }
    }
    Ok(joined)
}

fn apply_derive(table: &mut Table, derive: &Derive) -> Result<(), PlanError> {
    check_name(derive.name())?;

    let values: Vec<Value> = match derive {
        Derive::DaysBetween { start, end, .. } => {
            let s = table.require_column(start)?;
            let e = table.require_column(end)?;
            table
                .rows
                .iter()
                .map(|row| match (row[s].as_datetime(), row[e].as_datetime()) {
                    (Some(a), Some(b)) => Value::Float((b - a).num_seconds() as f64 / 86_400.0),
                    _ => Value::Null,
                })
                .collect()
        }
        Derive::Year { column, .. } | Derive::Month { column, .. } | Derive::Date { column, .. } => {
            use chrono::Datelike;
            let c = table.require_column(column)?;
            table
                .rows
                .iter()
                .map(|row| match row[c].as_datetime() {
                    Some(dt) => match derive {
                        Derive::Year { .. } => Value::Int(dt.year() as i64),
                        Derive::Month { .. } => Value::Int(dt.month() as i64),
                        _ => Value::Text(dt.date().to_string()),
                    },
                    None => Value::Null,
                })
                .collect()
        }
        Derive::Multiply { left, right, .. } => {
            let l = table.require_column(left)?;
            let r = table.require_column(right)?;
            table
                .rows
                .iter()
                .map(|row| match (row[l].as_f64(), row[r].as_f64()) {
                    (Some(a), Some(b)) => Value::Float(a * b),
                    _ => Value::Null,
                })
                .collect()
        }
    };

    table.add_column(derive.name(), values);
    Ok(())
}

fn apply_filter(table: &mut Table, filter: &Filter) -> Result<(), PlanError> {
    let idx = table.require_column(&filter.column)?;
    let target = Value::from_json(&filter.value);
    let needle = target.to_string().to_lowercase();

    table.rows.retain(|row| {
        let cell = &row[idx];
        match filter.op {
            FilterOp::IsNull => cell.is_null(),
            FilterOp::NotNull => !cell.is_null(),
            FilterOp::Eq => cell.loosely_equals(&target),
            FilterOp::Ne => !cell.loosely_equals(&target),
            FilterOp::Contains => cell.to_string().to_lowercase().contains(&needle),
            _ if cell.is_null() => false,
            op => match cell.compare(&target) {
                Some(ord) => match op {
                    FilterOp::Gt => ord.is_gt(),
                    FilterOp::Ge => ord.is_ge(),
                    FilterOp::Lt => ord.is_lt(),
                    _ => ord.is_le(),
                },
                None => false,
            },
        }
    });
    Ok(())
}

/// Values fed to an aggregate; `count` without a column counts rows
fn aggregate_input(table: &Table, aggregate: &Aggregate) -> Result<Vec<Value>, PlanError> {
    match &aggregate.column {
        Some(column) => {
            let idx = table.require_column(column)?;
            Ok(table.column_values(idx).cloned().collect())
        }
        None if aggregate.op == AggOp::Count => Ok(vec![Value::Int(1); table.len()]),
        None => Err(PlanError::MissingAggregateColumn(aggregate.op.as_str().to_string())),
    }
}

fn aggregate_alias(aggregate: &Aggregate) -> String {
    match (&aggregate.alias, &aggregate.column) {
        (Some(alias), _) => alias.clone(),
        (None, Some(column)) if aggregate.op != AggOp::Count => {
            format!("{}_{}", aggregate.op.as_str(), column)
        }
        _ => aggregate.op.as_str().to_string(),
    }
}

fn group_aggregate(table: &Table, group_by: &[String], aggregate: &Aggregate) -> Result<Table, PlanError> {
    let alias = aggregate_alias(aggregate);
    check_name(&alias)?;

    let key_idx: Vec<usize> = group_by
        .iter()
        .map(|c| table.require_column(c))
        .collect::<Result<_, _>>()?;
    let values = aggregate_input(table, aggregate)?;
    let column = aggregate.column.as_deref().unwrap_or("*");

    // first-seen group order
    let mut order: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
    let mut slots: HashMap<Vec<String>, usize> = HashMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        let key: Vec<String> = key_idx.iter().map(|&k| row[k].group_key()).collect();
        let slot = *slots.entry(key).or_insert_with(|| {
            order.push((key_idx.iter().map(|&k| row[k].clone()).collect(), Vec::new()));
            order.len() - 1
        });
        order[slot].1.push(i);
    }

    let mut columns: Vec<String> = key_idx.iter().map(|&k| table.columns[k].clone()).collect();
    columns.push(alias);
    let mut out = Table::new(table.name.clone(), columns);

    for (keys, members) in order {
        let group: Vec<&Value> = members.iter().map(|&i| &values[i]).collect();
        let mut row = keys;
        row.push(aggregate.op.apply(&group, column)?);
        out.push_row(row);
    }
    Ok(out)
}

fn project(table: &Table, select: &[String]) -> Result<Table, PlanError> {
    let idx: Vec<usize> = select
        .iter()
        .map(|c| table.require_column(c))
        .collect::<Result<_, _>>()?;
    let mut out = Table::new(
        table.name.clone(),
        idx.iter().map(|&i| table.columns[i].clone()).collect(),
    );
    for row in &table.rows {
        out.push_row(idx.iter().map(|&i| row[i].clone()).collect());
    }
    Ok(out)
}
