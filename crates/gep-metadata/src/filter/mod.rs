//! Filter expressions
//!
//! Subscriptions and metadata refresh requests select rows with expressions such as
//!
//! ```text
//! FILTER ActiveMeasurements WHERE SignalType = 'FREQ' ORDER BY PointTag;
//! PPA:12; {5e4d6a8b-0c2f-4b9e-9a7d-2f1c3b4a5d6e}
//! ```
//!
//! The publisher only depends on [`FilterEvaluator`]; [`ExpressionEngine`] is the
//! built-in implementation.

mod eval;
mod lexer;
mod parser;

pub use eval::like;
pub use parser::{parse_expression, CompareOp, Expr, FilterStatement, OrderBy, Statement};

use std::collections::HashSet;
use tracing::trace;

use crate::{DataSet, DataTable, FilterError};

/// Rows selected from one table, in match order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSelection {
    pub table: String,
    pub rows: Vec<usize>,
}

/// Evaluates filter expressions against a catalog
pub trait FilterEvaluator: Send + Sync {
    /// Evaluate every statement in `expression`, grouping matched rows by table.
    /// Statements without an explicit table address `default_table`.
    fn select_tables(
        &self,
        dataset: &DataSet,
        default_table: &str,
        expression: &str,
    ) -> Result<Vec<TableSelection>, FilterError>;

    /// Rows of `table` matched by `expression`. Statements addressing any other table fail.
    fn select(
        &self,
        dataset: &DataSet,
        table: &str,
        expression: &str,
    ) -> Result<Vec<usize>, FilterError> {
        let mut rows = Vec::new();

        for selection in self.select_tables(dataset, table, expression)? {
            if !selection.table.eq_ignore_ascii_case(table) {
                return Err(FilterError::evaluation(format!(
                    "expression addresses table \"{}\", expected \"{}\"",
                    selection.table, table
                )));
            }
            rows.extend(selection.rows);
        }

        Ok(rows)
    }
}

/// Built-in filter-expression engine
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEngine;

impl ExpressionEngine {
    pub fn new() -> Self {
        Self
    }
}

impl FilterEvaluator for ExpressionEngine {
    fn select_tables(
        &self,
        dataset: &DataSet,
        default_table: &str,
        expression: &str,
    ) -> Result<Vec<TableSelection>, FilterError> {
        let statements = parse_expression(expression)?;
        let mut selections: Vec<(TableSelection, HashSet<usize>)> = Vec::new();

        for statement in &statements {
            let table_name = statement.table().unwrap_or(default_table);
            let table = dataset.table(table_name).ok_or_else(|| {
                FilterError::evaluation(format!("Failed to find table \"{}\"", table_name))
            })?;

            let matched = match statement {
                Statement::Filter(filter) => eval::evaluate_filter(table, filter)?,
                Statement::SignalId(id) => {
                    let column = required_column(table, "SignalID")?;
                    matching_rows(table, |row| row.value_as_guid(column) == Some(*id))
                }
                Statement::Key(key) => select_by_key(table, key)?,
            };

            trace!(table = table.name(), matched = matched.len(), "evaluated filter statement");

            let index = match selections
                .iter()
                .position(|(s, _)| s.table.eq_ignore_ascii_case(table.name()))
            {
                Some(index) => index,
                None => {
                    selections.push((
                        TableSelection {
                            table: table.name().to_string(),
                            rows: Vec::new(),
                        },
                        HashSet::new(),
                    ));
                    selections.len() - 1
                }
            };

            let (selection, seen) = &mut selections[index];
            for row in matched {
                if seen.insert(row) {
                    selection.rows.push(row);
                }
            }
        }

        Ok(selections.into_iter().map(|(s, _)| s).collect())
    }
}

fn required_column(table: &DataTable, name: &str) -> Result<usize, FilterError> {
    table.column(name).map(|c| c.index()).ok_or_else(|| {
        FilterError::evaluation(format!(
            "Failed to find column \"{}\" in table \"{}\"",
            name,
            table.name()
        ))
    })
}

fn matching_rows(table: &DataTable, predicate: impl Fn(&crate::DataRow) -> bool) -> Vec<usize> {
    table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| predicate(row))
        .map(|(index, _)| index)
        .collect()
}

/// Match a measurement key against `ID`, falling back to `PointTag`
fn select_by_key(table: &DataTable, key: &str) -> Result<Vec<usize>, FilterError> {
    let equals = |column: usize| {
        move |row: &crate::DataRow| {
            row.value_as_string(column)
                .map(|v| v.eq_ignore_ascii_case(key))
                .unwrap_or(false)
        }
    };

    let id = table.column("ID").map(|c| c.index());
    let point_tag = table.column("PointTag").map(|c| c.index());

    if id.is_none() && point_tag.is_none() {
        return required_column(table, "ID").map(|_| Vec::new());
    }

    if let Some(column) = id {
        let rows = matching_rows(table, equals(column));
        if !rows.is_empty() {
            return Ok(rows);
        }
    }

    Ok(point_tag
        .map(|column| matching_rows(table, equals(column)))
        .unwrap_or_default())
}
