//! Statement evaluation against a data set

use std::cmp::Ordering;

use super::parser::{CompareOp, Expr, FilterStatement};
use crate::{DataRow, DataTable, FilterError, Value};

/// Rows of `table` matching a FILTER statement, sorted and limited as requested
pub fn evaluate_filter(table: &DataTable, statement: &FilterStatement) -> Result<Vec<usize>, FilterError> {
    let bound = bind(table, &statement.condition)?;

    let mut rows = Vec::new();
    for (index, row) in table.rows().iter().enumerate() {
        if truth(&bound, row)? == Some(true) {
            rows.push(index);
        }
    }

    if !statement.order_by.is_empty() {
        let keys = statement
            .order_by
            .iter()
            .map(|order| Ok((column_index(table, &order.column)?, order.descending)))
            .collect::<Result<Vec<_>, FilterError>>()?;

        rows.sort_by(|&a, &b| {
            for &(column, descending) in &keys {
                let left = table.rows()[a].value(column);
                let right = table.rows()[b].value(column);
                let ordering = sort_order(left, right);
                let ordering = if descending { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    if let Some(top) = statement.top {
        if top >= 0 {
            rows.truncate(top as usize);
        }
    }

    Ok(rows)
}

/// Nulls sort first; incomparable values keep their relative order
fn sort_order(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => left.compare(right).unwrap_or(Ordering::Equal),
    }
}

fn column_index(table: &DataTable, name: &str) -> Result<usize, FilterError> {
    table.column(name).map(|c| c.index()).ok_or_else(|| {
        FilterError::evaluation(format!(
            "Failed to find column \"{}\" in table \"{}\"",
            name,
            table.name()
        ))
    })
}

/// Expression with column names resolved to indices
enum Bound {
    Column(usize),
    Literal(Value),
    Not(Box<Bound>),
    And(Box<Bound>, Box<Bound>),
    Or(Box<Bound>, Box<Bound>),
    Compare(CompareOp, Box<Bound>, Box<Bound>),
    Like(Box<Bound>, Box<Bound>, bool),
    IsNull(Box<Bound>, bool),
    In(Box<Bound>, Vec<Bound>, bool),
}

fn bind(table: &DataTable, expr: &Expr) -> Result<Bound, FilterError> {
    fn b(table: &DataTable, expr: &Expr) -> Result<Box<Bound>, FilterError> {
        bind(table, expr).map(Box::new)
    }

    Ok(match expr {
        Expr::Column(name) => Bound::Column(column_index(table, name)?),
        Expr::Literal(value) => Bound::Literal(value.clone()),
        Expr::Not(inner) => Bound::Not(b(table, inner)?),
        Expr::And(l, r) => Bound::And(b(table, l)?, b(table, r)?),
        Expr::Or(l, r) => Bound::Or(b(table, l)?, b(table, r)?),
        Expr::Compare(op, l, r) => Bound::Compare(*op, b(table, l)?, b(table, r)?),
        Expr::Like {
            expr,
            pattern,
            negated,
        } => Bound::Like(b(table, expr)?, b(table, pattern)?, *negated),
        Expr::IsNull { expr, negated } => Bound::IsNull(b(table, expr)?, *negated),
        Expr::In {
            expr,
            list,
            negated,
        } => Bound::In(
            b(table, expr)?,
            list.iter()
                .map(|e| bind(table, e))
                .collect::<Result<Vec<_>, _>>()?,
            *negated,
        ),
    })
}

fn value(expr: &Bound, row: &DataRow) -> Result<Value, FilterError> {
    match expr {
        Bound::Column(index) => Ok(row.value(*index).clone()),
        Bound::Literal(value) => Ok(value.clone()),
        other => Ok(truth(other, row)?.map(Value::Boolean).unwrap_or(Value::Null)),
    }
}

/// Three-valued truth of an expression; `None` is unknown
fn truth(expr: &Bound, row: &DataRow) -> Result<Option<bool>, FilterError> {
    Ok(match expr {
        Bound::Column(_) | Bound::Literal(_) => {
            let v = value(expr, row)?;
            if v.is_null() {
                None
            } else {
                Some(v.as_bool().ok_or_else(|| {
                    FilterError::evaluation(format!("cannot evaluate \"{}\" as a boolean", v))
                })?)
            }
        }
        Bound::Not(inner) => truth(inner, row)?.map(|b| !b),
        Bound::And(l, r) => match (truth(l, row)?, truth(r, row)?) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Bound::Or(l, r) => match (truth(l, row)?, truth(r, row)?) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Bound::Compare(op, l, r) => {
            let (left, right) = (value(l, row)?, value(r, row)?);
            left.compare(&right).map(|ordering| match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::NotEq => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::LtEq => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::GtEq => ordering != Ordering::Less,
            })
        }
        Bound::Like(expr, pattern, negated) => {
            let (text, pattern) = (value(expr, row)?, value(pattern, row)?);
            if text.is_null() || pattern.is_null() {
                None
            } else {
                Some(like(&text.to_string(), &pattern.to_string()) != *negated)
            }
        }
        Bound::IsNull(expr, negated) => Some(value(expr, row)?.is_null() != *negated),
        Bound::In(expr, list, negated) => {
            let needle = value(expr, row)?;
            if needle.is_null() {
                None
            } else {
                let mut found = false;
                for candidate in list {
                    if needle.compare(&value(candidate, row)?) == Some(Ordering::Equal) {
                        found = true;
                        break;
                    }
                }
                Some(found != *negated)
            }
        }
    })
}

/// Case-insensitive wildcard match: `%` or `*` for any run, `_` for one character
pub fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') | Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(c) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '%' || *c == '*')
}
