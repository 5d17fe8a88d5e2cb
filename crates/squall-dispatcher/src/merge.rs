//! Recombines worker responses according to the plan's merge strategy.
//!
//! Concat keeps rows in part order. Aggregate folds partial aggregates per
//! group key, then applies the recorded HAVING predicate to the merged
//! rows. A row must evaluate the predicate to true to survive; comparisons
//! against NULL or mismatched types never do.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;
use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value as AstValue};
use squall_types::Row;
use thiserror::Error;

use crate::plan::{self, AggregatePlan, ColumnKind, MergeStrategy, OutputColumn};

/// Worker responses did not line up with the plan.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge failed: column {0} missing from worker row")]
    MissingColumn(String),
    #[error("merge failed: column {column} has non-{expected} partial")]
    Incompatible {
        column: String,
        expected: &'static str,
    },
}

/// Merges per-part row sets into the final result.
pub fn merge(strategy: &MergeStrategy, parts: Vec<Vec<Row>>) -> Result<Vec<Row>, MergeError> {
    match strategy {
        MergeStrategy::PassThrough | MergeStrategy::Concat => {
            Ok(parts.into_iter().flatten().collect())
        }
        MergeStrategy::Aggregate(plan) => merge_aggregate(plan, parts),
    }
}

fn merge_aggregate(plan: &AggregatePlan, parts: Vec<Vec<Row>>) -> Result<Vec<Row>, MergeError> {
    // Groups are kept in first-seen order; the map only finds the slot.
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Value>, Vec<Acc>)> = Vec::new();

    for row in parts.into_iter().flatten() {
        let key: Vec<Value> = plan
            .columns
            .iter()
            .filter(|column| column.kind == ColumnKind::Key)
            .map(|column| require(&row, &column.name).map(Value::clone))
            .collect::<Result<_, _>>()?;
        let fingerprint =
            serde_json::to_string(&key).unwrap_or_else(|_| format!("{key:?}"));

        let slot = match slots.get(&fingerprint) {
            Some(&slot) => slot,
            None => {
                let slot = groups.len();
                slots.insert(fingerprint, slot);
                groups.push((key, plan.columns.iter().map(Acc::new).collect()));
                slot
            }
        };
        for (acc, column) in groups[slot].1.iter_mut().zip(&plan.columns) {
            acc.fold(column, &row)?;
        }
    }

    let mut merged = Vec::with_capacity(groups.len());
    for (key, accs) in groups {
        let mut key_values = key.into_iter();
        let mut row = Row::new();
        for (column, acc) in plan.columns.iter().zip(accs) {
            let value = match acc {
                Acc::Key => key_values.next().unwrap_or(Value::Null),
                folded => folded.finish(),
            };
            row.insert(column.name.clone(), value);
        }
        merged.push(row);
    }

    if let Some(predicate) = &plan.having {
        merged.retain(|row| eval_predicate(predicate, row));
    }
    Ok(merged)
}

/// Running state for one output column within one group.
enum Acc {
    Key,
    Count(Num),
    Sum(Option<Num>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: Option<Num>, count: i64 },
}

impl Acc {
    fn new(column: &OutputColumn) -> Acc {
        match &column.kind {
            ColumnKind::Key => Acc::Key,
            ColumnKind::Count => Acc::Count(Num::Int(0)),
            ColumnKind::Sum => Acc::Sum(None),
            ColumnKind::Min => Acc::Min(None),
            ColumnKind::Max => Acc::Max(None),
            ColumnKind::Avg { .. } => Acc::Avg { sum: None, count: 0 },
        }
    }

    fn fold(&mut self, column: &OutputColumn, row: &Row) -> Result<(), MergeError> {
        match self {
            Acc::Key => Ok(()),
            Acc::Count(total) => {
                let partial = numeric(row, &column.name)?;
                *total = total.add(partial);
                Ok(())
            }
            Acc::Sum(state) => {
                let value = require(row, &column.name)?;
                if value.is_null() {
                    // SUM over an empty part comes back NULL.
                    return Ok(());
                }
                let partial = numeric(row, &column.name)?;
                *state = Some(match *state {
                    Some(total) => total.add(partial),
                    None => partial,
                });
                Ok(())
            }
            Acc::Min(state) => fold_extreme(state, row, &column.name, Ordering::Greater),
            Acc::Max(state) => fold_extreme(state, row, &column.name, Ordering::Less),
            Acc::Avg { sum, count } => {
                let ColumnKind::Avg {
                    sum_name,
                    count_name,
                    ..
                } = &column.kind
                else {
                    return Ok(());
                };
                *count += match numeric(row, count_name)? {
                    Num::Int(n) => n,
                    Num::Float(f) => f as i64,
                };
                let value = require(row, sum_name)?;
                if !value.is_null() {
                    let partial = numeric(row, sum_name)?;
                    *sum = Some(match *sum {
                        Some(total) => total.add(partial),
                        None => partial,
                    });
                }
                Ok(())
            }
        }
    }

    fn finish(self) -> Value {
        match self {
            Acc::Key => Value::Null,
            Acc::Count(total) => total.to_value(),
            Acc::Sum(state) => state.map(Num::to_value).unwrap_or(Value::Null),
            Acc::Min(state) | Acc::Max(state) => state.unwrap_or(Value::Null),
            Acc::Avg {
                sum: Some(total),
                count,
            } if count > 0 => serde_json::Number::from_f64(total.as_f64() / count as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Acc::Avg { .. } => Value::Null,
        }
    }
}

/// Replaces the stored extreme when it compares as `replace_when` against
/// the incoming value.
fn fold_extreme(
    state: &mut Option<Value>,
    row: &Row,
    column: &str,
    replace_when: Ordering,
) -> Result<(), MergeError> {
    let value = require(row, column)?;
    if value.is_null() {
        return Ok(());
    }
    match state {
        Some(current) => {
            let ord = compare_values(current, value).ok_or_else(|| MergeError::Incompatible {
                column: column.to_string(),
                expected: "comparable",
            })?;
            if ord == replace_when {
                *current = value.clone();
            }
        }
        None => *state = Some(value.clone()),
    }
    Ok(())
}

fn require<'a>(row: &'a Row, column: &str) -> Result<&'a Value, MergeError> {
    row.get(column)
        .ok_or_else(|| MergeError::MissingColumn(column.to_string()))
}

fn numeric(row: &Row, column: &str) -> Result<Num, MergeError> {
    Num::from_value(require(row, column)?).ok_or_else(|| MergeError::Incompatible {
        column: column.to_string(),
        expected: "numeric",
    })
}

/// Partial-aggregate arithmetic. Integer totals promote to float on the
/// first float partial or on overflow.
#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value) -> Option<Num> {
        let number = match value {
            Value::Number(number) => number,
            _ => return None,
        };
        match number.as_i64() {
            Some(n) => Some(Num::Int(n)),
            None => number.as_f64().map(Num::Float),
        }
    }

    fn add(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => match a.checked_add(b) {
                Some(total) => Num::Int(total),
                None => Num::Float(a as f64 + b as f64),
            },
            (a, b) => Num::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }

    fn to_value(self) -> Value {
        match self {
            Num::Int(n) => Value::Number(n.into()),
            Num::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}

/// True only when the predicate evaluates to boolean true for the row.
fn eval_predicate(predicate: &Expr, row: &Row) -> bool {
    matches!(eval(predicate, row), Some(Value::Bool(true)))
}

fn eval(expr: &Expr, row: &Row) -> Option<Value> {
    match expr {
        Expr::Nested(inner) => eval(inner, row),
        Expr::Identifier(ident) => row.get(&plan::output_name(ident)).cloned(),
        Expr::CompoundIdentifier(idents) => {
            row.get(&plan::output_name(idents.last()?)).cloned()
        }
        Expr::Value(value) => literal(value),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: inner,
        } => match eval(inner, row)? {
            Value::Bool(b) => Some(Value::Bool(!b)),
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match eval(inner, row)? {
            Value::Number(number) => match number.as_i64() {
                Some(n) => n.checked_neg().map(|neg| Value::Number(neg.into())),
                None => serde_json::Number::from_f64(-number.as_f64()?).map(Value::Number),
            },
            _ => None,
        },
        Expr::BinaryOp { left, op, right } => {
            let lhs = eval(left, row)?;
            let rhs = eval(right, row)?;
            match op {
                BinaryOperator::And => bool_pair(lhs, rhs).map(|(a, b)| Value::Bool(a && b)),
                BinaryOperator::Or => bool_pair(lhs, rhs).map(|(a, b)| Value::Bool(a || b)),
                BinaryOperator::Gt
                | BinaryOperator::GtEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Eq
                | BinaryOperator::NotEq => {
                    if lhs.is_null() || rhs.is_null() {
                        return None;
                    }
                    let ord = compare_values(&lhs, &rhs)?;
                    let holds = match op {
                        BinaryOperator::Gt => ord == Ordering::Greater,
                        BinaryOperator::GtEq => ord != Ordering::Less,
                        BinaryOperator::Lt => ord == Ordering::Less,
                        BinaryOperator::LtEq => ord != Ordering::Greater,
                        BinaryOperator::Eq => ord == Ordering::Equal,
                        _ => ord != Ordering::Equal,
                    };
                    Some(Value::Bool(holds))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn bool_pair(lhs: Value, rhs: Value) -> Option<(bool, bool)> {
    match (lhs, rhs) {
        (Value::Bool(a), Value::Bool(b)) => Some((a, b)),
        _ => None,
    }
}

fn literal(value: &AstValue) -> Option<Value> {
    match value {
        AstValue::Number(text, _) => match text.parse::<i64>() {
            Ok(n) => Some(Value::Number(n.into())),
            Err(_) => {
                let f: f64 = text.parse().ok()?;
                serde_json::Number::from_f64(f).map(Value::Number)
            }
        },
        AstValue::SingleQuotedString(text) => Some(Value::String(text.clone())),
        AstValue::Boolean(b) => Some(Value::Bool(*b)),
        AstValue::Null => Some(Value::Null),
        _ => None,
    }
}

/// Orders two JSON scalars of the same shape. Integers compare exactly;
/// other numbers fall back to f64.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
