//! Incremental grouped aggregation.
//!
//! Every group keeps the multiset of each aggregate's non-NULL argument
//! values, so MIN and MAX stay correct when rows are retracted. After a
//! step only the touched groups are recomputed; a changed group emits its
//! old output row with weight -1 and its new one with weight +1. A group
//! whose rows are all retracted disappears, including the single group of
//! an aggregate without GROUP BY. Retracting more than a group holds is
//! logged and clamped at zero.

use std::collections::{BTreeMap, HashMap, HashSet};

use ripple_catalog::{AggregateCall, AggregateFunc, EvalError};
use ripple_core::{Row, SqlType, Value};
use tracing::warn;

use super::IncrementalOperator;
use crate::zset::ZSet;

#[derive(Debug, Default)]
struct GroupState {
    /// Total weight of the group's input rows.
    rows: i64,
    /// Per aggregate: non-NULL argument value -> weight.
    values: Vec<BTreeMap<Value, i64>>,
    output: Option<Row>,
}

pub struct AggregateOp {
    group_by: Vec<usize>,
    aggregates: Vec<AggregateCall>,
    output_types: Vec<SqlType>,
    groups: HashMap<Row, GroupState>,
}

impl AggregateOp {
    pub fn new(group_by: Vec<usize>, aggregates: Vec<AggregateCall>, output_types: Vec<SqlType>) -> Self {
        Self {
            group_by,
            aggregates,
            output_types,
            groups: HashMap::new(),
        }
    }

    fn accumulate(&mut self, row: &Row, weight: i64) {
        let key = row.project(&self.group_by);
        let width = self.aggregates.len();
        let group = self.groups.entry(key).or_insert_with(|| GroupState {
            rows: 0,
            values: vec![BTreeMap::new(); width],
            output: None,
        });
        group.rows += weight;
        if group.rows < 0 {
            warn!(group = ?row.project(&self.group_by), excess = -group.rows, "retracted rows the group never held");
            group.rows = 0;
        }
        for (call, values) in self.aggregates.iter().zip(group.values.iter_mut()) {
            let Some(arg) = call.arg else {
                continue;
            };
            let value = row.get(arg);
            if value.is_null() {
                continue;
            }
            let count = values.entry(value.clone()).or_insert(0);
            *count += weight;
            if *count < 0 {
                warn!(value = %value, excess = -*count, "retracted an aggregate value the group never held");
            }
            if *count <= 0 {
                values.remove(value);
            }
        }
    }
}

fn evaluate(call: &AggregateCall, ty: SqlType, rows: i64, values: &BTreeMap<Value, i64>) -> Result<Value, EvalError> {
    let non_null: i64 = values.values().sum();
    let value = match call.func {
        AggregateFunc::CountStar => Value::Integer(rows),
        AggregateFunc::Count => Value::Integer(non_null),
        AggregateFunc::Min => values.keys().next().cloned().unwrap_or(Value::Null),
        AggregateFunc::Max => values.keys().next_back().cloned().unwrap_or(Value::Null),
        AggregateFunc::Sum | AggregateFunc::Avg if values.is_empty() => Value::Null,
        AggregateFunc::Sum if ty == SqlType::Integer => {
            let mut total: i64 = 0;
            for (value, weight) in values {
                let term = value
                    .as_i64()
                    .and_then(|v| v.checked_mul(*weight))
                    .ok_or(EvalError::Overflow("sum"))?;
                total = total.checked_add(term).ok_or(EvalError::Overflow("sum"))?;
            }
            Value::Integer(total)
        }
        AggregateFunc::Sum => Value::Float(float_sum(values)),
        AggregateFunc::Avg => Value::Float(float_sum(values) / non_null as f64),
    };
    Ok(value)
}

fn float_sum(values: &BTreeMap<Value, i64>) -> f64 {
    values
        .iter()
        .filter_map(|(v, w)| v.as_f64().map(|f| f * *w as f64))
        .sum()
}

impl IncrementalOperator for AggregateOp {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn step(&mut self, inputs: &[&ZSet]) -> Result<ZSet, EvalError> {
        let Some(input) = inputs.first() else {
            return Ok(ZSet::new());
        };
        let mut touched: HashSet<Row> = HashSet::new();
        for (row, weight) in input.iter() {
            self.accumulate(row, weight);
            touched.insert(row.project(&self.group_by));
        }

        let mut out = ZSet::new();
        for key in touched {
            let Some(group) = self.groups.get_mut(&key) else {
                continue;
            };
            let new_output = if group.rows > 0 {
                let mut values = key.values().to_vec();
                for ((call, ty), acc) in self
                    .aggregates
                    .iter()
                    .zip(&self.output_types)
                    .zip(&group.values)
                {
                    values.push(evaluate(call, *ty, group.rows, acc)?);
                }
                Some(Row::new(values))
            } else {
                None
            };
            if group.output != new_output {
                if let Some(old) = group.output.take() {
                    out.insert(old, -1);
                }
                if let Some(new) = &new_output {
                    out.insert(new.clone(), 1);
                }
                group.output = new_output;
            }
            if group.rows == 0 && group.values.iter().all(BTreeMap::is_empty) {
                self.groups.remove(&key);
            }
        }
        Ok(out)
    }

    fn state_size(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<Value>) -> Row {
        Row::new(values)
    }

    fn call(func: AggregateFunc, arg: Option<usize>) -> AggregateCall {
        AggregateCall { func, arg }
    }

    fn delta(entries: Vec<(Vec<Value>, i64)>) -> ZSet {
        entries.into_iter().map(|(r, w)| (Row::new(r), w)).collect()
    }

    /// (state, amt) grouped by state: count(*), sum(amt), min(amt), max(amt), avg(amt)
    fn by_state() -> AggregateOp {
        AggregateOp::new(
            vec![0],
            vec![
                call(AggregateFunc::CountStar, None),
                call(AggregateFunc::Sum, Some(1)),
                call(AggregateFunc::Min, Some(1)),
                call(AggregateFunc::Max, Some(1)),
                call(AggregateFunc::Avg, Some(1)),
            ],
            vec![
                SqlType::Integer,
                SqlType::Integer,
                SqlType::Integer,
                SqlType::Integer,
                SqlType::Float64,
            ],
        )
    }

    #[test]
    fn groups_emit_replacements() {
        let mut op = by_state();
        let out = op
            .step(&[&delta(vec![
                (vec![Value::from("CA"), Value::Integer(10)], 1),
                (vec![Value::from("CA"), Value::Integer(30)], 1),
            ])])
            .unwrap();
        assert_eq!(
            out.to_vec(),
            vec![(
                row(vec![Value::from("CA"), Value::Integer(2), Value::Integer(40), Value::Integer(10), Value::Integer(30), Value::Float(20.0)]),
                1
            )]
        );

        let out = op
            .step(&[&delta(vec![(vec![Value::from("CA"), Value::Integer(5)], 1)])])
            .unwrap();
        assert_eq!(
            out.to_vec(),
            vec![
                (
                    row(vec![Value::from("CA"), Value::Integer(2), Value::Integer(40), Value::Integer(10), Value::Integer(30), Value::Float(20.0)]),
                    -1
                ),
                (
                    row(vec![Value::from("CA"), Value::Integer(3), Value::Integer(45), Value::Integer(5), Value::Integer(30), Value::Float(15.0)]),
                    1
                ),
            ]
        );
    }

    #[test]
    fn min_and_max_survive_retraction() {
        let mut op = by_state();
        op.step(&[&delta(vec![
            (vec![Value::from("NY"), Value::Integer(1)], 1),
            (vec![Value::from("NY"), Value::Integer(9)], 1),
        ])])
        .unwrap();
        let out = op
            .step(&[&delta(vec![(vec![Value::from("NY"), Value::Integer(9)], -1)])])
            .unwrap();
        let (new_row, _) = out.iter().find(|(_, w)| *w == 1).unwrap();
        assert_eq!(new_row.get(3), &Value::Integer(1));
        assert_eq!(new_row.get(4), &Value::Integer(1));
    }

    #[test]
    fn emptied_groups_disappear() {
        let mut op = by_state();
        op.step(&[&delta(vec![(vec![Value::from("TX"), Value::Integer(4)], 1)])]).unwrap();
        let out = op
            .step(&[&delta(vec![(vec![Value::from("TX"), Value::Integer(4)], -1)])])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.total_weight(), -1);
        assert_eq!(op.state_size(), 0);
    }

    #[test]
    fn unmatched_retractions_are_clamped() {
        let mut op = by_state();
        let out = op
            .step(&[&delta(vec![(vec![Value::from("WA"), Value::Integer(3)], -1)])])
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(op.state_size(), 0);

        op.step(&[&delta(vec![(vec![Value::from("WA"), Value::Integer(3)], 2)])])
            .unwrap();
        let out = op
            .step(&[&delta(vec![(vec![Value::from("WA"), Value::Integer(8)], -1)])])
            .unwrap();
        let (new_row, _) = out.iter().find(|(_, w)| *w == 1).unwrap();
        assert_eq!(new_row.get(1), &Value::Integer(1));
        assert_eq!(new_row.get(4), &Value::Integer(3));
    }

    #[test]
    fn nulls_are_ignored_except_by_count_star() {
        let mut op = AggregateOp::new(
            vec![],
            vec![
                call(AggregateFunc::CountStar, None),
                call(AggregateFunc::Count, Some(0)),
                call(AggregateFunc::Sum, Some(0)),
            ],
            vec![SqlType::Integer, SqlType::Integer, SqlType::Float64],
        );
        let out = op
            .step(&[&delta(vec![(vec![Value::Null], 2)])])
            .unwrap();
        assert_eq!(
            out.to_vec(),
            vec![(row(vec![Value::Integer(2), Value::Integer(0), Value::Null]), 1)]
        );
    }

    #[test]
    fn integer_sum_overflow_is_an_error() {
        let mut op = AggregateOp::new(
            vec![],
            vec![call(AggregateFunc::Sum, Some(0))],
            vec![SqlType::Integer],
        );
        let input = delta(vec![
            (vec![Value::Integer(i64::MAX)], 1),
            (vec![Value::Integer(1)], 1),
        ]);
        assert_eq!(op.step(&[&input]), Err(EvalError::Overflow("sum")));
    }
}
