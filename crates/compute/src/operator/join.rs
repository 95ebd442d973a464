//! Incremental inner equi-join.
//!
//! Both sides are indexed by join key. For input deltas `dL` and `dR` the
//! output delta is `dL ⋈ R + (L + dL) ⋈ dR`, where `L` and `R` are the
//! indexed contents before the step. Rows with a NULL key never match.

use std::collections::HashMap;

use ripple_catalog::EvalError;
use ripple_core::Row;

use super::IncrementalOperator;
use crate::zset::ZSet;

type Index = HashMap<Row, ZSet>;

pub struct JoinOp {
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    left: Index,
    right: Index,
}

impl JoinOp {
    pub fn new(left_keys: Vec<usize>, right_keys: Vec<usize>) -> Self {
        Self {
            left_keys,
            right_keys,
            left: HashMap::new(),
            right: HashMap::new(),
        }
    }
}

fn key_of(row: &Row, keys: &[usize]) -> Option<Row> {
    let key = row.project(keys);
    if key.values().iter().any(|v| v.is_null()) {
        None
    } else {
        Some(key)
    }
}

fn apply(index: &mut Index, keys: &[usize], delta: &ZSet) {
    for (row, weight) in delta.iter() {
        let Some(key) = key_of(row, keys) else {
            continue;
        };
        let bucket = index.entry(key.clone()).or_default();
        bucket.insert(row.clone(), weight);
        if bucket.is_empty() {
            index.remove(&key);
        }
    }
}

/// Join a delta against an index. `delta_is_left` fixes the column order
/// of the output rows.
fn probe(delta: &ZSet, keys: &[usize], index: &Index, delta_is_left: bool, out: &mut ZSet) {
    for (row, weight) in delta.iter() {
        let Some(key) = key_of(row, keys) else {
            continue;
        };
        let Some(matches) = index.get(&key) else {
            continue;
        };
        for (other, other_weight) in matches.iter() {
            let joined = if delta_is_left {
                row.concat(other)
            } else {
                other.concat(row)
            };
            out.insert(joined, weight * other_weight);
        }
    }
}

impl IncrementalOperator for JoinOp {
    fn name(&self) -> &'static str {
        "join"
    }

    fn step(&mut self, inputs: &[&ZSet]) -> Result<ZSet, EvalError> {
        let empty = ZSet::new();
        let left_delta = inputs.first().copied().unwrap_or(&empty);
        let right_delta = inputs.get(1).copied().unwrap_or(&empty);

        let mut out = ZSet::new();
        probe(left_delta, &self.left_keys, &self.right, true, &mut out);
        apply(&mut self.left, &self.left_keys, left_delta);
        probe(right_delta, &self.right_keys, &self.left, false, &mut out);
        apply(&mut self.right, &self.right_keys, right_delta);
        Ok(out)
    }

    fn state_size(&self) -> usize {
        self.left.values().map(ZSet::len).sum::<usize>()
            + self.right.values().map(ZSet::len).sum::<usize>()
    }
}
