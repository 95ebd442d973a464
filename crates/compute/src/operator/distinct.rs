use std::collections::HashMap;

use ripple_catalog::EvalError;
use ripple_core::Row;

use super::IncrementalOperator;
use crate::zset::ZSet;

/// Emits a row once while its accumulated weight is positive.
#[derive(Default)]
pub struct DistinctOp {
    weights: HashMap<Row, i64>,
}

impl IncrementalOperator for DistinctOp {
    fn name(&self) -> &'static str {
        "distinct"
    }

    fn step(&mut self, inputs: &[&ZSet]) -> Result<ZSet, EvalError> {
        let mut out = ZSet::new();
        let Some(input) = inputs.first() else {
            return Ok(out);
        };
        for (row, weight) in input.iter() {
            let before = self.weights.get(row).copied().unwrap_or(0);
            let after = before + weight;
            if after == 0 {
                self.weights.remove(row);
            } else {
                self.weights.insert(row.clone(), after);
            }
            match (before > 0, after > 0) {
                (false, true) => out.insert(row.clone(), 1),
                (true, false) => out.insert(row.clone(), -1),
                _ => {}
            }
        }
        Ok(out)
    }

    fn state_size(&self) -> usize {
        self.weights.len()
    }
}
