//! Stateless operators: the output delta depends only on the input delta.

use ripple_catalog::{EvalError, Expr};
use ripple_core::Row;

use super::IncrementalOperator;
use crate::zset::ZSet;

/// Passes a table's input delta through unchanged.
pub struct ScanOp;

impl IncrementalOperator for ScanOp {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn step(&mut self, inputs: &[&ZSet]) -> Result<ZSet, EvalError> {
        Ok(inputs.first().map(|z| (*z).clone()).unwrap_or_default())
    }
}

pub struct FilterOp {
    predicate: Expr,
}

impl FilterOp {
    pub fn new(predicate: Expr) -> Self {
        Self { predicate }
    }
}

impl IncrementalOperator for FilterOp {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn step(&mut self, inputs: &[&ZSet]) -> Result<ZSet, EvalError> {
        let mut out = ZSet::new();
        if let Some(input) = inputs.first() {
            for (row, weight) in input.iter() {
                if self.predicate.matches(row)? {
                    out.insert(row.clone(), weight);
                }
            }
        }
        Ok(out)
    }
}

pub struct ProjectOp {
    exprs: Vec<Expr>,
}

impl ProjectOp {
    pub fn new(exprs: Vec<Expr>) -> Self {
        Self { exprs }
    }
}

impl IncrementalOperator for ProjectOp {
    fn name(&self) -> &'static str {
        "project"
    }

    fn step(&mut self, inputs: &[&ZSet]) -> Result<ZSet, EvalError> {
        let mut out = ZSet::new();
        if let Some(input) = inputs.first() {
            for (row, weight) in input.iter() {
                let values = self
                    .exprs
                    .iter()
                    .map(|e| e.eval(row))
                    .collect::<Result<Vec<_>, _>>()?;
                out.insert(Row::new(values), weight);
            }
        }
        Ok(out)
    }
}
