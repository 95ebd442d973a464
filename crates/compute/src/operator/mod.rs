//! Incremental relational operators.
//!
//! Each operator consumes the deltas of its inputs for one step and returns
//! the delta of its output. Operators that need history (join, aggregate,
//! distinct) own their state exclusively; the circuit drives them one step
//! at a time under the job's mutation lock.

mod aggregate;
mod distinct;
mod join;
mod linear;

use ripple_catalog::{EvalError, Operator, PlanNode};

use crate::zset::ZSet;

pub use aggregate::AggregateOp;
pub use distinct::DistinctOp;
pub use join::JoinOp;
pub use linear::{FilterOp, ProjectOp, ScanOp};

pub trait IncrementalOperator: Send {
    fn name(&self) -> &'static str;

    /// Output delta given one delta per input, in plan input order.
    fn step(&mut self, inputs: &[&ZSet]) -> Result<ZSet, EvalError>;

    /// Number of rows held in operator state.
    fn state_size(&self) -> usize {
        0
    }
}

/// Instantiate the operator of a plan node with empty state.
pub fn build(node: &PlanNode) -> Box<dyn IncrementalOperator> {
    match &node.op {
        Operator::Scan { .. } => Box::new(ScanOp),
        Operator::Filter { predicate } => Box::new(FilterOp::new(predicate.clone())),
        Operator::Project { exprs } => Box::new(ProjectOp::new(exprs.clone())),
        Operator::Join {
            left_keys,
            right_keys,
        } => Box::new(JoinOp::new(left_keys.clone(), right_keys.clone())),
        Operator::Aggregate {
            group_by,
            aggregates,
        } => {
            let output_types = node.schema[group_by.len()..].iter().map(|c| c.ty).collect();
            Box::new(AggregateOp::new(group_by.clone(), aggregates.clone(), output_types))
        }
        Operator::Distinct => Box::new(DistinctOp::default()),
    }
}
