use std::fmt;

use indexmap::IndexMap;
use ripple_core::ColumnSchema;
use serde::Serialize;

use crate::expr::Expr;

/// Index of a node inside [`Plan::nodes`].
pub type NodeId = usize;

/// A dataflow program: a DAG of relational operators.
///
/// Nodes are stored in topological order: every node's inputs have a
/// smaller id than the node itself, so evaluating nodes front to back
/// always sees inputs first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub nodes: Vec<PlanNode>,
    /// Table name -> its scan node.
    pub tables: IndexMap<String, NodeId>,
    /// View name -> the node producing its contents.
    pub views: IndexMap<String, NodeId>,
}

/// A single operator with its inputs and statically computed output schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanNode {
    pub id: NodeId,
    #[serde(flatten)]
    pub op: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<NodeId>,
    pub schema: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum Operator {
    /// Source of a base table's changes.
    Scan { table: String },
    /// Keep rows where the predicate is TRUE.
    Filter { predicate: Expr },
    /// Compute one output column per expression.
    Project { exprs: Vec<Expr> },
    /// Inner equi-join of `inputs[0]` (left) and `inputs[1]` (right). Output
    /// is the left columns followed by the right columns. Empty key lists
    /// mean a cross product.
    Join {
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
    },
    /// Group by the leading `group_by` columns and compute aggregates.
    /// Output is the group columns followed by one column per aggregate.
    Aggregate {
        group_by: Vec<usize>,
        aggregates: Vec<AggregateCall>,
    },
    /// Set semantics: each distinct row at most once.
    Distinct,
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Scan { .. } => "scan",
            Operator::Filter { .. } => "filter",
            Operator::Project { .. } => "project",
            Operator::Join { .. } => "join",
            Operator::Aggregate { .. } => "aggregate",
            Operator::Distinct => "distinct",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunc::Count),
            "SUM" => Some(AggregateFunc::Sum),
            "MIN" => Some(AggregateFunc::Min),
            "MAX" => Some(AggregateFunc::Max),
            "AVG" => Some(AggregateFunc::Avg),
            _ => None,
        }
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            AggregateFunc::CountStar | AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::Avg => "avg",
        }
    }
}

/// One aggregate over an input column (`None` for `COUNT(*)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AggregateCall {
    pub func: AggregateFunc,
    pub arg: Option<usize>,
}

impl Plan {
    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id]
    }

    pub fn view_node(&self, view: &str) -> Option<&PlanNode> {
        self.views.get(view).map(|&id| &self.nodes[id])
    }

    pub fn table_node(&self, table: &str) -> Option<&PlanNode> {
        self.tables.get(table).map(|&id| &self.nodes[id])
    }

    /// Append a node, returning its id.
    pub fn push(&mut self, op: Operator, inputs: Vec<NodeId>, schema: Vec<ColumnSchema>) -> NodeId {
        let id = self.nodes.len();
        debug_assert!(inputs.iter().all(|&i| i < id), "inputs must precede node");
        self.nodes.push(PlanNode {
            id,
            op,
            inputs,
            schema,
        });
        id
    }

    /// Ids of every node that (transitively) reads from `id`, including `id`.
    pub fn downstream_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut reached = vec![false; self.nodes.len()];
        reached[id] = true;
        for node in &self.nodes[id + 1..] {
            if node.inputs.iter().any(|&i| reached[i]) {
                reached[node.id] = true;
            }
        }
        reached
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.then_some(i))
            .collect()
    }
}

impl fmt::Display for Plan {
    /// One line per node, e.g. `#3 join(#1, #2) [left_keys=[1], right_keys=[0]]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            let inputs: Vec<String> = node.inputs.iter().map(|i| format!("#{i}")).collect();
            write!(f, "#{} {}({})", node.id, node.op.name(), inputs.join(", "))?;
            match &node.op {
                Operator::Scan { table } => write!(f, " [{table}]")?,
                Operator::Filter { predicate } => write!(f, " [{predicate}]")?,
                Operator::Project { exprs } => {
                    let exprs: Vec<String> = exprs.iter().map(ToString::to_string).collect();
                    write!(f, " [{}]", exprs.join(", "))?
                }
                Operator::Join {
                    left_keys,
                    right_keys,
                } => write!(f, " [left_keys={left_keys:?}, right_keys={right_keys:?}]")?,
                Operator::Aggregate {
                    group_by,
                    aggregates,
                } => {
                    let aggs: Vec<String> = aggregates
                        .iter()
                        .map(|a| match a.arg {
                            Some(c) => format!("{}(${c})", a.func.sql_name()),
                            None => "count(*)".to_string(),
                        })
                        .collect();
                    write!(f, " [group_by={group_by:?}, {}]", aggs.join(", "))?
                }
                Operator::Distinct => {}
            }
            let columns: Vec<String> = node
                .schema
                .iter()
                .map(|c| format!("{}:{}{}", c.name, c.ty, if c.nullable { "?" } else { "" }))
                .collect();
            writeln!(f, " -> ({})", columns.join(", "))?;
        }
        Ok(())
    }
}
