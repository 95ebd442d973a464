pub mod compiler;
pub mod error;
pub mod expr;
pub mod plan;
pub mod schema;

pub use compiler::{compile, CompiledProgram};
pub use error::{CompileError, EvalError};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use plan::{AggregateCall, AggregateFunc, NodeId, Operator, Plan, PlanNode};
pub use schema::{Schema, TableDef, ViewDef};
