use thiserror::Error;

/// Errors produced while turning SQL text into a schema and plan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unknown table or view '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}'{}", relation.as_ref().map(|r| format!(" in '{r}'")).unwrap_or_default())]
    UnknownColumn {
        relation: Option<String>,
        column: String,
    },

    #[error("column reference '{0}' is ambiguous")]
    AmbiguousColumn(String),

    #[error("cyclic view dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("name '{0}' is already defined")]
    DuplicateName(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("expression '{0}' must appear in GROUP BY or be used in an aggregate function")]
    NotGrouped(String),

    #[error("unsupported type '{0}'")]
    UnsupportedType(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Errors raised while evaluating a compiled expression against a row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("integer overflow in {0}")]
    Overflow(&'static str),

    #[error("invalid operand types for {op}: {left} and {right}")]
    InvalidOperands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("cast failed: {0}")]
    Cast(String),
}
