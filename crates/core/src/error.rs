use thiserror::Error;

use crate::types::SqlType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("cannot parse {input:?} as {ty}: {reason}")]
    Parse {
        ty: SqlType,
        input: String,
        reason: String,
    },

    #[error("{value} is out of range for {ty}")]
    OutOfRange { value: String, ty: SqlType },

    #[error("expected {expected}, found {found}")]
    Type { expected: SqlType, found: String },

    #[error("NULL value for non-nullable column '{0}'")]
    NullViolation(String),
}
