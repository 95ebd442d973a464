use std::fmt;

use serde::{Deserialize, Serialize};

/// Column types understood by the compiler and the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit IEEE-754 float.
    Float64,
    String,
    Boolean,
    /// Absolute time without zone, ordered chronologically.
    Timestamp,
}

impl SqlType {
    pub fn is_numeric(self) -> bool {
        matches!(self, SqlType::Integer | SqlType::Float64)
    }

    /// Map a SQL type spelling (as rendered by the parser) to a column type.
    ///
    /// Length/precision suffixes such as `VARCHAR(20)` are ignored.
    pub fn from_sql_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        let ty = match base {
            "INT" | "INTEGER" | "BIGINT" | "INT64" | "INT8" | "SMALLINT" | "TINYINT" | "INT4" => {
                SqlType::Integer
            }
            "FLOAT64" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT8" | "REAL" | "DECIMAL"
            | "NUMERIC" => SqlType::Float64,
            "STRING" | "VARCHAR" | "CHAR" | "TEXT" | "CHARACTER VARYING" | "CHARACTER" => {
                SqlType::String
            }
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITHOUT TIME ZONE" => SqlType::Timestamp,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SqlType::Integer => "INTEGER",
            SqlType::Float64 => "FLOAT64",
            SqlType::String => "STRING",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Timestamp => "TIMESTAMP",
        };
        f.write_str(s)
    }
}

/// A named, typed column of a table, view or intermediate operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: SqlType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, ty: SqlType, nullable: bool) -> Self {
        Self {
            name: normalize_ident(&name.into()),
            ty,
            nullable,
        }
    }
}

/// Identifiers are case-insensitive; everything is stored lower case.
pub fn normalize_ident(name: &str) -> String {
    name.trim().to_lowercase()
}
