//! Compiled scalar expressions.
//!
//! Column references are positional: they index into the row produced by
//! the operator's input. Evaluation follows SQL three-valued logic: any
//! arithmetic or comparison with a NULL operand yields NULL.

use std::cmp::Ordering;
use std::fmt;

use ripple_core::{Row, SqlType, Value};
use serde::Serialize;

use crate::error::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Concat,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Concat => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Column {
        index: usize,
    },
    Literal {
        value: Value,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Cast {
        expr: Box<Expr>,
        ty: SqlType,
    },
}

impl Expr {
    pub fn column(index: usize) -> Self {
        Expr::Column { index }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal {
            value: value.into(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Conjunction of all `exprs`; `None` when empty.
    pub fn and_all(exprs: Vec<Expr>) -> Option<Expr> {
        exprs
            .into_iter()
            .reduce(|acc, e| Expr::binary(BinaryOp::And, acc, e))
    }

    /// Evaluate against a row.
    pub fn eval(&self, row: &Row) -> Result<Value, EvalError> {
        match self {
            Expr::Column { index } => Ok(row.get(*index).clone()),
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => eval_and(left.eval(row)?, || right.eval(row)),
                BinaryOp::Or => eval_or(left.eval(row)?, || right.eval(row)),
                _ => eval_binary(*op, &left.eval(row)?, &right.eval(row)?),
            },
            Expr::Unary { op, expr } => {
                let v = expr.eval(row)?;
                match (op, v) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
                    (UnaryOp::Neg, Value::Integer(i)) => i
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or(EvalError::Overflow("negation")),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                    (op, v) => Err(EvalError::InvalidOperands {
                        op: if *op == UnaryOp::Not { "NOT" } else { "-" },
                        left: v.kind(),
                        right: "",
                    }),
                }
            }
            Expr::IsNull { expr, negated } => {
                let is_null = expr.eval(row)?.is_null();
                Ok(Value::Boolean(is_null != *negated))
            }
            Expr::Cast { expr, ty } => expr
                .eval(row)?
                .cast(*ty)
                .map_err(|e| EvalError::Cast(e.to_string())),
        }
    }

    /// Evaluate as a filter predicate: only TRUE passes.
    pub fn matches(&self, row: &Row) -> Result<bool, EvalError> {
        Ok(matches!(self.eval(row)?, Value::Boolean(true)))
    }

    /// Largest column index referenced, if any.
    pub fn max_column(&self) -> Option<usize> {
        match self {
            Expr::Column { index } => Some(*index),
            Expr::Literal { .. } => None,
            Expr::Binary { left, right, .. } => left.max_column().max(right.max_column()),
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } | Expr::Cast { expr, .. } => {
                expr.max_column()
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { index } => write!(f, "${index}"),
            Expr::Literal { value: Value::Null } => f.write_str("NULL"),
            Expr::Literal {
                value: Value::String(s),
            } => write!(f, "'{s}'"),
            Expr::Literal { value } => write!(f, "{value}"),
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Unary { op: UnaryOp::Not, expr } => write!(f, "(NOT {expr})"),
            Expr::Unary { op: UnaryOp::Neg, expr } => write!(f, "(-{expr})"),
            Expr::IsNull { expr, negated } => {
                write!(f, "({expr} IS {}NULL)", if *negated { "NOT " } else { "" })
            }
            Expr::Cast { expr, ty } => write!(f, "CAST({expr} AS {ty})"),
        }
    }
}

fn eval_and(
    left: Value,
    right: impl FnOnce() -> Result<Value, EvalError>,
) -> Result<Value, EvalError> {
    if left == Value::Boolean(false) {
        return Ok(Value::Boolean(false));
    }
    let right = right()?;
    Ok(match (left, right) {
        (_, Value::Boolean(false)) => Value::Boolean(false),
        (Value::Boolean(true), Value::Boolean(true)) => Value::Boolean(true),
        _ => Value::Null,
    })
}

fn eval_or(
    left: Value,
    right: impl FnOnce() -> Result<Value, EvalError>,
) -> Result<Value, EvalError> {
    if left == Value::Boolean(true) {
        return Ok(Value::Boolean(true));
    }
    let right = right()?;
    Ok(match (left, right) {
        (_, Value::Boolean(true)) => Value::Boolean(true),
        (Value::Boolean(false), Value::Boolean(false)) => Value::Boolean(false),
        _ => Value::Null,
    })
}

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if op.is_comparison() {
        let invalid = || EvalError::InvalidOperands {
            op: op.symbol(),
            left: left.kind(),
            right: right.kind(),
        };
        let ord = left.sql_cmp(right).ok_or_else(invalid)?;
        let result = match op {
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::NotEq => ord != Ordering::Equal,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::LtEq => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        };
        return Ok(Value::Boolean(result));
    }
    if op == BinaryOp::Concat {
        return Ok(Value::String(format!("{left}{right}")));
    }
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => integer_arith(op, *a, *b),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(float_arith(op, a, b))),
            _ => Err(EvalError::InvalidOperands {
                op: op.symbol(),
                left: left.kind(),
                right: right.kind(),
            }),
        },
    }
}

fn integer_arith(op: BinaryOp, a: i64, b: i64) -> Result<Value, EvalError> {
    let result = match op {
        BinaryOp::Plus => a.checked_add(b),
        BinaryOp::Minus => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        // Division by zero yields NULL rather than failing the pipeline.
        BinaryOp::Divide if b == 0 => return Ok(Value::Null),
        BinaryOp::Modulo if b == 0 => return Ok(Value::Null),
        BinaryOp::Divide => a.checked_div(b),
        BinaryOp::Modulo => a.checked_rem(b),
        _ => unreachable!("non-arithmetic operator {op:?}"),
    };
    result
        .map(Value::Integer)
        .ok_or(EvalError::Overflow(op.symbol()))
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Plus => a + b,
        BinaryOp::Minus => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::Modulo => a % b,
        _ => unreachable!("non-arithmetic operator {op:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::new(vec![
            Value::Integer(10),
            Value::Float(2.5),
            Value::Null,
            Value::from("abc"),
        ])
    }

    #[test]
    fn arithmetic_promotes_to_float() {
        let e = Expr::binary(BinaryOp::Multiply, Expr::column(0), Expr::column(1));
        assert_eq!(e.eval(&row()).unwrap(), Value::Float(25.0));
        let e = Expr::binary(BinaryOp::Plus, Expr::column(0), Expr::literal(5i64));
        assert_eq!(e.eval(&row()).unwrap(), Value::Integer(15));
    }

    #[test]
    fn null_propagates_through_arithmetic_and_comparison() {
        let e = Expr::binary(BinaryOp::Plus, Expr::column(0), Expr::column(2));
        assert!(e.eval(&row()).unwrap().is_null());
        let e = Expr::binary(BinaryOp::Eq, Expr::column(2), Expr::column(2));
        assert!(e.eval(&row()).unwrap().is_null());
        assert!(!e.matches(&row()).unwrap());
    }

    #[test]
    fn three_valued_and_or() {
        let null_cmp = Expr::binary(BinaryOp::Gt, Expr::column(2), Expr::literal(1i64));
        let t = Expr::literal(true);
        let f = Expr::literal(false);
        let and_false = Expr::binary(BinaryOp::And, null_cmp.clone(), f.clone());
        assert_eq!(and_false.eval(&row()).unwrap(), Value::Boolean(false));
        let or_true = Expr::binary(BinaryOp::Or, null_cmp.clone(), t);
        assert_eq!(or_true.eval(&row()).unwrap(), Value::Boolean(true));
        let or_null = Expr::binary(BinaryOp::Or, null_cmp, f);
        assert!(or_null.eval(&row()).unwrap().is_null());
    }

    #[test]
    fn integer_division_by_zero_is_null() {
        let e = Expr::binary(BinaryOp::Divide, Expr::column(0), Expr::literal(0i64));
        assert!(e.eval(&row()).unwrap().is_null());
    }

    #[test]
    fn overflow_is_an_error() {
        let e = Expr::binary(BinaryOp::Plus, Expr::literal(i64::MAX), Expr::literal(1i64));
        assert_eq!(e.eval(&row()), Err(EvalError::Overflow("+")));
    }

    #[test]
    fn casting_an_unrepresentable_float_is_an_error() {
        let e = Expr::Cast {
            expr: Box::new(Expr::literal(1e300)),
            ty: SqlType::Integer,
        };
        assert!(matches!(e.eval(&row()), Err(EvalError::Cast(_))));
        let e = Expr::Cast {
            expr: Box::new(Expr::column(1)),
            ty: SqlType::Integer,
        };
        assert_eq!(e.eval(&row()).unwrap(), Value::Integer(2));
    }

    #[test]
    fn is_null_and_concat() {
        let e = Expr::IsNull {
            expr: Box::new(Expr::column(2)),
            negated: false,
        };
        assert_eq!(e.eval(&row()).unwrap(), Value::Boolean(true));
        let e = Expr::binary(BinaryOp::Concat, Expr::column(3), Expr::column(0));
        assert_eq!(e.eval(&row()).unwrap(), Value::from("abc10"));
    }

    #[test]
    fn display_is_readable() {
        let e = Expr::binary(BinaryOp::Gt, Expr::column(1), Expr::literal(3i64));
        assert_eq!(e.to_string(), "($1 > 3)");
    }
}
