//! Translation of SQL scalar expressions into typed [`Expr`]s.

use ripple_core::{parse_timestamp, ColumnSchema, SqlType, Value};
use sqlparser::ast::{
    BinaryOperator, DataType, DuplicateTreatment, Expr as SqlExpr, Function, FunctionArg,
    FunctionArgExpr, FunctionArguments, UnaryOperator, Value as SqlValue,
};

use super::scope::Scope;
use crate::error::CompileError;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::plan::AggregateFunc;

/// A compiled expression with its static type. `ty` is `None` only for an
/// untyped `NULL` literal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Typed {
    pub expr: Expr,
    pub ty: Option<SqlType>,
    pub nullable: bool,
}

impl Typed {
    fn new(expr: Expr, ty: SqlType, nullable: bool) -> Self {
        Self {
            expr,
            ty: Some(ty),
            nullable,
        }
    }

    fn type_name(&self) -> String {
        self.ty.map_or_else(|| "NULL".to_string(), |t| t.to_string())
    }

    /// Output column for this expression. An untyped NULL becomes a
    /// nullable STRING.
    pub fn column(&self, name: &str) -> ColumnSchema {
        ColumnSchema::new(name, self.ty.unwrap_or(SqlType::String), self.nullable || self.ty.is_none())
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.ty, None | Some(SqlType::Boolean))
    }
}

/// One distinct aggregate computed by an aggregate query.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AggregateSlot {
    pub func: AggregateFunc,
    /// Argument, compiled against the query's input row.
    pub arg: Option<Typed>,
    pub ty: SqlType,
    pub nullable: bool,
}

/// Group keys and aggregates of an aggregate query. Inside the grouped
/// context the row is `keys` followed by `aggregates`.
#[derive(Debug, Default)]
pub(crate) struct Grouping {
    pub keys: Vec<Typed>,
    pub aggregates: Vec<AggregateSlot>,
}

/// Compiles expressions against a scope, optionally in grouped context.
pub(crate) struct Translator<'a> {
    scope: &'a Scope,
    grouping: Option<&'a mut Grouping>,
    clause: &'static str,
}

impl<'a> Translator<'a> {
    /// Plain context: columns index the scope's combined row.
    pub fn row(scope: &'a Scope, clause: &'static str) -> Self {
        Self {
            scope,
            grouping: None,
            clause,
        }
    }

    /// Grouped context: columns must be group keys or aggregates.
    pub fn grouped(scope: &'a Scope, grouping: &'a mut Grouping, clause: &'static str) -> Self {
        Self {
            scope,
            grouping: Some(grouping),
            clause,
        }
    }

    pub fn translate(&mut self, e: &SqlExpr) -> Result<Typed, CompileError> {
        if self.grouping.is_some() {
            if let Some(call) = aggregate_invocation(e)? {
                return self.aggregate(call);
            }
            if !contains_aggregate(e) {
                let plain = Translator::row(self.scope, self.clause).translate(e)?;
                if let Some(grouping) = self.grouping.as_deref() {
                    if let Some((i, key)) = grouping
                        .keys
                        .iter()
                        .enumerate()
                        .find(|(_, k)| k.expr == plain.expr)
                    {
                        return Ok(Typed {
                            expr: Expr::column(i),
                            ty: key.ty,
                            nullable: key.nullable,
                        });
                    }
                }
                if plain.expr.max_column().is_none() {
                    return Ok(plain);
                }
                if matches!(e, SqlExpr::Identifier(_) | SqlExpr::CompoundIdentifier(_)) {
                    return Err(CompileError::NotGrouped(e.to_string()));
                }
            }
        }

        match e {
            SqlExpr::Identifier(ident) => self.column(None, &ident.value),
            SqlExpr::CompoundIdentifier(parts) => match parts.as_slice() {
                [column] => self.column(None, &column.value),
                [relation, column] => self.column(Some(&relation.value), &column.value),
                _ => Err(CompileError::Unsupported(format!("qualified name '{e}'"))),
            },
            SqlExpr::Value(value) => literal(value),
            SqlExpr::TypedString { data_type, value } => {
                let ty = sql_type(data_type)?;
                let value = Value::parse(value, ty)
                    .map_err(|err| CompileError::TypeMismatch(err.to_string()))?;
                Ok(Typed::new(Expr::literal(value), ty, false))
            }
            SqlExpr::Nested(inner) => self.translate(inner),
            SqlExpr::BinaryOp { left, op, right } => {
                let op = binary_op(op)?;
                let left = self.translate(left)?;
                let right = self.translate(right)?;
                type_binary(op, left, right)
            }
            SqlExpr::UnaryOp { op, expr } => {
                let inner = self.translate(expr)?;
                match op {
                    UnaryOperator::Not => negate(inner),
                    UnaryOperator::Minus => {
                        require_numeric("-", &inner)?;
                        Ok(fold_negation(inner))
                    }
                    UnaryOperator::Plus => {
                        require_numeric("+", &inner)?;
                        Ok(inner)
                    }
                    other => Err(CompileError::Unsupported(format!("operator {other}"))),
                }
            }
            SqlExpr::IsNull(inner) | SqlExpr::IsNotNull(inner) => {
                let inner = self.translate(inner)?;
                Ok(Typed::new(
                    Expr::IsNull {
                        expr: Box::new(inner.expr),
                        negated: matches!(e, SqlExpr::IsNotNull(_)),
                    },
                    SqlType::Boolean,
                    false,
                ))
            }
            SqlExpr::Cast {
                expr, data_type, ..
            } => {
                let target = sql_type(data_type)?;
                let inner = self.translate(expr)?;
                cast(inner, target)
            }
            SqlExpr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let value = self.translate(expr)?;
                let low = self.translate(low)?;
                let high = self.translate(high)?;
                let lower = type_binary(BinaryOp::GtEq, value.clone(), low)?;
                let upper = type_binary(BinaryOp::LtEq, value, high)?;
                let between = type_binary(BinaryOp::And, lower, upper)?;
                if *negated {
                    negate(between)
                } else {
                    Ok(between)
                }
            }
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let value = self.translate(expr)?;
                let mut any: Option<Typed> = None;
                for item in list {
                    let item = self.translate(item)?;
                    let eq = type_binary(BinaryOp::Eq, value.clone(), item)?;
                    any = Some(match any {
                        Some(acc) => type_binary(BinaryOp::Or, acc, eq)?,
                        None => eq,
                    });
                }
                let any = any.ok_or_else(|| CompileError::Syntax("empty IN list".to_string()))?;
                if *negated {
                    negate(any)
                } else {
                    Ok(any)
                }
            }
            SqlExpr::Function(func) => {
                let name = func.name.to_string();
                if AggregateFunc::from_name(&name).is_some() {
                    Err(CompileError::Unsupported(format!(
                        "aggregate function {} is not allowed in {}",
                        name.to_uppercase(),
                        self.clause
                    )))
                } else {
                    Err(CompileError::Unsupported(format!("function {name}")))
                }
            }
            SqlExpr::Subquery(_) | SqlExpr::Exists { .. } | SqlExpr::InSubquery { .. } => {
                Err(CompileError::Unsupported("subqueries".to_string()))
            }
            other => Err(CompileError::Unsupported(format!("expression '{other}'"))),
        }
    }

    fn column(&self, relation: Option<&str>, name: &str) -> Result<Typed, CompileError> {
        let hit = self.scope.resolve(relation, name)?;
        Ok(Typed::new(
            Expr::column(hit.index),
            hit.column.ty,
            hit.column.nullable,
        ))
    }

    fn aggregate(&mut self, call: AggregateInvocation<'_>) -> Result<Typed, CompileError> {
        let arg = match call.arg {
            Some(arg) if contains_aggregate(arg) => {
                return Err(CompileError::Unsupported(
                    "nested aggregate functions".to_string(),
                ))
            }
            Some(arg) => Some(Translator::row(self.scope, "aggregate arguments").translate(arg)?),
            None => None,
        };
        let (ty, nullable) = aggregate_type(call.func, arg.as_ref())?;
        let Some(grouping) = self.grouping.as_deref_mut() else {
            return Err(CompileError::Unsupported(format!(
                "aggregate function {} is not allowed in {}",
                call.func.sql_name().to_uppercase(),
                self.clause
            )));
        };
        let slot = AggregateSlot {
            func: call.func,
            arg,
            ty,
            nullable,
        };
        let index = match grouping.aggregates.iter().position(|s| *s == slot) {
            Some(i) => i,
            None => {
                grouping.aggregates.push(slot);
                grouping.aggregates.len() - 1
            }
        };
        Ok(Typed::new(
            Expr::column(grouping.keys.len() + index),
            ty,
            nullable,
        ))
    }
}

/// Map a declared column type.
pub(crate) fn sql_type(data_type: &DataType) -> Result<SqlType, CompileError> {
    let name = data_type.to_string();
    SqlType::from_sql_name(&name).ok_or(CompileError::UnsupportedType(name))
}

// ── Aggregates ────────────────────────────────────────────────

pub(crate) struct AggregateInvocation<'e> {
    pub func: AggregateFunc,
    pub arg: Option<&'e SqlExpr>,
}

/// Recognize a call to one of the supported aggregate functions.
pub(crate) fn aggregate_invocation(e: &SqlExpr) -> Result<Option<AggregateInvocation<'_>>, CompileError> {
    let SqlExpr::Function(func) = e else {
        return Ok(None);
    };
    let name = func.name.to_string();
    let Some(func_kind) = AggregateFunc::from_name(&name) else {
        return Ok(None);
    };
    if func.over.is_some() {
        return Err(CompileError::Unsupported("window functions".to_string()));
    }
    let FunctionArguments::List(list) = &func.args else {
        return Err(CompileError::Syntax(format!("{name} requires an argument")));
    };
    if matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct)) {
        return Err(CompileError::Unsupported(format!(
            "{}(DISTINCT ...)",
            name.to_uppercase()
        )));
    }
    match list.args.as_slice() {
        [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] if func_kind == AggregateFunc::Count => {
            Ok(Some(AggregateInvocation {
                func: AggregateFunc::CountStar,
                arg: None,
            }))
        }
        [FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))] => Ok(Some(AggregateInvocation {
            func: func_kind,
            arg: Some(arg),
        })),
        _ => Err(CompileError::Unsupported(format!(
            "{} expects exactly one argument",
            name.to_uppercase()
        ))),
    }
}

fn is_aggregate_function(func: &Function) -> bool {
    AggregateFunc::from_name(&func.name.to_string()).is_some()
}

/// Whether an aggregate call appears anywhere inside `e`.
pub(crate) fn contains_aggregate(e: &SqlExpr) -> bool {
    match e {
        SqlExpr::Function(func) => {
            is_aggregate_function(func)
                || match &func.args {
                    FunctionArguments::List(list) => list.args.iter().any(|arg| match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(inner)) => {
                            contains_aggregate(inner)
                        }
                        _ => false,
                    }),
                    _ => false,
                }
        }
        SqlExpr::BinaryOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        SqlExpr::UnaryOp { expr, .. }
        | SqlExpr::Nested(expr)
        | SqlExpr::IsNull(expr)
        | SqlExpr::IsNotNull(expr)
        | SqlExpr::Cast { expr, .. } => contains_aggregate(expr),
        SqlExpr::Between {
            expr, low, high, ..
        } => contains_aggregate(expr) || contains_aggregate(low) || contains_aggregate(high),
        SqlExpr::InList { expr, list, .. } => {
            contains_aggregate(expr) || list.iter().any(contains_aggregate)
        }
        _ => false,
    }
}

fn aggregate_type(func: AggregateFunc, arg: Option<&Typed>) -> Result<(SqlType, bool), CompileError> {
    match (func, arg) {
        (AggregateFunc::CountStar, _) | (AggregateFunc::Count, _) => Ok((SqlType::Integer, false)),
        (AggregateFunc::Sum, Some(arg)) => {
            require_numeric("SUM", arg)?;
            Ok((arg.ty.unwrap_or(SqlType::Integer), true))
        }
        (AggregateFunc::Avg, Some(arg)) => {
            require_numeric("AVG", arg)?;
            Ok((SqlType::Float64, true))
        }
        (AggregateFunc::Min, Some(arg)) | (AggregateFunc::Max, Some(arg)) => {
            Ok((arg.ty.unwrap_or(SqlType::String), true))
        }
        (func, None) => Err(CompileError::Syntax(format!(
            "{} requires an argument",
            func.sql_name().to_uppercase()
        ))),
    }
}

// ── Typing rules ──────────────────────────────────────────────

fn literal(value: &SqlValue) -> Result<Typed, CompileError> {
    match value {
        SqlValue::Number(text, _) => {
            if text.contains(['.', 'e', 'E']) {
                let f: f64 = text
                    .parse()
                    .map_err(|_| CompileError::Syntax(format!("invalid number '{text}'")))?;
                Ok(Typed::new(Expr::literal(f), SqlType::Float64, false))
            } else {
                let i: i64 = text.parse().map_err(|_| {
                    CompileError::TypeMismatch(format!("integer literal {text} is out of range"))
                })?;
                Ok(Typed::new(Expr::literal(i), SqlType::Integer, false))
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Ok(Typed::new(Expr::literal(s.as_str()), SqlType::String, false))
        }
        SqlValue::Boolean(b) => Ok(Typed::new(Expr::literal(*b), SqlType::Boolean, false)),
        SqlValue::Null => Ok(Typed {
            expr: Expr::literal(Value::Null),
            ty: None,
            nullable: true,
        }),
        other => Err(CompileError::Unsupported(format!("literal {other}"))),
    }
}

fn binary_op(op: &BinaryOperator) -> Result<BinaryOp, CompileError> {
    Ok(match op {
        BinaryOperator::Plus => BinaryOp::Plus,
        BinaryOperator::Minus => BinaryOp::Minus,
        BinaryOperator::Multiply => BinaryOp::Multiply,
        BinaryOperator::Divide => BinaryOp::Divide,
        BinaryOperator::Modulo => BinaryOp::Modulo,
        BinaryOperator::Eq => BinaryOp::Eq,
        BinaryOperator::NotEq => BinaryOp::NotEq,
        BinaryOperator::Lt => BinaryOp::Lt,
        BinaryOperator::LtEq => BinaryOp::LtEq,
        BinaryOperator::Gt => BinaryOp::Gt,
        BinaryOperator::GtEq => BinaryOp::GtEq,
        BinaryOperator::And => BinaryOp::And,
        BinaryOperator::Or => BinaryOp::Or,
        BinaryOperator::StringConcat => BinaryOp::Concat,
        other => return Err(CompileError::Unsupported(format!("operator {other}"))),
    })
}

fn require_numeric(op: &str, operand: &Typed) -> Result<(), CompileError> {
    match operand.ty {
        None => Ok(()),
        Some(ty) if ty.is_numeric() => Ok(()),
        Some(ty) => Err(CompileError::TypeMismatch(format!(
            "{op} requires a numeric operand, found {ty}"
        ))),
    }
}

/// Turn a string literal into a timestamp literal when it is compared
/// with a TIMESTAMP.
fn coerce_to_timestamp(operand: Typed) -> Result<Typed, CompileError> {
    match &operand.expr {
        Expr::Literal {
            value: Value::String(text),
        } => {
            let ts = parse_timestamp(text).ok_or_else(|| {
                CompileError::TypeMismatch(format!("'{text}' is not a valid TIMESTAMP"))
            })?;
            Ok(Typed::new(Expr::literal(ts), SqlType::Timestamp, false))
        }
        _ => Ok(operand),
    }
}

pub(crate) fn type_binary(op: BinaryOp, left: Typed, right: Typed) -> Result<Typed, CompileError> {
    let nullable = left.nullable || right.nullable;
    let mismatch = |left: &Typed, right: &Typed| {
        CompileError::TypeMismatch(format!(
            "cannot apply {} to {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    };
    match op {
        BinaryOp::And | BinaryOp::Or => {
            if !left.is_boolean() || !right.is_boolean() {
                return Err(mismatch(&left, &right));
            }
            Ok(Typed::new(
                Expr::binary(op, left.expr, right.expr),
                SqlType::Boolean,
                nullable,
            ))
        }
        BinaryOp::Concat => {
            let stringy = |t: &Typed| matches!(t.ty, None | Some(SqlType::String));
            if !stringy(&left) || !stringy(&right) {
                return Err(mismatch(&left, &right));
            }
            Ok(Typed::new(
                Expr::binary(op, left.expr, right.expr),
                SqlType::String,
                nullable,
            ))
        }
        op if op.is_arithmetic() => {
            let numeric = |t: &Typed| t.ty.map_or(true, SqlType::is_numeric);
            if !numeric(&left) || !numeric(&right) {
                return Err(mismatch(&left, &right));
            }
            let ty = if left.ty == Some(SqlType::Float64) || right.ty == Some(SqlType::Float64) {
                SqlType::Float64
            } else {
                SqlType::Integer
            };
            // Integer division and modulo by zero yield NULL.
            let nullable = nullable
                || (ty == SqlType::Integer && matches!(op, BinaryOp::Divide | BinaryOp::Modulo));
            Ok(Typed::new(Expr::binary(op, left.expr, right.expr), ty, nullable))
        }
        _ => {
            let (left, right) = match (left.ty, right.ty) {
                (Some(SqlType::Timestamp), Some(SqlType::String)) => (left, coerce_to_timestamp(right)?),
                (Some(SqlType::String), Some(SqlType::Timestamp)) => (coerce_to_timestamp(left)?, right),
                _ => (left, right),
            };
            let comparable = match (left.ty, right.ty) {
                (None, _) | (_, None) => true,
                (Some(a), Some(b)) => a == b || (a.is_numeric() && b.is_numeric()),
            };
            if !comparable {
                return Err(mismatch(&left, &right));
            }
            Ok(Typed::new(
                Expr::binary(op, left.expr, right.expr),
                SqlType::Boolean,
                nullable,
            ))
        }
    }
}

fn negate(inner: Typed) -> Result<Typed, CompileError> {
    if !inner.is_boolean() {
        return Err(CompileError::TypeMismatch(format!(
            "NOT requires a BOOLEAN operand, found {}",
            inner.type_name()
        )));
    }
    Ok(Typed::new(
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(inner.expr),
        },
        SqlType::Boolean,
        inner.nullable,
    ))
}

/// `-<literal>` folds into the literal; anything else becomes a negation.
fn fold_negation(inner: Typed) -> Typed {
    let folded = match &inner.expr {
        Expr::Literal {
            value: Value::Integer(i),
        } => i.checked_neg().map(Value::Integer),
        Expr::Literal {
            value: Value::Float(f),
        } => Some(Value::Float(-f)),
        _ => None,
    };
    match folded {
        Some(value) => Typed {
            expr: Expr::literal(value),
            ..inner
        },
        None => Typed {
            expr: Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(inner.expr),
            },
            ..inner
        },
    }
}

fn cast(inner: Typed, target: SqlType) -> Result<Typed, CompileError> {
    let allowed = match inner.ty {
        None => true,
        Some(from) => {
            from == target
                || from == SqlType::String
                || target == SqlType::String
                || (from.is_numeric() && target.is_numeric())
                || (target == SqlType::Integer
                    && matches!(from, SqlType::Boolean | SqlType::Timestamp))
        }
    };
    if !allowed {
        return Err(CompileError::TypeMismatch(format!(
            "cannot cast {} to {target}",
            inner.type_name()
        )));
    }
    // Parsing an empty string yields NULL for non-string targets.
    let nullable =
        inner.nullable || (inner.ty == Some(SqlType::String) && target != SqlType::String);
    Ok(Typed::new(
        Expr::Cast {
            expr: Box::new(inner.expr),
            ty: target,
        },
        target,
        nullable,
    ))
}
