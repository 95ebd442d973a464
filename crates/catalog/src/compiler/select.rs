//! Planning of `SELECT` queries into dataflow operators.

use std::collections::HashSet;

use ripple_core::{normalize_ident, ColumnSchema};
use sqlparser::ast::{
    Distinct, Expr as SqlExpr, GroupByExpr, JoinConstraint, JoinOperator, Query, Select,
    SelectItem, SetExpr, TableFactor,
};

use super::scalar::{aggregate_invocation, contains_aggregate, Grouping, Translator, Typed};
use super::scope::Scope;
use crate::error::CompileError;
use crate::expr::{BinaryOp, Expr};
use crate::plan::{AggregateCall, NodeId, Operator, Plan};
use crate::schema::Schema;

/// Plan a view's defining query. Returns the node producing the view and
/// its output columns. `column_names`, when non-empty, renames the output.
pub(crate) fn plan_query(
    query: &Query,
    column_names: &[String],
    schema: &Schema,
    plan: &mut Plan,
) -> Result<(NodeId, Vec<ColumnSchema>), CompileError> {
    if query.with.is_some() {
        return Err(CompileError::Unsupported("WITH clauses".to_string()));
    }
    if query.order_by.is_some() {
        return Err(CompileError::Unsupported("ORDER BY in a view".to_string()));
    }
    if query.limit.is_some() || query.offset.is_some() || query.fetch.is_some() {
        return Err(CompileError::Unsupported("LIMIT/OFFSET in a view".to_string()));
    }
    match query.body.as_ref() {
        SetExpr::Select(select) => plan_select(select, column_names, schema, plan),
        SetExpr::Query(inner) => plan_query(inner, column_names, schema, plan),
        SetExpr::SetOperation { op, .. } => {
            Err(CompileError::Unsupported(format!("set operation {op}")))
        }
        SetExpr::Values(_) => Err(CompileError::Unsupported("VALUES".to_string())),
        other => Err(CompileError::Unsupported(format!("query '{other}'"))),
    }
}

struct Relation {
    node: NodeId,
    scope: Scope,
}

fn plan_select(
    select: &Select,
    column_names: &[String],
    schema: &Schema,
    plan: &mut Plan,
) -> Result<(NodeId, Vec<ColumnSchema>), CompileError> {
    let distinct = match &select.distinct {
        None => false,
        Some(Distinct::Distinct) => true,
        Some(Distinct::On(_)) => return Err(CompileError::Unsupported("DISTINCT ON".to_string())),
    };

    // FROM: a left-deep tree of joins.
    let mut input: Option<Relation> = None;
    for from in &select.from {
        let mut current = scan(&from.relation, schema, plan)?;
        for join in &from.joins {
            let right = scan(&join.relation, schema, plan)?;
            current = match &join.join_operator {
                JoinOperator::Inner(JoinConstraint::On(on)) => join_on(current, right, Some(on), plan)?,
                JoinOperator::Inner(JoinConstraint::None) | JoinOperator::CrossJoin => {
                    join_on(current, right, None, plan)?
                }
                JoinOperator::Inner(_) => {
                    return Err(CompileError::Unsupported("NATURAL and USING joins".to_string()))
                }
                JoinOperator::LeftOuter(_)
                | JoinOperator::RightOuter(_)
                | JoinOperator::FullOuter(_) => {
                    return Err(CompileError::Unsupported("outer joins".to_string()))
                }
                _ => return Err(CompileError::Unsupported("join type".to_string())),
            };
        }
        input = Some(match input {
            None => current,
            Some(left) => join_on(left, current, None, plan)?,
        });
    }
    let Relation { mut node, scope } = input
        .ok_or_else(|| CompileError::Unsupported("SELECT without FROM".to_string()))?;

    if let Some(selection) = &select.selection {
        let predicate = Translator::row(&scope, "WHERE").translate(selection)?;
        require_boolean("WHERE", &predicate)?;
        node = plan.push(
            Operator::Filter {
                predicate: predicate.expr,
            },
            vec![node],
            scope.columns(),
        );
    }

    let group_by: &[SqlExpr] = match &select.group_by {
        GroupByExpr::Expressions(exprs, modifiers) if modifiers.is_empty() => exprs,
        GroupByExpr::Expressions(..) => {
            return Err(CompileError::Unsupported("GROUP BY modifiers".to_string()))
        }
        GroupByExpr::All(_) => return Err(CompileError::Unsupported("GROUP BY ALL".to_string())),
    };
    let aggregated = !group_by.is_empty()
        || select.having.is_some()
        || select.projection.iter().any(|item| match item {
            SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => {
                contains_aggregate(e)
            }
            _ => false,
        });

    let (node, outputs) = if aggregated {
        plan_aggregate(select, group_by, node, &scope, plan)?
    } else {
        let outputs = project_items(&select.projection, &mut Translator::row(&scope, "SELECT"), Some(&scope))?;
        (node, outputs)
    };

    // Final projection, always present so the view's columns carry their names.
    let mut names: Vec<String> = outputs.iter().map(|(name, _)| name.clone()).collect();
    if !column_names.is_empty() {
        if column_names.len() != names.len() {
            return Err(CompileError::TypeMismatch(format!(
                "view declares {} columns but its query produces {}",
                column_names.len(),
                names.len()
            )));
        }
        names = column_names.to_vec();
    }
    let names = uniquify(names);
    let columns: Vec<ColumnSchema> = outputs
        .iter()
        .zip(&names)
        .map(|((_, typed), name)| typed.column(name))
        .collect();
    let exprs = outputs.into_iter().map(|(_, typed)| typed.expr).collect();
    let mut node = plan.push(Operator::Project { exprs }, vec![node], columns.clone());
    if distinct {
        node = plan.push(Operator::Distinct, vec![node], columns.clone());
    }
    Ok((node, columns))
}

/// Resolve a `FROM` item to the node producing it.
fn scan(factor: &TableFactor, schema: &Schema, plan: &Plan) -> Result<Relation, CompileError> {
    let TableFactor::Table { name, alias, .. } = factor else {
        return Err(CompileError::Unsupported("subqueries in FROM".to_string()));
    };
    let relation = name
        .0
        .last()
        .map(|ident| normalize_ident(&ident.value))
        .ok_or_else(|| CompileError::Syntax("empty relation name".to_string()))?;
    let node = plan
        .tables
        .get(&relation)
        .or_else(|| plan.views.get(&relation))
        .copied();
    let (Some(node), Some(columns)) = (node, schema.columns(&relation)) else {
        return Err(CompileError::UnknownTable(relation));
    };
    let qualifier = match alias {
        Some(alias) if !alias.columns.is_empty() => {
            return Err(CompileError::Unsupported("column aliases in FROM".to_string()))
        }
        Some(alias) => normalize_ident(&alias.name.value),
        None => relation,
    };
    Ok(Relation {
        node,
        scope: Scope::single(&qualifier, columns.to_vec()),
    })
}

/// Inner join of two relations. Equalities between a left and a right
/// column of the same type become hash keys; every other conjunct of the
/// condition is applied as a filter above the join.
fn join_on(
    left: Relation,
    right: Relation,
    on: Option<&SqlExpr>,
    plan: &mut Plan,
) -> Result<Relation, CompileError> {
    let left_width = left.scope.width();
    let mut scope = left.scope;
    let right_scope = right.scope;
    for qualifier in right_scope.qualifiers() {
        if scope.has_qualifier(&qualifier) {
            return Err(CompileError::DuplicateName(qualifier));
        }
    }
    scope.extend(right_scope);
    let columns = scope.columns();

    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    let mut residual = Vec::new();
    if let Some(on) = on {
        let condition = Translator::row(&scope, "ON").translate(on)?;
        require_boolean("ON", &condition)?;
        let mut conjuncts = Vec::new();
        split_conjuncts(condition.expr, &mut conjuncts);
        for conjunct in conjuncts {
            match key_pair(&conjunct, left_width, &columns) {
                Some((l, r)) => {
                    left_keys.push(l);
                    right_keys.push(r);
                }
                None => residual.push(conjunct),
            }
        }
    }

    let mut node = plan.push(
        Operator::Join {
            left_keys,
            right_keys,
        },
        vec![left.node, right.node],
        columns.clone(),
    );
    if let Some(predicate) = Expr::and_all(residual) {
        node = plan.push(Operator::Filter { predicate }, vec![node], columns);
    }
    Ok(Relation { node, scope })
}

fn split_conjuncts(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            split_conjuncts(*left, out);
            split_conjuncts(*right, out);
        }
        other => out.push(other),
    }
}

/// `left_col = right_col` with identical column types, as (left, right) key
/// positions relative to each side.
fn key_pair(conjunct: &Expr, left_width: usize, columns: &[ColumnSchema]) -> Option<(usize, usize)> {
    let Expr::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = conjunct
    else {
        return None;
    };
    let (Expr::Column { index: a }, Expr::Column { index: b }) = (left.as_ref(), right.as_ref()) else {
        return None;
    };
    let (l, r) = match (*a < left_width, *b < left_width) {
        (true, false) => (*a, *b),
        (false, true) => (*b, *a),
        _ => return None,
    };
    (columns[l].ty == columns[r].ty).then_some((l, r - left_width))
}

type Output = (String, Typed);

fn project_items(
    items: &[SelectItem],
    translator: &mut Translator<'_>,
    wildcard_scope: Option<&Scope>,
) -> Result<Vec<Output>, CompileError> {
    let mut outputs = Vec::new();
    for (position, item) in items.iter().enumerate() {
        match item {
            SelectItem::UnnamedExpr(e) => {
                let typed = translator.translate(e)?;
                outputs.push((derived_name(e, position), typed));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                let typed = translator.translate(expr)?;
                outputs.push((normalize_ident(&alias.value), typed));
            }
            SelectItem::Wildcard(_) => {
                let scope = wildcard_scope.ok_or_else(|| CompileError::NotGrouped("*".to_string()))?;
                for (index, column) in scope.columns().into_iter().enumerate() {
                    outputs.push((column.name.clone(), column_ref(index, &column)));
                }
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let scope =
                    wildcard_scope.ok_or_else(|| CompileError::NotGrouped(format!("{name}.*")))?;
                let qualifier = name.0.last().map(|i| i.value.as_str()).unwrap_or_default();
                for hit in scope.qualified_columns(qualifier)? {
                    outputs.push((hit.column.name.clone(), column_ref(hit.index, &hit.column)));
                }
            }
        }
    }
    Ok(outputs)
}

fn column_ref(index: usize, column: &ColumnSchema) -> Typed {
    Typed {
        expr: Expr::column(index),
        ty: Some(column.ty),
        nullable: column.nullable,
    }
}

/// `pre-project -> aggregate -> [having filter]`; returns the node and the
/// select items compiled against the aggregate's output.
fn plan_aggregate(
    select: &Select,
    group_by: &[SqlExpr],
    input: NodeId,
    scope: &Scope,
    plan: &mut Plan,
) -> Result<(NodeId, Vec<Output>), CompileError> {
    let mut grouping = Grouping::default();
    let mut key_names = Vec::with_capacity(group_by.len());
    for (position, e) in group_by.iter().enumerate() {
        if contains_aggregate(e) {
            return Err(CompileError::Unsupported(
                "aggregate functions in GROUP BY".to_string(),
            ));
        }
        let key = Translator::row(scope, "GROUP BY").translate(e)?;
        if !grouping.keys.iter().any(|k| k.expr == key.expr) {
            key_names.push(derived_name(e, position));
            grouping.keys.push(key);
        }
    }

    let outputs = {
        let mut translator = Translator::grouped(scope, &mut grouping, "SELECT");
        project_items(&select.projection, &mut translator, None)?
    };
    let having = match &select.having {
        Some(having) => {
            let predicate = Translator::grouped(scope, &mut grouping, "HAVING").translate(having)?;
            require_boolean("HAVING", &predicate)?;
            Some(predicate.expr)
        }
        None => None,
    };

    // Pre-projection: group keys, then each distinct aggregate argument.
    let mut pre_exprs: Vec<Expr> = Vec::new();
    let mut pre_columns: Vec<ColumnSchema> = Vec::new();
    for (key, name) in grouping.keys.iter().zip(&key_names) {
        pre_exprs.push(key.expr.clone());
        pre_columns.push(key.column(name));
    }
    let group_width = pre_exprs.len();
    let input_columns = scope.columns();
    let mut calls = Vec::with_capacity(grouping.aggregates.len());
    for slot in &grouping.aggregates {
        let arg = match &slot.arg {
            None => None,
            Some(arg) => Some(match pre_exprs[group_width..].iter().position(|e| *e == arg.expr) {
                Some(i) => group_width + i,
                None => {
                    let name = match arg.expr {
                        Expr::Column { index } => input_columns[index].name.clone(),
                        _ => format!("arg${}", pre_exprs.len()),
                    };
                    pre_columns.push(arg.column(&name));
                    pre_exprs.push(arg.expr.clone());
                    pre_exprs.len() - 1
                }
            }),
        };
        calls.push(AggregateCall {
            func: slot.func,
            arg,
        });
    }
    let pre = plan.push(
        Operator::Project { exprs: pre_exprs },
        vec![input],
        pre_columns.clone(),
    );

    let mut agg_columns: Vec<ColumnSchema> = pre_columns[..group_width].to_vec();
    for slot in &grouping.aggregates {
        agg_columns.push(ColumnSchema::new(slot.func.sql_name(), slot.ty, slot.nullable));
    }
    let mut node = plan.push(
        Operator::Aggregate {
            group_by: (0..group_width).collect(),
            aggregates: calls,
        },
        vec![pre],
        agg_columns.clone(),
    );
    if let Some(predicate) = having {
        node = plan.push(Operator::Filter { predicate }, vec![node], agg_columns);
    }
    Ok((node, outputs))
}

/// Output name of an unaliased select item.
fn derived_name(e: &SqlExpr, position: usize) -> String {
    match e {
        SqlExpr::Identifier(ident) => normalize_ident(&ident.value),
        SqlExpr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| normalize_ident(&p.value))
            .unwrap_or_else(|| format!("expr${position}")),
        SqlExpr::Function(_) => match aggregate_invocation(e) {
            Ok(Some(call)) => call.func.sql_name().to_string(),
            _ => format!("expr${position}"),
        },
        _ => format!("expr${position}"),
    }
}

/// Make names unique by appending a counter to repeats (`id`, `id0`, `id1`).
fn uniquify(names: Vec<String>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut suffix = 0;
        while used.contains(&candidate) {
            candidate = format!("{name}{suffix}");
            suffix += 1;
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

fn require_boolean(clause: &str, predicate: &Typed) -> Result<(), CompileError> {
    if predicate.is_boolean() {
        Ok(())
    } else {
        Err(CompileError::TypeMismatch(format!(
            "{clause} condition must be BOOLEAN, found {}",
            predicate.ty.map_or_else(|| "NULL".to_string(), |t| t.to_string())
        )))
    }
}
