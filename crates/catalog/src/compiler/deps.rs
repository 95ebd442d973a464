//! View dependency graph.
//!
//! Built over every definition before any query is planned, so a view that
//! (transitively) reads itself is reported as a cycle even though the
//! offending reference is also a forward reference.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use ripple_core::normalize_ident;
use sqlparser::ast::{Query, SetExpr, TableFactor, TableWithJoins};

use crate::error::CompileError;

/// Relations a query reads, in order of first reference.
pub(crate) fn referenced_relations(query: &Query) -> Vec<String> {
    let mut out = Vec::new();
    collect_set_expr(&query.body, &mut out);
    out
}

fn collect_set_expr(body: &SetExpr, out: &mut Vec<String>) {
    match body {
        SetExpr::Select(select) => {
            for from in &select.from {
                collect_from(from, out);
            }
        }
        SetExpr::Query(query) => collect_set_expr(&query.body, out),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr(left, out);
            collect_set_expr(right, out);
        }
        _ => {}
    }
}

fn collect_from(from: &TableWithJoins, out: &mut Vec<String>) {
    collect_factor(&from.relation, out);
    for join in &from.joins {
        collect_factor(&join.relation, out);
    }
}

fn collect_factor(factor: &TableFactor, out: &mut Vec<String>) {
    match factor {
        TableFactor::Table { name, .. } => {
            if let Some(ident) = name.0.last() {
                let name = normalize_ident(&ident.value);
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        TableFactor::Derived { subquery, .. } => collect_set_expr(&subquery.body, out),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_from(table_with_joins, out),
        _ => {}
    }
}

/// Reject cyclic view definitions.
///
/// `definitions` lists every table and view in declaration order, with the
/// relations each one reads (empty for tables). Names not defined anywhere
/// are ignored here; they surface as unknown tables during planning.
pub(crate) fn check_acyclic(definitions: &[(String, Vec<String>)]) -> Result<(), CompileError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for (position, (name, _)) in definitions.iter().enumerate() {
        index.insert(name.as_str(), graph.add_node(position));
    }
    for (name, reads) in definitions {
        let target = index[name.as_str()];
        for dep in reads {
            if let Some(&source) = index.get(dep.as_str()) {
                graph.update_edge(source, target, ());
            }
        }
    }

    let mut cycles: Vec<Vec<usize>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut members: Vec<usize> = scc.iter().map(|&n| graph[n]).collect();
            members.sort_unstable();
            members
        })
        .collect();
    cycles.sort();

    match cycles.into_iter().next() {
        Some(members) => Err(CompileError::CyclicDependency(
            members
                .into_iter()
                .map(|i| definitions[i].0.clone())
                .collect(),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs(items: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        items
            .iter()
            .map(|(name, reads)| {
                (
                    name.to_string(),
                    reads.iter().map(|r| r.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn chain_is_acyclic() {
        let d = defs(&[("t", &[]), ("a", &["t"]), ("b", &["a", "t"])]);
        assert!(check_acyclic(&d).is_ok());
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let d = defs(&[("t", &[]), ("v", &["v"])]);
        assert_eq!(
            check_acyclic(&d),
            Err(CompileError::CyclicDependency(vec!["v".into()]))
        );
    }

    #[test]
    fn mutual_reference_lists_members_in_declaration_order() {
        let d = defs(&[("t", &[]), ("b", &["c"]), ("c", &["d"]), ("d", &["b", "t"])]);
        assert_eq!(
            check_acyclic(&d),
            Err(CompileError::CyclicDependency(vec![
                "b".into(),
                "c".into(),
                "d".into()
            ]))
        );
    }

    #[test]
    fn undefined_names_are_left_for_planning() {
        let d = defs(&[("v", &["missing"])]);
        assert!(check_acyclic(&d).is_ok());
    }
}
