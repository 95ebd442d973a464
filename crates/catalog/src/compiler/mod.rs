//! SQL program compiler.
//!
//! A program is a sequence of `CREATE TABLE` and `CREATE VIEW` statements.
//! Compilation validates names and types, rejects cyclic view definitions,
//! and lowers every view into operators appended to a single [`Plan`].

mod deps;
mod scalar;
mod scope;
mod select;

use std::collections::HashSet;

use ripple_core::{normalize_ident, ColumnSchema};
use serde::Serialize;
use sqlparser::ast::{ColumnOption, CreateTable, ObjectName, Query, Statement, TableConstraint};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::error::CompileError;
use crate::plan::{Operator, Plan};
use crate::schema::{Schema, TableDef, ViewDef};

/// Output of a successful compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompiledProgram {
    pub schema: Schema,
    pub plan: Plan,
}

impl CompiledProgram {
    /// Columns of a table or view.
    pub fn columns(&self, relation: &str) -> Option<&[ColumnSchema]> {
        self.schema.columns(relation)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

enum Definition<'a> {
    Table {
        name: String,
        columns: Vec<ColumnSchema>,
    },
    View {
        name: String,
        column_names: Vec<String>,
        query: &'a Query,
        reads: Vec<String>,
    },
}

impl<'a> Definition<'a> {
    fn name(&self) -> &str {
        match self {
            Definition::Table { name, .. } | Definition::View { name, .. } => name,
        }
    }

    fn reads(&self) -> Vec<String> {
        match self {
            Definition::Table { .. } => Vec::new(),
            Definition::View { reads, .. } => reads.clone(),
        }
    }

    fn from_statement(statement: &'a Statement) -> Result<Self, CompileError> {
        match statement {
            Statement::CreateTable(create) => table_definition(create),
            Statement::CreateView {
                name,
                columns,
                query,
                ..
            } => Ok(Definition::View {
                name: object_name(name)?,
                column_names: columns.iter().map(|c| normalize_ident(&c.name.value)).collect(),
                reads: deps::referenced_relations(query),
                query: query.as_ref(),
            }),
            other => Err(CompileError::Unsupported(format!(
                "only CREATE TABLE and CREATE VIEW statements are allowed, found '{other}'"
            ))),
        }
    }
}

/// Compile a SQL program into its schema and dataflow plan.
///
/// Deterministic: the same text always yields the same program.
pub fn compile(sql: &str) -> Result<CompiledProgram, CompileError> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| CompileError::Syntax(e.to_string()))?;

    let definitions = statements
        .iter()
        .map(Definition::from_statement)
        .collect::<Result<Vec<_>, _>>()?;

    {
        let mut seen = HashSet::with_capacity(definitions.len());
        for definition in &definitions {
            if !seen.insert(definition.name()) {
                return Err(CompileError::DuplicateName(definition.name().to_string()));
            }
        }
    }

    let graph: Vec<(String, Vec<String>)> = definitions
        .iter()
        .map(|d| (d.name().to_string(), d.reads()))
        .collect();
    deps::check_acyclic(&graph)?;

    let mut program = CompiledProgram::default();
    for definition in definitions {
        match definition {
            Definition::Table { name, columns } => {
                let node = program.plan.push(
                    Operator::Scan {
                        table: name.clone(),
                    },
                    Vec::new(),
                    columns.clone(),
                );
                program.plan.tables.insert(name.clone(), node);
                program
                    .schema
                    .tables
                    .insert(name.clone(), TableDef { name, columns });
            }
            Definition::View {
                name,
                column_names,
                query,
                reads,
            } => {
                // Views may only read names defined earlier in the program.
                if let Some(missing) = reads.iter().find(|r| !program.schema.contains(r)) {
                    return Err(CompileError::UnknownTable(missing.clone()));
                }
                let (node, columns) =
                    select::plan_query(query, &column_names, &program.schema, &mut program.plan)?;
                program.plan.views.insert(name.clone(), node);
                program.schema.views.insert(
                    name.clone(),
                    ViewDef {
                        name,
                        columns,
                        query: query.to_string(),
                        depends_on: reads,
                    },
                );
            }
        }
    }

    debug!(
        tables = program.schema.tables.len(),
        views = program.schema.views.len(),
        nodes = program.plan.nodes.len(),
        "compiled program"
    );
    Ok(program)
}

fn object_name(name: &ObjectName) -> Result<String, CompileError> {
    name.0
        .last()
        .map(|ident| normalize_ident(&ident.value))
        .ok_or_else(|| CompileError::Syntax("missing object name".to_string()))
}

fn table_definition(create: &CreateTable) -> Result<Definition<'_>, CompileError> {
    let table = object_name(&create.name)?;
    if create.query.is_some() {
        return Err(CompileError::Unsupported(format!(
            "CREATE TABLE {table} ... AS SELECT"
        )));
    }
    if create.columns.is_empty() {
        return Err(CompileError::Unsupported(format!("table {table} has no columns")));
    }

    let mut primary_key: Vec<String> = Vec::new();
    for constraint in &create.constraints {
        if let TableConstraint::PrimaryKey { columns, .. } = constraint {
            primary_key.extend(columns.iter().map(|c| normalize_ident(&c.value)));
        }
    }

    let mut columns: Vec<ColumnSchema> = Vec::with_capacity(create.columns.len());
    for def in &create.columns {
        let name = normalize_ident(&def.name.value);
        if columns.iter().any(|c| c.name == name) {
            return Err(CompileError::DuplicateName(format!("{table}.{name}")));
        }
        let ty = scalar::sql_type(&def.data_type)?;
        let mut nullable = !primary_key.contains(&name);
        for option in &def.options {
            match &option.option {
                ColumnOption::NotNull => nullable = false,
                ColumnOption::Unique {
                    is_primary: true, ..
                } => nullable = false,
                _ => {}
            }
        }
        columns.push(ColumnSchema::new(name, ty, nullable));
    }
    if let Some(missing) = primary_key
        .iter()
        .find(|k| !columns.iter().any(|c| &c.name == *k))
    {
        return Err(CompileError::UnknownColumn {
            relation: Some(table),
            column: missing.clone(),
        });
    }

    Ok(Definition::Table {
        name: table,
        columns,
    })
}
