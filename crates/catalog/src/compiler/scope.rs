//! Name resolution for the relations visible in a `FROM` clause.

use ripple_core::{normalize_ident, ColumnSchema};

use crate::error::CompileError;

/// One relation in scope, with its columns placed at `offset` in the
/// combined input row.
#[derive(Debug, Clone)]
struct ScopedRelation {
    /// Alias if given, else the relation name.
    qualifier: String,
    columns: Vec<ColumnSchema>,
    offset: usize,
}

/// The relations an expression can reference, in `FROM` order. The input
/// row of the operator being compiled is their columns concatenated.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    relations: Vec<ScopedRelation>,
}

/// A resolved column reference.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedColumn {
    pub index: usize,
    pub column: ColumnSchema,
}

impl Scope {
    pub fn single(qualifier: &str, columns: Vec<ColumnSchema>) -> Self {
        let mut scope = Scope::default();
        scope.push(qualifier, columns);
        scope
    }

    /// Total width of the combined row.
    pub fn width(&self) -> usize {
        self.relations.iter().map(|r| r.columns.len()).sum()
    }

    pub fn push(&mut self, qualifier: &str, columns: Vec<ColumnSchema>) {
        let offset = self.width();
        self.relations.push(ScopedRelation {
            qualifier: normalize_ident(qualifier),
            columns,
            offset,
        });
    }

    /// Extend with every relation of `other`, shifting its offsets.
    pub fn extend(&mut self, other: Scope) {
        for relation in other.relations {
            self.push(&relation.qualifier, relation.columns);
        }
    }

    pub fn qualifiers(&self) -> Vec<String> {
        self.relations.iter().map(|r| r.qualifier.clone()).collect()
    }

    pub fn has_qualifier(&self, qualifier: &str) -> bool {
        let qualifier = normalize_ident(qualifier);
        self.relations.iter().any(|r| r.qualifier == qualifier)
    }

    /// Columns of the combined row, in order.
    pub fn columns(&self) -> Vec<ColumnSchema> {
        self.relations
            .iter()
            .flat_map(|r| r.columns.iter().cloned())
            .collect()
    }

    /// Every column of one relation, for `rel.*`.
    pub fn qualified_columns(&self, qualifier: &str) -> Result<Vec<ResolvedColumn>, CompileError> {
        let name = normalize_ident(qualifier);
        let relation = self
            .relations
            .iter()
            .find(|r| r.qualifier == name)
            .ok_or(CompileError::UnknownTable(name))?;
        Ok(relation
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| ResolvedColumn {
                index: relation.offset + i,
                column: c.clone(),
            })
            .collect())
    }

    /// Resolve `column` or `qualifier.column`.
    pub fn resolve(
        &self,
        qualifier: Option<&str>,
        column: &str,
    ) -> Result<ResolvedColumn, CompileError> {
        let column = normalize_ident(column);
        match qualifier {
            Some(q) => {
                let q = normalize_ident(q);
                let relation = self
                    .relations
                    .iter()
                    .find(|r| r.qualifier == q)
                    .ok_or_else(|| CompileError::UnknownTable(q.clone()))?;
                relation
                    .columns
                    .iter()
                    .position(|c| c.name == column)
                    .map(|i| ResolvedColumn {
                        index: relation.offset + i,
                        column: relation.columns[i].clone(),
                    })
                    .ok_or(CompileError::UnknownColumn {
                        relation: Some(q),
                        column,
                    })
            }
            None => {
                let mut found: Vec<ResolvedColumn> = Vec::new();
                for relation in &self.relations {
                    for (i, c) in relation.columns.iter().enumerate() {
                        if c.name == column {
                            found.push(ResolvedColumn {
                                index: relation.offset + i,
                                column: c.clone(),
                            });
                        }
                    }
                }
                match found.len() {
                    0 => Err(CompileError::UnknownColumn {
                        relation: None,
                        column,
                    }),
                    1 => Ok(found.remove(0)),
                    _ => Err(CompileError::AmbiguousColumn(column)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::SqlType;

    fn scope() -> Scope {
        let mut scope = Scope::single(
            "t",
            vec![
                ColumnSchema::new("id", SqlType::Integer, false),
                ColumnSchema::new("name", SqlType::String, true),
            ],
        );
        scope.push("u", vec![ColumnSchema::new("id", SqlType::Integer, false)]);
        scope
    }

    #[test]
    fn qualified_lookup_uses_offsets() {
        let hit = scope().resolve(Some("U"), "ID").unwrap();
        assert_eq!(hit.index, 2);
    }

    #[test]
    fn bare_lookup_detects_ambiguity() {
        assert_eq!(
            scope().resolve(None, "id"),
            Err(CompileError::AmbiguousColumn("id".into()))
        );
        assert_eq!(scope().resolve(None, "name").unwrap().index, 1);
    }

    #[test]
    fn unknown_names() {
        assert!(matches!(
            scope().resolve(Some("t"), "nope"),
            Err(CompileError::UnknownColumn { relation: Some(_), .. })
        ));
        assert!(matches!(
            scope().resolve(Some("zz"), "id"),
            Err(CompileError::UnknownTable(_))
        ));
    }
}
