use indexmap::IndexMap;
use ripple_core::{normalize_ident, ColumnSchema};
use serde::Serialize;

/// A base table declared with `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// A derived relation declared with `CREATE VIEW ... AS SELECT`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewDef {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    /// Defining query, as written.
    pub query: String,
    /// Tables and views the query reads, in order of first reference.
    pub depends_on: Vec<String>,
}

/// Tables and views of a program, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    pub tables: IndexMap<String, TableDef>,
    pub views: IndexMap<String, ViewDef>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(&normalize_ident(name))
    }

    pub fn view(&self, name: &str) -> Option<&ViewDef> {
        self.views.get(&normalize_ident(name))
    }

    /// Whether `name` is a table or a view.
    pub fn contains(&self, name: &str) -> bool {
        let name = normalize_ident(name);
        self.tables.contains_key(&name) || self.views.contains_key(&name)
    }

    /// Columns of a table or view.
    pub fn columns(&self, name: &str) -> Option<&[ColumnSchema]> {
        let name = normalize_ident(name);
        self.tables
            .get(&name)
            .map(|t| t.columns.as_slice())
            .or_else(|| self.views.get(&name).map(|v| v.columns.as_slice()))
    }

    pub fn relation_count(&self) -> usize {
        self.tables.len() + self.views.len()
    }
}
