//! # Table Definitions
//!
//! Schema metadata for the in-memory tables queried by statements: columns
//! with a type and a NOT NULL constraint, and unique indexes over one or more
//! columns.
//!
//! ## Table Definition Example
//!
//! ```rust,ignore
//! use subquery_engine::schema::{ColumnDef, TableDef};
//! use subquery_engine::types::DataType;
//!
//! let table = TableDef::new(
//!     "users",
//!     vec![
//!         ColumnDef::new("id", DataType::Int8).not_null(),
//!         ColumnDef::new("email", DataType::Text),
//!     ],
//! )
//! .with_unique_index("users_pk", &["id"]);
//! ```
//!
//! Unique indexes whose columns are all NOT NULL make a table eligible for
//! the unique-lookup execution engine; nullable unique indexes are still
//! enforced but never used for point lookups.

use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    name: String,
    data_type: DataType,
    nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

/// A unique index over column positions of its table.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueIndex {
    name: String,
    columns: Vec<usize>,
}

impl UniqueIndex {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    name: String,
    columns: Vec<ColumnDef>,
    unique_indexes: Vec<UniqueIndex>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique_indexes: Vec::new(),
        }
    }

    /// Adds a unique index; unknown column names are reported when the
    /// table is registered with the catalog.
    pub fn with_unique_index(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        let positions = columns
            .iter()
            .map(|c| self.column_index(c).unwrap_or(usize::MAX))
            .collect();
        self.unique_indexes.push(UniqueIndex {
            name: name.into(),
            columns: positions,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn unique_indexes(&self) -> &[UniqueIndex] {
        &self.unique_indexes
    }

    /// Finds a unique index whose columns are exactly `columns` (in any
    /// order) and are all NOT NULL.
    pub fn non_null_unique_index_on(&self, columns: &[usize]) -> Option<usize> {
        self.unique_indexes.iter().position(|idx| {
            idx.columns.len() == columns.len()
                && idx.columns.iter().all(|c| columns.contains(c))
                && idx
                    .columns
                    .iter()
                    .all(|&c| self.columns.get(c).is_some_and(|col| !col.nullable))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableDef {
        TableDef::new(
            "users",
            vec![
                ColumnDef::new("id", DataType::Int8).not_null(),
                ColumnDef::new("email", DataType::Text),
            ],
        )
        .with_unique_index("users_pk", &["id"])
        .with_unique_index("users_email", &["email"])
    }

    #[test]
    fn test_column_lookup() {
        let t = users();
        assert_eq!(t.column_index("email"), Some(1));
        assert_eq!(t.column_index("missing"), None);
        assert!(!t.columns()[0].is_nullable());
    }

    #[test]
    fn test_non_null_unique_index_ignores_nullable_columns() {
        let t = users();
        assert_eq!(t.non_null_unique_index_on(&[0]), Some(0));
        assert_eq!(t.non_null_unique_index_on(&[1]), None);
        assert_eq!(t.non_null_unique_index_on(&[0, 1]), None);
    }
}
