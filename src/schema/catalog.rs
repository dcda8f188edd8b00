use super::table::TableDef;
use crate::encoding::encode_key;
use crate::types::{Row, Value};
use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use std::sync::Arc;

/// Rows of one table plus the hash maps backing its unique indexes.
#[derive(Debug)]
pub struct TableData {
    def: TableDef,
    rows: Vec<Row>,
    unique: Vec<HashMap<Box<[u8]>, usize>>,
}

impl TableData {
    fn new(def: TableDef) -> Self {
        let unique = def.unique_indexes().iter().map(|_| HashMap::new()).collect();
        Self {
            def,
            rows: Vec::new(),
            unique,
        }
    }

    pub fn def(&self) -> &TableDef {
        &self.def
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Point lookup through unique index `index`. `key` holds the values of
    /// the index columns in index order.
    pub fn lookup_unique(&self, index: usize, key: &[Value]) -> Option<&Row> {
        if key.iter().any(Value::is_null) {
            return None;
        }
        let map = self.unique.get(index)?;
        let pos = *map.get(&encode_key(key.iter()))?;
        self.rows.get(pos)
    }

    fn insert(&mut self, values: Vec<Value>) -> Result<()> {
        let table = self.def.name();
        ensure!(
            values.len() == self.def.columns().len(),
            "table '{}' has {} columns but {} values were supplied",
            table,
            self.def.columns().len(),
            values.len()
        );

        for (col, value) in self.def.columns().iter().zip(&values) {
            match value.data_type() {
                None if !col.is_nullable() => {
                    bail!("NULL value in NOT NULL column '{}.{}'", table, col.name())
                }
                Some(dt) if !dt.is_comparable_with(col.data_type()) => bail!(
                    "{} value does not fit column '{}.{}' of type {}",
                    dt,
                    table,
                    col.name(),
                    col.data_type()
                ),
                _ => {}
            }
        }

        let mut keys = Vec::with_capacity(self.unique.len());
        for (i, idx) in self.def.unique_indexes().iter().enumerate() {
            let key_values: Vec<&Value> = idx.columns().iter().map(|&c| &values[c]).collect();
            if key_values.iter().any(|v| v.is_null()) {
                keys.push(None);
                continue;
            }
            let key = encode_key(key_values.into_iter());
            ensure!(
                !self.unique[i].contains_key(&key),
                "duplicate key violates unique index '{}'",
                idx.name()
            );
            keys.push(Some(key));
        }

        let pos = self.rows.len();
        for (map, key) in self.unique.iter_mut().zip(keys) {
            if let Some(key) = key {
                map.insert(key, pos);
            }
        }
        self.rows.push(Arc::from(values));
        Ok(())
    }
}

/// In-memory catalog of base tables.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<String, TableData>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, def: TableDef) -> Result<()> {
        ensure!(
            !self.tables.contains_key(def.name()),
            "table '{}' already exists",
            def.name()
        );
        for idx in def.unique_indexes() {
            ensure!(
                idx.columns().iter().all(|&c| c < def.columns().len()),
                "unique index '{}' references an unknown column",
                idx.name()
            );
        }
        self.tables.insert(def.name().to_string(), TableData::new(def));
        Ok(())
    }

    pub fn insert(&mut self, table: &str, values: Vec<Value>) -> Result<()> {
        let data = self
            .tables
            .get_mut(table)
            .ok_or_else(|| eyre::eyre!("table '{}' not found", table))?;
        data.insert(values)
    }

    pub fn insert_all<I>(&mut self, table: &str, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        for row in rows {
            self.insert(table, row)?;
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&TableData> {
        self.tables
            .get(name)
            .ok_or_else(|| eyre::eyre!("table '{}' not found", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use crate::types::DataType;

    fn catalog() -> Catalog {
        let mut c = Catalog::new();
        c.create_table(
            TableDef::new(
                "t",
                vec![
                    ColumnDef::new("id", DataType::Int8).not_null(),
                    ColumnDef::new("name", DataType::Text),
                ],
            )
            .with_unique_index("t_pk", &["id"])
            .with_unique_index("t_name", &["name"]),
        )
        .unwrap();
        c
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut c = catalog();
        c.insert("t", vec![Value::Int(1), Value::from("a")]).unwrap();
        c.insert("t", vec![Value::Int(2), Value::Null]).unwrap();
        let t = c.table("t").unwrap();
        assert_eq!(t.len(), 2);
        let row = t.lookup_unique(0, &[Value::Int(2)]).unwrap();
        assert!(row[1].is_null());
        assert!(t.lookup_unique(0, &[Value::Int(3)]).is_none());
        assert!(t.lookup_unique(0, &[Value::Null]).is_none());
    }

    #[test]
    fn test_unique_violation_rejected() {
        let mut c = catalog();
        c.insert("t", vec![Value::Int(1), Value::from("a")]).unwrap();
        let err = c.insert("t", vec![Value::Int(1), Value::from("b")]).unwrap_err();
        assert!(err.to_string().contains("t_pk"));
    }

    #[test]
    fn test_nulls_do_not_collide_in_unique_index() {
        let mut c = catalog();
        c.insert("t", vec![Value::Int(1), Value::Null]).unwrap();
        c.insert("t", vec![Value::Int(2), Value::Null]).unwrap();
        assert_eq!(c.table("t").unwrap().len(), 2);
    }

    #[test]
    fn test_not_null_and_type_checks() {
        let mut c = catalog();
        assert!(c.insert("t", vec![Value::Null, Value::Null]).is_err());
        assert!(c.insert("t", vec![Value::from("x"), Value::Null]).is_err());
        assert!(c.insert("t", vec![Value::Int(1)]).is_err());
        assert!(c.insert("missing", vec![]).is_err());
    }
}
