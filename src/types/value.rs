//! # Runtime Values
//!
//! `Value` is the owned SQL value flowing through the evaluator, the result
//! sinks and the temporary materialization tables. Rows are shared as
//! `Row = Arc<[Value]>` so binding a table's current row into an evaluation
//! slot never copies column data.
//!
//! ## Comparison Semantics
//!
//! `sql_cmp` implements SQL comparison: any NULL operand yields `None`
//! (UNKNOWN), integers and floats compare numerically, booleans compare as
//! integers, and values of different affinity are a type error.

use super::{DataType, Tristate};
use eyre::{bail, Result};
use std::cmp::Ordering;
use std::sync::Arc;

/// A table row shared between the catalog, derived tables and slots.
pub type Row = Arc<[Value]>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int(_) => Some(DataType::Int8),
            Value::Float(_) => Some(DataType::Float8),
            Value::Text(_) => Some(DataType::Text),
            Value::Blob(_) => Some(DataType::Blob),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Interprets the value as a predicate result.
    pub fn truth(&self) -> Result<Tristate> {
        match self {
            Value::Null => Ok(Tristate::Unknown),
            Value::Bool(b) => Ok(Tristate::from_bool(*b)),
            Value::Int(i) => Ok(Tristate::from_bool(*i != 0)),
            Value::Float(f) => Ok(Tristate::from_bool(*f != 0.0)),
            other => bail!("cannot use {} value as a predicate", other.type_name()),
        }
    }

    /// SQL comparison; `None` means UNKNOWN because an operand is NULL.
    pub fn sql_cmp(&self, other: &Value) -> Result<Option<Ordering>> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(None),
            (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
            (Value::Text(a), Value::Text(b)) => Ok(Some(a.cmp(b))),
            (Value::Blob(a), Value::Blob(b)) => Ok(Some(a.cmp(b))),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
                _ => bail!(
                    "cannot compare {} with {}",
                    a.type_name(),
                    b.type_name()
                ),
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.data_type() {
            Some(dt) => dt.name(),
            None => "NULL",
        }
    }
}

impl From<Tristate> for Value {
    fn from(t: Tristate) -> Self {
        match t {
            Tristate::True => Value::Bool(true),
            Tristate::False => Value::Bool(false),
            Tristate::Unknown => Value::Null,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Blob(b) => write!(f, "x'{}'", b.iter().map(|x| format!("{:02x}", x)).collect::<String>()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_comparison_is_unknown() {
        assert_eq!(Value::Null.sql_cmp(&Value::Int(1)).unwrap(), None);
        assert_eq!(Value::Int(1).sql_cmp(&Value::Null).unwrap(), None);
    }

    #[test]
    fn test_numeric_cross_type_comparison() {
        assert_eq!(
            Value::Int(2).sql_cmp(&Value::Float(2.0)).unwrap(),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Float(1.5).sql_cmp(&Value::Int(2)).unwrap(),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_incompatible_comparison_fails() {
        let err = Value::Int(1).sql_cmp(&Value::from("a")).unwrap_err();
        assert!(err.to_string().contains("cannot compare"));
    }

    #[test]
    fn test_truth() {
        assert_eq!(Value::Null.truth().unwrap(), Tristate::Unknown);
        assert_eq!(Value::Bool(false).truth().unwrap(), Tristate::False);
        assert_eq!(Value::Int(3).truth().unwrap(), Tristate::True);
        assert!(Value::from("x").truth().is_err());
    }
}
