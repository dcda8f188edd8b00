//! # Data Types
//!
//! This module provides the `DataType` enum used by column metadata, type
//! inference over expressions, and the materialization eligibility checks.
//!
//! ## Type Categories
//!
//! | Category | Types | Large object |
//! |----------|-------|--------------|
//! | **Boolean** | Bool | no |
//! | **Integer** | Int8 | no |
//! | **Float** | Float8 | no |
//! | **Text** | Text | no |
//! | **Binary** | Blob | yes |
//!
//! ## Type Affinity
//!
//! Comparisons are allowed between values of the same affinity. Integers and
//! floats share the numeric affinity; booleans compare as integers.
//!
//! ```ignore
//! use subquery_engine::types::DataType;
//!
//! assert!(DataType::Int8.is_comparable_with(DataType::Float8));
//! assert!(!DataType::Int8.is_comparable_with(DataType::Text));
//! ```

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool = 0,
    Int8 = 1,
    Float8 = 2,
    Text = 20,
    Blob = 21,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeAffinity {
    Numeric,
    Text,
    Blob,
}

impl DataType {
    pub fn affinity(self) -> TypeAffinity {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Float8 => TypeAffinity::Numeric,
            DataType::Text => TypeAffinity::Text,
            DataType::Blob => TypeAffinity::Blob,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.affinity() == TypeAffinity::Numeric
    }

    /// Large objects are never used as hash-materialization keys.
    pub fn is_large_object(self) -> bool {
        matches!(self, DataType::Blob)
    }

    pub fn is_comparable_with(self, other: DataType) -> bool {
        self.affinity() == other.affinity()
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "BOOL",
            DataType::Int8 => "INT8",
            DataType::Float8 => "FLOAT8",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_types_are_comparable() {
        assert!(DataType::Int8.is_comparable_with(DataType::Float8));
        assert!(DataType::Bool.is_comparable_with(DataType::Int8));
    }

    #[test]
    fn test_text_and_blob_are_distinct() {
        assert!(!DataType::Text.is_comparable_with(DataType::Blob));
        assert!(DataType::Blob.is_large_object());
        assert!(!DataType::Text.is_large_object());
    }
}
