//! # Schema and Base-Table Storage
//!
//! The catalog holds the base tables that statements read. Tables live in
//! memory as vectors of shared rows; each unique index is a hash map from
//! the encoded key (see `encoding::key`) to the row position.
//!
//! ## Name Resolution
//!
//! Table names are flat and case-sensitive. Resolving an unknown name is an
//! error raised while building a statement, never at execution time.
//!
//! ## NULL Keys
//!
//! Rows whose unique-index columns contain a NULL are stored but not
//! indexed, matching SQL's rule that NULLs never collide in a unique index.

mod catalog;
mod table;

pub use catalog::{Catalog, TableData};
pub use table::{ColumnDef, TableDef, UniqueIndex};
