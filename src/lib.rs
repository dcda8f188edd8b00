//! # subquery-engine
//!
//! Classification, rewriting and execution of SQL subquery predicates
//! (`EXISTS`, `IN`, `op ANY`, `op ALL`, scalar subqueries) under SQL
//! three-valued logic.
//!
//! ## Quick Start
//!
//! ```ignore
//! use subquery_engine::config::SubqueryConfig;
//! use subquery_engine::schema::{Catalog, ColumnDef, TableDef};
//! use subquery_engine::sql::{PreparedStatement, StatementBuilder};
//! use subquery_engine::types::DataType;
//!
//! let mut catalog = Catalog::new();
//! catalog.create_table(TableDef::new("t1", vec![ColumnDef::new("a", DataType::Int8)]))?;
//! catalog.create_table(TableDef::new("t2", vec![ColumnDef::new("b", DataType::Int8)]))?;
//!
//! // SELECT a FROM t1 WHERE a IN (SELECT b FROM t2)
//! let mut b = StatementBuilder::new(&catalog);
//! let root = b.root_block();
//! let t1 = b.table(root, "t1")?;
//! let a = b.column(t1, "a")?;
//! let (spec, sub) = b.new_subquery();
//! let t2 = b.table(sub, "t2")?;
//! let col = b.column(t2, "b")?;
//! b.project(sub, [col]);
//! let pred = b.in_subquery(root, &[a], spec)?;
//! b.filter(root, pred);
//! b.project(root, [a]);
//!
//! let mut stmt = PreparedStatement::prepare(b.build()?, SubqueryConfig::default())?;
//! let rows = stmt.execute(&catalog)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │     PreparedStatement (prepare / execute)     │
//! ├──────────────────────────────────────────────┤
//! │  Classifier │ Decorrelator │ Transformations  │
//! ├──────────────────────────────────────────────┤
//! │  Predicate nodes + execution engines          │
//! ├──────────────────────────────────────────────┤
//! │  Block executor │ Expression evaluator        │
//! ├──────────────────────────────────────────────┤
//! │  Statement arena │ Catalog │ Key encoding     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: fixed limits and optimizer switches
//! - [`types`]: values, data types, three-valued truth
//! - [`encoding`]: order-preserving key encoding for hash lookups
//! - [`schema`]: in-memory catalog with unique indexes
//! - [`sql`]: statement arena, builder, evaluator, executor, subqueries

#[macro_use]
mod macros;

pub mod config;
pub mod encoding;
pub mod schema;
pub mod sql;
pub mod types;
