//! # SQL Processing Module
//!
//! Resolved statements and their execution. There is no parser: statements
//! are assembled with [`StatementBuilder`] and run through
//! [`PreparedStatement`].
//!
//! ## Module Structure
//!
//! - `expr`: expression arena, table bitmaps, comparison operators
//! - `statement`: permanent statement arena (tables, nests, blocks, specs)
//! - `builder`: statement construction and resolution checks
//! - `context`: resolution context and per-execution state
//! - `eval`: three-valued expression evaluator
//! - `executor`: nested-loop block executor, result sinks
//! - `subquery`: classification, rewriting and execution engines
//! - `prepared`: prepare once, execute many
//!
//! ## Design Philosophy
//!
//! 1. **Arenas and indexes**: every node is addressed by a typed index, so
//!    rewrites edit vectors instead of pointer graphs
//! 2. **Explicit contexts**: resolution and execution state are passed as
//!    parameters, never kept in globals
//! 3. **Permanent vs per-execution**: per-execution objects are reached only
//!    through epoch-checked handles

pub mod builder;
pub mod context;
pub mod eval;
pub mod executor;
pub mod expr;
pub mod prepared;
pub mod statement;
pub mod subquery;

pub use builder::StatementBuilder;
pub use context::{CancelToken, ExecState, ResolveContext};
pub use executor::{CollectSink, ResultSink, RowIterator, SinkControl, TableScan};
pub use expr::{
    AggFunc, ArithOp, BlockId, CompareOp, Expr, ExprId, GuardId, NestId, ScalarFunc, SpecId,
    SubqueryId, TableId, TableMap,
};
pub use prepared::PreparedStatement;
pub use statement::{JoinKind, Statement, SubqueryPosition};
pub use subquery::{Quantifier, Strategy, SubqueryKind};
