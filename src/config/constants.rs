//! # Subquery Engine Configuration Constants
//!
//! This module centralizes the fixed limits used by the classifier, the
//! transformation engine and the execution engines. Constants that depend on
//! each other are co-located and checked with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! MAX_STATEMENT_TABLES (64)
//!       │   Width of the `TableMap` bitmap. Every table reference in a
//!       │   statement (base tables, derived tables created by subquery
//!       │   conversion) gets one bit.
//!       │
//!       └─> MAX_JOIN_TABLES (61, must be <=)
//!             Largest join a single query block may hold after semijoin
//!             flattening or derived-table conversion. Kept below the bitmap
//!             width so a flattened block can still receive derived tables.
//!
//! DEFAULT_MAX_MATERIALIZED_ROWS (1,000,000)
//!       │
//!       └─> Hash materialization fails with a resource error past this
//!           many distinct rows rather than growing without bound
//! ```

// ============================================================================
// TABLE LIMITS
// ============================================================================

/// Number of table references a statement may hold (bits in `TableMap`).
pub const MAX_STATEMENT_TABLES: usize = 64;

/// Maximum number of tables in one query block's join after flattening.
pub const MAX_JOIN_TABLES: usize = 61;

const _: () = assert!(
    MAX_JOIN_TABLES <= MAX_STATEMENT_TABLES,
    "MAX_JOIN_TABLES must fit in the TableMap bitmap"
);

// ============================================================================
// MATERIALIZATION LIMITS
// ============================================================================

/// Default cap on distinct rows held by one temporary materialization table.
pub const DEFAULT_MAX_MATERIALIZED_ROWS: usize = 1_000_000;

/// Initial bucket capacity reserved for a temporary materialization table.
pub const TEMP_TABLE_INITIAL_CAPACITY: usize = 64;

const _: () = assert!(
    TEMP_TABLE_INITIAL_CAPACITY <= DEFAULT_MAX_MATERIALIZED_ROWS,
    "initial temp table capacity exceeds the materialization cap"
);

// ============================================================================
// PER-EXECUTION ARENA
// ============================================================================

/// Initial size of the per-execution scratch arena used for probe keys.
pub const EXEC_SCRATCH_INITIAL_BYTES: usize = 4 * 1024;
