//! # Configuration Module
//!
//! This module centralizes configuration for the subquery engine: fixed limits
//! in [`constants`] and the optimizer switches in [`SubqueryConfig`].
//!
//! ## Optimizer Switches
//!
//! | Switch | Read at | Effect when disabled |
//! |--------|---------|----------------------|
//! | `semijoin` | prepare | EXISTS/IN are never flattened into semijoins |
//! | `antijoin` | prepare | NOT EXISTS/NOT IN are never flattened into antijoins |
//! | `minmax_rewrite` | prepare | ordering ALL/ANY keep correlated evaluation |
//! | `subquery_to_derived` | prepare | correlated scalar/EXISTS are never turned into derived tables |
//! | `materialization` | every execution | IN candidates use the EXISTS engine instead of hash materialization |
//!
//! Prepare-time switches only affect statements prepared after the change;
//! `materialization` is consulted again at the start of every execution of a
//! prepared statement.
//!
//! ## Usage
//!
//! ```ignore
//! use subquery_engine::config::SubqueryConfig;
//!
//! let config = SubqueryConfig::default()
//!     .with_semijoin(false)
//!     .with_max_materialized_rows(10_000);
//! ```

pub mod constants;
pub use constants::*;

/// Optimizer switches consulted by the classifier and the prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubqueryConfig {
    pub semijoin: bool,
    pub antijoin: bool,
    pub minmax_rewrite: bool,
    pub subquery_to_derived: bool,
    pub materialization: bool,
    pub max_join_tables: usize,
    pub max_materialized_rows: usize,
}

impl SubqueryConfig {
    /// Every rewrite disabled: all predicates stay correlated re-executions.
    pub fn reexecution_only() -> Self {
        Self {
            semijoin: false,
            antijoin: false,
            minmax_rewrite: false,
            subquery_to_derived: false,
            materialization: false,
            ..Self::default()
        }
    }

    pub fn with_semijoin(mut self, enabled: bool) -> Self {
        self.semijoin = enabled;
        self
    }

    pub fn with_antijoin(mut self, enabled: bool) -> Self {
        self.antijoin = enabled;
        self
    }

    pub fn with_minmax_rewrite(mut self, enabled: bool) -> Self {
        self.minmax_rewrite = enabled;
        self
    }

    pub fn with_subquery_to_derived(mut self, enabled: bool) -> Self {
        self.subquery_to_derived = enabled;
        self
    }

    pub fn with_materialization(mut self, enabled: bool) -> Self {
        self.materialization = enabled;
        self
    }

    pub fn with_max_join_tables(mut self, max: usize) -> Self {
        self.max_join_tables = max.min(MAX_JOIN_TABLES);
        self
    }

    pub fn with_max_materialized_rows(mut self, max: usize) -> Self {
        self.max_materialized_rows = max;
        self
    }
}

impl Default for SubqueryConfig {
    fn default() -> Self {
        Self {
            semijoin: true,
            antijoin: true,
            minmax_rewrite: true,
            subquery_to_derived: true,
            materialization: true,
            max_join_tables: MAX_JOIN_TABLES,
            max_materialized_rows: DEFAULT_MAX_MATERIALIZED_ROWS,
        }
    }
}
