//! # Prepared Statements
//!
//! A `PreparedStatement` classifies and transforms its subqueries once and
//! then executes any number of times. Each execution gets a fresh
//! `ExecState` with a new epoch; everything it allocates is released when
//! the execution ends, whether it succeeded or not.
//!
//! ## Lifecycle
//!
//! ```text
//! prepare ──> classify + prepare engines
//!                │
//!                ▼
//! execute ──> pick per-execution strategies ──> run root ──> cleanup
//!                ▲                                              │
//!                └──────────────────────────────────────────────┘
//! invalidate ──> strip injections, engines UNPREPARED,
//!                next execute classifies and prepares again
//! ```
//!
//! ## Per-Execution Strategy
//!
//! Predicates classified `ExistsOrMaterialize` run with their IN-to-EXISTS
//! engine unless `SubqueryConfig::materialization` is on at the start of
//! the execution. Then a hash materialization engine is swapped in, the
//! injected comparisons are switched off for that execution, and cleanup
//! swaps the original engine back.

use super::context::{CancelToken, ExecState, ResolveContext};
use super::executor::{execute_spec, CollectSink};
use super::expr::SubqueryId;
use super::statement::Statement;
use super::subquery::{
    classify, strip_in_to_exists, Engine, EngineStats, HashMaterializationEngine, Strategy,
};
use crate::config::SubqueryConfig;
use crate::schema::Catalog;
use crate::types::Value;
use eyre::{Result, WrapErr};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct PreparedStatement {
    stmt: Statement,
    config: SubqueryConfig,
    prepared: bool,
    next_epoch: u64,
    last_stats: Vec<(SubqueryId, EngineStats)>,
}

impl PreparedStatement {
    pub fn prepare(stmt: Statement, config: SubqueryConfig) -> Result<Self> {
        let mut prepared = Self {
            stmt,
            config,
            prepared: false,
            next_epoch: 0,
            last_stats: Vec::new(),
        };
        prepared.resolve()?;
        Ok(prepared)
    }

    fn resolve(&mut self) -> Result<()> {
        let mut ctx = ResolveContext::new(&self.config);
        classify(&mut self.stmt, &mut ctx).wrap_err("failed to classify subqueries")?;

        for sid in self.stmt.subquery_ids() {
            let left = self.stmt.subquery(sid).borrow().left.clone();
            let left_is_constant = left.iter().all(|&l| {
                self.stmt.used_tables(l).is_empty()
                    && self.stmt.exprs().is_deterministic(l)
                    && !self.stmt.exprs().contains_subquery(l)
            });
            // Preparing walks the statement, which may borrow this node.
            let engine = {
                let mut node = self.stmt.subquery(sid).borrow_mut();
                node.left_is_constant = left_is_constant;
                node.engine.take()
            };
            if let Some(mut engine) = engine {
                let result = engine.prepare(&self.stmt);
                self.stmt.subquery(sid).borrow_mut().engine = Some(engine);
                result.wrap_err_with(|| format!("failed to prepare engine of {}", sid))?;
            }
        }
        self.prepared = true;
        Ok(())
    }

    pub fn statement(&self) -> &Statement {
        &self.stmt
    }

    pub fn config(&self) -> &SubqueryConfig {
        &self.config
    }

    /// Replaces the optimizer switches. `materialization` applies from the
    /// next execution on; the others after `invalidate`.
    pub fn set_config(&mut self, config: SubqueryConfig) {
        self.config = config;
    }

    pub fn strategies(&self) -> Vec<(SubqueryId, Strategy)> {
        self.stmt
            .subquery_ids()
            .map(|sid| (sid, self.stmt.subquery(sid).borrow().strategy()))
            .collect()
    }

    /// Engine counters of the most recent execution.
    pub fn last_engine_stats(&self) -> &[(SubqueryId, EngineStats)] {
        &self.last_stats
    }

    pub fn execute(&mut self, catalog: &Catalog) -> Result<Vec<Vec<Value>>> {
        self.execute_with(catalog, &CancelToken::new())
    }

    pub fn execute_with(&mut self, catalog: &Catalog, cancel: &CancelToken) -> Result<Vec<Vec<Value>>> {
        if !self.prepared {
            self.resolve()?;
        }
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        debug!(epoch, "executing prepared statement");

        let mut exec = ExecState::new(catalog, &self.stmt, epoch, &self.config, cancel.clone());
        self.choose_materialization(&mut exec);
        let mut sink = CollectSink::default();
        let result = execute_spec(&self.stmt, &mut exec, self.stmt.root(), &mut sink);
        self.last_stats = self.collect_stats();
        self.cleanup(&mut exec);
        result?;
        Ok(sink.rows)
    }

    fn choose_materialization(&self, exec: &mut ExecState<'_>) {
        if !self.config.materialization {
            return;
        }
        for sid in self.stmt.subquery_ids() {
            let (strategy, spec, lookup) = {
                let node = self.stmt.subquery(sid).borrow();
                (
                    node.strategy(),
                    node.spec(),
                    matches!(node.engine(), Some(Engine::UniqueLookup(_))),
                )
            };
            if strategy != Strategy::ExistsOrMaterialize || lookup {
                continue;
            }
            let mut engine = Engine::HashMaterialization(HashMaterializationEngine::new(spec));
            if let Err(e) = engine.prepare(&self.stmt) {
                warn!(subquery = %sid, error = %e, "keeping IN-to-EXISTS engine");
                continue;
            }
            self.stmt
                .subquery(sid)
                .borrow_mut()
                .switch_engine(engine, Strategy::Materialize);
            exec.set_injection_enabled(sid, false);
            debug!(subquery = %sid, epoch = exec.epoch(), "using hash materialization");
        }
    }

    fn collect_stats(&self) -> Vec<(SubqueryId, EngineStats)> {
        self.stmt
            .subquery_ids()
            .filter_map(|sid| {
                let node = self.stmt.subquery(sid).try_borrow().ok()?;
                node.engine().map(|e| (sid, e.stats()))
            })
            .collect()
    }

    fn cleanup(&self, exec: &mut ExecState<'_>) {
        for sid in self.stmt.subquery_ids() {
            if let Ok(mut node) = self.stmt.subquery(sid).try_borrow_mut() {
                node.cleanup(exec);
            }
        }
    }

    /// Drops every non-structural decision. Injected predicates are removed
    /// and engines return to UNPREPARED; flattened and derived-table
    /// rewrites stay. The next execution classifies and prepares again.
    pub fn invalidate(&mut self) {
        let ids: Vec<SubqueryId> = self.stmt.subquery_ids().collect();
        for sid in ids {
            strip_in_to_exists(&mut self.stmt, sid);
            let spec = self.stmt.subquery(sid).borrow().spec();
            let reset_engine = Engine::for_spec(&self.stmt, spec);
            let mut node = self.stmt.subquery(sid).borrow_mut();
            let strategy = node.strategy();
            if strategy.is_retired() {
                continue;
            }
            if strategy != Strategy::MinMax {
                node.strategy = Strategy::Unclassified;
            }
            if matches!(node.engine(), Some(Engine::UniqueLookup(_))) {
                node.engine = Some(reset_engine);
            } else if let Some(engine) = node.engine.as_mut() {
                engine.invalidate();
            }
            node.clear_cache();
        }
        self.prepared = false;
        debug!("prepared statement invalidated");
    }
}
