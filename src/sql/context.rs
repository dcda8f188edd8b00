//! # Resolution and Execution Contexts
//!
//! Two contexts are threaded explicitly through the subsystem instead of
//! living in globals:
//!
//! - `ResolveContext` is passed through the classifier, the decorrelator and
//!   the transformation engine while a statement is prepared. It carries the
//!   optimizer switches and records every strategy decision.
//! - `ExecState` is created for one execution of a prepared statement and
//!   dropped at its end. Everything with a per-execution lifetime lives here:
//!   current rows bound to table slots, guard flags of injected predicates,
//!   cached left-hand values, materialized derived tables, temporary
//!   materialization tables and the scratch arena.
//!
//! ## Permanent vs Per-Execution Objects
//!
//! Permanent objects (engines inside the statement) never hold references to
//! per-execution objects. They hold an `ExecHandle`, an index tagged with the
//! epoch of the execution that created it. Resolving a handle from another
//! execution fails with "stale per-execution handle".
//!
//! ```text
//! PreparedStatement (permanent)          ExecState (epoch 7)
//! └── HashMaterialization engine         ├── temp_tables[0]  <── ExecHandle{0, 7}
//!     └── ExecHandle{index: 0, epoch: 7} └── scratch: Bump
//! ```
//!
//! ## Cancellation
//!
//! A `CancelToken` is shared with whoever may kill the statement. Every
//! engine execution and every row read checks it and fails with
//! "statement killed". Once any evaluation has failed the state is marked
//! failed and further engine executions short-circuit as well.

use super::expr::{ExprId, GuardId, SubqueryId, TableId};
use super::statement::Statement;
use super::subquery::{Strategy, TempTable};
use crate::config::{SubqueryConfig, EXEC_SCRATCH_INITIAL_BYTES};
use crate::schema::Catalog;
use crate::types::{Row, Value};
use bumpalo::Bump;
use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type LeftValues = SmallVec<[Value; 2]>;

/// Shared kill switch for one statement.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Handle from a permanent object to a per-execution object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecHandle {
    index: u32,
    epoch: u64,
}

/// Resolution state threaded through classification and transformation.
#[derive(Debug)]
pub struct ResolveContext<'a> {
    pub config: &'a SubqueryConfig,
    decisions: Vec<(SubqueryId, Strategy)>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(config: &'a SubqueryConfig) -> Self {
        Self {
            config,
            decisions: Vec::new(),
        }
    }

    pub fn record(&mut self, id: SubqueryId, strategy: Strategy) {
        self.decisions.push((id, strategy));
    }

    pub fn decisions(&self) -> &[(SubqueryId, Strategy)] {
        &self.decisions
    }
}

pub struct ExecState<'c> {
    catalog: &'c Catalog,
    epoch: u64,
    scratch: Bump,
    slots: Vec<Option<Row>>,
    guards: Vec<bool>,
    injection_enabled: Vec<bool>,
    left_values: Vec<Option<LeftValues>>,
    derived: Vec<Option<Arc<[Row]>>>,
    temp_tables: Vec<Option<TempTable>>,
    agg_frames: Vec<Vec<(ExprId, Value)>>,
    cancel: CancelToken,
    failed: bool,
    max_materialized_rows: usize,
}

impl<'c> ExecState<'c> {
    pub fn new(
        catalog: &'c Catalog,
        stmt: &Statement,
        epoch: u64,
        config: &SubqueryConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            catalog,
            epoch,
            scratch: Bump::with_capacity(EXEC_SCRATCH_INITIAL_BYTES),
            slots: vec![None; stmt.table_count()],
            guards: vec![true; stmt.guard_count()],
            injection_enabled: vec![true; stmt.subquery_count()],
            left_values: vec![None; stmt.subquery_count()],
            derived: vec![None; stmt.table_count()],
            temp_tables: Vec::new(),
            agg_frames: Vec::new(),
            cancel,
            failed: false,
            max_materialized_rows: config.max_materialized_rows,
        }
    }

    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn max_materialized_rows(&self) -> usize {
        self.max_materialized_rows
    }

    pub fn check_killed(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("statement killed");
        }
        ensure!(!self.failed, "statement already failed");
        Ok(())
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn slot(&self, table: TableId) -> Option<&Row> {
        self.slots.get(table.index()).and_then(Option::as_ref)
    }

    pub fn set_slot(&mut self, table: TableId, row: Option<Row>) {
        self.slots[table.index()] = row;
    }

    pub fn snapshot_slots(&self) -> Vec<Option<Row>> {
        self.slots.clone()
    }

    pub fn restore_slots(&mut self, snapshot: &[Option<Row>]) {
        self.slots.clone_from_slice(snapshot);
    }

    pub fn guard(&self, guard: GuardId) -> bool {
        self.guards.get(guard.index()).copied().unwrap_or(true)
    }

    pub fn set_guard(&mut self, guard: GuardId, on: bool) {
        if let Some(g) = self.guards.get_mut(guard.index()) {
            *g = on;
        }
    }

    pub fn injection_enabled(&self, subquery: SubqueryId) -> bool {
        self.injection_enabled
            .get(subquery.index())
            .copied()
            .unwrap_or(true)
    }

    pub fn set_injection_enabled(&mut self, subquery: SubqueryId, enabled: bool) {
        self.injection_enabled[subquery.index()] = enabled;
    }

    pub fn left_value(&self, subquery: SubqueryId, index: usize) -> Result<&Value> {
        self.left_values
            .get(subquery.index())
            .and_then(Option::as_ref)
            .and_then(|values| values.get(index))
            .ok_or_else(|| eyre::eyre!("left-hand value {} of {} is not cached", index, subquery))
    }

    pub fn set_left_values(&mut self, subquery: SubqueryId, values: LeftValues) {
        self.left_values[subquery.index()] = Some(values);
    }

    pub fn derived_rows(&self, table: TableId) -> Option<Arc<[Row]>> {
        self.derived.get(table.index()).and_then(Clone::clone)
    }

    pub fn set_derived_rows(&mut self, table: TableId, rows: Arc<[Row]>) {
        self.derived[table.index()] = Some(rows);
    }

    pub fn push_agg_frame(&mut self, frame: Vec<(ExprId, Value)>) {
        self.agg_frames.push(frame);
    }

    pub fn pop_agg_frame(&mut self) {
        self.agg_frames.pop();
    }

    pub fn aggregate_value(&self, expr: ExprId) -> Option<&Value> {
        self.agg_frames
            .iter()
            .rev()
            .find_map(|frame| frame.iter().find(|(e, _)| *e == expr).map(|(_, v)| v))
    }

    pub fn store_temp_table(&mut self, table: TempTable) -> ExecHandle {
        let index = self.temp_tables.len() as u32;
        self.temp_tables.push(Some(table));
        ExecHandle {
            index,
            epoch: self.epoch,
        }
    }

    fn check_handle(&self, handle: ExecHandle) -> Result<usize> {
        ensure!(handle.epoch == self.epoch, "stale per-execution handle");
        Ok(handle.index as usize)
    }

    pub fn temp_table(&self, handle: ExecHandle) -> Result<&TempTable> {
        let index = self.check_handle(handle)?;
        self.temp_tables
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| eyre::eyre!("stale per-execution handle"))
    }

    /// Frees a temporary table; stale handles are ignored.
    pub fn release_temp_table(&mut self, handle: ExecHandle) {
        if let Ok(index) = self.check_handle(handle) {
            if let Some(slot) = self.temp_tables.get_mut(index) {
                *slot = None;
            }
        }
    }

    /// Runs `f` with the scratch arena and a temporary table, then resets the
    /// arena. Probe keys are built in the arena and never outlive the call.
    pub fn with_scratch<R>(
        &mut self,
        handle: ExecHandle,
        f: impl FnOnce(&Bump, &TempTable) -> R,
    ) -> Result<R> {
        let index = self.check_handle(handle)?;
        let table = self
            .temp_tables
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| eyre::eyre!("stale per-execution handle"))?;
        let result = f(&self.scratch, table);
        self.scratch.reset();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::builder::StatementBuilder;

    fn empty_statement(catalog: &Catalog) -> Statement {
        let mut b = StatementBuilder::new(catalog);
        let root = b.root_block();
        let one = b.literal(1i64);
        b.project(root, [one]);
        b.build().unwrap()
    }

    #[test]
    fn test_cancel_token_kills_statement() {
        let catalog = Catalog::new();
        let stmt = empty_statement(&catalog);
        let cancel = CancelToken::new();
        let exec = ExecState::new(&catalog, &stmt, 1, &SubqueryConfig::default(), cancel.clone());
        assert!(exec.check_killed().is_ok());
        cancel.cancel();
        let err = exec.check_killed().unwrap_err();
        assert_eq!(err.to_string(), "statement killed");
    }

    #[test]
    fn test_failed_statement_short_circuits() {
        let catalog = Catalog::new();
        let stmt = empty_statement(&catalog);
        let mut exec = ExecState::new(&catalog, &stmt, 1, &SubqueryConfig::default(), CancelToken::new());
        exec.mark_failed();
        assert!(exec.check_killed().is_err());
    }

    #[test]
    fn test_handle_from_previous_execution_is_stale() {
        let catalog = Catalog::new();
        let stmt = empty_statement(&catalog);
        let config = SubqueryConfig::default();
        let mut first = ExecState::new(&catalog, &stmt, 1, &config, CancelToken::new());
        let handle = first.store_temp_table(TempTable::new(1));
        assert!(first.temp_table(handle).is_ok());

        let second = ExecState::new(&catalog, &stmt, 2, &config, CancelToken::new());
        let err = second.temp_table(handle).unwrap_err();
        assert_eq!(err.to_string(), "stale per-execution handle");
    }

    #[test]
    fn test_released_handle_fails_closed() {
        let catalog = Catalog::new();
        let stmt = empty_statement(&catalog);
        let mut exec = ExecState::new(&catalog, &stmt, 3, &SubqueryConfig::default(), CancelToken::new());
        let handle = exec.store_temp_table(TempTable::new(1));
        exec.release_temp_table(handle);
        assert!(exec.temp_table(handle).is_err());
    }
}
