//! # Execution Engines
//!
//! An execution engine produces the value of a subquery predicate that was
//! not flattened away. The set of engines is closed, so they form a tagged
//! enum with one payload struct per kind and dispatch by `match`.
//!
//! | Engine | Used for | Per-call work |
//! |--------|----------|---------------|
//! | `SingleBlock` | one query block | re-run the block |
//! | `SetOperation` | UNION / UNION ALL | re-run every block, fresh dedup |
//! | `UniqueLookup` | IN over a non-null unique key | one point lookup |
//! | `HashMaterialization` | uncorrelated IN | build once, then hash lookups |
//!
//! ## Contract
//!
//! Every engine implements the same operations: `prepare` (resolve result
//! types and cacheability, idempotent), `execute` (answer one probe),
//! `column_count`, `may_produce_null`, `is_uncacheable` and `cleanup`
//! (reset per-execution state).
//!
//! ## Probes
//!
//! The predicate node asks for exactly what its kind needs:
//!
//! - `Probe::Exists`: does the subquery produce any row? Stops at the first.
//! - `Probe::Row`: the single row of a scalar subquery; a second row is the
//!   error "subquery returns more than one row".
//! - `Probe::Match`: three-valued `left op ANY (rows)`; stops at the first
//!   TRUE and remembers UNKNOWN.
//!
//! ## State Machine
//!
//! ```text
//! UNPREPARED ──prepare──> PREPARED ──execute──> EXECUTED | EXECUTED_UNCACHEABLE
//!     ^                      ^                              │
//!     └────invalidate────────┴───────────cleanup────────────┘
//! ```

mod materialize;
mod set_operation;
mod single_block;
mod unique_lookup;

pub use materialize::{HashMaterializationEngine, TempTable};
pub use set_operation::SetOperationEngine;
pub use single_block::SingleBlockEngine;
pub use unique_lookup::UniqueLookupEngine;

use crate::sql::context::ExecState;
use crate::sql::executor::{ResultSink, SinkControl};
use crate::sql::expr::{CompareOp, SpecId};
use crate::sql::statement::{ExprType, Statement};
use crate::types::{Tristate, Value};
use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use tracing::trace;

pub type ResultRow = SmallVec<[Value; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unprepared,
    Prepared,
    Executed,
    ExecutedUncacheable,
}

/// Counters for one engine; reset by `cleanup`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub executions: u64,
    pub materializations: u64,
    pub lookups: u64,
    pub rows_read: u64,
}

#[derive(Debug, Clone)]
pub struct EngineCommon {
    spec: SpecId,
    state: EngineState,
    column_count: usize,
    result_types: Vec<ExprType>,
    may_be_null: bool,
    uncacheable: bool,
    stats: EngineStats,
}

impl EngineCommon {
    pub(crate) fn new(spec: SpecId) -> Self {
        Self {
            spec,
            state: EngineState::Unprepared,
            column_count: 0,
            result_types: Vec::new(),
            may_be_null: false,
            uncacheable: false,
            stats: EngineStats::default(),
        }
    }

    pub fn spec(&self) -> SpecId {
        self.spec
    }

    /// Resolves result metadata. `include_injected` decides whether
    /// predicates injected by IN-to-EXISTS count as correlation.
    fn prepare(&mut self, stmt: &Statement, include_injected: bool) {
        if self.state != EngineState::Unprepared {
            return;
        }
        self.result_types = stmt.spec_types(self.spec);
        self.column_count = self.result_types.len();
        self.may_be_null = self.result_types.iter().any(|t| t.nullable);
        self.uncacheable = !stmt.outer_refs(self.spec, include_injected).is_empty()
            || !stmt.spec_is_deterministic(self.spec);
        self.state = EngineState::Prepared;
    }

    fn begin_execute(&mut self, exec: &ExecState<'_>) -> Result<()> {
        ensure!(
            self.state != EngineState::Unprepared,
            "subquery engine executed before prepare"
        );
        exec.check_killed()?;
        self.stats.executions += 1;
        Ok(())
    }

    fn finish_execute(&mut self) {
        self.state = if self.uncacheable {
            EngineState::ExecutedUncacheable
        } else {
            EngineState::Executed
        };
    }

    fn cleanup(&mut self) {
        if self.state != EngineState::Unprepared {
            self.state = EngineState::Prepared;
        }
        self.stats = EngineStats::default();
    }

    pub(crate) fn stats_mut(&mut self) -> &mut EngineStats {
        &mut self.stats
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Probe<'a> {
    Exists,
    Row,
    Match {
        left: &'a [Value],
        op: CompareOp,
        /// UNKNOWN may be reported as FALSE.
        top_level: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Exists(bool),
    Row(Option<ResultRow>),
    Truth(Tristate),
}

impl EngineOutput {
    pub fn into_exists(self) -> Result<bool> {
        match self {
            EngineOutput::Exists(found) => Ok(found),
            other => bail!("expected an existence result, got {:?}", other),
        }
    }

    pub fn into_row(self) -> Result<Option<ResultRow>> {
        match self {
            EngineOutput::Row(row) => Ok(row),
            other => bail!("expected a row result, got {:?}", other),
        }
    }

    pub fn into_truth(self) -> Result<Tristate> {
        match self {
            EngineOutput::Truth(t) => Ok(t),
            EngineOutput::Exists(found) => Ok(Tristate::from_bool(found)),
            other => bail!("expected a truth value, got {:?}", other),
        }
    }
}

#[derive(Debug, Default)]
struct ExistsSink {
    found: bool,
}

impl ResultSink for ExistsSink {
    fn send_row(&mut self, _row: &[Value]) -> Result<SinkControl> {
        self.found = true;
        Ok(SinkControl::Stop)
    }
}

#[derive(Debug, Default)]
struct RowSink {
    row: Option<ResultRow>,
}

impl ResultSink for RowSink {
    fn send_row(&mut self, row: &[Value]) -> Result<SinkControl> {
        ensure!(self.row.is_none(), "subquery returns more than one row");
        self.row = Some(row.iter().cloned().collect());
        Ok(SinkControl::Continue)
    }
}

/// Three-valued `left op ANY (rows)` over the rows it receives.
#[derive(Debug)]
pub(crate) struct MatchSink<'a> {
    left: &'a [Value],
    op: CompareOp,
    result: Tristate,
    rows: u64,
}

impl<'a> MatchSink<'a> {
    pub(crate) fn new(left: &'a [Value], op: CompareOp) -> Self {
        Self {
            left,
            op,
            result: Tristate::False,
            rows: 0,
        }
    }

    pub(crate) fn result(&self) -> Tristate {
        self.result
    }
}

/// Compares a left-hand tuple with a subquery row component-wise.
pub(crate) fn compare_tuple(left: &[Value], row: &[Value], op: CompareOp) -> Result<Tristate> {
    ensure!(
        left.len() == row.len(),
        "operand should contain {} column(s)",
        left.len()
    );
    let mut result = Tristate::True;
    for (l, r) in left.iter().zip(row) {
        let t = match l.sql_cmp(r)? {
            None => Tristate::Unknown,
            Some(ord) => Tristate::from_bool(op.matches(ord)),
        };
        result = result.and(t);
        if result.is_false() {
            break;
        }
    }
    Ok(result)
}

impl ResultSink for MatchSink<'_> {
    fn send_row(&mut self, row: &[Value]) -> Result<SinkControl> {
        self.rows += 1;
        match compare_tuple(self.left, row, self.op)? {
            Tristate::True => {
                self.result = Tristate::True;
                Ok(SinkControl::Stop)
            }
            Tristate::Unknown => {
                self.result = Tristate::Unknown;
                Ok(SinkControl::Continue)
            }
            Tristate::False => Ok(SinkControl::Continue),
        }
    }
}

/// Runs a block or set operation once for `probe` with the matching sink.
pub(crate) fn run_probe(
    probe: Probe<'_>,
    stats: &mut EngineStats,
    run: impl FnOnce(&mut dyn ResultSink) -> Result<SinkControl>,
) -> Result<EngineOutput> {
    match probe {
        Probe::Exists => {
            let mut sink = ExistsSink::default();
            run(&mut sink)?;
            stats.rows_read += sink.found as u64;
            Ok(EngineOutput::Exists(sink.found))
        }
        Probe::Row => {
            let mut sink = RowSink::default();
            run(&mut sink)?;
            stats.rows_read += sink.row.is_some() as u64;
            Ok(EngineOutput::Row(sink.row))
        }
        Probe::Match { left, op, .. } => {
            let mut sink = MatchSink::new(left, op);
            run(&mut sink)?;
            stats.rows_read += sink.rows;
            Ok(EngineOutput::Truth(sink.result()))
        }
    }
}

#[derive(Debug)]
pub enum Engine {
    SingleBlock(SingleBlockEngine),
    SetOperation(SetOperationEngine),
    UniqueLookup(UniqueLookupEngine),
    HashMaterialization(HashMaterializationEngine),
}

impl Engine {
    /// The re-execution engine for a query specification.
    pub fn for_spec(stmt: &Statement, spec: SpecId) -> Engine {
        let s = stmt.spec(spec);
        match s.blocks.as_slice() {
            [block] => Engine::SingleBlock(SingleBlockEngine::new(spec, *block)),
            _ => Engine::SetOperation(SetOperationEngine::new(spec)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Engine::SingleBlock(_) => "single_block",
            Engine::SetOperation(_) => "set_operation",
            Engine::UniqueLookup(_) => "unique_lookup",
            Engine::HashMaterialization(_) => "hash_materialization",
        }
    }

    pub fn common(&self) -> &EngineCommon {
        match self {
            Engine::SingleBlock(e) => &e.common,
            Engine::SetOperation(e) => &e.common,
            Engine::UniqueLookup(e) => &e.common,
            Engine::HashMaterialization(e) => &e.common,
        }
    }

    fn common_mut(&mut self) -> &mut EngineCommon {
        match self {
            Engine::SingleBlock(e) => &mut e.common,
            Engine::SetOperation(e) => &mut e.common,
            Engine::UniqueLookup(e) => &mut e.common,
            Engine::HashMaterialization(e) => &mut e.common,
        }
    }

    pub fn prepare(&mut self, stmt: &Statement) -> Result<()> {
        let include_injected = !matches!(self, Engine::HashMaterialization(_));
        self.common_mut().prepare(stmt, include_injected);
        if let Engine::HashMaterialization(e) = self {
            e.check_prepared()?;
        }
        Ok(())
    }

    pub fn execute(
        &mut self,
        stmt: &Statement,
        exec: &mut ExecState<'_>,
        probe: Probe<'_>,
    ) -> Result<EngineOutput> {
        self.common_mut().begin_execute(exec)?;
        trace!(engine = self.name(), spec = %self.common().spec, "executing subquery engine");
        let output = match self {
            Engine::SingleBlock(e) => e.execute(stmt, exec, probe),
            Engine::SetOperation(e) => e.execute(stmt, exec, probe),
            Engine::UniqueLookup(e) => e.execute(stmt, exec, probe),
            Engine::HashMaterialization(e) => e.execute(stmt, exec, probe),
        }?;
        self.common_mut().finish_execute();
        Ok(output)
    }

    pub fn column_count(&self) -> usize {
        self.common().column_count
    }

    pub fn result_types(&self) -> &[ExprType] {
        &self.common().result_types
    }

    pub fn may_produce_null(&self) -> bool {
        self.common().may_be_null
    }

    pub fn is_uncacheable(&self) -> bool {
        self.common().uncacheable
    }

    pub fn state(&self) -> EngineState {
        self.common().state
    }

    pub fn stats(&self) -> EngineStats {
        self.common().stats
    }

    /// Resets per-execution state; the engine stays prepared.
    pub fn cleanup(&mut self, exec: &mut ExecState<'_>) {
        if let Engine::HashMaterialization(e) = self {
            e.release(exec);
        }
        self.common_mut().cleanup();
    }

    /// Forgets resolved metadata; the next `prepare` resolves again.
    pub fn invalidate(&mut self) {
        if let Engine::HashMaterialization(e) = self {
            e.forget();
        }
        let common = self.common_mut();
        common.state = EngineState::Unprepared;
        common.stats = EngineStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_tuple_three_valued() {
        let left = [Value::Int(1), Value::Null];
        assert_eq!(
            compare_tuple(&left, &[Value::Int(1), Value::Int(2)], CompareOp::Eq).unwrap(),
            Tristate::Unknown
        );
        assert_eq!(
            compare_tuple(&left, &[Value::Int(2), Value::Int(2)], CompareOp::Eq).unwrap(),
            Tristate::False
        );
        assert!(compare_tuple(&left, &[Value::Int(1)], CompareOp::Eq).is_err());
    }

    #[test]
    fn test_match_sink_stops_on_true_and_remembers_unknown() {
        let left = [Value::Int(3)];
        let mut sink = MatchSink::new(&left, CompareOp::Eq);
        assert_eq!(sink.send_row(&[Value::Null]).unwrap(), SinkControl::Continue);
        assert_eq!(sink.result(), Tristate::Unknown);
        assert_eq!(sink.send_row(&[Value::Int(3)]).unwrap(), SinkControl::Stop);
        assert_eq!(sink.result(), Tristate::True);
    }

    #[test]
    fn test_row_sink_rejects_second_row() {
        let mut sink = RowSink::default();
        sink.send_row(&[Value::Int(1)]).unwrap();
        let err = sink.send_row(&[Value::Int(2)]).unwrap_err();
        assert_eq!(err.to_string(), "subquery returns more than one row");
    }

    #[test]
    fn test_exists_sink_stops_after_first_row() {
        let mut sink = ExistsSink::default();
        assert_eq!(sink.send_row(&[]).unwrap(), SinkControl::Stop);
        assert!(sink.found);
    }
}
