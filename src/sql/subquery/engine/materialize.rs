//! # Hash Materialization
//!
//! Executes an uncorrelated IN subquery once per statement execution into a
//! temporary hash table of its distinct rows, then answers every probe with
//! a hash lookup.
//!
//! ## Temporary Table
//!
//! ```text
//! TempTable
//! ├── keys: HashSet<encoded row>     every distinct row, NULL-bearing or not
//! └── null_rows: [row, ...]          the distinct rows holding a NULL
//! ```
//!
//! Rows are stored in their order-preserving key encoding, so `1` and `1.0`
//! hash to the same key. Probe keys are encoded into the per-execution
//! scratch arena and dropped with it.
//!
//! ## Lookup
//!
//! | Probe | Result |
//! |-------|--------|
//! | left holds a NULL, table empty | FALSE |
//! | left holds a NULL, table not empty | UNKNOWN |
//! | key found | TRUE |
//! | not found, top-level | FALSE |
//! | not found, some NULL row could match | UNKNOWN |
//! | not found otherwise | FALSE |
//!
//! The temporary table lives in `ExecState`; the engine only keeps an
//! `ExecHandle` to it, released again on `cleanup`.

use super::{EngineCommon, EngineOutput, Probe};
use crate::config::TEMP_TABLE_INITIAL_CAPACITY;
use crate::encoding::{encode_key, encode_values};
use crate::sql::context::{ExecHandle, ExecState};
use crate::sql::executor::{execute_spec, ResultSink, SinkControl};
use crate::sql::expr::{CompareOp, SpecId};
use crate::sql::statement::Statement;
use crate::types::{Tristate, Value};
use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use eyre::{bail, ensure, Result};
use hashbrown::HashSet;
use smallvec::SmallVec;
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TempTable {
    width: usize,
    keys: HashSet<Box<[u8]>>,
    null_rows: Vec<SmallVec<[Value; 2]>>,
    cap: usize,
}

impl TempTable {
    pub fn new(width: usize) -> Self {
        Self::with_cap(width, usize::MAX)
    }

    pub fn with_cap(width: usize, cap: usize) -> Self {
        Self {
            width,
            keys: HashSet::with_capacity(TEMP_TABLE_INITIAL_CAPACITY.min(cap)),
            null_rows: Vec::new(),
            cap,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Adds a row; duplicates are ignored.
    pub fn insert(&mut self, row: &[Value]) -> Result<()> {
        ensure!(
            row.len() == self.width,
            "operand should contain {} column(s)",
            self.width
        );
        let key = encode_key(row.iter());
        if self.keys.contains(&key) {
            return Ok(());
        }
        ensure!(
            self.keys.len() < self.cap,
            "materialized subquery exceeds row limit of {} rows",
            self.cap
        );
        self.keys.insert(key);
        if row.iter().any(Value::is_null) {
            self.null_rows.push(row.iter().cloned().collect());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn has_null_row(&self) -> bool {
        !self.null_rows.is_empty()
    }

    /// Exact lookup of a probe key encoded into `scratch`.
    pub fn contains_key(&self, scratch: &Bump, left: &[Value]) -> bool {
        let mut key = BumpVec::with_capacity_in(16 * left.len().max(1), scratch);
        encode_values(left.iter(), &mut key);
        self.keys.contains(key.as_slice())
    }

    /// True when some stored row holding a NULL agrees with `left` on every
    /// non-NULL column, so the comparison could be UNKNOWN instead of FALSE.
    pub fn partial_match(&self, left: &[Value]) -> Result<bool> {
        'rows: for row in &self.null_rows {
            for (l, r) in left.iter().zip(row) {
                if l.is_null() || r.is_null() {
                    continue;
                }
                if l.sql_cmp(r)? != Some(Ordering::Equal) {
                    continue 'rows;
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Three-valued `left IN (table)`.
    pub fn probe(&self, scratch: &Bump, left: &[Value], top_level: bool) -> Result<Tristate> {
        if left.iter().any(Value::is_null) {
            return Ok(if self.is_empty() {
                Tristate::False
            } else {
                Tristate::Unknown
            });
        }
        if self.contains_key(scratch, left) {
            return Ok(Tristate::True);
        }
        if !top_level && self.partial_match(left)? {
            return Ok(Tristate::Unknown);
        }
        Ok(Tristate::False)
    }
}

struct MaterializeSink<'t> {
    table: &'t mut TempTable,
    rows: u64,
}

impl ResultSink for MaterializeSink<'_> {
    fn send_row(&mut self, row: &[Value]) -> Result<SinkControl> {
        self.rows += 1;
        self.table.insert(row)?;
        Ok(SinkControl::Continue)
    }
}

#[derive(Debug)]
pub struct HashMaterializationEngine {
    pub(super) common: EngineCommon,
    handle: Option<ExecHandle>,
}

impl HashMaterializationEngine {
    pub fn new(spec: SpecId) -> Self {
        Self {
            common: EngineCommon::new(spec),
            handle: None,
        }
    }

    pub(super) fn check_prepared(&self) -> Result<()> {
        ensure!(
            !self.common.uncacheable,
            "hash materialization requires an uncorrelated deterministic subquery"
        );
        Ok(())
    }

    fn materialize(&mut self, stmt: &Statement, exec: &mut ExecState<'_>) -> Result<ExecHandle> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }
        let mut table = TempTable::with_cap(self.common.column_count, exec.max_materialized_rows());
        let mut sink = MaterializeSink {
            table: &mut table,
            rows: 0,
        };
        execute_spec(stmt, exec, self.common.spec(), &mut sink)?;
        let rows_read = sink.rows;
        debug!(
            spec = %self.common.spec(),
            rows = rows_read,
            distinct = table.len(),
            "materialized subquery"
        );
        let stats = self.common.stats_mut();
        stats.materializations += 1;
        stats.rows_read += rows_read;
        let handle = exec.store_temp_table(table);
        self.handle = Some(handle);
        Ok(handle)
    }

    pub(super) fn execute(
        &mut self,
        stmt: &Statement,
        exec: &mut ExecState<'_>,
        probe: Probe<'_>,
    ) -> Result<EngineOutput> {
        let Probe::Match { left, op, top_level } = probe else {
            bail!("hash materialization answers only comparison probes");
        };
        ensure!(op == CompareOp::Eq, "hash materialization supports only equality");
        let handle = self.materialize(stmt, exec)?;
        self.common.stats_mut().lookups += 1;
        let result = exec.with_scratch(handle, |scratch, table| table.probe(scratch, left, top_level))??;
        Ok(EngineOutput::Truth(result))
    }

    pub(super) fn release(&mut self, exec: &mut ExecState<'_>) {
        if let Some(handle) = self.handle.take() {
            exec.release_temp_table(handle);
        }
    }

    pub(super) fn forget(&mut self) {
        self.handle = None;
    }
}
