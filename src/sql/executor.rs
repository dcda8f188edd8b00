//! # Query Block Executor
//!
//! Executes query blocks and query specifications by nested-loop iteration
//! over their join nests and pushes projected rows into a `ResultSink`. The
//! subquery execution engines drive this executor; so does the prepared
//! statement for the outermost query and for derived tables.
//!
//! ## Row Flow
//!
//! ```text
//! RowIterator (TableScan) ──> join nests ──> WHERE ──┬──> projection ──┐
//!                                                    │                 │
//!                                                    └─> GROUP BY ──> HAVING ──> projection
//!                                                                                  │
//!                     ResultSink <── OFFSET/LIMIT <── DISTINCT <── window count <──┘
//! ```
//!
//! ## Join Nests
//!
//! - `Inner`: every combination whose ON condition is TRUE continues.
//! - `LeftOuter`: as `Inner`; when nothing matched, the nest's tables are
//!   bound to no row (NULL-complemented) and the outer row continues once.
//! - `Semi`: the outer row continues once, on the first combination whose ON
//!   condition is TRUE. Duplicated inner matches never duplicate outer rows.
//!
//! ## Early Termination
//!
//! A sink answers `SinkControl::Stop` when it has seen enough (an existence
//! probe after the first row, LIMIT after the last row). `Stop` unwinds the
//! nested loops immediately.
//!
//! ## Iterator Contract
//!
//! Table access goes through `RowIterator` (`init` / `read` / `cleanup`).
//! Derived tables are materialized once per execution on `init` and read from
//! the per-execution state afterwards.

use super::context::ExecState;
use super::eval::{arith, eval, eval_truth};
use super::expr::{AggFunc, ArithOp, BlockId, Expr, ExprId, ExprList, NestId, SpecId, TableId};
use super::statement::{JoinKind, NestBody, Statement, TableSource};
use crate::encoding::encode_values;
use crate::types::{Row, Value};
use eyre::{bail, Result};
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    Stop,
}

/// Receives each row produced by a block or specification.
pub trait ResultSink {
    fn send_row(&mut self, row: &[Value]) -> Result<SinkControl>;
}

#[derive(Debug, Default)]
pub struct CollectSink {
    pub rows: Vec<Vec<Value>>,
}

impl ResultSink for CollectSink {
    fn send_row(&mut self, row: &[Value]) -> Result<SinkControl> {
        self.rows.push(row.to_vec());
        Ok(SinkControl::Continue)
    }
}

/// Pull-based access to the rows of one table reference.
pub trait RowIterator<'c> {
    fn init(&mut self, stmt: &Statement, exec: &mut ExecState<'c>) -> Result<()>;
    fn read(&mut self, exec: &mut ExecState<'c>) -> Result<Option<Row>>;
    fn cleanup(&mut self);
}

enum ScanRows<'c> {
    Base(&'c [Row]),
    Derived(Arc<[Row]>),
}

pub struct TableScan<'c> {
    table: TableId,
    rows: Option<ScanRows<'c>>,
    pos: usize,
}

impl<'c> TableScan<'c> {
    pub fn new(table: TableId) -> Self {
        Self {
            table,
            rows: None,
            pos: 0,
        }
    }
}

impl<'c> RowIterator<'c> for TableScan<'c> {
    fn init(&mut self, stmt: &Statement, exec: &mut ExecState<'c>) -> Result<()> {
        self.pos = 0;
        let rows = match &stmt.table(self.table).source {
            TableSource::Base { name } => ScanRows::Base(exec.catalog().table(name)?.rows()),
            TableSource::Derived { spec } => {
                ScanRows::Derived(materialize_derived(stmt, exec, self.table, *spec)?)
            }
        };
        self.rows = Some(rows);
        Ok(())
    }

    fn read(&mut self, exec: &mut ExecState<'c>) -> Result<Option<Row>> {
        exec.check_killed()?;
        let rows: &[Row] = match &self.rows {
            Some(ScanRows::Base(rows)) => rows,
            Some(ScanRows::Derived(rows)) => rows,
            None => bail!("table scan read before init"),
        };
        let row = rows.get(self.pos).cloned();
        self.pos += 1;
        Ok(row)
    }

    fn cleanup(&mut self) {
        self.rows = None;
        self.pos = 0;
    }
}

fn materialize_derived(
    stmt: &Statement,
    exec: &mut ExecState<'_>,
    table: TableId,
    spec: SpecId,
) -> Result<Arc<[Row]>> {
    if let Some(rows) = exec.derived_rows(table) {
        return Ok(rows);
    }
    let mut sink = CollectSink::default();
    execute_spec(stmt, exec, spec, &mut sink)?;
    let rows: Arc<[Row]> = sink.rows.into_iter().map(Row::from).collect();
    trace!(table = %table, rows = rows.len(), "materialized derived table");
    exec.set_derived_rows(table, rows.clone());
    Ok(rows)
}

type RowFn<'f, 'c> = dyn FnMut(&mut ExecState<'c>) -> Result<SinkControl> + 'f;

fn on_holds(stmt: &Statement, exec: &mut ExecState<'_>, on: Option<ExprId>) -> Result<bool> {
    match on {
        None => Ok(true),
        Some(e) => Ok(eval_truth(stmt, exec, e)?.is_true()),
    }
}

fn scan_nests<'c>(
    stmt: &Statement,
    exec: &mut ExecState<'c>,
    nests: &[NestId],
    k: &mut RowFn<'_, 'c>,
) -> Result<SinkControl> {
    let Some((&first, rest)) = nests.split_first() else {
        return k(exec);
    };
    let nest = stmt.nest(first);
    match nest.kind {
        JoinKind::Inner => scan_body(stmt, exec, &nest.body, &mut |exec: &mut ExecState<'c>| {
            if !on_holds(stmt, exec, nest.on)? {
                return Ok(SinkControl::Continue);
            }
            scan_nests(stmt, exec, rest, k)
        }),
        JoinKind::LeftOuter => {
            let mut matched = false;
            let ctl = scan_body(stmt, exec, &nest.body, &mut |exec: &mut ExecState<'c>| {
                if !on_holds(stmt, exec, nest.on)? {
                    return Ok(SinkControl::Continue);
                }
                matched = true;
                scan_nests(stmt, exec, rest, k)
            })?;
            if matched || ctl == SinkControl::Stop {
                return Ok(ctl);
            }
            for t in stmt.nest_tables(first).iter() {
                exec.set_slot(t, None);
            }
            scan_nests(stmt, exec, rest, k)
        }
        JoinKind::Semi => {
            let mut found = false;
            scan_body(stmt, exec, &nest.body, &mut |exec: &mut ExecState<'c>| {
                if on_holds(stmt, exec, nest.on)? {
                    found = true;
                    return Ok(SinkControl::Stop);
                }
                Ok(SinkControl::Continue)
            })?;
            if !found {
                return Ok(SinkControl::Continue);
            }
            scan_nests(stmt, exec, rest, k)
        }
    }
}

fn scan_body<'c>(
    stmt: &Statement,
    exec: &mut ExecState<'c>,
    body: &NestBody,
    k: &mut RowFn<'_, 'c>,
) -> Result<SinkControl> {
    match body {
        NestBody::Nest(children) => scan_nests(stmt, exec, children, k),
        NestBody::Table(table) => {
            let mut scan = TableScan::new(*table);
            scan.init(stmt, exec)?;
            let mut ctl = SinkControl::Continue;
            while let Some(row) = scan.read(exec)? {
                exec.set_slot(*table, Some(row));
                if k(exec)? == SinkControl::Stop {
                    ctl = SinkControl::Stop;
                    break;
                }
            }
            scan.cleanup();
            Ok(ctl)
        }
    }
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::CountStar | AggFunc::Count => Accumulator::Count(0),
            AggFunc::Sum => Accumulator::Sum(None),
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
        }
    }

    fn update(&mut self, func: AggFunc, value: Option<Value>) -> Result<()> {
        let value = match (func, value) {
            (AggFunc::CountStar, _) => {
                if let Accumulator::Count(n) = self {
                    *n += 1;
                }
                return Ok(());
            }
            (_, None) | (_, Some(Value::Null)) => return Ok(()),
            (_, Some(v)) => v,
        };
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum(acc) => {
                *acc = Some(match acc.take() {
                    None => value,
                    Some(prev) => arith(ArithOp::Add, &prev, &value)?,
                });
            }
            Accumulator::Min(acc) | Accumulator::Max(acc) => {
                let want = if matches!(func, AggFunc::Min) {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                };
                let replace = match acc {
                    None => true,
                    Some(prev) => value.sql_cmp(prev)? == Some(want),
                };
                if replace {
                    *acc = Some(value);
                }
            }
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Int(*n),
            Accumulator::Sum(v) | Accumulator::Min(v) | Accumulator::Max(v) => {
                v.clone().unwrap_or(Value::Null)
            }
        }
    }
}

struct Group {
    slots: Vec<Option<Row>>,
    accumulators: Vec<Accumulator>,
}

fn collect_aggregates(stmt: &Statement, block: BlockId) -> Vec<(ExprId, AggFunc, Option<ExprId>)> {
    let b = stmt.block(block);
    let mut found = Vec::new();
    let roots = b.projection.iter().copied().chain(b.having);
    for root in roots {
        stmt.exprs().walk(root, &mut |id, e| {
            if let Expr::Aggregate { func, arg } = e {
                if !found.iter().any(|(f, _, _)| *f == id) {
                    found.push((id, *func, *arg));
                }
                return false;
            }
            true
        });
    }
    found
}

/// DISTINCT, OFFSET, LIMIT and the windowed count of one block's output.
struct BlockOutput<'b> {
    distinct: Option<HashSet<Box<[u8]>>>,
    offset: u64,
    limit: Option<u64>,
    windows: SmallVec<[(usize, &'b ExprList); 1]>,
    buffered: Vec<(Vec<Value>, SmallVec<[Box<[u8]>; 1]>)>,
}

impl<'b> BlockOutput<'b> {
    fn new(stmt: &'b Statement, block: BlockId) -> Self {
        let b = stmt.block(block);
        let windows = b
            .projection
            .iter()
            .enumerate()
            .filter_map(|(i, &e)| match stmt.expr(e) {
                Expr::WindowCount { partition_by } => Some((i, partition_by)),
                _ => None,
            })
            .collect();
        Self {
            distinct: b.distinct.then(HashSet::new),
            offset: b.offset.unwrap_or(0),
            limit: b.limit,
            windows,
            buffered: Vec::new(),
        }
    }

    fn project(
        &mut self,
        stmt: &Statement,
        exec: &mut ExecState<'_>,
        block: BlockId,
        sink: &mut dyn ResultSink,
    ) -> Result<SinkControl> {
        let projection = &stmt.block(block).projection;
        let mut row = Vec::with_capacity(projection.len());
        for &e in projection {
            if matches!(stmt.expr(e), Expr::WindowCount { .. }) {
                row.push(Value::Null);
            } else {
                row.push(eval(stmt, exec, e)?);
            }
        }
        if self.windows.is_empty() {
            return self.emit(row, sink);
        }
        let mut keys = SmallVec::new();
        for (_, partition_by) in &self.windows {
            let mut values = SmallVec::<[Value; 4]>::new();
            for &p in partition_by.iter() {
                values.push(eval(stmt, exec, p)?);
            }
            let mut key = Vec::new();
            encode_values(values.iter(), &mut key);
            keys.push(key.into_boxed_slice());
        }
        self.buffered.push((row, keys));
        Ok(SinkControl::Continue)
    }

    fn emit(&mut self, row: Vec<Value>, sink: &mut dyn ResultSink) -> Result<SinkControl> {
        if self.limit == Some(0) {
            return Ok(SinkControl::Stop);
        }
        if let Some(seen) = &mut self.distinct {
            let mut key = Vec::new();
            encode_values(row.iter(), &mut key);
            if !seen.insert(key.into_boxed_slice()) {
                return Ok(SinkControl::Continue);
            }
        }
        if self.offset > 0 {
            self.offset -= 1;
            return Ok(SinkControl::Continue);
        }
        let ctl = sink.send_row(&row)?;
        if let Some(limit) = &mut self.limit {
            *limit -= 1;
            if *limit == 0 {
                return Ok(SinkControl::Stop);
            }
        }
        Ok(ctl)
    }

    fn finish(mut self, sink: &mut dyn ResultSink) -> Result<SinkControl> {
        if self.windows.is_empty() {
            return Ok(SinkControl::Continue);
        }
        let buffered = std::mem::take(&mut self.buffered);
        let mut counts: Vec<HashMap<&[u8], i64>> = vec![HashMap::new(); self.windows.len()];
        for (_, keys) in &buffered {
            for (w, key) in keys.iter().enumerate() {
                *counts[w].entry(&key[..]).or_insert(0) += 1;
            }
        }
        let positions: SmallVec<[usize; 1]> = self.windows.iter().map(|(i, _)| *i).collect();
        let mut filled = Vec::with_capacity(buffered.len());
        for (mut row, keys) in buffered.iter().cloned() {
            for (w, key) in keys.iter().enumerate() {
                row[positions[w]] = Value::Int(counts[w].get(&key[..]).copied().unwrap_or(0));
            }
            filled.push(row);
        }
        for row in filled {
            if self.emit(row, sink)? == SinkControl::Stop {
                return Ok(SinkControl::Stop);
            }
        }
        Ok(SinkControl::Continue)
    }
}

/// Runs one query block to completion (or until the sink stops it).
pub fn execute_block(
    stmt: &Statement,
    exec: &mut ExecState<'_>,
    block: BlockId,
    sink: &mut dyn ResultSink,
) -> Result<SinkControl> {
    exec.check_killed()?;
    let b = stmt.block(block);
    let mut output = BlockOutput::new(stmt, block);
    if output.limit == Some(0) {
        return Ok(SinkControl::Continue);
    }

    let ctl = if stmt.is_aggregated(block) {
        execute_grouped(stmt, exec, block, &mut output, sink)?
    } else {
        scan_nests(stmt, exec, &b.from, &mut |exec: &mut ExecState<'_>| {
            if !on_holds(stmt, exec, b.filter)? {
                return Ok(SinkControl::Continue);
            }
            output.project(stmt, exec, block, sink)
        })?
    };
    if ctl == SinkControl::Stop {
        return Ok(SinkControl::Stop);
    }
    output.finish(sink)
}

fn execute_grouped(
    stmt: &Statement,
    exec: &mut ExecState<'_>,
    block: BlockId,
    output: &mut BlockOutput<'_>,
    sink: &mut dyn ResultSink,
) -> Result<SinkControl> {
    let b = stmt.block(block);
    let aggregates = collect_aggregates(stmt, block);
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<Box<[u8]>, usize> = HashMap::new();

    scan_nests(stmt, exec, &b.from, &mut |exec: &mut ExecState<'_>| {
        if !on_holds(stmt, exec, b.filter)? {
            return Ok(SinkControl::Continue);
        }
        let mut key_values = SmallVec::<[Value; 4]>::new();
        for &g in &b.group_by {
            key_values.push(eval(stmt, exec, g)?);
        }
        let mut key = Vec::new();
        encode_values(key_values.iter(), &mut key);
        let pos = match index.get(key.as_slice()) {
            Some(&pos) => pos,
            None => {
                groups.push(Group {
                    slots: exec.snapshot_slots(),
                    accumulators: aggregates.iter().map(|(_, f, _)| Accumulator::new(*f)).collect(),
                });
                index.insert(key.into_boxed_slice(), groups.len() - 1);
                groups.len() - 1
            }
        };
        for (i, (_, func, arg)) in aggregates.iter().enumerate() {
            let value = match arg {
                Some(a) => Some(eval(stmt, exec, *a)?),
                None => None,
            };
            groups[pos].accumulators[i].update(*func, value)?;
        }
        Ok(SinkControl::Continue)
    })?;

    if groups.is_empty() && b.group_by.is_empty() {
        let mut slots = exec.snapshot_slots();
        for t in stmt.block_tables(block).iter() {
            slots[t.index()] = None;
        }
        groups.push(Group {
            slots,
            accumulators: aggregates.iter().map(|(_, f, _)| Accumulator::new(*f)).collect(),
        });
    }

    for group in &groups {
        exec.restore_slots(&group.slots);
        let frame = aggregates
            .iter()
            .zip(&group.accumulators)
            .map(|((id, _, _), acc)| (*id, acc.finish()))
            .collect();
        exec.push_agg_frame(frame);
        let result = match on_holds(stmt, exec, b.having) {
            Ok(true) => output.project(stmt, exec, block, sink),
            Ok(false) => Ok(SinkControl::Continue),
            Err(e) => Err(e),
        };
        exec.pop_agg_frame();
        if result? == SinkControl::Stop {
            return Ok(SinkControl::Stop);
        }
    }
    Ok(SinkControl::Continue)
}

struct DedupSink<'s> {
    seen: HashSet<Box<[u8]>>,
    inner: &'s mut dyn ResultSink,
}

impl ResultSink for DedupSink<'_> {
    fn send_row(&mut self, row: &[Value]) -> Result<SinkControl> {
        let mut key = Vec::new();
        encode_values(row.iter(), &mut key);
        if !self.seen.insert(key.into_boxed_slice()) {
            return Ok(SinkControl::Continue);
        }
        self.inner.send_row(row)
    }
}

/// Runs every block of a set operation. UNION deduplicates with a set that
/// is rebuilt on every call, so nothing from a previous correlated execution
/// survives.
pub fn execute_union(
    stmt: &Statement,
    exec: &mut ExecState<'_>,
    spec: SpecId,
    sink: &mut dyn ResultSink,
) -> Result<SinkControl> {
    let s = stmt.spec(spec);
    if s.union_all {
        for &b in &s.blocks {
            if execute_block(stmt, exec, b, sink)? == SinkControl::Stop {
                return Ok(SinkControl::Stop);
            }
        }
        return Ok(SinkControl::Continue);
    }
    let mut dedup = DedupSink {
        seen: HashSet::new(),
        inner: sink,
    };
    for &b in &s.blocks {
        if execute_block(stmt, exec, b, &mut dedup)? == SinkControl::Stop {
            return Ok(SinkControl::Stop);
        }
    }
    Ok(SinkControl::Continue)
}

pub fn execute_spec(
    stmt: &Statement,
    exec: &mut ExecState<'_>,
    spec: SpecId,
    sink: &mut dyn ResultSink,
) -> Result<SinkControl> {
    let s = stmt.spec(spec);
    match s.blocks.as_slice() {
        [single] => execute_block(stmt, exec, *single, sink),
        _ => execute_union(stmt, exec, spec, sink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubqueryConfig;
    use crate::schema::{Catalog, ColumnDef, TableDef};
    use crate::sql::builder::StatementBuilder;
    use crate::sql::context::CancelToken;
    use crate::sql::expr::CompareOp;
    use crate::types::DataType;
    use pretty_assertions::assert_eq;

    fn catalog() -> Catalog {
        let mut c = Catalog::new();
        c.create_table(TableDef::new(
            "t",
            vec![
                ColumnDef::new("k", DataType::Int8),
                ColumnDef::new("v", DataType::Int8),
            ],
        ))
        .unwrap();
        c.insert_all(
            "t",
            [
                vec![Value::Int(1), Value::Int(10)],
                vec![Value::Int(1), Value::Int(20)],
                vec![Value::Int(2), Value::Null],
            ],
        )
        .unwrap();
        c
    }

    fn run(catalog: &Catalog, stmt: &Statement) -> Vec<Vec<Value>> {
        let mut exec = ExecState::new(catalog, stmt, 1, &SubqueryConfig::default(), CancelToken::new());
        let mut sink = CollectSink::default();
        execute_spec(stmt, &mut exec, stmt.root(), &mut sink).unwrap();
        sink.rows
    }

    #[test]
    fn test_group_by_with_aggregates() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let t = b.table(root, "t").unwrap();
        let k = b.column(t, "k").unwrap();
        let v = b.column(t, "v").unwrap();
        let count = b.count_star();
        let sum = b.aggregate(AggFunc::Sum, v);
        b.group_by(root, [k]);
        b.project(root, [k, count, sum]);
        let stmt = b.build().unwrap();

        assert_eq!(
            run(&catalog, &stmt),
            vec![
                vec![Value::Int(1), Value::Int(2), Value::Int(30)],
                vec![Value::Int(2), Value::Int(1), Value::Null],
            ]
        );
    }

    #[test]
    fn test_implicit_group_on_empty_input() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let t = b.table(root, "t").unwrap();
        let k = b.column(t, "k").unwrap();
        let ten = b.literal(10i64);
        let never = b.compare(CompareOp::Gt, k, ten);
        let count = b.count_star();
        let max = b.aggregate(AggFunc::Max, k);
        b.filter(root, never);
        b.project(root, [count, max]);
        let stmt = b.build().unwrap();

        assert_eq!(run(&catalog, &stmt), vec![vec![Value::Int(0), Value::Null]]);
    }

    #[test]
    fn test_window_count_distinct_and_limit() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let t = b.table(root, "t").unwrap();
        let k = b.column(t, "k").unwrap();
        let window = b.window_count([k]);
        b.project(root, [k, window]);
        b.distinct(root);
        b.limit(root, 5, None);
        let stmt = b.build().unwrap();

        assert_eq!(
            run(&catalog, &stmt),
            vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(2), Value::Int(1)]]
        );
    }

    #[test]
    fn test_offset_and_limit() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let t = b.table(root, "t").unwrap();
        let v = b.column(t, "v").unwrap();
        b.project(root, [v]);
        b.limit(root, 1, Some(1));
        let stmt = b.build().unwrap();

        assert_eq!(run(&catalog, &stmt), vec![vec![Value::Int(20)]]);
    }

    #[test]
    fn test_union_deduplicates_but_union_all_does_not() {
        let catalog = catalog();
        for (all, expected) in [(false, 2), (true, 6)] {
            let mut b = StatementBuilder::new(&catalog);
            let root = b.root_block();
            let t = b.table(root, "t").unwrap();
            let k = b.column(t, "k").unwrap();
            b.project(root, [k]);
            let second = b.add_union_block(b.root_spec(), all);
            let t2 = b.table(second, "t").unwrap();
            let k2 = b.column(t2, "k").unwrap();
            b.project(second, [k2]);
            let stmt = b.build().unwrap();
            assert_eq!(run(&catalog, &stmt).len(), expected);
        }
    }

    #[test]
    fn test_cancelled_scan_fails() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let t = b.table(root, "t").unwrap();
        let k = b.column(t, "k").unwrap();
        b.project(root, [k]);
        let stmt = b.build().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut exec = ExecState::new(&catalog, &stmt, 1, &SubqueryConfig::default(), cancel);
        let err = execute_spec(&stmt, &mut exec, stmt.root(), &mut CollectSink::default()).unwrap_err();
        assert_eq!(err.to_string(), "statement killed");
    }
}
