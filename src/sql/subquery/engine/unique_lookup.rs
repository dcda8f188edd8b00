//! Point lookups through a NOT NULL unique index.
//!
//! Chosen for `x IN (SELECT key FROM t ...)` when the subquery is a plain
//! projection of columns that exactly cover a unique index whose columns are
//! all NOT NULL, and whose filter holds nothing but the injected IN-to-EXISTS
//! comparisons. A non-NULL probe is then answered by one index lookup. A
//! probe with a NULL component cannot use the index and falls back to a scan
//! that applies three-valued comparison to every row.

use super::{compare_tuple, EngineCommon, EngineOutput, Probe};
use crate::sql::context::ExecState;
use crate::sql::expr::{CompareOp, Expr, SpecId, SubqueryId};
use crate::sql::statement::{JoinKind, NestBody, Statement, TableSource};
use crate::types::{Tristate, Value};
use eyre::{bail, Result};
use smallvec::SmallVec;

#[derive(Debug)]
pub struct UniqueLookupEngine {
    pub(super) common: EngineCommon,
    table: String,
    index: usize,
    /// Table column of each projection item.
    projected: SmallVec<[usize; 2]>,
    /// For each index column, the projection position supplying its value.
    key_order: SmallVec<[usize; 2]>,
}

impl UniqueLookupEngine {
    /// Returns an engine when subquery `sid` over `spec` qualifies.
    pub fn try_new(stmt: &Statement, sid: SubqueryId, spec: SpecId, op: CompareOp) -> Option<Self> {
        if op != CompareOp::Eq {
            return None;
        }
        let s = stmt.spec(spec);
        let [block] = s.blocks.as_slice() else {
            return None;
        };
        let b = stmt.block(*block);
        if stmt.is_aggregated(*block)
            || stmt.has_window(*block)
            || b.distinct
            || b.limit.is_some()
            || b.offset.is_some()
        {
            return None;
        }
        let [nest] = b.from.as_slice() else {
            return None;
        };
        let nest = stmt.nest(*nest);
        let (JoinKind::Inner, NestBody::Table(table), None) = (nest.kind, &nest.body, nest.on) else {
            return None;
        };
        let table_ref = stmt.table(*table);
        let TableSource::Base { name } = &table_ref.source else {
            return None;
        };
        if let Some(filter) = b.filter {
            let only_injected = stmt.exprs().conjuncts(filter).iter().all(|&c| {
                matches!(stmt.expr(c), Expr::Injected { subquery, .. } if *subquery == sid)
            });
            if !only_injected {
                return None;
            }
        }

        let mut projected = SmallVec::new();
        for &item in &b.projection {
            match stmt.expr(item) {
                Expr::Column { table: t, column } if t == table => {
                    if projected.contains(column) {
                        return None;
                    }
                    projected.push(*column);
                }
                _ => return None,
            }
        }
        let (index, columns) = table_ref.unique_keys.iter().find(|(_, cols)| {
            cols.len() == projected.len() && cols.iter().all(|c| projected.contains(c))
        })?;
        let key_order = columns
            .iter()
            .filter_map(|c| projected.iter().position(|p| p == c))
            .collect();

        Some(Self {
            common: EngineCommon::new(spec),
            table: name.clone(),
            index: *index,
            projected,
            key_order,
        })
    }

    pub(super) fn execute(
        &mut self,
        _stmt: &Statement,
        exec: &mut ExecState<'_>,
        probe: Probe<'_>,
    ) -> Result<EngineOutput> {
        let Probe::Match { left, op, .. } = probe else {
            bail!("unique lookup answers only comparison probes");
        };
        if op != CompareOp::Eq || left.len() != self.projected.len() {
            bail!("unique lookup probe does not match the index");
        }
        let data = exec.catalog().table(&self.table)?;
        let stats = self.common.stats_mut();

        if left.iter().any(Value::is_null) {
            let mut result = Tristate::False;
            for row in data.rows() {
                exec.check_killed()?;
                stats.rows_read += 1;
                let values: SmallVec<[Value; 2]> =
                    self.projected.iter().map(|&c| row[c].clone()).collect();
                match compare_tuple(left, &values, op)? {
                    Tristate::True => return Ok(EngineOutput::Truth(Tristate::True)),
                    Tristate::Unknown => result = Tristate::Unknown,
                    Tristate::False => {}
                }
            }
            return Ok(EngineOutput::Truth(result));
        }

        stats.lookups += 1;
        let key: SmallVec<[Value; 2]> = self.key_order.iter().map(|&i| left[i].clone()).collect();
        let found = data.lookup_unique(self.index, &key).is_some();
        stats.rows_read += found as u64;
        Ok(EngineOutput::Truth(Tristate::from_bool(found)))
    }
}
