//! # Subquery Transformations
//!
//! Physical rewrites applied once per statement after the classifier picked
//! a strategy. Every function checks all of its preconditions before the
//! first edit, so an `Err` leaves the statement exactly as it was and the
//! classifier can fall back to a later strategy.
//!
//! ## Flattening
//!
//! ```text
//! outer block                          outer block
//! ├── from: [t1]                       ├── from: [t1, SEMI|LEFT nest ──> (t2 ...)]
//! └── WHERE ... AND x IN (S) ...  ──>  └── WHERE ... AND TRUE ...
//!                                                  (antijoin: AND t2.ind IS NULL)
//! ```
//!
//! The join condition is the IN comparison (wrapped in `IS NOT FALSE` for
//! NOT IN, so a comparison with NULL still counts as a match) AND the
//! subquery's filter. The subquery's tables are re-parented to the outer
//! block in one pass; the specification is marked excluded.
//!
//! ## Derived Table
//!
//! A correlated scalar or EXISTS subquery with equality correlation becomes
//! an uncorrelated derived table LEFT JOINed on the correlation keys:
//!
//! | Subquery | Derived projection | Replacement |
//! |----------|--------------------|-------------|
//! | aggregate, no GROUP BY | `agg, keys` grouped by keys | `d.agg` (COUNT: `COALESCE(d.agg, 0)`) |
//! | plain | `e, keys, COUNT(*) OVER (keys)` | cardinality check of `d.e` |
//! | grouped | `e, keys, COUNT(*) OVER (keys)` grouped by `g, keys` | cardinality check of `d.e` |
//! | EXISTS | `DISTINCT keys` | `d.ind IS [NOT] NULL` |
//!
//! ## IN-to-EXISTS
//!
//! Pushes `LeftCache(i) op proj(i)` into WHERE (HAVING for aggregated
//! blocks) of every block of the subquery. Each pushed predicate is wrapped
//! in `Expr::Injected`, which can be switched off per execution and removed
//! again by `strip_in_to_exists`. Outside top-level context the comparison
//! also keeps rows whose projected value is NULL, and a guard switches it off
//! while the left operand is NULL, so the engine can still tell UNKNOWN
//! from FALSE.

use super::decorrelate::decorrelate;
use super::predicate::{InjectedClause, Injection, Strategy, SubqueryKind};
use crate::config::MAX_STATEMENT_TABLES;
use crate::sql::context::ResolveContext;
use crate::sql::expr::{
    AggFunc, BlockId, CompareOp, Expr, ExprId, ExprList, GuardId, NestId, ScalarFunc, SpecId,
    SubqueryId, TableId,
};
use crate::sql::statement::{
    JoinKind, JoinNest, NestBody, SpecOwner, Statement, SubqueryPosition, TableRef, TableSource,
};
use crate::types::Value;
use eyre::{bail, ensure, Result};
use smallvec::{smallvec, SmallVec};

#[derive(Debug, Clone)]
struct NodeView {
    kind: SubqueryKind,
    negated: bool,
    left: SmallVec<[ExprId; 2]>,
    spec: SpecId,
    outer_block: BlockId,
    slot: ExprId,
    top_level: bool,
    op: CompareOp,
}

fn view(stmt: &Statement, sid: SubqueryId) -> NodeView {
    let node = stmt.subquery(sid).borrow();
    NodeView {
        kind: node.kind,
        negated: node.negated,
        left: node.left.clone(),
        spec: node.spec,
        outer_block: node.outer_block,
        slot: node.slot,
        top_level: node.top_level,
        op: node.comparison().0,
    }
}

fn single_block(stmt: &Statement, spec: SpecId) -> Result<BlockId> {
    match stmt.spec(spec).blocks.as_slice() {
        [block] => Ok(*block),
        _ => bail!("set operation cannot be rewritten"),
    }
}

fn retire(stmt: &Statement, sid: SubqueryId, strategy: Strategy) {
    let mut node = stmt.subquery(sid).borrow_mut();
    node.engine = None;
    node.strategy = strategy;
}

/// First table bound on every joined row: reached through `Inner` nests
/// only, so it is never null-complemented.
fn first_inner_joined(stmt: &Statement, nests: &[NestId]) -> Option<TableId> {
    nests.iter().find_map(|&id| {
        let nest = stmt.nest(id);
        if nest.kind != JoinKind::Inner {
            return None;
        }
        match &nest.body {
            NestBody::Table(table) => Some(*table),
            NestBody::Nest(children) => first_inner_joined(stmt, children),
        }
    })
}

/// Merges the subquery into its outer block as a semi-join nest, or as a
/// left outer join nest plus a NULL test when `antijoin`.
pub fn flatten(
    stmt: &mut Statement,
    ctx: &ResolveContext<'_>,
    sid: SubqueryId,
    antijoin: bool,
) -> Result<()> {
    let n = view(stmt, sid);
    ensure!(
        matches!(n.kind, SubqueryKind::Exists | SubqueryKind::In),
        "only EXISTS and IN can be flattened"
    );
    let block = single_block(stmt, n.spec)?;
    let b = stmt.block(block).clone();
    ensure!(!b.from.is_empty(), "subquery without tables cannot be flattened");
    ensure!(
        !stmt.is_aggregated(block) && !stmt.has_window(block),
        "aggregated subquery cannot be flattened"
    );
    ensure!(
        b.limit.is_none() && b.offset.is_none(),
        "subquery with LIMIT cannot be flattened"
    );
    let inner_tables = stmt.block_tables(block);
    let joined = stmt.block_tables(n.outer_block).count() + inner_tables.count();
    ensure!(
        joined <= ctx.config.max_join_tables,
        "flattened join would hold {} tables, limit is {}",
        joined,
        ctx.config.max_join_tables
    );
    let indicator_table = if antijoin {
        let Some(t) = first_inner_joined(stmt, &b.from) else {
            bail!("antijoin needs a table that is never null-complemented");
        };
        Some(t)
    } else {
        None
    };
    if n.kind == SubqueryKind::In {
        ensure!(
            b.projection.len() == n.left.len(),
            "operand should contain {} column(s)",
            n.left.len()
        );
    }
    let nested: Vec<SubqueryId> = stmt
        .subqueries_of_block(block)
        .into_iter()
        .map(|(s, _)| s)
        .collect();

    let mut on_parts: SmallVec<[ExprId; 8]> = SmallVec::new();
    if n.kind == SubqueryKind::In {
        for (&l, &p) in n.left.iter().zip(&b.projection) {
            let cmp = stmt.exprs.alloc(Expr::Compare {
                op: CompareOp::Eq,
                left: l,
                right: p,
            });
            on_parts.push(if antijoin {
                stmt.exprs.alloc(Expr::IsNotFalse(cmp))
            } else {
                cmp
            });
        }
    }
    let local = stmt.spec_local_tables(n.spec);
    match decorrelate(stmt, b.filter, local, antijoin) {
        Ok(d) => {
            for pair in &d.pairs {
                on_parts.push(stmt.exprs.alloc(Expr::Compare {
                    op: pair.op,
                    left: pair.outer,
                    right: pair.inner,
                }));
            }
            if !stmt.exprs.is_true_literal(d.remainder) {
                on_parts.push(d.remainder);
            }
        }
        Err(_) => on_parts.extend(b.filter),
    }
    let on = match on_parts.as_slice() {
        [] => None,
        parts => Some(stmt.exprs.and_all(parts)),
    };

    let kind = if antijoin {
        JoinKind::LeftOuter
    } else {
        JoinKind::Semi
    };
    let nest = stmt.alloc_nest(JoinNest {
        kind,
        body: NestBody::Nest(b.from.clone()),
        on,
    });
    stmt.block_mut(n.outer_block).from.push(nest);
    for t in inner_tables.iter() {
        let table = stmt.table_mut(t);
        table.owner = n.outer_block;
        table.outer_joined |= antijoin;
    }
    {
        let inner = stmt.block_mut(block);
        inner.from.clear();
        inner.filter = None;
    }
    stmt.spec_mut(n.spec).excluded = true;
    for s in nested {
        stmt.subquery(s).borrow_mut().outer_block = n.outer_block;
    }

    let replacement = if let Some(table) = indicator_table {
        let indicator = stmt.exprs.alloc(Expr::NullIndicator { table });
        Expr::IsNull {
            expr: indicator,
            negated: false,
        }
    } else {
        Expr::Literal(Value::Bool(true))
    };
    stmt.exprs.replace(n.slot, replacement);
    retire(
        stmt,
        sid,
        if antijoin {
            Strategy::Antijoin
        } else {
            Strategy::Semijoin
        },
    );
    Ok(())
}

/// Rewrites `x op ANY|ALL (SELECT e ...)` for an ordering `op` into a single
/// row `[MIN|MAX(e), COUNT(*), COUNT(e)]`.
pub fn rewrite_minmax(stmt: &mut Statement, sid: SubqueryId) -> Result<()> {
    let n = view(stmt, sid);
    let SubqueryKind::Quantified { .. } = n.kind else {
        bail!("only quantified comparisons have a MIN/MAX form");
    };
    let block = single_block(stmt, n.spec)?;
    let b = stmt.block(block);
    ensure!(
        !stmt.is_aggregated(block) && !stmt.has_window(block),
        "aggregated subquery has no MIN/MAX form"
    );
    ensure!(
        b.limit.is_none() && b.offset.is_none(),
        "subquery with LIMIT has no MIN/MAX form"
    );
    ensure!(!stmt.is_correlated(n.spec), "correlated subquery has no MIN/MAX form");
    let [e] = b.projection.as_slice() else {
        bail!("operand should contain 1 column(s)");
    };
    let e = *e;
    let func = match n.op {
        CompareOp::Gt | CompareOp::Ge => AggFunc::Min,
        CompareOp::Lt | CompareOp::Le => AggFunc::Max,
        other => bail!("{} is not an ordering comparison", other.symbol()),
    };

    let extremum = stmt.exprs.alloc(Expr::Aggregate { func, arg: Some(e) });
    let total = stmt.exprs.alloc(Expr::Aggregate {
        func: AggFunc::CountStar,
        arg: None,
    });
    let non_null = stmt.exprs.alloc(Expr::Aggregate {
        func: AggFunc::Count,
        arg: Some(e),
    });
    let b = stmt.block_mut(block);
    b.projection = vec![extremum, total, non_null];
    b.distinct = false;

    let mut node = stmt.subquery(sid).borrow_mut();
    node.strategy = Strategy::MinMax;
    if let Some(engine) = node.engine.as_mut() {
        engine.invalidate();
    }
    Ok(())
}

enum DerivedShape {
    /// Aggregated without GROUP BY; `coalesce` wraps a COUNT.
    Aggregate { coalesce: bool },
    /// One row per inner row (or group) that must be unique per key.
    Checked,
    Exists,
}

/// Converts a correlated scalar or EXISTS subquery into a LEFT JOINed
/// derived table keyed on its equality correlation.
pub fn to_derived_table(
    stmt: &mut Statement,
    ctx: &ResolveContext<'_>,
    sid: SubqueryId,
    position: SubqueryPosition,
) -> Result<()> {
    let n = view(stmt, sid);
    let outer = n.outer_block;
    ensure!(
        !stmt.is_aggregated(outer),
        "derived table cannot be joined into an aggregated block"
    );
    let block = single_block(stmt, n.spec)?;
    let b = stmt.block(block).clone();
    ensure!(
        !stmt.has_window(block) && b.limit.is_none() && b.offset.is_none(),
        "subquery with LIMIT or window cannot become a derived table"
    );
    ensure!(
        stmt.spec_is_deterministic(n.spec),
        "non-deterministic subquery cannot become a derived table"
    );
    ensure!(
        stmt.subqueries_of_block(block).is_empty() && stmt.derived_tables(block).next().is_none(),
        "subquery with nested subqueries cannot become a derived table"
    );
    ensure!(
        stmt.table_count() < MAX_STATEMENT_TABLES,
        "statement already holds {} tables",
        MAX_STATEMENT_TABLES
    );
    ensure!(
        stmt.block_tables(outer).count() < ctx.config.max_join_tables,
        "derived table would exceed the join table limit"
    );

    let aggregated = stmt.is_aggregated(block);
    let shape = match n.kind {
        SubqueryKind::Exists => {
            ensure!(!aggregated, "aggregated EXISTS always holds");
            DerivedShape::Exists
        }
        SubqueryKind::Scalar => {
            let [p0] = b.projection.as_slice() else {
                bail!("operand should contain 1 column(s)");
            };
            if aggregated && b.group_by.is_empty() {
                let coalesce = match stmt.expr(*p0) {
                    Expr::Aggregate {
                        func: AggFunc::Count | AggFunc::CountStar,
                        ..
                    } => {
                        ensure!(
                            b.having.is_none(),
                            "COUNT with HAVING has no derived-table form"
                        );
                        true
                    }
                    Expr::Aggregate { .. } => false,
                    _ => bail!("aggregated scalar subquery must project a bare aggregate"),
                };
                DerivedShape::Aggregate { coalesce }
            } else {
                ensure!(
                    !b.distinct,
                    "DISTINCT scalar subquery has no derived-table form"
                );
                ensure!(
                    matches!(
                        position,
                        SubqueryPosition::Select | SubqueryPosition::Where { top_level: true }
                    ),
                    "cardinality check must run for every joined row"
                );
                DerivedShape::Checked
            }
        }
        other => bail!("{} subquery cannot become a derived table", other),
    };

    let local = stmt.spec_local_tables(n.spec);
    for root in stmt.block_expr_roots(block) {
        if Some(root) == b.filter {
            continue;
        }
        ensure!(
            stmt.used_tables(root).is_subset_of(local),
            "correlation outside WHERE cannot be decorrelated"
        );
    }
    let d = decorrelate(stmt, b.filter, local, false)?;
    let outer_tables = stmt.block_tables(outer);
    for pair in &d.pairs {
        ensure!(
            stmt.used_tables(pair.outer).is_subset_of(outer_tables),
            "correlation reaches past the outer block"
        );
    }
    ensure!(
        stmt.used_tables(d.remainder).is_subset_of(local),
        "filter stays correlated after decorrelation"
    );
    let keys: ExprList = d.pairs.iter().map(|p| p.inner).collect();

    let remainder = (!stmt.exprs.is_true_literal(d.remainder)).then_some(d.remainder);
    let (projection, group_by, distinct, key_base) = match shape {
        DerivedShape::Aggregate { .. } => {
            let mut projection = b.projection.clone();
            projection.extend(keys.iter().copied());
            (projection, keys.to_vec(), false, 1)
        }
        DerivedShape::Checked => {
            let window = stmt.exprs.alloc(Expr::WindowCount {
                partition_by: keys.clone(),
            });
            let mut projection = b.projection.clone();
            projection.extend(keys.iter().copied());
            projection.push(window);
            let mut group_by = b.group_by.clone();
            if !group_by.is_empty() {
                group_by.extend(keys.iter().copied());
            }
            (projection, group_by, false, 1)
        }
        DerivedShape::Exists => (keys.to_vec(), Vec::new(), true, 0),
    };
    {
        let inner = stmt.block_mut(block);
        inner.projection = projection;
        inner.group_by = group_by;
        inner.distinct = distinct;
        inner.filter = remainder;
    }

    let columns = stmt.derived_columns(n.spec);
    let width = columns.len();
    let table = stmt.alloc_table(TableRef {
        alias: format!("derived_{}", sid.index()),
        source: TableSource::Derived { spec: n.spec },
        columns,
        owner: outer,
        outer_joined: true,
        unique_keys: Vec::new(),
    });
    let mut on_parts: SmallVec<[ExprId; 4]> = SmallVec::new();
    for (i, pair) in d.pairs.iter().enumerate() {
        let column = stmt.exprs.alloc(Expr::Column {
            table,
            column: key_base + i,
        });
        on_parts.push(stmt.exprs.alloc(Expr::Compare {
            op: pair.op,
            left: pair.outer,
            right: column,
        }));
    }
    let on = stmt.exprs.and_all(&on_parts);
    let nest = stmt.alloc_nest(JoinNest {
        kind: JoinKind::LeftOuter,
        body: NestBody::Table(table),
        on: Some(on),
    });
    stmt.block_mut(outer).from.push(nest);
    stmt.spec_mut(n.spec).owner = SpecOwner::Derived(table);

    let replacement = match shape {
        DerivedShape::Exists => {
            let indicator = stmt.exprs.alloc(Expr::NullIndicator { table });
            Expr::IsNull {
                expr: indicator,
                negated: !n.negated,
            }
        }
        DerivedShape::Aggregate { coalesce } => {
            let value = Expr::Column { table, column: 0 };
            if coalesce {
                let value = stmt.exprs.alloc(value);
                let zero = stmt.exprs.literal(0i64);
                Expr::Function {
                    func: ScalarFunc::Coalesce,
                    args: smallvec![value, zero],
                }
            } else {
                value
            }
        }
        DerivedShape::Checked => {
            let value = stmt.exprs.alloc(Expr::Column { table, column: 0 });
            let count = stmt.exprs.alloc(Expr::Column {
                table,
                column: width - 1,
            });
            Expr::CardinalityCheck { count, value }
        }
    };
    stmt.exprs.replace(n.slot, replacement);
    retire(stmt, sid, Strategy::DerivedTable);
    Ok(())
}

/// Pushes the IN comparison into every block of the subquery.
pub fn inject_in_to_exists(stmt: &mut Statement, sid: SubqueryId) -> Result<()> {
    let n = view(stmt, sid);
    ensure!(
        matches!(n.kind, SubqueryKind::In | SubqueryKind::Quantified { .. }),
        "only IN and quantified comparisons can be pushed down"
    );
    let blocks = stmt.spec(n.spec).blocks.clone();
    for &blk in &blocks {
        ensure!(
            !stmt.has_window(blk),
            "window projection cannot be compared inside the subquery"
        );
        ensure!(
            stmt.block(blk).projection.len() == n.left.len(),
            "operand should contain {} column(s)",
            n.left.len()
        );
    }

    let mut guards: SmallVec<[Option<GuardId>; 2]> = SmallVec::new();
    for &l in &n.left {
        let guard = if !n.top_level && stmt.expr_type(l).nullable {
            Some(stmt.alloc_guard())
        } else {
            None
        };
        guards.push(guard);
    }

    let mut targets = SmallVec::new();
    for &blk in &blocks {
        let projection = stmt.block(blk).projection.clone();
        let clause = if stmt.is_aggregated(blk) {
            InjectedClause::Having
        } else {
            InjectedClause::Where
        };
        for (i, &p) in projection.iter().enumerate() {
            let cached = stmt.exprs.alloc(Expr::LeftCache {
                subquery: sid,
                index: i,
            });
            let mut cmp = stmt.exprs.alloc(Expr::Compare {
                op: n.op,
                left: cached,
                right: p,
            });
            if !n.top_level && stmt.expr_type(p).nullable {
                let is_null = stmt.exprs.alloc(Expr::IsNull {
                    expr: p,
                    negated: false,
                });
                cmp = stmt.exprs.alloc(Expr::Or(smallvec![cmp, is_null]));
            }
            let injected = stmt.exprs.alloc(Expr::Injected {
                subquery: sid,
                guard: guards[i],
                expr: cmp,
            });
            match clause {
                InjectedClause::Where => {
                    let filter = stmt.block(blk).filter;
                    let filter = stmt.exprs.and_with(filter, injected);
                    stmt.block_mut(blk).filter = Some(filter);
                }
                InjectedClause::Having => {
                    let having = stmt.block(blk).having;
                    let having = stmt.exprs.and_with(having, injected);
                    stmt.block_mut(blk).having = Some(having);
                }
            }
        }
        targets.push((blk, clause));
    }

    stmt.subquery(sid).borrow_mut().injection = Some(Injection { guards, targets });
    Ok(())
}

/// Removes every predicate injected for `sid`, restoring the filters and
/// HAVING clauses the subquery had before `inject_in_to_exists`.
pub fn strip_in_to_exists(stmt: &mut Statement, sid: SubqueryId) {
    let Some(injection) = stmt.subquery(sid).borrow_mut().injection.take() else {
        return;
    };
    for guard in injection.guards.iter().flatten() {
        stmt.release_guard(*guard);
    }
    for (blk, clause) in injection.targets {
        let current = match clause {
            InjectedClause::Where => stmt.block(blk).filter,
            InjectedClause::Having => stmt.block(blk).having,
        };
        let Some(current) = current else {
            continue;
        };
        let conjuncts = stmt.exprs().conjuncts(current);
        let kept: SmallVec<[ExprId; 8]> = conjuncts
            .iter()
            .copied()
            .filter(|&c| !matches!(stmt.expr(c), Expr::Injected { subquery, .. } if *subquery == sid))
            .collect();
        let restored = if kept.is_empty() {
            None
        } else if kept.len() == conjuncts.len() {
            Some(current)
        } else {
            Some(stmt.exprs.and_all(&kept))
        };
        match clause {
            InjectedClause::Where => stmt.block_mut(blk).filter = restored,
            InjectedClause::Having => stmt.block_mut(blk).having = restored,
        }
    }
}
