//! # Strategy Classifier
//!
//! Picks the cheapest correct strategy for every subquery predicate of a
//! statement, innermost first, and applies the matching transformation.
//!
//! ## Rules
//!
//! Tried in order; the first one whose transformation succeeds wins.
//!
//! 1. **Flatten**: EXISTS / IN as a top-level WHERE conjunct, single
//!    non-aggregated block without LIMIT, within the join table limit.
//!    Positive forms become semi-joins, negated forms anti-joins.
//! 2. **MinMax**: ordering `ANY` / `ALL` over an uncorrelated plain block.
//! 3. **Derived table**: correlated scalar or EXISTS in WHERE or SELECT whose
//!    correlation is a set of equalities with the outer block.
//! 4. **IN-to-EXISTS**: remaining IN and quantified comparisons get the
//!    comparison pushed into the subquery. Uncorrelated IN over comparable,
//!    non-LOB columns, either top-level, single-column, or without nullable
//!    operands, is marked `ExistsOrMaterialize` so an execution may switch
//!    to hash materialization instead.
//! 5. **Re-execution**: everything else runs its engine per evaluation.
//!
//! A failed transformation is logged and the next rule is tried; rule 5 is
//! always applicable. Nodes whose strategy is already decided are skipped,
//! so classifying twice changes nothing.

use super::engine::{Engine, UniqueLookupEngine};
use super::predicate::{Strategy, SubqueryKind};
use super::transform;
use crate::sql::context::ResolveContext;
use crate::sql::expr::{ExprId, SubqueryId};
use crate::sql::statement::{Statement, SubqueryPosition};
use eyre::{ensure, Result};
use smallvec::SmallVec;
use tracing::{debug, warn};

struct Candidate {
    kind: SubqueryKind,
    negated: bool,
    left: SmallVec<[ExprId; 2]>,
    position: SubqueryPosition,
    inverted: bool,
}

/// Classifies every unclassified subquery of `stmt`.
pub fn classify(stmt: &mut Statement, ctx: &mut ResolveContext<'_>) -> Result<()> {
    for sid in stmt.subqueries_bottom_up() {
        if stmt.subquery(sid).borrow().strategy != Strategy::Unclassified {
            continue;
        }
        let strategy = classify_one(stmt, ctx, sid)?;
        debug!(subquery = %sid, strategy = %strategy, "classified subquery");
        ctx.record(sid, strategy);
    }
    Ok(())
}

fn candidate(stmt: &Statement, sid: SubqueryId) -> Result<Candidate> {
    let node = stmt.subquery(sid).borrow();
    let width = stmt.spec_width(node.spec);
    match node.kind {
        SubqueryKind::In | SubqueryKind::Quantified { .. } => ensure!(
            width == node.left.len(),
            "operand should contain {} column(s)",
            node.left.len()
        ),
        SubqueryKind::Scalar => ensure!(width == 1, "operand should contain 1 column(s)"),
        SubqueryKind::Exists => {}
    }
    Ok(Candidate {
        kind: node.kind,
        negated: node.negated,
        left: node.left.clone(),
        position: stmt.position_of(sid, node.outer_block),
        inverted: node.comparison().1,
    })
}

fn classify_one(stmt: &mut Statement, ctx: &ResolveContext<'_>, sid: SubqueryId) -> Result<Strategy> {
    let c = candidate(stmt, sid)?;
    let top_level = c.position == SubqueryPosition::Where { top_level: true } && !c.inverted;
    stmt.subquery(sid).borrow_mut().top_level = top_level;

    if can_flatten(stmt, ctx, sid, &c) {
        let antijoin = c.negated;
        match transform::flatten(stmt, ctx, sid, antijoin) {
            Ok(()) => {
                return Ok(if antijoin {
                    Strategy::Antijoin
                } else {
                    Strategy::Semijoin
                })
            }
            Err(e) => warn!(subquery = %sid, error = %e, "flattening failed, trying next strategy"),
        }
    }

    if let SubqueryKind::Quantified { op, .. } = c.kind {
        if ctx.config.minmax_rewrite && op.is_ordering() && c.left.len() == 1 {
            match transform::rewrite_minmax(stmt, sid) {
                Ok(()) => return Ok(Strategy::MinMax),
                Err(e) => debug!(subquery = %sid, reason = %e, "no MIN/MAX rewrite"),
            }
        }
    }

    let spec = stmt.subquery(sid).borrow().spec;
    if ctx.config.subquery_to_derived
        && matches!(c.kind, SubqueryKind::Scalar | SubqueryKind::Exists)
        && matches!(
            c.position,
            SubqueryPosition::Select | SubqueryPosition::Where { .. }
        )
        && stmt.is_correlated(spec)
    {
        match transform::to_derived_table(stmt, ctx, sid, c.position) {
            Ok(()) => return Ok(Strategy::DerivedTable),
            Err(e) => debug!(subquery = %sid, reason = %e, "no derived-table conversion"),
        }
    }

    if matches!(c.kind, SubqueryKind::In | SubqueryKind::Quantified { .. }) {
        let materializable = is_materializable(stmt, sid, &c, top_level);
        match transform::inject_in_to_exists(stmt, sid) {
            Ok(()) => {
                let strategy = if materializable {
                    Strategy::ExistsOrMaterialize
                } else {
                    Strategy::InToExists
                };
                let mut node = stmt.subquery(sid).borrow_mut();
                let op = node.comparison().0;
                if let Some(lookup) = UniqueLookupEngine::try_new(stmt, sid, spec, op) {
                    node.engine = Some(Engine::UniqueLookup(lookup));
                }
                node.strategy = strategy;
                return Ok(strategy);
            }
            Err(e) => warn!(subquery = %sid, error = %e, "IN-to-EXISTS failed, re-executing"),
        }
    }

    stmt.subquery(sid).borrow_mut().strategy = Strategy::Reexecute;
    Ok(Strategy::Reexecute)
}

fn can_flatten(stmt: &Statement, ctx: &ResolveContext<'_>, sid: SubqueryId, c: &Candidate) -> bool {
    if !matches!(c.kind, SubqueryKind::Exists | SubqueryKind::In) {
        return false;
    }
    if c.position != (SubqueryPosition::Where { top_level: true }) {
        return false;
    }
    let enabled = if c.negated {
        ctx.config.antijoin
    } else {
        ctx.config.semijoin
    };
    if !enabled {
        return false;
    }
    let spec = stmt.subquery(sid).borrow().spec;
    stmt.spec(spec).is_single_block()
}

fn is_materializable(stmt: &Statement, sid: SubqueryId, c: &Candidate, top_level: bool) -> bool {
    if c.kind != SubqueryKind::In {
        return false;
    }
    let spec = stmt.subquery(sid).borrow().spec;
    if !stmt.outer_refs(spec, false).is_empty() || !stmt.spec_is_deterministic(spec) {
        return false;
    }
    let inner = stmt.spec_types(spec);
    let outer: SmallVec<[_; 2]> = c.left.iter().map(|&l| stmt.expr_type(l)).collect();
    let comparable = outer.iter().zip(&inner).all(|(o, i)| match (o.data_type, i.data_type) {
        (Some(a), Some(b)) => a.is_comparable_with(b) && !a.is_large_object() && !b.is_large_object(),
        _ => true,
    });
    let nullable = outer.iter().chain(&inner).any(|t| t.nullable);
    comparable && (top_level || c.left.len() == 1 || !nullable)
}
