//! # Decorrelation
//!
//! Splits the WHERE clause of a subquery block into correlated comparisons
//! `outer_expr op inner_expr` and an uncorrelated remainder, so the
//! comparisons can become join conditions or grouping keys.
//!
//! A conjunct becomes a pair when:
//!
//! - it is a comparison (only `=` unless non-equality is allowed)
//! - one side references outer tables only, and at least one
//! - the other side references tables of the subquery only, and at least one
//! - neither side holds a subquery, an aggregate or a non-deterministic call
//!
//! ## Common Factors of OR
//!
//! ```text
//! (o.a = i.a AND i.x > 1) OR (o.a = i.a AND i.y < 2)
//!   ──> pair: o.a = i.a     remainder: i.x > 1 OR i.y < 2
//! ```
//!
//! A comparison present in every branch of an OR is pulled out of it, which
//! is exact under three-valued logic. Only one factor is extracted per OR.
//! When a branch consists of the factor alone, the whole OR becomes TRUE.
//!
//! Decorrelation only allocates new expression nodes; the original filter is
//! left intact so a caller that gives up leaves the statement unchanged.

use crate::sql::expr::{CompareOp, Expr, ExprId, TableMap};
use crate::sql::statement::Statement;
use eyre::{ensure, Result};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecorrelatedPair {
    pub outer: ExprId,
    pub inner: ExprId,
    /// Operator with the outer expression on the left.
    pub op: CompareOp,
}

#[derive(Debug, Clone)]
pub struct Decorrelation {
    pub pairs: SmallVec<[DecorrelatedPair; 2]>,
    /// Uncorrelated rest of the filter; TRUE when nothing is left.
    pub remainder: ExprId,
}

/// Extracts correlated comparisons from `filter`. `inner` are the tables the
/// subquery defines.
pub fn decorrelate(
    stmt: &mut Statement,
    filter: Option<ExprId>,
    inner: TableMap,
    allow_non_eq: bool,
) -> Result<Decorrelation> {
    let mut pairs: SmallVec<[DecorrelatedPair; 2]> = SmallVec::new();
    let mut rest: SmallVec<[ExprId; 8]> = SmallVec::new();
    let conjuncts = match filter {
        Some(f) => stmt.exprs().conjuncts(f),
        None => SmallVec::new(),
    };

    for c in conjuncts {
        if let Some(pair) = as_pair(stmt, c, inner, allow_non_eq) {
            pairs.push(pair);
            continue;
        }
        if let Some((pair, rebuilt)) = factor_or(stmt, c, inner, allow_non_eq) {
            pairs.push(pair);
            rest.extend(rebuilt);
            continue;
        }
        rest.push(c);
    }

    ensure!(!pairs.is_empty(), "no correlated comparison to extract");
    let remainder = stmt.exprs.and_all(&rest);
    Ok(Decorrelation { pairs, remainder })
}

fn is_plain(stmt: &Statement, id: ExprId) -> bool {
    let exprs = stmt.exprs();
    exprs.is_deterministic(id) && !exprs.contains_subquery(id) && !exprs.contains_aggregate(id)
}

fn as_pair(stmt: &Statement, id: ExprId, inner: TableMap, allow_non_eq: bool) -> Option<DecorrelatedPair> {
    let Expr::Compare { op, left, right } = stmt.expr(id) else {
        return None;
    };
    let (op, left, right) = (*op, *left, *right);
    if op != CompareOp::Eq && !allow_non_eq {
        return None;
    }
    if !is_plain(stmt, left) || !is_plain(stmt, right) {
        return None;
    }
    let lt = stmt.used_tables(left);
    let rt = stmt.used_tables(right);
    let is_outer = |t: TableMap| !t.is_empty() && !t.overlaps(inner);
    let is_inner = |t: TableMap| !t.is_empty() && t.is_subset_of(inner);
    if is_outer(lt) && is_inner(rt) {
        Some(DecorrelatedPair {
            outer: left,
            inner: right,
            op,
        })
    } else if is_inner(lt) && is_outer(rt) {
        Some(DecorrelatedPair {
            outer: right,
            inner: left,
            op: op.swap(),
        })
    } else {
        None
    }
}

/// Pulls one comparison common to every branch out of an OR. Returns the
/// pair and the rebuilt OR (`None` when it collapsed to TRUE).
fn factor_or(
    stmt: &mut Statement,
    id: ExprId,
    inner: TableMap,
    allow_non_eq: bool,
) -> Option<(DecorrelatedPair, Option<ExprId>)> {
    if !matches!(stmt.expr(id), Expr::Or(_)) {
        return None;
    }
    let branches: SmallVec<[SmallVec<[ExprId; 8]>; 4]> = stmt
        .exprs()
        .disjuncts(id)
        .iter()
        .map(|&d| stmt.exprs().conjuncts(d))
        .collect();
    let (first, others) = branches.split_first()?;

    let (factor, pair) = first.iter().find_map(|&c| {
        let pair = as_pair(stmt, c, inner, allow_non_eq)?;
        let everywhere = others
            .iter()
            .all(|b| b.iter().any(|&o| stmt.exprs().structurally_equal(c, o)));
        everywhere.then_some((c, pair))
    })?;

    let mut rebuilt: SmallVec<[ExprId; 4]> = SmallVec::new();
    for branch in &branches {
        let kept: SmallVec<[ExprId; 8]> = branch
            .iter()
            .copied()
            .filter(|&c| !stmt.exprs().structurally_equal(c, factor))
            .collect();
        if kept.is_empty() {
            return Some((pair, None));
        }
        rebuilt.push(stmt.exprs.and_all(&kept));
    }
    let or = stmt.exprs.alloc(Expr::Or(rebuilt.into_iter().collect()));
    Some((pair, Some(or)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Catalog, ColumnDef, TableDef};
    use crate::sql::builder::StatementBuilder;
    use crate::types::DataType;

    fn catalog() -> Catalog {
        let mut c = Catalog::new();
        for name in ["o", "i"] {
            c.create_table(TableDef::new(
                name,
                vec![
                    ColumnDef::new("a", DataType::Int8),
                    ColumnDef::new("b", DataType::Int8),
                ],
            ))
            .unwrap();
        }
        c
    }

    #[test]
    fn test_extracts_equality_and_keeps_rest() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let o = b.table(root, "o").unwrap();
        let (_, sub) = b.new_subquery();
        let i = b.table(sub, "i").unwrap();
        let oa = b.column(o, "a").unwrap();
        let ia = b.column(i, "a").unwrap();
        let ib = b.column(i, "b").unwrap();
        let one = b.literal(1i64);
        let corr = b.eq(ia, oa);
        let local = b.compare(CompareOp::Gt, ib, one);
        let filter = b.and([corr, local]);
        b.filter(sub, filter);
        let mut stmt = b.into_statement();

        let inner = TableMap::single(i);
        let d = decorrelate(&mut stmt, Some(filter), inner, false).unwrap();
        assert_eq!(d.pairs.len(), 1);
        assert_eq!(d.pairs[0].outer, oa);
        assert_eq!(d.pairs[0].inner, ia);
        assert_eq!(d.remainder, local);
    }

    #[test]
    fn test_non_equality_needs_permission() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let o = b.table(root, "o").unwrap();
        let (_, sub) = b.new_subquery();
        let i = b.table(sub, "i").unwrap();
        let oa = b.column(o, "a").unwrap();
        let ia = b.column(i, "a").unwrap();
        let lt = b.compare(CompareOp::Lt, oa, ia);
        let mut stmt = b.into_statement();

        let inner = TableMap::single(i);
        assert!(decorrelate(&mut stmt, Some(lt), inner, false).is_err());
        let d = decorrelate(&mut stmt, Some(lt), inner, true).unwrap();
        assert_eq!(d.pairs[0].op, CompareOp::Lt);
        assert!(stmt.exprs().is_true_literal(d.remainder));
    }

    #[test]
    fn test_common_factor_of_or() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let o = b.table(root, "o").unwrap();
        let (_, sub) = b.new_subquery();
        let i = b.table(sub, "i").unwrap();
        let oa = b.column(o, "a").unwrap();
        let ia = b.column(i, "a").unwrap();
        let ib = b.column(i, "b").unwrap();
        let one = b.literal(1i64);
        let two = b.literal(2i64);
        let corr1 = b.eq(oa, ia);
        let corr2 = b.eq(oa, ia);
        let x = b.compare(CompareOp::Gt, ib, one);
        let y = b.compare(CompareOp::Lt, ib, two);
        let left = b.and([corr1, x]);
        let right = b.and([corr2, y]);
        let or = b.or([left, right]);
        let mut stmt = b.into_statement();

        let d = decorrelate(&mut stmt, Some(or), TableMap::single(i), false).unwrap();
        assert_eq!(d.pairs.len(), 1);
        let Expr::Or(items) = stmt.expr(d.remainder) else {
            panic!("expected OR remainder");
        };
        assert_eq!(items.as_slice(), &[x, y]);
    }

    #[test]
    fn test_uncorrelated_filter_fails() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let (_, sub) = b.new_subquery();
        let i = b.table(sub, "i").unwrap();
        let ia = b.column(i, "a").unwrap();
        let one = b.literal(1i64);
        let cmp = b.eq(ia, one);
        let mut stmt = b.into_statement();
        let before = stmt.exprs().len();
        assert!(decorrelate(&mut stmt, Some(cmp), TableMap::single(i), false).is_err());
        assert_eq!(stmt.exprs().len(), before);
    }
}
