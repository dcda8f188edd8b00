//! # Statement Builder
//!
//! Builds resolved `Statement`s against a `Catalog`. This is the entry point
//! used instead of a SQL parser: callers create blocks, add tables, allocate
//! expressions and attach subquery predicates, then call `build`.
//!
//! ```ignore
//! let mut b = StatementBuilder::new(&catalog);
//! let root = b.root_block();
//! let t1 = b.table(root, "t1")?;
//! let a = b.column(t1, "a")?;
//! let (spec, sub) = b.new_subquery();
//! let t2 = b.table(sub, "t2")?;
//! let bcol = b.column(t2, "b")?;
//! b.project(sub, [bcol]);
//! let pred = b.in_subquery(root, &[a], spec)?;
//! b.filter(root, pred);
//! b.project(root, [a]);
//! let stmt = b.build()?;
//! ```
//!
//! ## Normalization
//!
//! - `x = ANY (S)` is built as `x IN (S)`, `x <> ALL (S)` as `x NOT IN (S)`.
//! - `not` applied to an EXISTS / IN / ANY / ALL predicate flips the node's
//!   `negated` flag instead of wrapping it, so the predicate keeps its slot.
//! - `build` drops `LIMIT n` (n > 0, no OFFSET) from EXISTS subqueries and
//!   rejects LIMIT inside IN / ANY / ALL subqueries.

use super::expr::{
    AggFunc, ArithOp, BlockId, CompareOp, Expr, ExprArena, ExprId, NestId, ScalarFunc, SpecId,
    SubqueryId, TableId,
};
use super::statement::{
    ColumnMeta, JoinKind, JoinNest, NestBody, QueryBlock, QuerySpec, SpecOwner, Statement,
    TableRef, TableSource,
};
use super::subquery::{Engine, Quantifier, SubqueryKind, SubqueryPredicate};
use crate::config::MAX_STATEMENT_TABLES;
use crate::schema::Catalog;
use crate::types::Value;
use eyre::{bail, ensure, eyre, Result};
use smallvec::{smallvec, SmallVec};
use std::cell::RefCell;

pub struct StatementBuilder<'c> {
    catalog: &'c Catalog,
    stmt: Statement,
}

impl<'c> StatementBuilder<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        let root = SpecId::new(0);
        let stmt = Statement {
            exprs: ExprArena::new(),
            tables: Vec::new(),
            nests: Vec::new(),
            blocks: vec![QueryBlock::new(root)],
            specs: vec![QuerySpec {
                blocks: smallvec![BlockId::new(0)],
                union_all: false,
                owner: SpecOwner::Root,
                excluded: false,
            }],
            subqueries: Vec::new(),
            guard_count: 0,
            free_guards: Vec::new(),
            root,
        };
        Self { catalog, stmt }
    }

    pub fn root_spec(&self) -> SpecId {
        self.stmt.root
    }

    pub fn root_block(&self) -> BlockId {
        BlockId::new(0)
    }

    pub fn statement(&self) -> &Statement {
        &self.stmt
    }

    fn alloc_block(&mut self, spec: SpecId) -> BlockId {
        let id = BlockId::new(self.stmt.blocks.len());
        self.stmt.blocks.push(QueryBlock::new(spec));
        id
    }

    /// A new single-block query specification, not yet attached anywhere.
    pub fn new_subquery(&mut self) -> (SpecId, BlockId) {
        let spec = SpecId::new(self.stmt.specs.len());
        self.stmt.specs.push(QuerySpec {
            blocks: SmallVec::new(),
            union_all: false,
            owner: SpecOwner::Detached,
            excluded: false,
        });
        let block = self.alloc_block(spec);
        self.stmt.spec_mut(spec).blocks.push(block);
        (spec, block)
    }

    /// Adds a UNION (or UNION ALL) branch to `spec`.
    pub fn add_union_block(&mut self, spec: SpecId, all: bool) -> BlockId {
        let block = self.alloc_block(spec);
        let s = self.stmt.spec_mut(spec);
        s.blocks.push(block);
        s.union_all = all;
        block
    }

    fn add_table(&mut self, block: BlockId, table: TableRef, kind: JoinKind) -> Result<TableId> {
        ensure!(
            self.stmt.table_count() < MAX_STATEMENT_TABLES,
            "statement cannot hold more than {} tables",
            MAX_STATEMENT_TABLES
        );
        let id = self.stmt.alloc_table(table);
        let nest = self.stmt.alloc_nest(JoinNest {
            kind,
            body: NestBody::Table(id),
            on: None,
        });
        self.stmt.block_mut(block).from.push(nest);
        Ok(id)
    }

    fn base_table(&self, block: BlockId, name: &str, alias: &str) -> Result<TableRef> {
        let def = self.catalog.table(name)?.def();
        let columns = def
            .columns()
            .iter()
            .map(|c| ColumnMeta {
                name: c.name().to_string(),
                data_type: Some(c.data_type()),
                nullable: c.is_nullable(),
            })
            .collect();
        let unique_keys = def
            .unique_indexes()
            .iter()
            .enumerate()
            .filter(|(_, idx)| {
                idx.columns()
                    .iter()
                    .all(|&c| def.column(c).is_some_and(|col| !col.is_nullable()))
            })
            .map(|(i, idx)| (i, idx.columns().iter().copied().collect()))
            .collect();
        Ok(TableRef {
            alias: alias.to_string(),
            source: TableSource::Base {
                name: name.to_string(),
            },
            columns,
            owner: block,
            outer_joined: false,
            unique_keys,
        })
    }

    pub fn table(&mut self, block: BlockId, name: &str) -> Result<TableId> {
        self.table_as(block, name, name)
    }

    pub fn table_as(&mut self, block: BlockId, name: &str, alias: &str) -> Result<TableId> {
        let table = self.base_table(block, name, alias)?;
        self.add_table(block, table, JoinKind::Inner)
    }

    /// Adds `name` as the inner side of a LEFT JOIN; set its condition with `on`.
    pub fn left_join(&mut self, block: BlockId, name: &str) -> Result<TableId> {
        let mut table = self.base_table(block, name, name)?;
        table.outer_joined = true;
        self.add_table(block, table, JoinKind::LeftOuter)
    }

    /// Sets the join condition of the nest holding `table`.
    pub fn on(&mut self, table: TableId, cond: ExprId) -> Result<()> {
        let nest = (0..self.stmt.nests.len())
            .map(NestId::new)
            .find(|&n| self.stmt.nest(n).body == NestBody::Table(table))
            .ok_or_else(|| eyre!("table {} is not joined", table))?;
        self.stmt.nests[nest.index()].on = Some(cond);
        Ok(())
    }

    /// Joins the result of `spec` into `block` as a derived table.
    pub fn derived_table(&mut self, block: BlockId, spec: SpecId, alias: &str) -> Result<TableId> {
        ensure!(
            self.stmt.spec(spec).owner == SpecOwner::Detached,
            "query specification {} is already attached",
            spec
        );
        let table = TableRef {
            alias: alias.to_string(),
            source: TableSource::Derived { spec },
            columns: self.stmt.derived_columns(spec),
            owner: block,
            outer_joined: false,
            unique_keys: Vec::new(),
        };
        let id = self.add_table(block, table, JoinKind::Inner)?;
        self.stmt.spec_mut(spec).owner = SpecOwner::Derived(id);
        Ok(id)
    }

    pub fn column(&mut self, table: TableId, name: &str) -> Result<ExprId> {
        let t = self.stmt.table(table);
        let column = t
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| eyre!("no column '{}' in '{}'", name, t.alias))?;
        Ok(self.stmt.exprs.alloc(Expr::Column { table, column }))
    }

    pub fn literal(&mut self, value: impl Into<Value>) -> ExprId {
        self.stmt.exprs.literal(value)
    }

    pub fn compare(&mut self, op: CompareOp, left: ExprId, right: ExprId) -> ExprId {
        self.stmt.exprs.alloc(Expr::Compare { op, left, right })
    }

    pub fn eq(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.compare(CompareOp::Eq, left, right)
    }

    pub fn and(&mut self, items: impl IntoIterator<Item = ExprId>) -> ExprId {
        self.stmt.exprs.alloc(Expr::And(items.into_iter().collect()))
    }

    pub fn or(&mut self, items: impl IntoIterator<Item = ExprId>) -> ExprId {
        self.stmt.exprs.alloc(Expr::Or(items.into_iter().collect()))
    }

    pub fn not(&mut self, expr: ExprId) -> ExprId {
        if let Expr::Subquery(sid) = self.stmt.expr(expr) {
            let mut node = self.stmt.subquery(*sid).borrow_mut();
            if node.kind != SubqueryKind::Scalar {
                node.negated = !node.negated;
                return expr;
            }
        }
        self.stmt.exprs.alloc(Expr::Not(expr))
    }

    pub fn is_null(&mut self, expr: ExprId, negated: bool) -> ExprId {
        self.stmt.exprs.alloc(Expr::IsNull { expr, negated })
    }

    pub fn arith(&mut self, op: ArithOp, left: ExprId, right: ExprId) -> ExprId {
        self.stmt.exprs.alloc(Expr::Arith { op, left, right })
    }

    pub fn coalesce(&mut self, args: impl IntoIterator<Item = ExprId>) -> ExprId {
        self.stmt.exprs.alloc(Expr::Function {
            func: ScalarFunc::Coalesce,
            args: args.into_iter().collect(),
        })
    }

    pub fn abs(&mut self, arg: ExprId) -> ExprId {
        self.stmt.exprs.alloc(Expr::Function {
            func: ScalarFunc::Abs,
            args: smallvec![arg],
        })
    }

    pub fn random(&mut self) -> ExprId {
        self.stmt.exprs.alloc(Expr::Function {
            func: ScalarFunc::Random,
            args: SmallVec::new(),
        })
    }

    pub fn count_star(&mut self) -> ExprId {
        self.stmt.exprs.alloc(Expr::Aggregate {
            func: AggFunc::CountStar,
            arg: None,
        })
    }

    pub fn aggregate(&mut self, func: AggFunc, arg: ExprId) -> ExprId {
        self.stmt.exprs.alloc(Expr::Aggregate {
            func,
            arg: Some(arg),
        })
    }

    pub fn window_count(&mut self, partition_by: impl IntoIterator<Item = ExprId>) -> ExprId {
        self.stmt.exprs.alloc(Expr::WindowCount {
            partition_by: partition_by.into_iter().collect(),
        })
    }

    pub fn project(&mut self, block: BlockId, items: impl IntoIterator<Item = ExprId>) {
        self.stmt.block_mut(block).projection = items.into_iter().collect();
    }

    /// Sets the WHERE clause, AND-ing with one already present.
    pub fn filter(&mut self, block: BlockId, predicate: ExprId) {
        let current = self.stmt.block(block).filter;
        let filter = self.stmt.exprs.and_with(current, predicate);
        self.stmt.block_mut(block).filter = Some(filter);
    }

    pub fn group_by(&mut self, block: BlockId, items: impl IntoIterator<Item = ExprId>) {
        self.stmt.block_mut(block).group_by = items.into_iter().collect();
    }

    pub fn having(&mut self, block: BlockId, predicate: ExprId) {
        self.stmt.block_mut(block).having = Some(predicate);
    }

    pub fn distinct(&mut self, block: BlockId) {
        self.stmt.block_mut(block).distinct = true;
    }

    pub fn limit(&mut self, block: BlockId, limit: u64, offset: Option<u64>) {
        let b = self.stmt.block_mut(block);
        b.limit = Some(limit);
        b.offset = offset;
    }

    fn attach(
        &mut self,
        outer: BlockId,
        spec: SpecId,
        kind: SubqueryKind,
        negated: bool,
        left: &[ExprId],
    ) -> Result<ExprId> {
        ensure!(
            self.stmt.spec(spec).owner == SpecOwner::Detached,
            "query specification {} is already attached",
            spec
        );
        let width = self.stmt.spec_width(spec);
        match kind {
            SubqueryKind::Exists => {}
            SubqueryKind::Scalar => ensure!(width == 1, "operand should contain 1 column(s)"),
            SubqueryKind::In | SubqueryKind::Quantified { .. } => ensure!(
                width == left.len(),
                "operand should contain {} column(s)",
                left.len()
            ),
        }
        let sid = SubqueryId::new(self.stmt.subqueries.len());
        let slot = self.stmt.exprs.alloc(Expr::Subquery(sid));
        self.stmt.subqueries.push(RefCell::new(SubqueryPredicate::new(
            sid,
            kind,
            negated,
            left.iter().copied().collect(),
            spec,
            outer,
            slot,
        )));
        self.stmt.spec_mut(spec).owner = SpecOwner::Subquery(sid);
        Ok(slot)
    }

    pub fn exists(&mut self, outer: BlockId, spec: SpecId) -> Result<ExprId> {
        self.attach(outer, spec, SubqueryKind::Exists, false, &[])
    }

    pub fn in_subquery(&mut self, outer: BlockId, left: &[ExprId], spec: SpecId) -> Result<ExprId> {
        ensure!(!left.is_empty(), "IN needs at least one left operand");
        self.attach(outer, spec, SubqueryKind::In, false, left)
    }

    pub fn quantified(
        &mut self,
        outer: BlockId,
        left: &[ExprId],
        op: CompareOp,
        quantifier: Quantifier,
        spec: SpecId,
    ) -> Result<ExprId> {
        match (op, quantifier) {
            (CompareOp::Eq, Quantifier::Any) => self.in_subquery(outer, left, spec),
            (CompareOp::Ne, Quantifier::All) => {
                ensure!(!left.is_empty(), "IN needs at least one left operand");
                self.attach(outer, spec, SubqueryKind::In, true, left)
            }
            _ => {
                ensure!(left.len() == 1, "operand should contain 1 column(s)");
                self.attach(outer, spec, SubqueryKind::Quantified { op, quantifier }, false, left)
            }
        }
    }

    pub fn scalar(&mut self, outer: BlockId, spec: SpecId) -> Result<ExprId> {
        self.attach(outer, spec, SubqueryKind::Scalar, false, &[])
    }

    /// Validates the statement and creates the execution engines.
    pub fn build(mut self) -> Result<Statement> {
        for (i, spec) in self.stmt.specs.iter().enumerate() {
            ensure!(
                spec.owner != SpecOwner::Detached,
                "query specification {} is not attached",
                SpecId::new(i)
            );
            let widths: SmallVec<[usize; 2]> = spec
                .blocks
                .iter()
                .map(|&b| self.stmt.block(b).projection.len())
                .collect();
            ensure!(
                widths.windows(2).all(|w| w[0] == w[1]),
                "union blocks must project the same number of columns"
            );
        }

        for sid in self.stmt.subquery_ids().collect::<Vec<_>>() {
            let (kind, spec, arity) = {
                let node = self.stmt.subquery(sid).borrow();
                (node.kind, node.spec, node.left.len())
            };
            let blocks = self.stmt.spec(spec).blocks.clone();
            match kind {
                SubqueryKind::Exists => {
                    if let [block] = blocks.as_slice() {
                        let b = self.stmt.block_mut(*block);
                        if b.limit.is_some_and(|n| n > 0) && b.offset.is_none() {
                            b.limit = None;
                        }
                    }
                }
                SubqueryKind::In | SubqueryKind::Quantified { .. } => {
                    if blocks.iter().any(|&b| self.stmt.block(b).limit.is_some()) {
                        bail!("limit in in/all/any subquery is not supported");
                    }
                    ensure!(
                        self.stmt.spec_width(spec) == arity,
                        "operand should contain {} column(s)",
                        arity
                    );
                }
                SubqueryKind::Scalar => ensure!(
                    self.stmt.spec_width(spec) == 1,
                    "operand should contain 1 column(s)"
                ),
            }
            let engine = Engine::for_spec(&self.stmt, spec);
            self.stmt.subquery(sid).borrow_mut().engine = Some(engine);
        }
        Ok(self.stmt)
    }

    /// The statement as built so far, without validation.
    #[cfg(test)]
    pub(crate) fn into_statement(self) -> Statement {
        self.stmt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, TableDef};
    use crate::types::DataType;

    fn catalog() -> Catalog {
        let mut c = Catalog::new();
        c.create_table(TableDef::new(
            "t",
            vec![
                ColumnDef::new("a", DataType::Int8).not_null(),
                ColumnDef::new("b", DataType::Int8),
            ],
        ))
        .unwrap();
        c
    }

    #[test]
    fn test_in_arity_mismatch() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let t = b.table(root, "t").unwrap();
        let a = b.column(t, "a").unwrap();
        let (spec, sub) = b.new_subquery();
        let t2 = b.table(sub, "t").unwrap();
        let a2 = b.column(t2, "a").unwrap();
        let b2 = b.column(t2, "b").unwrap();
        b.project(sub, [a2, b2]);
        let err = b.in_subquery(root, &[a], spec).unwrap_err();
        assert_eq!(err.to_string(), "operand should contain 1 column(s)");
    }

    #[test]
    fn test_eq_any_is_in_and_ne_all_is_not_in() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let t = b.table(root, "t").unwrap();
        let a = b.column(t, "a").unwrap();
        let (s1, sub1) = b.new_subquery();
        let t1 = b.table(sub1, "t").unwrap();
        let c1 = b.column(t1, "a").unwrap();
        b.project(sub1, [c1]);
        let (s2, sub2) = b.new_subquery();
        let t2 = b.table(sub2, "t").unwrap();
        let c2 = b.column(t2, "a").unwrap();
        b.project(sub2, [c2]);
        let any = b.quantified(root, &[a], CompareOp::Eq, Quantifier::Any, s1).unwrap();
        let all = b.quantified(root, &[a], CompareOp::Ne, Quantifier::All, s2).unwrap();
        b.project(root, [any, all]);
        let stmt = b.build().unwrap();

        let n0 = stmt.subquery(SubqueryId::new(0)).borrow();
        assert_eq!((n0.kind(), n0.is_negated()), (SubqueryKind::In, false));
        let n1 = stmt.subquery(SubqueryId::new(1)).borrow();
        assert_eq!((n1.kind(), n1.is_negated()), (SubqueryKind::In, true));
    }

    #[test]
    fn test_not_folds_into_predicate() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let (spec, sub) = b.new_subquery();
        let t = b.table(sub, "t").unwrap();
        let a = b.column(t, "a").unwrap();
        b.project(sub, [a]);
        let exists = b.exists(root, spec).unwrap();
        let not_exists = b.not(exists);
        assert_eq!(exists, not_exists);
        b.project(root, [not_exists]);
        let stmt = b.build().unwrap();
        assert!(stmt.subquery(SubqueryId::new(0)).borrow().is_negated());
    }

    #[test]
    fn test_exists_limit_dropped_and_in_limit_rejected() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let (spec, sub) = b.new_subquery();
        let t = b.table(sub, "t").unwrap();
        let a = b.column(t, "a").unwrap();
        b.project(sub, [a]);
        b.limit(sub, 1, None);
        let exists = b.exists(root, spec).unwrap();
        b.project(root, [exists]);
        let stmt = b.build().unwrap();
        assert_eq!(stmt.block(sub).limit, None);

        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let one = b.literal(1i64);
        let (spec, sub) = b.new_subquery();
        let t = b.table(sub, "t").unwrap();
        let a = b.column(t, "a").unwrap();
        b.project(sub, [a]);
        b.limit(sub, 2, None);
        let pred = b.in_subquery(root, &[one], spec).unwrap();
        b.project(root, [pred]);
        let err = b.build().unwrap_err();
        assert_eq!(err.to_string(), "limit in in/all/any subquery is not supported");
    }

    #[test]
    fn test_detached_subquery_rejected() {
        let catalog = catalog();
        let mut b = StatementBuilder::new(&catalog);
        let root = b.root_block();
        let one = b.literal(1i64);
        b.project(root, [one]);
        let _ = b.new_subquery();
        assert!(b.build().is_err());
    }
}
