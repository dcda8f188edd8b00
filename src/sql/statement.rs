//! # Statement Arena
//!
//! A `Statement` owns everything that survives across executions of a
//! prepared statement: the expression arena, table references, join nests,
//! query blocks, query specifications and the subquery predicate nodes.
//! Everything is addressed by index, so moving a subquery's tables into the
//! outer join graph is an edit of a few `Vec`s plus one bulk pass that
//! re-parents the moved tables.
//!
//! ## Shape
//!
//! ```text
//! QuerySpec (root)
//! └── QueryBlock
//!     ├── from: [JoinNest, JoinNest, ...]     (inner-joined list)
//!     │         └── body: Table(t) | Nest([...])
//!     ├── filter / having / group_by / projection   (ExprIds)
//!     └── Expr::Subquery(s) ──> SubqueryPredicate ──> QuerySpec
//! ```
//!
//! Subquery predicate nodes sit behind `RefCell` because evaluating one
//! mutates its cache and engine while the rest of the statement is only
//! read. A node is never borrowed while it is being evaluated by itself; a
//! recursive request fails with an error instead of a panic.

use super::expr::{
    AggFunc, BlockId, Expr, ExprArena, ExprId, GuardId, NestId, ScalarFunc, SpecId,
    SubqueryId, TableId, TableMap,
};
use super::subquery::{SubqueryKind, SubqueryPredicate};
use crate::types::DataType;
use smallvec::SmallVec;
use std::cell::RefCell;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    /// `None` for a derived column that is always NULL.
    pub data_type: Option<DataType>,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    Base { name: String },
    Derived { spec: SpecId },
}

#[derive(Debug, Clone)]
pub struct TableRef {
    pub alias: String,
    pub source: TableSource,
    pub columns: Vec<ColumnMeta>,
    pub owner: BlockId,
    /// Inner side of an outer join: every column may be NULL.
    pub outer_joined: bool,
    /// Unique indexes of a base table whose columns are all NOT NULL, as
    /// (catalog index position, column positions in index order).
    pub unique_keys: Vec<(usize, SmallVec<[usize; 2]>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    /// Emits each outer row at most once, on its first match.
    Semi,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NestBody {
    Table(TableId),
    Nest(Vec<NestId>),
}

#[derive(Debug, Clone)]
pub struct JoinNest {
    pub kind: JoinKind,
    pub body: NestBody,
    pub on: Option<ExprId>,
}

#[derive(Debug, Clone)]
pub struct QueryBlock {
    pub spec: SpecId,
    pub projection: Vec<ExprId>,
    pub from: Vec<NestId>,
    pub filter: Option<ExprId>,
    pub group_by: Vec<ExprId>,
    pub having: Option<ExprId>,
    pub distinct: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryBlock {
    pub(crate) fn new(spec: SpecId) -> Self {
        Self {
            spec,
            projection: Vec::new(),
            from: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            having: None,
            distinct: false,
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecOwner {
    Root,
    Subquery(SubqueryId),
    Derived(TableId),
    /// Created but not yet attached to a predicate or FROM list.
    Detached,
}

#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub blocks: SmallVec<[BlockId; 1]>,
    pub union_all: bool,
    pub owner: SpecOwner,
    /// Merged into an outer query; never executed on its own again.
    pub excluded: bool,
}

impl QuerySpec {
    pub fn is_single_block(&self) -> bool {
        self.blocks.len() == 1
    }
}

/// Inferred type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprType {
    /// `None` for a bare NULL literal.
    pub data_type: Option<DataType>,
    pub nullable: bool,
}

impl ExprType {
    fn of(data_type: DataType, nullable: bool) -> Self {
        Self {
            data_type: Some(data_type),
            nullable,
        }
    }
}

/// Where a subquery occurrence sits inside its outer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryPosition {
    Select,
    /// `top_level` when the node is a direct AND-conjunct of WHERE.
    Where { top_level: bool },
    GroupBy,
    Having,
    JoinCondition,
    /// No longer reachable from its outer block.
    Detached,
}

#[derive(Debug)]
pub struct Statement {
    pub(crate) exprs: ExprArena,
    pub(crate) tables: Vec<TableRef>,
    pub(crate) nests: Vec<JoinNest>,
    pub(crate) blocks: Vec<QueryBlock>,
    pub(crate) specs: Vec<QuerySpec>,
    pub(crate) subqueries: Vec<RefCell<SubqueryPredicate>>,
    pub(crate) guard_count: usize,
    /// Guards released by stripped injections, reused before new ids.
    pub(crate) free_guards: Vec<GuardId>,
    pub(crate) root: SpecId,
}

impl Statement {
    pub fn root(&self) -> SpecId {
        self.root
    }

    pub fn exprs(&self) -> &ExprArena {
        &self.exprs
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        self.exprs.get(id)
    }

    pub fn table(&self, id: TableId) -> &TableRef {
        &self.tables[id.index()]
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn nest(&self, id: NestId) -> &JoinNest {
        &self.nests[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &QueryBlock {
        &self.blocks[id.index()]
    }

    pub fn spec(&self, id: SpecId) -> &QuerySpec {
        &self.specs[id.index()]
    }

    pub fn subquery(&self, id: SubqueryId) -> &RefCell<SubqueryPredicate> {
        &self.subqueries[id.index()]
    }

    pub fn subquery_count(&self) -> usize {
        self.subqueries.len()
    }

    pub fn subquery_ids(&self) -> impl Iterator<Item = SubqueryId> {
        (0..self.subqueries.len()).map(SubqueryId::new)
    }

    pub fn guard_count(&self) -> usize {
        self.guard_count
    }

    pub(crate) fn alloc_table(&mut self, table: TableRef) -> TableId {
        let id = TableId::new(self.tables.len());
        self.tables.push(table);
        id
    }

    pub(crate) fn alloc_guard(&mut self) -> GuardId {
        if let Some(guard) = self.free_guards.pop() {
            return guard;
        }
        let guard = GuardId::new(self.guard_count);
        self.guard_count += 1;
        guard
    }

    pub(crate) fn release_guard(&mut self, guard: GuardId) {
        if !self.free_guards.contains(&guard) {
            self.free_guards.push(guard);
        }
    }

    pub(crate) fn alloc_nest(&mut self, nest: JoinNest) -> NestId {
        let id = NestId::new(self.nests.len());
        self.nests.push(nest);
        id
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut QueryBlock {
        &mut self.blocks[id.index()]
    }

    pub(crate) fn spec_mut(&mut self, id: SpecId) -> &mut QuerySpec {
        &mut self.specs[id.index()]
    }

    pub(crate) fn table_mut(&mut self, id: TableId) -> &mut TableRef {
        &mut self.tables[id.index()]
    }

    /// Tables reachable through a nest, including nested nests.
    pub fn nest_tables(&self, id: NestId) -> TableMap {
        match &self.nest(id).body {
            NestBody::Table(t) => TableMap::single(*t),
            NestBody::Nest(children) => children
                .iter()
                .fold(TableMap::EMPTY, |acc, &c| acc.union(self.nest_tables(c))),
        }
    }

    /// Tables joined directly by a block (not those of its subqueries).
    pub fn block_tables(&self, id: BlockId) -> TableMap {
        self.block(id)
            .from
            .iter()
            .fold(TableMap::EMPTY, |acc, &n| acc.union(self.nest_tables(n)))
    }

    fn collect_nest_ons(&self, id: NestId, out: &mut SmallVec<[ExprId; 4]>) {
        let nest = self.nest(id);
        if let Some(on) = nest.on {
            out.push(on);
        }
        if let NestBody::Nest(children) = &nest.body {
            for &c in children {
                self.collect_nest_ons(c, out);
            }
        }
    }

    /// Every expression root owned by a block: projection, WHERE, GROUP BY,
    /// HAVING and join conditions.
    pub fn block_expr_roots(&self, id: BlockId) -> SmallVec<[ExprId; 16]> {
        let block = self.block(id);
        let mut roots: SmallVec<[ExprId; 16]> = SmallVec::new();
        roots.extend(block.projection.iter().copied());
        roots.extend(block.filter);
        roots.extend(block.group_by.iter().copied());
        roots.extend(block.having);
        let mut ons = SmallVec::new();
        for &n in &block.from {
            self.collect_nest_ons(n, &mut ons);
        }
        roots.extend(ons);
        roots
    }

    pub fn is_aggregated(&self, id: BlockId) -> bool {
        let block = self.block(id);
        !block.group_by.is_empty()
            || block.having.is_some()
            || block
                .projection
                .iter()
                .any(|&e| self.exprs.contains_aggregate(e))
    }

    pub fn has_window(&self, id: BlockId) -> bool {
        self.block(id)
            .projection
            .iter()
            .any(|&e| self.exprs.contains_window(e))
    }

    /// Derived tables joined directly by a block.
    pub fn derived_tables(&self, id: BlockId) -> impl Iterator<Item = (TableId, SpecId)> + '_ {
        self.block_tables(id)
            .iter()
            .filter_map(move |t| match &self.table(t).source {
                TableSource::Derived { spec } => Some((t, *spec)),
                TableSource::Base { .. } => None,
            })
    }

    /// Tables defined anywhere inside `spec`, including nested subqueries
    /// and derived tables.
    pub fn spec_local_tables(&self, spec: SpecId) -> TableMap {
        let mut local = TableMap::EMPTY;
        for &b in &self.spec(spec).blocks {
            local = local.union(self.block_tables(b));
            for (_, derived) in self.derived_tables(b) {
                local = local.union(self.spec_local_tables(derived));
            }
            for root in self.block_expr_roots(b) {
                for sid in self.subqueries_in(root) {
                    let inner = self.subquery(sid).borrow().spec;
                    local = local.union(self.spec_local_tables(inner));
                }
            }
        }
        local
    }

    /// Tables read by `spec` that it does not define itself.
    ///
    /// With `include_injected == false`, predicates injected by IN-to-EXISTS
    /// are ignored, which yields the correlation of the subquery as written.
    pub fn outer_refs(&self, spec: SpecId, include_injected: bool) -> TableMap {
        let mut used = TableMap::EMPTY;
        for &b in &self.spec(spec).blocks {
            for root in self.block_expr_roots(b) {
                used = used.union(self.used_tables_inner(root, include_injected));
            }
            for (_, derived) in self.derived_tables(b) {
                used = used.union(self.outer_refs(derived, include_injected));
            }
        }
        used.difference(self.spec_local_tables(spec))
    }

    pub fn is_correlated(&self, spec: SpecId) -> bool {
        !self.outer_refs(spec, false).is_empty()
    }

    /// Tables an expression depends on, seeing through subquery nodes.
    pub fn used_tables(&self, id: ExprId) -> TableMap {
        self.used_tables_inner(id, true)
    }

    fn used_tables_inner(&self, id: ExprId, include_injected: bool) -> TableMap {
        let mut map = TableMap::EMPTY;
        self.exprs.walk(id, &mut |_, e| match e {
            Expr::Column { table, .. } | Expr::NullIndicator { table } => {
                map.insert(*table);
                true
            }
            Expr::Subquery(sid) => {
                let (left, spec) = {
                    let node = self.subquery(*sid).borrow();
                    (node.left.clone(), node.spec)
                };
                for l in left {
                    map = map.union(self.used_tables_inner(l, include_injected));
                }
                map = map.union(self.outer_refs(spec, include_injected));
                false
            }
            Expr::LeftCache { subquery, .. } => {
                let left = self.subquery(*subquery).borrow().left.clone();
                for l in left {
                    map = map.union(self.used_tables_inner(l, include_injected));
                }
                false
            }
            Expr::Injected { .. } => include_injected,
            _ => true,
        });
        map
    }

    /// Subquery nodes referenced by an expression, not descending into them.
    pub fn subqueries_in(&self, id: ExprId) -> SmallVec<[SubqueryId; 2]> {
        let mut found = SmallVec::new();
        self.exprs.walk(id, &mut |_, e| {
            if let Expr::Subquery(sid) = e {
                found.push(*sid);
                return false;
            }
            true
        });
        found
    }

    /// Every subquery node that occurs in a block, with its position.
    pub fn subqueries_of_block(&self, id: BlockId) -> Vec<(SubqueryId, SubqueryPosition)> {
        let block = self.block(id);
        let mut out = Vec::new();
        for &p in &block.projection {
            out.extend(self.subqueries_in(p).into_iter().map(|s| (s, SubqueryPosition::Select)));
        }
        if let Some(filter) = block.filter {
            let conjuncts = self.exprs.conjuncts(filter);
            for s in self.subqueries_in(filter) {
                let slot = self.subquery(s).borrow().slot;
                let top_level = conjuncts.contains(&slot);
                out.push((s, SubqueryPosition::Where { top_level }));
            }
        }
        for &g in &block.group_by {
            out.extend(self.subqueries_in(g).into_iter().map(|s| (s, SubqueryPosition::GroupBy)));
        }
        if let Some(having) = block.having {
            out.extend(self.subqueries_in(having).into_iter().map(|s| (s, SubqueryPosition::Having)));
        }
        let mut ons = SmallVec::<[ExprId; 4]>::new();
        for &n in &block.from {
            self.collect_nest_ons(n, &mut ons);
        }
        for on in ons {
            out.extend(self.subqueries_in(on).into_iter().map(|s| (s, SubqueryPosition::JoinCondition)));
        }
        out
    }

    pub fn position_of(&self, sid: SubqueryId, outer_block: BlockId) -> SubqueryPosition {
        self.subqueries_of_block(outer_block)
            .into_iter()
            .find(|(s, _)| *s == sid)
            .map_or(SubqueryPosition::Detached, |(_, pos)| pos)
    }

    /// Subquery nodes in post-order: every node comes after the nodes nested
    /// inside its query specification and inside derived tables it reads.
    pub fn subqueries_bottom_up(&self) -> Vec<SubqueryId> {
        let mut order = Vec::with_capacity(self.subqueries.len());
        self.collect_bottom_up(self.root, &mut order);
        order
    }

    fn collect_bottom_up(&self, spec: SpecId, order: &mut Vec<SubqueryId>) {
        for &b in &self.spec(spec).blocks {
            for (_, derived) in self.derived_tables(b) {
                self.collect_bottom_up(derived, order);
            }
            for root in self.block_expr_roots(b) {
                for sid in self.subqueries_in(root) {
                    if order.contains(&sid) {
                        continue;
                    }
                    let inner = self.subquery(sid).borrow().spec;
                    self.collect_bottom_up(inner, order);
                    order.push(sid);
                }
            }
        }
    }

    pub fn column_type(&self, table: TableId, column: usize) -> ExprType {
        let t = self.table(table);
        match t.columns.get(column) {
            Some(meta) => ExprType {
                data_type: meta.data_type,
                nullable: meta.nullable || t.outer_joined,
            },
            None => ExprType {
                data_type: None,
                nullable: true,
            },
        }
    }

    pub fn expr_type(&self, id: ExprId) -> ExprType {
        match self.expr(id) {
            Expr::Literal(v) => ExprType {
                data_type: v.data_type(),
                nullable: v.is_null(),
            },
            Expr::Column { table, column } => self.column_type(*table, *column),
            Expr::NullIndicator { .. } => ExprType::of(DataType::Int8, true),
            Expr::Compare { left, right, .. } => ExprType::of(
                DataType::Bool,
                self.expr_type(*left).nullable || self.expr_type(*right).nullable,
            ),
            Expr::And(items) | Expr::Or(items) => ExprType::of(
                DataType::Bool,
                items.iter().any(|&i| self.expr_type(i).nullable),
            ),
            Expr::Not(e) => ExprType::of(DataType::Bool, self.expr_type(*e).nullable),
            Expr::IsNull { .. } | Expr::IsNotFalse(_) => ExprType::of(DataType::Bool, false),
            Expr::Arith { left, right, .. } => {
                let (l, r) = (self.expr_type(*left), self.expr_type(*right));
                let dt = match (l.data_type, r.data_type) {
                    (Some(DataType::Float8), _) | (_, Some(DataType::Float8)) => DataType::Float8,
                    _ => DataType::Int8,
                };
                ExprType::of(dt, l.nullable || r.nullable)
            }
            Expr::Function { func, args } => match func {
                ScalarFunc::Random => ExprType::of(DataType::Float8, false),
                ScalarFunc::Abs => args
                    .first()
                    .map_or(ExprType::of(DataType::Int8, true), |&a| self.expr_type(a)),
                ScalarFunc::Coalesce => {
                    let types: SmallVec<[ExprType; 4]> =
                        args.iter().map(|&a| self.expr_type(a)).collect();
                    ExprType {
                        data_type: types.iter().find_map(|t| t.data_type),
                        nullable: types.iter().all(|t| t.nullable),
                    }
                }
            },
            Expr::Aggregate { func, arg } => match func {
                AggFunc::CountStar | AggFunc::Count => ExprType::of(DataType::Int8, false),
                AggFunc::Sum | AggFunc::Min | AggFunc::Max => ExprType {
                    data_type: arg.and_then(|a| self.expr_type(a).data_type),
                    nullable: true,
                },
            },
            Expr::WindowCount { .. } => ExprType::of(DataType::Int8, false),
            Expr::Subquery(sid) => {
                let (kind, spec) = {
                    let node = self.subquery(*sid).borrow();
                    (node.kind, node.spec)
                };
                match kind {
                    SubqueryKind::Exists => ExprType::of(DataType::Bool, false),
                    SubqueryKind::Scalar => {
                        let first = self.spec(spec).blocks.first().copied();
                        let data_type = first
                            .and_then(|b| self.block(b).projection.first().copied())
                            .and_then(|e| self.expr_type(e).data_type);
                        ExprType {
                            data_type,
                            nullable: true,
                        }
                    }
                    _ => ExprType::of(DataType::Bool, true),
                }
            }
            Expr::LeftCache { subquery, index } => {
                let left = self.subquery(*subquery).borrow().left.get(*index).copied();
                left.map_or(
                    ExprType {
                        data_type: None,
                        nullable: true,
                    },
                    |l| self.expr_type(l),
                )
            }
            Expr::Injected { .. } => ExprType::of(DataType::Bool, true),
            Expr::CardinalityCheck { value, .. } => self.expr_type(*value),
        }
    }

    /// Number of columns every block of `spec` projects.
    pub fn spec_width(&self, spec: SpecId) -> usize {
        self.spec(spec)
            .blocks
            .first()
            .map_or(0, |&b| self.block(b).projection.len())
    }

    /// Projection types of a spec; nullability is merged across union blocks.
    pub fn spec_types(&self, spec: SpecId) -> Vec<ExprType> {
        let mut types: Vec<ExprType> = Vec::new();
        for &b in &self.spec(spec).blocks {
            for (i, &e) in self.block(b).projection.iter().enumerate() {
                let t = self.expr_type(e);
                match types.get_mut(i) {
                    Some(existing) => {
                        existing.nullable |= t.nullable;
                        if existing.data_type.is_none() {
                            existing.data_type = t.data_type;
                        }
                    }
                    None => types.push(t),
                }
            }
        }
        types
    }

    /// Column metadata of a derived table reading `spec`.
    pub fn derived_columns(&self, spec: SpecId) -> Vec<ColumnMeta> {
        self.spec_types(spec)
            .into_iter()
            .enumerate()
            .map(|(i, t)| ColumnMeta {
                name: format!("col{}", i),
                data_type: t.data_type,
                nullable: t.nullable,
            })
            .collect()
    }

    /// False if any expression reachable from `spec`, including nested
    /// subqueries and derived tables, is non-deterministic.
    pub fn spec_is_deterministic(&self, spec: SpecId) -> bool {
        self.spec(spec).blocks.iter().all(|&b| {
            self.block_expr_roots(b).into_iter().all(|root| {
                self.exprs.is_deterministic(root)
                    && self.subqueries_in(root).into_iter().all(|sid| {
                        let inner = self.subquery(sid).borrow().spec;
                        self.spec_is_deterministic(inner)
                    })
            }) && self
                .derived_tables(b)
                .all(|(_, derived)| self.spec_is_deterministic(derived))
        })
    }
}
