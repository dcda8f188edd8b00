//! # Expression Arena
//!
//! Expressions of a statement live in one permanent arena and refer to each
//! other by `ExprId`. Rewrites never patch parent pointers: replacing a node
//! overwrites its arena slot, so every parent that referenced the slot sees
//! the new expression. This is how a retired subquery predicate is swapped
//! for a constant or a null-indicator test in one step.
//!
//! ## Table Bitmaps
//!
//! `TableMap` is a 64-bit set of `TableId`s. It answers the questions the
//! decorrelator and the classifier ask: which tables does this expression
//! read, is it purely outer, is it purely inner.
//!
//! ```text
//! t1.a = t2.b      used = {t1, t2}
//! t1.a + 1         used = {t1}
//! 42               used = {}
//! ```
//!
//! ## Node Kinds Owned by the Subquery Subsystem
//!
//! | Node | Produced by | Evaluates to |
//! |------|-------------|--------------|
//! | `Subquery` | builder | value of the predicate node |
//! | `LeftCache` | IN-to-EXISTS | cached left-hand value of the current probe |
//! | `Injected` | IN-to-EXISTS | wrapped predicate, or TRUE when disabled |
//! | `NullIndicator` | antijoin / derived table | NULL when the table was null-complemented |
//! | `CardinalityCheck` | derived table | the wrapped value, or an error when the count exceeds one |
//! | `WindowCount` | derived table | `COUNT(*) OVER (PARTITION BY ...)` |

use crate::config::MAX_STATEMENT_TABLES;
use crate::types::Value;
use smallvec::SmallVec;

arena_id! {
    /// Index of an expression in the statement's expression arena.
    ExprId
}

arena_id! {
    /// Index of a table reference; also its bit in `TableMap`.
    TableId
}

arena_id! {
    /// Index of a subquery predicate node.
    SubqueryId
}

arena_id! {
    /// Index of a query block.
    BlockId
}

arena_id! {
    /// Index of a query specification.
    SpecId
}

arena_id! {
    /// Index of a join nest.
    NestId
}

arena_id! {
    /// Index of a conditional-evaluation flag used by injected predicates.
    GuardId
}

pub type ExprList = SmallVec<[ExprId; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TableMap(u64);

impl TableMap {
    pub const EMPTY: TableMap = TableMap(0);
    pub const ALL: TableMap = TableMap(u64::MAX);

    pub fn single(table: TableId) -> Self {
        debug_assert!(table.index() < MAX_STATEMENT_TABLES);
        TableMap(1u64 << table.index())
    }

    pub fn insert(&mut self, table: TableId) {
        self.0 |= Self::single(table).0;
    }

    pub fn union(self, other: TableMap) -> TableMap {
        TableMap(self.0 | other.0)
    }

    pub fn intersect(self, other: TableMap) -> TableMap {
        TableMap(self.0 & other.0)
    }

    pub fn difference(self, other: TableMap) -> TableMap {
        TableMap(self.0 & !other.0)
    }

    pub fn contains(self, table: TableId) -> bool {
        self.0 & Self::single(table).0 != 0
    }

    pub fn is_subset_of(self, other: TableMap) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn overlaps(self, other: TableMap) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = TableId> {
        (0..MAX_STATEMENT_TABLES)
            .filter(move |i| self.0 & (1u64 << i) != 0)
            .map(TableId::new)
    }
}

impl FromIterator<TableId> for TableMap {
    fn from_iter<I: IntoIterator<Item = TableId>>(iter: I) -> Self {
        let mut map = TableMap::EMPTY;
        for t in iter {
            map.insert(t);
        }
        map
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// `NOT (a op b)` is `a op.negate() b` for non-NULL operands.
    pub fn negate(self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
        }
    }

    /// `a op b` is `b op.swap() a`.
    pub fn swap(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            op => op,
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge
        )
    }

    pub fn matches(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ord == Equal,
            CompareOp::Ne => ord != Equal,
            CompareOp::Lt => ord == Less,
            CompareOp::Le => ord != Greater,
            CompareOp::Gt => ord == Greater,
            CompareOp::Ge => ord != Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunc {
    Coalesce,
    Abs,
    /// Non-deterministic: blocks decorrelation and result caching.
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column {
        table: TableId,
        column: usize,
    },
    /// NULL when `table` is null-complemented by an outer join, else 1.
    NullIndicator {
        table: TableId,
    },
    Compare {
        op: CompareOp,
        left: ExprId,
        right: ExprId,
    },
    And(ExprList),
    Or(ExprList),
    Not(ExprId),
    IsNull {
        expr: ExprId,
        negated: bool,
    },
    /// TRUE unless the operand is FALSE.
    IsNotFalse(ExprId),
    Arith {
        op: ArithOp,
        left: ExprId,
        right: ExprId,
    },
    Function {
        func: ScalarFunc,
        args: ExprList,
    },
    Aggregate {
        func: AggFunc,
        arg: Option<ExprId>,
    },
    /// `COUNT(*) OVER (PARTITION BY ...)`; only valid as a projection item.
    WindowCount {
        partition_by: ExprList,
    },
    Subquery(SubqueryId),
    LeftCache {
        subquery: SubqueryId,
        index: usize,
    },
    Injected {
        subquery: SubqueryId,
        guard: Option<GuardId>,
        expr: ExprId,
    },
    /// Fails when `count` exceeds one, otherwise yields `value`.
    CardinalityCheck {
        count: ExprId,
        value: ExprId,
    },
}

impl Expr {
    pub fn children(&self) -> SmallVec<[ExprId; 4]> {
        match self {
            Expr::Literal(_)
            | Expr::Column { .. }
            | Expr::NullIndicator { .. }
            | Expr::Subquery(_)
            | Expr::LeftCache { .. }
            | Expr::Aggregate { arg: None, .. } => SmallVec::new(),
            Expr::Compare { left, right, .. } | Expr::Arith { left, right, .. } => {
                smallvec::smallvec![*left, *right]
            }
            Expr::CardinalityCheck { count, value } => smallvec::smallvec![*count, *value],
            Expr::And(items) | Expr::Or(items) => items.clone(),
            Expr::Function { args, .. } => args.clone(),
            Expr::WindowCount { partition_by } => partition_by.clone(),
            Expr::Not(e)
            | Expr::IsNull { expr: e, .. }
            | Expr::IsNotFalse(e)
            | Expr::Aggregate { arg: Some(e), .. }
            | Expr::Injected { expr: e, .. } => smallvec::smallvec![*e],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, expr: Expr) -> ExprId {
        let id = ExprId::new(self.nodes.len());
        self.nodes.push(expr);
        id
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.index()]
    }

    /// Overwrites a slot in place; every parent of `id` sees the new node.
    pub fn replace(&mut self, id: ExprId, expr: Expr) -> Expr {
        std::mem::replace(&mut self.nodes[id.index()], expr)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn literal(&mut self, value: impl Into<Value>) -> ExprId {
        self.alloc(Expr::Literal(value.into()))
    }

    pub fn true_literal(&mut self) -> ExprId {
        self.alloc(Expr::Literal(Value::Bool(true)))
    }

    pub fn is_true_literal(&self, id: ExprId) -> bool {
        matches!(self.get(id), Expr::Literal(Value::Bool(true)))
    }

    /// Flattens nested ANDs into their conjuncts.
    pub fn conjuncts(&self, id: ExprId) -> SmallVec<[ExprId; 8]> {
        match self.get(id) {
            Expr::And(items) => {
                let mut parts = SmallVec::new();
                for &item in items {
                    parts.extend(self.conjuncts(item));
                }
                parts
            }
            _ => smallvec::smallvec![id],
        }
    }

    pub fn disjuncts(&self, id: ExprId) -> SmallVec<[ExprId; 8]> {
        match self.get(id) {
            Expr::Or(items) => {
                let mut parts = SmallVec::new();
                for &item in items {
                    parts.extend(self.disjuncts(item));
                }
                parts
            }
            _ => smallvec::smallvec![id],
        }
    }

    /// Combines predicates with AND; an empty list is the constant TRUE.
    pub fn and_all(&mut self, predicates: &[ExprId]) -> ExprId {
        match predicates {
            [] => self.true_literal(),
            [single] => *single,
            many => self.alloc(Expr::And(many.iter().copied().collect())),
        }
    }

    /// Appends `extra` to an optional predicate.
    pub fn and_with(&mut self, base: Option<ExprId>, extra: ExprId) -> ExprId {
        match base {
            None => extra,
            Some(base) if self.is_true_literal(base) => extra,
            Some(base) => {
                let mut parts: SmallVec<[ExprId; 8]> = self.conjuncts(base);
                parts.push(extra);
                self.and_all(&parts)
            }
        }
    }

    /// Pre-order walk; `visit` returns false to skip a node's children.
    pub fn walk(&self, id: ExprId, visit: &mut dyn FnMut(ExprId, &Expr) -> bool) {
        let expr = self.get(id);
        if visit(id, expr) {
            for child in expr.children() {
                self.walk(child, visit);
            }
        }
    }

    pub fn any(&self, id: ExprId, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        let mut found = false;
        self.walk(id, &mut |_, e| {
            if found {
                return false;
            }
            if pred(e) {
                found = true;
                return false;
            }
            true
        });
        found
    }

    /// Tables referenced directly by columns and null indicators. Subquery
    /// nodes are opaque here; `Statement::used_tables` sees through them.
    pub fn column_tables(&self, id: ExprId) -> TableMap {
        let mut map = TableMap::EMPTY;
        self.walk(id, &mut |_, e| {
            match e {
                Expr::Column { table, .. } | Expr::NullIndicator { table } => map.insert(*table),
                _ => {}
            }
            true
        });
        map
    }

    pub fn contains_aggregate(&self, id: ExprId) -> bool {
        self.any(id, &mut |e| matches!(e, Expr::Aggregate { .. }))
    }

    pub fn contains_window(&self, id: ExprId) -> bool {
        self.any(id, &mut |e| matches!(e, Expr::WindowCount { .. }))
    }

    pub fn contains_subquery(&self, id: ExprId) -> bool {
        self.any(id, &mut |e| {
            matches!(e, Expr::Subquery(_) | Expr::LeftCache { .. } | Expr::Injected { .. })
        })
    }

    pub fn is_deterministic(&self, id: ExprId) -> bool {
        !self.any(id, &mut |e| {
            matches!(
                e,
                Expr::Function {
                    func: ScalarFunc::Random,
                    ..
                }
            )
        })
    }

    /// Structural equality over the trees rooted at `a` and `b`.
    pub fn structurally_equal(&self, a: ExprId, b: ExprId) -> bool {
        if a == b {
            return true;
        }
        let (ea, eb) = (self.get(a), self.get(b));
        if std::mem::discriminant(ea) != std::mem::discriminant(eb) {
            return false;
        }
        let same_shape = match (ea, eb) {
            (Expr::Literal(x), Expr::Literal(y)) => x == y,
            (
                Expr::Column { table: t1, column: c1 },
                Expr::Column { table: t2, column: c2 },
            ) => t1 == t2 && c1 == c2,
            (Expr::NullIndicator { table: t1 }, Expr::NullIndicator { table: t2 }) => t1 == t2,
            (Expr::Compare { op: o1, .. }, Expr::Compare { op: o2, .. }) => o1 == o2,
            (Expr::IsNull { negated: n1, .. }, Expr::IsNull { negated: n2, .. }) => n1 == n2,
            (Expr::Arith { op: o1, .. }, Expr::Arith { op: o2, .. }) => o1 == o2,
            (Expr::Function { func: f1, .. }, Expr::Function { func: f2, .. }) => f1 == f2,
            (Expr::Aggregate { func: f1, .. }, Expr::Aggregate { func: f2, .. }) => f1 == f2,
            (Expr::Subquery(s1), Expr::Subquery(s2)) => s1 == s2,
            (
                Expr::LeftCache { subquery: s1, index: i1 },
                Expr::LeftCache { subquery: s2, index: i2 },
            ) => s1 == s2 && i1 == i2,
            (
                Expr::Injected { subquery: s1, guard: g1, .. },
                Expr::Injected { subquery: s2, guard: g2, .. },
            ) => s1 == s2 && g1 == g2,
            _ => true,
        };
        if !same_shape {
            return false;
        }
        let (ca, cb) = (ea.children(), eb.children());
        ca.len() == cb.len()
            && ca
                .iter()
                .zip(cb.iter())
                .all(|(&x, &y)| self.structurally_equal(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(arena: &mut ExprArena, table: usize, column: usize) -> ExprId {
        arena.alloc(Expr::Column {
            table: TableId::new(table),
            column,
        })
    }

    #[test]
    fn test_table_map_set_operations() {
        let a: TableMap = [TableId::new(0), TableId::new(3)].into_iter().collect();
        let b = TableMap::single(TableId::new(3));
        assert!(b.is_subset_of(a));
        assert!(!a.is_subset_of(b));
        assert_eq!(a.difference(b), TableMap::single(TableId::new(0)));
        assert_eq!(a.count(), 2);
        assert_eq!(
            a.iter().collect::<Vec<_>>(),
            vec![TableId::new(0), TableId::new(3)]
        );
    }

    #[test]
    fn test_conjuncts_flatten_nested_and() {
        let mut arena = ExprArena::new();
        let a = col(&mut arena, 0, 0);
        let b = col(&mut arena, 0, 1);
        let c = col(&mut arena, 1, 0);
        let inner = arena.alloc(Expr::And(smallvec::smallvec![a, b]));
        let outer = arena.alloc(Expr::And(smallvec::smallvec![inner, c]));
        assert_eq!(arena.conjuncts(outer).as_slice(), &[a, b, c]);
    }

    #[test]
    fn test_and_all_of_nothing_is_true() {
        let mut arena = ExprArena::new();
        let t = arena.and_all(&[]);
        assert!(arena.is_true_literal(t));
    }

    #[test]
    fn test_column_tables() {
        let mut arena = ExprArena::new();
        let a = col(&mut arena, 0, 0);
        let b = col(&mut arena, 2, 1);
        let cmp = arena.alloc(Expr::Compare {
            op: CompareOp::Eq,
            left: a,
            right: b,
        });
        let used = arena.column_tables(cmp);
        assert!(used.contains(TableId::new(0)));
        assert!(used.contains(TableId::new(2)));
        assert_eq!(used.count(), 2);
    }

    #[test]
    fn test_replace_is_visible_to_parents() {
        let mut arena = ExprArena::new();
        let a = col(&mut arena, 0, 0);
        let not = arena.alloc(Expr::Not(a));
        arena.replace(a, Expr::Literal(Value::Bool(true)));
        assert_eq!(arena.column_tables(not), TableMap::EMPTY);
    }

    #[test]
    fn test_random_is_not_deterministic() {
        let mut arena = ExprArena::new();
        let r = arena.alloc(Expr::Function {
            func: ScalarFunc::Random,
            args: SmallVec::new(),
        });
        let a = col(&mut arena, 0, 0);
        let sum = arena.alloc(Expr::Arith {
            op: ArithOp::Add,
            left: a,
            right: r,
        });
        assert!(!arena.is_deterministic(sum));
        assert!(arena.is_deterministic(a));
    }

    #[test]
    fn test_structural_equality() {
        let mut arena = ExprArena::new();
        let a1 = col(&mut arena, 0, 0);
        let a2 = col(&mut arena, 0, 0);
        let b = col(&mut arena, 0, 1);
        assert!(arena.structurally_equal(a1, a2));
        assert!(!arena.structurally_equal(a1, b));
    }

    #[test]
    fn test_compare_op_negate_and_swap() {
        assert_eq!(CompareOp::Lt.negate(), CompareOp::Ge);
        assert_eq!(CompareOp::Lt.swap(), CompareOp::Gt);
        assert_eq!(CompareOp::Eq.swap(), CompareOp::Eq);
        assert!(CompareOp::Le.matches(std::cmp::Ordering::Equal));
    }
}
