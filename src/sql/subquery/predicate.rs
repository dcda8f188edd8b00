//! # Subquery Predicate Nodes
//!
//! One `SubqueryPredicate` exists per subquery occurrence in a statement.
//! The node records what the subquery is (`kind`, `negated`, the left-hand
//! operands), where it sits (`outer_block`, `slot`), how it was classified
//! (`strategy`) and owns the execution engine that produces its value.
//!
//! ## Evaluation
//!
//! ```text
//! evaluate
//! ├── killed or failed? ──> error
//! ├── cached for this execution? ──> cached value
//! └── compute
//!     ├── EXISTS        engine Probe::Exists, XOR negated
//!     ├── scalar        engine Probe::Row, NULL on no row
//!     └── IN / ANY / ALL
//!         ├── evaluate left operands, set guards, publish to LeftCache
//!         ├── MinMax    Probe::Row -> [extremum, COUNT(*), COUNT(e)]
//!         └── otherwise Probe::Match (three-valued tuple comparison)
//! ```
//!
//! `x op ALL (S)` is evaluated as `NOT (x negate(op) ANY (S))`; `NOT IN`
//! and `NOT EXISTS` invert the positive result. Every inversion is exact
//! under three-valued logic.
//!
//! The value is cached only when the left operands are constant and the
//! engine reports itself cacheable; the cache is keyed by execution epoch so
//! nothing leaks into the next execution.

use super::engine::{Engine, Probe};
use crate::sql::context::{ExecState, LeftValues};
use crate::sql::eval::eval;
use crate::sql::expr::{BlockId, CompareOp, ExprId, GuardId, SpecId, SubqueryId};
use crate::sql::statement::Statement;
use crate::types::{Tristate, Value};
use eyre::{eyre, Result};
use smallvec::SmallVec;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryKind {
    Exists,
    /// `IN`, including `= ANY` and (negated) `<> ALL`.
    In,
    Quantified {
        op: CompareOp,
        quantifier: Quantifier,
    },
    Scalar,
}

impl fmt::Display for SubqueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubqueryKind::Exists => write!(f, "EXISTS"),
            SubqueryKind::In => write!(f, "IN"),
            SubqueryKind::Quantified { op, quantifier } => {
                let q = match quantifier {
                    Quantifier::Any => "ANY",
                    Quantifier::All => "ALL",
                };
                write!(f, "{} {}", op.symbol(), q)
            }
            SubqueryKind::Scalar => write!(f, "scalar"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Unclassified,
    /// Flattened into a semi-join nest of the outer block.
    Semijoin,
    /// Flattened into a left outer join nest plus a NULL test.
    Antijoin,
    /// Projection rewritten to an extremum plus counts.
    MinMax,
    /// Replaced by a LEFT JOIN to a grouped derived table.
    DerivedTable,
    /// IN-to-EXISTS now; hash materialization may be picked per execution.
    ExistsOrMaterialize,
    /// Hash materialization chosen for the current execution.
    Materialize,
    InToExists,
    Reexecute,
}

impl Strategy {
    /// The node no longer exists as a predicate in its outer block.
    pub fn is_retired(self) -> bool {
        matches!(
            self,
            Strategy::Semijoin | Strategy::Antijoin | Strategy::DerivedTable
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Unclassified => "unclassified",
            Strategy::Semijoin => "semijoin",
            Strategy::Antijoin => "antijoin",
            Strategy::MinMax => "min_max",
            Strategy::DerivedTable => "derived_table",
            Strategy::ExistsOrMaterialize => "exists_or_materialize",
            Strategy::Materialize => "materialize",
            Strategy::InToExists => "in_to_exists",
            Strategy::Reexecute => "reexecute",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedClause {
    Where,
    Having,
}

/// Record of the comparisons pushed into the subquery by IN-to-EXISTS.
#[derive(Debug, Clone, Default)]
pub struct Injection {
    /// One entry per left operand; `Some` when the comparison is switched
    /// off while that operand is NULL.
    pub guards: SmallVec<[Option<GuardId>; 2]>,
    pub targets: SmallVec<[(BlockId, InjectedClause); 1]>,
}

#[derive(Debug, Clone)]
struct CachedValue {
    epoch: u64,
    value: Value,
}

#[derive(Debug)]
pub struct SubqueryPredicate {
    pub(crate) id: SubqueryId,
    pub(crate) kind: SubqueryKind,
    pub(crate) negated: bool,
    pub(crate) left: SmallVec<[ExprId; 2]>,
    pub(crate) spec: SpecId,
    pub(crate) outer_block: BlockId,
    /// Expression occupied by this predicate in the outer block.
    pub(crate) slot: ExprId,
    pub(crate) strategy: Strategy,
    /// Sits in a WHERE conjunct where UNKNOWN may be treated as FALSE.
    pub(crate) top_level: bool,
    pub(crate) left_is_constant: bool,
    pub(crate) engine: Option<Engine>,
    /// Engine displaced by a per-execution materialization switch.
    pub(crate) prev_engine: Option<Engine>,
    pub(crate) injection: Option<Injection>,
    cache: Option<CachedValue>,
    was_null: bool,
}

impl SubqueryPredicate {
    pub(crate) fn new(
        id: SubqueryId,
        kind: SubqueryKind,
        negated: bool,
        left: SmallVec<[ExprId; 2]>,
        spec: SpecId,
        outer_block: BlockId,
        slot: ExprId,
    ) -> Self {
        Self {
            id,
            kind,
            negated,
            left,
            spec,
            outer_block,
            slot,
            strategy: Strategy::Unclassified,
            top_level: false,
            left_is_constant: false,
            engine: None,
            prev_engine: None,
            injection: None,
            cache: None,
            was_null: false,
        }
    }

    pub fn id(&self) -> SubqueryId {
        self.id
    }

    pub fn kind(&self) -> SubqueryKind {
        self.kind
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn left(&self) -> &[ExprId] {
        &self.left
    }

    pub fn spec(&self) -> SpecId {
        self.spec
    }

    pub fn outer_block(&self) -> BlockId {
        self.outer_block
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn is_top_level(&self) -> bool {
        self.top_level
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    /// The last computed value was NULL (UNKNOWN).
    pub fn was_null(&self) -> bool {
        self.was_null
    }

    /// Positive comparison to run and whether to invert its result.
    pub fn comparison(&self) -> (CompareOp, bool) {
        match self.kind {
            SubqueryKind::Quantified {
                op,
                quantifier: Quantifier::All,
            } => (op.negate(), !self.negated),
            SubqueryKind::Quantified { op, .. } => (op, self.negated),
            _ => (CompareOp::Eq, self.negated),
        }
    }

    pub fn evaluate(&mut self, stmt: &Statement, exec: &mut ExecState<'_>) -> Result<Value> {
        exec.check_killed()?;
        if let Some(cached) = &self.cache {
            if cached.epoch == exec.epoch() {
                return Ok(cached.value.clone());
            }
        }
        match self.compute(stmt, exec) {
            Ok(value) => {
                self.was_null = value.is_null();
                let cacheable = self
                    .engine
                    .as_ref()
                    .is_some_and(|e| !e.is_uncacheable());
                if self.left_is_constant && cacheable {
                    self.cache = Some(CachedValue {
                        epoch: exec.epoch(),
                        value: value.clone(),
                    });
                }
                Ok(value)
            }
            Err(e) => {
                self.cache = None;
                exec.mark_failed();
                Err(e)
            }
        }
    }

    fn compute(&mut self, stmt: &Statement, exec: &mut ExecState<'_>) -> Result<Value> {
        let id = self.id;
        match self.kind {
            SubqueryKind::Exists => {
                let engine = self.engine_mut()?;
                let found = engine.execute(stmt, exec, Probe::Exists)?.into_exists()?;
                Ok(Value::Bool(found != self.negated))
            }
            SubqueryKind::Scalar => {
                let engine = self.engine_mut()?;
                let row = engine.execute(stmt, exec, Probe::Row)?.into_row()?;
                Ok(row
                    .and_then(|r| r.into_iter().next())
                    .unwrap_or(Value::Null))
            }
            SubqueryKind::In | SubqueryKind::Quantified { .. } => {
                let mut values = LeftValues::new();
                for &e in &self.left {
                    values.push(eval(stmt, exec, e)?);
                }
                if let Some(injection) = &self.injection {
                    for (guard, value) in injection.guards.iter().zip(&values) {
                        if let Some(g) = guard {
                            exec.set_guard(*g, !value.is_null());
                        }
                    }
                }
                exec.set_left_values(id, values.clone());

                let (op, invert) = self.comparison();
                let top_level = self.top_level;
                let minmax = self.strategy == Strategy::MinMax;
                let engine = self.engine_mut()?;
                let truth = if minmax {
                    let row = engine.execute(stmt, exec, Probe::Row)?.into_row()?;
                    let x = values.first().cloned().unwrap_or(Value::Null);
                    minmax_truth(&x, row.as_deref(), op)?
                } else {
                    let probe = Probe::Match {
                        left: &values[..],
                        op,
                        top_level,
                    };
                    engine.execute(stmt, exec, probe)?.into_truth()?
                };
                Ok(if invert { truth.not() } else { truth }.into())
            }
        }
    }

    fn engine_mut(&mut self) -> Result<&mut Engine> {
        let id = self.id;
        self.engine
            .as_mut()
            .ok_or_else(|| eyre!("{} has no execution engine", id))
    }

    /// Installs a per-execution engine, remembering the current one.
    pub(crate) fn switch_engine(&mut self, engine: Engine, strategy: Strategy) {
        self.prev_engine = self.engine.replace(engine);
        self.strategy = strategy;
    }

    /// Ends one execution: drops cached values, releases per-execution
    /// engine state and undoes a per-execution engine switch.
    pub fn cleanup(&mut self, exec: &mut ExecState<'_>) {
        self.cache = None;
        self.was_null = false;
        if let Some(engine) = self.engine.as_mut() {
            engine.cleanup(exec);
        }
        if let Some(prev) = self.prev_engine.take() {
            self.engine = Some(prev);
            self.strategy = Strategy::ExistsOrMaterialize;
            exec.set_injection_enabled(self.id, true);
        }
        if let Some(injection) = &self.injection {
            for g in injection.guards.iter().flatten() {
                exec.set_guard(*g, true);
            }
        }
    }

    pub(crate) fn clear_cache(&mut self) {
        self.cache = None;
        self.was_null = false;
    }
}

/// `x op ANY (S)` from `[extremum, COUNT(*), COUNT(e)]` of `S`.
fn minmax_truth(x: &Value, row: Option<&[Value]>, op: CompareOp) -> Result<Tristate> {
    let Some([extremum, total, non_null]) = row else {
        return Ok(Tristate::False);
    };
    let total = total.as_int().unwrap_or(0);
    let non_null = non_null.as_int().unwrap_or(0);
    if total == 0 {
        return Ok(Tristate::False);
    }
    if x.is_null() {
        return Ok(Tristate::Unknown);
    }
    if let Some(ord) = x.sql_cmp(extremum)? {
        if op.matches(ord) {
            return Ok(Tristate::True);
        }
    }
    Ok(if non_null < total {
        Tristate::Unknown
    } else {
        Tristate::False
    })
}
