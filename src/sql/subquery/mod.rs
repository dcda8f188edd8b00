//! # Subquery Processing Module
//!
//! Classification, rewriting and execution of subquery predicates:
//! `EXISTS`, `IN`, `op ANY` / `op ALL` and scalar subqueries.
//!
//! ## Pipeline
//!
//! ```text
//! Statement (from StatementBuilder)
//!      │
//!      ▼
//! ┌────────────┐  bottom-up, once per statement (or after invalidate)
//! │ classifier │──> flatten | MinMax | derived table | IN-to-EXISTS | re-execute
//! └─────┬──────┘
//!       │ uses decorrelate + transform
//!       ▼
//! ┌────────────┐  per execution
//! │ predicate  │──> Engine: SingleBlock | SetOperation | UniqueLookup | HashMaterialization
//! └────────────┘
//! ```
//!
//! ## Strategies
//!
//! | Strategy | Example | Evaluation |
//! |----------|---------|-----------|
//! | Semijoin | `WHERE x IN (SELECT ...)` | semi-join nest in the outer block |
//! | Antijoin | `WHERE NOT EXISTS (...)` | left join nest + NULL test |
//! | MinMax | `WHERE x > ALL (SELECT ...)` | one aggregate row |
//! | DerivedTable | `SELECT (SELECT MAX(b) ... WHERE t2.a = t1.a)` | LEFT JOIN to grouped table |
//! | ExistsOrMaterialize | `SELECT x IN (SELECT ...)` | re-executed, or materialized per execution |
//! | InToExists | `WHERE x NOT IN (SELECT ... correlated)` | re-executed with pushed comparison |
//! | Reexecute | `SELECT EXISTS (...)` | re-executed |
//!
//! ## Three-Valued Logic
//!
//! IN / ANY / ALL can be UNKNOWN. Where UNKNOWN and FALSE act the same (a
//! top-level WHERE conjunct that is not inverted) the strategies may drop
//! NULL handling; everywhere else they keep it exact.

pub mod classifier;
pub mod decorrelate;
pub mod engine;
pub mod predicate;
pub mod transform;

pub use classifier::classify;
pub use decorrelate::{decorrelate, DecorrelatedPair, Decorrelation};
pub use engine::{
    Engine, EngineOutput, EngineState, EngineStats, HashMaterializationEngine, Probe,
    SetOperationEngine, SingleBlockEngine, TempTable, UniqueLookupEngine,
};
pub use predicate::{InjectedClause, Injection, Quantifier, Strategy, SubqueryKind, SubqueryPredicate};
pub use transform::strip_in_to_exists;
