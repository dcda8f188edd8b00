//! # Expression Evaluator
//!
//! Evaluates arena expressions against the rows currently bound to table
//! slots in an `ExecState`. Predicates follow SQL three-valued logic:
//!
//! ```text
//! AND     | TRUE    FALSE  UNKNOWN      OR      | TRUE  FALSE    UNKNOWN
//! TRUE    | TRUE    FALSE  UNKNOWN      TRUE    | TRUE  TRUE     TRUE
//! FALSE   | FALSE   FALSE  FALSE        FALSE   | TRUE  FALSE    UNKNOWN
//! UNKNOWN | UNKNOWN FALSE  UNKNOWN      UNKNOWN | TRUE  UNKNOWN  UNKNOWN
//! ```
//!
//! AND stops at the first FALSE and OR at the first TRUE, so a subquery
//! operand after a deciding conjunct is never executed.
//!
//! Subquery nodes are evaluated by borrowing their `RefCell` for the duration
//! of the call; a node that is asked for its own value while computing it
//! yields an error.

use super::context::ExecState;
use super::expr::{ArithOp, Expr, ExprId, ScalarFunc};
use super::statement::Statement;
use crate::types::{Tristate, Value};
use eyre::{bail, eyre, Result};

pub fn eval(stmt: &Statement, exec: &mut ExecState<'_>, id: ExprId) -> Result<Value> {
    match stmt.expr(id) {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Column { table, column } => match exec.slot(*table) {
            None => Ok(Value::Null),
            Some(row) => row.get(*column).cloned().ok_or_else(|| {
                eyre!(
                    "column {} out of range for table '{}'",
                    column,
                    stmt.table(*table).alias
                )
            }),
        },
        Expr::NullIndicator { table } => Ok(match exec.slot(*table) {
            Some(_) => Value::Int(1),
            None => Value::Null,
        }),
        Expr::Compare { op, left, right } => {
            let (op, left, right) = (*op, *left, *right);
            let l = eval(stmt, exec, left)?;
            let r = eval(stmt, exec, right)?;
            Ok(match l.sql_cmp(&r)? {
                None => Value::Null,
                Some(ord) => Value::Bool(op.matches(ord)),
            })
        }
        Expr::And(items) => {
            let mut result = Tristate::True;
            for &item in items {
                let t = eval_truth(stmt, exec, item)?;
                if t.is_false() {
                    return Ok(Value::Bool(false));
                }
                result = result.and(t);
            }
            Ok(result.into())
        }
        Expr::Or(items) => {
            let mut result = Tristate::False;
            for &item in items {
                let t = eval_truth(stmt, exec, item)?;
                if t.is_true() {
                    return Ok(Value::Bool(true));
                }
                result = result.or(t);
            }
            Ok(result.into())
        }
        Expr::Not(e) => Ok(eval_truth(stmt, exec, *e)?.not().into()),
        Expr::IsNull { expr, negated } => {
            let negated = *negated;
            Ok(Value::Bool(eval(stmt, exec, *expr)?.is_null() != negated))
        }
        Expr::IsNotFalse(e) => Ok(eval_truth(stmt, exec, *e)?.is_not_false().into()),
        Expr::Arith { op, left, right } => {
            let (op, left, right) = (*op, *left, *right);
            let l = eval(stmt, exec, left)?;
            let r = eval(stmt, exec, right)?;
            arith(op, &l, &r)
        }
        Expr::Function { func, args } => {
            let func = *func;
            let args = args.clone();
            match func {
                ScalarFunc::Coalesce => {
                    for arg in args {
                        let v = eval(stmt, exec, arg)?;
                        if !v.is_null() {
                            return Ok(v);
                        }
                    }
                    Ok(Value::Null)
                }
                ScalarFunc::Abs => {
                    let Some(&arg) = args.first() else {
                        bail!("ABS expects one argument");
                    };
                    match eval(stmt, exec, arg)? {
                        Value::Null => Ok(Value::Null),
                        Value::Int(i) => i
                            .checked_abs()
                            .map(Value::Int)
                            .ok_or_else(|| eyre!("integer overflow in ABS")),
                        Value::Float(f) => Ok(Value::Float(f.abs())),
                        other => bail!("ABS is not defined for {}", other.type_name()),
                    }
                }
                ScalarFunc::Random => Ok(Value::Float(random())),
            }
        }
        Expr::Aggregate { .. } => exec
            .aggregate_value(id)
            .cloned()
            .ok_or_else(|| eyre!("aggregate evaluated outside of a grouping context")),
        Expr::WindowCount { .. } => {
            bail!("window function is only allowed as a projection item")
        }
        Expr::Subquery(sid) => {
            let sid = *sid;
            let mut node = stmt
                .subquery(sid)
                .try_borrow_mut()
                .map_err(|_| eyre!("{} is evaluated recursively", sid))?;
            node.evaluate(stmt, exec)
        }
        Expr::LeftCache { subquery, index } => exec.left_value(*subquery, *index).cloned(),
        Expr::Injected {
            subquery,
            guard,
            expr,
        } => {
            let enabled =
                exec.injection_enabled(*subquery) && guard.map_or(true, |g| exec.guard(g));
            if !enabled {
                return Ok(Value::Bool(true));
            }
            eval(stmt, exec, *expr)
        }
        Expr::CardinalityCheck { count, value } => {
            let (count, value) = (*count, *value);
            if eval(stmt, exec, count)?.as_int().unwrap_or(0) > 1 {
                bail!("subquery returns more than one row");
            }
            eval(stmt, exec, value)
        }
    }
}

pub fn eval_truth(stmt: &Statement, exec: &mut ExecState<'_>, id: ExprId) -> Result<Tristate> {
    eval(stmt, exec, id)?.truth()
}

pub(crate) fn arith(op: ArithOp, l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| eyre!("integer overflow"))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let to_f = |v: &Value| match v {
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                _ => 0.0,
            };
            let (a, b) = (to_f(l), to_f(r));
            Ok(Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
            }))
        }
        _ => bail!(
            "arithmetic is not defined for {} and {}",
            l.type_name(),
            r.type_name()
        ),
    }
}

fn random() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0) as u64;
    let mut state = nanos | 1;
    state ^= state >> 12;
    state ^= state << 25;
    state ^= state >> 27;
    (state.wrapping_mul(0x2545F4914F6CDD1D) as f64) / (u64::MAX as f64)
}
