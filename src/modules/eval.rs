use log::warn;
use num_bigint::BigInt;
use serde::Serialize;

use crate::modules::smt::{Model, Value};
use crate::modules::types::Term;

// A solver model returned for a failing check, together with the outcome of re-evaluating the
// check's formulas under it. `confirmed` is None when validation was skipped or the model lacks a
// value the formulas need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Counterexample {
  pub state: Model,
  pub confirmed: Option<bool>,
}

impl Counterexample {
  pub fn unchecked(state: Model) -> Self {
    Counterexample { state, confirmed: None }
  }

  // `holds` must all evaluate to true and `fails` must all evaluate to false.
  pub fn validated(label: &str, state: Model, holds: &[&Term], fails: &[&Term]) -> Self {
    let mut confirmed = Some(true);
    for (t, expected) in holds.iter().map(|t| (t, true)).chain(fails.iter().map(|t| (t, false))) {
      match eval_bool(t, &state) {
        Some(b) if b == expected => {}
        Some(_) => {
          confirmed = Some(false);
          break;
        }
        None => confirmed = None,
      }
    }
    if confirmed == Some(false) {
      warn!("{}: the model returned by the solver does not satisfy the query", label);
    }
    Counterexample { state, confirmed }
  }
}

// Evaluates `t` under `model`. Returns None when the term mentions a variable or an array cell the
// model does not assign, or when operand values have the wrong shape.
pub fn eval(t: &Term, model: &Model) -> Option<Value> {
  match t {
    Term::BoolLit(b) => Some(Value::Bool(*b)),
    Term::IntLit(n) => Some(Value::Int(n.clone())),
    Term::Var(v) => model.get(&v.name).cloned(),
    Term::Select(a, i) => {
      let array = match a.as_ref() {
        Term::Var(v) => &v.name,
        _ => return None,
      };
      let index = eval_int(i, model)?;
      model.read(array, &index).cloned()
    }
    Term::Add(a, b) => Some(Value::Int(eval_int(a, model)? + eval_int(b, model)?)),
    Term::Sub(a, b) => Some(Value::Int(eval_int(a, model)? - eval_int(b, model)?)),
    Term::Mul(a, b) => Some(Value::Int(eval_int(a, model)? * eval_int(b, model)?)),
    Term::Neg(a) => Some(Value::Int(-eval_int(a, model)?)),
    Term::Eq(a, b) => Some(Value::Bool(eval(a, model)? == eval(b, model)?)),
    Term::Lt(a, b) => cmp(a, b, model, |x, y| x < y),
    Term::Le(a, b) => cmp(a, b, model, |x, y| x <= y),
    Term::Gt(a, b) => cmp(a, b, model, |x, y| x > y),
    Term::Ge(a, b) => cmp(a, b, model, |x, y| x >= y),
    Term::And(ts) => {
      for t in ts {
        if !eval_bool(t, model)? {
          return Some(Value::Bool(false));
        }
      }
      Some(Value::Bool(true))
    }
    Term::Or(ts) => {
      for t in ts {
        if eval_bool(t, model)? {
          return Some(Value::Bool(true));
        }
      }
      Some(Value::Bool(false))
    }
    Term::Not(a) => Some(Value::Bool(!eval_bool(a, model)?)),
    Term::Implies(a, b) => Some(Value::Bool(!eval_bool(a, model)? || eval_bool(b, model)?)),
    Term::Ite(c, a, b) => {
      if eval_bool(c, model)? {
        eval(a, model)
      } else {
        eval(b, model)
      }
    }
  }
}

pub fn eval_bool(t: &Term, model: &Model) -> Option<bool> {
  eval(t, model)?.as_bool()
}

pub fn eval_int(t: &Term, model: &Model) -> Option<BigInt> {
  eval(t, model)?.as_int().cloned()
}

fn cmp(a: &Term, b: &Term, model: &Model, f: fn(&BigInt, &BigInt) -> bool) -> Option<Value> {
  Some(Value::Bool(f(&eval_int(a, model)?, &eval_int(b, model)?)))
}
