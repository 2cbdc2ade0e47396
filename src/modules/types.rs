use num_bigint::BigInt;
use num_traits::Signed;
use serde::Serialize;
use std::fmt;

use crate::modules::effects::Effect;

// Sorts ------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sort {
  Bool,
  Int,
  // Arrays are always indexed by integers and hold integers
  Array,
}

impl fmt::Display for Sort {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Sort::Bool => write!(f, "Bool"),
      Sort::Int => write!(f, "Int"),
      Sort::Array => write!(f, "(Array Int Int)"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var {
  pub name: String,
  pub sort: Sort,
}

impl Var {
  pub fn new(name: &str, sort: Sort) -> Self {
    Var { name: name.to_string(), sort }
  }
}

// Symbolic IR -------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
  BoolLit(bool),
  IntLit(BigInt),
  Var(Var),

  // Arrays
  Select(Box<Term>, Box<Term>),

  // Integers
  Add(Box<Term>, Box<Term>),
  Sub(Box<Term>, Box<Term>),
  Mul(Box<Term>, Box<Term>),
  Neg(Box<Term>),

  // Comparisons
  Eq(Box<Term>, Box<Term>),
  Lt(Box<Term>, Box<Term>),
  Le(Box<Term>, Box<Term>),
  Gt(Box<Term>, Box<Term>),
  Ge(Box<Term>, Box<Term>),

  // Booleans
  And(Vec<Term>),
  Or(Vec<Term>),
  Not(Box<Term>),
  Implies(Box<Term>, Box<Term>),
  Ite(Box<Term>, Box<Term>, Box<Term>),
}

impl Term {
  pub fn is_atomic(&self) -> bool {
    matches!(self, Term::BoolLit(_) | Term::IntLit(_) | Term::Var(_) | Term::Select(_, _))
  }
}

fn fmt_operand(f: &mut fmt::Formatter<'_>, t: &Term) -> fmt::Result {
  match t {
    Term::IntLit(n) if n.is_negative() => write!(f, "({})", t),
    _ if t.is_atomic() => write!(f, "{}", t),
    Term::And(_) | Term::Or(_) | Term::Not(_) | Term::Implies(_, _) | Term::Ite(_, _, _) => write!(f, "{}", t),
    _ => write!(f, "({})", t),
  }
}

fn fmt_infix(f: &mut fmt::Formatter<'_>, op: &str, a: &Term, b: &Term) -> fmt::Result {
  fmt_operand(f, a)?;
  write!(f, " {} ", op)?;
  fmt_operand(f, b)
}

fn fmt_call(f: &mut fmt::Formatter<'_>, name: &str, args: &[&Term]) -> fmt::Result {
  write!(f, "{}(", name)?;
  for (i, a) in args.iter().enumerate() {
    if i > 0 {
      write!(f, ", ")?;
    }
    write!(f, "{}", a)?;
  }
  write!(f, ")")
}

// Renders terms in the surface syntax of the rule files. The rendering doubles as the
// canonical key of abstraction facts, so it must stay deterministic.
impl fmt::Display for Term {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Term::BoolLit(true) => write!(f, "True"),
      Term::BoolLit(false) => write!(f, "False"),
      Term::IntLit(n) => write!(f, "{}", n),
      Term::Var(v) => write!(f, "{}", v.name),
      Term::Select(a, i) => write!(f, "{}[{}]", a, i),
      Term::Add(a, b) => fmt_infix(f, "+", a, b),
      Term::Sub(a, b) => fmt_infix(f, "-", a, b),
      Term::Mul(a, b) => fmt_infix(f, "*", a, b),
      Term::Neg(a) => {
        write!(f, "-")?;
        fmt_operand(f, a)
      }
      Term::Eq(a, b) => fmt_infix(f, "==", a, b),
      Term::Lt(a, b) => fmt_infix(f, "<", a, b),
      Term::Le(a, b) => fmt_infix(f, "<=", a, b),
      Term::Gt(a, b) => fmt_infix(f, ">", a, b),
      Term::Ge(a, b) => fmt_infix(f, ">=", a, b),
      Term::And(ts) => fmt_call(f, "And", &ts.iter().collect::<Vec<_>>()),
      Term::Or(ts) => fmt_call(f, "Or", &ts.iter().collect::<Vec<_>>()),
      Term::Not(a) => fmt_call(f, "Not", &[a.as_ref()]),
      Term::Implies(a, b) => fmt_call(f, "Implies", &[a.as_ref(), b.as_ref()]),
      Term::Ite(c, a, b) => fmt_call(f, "If", &[c.as_ref(), a.as_ref(), b.as_ref()]),
    }
  }
}

// Rules -------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
  pub name: String,
  pub condition: Term,
  pub effect: Effect,
}

impl Rule {
  pub fn new(name: &str, condition: Term, effect: Effect) -> Self {
    Rule { name: name.to_string(), condition, effect }
  }
}

// Verdicts ----------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
  Pass,
  Fail,
  // At least one query came back unknown and none failed
  Indeterminate,
}

impl Verdict {
  pub fn from_counts(failures: usize, unresolved: usize) -> Self {
    if failures > 0 {
      Verdict::Fail
    } else if unresolved > 0 {
      Verdict::Indeterminate
    } else {
      Verdict::Pass
    }
  }
}

impl fmt::Display for Verdict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Verdict::Pass => write!(f, "pass"),
      Verdict::Fail => write!(f, "fail"),
      Verdict::Indeterminate => write!(f, "indeterminate"),
    }
  }
}
