use num_bigint::BigInt;
use num_traits::Zero;
use std::collections::BTreeSet;

use crate::modules::types::{Sort, Term, Var};

// ** Constructors ** ------------------------------------------------------------------------------
// Each constructor folds concrete arguments so that conditions stay small when rendered.

pub fn int<T: Into<BigInt>>(n: T) -> Term {
  Term::IntLit(n.into())
}

pub fn boolean(b: bool) -> Term {
  Term::BoolLit(b)
}

pub fn var(v: &Var) -> Term {
  Term::Var(v.clone())
}

pub fn select(array: Term, index: Term) -> Term {
  Term::Select(Box::new(array), Box::new(index))
}

pub fn add(l: Term, r: Term) -> Term {
  match (l, r) {
    (Term::IntLit(a), Term::IntLit(b)) => Term::IntLit(a + b),
    (Term::IntLit(a), r) if a.is_zero() => r,
    (l, Term::IntLit(b)) if b.is_zero() => l,
    (l, r) => Term::Add(Box::new(l), Box::new(r)),
  }
}

pub fn sub(l: Term, r: Term) -> Term {
  match (l, r) {
    (Term::IntLit(a), Term::IntLit(b)) => Term::IntLit(a - b),
    (l, Term::IntLit(b)) if b.is_zero() => l,
    // (x - a) - b ==> x - (a + b)
    (Term::Sub(x, a), Term::IntLit(b)) => match *a {
      Term::IntLit(a) => sub(*x, Term::IntLit(a + b)),
      a => Term::Sub(Box::new(Term::Sub(x, Box::new(a))), Box::new(Term::IntLit(b))),
    },
    (l, r) => Term::Sub(Box::new(l), Box::new(r)),
  }
}

pub fn mul(l: Term, r: Term) -> Term {
  match (l, r) {
    (Term::IntLit(a), Term::IntLit(b)) => Term::IntLit(a * b),
    (l, r) => Term::Mul(Box::new(l), Box::new(r)),
  }
}

pub fn neg(t: Term) -> Term {
  match t {
    Term::IntLit(a) => Term::IntLit(-a),
    Term::Neg(a) => *a,
    t => Term::Neg(Box::new(t)),
  }
}

pub fn eq(l: Term, r: Term) -> Term {
  match (l, r) {
    (Term::IntLit(a), Term::IntLit(b)) => Term::BoolLit(a == b),
    (Term::BoolLit(a), Term::BoolLit(b)) => Term::BoolLit(a == b),
    (Term::BoolLit(true), t) | (t, Term::BoolLit(true)) => t,
    (Term::BoolLit(false), t) | (t, Term::BoolLit(false)) => not(t),
    (l, r) => Term::Eq(Box::new(l), Box::new(r)),
  }
}

pub fn ne(l: Term, r: Term) -> Term {
  not(eq(l, r))
}

pub fn lt(l: Term, r: Term) -> Term {
  match (l, r) {
    (Term::IntLit(a), Term::IntLit(b)) => Term::BoolLit(a < b),
    (l, r) => Term::Lt(Box::new(l), Box::new(r)),
  }
}

pub fn le(l: Term, r: Term) -> Term {
  match (l, r) {
    (Term::IntLit(a), Term::IntLit(b)) => Term::BoolLit(a <= b),
    (l, r) => Term::Le(Box::new(l), Box::new(r)),
  }
}

pub fn gt(l: Term, r: Term) -> Term {
  match (l, r) {
    (Term::IntLit(a), Term::IntLit(b)) => Term::BoolLit(a > b),
    (l, r) => Term::Gt(Box::new(l), Box::new(r)),
  }
}

pub fn ge(l: Term, r: Term) -> Term {
  match (l, r) {
    (Term::IntLit(a), Term::IntLit(b)) => Term::BoolLit(a >= b),
    (l, r) => Term::Ge(Box::new(l), Box::new(r)),
  }
}

pub fn and(terms: Vec<Term>) -> Term {
  let mut out = Vec::with_capacity(terms.len());
  for t in terms {
    match t {
      Term::BoolLit(true) => {}
      Term::BoolLit(false) => return Term::BoolLit(false),
      Term::And(inner) => out.extend(inner),
      t => out.push(t),
    }
  }
  match out.len() {
    0 => Term::BoolLit(true),
    1 => out.remove(0),
    _ => Term::And(out),
  }
}

pub fn or(terms: Vec<Term>) -> Term {
  let mut out = Vec::with_capacity(terms.len());
  for t in terms {
    match t {
      Term::BoolLit(false) => {}
      Term::BoolLit(true) => return Term::BoolLit(true),
      Term::Or(inner) => out.extend(inner),
      t => out.push(t),
    }
  }
  match out.len() {
    0 => Term::BoolLit(false),
    1 => out.remove(0),
    _ => Term::Or(out),
  }
}

pub fn not(t: Term) -> Term {
  match t {
    Term::BoolLit(b) => Term::BoolLit(!b),
    Term::Not(inner) => *inner,
    t => Term::Not(Box::new(t)),
  }
}

pub fn implies(l: Term, r: Term) -> Term {
  match (l, r) {
    (Term::BoolLit(false), _) | (_, Term::BoolLit(true)) => Term::BoolLit(true),
    (Term::BoolLit(true), r) => r,
    (l, Term::BoolLit(false)) => not(l),
    (l, r) => Term::Implies(Box::new(l), Box::new(r)),
  }
}

pub fn ite(c: Term, t: Term, e: Term) -> Term {
  match c {
    Term::BoolLit(true) => t,
    Term::BoolLit(false) => e,
    _ if t == e => t,
    c => Term::Ite(Box::new(c), Box::new(t), Box::new(e)),
  }
}

// ** Inspection ** --------------------------------------------------------------------------------

// Sort of a well-formed term. Terms are sort-checked when they are built by the loader, so the
// branch for an ill-formed `If` simply reports the sort of the then-branch.
pub fn sort_of(t: &Term) -> Sort {
  match t {
    Term::BoolLit(_) => Sort::Bool,
    Term::IntLit(_) => Sort::Int,
    Term::Var(v) => v.sort,
    Term::Select(_, _) => Sort::Int,
    Term::Add(_, _) | Term::Sub(_, _) | Term::Mul(_, _) | Term::Neg(_) => Sort::Int,
    Term::Eq(_, _) | Term::Lt(_, _) | Term::Le(_, _) | Term::Gt(_, _) | Term::Ge(_, _) => Sort::Bool,
    Term::And(_) | Term::Or(_) | Term::Not(_) | Term::Implies(_, _) => Sort::Bool,
    Term::Ite(_, a, _) => sort_of(a),
  }
}

fn children(t: &Term) -> Vec<&Term> {
  match t {
    Term::BoolLit(_) | Term::IntLit(_) | Term::Var(_) => vec![],
    Term::Neg(a) | Term::Not(a) => vec![a],
    Term::Select(a, b)
    | Term::Add(a, b)
    | Term::Sub(a, b)
    | Term::Mul(a, b)
    | Term::Eq(a, b)
    | Term::Lt(a, b)
    | Term::Le(a, b)
    | Term::Gt(a, b)
    | Term::Ge(a, b)
    | Term::Implies(a, b) => vec![a, b],
    Term::Ite(c, a, b) => vec![c, a, b],
    Term::And(ts) | Term::Or(ts) => ts.iter().collect(),
  }
}

fn visit<'a, F: FnMut(&'a Term)>(t: &'a Term, f: &mut F) {
  f(t);
  for c in children(t) {
    visit(c, f);
  }
}

pub fn free_vars(t: &Term) -> BTreeSet<Var> {
  let mut vars = BTreeSet::new();
  visit(t, &mut |t| {
    if let Term::Var(v) = t {
      vars.insert(v.clone());
    }
  });
  vars
}

// Array reads occurring in the term, in first-occurrence order and without duplicates.
pub fn select_terms(t: &Term) -> Vec<Term> {
  let mut found: Vec<Term> = vec![];
  visit(t, &mut |t| {
    if let Term::Select(_, _) = t {
      if !found.contains(t) {
        found.push(t.clone());
      }
    }
  });
  found
}
