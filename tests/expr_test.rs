use rhospec::modules::expr::{
  add, and, boolean, eq, free_vars, gt, implies, int, ite, lt, mul, ne, neg, not, or, select_terms, sort_of, sub, var,
};
use rhospec::modules::state::StateModel;
use rhospec::modules::types::{Sort, Term, Var};

fn gas() -> Term {
  var(&Var::new("gas", Sort::Int))
}

#[test]
fn test_add_concrete() {
  assert_eq!(add(int(3), int(4)), int(7));
}

#[test]
fn test_add_symbolic() {
  assert_eq!(add(gas(), int(0)), gas());
  assert_eq!(add(gas(), int(2)), Term::Add(Box::new(gas()), Box::new(int(2))));
}

#[test]
fn test_sub_folds_nested_constants() {
  assert_eq!(sub(sub(gas(), int(1)), int(2)), Term::Sub(Box::new(gas()), Box::new(int(3))));
  assert_eq!(sub(int(0), int(5)), int(-5));
}

#[test]
fn test_mul_and_neg_concrete() {
  assert_eq!(mul(int(3), int(4)), int(12));
  assert_eq!(neg(int(4)), int(-4));
  assert_eq!(neg(neg(gas())), gas());
}

#[test]
fn test_comparisons_concrete() {
  assert_eq!(lt(int(1), int(2)), boolean(true));
  assert_eq!(gt(int(1), int(2)), boolean(false));
  assert_eq!(eq(int(1), int(1)), boolean(true));
  assert_eq!(ne(int(1), int(1)), boolean(false));
}

#[test]
fn test_and_or_identities() {
  let p = gt(gas(), int(3));
  assert_eq!(and(vec![]), boolean(true));
  assert_eq!(or(vec![]), boolean(false));
  assert_eq!(and(vec![boolean(true), p.clone()]), p);
  assert_eq!(and(vec![p.clone(), boolean(false)]), boolean(false));
  assert_eq!(or(vec![p.clone(), boolean(true)]), boolean(true));
  assert_eq!(or(vec![boolean(false), p.clone()]), p);
}

#[test]
fn test_and_flattens() {
  let a = gt(gas(), int(1));
  let b = gt(gas(), int(2));
  let c = gt(gas(), int(3));
  assert_eq!(and(vec![and(vec![a.clone(), b.clone()]), c.clone()]), Term::And(vec![a, b, c]));
}

#[test]
fn test_not_and_implies() {
  let p = gt(gas(), int(3));
  assert_eq!(not(not(p.clone())), p);
  assert_eq!(implies(boolean(false), p.clone()), boolean(true));
  assert_eq!(implies(boolean(true), p.clone()), p);
  assert_eq!(implies(p.clone(), boolean(false)), not(p));
}

#[test]
fn test_ite() {
  assert_eq!(ite(boolean(true), int(1), int(2)), int(1));
  assert_eq!(ite(gt(gas(), int(0)), int(1), int(1)), int(1));
}

#[test]
fn test_display_surface_syntax() {
  let s = StateModel::new();
  let cond = and(vec![eq(var(&s.status), int(0)), lt(var(&s.gas), int(3)), not(var(&s.read_only))]);
  assert_eq!(cond.to_string(), "And(status == 0, gas < 3, Not(readOnly))");
  assert_eq!(s.param(int(0)).to_string(), "stack[stackSize - 1]");
  assert_eq!(s.param(int(1)).to_string(), "stack[stackSize - 2]");
  assert_eq!(s.current_op().to_string(), "code_block[pc]");
  assert_eq!(eq(var(&s.gas), int(-5)).to_string(), "gas == (-5)");
  assert_eq!(mul(add(var(&s.gas), int(1)), int(2)).to_string(), "(gas + 1) * 2");
}

#[test]
fn test_sort_of() {
  let s = StateModel::new();
  assert_eq!(sort_of(&s.param(int(0))), Sort::Int);
  assert_eq!(sort_of(&var(&s.stack)), Sort::Array);
  assert_eq!(sort_of(&var(&s.read_only)), Sort::Bool);
  assert_eq!(sort_of(&ite(var(&s.read_only), int(1), var(&s.gas))), Sort::Int);
}

#[test]
fn test_free_vars_and_select_terms() {
  let s = StateModel::new();
  let cond = and(vec![gt(s.param(int(0)), int(1)), lt(s.param(int(0)), s.current_op())]);
  let names: Vec<String> = free_vars(&cond).into_iter().map(|v| v.name).collect();
  assert_eq!(names, vec!["code_block", "pc", "stack", "stackSize"]);

  let reads = select_terms(&cond);
  assert_eq!(reads, vec![s.param(int(0)), s.current_op()]);
}
