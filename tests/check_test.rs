use num_bigint::BigInt;
use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Mutex;

use rhospec::modules::abstraction::Session;
use rhospec::modules::completeness::check_completeness;
use rhospec::modules::config::Config;
use rhospec::modules::determinism::check_determinism;
use rhospec::modules::eval::Counterexample;
use rhospec::modules::expr::{boolean, not, or};
use rhospec::modules::loader::load_rules;
use rhospec::modules::smt::{Model, Query, Value};
use rhospec::modules::solvers::{Backend, CheckSatResult, ProcessSolver, Solver, SolverError};
use rhospec::modules::state::StateModel;
use rhospec::modules::types::{Rule, Verdict};

// Answers queries through a closure and records every query it sees.
struct ScriptedBackend<F> {
  answer: F,
  calls: Mutex<Vec<Query>>,
}

impl<F: Fn(&Query) -> Result<CheckSatResult, SolverError> + Sync> ScriptedBackend<F> {
  fn new(answer: F) -> Self {
    ScriptedBackend { answer, calls: Mutex::new(vec![]) }
  }

  fn labels(&self) -> Vec<String> {
    let mut labels: Vec<String> = self.calls.lock().unwrap().iter().map(|q| q.label.clone()).collect();
    labels.sort();
    labels
  }
}

impl<F: Fn(&Query) -> Result<CheckSatResult, SolverError> + Sync> Backend for ScriptedBackend<F> {
  fn check_sat(&self, query: &Query) -> Result<CheckSatResult, SolverError> {
    self.calls.lock().unwrap().push(query.clone());
    (self.answer)(query)
  }
}

fn config() -> Config {
  Config { jobs: 2, ..Config::default() }
}

fn load(text: &str) -> (Session, Vec<Rule>) {
  let mut session = Session::new(StateModel::new());
  let rules = load_rules(text, &mut session).unwrap();
  (session, rules)
}

fn int(n: i64) -> Value {
  Value::Int(BigInt::from(n))
}

// A state satisfying the base valid-state invariants
fn valid_model(gas: i64) -> Model {
  let mut values = BTreeMap::new();
  values.insert("revision".to_string(), int(0));
  values.insert("status".to_string(), int(0));
  values.insert("pc".to_string(), int(0));
  values.insert("gas".to_string(), int(gas));
  values.insert("stackSize".to_string(), int(0));
  let mut code = BTreeMap::new();
  code.insert(BigInt::from(0), int(1));
  let mut arrays = BTreeMap::new();
  arrays.insert("code_block".to_string(), code);
  Model { values, arrays }
}

const THREE_RULES: &str = r#"[("r0", gas > 1, "a"), ("r1", gas > 2, "b"), ("r2", gas > 3, "c")]"#;

#[test]
fn test_all_pairs_with_distinct_effects_are_checked() {
  let (session, rules) = load(THREE_RULES);
  let backend = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Unsat));
  let report = check_determinism(&rules, &session, &backend, &config());

  assert_eq!(backend.labels(), vec!["r1__r0", "r2__r0", "r2__r1"]);
  assert_eq!(report.pairs_checked, 3);
  assert_eq!(report.pairs_skipped, 0);
  assert_eq!(report.verdict, Verdict::Pass);
  assert!(report.is_deterministic());
}

#[test]
fn test_pairs_with_equal_effects_are_skipped() {
  let (session, rules) = load(r#"[("r0", True, "a"), ("r1", True, "a"), ("r2", gas > 3, "c")]"#);
  let backend = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Unsat));
  let report = check_determinism(&rules, &session, &backend, &config());

  assert_eq!(backend.labels(), vec!["r2__r0", "r2__r1"]);
  assert_eq!(report.pairs_checked, 2);
  assert_eq!(report.pairs_skipped, 1);
  assert!(report.is_deterministic());
}

#[test]
fn test_differently_spelled_effects_are_checked() {
  for (x, y) in [("fail", "failEffect"), ("", "noEffect"), ("NoEffect", "noEffect"), ("add", " add")] {
    let (session, rules) = load(&format!(r#"[("a", True, "{}"), ("b", True, "{}")]"#, x, y));
    let backend = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Sat(valid_model(1))));
    let report = check_determinism(&rules, &session, &backend, &config());
    assert_eq!((report.pairs_checked, report.pairs_skipped), (1, 0), "{:?} vs {:?}", x, y);
    assert_eq!(report.verdict, Verdict::Fail, "{:?} vs {:?}", x, y);
  }
}

#[test]
fn test_determinism_query_shape() {
  let (session, rules) = load(r#"[("r0", gas > 1, "a"), ("r1", readOnly, "b")]"#);
  let backend = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Unsat));
  check_determinism(&rules, &session, &backend, &config());

  let calls = backend.calls.lock().unwrap();
  assert_eq!(calls.len(), 1);
  assert_eq!(calls[0].assertions, vec![session.valid_state_predicate(), rules[1].condition.clone(), rules[0].condition.clone()]);
}

#[test]
fn test_overlap_is_reported_and_checking_continues() {
  let (session, rules) = load(THREE_RULES);
  let backend = ScriptedBackend::new(|q: &Query| {
    if q.label == "r2__r0" {
      Ok(CheckSatResult::Sat(valid_model(10)))
    } else {
      Ok(CheckSatResult::Unsat)
    }
  });
  let report = check_determinism(&rules, &session, &backend, &config());

  assert_eq!(report.verdict, Verdict::Fail);
  assert_eq!(report.pairs_checked, 3);
  assert_eq!(report.overlaps.len(), 1);
  let overlap = &report.overlaps[0];
  assert_eq!((overlap.first.as_str(), overlap.second.as_str()), ("r2", "r0"));
  assert_eq!(overlap.first_condition, "gas > 3");
  assert_eq!(overlap.counterexample.confirmed, Some(true));
}

#[test]
fn test_bogus_model_is_not_confirmed() {
  let (session, rules) = load(THREE_RULES);
  let backend = ScriptedBackend::new(|q: &Query| {
    if q.label == "r1__r0" {
      Ok(CheckSatResult::Sat(valid_model(0)))
    } else {
      Ok(CheckSatResult::Unsat)
    }
  });
  let report = check_determinism(&rules, &session, &backend, &config());
  assert_eq!(report.overlaps[0].counterexample.confirmed, Some(false));

  let no_validation = Config { validate_models: false, ..config() };
  let report = check_determinism(&rules, &session, &backend, &no_validation);
  assert_eq!(report.overlaps[0].counterexample.confirmed, None);
}

#[test]
fn test_unknown_is_never_a_pass() {
  let (session, rules) = load(THREE_RULES);
  let backend = ScriptedBackend::new(|q: &Query| match q.label.as_str() {
    "r1__r0" => Ok(CheckSatResult::Unknown("timeout".to_string())),
    "r2__r0" => Err(SolverError::CommandError("boom".to_string())),
    _ => Ok(CheckSatResult::Unsat),
  });
  let report = check_determinism(&rules, &session, &backend, &config());

  assert_eq!(report.verdict, Verdict::Indeterminate);
  assert!(!report.is_deterministic());
  assert_eq!(report.unresolved.len(), 2);
  assert_eq!(report.unresolved[0].reason, "timeout");
  assert!(report.unresolved[1].reason.contains("boom"));
}

#[test]
fn test_overlap_wins_over_unknown() {
  let (session, rules) = load(THREE_RULES);
  let backend = ScriptedBackend::new(|q: &Query| match q.label.as_str() {
    "r1__r0" => Ok(CheckSatResult::Unknown("timeout".to_string())),
    "r2__r1" => Ok(CheckSatResult::Sat(Model::default())),
    _ => Ok(CheckSatResult::Unsat),
  });
  let report = check_determinism(&rules, &session, &backend, &config());
  assert_eq!(report.verdict, Verdict::Fail);
  assert_eq!(report.overlaps.len(), 1);
  assert_eq!(report.unresolved.len(), 1);
}

#[test]
fn test_empty_rule_set() {
  let (session, rules) = load("[]");
  let backend = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Sat(valid_model(1))));

  let det = check_determinism(&rules, &session, &backend, &config());
  assert_eq!(det.verdict, Verdict::Pass);
  assert_eq!(det.pairs_checked, 0);
  assert!(backend.labels().is_empty());

  let comp = check_completeness(&rules, &session, &backend, &config());
  assert_eq!(comp.verdict, Verdict::Fail);
  assert!(!comp.is_complete());
  let calls = backend.calls.lock().unwrap();
  // Not(False) folds away, leaving only the valid-state predicate
  assert_eq!(calls[0].assertions, vec![session.valid_state_predicate(), boolean(true)]);
}

#[test]
fn test_completeness_outcomes() {
  let (session, rules) = load(r#"[("low", gas < 5, "a"), ("high", gas >= 5, "b")]"#);

  let unsat = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Unsat));
  let report = check_completeness(&rules, &session, &unsat, &config());
  assert!(report.is_complete());
  assert_eq!(report.counterexample, None);

  let unknown = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Unknown("timeout".to_string())));
  let report = check_completeness(&rules, &session, &unknown, &config());
  assert_eq!(report.verdict, Verdict::Indeterminate);
  assert_eq!(report.reason.as_deref(), Some("timeout"));

  let failing = ScriptedBackend::new(|_: &Query| Err(SolverError::NoResponse(String::new())));
  let report = check_completeness(&rules, &session, &failing, &config());
  assert_eq!(report.verdict, Verdict::Indeterminate);
}

#[test]
fn test_completeness_counterexample_falsifies_every_condition() {
  let (session, rules) = load(r#"[("low", gas < 5, "a"), ("mid", gas == 7, "b")]"#);
  let backend = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Sat(valid_model(6))));
  let report = check_completeness(&rules, &session, &backend, &config());
  assert_eq!(report.verdict, Verdict::Fail);
  assert_eq!(report.counterexample.map(|c| c.confirmed), Some(Some(true)));

  // gas == 7 is covered, so this model is not a gap
  let backend = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Sat(valid_model(7))));
  let report = check_completeness(&rules, &session, &backend, &config());
  assert_eq!(report.counterexample.map(|c| c.confirmed), Some(Some(false)));
}

#[test]
fn test_covering_the_gap_keeps_the_set_complete() {
  let (session, rules) = load(r#"[("low", gas < 5, "a")]"#);
  let gap = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Sat(valid_model(6))));
  let report = check_completeness(&rules, &session, &gap, &config());
  assert_eq!(report.verdict, Verdict::Fail);
  assert_eq!(report.counterexample.map(|c| c.confirmed), Some(Some(true)));

  let (session, extended) = load(r#"[("low", gas < 5, "a"), ("high", gas >= 5, "b")]"#);
  let unsat = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Unsat));
  let report = check_completeness(&extended, &session, &unsat, &config());
  assert!(report.is_complete());
  let coverage = or(vec![extended[0].condition.clone(), extended[1].condition.clone()]);
  assert_eq!(unsat.calls.lock().unwrap()[0].assertions[1], not(coverage));

  // the old gap now falls under `high`
  let valid = session.valid_state_predicate();
  let cex = Counterexample::validated("gap", valid_model(6), &[&valid], &[&extended[0].condition, &extended[1].condition]);
  assert_eq!(cex.confirmed, Some(false));

  let stale = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Sat(valid_model(6))));
  let report = check_completeness(&extended, &session, &stale, &config());
  assert_eq!(report.counterexample.map(|c| c.confirmed), Some(Some(false)));
}

#[test]
fn test_fresh_sessions_yield_identical_queries() {
  let text = r#"[("a", account_cold(param(0)), "x"), ("b", And(account_warm(param(0)), balance(self) > 3), "y")]"#;
  let run = || {
    let (session, rules) = load(text);
    let backend = ScriptedBackend::new(|_: &Query| Ok(CheckSatResult::Unsat));
    let det = check_determinism(&rules, &session, &backend, &config());
    let comp = check_completeness(&rules, &session, &backend, &config());
    let mut scripts: Vec<String> = backend.calls.lock().unwrap().iter().map(|q| q.to_smt2().to_string()).collect();
    scripts.sort();
    (scripts, det.verdict, comp.verdict)
  };
  assert_eq!(run(), run());
}

// ** Against z3 ** --------------------------------------------------------------------------------

fn z3() -> Option<ProcessSolver> {
  match Command::new("z3").arg("-version").output() {
    Ok(out) if out.status.success() => Some(ProcessSolver::new(Solver::Z3, Some(std::time::Duration::from_secs(30)))),
    _ => {
      eprintln!("z3 is not on PATH, skipping solver scenario");
      None
    }
  }
}

#[test]
fn test_z3_disjoint_rules_are_deterministic() {
  let Some(z3) = z3() else { return };
  let (session, rules) = load(
    r#"[
      ("add_regular", And(status == running, code(pc) == ADD, stackSize >= 2, gas >= 3), "add"),
      ("add_underflow", And(status == running, code(pc) == ADD, stackSize < 2), "fail"),
      ("add_out_of_gas", And(status == running, code(pc) == ADD, stackSize >= 2, gas < 3), "fail"),
    ]"#,
  );
  let report = check_determinism(&rules, &session, &z3, &config());
  assert_eq!(report.verdict, Verdict::Pass);
  assert_eq!(report.pairs_checked, 2);
  assert_eq!(report.pairs_skipped, 1);
}

#[test]
fn test_z3_overlapping_rules() {
  let Some(z3) = z3() else { return };
  let (session, rules) = load(r#"[("mul_low_gas", True, "fail"), ("mul_revert", True, "revert")]"#);
  let report = check_determinism(&rules, &session, &z3, &config());
  assert_eq!(report.verdict, Verdict::Fail);
  assert_eq!(report.overlaps.len(), 1);
  assert_eq!(report.overlaps[0].counterexample.confirmed, Some(true));
}

#[test]
fn test_z3_running_only_is_incomplete() {
  let Some(z3) = z3() else { return };
  let (session, rules) = load(r#"[("running", status == running, "a")]"#);
  let report = check_completeness(&rules, &session, &z3, &config());
  assert_eq!(report.verdict, Verdict::Fail);
  let cex = report.counterexample.unwrap();
  assert_eq!(cex.confirmed, Some(true));
  assert_ne!(cex.state.get("status"), Some(&int(0)));
}

#[test]
fn test_z3_full_status_coverage_is_complete() {
  let Some(z3) = z3() else { return };
  let (session, rules) =
    load(r#"[("running", status == running, "a"), ("halted", status != running, "b")]"#);
  let report = check_completeness(&rules, &session, &z3, &config());
  assert_eq!(report.verdict, Verdict::Pass);
}

#[test]
fn test_z3_empty_rule_set() {
  let Some(z3) = z3() else { return };
  let (session, rules) = load("[]");
  assert!(check_determinism(&rules, &session, &z3, &config()).is_deterministic());
  assert_eq!(check_completeness(&rules, &session, &z3, &config()).verdict, Verdict::Fail);
}

#[test]
fn test_z3_abstract_facts() {
  let Some(z3) = z3() else { return };
  let (session, rules) = load(
    r#"[
      ("sload_cold", And(status == running, code(pc) == SLOAD, storage_cold(param(0))), "cold"),
      ("sload_warm", And(status == running, code(pc) == SLOAD, storage_warm(param(0))), "warm"),
      ("deleg_cold", And(status == running, code(pc) == CALL, ColdDelegationDesignation(param(1))), "dc"),
      ("deleg_warm", And(status == running, code(pc) == CALL, WarmDelegationDesignation(param(1))), "dw"),
    ]"#,
  );
  let report = check_determinism(&rules, &session, &z3, &config());
  assert_eq!(report.verdict, Verdict::Pass);
}
