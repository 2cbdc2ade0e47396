use log::info;
use serde::Serialize;

use crate::modules::abstraction::Session;
use crate::modules::config::Config;
use crate::modules::eval::Counterexample;
use crate::modules::expr::{not, or};
use crate::modules::smt::Query;
use crate::modules::solvers::{Backend, CheckSatResult, SolverGroup};
use crate::modules::types::{Rule, Term, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletenessReport {
  pub verdict: Verdict,
  pub rules: usize,
  // A valid state no rule applies to
  pub counterexample: Option<Counterexample>,
  // Why the solver could not decide
  pub reason: Option<String>,
}

impl CompletenessReport {
  pub fn is_complete(&self) -> bool {
    self.verdict == Verdict::Pass
  }
}

// Asks for a valid state outside the union of all rule conditions. An empty rule set covers
// nothing.
pub fn check_completeness<B: Backend>(
  rules: &[Rule],
  session: &Session,
  backend: &B,
  config: &Config,
) -> CompletenessReport {
  info!("Check completeness ({} rules)", rules.len());
  let valid = session.valid_state_predicate();
  let conditions: Vec<&Term> = rules.iter().map(|r| &r.condition).collect();
  let coverage = or(rules.iter().map(|r| r.condition.clone()).collect());
  let query = Query::new("completeness", vec![valid.clone(), not(coverage)]);

  let result = SolverGroup::new(backend, config).check_all(std::slice::from_ref(&query)).pop();

  let (verdict, counterexample, reason) = match result {
    Some(Ok(CheckSatResult::Unsat)) => (Verdict::Pass, None, None),
    Some(Ok(CheckSatResult::Sat(model))) => {
      let cex = if config.validate_models {
        Counterexample::validated(&query.label, model, &[&valid], &conditions)
      } else {
        Counterexample::unchecked(model)
      };
      (Verdict::Fail, Some(cex), None)
    }
    Some(Ok(CheckSatResult::Unknown(reason))) => (Verdict::Indeterminate, None, Some(reason)),
    Some(Err(e)) => (Verdict::Indeterminate, None, Some(e.to_string())),
    None => (Verdict::Indeterminate, None, Some("no result from solver pool".to_string())),
  };

  info!("Completeness: {}", verdict);
  CompletenessReport { verdict, rules: rules.len(), counterexample, reason }
}
