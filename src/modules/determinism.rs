use log::{debug, info};
use serde::Serialize;

use crate::modules::abstraction::Session;
use crate::modules::config::Config;
use crate::modules::effects::Effect;
use crate::modules::eval::Counterexample;
use crate::modules::smt::Query;
use crate::modules::solvers::{Backend, CheckSatResult, SolverGroup};
use crate::modules::types::{Rule, Verdict};

// Two rules with different effects that can fire in the same valid state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Overlap {
  pub first: String,
  pub second: String,
  pub first_effect: Effect,
  pub second_effect: Effect,
  pub first_condition: String,
  pub second_condition: String,
  pub counterexample: Counterexample,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unresolved {
  pub first: String,
  pub second: String,
  pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeterminismReport {
  pub verdict: Verdict,
  pub rules: usize,
  pub pairs_checked: usize,
  pub pairs_skipped: usize,
  pub overlaps: Vec<Overlap>,
  pub unresolved: Vec<Unresolved>,
}

impl DeterminismReport {
  pub fn is_deterministic(&self) -> bool {
    self.verdict == Verdict::Pass
  }
}

// Checks every pair of rules with different effects for a common valid state. Pairs are
// enumerated as (i, j) with j < i, in rule order.
pub fn check_determinism<B: Backend>(
  rules: &[Rule],
  session: &Session,
  backend: &B,
  config: &Config,
) -> DeterminismReport {
  info!("Check determinism ({} rules)", rules.len());
  let valid = session.valid_state_predicate();

  let mut pairs = vec![];
  let mut queries = vec![];
  let mut pairs_skipped = 0;
  for (i, a) in rules.iter().enumerate() {
    for b in &rules[..i] {
      if a.effect == b.effect {
        pairs_skipped += 1;
        continue;
      }
      debug!("=> Check rules {} and {}", a.name, b.name);
      let label = format!("{}__{}", a.name, b.name);
      queries.push(Query::new(&label, vec![valid.clone(), a.condition.clone(), b.condition.clone()]));
      pairs.push((a, b));
    }
  }
  info!("{} pairs to check, {} skipped with equal effects", queries.len(), pairs_skipped);

  let results = SolverGroup::new(backend, config).check_all(&queries);

  let mut overlaps = vec![];
  let mut unresolved = vec![];
  for (((a, b), query), result) in pairs.iter().zip(&queries).zip(results) {
    match result {
      Ok(CheckSatResult::Unsat) => {}
      Ok(CheckSatResult::Sat(model)) => {
        let counterexample = if config.validate_models {
          Counterexample::validated(&query.label, model, &[&valid, &a.condition, &b.condition], &[])
        } else {
          Counterexample::unchecked(model)
        };
        overlaps.push(Overlap {
          first: a.name.clone(),
          second: b.name.clone(),
          first_effect: a.effect.clone(),
          second_effect: b.effect.clone(),
          first_condition: a.condition.to_string(),
          second_condition: b.condition.to_string(),
          counterexample,
        });
      }
      Ok(CheckSatResult::Unknown(reason)) => {
        unresolved.push(Unresolved { first: a.name.clone(), second: b.name.clone(), reason })
      }
      Err(e) => unresolved.push(Unresolved { first: a.name.clone(), second: b.name.clone(), reason: e.to_string() }),
    }
  }

  let verdict = Verdict::from_counts(overlaps.len(), unresolved.len());
  info!("Determinism: {} ({} overlaps, {} unresolved)", verdict, overlaps.len(), unresolved.len());
  DeterminismReport { verdict, rules: rules.len(), pairs_checked: queries.len(), pairs_skipped, overlaps, unresolved }
}
