use std::path::PathBuf;
use std::time::Duration;

use crate::modules::solvers::Solver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  pub solver: Solver,                // SMT solver: z3 (default), cvc5, or a custom binary
  pub timeout: Option<Duration>,     // Per-query timeout handed to the solver (default: 30s)
  pub jobs: usize,                   // Number of solver processes running at once (default: number of CPU cores)
  pub dump_queries: Option<PathBuf>, // Write every query to this directory as .smt2
  pub validate_models: bool,         // Re-evaluate conditions under returned counterexamples
}

impl Default for Config {
  fn default() -> Self {
    Config {
      solver: Solver::Z3,
      timeout: Some(Duration::from_secs(30)),
      jobs: num_cpus::get(),
      dump_queries: None,
      validate_models: true,
    }
  }
}
