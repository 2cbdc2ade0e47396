use getopts::Options;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::modules::config::Config;
use crate::modules::solvers::Solver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Determinism,
  Completeness,
  Both,
}

impl Mode {
  pub fn determinism(self) -> bool {
    matches!(self, Mode::Determinism | Mode::Both)
  }

  pub fn completeness(self) -> bool {
    matches!(self, Mode::Completeness | Mode::Both)
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
  #[error("{0}")]
  Options(String),

  #[error("expect a rule file (and type check [determinism|completeness]) as arguments")]
  MissingRuleFile,

  #[error("unknown type check `{0}`")]
  UnknownMode(String),

  #[error("too many arguments: {0}")]
  TooManyArguments(String),

  #[error("invalid value `{value}` for --{option}")]
  InvalidValue { option: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCommand {
  pub rule_file: PathBuf,
  pub mode: Mode,
  pub solver: Solver,                // SMT solver: z3 (default), cvc5, or a custom command
  pub timeout: Option<u64>,          // Per-query timeout in seconds, None disables it (default: 30)
  pub jobs: Option<usize>,           // Number of solver processes (default: number of CPU cores)
  pub filter: Option<String>,        // Only check rules whose name matches this regex
  pub dump_queries: Option<PathBuf>, // Write queries to this directory
  pub json: bool,                    // Print reports as JSON
  pub validate: bool,                // Re-evaluate conditions under counterexamples
  pub list: bool,                    // Print the loaded rules and exit
  pub verbose_level: Option<String>, // Log level
  pub help: bool,
}

impl Default for CheckCommand {
  fn default() -> Self {
    CheckCommand {
      rule_file: PathBuf::new(),
      mode: Mode::Both,
      solver: Solver::Z3,
      timeout: Some(30),
      jobs: None,
      filter: None,
      dump_queries: None,
      json: false,
      validate: true,
      list: false,
      verbose_level: None,
      help: false,
    }
  }
}

impl CheckCommand {
  pub fn config(&self) -> Config {
    Config {
      solver: self.solver.clone(),
      timeout: self.timeout.map(Duration::from_secs),
      jobs: self.jobs.unwrap_or_else(num_cpus::get),
      dump_queries: self.dump_queries.clone(),
      validate_models: self.validate,
    }
  }
}

pub fn options() -> Options {
  let mut opts = Options::new();
  opts.optopt("s", "solver", "SMT solver: z3 (default), cvc5, or a solver command", "NAME");
  opts.optopt("t", "timeout", "per-query timeout in seconds, 0 disables it (default: 30)", "SECS");
  opts.optopt("j", "jobs", "number of solver processes (default: number of CPU cores)", "N");
  opts.optopt("f", "filter", "only check rules whose name matches REGEX", "REGEX");
  opts.optopt("d", "dump", "write every query to DIR as .smt2", "DIR");
  opts.optflag("", "json", "print reports as JSON");
  opts.optflag("", "no-validate", "do not re-evaluate counterexamples");
  opts.optflag("l", "list", "list the loaded rules and exit");
  opts.optopt("v", "verbose", "level of verbose", "LEVEL");
  opts.optflag("h", "help", "print this help menu");
  opts
}

pub fn usage(program: &str) -> String {
  let brief = format!("Usage: {} RULE_FILE [determinism|completeness] [options]", program);
  options().usage(&brief)
}

// `args` excludes the program name
pub fn parse_args(args: &[String]) -> Result<CheckCommand, CliError> {
  let matches = options().parse(args).map_err(|f| CliError::Options(f.to_string()))?;
  let mut cmd = CheckCommand::default();

  if matches.opt_present("h") {
    cmd.help = true;
    return Ok(cmd);
  }

  cmd.rule_file = match matches.free.first() {
    Some(f) => PathBuf::from(f),
    None => return Err(CliError::MissingRuleFile),
  };
  cmd.mode = match matches.free.get(1).map(|s| s.as_str()) {
    None => Mode::Both,
    Some("determinism") => Mode::Determinism,
    Some("completeness") => Mode::Completeness,
    Some(other) => return Err(CliError::UnknownMode(other.to_string())),
  };
  if matches.free.len() > 2 {
    return Err(CliError::TooManyArguments(matches.free[2..].join(" ")));
  }

  if let Some(s) = matches.opt_str("s") {
    cmd.solver = Solver::parse(&s);
  }
  if let Some(t) = matches.opt_str("t") {
    let secs: u64 = t.parse().map_err(|_| CliError::InvalidValue { option: "timeout", value: t.clone() })?;
    cmd.timeout = if secs == 0 { None } else { Some(secs) };
  }
  if let Some(j) = matches.opt_str("j") {
    match j.parse::<usize>() {
      Ok(n) if n > 0 => cmd.jobs = Some(n),
      _ => return Err(CliError::InvalidValue { option: "jobs", value: j }),
    }
  }
  cmd.filter = matches.opt_str("f");
  cmd.dump_queries = matches.opt_str("d").map(PathBuf::from);
  cmd.json = matches.opt_present("json");
  cmd.validate = !matches.opt_present("no-validate");
  cmd.list = matches.opt_present("l");
  cmd.verbose_level = matches.opt_str("v");
  Ok(cmd)
}

// Maps `-v` values to an env_logger filter
pub fn log_level(verbose: &str) -> Result<&'static str, CliError> {
  match verbose {
    "0" | "error" => Ok("error"),
    "1" | "warn" => Ok("warn"),
    "2" | "info" => Ok("info"),
    "3" | "debug" => Ok("debug"),
    "4" | "trace" => Ok("trace"),
    other => Err(CliError::InvalidValue { option: "verbose", value: other.to_string() }),
  }
}
