use log::{error, info};
use serde_json::json;
use std::{env, process};

use rhospec::modules::abstraction::Session;
use rhospec::modules::cli::{log_level, parse_args, usage, CheckCommand};
use rhospec::modules::completeness::{check_completeness, CompletenessReport};
use rhospec::modules::determinism::{check_determinism, DeterminismReport};
use rhospec::modules::format::{format_completeness, format_determinism, format_rules};
use rhospec::modules::loader::{filter_rules, load_rule_file};
use rhospec::modules::solvers::ProcessSolver;
use rhospec::modules::state::StateModel;
use rhospec::modules::types::Verdict;

const EXIT_PASS: i32 = 0;
const EXIT_FAIL: i32 = 1;
const EXIT_ERROR: i32 = 2;
const EXIT_INDETERMINATE: i32 = 3;

fn exit_code(verdicts: &[Verdict]) -> i32 {
  if verdicts.contains(&Verdict::Fail) {
    EXIT_FAIL
  } else if verdicts.contains(&Verdict::Indeterminate) {
    EXIT_INDETERMINATE
  } else {
    EXIT_PASS
  }
}

fn run(cmd: &CheckCommand) -> i32 {
  let config = cmd.config();

  info!("Read specification ...");
  let mut session = Session::new(StateModel::new());
  let rules = match load_rule_file(&cmd.rule_file, &mut session) {
    Ok(rules) => rules,
    Err(e) => {
      error!("{}", e);
      eprintln!("error: {}: {}", cmd.rule_file.display(), e);
      return EXIT_ERROR;
    }
  };
  let rules = match &cmd.filter {
    Some(pattern) => match filter_rules(rules, pattern) {
      Ok(rules) => rules,
      Err(e) => {
        error!("{}", e);
        eprintln!("error: {}", e);
        return EXIT_ERROR;
      }
    },
    None => rules,
  };

  if cmd.list {
    print!("{}", format_rules(&rules));
    return EXIT_PASS;
  }

  let backend = ProcessSolver::from_config(&config);
  if let Err(e) = backend.ensure_available() {
    error!("{}", e);
    eprintln!("error: {}", e);
    return EXIT_ERROR;
  }
  info!("Using solver {} with {} jobs", config.solver, config.jobs);

  let determinism: Option<DeterminismReport> =
    if cmd.mode.determinism() { Some(check_determinism(&rules, &session, &backend, &config)) } else { None };
  let completeness: Option<CompletenessReport> =
    if cmd.mode.completeness() { Some(check_completeness(&rules, &session, &backend, &config)) } else { None };

  if cmd.json {
    let report = json!({
      "rules": rules.len(),
      "determinism": determinism,
      "completeness": completeness,
    });
    match serde_json::to_string_pretty(&report) {
      Ok(s) => println!("{}", s),
      Err(e) => {
        error!("cannot serialize report: {}", e);
        return EXIT_ERROR;
      }
    }
  } else {
    if let Some(r) = &determinism {
      print!("{}", format_determinism(r, &session));
    }
    if let Some(r) = &completeness {
      if determinism.is_some() {
        println!();
      }
      print!("{}", format_completeness(r, &session));
    }
  }

  let verdicts: Vec<Verdict> =
    determinism.iter().map(|r| r.verdict).chain(completeness.iter().map(|r| r.verdict)).collect();
  exit_code(&verdicts)
}

fn main() {
  let args: Vec<String> = env::args().collect();
  let program = args.first().cloned().unwrap_or_else(|| "rhospec".to_string());

  let cmd = match parse_args(&args[1.min(args.len())..]) {
    Ok(cmd) => cmd,
    Err(e) => {
      eprintln!("error: {}", e);
      eprint!("{}", usage(&program));
      process::exit(EXIT_ERROR);
    }
  };
  if cmd.help {
    print!("{}", usage(&program));
    process::exit(EXIT_PASS);
  }

  match cmd.verbose_level.as_deref().map(log_level) {
    Some(Ok(level)) => env::set_var("RUST_LOG", level),
    Some(Err(e)) => {
      eprintln!("error: {}", e);
      process::exit(EXIT_ERROR);
    }
    None if env::var("RUST_LOG").is_err() => env::set_var("RUST_LOG", "info"),
    None => {}
  }
  env_logger::init();

  process::exit(run(&cmd));
}
