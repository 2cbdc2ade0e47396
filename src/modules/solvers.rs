use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use log::{debug, trace, warn};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::modules::config::Config;
use crate::modules::smt::{paren_depth, parse_sexprs, Model, ParseError, Query, SExpr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Solver {
  Z3,
  CVC5,
  Custom(String),
}

impl std::fmt::Display for Solver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Solver::Z3 => write!(f, "z3"),
      Solver::CVC5 => write!(f, "cvc5"),
      Solver::Custom(s) => write!(f, "{}", s),
    }
  }
}

impl Solver {
  pub fn parse(name: &str) -> Solver {
    match name {
      "z3" => Solver::Z3,
      "cvc5" => Solver::CVC5,
      other => Solver::Custom(other.to_string()),
    }
  }

  // Slack on top of the query timeout before a solver that enforces the limit itself is killed.
  fn deadline_slack(&self) -> Duration {
    match self {
      Solver::Z3 | Solver::CVC5 => Duration::from_secs(5),
      Solver::Custom(_) => Duration::ZERO,
    }
  }

  // Program and arguments for an interactive SMT-LIB session. Custom commands are split on
  // whitespace and receive no extra flags; their time limit is enforced by `SolverInstance` alone.
  fn command(&self, timeout: Option<Duration>) -> (String, Vec<String>) {
    let ms = timeout.map(|t| t.as_millis());
    match self {
      Solver::Z3 => {
        let mut args = vec!["-smt2".to_string(), "-in".to_string()];
        if let Some(ms) = ms {
          args.push(format!("-t:{}", ms));
        }
        ("z3".to_string(), args)
      }
      Solver::CVC5 => {
        let mut args = vec!["--lang".to_string(), "smt2".to_string(), "--incremental".to_string()];
        args.push("--produce-models".to_string());
        if let Some(ms) = ms {
          args.push(format!("--tlimit-per={}", ms));
        }
        ("cvc5".to_string(), args)
      }
      Solver::Custom(cmd) => {
        let mut parts = cmd.split_whitespace().map(|s| s.to_string());
        let program = parts.next().unwrap_or_default();
        (program, parts.collect())
      }
    }
  }
}

#[derive(Debug, Error)]
pub enum SolverError {
  #[error("IO error: {0}")]
  IOError(#[from] std::io::Error),

  #[error("cannot start solver `{command}`: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("Command error: {0}")]
  CommandError(String),

  #[error("Unknown result from solver: {0}")]
  UnknownResult(String),

  #[error(transparent)]
  Parse(#[from] ParseError),

  #[error("solver exited without answering{0}")]
  NoResponse(String),

  #[error("solver worker failed: {0}")]
  Worker(String),

  #[error("solver did not answer in time")]
  Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckSatResult {
  Sat(Model),
  Unsat,
  Unknown(String),
}

impl CheckSatResult {
  pub fn is_sat(&self) -> bool {
    matches!(self, CheckSatResult::Sat(_))
  }

  pub fn is_unsat(&self) -> bool {
    matches!(self, CheckSatResult::Unsat)
  }

  pub fn is_unknown(&self) -> bool {
    matches!(self, CheckSatResult::Unknown(_))
  }
}

// Anything able to decide a query. Backends are shared between worker threads.
pub trait Backend: Sync {
  fn check_sat(&self, query: &Query) -> Result<CheckSatResult, SolverError>;
}

// ** External solver processes ** -----------------------------------------------------------------

// Starts a fresh solver process for every query so that no state survives between queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSolver {
  pub solver: Solver,
  pub timeout: Option<Duration>,
}

impl ProcessSolver {
  pub fn new(solver: Solver, timeout: Option<Duration>) -> Self {
    ProcessSolver { solver, timeout }
  }

  pub fn from_config(config: &Config) -> Self {
    ProcessSolver::new(config.solver.clone(), config.timeout)
  }

  // Starts the solver once so that a missing binary is reported before any query is dispatched.
  pub fn ensure_available(&self) -> Result<(), SolverError> {
    SolverInstance::spawn(&self.solver, self.timeout).map(drop)
  }

  fn run(&self, query: &Query) -> Result<CheckSatResult, SolverError> {
    let mut inst = SolverInstance::spawn(&self.solver, self.timeout)?;
    for cmd in query.to_smt2().to_commands() {
      inst.send(cmd)?;
    }
    match inst.read_check_sat()?.as_str() {
      "sat" => {
        let probes = query.probes();
        let model = match Query::get_value_command(&probes) {
          Some(cmd) => {
            inst.send(&cmd)?;
            let reply = inst.read_reply()?;
            Model::from_get_value(&reply, &probes)?
          }
          None => Model::default(),
        };
        Ok(CheckSatResult::Sat(model))
      }
      "unsat" => Ok(CheckSatResult::Unsat),
      "timeout" => Ok(CheckSatResult::Unknown("timeout".to_string())),
      _ => Ok(CheckSatResult::Unknown(inst.reason_unknown())),
    }
  }
}

impl Backend for ProcessSolver {
  fn check_sat(&self, query: &Query) -> Result<CheckSatResult, SolverError> {
    match self.run(query) {
      Err(SolverError::Timeout) => Ok(CheckSatResult::Unknown("timeout".to_string())),
      result => result,
    }
  }
}

struct SolverInstance {
  stdin: BufWriter<ChildStdin>,
  // Lines of the solver's stdout, read on a separate thread so that replies can be awaited with a deadline
  lines: Receiver<std::io::Result<String>>,
  stderr: Option<ChildStderr>,
  deadline: Option<Instant>,
  process: Child,
}

impl SolverInstance {
  fn spawn(solver: &Solver, timeout: Option<Duration>) -> Result<Self, SolverError> {
    let (program, args) = solver.command(timeout);
    trace!("spawning {} {}", program, args.join(" "));
    let mut process = Command::new(&program)
      .args(&args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|source| SolverError::Spawn { command: solver.to_string(), source })?;

    let stdin = process.stdin.take().ok_or_else(|| SolverError::CommandError("failed to capture stdin".into()))?;
    let stdout = process.stdout.take().ok_or_else(|| SolverError::CommandError("failed to capture stdout".into()))?;
    let stderr = process.stderr.take();

    let (line_sender, lines) = unbounded();
    thread::spawn(move || {
      let mut stdout = BufReader::new(stdout);
      loop {
        let mut line = String::new();
        match stdout.read_line(&mut line) {
          Ok(0) => break,
          Ok(_) => {
            if line_sender.send(Ok(line)).is_err() {
              break;
            }
          }
          Err(e) => {
            let _ = line_sender.send(Err(e));
            break;
          }
        }
      }
    });

    let deadline = timeout.map(|t| Instant::now() + t + solver.deadline_slack());
    Ok(SolverInstance { stdin: BufWriter::new(stdin), lines, stderr, deadline, process })
  }

  fn send(&mut self, cmd: &str) -> Result<(), SolverError> {
    trace!("> {}", cmd);
    writeln!(self.stdin, "{}", cmd)?;
    self.stdin.flush()?;
    Ok(())
  }

  fn read_line(&mut self) -> Result<String, SolverError> {
    let received = match self.deadline {
      Some(deadline) => match self.lines.recv_deadline(deadline) {
        Ok(line) => Some(line),
        Err(RecvTimeoutError::Timeout) => {
          debug!("solver missed its deadline, killing it");
          return Err(SolverError::Timeout);
        }
        Err(RecvTimeoutError::Disconnected) => None,
      },
      None => self.lines.recv().ok(),
    };
    let line = match received {
      Some(line) => line?,
      None => return Err(SolverError::NoResponse(self.drain_stderr())),
    };
    trace!("< {}", line.trim_end());
    Ok(line)
  }

  // Reads one complete s-expression (or atom) from the solver.
  fn read_reply(&mut self) -> Result<String, SolverError> {
    let mut reply = String::new();
    loop {
      let line = self.read_line()?;
      if reply.is_empty() && line.trim().is_empty() {
        continue;
      }
      reply.push_str(&line);
      if paren_depth(&reply) <= 0 {
        return Ok(reply.trim().to_string());
      }
    }
  }

  fn read_check_sat(&mut self) -> Result<String, SolverError> {
    let reply = self.read_reply()?;
    match reply.as_str() {
      "sat" | "unsat" | "unknown" | "timeout" => Ok(reply),
      r if r.starts_with("(error") => Err(SolverError::CommandError(error_message(r))),
      _ => Err(SolverError::UnknownResult(reply)),
    }
  }

  fn reason_unknown(&mut self) -> String {
    let reason = self.send("(get-info :reason-unknown)").and_then(|_| self.read_reply()).ok().and_then(|reply| {
      let parsed = parse_sexprs(&reply).ok()?;
      match parsed.as_slice() {
        [SExpr::List(kv)] => match kv.as_slice() {
          [_, SExpr::Str(s)] | [_, SExpr::Atom(s)] => Some(s.clone()),
          _ => None,
        },
        _ => None,
      }
    });
    reason.unwrap_or_else(|| "unknown".to_string())
  }

  fn drain_stderr(&mut self) -> String {
    let mut text = String::new();
    if let Some(stderr) = self.stderr.as_mut() {
      let _ = stderr.read_to_string(&mut text);
    }
    match text.trim() {
      "" => String::new(),
      t => format!(": {}", t),
    }
  }
}

impl Drop for SolverInstance {
  fn drop(&mut self) {
    let _ = self.send("(exit)");
    let _ = self.process.kill();
    let _ = self.process.wait();
  }
}

// `(error "msg")` ==> msg
fn error_message(reply: &str) -> String {
  match parse_sexprs(reply).ok().as_deref() {
    Some([SExpr::List(xs)]) => match xs.as_slice() {
      [_, SExpr::Str(msg)] => msg.clone(),
      _ => reply.to_string(),
    },
    _ => reply.to_string(),
  }
}

// ** Worker pool ** -------------------------------------------------------------------------------

// Runs batches of independent queries on up to `jobs` threads sharing one backend.
pub struct SolverGroup<'a, B: Backend> {
  backend: &'a B,
  jobs: usize,
  dump_dir: Option<PathBuf>,
}

impl<'a, B: Backend> SolverGroup<'a, B> {
  pub fn new(backend: &'a B, config: &Config) -> Self {
    SolverGroup { backend, jobs: config.jobs.max(1), dump_dir: config.dump_queries.clone() }
  }

  // Results come back in query order. A failing query only affects its own slot.
  pub fn check_all(&self, queries: &[Query]) -> Vec<Result<CheckSatResult, SolverError>> {
    if let Some(dir) = &self.dump_dir {
      dump_queries(dir, queries);
    }
    if queries.is_empty() {
      return vec![];
    }

    let (task_sender, task_receiver) = unbounded::<(usize, &Query)>();
    let (result_sender, result_receiver) = unbounded();
    for task in queries.iter().enumerate() {
      // the receiver is alive until the end of this function
      let _ = task_sender.send(task);
    }
    drop(task_sender);

    let workers = self.jobs.min(queries.len());
    let backend = self.backend;
    let scoped = crossbeam::scope(|s| {
      for worker in 0..workers {
        let task_receiver = task_receiver.clone();
        let result_sender = result_sender.clone();
        s.spawn(move |_| {
          for (i, query) in task_receiver.iter() {
            debug!("[worker {}] checking {}", worker, query.label);
            let result = backend.check_sat(query);
            match &result {
              Ok(r) if r.is_unknown() => warn!("{}: solver answered unknown", query.label),
              Err(e) => warn!("{}: {}", query.label, e),
              Ok(_) => {}
            }
            if result_sender.send((i, result)).is_err() {
              break;
            }
          }
        });
      }
    });
    drop(result_sender);

    let mut results: Vec<Option<Result<CheckSatResult, SolverError>>> = queries.iter().map(|_| None).collect();
    for (i, result) in result_receiver.iter() {
      results[i] = Some(result);
    }
    let panicked = scoped.is_err();
    results
      .into_iter()
      .map(|r| {
        r.unwrap_or_else(|| {
          Err(SolverError::Worker(if panicked { "worker thread panicked".into() } else { "query was not run".into() }))
        })
      })
      .collect()
  }
}

fn dump_queries(dir: &Path, queries: &[Query]) {
  if let Err(e) = fs::create_dir_all(dir) {
    warn!("cannot create {}: {}", dir.display(), e);
    return;
  }
  for (n, q) in queries.iter().enumerate() {
    let path = dir.join(format!("{}_{}.smt2", n, sanitize(&q.label)));
    match fs::write(&path, q.to_smt2().to_string()) {
      Ok(()) => debug!("wrote {}", path.display()),
      Err(e) => warn!("cannot write {}: {}", path.display(), e),
    }
  }
}

fn sanitize(label: &str) -> String {
  label.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' }).collect()
}
