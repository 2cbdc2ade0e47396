use crate::modules::abstraction::{FactFamily, Session};
use crate::modules::expr::{and, eq, ge, implies, int, le, lt, not, or, select, sub, var};
use crate::modules::types::{Sort, Term, Var};

pub const MAX_CODE_LEN: i64 = 16384 + 8192;
pub const STACK_LIMIT: i64 = 1024;
pub const MAX_OPCODE: i64 = 255;

// Execution status --------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Running,
  Stopped,
  Reverted,
  Failed,
}

impl Status {
  pub const ALL: [Status; 4] = [Status::Running, Status::Stopped, Status::Reverted, Status::Failed];

  pub fn code(self) -> i64 {
    self as i64
  }

  pub fn name(self) -> &'static str {
    match self {
      Status::Running => "running",
      Status::Stopped => "stopped",
      Status::Reverted => "reverted",
      Status::Failed => "failed",
    }
  }

  pub fn from_code(code: i64) -> Option<Status> {
    Status::ALL.iter().copied().find(|s| s.code() == code)
  }
}

// Hard forks, ordered oldest first -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Revision {
  Istanbul,
  Berlin,
  London,
  Paris,
  Shanghai,
  Cancun,
  Prague,
}

impl Revision {
  pub const ALL: [Revision; 7] = [
    Revision::Istanbul,
    Revision::Berlin,
    Revision::London,
    Revision::Paris,
    Revision::Shanghai,
    Revision::Cancun,
    Revision::Prague,
  ];

  pub fn code(self) -> i64 {
    self as i64
  }

  pub fn name(self) -> &'static str {
    match self {
      Revision::Istanbul => "Istanbul",
      Revision::Berlin => "Berlin",
      Revision::London => "London",
      Revision::Paris => "Paris",
      Revision::Shanghai => "Shanghai",
      Revision::Cancun => "Cancun",
      Revision::Prague => "Prague",
    }
  }

  pub fn from_code(code: i64) -> Option<Revision> {
    Revision::ALL.iter().copied().find(|r| r.code() == code)
  }
}

// Storage slot transitions (EIP-2200 classes) ------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
  Assigned,
  Added,
  Deleted,
  Modified,
  DeletedAdded,
  ModifiedDeleted,
  DeletedRestored,
  AddedDeleted,
  ModifiedRestored,
}

impl StorageClass {
  pub const ALL: [StorageClass; 9] = [
    StorageClass::Assigned,
    StorageClass::Added,
    StorageClass::Deleted,
    StorageClass::Modified,
    StorageClass::DeletedAdded,
    StorageClass::ModifiedDeleted,
    StorageClass::DeletedRestored,
    StorageClass::AddedDeleted,
    StorageClass::ModifiedRestored,
  ];

  // Classes in which the slot has necessarily been accessed before in this transaction.
  pub const WARM_ONLY: [StorageClass; 6] = [
    StorageClass::Assigned,
    StorageClass::AddedDeleted,
    StorageClass::DeletedRestored,
    StorageClass::DeletedAdded,
    StorageClass::ModifiedDeleted,
    StorageClass::ModifiedRestored,
  ];

  pub fn code(self) -> i64 {
    self as i64
  }

  pub fn name(self) -> &'static str {
    match self {
      StorageClass::Assigned => "StorageAssigned",
      StorageClass::Added => "StorageAdded",
      StorageClass::Deleted => "StorageDeleted",
      StorageClass::Modified => "StorageModified",
      StorageClass::DeletedAdded => "StorageDeletedAdded",
      StorageClass::ModifiedDeleted => "StorageModifiedDeleted",
      StorageClass::DeletedRestored => "StorageDeletedRestored",
      StorageClass::AddedDeleted => "StorageAddedDeleted",
      StorageClass::ModifiedRestored => "StorageModifiedRestored",
    }
  }

  pub fn from_code(code: i64) -> Option<StorageClass> {
    StorageClass::ALL.iter().copied().find(|c| c.code() == code)
  }
}

// Symbolic VM state -------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateModel {
  pub status: Var,
  pub revision: Var,
  pub pc: Var,
  pub gas: Var,
  pub stack_size: Var,
  pub stack: Var,
  pub code_block: Var,
  pub read_only: Var,
  pub has_self_destructed: Var,
  pub self_address: Var,
}

impl Default for StateModel {
  fn default() -> Self {
    StateModel::new()
  }
}

impl StateModel {
  pub fn new() -> Self {
    StateModel {
      status: Var::new("status", Sort::Int),
      revision: Var::new("revision", Sort::Int),
      pc: Var::new("pc", Sort::Int),
      gas: Var::new("gas", Sort::Int),
      stack_size: Var::new("stackSize", Sort::Int),
      stack: Var::new("stack", Sort::Array),
      code_block: Var::new("code_block", Sort::Array),
      read_only: Var::new("readOnly", Sort::Bool),
      has_self_destructed: Var::new("hasSelfDestructed", Sort::Bool),
      self_address: Var::new("self", Sort::Int),
    }
  }

  pub fn vars(&self) -> Vec<&Var> {
    vec![
      &self.status,
      &self.revision,
      &self.pc,
      &self.gas,
      &self.stack_size,
      &self.stack,
      &self.code_block,
      &self.read_only,
      &self.has_self_destructed,
      &self.self_address,
    ]
  }

  pub fn lookup(&self, name: &str) -> Option<&Var> {
    self.vars().into_iter().find(|v| v.name == name)
  }

  // k-th element from the top of the stack
  pub fn param(&self, k: Term) -> Term {
    select(var(&self.stack), sub(sub(var(&self.stack_size), k), int(1)))
  }

  pub fn code(&self, offset: Term) -> Term {
    select(var(&self.code_block), offset)
  }

  pub fn current_op(&self) -> Term {
    self.code(var(&self.pc))
  }

  // Conjunction of all domain invariants. Invariants over abstraction facts are generated for
  // the facts allocated in the session so far.
  pub fn valid_state_predicate(&self, session: &Session) -> Term {
    let mut clauses = vec![
      in_range(var(&self.revision), 0, Revision::ALL.len() as i64),
      in_range(var(&self.status), 0, Status::ALL.len() as i64),
      in_range(var(&self.pc), 0, MAX_CODE_LEN),
      ge(var(&self.gas), int(0)),
      ge(var(&self.stack_size), int(0)),
      le(var(&self.stack_size), int(STACK_LIMIT)),
    ];

    for balance in session.facts(FactFamily::Balance) {
      clauses.push(ge(var(&balance.var), int(0)));
    }

    let confs: Vec<_> = session.facts(FactFamily::StorageConf).collect();
    for conf in &confs {
      clauses.push(in_range(var(&conf.var), 0, StorageClass::ALL.len() as i64));
    }

    // A slot in one of the warm-only classes cannot be cold.
    for cold in session.facts(FactFamily::ColdStorage) {
      for conf in &confs {
        let warm_only = or(StorageClass::WARM_ONLY.iter().map(|c| eq(var(&conf.var), int(c.code()))).collect());
        clauses.push(implies(warm_only, not(var(&cold.var))));
      }
    }

    // Without a designation the cold flag is meaningless; pin it to keep models canonical.
    for has in session.facts(FactFamily::Delegation) {
      if let Some(cold) = session.fact_for(FactFamily::ColdDelegation, &has.key) {
        clauses.push(implies(not(var(&has.var)), not(var(&cold.var))));
      }
    }

    clauses.push(ge(self.current_op(), int(0)));
    clauses.push(le(self.current_op(), int(MAX_OPCODE)));

    and(clauses)
  }
}

// lo <= t < hi
fn in_range(t: Term, lo: i64, hi: i64) -> Term {
  and(vec![ge(t.clone(), int(lo)), lt(t, int(hi))])
}

