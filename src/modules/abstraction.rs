//! Predicate abstraction over the parts of the VM state that rule conditions only ask questions
//! about (account warmth, balances, storage transition classes, code/data classification, ...).
//!
//! Every fact is replaced by a fresh solver variable per (family, key). Keys are canonicalized
//! through the term rendering, and the variable is memoized in the [`Session`], so that two
//! references to the same fact inside one checking run always denote the same variable.
//!
//! The abstraction is only sound if no fact is shared between rules in a way that creates
//! dependencies the model does not capture.

use log::trace;
use num_bigint::BigInt;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::modules::expr::{and, eq, not, sort_of, var};
use crate::modules::state::{StateModel, StorageClass};
use crate::modules::types::{Sort, Term, Var};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbstractionError {
  #[error("{accessor} expects an Int key, got {found} term `{key}`")]
  KeySort { accessor: &'static str, found: Sort, key: String },

  #[error("storageConf expects an Int storage class, got {found} term `{class}`")]
  ClassSort { found: Sort, class: String },

  #[error("storage class {0} is outside of 0..{max}", max = StorageClass::ALL.len())]
  ClassRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactFamily {
  ColdAccount,
  EmptyAccount,
  Balance,
  BlobHash,
  Delegation,
  ColdDelegation,
  InRange256,
  TransientStorage,
  ColdStorage,
  StorageConf,
  IsCode,
}

impl FactFamily {
  fn prefix(self) -> &'static str {
    match self {
      FactFamily::ColdAccount => "cold_account",
      FactFamily::EmptyAccount => "account_empty",
      FactFamily::Balance => "balance",
      FactFamily::BlobHash => "has_blob",
      FactFamily::Delegation => "deleg_desig",
      FactFamily::ColdDelegation => "cold_deleg",
      FactFamily::InRange256 => "in_range",
      FactFamily::TransientStorage => "tran_storage",
      FactFamily::ColdStorage => "storage_cold",
      FactFamily::StorageConf => "storage_conf",
      FactFamily::IsCode => "is_code",
    }
  }

  fn sort(self) -> Sort {
    match self {
      FactFamily::Balance | FactFamily::StorageConf => Sort::Int,
      _ => Sort::Bool,
    }
  }

  // Name used when printing the fact in reports
  pub fn label(self) -> &'static str {
    match self {
      FactFamily::ColdAccount => "account_cold",
      FactFamily::EmptyAccount => "account_empty",
      FactFamily::Balance => "balance",
      FactFamily::BlobHash => "hasBlobHash",
      FactFamily::Delegation => "hasDelegationDesignation",
      FactFamily::ColdDelegation => "coldDelegationDesignation",
      FactFamily::InRange256 => "inRange256FromCurrentBlock",
      FactFamily::TransientStorage => "tranStorageNonZero",
      FactFamily::ColdStorage => "storage_cold",
      FactFamily::StorageConf => "storageConf",
      FactFamily::IsCode => "isCode",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
  pub family: FactFamily,
  pub key: String,
  pub var: Var,
}

impl Fact {
  pub fn label(&self) -> String {
    format!("{}({})", self.family.label(), self.key)
  }
}

// One checking run. Accessors take `&mut self` while rules are loaded; the checkers only ever
// borrow the session immutably, so the memo table is frozen once loading is done.
#[derive(Debug, Clone, Default)]
pub struct Session {
  state: StateModel,
  index: BTreeMap<(FactFamily, String), usize>,
  facts: Vec<Fact>,
}

impl Session {
  pub fn new(state: StateModel) -> Self {
    Session { state, index: BTreeMap::new(), facts: vec![] }
  }

  pub fn state(&self) -> &StateModel {
    &self.state
  }

  pub fn valid_state_predicate(&self) -> Term {
    self.state.valid_state_predicate(self)
  }

  // Drop all memoized facts. Terms built before the reset must not be mixed with terms built
  // after it.
  pub fn reset(&mut self) {
    self.index.clear();
    self.facts.clear();
  }

  pub fn len(&self) -> usize {
    self.facts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.facts.is_empty()
  }

  // Facts of one family in allocation order
  pub fn facts(&self, family: FactFamily) -> impl Iterator<Item = &Fact> {
    self.facts.iter().filter(move |f| f.family == family)
  }

  pub fn fact_for(&self, family: FactFamily, key: &str) -> Option<&Fact> {
    self.index.get(&(family, key.to_string())).map(|&i| &self.facts[i])
  }

  pub fn describe(&self, var_name: &str) -> Option<String> {
    self.facts.iter().find(|f| f.var.name == var_name).map(Fact::label)
  }

  fn intern(&mut self, family: FactFamily, key: String) -> Var {
    if let Some(&i) = self.index.get(&(family, key.clone())) {
      return self.facts[i].var.clone();
    }
    let n = self.facts(family).count();
    let fresh = Var::new(&format!("{}_{}", family.prefix(), n), family.sort());
    trace!("allocated {} for {}({})", fresh.name, family.label(), key);
    self.index.insert((family, key.clone()), self.facts.len());
    self.facts.push(Fact { family, key, var: fresh.clone() });
    fresh
  }

  fn keyed(&mut self, family: FactFamily, accessor: &'static str, key: &Term) -> Result<Term, AbstractionError> {
    check_key(accessor, key)?;
    Ok(var(&self.intern(family, key.to_string())))
  }

  // ** Accounts ** --------------------------------------------------------------------------------

  pub fn account_cold(&mut self, addr: &Term) -> Result<Term, AbstractionError> {
    self.keyed(FactFamily::ColdAccount, "account_cold", addr)
  }

  pub fn account_warm(&mut self, addr: &Term) -> Result<Term, AbstractionError> {
    Ok(not(self.keyed(FactFamily::ColdAccount, "account_warm", addr)?))
  }

  pub fn account_empty(&mut self, addr: &Term) -> Result<Term, AbstractionError> {
    self.keyed(FactFamily::EmptyAccount, "account_empty", addr)
  }

  pub fn balance(&mut self, addr: &Term) -> Result<Term, AbstractionError> {
    self.keyed(FactFamily::Balance, "balance", addr)
  }

  // ** EIP-7702 delegation designations ** -------------------------------------------------------

  fn delegation(&mut self, accessor: &'static str, addr: &Term) -> Result<(Term, Term), AbstractionError> {
    let has = self.keyed(FactFamily::Delegation, accessor, addr)?;
    let cold = self.keyed(FactFamily::ColdDelegation, accessor, addr)?;
    Ok((has, cold))
  }

  pub fn no_delegation_designation(&mut self, addr: &Term) -> Result<Term, AbstractionError> {
    let (has, _) = self.delegation("NoDelegationDesignation", addr)?;
    Ok(not(has))
  }

  pub fn cold_delegation_designation(&mut self, addr: &Term) -> Result<Term, AbstractionError> {
    let (has, cold) = self.delegation("ColdDelegationDesignation", addr)?;
    Ok(and(vec![has, cold]))
  }

  pub fn warm_delegation_designation(&mut self, addr: &Term) -> Result<Term, AbstractionError> {
    let (has, cold) = self.delegation("WarmDelegationDesignation", addr)?;
    Ok(and(vec![has, not(cold)]))
  }

  // ** Block and transaction context ** ----------------------------------------------------------

  pub fn has_blob_hash(&mut self, index: &Term) -> Result<Term, AbstractionError> {
    self.keyed(FactFamily::BlobHash, "hasBlobHash", index)
  }

  pub fn in_range_256_from_current_block(&mut self, block: &Term) -> Result<Term, AbstractionError> {
    self.keyed(FactFamily::InRange256, "inRange256FromCurrentBlock", block)
  }

  // ** Storage ** ---------------------------------------------------------------------------------

  pub fn tran_storage_non_zero(&mut self, slot: &Term) -> Result<Term, AbstractionError> {
    self.keyed(FactFamily::TransientStorage, "tranStorageNonZero", slot)
  }

  pub fn tran_storage_to_zero(&mut self, slot: &Term) -> Result<Term, AbstractionError> {
    Ok(not(self.keyed(FactFamily::TransientStorage, "tranStorageToZero", slot)?))
  }

  pub fn storage_cold(&mut self, slot: &Term) -> Result<Term, AbstractionError> {
    self.keyed(FactFamily::ColdStorage, "storage_cold", slot)
  }

  pub fn storage_warm(&mut self, slot: &Term) -> Result<Term, AbstractionError> {
    Ok(not(self.keyed(FactFamily::ColdStorage, "storage_warm", slot)?))
  }

  // `storage_conf_N == class`, with one variable per (slot, value) pair
  pub fn storage_conf(&mut self, class: &Term, slot: &Term, value: &Term) -> Result<Term, AbstractionError> {
    match class {
      Term::IntLit(n) if StorageClass::ALL.iter().all(|c| *n != BigInt::from(c.code())) => {
        return Err(AbstractionError::ClassRange(n.to_string()));
      }
      c if sort_of(c) != Sort::Int => {
        return Err(AbstractionError::ClassSort { found: sort_of(c), class: c.to_string() });
      }
      _ => {}
    }
    check_key("storageConf", slot)?;
    check_key("storageConf", value)?;
    let conf = self.intern(FactFamily::StorageConf, format!("{}, {}", slot, value));
    Ok(eq(var(&conf), class.clone()))
  }

  // ** Code ** ------------------------------------------------------------------------------------

  // Keyed per offset: `isCode(pc)` and `isCode(param(0))` are independent facts.
  pub fn is_code(&mut self, offset: &Term) -> Result<Term, AbstractionError> {
    self.keyed(FactFamily::IsCode, "isCode", offset)
  }

  pub fn is_data(&mut self, offset: &Term) -> Result<Term, AbstractionError> {
    Ok(not(self.keyed(FactFamily::IsCode, "isData", offset)?))
  }
}

fn check_key(accessor: &'static str, key: &Term) -> Result<(), AbstractionError> {
  match sort_of(key) {
    Sort::Int => Ok(()),
    found => Err(AbstractionError::KeySort { accessor, found, key: key.to_string() }),
  }
}
