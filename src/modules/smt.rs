use num_bigint::BigInt;
use num_traits::Signed;
use serde::{Serialize, Serializer};
use serde_json::{json, Map};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::modules::expr::{free_vars, select_terms};
use crate::modules::types::{Sort, Term, Var};

type Builder = String;

// ** Scripts ** -----------------------------------------------------------------------------------

// One SMT-LIB command per line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SMT2(pub Vec<Builder>);

impl std::ops::Add for SMT2 {
  type Output = Self;

  fn add(self, rhs: Self) -> Self::Output {
    SMT2(self.0.into_iter().chain(rhs.0).collect())
  }
}

impl std::ops::AddAssign for SMT2 {
  fn add_assign(&mut self, rhs: Self) {
    self.0.extend(rhs.0);
  }
}

impl fmt::Display for SMT2 {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for line in &self.0 {
      writeln!(f, "{}", line)?;
    }
    Ok(())
  }
}

impl SMT2 {
  pub fn to_commands(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(|s| s.as_str())
  }
}

pub fn smt2_line(txt: Builder) -> SMT2 {
  SMT2(vec![txt])
}

fn declare(v: &Var) -> Builder {
  format!("(declare-fun {} () {})", v.name, v.sort)
}

fn lit_to_smt(n: &BigInt) -> Builder {
  if n.is_negative() {
    format!("(- {})", n.abs())
  } else {
    n.to_string()
  }
}

pub fn expr_to_smt(t: &Term) -> Builder {
  match t {
    Term::BoolLit(b) => b.to_string(),
    Term::IntLit(n) => lit_to_smt(n),
    Term::Var(v) => v.name.clone(),
    Term::Select(a, i) => op2("select", a, i),
    Term::Add(a, b) => op2("+", a, b),
    Term::Sub(a, b) => op2("-", a, b),
    Term::Mul(a, b) => op2("*", a, b),
    Term::Neg(a) => op1("-", a),
    Term::Eq(a, b) => op2("=", a, b),
    Term::Lt(a, b) => op2("<", a, b),
    Term::Le(a, b) => op2("<=", a, b),
    Term::Gt(a, b) => op2(">", a, b),
    Term::Ge(a, b) => op2(">=", a, b),
    Term::And(ts) => opn("and", ts, "true"),
    Term::Or(ts) => opn("or", ts, "false"),
    Term::Not(a) => op1("not", a),
    Term::Implies(a, b) => op2("=>", a, b),
    Term::Ite(c, a, b) => format!("(ite {} {} {})", expr_to_smt(c), expr_to_smt(a), expr_to_smt(b)),
  }
}

fn op1(op: &str, a: &Term) -> Builder {
  format!("({} {})", op, expr_to_smt(a))
}

fn op2(op: &str, a: &Term, b: &Term) -> Builder {
  format!("({} {} {})", op, expr_to_smt(a), expr_to_smt(b))
}

// `and`/`or` need at least one operand in some solvers
fn opn(op: &str, ts: &[Term], unit: &str) -> Builder {
  match ts {
    [] => unit.to_string(),
    [t] => expr_to_smt(t),
    ts => format!("({} {})", op, ts.iter().map(expr_to_smt).collect::<Vec<_>>().join(" ")),
  }
}

// ** Queries ** -----------------------------------------------------------------------------------

// Something whose value is requested from the solver once a query turns out satisfiable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
  Scalar(Var),
  // `read` is `(select array index)`; both the index and the read value are requested.
  Read { array: Var, index: Term, read: Term },
}

// A single satisfiability question: is the conjunction of `assertions` satisfiable?
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
  pub label: String,
  pub assertions: Vec<Term>,
}

impl Query {
  pub fn new(label: &str, assertions: Vec<Term>) -> Self {
    Query { label: label.to_string(), assertions }
  }

  pub fn free_vars(&self) -> BTreeSet<Var> {
    self.assertions.iter().flat_map(free_vars).collect()
  }

  pub fn probes(&self) -> Vec<Probe> {
    let mut probes: Vec<Probe> =
      self.free_vars().into_iter().filter(|v| v.sort != Sort::Array).map(Probe::Scalar).collect();
    let mut reads: Vec<Term> = vec![];
    for a in &self.assertions {
      for r in select_terms(a) {
        if !reads.contains(&r) {
          reads.push(r);
        }
      }
    }
    for read in reads {
      if let Term::Select(array, index) = &read {
        if let Term::Var(array) = array.as_ref() {
          probes.push(Probe::Read { array: array.clone(), index: index.as_ref().clone(), read: read.clone() });
        }
      }
    }
    probes
  }

  // Full script up to and including `(check-sat)`
  pub fn to_smt2(&self) -> SMT2 {
    let mut smt2 = smt2_line("(set-option :produce-models true)".to_string());
    smt2 += smt2_line("(set-logic ALL)".to_string());
    smt2 += SMT2(self.free_vars().iter().map(declare).collect());
    smt2 += SMT2(self.assertions.iter().map(|a| format!("(assert {})", expr_to_smt(a))).collect());
    smt2 += smt2_line("(check-sat)".to_string());
    smt2
  }

  pub fn get_value_command(probes: &[Probe]) -> Option<Builder> {
    let mut terms = vec![];
    for p in probes {
      match p {
        Probe::Scalar(v) => terms.push(v.name.clone()),
        Probe::Read { index, read, .. } => {
          terms.push(expr_to_smt(index));
          terms.push(expr_to_smt(read));
        }
      }
    }
    if terms.is_empty() {
      None
    } else {
      Some(format!("(get-value ({}))", terms.join(" ")))
    }
  }
}

// ** Solver output ** -----------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot parse solver output `{text}`: {msg}")]
pub struct ParseError {
  pub text: String,
  pub msg: String,
}

fn parse_error<T>(text: &str, msg: &str) -> Result<T, ParseError> {
  Err(ParseError { text: text.to_string(), msg: msg.to_string() })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SExpr {
  Atom(String),
  Str(String),
  List(Vec<SExpr>),
}

impl fmt::Display for SExpr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SExpr::Atom(a) => write!(f, "{}", a),
      SExpr::Str(s) => write!(f, "\"{}\"", s),
      SExpr::List(xs) => {
        write!(f, "(")?;
        for (i, x) in xs.iter().enumerate() {
          if i > 0 {
            write!(f, " ")?;
          }
          write!(f, "{}", x)?;
        }
        write!(f, ")")
      }
    }
  }
}

// Difference between opening and closing parentheses outside of strings and quoted symbols.
pub fn paren_depth(text: &str) -> i64 {
  let mut depth = 0;
  let mut in_str = false;
  let mut in_sym = false;
  for c in text.chars() {
    match c {
      '"' if !in_sym => in_str = !in_str,
      '|' if !in_str => in_sym = !in_sym,
      '(' if !in_str && !in_sym => depth += 1,
      ')' if !in_str && !in_sym => depth -= 1,
      _ => {}
    }
  }
  depth
}

pub fn parse_sexprs(text: &str) -> Result<Vec<SExpr>, ParseError> {
  let chars: Vec<char> = text.chars().collect();
  let mut i = 0;
  let mut stack: Vec<Vec<SExpr>> = vec![vec![]];
  while i < chars.len() {
    let c = chars[i];
    match c {
      ';' => {
        while i < chars.len() && chars[i] != '\n' {
          i += 1;
        }
      }
      '(' => stack.push(vec![]),
      ')' => {
        let list = match stack.pop() {
          Some(list) if !stack.is_empty() => list,
          _ => return parse_error(text, "unbalanced `)`"),
        };
        if let Some(top) = stack.last_mut() {
          top.push(SExpr::List(list));
        }
      }
      '"' => {
        let mut s = String::new();
        i += 1;
        loop {
          match chars.get(i) {
            None => return parse_error(text, "unterminated string"),
            // "" is an escaped quote in SMT-LIB strings
            Some('"') if chars.get(i + 1) == Some(&'"') => {
              s.push('"');
              i += 1;
            }
            Some('"') => break,
            Some(&c) => s.push(c),
          }
          i += 1;
        }
        if let Some(top) = stack.last_mut() {
          top.push(SExpr::Str(s));
        }
      }
      '|' => {
        let mut s = String::new();
        i += 1;
        while let Some(&c) = chars.get(i) {
          if c == '|' {
            break;
          }
          s.push(c);
          i += 1;
        }
        if i >= chars.len() {
          return parse_error(text, "unterminated quoted symbol");
        }
        if let Some(top) = stack.last_mut() {
          top.push(SExpr::Atom(s));
        }
      }
      c if c.is_whitespace() => {}
      _ => {
        let mut s = String::new();
        while let Some(&c) = chars.get(i) {
          if c.is_whitespace() || c == '(' || c == ')' || c == '"' || c == ';' {
            break;
          }
          s.push(c);
          i += 1;
        }
        if let Some(top) = stack.last_mut() {
          top.push(SExpr::Atom(s));
        }
        continue;
      }
    }
    i += 1;
  }
  match stack.pop() {
    Some(top) if stack.is_empty() => Ok(top),
    _ => parse_error(text, "unbalanced `(`"),
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
  Int(BigInt),
  Bool(bool),
}

impl Value {
  pub fn as_int(&self) -> Option<&BigInt> {
    match self {
      Value::Int(n) => Some(n),
      Value::Bool(_) => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      Value::Int(_) => None,
    }
  }

  fn from_sexpr(e: &SExpr) -> Option<Value> {
    match e {
      SExpr::Atom(a) if a == "true" => Some(Value::Bool(true)),
      SExpr::Atom(a) if a == "false" => Some(Value::Bool(false)),
      SExpr::Atom(a) => a.parse::<BigInt>().ok().map(Value::Int),
      SExpr::List(xs) => match xs.as_slice() {
        [SExpr::Atom(minus), x] if minus == "-" => match Value::from_sexpr(x)? {
          Value::Int(n) => Some(Value::Int(-n)),
          Value::Bool(_) => None,
        },
        _ => None,
      },
      SExpr::Str(_) => None,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Int(n) => write!(f, "{}", n),
      Value::Bool(b) => write!(f, "{}", b),
    }
  }
}

// Integers are unbounded; JSON numbers are not
impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Value::Int(n) => serializer.serialize_str(&n.to_string()),
      Value::Bool(b) => serializer.serialize_bool(*b),
    }
  }
}

// Values for the scalar variables of a satisfiable query, and the array cells it reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Model {
  pub values: BTreeMap<String, Value>,
  pub arrays: BTreeMap<String, BTreeMap<BigInt, Value>>,
}

impl Model {
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.values.get(name)
  }

  pub fn read(&self, array: &str, index: &BigInt) -> Option<&Value> {
    self.arrays.get(array)?.get(index)
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty() && self.arrays.is_empty()
  }

  // Builds a model from the reply to the command returned by `Query::get_value_command`.
  // Pairs in the reply come in the order the terms were requested.
  pub fn from_get_value(reply: &str, probes: &[Probe]) -> Result<Model, ParseError> {
    let parsed = parse_sexprs(reply)?;
    let pairs = match parsed.as_slice() {
      [SExpr::List(pairs)] => pairs,
      _ => return parse_error(reply, "expected a single list of (term value) pairs"),
    };
    let mut values = vec![];
    for pair in pairs {
      match pair {
        SExpr::List(kv) if kv.len() == 2 => match Value::from_sexpr(&kv[1]) {
          Some(v) => values.push(v),
          None => return parse_error(reply, &format!("unsupported value `{}`", kv[1])),
        },
        other => return parse_error(reply, &format!("malformed pair `{}`", other)),
      }
    }

    let mut model = Model::default();
    let mut it = values.into_iter();
    for p in probes {
      match p {
        Probe::Scalar(v) => {
          let value = it.next().ok_or_else(|| missing(reply))?;
          model.values.insert(v.name.clone(), value);
        }
        Probe::Read { array, .. } => {
          let index = it.next().ok_or_else(|| missing(reply))?;
          let read = it.next().ok_or_else(|| missing(reply))?;
          let index = match index {
            Value::Int(n) => n,
            Value::Bool(_) => return parse_error(reply, "array index evaluated to a boolean"),
          };
          model.arrays.entry(array.name.clone()).or_default().insert(index, read);
        }
      }
    }
    if it.next().is_some() {
      return parse_error(reply, "more values than requested terms");
    }
    Ok(model)
  }

  pub fn to_json(&self) -> serde_json::Value {
    let mut arrays = Map::new();
    for (name, cells) in &self.arrays {
      let cells: Map<String, serde_json::Value> =
        cells.iter().map(|(i, v)| (i.to_string(), json!(v))).collect();
      arrays.insert(name.clone(), serde_json::Value::Object(cells));
    }
    json!({ "values": self.values, "arrays": arrays })
  }
}

fn missing(reply: &str) -> ParseError {
  ParseError { text: reply.to_string(), msg: "fewer values than requested terms".to_string() }
}

impl Serialize for Model {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.to_json().serialize(serializer)
  }
}
