use log::{debug, info};
use num_bigint::BigInt;
use num_traits::{Pow, Signed, ToPrimitive};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::modules::abstraction::{AbstractionError, Session};
use crate::modules::effects::Effect;
use crate::modules::expr::{
  add, and, boolean, eq, ge, gt, implies, int, ite, le, lt, mul, ne, neg, not, or, select, sort_of, sub,
};
use crate::modules::op::opcode_by_name;
use crate::modules::state::{Revision, Status, StorageClass, MAX_CODE_LEN};
use crate::modules::types::{Rule, Sort, Term};

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("failed to read rule file '{path}': {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{line}:{col}: {msg}")]
  Syntax { line: usize, col: usize, msg: String },

  #[error("{line}:{col}: {source}")]
  Abstraction {
    line: usize,
    col: usize,
    #[source]
    source: AbstractionError,
  },

  #[error("{line}:{col}: duplicate rule name `{name}`")]
  DuplicateRule { line: usize, col: usize, name: String },

  #[error("invalid rule filter: {0}")]
  Filter(#[from] regex::Error),
}

// ** Lexer ** -------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
  Int(BigInt),
  Ident(String),
  Str(String),
  LParen,
  RParen,
  LBracket,
  RBracket,
  Comma,
  Plus,
  Minus,
  Star,
  StarStar,
  EqEq,
  NotEq,
  Lt,
  Le,
  Gt,
  Ge,
  Eof,
}

impl std::fmt::Display for Tok {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Tok::Int(n) => write!(f, "integer {}", n),
      Tok::Ident(s) => write!(f, "identifier `{}`", s),
      Tok::Str(s) => write!(f, "string \"{}\"", s),
      Tok::LParen => write!(f, "`(`"),
      Tok::RParen => write!(f, "`)`"),
      Tok::LBracket => write!(f, "`[`"),
      Tok::RBracket => write!(f, "`]`"),
      Tok::Comma => write!(f, "`,`"),
      Tok::Plus => write!(f, "`+`"),
      Tok::Minus => write!(f, "`-`"),
      Tok::Star => write!(f, "`*`"),
      Tok::StarStar => write!(f, "`**`"),
      Tok::EqEq => write!(f, "`==`"),
      Tok::NotEq => write!(f, "`!=`"),
      Tok::Lt => write!(f, "`<`"),
      Tok::Le => write!(f, "`<=`"),
      Tok::Gt => write!(f, "`>`"),
      Tok::Ge => write!(f, "`>=`"),
      Tok::Eof => write!(f, "end of input"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pos {
  line: usize,
  col: usize,
}

#[derive(Debug, Clone)]
struct Token {
  tok: Tok,
  pos: Pos,
}

fn syntax<T>(pos: Pos, msg: String) -> Result<T, LoadError> {
  Err(LoadError::Syntax { line: pos.line, col: pos.col, msg })
}

struct Lexer {
  chars: Vec<char>,
  i: usize,
  line: usize,
  col: usize,
}

impl Lexer {
  fn new(text: &str) -> Self {
    Lexer { chars: text.chars().collect(), i: 0, line: 1, col: 1 }
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.i).copied()
  }

  fn peek2(&self) -> Option<char> {
    self.chars.get(self.i + 1).copied()
  }

  fn bump(&mut self) -> Option<char> {
    let c = self.chars.get(self.i).copied()?;
    self.i += 1;
    if c == '\n' {
      self.line += 1;
      self.col = 1;
    } else {
      self.col += 1;
    }
    Some(c)
  }

  fn pos(&self) -> Pos {
    Pos { line: self.line, col: self.col }
  }

  fn skip_trivia(&mut self) {
    while let Some(c) = self.peek() {
      if c.is_whitespace() {
        self.bump();
      } else if c == '#' {
        while let Some(c) = self.peek() {
          if c == '\n' {
            break;
          }
          self.bump();
        }
      } else {
        break;
      }
    }
  }

  fn tokenize(mut self) -> Result<Vec<Token>, LoadError> {
    let mut tokens = vec![];
    loop {
      self.skip_trivia();
      let pos = self.pos();
      let c = match self.peek() {
        Some(c) => c,
        None => {
          tokens.push(Token { tok: Tok::Eof, pos });
          return Ok(tokens);
        }
      };
      let tok = match c {
        '(' | ')' | '[' | ']' | ',' | '+' | '-' => {
          self.bump();
          match c {
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            ',' => Tok::Comma,
            '+' => Tok::Plus,
            _ => Tok::Minus,
          }
        }
        '*' => {
          self.bump();
          if self.peek() == Some('*') {
            self.bump();
            Tok::StarStar
          } else {
            Tok::Star
          }
        }
        '=' | '!' | '<' | '>' => {
          self.bump();
          let followed_by_eq = self.peek() == Some('=');
          if followed_by_eq {
            self.bump();
          }
          match (c, followed_by_eq) {
            ('=', true) => Tok::EqEq,
            ('!', true) => Tok::NotEq,
            ('<', true) => Tok::Le,
            ('<', false) => Tok::Lt,
            ('>', true) => Tok::Ge,
            ('>', false) => Tok::Gt,
            _ => return syntax(pos, format!("unexpected character `{}`", c)),
          }
        }
        '"' | '\'' => self.string(c, pos)?,
        c if c.is_ascii_digit() => self.number(pos)?,
        c if c.is_alphabetic() || c == '_' => {
          let mut ident = String::new();
          while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
              ident.push(c);
              self.bump();
            } else {
              break;
            }
          }
          Tok::Ident(ident)
        }
        c => return syntax(pos, format!("unexpected character `{}`", c)),
      };
      tokens.push(Token { tok, pos });
    }
  }

  fn string(&mut self, quote: char, pos: Pos) -> Result<Tok, LoadError> {
    self.bump();
    let mut s = String::new();
    loop {
      match self.bump() {
        None | Some('\n') => return syntax(pos, "unterminated string literal".to_string()),
        Some(c) if c == quote => return Ok(Tok::Str(s)),
        Some('\\') => match self.bump() {
          Some('n') => s.push('\n'),
          Some('t') => s.push('\t'),
          Some(c) => s.push(c),
          None => return syntax(pos, "unterminated string literal".to_string()),
        },
        Some(c) => s.push(c),
      }
    }
  }

  fn number(&mut self, pos: Pos) -> Result<Tok, LoadError> {
    let radix = if self.peek() == Some('0') && matches!(self.peek2(), Some('x') | Some('X')) {
      self.bump();
      self.bump();
      16
    } else {
      10
    };
    let mut digits = String::new();
    while let Some(c) = self.peek() {
      if c.is_digit(radix) {
        digits.push(c);
      } else if c != '_' {
        break;
      }
      self.bump();
    }
    match BigInt::parse_bytes(digits.as_bytes(), radix) {
      Some(n) => Ok(Tok::Int(n)),
      None => syntax(pos, "malformed integer literal".to_string()),
    }
  }
}

// ** Parser ** ------------------------------------------------------------------------------------

// Deepest accepted nesting of parentheses, calls and unary operators
const MAX_NESTING: usize = 128;

struct Parser<'a> {
  tokens: Vec<Token>,
  i: usize,
  depth: usize,
  session: &'a mut Session,
}

impl<'a> Parser<'a> {
  fn peek(&self) -> &Token {
    // tokenize always terminates the stream with Eof
    &self.tokens[self.i.min(self.tokens.len() - 1)]
  }

  fn next(&mut self) -> Token {
    let t = self.peek().clone();
    if self.i < self.tokens.len() {
      self.i += 1;
    }
    t
  }

  fn eat(&mut self, tok: &Tok) -> bool {
    if &self.peek().tok == tok {
      self.i += 1;
      true
    } else {
      false
    }
  }

  fn expect(&mut self, tok: Tok) -> Result<Pos, LoadError> {
    let t = self.next();
    if t.tok == tok {
      Ok(t.pos)
    } else {
      syntax(t.pos, format!("expected {}, found {}", tok, t.tok))
    }
  }

  fn expect_string(&mut self) -> Result<(String, Pos), LoadError> {
    let t = self.next();
    match t.tok {
      Tok::Str(s) => Ok((s, t.pos)),
      other => syntax(t.pos, format!("expected string, found {}", other)),
    }
  }

  fn rules(&mut self) -> Result<Vec<Rule>, LoadError> {
    self.expect(Tok::LBracket)?;
    let mut rules = vec![];
    let mut seen = HashSet::new();
    while self.peek().tok != Tok::RBracket {
      let rule_pos = self.peek().pos;
      let rule = self.rule()?;
      if !seen.insert(rule.name.clone()) {
        return Err(LoadError::DuplicateRule { line: rule_pos.line, col: rule_pos.col, name: rule.name });
      }
      debug!("rule {}: {} -> {}", rule.name, rule.condition, rule.effect);
      rules.push(rule);
      if !self.eat(&Tok::Comma) {
        break;
      }
    }
    self.expect(Tok::RBracket)?;
    self.expect(Tok::Eof)?;
    Ok(rules)
  }

  fn rule(&mut self) -> Result<Rule, LoadError> {
    self.expect(Tok::LParen)?;
    let (name, _) = self.expect_string()?;
    self.expect(Tok::Comma)?;
    let cond_pos = self.peek().pos;
    let condition = self.expr()?;
    if sort_of(&condition) != Sort::Bool {
      return syntax(cond_pos, format!("condition of rule `{}` is not a boolean formula", name));
    }
    self.expect(Tok::Comma)?;
    let (effect, _) = self.expect_string()?;
    self.expect(Tok::RParen)?;
    Ok(Rule::new(&name, condition, Effect::parse(&effect)))
  }

  fn expr(&mut self) -> Result<Term, LoadError> {
    self.comparison()
  }

  // Comparisons chain as in `0 <= x < 10`
  fn comparison(&mut self) -> Result<Term, LoadError> {
    let mut lhs = self.sum()?;
    let mut links = vec![];
    loop {
      let op = self.peek().clone();
      let build: fn(Term, Term) -> Term = match op.tok {
        Tok::EqEq => eq,
        Tok::NotEq => ne,
        Tok::Lt => lt,
        Tok::Le => le,
        Tok::Gt => gt,
        Tok::Ge => ge,
        _ => break,
      };
      self.next();
      let rhs = self.sum()?;
      let (ls, rs) = (sort_of(&lhs), sort_of(&rhs));
      let equality = matches!(op.tok, Tok::EqEq | Tok::NotEq);
      if ls != rs || ls == Sort::Array || (!equality && ls != Sort::Int) {
        return syntax(op.pos, format!("cannot compare {} term `{}` with {} term `{}` using {}", ls, lhs, rs, rhs, op.tok));
      }
      links.push(build(lhs, rhs.clone()));
      lhs = rhs;
    }
    if links.is_empty() {
      Ok(lhs)
    } else {
      Ok(and(links))
    }
  }

  fn sum(&mut self) -> Result<Term, LoadError> {
    let mut lhs = self.product()?;
    loop {
      let op = self.peek().clone();
      let build: fn(Term, Term) -> Term = match op.tok {
        Tok::Plus => add,
        Tok::Minus => sub,
        _ => return Ok(lhs),
      };
      self.next();
      let rhs = self.product()?;
      self.expect_ints(op.pos, &op.tok, &[&lhs, &rhs])?;
      lhs = build(lhs, rhs);
    }
  }

  fn product(&mut self) -> Result<Term, LoadError> {
    let mut lhs = self.unary()?;
    while self.peek().tok == Tok::Star {
      let op = self.next();
      let rhs = self.unary()?;
      self.expect_ints(op.pos, &op.tok, &[&lhs, &rhs])?;
      lhs = mul(lhs, rhs);
    }
    Ok(lhs)
  }

  // Every level of nesting passes through here, so this is where depth is bounded.
  fn unary(&mut self) -> Result<Term, LoadError> {
    if self.depth >= MAX_NESTING {
      return syntax(self.peek().pos, format!("expression is nested more than {} levels deep", MAX_NESTING));
    }
    self.depth += 1;
    let result = self.unary_inner();
    self.depth -= 1;
    result
  }

  fn unary_inner(&mut self) -> Result<Term, LoadError> {
    if self.peek().tok == Tok::Minus {
      let op = self.next();
      let t = self.unary()?;
      self.expect_ints(op.pos, &op.tok, &[&t])?;
      return Ok(neg(t));
    }
    self.power()
  }

  fn power(&mut self) -> Result<Term, LoadError> {
    let base = self.atom()?;
    if self.peek().tok != Tok::StarStar {
      return Ok(base);
    }
    let op = self.next();
    let exp = self.unary()?;
    match (&base, &exp) {
      (Term::IntLit(b), Term::IntLit(e)) if !e.is_negative() => match e.to_u32() {
        Some(e) => Ok(Term::IntLit(Pow::pow(b, e))),
        None => syntax(op.pos, format!("exponent {} is too large", e)),
      },
      _ => syntax(op.pos, "`**` is only supported between non-negative integer literals".to_string()),
    }
  }

  fn atom(&mut self) -> Result<Term, LoadError> {
    let t = self.next();
    match t.tok {
      Tok::Int(n) => Ok(Term::IntLit(n)),
      Tok::LParen => {
        let e = self.expr()?;
        self.expect(Tok::RParen)?;
        Ok(e)
      }
      Tok::Ident(name) => {
        if self.eat(&Tok::LParen) {
          let mut args = vec![];
          while self.peek().tok != Tok::RParen {
            let pos = self.peek().pos;
            args.push((self.expr()?, pos));
            if !self.eat(&Tok::Comma) {
              break;
            }
          }
          self.expect(Tok::RParen)?;
          return self.call(&name, args, t.pos);
        }
        let term = self.identifier(&name, t.pos)?;
        if sort_of(&term) == Sort::Array && self.eat(&Tok::LBracket) {
          let idx_pos = self.peek().pos;
          let idx = self.expr()?;
          self.expect(Tok::RBracket)?;
          self.expect_ints(idx_pos, &Tok::LBracket, &[&idx])?;
          return Ok(select(term, idx));
        }
        Ok(term)
      }
      other => syntax(t.pos, format!("expected expression, found {}", other)),
    }
  }

  fn identifier(&self, name: &str, pos: Pos) -> Result<Term, LoadError> {
    // generator output may carry either spelling of the boolean literals
    match name {
      "True" | "true" => return Ok(boolean(true)),
      "False" | "false" => return Ok(boolean(false)),
      "MaxCodeLen" => return Ok(int(MAX_CODE_LEN)),
      "NumStatusCodes" => return Ok(int(Status::ALL.len() as i64)),
      "numRevisions" => return Ok(int(Revision::ALL.len() as i64)),
      "numStorageStatus" => return Ok(int(StorageClass::ALL.len() as i64)),
      _ => {}
    }
    if let Some(v) = self.session.state().lookup(name) {
      return Ok(Term::Var(v.clone()));
    }
    if let Some(s) = Status::ALL.iter().find(|s| s.name() == name) {
      return Ok(int(s.code()));
    }
    if let Some(r) = Revision::ALL.iter().find(|r| r.name() == name) {
      return Ok(int(r.code()));
    }
    if let Some(c) = StorageClass::ALL.iter().find(|c| c.name() == name) {
      return Ok(int(c.code()));
    }
    if let Some(op) = opcode_by_name(name) {
      return Ok(int(op));
    }
    syntax(pos, format!("unknown identifier `{}`", name))
  }

  fn call(&mut self, name: &str, args: Vec<(Term, Pos)>, pos: Pos) -> Result<Term, LoadError> {
    let arity = match name {
      "And" | "Or" => None,
      "Not" | "param" | "code" | "op" => Some(1),
      "Implies" => Some(2),
      "If" | "storageConf" => Some(3),
      "account_cold" | "account_warm" | "account_empty" | "balance" | "hasBlobHash" | "NoDelegationDesignation"
      | "ColdDelegationDesignation" | "WarmDelegationDesignation" | "inRange256FromCurrentBlock"
      | "tranStorageNonZero" | "tranStorageToZero" | "storage_cold" | "storage_warm" | "isCode" | "isData" => Some(1),
      _ => return syntax(pos, format!("unknown function `{}`", name)),
    };
    if let Some(n) = arity {
      if args.len() != n {
        return syntax(pos, format!("`{}` expects {} argument(s), got {}", name, n, args.len()));
      }
    }

    match name {
      "And" | "Or" | "Not" | "Implies" => {
        for (a, p) in &args {
          if sort_of(a) != Sort::Bool {
            return syntax(*p, format!("`{}` expects boolean arguments, got `{}`", name, a));
          }
        }
        let mut terms: Vec<Term> = args.into_iter().map(|(a, _)| a).collect();
        Ok(match name {
          "And" => and(terms),
          "Or" => or(terms),
          "Not" => not(terms.remove(0)),
          _ => {
            let r = terms.remove(1);
            implies(terms.remove(0), r)
          }
        })
      }
      "If" => {
        let mut it = args.into_iter();
        let (c, cp) = it.next().ok_or_else(|| arity_bug(pos))?;
        let (t, tp) = it.next().ok_or_else(|| arity_bug(pos))?;
        let (e, _) = it.next().ok_or_else(|| arity_bug(pos))?;
        if sort_of(&c) != Sort::Bool {
          return syntax(cp, format!("condition of `If` is not boolean: `{}`", c));
        }
        if sort_of(&t) != sort_of(&e) || sort_of(&t) == Sort::Array {
          return syntax(tp, "branches of `If` have different sorts".to_string());
        }
        Ok(ite(c, t, e))
      }
      "storageConf" => {
        let terms: Vec<Term> = args.into_iter().map(|(a, _)| a).collect();
        self.session.storage_conf(&terms[0], &terms[1], &terms[2]).map_err(|e| abstraction(pos, e))
      }
      _ => {
        let (arg, arg_pos) = args.into_iter().next().ok_or_else(|| arity_bug(pos))?;
        match name {
          "param" | "code" | "op" => {
            self.expect_ints(arg_pos, &Tok::Ident(name.to_string()), &[&arg])?;
            Ok(match name {
              "param" => self.session.state().param(arg),
              "code" => self.session.state().code(arg),
              _ => arg,
            })
          }
          _ => self.fact(name, &arg).map_err(|e| abstraction(pos, e)),
        }
      }
    }
  }

  fn fact(&mut self, name: &str, key: &Term) -> Result<Term, AbstractionError> {
    let s = &mut *self.session;
    match name {
      "account_cold" => s.account_cold(key),
      "account_warm" => s.account_warm(key),
      "account_empty" => s.account_empty(key),
      "balance" => s.balance(key),
      "hasBlobHash" => s.has_blob_hash(key),
      "NoDelegationDesignation" => s.no_delegation_designation(key),
      "ColdDelegationDesignation" => s.cold_delegation_designation(key),
      "WarmDelegationDesignation" => s.warm_delegation_designation(key),
      "inRange256FromCurrentBlock" => s.in_range_256_from_current_block(key),
      "tranStorageNonZero" => s.tran_storage_non_zero(key),
      "tranStorageToZero" => s.tran_storage_to_zero(key),
      "storage_cold" => s.storage_cold(key),
      "storage_warm" => s.storage_warm(key),
      "isCode" => s.is_code(key),
      _ => s.is_data(key),
    }
  }

  fn expect_ints(&self, pos: Pos, op: &Tok, terms: &[&Term]) -> Result<(), LoadError> {
    for t in terms {
      if sort_of(t) != Sort::Int {
        return syntax(pos, format!("{} expects integer operands, got {} term `{}`", op, sort_of(t), t));
      }
    }
    Ok(())
  }
}

fn abstraction(pos: Pos, source: AbstractionError) -> LoadError {
  LoadError::Abstraction { line: pos.line, col: pos.col, source }
}

fn arity_bug(pos: Pos) -> LoadError {
  LoadError::Syntax { line: pos.line, col: pos.col, msg: "wrong number of arguments".to_string() }
}

// ** Entry points ** ------------------------------------------------------------------------------

// Parses a rule set in the generator's format, `[("name", condition, "effect"), ...]`.
// On error the session is left as it was before the call.
pub fn load_rules(text: &str, session: &mut Session) -> Result<Vec<Rule>, LoadError> {
  let tokens = Lexer::new(text).tokenize()?;
  let snapshot = session.clone();
  let result = Parser { tokens, i: 0, depth: 0, session: &mut *session }.rules();
  match result {
    Ok(rules) => {
      info!("Loaded {} rules ({} abstraction facts)", rules.len(), session.len());
      Ok(rules)
    }
    Err(e) => {
      *session = snapshot;
      Err(e)
    }
  }
}

pub fn load_rule_file(path: &Path, session: &mut Session) -> Result<Vec<Rule>, LoadError> {
  info!("Reading rules from {}", path.display());
  let text =
    fs::read_to_string(path).map_err(|source| LoadError::Io { path: path.display().to_string(), source })?;
  load_rules(&text, session)
}

// Keeps the rules whose name matches `pattern`, preserving file order.
pub fn filter_rules(rules: Vec<Rule>, pattern: &str) -> Result<Vec<Rule>, LoadError> {
  let re = Regex::new(pattern)?;
  let before = rules.len();
  let kept: Vec<Rule> = rules.into_iter().filter(|r| re.is_match(&r.name)).collect();
  debug!("Filter `{}` kept {} of {} rules", pattern, kept.len(), before);
  Ok(kept)
}
