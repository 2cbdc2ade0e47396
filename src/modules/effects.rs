use serde::Serialize;
use std::fmt;

// Effects are opaque tags. Two rules have the same effect iff their tokens are equal as written;
// distinct tokens are assumed to produce distinct result states.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "token", rename_all = "lowercase")]
pub enum Effect {
  NoEffect,
  Named(String),
}

impl Effect {
  // Only the exact `noEffect` token is recognized; every other token, including its other
  // spellings and surrounding whitespace, stays distinct.
  pub fn parse(token: &str) -> Self {
    match token {
      "noEffect" => Effect::NoEffect,
      other => Effect::Named(other.to_string()),
    }
  }

  pub fn token(&self) -> &str {
    match self {
      Effect::NoEffect => "noEffect",
      Effect::Named(s) => s,
    }
  }
}

impl fmt::Display for Effect {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.token())
  }
}
