use num_traits::ToPrimitive;
use std::fmt::Write;

use crate::modules::abstraction::{FactFamily, Session};
use crate::modules::completeness::CompletenessReport;
use crate::modules::determinism::DeterminismReport;
use crate::modules::eval::Counterexample;
use crate::modules::op::opcode_name;
use crate::modules::smt::{Model, Value};
use crate::modules::state::{Revision, Status, StorageClass};
use crate::modules::types::{Rule, Verdict};

fn named<F: Fn(i64) -> Option<&'static str>>(v: &Value, name_of: F) -> String {
  match v.as_int().and_then(|n| n.to_i64()).and_then(name_of) {
    Some(name) => format!("{} ({})", name, v),
    None => v.to_string(),
  }
}

// Renders a value the way rule conditions spell it where the variable has named constants.
pub fn format_value(var_name: &str, v: &Value, session: &Session) -> String {
  let state = session.state();
  if var_name == state.status.name {
    named(v, |n| Status::from_code(n).map(Status::name))
  } else if var_name == state.revision.name {
    named(v, |n| Revision::from_code(n).map(Revision::name))
  } else if session.facts(FactFamily::StorageConf).any(|f| f.var.name == var_name) {
    named(v, |n| StorageClass::from_code(n).map(StorageClass::name))
  } else {
    v.to_string()
  }
}

pub fn format_state(model: &Model, session: &Session, indent: &str) -> String {
  let mut out = String::new();
  for (name, v) in &model.values {
    let _ = write!(out, "{}{} = {}", indent, name, format_value(name, v, session));
    if let Some(label) = session.describe(name) {
      let _ = write!(out, "  # {}", label);
    }
    out.push('\n');
  }
  for (array, cells) in &model.arrays {
    for (index, v) in cells {
      let rendered = if *array == session.state().code_block.name {
        match v.as_int().and_then(|n| n.to_u8()).and_then(opcode_name) {
          Some(op) => format!("{} ({})", op, v),
          None => v.to_string(),
        }
      } else {
        v.to_string()
      };
      let _ = writeln!(out, "{}{}[{}] = {}", indent, array, index, rendered);
    }
  }
  out
}

fn format_counterexample(cex: &Counterexample, session: &Session) -> String {
  let mut out = String::from("\tModel:\n");
  out.push_str(&format_state(&cex.state, session, "\t\t"));
  if cex.confirmed == Some(false) {
    out.push_str("\t(the model does not satisfy the query when re-evaluated)\n");
  }
  out
}

pub fn format_determinism(report: &DeterminismReport, session: &Session) -> String {
  let mut out = String::from("Check determinism ...\n");
  for o in &report.overlaps {
    let _ = writeln!(out, "=> Check rules {} and {}", o.first, o.second);
    out.push_str("\tRules overlap and make specification indeterministic.\n");
    let _ = writeln!(out, "\t{}\t{}", o.first_condition, o.second_condition);
    out.push_str(&format_counterexample(&o.counterexample, session));
  }
  for u in &report.unresolved {
    let _ = writeln!(out, "=> Check rules {} and {}", u.first, u.second);
    let _ = writeln!(out, "\tOverlap could not be decided: {}", u.reason);
  }
  out.push_str(match report.verdict {
    Verdict::Pass => "\tSpecification is deterministic.\n",
    Verdict::Fail => "\tSpecification is not deterministic.\n",
    Verdict::Indeterminate => "\tDeterminism of the specification could not be decided.\n",
  });
  out
}

pub fn format_completeness(report: &CompletenessReport, session: &Session) -> String {
  let mut out = String::from("Check completeness ...\n");
  if let Some(cex) = &report.counterexample {
    out.push_str(&format_counterexample(cex, session));
  }
  match report.verdict {
    Verdict::Pass => out.push_str("\tSpecification is complete.\n"),
    Verdict::Fail => out.push_str("\tSpecification is not complete.\n"),
    Verdict::Indeterminate => {
      let reason = report.reason.as_deref().unwrap_or("unknown");
      let _ = writeln!(out, "\tCompleteness of the specification could not be decided: {}", reason);
    }
  }
  out
}

// One line per rule: name, effect, condition
pub fn format_rules(rules: &[Rule]) -> String {
  let mut out = String::new();
  for r in rules {
    let _ = writeln!(out, "{}\t{}\t{}", r.name, r.effect, r.condition);
  }
  out
}
