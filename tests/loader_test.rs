use rhospec::modules::abstraction::Session;
use rhospec::modules::effects::Effect;
use rhospec::modules::expr::boolean;
use rhospec::modules::loader::{filter_rules, load_rule_file, load_rules, LoadError};
use rhospec::modules::state::StateModel;
use std::path::Path;

fn load(text: &str) -> Result<Vec<rhospec::modules::types::Rule>, LoadError> {
  let mut session = Session::new(StateModel::new());
  load_rules(text, &mut session)
}

#[test]
fn test_load_single_rule() {
  let rules =
    load(r#"[("add_regular", And(status == running, code(pc) == ADD, stackSize >= 2, gas >= 3), "noEffect")]"#).unwrap();
  assert_eq!(rules.len(), 1);
  assert_eq!(rules[0].name, "add_regular");
  assert_eq!(rules[0].effect, Effect::NoEffect);
  assert_eq!(rules[0].condition.to_string(), "And(status == 0, code_block[pc] == 1, stackSize >= 2, gas >= 3)");
}

#[test]
fn test_load_empty_rule_set() {
  assert!(load("[]").unwrap().is_empty());
  assert!(load("  # nothing here\n[ ]\n").unwrap().is_empty());
}

#[test]
fn test_lowercase_booleans() {
  let rules = load("[('a', true, 'x'), ('b', False, 'y'),]").unwrap();
  assert_eq!(rules[0].condition, boolean(true));
  assert_eq!(rules[1].condition, boolean(false));
  assert_eq!(rules[1].effect, Effect::Named("y".to_string()));
}

#[test]
fn test_literals_and_constants() {
  let rules = load(
    r#"[
      # hex, powers and named constants
      ("r", And(gas < 0x10, pc < 2**8, revision >= Cancun, pc < MaxCodeLen, status < NumStatusCodes), "e"),
    ]"#,
  )
  .unwrap();
  assert_eq!(rules[0].condition.to_string(), "And(gas < 16, pc < 256, revision >= 5, pc < 24576, status < 4)");
}

#[test]
fn test_param_and_arithmetic() {
  let rules = load(r#"[("r", param(0) + param(1) * 2 == -1, "e")]"#).unwrap();
  assert_eq!(rules[0].condition.to_string(), "(stack[stackSize - 1] + (stack[stackSize - 2] * 2)) == (-1)");
}

#[test]
fn test_chained_comparison() {
  let rules = load(r#"[("r", 0 <= gas < 10, "e")]"#).unwrap();
  assert_eq!(rules[0].condition.to_string(), "And(0 <= gas, gas < 10)");
}

#[test]
fn test_facts_are_memoized_across_rules() {
  let mut session = Session::new(StateModel::new());
  let rules = load_rules(
    r#"[
      ("cold", account_cold(param(1)), "a"),
      ("warm", account_warm(param(1)), "b"),
      ("deleg", WarmDelegationDesignation(param(1)), "c"),
    ]"#,
    &mut session,
  )
  .unwrap();
  assert_eq!(rules[0].condition.to_string(), "cold_account_0");
  assert_eq!(rules[1].condition.to_string(), "Not(cold_account_0)");
  assert_eq!(rules[2].condition.to_string(), "And(deleg_desig_0, Not(cold_deleg_0))");
  assert_eq!(session.len(), 3);
}

#[test]
fn test_storage_conf_rule() {
  let mut session = Session::new(StateModel::new());
  let rules =
    load_rules(r#"[("sstore", storageConf(StorageAdded, param(0), param(1)), "a")]"#, &mut session).unwrap();
  assert_eq!(rules[0].condition.to_string(), "storage_conf_0 == 1");
  assert_eq!(session.describe("storage_conf_0"), Some("storageConf(stack[stackSize - 1], stack[stackSize - 2])".to_string()));
}

#[test]
fn test_display_reparses_to_same_condition() {
  let text = r#"[("r", And(status == running, param(0) < 0 - 5, Not(readOnly), If(gas > 3, stackSize, 2) == 1), "e")]"#;
  let first = load(text).unwrap();
  let rendered = format!("[(\"r\", {}, \"e\")]", first[0].condition);
  let second = load(&rendered).unwrap();
  assert_eq!(first[0].condition, second[0].condition);
}

#[test]
fn test_unknown_identifier() {
  match load(r#"[("r", foo == 1, "e")]"#) {
    Err(LoadError::Syntax { line, col, msg }) => {
      assert_eq!((line, col), (1, 8));
      assert!(msg.contains("foo"));
    }
    other => panic!("unexpected result: {:?}", other),
  }
}

#[test]
fn test_error_position_on_later_line() {
  match load("[\n  (\"r\", gas >= 1, \"e\"),\n  (\"s\", Bogus(gas), \"e\")\n]") {
    Err(LoadError::Syntax { line, col, .. }) => assert_eq!((line, col), (3, 9)),
    other => panic!("unexpected result: {:?}", other),
  }
}

#[test]
fn test_condition_must_be_boolean() {
  assert!(matches!(load(r#"[("r", gas + 1, "e")]"#), Err(LoadError::Syntax { .. })));
}

#[test]
fn test_sort_mismatch() {
  assert!(matches!(load(r#"[("r", readOnly == 1, "e")]"#), Err(LoadError::Syntax { .. })));
  assert!(matches!(load(r#"[("r", And(gas), "e")]"#), Err(LoadError::Syntax { .. })));
  assert!(matches!(load(r#"[("r", stack == 1, "e")]"#), Err(LoadError::Syntax { .. })));
}

#[test]
fn test_arity_mismatch() {
  assert!(matches!(load(r#"[("r", Not(readOnly, readOnly), "e")]"#), Err(LoadError::Syntax { .. })));
  assert!(matches!(load(r#"[("r", storageConf(1, 2) == 1, "e")]"#), Err(LoadError::Syntax { .. })));
}

#[test]
fn test_abstraction_error_leaves_session_untouched() {
  let mut session = Session::new(StateModel::new());
  let result = load_rules(r#"[("a", account_cold(pc), "x"), ("b", isCode(readOnly), "y")]"#, &mut session);
  assert!(matches!(result, Err(LoadError::Abstraction { line: 1, .. })));
  assert!(session.is_empty());
}

#[test]
fn test_deep_nesting_is_rejected() {
  let deep = format!("[(\"r\", {}gas{} > 1, \"e\")]", "(".repeat(10_000), ")".repeat(10_000));
  match load(&deep) {
    Err(LoadError::Syntax { msg, .. }) => assert!(msg.contains("nested")),
    other => panic!("unexpected result: {:?}", other),
  }
  let negations = format!("[(\"r\", {}gas > 1, \"e\")]", "-".repeat(10_000));
  assert!(matches!(load(&negations), Err(LoadError::Syntax { .. })));

  let shallow = format!("[(\"r\", {}gas{} > 1, \"e\")]", "(".repeat(20), ")".repeat(20));
  assert_eq!(load(&shallow).unwrap()[0].condition.to_string(), "gas > 1");
}

#[test]
fn test_duplicate_rule_names() {
  let result = load(r#"[("r", gas > 1, "a"), ("r", gas > 2, "b")]"#);
  assert!(matches!(result, Err(LoadError::DuplicateRule { ref name, .. }) if name == "r"));
}

#[test]
fn test_malformed_input() {
  assert!(matches!(load(r#"[("r", gas > 1, "a")"#), Err(LoadError::Syntax { .. })));
  assert!(matches!(load(r#"[("r", gas > 1, "a)]"#), Err(LoadError::Syntax { .. })));
  assert!(matches!(load(r#"[("r", gas > 1 "a")]"#), Err(LoadError::Syntax { .. })));
  assert!(matches!(load(r#"[("r", gas ** 2 > 1, "a")]"#), Err(LoadError::Syntax { .. })));
  assert!(matches!(load("[] trailing"), Err(LoadError::Syntax { .. })));
}

#[test]
fn test_filter_rules() {
  let rules = load(r#"[("add_regular", True, "a"), ("mul_regular", True, "b"), ("add_underflow", True, "c")]"#).unwrap();
  let kept = filter_rules(rules.clone(), "^add_").unwrap();
  let names: Vec<&str> = kept.iter().map(|r| r.name.as_str()).collect();
  assert_eq!(names, vec!["add_regular", "add_underflow"]);

  assert!(matches!(filter_rules(rules, "("), Err(LoadError::Filter(_))));
}

#[test]
fn test_missing_file() {
  let mut session = Session::new(StateModel::new());
  let result = load_rule_file(Path::new("/nonexistent/rules.txt"), &mut session);
  assert!(matches!(result, Err(LoadError::Io { .. })));
}
