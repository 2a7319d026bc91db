use orchcore::{ConditionError, ConditionEvaluator, Context};
use orchruntime::ExpressionEvaluator;
use serde_json::json;

fn context() -> Context {
    let mut context = Context::new();
    context.insert("approved".to_string(), json!(true));
    context.insert("amount".to_string(), json!(150.0));
    context.insert("status".to_string(), json!("shipped"));
    context.insert("customer".to_string(), json!("ADA"));
    context.insert("tiers".to_string(), json!(["gold", "silver"]));
    context.insert(
        "order".to_string(),
        json!({"total": 99.5, "items": [{"sku": "A-1"}], "notes": ""}),
    );
    context
}

fn eval(expression: &str) -> Result<bool, ConditionError> {
    ExpressionEvaluator.evaluate(expression, &context())
}

#[test]
fn test_literals_and_bare_paths() {
    assert!(eval("true").unwrap());
    assert!(!eval("false").unwrap());
    assert!(!eval("null").unwrap());
    assert!(eval("approved").unwrap());
    assert!(eval("amount").unwrap());
    assert!(!eval("order.notes").unwrap());
    assert!(eval("order.items").unwrap());
    assert!(!eval("order.missing").unwrap());
}

#[test]
fn test_comparisons() {
    assert!(eval("amount > 100").unwrap());
    assert!(eval("amount >= 150").unwrap());
    assert!(!eval("amount < 150").unwrap());
    assert!(eval("order.total <= 99.5").unwrap());
    assert!(eval("status == 'shipped'").unwrap());
    assert!(eval("status != 'pending'").unwrap());
    assert!(eval("order.items[0].sku == 'A-1'").unwrap());
    assert!(eval("order.missing == null").unwrap());
    assert!(eval("'gold' in tiers").unwrap());
    assert!(!eval("'bronze' in tiers").unwrap());
}

#[test]
fn test_logical_operators() {
    assert!(eval("approved && amount > 100").unwrap());
    assert!(!eval("approved && amount > 1000").unwrap());
    assert!(eval("approved == false || status == 'shipped'").unwrap());
    assert!(!eval("(true || false) && false").unwrap());
}

#[test]
fn test_transforms() {
    assert!(eval("customer|lower == 'ada'").unwrap());
    assert!(eval("status|upper == 'SHIPPED'").unwrap());
    assert!(eval("tiers|length > 1").unwrap());
    assert!(!eval("(approved)|not").unwrap());
    assert!(eval("(order.notes)|not").unwrap());
}

#[test]
fn test_evaluate_value_returns_raw_result() {
    let value = ExpressionEvaluator
        .evaluate_value("(amount > 100) ? 'large' : 'small'", &context())
        .unwrap();
    assert_eq!(value, json!("large"));
}

#[test]
fn test_ordering_mismatched_types_fails() {
    assert!(matches!(eval("status > 1"), Err(ConditionError::TypeMismatch(_))));
}

#[test]
fn test_syntax_errors() {
    assert!(matches!(eval("amount >"), Err(ConditionError::Syntax(_))));
    assert!(matches!(eval("(approved"), Err(ConditionError::Syntax(_))));
    assert!(matches!(eval(""), Err(ConditionError::Syntax(_))));
    assert!(matches!(eval("   "), Err(ConditionError::Syntax(_))));
}
