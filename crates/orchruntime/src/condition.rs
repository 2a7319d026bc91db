//! Condition expressions, evaluated as JEXL against the execution context.
//!
//! Context keys are top-level identifiers: `amount > 100`, `order.total`,
//! `order.items[0].sku == 'A-1'`, `'gold' in tiers`. The transforms
//! `lower`, `upper`, `length` and `not` are available (`name|lower`).
//!
//! The context is passed as data and never spliced into the expression.

use jexl_eval::error::EvaluationError;
use jexl_eval::Evaluator;
use orchcore::{ConditionError, ConditionEvaluator, Context};
use serde_json::{json, Value};

/// Default [`ConditionEvaluator`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    /// Evaluate `expression` and return its raw value.
    pub fn evaluate_value(&self, expression: &str, context: &Context) -> Result<Value, ConditionError> {
        if expression.trim().is_empty() {
            return Err(ConditionError::Syntax("empty expression".to_string()));
        }
        let context: serde_json::Map<String, Value> =
            context.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        evaluator()
            .eval_in_context(expression, Value::Object(context))
            .map_err(|e| match &e {
                EvaluationError::ParseError(_) => ConditionError::Syntax(e.to_string()),
                EvaluationError::InvalidBinaryOp { .. } => ConditionError::TypeMismatch(e.to_string()),
                _ => ConditionError::Evaluation(e.to_string()),
            })
    }
}

impl ConditionEvaluator for ExpressionEvaluator {
    fn evaluate(&self, expression: &str, context: &Context) -> Result<bool, ConditionError> {
        Ok(truthy(&self.evaluate_value(expression, context)?))
    }
}

fn evaluator() -> Evaluator<'static> {
    Evaluator::new()
        .with_transform("lower", |args: &[Value]| {
            let s = args.first().and_then(Value::as_str).unwrap_or("");
            Ok(json!(s.to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            let s = args.first().and_then(Value::as_str).unwrap_or("");
            Ok(json!(s.to_uppercase()))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(items)) => items.len(),
                Some(Value::Object(map)) => map.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
        .with_transform("not", |args: &[Value]| {
            Ok(json!(!args.first().is_some_and(truthy)))
        })
}

/// `null`, `false`, `0`, `""` and empty arrays or objects are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
