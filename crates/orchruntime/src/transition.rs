use orchcore::{ConditionError, ConditionEvaluator, Context, Transition, Workflow};
use std::cmp::Reverse;

/// Pick the transition to follow out of `current`.
///
/// Candidates are tried by descending priority, ties in declaration order.
/// The first one without a condition, or whose condition holds, wins.
pub fn select_transition<'a>(
    workflow: &'a Workflow,
    current: &str,
    context: &Context,
    evaluator: &dyn ConditionEvaluator,
) -> Result<Option<&'a Transition>, ConditionError> {
    let mut candidates = workflow.outgoing_transitions(current);
    candidates.sort_by_key(|t| Reverse(t.priority));

    for transition in candidates {
        let satisfied = match transition.condition.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(expression) => evaluator.evaluate(expression, context)?,
        };
        if satisfied {
            return Ok(Some(transition));
        }
    }
    Ok(None)
}
