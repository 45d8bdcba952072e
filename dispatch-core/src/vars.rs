use regex::Regex;
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::DispatchError;
use crate::route::{FilterExpr, Route, RouteVar};

/// Evaluate a single `(var, operator, value)` predicate against a request
/// context. Operator set is pinned to `{==, ~=, >, <, >=, <=, ~~, in}`
/// (SPEC_FULL.md §9, resolving the operator-set Open Question).
pub fn eval_var(predicate: &RouteVar, ctx: &RequestContext) -> bool {
    let Some(actual) = ctx.get_var_str(&predicate.var) else {
        return false;
    };

    match predicate.operator.as_str() {
        "==" => value_as_str(&predicate.value).is_some_and(|v| v == actual),
        "~=" => value_as_str(&predicate.value).is_some_and(|v| v.eq_ignore_ascii_case(&actual)),
        "~~" => value_as_str(&predicate.value)
            .and_then(|pat| Regex::new(&pat).ok())
            .is_some_and(|re| re.is_match(&actual)),
        "in" => match &predicate.value {
            Value::Array(items) => items.iter().any(|item| value_as_str(item).as_deref() == Some(actual.as_str())),
            _ => false,
        },
        op @ (">" | "<" | ">=" | "<=") => numeric_or_lexicographic_compare(op, &actual, &predicate.value),
        _ => false,
    }
}

fn value_as_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn numeric_or_lexicographic_compare(op: &str, actual: &str, expected: &Value) -> bool {
    let expected_str = match value_as_str(expected) {
        Some(s) => s,
        None => return false,
    };

    let ordering = match (actual.parse::<f64>(), expected_str.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b),
        _ => actual.partial_cmp(expected_str.as_str()),
    };

    match (op, ordering) {
        (">", Some(std::cmp::Ordering::Greater)) => true,
        ("<", Some(std::cmp::Ordering::Less)) => true,
        (">=", Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)) => true,
        ("<=", Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)) => true,
        _ => false,
    }
}

/// Conjunction over a list of predicates.
pub fn eval_all(predicates: &[RouteVar], ctx: &RequestContext) -> bool {
    predicates.iter().all(|p| eval_var(p, ctx))
}

fn validate_predicate(route_id: &str, p: &RouteVar) -> Result<(), DispatchError> {
    if p.operator == "~~" {
        let Some(pattern) = p.value.as_str() else {
            return Err(DispatchError::PredicateError {
                route_id: route_id.to_string(),
                message: format!("`~~` operand for `{}` must be a string regex pattern", p.var),
            });
        };
        Regex::new(pattern).map_err(|e| DispatchError::PredicateError {
            route_id: route_id.to_string(),
            message: format!("invalid regex `{pattern}` for `{}`: {e}", p.var),
        })?;
    }
    Ok(())
}

/// Compile-check a route's `vars` and `filter` regex operands ahead of a
/// rebuild. A route whose `~~` operand doesn't compile is skipped rather
/// than silently never matching at request time.
pub fn validate_route_predicates(route: &Route) -> Result<(), DispatchError> {
    for p in &route.vars {
        validate_predicate(&route.id, p)?;
    }
    match &route.filter {
        None => {}
        Some(FilterExpr::All(preds)) => {
            for p in preds {
                validate_predicate(&route.id, p)?;
            }
        }
        Some(FilterExpr::Any(groups)) => {
            for group in groups {
                for p in group {
                    validate_predicate(&route.id, p)?;
                }
            }
        }
    }
    Ok(())
}

/// Evaluate a route's `filter` expression. `None` (no filter configured)
/// always holds.
pub fn eval_filter(filter: &Option<FilterExpr>, ctx: &RequestContext) -> bool {
    match filter {
        None => true,
        Some(FilterExpr::All(preds)) => eval_all(preds, ctx),
        Some(FilterExpr::Any(groups)) => groups.iter().any(|group| eval_all(group, ctx)),
    }
}
