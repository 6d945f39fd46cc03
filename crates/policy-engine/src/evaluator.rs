//! Condition evaluation: a pure walk over a compiled [`Condition`] tree
//! against a resolved [`AttributeBags`], with no I/O and no allocation
//! beyond what the tree itself holds.

use std::cmp::Ordering;
use std::collections::HashMap;

use globset::GlobMatcher;
use reaper_core::{AttrValue, AttributeBags, CompareOp, Condition, Value};

/// Evaluate `condition` against `bags`.
///
/// `glob_cache` is the owning [`reaper_core::CompiledPolicy`]'s
/// pre-compiled pattern cache; a `like` node whose pattern is missing
/// from it (should never happen for a policy that went through
/// `rebuild_glob_cache`) evaluates to `false` rather than panicking.
#[must_use]
pub fn evaluate(condition: &Condition, bags: &AttributeBags, glob_cache: &HashMap<String, GlobMatcher>) -> bool {
    match condition {
        Condition::Literal(value) => *value,
        Condition::Compare { op, lhs, rhs } => match (resolve(lhs, bags), resolve(rhs, bags)) {
            (Some(l), Some(r)) => compare(*op, &l, &r),
            _ => false,
        },
        Condition::Like { lhs, pattern } => match resolve(lhs, bags) {
            Some(AttrValue::Text(text)) => glob_cache.get(pattern).is_some_and(|m| m.is_match(&text)),
            _ => false,
        },
        Condition::Has(attr_ref) => bags.has(&attr_ref.root, &attr_ref.namespace, &attr_ref.key),
        Condition::In { lhs, list } => match resolve(lhs, bags) {
            Some(value) => resolve_list(list, bags).contains(&value),
            None => false,
        },
        Condition::Not(inner) => !evaluate(inner, bags, glob_cache),
        Condition::And(items) => items.iter().all(|c| evaluate(c, bags, glob_cache)),
        Condition::Or(items) => items.iter().any(|c| evaluate(c, bags, glob_cache)),
        Condition::If {
            condition,
            then_branch,
            else_branch,
        } => {
            if evaluate(condition, bags, glob_cache) {
                evaluate(then_branch, bags, glob_cache)
            } else {
                evaluate(else_branch, bags, glob_cache)
            }
        }
    }
}

/// Resolve a condition operand to a concrete value, looking attribute
/// references up in `bags`. An absent attribute resolves to `None`, not
/// a default — callers decide what that means (usually "condition is
/// false").
fn resolve(value: &Value, bags: &AttributeBags) -> Option<AttrValue> {
    match value {
        Value::Number(n) => Some(AttrValue::Number(*n)),
        Value::Text(s) => Some(AttrValue::Text(s.clone())),
        Value::Bool(b) => Some(AttrValue::Bool(*b)),
        Value::List(items) => Some(AttrValue::List(items.iter().filter_map(|v| resolve(v, bags)).collect())),
        Value::Attr(attr_ref) => bags.lookup(&attr_ref.root, &attr_ref.namespace, &attr_ref.key).cloned(),
    }
}

/// Resolve the right-hand side of an `in` condition to the flat list of
/// values it tests membership against. A non-list resolution (e.g. an
/// attribute that happens to hold a scalar) is treated as a one-element
/// list, so `x in single_valued_attr` degrades to an equality test.
fn resolve_list(value: &Value, bags: &AttributeBags) -> Vec<AttrValue> {
    match resolve(value, bags) {
        Some(AttrValue::List(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

/// Compare two resolved values under `op`.
///
/// Same-variant comparisons use the natural ordering for that type
/// (lexicographic for text, numeric for number, `false < true` for
/// bool). Mismatched variants (comparing a number to text, say) are
/// never equal: `Eq` is `false`, `Ne` is `true`, and every ordering
/// operator is `false` — a malformed policy degrades to "never matches"
/// rather than an arbitrary ordering.
fn compare(op: CompareOp, lhs: &AttrValue, rhs: &AttrValue) -> bool {
    let ordering = match (lhs, rhs) {
        (AttrValue::Number(a), AttrValue::Number(b)) => a.partial_cmp(b),
        (AttrValue::Text(a), AttrValue::Text(b)) => a.partial_cmp(b),
        (AttrValue::Bool(a), AttrValue::Bool(b)) => a.partial_cmp(b),
        (AttrValue::List(a), AttrValue::List(b)) => {
            return match op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                _ => false,
            }
        }
        _ => None,
    };

    let Some(ordering) = ordering else {
        return matches!(op, CompareOp::Ne);
    };

    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}
