//! Predicate evaluation for filter and categorize rules.
//!
//! Never fails: input that cannot be compared simply does not satisfy the
//! predicate, so callers must validate criteria elsewhere if they care.

use tabsync_core::{Condition, Method, Transaction};

/// Evaluates `item_value <method> criterion`.
pub fn evaluate(method: Method, item_value: &str, criterion: &str) -> bool {
    match method {
        Method::Gte => compare(item_value, criterion, |a, b| a >= b),
        Method::Gt => compare(item_value, criterion, |a, b| a > b),
        Method::Lte => compare(item_value, criterion, |a, b| a <= b),
        Method::Lt => compare(item_value, criterion, |a, b| a < b),
        Method::Eq => equals(item_value, criterion),
        Method::IsNot => !equals(item_value, criterion),
        Method::Includes => includes(item_value, criterion),
        Method::Excludes => !includes(item_value, criterion),
        Method::StartsWith => item_value.starts_with(criterion),
        Method::EndsWith => item_value.ends_with(criterion),
    }
}

/// Evaluates a rule condition against the named field of `tx`.
pub fn matches(condition: &Condition, tx: &Transaction) -> bool {
    evaluate(
        condition.method,
        &tx.value_of(condition.property),
        &condition.criterion,
    )
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn compare(item_value: &str, criterion: &str, op: impl Fn(f64, f64) -> bool) -> bool {
    match (parse_number(item_value), parse_number(criterion)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn equals(item_value: &str, criterion: &str) -> bool {
    match parse_number(item_value) {
        None => item_value.to_lowercase() == criterion.to_lowercase(),
        Some(a) => parse_number(criterion).is_some_and(|b| a == b),
    }
}

/// Any comma-separated needle occurring in the lower-cased value.
fn includes(item_value: &str, criterion: &str) -> bool {
    let haystack = item_value.to_lowercase();
    criterion
        .split(',')
        .map(|needle| needle.trim().to_lowercase())
        .filter(|needle| !needle.is_empty())
        .any(|needle| haystack.contains(&needle))
}
