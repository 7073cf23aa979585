//! Where-clause evaluation (spec §4.1 "Where-clause semantics").
//!
//! Operators are evaluated against anything implementing [`Filterable`] so
//! that the same evaluator works over freshly-materialized entity maps and
//! over cached/decoded remote rows alike.

use serde_json::Value;
use std::cmp::Ordering;

/// A row that can answer "what's the value of attribute `name`".
pub trait Filterable {
    fn get(&self, name: &str) -> Option<&Value>;
}

impl Filterable for serde_json::Map<String, Value> {
    fn get(&self, name: &str) -> Option<&Value> { serde_json::Map::get(self, name) }
}

impl Filterable for std::collections::BTreeMap<String, Value> {
    fn get(&self, name: &str) -> Option<&Value> { std::collections::BTreeMap::get(self, name) }
}

/// Natural order over JSON scalars used by `$gt`/`$gte`/`$lt`/`$lte` and by
/// sorting. `null` compares as "unknown" and fails all relational operators
/// (spec §4.1); callers that need the `null`-sorts-last/first rule (§4.1
/// "Order semantics") special-case it themselves rather than going through
/// this comparator.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match compare_values(a, b) {
        Some(Ordering::Equal) => true,
        Some(_) => false,
        None => a == b,
    }
}

fn sql_like(haystack: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (haystack, pattern) =
        if case_insensitive { (haystack.to_lowercase(), pattern.to_lowercase()) } else { (haystack.to_string(), pattern.to_string()) };
    like_match(haystack.as_bytes(), pattern.as_bytes())
}

/// Minimal SQL `LIKE` matcher: `%` = any run of characters, everything else literal.
fn like_match(s: &[u8], p: &[u8]) -> bool {
    match p.first() {
        None => s.is_empty(),
        Some(b'%') => like_match(s, &p[1..]) || (!s.is_empty() && like_match(&s[1..], p)),
        Some(c) => !s.is_empty() && s[0] == *c && like_match(&s[1..], &p[1..]),
    }
}

/// Evaluate a `where` clause (spec §4.1) against `item`. Unknown operator
/// keys are silently treated as "no constraint" — a documented quirk (spec
/// §8, §9) rather than an error.
pub fn matches<F: Filterable>(item: &F, where_clause: &Value) -> bool {
    match where_clause {
        Value::Object(map) => map.iter().all(|(key, constraint)| match key.as_str() {
            "$and" => constraint.as_array().map(|arr| arr.iter().all(|c| matches(item, c))).unwrap_or(true),
            "$or" => constraint.as_array().map(|arr| arr.iter().any(|c| matches(item, c))).unwrap_or(false),
            attr => matches_attr(item.get(attr), constraint),
        }),
        _ => true,
    }
}

fn matches_attr(value: Option<&Value>, constraint: &Value) -> bool {
    match constraint {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => ops.iter().all(|(op, operand)| match op.as_str() {
            "$eq" => value.map(|v| values_equal(v, operand)).unwrap_or(false),
            "$ne" => !value.map(|v| values_equal(v, operand)).unwrap_or(false),
            "$gt" => relational(value, operand, |o| o == Ordering::Greater),
            "$gte" => relational(value, operand, |o| o != Ordering::Less),
            "$lt" => relational(value, operand, |o| o == Ordering::Less),
            "$lte" => relational(value, operand, |o| o != Ordering::Greater),
            "$in" => operand.as_array().map(|arr| value.map(|v| arr.iter().any(|a| values_equal(a, v))).unwrap_or(false)).unwrap_or(false),
            "$nin" => {
                operand.as_array().map(|arr| !value.map(|v| arr.iter().any(|a| values_equal(a, v))).unwrap_or(false)).unwrap_or(true)
            }
            "$like" => like(value, operand, false),
            "$ilike" => like(value, operand, true),
            "$contains" => value.and_then(Value::as_array).map(|arr| arr.iter().any(|a| values_equal(a, operand))).unwrap_or(false),
            "$size" => value.and_then(Value::as_array).map(|arr| matches_attr(Some(&Value::from(arr.len())), operand)).unwrap_or(false),
            "$exists" => {
                let want = operand.as_bool().unwrap_or(true);
                value.is_some() == want
            }
            "$isNull" => {
                let want = operand.as_bool().unwrap_or(true);
                (value.is_none() || matches!(value, Some(Value::Null))) == want
            }
            _ => true, // unknown operator: no constraint (spec §4.1, documented quirk)
        }),
        // Bare value: equality.
        other => value.map(|v| values_equal(v, other)).unwrap_or(false),
    }
}

fn relational(value: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(v) => compare_values(v, operand).map(&accept).unwrap_or(false),
        None => false, // null compares as "unknown", fails all relational operators
    }
}

fn like(value: Option<&Value>, operand: &Value, case_insensitive: bool) -> bool {
    match (value.and_then(Value::as_str), operand.as_str()) {
        (Some(s), Some(pattern)) => sql_like(s, pattern, case_insensitive),
        _ => false,
    }
}
