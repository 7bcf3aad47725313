//! # Deeply
//!
//! Deep structural comparison over dynamic JSON-like documents
//! (`serde_json::Value`). This crate is the matching primitive used by the
//! stub selection pipeline: every predicate a stub declares is ultimately
//! evaluated here.
//!
//! ## Operations
//!
//! All entry points take `(expected, actual)` where `expected` is a mapping
//! of predicate fields. An empty `expected` mapping is trivially satisfied.
//!
//! - [`equals`] / [`equals_ignore_array_order`]: exact deep equality over
//!   `expected`'s key set. Mappings must carry the same key set at every
//!   level; sequences compare pointwise, or as multisets when array order
//!   is ignored.
//! - [`contains`]: subset semantics. Every expected key/element must be
//!   found in the actual document; extra actual content is ignored and
//!   sequence containment is always order-insensitive.
//! - [`matches`]: every leaf string in `expected` is a regular expression
//!   that must match the corresponding actual leaf (numbers and booleans
//!   are stringified first). Structure is navigated with subset semantics.
//! - [`rank_match`]: a non-negative score counting how many expected leaves
//!   the actual document satisfies. The score is only meaningful for
//!   ordering candidates under the same predicate kind.
//!
//! ## Numbers
//!
//! Numeric values compare by mathematical value across representations, so
//! the integer `30` and the float `30.0` are equal. Integer comparisons are
//! performed exactly; mixed representations fall back to `f64`.
//!
//! Compiled regular expressions are memoized in a bounded process-wide LRU
//! (see [`get_regex`]); an invalid pattern simply fails to match.

mod cache;

pub use cache::{clear_regex_cache, get_regex, regex_cache_stats, REGEX_CACHE_CAPACITY};

use serde_json::{Map, Number, Value};

/// Exact deep equality of `expected` against `actual`, sequence order
/// significant.
pub fn equals(expected: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
    equals_inner(expected, actual, false)
}

/// Exact deep equality of `expected` against `actual`, treating sequences
/// as multisets at every level.
pub fn equals_ignore_array_order(expected: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
    equals_inner(expected, actual, true)
}

fn equals_inner(expected: &Map<String, Value>, actual: &Map<String, Value>, ignore_order: bool) -> bool {
    if expected.is_empty() {
        return true;
    }
    if expected.len() != actual.len() {
        return false;
    }

    expected.iter().all(|(key, want)| {
        actual
            .get(key)
            .is_some_and(|have| value_equals(want, have, ignore_order))
    })
}

/// Subset containment: every key and sequence element of `expected` must be
/// present in `actual`. Sequence containment is order-insensitive.
pub fn contains(expected: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
    expected.iter().all(|(key, want)| {
        actual
            .get(key)
            .is_some_and(|have| value_contains(want, have))
    })
}

/// Regex matching: leaf strings in `expected` are patterns applied to the
/// corresponding actual leaves. Structure is navigated as in [`contains`].
pub fn matches(expected: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
    expected.iter().all(|(key, want)| {
        actual
            .get(key)
            .is_some_and(|have| value_matches(want, have))
    })
}

/// Score how much of `expected` the actual document satisfies. A satisfied
/// leaf is worth one point; a leaf whose key is present but whose value
/// differs is worth half, so near-misses outrank absent structure. Missing
/// keys contribute nothing. The score is monotone in satisfied structure
/// and is used only for ordering.
pub fn rank_match(expected: &Map<String, Value>, actual: &Map<String, Value>) -> f64 {
    expected
        .iter()
        .map(|(key, want)| actual.get(key).map_or(0.0, |have| value_rank(want, have)))
        .sum()
}

/// Deep equality of two arbitrary values; sequences compare as multisets
/// when `ignore_order` is set. The map-level [`equals`] is the usual entry
/// point; this value-level form serves callers that navigate documents
/// themselves, such as per-field stream matching.
pub fn value_equals(a: &Value, b: &Value, ignore_order: bool) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => number_equals(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            if x.len() != y.len() {
                false
            } else if ignore_order {
                multiset_equals(x, y)
            } else {
                x.iter().zip(y).all(|(xi, yi)| value_equals(xi, yi, false))
            }
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, want)| {
                    y.get(key)
                        .is_some_and(|have| value_equals(want, have, ignore_order))
                })
        }
        _ => false,
    }
}

/// Numeric equality by mathematical value: exact for matching integer
/// representations, via `f64` when the widths differ.
fn number_equals(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Multiset equality under order-insensitive deep equality. Each element on
/// the right may satisfy at most one element on the left.
fn multiset_equals(left: &[Value], right: &[Value]) -> bool {
    let mut used = vec![false; right.len()];
    'outer: for item in left {
        for (slot, candidate) in right.iter().enumerate() {
            if !used[slot] && value_equals(item, candidate, true) {
                used[slot] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

/// Value-level form of [`contains`].
pub fn value_contains(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| {
            have.get(key)
                .is_some_and(|inner| value_contains(value, inner))
        }),
        (Value::Array(want), Value::Array(have)) => {
            let mut used = vec![false; have.len()];
            'outer: for item in want {
                for (slot, candidate) in have.iter().enumerate() {
                    if !used[slot] && value_contains(item, candidate) {
                        used[slot] = true;
                        continue 'outer;
                    }
                }
                return false;
            }
            true
        }
        _ => value_equals(expected, actual, true),
    }
}

/// Value-level form of [`matches`].
pub fn value_matches(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::Object(want) => actual.as_object().is_some_and(|have| {
            want.iter().all(|(key, value)| {
                have.get(key)
                    .is_some_and(|inner| value_matches(value, inner))
            })
        }),
        Value::Array(want) => actual.as_array().is_some_and(|have| {
            let mut used = vec![false; have.len()];
            'outer: for item in want {
                for (slot, candidate) in have.iter().enumerate() {
                    if !used[slot] && value_matches(item, candidate) {
                        used[slot] = true;
                        continue 'outer;
                    }
                }
                return false;
            }
            true
        }),
        Value::String(pattern) => leaf_text(actual).is_some_and(|text| regex_is_match(pattern, &text)),
        _ => value_equals(expected, actual, true),
    }
}

/// Stringify a scalar leaf for regex matching. Structured values have no
/// textual form and never match.
fn leaf_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn regex_is_match(pattern: &str, text: &str) -> bool {
    match get_regex(pattern) {
        Ok(re) => re.is_match(text),
        // Invalid patterns are a stub configuration problem; the predicate
        // fails to match rather than aborting selection.
        Err(_) => false,
    }
}

fn value_rank(expected: &Value, actual: &Value) -> f64 {
    match (expected, actual) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .map(|(key, value)| have.get(key).map_or(0.0, |inner| value_rank(value, inner)))
            .sum(),
        (Value::Array(want), Value::Array(have)) => {
            // Greedy order-insensitive assignment; each actual element
            // contributes to at most one expected element.
            let mut used = vec![false; have.len()];
            let mut total = 0.0;
            for item in want {
                let mut best = 0.0;
                let mut best_slot = None;
                for (slot, candidate) in have.iter().enumerate() {
                    if used[slot] {
                        continue;
                    }
                    let score = value_rank(item, candidate);
                    if score > best {
                        best = score;
                        best_slot = Some(slot);
                    }
                }
                if let Some(slot) = best_slot {
                    used[slot] = true;
                    total += best;
                }
            }
            total
        }
        _ => {
            if value_equals(expected, actual, true) {
                1.0
            } else {
                0.5
            }
        }
    }
}
