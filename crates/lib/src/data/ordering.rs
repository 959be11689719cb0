//! Child ordering rules of the backing store.
//!
//! * Keys: keys that parse as 32-bit integers sort first, numerically; all other
//!   keys follow in lexicographic order.
//! * Priorities: no priority, then numbers, then strings.
//! * Values (used by value and child ordering): `null`, `false`, `true`,
//!   numbers, strings, then objects.
//!
//! Ties under any index are broken by key.

use std::cmp::Ordering;

use serde_json::Value;

use super::{get_path, priority_of, split_path, strip_export};

/// The index a query orders children by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Index {
    /// Order by child key.
    #[default]
    Key,
    /// Order by child priority.
    Priority,
    /// Order by child value.
    Value,
    /// Order by the value of a descendant location (`/`-separated).
    Child(String),
}

impl Index {
    /// The value a child sorts by under this index.
    pub fn sort_value(&self, key: &str, node: &Value) -> Value {
        match self {
            Index::Key => Value::String(key.to_string()),
            Index::Priority => priority_of(node),
            Index::Value => strip_export(node),
            Index::Child(path) => get_path(node, &split_path(path))
                .map(strip_export)
                .unwrap_or(Value::Null),
        }
    }

    /// Compares two children, `(key, exported node)`, under this index.
    pub fn compare(&self, a: (&str, &Value), b: (&str, &Value)) -> Ordering {
        match self {
            Index::Key => compare_keys(a.0, b.0),
            Index::Priority => compare_priorities(&priority_of(a.1), &priority_of(b.1))
                .then_with(|| compare_keys(a.0, b.0)),
            _ => compare_values(&self.sort_value(a.0, a.1), &self.sort_value(b.0, b.1))
                .then_with(|| compare_keys(a.0, b.0)),
        }
    }

    /// Compares a sort value under this index against a bound value.
    pub fn compare_sort_values(&self, a: &Value, b: &Value) -> Ordering {
        match self {
            Index::Key => compare_keys(
                a.as_str().unwrap_or_default(),
                b.as_str().unwrap_or_default(),
            ),
            Index::Priority => compare_priorities(a, b),
            _ => compare_values(a, b),
        }
    }

    /// Sorts child entries in place.
    pub fn sort(&self, entries: &mut [(String, Value)]) {
        entries.sort_by(|a, b| self.compare((&a.0, &a.1), (&b.0, &b.1)));
    }
}

fn as_int_key(key: &str) -> Option<i64> {
    let digits = key.strip_prefix('-').unwrap_or(key);
    if digits.is_empty() || digits.len() > 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // "-0" and zero-padded keys stay strings
    if (digits.len() > 1 && digits.starts_with('0')) || key == "-0" {
        return None;
    }
    let n = key.parse::<i64>().ok()?;
    (i64::from(i32::MIN)..=i64::from(i32::MAX))
        .contains(&n)
        .then_some(n)
}

/// Compares two child keys.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (as_int_key(a), as_int_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn priority_rank(p: &Value) -> u8 {
    match p {
        Value::Number(_) => 1,
        Value::String(_) => 2,
        _ => 0,
    }
}

/// Compares two priorities.
pub fn compare_priorities(a: &Value, b: &Value) -> Ordering {
    priority_rank(a)
        .cmp(&priority_rank(b))
        .then_with(|| match (a, b) {
            (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => Ordering::Equal,
        })
}

fn value_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) | Value::Object(_) => 5,
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    let x = a.as_f64().unwrap_or(0.0);
    let y = b.as_f64().unwrap_or(0.0);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

/// Compares two plain values.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    value_rank(a)
        .cmp(&value_rank(b))
        .then_with(|| match (a, b) {
            (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => Ordering::Equal,
        })
}
