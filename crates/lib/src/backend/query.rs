//! Ordering and windowing of a location's children.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::data::{Index, children_of, ordering::compare_keys};

/// A query operator applied to a location.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOp {
    OrderByKey,
    /// Order by the value at a descendant location of each child.
    OrderByChild(String),
    OrderByValue,
    OrderByPriority,
    LimitToFirst(usize),
    LimitToLast(usize),
    /// Lower bound on the index value, with an optional key tie-breaker.
    StartAt(Value, Option<String>),
    /// Upper bound on the index value, with an optional key tie-breaker.
    EndAt(Value, Option<String>),
    /// Both bounds at once.
    EqualTo(Value, Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
struct Bound {
    value: Value,
    key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Limit {
    First(usize),
    Last(usize),
}

/// The accumulated query parameters of a handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    index: Index,
    start: Option<Bound>,
    end: Option<Bound>,
    limit: Option<Limit>,
}

impl QueryParams {
    /// Returns a copy with `op` applied. A later operator of the same kind
    /// replaces an earlier one.
    pub fn apply(&self, op: QueryOp) -> Self {
        let mut next = self.clone();
        match op {
            QueryOp::OrderByKey => next.index = Index::Key,
            QueryOp::OrderByChild(path) => next.index = Index::Child(path),
            QueryOp::OrderByValue => next.index = Index::Value,
            QueryOp::OrderByPriority => next.index = Index::Priority,
            QueryOp::LimitToFirst(n) => next.limit = Some(Limit::First(n)),
            QueryOp::LimitToLast(n) => next.limit = Some(Limit::Last(n)),
            QueryOp::StartAt(value, key) => next.start = Some(Bound { value, key }),
            QueryOp::EndAt(value, key) => next.end = Some(Bound { value, key }),
            QueryOp::EqualTo(value, key) => {
                next.start = Some(Bound {
                    value: value.clone(),
                    key: key.clone(),
                });
                next.end = Some(Bound { value, key });
            }
        }
        next
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// True when no operator narrows or reorders the location.
    pub fn is_default(&self) -> bool {
        *self == QueryParams::default()
    }

    /// A canonical description of the parameters, empty when none apply.
    pub fn identifier(&self) -> String {
        if self.is_default() {
            return String::new();
        }
        let bound = |bound: &Bound| match &bound.key {
            Some(key) => format!("{},{key}", bound.value),
            None => bound.value.to_string(),
        };
        let mut parts = vec![format!("index={:?}", self.index)];
        if let Some(start) = &self.start {
            parts.push(format!("start={}", bound(start)));
        }
        if let Some(end) = &self.end {
            parts.push(format!("end={}", bound(end)));
        }
        match self.limit {
            Some(Limit::First(n)) => parts.push(format!("first={n}")),
            Some(Limit::Last(n)) => parts.push(format!("last={n}")),
            None => {}
        }
        parts.join("&")
    }

    fn position(&self, key: &str, node: &Value, bound: &Bound) -> Ordering {
        let sort_value = self.index.sort_value(key, node);
        self.index
            .compare_sort_values(&sort_value, &bound.value)
            .then_with(|| match &bound.key {
                Some(bound_key) => compare_keys(key, bound_key),
                None => Ordering::Equal,
            })
    }

    /// The children of `node` that fall inside the query window, in index
    /// order.
    pub fn visible_children(&self, node: &Value) -> Vec<(String, Value)> {
        let mut entries = children_of(node);
        self.index.sort(&mut entries);
        entries.retain(|(key, child)| {
            let after_start = self
                .start
                .as_ref()
                .is_none_or(|start| self.position(key, child, start) != Ordering::Less);
            let before_end = self
                .end
                .as_ref()
                .is_none_or(|end| self.position(key, child, end) != Ordering::Greater);
            after_start && before_end
        });
        match self.limit {
            Some(Limit::First(n)) => entries.truncate(n),
            Some(Limit::Last(n)) if entries.len() > n => {
                entries.drain(..entries.len() - n);
            }
            _ => {}
        }
        entries
    }

    /// The node as seen through the query: the location itself when no
    /// operator applies, otherwise an object of the visible children.
    pub fn view(&self, node: &Value) -> Value {
        if self.is_default() {
            return node.clone();
        }
        let map: Map<String, Value> = self.visible_children(node).into_iter().collect();
        if map.is_empty() {
            Value::Null
        } else {
            Value::Object(map)
        }
    }
}
