//! Record membership predicates.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Decides whether a record belongs to the merged set, given its merged
/// value, its key and the priority of its master record.
pub type Predicate = Arc<dyn Fn(&Value, &str, &Value) -> bool + Send + Sync>;

/// An ordered list of predicates. A record passes when every predicate
/// accepts it; the empty filter accepts everything.
#[derive(Clone, Default)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn test(&self, data: &Value, key: &str, priority: &Value) -> bool {
        self.predicates
            .iter()
            .all(|predicate| predicate(data, key, priority))
    }
}
