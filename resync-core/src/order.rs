//! Deterministic ordering for consumer-facing collections.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::identity::display_name;

/// What to sort resources by.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// The display name (`metadata.name`, `name`, `Name`), falling back to the id.
    #[default]
    Name,
    /// The resource id.
    Id,
    /// A JSON pointer into the payload, e.g. `/metadata/creationTimestamp`.
    Field(String),
}

/// Sort key plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortOrder {
    pub by: SortKey,
    pub ascending: bool,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self {
            by: SortKey::Name,
            ascending: true,
        }
    }
}

impl SortOrder {
    pub fn new(by: SortKey, ascending: bool) -> Self {
        Self { by, ascending }
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    /// Compare two `(id, payload)` pairs.
    ///
    /// Ties (and missing sort values) are broken by id ascending so the
    /// result is total and independent of insertion order. Resources with
    /// no value for the key sort after those that have one.
    pub fn compare(&self, a: (&str, &Value), b: (&str, &Value)) -> Ordering {
        let primary = match &self.by {
            SortKey::Name => {
                let an = display_name(a.1);
                let bn = display_name(b.1);
                self.directed(an.as_deref().unwrap_or(a.0).cmp(bn.as_deref().unwrap_or(b.0)))
            }
            SortKey::Id => self.directed(a.0.cmp(b.0)),
            SortKey::Field(pointer) => {
                self.compare_optional(a.1.pointer(pointer), b.1.pointer(pointer))
            }
        };
        primary.then_with(|| a.0.cmp(b.0))
    }

    fn directed(&self, ordering: Ordering) -> Ordering {
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }

    /// Missing values go last in either direction.
    fn compare_optional(&self, a: Option<&Value>, b: Option<&Value>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) => self.directed(compare_values(a, b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}
