//! State schema and reducers
//!
//! Graph state is a JSON object. Each field may declare a [`Reducer`] that
//! controls how a node's partial update merges into the current value. Fields
//! without a declared reducer use [`Reducer::Overwrite`].

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Merge strategy for one state field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// Replace the current value with the delta value (default)
    Overwrite,

    /// Append delta items to an array, skipping items already present
    ///
    /// A non-array delta value is appended as a single item. Used for
    /// log-like fields such as node traces and risk flags.
    AppendUnique,

    /// Keep the current value when the delta value is `null`
    ///
    /// A node that includes the field with a non-null value overwrites it;
    /// `null` means "no explicit value" and preserves what is there.
    PreserveOnNull,
}

/// Field-to-reducer mapping for a graph's state record
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    reducers: HashMap<String, Reducer>,
}

impl StateSchema {
    /// Create a schema where every field overwrites
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a reducer for a field
    pub fn with_field(mut self, field: impl Into<String>, reducer: Reducer) -> Self {
        self.reducers.insert(field.into(), reducer);
        self
    }

    /// Reducer for a field, defaulting to [`Reducer::Overwrite`]
    pub fn reducer_for(&self, field: &str) -> Reducer {
        self.reducers
            .get(field)
            .copied()
            .unwrap_or(Reducer::Overwrite)
    }
}

/// Apply a node's partial update to the current state, field by field
///
/// Only fields present in `delta` are touched. The result is always an
/// object; a non-object current state is replaced by an empty object first.
pub fn apply_delta(schema: &StateSchema, state: &Value, delta: &Value) -> Value {
    let mut merged = match state {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    let Value::Object(delta_map) = delta else {
        return Value::Object(merged);
    };

    for (field, incoming) in delta_map {
        match schema.reducer_for(field) {
            Reducer::Overwrite => {
                merged.insert(field.clone(), incoming.clone());
            }
            Reducer::AppendUnique => {
                let mut items = match merged.get(field) {
                    Some(Value::Array(existing)) => existing.clone(),
                    _ => Vec::new(),
                };
                let additions: Vec<Value> = match incoming {
                    Value::Array(vals) => vals.clone(),
                    Value::Null => Vec::new(),
                    other => vec![other.clone()],
                };
                for item in additions {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                merged.insert(field.clone(), Value::Array(items));
            }
            Reducer::PreserveOnNull => {
                if !incoming.is_null() {
                    merged.insert(field.clone(), incoming.clone());
                }
            }
        }
    }

    Value::Object(merged)
}
