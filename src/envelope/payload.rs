//! Dynamic payload graph and its cycle-safe JSON transform.
//!
//! Plugins hand arbitrary data to the callback context. Containers are shared
//! nodes, so a payload may alias the same node several times or contain
//! itself. [`Payload::to_json`] never fails and never loops:
//!
//! - primitives pass through unchanged
//! - functions and `undefined` are dropped (`null` inside arrays)
//! - a container that is an active ancestor becomes `"[Circular <key>: <type>]"`
//! - a container nested deeper than [`MAX_DEPTH`] becomes `"[MaxDepth <key>: <type>]"`
//!
//! Siblings may repeat a node freely; only the path currently being
//! serialized is tracked.
//!
//! Cyclic graphs keep their nodes alive; call [`Payload::clear`] on one
//! member of the cycle to release it.

use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Maximum container nesting emitted by [`Payload::to_json`].
pub const MAX_DEPTH: usize = 200;

type Entries = Vec<(String, Payload)>;

/// A value handed to the callback context.
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// A callable value; never serialized.
    Function,
    Array(Arc<Mutex<Vec<Payload>>>),
    Object(Arc<Mutex<Entries>>),
}

fn locked<T>(node: &Mutex<T>) -> MutexGuard<'_, T> {
    node.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Payload {
    /// A new, empty object node.
    pub fn object() -> Self {
        Payload::Object(Arc::new(Mutex::new(Vec::new())))
    }

    /// A new, empty array node.
    pub fn array() -> Self {
        Payload::Array(Arc::new(Mutex::new(Vec::new())))
    }

    /// Set `key` on an object node, replacing an existing entry in place.
    ///
    /// Returns `false` when `self` is not an object.
    pub fn insert(&self, key: impl Into<String>, value: Payload) -> bool {
        let Payload::Object(node) = self else {
            return false;
        };
        let key = key.into();
        let mut entries = locked(node);
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
        true
    }

    /// Append to an array node. Returns `false` when `self` is not an array.
    pub fn push(&self, value: Payload) -> bool {
        let Payload::Array(node) = self else {
            return false;
        };
        locked(node).push(value);
        true
    }

    /// Drop every child of a container node, breaking any cycle through it.
    pub fn clear(&self) {
        match self {
            Payload::Array(node) => locked(node).clear(),
            Payload::Object(node) => locked(node).clear(),
            _ => {}
        }
    }

    /// Child count of a container node, 0 for primitives.
    pub fn len(&self) -> usize {
        match self {
            Payload::Array(node) => locked(node).len(),
            Payload::Object(node) => locked(node).len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `typeof`-style name used in transform markers.
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Undefined => "undefined",
            Payload::Null | Payload::Array(_) | Payload::Object(_) => "object",
            Payload::Bool(_) => "boolean",
            Payload::Number(_) => "number",
            Payload::String(_) => "string",
            Payload::Function => "function",
        }
    }

    /// Node identity for containers.
    fn node_id(&self) -> Option<usize> {
        match self {
            Payload::Array(node) => Some(Arc::as_ptr(node) as *const () as usize),
            Payload::Object(node) => Some(Arc::as_ptr(node) as *const () as usize),
            _ => None,
        }
    }

    /// Whether both payloads are the same container node.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        matches!((self.node_id(), other.node_id()), (Some(a), Some(b)) if a == b)
    }

    /// Cycle- and depth-safe conversion to JSON. A dropped root becomes `null`.
    pub fn to_json(&self) -> Value {
        Censor::default().visit("", self).unwrap_or(Value::Null)
    }
}

/// Walks a payload keeping the chain of open containers.
#[derive(Default)]
struct Censor {
    ancestors: Vec<usize>,
}

impl Censor {
    /// `None` means the value is dropped from its parent.
    fn visit(&mut self, key: &str, value: &Payload) -> Option<Value> {
        let id = match value {
            Payload::Undefined | Payload::Function => return None,
            Payload::Null => return Some(Value::Null),
            Payload::Bool(b) => return Some(Value::Bool(*b)),
            Payload::Number(n) => return Some(Value::Number(n.clone())),
            Payload::String(s) => return Some(Value::String(s.clone())),
            Payload::Array(_) | Payload::Object(_) => value.node_id()?,
        };

        if self.ancestors.contains(&id) {
            return Some(Value::String(format!(
                "[Circular {}: {}]",
                key,
                value.type_name()
            )));
        }
        if self.ancestors.len() >= MAX_DEPTH {
            return Some(Value::String(format!(
                "[MaxDepth {}: {}]",
                key,
                value.type_name()
            )));
        }

        self.ancestors.push(id);
        // Snapshot the children so no lock is held while descending.
        let out = match value {
            Payload::Array(node) => {
                let items = locked(node).clone();
                Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| self.visit(&i.to_string(), item).unwrap_or(Value::Null))
                        .collect(),
                )
            }
            Payload::Object(node) => {
                let entries = locked(node).clone();
                let mut map = Map::with_capacity(entries.len());
                for (k, v) in &entries {
                    if let Some(json) = self.visit(k, v) {
                        map.insert(k.clone(), json);
                    }
                }
                Value::Object(map)
            }
            _ => Value::Null,
        };
        self.ancestors.pop();
        Some(out)
    }
}

impl fmt::Debug for Payload {
    // Shallow on purpose: a payload may contain itself.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Undefined => write!(f, "Undefined"),
            Payload::Null => write!(f, "Null"),
            Payload::Bool(b) => write!(f, "Bool({})", b),
            Payload::Number(n) => write!(f, "Number({})", n),
            Payload::String(s) => write!(f, "String({:?})", s),
            Payload::Function => write!(f, "Function"),
            Payload::Array(_) => write!(f, "Array(len={})", self.len()),
            Payload::Object(_) => write!(f, "Object(len={})", self.len()),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Bool(b),
            Value::Number(n) => Payload::Number(n),
            Value::String(s) => Payload::String(s),
            Value::Array(items) => Payload::Array(Arc::new(Mutex::new(
                items.into_iter().map(Payload::from).collect(),
            ))),
            Value::Object(map) => Payload::Object(Arc::new(Mutex::new(
                map.into_iter().map(|(k, v)| (k, Payload::from(v))).collect(),
            ))),
        }
    }
}

impl From<&Value> for Payload {
    fn from(value: &Value) -> Self {
        Payload::from(value.clone())
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::String(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::String(value)
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Bool(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Payload::Number(Number::from(value))
    }
}

impl From<u64> for Payload {
    fn from(value: u64) -> Self {
        Payload::Number(Number::from(value))
    }
}

impl From<i32> for Payload {
    fn from(value: i32) -> Self {
        Payload::Number(Number::from(value))
    }
}

impl From<f64> for Payload {
    /// Non-finite numbers serialize as `null`, like JSON does.
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Payload::Null, Payload::Number)
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map_or(Payload::Undefined, Into::into)
    }
}
