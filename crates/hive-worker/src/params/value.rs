// ParamValue: the dynamic value held by a parameter.
//
// Lists and maps are shared handles. Cloning a `ParamValue` clones the
// handle, not the container, so every parameter that resolves to the same
// container sees mutations made through any of them. Explicit copies go
// through `shallow_copy` / `deep_copy`.

use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use hive_common::constants::UNSERIALIZABLE_PLACEHOLDER;

pub type SharedList = Arc<RwLock<Vec<ParamValue>>>;
pub type SharedMap = Arc<RwLock<BTreeMap<String, ParamValue>>>;

/// A parameter value: null, boolean, number, string, list or string-keyed map.
#[derive(Debug, Clone, Default)]
pub enum ParamValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(SharedList),
    Map(SharedMap),
}

impl ParamValue {
    /// A new list container.
    pub fn list(items: Vec<ParamValue>) -> Self {
        ParamValue::List(Arc::new(RwLock::new(items)))
    }

    /// A new map container.
    pub fn map(entries: BTreeMap<String, ParamValue>) -> Self {
        ParamValue::Map(Arc::new(RwLock::new(entries)))
    }

    /// Convert a JSON document. Every container becomes a new handle.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Int(i),
                None => ParamValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ParamValue::String(s.clone()),
            Value::Array(items) => ParamValue::list(items.iter().map(Self::from_json).collect()),
            Value::Object(entries) => ParamValue::map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON.
    ///
    /// A container that contains itself, or a non-finite float, has no JSON
    /// form; the offending node is replaced by a placeholder string.
    pub fn to_json(&self) -> Value {
        let mut visiting = Vec::new();
        self.to_json_inner(&mut visiting)
    }

    fn to_json_inner(&self, visiting: &mut Vec<usize>) -> Value {
        match self {
            ParamValue::Null => Value::Null,
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Int(i) => Value::Number((*i).into()),
            ParamValue::Float(f) => match Number::from_f64(*f) {
                Some(n) => Value::Number(n),
                None => unserializable(self),
            },
            ParamValue::String(s) => Value::String(s.clone()),
            ParamValue::List(list) => {
                let addr = Arc::as_ptr(list) as usize;
                if visiting.contains(&addr) {
                    return unserializable(self);
                }
                visiting.push(addr);
                let items = list.read().iter().map(|v| v.to_json_inner(visiting)).collect();
                visiting.pop();
                Value::Array(items)
            }
            ParamValue::Map(map) => {
                let addr = Arc::as_ptr(map) as usize;
                if visiting.contains(&addr) {
                    return unserializable(self);
                }
                visiting.push(addr);
                let entries: Map<String, Value> = map
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_inner(visiting)))
                    .collect();
                visiting.pop();
                Value::Object(entries)
            }
        }
    }

    /// Name of the value kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ParamValue::Null => "null",
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::String(_) => "string",
            ParamValue::List(_) => "list",
            ParamValue::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            ParamValue::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            ParamValue::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&SharedList> {
        match self {
            ParamValue::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&SharedMap> {
        match self {
            ParamValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Whether both values are the very same container.
    pub fn ptr_eq(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (ParamValue::List(a), ParamValue::List(b)) => Arc::ptr_eq(a, b),
            (ParamValue::Map(a), ParamValue::Map(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Truthiness: null, false, zero, and empty strings/containers are false.
    pub fn truthy(&self) -> bool {
        match self {
            ParamValue::Null => false,
            ParamValue::Bool(b) => *b,
            ParamValue::Int(i) => *i != 0,
            ParamValue::Float(f) => *f != 0.0,
            ParamValue::String(s) => !s.is_empty(),
            ParamValue::List(list) => !list.read().is_empty(),
            ParamValue::Map(map) => !map.read().is_empty(),
        }
    }

    /// Textual form used when a value is spliced into a larger string.
    ///
    /// Strings are used verbatim; everything else uses its compact JSON form.
    pub fn stringify(&self) -> String {
        match self {
            ParamValue::String(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }

    /// A new container holding the same element handles.
    pub fn shallow_copy(&self) -> ParamValue {
        match self {
            ParamValue::List(list) => ParamValue::list(list.read().clone()),
            ParamValue::Map(map) => ParamValue::map(map.read().clone()),
            other => other.clone(),
        }
    }

    /// A fully independent copy. Self-containing containers are cut at the
    /// point where they would recurse, keeping the shared handle there.
    pub fn deep_copy(&self) -> ParamValue {
        let mut visiting = Vec::new();
        self.deep_copy_inner(&mut visiting)
    }

    fn deep_copy_inner(&self, visiting: &mut Vec<usize>) -> ParamValue {
        match self {
            ParamValue::List(list) => {
                let addr = Arc::as_ptr(list) as usize;
                if visiting.contains(&addr) {
                    return self.clone();
                }
                visiting.push(addr);
                let items = list.read().iter().map(|v| v.deep_copy_inner(visiting)).collect();
                visiting.pop();
                ParamValue::list(items)
            }
            ParamValue::Map(map) => {
                let addr = Arc::as_ptr(map) as usize;
                if visiting.contains(&addr) {
                    return self.clone();
                }
                visiting.push(addr);
                let entries = map
                    .read()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy_inner(visiting)))
                    .collect();
                visiting.pop();
                ParamValue::map(entries)
            }
            other => other.clone(),
        }
    }
}

fn unserializable(value: &ParamValue) -> Value {
    tracing::warn!("Cannot serialize a {} value in JSON", value.kind_name());
    Value::String(UNSERIALIZABLE_PLACEHOLDER.to_string())
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        let mut comparing = Vec::new();
        self.eq_inner(other, &mut comparing)
    }
}

impl ParamValue {
    /// Structural equality. A pair of containers met again while it is
    /// still being compared counts as equal, so self-containing values end.
    fn eq_inner(&self, other: &Self, comparing: &mut Vec<(usize, usize)>) -> bool {
        match (self, other) {
            (ParamValue::Null, ParamValue::Null) => true,
            (ParamValue::String(a), ParamValue::String(b)) => a == b,
            (ParamValue::List(a), ParamValue::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Arc::as_ptr(a) as usize, Arc::as_ptr(b) as usize);
                if comparing.contains(&pair) {
                    return true;
                }
                comparing.push(pair);
                let (a, b) = (a.read(), b.read());
                let equal = a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.eq_inner(y, comparing));
                comparing.pop();
                equal
            }
            (ParamValue::Map(a), ParamValue::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Arc::as_ptr(a) as usize, Arc::as_ptr(b) as usize);
                if comparing.contains(&pair) {
                    return true;
                }
                comparing.push(pair);
                let (a, b) = (a.read(), b.read());
                let equal = a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.eq_inner(vb, comparing));
                comparing.pop();
                equal
            }
            (ParamValue::Int(a), ParamValue::Int(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        ParamValue::from_json(&value)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<i32> for ParamValue {
    fn from(i: i32) -> Self {
        ParamValue::Int(i64::from(i))
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<Vec<ParamValue>> for ParamValue {
    fn from(items: Vec<ParamValue>) -> Self {
        ParamValue::list(items)
    }
}

impl From<BTreeMap<String, ParamValue>> for ParamValue {
    fn from(entries: BTreeMap<String, ParamValue>) -> Self {
        ParamValue::map(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion_keeps_kinds() {
        let value = ParamValue::from_json(&json!({"a": [1, 2.5, "x", null, true]}));
        let map = value.as_map().unwrap().read();
        let list = map["a"].as_list().unwrap().read();
        assert!(matches!(list[0], ParamValue::Int(1)));
        assert!(matches!(list[1], ParamValue::Float(f) if f == 2.5));
        assert_eq!(list[2].as_str(), Some("x"));
        assert!(list[3].is_null());
        assert!(matches!(list[4], ParamValue::Bool(true)));
    }

    #[test]
    fn test_clone_shares_container() {
        let original = ParamValue::list(vec![1.into(), 2.into()]);
        let alias = original.clone();
        alias.as_list().unwrap().write().push("x".into());
        assert_eq!(original.as_list().unwrap().read().len(), 3);
        assert!(original.ptr_eq(&alias));
    }

    #[test]
    fn test_copies_break_aliasing() {
        let inner = ParamValue::list(vec![1.into()]);
        let outer = ParamValue::list(vec![inner.clone()]);

        let shallow = outer.shallow_copy();
        assert!(!shallow.ptr_eq(&outer));
        assert!(shallow.as_list().unwrap().read()[0].ptr_eq(&inner));

        let deep = outer.deep_copy();
        assert!(!deep.as_list().unwrap().read()[0].ptr_eq(&inner));
        assert_eq!(deep, outer);
    }

    #[test]
    fn test_stringify() {
        assert_eq!(ParamValue::from("abc").stringify(), "abc");
        assert_eq!(ParamValue::Int(10).stringify(), "10");
        assert_eq!(ParamValue::Float(2.5).stringify(), "2.5");
        assert_eq!(ParamValue::Null.stringify(), "null");
        assert_eq!(ParamValue::from_json(&json!([10, 20, 33])).stringify(), "[10,20,33]");
        assert_eq!(
            ParamValue::from_json(&json!({"b": "x", "a": 1})).stringify(),
            r#"{"a":1,"b":"x"}"#
        );
    }

    #[test]
    fn test_self_containing_list_is_unserializable() {
        let list = ParamValue::list(vec![1.into()]);
        list.as_list().unwrap().write().push(list.clone());
        assert_eq!(list.to_json(), json!([1, UNSERIALIZABLE_PLACEHOLDER]));
        // Break the cycle so the test does not leak.
        list.as_list().unwrap().write().clear();
    }

    #[test]
    fn test_self_containing_values_compare() {
        let a = ParamValue::list(vec![1.into()]);
        a.as_list().unwrap().write().push(a.clone());
        let b = ParamValue::list(vec![1.into()]);
        b.as_list().unwrap().write().push(b.clone());
        let c = ParamValue::list(vec![2.into()]);
        c.as_list().unwrap().write().push(c.clone());

        assert_eq!(a, a);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let m = ParamValue::map(BTreeMap::from([("k".to_string(), 1.into())]));
        m.as_map().unwrap().write().insert("self".to_string(), m.clone());
        let n = ParamValue::map(BTreeMap::from([("k".to_string(), 1.into())]));
        n.as_map().unwrap().write().insert("self".to_string(), n.clone());
        assert_eq!(m, n);

        for value in [&a, &b, &c] {
            value.as_list().unwrap().write().clear();
        }
        for value in [&m, &n] {
            value.as_map().unwrap().write().clear();
        }
    }

    #[test]
    fn test_nan_is_unserializable() {
        assert_eq!(ParamValue::Float(f64::NAN).to_json(), json!(UNSERIALIZABLE_PLACEHOLDER));
    }

    #[test]
    fn test_numeric_equality_across_kinds() {
        assert_eq!(ParamValue::Int(2), ParamValue::Float(2.0));
        assert_ne!(ParamValue::Int(2), ParamValue::from("2"));
        assert_ne!(ParamValue::Null, ParamValue::Bool(false));
    }

    #[test]
    fn test_truthiness() {
        assert!(!ParamValue::Null.truthy());
        assert!(!ParamValue::from("").truthy());
        assert!(!ParamValue::list(vec![]).truthy());
        assert!(ParamValue::Int(-1).truthy());
        assert!(ParamValue::from("0").truthy());
    }
}
