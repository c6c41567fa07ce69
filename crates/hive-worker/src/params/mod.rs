// ParamStore: the parameters of one job.
//
// Holds the raw (unsubstituted) parameters received from the parent and a
// cache of substituted values. A value is computed the first time it is read
// and then served from the cache, so every later read returns the same
// container handle.

mod substitution;
mod value;

pub use value::{ParamValue, SharedList, SharedMap};

use std::collections::BTreeMap;
use std::sync::Arc;

use hive_common::ParamsSnapshot;
use serde_json::{Map, Value};

use crate::error::ParamError;
use crate::functions::FunctionRegistry;
use substitution::Resolver;

type Result<T> = std::result::Result<T, ParamError>;

/// Two-table parameter store with lazy, memoized substitution.
#[derive(Debug, Clone)]
pub struct ParamStore {
    unsubstituted: BTreeMap<String, ParamValue>,
    substituted: BTreeMap<String, ParamValue>,
    functions: Arc<FunctionRegistry>,
}

impl ParamStore {
    /// A store over the given raw parameters, with the built-in functions.
    pub fn new(unsubstituted: BTreeMap<String, ParamValue>) -> Self {
        Self {
            unsubstituted,
            substituted: BTreeMap::new(),
            functions: Arc::new(FunctionRegistry::builtin()),
        }
    }

    /// A store over raw parameters received as JSON.
    pub fn from_json_map(parameters: &Map<String, Value>) -> Self {
        Self::new(
            parameters
                .iter()
                .map(|(k, v)| (k.clone(), ParamValue::from_json(v)))
                .collect(),
        )
    }

    /// Replace the function registry used by `#func:arg#` and expressions.
    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = functions;
        self
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    /// Store an already-substituted value and return it.
    ///
    /// The raw table is left untouched.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<ParamValue> {
        validate_name(name)?;
        self.substituted.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Substituted value of `name`.
    pub fn get(&mut self, name: &str) -> Result<ParamValue> {
        validate_name(name)?;
        Resolver::new(self).get(name)
    }

    /// Whether `name` is in either table. Nothing is substituted.
    pub fn has(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self.substituted.contains_key(name) || self.unsubstituted.contains_key(name))
    }

    /// Substitute every token of an arbitrary value against this store.
    pub fn substitute(&mut self, structure: &ParamValue) -> Result<ParamValue> {
        Resolver::new(self).substitute(structure)
    }

    /// Raw parameters as received.
    pub fn unsubstituted(&self) -> &BTreeMap<String, ParamValue> {
        &self.unsubstituted
    }

    /// Parameters substituted or set so far.
    pub fn substituted(&self) -> &BTreeMap<String, ParamValue> {
        &self.substituted
    }

    /// JSON view of both tables, as sent with dataflow and job-end messages.
    pub fn snapshot(&self) -> ParamsSnapshot {
        ParamsSnapshot {
            substituted: to_json_map(&self.substituted),
            unsubstituted: to_json_map(&self.unsubstituted),
        }
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ParamError::Name(name.to_string()));
    }
    Ok(())
}

fn to_json_map(table: &BTreeMap<String, ParamValue>) -> Map<String, Value> {
    table.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(params: Value) -> ParamStore {
        match params {
            Value::Object(map) => ParamStore::from_json_map(&map),
            other => panic!("expected an object, got {other}"),
        }
    }

    fn json_of(value: &ParamValue) -> Value {
        value.to_json()
    }

    #[test]
    fn test_plain_values_are_returned_as_is() {
        let mut params = store(json!({"alpha": 2, "beta": 5.5, "flag": true, "nothing": null}));
        assert_eq!(params.get("alpha").unwrap(), ParamValue::Int(2));
        assert_eq!(params.get("beta").unwrap(), ParamValue::Float(5.5));
        assert_eq!(params.get("flag").unwrap(), ParamValue::Bool(true));
        assert!(params.get("nothing").unwrap().is_null());
    }

    #[test]
    fn test_whole_string_reference_keeps_type() {
        let mut params = store(json!({"alpha": 2, "a_ref": "#alpha#", "list": [1, 2], "l_ref": "#list#"}));
        assert_eq!(params.get("a_ref").unwrap(), ParamValue::Int(2));
        let list = params.get("l_ref").unwrap();
        assert!(list.ptr_eq(&params.get("list").unwrap()));
    }

    #[test]
    fn test_mixed_string_is_stringified() {
        let mut params = store(json!({
            "alpha": 2,
            "gamma": [10, 20, 33],
            "text": "alpha=#alpha# gamma=#gamma#",
        }));
        assert_eq!(
            params.get("text").unwrap(),
            ParamValue::from("alpha=2 gamma=[10,20,33]")
        );
    }

    #[test]
    fn test_expression_keeps_type() {
        let mut params = store(json!({
            "alpha": 2,
            "beta": 5,
            "delta": "#expr( #alpha#*#beta# )expr#",
        }));
        assert_eq!(params.get("delta").unwrap(), ParamValue::Int(10));
    }

    #[test]
    fn test_expression_inside_text() {
        let mut params = store(json!({
            "alpha": 2,
            "msg": "total: #expr( #alpha# + 1 )expr# items",
        }));
        assert_eq!(params.get("msg").unwrap(), ParamValue::from("total: 3 items"));
    }

    #[test]
    fn test_function_tokens() {
        let mut params = store(json!({
            "gamma": [10, 20, 33],
            "size": "#len:gamma#",
            "copied": "#copy:gamma#",
            "doubled": "#expr( #len:gamma# * 2 )expr#",
        }));
        assert_eq!(params.get("size").unwrap(), ParamValue::Int(3));
        assert_eq!(params.get("doubled").unwrap(), ParamValue::Int(6));
        let copied = params.get("copied").unwrap();
        assert!(!copied.ptr_eq(&params.get("gamma").unwrap()));

        let mut bad = store(json!({"x": "#frobnicate:gamma#", "gamma": 1}));
        assert!(matches!(bad.get("x"), Err(ParamError::Syntax(_))));
    }

    #[test]
    fn test_memoization_returns_same_container() {
        let mut params = store(json!({"gamma": [10, 20, 33]}));
        let first = params.get("gamma").unwrap();
        let second = params.get("gamma").unwrap();
        assert!(first.ptr_eq(&second));
    }

    #[test]
    fn test_aliasing_and_copy() {
        let mut params = store(json!({
            "gamma": [10, 20, 33],
            "gamma_prime": "#expr( #gamma# )expr#",
            "gamma_second": "#expr( copy(#gamma#) )expr#",
        }));
        let gamma = params.get("gamma").unwrap();
        let gamma_second = params.get("gamma_second").unwrap();
        gamma.as_list().unwrap().write().push("x".into());

        assert_eq!(json_of(&params.get("gamma_prime").unwrap()), json!([10, 20, 33, "x"]));
        assert_eq!(json_of(&gamma_second), json!([10, 20, 33]));
        assert_eq!(json_of(&params.get("gamma_second").unwrap()), json!([10, 20, 33]));
    }

    #[test]
    fn test_cycle_is_detected() {
        let mut params = store(json!({"a": "#b#", "b": "#a#"}));
        match params.get("a") {
            Err(ParamError::Cycle { token, stack }) => {
                assert_eq!(token, "b");
                assert_eq!(stack, vec!["b".to_string(), "a".to_string()]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
        // Nothing was cached along the failed path.
        assert!(params.substituted().is_empty());
    }

    #[test]
    fn test_cycle_through_expression() {
        let mut params = store(json!({"a": "#expr( #b# + 1 )expr#", "b": "x #a#"}));
        assert!(matches!(params.get("a"), Err(ParamError::Cycle { .. })));
    }

    fn chain(length: usize) -> ParamStore {
        let mut map = serde_json::Map::new();
        for i in 0..length {
            map.insert(format!("p{i}"), json!(format!("#p{}#", i + 1)));
        }
        map.insert(format!("p{length}"), json!(7));
        ParamStore::from_json_map(&map)
    }

    #[test]
    fn test_long_reference_chain_is_refused() {
        assert_eq!(chain(200).get("p0"), Ok(ParamValue::Int(7)));
        assert!(matches!(
            chain(5000).get("p0"),
            Err(ParamError::SubstitutionType(_))
        ));
    }

    #[test]
    fn test_deeply_nested_expression_is_a_syntax_error() {
        let deep = format!("#expr( {}1{} )expr#", "(".repeat(100_000), ")".repeat(100_000));
        let mut params = store(json!({ "a": deep }));
        assert!(matches!(params.get("a"), Err(ParamError::Syntax(_))));
    }

    #[test]
    fn test_not_found() {
        let mut params = store(json!({"a": "#missing#"}));
        assert_eq!(params.get("a"), Err(ParamError::NotFound("missing".into())));
        assert_eq!(params.get("other"), Err(ParamError::NotFound("other".into())));
    }

    #[test]
    fn test_invalid_name() {
        let mut params = ParamStore::default();
        assert!(matches!(params.get(""), Err(ParamError::Name(_))));
        assert!(matches!(params.has(""), Err(ParamError::Name(_))));
        assert!(matches!(params.set("", ParamValue::Null), Err(ParamError::Name(_))));
    }

    #[test]
    fn test_hash_edge_cases() {
        let mut params = store(json!({
            "alpha": 1,
            "empty": "",
            "pair": "##",
            "lone": "a # b",
            "lone_only": "#",
            "doubled": "a ## b",
            "unpaired": "#alpha# and #",
            "open_expr": "x #expr( 1 + 1 y #alpha#",
        }));
        assert_eq!(params.get("empty").unwrap(), ParamValue::from(""));
        assert_eq!(params.get("pair").unwrap(), ParamValue::from("##"));
        assert_eq!(params.get("lone").unwrap(), ParamValue::from("a # b"));
        assert_eq!(params.get("lone_only").unwrap(), ParamValue::from("#"));
        assert_eq!(params.get("doubled").unwrap(), ParamValue::from("a ## b"));
        assert_eq!(
            params.get("unpaired"),
            Err(ParamError::Syntax("Unmatched '#' token".into()))
        );
        assert_eq!(
            params.get("open_expr"),
            Err(ParamError::Syntax("Unmatched '#expr(' token".into()))
        );
    }

    #[test]
    fn test_containers_are_substituted_recursively() {
        let mut params = store(json!({
            "alpha": 2,
            "key": "k",
            "nested": {"#key#": ["#alpha#", "x#alpha#"], "plain": null},
        }));
        assert_eq!(
            json_of(&params.get("nested").unwrap()),
            json!({"k": [2, "x2"], "plain": null})
        );
    }

    #[test]
    fn test_map_key_resolving_to_container_is_rejected() {
        let mut params = store(json!({"l": [1], "m": {"#l#": 1}}));
        assert!(matches!(params.get("m"), Err(ParamError::SubstitutionType(_))));
    }

    #[test]
    fn test_set_overrides_cache_only() {
        let mut params = store(json!({"alpha": 1}));
        params.set("alpha", ParamValue::Int(5)).unwrap();
        assert_eq!(params.get("alpha").unwrap(), ParamValue::Int(5));
        assert_eq!(params.unsubstituted()["alpha"], ParamValue::Int(1));

        params.set("fresh", ParamValue::from("v")).unwrap();
        assert!(params.has("fresh").unwrap());
        assert!(!params.has("absent").unwrap());
    }

    #[test]
    fn test_snapshot_has_both_tables() {
        let mut params = store(json!({"alpha": 1, "beta": "#alpha#"}));
        params.get("beta").unwrap();
        let snapshot = params.snapshot();
        assert_eq!(snapshot.unsubstituted["beta"], json!("#alpha#"));
        assert_eq!(snapshot.substituted["beta"], json!(1));
        assert_eq!(snapshot.substituted["alpha"], json!(1));
    }

    #[test]
    fn test_custom_function_registry() {
        let mut functions = FunctionRegistry::empty();
        functions.register("answer", |_args: &[ParamValue]| Ok(ParamValue::Int(42)));
        let mut params = store(json!({"x": "#answer:#", "y": "#len:x#"}))
            .with_functions(Arc::new(functions));
        assert_eq!(params.get("x").unwrap(), ParamValue::Int(42));
        assert!(matches!(params.get("y"), Err(ParamError::Syntax(_))));
    }

    #[test]
    fn test_substitute_arbitrary_structure() {
        let mut params = store(json!({"alpha": 3}));
        let template = ParamValue::from_json(&json!(["#alpha#", {"n": "#expr(#alpha# * 2)expr#"}]));
        assert_eq!(
            json_of(&params.substitute(&template).unwrap()),
            json!([3, {"n": 6}])
        );
    }
}
