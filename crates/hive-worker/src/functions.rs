// FunctionRegistry: the named functions reachable from `#func:arg#` tokens
// and from calls inside `#expr(...)expr#` expressions.
//
// Only registered functions can be called; there is no other way for a
// parameter value to run code.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ParamError;
use crate::params::ParamValue;

type Result<T> = std::result::Result<T, ParamError>;

/// A callable registered under a name.
pub type ParamFunction = Arc<dyn Fn(&[ParamValue]) -> Result<ParamValue> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, ParamFunction>,
}

impl FunctionRegistry {
    /// A registry with no functions at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The default registry.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("len", len);
        registry.register("sum", sum);
        registry.register("min", |args: &[ParamValue]| extremum("min", args, |o| o.is_lt()));
        registry.register("max", |args: &[ParamValue]| extremum("max", args, |o| o.is_gt()));
        registry.register("abs", abs);
        registry.register("sorted", sorted);
        registry.register("reversed", reversed);
        registry.register("keys", keys);
        registry.register("values", values);
        registry.register("copy", |args: &[ParamValue]| Ok(one("copy", args)?.shallow_copy()));
        registry.register("list", |args: &[ParamValue]| to_list("list", args));
        registry.register("dict", |args: &[ParamValue]| to_map("dict", args));
        registry.register("deepcopy", |args: &[ParamValue]| Ok(one("deepcopy", args)?.deep_copy()));
        registry.register("str", |args: &[ParamValue]| Ok(one("str", args)?.stringify().into()));
        registry.register("int", to_int);
        registry.register("float", to_float);
        registry.register("bool", |args: &[ParamValue]| Ok(one("bool", args)?.truthy().into()));
        registry.register("join", join);
        registry.register("upper", |args: &[ParamValue]| {
            Ok(string_arg("upper", one("upper", args)?)?.to_uppercase().into())
        });
        registry.register("lower", |args: &[ParamValue]| {
            Ok(string_arg("lower", one("lower", args)?)?.to_lowercase().into())
        });
        registry.register("range", range);
        registry.register("json", parse_json);
        registry
    }

    /// Register `function` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&[ParamValue]) -> Result<ParamValue> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<ParamFunction> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Call `name` with `args`.
    pub fn call(&self, name: &str, args: &[ParamValue]) -> Result<ParamValue> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| ParamError::syntax(format!("Unknown method: {name}")))?;
        function(args)
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn arity(name: &str, args: &[ParamValue], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(ParamError::evaluation(format!(
            "{name}() takes {expected} argument(s), {} given",
            args.len()
        )));
    }
    Ok(())
}

fn one<'a>(name: &str, args: &'a [ParamValue]) -> Result<&'a ParamValue> {
    arity(name, args, 1, 1)?;
    Ok(&args[0])
}

fn type_error(name: &str, value: &ParamValue) -> ParamError {
    ParamError::evaluation(format!("{name}() does not accept a {}", value.kind_name()))
}

fn string_arg<'a>(name: &str, value: &'a ParamValue) -> Result<&'a str> {
    value.as_str().ok_or_else(|| type_error(name, value))
}

/// Elements of a list, or of the single list argument when called as `f(list)`.
fn items(name: &str, args: &[ParamValue]) -> Result<Vec<ParamValue>> {
    match args {
        [ParamValue::List(list)] => Ok(list.read().clone()),
        [other] => Err(type_error(name, other)),
        [] => Err(ParamError::evaluation(format!("{name}() needs at least one argument"))),
        many => Ok(many.to_vec()),
    }
}

/// Ordering between two numbers or two strings.
pub(crate) fn compare(a: &ParamValue, b: &ParamValue) -> Result<std::cmp::Ordering> {
    match (a, b) {
        (ParamValue::String(x), ParamValue::String(y)) => Ok(x.cmp(y)),
        (ParamValue::Int(x), ParamValue::Int(y)) => Ok(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
                ParamError::evaluation("cannot order NaN")
            }),
            _ => Err(ParamError::evaluation(format!(
                "cannot compare a {} with a {}",
                a.kind_name(),
                b.kind_name()
            ))),
        },
    }
}

// ---------------------------------------------------------------------------
// Built-in functions
// ---------------------------------------------------------------------------

fn len(args: &[ParamValue]) -> Result<ParamValue> {
    let n = match one("len", args)? {
        ParamValue::String(s) => s.chars().count(),
        ParamValue::List(list) => list.read().len(),
        ParamValue::Map(map) => map.read().len(),
        other => return Err(type_error("len", other)),
    };
    Ok(ParamValue::Int(n as i64))
}

fn sum(args: &[ParamValue]) -> Result<ParamValue> {
    let mut total = ParamValue::Int(0);
    for item in items("sum", args)? {
        total = match (&total, &item) {
            (ParamValue::Int(a), ParamValue::Int(b)) => a
                .checked_add(*b)
                .map(ParamValue::Int)
                .ok_or_else(|| ParamError::evaluation("integer overflow in sum()"))?,
            _ => match (total.as_f64(), item.as_f64()) {
                (Some(a), Some(b)) => ParamValue::Float(a + b),
                _ => return Err(type_error("sum", &item)),
            },
        };
    }
    Ok(total)
}

fn extremum(
    name: &str,
    args: &[ParamValue],
    better: fn(std::cmp::Ordering) -> bool,
) -> Result<ParamValue> {
    let mut best: Option<ParamValue> = None;
    for item in items(name, args)? {
        best = match best {
            Some(current) if !better(compare(&item, &current)?) => Some(current),
            _ => Some(item),
        };
    }
    best.ok_or_else(|| ParamError::evaluation(format!("{name}() arg is an empty sequence")))
}

fn abs(args: &[ParamValue]) -> Result<ParamValue> {
    match one("abs", args)? {
        ParamValue::Int(i) => i
            .checked_abs()
            .map(ParamValue::Int)
            .ok_or_else(|| ParamError::evaluation("integer overflow in abs()")),
        ParamValue::Float(f) => Ok(ParamValue::Float(f.abs())),
        other => Err(type_error("abs", other)),
    }
}

fn sorted(args: &[ParamValue]) -> Result<ParamValue> {
    let mut values = items("sorted", args)?;
    let mut failure = None;
    values.sort_by(|a, b| {
        compare(a, b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            std::cmp::Ordering::Equal
        })
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(ParamValue::list(values)),
    }
}

fn reversed(args: &[ParamValue]) -> Result<ParamValue> {
    match one("reversed", args)? {
        ParamValue::List(list) => Ok(ParamValue::list(list.read().iter().rev().cloned().collect())),
        ParamValue::String(s) => Ok(ParamValue::String(s.chars().rev().collect())),
        other => Err(type_error("reversed", other)),
    }
}

fn keys(args: &[ParamValue]) -> Result<ParamValue> {
    match one("keys", args)? {
        ParamValue::Map(map) => Ok(ParamValue::list(
            map.read().keys().map(|k| ParamValue::String(k.clone())).collect(),
        )),
        other => Err(type_error("keys", other)),
    }
}

fn values(args: &[ParamValue]) -> Result<ParamValue> {
    match one("values", args)? {
        ParamValue::Map(map) => Ok(ParamValue::list(map.read().values().cloned().collect())),
        other => Err(type_error("values", other)),
    }
}

fn to_list(name: &str, args: &[ParamValue]) -> Result<ParamValue> {
    match one(name, args)? {
        value @ ParamValue::List(_) => Ok(value.shallow_copy()),
        ParamValue::Map(map) => Ok(ParamValue::list(
            map.read().keys().map(|k| ParamValue::String(k.clone())).collect(),
        )),
        ParamValue::String(s) => Ok(ParamValue::list(
            s.chars().map(|c| ParamValue::String(c.to_string())).collect(),
        )),
        other => Err(type_error(name, other)),
    }
}

fn to_map(name: &str, args: &[ParamValue]) -> Result<ParamValue> {
    match one(name, args)? {
        value @ ParamValue::Map(_) => Ok(value.shallow_copy()),
        other => Err(type_error(name, other)),
    }
}

/// 2^63: the first float above every i64. `i64::MAX as f64` rounds up to it.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

fn to_int(args: &[ParamValue]) -> Result<ParamValue> {
    let value = one("int", args)?;
    match value {
        ParamValue::Int(_) => Ok(value.clone()),
        ParamValue::Bool(b) => Ok(ParamValue::Int(i64::from(*b))),
        ParamValue::Float(f) if (-TWO_POW_63..TWO_POW_63).contains(f) => {
            Ok(ParamValue::Int(f.trunc() as i64))
        }
        ParamValue::Float(f) => Err(ParamError::evaluation(format!(
            "cannot convert float {f} to int"
        ))),
        ParamValue::String(s) => s.trim().parse::<i64>().map(ParamValue::Int).map_err(|_| {
            ParamError::evaluation(format!("invalid literal for int(): {s:?}"))
        }),
        other => Err(type_error("int", other)),
    }
}

fn to_float(args: &[ParamValue]) -> Result<ParamValue> {
    let value = one("float", args)?;
    match value {
        ParamValue::String(s) => s.trim().parse::<f64>().map(ParamValue::Float).map_err(|_| {
            ParamError::evaluation(format!("could not convert string to float: {s:?}"))
        }),
        other => other
            .as_f64()
            .map(ParamValue::Float)
            .ok_or_else(|| type_error("float", other)),
    }
}

fn join(args: &[ParamValue]) -> Result<ParamValue> {
    arity("join", args, 1, 2)?;
    let separator = match args.get(1) {
        Some(sep) => string_arg("join", sep)?,
        None => "",
    };
    let list = args[0].as_list().ok_or_else(|| type_error("join", &args[0]))?;
    let parts: Vec<String> = list.read().iter().map(ParamValue::stringify).collect();
    Ok(ParamValue::String(parts.join(separator)))
}

fn range(args: &[ParamValue]) -> Result<ParamValue> {
    let bound = |v: &ParamValue| v.as_i64().ok_or_else(|| type_error("range", v));
    let (start, end) = match args {
        [end] => (0, bound(end)?),
        [start, end] => (bound(start)?, bound(end)?),
        _ => return arity("range", args, 1, 2).map(|_| ParamValue::Null),
    };
    let span = end.saturating_sub(start).max(0);
    crate::expressions::generated_len(1, span)?;
    Ok(ParamValue::list((start..end).map(ParamValue::Int).collect()))
}

fn parse_json(args: &[ParamValue]) -> Result<ParamValue> {
    let text = string_arg("json", one("json", args)?)?;
    serde_json::from_str::<serde_json::Value>(text)
        .map(|v| ParamValue::from_json(&v))
        .map_err(|e| ParamError::evaluation(format!("json(): {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn call(name: &str, args: &[ParamValue]) -> Result<ParamValue> {
        FunctionRegistry::builtin().call(name, args)
    }

    fn list(value: serde_json::Value) -> ParamValue {
        ParamValue::from_json(&value)
    }

    fn map_of(entries: Vec<(&str, ParamValue)>) -> ParamValue {
        ParamValue::map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn test_len_and_sum() {
        assert_eq!(call("len", &[list(json!([1, 2, 3]))]).unwrap(), ParamValue::Int(3));
        assert_eq!(call("len", &["héllo".into()]).unwrap(), ParamValue::Int(5));
        assert_eq!(call("sum", &[list(json!([1, 2, 3]))]).unwrap(), ParamValue::Int(6));
        assert_eq!(call("sum", &[list(json!([1, 2.5]))]).unwrap(), ParamValue::Float(3.5));
        assert!(call("len", &[ParamValue::Int(1)]).is_err());
    }

    #[test]
    fn test_min_max_accept_list_or_arguments() {
        assert_eq!(call("max", &[list(json!([3, 9, 4]))]).unwrap(), ParamValue::Int(9));
        assert_eq!(call("min", &[2.into(), 1.into()]).unwrap(), ParamValue::Int(1));
        assert!(call("max", &[list(json!([]))]).is_err());
        assert!(call("max", &[list(json!([1, "a"]))]).is_err());
    }

    #[test]
    fn test_copy_returns_new_container() {
        let original = list(json!([1, [2]]));
        let copied = call("copy", &[original.clone()]).unwrap();
        assert!(!copied.ptr_eq(&original));
        assert_eq!(copied, original);
        let nested = copied.as_list().unwrap().read()[1].clone();
        assert!(nested.ptr_eq(&original.as_list().unwrap().read()[1]));

        let deep = call("deepcopy", &[original.clone()]).unwrap();
        assert!(!deep.as_list().unwrap().read()[1].ptr_eq(&nested));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("int", &["42".into()]).unwrap(), ParamValue::Int(42));
        assert_eq!(call("int", &[ParamValue::Float(-2.7)]).unwrap(), ParamValue::Int(-2));
        assert_eq!(call("float", &["1.5".into()]).unwrap(), ParamValue::Float(1.5));
        assert_eq!(call("str", &[list(json!([1]))]).unwrap(), ParamValue::from("[1]"));
        assert_eq!(call("bool", &["".into()]).unwrap(), ParamValue::Bool(false));
        assert!(call("int", &["abc".into()]).is_err());
        assert_eq!(
            call("int", &[ParamValue::Float(-9.223372036854775808e18)]).unwrap(),
            ParamValue::Int(i64::MIN)
        );
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1e19, 9.223372036854775808e18, -1e19] {
            assert!(
                matches!(call("int", &[ParamValue::Float(f)]), Err(ParamError::Evaluation(_))),
                "int({f}) should fail"
            );
        }
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(
            call("join", &[list(json!(["a", 1])), "-".into()]).unwrap(),
            ParamValue::from("a-1")
        );
        assert_eq!(call("upper", &["ab".into()]).unwrap(), ParamValue::from("AB"));
        assert_eq!(call("lower", &["AB".into()]).unwrap(), ParamValue::from("ab"));
    }

    #[test]
    fn test_collections() {
        assert_eq!(call("range", &[3.into()]).unwrap(), list(json!([0, 1, 2])));
        assert_eq!(call("range", &[5.into(), 2.into()]).unwrap(), list(json!([])));
        assert!(matches!(
            call("range", &[ParamValue::Int(i64::MIN), ParamValue::Int(i64::MAX)]),
            Err(ParamError::Evaluation(_))
        ));
        assert_eq!(call("sorted", &[list(json!([3, 1, 2]))]).unwrap(), list(json!([1, 2, 3])));
        assert!(call("sorted", &[list(json!([3, "a"]))]).is_err());
        assert_eq!(call("reversed", &[list(json!([1, 2]))]).unwrap(), list(json!([2, 1])));
        let map = map_of(vec![("b", 2.into()), ("a", 1.into())]);
        assert_eq!(call("keys", &[map.clone()]).unwrap(), list(json!(["a", "b"])));
        assert_eq!(call("values", &[map]).unwrap(), list(json!([1, 2])));
        assert_eq!(call("json", &["[1,2]".into()]).unwrap(), list(json!([1, 2])));
    }

    #[test]
    fn test_unknown_function_is_a_syntax_error() {
        let err = call("nope", &[]).unwrap_err();
        assert_eq!(err, ParamError::Syntax("Unknown method: nope".into()));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = FunctionRegistry::empty();
        assert!(!registry.contains("len"));
        registry.register("twice", |args: &[ParamValue]| {
            let n = args.first().and_then(ParamValue::as_i64).unwrap_or(0);
            Ok(ParamValue::Int(n * 2))
        });
        assert_eq!(registry.call("twice", &[21.into()]).unwrap(), ParamValue::Int(42));
        assert_eq!(registry.names(), vec!["twice".to_string()]);
    }
}
