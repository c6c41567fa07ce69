// Expression evaluation for `#expr(...)expr#` tokens.
//
// A small, sandboxed language: literals, list and map displays, arithmetic,
// comparisons, boolean logic, indexing, and calls to functions of the
// `FunctionRegistry`. `#name#` references inside the body are resolved by the
// parameter layer before parsing and arrive here as live values, so an
// expression that is just a reference yields the very same container.

mod lexer;
mod parser;

use crate::error::ParamError;
use crate::functions::{compare, FunctionRegistry};
use crate::params::ParamValue;
use parser::{BinaryOp, CompareOp, Expr};

type Result<T> = std::result::Result<T, ParamError>;

/// One piece of an expression body.
#[derive(Debug, Clone)]
pub enum Fragment {
    /// Expression source text.
    Source(String),
    /// A value a `#name#` reference resolved to.
    Value(ParamValue),
}

/// Parse and evaluate an expression body.
pub fn evaluate(fragments: &[Fragment], functions: &FunctionRegistry) -> Result<ParamValue> {
    let tokens = lexer::tokenize(fragments)?;
    let expr = parser::parse(tokens)?;
    Evaluator { functions }.eval(&expr)
}

struct Evaluator<'a> {
    functions: &'a FunctionRegistry,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr) -> Result<ParamValue> {
        match expr {
            Expr::Value(value) => Ok(value.clone()),
            Expr::List(items) => {
                let values = items.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?;
                Ok(ParamValue::list(values))
            }
            Expr::Map(entries) => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in entries {
                    let key = map_key(&self.eval(key)?)?;
                    map.insert(key, self.eval(value)?);
                }
                Ok(ParamValue::map(map))
            }
            Expr::Neg(inner) => negate(self.eval(inner)?),
            Expr::Not(inner) => Ok(ParamValue::Bool(!self.eval(inner)?.truthy())),
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Binary(op, left, right) => binary(*op, &self.eval(left)?, &self.eval(right)?),
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !compare_values(*op, &left, &right)? {
                        return Ok(ParamValue::Bool(false));
                    }
                    left = right;
                }
                Ok(ParamValue::Bool(true))
            }
            Expr::Index(target, index) => subscript(&self.eval(target)?, &self.eval(index)?),
            Expr::Call(name, args) => {
                let function = self
                    .functions
                    .get(name)
                    .ok_or_else(|| ParamError::syntax(format!("Unknown method: {name}")))?;
                let args = args.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?;
                function(&args)
            }
        }
    }
}

fn unsupported(op: &str, left: &ParamValue, right: &ParamValue) -> ParamError {
    ParamError::evaluation(format!(
        "unsupported operand types for {op}: '{}' and '{}'",
        left.kind_name(),
        right.kind_name()
    ))
}

fn overflow() -> ParamError {
    ParamError::evaluation("integer overflow")
}

/// Largest string (in bytes) or list an operator or builtin may build.
pub(crate) const MAX_GENERATED_LEN: usize = 1 << 22;

/// Length of `times` copies of something `unit` long. Negative counts give
/// zero; anything above [`MAX_GENERATED_LEN`] is an evaluation error.
pub(crate) fn generated_len(unit: usize, times: i64) -> Result<usize> {
    let times = usize::try_from(times).unwrap_or(0);
    unit.checked_mul(times)
        .filter(|len| *len <= MAX_GENERATED_LEN)
        .ok_or_else(|| {
            ParamError::evaluation(format!(
                "result would exceed {MAX_GENERATED_LEN} elements"
            ))
        })
}

/// Both operands as integers; floats do not qualify.
fn ints(left: &ParamValue, right: &ParamValue) -> Option<(i64, i64)> {
    match (left, right) {
        (ParamValue::Float(_), _) | (_, ParamValue::Float(_)) => None,
        _ => Some((left.as_i64()?, right.as_i64()?)),
    }
}

fn floats(left: &ParamValue, right: &ParamValue) -> Option<(f64, f64)> {
    Some((left.as_f64()?, right.as_f64()?))
}

fn map_key(key: &ParamValue) -> Result<String> {
    match key {
        ParamValue::List(_) | ParamValue::Map(_) => Err(ParamError::evaluation(format!(
            "a {} cannot be used as a map key",
            key.kind_name()
        ))),
        other => Ok(other.stringify()),
    }
}

fn negate(value: ParamValue) -> Result<ParamValue> {
    match value {
        ParamValue::Float(f) => Ok(ParamValue::Float(-f)),
        other => match other.as_i64() {
            Some(i) => i.checked_neg().map(ParamValue::Int).ok_or_else(overflow),
            None => Err(ParamError::evaluation(format!(
                "bad operand type for unary -: '{}'",
                other.kind_name()
            ))),
        },
    }
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(generated_len(items.len(), times)?);
    if !items.is_empty() {
        for _ in 0..times {
            out.extend_from_slice(items);
        }
    }
    Ok(out)
}

fn binary(op: BinaryOp, left: &ParamValue, right: &ParamValue) -> Result<ParamValue> {
    match op {
        BinaryOp::Add => match (left, right) {
            (ParamValue::String(a), ParamValue::String(b)) => {
                generated_len(a.len() + b.len(), 1)?;
                Ok(ParamValue::String(format!("{a}{b}")))
            }
            (ParamValue::List(a), ParamValue::List(b)) => {
                let a_len = a.read().len();
                generated_len(a_len + b.read().len(), 1)?;
                let mut items = a.read().clone();
                items.extend(b.read().iter().cloned());
                Ok(ParamValue::list(items))
            }
            _ => {
                if let Some((a, b)) = ints(left, right) {
                    a.checked_add(b).map(ParamValue::Int).ok_or_else(overflow)
                } else if let Some((a, b)) = floats(left, right) {
                    Ok(ParamValue::Float(a + b))
                } else {
                    Err(unsupported("+", left, right))
                }
            }
        },
        BinaryOp::Sub => {
            if let Some((a, b)) = ints(left, right) {
                a.checked_sub(b).map(ParamValue::Int).ok_or_else(overflow)
            } else if let Some((a, b)) = floats(left, right) {
                Ok(ParamValue::Float(a - b))
            } else {
                Err(unsupported("-", left, right))
            }
        }
        BinaryOp::Mul => match (left, right) {
            (ParamValue::String(s), ParamValue::Int(n)) | (ParamValue::Int(n), ParamValue::String(s)) => {
                generated_len(s.len(), *n)?;
                Ok(ParamValue::String(s.repeat(usize::try_from(*n).unwrap_or(0))))
            }
            (ParamValue::List(l), ParamValue::Int(n)) | (ParamValue::Int(n), ParamValue::List(l)) => {
                Ok(ParamValue::list(repeat(l.read().as_slice(), *n)?))
            }
            _ => {
                if let Some((a, b)) = ints(left, right) {
                    a.checked_mul(b).map(ParamValue::Int).ok_or_else(overflow)
                } else if let Some((a, b)) = floats(left, right) {
                    Ok(ParamValue::Float(a * b))
                } else {
                    Err(unsupported("*", left, right))
                }
            }
        },
        BinaryOp::Div => {
            let (a, b) = floats(left, right).ok_or_else(|| unsupported("/", left, right))?;
            if b == 0.0 {
                return Err(ParamError::evaluation("division by zero"));
            }
            Ok(ParamValue::Float(a / b))
        }
        BinaryOp::FloorDiv => {
            if let Some((a, b)) = ints(left, right) {
                if b == 0 {
                    return Err(ParamError::evaluation("integer division by zero"));
                }
                let q = a.checked_div(b).ok_or_else(overflow)?;
                let floored = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
                Ok(ParamValue::Int(floored))
            } else if let Some((a, b)) = floats(left, right) {
                if b == 0.0 {
                    return Err(ParamError::evaluation("float floor division by zero"));
                }
                Ok(ParamValue::Float((a / b).floor()))
            } else {
                Err(unsupported("//", left, right))
            }
        }
        BinaryOp::Mod => {
            if let Some((a, b)) = ints(left, right) {
                if b == 0 {
                    return Err(ParamError::evaluation("integer modulo by zero"));
                }
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                // The result takes the sign of the divisor.
                let r = if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r };
                Ok(ParamValue::Int(r))
            } else if let Some((a, b)) = floats(left, right) {
                if b == 0.0 {
                    return Err(ParamError::evaluation("float modulo by zero"));
                }
                Ok(ParamValue::Float(a - b * (a / b).floor()))
            } else {
                Err(unsupported("%", left, right))
            }
        }
    }
}

fn compare_values(op: CompareOp, left: &ParamValue, right: &ParamValue) -> Result<bool> {
    Ok(match op {
        CompareOp::Eq => left == right,
        CompareOp::NotEq => left != right,
        CompareOp::Lt => compare(left, right)?.is_lt(),
        CompareOp::Le => compare(left, right)?.is_le(),
        CompareOp::Gt => compare(left, right)?.is_gt(),
        CompareOp::Ge => compare(left, right)?.is_ge(),
        CompareOp::In => contains(right, left)?,
        CompareOp::NotIn => !contains(right, left)?,
    })
}

fn contains(haystack: &ParamValue, needle: &ParamValue) -> Result<bool> {
    match haystack {
        ParamValue::List(list) => Ok(list.read().iter().any(|item| item == needle)),
        ParamValue::Map(map) => Ok(map.read().contains_key(&map_key(needle)?)),
        ParamValue::String(s) => match needle {
            ParamValue::String(sub) => Ok(s.contains(sub.as_str())),
            other => Err(ParamError::evaluation(format!(
                "'in <string>' requires a string as left operand, not a {}",
                other.kind_name()
            ))),
        },
        other => Err(ParamError::evaluation(format!(
            "argument of type '{}' is not iterable",
            other.kind_name()
        ))),
    }
}

/// Resolve a possibly negative position against a sequence length.
fn position(index: &ParamValue, len: usize, what: &str) -> Result<usize> {
    let i = match index {
        ParamValue::Int(i) => *i,
        other => {
            return Err(ParamError::evaluation(format!(
                "{what} indices must be integers, not {}",
                other.kind_name()
            )))
        }
    };
    let len = len as i64;
    let resolved = if i < 0 { i + len } else { i };
    if resolved < 0 || resolved >= len {
        return Err(ParamError::evaluation(format!("{what} index out of range")));
    }
    Ok(resolved as usize)
}

fn subscript(target: &ParamValue, index: &ParamValue) -> Result<ParamValue> {
    match target {
        ParamValue::List(list) => {
            let list = list.read();
            let i = position(index, list.len(), "list")?;
            Ok(list[i].clone())
        }
        ParamValue::Map(map) => {
            let key = map_key(index)?;
            map.read()
                .get(&key)
                .cloned()
                .ok_or_else(|| ParamError::evaluation(format!("key '{key}' not found")))
        }
        ParamValue::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = position(index, chars.len(), "string")?;
            Ok(ParamValue::String(chars[i].to_string()))
        }
        other => Err(ParamError::evaluation(format!(
            "'{}' object is not subscriptable",
            other.kind_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(text: &str) -> Result<ParamValue> {
        evaluate(&[Fragment::Source(text.to_string())], &FunctionRegistry::builtin())
    }

    fn value(v: serde_json::Value) -> ParamValue {
        ParamValue::from_json(&v)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), ParamValue::Int(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), ParamValue::Int(9));
        assert_eq!(eval("7 / 2").unwrap(), ParamValue::Float(3.5));
        assert_eq!(eval("7 // 2").unwrap(), ParamValue::Int(3));
        assert_eq!(eval("-7 // 2").unwrap(), ParamValue::Int(-4));
        assert_eq!(eval("-7 % 3").unwrap(), ParamValue::Int(2));
        assert_eq!(eval("2 * 1.5").unwrap(), ParamValue::Float(3.0));
        assert_eq!(eval("-(3)").unwrap(), ParamValue::Int(-3));
    }

    #[test]
    fn test_strings_and_lists() {
        assert_eq!(eval("'ab' + 'cd'").unwrap(), ParamValue::from("abcd"));
        assert_eq!(eval("'ab' * 2").unwrap(), ParamValue::from("abab"));
        assert_eq!(eval("[1] + [2]").unwrap(), value(json!([1, 2])));
        assert_eq!(eval("[0] * 3").unwrap(), value(json!([0, 0, 0])));
        assert_eq!(eval("[1, 2, 3][-1]").unwrap(), ParamValue::Int(3));
        assert_eq!(eval("{'a': [5]}['a'][0]").unwrap(), ParamValue::Int(5));
        assert_eq!(eval("'abc'[1]").unwrap(), ParamValue::from("b"));
    }

    #[test]
    fn test_oversized_results_are_refused() {
        for text in [
            "'ab' * 9223372036854775807",
            "[1, 2] * 9223372036854775807",
            "9223372036854775807 * [1, 2]",
            "'x' * 5000000",
            "range(9223372036854775807)",
        ] {
            assert!(
                matches!(eval(text), Err(ParamError::Evaluation(_))),
                "{text} should be refused"
            );
        }
        assert_eq!(eval("[] * 9223372036854775807").unwrap(), value(json!([])));
        assert_eq!(eval("'' * 9223372036854775807").unwrap(), ParamValue::from(""));
        assert_eq!(eval("'ab' * -3").unwrap(), ParamValue::from(""));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("1 < 2 < 3").unwrap(), ParamValue::Bool(true));
        assert_eq!(eval("3 > 2 > 2").unwrap(), ParamValue::Bool(false));
        assert_eq!(eval("2 in [1, 2]").unwrap(), ParamValue::Bool(true));
        assert_eq!(eval("'x' not in {'x': 1}").unwrap(), ParamValue::Bool(false));
        assert_eq!(eval("not 0").unwrap(), ParamValue::Bool(true));
        assert_eq!(eval("0 or 'fallback'").unwrap(), ParamValue::from("fallback"));
        assert_eq!(eval("1 && 2").unwrap(), ParamValue::Int(2));
        assert_eq!(eval("True and None").unwrap(), ParamValue::Null);
    }

    #[test]
    fn test_calls() {
        assert_eq!(eval("len([1, 2, 3])").unwrap(), ParamValue::Int(3));
        assert_eq!(eval("max(4, 9, 2) - min([4, 9, 2])").unwrap(), ParamValue::Int(7));
        let err = eval("nope(1)").unwrap_err();
        assert!(matches!(err, ParamError::Syntax(_)));
    }

    #[test]
    fn test_values_are_live() {
        let shared = value(json!([10, 20]));
        let result = evaluate(
            &[Fragment::Value(shared.clone())],
            &FunctionRegistry::builtin(),
        )
        .unwrap();
        assert!(result.ptr_eq(&shared));

        let copied = evaluate(
            &[
                Fragment::Source("copy(".into()),
                Fragment::Value(shared.clone()),
                Fragment::Source(")".into()),
            ],
            &FunctionRegistry::builtin(),
        )
        .unwrap();
        assert!(!copied.ptr_eq(&shared));
        assert_eq!(copied, shared);
    }

    #[test]
    fn test_list_display_builds_new_container() {
        let shared = value(json!([1]));
        let result = evaluate(
            &[
                Fragment::Source("[".into()),
                Fragment::Value(shared.clone()),
                Fragment::Source("]".into()),
            ],
            &FunctionRegistry::builtin(),
        )
        .unwrap();
        let outer = result.as_list().unwrap().read();
        assert_eq!(outer.len(), 1);
        assert!(outer[0].ptr_eq(&shared));
    }

    #[test]
    fn test_evaluation_errors() {
        for text in ["1 / 0", "1 % 0", "[1][5]", "{'a': 1}['b']", "'a' - 1", "1 < 'a'", "5[0]"] {
            assert!(
                matches!(eval(text), Err(ParamError::Evaluation(_))),
                "{text:?} should fail to evaluate"
            );
        }
    }
}
