// Scalar function registry: name-keyed, case-insensitive, fixed-or-variadic
// arity. The interpreter does not enforce arity itself, functions validate
// their own arguments and return `Null` on mismatch.

use std::collections::HashMap;

use unicode_segmentation::UnicodeSegmentation;

use crate::value::Value;

use super::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

type ScalarFn = dyn Fn(&[Value]) -> Value + Send + Sync;

pub struct ScalarFunction {
    pub name: &'static str,
    pub arity: Arity,
    func: Box<ScalarFn>,
}

impl ScalarFunction {
    pub fn call(&self, args: &[Value]) -> Value {
        (self.func)(args)
    }
}

/// Case-insensitive, read-mostly name-to-function table. Registration is
/// expected to happen before any VM `run`; lookups are safe to share across
/// VM instances.
pub struct ScalarRegistry {
    functions: HashMap<String, ScalarFunction>,
}

impl ScalarRegistry {
    pub fn register(&mut self, name: &'static str, arity: Arity, func: impl Fn(&[Value]) -> Value + Send + Sync + 'static) {
        self.functions.insert(
            name.to_ascii_uppercase(),
            ScalarFunction {
                name,
                arity,
                func: Box::new(func),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&ScalarFunction> {
        self.functions.get(&name.to_ascii_uppercase())
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Value {
        match self.get(name) {
            Some(f) => f.call(args),
            None => Value::Null,
        }
    }

    /// The built-in registry: strings, math, JSON, vector.
    pub fn builtins() -> Self {
        let mut reg = Self {
            functions: HashMap::new(),
        };
        reg.register("SUBSTR", Arity::Variadic, substr);
        reg.register("SUBSTRING", Arity::Variadic, substr);
        reg.register("LENGTH", Arity::Fixed(1), length);
        reg.register("UPPER", Arity::Fixed(1), |a| text_map(a, |s| s.to_uppercase()));
        reg.register("LOWER", Arity::Fixed(1), |a| text_map(a, |s| s.to_lowercase()));
        reg.register("COALESCE", Arity::Variadic, coalesce);
        reg.register("ABS", Arity::Fixed(1), abs);
        reg.register("ROUND", Arity::Variadic, round);
        reg.register("CONCAT", Arity::Variadic, concat);
        reg.register("CONCAT_WS", Arity::Variadic, concat_ws);
        reg.register("TRIM", Arity::Variadic, |a| trim(a, true, true));
        reg.register("LTRIM", Arity::Variadic, |a| trim(a, true, false));
        reg.register("RTRIM", Arity::Variadic, |a| trim(a, false, true));
        reg.register("LEFT", Arity::Fixed(2), left);
        reg.register("RIGHT", Arity::Fixed(2), right);
        reg.register("REPEAT", Arity::Fixed(2), repeat);
        reg.register("SPACE", Arity::Fixed(1), space);
        reg.register("REPLACE", Arity::Fixed(3), replace);
        reg.register("REVERSE", Arity::Fixed(1), reverse);
        reg.register("IF", Arity::Fixed(3), if_fn);
        reg.register("IFNULL", Arity::Fixed(2), ifnull);
        reg.register("NULLIF", Arity::Fixed(2), nullif);
        reg.register("VECTOR_DISTANCE", Arity::Fixed(2), vector_distance);
        reg.register("JSON_EXTRACT", Arity::Fixed(2), json::json_extract);
        reg.register("JSON_UNQUOTE", Arity::Fixed(1), json::json_unquote);
        reg.register("JSON_ARRAY", Arity::Variadic, json::json_array);
        reg.register("JSON_OBJECT", Arity::Variadic, json::json_object);
        reg.register("JSON_TYPE", Arity::Fixed(1), json::json_type);
        reg.register("JSON_VALID", Arity::Fixed(1), json::json_valid);
        reg.register("JSON_LENGTH", Arity::Fixed(1), json::json_length);
        reg.register("JSON_KEYS", Arity::Fixed(1), json::json_keys);
        reg.register("JSON_CONTAINS", Arity::Fixed(2), json::json_contains);
        reg.register("JSON_SET", Arity::Fixed(3), json::json_set);
        reg.register("JSON_REMOVE", Arity::Fixed(2), json::json_remove);
        reg
    }
}

fn text_of(v: &Value) -> Option<&str> {
    match v {
        Value::Text(s) | Value::Varchar { s, .. } | Value::Char { s, .. } | Value::Json(s) => {
            Some(s)
        }
        _ => None,
    }
}

fn text_map(args: &[Value], f: impl Fn(&str) -> String) -> Value {
    match args.first().and_then(text_of) {
        Some(s) => Value::Text(f(s)),
        None => Value::Null,
    }
}

/// 1-based, negative-from-end, Unicode-grapheme-aware `SUBSTR`.
fn substr(args: &[Value]) -> Value {
    let Some(s) = args.first().and_then(text_of) else {
        return Value::Null;
    };
    let Some(start) = args.get(1).and_then(Value::as_int) else {
        return Value::Null;
    };
    let graphemes: Vec<&str> = s.graphemes(true).collect();
    let len = graphemes.len() as i64;
    let mut start0 = if start > 0 {
        start - 1
    } else if start < 0 {
        (len + start).max(0)
    } else {
        0
    };
    if start0 < 0 {
        start0 = 0;
    }
    let count = args
        .get(2)
        .and_then(Value::as_int)
        .map(|c| c.max(0))
        .unwrap_or(len - start0);
    let start0 = start0.min(len) as usize;
    let end = (start0 as i64 + count).clamp(0, len) as usize;
    Value::Text(graphemes[start0..end].concat())
}

fn length(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Blob(b)) => Value::Int64(b.len() as i64),
        Some(v) => {
            if let Some(s) = text_of(v) {
                Value::Int64(s.graphemes(true).count() as i64)
            } else {
                crate::value::decimal_digit_count(v)
                    .map(|d| Value::Int64(d as i64))
                    .unwrap_or(Value::Null)
            }
        }
        None => Value::Null,
    }
}

fn coalesce(args: &[Value]) -> Value {
    args.iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null)
}

fn abs(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Float(f)) => Value::Float(f.abs()),
        Some(v) => v.as_int().map(|i| Value::Int64(i.abs())).unwrap_or(Value::Null),
        None => Value::Null,
    }
}

/// Round-half-away-from-zero rather than IEEE round-half-to-even.
fn round(args: &[Value]) -> Value {
    let Some(x) = args.first().map(Value::as_f64) else {
        return Value::Null;
    };
    let decimals = args.get(1).and_then(Value::as_int).unwrap_or(0);
    let factor = 10f64.powi(decimals as i32);
    let scaled = x * factor;
    let rounded = scaled.abs().floor() + if scaled.abs().fract() >= 0.5 { 1.0 } else { 0.0 };
    let rounded = rounded.copysign(scaled);
    Value::Float(rounded / factor)
}

fn concat(args: &[Value]) -> Value {
    let mut out = String::new();
    for v in args {
        if !v.is_null() {
            out.push_str(&v.to_string());
        }
    }
    Value::Text(out)
}

fn concat_ws(args: &[Value]) -> Value {
    let Some(sep) = args.first() else {
        return Value::Null;
    };
    if sep.is_null() {
        return Value::Null;
    }
    let sep = sep.to_string();
    let parts: Vec<String> = args[1..]
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| v.to_string())
        .collect();
    Value::Text(parts.join(&sep))
}

fn trim(args: &[Value], left: bool, right: bool) -> Value {
    let Some(s) = args.first().and_then(text_of) else {
        return Value::Null;
    };
    let cutset: Vec<char> = args
        .get(1)
        .and_then(text_of)
        .map(|c| c.chars().collect())
        .unwrap_or_else(|| vec![' ', '\t', '\n', '\r']);
    let pred = |c: char| cutset.contains(&c);
    let trimmed = match (left, right) {
        (true, true) => s.trim_matches(pred),
        (true, false) => s.trim_start_matches(pred),
        (false, true) => s.trim_end_matches(pred),
        (false, false) => s,
    };
    Value::Text(trimmed.to_string())
}

fn left(args: &[Value]) -> Value {
    let (Some(s), Some(n)) = (args.first().and_then(text_of), args.get(1).and_then(Value::as_int)) else {
        return Value::Null;
    };
    Value::Text(s.graphemes(true).take(n.max(0) as usize).collect())
}

fn right(args: &[Value]) -> Value {
    let (Some(s), Some(n)) = (args.first().and_then(text_of), args.get(1).and_then(Value::as_int)) else {
        return Value::Null;
    };
    let graphemes: Vec<&str> = s.graphemes(true).collect();
    let n = (n.max(0) as usize).min(graphemes.len());
    Value::Text(graphemes[graphemes.len() - n..].concat())
}

fn repeat(args: &[Value]) -> Value {
    let (Some(s), Some(n)) = (args.first().and_then(text_of), args.get(1).and_then(Value::as_int)) else {
        return Value::Null;
    };
    if n < 0 {
        return Value::Null;
    }
    Value::Text(s.repeat(n as usize))
}

fn space(args: &[Value]) -> Value {
    match args.first().and_then(Value::as_int) {
        Some(n) if n >= 0 => Value::Text(" ".repeat(n as usize)),
        _ => Value::Null,
    }
}

fn replace(args: &[Value]) -> Value {
    let (Some(s), Some(from), Some(to)) = (
        args.first().and_then(text_of),
        args.get(1).and_then(text_of),
        args.get(2).and_then(text_of),
    ) else {
        return Value::Null;
    };
    if from.is_empty() {
        return Value::Text(s.to_string());
    }
    Value::Text(s.replace(from, to))
}

fn reverse(args: &[Value]) -> Value {
    match args.first().and_then(text_of) {
        Some(s) => Value::Text(s.graphemes(true).rev().collect()),
        None => Value::Null,
    }
}

fn if_fn(args: &[Value]) -> Value {
    let Some(cond) = args.first() else {
        return Value::Null;
    };
    if cond.is_truthy() {
        args.get(1).cloned().unwrap_or(Value::Null)
    } else {
        args.get(2).cloned().unwrap_or(Value::Null)
    }
}

fn ifnull(args: &[Value]) -> Value {
    match args.first() {
        Some(v) if !v.is_null() => v.clone(),
        _ => args.get(1).cloned().unwrap_or(Value::Null),
    }
}

fn nullif(args: &[Value]) -> Value {
    match (args.first(), args.get(1)) {
        (Some(a), Some(b)) if a == b => Value::Null,
        (Some(a), _) => a.clone(),
        _ => Value::Null,
    }
}

fn vector_of(v: &Value) -> Option<Vec<f64>> {
    match v {
        Value::Vector(v) => Some((**v).clone()),
        Value::Blob(b) => crate::record::decode(b)
            .ok()
            .and_then(|vals| match vals.into_iter().next() {
                Some(Value::Vector(v)) => Some((*v).clone()),
                _ => None,
            }),
        _ => None,
    }
}

/// Cosine distance; dimension mismatch yields `2.0` (max distance) rather
/// than an error, so a scan's predicate never aborts the whole query over
/// one malformed row.
fn vector_distance(args: &[Value]) -> Value {
    let (Some(a), Some(b)) = (args.first().and_then(vector_of), args.get(1).and_then(vector_of)) else {
        return Value::Null;
    };
    if a.len() != b.len() {
        return Value::Float(2.0);
    }
    let dot: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Value::Float(2.0);
    }
    Value::Float(1.0 - dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substr_handles_negative_start_and_unicode() {
        let reg = ScalarRegistry::builtins();
        let r = reg.call(
            "SUBSTR",
            &[Value::Text("héllo".into()), Value::Int64(2), Value::Int64(3)],
        );
        assert_eq!(r, Value::Text("éll".into()));
        let r = reg.call("SUBSTR", &[Value::Text("hello".into()), Value::Int64(-3)]);
        assert_eq!(r, Value::Text("llo".into()));
    }

    #[test]
    fn left_right_roundtrip() {
        let reg = ScalarRegistry::builtins();
        let s = "abcdef";
        for n in 0..=s.len() as i64 {
            let l = reg.call("LEFT", &[Value::Text(s.into()), Value::Int64(n)]);
            let r = reg.call(
                "RIGHT",
                &[Value::Text(s.into()), Value::Int64(s.len() as i64 - n)],
            );
            if let (Value::Text(l), Value::Text(r)) = (l, r) {
                assert_eq!(format!("{l}{r}"), s);
            } else {
                panic!("expected text");
            }
        }
    }

    #[test]
    fn concat_ws_null_separator_is_null() {
        let reg = ScalarRegistry::builtins();
        let r = reg.call("CONCAT_WS", &[Value::Null, Value::Text("a".into())]);
        assert_eq!(r, Value::Null);
    }

    #[test]
    fn coalesce_skips_nulls() {
        let reg = ScalarRegistry::builtins();
        let r = reg.call("COALESCE", &[Value::Null, Value::Null, Value::Int64(7)]);
        assert_eq!(r, Value::Int64(7));
    }

    #[test]
    fn round_half_away_from_zero() {
        let reg = ScalarRegistry::builtins();
        assert_eq!(reg.call("ROUND", &[Value::Float(2.5)]), Value::Float(3.0));
        assert_eq!(reg.call("ROUND", &[Value::Float(-2.5)]), Value::Float(-3.0));
    }

    #[test]
    fn vector_distance_dimension_mismatch() {
        let reg = ScalarRegistry::builtins();
        let r = reg.call(
            "VECTOR_DISTANCE",
            &[Value::vector(&[1.0, 0.0]), Value::vector(&[1.0, 0.0, 0.0])],
        );
        assert_eq!(r, Value::Float(2.0));
    }

    #[test]
    fn unknown_function_returns_null() {
        let reg = ScalarRegistry::builtins();
        assert_eq!(reg.call("NOPE", &[]), Value::Null);
    }
}
