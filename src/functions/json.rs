// JSON_* scalar family. Strict JSON parsing plus a tiny `$(.key|[index])*`
// path grammar, backed directly by `serde_json`.

use serde_json::Value as Json;

use crate::value::Value;

fn parse(s: &str) -> Option<Json> {
    serde_json::from_str(s).ok()
}

/// `$(.key|[index])*` path navigation used by `JSON_EXTRACT`.
fn navigate<'a>(root: &'a Json, path: &str) -> Option<&'a Json> {
    let path = path.strip_prefix('$')?;
    let mut cur = root;
    let mut rest = path;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after
                .find(['.', '['])
                .unwrap_or(after.len());
            let key = &after[..end];
            cur = cur.as_object()?.get(key)?;
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']')?;
            let idx: usize = after[..end].parse().ok()?;
            cur = cur.as_array()?.get(idx)?;
            rest = &after[end + 1..];
        } else {
            return None;
        }
    }
    Some(cur)
}

fn json_to_value(j: &Json) -> Value {
    match j {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Int64(if *b { 1 } else { 0 }),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Json(other.to_string()),
    }
}

pub fn json_extract(args: &[Value]) -> Value {
    let (Some(doc), Some(path)) = (args.first(), args.get(1)) else {
        return Value::Null;
    };
    let (Value::Text(doc) | Value::Json(doc)) = doc else {
        return Value::Null;
    };
    let (Value::Text(path) | Value::Json(path)) = path else {
        return Value::Null;
    };
    match parse(doc).and_then(|root| navigate(&root, path).cloned()) {
        Some(found) => json_to_value(&found),
        None => Value::Null,
    }
}

pub fn json_unquote(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Text(s)) | Some(Value::Json(s)) => match parse(s) {
            Some(Json::String(s)) => Value::Text(s),
            _ => Value::Text(s.trim_matches('"').to_string()),
        },
        _ => Value::Null,
    }
}

pub fn json_array(args: &[Value]) -> Value {
    let arr: Vec<Json> = args.iter().map(value_to_json).collect();
    Value::Json(Json::Array(arr).to_string())
}

pub fn json_object(args: &[Value]) -> Value {
    let mut obj = serde_json::Map::new();
    for pair in args.chunks(2) {
        let (Some(key), Some(val)) = (pair.first(), pair.get(1)) else {
            return Value::Null;
        };
        let Value::Text(key) = key else {
            return Value::Null;
        };
        obj.insert(key.clone(), value_to_json(val));
    }
    Value::Json(Json::Object(obj).to_string())
}

fn value_to_json(v: &Value) -> Json {
    match v {
        Value::Null => Json::Null,
        Value::Text(s) | Value::Varchar { s, .. } | Value::Char { s, .. } => {
            Json::String(s.clone())
        }
        Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::Json(s) => parse(s).unwrap_or(Json::Null),
        other => other
            .as_int()
            .map(|i| Json::Number(i.into()))
            .unwrap_or(Json::Null),
    }
}

pub fn json_type(args: &[Value]) -> Value {
    let (Some(Value::Text(s)) | Some(Value::Json(s))) = args.first() else {
        return Value::Null;
    };
    match parse(s) {
        Some(Json::Null) => Value::Text("NULL".into()),
        Some(Json::Bool(_)) => Value::Text("BOOLEAN".into()),
        Some(Json::Number(n)) if n.is_i64() || n.is_u64() => Value::Text("INTEGER".into()),
        Some(Json::Number(_)) => Value::Text("DOUBLE".into()),
        Some(Json::String(_)) => Value::Text("TEXT".into()),
        Some(Json::Array(_)) => Value::Text("ARRAY".into()),
        Some(Json::Object(_)) => Value::Text("OBJECT".into()),
        None => Value::Null,
    }
}

pub fn json_valid(args: &[Value]) -> Value {
    match args.first() {
        Some(Value::Text(s)) | Some(Value::Json(s)) => Value::Int64(i64::from(parse(s).is_some())),
        _ => Value::Int64(0),
    }
}

pub fn json_length(args: &[Value]) -> Value {
    let (Some(Value::Text(s)) | Some(Value::Json(s))) = args.first() else {
        return Value::Null;
    };
    match parse(s) {
        Some(Json::Array(a)) => Value::Int64(a.len() as i64),
        Some(Json::Object(o)) => Value::Int64(o.len() as i64),
        Some(_) => Value::Int64(1),
        None => Value::Null,
    }
}

pub fn json_keys(args: &[Value]) -> Value {
    let (Some(Value::Text(s)) | Some(Value::Json(s))) = args.first() else {
        return Value::Null;
    };
    match parse(s) {
        Some(Json::Object(o)) => {
            let keys: Vec<Json> = o.keys().map(|k| Json::String(k.clone())).collect();
            Value::Json(Json::Array(keys).to_string())
        }
        _ => Value::Null,
    }
}

pub fn json_contains(args: &[Value]) -> Value {
    let (Some(Value::Text(doc)) | Some(Value::Json(doc)), Some(needle)) =
        (args.first(), args.get(1))
    else {
        return Value::Int64(0);
    };
    let Some(root) = parse(doc) else {
        return Value::Int64(0);
    };
    let needle_json = value_to_json(needle);
    Value::Int64(i64::from(contains(&root, &needle_json)))
}

fn contains(haystack: &Json, needle: &Json) -> bool {
    if haystack == needle {
        return true;
    }
    match haystack {
        Json::Array(items) => items.iter().any(|item| contains(item, needle)),
        Json::Object(map) => map.values().any(|item| contains(item, needle)),
        _ => false,
    }
}

pub fn json_set(args: &[Value]) -> Value {
    let (Some(Value::Text(doc)) | Some(Value::Json(doc)), Some(Value::Text(path)), Some(new_val)) =
        (args.first(), args.get(1), args.get(2))
    else {
        return Value::Null;
    };
    let Some(mut root) = parse(doc) else {
        return Value::Null;
    };
    if set_path(&mut root, path, value_to_json(new_val)) {
        Value::Json(root.to_string())
    } else {
        Value::Null
    }
}

fn set_path(root: &mut Json, path: &str, new_val: Json) -> bool {
    let Some(path) = path.strip_prefix('$') else {
        return false;
    };
    let Some(last_dot) = path.rfind('.') else {
        return false;
    };
    let (prefix, key) = (&path[..last_dot], &path[last_dot + 1..]);
    let parent = if prefix.is_empty() {
        Some(root as &mut Json)
    } else {
        navigate_mut(root, &format!("${prefix}"))
    };
    match parent.and_then(|p| p.as_object_mut()) {
        Some(obj) => {
            obj.insert(key.to_string(), new_val);
            true
        }
        None => false,
    }
}

fn navigate_mut<'a>(root: &'a mut Json, path: &str) -> Option<&'a mut Json> {
    let path = path.strip_prefix('$')?;
    let mut cur = root;
    let mut rest = path;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after
                .find(['.', '['])
                .unwrap_or(after.len());
            let key = &after[..end];
            cur = cur.as_object_mut()?.get_mut(key)?;
            rest = &after[end..];
        } else {
            return None;
        }
    }
    Some(cur)
}

pub fn json_remove(args: &[Value]) -> Value {
    let (Some(Value::Text(doc)) | Some(Value::Json(doc)), Some(Value::Text(path))) =
        (args.first(), args.get(1))
    else {
        return Value::Null;
    };
    let Some(mut root) = parse(doc) else {
        return Value::Null;
    };
    let Some(path) = path.strip_prefix('$') else {
        return Value::Null;
    };
    let Some(last_dot) = path.rfind('.') else {
        return Value::Null;
    };
    let (prefix, key) = (&path[..last_dot], &path[last_dot + 1..]);
    let parent = if prefix.is_empty() {
        Some(&mut root)
    } else {
        navigate_mut(&mut root, &format!("${prefix}"))
    };
    match parent.and_then(|p| p.as_object_mut()) {
        Some(obj) => {
            obj.remove(key);
            Value::Json(root.to_string())
        }
        None => Value::Null,
    }
}
