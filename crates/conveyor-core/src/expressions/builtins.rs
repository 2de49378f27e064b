//! The fixed allow-list of pure built-in functions.
//!
//! These are the only callables an expression can reach. Each is a pure
//! function over JSON values; none touch the host environment.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use regex::Regex;
use serde_json::Value;

use super::eval::{number, stringify, truthy, type_name, values_equal};
use super::ExprError;

pub(super) fn call(name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    match name {
        "abs" => {
            let [value] = exactly(name, args)?;
            match &value {
                Value::Number(num) if num.is_i64() => {
                    Ok(Value::Number(num.as_i64().unwrap().abs().into()))
                }
                Value::Number(num) => Ok(number(num.as_f64().unwrap().abs())),
                other => Err(bad_arg(name, other)),
            }
        }
        "bool" => {
            let [value] = exactly(name, args)?;
            Ok(Value::Bool(truthy(&value)))
        }
        "dict" => match args.len() {
            0 => Ok(Value::Object(serde_json::Map::new())),
            1 => match args.into_iter().next().unwrap() {
                Value::Object(object) => Ok(Value::Object(object)),
                other => Err(bad_arg(name, &other)),
            },
            len => Err(arity(name, "at most 1", len)),
        },
        "float" => {
            let [value] = exactly(name, args)?;
            match &value {
                Value::Number(num) => Ok(number(num.as_f64().unwrap_or(0.0))),
                Value::Bool(bool) => Ok(number(if *bool { 1.0 } else { 0.0 })),
                Value::String(string) => string
                    .trim()
                    .parse::<f64>()
                    .map(number)
                    .map_err(|_| ExprError::Type(format!("invalid float literal: {string}"))),
                other => Err(bad_arg(name, other)),
            }
        }
        "hash" => {
            let [value] = exactly(name, args)?;
            let mut hasher = DefaultHasher::new();
            value.to_string().hash(&mut hasher);
            Ok(Value::Number((hasher.finish() as i64).into()))
        }
        "int" => {
            let [value] = exactly(name, args)?;
            match &value {
                Value::Number(num) if num.is_i64() => Ok(value),
                Value::Number(num) => Ok(Value::Number(
                    (num.as_f64().unwrap().trunc() as i64).into(),
                )),
                Value::Bool(bool) => Ok(Value::Number(i64::from(*bool).into())),
                Value::String(string) => string
                    .trim()
                    .parse::<i64>()
                    .map(|int| Value::Number(int.into()))
                    .map_err(|_| ExprError::Type(format!("invalid int literal: {string}"))),
                other => Err(bad_arg(name, other)),
            }
        }
        "len" => {
            let [value] = exactly(name, args)?;
            let len = match &value {
                Value::String(string) => string.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(object) => object.len(),
                other => return Err(bad_arg(name, other)),
            };
            Ok(Value::Number((len as i64).into()))
        }
        "list" | "tuple" => match args.len() {
            0 => Ok(Value::Array(vec![])),
            1 => match args.into_iter().next().unwrap() {
                Value::Array(items) => Ok(Value::Array(items)),
                Value::String(string) => Ok(Value::Array(
                    string
                        .chars()
                        .map(|ch| Value::String(ch.to_string()))
                        .collect(),
                )),
                Value::Object(object) => Ok(Value::Array(
                    object.keys().cloned().map(Value::String).collect(),
                )),
                other => Err(bad_arg(name, &other)),
            },
            len => Err(arity(name, "at most 1", len)),
        },
        "max" => extremum(name, args, std::cmp::Ordering::Greater),
        "min" => extremum(name, args, std::cmp::Ordering::Less),
        "round" => {
            let [value] = exactly(name, args)?;
            match &value {
                Value::Number(num) if num.is_i64() => Ok(value),
                Value::Number(num) => Ok(Value::Number(
                    (num.as_f64().unwrap().round() as i64).into(),
                )),
                other => Err(bad_arg(name, other)),
            }
        }
        "set" => {
            let [value] = exactly(name, args)?;
            let Value::Array(items) = value else {
                return Err(bad_arg(name, &value));
            };
            let mut unique: Vec<Value> = vec![];
            for item in items {
                if !unique.iter().any(|seen| values_equal(seen, &item)) {
                    unique.push(item);
                }
            }
            Ok(Value::Array(unique))
        }
        "str" => {
            let [value] = exactly(name, args)?;
            Ok(Value::String(stringify(&value)))
        }
        "sum" => {
            let [value] = exactly(name, args)?;
            let Value::Array(items) = &value else {
                return Err(bad_arg(name, &value));
            };
            let mut all_ints = true;
            for item in items {
                match item {
                    Value::Number(num) if num.is_i64() => {}
                    Value::Number(_) => all_ints = false,
                    other => return Err(bad_arg(name, other)),
                }
            }
            if all_ints {
                let mut total = 0i64;
                for item in items {
                    total = total
                        .checked_add(item.as_i64().unwrap())
                        .ok_or_else(|| ExprError::Type("integer overflow".to_string()))?;
                }
                Ok(Value::Number(total.into()))
            } else {
                Ok(number(items.iter().filter_map(Value::as_f64).sum()))
            }
        }
        "type" => {
            let [value] = exactly(name, args)?;
            Ok(Value::String(type_name(&value).to_string()))
        }
        "json.dumps" => {
            let [value] = exactly(name, args)?;
            serde_json::to_string(&value)
                .map(Value::String)
                .map_err(|err| ExprError::Type(format!("json.dumps: {err}")))
        }
        "json.loads" => {
            let [value] = exactly(name, args)?;
            let Value::String(string) = &value else {
                return Err(bad_arg(name, &value));
            };
            serde_json::from_str(string)
                .map_err(|err| ExprError::Type(format!("json.loads: {err}")))
        }
        "re.match" => {
            let [pattern, subject] = exactly(name, args)?;
            let regex = compile(&pattern)?;
            let subject = string_arg(name, &subject)?;
            Ok(Value::Bool(
                regex.find(subject).is_some_and(|found| found.start() == 0),
            ))
        }
        "re.search" => {
            let [pattern, subject] = exactly(name, args)?;
            let regex = compile(&pattern)?;
            Ok(Value::Bool(regex.is_match(string_arg(name, &subject)?)))
        }
        "re.sub" => {
            let [pattern, replacement, subject] = exactly(name, args)?;
            let regex = compile(&pattern)?;
            let replacement = string_arg(name, &replacement)?;
            let subject = string_arg(name, &subject)?;
            Ok(Value::String(
                regex.replace_all(subject, replacement).into_owned(),
            ))
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

fn exactly<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], ExprError> {
    let len = args.len();
    <[Value; N]>::try_from(args).map_err(|_| arity(name, &N.to_string(), len))
}

fn arity(name: &str, expected: &str, got: usize) -> ExprError {
    ExprError::Type(format!("{name}() takes {expected} argument(s), got {got}"))
}

fn bad_arg(name: &str, value: &Value) -> ExprError {
    ExprError::Type(format!("{name}() does not accept a {}", type_name(value)))
}

fn string_arg<'v>(name: &str, value: &'v Value) -> Result<&'v str, ExprError> {
    match value {
        Value::String(string) => Ok(string),
        other => Err(bad_arg(name, other)),
    }
}

fn compile(pattern: &Value) -> Result<Regex, ExprError> {
    let Value::String(pattern) = pattern else {
        return Err(ExprError::Type("regex pattern must be a string".to_string()));
    };
    Regex::new(pattern).map_err(|err| ExprError::Type(format!("invalid regex: {err}")))
}

/// `max`/`min`: over one list argument, or over the arguments themselves.
fn extremum(name: &str, args: Vec<Value>, keep: std::cmp::Ordering) -> Result<Value, ExprError> {
    let items = match args.len() {
        0 => return Err(arity(name, "at least 1", 0)),
        1 => match args.into_iter().next().unwrap() {
            Value::Array(items) if !items.is_empty() => items,
            Value::Array(_) => {
                return Err(ExprError::Type(format!("{name}() of an empty list")))
            }
            other => return Err(bad_arg(name, &other)),
        },
        _ => args,
    };

    let mut items = items.into_iter();
    let Some(mut best) = items.next() else {
        return Err(arity(name, "at least 1", 0));
    };
    for item in items {
        if ordering(name, &item, &best)? == keep {
            best = item;
        }
    }
    Ok(best)
}

fn ordering(name: &str, lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, ExprError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .ok_or_else(|| ExprError::Type(format!("{name}(): unordered numbers"))),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (lhs, rhs) => Err(ExprError::Type(format!(
            "{name}(): cannot order {} and {}",
            type_name(lhs),
            type_name(rhs)
        ))),
    }
}
