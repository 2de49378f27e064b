//! Tree-walking interpreter over [`serde_json::Value`].
//!
//! Identifiers resolve in the caller-supplied environment only; calls
//! resolve against the built-in allow-list. Nothing else resolves, and no
//! host I/O is reachable from an expression.

use serde_json::{Number, Value};

use super::builtins;
use super::parser::{BinOp, Expr, UnOp};
use super::ExprError;
use crate::types::Environment;

pub fn eval(expr: &Expr, env: &Environment) -> Result<Value, ExprError> {
    match expr {
        Expr::Int(int) => Ok(Value::Number((*int).into())),
        Expr::Float(float) => Ok(number(*float)),
        Expr::Str(string) => Ok(Value::String(string.clone())),
        Expr::Bool(bool) => Ok(Value::Bool(*bool)),
        Expr::Null => Ok(Value::Null),
        Expr::Ident(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
        Expr::List(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| eval(item, env))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Dict(entries) => {
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match eval(key, env)? {
                    Value::String(string) => string,
                    other => stringify(&other),
                };
                object.insert(key, eval(value, env)?);
            }
            Ok(Value::Object(object))
        }
        Expr::Index { base, index } => index_value(&eval(base, env)?, &eval(index, env)?),
        Expr::Member { base, name } => match eval(base, env)? {
            Value::Object(object) => object
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::Type(format!("no such key: {name}"))),
            other => Err(ExprError::Type(format!(
                "cannot access member {name} of {}",
                type_name(&other)
            ))),
        },
        Expr::Call { callee, args } => {
            let name = callee_name(callee)
                .ok_or_else(|| ExprError::Type("expression is not callable".to_string()))?;
            let args = args
                .iter()
                .map(|arg| eval(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            builtins::call(&name, args)
        }
        Expr::Unary { op, expr } => {
            let value = eval(expr, env)?;
            match op {
                UnOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnOp::Neg => match &value {
                    Value::Number(num) if num.is_i64() => num
                        .as_i64()
                        .unwrap()
                        .checked_neg()
                        .map(|int| Value::Number(int.into()))
                        .ok_or_else(overflow),
                    Value::Number(num) => Ok(number(-num.as_f64().unwrap())),
                    other => Err(ExprError::Type(format!(
                        "cannot negate {}",
                        type_name(other)
                    ))),
                },
            }
        }
        Expr::BinOp { lhs, op, rhs } => match op {
            // `or`/`and` short-circuit and yield the deciding operand.
            BinOp::Or => {
                let lhs = eval(lhs, env)?;
                if truthy(&lhs) {
                    Ok(lhs)
                } else {
                    eval(rhs, env)
                }
            }
            BinOp::And => {
                let lhs = eval(lhs, env)?;
                if !truthy(&lhs) {
                    Ok(lhs)
                } else {
                    eval(rhs, env)
                }
            }
            BinOp::Eq => Ok(Value::Bool(values_equal(&eval(lhs, env)?, &eval(rhs, env)?))),
            BinOp::Neq => Ok(Value::Bool(!values_equal(
                &eval(lhs, env)?,
                &eval(rhs, env)?,
            ))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                compare(*op, &eval(lhs, env)?, &eval(rhs, env)?)
            }
            BinOp::In => contains(&eval(lhs, env)?, &eval(rhs, env)?),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                arithmetic(*op, &eval(lhs, env)?, &eval(rhs, env)?)
            }
        },
    }
}

/// Flattens `json.dumps`-style callees into a dotted name; anything that
/// is not a plain identifier chain is not callable.
fn callee_name(callee: &Expr) -> Option<String> {
    match callee {
        Expr::Ident(name) => Some(name.clone()),
        Expr::Member { base, name } => Some(format!("{}.{name}", callee_name(base)?)),
        _ => None,
    }
}

/// Truthiness: null, false, zero, and empty strings/lists/dicts are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(bool) => *bool,
        Value::Number(num) => num.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(string) => !string.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(object) => !object.is_empty(),
    }
}

/// Renders a value for interpolation: strings verbatim, floats with a
/// decimal point kept, everything else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(string) => string.clone(),
        Value::Number(num) if num.is_f64() => {
            let float = num.as_f64().unwrap();
            if float.is_finite() && float.fract() == 0.0 {
                format!("{float:.1}")
            } else {
                format!("{float}")
            }
        }
        other => other.to_string(),
    }
}

pub(super) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(num) if num.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

pub(super) fn number(float: f64) -> Value {
    Number::from_f64(float)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Equality with numeric coercion: `1 == 1.0`.
pub(super) fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn index_value(base: &Value, index: &Value) -> Result<Value, ExprError> {
    match (base, index) {
        (Value::Array(items), Value::Number(num)) => {
            let idx = resolve_index(num, items.len())?;
            items
                .get(idx)
                .cloned()
                .ok_or_else(|| ExprError::Type(format!("list index out of range: {num}")))
        }
        (Value::String(string), Value::Number(num)) => {
            let chars: Vec<char> = string.chars().collect();
            let idx = resolve_index(num, chars.len())?;
            chars
                .get(idx)
                .map(|ch| Value::String(ch.to_string()))
                .ok_or_else(|| ExprError::Type(format!("string index out of range: {num}")))
        }
        (Value::Object(object), Value::String(key)) => object
            .get(key)
            .cloned()
            .ok_or_else(|| ExprError::Type(format!("no such key: {key}"))),
        (base, index) => Err(ExprError::Type(format!(
            "cannot index {} with {}",
            type_name(base),
            type_name(index)
        ))),
    }
}

/// Negative indices count from the end.
fn resolve_index(num: &Number, len: usize) -> Result<usize, ExprError> {
    let idx = num
        .as_i64()
        .ok_or_else(|| ExprError::Type(format!("invalid index: {num}")))?;
    if idx < 0 {
        let from_end = idx.unsigned_abs() as usize;
        len.checked_sub(from_end)
            .ok_or_else(|| ExprError::Type(format!("index out of range: {idx}")))
    } else {
        Ok(idx as usize)
    }
}

fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    let ordering = match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .ok_or_else(|| ExprError::Type("cannot order these numbers".to_string()))?,
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (lhs, rhs) => {
            return Err(ExprError::Type(format!(
                "cannot order {} and {}",
                type_name(lhs),
                type_name(rhs)
            )))
        }
    };
    let result = match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Ge => ordering.is_ge(),
        _ => unreachable!("not a comparison operator: {op:?}"),
    };
    Ok(Value::Bool(result))
}

fn contains(needle: &Value, haystack: &Value) -> Result<Value, ExprError> {
    match (needle, haystack) {
        (Value::String(needle), Value::String(haystack)) => {
            Ok(Value::Bool(haystack.contains(needle.as_str())))
        }
        (needle, Value::Array(items)) => Ok(Value::Bool(
            items.iter().any(|item| values_equal(item, needle)),
        )),
        (Value::String(key), Value::Object(object)) => Ok(Value::Bool(object.contains_key(key))),
        (needle, haystack) => Err(ExprError::Type(format!(
            "cannot test {} membership in {}",
            type_name(needle),
            type_name(haystack)
        ))),
    }
}

fn arithmetic(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    // Non-numeric `+` first: concatenation of strings and lists.
    if op == BinOp::Add {
        match (lhs, rhs) {
            (Value::String(a), Value::String(b)) => {
                return Ok(Value::String(format!("{a}{b}")));
            }
            (Value::Array(a), Value::Array(b)) => {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                return Ok(Value::Array(items));
            }
            _ => {}
        }
    }

    let (Value::Number(a), Value::Number(b)) = (lhs, rhs) else {
        return Err(ExprError::Type(format!(
            "unsupported operands for arithmetic: {} and {}",
            type_name(lhs),
            type_name(rhs)
        )));
    };

    // Integer arithmetic stays integral; division always yields a float.
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        match op {
            BinOp::Add => {
                return a
                    .checked_add(b)
                    .map(|int| Value::Number(int.into()))
                    .ok_or_else(overflow)
            }
            BinOp::Sub => {
                return a
                    .checked_sub(b)
                    .map(|int| Value::Number(int.into()))
                    .ok_or_else(overflow)
            }
            BinOp::Mul => {
                return a
                    .checked_mul(b)
                    .map(|int| Value::Number(int.into()))
                    .ok_or_else(overflow)
            }
            BinOp::Mod => {
                return if b == 0 {
                    Err(ExprError::Type("modulo by zero".to_string()))
                } else {
                    Ok(Value::Number(a.rem_euclid(b).into()))
                }
            }
            BinOp::Div => {}
            _ => unreachable!("not an arithmetic operator: {op:?}"),
        }
    }

    let (a, b) = (
        a.as_f64().ok_or_else(not_a_number)?,
        b.as_f64().ok_or_else(not_a_number)?,
    );
    match op {
        BinOp::Add => Ok(number(a + b)),
        BinOp::Sub => Ok(number(a - b)),
        BinOp::Mul => Ok(number(a * b)),
        BinOp::Div => {
            if b == 0.0 {
                Err(ExprError::Type("division by zero".to_string()))
            } else {
                Ok(number(a / b))
            }
        }
        BinOp::Mod => {
            if b == 0.0 {
                Err(ExprError::Type("modulo by zero".to_string()))
            } else {
                Ok(number(a.rem_euclid(b)))
            }
        }
        _ => unreachable!("not an arithmetic operator: {op:?}"),
    }
}

fn overflow() -> ExprError {
    ExprError::Type("integer overflow".to_string())
}

fn not_a_number() -> ExprError {
    ExprError::Type("not a number".to_string())
}
