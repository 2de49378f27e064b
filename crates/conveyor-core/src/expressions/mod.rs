//! The embedded expression language.
//!
//! Expressions appear in three places: step `if` conditions, SSE `filter`
//! configs, and `${{ }}` interpolation inside `run` strings. An expression
//! is either a single source string or nested lists of expressions joined
//! by depth-alternating connectives: children of the outermost list are
//! OR'ed, one level deeper AND'ed, the next level OR again, and so on.
//!
//! Evaluation happens over a plain variable environment plus a fixed
//! allow-list of pure built-ins; there is no host-language eval and no
//! reachable I/O.

mod builtins;
mod eval;
mod parser;

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Environment, Expression};

pub use eval::{stringify, truthy};

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Error)]
pub enum ExprError {
    /// The source does not match the grammar.
    #[error("parse error: {0}")]
    Parse(String),

    /// An identifier resolved neither in the environment nor as a built-in
    /// namespace.
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// A call to a function outside the allow-list.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// An operation applied to values it does not support.
    #[error("type error: {0}")]
    Type(String),
}

/// Evaluates an expression against the given environment.
pub fn evaluate(expression: &Expression, env: &Environment) -> Result<Value, ExprError> {
    match expression {
        Expression::Single(source) => eval::eval(&parser::parse(source)?, env),
        Expression::Nested(children) => evaluate_level(children, 0, env),
    }
}

/// Combines one nesting level, short-circuiting like the connective it
/// joins with: OR stops at the first truthy child, AND at the first falsy
/// one. The deciding child's value is returned.
fn evaluate_level(
    children: &[Expression],
    depth: usize,
    env: &Environment,
) -> Result<Value, ExprError> {
    let or_level = depth % 2 == 0;
    let mut last = Value::Bool(!or_level);
    for child in children {
        let value = match child {
            Expression::Single(source) => eval::eval(&parser::parse(source)?, env)?,
            Expression::Nested(nested) => evaluate_level(nested, depth + 1, env)?,
        };
        if eval::truthy(&value) == or_level {
            return Ok(value);
        }
        last = value;
    }
    Ok(last)
}

static INTERPOLATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*(.+?)\s*\}\}").unwrap());

/// Replaces every `${{ EXPR }}` occurrence in `template` with the
/// stringified result of evaluating `EXPR`. Occurrences are independent;
/// a template without any marker is returned verbatim.
pub fn interpolate(template: &str, env: &Environment) -> Result<String, ExprError> {
    let mut result = String::with_capacity(template.len());
    let mut last_end = 0;
    for captures in INTERPOLATION.captures_iter(template) {
        let whole = captures.get(0).unwrap();
        let source = captures.get(1).unwrap().as_str();
        result.push_str(&template[last_end..whole.start()]);
        result.push_str(&stringify(&eval::eval(&parser::parse(source)?, env)?));
        last_end = whole.end();
    }
    result.push_str(&template[last_end..]);
    Ok(result)
}

/// Returns a new environment with `value` bound under both `variable` and
/// the conventional alias `payload`. Existing bindings are kept.
pub fn assign(variable: &str, value: Value, env: &Environment) -> Environment {
    let mut next = env.clone();
    next.insert(variable.to_string(), value.clone());
    next.insert("payload".to_string(), value);
    next
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn env(pairs: &[(&str, Value)]) -> Environment {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn eval_str(source: &str, env: &Environment) -> Result<Value, ExprError> {
        evaluate(&Expression::Single(source.to_string()), env)
    }

    #[test]
    fn evaluates_comparisons_against_environment() {
        let env = env(&[("sse", json!({"var": "value"}))]);
        assert_eq!(
            eval_str(r#"sse["var"] == "value""#, &env).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval_str(r#"sse["var"] == "nope""#, &env).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn arithmetic_keeps_integers_integral() {
        let env = Environment::new();
        assert_eq!(eval_str("1 + 2 * 3", &env).unwrap(), json!(7));
        assert_eq!(eval_str("7 % 3", &env).unwrap(), json!(1));
        assert_eq!(eval_str("4 / 2", &env).unwrap(), json!(2.0));
        assert_eq!(eval_str("-(1 + 2)", &env).unwrap(), json!(-3));
    }

    #[test]
    fn boolean_connectives_short_circuit() {
        // The rhs would fail on evaluation; short-circuiting must skip it.
        let env = env(&[("a", json!(true)), ("b", json!(false))]);
        assert_eq!(eval_str("a or missing", &env).unwrap(), json!(true));
        assert_eq!(eval_str("b and missing", &env).unwrap(), json!(false));
        assert!(matches!(
            eval_str("b or missing", &env).unwrap_err(),
            ExprError::UnknownIdentifier(_)
        ));
    }

    #[test]
    fn unknown_identifiers_and_functions_are_rejected() {
        let env = Environment::new();
        assert!(matches!(
            eval_str("nonexistent", &env).unwrap_err(),
            ExprError::UnknownIdentifier(_)
        ));
        assert!(matches!(
            eval_str("__import__('os')", &env).unwrap_err(),
            ExprError::UnknownFunction(_)
        ));
        assert!(matches!(
            eval_str("open('/etc/passwd')", &env).unwrap_err(),
            ExprError::UnknownFunction(_)
        ));
    }

    #[test]
    fn builtins_are_reachable() {
        let env = env(&[("payload", json!([1, 2, 3]))]);
        assert_eq!(eval_str("len(payload)", &env).unwrap(), json!(3));
        assert_eq!(eval_str("max(payload)", &env).unwrap(), json!(3));
        assert_eq!(eval_str("sum(payload)", &env).unwrap(), json!(6));
        assert_eq!(eval_str("str(len(payload))", &env).unwrap(), json!("3"));
        assert_eq!(eval_str("type(payload)", &env).unwrap(), json!("list"));
        assert_eq!(
            eval_str(r#"json.loads('{"a": 1}')"#, &env).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            eval_str(r#"re.search("ay", json.dumps(payload))"#, &env).unwrap(),
            json!(false)
        );
        assert_eq!(
            eval_str(r#"re.sub("[0-9]", "x", "a1b2")"#, &env).unwrap(),
            json!("axbx")
        );
    }

    #[test]
    fn membership_operator() {
        let env = env(&[("payload", json!({"key": [1, 2]}))]);
        assert_eq!(eval_str(r#""key" in payload"#, &env).unwrap(), json!(true));
        assert_eq!(eval_str(r#"2 in payload["key"]"#, &env).unwrap(), json!(true));
        assert_eq!(eval_str(r#""ell" in "hello""#, &env).unwrap(), json!(true));
    }

    #[test]
    fn nested_lists_alternate_connectives() {
        // ["a", ["b", "c"], "d"]  ==  a OR (b AND c) OR d
        let expr: Expression = serde_json::from_value(json!(["a", ["b", "c"], "d"])).unwrap();

        let all_false = env(&[("a", json!(false)), ("b", json!(false)), ("c", json!(false)), ("d", json!(false))]);
        assert!(!truthy(&evaluate(&expr, &all_false).unwrap()));

        let b_and_c = env(&[("a", json!(false)), ("b", json!(true)), ("c", json!(true)), ("d", json!(false))]);
        assert!(truthy(&evaluate(&expr, &b_and_c).unwrap()));

        let only_b = env(&[("a", json!(false)), ("b", json!(true)), ("c", json!(false)), ("d", json!(false))]);
        assert!(!truthy(&evaluate(&expr, &only_b).unwrap()));

        let only_d = env(&[("a", json!(false)), ("b", json!(false)), ("c", json!(false)), ("d", json!(true))]);
        assert!(truthy(&evaluate(&expr, &only_d).unwrap()));
    }

    #[test]
    fn nested_or_short_circuits_before_failing_leaves() {
        let expr: Expression = serde_json::from_value(json!(["a", "missing"])).unwrap();
        let env = env(&[("a", json!(true))]);
        assert!(truthy(&evaluate(&expr, &env).unwrap()));
    }

    #[test]
    fn interpolates_expressions_into_strings() {
        let env = env(&[("payload", json!([1, 2, 3])), ("index", json!(0))]);
        assert_eq!(
            interpolate("len=${{ len(payload) }}", &env).unwrap(),
            "len=3"
        );
        assert_eq!(interpolate("echo ${{ index }}", &env).unwrap(), "echo 0");
        assert_eq!(
            interpolate("${{ index }} and ${{ len(payload) }}", &env).unwrap(),
            "0 and 3"
        );
    }

    #[test]
    fn interpolation_round_trips_plain_templates() {
        let env = Environment::new();
        assert_eq!(interpolate("echo hi", &env).unwrap(), "echo hi");
        assert_eq!(interpolate("", &env).unwrap(), "");
        assert_eq!(interpolate("${ not a marker }", &env).unwrap(), "${ not a marker }");
    }

    #[test]
    fn interpolation_rejects_disallowed_symbols() {
        let env = Environment::new();
        assert!(interpolate("${{ __import__('os') }}", &env).is_err());
    }

    #[test]
    fn floats_keep_a_decimal_point_when_interpolated() {
        let env = env(&[("x", json!(2.0)), ("y", json!(2.5))]);
        assert_eq!(interpolate("${{ x }}", &env).unwrap(), "2.0");
        assert_eq!(interpolate("${{ y }}", &env).unwrap(), "2.5");
    }

    #[test]
    fn assign_binds_variable_and_payload_alias() {
        let env = assign("sse", json!({"var": "value"}), &Environment::new());
        assert_eq!(env["sse"], json!({"var": "value"}));
        assert_eq!(env["payload"], json!({"var": "value"}));
    }

    #[test]
    fn assign_is_idempotent() {
        let once = assign("k", json!("v"), &Environment::new());
        let twice = assign("k", json!("v"), &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn assign_keeps_existing_bindings() {
        let first = assign("a", json!(1), &Environment::new());
        let second = assign("b", json!(2), &first);
        assert_eq!(second["a"], json!(1));
        assert_eq!(second["b"], json!(2));
        assert_eq!(second["payload"], json!(2));
    }
}
