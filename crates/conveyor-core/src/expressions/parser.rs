//! Parses expression source into a small AST.
//!
//! The grammar is not left-recursive, so repeated operators come back from
//! pest as one-or-many pair lists; `parse_pair` folds those back into a
//! left-associative tree.

use pest::iterators::Pair;
use pest::Parser;

use super::ExprError;

// Isolates the generated ExprParser and Rule types.
mod grammar {
    use pest_derive::Parser;

    #[derive(Parser)]
    #[grammar = "expressions/expr.pest"]
    pub struct ExprParser;
}

use grammar::{ExprParser, Rule};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        name: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    BinOp {
        lhs: Box<Expr>,
        op: BinOp,
        rhs: Box<Expr>,
    },
}

/// Parses one expression string.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let mut pairs = ExprParser::parse(Rule::expression, source)
        .map_err(|err| ExprError::Parse(err.to_string()))?;

    // expression = SOI ~ or_expr ~ EOI
    let or_expr = pairs
        .next()
        .and_then(|expression| expression.into_inner().next())
        .ok_or_else(|| ExprError::Parse("empty expression".to_string()))?;

    parse_pair(or_expr)
}

fn parse_pair(pair: Pair<'_, Rule>) -> Result<Expr, ExprError> {
    match pair.as_rule() {
        // One-or-many chains: first inner pair is the lhs, then operator
        // and operand pairs alternate.
        Rule::or_expr | Rule::and_expr | Rule::comparison | Rule::additive
        | Rule::multiplicative => {
            let mut pairs = pair.into_inner();
            // Grammar guarantees at least one operand.
            let mut expr = parse_pair(pairs.next().unwrap())?;
            while let Some(op) = pairs.next() {
                let rhs = parse_pair(pairs.next().unwrap())?;
                expr = Expr::BinOp {
                    lhs: expr.into(),
                    op: binop(op.as_str()),
                    rhs: rhs.into(),
                };
            }
            Ok(expr)
        }
        Rule::not_expr | Rule::unary_expr => {
            let mut pairs = pair.into_inner();
            let first = pairs.next().unwrap();
            match first.as_rule() {
                Rule::not_op => Ok(Expr::Unary {
                    op: UnOp::Not,
                    expr: parse_pair(pairs.next().unwrap())?.into(),
                }),
                Rule::neg_op => Ok(Expr::Unary {
                    op: UnOp::Neg,
                    expr: parse_pair(pairs.next().unwrap())?.into(),
                }),
                _ => parse_pair(first),
            }
        }
        Rule::postfix_expr => {
            let mut pairs = pair.into_inner();
            let mut expr = parse_pair(pairs.next().unwrap())?;
            for op in pairs {
                expr = match op.as_rule() {
                    Rule::index => Expr::Index {
                        base: expr.into(),
                        index: parse_pair(op.into_inner().next().unwrap())?.into(),
                    },
                    Rule::member => Expr::Member {
                        base: expr.into(),
                        name: op.into_inner().next().unwrap().as_str().to_string(),
                    },
                    Rule::call_args => Expr::Call {
                        callee: expr.into(),
                        args: op
                            .into_inner()
                            .map(parse_pair)
                            .collect::<Result<_, _>>()?,
                    },
                    rule => unreachable!("unexpected postfix rule: {rule:?}"),
                };
            }
            Ok(expr)
        }
        Rule::primary => parse_pair(pair.into_inner().next().unwrap()),
        Rule::number => {
            let raw = pair.as_str();
            if raw.contains('.') {
                Ok(Expr::Float(raw.parse().map_err(|_| bad_number(raw))?))
            } else {
                // Fall back to float on i64 overflow.
                match raw.parse::<i64>() {
                    Ok(int) => Ok(Expr::Int(int)),
                    Err(_) => Ok(Expr::Float(raw.parse().map_err(|_| bad_number(raw))?)),
                }
            }
        }
        Rule::string => {
            let inner = pair.into_inner().next().unwrap();
            Ok(Expr::Str(unescape(inner.as_str())))
        }
        Rule::boolean => Ok(Expr::Bool(matches!(pair.as_str(), "true" | "True"))),
        Rule::null => Ok(Expr::Null),
        Rule::identifier => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::list => Ok(Expr::List(
            pair.into_inner().map(parse_pair).collect::<Result<_, _>>()?,
        )),
        Rule::dict => {
            let entries = pair
                .into_inner()
                .map(|entry| {
                    let mut pairs = entry.into_inner();
                    let key = parse_pair(pairs.next().unwrap())?;
                    let value = parse_pair(pairs.next().unwrap())?;
                    Ok((key, value))
                })
                .collect::<Result<_, ExprError>>()?;
            Ok(Expr::Dict(entries))
        }
        rule => unreachable!("unexpected rule: {rule:?}"),
    }
}

fn binop(op: &str) -> BinOp {
    match op {
        "or" | "||" => BinOp::Or,
        "and" | "&&" => BinOp::And,
        "==" => BinOp::Eq,
        "!=" => BinOp::Neq,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "in" => BinOp::In,
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        other => unreachable!("unexpected operator: {other}"),
    }
}

fn bad_number(raw: &str) -> ExprError {
    ExprError::Parse(format!("invalid number literal: {raw}"))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
