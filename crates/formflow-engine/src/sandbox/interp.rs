//! AST interpreter with a cooperative deadline

use std::collections::HashMap;
use std::time::Instant;

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;

use crate::data::errors::SandboxError;
use crate::data::types::GraphValue;
use crate::sandbox::parser::{BinaryOp, Expr, UnaryOp};

/// Nesting bound; deeper expressions are rejected rather than recursed into.
const MAX_DEPTH: usize = 64;

pub(crate) struct Interp<'a> {
    pub scope: &'a HashMap<String, GraphValue>,
    pub deadline: Instant,
}

impl Interp<'_> {
    pub(crate) fn eval(&self, expr: &Expr, depth: usize) -> Result<GraphValue, SandboxError> {
        if Instant::now() >= self.deadline {
            return Err(SandboxError::Timeout);
        }
        if depth > MAX_DEPTH {
            return Err(SandboxError::Eval(
                "expression nested too deeply".to_string(),
            ));
        }
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self
                .scope
                .get(name)
                .cloned()
                .ok_or_else(|| SandboxError::Eval(format!("name '{}' is not defined", name))),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, depth + 1)?);
                }
                Ok(GraphValue::List(out))
            }
            Expr::Map(entries) => {
                let mut out = HashMap::with_capacity(entries.len());
                for (key, value) in entries {
                    out.insert(key.clone(), self.eval(value, depth + 1)?);
                }
                Ok(GraphValue::Map(out))
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, depth + 1)?;
                match op {
                    UnaryOp::Not => Ok(GraphValue::Bool(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        GraphValue::Int(i) => Ok(GraphValue::Int(-i)),
                        GraphValue::Float(f) => Ok(GraphValue::Float(-f)),
                        other => Err(SandboxError::Eval(format!(
                            "cannot negate {}",
                            type_name(&other)
                        ))),
                    },
                }
            }
            Expr::Binary(op, left, right) => self.binary(*op, left, right, depth),
            Expr::Index(object, index) => {
                let object = self.eval(object, depth + 1)?;
                let index = self.eval(index, depth + 1)?;
                self.index(&object, &index)
            }
            Expr::Attr(object, name) => {
                let object = self.eval(object, depth + 1)?;
                object.get_key(name).ok_or_else(|| {
                    SandboxError::Eval(format!(
                        "{} has no attribute '{}'",
                        type_name(&object),
                        name
                    ))
                })
            }
            Expr::Call {
                module,
                function,
                args,
            } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, depth + 1)?);
                }
                match module.as_deref() {
                    None => call_builtin(function, &values),
                    Some("re") => call_re(function, &values),
                    Some("datetime") => call_datetime(function, &values),
                    Some(other) => Err(SandboxError::Denied(format!(
                        "module '{}' is not allowed",
                        other
                    ))),
                }
            }
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        depth: usize,
    ) -> Result<GraphValue, SandboxError> {
        // short-circuit forms return the deciding operand, Python-style
        if op == BinaryOp::And {
            let l = self.eval(left, depth + 1)?;
            return if l.is_truthy() {
                self.eval(right, depth + 1)
            } else {
                Ok(l)
            };
        }
        if op == BinaryOp::Or {
            let l = self.eval(left, depth + 1)?;
            return if l.is_truthy() {
                Ok(l)
            } else {
                self.eval(right, depth + 1)
            };
        }

        let l = self.eval(left, depth + 1)?;
        let r = self.eval(right, depth + 1)?;
        match op {
            BinaryOp::Add => add(&l, &r),
            BinaryOp::Sub => numeric_op(&l, &r, "-", |a, b| a - b, i64::checked_sub),
            BinaryOp::Mul => numeric_op(&l, &r, "*", |a, b| a * b, i64::checked_mul),
            BinaryOp::Div => divide(&l, &r),
            BinaryOp::Mod => modulo(&l, &r),
            BinaryOp::Eq => Ok(GraphValue::Bool(values_equal(&l, &r))),
            BinaryOp::Ne => Ok(GraphValue::Bool(!values_equal(&l, &r))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = compare(&l, &r)?;
                let result = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Ok(GraphValue::Bool(result))
            }
            BinaryOp::In => Ok(GraphValue::Bool(contains(&r, &l)?)),
            BinaryOp::NotIn => Ok(GraphValue::Bool(!contains(&r, &l)?)),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn index(&self, object: &GraphValue, index: &GraphValue) -> Result<GraphValue, SandboxError> {
        match (object, index) {
            (GraphValue::List(items), GraphValue::Int(i)) => {
                let len = items.len() as i64;
                let at = if *i < 0 { i + len } else { *i };
                if at < 0 || at >= len {
                    return Err(SandboxError::Eval("list index out of range".to_string()));
                }
                Ok(items[at as usize].clone())
            }
            (GraphValue::String(s), GraphValue::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let len = chars.len() as i64;
                let at = if *i < 0 { i + len } else { *i };
                if at < 0 || at >= len {
                    return Err(SandboxError::Eval("string index out of range".to_string()));
                }
                Ok(GraphValue::String(chars[at as usize].to_string()))
            }
            (GraphValue::Map(_), GraphValue::String(key))
            | (GraphValue::Node(_), GraphValue::String(key)) => {
                object.get_key(key).ok_or_else(|| {
                    SandboxError::Eval(format!("key '{}' not found", key))
                })
            }
            _ => Err(SandboxError::Eval(format!(
                "cannot index {} with {}",
                type_name(object),
                type_name(index)
            ))),
        }
    }
}

fn type_name(value: &GraphValue) -> &'static str {
    match value {
        GraphValue::Null => "null",
        GraphValue::Bool(_) => "bool",
        GraphValue::Int(_) => "int",
        GraphValue::Float(_) => "float",
        GraphValue::String(_) => "string",
        GraphValue::List(_) => "list",
        GraphValue::Map(_) => "map",
        GraphValue::Node(_) => "node",
    }
}

fn as_number(value: &GraphValue) -> Option<f64> {
    match value {
        GraphValue::Int(i) => Some(*i as f64),
        GraphValue::Float(f) => Some(*f),
        _ => None,
    }
}

fn values_equal(l: &GraphValue, r: &GraphValue) -> bool {
    match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn compare(l: &GraphValue, r: &GraphValue) -> Result<std::cmp::Ordering, SandboxError> {
    match (l, r) {
        (GraphValue::String(a), GraphValue::String(b)) => Ok(a.cmp(b)),
        _ => match (as_number(l), as_number(r)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| {
                SandboxError::Eval("NaN is not orderable".to_string())
            }),
            _ => Err(SandboxError::Eval(format!(
                "cannot order {} and {}",
                type_name(l),
                type_name(r)
            ))),
        },
    }
}

fn add(l: &GraphValue, r: &GraphValue) -> Result<GraphValue, SandboxError> {
    match (l, r) {
        (GraphValue::String(a), GraphValue::String(b)) => {
            Ok(GraphValue::String(format!("{}{}", a, b)))
        }
        (GraphValue::List(a), GraphValue::List(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(GraphValue::List(out))
        }
        _ => numeric_op(l, r, "+", |a, b| a + b, i64::checked_add),
    }
}

fn numeric_op(
    l: &GraphValue,
    r: &GraphValue,
    symbol: &str,
    float_op: fn(f64, f64) -> f64,
    int_op: fn(i64, i64) -> Option<i64>,
) -> Result<GraphValue, SandboxError> {
    if let (GraphValue::Int(a), GraphValue::Int(b)) = (l, r) {
        if let Some(result) = int_op(*a, *b) {
            return Ok(GraphValue::Int(result));
        }
    }
    match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => Ok(GraphValue::Float(float_op(a, b))),
        _ => Err(SandboxError::Eval(format!(
            "unsupported operands for '{}': {} and {}",
            symbol,
            type_name(l),
            type_name(r)
        ))),
    }
}

fn divide(l: &GraphValue, r: &GraphValue) -> Result<GraphValue, SandboxError> {
    match (as_number(l), as_number(r)) {
        (Some(_), Some(b)) if b == 0.0 => {
            Err(SandboxError::Eval("division by zero".to_string()))
        }
        (Some(a), Some(b)) => Ok(GraphValue::Float(a / b)),
        _ => Err(SandboxError::Eval(format!(
            "unsupported operands for '/': {} and {}",
            type_name(l),
            type_name(r)
        ))),
    }
}

fn modulo(l: &GraphValue, r: &GraphValue) -> Result<GraphValue, SandboxError> {
    match (l, r) {
        (GraphValue::Int(_), GraphValue::Int(0)) => {
            Err(SandboxError::Eval("division by zero".to_string()))
        }
        (GraphValue::Int(a), GraphValue::Int(b)) => Ok(GraphValue::Int(a.rem_euclid(*b))),
        _ => match (as_number(l), as_number(r)) {
            (Some(_), Some(b)) if b == 0.0 => {
                Err(SandboxError::Eval("division by zero".to_string()))
            }
            (Some(a), Some(b)) => Ok(GraphValue::Float(a.rem_euclid(b))),
            _ => Err(SandboxError::Eval(format!(
                "unsupported operands for '%': {} and {}",
                type_name(l),
                type_name(r)
            ))),
        },
    }
}

fn contains(container: &GraphValue, needle: &GraphValue) -> Result<bool, SandboxError> {
    match container {
        GraphValue::List(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        GraphValue::String(s) => match needle {
            GraphValue::String(sub) => Ok(s.contains(sub.as_str())),
            _ => Err(SandboxError::Eval(
                "'in <string>' requires a string operand".to_string(),
            )),
        },
        GraphValue::Map(map) => match needle {
            GraphValue::String(key) => Ok(map.contains_key(key)),
            _ => Ok(false),
        },
        _ => Err(SandboxError::Eval(format!(
            "{} is not a container",
            type_name(container)
        ))),
    }
}

fn call_builtin(function: &str, args: &[GraphValue]) -> Result<GraphValue, SandboxError> {
    match function {
        "len" => {
            let [arg] = args else {
                return Err(SandboxError::Eval("len() takes one argument".to_string()));
            };
            let len = match arg {
                GraphValue::String(s) => s.chars().count(),
                GraphValue::List(items) => items.len(),
                GraphValue::Map(map) => map.len(),
                other => {
                    return Err(SandboxError::Eval(format!(
                        "{} has no len()",
                        type_name(other)
                    )))
                }
            };
            Ok(GraphValue::Int(len as i64))
        }
        "min" | "max" => {
            let items: Vec<GraphValue> = match args {
                [GraphValue::List(items)] => items.clone(),
                _ if args.len() >= 2 => args.to_vec(),
                _ => {
                    return Err(SandboxError::Eval(format!(
                        "{}() needs a list or several arguments",
                        function
                    )))
                }
            };
            let mut iter = items.into_iter();
            let Some(mut best) = iter.next() else {
                return Err(SandboxError::Eval(format!(
                    "{}() of empty sequence",
                    function
                )));
            };
            for item in iter {
                let ordering = compare(&item, &best)?;
                let better = if function == "min" {
                    ordering.is_lt()
                } else {
                    ordering.is_gt()
                };
                if better {
                    best = item;
                }
            }
            Ok(best)
        }
        "sum" => {
            let [GraphValue::List(items)] = args else {
                return Err(SandboxError::Eval("sum() takes one list".to_string()));
            };
            let mut int_total: i64 = 0;
            let mut float_total: f64 = 0.0;
            let mut all_int = true;
            for item in items {
                match item {
                    GraphValue::Int(i) => {
                        int_total = int_total.wrapping_add(*i);
                        float_total += *i as f64;
                    }
                    GraphValue::Float(f) => {
                        all_int = false;
                        float_total += *f;
                    }
                    other => {
                        return Err(SandboxError::Eval(format!(
                            "sum() over non-numeric {}",
                            type_name(other)
                        )))
                    }
                }
            }
            if all_int {
                Ok(GraphValue::Int(int_total))
            } else {
                Ok(GraphValue::Float(float_total))
            }
        }
        "sorted" => {
            let [GraphValue::List(items)] = args else {
                return Err(SandboxError::Eval("sorted() takes one list".to_string()));
            };
            let mut out = items.clone();
            let mut failure = None;
            out.sort_by(|a, b| match compare(a, b) {
                Ok(ordering) => ordering,
                Err(err) => {
                    failure.get_or_insert(err);
                    std::cmp::Ordering::Equal
                }
            });
            match failure {
                Some(err) => Err(err),
                None => Ok(GraphValue::List(out)),
            }
        }
        other => Err(SandboxError::Denied(format!(
            "function '{}' is not allowed",
            other
        ))),
    }
}

fn call_re(function: &str, args: &[GraphValue]) -> Result<GraphValue, SandboxError> {
    let [GraphValue::String(pattern), GraphValue::String(text)] = args else {
        return Err(SandboxError::Eval(format!(
            "re.{}() takes (pattern, string)",
            function
        )));
    };
    match function {
        "match" => {
            let anchored = format!("^(?:{})", pattern);
            let regex = compile(&anchored)?;
            Ok(GraphValue::Bool(regex.is_match(text)))
        }
        "search" => {
            let regex = compile(pattern)?;
            Ok(GraphValue::Bool(regex.is_match(text)))
        }
        "findall" => {
            let regex = compile(pattern)?;
            Ok(GraphValue::List(
                regex
                    .find_iter(text)
                    .map(|m| GraphValue::String(m.as_str().to_string()))
                    .collect(),
            ))
        }
        other => Err(SandboxError::Denied(format!(
            "re.{} is not allowed",
            other
        ))),
    }
}

fn compile(pattern: &str) -> Result<Regex, SandboxError> {
    Regex::new(pattern).map_err(|err| SandboxError::Eval(format!("invalid pattern: {}", err)))
}

fn call_datetime(function: &str, args: &[GraphValue]) -> Result<GraphValue, SandboxError> {
    match function {
        "now" => {
            if !args.is_empty() {
                return Err(SandboxError::Eval(
                    "datetime.now() takes no arguments".to_string(),
                ));
            }
            Ok(GraphValue::String(Utc::now().to_rfc3339()))
        }
        "today" => {
            if !args.is_empty() {
                return Err(SandboxError::Eval(
                    "datetime.today() takes no arguments".to_string(),
                ));
            }
            Ok(GraphValue::String(
                Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            ))
        }
        "year" | "month" | "day" => {
            let [GraphValue::String(text)] = args else {
                return Err(SandboxError::Eval(format!(
                    "datetime.{}() takes one date string",
                    function
                )));
            };
            let date = parse_date(text)?;
            let part = match function {
                "year" => date.year() as i64,
                "month" => date.month() as i64,
                _ => date.day() as i64,
            };
            Ok(GraphValue::Int(part))
        }
        other => Err(SandboxError::Denied(format!(
            "datetime.{} is not allowed",
            other
        ))),
    }
}

fn parse_date(text: &str) -> Result<NaiveDate, SandboxError> {
    let head = if text.len() >= 10 { &text[..10] } else { text };
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .map_err(|_| SandboxError::Eval(format!("'{}' is not an ISO date", text)))
}
