//! The script evaluator.
//!
//! Walks the statement list produced by `graft_core::script::parse` against
//! a scope stack of JSON values. Every capability call goes through the
//! owning [`Sandbox`](super::Sandbox) and is awaited at the call site, so
//! statement order is execution order. In predicate mode (`pure_only`) the
//! sandbox rejects effectful calls, keeping listener predicates cheap and
//! side-effect free.

use std::collections::HashMap;

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;

use graft_core::ExecContext;
use graft_core::script::{BinOp, Callee, Expr, Stmt, StrPart, UnOp};

use crate::error::{ExecError, ExecResult};
use crate::sandbox::{Sandbox, kind_name};

/// Evaluates statements for one handler invocation.
pub(crate) struct Evaluator<'a> {
    sandbox: &'a Sandbox,
    ctx: &'a ExecContext,
    pure_only: bool,
    scopes: Vec<HashMap<String, Value>>,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator with one root scope.
    pub fn new(sandbox: &'a Sandbox, ctx: &'a ExecContext, pure_only: bool) -> Self {
        Self {
            sandbox,
            ctx,
            pure_only,
            scopes: vec![HashMap::new()],
        }
    }

    /// Seeds the root scope with bindings, used for predicate evaluation
    /// where there is no statement prologue.
    pub fn seed(&mut self, bindings: Vec<(&'static str, Value)>) {
        let root = &mut self.scopes[0];
        for (name, value) in bindings {
            root.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn bind(&mut self, name: String, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, value);
        }
    }

    /// Runs a statement block; the value of the last expression statement
    /// is the block's value.
    pub fn run<'b>(&'b mut self, stmts: &'b [Stmt]) -> BoxFuture<'b, ExecResult<Value>> {
        Box::pin(async move {
            let mut last = Value::Null;
            for stmt in stmts {
                match stmt {
                    Stmt::Let { name, value } => {
                        let bound = self.eval(value).await?;
                        self.bind(name.clone(), bound);
                    }
                    Stmt::If {
                        cond,
                        then_body,
                        else_body,
                    } => {
                        let take_then = truthy(&self.eval(cond).await?)?;
                        self.scopes.push(HashMap::new());
                        let result = if take_then {
                            self.run(then_body).await
                        } else {
                            self.run(else_body).await
                        };
                        self.scopes.pop();
                        result?;
                    }
                    Stmt::Expr(expr) => last = self.eval(expr).await?,
                }
            }
            Ok(last)
        })
    }

    /// Evaluates one expression.
    pub fn eval<'b>(&'b mut self, expr: &'b Expr) -> BoxFuture<'b, ExecResult<Value>> {
        Box::pin(async move {
            match expr {
                Expr::Int(n) => Ok(Value::from(*n)),
                Expr::Float(f) => Ok(Value::from(*f)),
                Expr::Bool(b) => Ok(Value::Bool(*b)),
                Expr::Null => Ok(Value::Null),
                Expr::Str(parts) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            StrPart::Lit(text) => out.push_str(text),
                            StrPart::Expr(inner) => {
                                let value = self.eval(inner).await?;
                                out.push_str(&stringify(&value));
                            }
                        }
                    }
                    Ok(Value::String(out))
                }
                Expr::Ident(name) => self
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| ExecError::Reference(format!("unknown identifier '{name}'"))),
                Expr::Array(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval(item).await?);
                    }
                    Ok(Value::Array(values))
                }
                Expr::Object(entries) => {
                    let mut map = serde_json::Map::with_capacity(entries.len());
                    for (key, value) in entries {
                        map.insert(key.clone(), self.eval(value).await?);
                    }
                    Ok(Value::Object(map))
                }
                Expr::Field(base, field) => {
                    let value = self.eval(base).await?;
                    field_access(&value, field)
                }
                Expr::Index(base, index) => {
                    let value = self.eval(base).await?;
                    let index = self.eval(index).await?;
                    index_access(&value, &index)
                }
                Expr::Unary(op, inner) => {
                    let value = self.eval(inner).await?;
                    match op {
                        UnOp::Not => Ok(Value::Bool(!truthy(&value)?)),
                        UnOp::Neg => match &value {
                            Value::Number(n) if n.is_i64() => {
                                Ok(Value::from(-n.as_i64().unwrap_or(0)))
                            }
                            Value::Number(n) => Ok(Value::from(-n.as_f64().unwrap_or(0.0))),
                            other => Err(ExecError::Type(format!(
                                "cannot negate {}",
                                kind_name(other)
                            ))),
                        },
                    }
                }
                Expr::Binary(op, left, right) => {
                    // Short-circuit booleans before touching the right side.
                    if matches!(op, BinOp::And | BinOp::Or) {
                        let lhs = truthy(&self.eval(left).await?)?;
                        return match (op, lhs) {
                            (BinOp::And, false) => Ok(Value::Bool(false)),
                            (BinOp::Or, true) => Ok(Value::Bool(true)),
                            _ => Ok(Value::Bool(truthy(&self.eval(right).await?)?)),
                        };
                    }
                    let lhs = self.eval(left).await?;
                    let rhs = self.eval(right).await?;
                    binary_op(*op, &lhs, &rhs)
                }
                Expr::Call { callee, args } => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg).await?);
                    }
                    match callee {
                        Callee::Function(name) => {
                            self.sandbox.call(name, values, self.ctx, self.pure_only).await
                        }
                        Callee::Library(namespace, name) => {
                            self.sandbox.call_lib(namespace, name, values)
                        }
                    }
                }
            }
        })
    }
}

// =============================================================================
// Value Semantics
// =============================================================================

/// Condition semantics: booleans are themselves, null is false, everything
/// else is a type error so predicates stay honest.
pub(crate) fn truthy(value: &Value) -> ExecResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(ExecError::Type(format!(
            "expected a boolean condition, got {}",
            kind_name(other)
        ))),
    }
}

/// How a value renders inside string interpolation.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn field_access(value: &Value, field: &str) -> ExecResult<Value> {
    match value {
        Value::Object(map) => map
            .get(field)
            .cloned()
            .ok_or_else(|| ExecError::Property(format!("'{field}'"))),
        Value::String(s) if field == "length" => Ok(Value::from(s.chars().count() as i64)),
        Value::Array(items) if field == "length" => Ok(Value::from(items.len() as i64)),
        other => Err(ExecError::Property(format!(
            "'{field}' on {}",
            kind_name(other)
        ))),
    }
}

fn index_access(value: &Value, index: &Value) -> ExecResult<Value> {
    match (value, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| ExecError::Type("array index must be a whole number".into()))?;
            if i < 0 || i as usize >= items.len() {
                return Err(ExecError::Property(format!(
                    "index {i} out of range (length {})",
                    items.len()
                )));
            }
            Ok(items[i as usize].clone())
        }
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| ExecError::Property(format!("'{key}'"))),
        (other, _) => Err(ExecError::Type(format!(
            "cannot index into {}",
            kind_name(other)
        ))),
    }
}

fn numbers(lhs: &Value, rhs: &Value) -> Option<(f64, f64, bool)> {
    let both_int = lhs.is_i64() && rhs.is_i64();
    Some((lhs.as_f64()?, rhs.as_f64()?, both_int))
}

fn binary_op(op: BinOp, lhs: &Value, rhs: &Value) -> ExecResult<Value> {
    match op {
        BinOp::And | BinOp::Or => unreachable!("short-circuited by the evaluator"),
        BinOp::Eq => Ok(Value::Bool(lhs == rhs)),
        BinOp::Ne => Ok(Value::Bool(lhs != rhs)),
        BinOp::Add => match (lhs, rhs) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arithmetic(op, lhs, rhs),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => arithmetic(op, lhs, rhs),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (lhs, rhs) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    let (a, b, _) = numbers(lhs, rhs).ok_or_else(|| type_mismatch(op, lhs, rhs))?;
                    a.partial_cmp(&b)
                        .ok_or_else(|| ExecError::Type("cannot compare NaN".into()))?
                }
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::Contains => match (lhs, rhs) {
            (Value::String(haystack), Value::String(needle)) => {
                Ok(Value::Bool(haystack.contains(needle.as_str())))
            }
            (Value::Array(items), needle) => Ok(Value::Bool(items.contains(needle))),
            (Value::Object(map), Value::String(key)) => Ok(Value::Bool(map.contains_key(key))),
            _ => Err(type_mismatch(op, lhs, rhs)),
        },
        BinOp::StartsWith => match (lhs, rhs) {
            (Value::String(s), Value::String(prefix)) => {
                Ok(Value::Bool(s.starts_with(prefix.as_str())))
            }
            _ => Err(type_mismatch(op, lhs, rhs)),
        },
        BinOp::EndsWith => match (lhs, rhs) {
            (Value::String(s), Value::String(suffix)) => {
                Ok(Value::Bool(s.ends_with(suffix.as_str())))
            }
            _ => Err(type_mismatch(op, lhs, rhs)),
        },
        BinOp::Matches => match (lhs, rhs) {
            (Value::String(s), Value::String(pattern)) => {
                let regex = Regex::new(pattern)
                    .map_err(|e| ExecError::Type(format!("invalid pattern: {e}")))?;
                Ok(Value::Bool(regex.is_match(s)))
            }
            _ => Err(type_mismatch(op, lhs, rhs)),
        },
    }
}

fn arithmetic(op: BinOp, lhs: &Value, rhs: &Value) -> ExecResult<Value> {
    let (a, b, both_int) = numbers(lhs, rhs).ok_or_else(|| type_mismatch(op, lhs, rhs))?;
    if both_int {
        let (a, b) = (lhs.as_i64().unwrap_or(0), rhs.as_i64().unwrap_or(0));
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err(ExecError::Type("division by zero".into()));
                }
                a.checked_div(b)
            }
            _ => {
                if b == 0 {
                    return Err(ExecError::Type("division by zero".into()));
                }
                a.checked_rem(b)
            }
        };
        return result
            .map(Value::from)
            .ok_or_else(|| ExecError::Type("integer overflow".into()));
    }
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(ExecError::Type("division by zero".into()));
            }
            a / b
        }
        _ => {
            if b == 0.0 {
                return Err(ExecError::Type("division by zero".into()));
            }
            a % b
        }
    };
    Ok(Value::from(result))
}

fn type_mismatch(op: BinOp, lhs: &Value, rhs: &Value) -> ExecError {
    ExecError::Type(format!(
        "operator {op:?} cannot combine {} and {}",
        kind_name(lhs),
        kind_name(rhs)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_accepts_bool_and_null_only() {
        assert!(truthy(&Value::Bool(true)).unwrap());
        assert!(!truthy(&Value::Bool(false)).unwrap());
        assert!(!truthy(&Value::Null).unwrap());
        assert!(truthy(&Value::from(1)).is_err());
        assert!(truthy(&Value::from("yes")).is_err());
    }

    #[test]
    fn arithmetic_keeps_integers_integral() {
        let v = binary_op(BinOp::Add, &Value::from(2), &Value::from(3)).unwrap();
        assert_eq!(v, Value::from(5));
        assert!(v.is_i64());

        let v = binary_op(BinOp::Div, &Value::from(7), &Value::from(2)).unwrap();
        assert_eq!(v, Value::from(3));
    }

    #[test]
    fn division_by_zero_is_a_type_error() {
        let err = binary_op(BinOp::Div, &Value::from(1), &Value::from(0)).unwrap_err();
        assert!(matches!(err, ExecError::Type(_)));
    }

    #[test]
    fn string_concatenation_and_comparison() {
        assert_eq!(
            binary_op(BinOp::Add, &Value::from("ab"), &Value::from("cd")).unwrap(),
            Value::from("abcd")
        );
        assert_eq!(
            binary_op(BinOp::Lt, &Value::from("a"), &Value::from("b")).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn contains_works_for_strings_arrays_objects() {
        assert_eq!(
            binary_op(BinOp::Contains, &Value::from("hello"), &Value::from("ell")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            binary_op(
                BinOp::Contains,
                &serde_json::json!([1, 2, 3]),
                &Value::from(2)
            )
            .unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            binary_op(
                BinOp::Contains,
                &serde_json::json!({"a": 1}),
                &Value::from("a")
            )
            .unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn matches_compiles_patterns() {
        assert_eq!(
            binary_op(
                BinOp::Matches,
                &Value::from("warn-123"),
                &Value::from(r"^warn-\d+$")
            )
            .unwrap(),
            Value::Bool(true)
        );
        assert!(binary_op(BinOp::Matches, &Value::from("x"), &Value::from("(")).is_err());
    }

    #[test]
    fn field_access_on_missing_property_is_a_property_error() {
        let err = field_access(&serde_json::json!({"a": 1}), "b").unwrap_err();
        assert!(matches!(err, ExecError::Property(_)));
        assert_eq!(
            field_access(&Value::from("héllo"), "length").unwrap(),
            Value::from(5)
        );
    }

    #[test]
    fn index_bounds_are_checked() {
        let arr = serde_json::json!(["a", "b"]);
        assert_eq!(index_access(&arr, &Value::from(1)).unwrap(), Value::from("b"));
        assert!(index_access(&arr, &Value::from(5)).is_err());
        assert!(index_access(&arr, &Value::from(-1)).is_err());
    }

    #[test]
    fn stringify_renders_like_chat_text() {
        assert_eq!(stringify(&Value::Null), "");
        assert_eq!(stringify(&Value::from(3)), "3");
        assert_eq!(stringify(&Value::from("x")), "x");
        assert_eq!(stringify(&serde_json::json!([1, 2])), "[1,2]");
    }
}
