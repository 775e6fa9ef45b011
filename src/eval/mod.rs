// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Small reference-expression language used by property validators,
//! coercers, referenced-property expressions and suggested values (§3.3,
//! §4.3 "EvalValue", §4.4).
//!
//! Grounded on `hdds::dds::filter::{parser, evaluator}`: a hand-rolled
//! lexer/recursive-descent parser producing a small AST, evaluated by a
//! tree-walker. The operator set (`+ - * / == != < > <= >= && || !`) and
//! the reference forms (`%name`, `name:value`, `name:selectedValue`,
//! `name:propertyNames`) are the original openDAQ `eval_value_impl.cpp`
//! surface (SUPPLEMENTED FEATURES #3 in `SPEC_FULL.md`), layered onto the
//! filter-evaluator's tree-walking shape.

mod lexer;
mod parser;

pub use parser::{BinOp, Expr, Reference, UnOp};

use crate::error::{Error, Result};
use crate::value::Value;

/// Parses `text` into an [`Expr`] AST. Parsed once; the result is reused on
/// every evaluation (§4.3: "parsed once").
pub fn parse(text: &str) -> Result<Expr> {
    parser::Parser::new(text).parse_expr()
}

/// Resolves references encountered while evaluating an [`Expr`] against the
/// property object that owns the `EvalValue`. Implemented by
/// `property::PropertyObject` so `eval` has no dependency on `property`.
pub trait EvalContext {
    /// `%name` / bare reference: the named property's current value.
    fn resolve_reference(&self, name: &str) -> Result<Value>;
    /// `name:value` — identical to `resolve_reference` (kept distinct so
    /// callers mirror the original's two spellings).
    fn resolve_value(&self, name: &str) -> Result<Value> {
        self.resolve_reference(name)
    }
    /// `name:selectedValue` — the resolved value of a selection property.
    fn resolve_selected_value(&self, name: &str) -> Result<Value>;
    /// `name:propertyNames` — list of property names on the owning object.
    fn resolve_property_names(&self, name: &str) -> Result<Value>;
}

/// Evaluates `expr` against `ctx`. Stateless and reentrant: an `EvalValue`
/// clone rebinds to a new owner simply by evaluating with a different `ctx`.
pub fn evaluate(expr: &Expr, ctx: &dyn EvalContext) -> Result<Value> {
    match expr {
        Expr::IntLit(i) => Ok(Value::Int(*i)),
        Expr::FloatLit(f) => Ok(Value::Float(*f)),
        Expr::StringLit(s) => Ok(Value::String(s.clone().into())),
        Expr::BoolLit(b) => Ok(Value::Bool(*b)),
        Expr::Reference(r) => resolve(r, ctx),
        Expr::List(items) => {
            let list = crate::value::ValueList::new();
            for item in items {
                list.push(evaluate(item, ctx)?)?;
            }
            Ok(Value::List(list))
        }
        Expr::Index(base, idx) => {
            let base = evaluate(base, ctx)?;
            let idx = evaluate(idx, ctx)?.as_int()?;
            match base {
                Value::List(l) => l
                    .get(idx as usize)
                    .ok_or_else(|| Error::OutOfRange(format!("index {idx} out of range"))),
                other => Err(Error::InvalidType(format!(
                    "{:?} is not indexable",
                    other.core_type()
                ))),
            }
        }
        Expr::Unary(op, inner) => {
            let v = evaluate(inner, ctx)?;
            match op {
                UnOp::Not => Ok(Value::Bool(!v.as_bool()?)),
                UnOp::Neg => match v {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(Error::InvalidType(format!(
                        "cannot negate {:?}",
                        other.core_type()
                    ))),
                },
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            if matches!(op, BinOp::And | BinOp::Or) {
                let l = evaluate(lhs, ctx)?.as_bool()?;
                // Short-circuit, per `hdds`'s filter evaluator.
                if *op == BinOp::And && !l {
                    return Ok(Value::Bool(false));
                }
                if *op == BinOp::Or && l {
                    return Ok(Value::Bool(true));
                }
                let r = evaluate(rhs, ctx)?.as_bool()?;
                return Ok(Value::Bool(r));
            }
            let l = evaluate(lhs, ctx)?;
            let r = evaluate(rhs, ctx)?;
            eval_binary(*op, &l, &r)
        }
    }
}

fn resolve(r: &Reference, ctx: &dyn EvalContext) -> Result<Value> {
    match r {
        Reference::Bare(name) => ctx.resolve_reference(name),
        Reference::Value(name) => ctx.resolve_value(name),
        Reference::SelectedValue(name) => ctx.resolve_selected_value(name),
        Reference::PropertyNames(name) => ctx.resolve_property_names(name),
    }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    use BinOp::*;
    match op {
        Add | Sub | Mul | Div => arith(op, l, r),
        Eq => Ok(Value::Bool(l.equals(r))),
        Ne => Ok(Value::Bool(!l.equals(r))),
        Lt | Le | Gt | Ge => compare(op, l, r),
        And | Or => unreachable!("short-circuited above"),
    }
}

fn arith(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        return Ok(Value::Int(match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => {
                if *b == 0 {
                    return Err(Error::CalcFailed("division by zero".to_string()));
                }
                a / b
            }
            _ => unreachable!(),
        }));
    }
    let (a, b) = crate::value::widen_numeric(l, r)?;
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        _ => unreachable!(),
    }))
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Result<Value> {
    let ordering = if let (Value::String(a), Value::String(b)) = (l, r) {
        a.as_ref().cmp(b.as_ref())
    } else {
        let (a, b) = crate::value::widen_numeric(l, r)?;
        a.partial_cmp(&b).ok_or_else(|| Error::CalcFailed("unordered comparison".to_string()))?
    };
    Ok(Value::Bool(match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapCtx(HashMap<String, Value>);
    impl EvalContext for MapCtx {
        fn resolve_reference(&self, name: &str) -> Result<Value> {
            self.0.get(name).cloned().ok_or_else(|| Error::ResolveFailed(name.to_string()))
        }
        fn resolve_selected_value(&self, name: &str) -> Result<Value> {
            self.resolve_reference(name)
        }
        fn resolve_property_names(&self, _name: &str) -> Result<Value> {
            Ok(Value::List(crate::value::ValueList::new()))
        }
    }

    #[test]
    fn arithmetic_and_reference() {
        let ctx = MapCtx(HashMap::from([("a".to_string(), Value::Int(10))]));
        let expr = parse("%a * 2 + 1").unwrap();
        assert_eq!(evaluate(&expr, &ctx).unwrap(), Value::Int(21));
    }

    #[test]
    fn logical_short_circuit_and_comparison() {
        let ctx = MapCtx(HashMap::from([("a".to_string(), Value::Int(5))]));
        let expr = parse("%a > 0 && %a < 10").unwrap();
        assert_eq!(evaluate(&expr, &ctx).unwrap(), Value::Bool(true));
    }

    #[test]
    fn unresolved_reference_fails() {
        let ctx = MapCtx(HashMap::new());
        let expr = parse("%missing").unwrap();
        assert!(matches!(evaluate(&expr, &ctx), Err(Error::ResolveFailed(_))));
    }

    #[test]
    fn division_by_zero_is_calc_failed() {
        let ctx = MapCtx(HashMap::new());
        let expr = parse("1 / 0").unwrap();
        assert!(matches!(evaluate(&expr, &ctx), Err(Error::CalcFailed(_))));
    }
}
