// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Reference-counted polymorphic value kernel (§3.1, §4.1).
//!
//! Every object the runtime exchanges — property values, packet metadata,
//! RPC parameters — is a [`Value`]. `Value` is a closed, cloneable,
//! freezable tagged union rather than a trait-object hierarchy: capability
//! queries (`borrow_interface`) are explicit instead of relying on downcast
//! chains, per the design note in spec §9 ("treat objects as tagged
//! variants implementing a capability set").

mod container;
mod convert;

pub use container::{ValueDict, ValueList, ValueSet};
pub use convert::{is_numeric_widening, widen_numeric};

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Runtime core-type tag, the closed set every `Value` carries (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreType {
    Undefined,
    Bool,
    Int,
    Float,
    String,
    Ratio,
    Complex,
    List,
    Dict,
    Struct,
    Enum,
    Object,
    Func,
    Proc,
    Binary,
    Range,
    Iterable,
}

/// Exact rational number, used for unit scaling and sample-rate ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ratio {
    pub numerator: i64,
    pub denominator: i64,
}

impl Ratio {
    pub fn new(numerator: i64, denominator: i64) -> Self {
        Self { numerator, denominator }
    }

    pub fn as_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// Double-precision complex scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

/// Inclusive integer range, used by the `range` core type and by range
/// sample types in the value kernel (not the DataDescriptor range type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeValue {
    pub low: i64,
    pub high: i64,
}

/// A named struct instance: a struct-type name plus an ordered field map.
#[derive(Debug, Clone)]
pub struct ValueStruct {
    pub type_name: Arc<str>,
    pub fields: ValueDict,
}

/// An enumerator value: an enum-type name plus the selected member name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueEnum {
    pub type_name: Arc<str>,
    pub member: Arc<str>,
}

/// A callable stored as a property value (`func` returns a `Value`, `proc`
/// returns nothing). Identity equality only — callables aren't structurally
/// comparable.
#[derive(Clone)]
pub struct Callable {
    pub arity: usize,
    inner: Arc<dyn Fn(&[Value]) -> Result<Option<Value>> + Send + Sync>,
}

impl Callable {
    pub fn new(
        arity: usize,
        f: impl Fn(&[Value]) -> Result<Option<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self { arity, inner: Arc::new(f) }
    }

    pub fn call(&self, args: &[Value]) -> Result<Option<Value>> {
        if args.len() != self.arity {
            return Err(Error::InvalidParameter(format!(
                "callable expects {} argument(s), got {}",
                self.arity,
                args.len()
            )));
        }
        (self.inner)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable(arity={})", self.arity)
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A non-owning capability view, returned by [`Value::borrow_interface`].
pub enum Interface<'a> {
    List(&'a ValueList),
    Dict(&'a ValueDict),
}

/// The base value type every object in the runtime is expressed as.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Ratio(Ratio),
    Complex(Complex),
    List(ValueList),
    Dict(ValueDict),
    Struct(ValueStruct),
    Enum(ValueEnum),
    /// Opaque reference to a property object / component, by global id.
    Object(Arc<str>),
    Func(Callable),
    Proc(Callable),
    Binary(Arc<Vec<u8>>),
    Range(RangeValue),
}

impl fmt::Debug for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}i", self.re, self.im)
    }
}

impl PartialEq for Complex {
    fn eq(&self, other: &Self) -> bool {
        self.re == other.re && self.im == other.im
    }
}

thread_local! {
    /// Re-entry guard for `to_string_cycle_safe`: keyed by the container's
    /// `Arc` pointer address, so a container that re-enters its own
    /// stringification (directly or through a cycle) prints `"..."`
    /// instead of recursing forever.
    static VISITING: RefCell<std::collections::HashSet<usize>> = RefCell::new(std::collections::HashSet::new());
}

impl Value {
    pub fn core_type(&self) -> CoreType {
        match self {
            Value::Undefined => CoreType::Undefined,
            Value::Bool(_) => CoreType::Bool,
            Value::Int(_) => CoreType::Int,
            Value::Float(_) => CoreType::Float,
            Value::String(_) => CoreType::String,
            Value::Ratio(_) => CoreType::Ratio,
            Value::Complex(_) => CoreType::Complex,
            Value::List(_) => CoreType::List,
            Value::Dict(_) => CoreType::Dict,
            Value::Struct(_) => CoreType::Struct,
            Value::Enum(_) => CoreType::Enum,
            Value::Object(_) => CoreType::Object,
            Value::Func(_) => CoreType::Func,
            Value::Proc(_) => CoreType::Proc,
            Value::Binary(_) => CoreType::Binary,
            Value::Range(_) => CoreType::Range,
        }
    }

    /// Structural equality. Callables compare by identity; containers
    /// compare element-wise (dicts order-insensitively, per §3.1).
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Ratio(a), Value::Ratio(b)) => a == b,
            (Value::Complex(a), Value::Complex(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.equals(b),
            (Value::Dict(a), Value::Dict(b)) => a.equals(b),
            (Value::Struct(a), Value::Struct(b)) => {
                a.type_name == b.type_name && a.fields.equals(&b.fields)
            }
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Func(a), Value::Func(b)) | (Value::Proc(a), Value::Proc(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            _ => false,
        }
    }

    /// Stable hash, consistent with `equals` for the cases that matter
    /// (numeric widening is not hash-consistent across types, matching
    /// the documented lossy numeric conversion rules in §4.1).
    pub fn hash_code(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut h = DefaultHasher::new();
        match self {
            Value::Undefined => 0u8.hash(&mut h),
            Value::Bool(b) => b.hash(&mut h),
            Value::Int(i) => i.hash(&mut h),
            Value::Float(f) => f.to_bits().hash(&mut h),
            Value::String(s) => s.hash(&mut h),
            Value::Ratio(r) => r.hash(&mut h),
            Value::Complex(c) => {
                c.re.to_bits().hash(&mut h);
                c.im.to_bits().hash(&mut h);
            }
            Value::List(l) => l.hash_into(&mut h),
            Value::Dict(d) => d.hash_into(&mut h),
            Value::Struct(s) => {
                s.type_name.hash(&mut h);
                s.fields.hash_into(&mut h);
            }
            Value::Enum(e) => e.hash(&mut h),
            Value::Object(o) => o.hash(&mut h),
            Value::Func(c) | Value::Proc(c) => (Arc::as_ptr(&c.inner) as *const () as usize).hash(&mut h),
            Value::Binary(b) => b.hash(&mut h),
            Value::Range(r) => r.hash(&mut h),
        }
        h.finish()
    }

    /// Cycle-safe stringification: containers that re-enter their own
    /// printing (through a reference cycle) render as `"..."`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.to_string(),
            Value::Ratio(r) => format!("{}/{}", r.numerator, r.denominator),
            Value::Complex(c) => format!("{}+{}i", c.re, c.im),
            Value::List(l) => l.to_display_string(),
            Value::Dict(d) => d.to_display_string(),
            Value::Struct(s) => format!("{}{}", s.type_name, s.fields.to_display_string()),
            Value::Enum(e) => format!("{}::{}", e.type_name, e.member),
            Value::Object(o) => format!("<object {o}>"),
            Value::Func(_) => "<func>".to_string(),
            Value::Proc(_) => "<proc>".to_string(),
            Value::Binary(b) => format!("<binary {} bytes>", b.len()),
            Value::Range(r) => format!("[{}..{}]", r.low, r.high),
        }
    }

    /// Deep structural copy of cloneable children; non-cloneable children
    /// (callables) are shared by reference, per §3.1.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::List(l) => Value::List(l.deep_clone()),
            Value::Dict(d) => Value::Dict(d.deep_clone()),
            Value::Struct(s) => Value::Struct(ValueStruct {
                type_name: s.type_name.clone(),
                fields: s.fields.deep_clone(),
            }),
            other => other.clone(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        match self {
            Value::List(l) => l.is_frozen(),
            Value::Dict(d) => d.is_frozen(),
            _ => true, // scalars have no mutator, so they behave as always-frozen
        }
    }

    pub fn freeze(&self) -> Result<()> {
        match self {
            Value::List(l) => l.freeze(),
            Value::Dict(d) => d.freeze(),
            _ => Ok(()),
        }
    }

    /// Capability-query accessor: a non-owning view as a narrower interface,
    /// or `NoInterface` if this value doesn't implement it.
    pub fn borrow_interface(&self, iid: &str) -> Result<Interface<'_>> {
        match (iid, self) {
            ("List", Value::List(l)) => Ok(Interface::List(l)),
            ("Dict", Value::Dict(d)) => Ok(Interface::Dict(d)),
            _ => Err(Error::NoInterface(iid.to_string())),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(*b as i64),
            Value::Float(f) => convert::float_to_int(*f),
            other => Err(Error::ConversionFailed(format!(
                "{:?} is not convertible to int",
                other.core_type()
            ))),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Bool(b) => Ok(*b as i64 as f64),
            other => Err(Error::ConversionFailed(format!(
                "{:?} is not convertible to float",
                other.core_type()
            ))),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            other => Err(Error::ConversionFailed(format!(
                "{:?} is not convertible to bool",
                other.core_type()
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(Error::ConversionFailed(format!(
                "{:?} is not a string",
                other.core_type()
            ))),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Arc::from(v))
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v.as_str()))
    }
}

/// Builds a `Value::Struct` from a field-name -> `Value` map, in caller-given
/// insertion order.
pub fn build_struct(type_name: &str, fields: impl IntoIterator<Item = (String, Value)>) -> Value {
    let dict = ValueDict::new();
    for (k, v) in fields {
        let _ = dict.insert(Value::String(Arc::from(k.as_str())), v);
    }
    Value::Struct(ValueStruct { type_name: Arc::from(type_name), fields: dict })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_widening_equals() {
        assert!(Value::Int(4).equals(&Value::Float(4.0)));
    }

    #[test]
    fn struct_equality_ignores_dict_order() {
        let a = build_struct("P", vec![("x".into(), Value::Int(1)), ("y".into(), Value::Int(2))]);
        let b = build_struct("P", vec![("y".into(), Value::Int(2)), ("x".into(), Value::Int(1))]);
        assert!(a.equals(&b));
    }

    #[test]
    fn clone_then_equals_is_identity() {
        let v = build_struct("P", vec![("x".into(), Value::Int(1))]);
        assert!(v.deep_clone().equals(&v));
    }

    #[test]
    fn freeze_then_mutate_fails() {
        let list = ValueList::new();
        list.push(Value::Int(1)).unwrap();
        list.freeze().unwrap();
        assert_eq!(list.push(Value::Int(2)), Err(Error::Frozen));
    }

    #[test]
    fn double_freeze_is_ignored_not_error() {
        let list = ValueList::new();
        list.freeze().unwrap();
        // Freezing again must not return an error.
        list.freeze().unwrap();
        assert!(list.is_frozen());
    }

    #[test]
    fn borrow_interface_missing_capability_errors() {
        let v = Value::Int(1);
        assert_eq!(
            v.borrow_interface("List").unwrap_err(),
            Error::NoInterface("List".to_string())
        );
    }

    #[test]
    fn out_of_range_float_to_int_fails() {
        let v = Value::Float(1e300);
        assert!(v.as_int().is_err());
    }
}
