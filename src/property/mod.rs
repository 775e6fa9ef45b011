// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Reflective property system (§3.3, §4.3): typed, constrained, possibly
//! computed properties on a [`PropertyObject`], with coercion, validation,
//! batched updates and fine-grained change events.
//!
//! Grounded on `hdds::qos`'s policy-object shape (named, typed, validated
//! settings on an owning entity) generalised to this spec's richer surface:
//! reference properties, object-tree properties, and `EvalValue`-backed
//! computed defaults. Events fan out through the same [`crate::events::CoreEventBus`]
//! the component tree uses, so a property write on a detached object is
//! silent exactly the way a detached component's other events are (§3.6).

mod path;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Error, Outcome, Result};
use crate::eval::{self, EvalContext, Expr};
use crate::events::{CoreEventArgs, CoreEventBus, CoreEventId};
use crate::value::{CoreType, Value, ValueDict, ValueList};

/// Backing list for a selection property: either a plain value list
/// (selection by index) or an explicit `int -> value` map (§3.3,
/// SUPPLEMENTED FEATURES #1 in `SPEC_FULL.md`).
#[derive(Debug, Clone)]
pub enum Selection {
    List(ValueList),
    Map(ValueDict),
}

impl Selection {
    fn resolve(&self, selector: &Value) -> Result<Value> {
        match self {
            Selection::List(list) => {
                let idx = selector.as_int()?;
                list.get(idx as usize)
                    .ok_or_else(|| Error::OutOfRange(format!("selection index {idx} out of range")))
            }
            Selection::Map(map) => map
                .get(selector)
                .ok_or_else(|| Error::OutOfRange(format!("no selection entry for {selector:?}"))),
        }
    }
}

/// A lazily-evaluated expression bound to an owning property object
/// (§3.3/§4.3 "EvalValue"). The source text is retained so a clone can
/// rebind to a different owner and re-evaluate.
#[derive(Clone)]
pub struct EvalValue {
    pub source: Arc<str>,
    expr: Arc<Expr>,
    owner: Arc<RwLock<Weak<PropertyObjectInner>>>,
}

impl std::fmt::Debug for EvalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EvalValue({:?})", self.source)
    }
}

impl EvalValue {
    pub fn parse(source: impl Into<Arc<str>>) -> Result<Self> {
        let source = source.into();
        let expr = eval::parse(&source)?;
        Ok(Self { source, expr: Arc::new(expr), owner: Arc::new(RwLock::new(Weak::new())) })
    }

    fn bind(&self, owner: &Arc<PropertyObjectInner>) {
        *self.owner.write() = Arc::downgrade(owner);
    }

    /// Re-resolves its owner on every call (computed lazily, §4.3).
    pub fn evaluate(&self) -> Result<Value> {
        let owner = self
            .owner
            .read()
            .upgrade()
            .ok_or_else(|| Error::InvalidState("EvalValue owner no longer exists".to_string()))?;
        eval::evaluate(&self.expr, &BoundContext(&owner))
    }
}

struct BoundContext<'a>(&'a Arc<PropertyObjectInner>);

impl EvalContext for BoundContext<'_> {
    fn resolve_reference(&self, name: &str) -> Result<Value> {
        PropertyObject(self.0.clone()).get_property_value(name)
    }
    fn resolve_selected_value(&self, name: &str) -> Result<Value> {
        PropertyObject(self.0.clone()).get_property_selection_value(name)
    }
    fn resolve_property_names(&self, _name: &str) -> Result<Value> {
        let obj = PropertyObject(self.0.clone());
        let list = ValueList::new();
        for name in obj.property_names() {
            list.push(Value::String(name))?;
        }
        Ok(Value::List(list))
    }
}

/// Property metadata (§3.3).
#[derive(Clone)]
pub struct Property {
    pub name: Arc<str>,
    pub value_type: CoreType,
    pub default_value: Value,
    pub default_eval: Option<EvalValue>,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub unit: Option<Arc<str>>,
    pub description: Option<Arc<str>>,
    pub visible: bool,
    pub read_only: bool,
    pub suggested_values: Option<ValueList>,
    pub selection: Option<Selection>,
    pub validator: Option<Arc<Expr>>,
    pub coercer: Option<Arc<Expr>>,
    /// Set for reference properties: the target this property delegates to.
    pub referenced_property: Option<Arc<Expr>>,
    /// Arity for `func`/`proc`-typed properties; `None` for ordinary values.
    pub callable_arity: Option<usize>,
    pub on_read: Option<Arc<dyn Fn(Value) -> Value + Send + Sync>>,
    pub on_write: Option<Arc<dyn Fn(&Value) + Send + Sync>>,
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl Property {
    pub fn new(name: impl Into<Arc<str>>, value_type: CoreType, default_value: Value) -> Self {
        Self {
            name: name.into(),
            value_type,
            default_value,
            default_eval: None,
            min: None,
            max: None,
            unit: None,
            description: None,
            visible: true,
            read_only: false,
            suggested_values: None,
            selection: None,
            validator: None,
            coercer: None,
            referenced_property: None,
            callable_arity: None,
            on_read: None,
            on_write: None,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_range(mut self, min: Value, max: Value) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_validator(mut self, expr: Expr) -> Self {
        self.validator = Some(Arc::new(expr));
        self
    }

    pub fn with_coercer(mut self, expr: Expr) -> Self {
        self.coercer = Some(Arc::new(expr));
        self
    }

    /// Builds a reference property: all accessors except name/reference
    /// metadata delegate to `target` (§3.3).
    pub fn reference(name: impl Into<Arc<str>>, target: Expr) -> Self {
        let mut p = Self::new(name, CoreType::Undefined, Value::Undefined);
        p.referenced_property = Some(Arc::new(target));
        p
    }

    pub fn is_reference(&self) -> bool {
        self.referenced_property.is_some()
    }
}

struct PropertyObjectInner {
    class_name: Option<Arc<str>>,
    local_properties: RwLock<Vec<Property>>,
    values: RwLock<HashMap<String, Value>>,
    pending: RwLock<Option<HashMap<String, Value>>>,
    children: RwLock<HashMap<String, PropertyObject>>,
    frozen: AtomicBool,
    owner_path: RwLock<Arc<str>>,
    events: RwLock<Option<CoreEventBus>>,
    types: RwLock<Option<crate::types::TypeManager>>,
    remote_update: AtomicBool,
    enabled: AtomicBool,
}

/// The reflective container every [`crate::component::Component`] wraps
/// (§3.3). Cheap to clone: an `Arc` handle to shared interior state.
#[derive(Clone)]
pub struct PropertyObject(Arc<PropertyObjectInner>);

impl PropertyObject {
    pub fn new() -> Self {
        Self(Arc::new(PropertyObjectInner {
            class_name: None,
            local_properties: RwLock::new(Vec::new()),
            values: RwLock::new(HashMap::new()),
            pending: RwLock::new(None),
            children: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
            owner_path: RwLock::new(Arc::from("")),
            events: RwLock::new(None),
            types: RwLock::new(None),
            remote_update: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
        }))
    }

    /// A property object inheriting its properties from a registered class
    /// (§3.3 "inheritance via classes").
    pub fn with_class(class_name: impl Into<Arc<str>>, types: crate::types::TypeManager) -> Self {
        let obj = Self(Arc::new(PropertyObjectInner {
            class_name: Some(class_name.into()),
            local_properties: RwLock::new(Vec::new()),
            values: RwLock::new(HashMap::new()),
            pending: RwLock::new(None),
            children: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
            owner_path: RwLock::new(Arc::from("")),
            events: RwLock::new(None),
            types: RwLock::new(Some(types)),
            remote_update: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
        }));
        obj
    }

    pub fn set_event_bus(&self, bus: CoreEventBus) {
        *self.0.events.write() = Some(bus);
    }

    /// Gates `fire()` the same way `Component::fire` gates on
    /// `Component::enabled()`: a detached (or since-detached) object stays
    /// silent (§3.6, spec.md "events are dropped while disabled"). The
    /// owning [`crate::component::Component`] calls this in lockstep with
    /// its own `set_enabled`.
    pub fn set_enabled(&self, enabled: bool) {
        self.0.enabled.store(enabled, Ordering::Release);
        for child in self.0.children.read().values() {
            child.set_enabled(enabled);
        }
    }

    pub fn enabled(&self) -> bool {
        self.0.enabled.load(Ordering::Acquire)
    }

    pub fn set_owner_path(&self, path: impl Into<Arc<str>>) {
        *self.0.owner_path.write() = path.into();
    }

    pub fn owner_path(&self) -> Arc<str> {
        self.0.owner_path.read().clone()
    }

    pub fn set_remote_update(&self, enabled: bool) {
        self.0.remote_update.store(enabled, Ordering::Release);
    }

    pub fn remote_update(&self) -> bool {
        self.0.remote_update.load(Ordering::Acquire)
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.load(Ordering::Acquire)
    }

    pub fn freeze(&self) -> Result<()> {
        self.0.frozen.store(true, Ordering::Release);
        Ok(())
    }

    fn resolved_properties(&self) -> Result<Vec<Property>> {
        let mut props = if let Some(class_name) = &self.0.class_name {
            let types = self.0.types.read().clone().ok_or_else(|| {
                Error::InvalidState("class-backed property object has no type manager".to_string())
            })?;
            types.resolve_properties(class_name)?
        } else {
            Vec::new()
        };
        for local in self.0.local_properties.read().iter() {
            props.retain(|p| p.name != local.name);
            props.push(local.clone());
        }
        Ok(props)
    }

    fn find_property(&self, name: &str) -> Result<Property> {
        self.resolved_properties()?
            .into_iter()
            .find(|p| &*p.name == name)
            .ok_or_else(|| Error::InvalidProperty(name.to_string()))
    }

    pub fn property_names(&self) -> Vec<Arc<str>> {
        self.resolved_properties().unwrap_or_default().into_iter().map(|p| p.name).collect()
    }

    /// Adds a locally-owned property (only valid on a non-class-backed
    /// object or to extend one; §4.6 fires `PropertyAdded`).
    pub fn add_property(&self, property: Property) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        let mut locals = self.0.local_properties.write();
        if locals.iter().any(|p| p.name == property.name) {
            return Err(Error::DuplicateItem(property.name.to_string()));
        }
        locals.push(property.clone());
        drop(locals);
        let params = ValueDict::new();
        params.insert(Value::from("Name"), Value::from(&*property.name))?;
        self.fire(CoreEventId::PropertyAdded, params);
        Ok(())
    }

    pub fn remove_property(&self, name: &str) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        let mut locals = self.0.local_properties.write();
        let before = locals.len();
        locals.retain(|p| &*p.name != name);
        if locals.len() == before {
            return Err(Error::NotFound(name.to_string()));
        }
        drop(locals);
        self.0.values.write().remove(name);
        let params = ValueDict::new();
        params.insert(Value::from("Name"), Value::from(name))?;
        self.fire(CoreEventId::PropertyRemoved, params);
        Ok(())
    }

    /// Splits `path` into (child chain, leaf property) and follows nested
    /// object-property children (§4.3 write-path step 1).
    fn resolve_target(&self, path: &str) -> Result<(PropertyObject, path::Segment)> {
        let segments = path::parse(path)?;
        let mut current = self.clone();
        for seg in &segments[..segments.len() - 1] {
            let child = current
                .0
                .children
                .read()
                .get(&seg.name)
                .cloned()
                .ok_or_else(|| Error::InvalidProperty(format!("no child object '{}'", seg.name)))?;
            current = child;
        }
        Ok((current, segments.last().unwrap().clone()))
    }

    /// Attaches a nested property object as the value of an object-typed
    /// property (§3.3 "Object property"). The child inherits the parent's
    /// event bus and enabled state at attach time, the same way
    /// `Component::attach` cascades those down the component tree.
    pub fn set_child_object(&self, name: impl Into<String>, child: PropertyObject) {
        if let Some(bus) = self.0.events.read().clone() {
            child.set_event_bus(bus);
        }
        child.set_enabled(self.enabled());
        self.0.children.write().insert(name.into(), child);
    }

    pub fn get_child_object(&self, name: &str) -> Option<PropertyObject> {
        self.0.children.read().get(name).cloned()
    }

    /// Read path (§4.3): resolves nested paths, applies on-read
    /// substitution, follows reference properties transparently.
    pub fn get_property_value(&self, path: &str) -> Result<Value> {
        let (obj, seg) = self.resolve_target(path)?;
        if seg.index.is_some() {
            // `list[i]` read: fetch the whole property then index.
            let base = obj.get_own_property_value(&seg.name)?;
            let idx = seg.index.unwrap();
            return match base {
                Value::List(l) => l
                    .get(idx)
                    .ok_or_else(|| Error::OutOfRange(format!("index {idx} out of range"))),
                other => Err(Error::InvalidType(format!("{:?} is not indexable", other.core_type()))),
            };
        }
        obj.get_own_property_value(&seg.name)
    }

    fn get_own_property_value(&self, name: &str) -> Result<Value> {
        let property = self.find_property(name)?;
        let property = self.resolve_reference_target(&property)?;
        if let Some(child) = self.0.children.read().get(&*property.name) {
            return child.to_object_value();
        }
        let raw = if let Some(pending) = self.0.pending.read().as_ref() {
            if let Some(v) = pending.get(&*property.name) {
                v.clone()
            } else {
                self.stored_or_default(&property)?
            }
        } else {
            self.stored_or_default(&property)?
        };
        let value = if let Some(hook) = &property.on_read { hook(raw) } else { raw };
        Ok(value)
    }

    fn to_object_value(&self) -> Result<Value> {
        // Object-typed properties surface as an opaque reference by path;
        // callers that want the nested object use `get_child_object`.
        Ok(Value::Object(self.owner_path()))
    }

    fn stored_or_default(&self, property: &Property) -> Result<Value> {
        if let Some(v) = self.0.values.read().get(&*property.name) {
            return Ok(v.clone());
        }
        if let Some(eval) = &property.default_eval {
            eval.bind(&self.0);
            return eval.evaluate();
        }
        Ok(property.default_value.clone())
    }

    /// Resolves selection properties: index/key against the backing list
    /// or map (§4.3 "getPropertySelectionValue").
    pub fn get_property_selection_value(&self, path: &str) -> Result<Value> {
        let (obj, seg) = obj_seg(self, path)?;
        let property = obj.find_property(&seg.name)?;
        let property = obj.resolve_reference_target(&property)?;
        let selection = property
            .selection
            .as_ref()
            .ok_or_else(|| Error::InvalidProperty(format!("'{}' is not a selection property", property.name)))?;
        let selector = obj.get_own_property_value(&property.name)?;
        selection.resolve(&selector)
    }

    fn resolve_reference_target(&self, property: &Property) -> Result<Property> {
        if let Some(target_expr) = &property.referenced_property {
            let target_name = match eval::evaluate(target_expr, &BoundContext(&self.0)) {
                Ok(Value::String(s)) => s,
                _ => match &**target_expr {
                    Expr::Reference(crate::eval::Reference::Bare(name)) => Arc::from(name.as_str()),
                    _ => {
                        return Err(Error::ResolveFailed(format!(
                            "reference property '{}' target did not resolve to a name",
                            property.name
                        )))
                    }
                },
            };
            return self.find_property(&target_name);
        }
        Ok(property.clone())
    }

    /// Write path (§4.3 steps 1-9).
    pub fn set_property_value(&self, path: &str, value: Value) -> Result<Outcome> {
        self.set_property_value_impl(path, value, false)
    }

    /// Protected write: bypasses the read-only rejection for a caller that
    /// holds write access to the owning component's protected entry point.
    pub fn set_property_value_protected(&self, path: &str, value: Value) -> Result<Outcome> {
        self.set_property_value_impl(path, value, true)
    }

    fn set_property_value_impl(&self, path: &str, value: Value, protected: bool) -> Result<Outcome> {
        let (obj, seg) = self.resolve_target(path)?;
        if obj.is_frozen() {
            return Err(Error::Frozen);
        }
        let property = obj.find_property(&seg.name)?;
        let property = obj.resolve_reference_target(&property)?;

        if property.read_only && !protected {
            return Err(Error::AccessDenied(format!("'{}' is read-only", property.name)));
        }

        let mut value = if let Some(coercer) = &property.coercer {
            match eval::evaluate(coercer, &CoercionCtx(&obj.0, &value)) {
                Ok(v) => v,
                Err(e) => return Err(Error::CoercionFailed(e.to_string())),
            }
        } else {
            value
        };

        if let Some(validator) = &property.validator {
            let ok = eval::evaluate(validator, &CoercionCtx(&obj.0, &value))
                .map_err(|e| Error::ValidateFailed(e.to_string()))?
                .as_bool()
                .map_err(|e| Error::ValidateFailed(e.to_string()))?;
            if !ok {
                return Err(Error::ValidateFailed(format!("'{}' failed validation", property.name)));
            }
        }

        value = coerce_core_type(&value, property.value_type)?;
        if let (Some(min), Some(max)) = (&property.min, &property.max) {
            check_range(&value, min, max)?;
        }

        let final_name = property.name.to_string();
        let existing = obj.get_own_property_value(&final_name).ok();
        if let Some(existing) = &existing {
            if existing.equals(&value) {
                return Ok(Outcome::Ignored);
            }
        }

        let is_batching = obj.0.pending.read().is_some();
        if is_batching {
            obj.0.pending.write().as_mut().unwrap().insert(final_name.clone(), value.clone());
            return Ok(Outcome::Applied);
        }

        obj.0.values.write().insert(final_name.clone(), value.clone());
        if let Some(hook) = &property.on_write {
            hook(&value);
        }
        let params = ValueDict::new();
        params.insert(Value::from("Name"), Value::from(final_name.as_str()))?;
        params.insert(Value::from("Value"), value.clone())?;
        params.insert(Value::from("Path"), Value::from(&*obj.owner_path()))?;
        obj.fire(CoreEventId::PropertyValueChanged, params);
        Ok(Outcome::Applied)
    }

    /// Clear: removes the override. Object-type properties re-clone their
    /// default (§4.3 "Clear"). Fires `PropertyValueChanged` with the
    /// default value.
    pub fn clear_property_value(&self, path: &str) -> Result<()> {
        let (obj, seg) = self.resolve_target(path)?;
        if obj.is_frozen() {
            return Err(Error::Frozen);
        }
        let property = obj.find_property(&seg.name)?;
        obj.0.values.write().remove(&*property.name);
        let default = obj.stored_or_default(&property)?;
        let params = ValueDict::new();
        params.insert(Value::from("Name"), Value::from(&*property.name))?;
        params.insert(Value::from("Value"), default)?;
        params.insert(Value::from("Path"), Value::from(&*obj.owner_path()))?;
        obj.fire(CoreEventId::PropertyValueChanged, params);
        Ok(())
    }

    /// Opens a batch: writes are buffered instead of applied immediately
    /// (§3.3 "Batch update"). Recurses into nested child objects so a
    /// batch opened on a parent also covers everything nested under it
    /// (§3.3 "Recursion is automatic for nested child property objects").
    pub fn begin_update(&self) {
        let mut pending = self.0.pending.write();
        if pending.is_none() {
            *pending = Some(HashMap::new());
        }
        drop(pending);
        for child in self.0.children.read().values() {
            child.begin_update();
        }
    }

    /// Applies the pending set atomically: per-property events fire in
    /// deterministic (name-sorted) order, then one `UpdateEnd` event
    /// carrying the whole updated mapping (§3.3). Sorted rather than
    /// insertion order because the pending buffer is a plain map; nothing
    /// in §3.3 depends on insertion order, only on determinism. Recurses
    /// into nested child objects after applying its own batch, so each
    /// child fires its own `PropertyValueChanged`/`UpdateEnd` pair whether
    /// or not its batch was opened explicitly (§3.3 "Recursion is
    /// automatic for nested child property objects").
    pub fn end_update(&self) -> Result<()> {
        let pending = self.0.pending.write().take();
        if let Some(pending) = pending {
            let mut ordered: Vec<(String, Value)> = pending.into_iter().collect();
            ordered.sort_by(|a, b| a.0.cmp(&b.0));

            let updated = ValueDict::new();
            for (name, value) in &ordered {
                self.0.values.write().insert(name.clone(), value.clone());
                let params = ValueDict::new();
                params.insert(Value::from("Name"), Value::from(name.as_str()))?;
                params.insert(Value::from("Value"), value.clone())?;
                params.insert(Value::from("Path"), Value::from(&*self.owner_path()))?;
                self.fire(CoreEventId::PropertyValueChanged, params);
                updated.insert(Value::from(name.as_str()), value.clone())?;
            }
            let params = ValueDict::new();
            params.insert(Value::from("UpdatedProperties"), Value::Dict(updated))?;
            params.insert(Value::from("Path"), Value::from(&*self.owner_path()))?;
            self.fire(CoreEventId::PropertyObjectUpdateEnd, params);
        }
        for child in self.0.children.read().values() {
            child.end_update()?;
        }
        Ok(())
    }

    pub fn is_batching(&self) -> bool {
        self.0.pending.read().is_some()
    }

    /// Invokes a `func`/`proc` property. `const` callables (arity `0`
    /// marker handled by caller policy) may run on a locked component; the
    /// component layer enforces that check before calling this (§4.3).
    pub fn call_property(&self, path: &str, args: &[Value]) -> Result<Option<Value>> {
        let (obj, seg) = obj_seg(self, path)?;
        let property = obj.find_property(&seg.name)?;
        let arity = property
            .callable_arity
            .ok_or_else(|| Error::InvalidProperty(format!("'{}' is not callable", property.name)))?;
        if args.len() != arity {
            return Err(Error::InvalidParameter(format!(
                "'{}' expects {arity} argument(s), got {}",
                property.name,
                args.len()
            )));
        }
        let value = obj.get_own_property_value(&property.name)?;
        match value {
            Value::Func(c) | Value::Proc(c) => c.call(args),
            other => Err(Error::InvalidType(format!("{:?} is not callable", other.core_type()))),
        }
    }

    fn fire(&self, id: CoreEventId, params: ValueDict) {
        if !self.enabled() {
            return;
        }
        if let Some(bus) = self.0.events.read().as_ref() {
            bus.trigger(&CoreEventArgs::new(id, self.owner_path(), params));
        }
    }
}

fn obj_seg(root: &PropertyObject, path: &str) -> Result<(PropertyObject, path::Segment)> {
    root.resolve_target(path)
}

struct CoercionCtx<'a>(&'a Arc<PropertyObjectInner>, &'a Value);

impl EvalContext for CoercionCtx<'_> {
    fn resolve_reference(&self, name: &str) -> Result<Value> {
        if name == "value" || name.is_empty() {
            return Ok(self.1.clone());
        }
        PropertyObject(self.0.clone()).get_property_value(name)
    }
    fn resolve_selected_value(&self, name: &str) -> Result<Value> {
        PropertyObject(self.0.clone()).get_property_selection_value(name)
    }
    fn resolve_property_names(&self, _name: &str) -> Result<Value> {
        Ok(Value::List(ValueList::new()))
    }
}

fn coerce_core_type(value: &Value, expected: CoreType) -> Result<Value> {
    if value.core_type() == expected {
        return Ok(value.clone());
    }
    if crate::value::is_numeric_widening(value.core_type(), expected) {
        return Ok(match expected {
            CoreType::Float => Value::Float(value.as_float()?),
            CoreType::Int => Value::Int(value.as_int()?),
            _ => value.clone(),
        });
    }
    Err(Error::InvalidType(format!(
        "expected {:?}, got {:?}",
        expected,
        value.core_type()
    )))
}

fn check_range(value: &Value, min: &Value, max: &Value) -> Result<()> {
    let v = value.as_float().unwrap_or(f64::NAN);
    let lo = min.as_float().unwrap_or(f64::NEG_INFINITY);
    let hi = max.as_float().unwrap_or(f64::INFINITY);
    if v < lo || v > hi {
        return Err(Error::OutOfRange(format!("{v} outside [{lo}, {hi}]")));
    }
    Ok(())
}

impl Default for PropertyObject {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_prop(name: &str, default: i64) -> Property {
        Property::new(name, CoreType::Int, Value::Int(default))
    }

    #[test]
    fn s1_property_override_then_clear() {
        let obj = PropertyObject::new();
        obj.add_property(int_prop("x", 10)).unwrap();
        assert_eq!(obj.get_property_value("x").unwrap(), Value::Int(10));
        obj.set_property_value("x", Value::Int(20)).unwrap();
        assert_eq!(obj.get_property_value("x").unwrap(), Value::Int(20));
        obj.clear_property_value("x").unwrap();
        assert_eq!(obj.get_property_value("x").unwrap(), Value::Int(10));
    }

    #[test]
    fn s2_reference_property_evaluation() {
        let obj = PropertyObject::new();
        obj.add_property(int_prop("a", 10)).unwrap();
        obj.add_property(Property::reference("r", eval::parse("%a").unwrap())).unwrap();
        assert_eq!(obj.get_property_value("r").unwrap(), Value::Int(10));
        obj.set_property_value("r", Value::Int(42)).unwrap();
        assert_eq!(obj.get_property_value("a").unwrap(), Value::Int(42));
    }

    #[test]
    fn s3_batch_update_atomicity() {
        let bus = CoreEventBus::new();
        let obj = PropertyObject::new();
        obj.set_event_bus(bus.clone());
        obj.set_enabled(true);
        obj.add_property(int_prop("x", 0)).unwrap();
        obj.add_property(int_prop("y", 0)).unwrap();

        let events = Arc::new(RwLock::new(Vec::new()));
        let events2 = events.clone();
        bus.subscribe(move |args| events2.write().push(args.id));

        obj.begin_update();
        obj.set_property_value("x", Value::Int(1)).unwrap();
        obj.set_property_value("y", Value::Int(2)).unwrap();
        assert_eq!(obj.get_property_value("x").unwrap(), Value::Int(0));
        assert!(events.read().is_empty());

        obj.end_update().unwrap();
        assert_eq!(obj.get_property_value("x").unwrap(), Value::Int(1));
        assert_eq!(obj.get_property_value("y").unwrap(), Value::Int(2));
        let seen = events.read().clone();
        assert_eq!(
            seen,
            vec![
                CoreEventId::PropertyValueChanged,
                CoreEventId::PropertyValueChanged,
                CoreEventId::PropertyObjectUpdateEnd
            ]
        );
    }

    #[test]
    fn same_value_write_is_ignored_and_fires_no_event() {
        let bus = CoreEventBus::new();
        let obj = PropertyObject::new();
        obj.set_event_bus(bus.clone());
        obj.set_enabled(true);
        obj.add_property(int_prop("x", 5)).unwrap();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(obj.set_property_value("x", Value::Int(5)).unwrap(), Outcome::Ignored);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn read_only_write_without_protected_is_access_denied() {
        let obj = PropertyObject::new();
        obj.add_property(int_prop("x", 1).read_only()).unwrap();
        assert!(matches!(obj.set_property_value("x", Value::Int(2)), Err(Error::AccessDenied(_))));
        assert!(obj.set_property_value_protected("x", Value::Int(2)).is_ok());
    }

    #[test]
    fn frozen_object_rejects_writes() {
        let obj = PropertyObject::new();
        obj.add_property(int_prop("x", 1)).unwrap();
        obj.freeze().unwrap();
        assert_eq!(obj.set_property_value("x", Value::Int(2)), Err(Error::Frozen));
    }

    #[test]
    fn out_of_range_write_fails() {
        let obj = PropertyObject::new();
        obj.add_property(int_prop("x", 1).with_range(Value::Int(0), Value::Int(10))).unwrap();
        assert!(matches!(obj.set_property_value("x", Value::Int(100)), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn selection_property_resolves_by_index() {
        let obj = PropertyObject::new();
        let list = ValueList::new();
        list.push(Value::from("red")).unwrap();
        list.push(Value::from("green")).unwrap();
        obj.add_property(int_prop("color", 0).with_selection(Selection::List(list))).unwrap();
        obj.set_property_value("color", Value::Int(1)).unwrap();
        let resolved = obj.get_property_selection_value("color").unwrap();
        assert!(resolved.equals(&Value::from("green")));
    }

    #[test]
    fn nested_path_resolves_through_child_object() {
        let parent = PropertyObject::new();
        let child = PropertyObject::new();
        child.add_property(int_prop("inner", 7)).unwrap();
        parent.set_child_object("child", child);
        assert_eq!(parent.get_property_value("child.inner").unwrap(), Value::Int(7));
    }

    #[test]
    fn detached_object_fires_no_events() {
        let bus = CoreEventBus::new();
        let obj = PropertyObject::new();
        obj.set_event_bus(bus.clone());
        obj.add_property(int_prop("x", 0)).unwrap();

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        obj.set_property_value("x", Value::Int(1)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        obj.set_enabled(true);
        obj.set_property_value("x", Value::Int(2)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        obj.set_enabled(false);
        obj.set_property_value("x", Value::Int(3)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_update_recurses_into_child_objects() {
        let bus = CoreEventBus::new();
        let parent = PropertyObject::new();
        parent.set_event_bus(bus.clone());
        parent.set_enabled(true);

        let child = PropertyObject::new();
        child.add_property(int_prop("inner", 0)).unwrap();
        parent.set_child_object("child", child.clone());

        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe(move |args| seen2.write().push(args.id));

        parent.begin_update();
        assert!(child.is_batching());
        child.set_property_value("inner", Value::Int(5)).unwrap();
        assert_eq!(child.get_property_value("inner").unwrap(), Value::Int(0));
        assert!(seen.read().is_empty());

        parent.end_update().unwrap();
        assert_eq!(child.get_property_value("inner").unwrap(), Value::Int(5));
        assert_eq!(seen.read().clone(), vec![CoreEventId::PropertyValueChanged, CoreEventId::PropertyObjectUpdateEnd]);
    }

    #[test]
    fn class_inheritance_resolves_parent_properties() {
        let tm = crate::types::TypeManager::new();
        tm.add_class(
            crate::types::PropertyObjectClass::new("Base").with_property(int_prop("x", 9)),
        )
        .unwrap();
        let obj = PropertyObject::with_class("Base", tm);
        assert_eq!(obj.get_property_value("x").unwrap(), Value::Int(9));
    }
}
