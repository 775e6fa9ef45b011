// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Named class/struct/enum registry — the type manager (§4.4).
//!
//! Grounded on `hdds`'s process-wide `TypeRegistry`-style pattern (see
//! `ser::registry::TypeRegistry`) reused here for a different purpose:
//! instead of mapping a wire `__type` tag to a deserialisation factory,
//! this registry maps a class/struct/enum *name* to its definition so
//! `property::PropertyObject` can resolve inherited properties (§3.3
//! "inheritance via classes").

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::{CoreEventArgs, CoreEventBus, CoreEventId};
use crate::property::Property;
use crate::value::{Value, ValueDict};

/// A registered property-object class: its own properties plus an optional
/// parent class name, resolved linearly up the chain (§4.4).
#[derive(Debug, Clone)]
pub struct PropertyObjectClass {
    pub name: Arc<str>,
    pub parent: Option<Arc<str>>,
    pub properties: Vec<Property>,
}

impl PropertyObjectClass {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into(), parent: None, properties: Vec::new() }
    }

    pub fn with_parent(mut self, parent: impl Into<Arc<str>>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }
}

/// A registered struct type: an ordered field-name list (shape only; field
/// values live in `ValueStruct` instances).
#[derive(Debug, Clone)]
pub struct StructType {
    pub name: Arc<str>,
    pub field_names: Vec<Arc<str>>,
}

/// A registered enumeration type: the ordered member-name list.
#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: Arc<str>,
    pub members: Vec<Arc<str>>,
}

#[derive(Clone)]
enum TypeEntry {
    Class(Arc<PropertyObjectClass>),
    Struct(Arc<StructType>),
    Enum(Arc<EnumType>),
}

/// Process-wide (or, per §9, `Context`-scoped) registry of named types.
/// Types are added once; a duplicate `add_*` fails with `AlreadyExists`
/// (§4.4: "Types are added once; duplicate add fails").
#[derive(Clone, Default)]
pub struct TypeManager {
    entries: Arc<DashMap<Arc<str>, TypeEntry>>,
    events: Option<CoreEventBus>,
}

impl TypeManager {
    pub fn new() -> Self {
        Self { entries: Arc::new(DashMap::new()), events: None }
    }

    /// Same registry, wired to fire `TypeAdded`/`TypeRemoved` on `bus`.
    pub fn with_events(bus: CoreEventBus) -> Self {
        Self { entries: Arc::new(DashMap::new()), events: Some(bus) }
    }

    pub fn add_class(&self, class: PropertyObjectClass) -> Result<()> {
        if self.entries.contains_key(&class.name) {
            return Err(Error::AlreadyExists(class.name.to_string()));
        }
        let name = class.name.clone();
        self.entries.insert(name.clone(), TypeEntry::Class(Arc::new(class)));
        self.fire_added(&name, "PropertyObjectClass");
        Ok(())
    }

    pub fn add_struct_type(&self, ty: StructType) -> Result<()> {
        if self.entries.contains_key(&ty.name) {
            return Err(Error::AlreadyExists(ty.name.to_string()));
        }
        let name = ty.name.clone();
        self.entries.insert(name.clone(), TypeEntry::Struct(Arc::new(ty)));
        self.fire_added(&name, "StructType");
        Ok(())
    }

    pub fn add_enum_type(&self, ty: EnumType) -> Result<()> {
        if self.entries.contains_key(&ty.name) {
            return Err(Error::AlreadyExists(ty.name.to_string()));
        }
        let name = ty.name.clone();
        self.entries.insert(name.clone(), TypeEntry::Enum(Arc::new(ty)));
        self.fire_added(&name, "EnumType");
        Ok(())
    }

    /// Removes a registered type by name, firing `TypeRemoved` with an
    /// empty sender (§4.4: "sender = empty component").
    pub fn remove_type(&self, name: &str) -> Result<()> {
        self.entries.remove(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        if let Some(bus) = &self.events {
            let params = ValueDict::new();
            let _ = params.insert(Value::from("TypeName"), Value::from(name));
            bus.trigger(&CoreEventArgs::new(CoreEventId::TypeRemoved, "", params));
        }
        Ok(())
    }

    pub fn get_class(&self, name: &str) -> Option<Arc<PropertyObjectClass>> {
        match self.entries.get(name)?.value().clone() {
            TypeEntry::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn get_struct_type(&self, name: &str) -> Option<Arc<StructType>> {
        match self.entries.get(name)?.value().clone() {
            TypeEntry::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_enum_type(&self, name: &str) -> Option<Arc<EnumType>> {
        match self.entries.get(name)?.value().clone() {
            TypeEntry::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Resolves the full, linearised property list for `class_name`: parent
    /// properties first, then the class's own (so a subclass can shadow a
    /// parent property by name, matching normal override semantics).
    pub fn resolve_properties(&self, class_name: &str) -> Result<Vec<Property>> {
        let mut chain = Vec::new();
        let mut current = Some(Arc::<str>::from(class_name));
        let mut seen = std::collections::HashSet::new();
        while let Some(name) = current {
            if !seen.insert(name.clone()) {
                return Err(Error::InvalidState(format!("class inheritance cycle at '{name}'")));
            }
            let class = self.get_class(&name).ok_or_else(|| Error::NotFound(name.to_string()))?;
            chain.push(class.clone());
            current = class.parent.clone();
        }
        let mut props = Vec::new();
        for class in chain.into_iter().rev() {
            for prop in &class.properties {
                props.retain(|p: &Property| p.name != prop.name);
                props.push(prop.clone());
            }
        }
        Ok(props)
    }

    fn fire_added(&self, name: &str, kind: &str) {
        if let Some(bus) = &self.events {
            let params = ValueDict::new();
            let _ = params.insert(Value::from("Type"), Value::from(name));
            let _ = params.insert(Value::from("Kind"), Value::from(kind));
            bus.trigger(&CoreEventArgs::new(CoreEventId::TypeAdded, "", params));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CoreType;

    #[test]
    fn duplicate_class_add_fails() {
        let tm = TypeManager::new();
        tm.add_class(PropertyObjectClass::new("Base")).unwrap();
        assert!(matches!(tm.add_class(PropertyObjectClass::new("Base")), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn resolve_properties_linearizes_parent_chain_with_override() {
        let tm = TypeManager::new();
        tm.add_class(
            PropertyObjectClass::new("Base")
                .with_property(Property::new("x", CoreType::Int, Value::Int(1))),
        )
        .unwrap();
        tm.add_class(
            PropertyObjectClass::new("Derived")
                .with_parent("Base")
                .with_property(Property::new("x", CoreType::Int, Value::Int(2)))
                .with_property(Property::new("y", CoreType::Int, Value::Int(3))),
        )
        .unwrap();

        let props = tm.resolve_properties("Derived").unwrap();
        assert_eq!(props.len(), 2);
        let x = props.iter().find(|p| &*p.name == "x").unwrap();
        assert_eq!(x.default_value, Value::Int(2));
    }

    #[test]
    fn remove_type_fires_type_removed_with_empty_sender() {
        let bus = CoreEventBus::new();
        let tm = TypeManager::with_events(bus.clone());
        tm.add_class(PropertyObjectClass::new("Base")).unwrap();
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen2 = seen.clone();
        bus.subscribe(move |args| {
            if args.id == CoreEventId::TypeRemoved {
                assert_eq!(&*args.sender_global_id, "");
                seen2.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });
        tm.remove_type("Base").unwrap();
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst));
    }
}
