// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Type-id -> factory registry used to reconstruct tagged objects during
//! deserialisation (§4.2, §6.3's "self-describing" requirement).

use dashmap::DashMap;
use serde_json::{Map, Value as Json};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

/// Reconstructs a `Value` from a tagged object's JSON fields. Receives the
/// object's own fields (minus `__type`/`__version`), the stream version,
/// and the registry itself so nested tagged fields can recurse.
pub type Factory =
    Arc<dyn Fn(&Map<String, Json>, u32, &TypeRegistry) -> Result<Value> + Send + Sync>;

/// Maps a `__type` tag to the factory that rebuilds it. Construction-time
/// types (classes registered via [`crate::types`]) register here so their
/// instances round-trip through the serializer without losing identity.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    factories: Arc<DashMap<Arc<str>, Factory>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self { factories: Arc::new(DashMap::new()) }
    }

    /// Registers a factory for `type_id`. Overwriting an existing
    /// registration is allowed — later registrations (e.g. a reloaded
    /// module) intentionally supersede earlier ones.
    pub fn register(&self, type_id: impl Into<Arc<str>>, factory: Factory) {
        self.factories.insert(type_id.into(), factory);
    }

    pub fn lookup(&self, type_id: &str) -> Option<Factory> {
        self.factories.get(type_id).map(|f| f.clone())
    }

    pub fn is_registered(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }

    pub fn unregister(&self, type_id: &str) -> Result<()> {
        self.factories
            .remove(type_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(type_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::build_struct;

    #[test]
    fn unregistered_type_is_not_found_on_unregister() {
        let registry = TypeRegistry::new();
        assert!(matches!(registry.unregister("Missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn registered_factory_is_used_for_reconstruction() {
        let registry = TypeRegistry::new();
        registry.register(
            "Point",
            Arc::new(|fields, _version, _registry| {
                let x = fields.get("x").and_then(Json::as_i64).unwrap_or(0);
                let y = fields.get("y").and_then(Json::as_i64).unwrap_or(0);
                Ok(build_struct(
                    "Point",
                    vec![("x".into(), Value::Int(x)), ("y".into(), Value::Int(y))],
                ))
            }),
        );
        assert!(registry.is_registered("Point"));

        let factory = registry.lookup("Point").unwrap();
        let mut fields = Map::new();
        fields.insert("x".to_string(), Json::from(3));
        fields.insert("y".to_string(), Json::from(4));
        let v = factory(&fields, super::super::CURRENT_VERSION, &registry).unwrap();
        assert!(v.equals(&build_struct(
            "Point",
            vec![("x".into(), Value::Int(3)), ("y".into(), Value::Int(4))]
        )));
    }
}
