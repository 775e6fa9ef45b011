// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Component tree (§3.4, §4.5): devices, channels, function blocks, signals
//! and folders are all a [`Component`] — a property object plus identity,
//! active-state cascade, tags, permissions and a resolved lock.
//!
//! Grounded on `hdds`'s entity-with-weak-parent shape (see how a DDS
//! `DataReader` stores a weak back-reference to its `Subscriber`):
//! parent -> child is a strong `Arc`, child -> parent is a [`Weak`], broken
//! and re-resolved on every use per the cyclic-reference guidance in spec
//! §9.

mod folder;
mod permissions;

pub use folder::{Folder, ItemRef, SearchFilter};
pub use permissions::{LockingStrategy, PermissionMask, Permissions};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::{CoreEventArgs, CoreEventId};
use crate::property::PropertyObject;
use crate::value::{Value, ValueDict, ValueList, ValueSet};

/// A component's stable identity: its slash-separated global path once
/// attached, or its bare local id before that (§4.5: "derived once at
/// attach; detach invalidates it").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentId(pub Arc<str>);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        ComponentId(Arc::from(s))
    }
}

impl std::ops::Deref for ComponentId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

pub(crate) struct ComponentInner {
    pub(crate) ctx: Context,
    local_id: Arc<str>,
    global_id: parking_lot::RwLock<Option<Arc<str>>>,
    name: parking_lot::RwLock<Arc<str>>,
    description: parking_lot::RwLock<Option<Arc<str>>>,
    local_active: AtomicBool,
    parent_active: AtomicBool,
    visible: AtomicBool,
    tags: parking_lot::RwLock<ValueSet>,
    permissions: Permissions,
    locking_strategy: parking_lot::RwLock<LockingStrategy>,
    own_lock: Arc<ReentrantMutex<()>>,
    parent: parking_lot::RwLock<Weak<ComponentInner>>,
    enabled: AtomicBool,
    pub(crate) properties: PropertyObject,
    pub(crate) children: parking_lot::RwLock<Vec<Component>>,
    is_folder: bool,
    element_interface: Option<Arc<str>>,
}

/// The tree node every device/channel/signal/function-block/folder is
/// built from (§3.4). Cheap to clone: an `Arc` handle.
#[derive(Clone)]
pub struct Component(pub(crate) Arc<ComponentInner>);

impl Component {
    pub fn new(ctx: Context, local_id: impl Into<Arc<str>>) -> Self {
        Self::new_internal(ctx, local_id, PropertyObject::new(), false, None)
    }

    pub fn with_properties(ctx: Context, local_id: impl Into<Arc<str>>, properties: PropertyObject) -> Self {
        Self::new_internal(ctx, local_id, properties, false, None)
    }

    pub(crate) fn new_internal(
        ctx: Context,
        local_id: impl Into<Arc<str>>,
        properties: PropertyObject,
        is_folder: bool,
        element_interface: Option<Arc<str>>,
    ) -> Self {
        let local_id = local_id.into();
        properties.set_event_bus(ctx.events.clone());
        properties.set_owner_path(local_id.clone());
        Self(Arc::new(ComponentInner {
            ctx,
            name: parking_lot::RwLock::new(local_id.clone()),
            local_id,
            global_id: parking_lot::RwLock::new(None),
            description: parking_lot::RwLock::new(None),
            local_active: AtomicBool::new(true),
            parent_active: AtomicBool::new(true),
            visible: AtomicBool::new(true),
            tags: parking_lot::RwLock::new(ValueSet::new()),
            permissions: Permissions::new(),
            locking_strategy: parking_lot::RwLock::new(LockingStrategy::default()),
            own_lock: Arc::new(ReentrantMutex::new(())),
            parent: parking_lot::RwLock::new(Weak::new()),
            enabled: AtomicBool::new(false),
            properties,
            children: parking_lot::RwLock::new(Vec::new()),
            is_folder,
            element_interface,
        }))
    }

    pub fn local_id(&self) -> Arc<str> {
        self.0.local_id.clone()
    }

    pub fn global_id(&self) -> Option<Arc<str>> {
        self.0.global_id.read().clone()
    }

    pub fn name(&self) -> Arc<str> {
        self.0.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<Arc<str>>) {
        *self.0.name.write() = name.into();
    }

    pub fn description(&self) -> Option<Arc<str>> {
        self.0.description.read().clone()
    }

    pub fn set_description(&self, description: impl Into<Arc<str>>) {
        *self.0.description.write() = Some(description.into());
    }

    pub fn visible(&self) -> bool {
        self.0.visible.load(Ordering::Acquire)
    }

    pub fn set_visible(&self, visible: bool) {
        self.0.visible.store(visible, Ordering::Release);
    }

    pub fn properties(&self) -> &PropertyObject {
        &self.0.properties
    }

    /// The shared collaborators (event bus, type manager, scheduler) this
    /// component was constructed with (§9: "explicit `Context` object").
    pub fn context(&self) -> &Context {
        &self.0.ctx
    }

    pub fn permissions(&self) -> &Permissions {
        &self.0.permissions
    }

    pub fn tags(&self) -> ValueList {
        let list = ValueList::new();
        for tag in self.0.tags.read().iter() {
            let _ = list.push(tag);
        }
        list
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.0.tags.read().contains(&Value::from(tag))
    }

    /// Private mutator (§3.4: "exposed immutable with a private mutator").
    /// Public API only reaches this through a component subtype that opts
    /// in (e.g. a device's `addTag`); kept `pub(crate)` deliberately.
    pub(crate) fn add_tag(&self, tag: &str) -> Result<()> {
        let changed = self.0.tags.write().insert(Value::from(tag))?;
        if changed {
            let params = ValueDict::new();
            params.insert(Value::from("Tags"), Value::List(self.tags()))?;
            self.fire(CoreEventId::TagsChanged, params);
        }
        Ok(())
    }

    pub fn parent(&self) -> Option<Component> {
        self.0.parent.read().upgrade().map(Component)
    }

    pub fn root(&self) -> Component {
        let mut current = self.clone();
        while let Some(p) = current.parent() {
            current = p;
        }
        current
    }

    pub fn is_folder(&self) -> bool {
        self.0.is_folder
    }

    /// Direct children, insertion order. Exposed on every component (not
    /// just [`Folder`]) so a generic tree walker — the RPC path resolver,
    /// a serialiser — doesn't need to know which nodes happen to be
    /// folders; `Folder::children` reuses this same underlying list.
    pub fn children(&self) -> Vec<Component> {
        self.0.children.read().clone()
    }

    pub fn element_interface(&self) -> Option<Arc<str>> {
        self.0.element_interface.clone()
    }

    /// Observable active state: local intention AND every ancestor's
    /// intention (§3.4, invariant 6 in §8).
    pub fn active(&self) -> bool {
        self.0.local_active.load(Ordering::Acquire) && self.0.parent_active.load(Ordering::Acquire)
    }

    pub fn local_active(&self) -> bool {
        self.0.local_active.load(Ordering::Acquire)
    }

    /// Sets this node's own intention and cascades `parentActive` to every
    /// descendant (§3.4: "setting active=false ... sets parentActive=false
    /// on every descendant").
    pub fn set_active(&self, active: bool) {
        self.0.local_active.store(active, Ordering::Release);
        let observable = self.active();
        self.propagate_parent_active(observable);
    }

    fn propagate_parent_active(&self, parent_observable: bool) {
        for child in self.0.children.read().iter() {
            child.0.parent_active.store(parent_observable, Ordering::Release);
            let child_observable = child.active();
            child.propagate_parent_active(child_observable);
        }
    }

    pub fn enabled(&self) -> bool {
        self.0.enabled.load(Ordering::Acquire)
    }

    /// Enables core-event dispatch for this node and re-resolves its lock
    /// (§3.4: "resolution happens at attach time and again when the
    /// core-event trigger is enabled").
    pub fn set_enabled(&self, enabled: bool) {
        self.0.enabled.store(enabled, Ordering::Release);
        self.0.properties.set_enabled(enabled);
    }

    /// Attaches `self` under `parent`: derives the global id, cascades
    /// `parentActive`, recursively enables the subtree if `parent` is
    /// enabled, then fires `ComponentAdded` (§4.5, §4.6: "fires after the
    /// subtree is enabled so listeners see a consistent state").
    pub fn attach(&self, parent: &Component) {
        *self.0.parent.write() = Arc::downgrade(&parent.0);
        let parent_global = parent.global_id().unwrap_or_else(|| parent.local_id());
        let global = if parent_global.is_empty() {
            Arc::from(format!("/{}", self.0.local_id))
        } else {
            Arc::from(format!("{parent_global}/{}", self.0.local_id))
        };
        *self.0.global_id.write() = Some(Arc::clone(&global));
        self.0.properties.set_owner_path(Arc::clone(&global));
        self.0.parent_active.store(parent.active(), Ordering::Release);

        if parent.enabled() {
            self.enable_subtree();
        }

        let params = ValueDict::new();
        params.insert(Value::from("Component"), Value::Object(global))._or_log();
        self.fire(CoreEventId::ComponentAdded, params);
    }

    /// Overrides the lock-resolution strategy chosen at construction
    /// (§3.4: "resolution happens at attach time").
    pub fn set_locking_strategy(&self, strategy: LockingStrategy) {
        *self.0.locking_strategy.write() = strategy;
    }

    fn enable_subtree(&self) {
        self.set_enabled(true);
        for child in self.0.children.read().iter() {
            if child.parent().is_some() {
                child.enable_subtree();
            }
        }
    }

    /// Tears the subtree down bottom-up so no packet flow outlives a
    /// component (§4.5). Plain leaves have nothing below them; `Folder`
    /// calls this on every child before clearing its own list.
    pub fn detach(&self) {
        for child in self.0.children.read().iter() {
            child.detach();
        }
        if self.enabled() {
            let params = ValueDict::new();
            if let Some(id) = self.global_id() {
                let _ = params.insert(Value::from("Id"), Value::from(&*id));
            }
            self.fire(CoreEventId::ComponentRemoved, params);
        }
        self.set_enabled(false);
        *self.0.global_id.write() = None;
    }

    /// Resolves the recursive mutex this component's mutators acquire
    /// (§3.4, §5). `InheritLock` walks ancestors; a `ForwardOwnerLockOwn`
    /// ancestor is transparent to that walk — descendants that inherit
    /// skip straight past it to the tree root.
    pub fn effective_lock(&self) -> Arc<ReentrantMutex<()>> {
        match self.locking_strategy() {
            LockingStrategy::OwnLock | LockingStrategy::ForwardOwnerLockOwn => self.0.own_lock.clone(),
            LockingStrategy::InheritLock => {
                let mut current = self.parent();
                while let Some(p) = current {
                    match p.locking_strategy() {
                        LockingStrategy::OwnLock => return p.0.own_lock.clone(),
                        LockingStrategy::ForwardOwnerLockOwn => return self.root().0.own_lock.clone(),
                        LockingStrategy::InheritLock => current = p.parent(),
                    }
                }
                self.0.own_lock.clone()
            }
        }
    }

    pub fn locking_strategy(&self) -> LockingStrategy {
        *self.0.locking_strategy.read()
    }

    /// `true` once this component has a resolved lock that isn't its own
    /// (used by the RPC/permission layer to tell "locked from above" apart
    /// from "owns its lock").
    pub fn is_locked(&self) -> bool {
        !Arc::ptr_eq(&self.effective_lock(), &self.0.own_lock)
    }

    /// Walks the parent chain for the first explicit mask set for `role`,
    /// defaulting to [`PermissionMask::NONE`] if no ancestor has one
    /// (§3.4, SUPPLEMENTED FEATURES #5 in `SPEC_FULL.md`).
    pub fn effective_permission(&self, role: &str) -> PermissionMask {
        if let Some(mask) = self.0.permissions.own(role) {
            return mask;
        }
        match self.parent() {
            Some(p) => p.effective_permission(role),
            None => PermissionMask::NONE,
        }
    }

    pub fn get_property_value(&self, path: &str) -> Result<Value> {
        self.0.properties.get_property_value(path)
    }

    pub fn set_property_value(&self, path: &str, value: Value) -> Result<crate::error::Outcome> {
        self.0.properties.set_property_value(path, value)
    }

    pub(crate) fn fire(&self, id: CoreEventId, params: ValueDict) {
        if !self.enabled() {
            return;
        }
        let sender = self.global_id().unwrap_or_else(|| self.local_id());
        self.0.ctx.events.trigger(&CoreEventArgs::new(id, sender, params));
    }
}

trait ResultExt {
    fn _or_log(self);
}
impl ResultExt for Result<Option<Value>> {
    fn _or_log(self) {
        if let Err(e) = self {
            log::warn!("ComponentAdded event payload construction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn attach_derives_global_id_from_parent_path() {
        let ctx = ctx();
        let root = Component::new(ctx.clone(), "root");
        root.set_enabled(true);
        *root.0.global_id.write() = Some(Arc::from(""));
        let child = Component::new(ctx, "dev");
        child.attach(&root);
        assert_eq!(child.global_id().unwrap().as_ref(), "/dev");
    }

    #[test]
    fn i6_active_is_local_and_all_ancestors() {
        let ctx = ctx();
        let root = Component::new(ctx.clone(), "root");
        *root.0.global_id.write() = Some(Arc::from(""));
        let child = Component::new(ctx, "dev");
        child.attach(&root);
        assert!(child.active());
        root.set_active(false);
        assert!(!child.active());
        root.set_active(true);
        assert!(child.active());
    }

    #[test]
    fn inherit_lock_resolves_to_nearest_ownlock_ancestor() {
        let ctx = ctx();
        let root = Component::new(ctx.clone(), "root");
        *root.0.global_id.write() = Some(Arc::from(""));
        let mid = Component::new(ctx, "mid");
        mid.set_locking_strategy(LockingStrategy::InheritLock);
        mid.attach(&root);
        assert!(Arc::ptr_eq(&mid.effective_lock(), &root.0.own_lock));
    }
}
