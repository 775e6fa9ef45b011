// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Folders (§3.4, §4.5): components whose children are themselves
//! components, with an optional element-interface tag narrowing the child
//! type (e.g. a folder of input ports), unique-`localId` enforcement, and
//! the composable [`SearchFilter`] used to enumerate a subtree.

use std::sync::Arc;

use crate::component::{Component, ComponentId};
use crate::context::Context;
use crate::error::{Error, Outcome, Result};
use crate::property::PropertyObject;

/// A composable predicate over components (§4.5). `Recursive` is a marker,
/// not a combinator that changes matching itself: callers of
/// [`Folder::items`] detect it on the outermost filter and descend through
/// folders accordingly, matching every other visited node against the
/// inner filter.
#[derive(Clone)]
pub enum SearchFilter {
    /// Matches every component.
    Any,
    /// Matches components with `visible() == true`.
    Visible,
    /// Matches components whose local id is one of these.
    LocalId(Vec<Arc<str>>),
    /// Matches components whose `element_interface()` equals this tag.
    InterfaceId(Arc<str>),
    /// Matches via an arbitrary predicate.
    Custom(Arc<dyn Fn(&Component) -> bool + Send + Sync>),
    /// Descend recursively through folder children, matching every visited
    /// node (not just direct children) against the wrapped filter.
    Recursive(Box<SearchFilter>),
}

impl SearchFilter {
    /// Whether this filter (or its wrapped filter, if `Recursive`) accepts
    /// `component`. `Recursive` delegates straight to its inner filter: the
    /// recursion itself is `Folder::items`'s job, not this predicate's.
    pub fn matches(&self, component: &Component) -> bool {
        match self {
            SearchFilter::Any => true,
            SearchFilter::Visible => component.visible(),
            SearchFilter::LocalId(ids) => ids.iter().any(|id| **id == *component.local_id()),
            SearchFilter::InterfaceId(iid) => component.element_interface().as_deref() == Some(&**iid),
            SearchFilter::Custom(f) => f(component),
            SearchFilter::Recursive(inner) => inner.matches(component),
        }
    }

    /// `true` for the outermost `Recursive` wrapper.
    pub fn is_recursive(&self) -> bool {
        matches!(self, SearchFilter::Recursive(_))
    }

    /// The wrapped filter, stripping one layer of `Recursive`.
    pub fn inner(&self) -> &SearchFilter {
        match self {
            SearchFilter::Recursive(inner) => inner,
            other => other,
        }
    }
}

/// A component whose children are themselves components (§3.4, §4.5).
/// Thin wrapper over [`Component`]: folders reuse the tree node's own
/// `children` list rather than keeping a second one, the same way
/// `InputPort`/`Signal` wrap `Component` instead of duplicating its fields.
#[derive(Clone)]
pub struct Folder(Component);

impl Folder {
    /// Creates a detached folder. `element_interface` narrows what kind of
    /// child this folder is documented to hold (e.g. `"IInputPort"`); it is
    /// advisory only, enforced by convention at call sites, not by `add`.
    pub fn new(ctx: Context, local_id: impl Into<Arc<str>>, element_interface: Option<&str>) -> Self {
        let component = Component::new_internal(
            ctx,
            local_id,
            PropertyObject::new(),
            true,
            element_interface.map(Arc::from),
        );
        Self(component)
    }

    /// Borrows the underlying tree node, e.g. to `attach` the folder itself
    /// under a parent.
    pub fn as_component(&self) -> &Component {
        &self.0
    }

    pub fn into_component(self) -> Component {
        self.0
    }

    /// Adds `child` under this folder. Rejects a colliding `localId` as a
    /// recoverable no-op (§7: "duplicate-add ... converted to `Ignored`"),
    /// matching `PropertyObject::set_property_value`'s "same value ->
    /// `Ignored`" convention rather than erroring.
    pub fn add(&self, child: Component) -> Result<Outcome> {
        let mut children = self.0 .0.children.write();
        if children.iter().any(|c| c.local_id() == child.local_id()) {
            return Ok(Outcome::Ignored);
        }
        children.push(child.clone());
        drop(children);
        child.attach(&self.0);
        Ok(Outcome::Applied)
    }

    /// Removes a child, looked up either by reference identity or by its
    /// `localId` (§4.5: "`removeItem` accepts either child reference or its
    /// local id"). Detaches the removed subtree bottom-up before returning
    /// it so no packet flow outlives it.
    pub fn remove_item(&self, item: ItemRef<'_>) -> Result<Component> {
        let mut children = self.0 .0.children.write();
        let idx = children.iter().position(|c| match &item {
            ItemRef::Component(target) => Arc::ptr_eq(&c.0, &target.0),
            ItemRef::LocalId(id) => &*c.local_id() == *id,
        });
        match idx {
            Some(idx) => {
                let removed = children.remove(idx);
                drop(children);
                removed.detach();
                Ok(removed)
            }
            None => Err(Error::NotFound(match item {
                ItemRef::Component(c) => c.local_id().to_string(),
                ItemRef::LocalId(id) => id.to_string(),
            })),
        }
    }

    /// Empties every child (§3.6: "`remove` empties child folders"),
    /// detaching each bottom-up first.
    pub fn clear(&self) {
        let removed: Vec<Component> = self.0 .0.children.write().drain(..).collect();
        for child in removed {
            child.detach();
        }
    }

    pub fn get_item(&self, local_id: &str) -> Option<Component> {
        self.0 .0.children.read().iter().find(|c| &*c.local_id() == local_id).cloned()
    }

    pub fn has_item(&self, local_id: &str) -> bool {
        self.get_item(local_id).is_some()
    }

    /// Direct children, insertion order.
    pub fn children(&self) -> Vec<Component> {
        self.0 .0.children.read().clone()
    }

    /// Enumerates matching components under this folder, per `filter`
    /// (§4.5). A non-`Recursive` filter only ever sees direct children; a
    /// `Recursive` filter descends through every child that is itself a
    /// folder (or exposes its own children, e.g. a function block's nested
    /// folders), testing every visited node against the unwrapped filter
    /// and deduplicating by identity in insertion order.
    pub fn items(&self, filter: &SearchFilter) -> Vec<Component> {
        let mut out = Vec::new();
        let mut seen = Vec::new();
        self.collect_items(filter, &mut out, &mut seen);
        out
    }

    fn collect_items(&self, filter: &SearchFilter, out: &mut Vec<Component>, seen: &mut Vec<ComponentId>) {
        let recursive = filter.is_recursive();
        let inner = filter.inner();
        for child in self.0 .0.children.read().iter() {
            if inner.matches(child) {
                let id = child.global_id().map(ComponentId).unwrap_or_else(|| ComponentId(child.local_id()));
                if !seen.contains(&id) {
                    seen.push(id);
                    out.push(child.clone());
                }
            }
            if recursive && child.is_folder() {
                Folder(child.clone()).collect_items(filter, out, seen);
            }
        }
    }
}

/// Lookup key for [`Folder::remove_item`]: either identity or `localId`.
pub enum ItemRef<'a> {
    Component(&'a Component),
    LocalId(&'a str),
}

impl<'a> From<&'a Component> for ItemRef<'a> {
    fn from(c: &'a Component) -> Self {
        ItemRef::Component(c)
    }
}

impl<'a> From<&'a str> for ItemRef<'a> {
    fn from(id: &'a str) -> Self {
        ItemRef::LocalId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn add_rejects_duplicate_local_id_as_ignored() {
        let ctx = ctx();
        let folder = Folder::new(ctx.clone(), "fb", None);
        folder.as_component().set_enabled(true);
        *folder.as_component().0.global_id.write() = Some(Arc::from(""));
        let a = Component::new(ctx.clone(), "ch1");
        let b = Component::new(ctx, "ch1");
        assert_eq!(folder.add(a).unwrap(), Outcome::Applied);
        assert_eq!(folder.add(b).unwrap(), Outcome::Ignored);
        assert_eq!(folder.children().len(), 1);
    }

    #[test]
    fn remove_item_by_local_id_detaches_subtree() {
        let ctx = ctx();
        let folder = Folder::new(ctx.clone(), "fb", None);
        *folder.as_component().0.global_id.write() = Some(Arc::from(""));
        let child = Component::new(ctx, "ch1");
        folder.add(child).unwrap();
        let removed = folder.remove_item(ItemRef::LocalId("ch1")).unwrap();
        assert!(removed.global_id().is_none());
        assert!(folder.get_item("ch1").is_none());
    }

    #[test]
    fn recursive_filter_descends_through_nested_folders() {
        let ctx = ctx();
        let root = Folder::new(ctx.clone(), "root", None);
        *root.as_component().0.global_id.write() = Some(Arc::from(""));
        let mid = Folder::new(ctx.clone(), "mid", None);
        root.add(mid.as_component().clone()).unwrap();
        let leaf = Component::new(ctx, "leaf");
        mid.add(leaf).unwrap();

        let shallow = root.items(&SearchFilter::Any);
        assert_eq!(shallow.len(), 1);

        let deep = root.items(&SearchFilter::Recursive(Box::new(SearchFilter::Any)));
        assert_eq!(deep.len(), 2);
    }
}
