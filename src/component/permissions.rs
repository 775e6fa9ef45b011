// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Role-based permission masks and locking-strategy selection (§3.4).
//!
//! Grounded on SUPPLEMENTED FEATURES #5 in `SPEC_FULL.md`: the original
//! openDAQ access-control tests resolve permissions by walking from the
//! request path up to the first component carrying an explicit permission
//! override. [`Permissions::effective`] callers do that walk themselves
//! (see `Component::effective_permission`); this type only holds the
//! per-role mask for a single node.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Allow mask over `{Read, Write, Execute}` for one role (§3.4, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermissionMask {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl PermissionMask {
    pub const NONE: Self = Self { read: false, write: false, execute: false };
    pub const READ: Self = Self { read: true, write: false, execute: false };
    pub const READ_WRITE: Self = Self { read: true, write: true, execute: false };
    pub const ALL: Self = Self { read: true, write: true, execute: true };

    pub fn covers(self, required: PermissionMask) -> bool {
        (!required.read || self.read) && (!required.write || self.write) && (!required.execute || self.execute)
    }
}

/// Per-node role -> mask table. Absent from a node means "inherit from the
/// nearest ancestor that has an entry for this role" (§3.4: "inherits from
/// parent by default").
#[derive(Clone, Default)]
pub struct Permissions {
    roles: std::sync::Arc<RwLock<HashMap<String, PermissionMask>>>,
}

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, role: impl Into<String>, mask: PermissionMask) {
        self.roles.write().insert(role.into(), mask);
    }

    /// The mask explicitly set on this node for `role`, if any. `None`
    /// means "defer to the parent chain", not "deny everything".
    pub fn own(&self, role: &str) -> Option<PermissionMask> {
        self.roles.read().get(role).copied()
    }
}

/// How a component's recursive mutex is resolved at attach time (§3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockingStrategy {
    /// The component owns a recursive mutex of its own.
    #[default]
    OwnLock,
    /// Resolves to the nearest ancestor's effective lock.
    InheritLock,
    /// Owns its own mutex, but descendants that `InheritLock` skip past it
    /// straight to the tree root's lock.
    ForwardOwnerLockOwn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_covers_subset_requirements() {
        assert!(PermissionMask::ALL.covers(PermissionMask::READ_WRITE));
        assert!(!PermissionMask::READ.covers(PermissionMask::READ_WRITE));
    }

    #[test]
    fn own_mask_absent_means_defer() {
        let p = Permissions::new();
        assert_eq!(p.own("guest"), None);
        p.allow("guest", PermissionMask::READ);
        assert_eq!(p.own("guest"), Some(PermissionMask::READ));
    }
}
