// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Per-client session state (§4.10): negotiated version, authenticated
//! role, and the set of signals the client has subscribed packets for.
//!
//! Grounded on `hdds-xrce::session::{ClientSession, SessionTable}`: same
//! shape (an allocator handing out ids, a map keyed by that id), simplified
//! from XRCE's reliable-stream bookkeeping since this transport is a single
//! ordered byte stream per client rather than multiple best-effort/reliable
//! radio streams.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// One connected RPC client (§4.10 "Connection setup").
pub struct RpcSession {
    pub session_id: u64,
    pub role: Arc<str>,
    pub protocol_version: u32,
    pub view_only: bool,
    subscriptions: RwLock<HashSet<Arc<str>>>,
}

impl RpcSession {
    fn new(session_id: u64, role: Arc<str>, protocol_version: u32, view_only: bool) -> Self {
        Self { session_id, role, protocol_version, view_only, subscriptions: RwLock::new(HashSet::new()) }
    }

    pub fn subscribe(&self, signal_id: impl Into<Arc<str>>) {
        self.subscriptions.write().insert(signal_id.into());
    }

    pub fn unsubscribe(&self, signal_id: &str) {
        self.subscriptions.write().remove(signal_id);
    }

    pub fn is_subscribed(&self, signal_id: &str) -> bool {
        self.subscriptions.read().contains(signal_id)
    }
}

/// Allocates and tracks [`RpcSession`]s, mirroring
/// `hdds_xrce::SessionTable`'s allocate/evict shape over a `u64` id space
/// instead of XRCE's 1-byte session id.
pub struct SessionTable {
    sessions: DashMap<u64, Arc<RpcSession>>,
    max_clients: usize,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new(max_clients: usize) -> Self {
        Self { sessions: DashMap::new(), max_clients, next_id: AtomicU64::new(1) }
    }

    pub fn create(&self, role: Arc<str>, protocol_version: u32, view_only: bool) -> Result<Arc<RpcSession>> {
        if self.sessions.len() >= self.max_clients {
            return Err(Error::NoMemory);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(RpcSession::new(id, role, protocol_version, view_only));
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    pub fn get(&self, session_id: u64) -> Option<Arc<RpcSession>> {
        self.sessions.get(&session_id).map(|e| e.value().clone())
    }

    pub fn remove(&self, session_id: u64) {
        self.sessions.remove(&session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Every live session, for notification fan-out.
    pub fn all(&self) -> Vec<Arc<RpcSession>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_full_is_reported() {
        let table = SessionTable::new(1);
        table.create(Arc::from("guest"), 1, false).unwrap();
        assert!(matches!(table.create(Arc::from("guest"), 1, false), Err(Error::NoMemory)));
    }

    #[test]
    fn subscription_set_tracks_signals() {
        let table = SessionTable::new(4);
        let session = table.create(Arc::from("guest"), 1, false).unwrap();
        session.subscribe("sig1");
        assert!(session.is_subscribed("sig1"));
        session.unsubscribe("sig1");
        assert!(!session.is_subscribed("sig1"));
    }
}
