// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Global configuration — single source of truth for tunables.
//!
//! Two levels, the way `hdds::config` splits RTPS constants from its
//! `RuntimeConfig`:
//!
//! - **Level 1 (static)**: compile-time defaults (connection bound, reader
//!   history size).
//! - **Level 2 (dynamic)**: [`RuntimeConfig`] for the §6.4 enumerated
//!   settings, readable/writable at runtime without a restart.

use dashmap::DashMap;
use std::sync::Arc;

/// Default bound on a connection's queued packets (§4.7: "implementation
/// choice", but observability and blocking-until-timeout are mandatory).
pub const DEFAULT_CONNECTION_DEPTH: usize = 1024;

/// Default tail-reader history size in samples.
pub const DEFAULT_TAIL_HISTORY: usize = 1000;

/// Default multi-reader read timeout, in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// `General.StreamingConnectionHeuristic` (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingConnectionHeuristic {
    /// Attach at the top device only.
    #[default]
    Default = 0,
    /// Attach to the closest upstream streaming source in the device tree.
    MinHops = 1,
}

/// `General.PrimaryAddressType` (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryAddressType {
    /// No preference.
    #[default]
    Any,
    /// Prefer IPv4 endpoints.
    IPv4,
    /// Prefer IPv6 endpoints.
    IPv6,
}

/// Timeout policy shared by reader options (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Block up to the timeout while samples remain to be read.
    #[default]
    All,
    /// Return as soon as at least one sample is available.
    Any,
}

/// Per-reader-type options (block size, history size, timeout policy, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
    /// Block reader: fixed block size. Ignored by other reader kinds.
    pub block_size: usize,
    /// Tail reader: retained sample history.
    pub history_size: usize,
    pub timeout_policy: TimeoutPolicy,
    /// Multi-reader: require all inputs to share one linear sample rate.
    pub require_common_rate: bool,
    /// Multi-reader: round the alignment start up to a full domain tick unit.
    pub start_on_full_unit_of_domain: bool,
    /// Multi-reader: tick denominator used by `start_on_full_unit_of_domain`.
    pub domain_tick_denominator: i64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            block_size: 1,
            history_size: DEFAULT_TAIL_HISTORY,
            timeout_policy: TimeoutPolicy::default(),
            require_common_rate: false,
            start_on_full_unit_of_domain: false,
            domain_tick_denominator: 1,
        }
    }
}

/// Runtime-mutable configuration store.
///
/// Backed by a `DashMap` for the free-form streaming-protocol allow/priority
/// lists (lock-free reads), mirroring `hdds::config::RuntimeConfig`'s use of
/// `DashMap` for its QoS store.
pub struct RuntimeConfig {
    pub streaming_heuristic: StreamingConnectionHeuristic,
    pub primary_address_type: PrimaryAddressType,
    allowed_protocols: DashMap<Arc<str>, ()>,
    protocol_priority: parking_lot::RwLock<Vec<Arc<str>>>,
    pub reader_defaults: ReaderOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            streaming_heuristic: StreamingConnectionHeuristic::default(),
            primary_address_type: PrimaryAddressType::default(),
            allowed_protocols: DashMap::new(),
            protocol_priority: parking_lot::RwLock::new(Vec::new()),
            reader_defaults: ReaderOptions::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow-list a streaming protocol id. An empty allow-list means "all".
    pub fn allow_protocol(&self, id: impl Into<Arc<str>>) {
        self.allowed_protocols.insert(id.into(), ());
    }

    /// True if the protocol id is allowed (empty allow-list ⇒ always true).
    pub fn is_protocol_allowed(&self, id: &str) -> bool {
        self.allowed_protocols.is_empty() || self.allowed_protocols.contains_key(id)
    }

    /// Set the full protocol priority order, lower index = higher priority.
    pub fn set_protocol_priority(&self, ids: Vec<Arc<str>>) {
        *self.protocol_priority.write() = ids;
    }

    /// Priority rank of a protocol id (lower = preferred); `None` = unranked.
    pub fn protocol_rank(&self, id: &str) -> Option<usize> {
        self.protocol_priority.read().iter().position(|p| &**p == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_allows_everything() {
        let cfg = RuntimeConfig::new();
        assert!(cfg.is_protocol_allowed("tcp"));
    }

    #[test]
    fn non_empty_allow_list_restricts() {
        let cfg = RuntimeConfig::new();
        cfg.allow_protocol("tcp");
        assert!(cfg.is_protocol_allowed("tcp"));
        assert!(!cfg.is_protocol_allowed("quic"));
    }

    #[test]
    fn priority_rank_orders_lower_first() {
        let cfg = RuntimeConfig::new();
        cfg.set_protocol_priority(vec![Arc::from("tcp"), Arc::from("shm")]);
        assert_eq!(cfg.protocol_rank("tcp"), Some(0));
        assert_eq!(cfg.protocol_rank("shm"), Some(1));
        assert_eq!(cfg.protocol_rank("quic"), None);
    }
}
