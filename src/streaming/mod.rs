// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Streaming-source attachment policy (§4.11, C11).
//!
//! Grounded on `opendaq::StreamingSourceManager`
//! (`streaming_source_manager.h`): a core-event listener that, on every
//! `ComponentAdded`/`ComponentUpdateEnd`, attaches streaming sources to
//! newly visible devices and wires newly visible public signals to them in
//! protocol-priority order. Protocol ids stay opaque `&'static`-style
//! string tags here, matching the original's registered-string-id scheme;
//! no transport protocol (OPC-UA, websocket, ...) is implemented, only the
//! selection policy they'd plug into (see `DESIGN.md`).
//!
//! This module has no way to recover a [`Signal`] or device [`Component`]
//! from a bare tree-walk (the same limitation documented on
//! [`crate::rpc::server::RpcServer`]), so the embedder registers devices
//! and signals explicitly by path; `ComponentAdded`/`ComponentUpdateEnd`
//! only carry the path of the thing that changed (§4.6), which this module
//! matches against its own registries rather than re-deriving interface
//! kind from the live tree.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::config::{PrimaryAddressType, RuntimeConfig, StreamingConnectionHeuristic};
use crate::context::Context;
use crate::error::Result;
use crate::events::{CoreEventArgs, CoreEventId, SubscriptionId};
use crate::signal::Signal;
use crate::value::Value;

/// Transport-bound server capability advertised by a device, the way
/// `DeviceInfo.ServerCapabilities` does in the original (§4.11 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolType {
    Configuration,
    Streaming,
    StreamingAndConfiguration,
}

impl ProtocolType {
    fn is_streaming(self) -> bool {
        matches!(self, ProtocolType::Streaming | ProtocolType::StreamingAndConfiguration)
    }
}

/// One address a capability can be reached at (§4.11 "Primary address type").
#[derive(Debug, Clone, PartialEq)]
pub struct AddressInfo {
    pub address: Arc<str>,
    pub connection_string: Arc<str>,
    pub address_type: PrimaryAddressType,
}

impl AddressInfo {
    pub fn new(address: impl Into<Arc<str>>, connection_string: impl Into<Arc<str>>, address_type: PrimaryAddressType) -> Self {
        Self { address: address.into(), connection_string: connection_string.into(), address_type }
    }
}

/// A single advertised way to reach a device (§4.11 step 2-3).
#[derive(Debug, Clone)]
pub struct ServerCapability {
    pub protocol_id: Arc<str>,
    pub protocol_type: ProtocolType,
    pub connection_string: Arc<str>,
    pub addresses: Vec<AddressInfo>,
}

/// Builds the actual streaming-source implementation for a connection
/// string. The manager never speaks a wire protocol itself — that's left
/// to the embedder, the way `IModuleManagerUtils::createStreaming` defers
/// to a module registry in the original.
pub trait StreamingSourceFactory: Send + Sync {
    fn create(&self, connection_string: &str, protocol_id: &str) -> Result<StreamingSource>;
}

/// A live attachment point packets can flow through for a set of signals
/// (§4.11 step 4-5). Protocol plumbing is out of scope; this just tracks
/// which signals are routed through it and whether it's active.
pub struct StreamingSource {
    connection_string: Arc<str>,
    protocol_id: Arc<str>,
    active: AtomicBool,
    signals: DashMap<Arc<str>, ()>,
}

impl StreamingSource {
    pub fn new(connection_string: impl Into<Arc<str>>, protocol_id: impl Into<Arc<str>>) -> Self {
        Self { connection_string: connection_string.into(), protocol_id: protocol_id.into(), active: AtomicBool::new(false), signals: DashMap::new() }
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn protocol_id(&self) -> &str {
        &self.protocol_id
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Adds a signal, silently ignoring an already-attached one (§4.11:
    /// "does not guarantee that signal will be added, as some signals...
    /// may be silently ignored").
    pub fn add_signal(&self, signal_path: &str) {
        self.signals.insert(Arc::from(signal_path), ());
    }

    pub fn has_signal(&self, signal_path: &str) -> bool {
        self.signals.contains_key(signal_path)
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }
}

fn is_nested(ancestor: &str, descendant: &str) -> bool {
    descendant.len() > ancestor.len() && descendant.starts_with(ancestor) && descendant.as_bytes()[ancestor.len()] == b'/'
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// Picks the capability address to connect to (§4.11 "Primary address
/// type"): prefer one matching both type and the device's own connection
/// host, then any of the right type, then reuse of the connection host
/// regardless of type.
fn find_matching_address(addresses: &[AddressInfo], device_connection: Option<&AddressInfo>, primary_type: PrimaryAddressType) -> Option<AddressInfo> {
    if primary_type != PrimaryAddressType::Any {
        if let Some(dev) = device_connection {
            if dev.address_type == primary_type {
                if let Some(found) = addresses.iter().find(|a| a.address == dev.address) {
                    return Some(found.clone());
                }
            }
        }
        if let Some(found) = addresses.iter().find(|a| a.address_type == primary_type) {
            return Some(found.clone());
        }
        log::warn!("no streaming address of primary type {primary_type:?} available");
    }
    device_connection.and_then(|dev| addresses.iter().find(|a| a.address == dev.address).cloned())
}

/// Listens on the core-event bus and keeps streaming-source attachment in
/// sync with the component tree (§4.11). One manager typically serves one
/// top-level mirrored device.
pub struct StreamingSourceManager {
    ctx: Context,
    config: Arc<RuntimeConfig>,
    factory: Arc<dyn StreamingSourceFactory>,
    devices: DashMap<Arc<str>, ()>,
    capabilities: DashMap<Arc<str>, Vec<ServerCapability>>,
    connection_addresses: DashMap<Arc<str>, AddressInfo>,
    signals: DashMap<Arc<str>, Signal>,
    sources: DashMap<Arc<str>, Arc<StreamingSource>>,
    device_sources: DashMap<Arc<str>, Vec<Arc<str>>>,
    signal_sources: DashMap<Arc<str>, Vec<Arc<str>>>,
    signal_active: DashMap<Arc<str>, Arc<str>>,
    subscription: OnceLock<SubscriptionId>,
}

impl StreamingSourceManager {
    pub fn new(ctx: Context, config: Arc<RuntimeConfig>, factory: Arc<dyn StreamingSourceFactory>) -> Arc<Self> {
        let manager = Arc::new(Self {
            ctx: ctx.clone(),
            config,
            factory,
            devices: DashMap::new(),
            capabilities: DashMap::new(),
            connection_addresses: DashMap::new(),
            signals: DashMap::new(),
            sources: DashMap::new(),
            device_sources: DashMap::new(),
            signal_sources: DashMap::new(),
            signal_active: DashMap::new(),
            subscription: OnceLock::new(),
        });
        let weak = Arc::downgrade(&manager);
        let id = ctx.events.subscribe(move |event| {
            if let Some(manager) = weak.upgrade() {
                manager.on_core_event(event);
            }
        });
        let _ = manager.subscription.set(id);
        manager
    }

    /// Registers a device eligible to carry streaming sources, with its
    /// advertised server capabilities (§4.11 step 2).
    pub fn register_device(&self, path: impl Into<Arc<str>>, capabilities: Vec<ServerCapability>) {
        let path = path.into();
        self.devices.insert(path.clone(), ());
        self.capabilities.insert(path, capabilities);
    }

    pub fn unregister_device(&self, path: &str) {
        self.devices.remove(path);
        self.capabilities.remove(path);
        self.connection_addresses.remove(path);
        self.device_sources.remove(path);
    }

    /// Records the address already used to configure/connect to the
    /// device, reused for streaming when compatible (§4.11 "reuse the
    /// address of device connection").
    pub fn register_connection_address(&self, path: impl Into<Arc<str>>, address: AddressInfo) {
        self.connection_addresses.insert(path.into(), address);
    }

    pub fn register_signal(&self, path: impl Into<Arc<str>>, signal: Signal) {
        self.signals.insert(path.into(), signal);
    }

    pub fn unregister_signal(&self, path: &str) {
        self.signals.remove(path);
        self.signal_sources.remove(path);
        self.signal_active.remove(path);
    }

    pub fn active_streaming_source(&self, signal_path: &str) -> Option<Arc<str>> {
        self.signal_active.get(signal_path).map(|e| e.value().clone())
    }

    pub fn streaming_sources_for_signal(&self, signal_path: &str) -> Vec<Arc<str>> {
        self.signal_sources.get(signal_path).map(|e| e.value().clone()).unwrap_or_default()
    }

    pub fn streaming_sources_for_device(&self, device_path: &str) -> Vec<Arc<str>> {
        self.device_sources.get(device_path).map(|e| e.value().clone()).unwrap_or_default()
    }

    fn on_core_event(&self, event: &CoreEventArgs) {
        match event.id {
            CoreEventId::ComponentAdded => self.on_component_added(event),
            CoreEventId::ComponentUpdateEnd => self.on_component_update_end(event),
            _ => {}
        }
    }

    /// §4.11 algorithm steps 1-5, fired on `ComponentAdded`.
    fn on_component_added(&self, event: &CoreEventArgs) {
        let Some(Value::Object(added_path)) = event.param("Component") else { return };

        let mut devices_in_subtree: Vec<Arc<str>> =
            self.devices.iter().filter(|e| *e.key() == added_path || is_nested(&added_path, e.key())).map(|e| e.key().clone()).collect();

        if devices_in_subtree.is_empty() {
            self.enable_streaming_for_subtree(&added_path);
            return;
        }

        devices_in_subtree.sort_by_key(|p| depth(p));
        let top_device = devices_in_subtree[0].clone();

        if self.config.streaming_heuristic == StreamingConnectionHeuristic::MinHops {
            let mut bottom_up = devices_in_subtree;
            bottom_up.sort_by_key(|p| std::cmp::Reverse(depth(p)));
            for device in &bottom_up {
                self.attach_streamings_to_device(device);
            }
            for device in &bottom_up {
                self.enable_streaming_for_device(device);
            }
        } else {
            self.attach_streamings_to_device(&top_device);
            self.enable_streaming_for_device(&top_device);
        }
    }

    /// §4.11 step 5 replay on property/structural updates underneath an
    /// existing device, for signals that still have no streaming source.
    fn on_component_update_end(&self, event: &CoreEventArgs) {
        let updated_path = &event.sender_global_id;

        if self.devices.contains_key(updated_path.as_ref()) {
            self.attach_streamings_to_device(updated_path);
            self.enable_streaming_for_device(updated_path);
            return;
        }

        self.enable_streaming_for_subtree(updated_path);
    }

    fn enable_streaming_for_subtree(&self, subtree_root: &str) {
        let Some(device_path) = self.nearest_ancestor_device(subtree_root) else { return };
        let sources = self.collect_sources_for_device(&device_path);
        if sources.is_empty() {
            return;
        }

        let orphan_signals: Vec<Arc<str>> = self
            .signals
            .iter()
            .filter(|e| (e.key().as_ref() == subtree_root || is_nested(subtree_root, e.key())) && !self.signal_sources.contains_key(e.key()))
            .map(|e| e.key().clone())
            .collect();

        // Domain signals (those that don't themselves reference a domain
        // signal) are wired up first, matching the original's ordering.
        let (domain_signals, value_signals): (Vec<_>, Vec<_>) = orphan_signals
            .into_iter()
            .partition(|path| self.signals.get(path).map(|s| s.domain_signal().is_none()).unwrap_or(false));

        for path in domain_signals.iter().chain(value_signals.iter()) {
            self.setup_streaming_for_signal(path, &sources);
        }
    }

    fn nearest_ancestor_device(&self, path: &str) -> Option<Arc<str>> {
        self.devices
            .iter()
            .filter(|e| e.key().as_ref() == path || is_nested(e.key(), path))
            .map(|e| e.key().clone())
            .max_by_key(|p| depth(p.as_ref()))
    }

    /// Streaming sources visible to `device_path`: its own, plus (under
    /// `MinHops`) every registered strict ancestor device's, closest first
    /// (§4.11 "the sources of the closest ancestor device will be first").
    fn collect_sources_for_device(&self, device_path: &str) -> Vec<Arc<str>> {
        let mut chain = vec![Arc::from(device_path)];
        if self.config.streaming_heuristic == StreamingConnectionHeuristic::MinHops {
            let mut ancestors: Vec<Arc<str>> = self.devices.iter().filter(|e| is_nested(e.key(), device_path)).map(|e| e.key().clone()).collect();
            ancestors.sort_by_key(|p| std::cmp::Reverse(depth(p)));
            chain.extend(ancestors);
        }
        let mut sources = Vec::new();
        for device in &chain {
            if let Some(conns) = self.device_sources.get(device.as_ref()) {
                sources.extend(conns.value().iter().cloned());
            }
        }
        sources
    }

    fn enable_streaming_for_device(&self, device_path: &str) {
        let sources = self.collect_sources_for_device(device_path);
        if sources.is_empty() {
            return;
        }
        let nested_signals: Vec<Arc<str>> =
            self.signals.iter().filter(|e| e.key().as_ref() == device_path || is_nested(device_path, e.key())).map(|e| e.key().clone()).collect();
        for path in nested_signals {
            self.setup_streaming_for_signal(&path, &sources);
        }
    }

    fn setup_streaming_for_signal(&self, signal_path: &str, sources: &[Arc<str>]) {
        let Some(signal) = self.signals.get(signal_path).map(|e| e.value().clone()) else { return };
        if !signal.public() {
            return;
        }

        let mut attached = self.signal_sources.entry(Arc::from(signal_path)).or_default();
        for conn in sources {
            if attached.contains(conn) {
                continue;
            }
            if let Some(source) = self.sources.get(conn.as_ref()) {
                source.add_signal(signal_path);
                attached.push(conn.clone());
                log::debug!("signal '{signal_path}' added to streaming '{conn}'");
            }
        }
        drop(attached);

        if !self.signal_active.contains_key(signal_path) {
            if let Some(conn) = sources.first() {
                self.signal_active.insert(Arc::from(signal_path), conn.clone());
                log::debug!("set active streaming source '{conn}' for signal '{signal_path}'");
            }
        }
    }

    /// §4.11 step 2-4: enumerate, filter and connect `device_path`'s
    /// advertised streaming capabilities, skipping ones already attached.
    fn attach_streamings_to_device(&self, device_path: &str) {
        let Some(capabilities) = self.capabilities.get(device_path).map(|e| e.value().clone()) else { return };
        let device_address = self.connection_addresses.get(device_path).map(|e| e.value().clone());
        let existing = self.device_sources.get(device_path).map(|e| e.value().clone()).unwrap_or_default();

        let mut prioritized: BTreeMap<usize, Arc<str>> = BTreeMap::new();
        for cap in &capabilities {
            if !cap.protocol_type.is_streaming() {
                continue;
            }
            if !self.config.is_protocol_allowed(&cap.protocol_id) {
                continue;
            }
            let Some(priority) = self.config.protocol_rank(&cap.protocol_id) else { continue };

            let address = find_matching_address(&cap.addresses, device_address.as_ref(), self.config.primary_address_type);
            let connection_string = address.map(|a| a.connection_string).unwrap_or_else(|| cap.connection_string.clone());
            if existing.contains(&connection_string) {
                continue;
            }

            match self.factory.create(&connection_string, &cap.protocol_id) {
                Ok(source) => {
                    self.sources.insert(connection_string.clone(), Arc::new(source));
                    prioritized.insert(priority, connection_string);
                }
                Err(e) => log::warn!("failed to create streaming source '{connection_string}': {e}"),
            }
        }

        if prioritized.is_empty() {
            return;
        }
        let mut entry = self.device_sources.entry(Arc::from(device_path)).or_default();
        for (_, connection_string) in prioritized {
            if let Some(source) = self.sources.get(connection_string.as_ref()) {
                source.set_active(true);
            }
            log::info!("device '{device_path}' added new streaming connection '{connection_string}'");
            entry.push(connection_string);
        }
    }
}

impl Drop for StreamingSourceManager {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.get() {
            self.ctx.events.unsubscribe(*id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::value::ValueDict;

    struct StubFactory;
    impl StreamingSourceFactory for StubFactory {
        fn create(&self, connection_string: &str, protocol_id: &str) -> Result<StreamingSource> {
            Ok(StreamingSource::new(connection_string, protocol_id))
        }
    }

    fn capability(protocol_id: &str, connection_string: &str) -> ServerCapability {
        ServerCapability {
            protocol_id: Arc::from(protocol_id),
            protocol_type: ProtocolType::Streaming,
            connection_string: Arc::from(connection_string),
            addresses: vec![],
        }
    }

    fn fire_component_added(ctx: &Context, path: &str) {
        let params = ValueDict::new();
        params.insert(Value::from("Component"), Value::Object(Arc::from(path))).unwrap();
        ctx.events.trigger(&CoreEventArgs::new(CoreEventId::ComponentAdded, path, params));
    }

    #[test]
    fn attaches_allowed_protocol_and_sets_it_active_on_signal() {
        let ctx = Context::new();
        let config = Arc::new(RuntimeConfig::new());
        config.set_protocol_priority(vec![Arc::from("native")]);
        let manager = StreamingSourceManager::new(ctx.clone(), config, Arc::new(StubFactory));

        manager.register_device("/dev", vec![capability("native", "native://dev")]);
        let signal = Signal::new(ctx.clone(), "sig");
        signal.set_public(true);
        manager.register_signal("/dev/sig", signal);

        fire_component_added(&ctx, "/dev");

        assert_eq!(manager.streaming_sources_for_device("/dev"), vec![Arc::<str>::from("native://dev")]);
        assert_eq!(manager.active_streaming_source("/dev/sig"), Some(Arc::from("native://dev")));
    }

    #[test]
    fn disallowed_protocol_is_skipped() {
        let ctx = Context::new();
        let config = Arc::new(RuntimeConfig::new());
        config.allow_protocol("native");
        config.set_protocol_priority(vec![Arc::from("opcua"), Arc::from("native")]);
        let manager = StreamingSourceManager::new(ctx.clone(), config, Arc::new(StubFactory));
        manager.register_device("/dev", vec![capability("opcua", "opc.tcp://dev")]);

        fire_component_added(&ctx, "/dev");

        assert!(manager.streaming_sources_for_device("/dev").is_empty());
    }

    #[test]
    fn private_signal_is_not_attached() {
        let ctx = Context::new();
        let config = Arc::new(RuntimeConfig::new());
        config.set_protocol_priority(vec![Arc::from("native")]);
        let manager = StreamingSourceManager::new(ctx.clone(), config, Arc::new(StubFactory));
        manager.register_device("/dev", vec![capability("native", "native://dev")]);
        let signal = Signal::new(ctx.clone(), "sig");
        signal.set_public(false);
        manager.register_signal("/dev/sig", signal);

        fire_component_added(&ctx, "/dev");

        assert!(manager.streaming_sources_for_signal("/dev/sig").is_empty());
    }

    #[test]
    fn unrelated_component_added_event_is_ignored() {
        let ctx = Context::new();
        let config = Arc::new(RuntimeConfig::new());
        let manager = StreamingSourceManager::new(ctx.clone(), config, Arc::new(StubFactory));
        let _root = Component::new(ctx.clone(), "other");

        fire_component_added(&ctx, "/other");

        assert!(manager.streaming_sources_for_device("/dev").is_empty());
    }
}
