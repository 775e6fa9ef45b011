// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Core-event bus (§4.6): the stable id/payload table every structural or
//! value change in the component tree is reported on.
//!
//! Grounded on `hdds::dds::listener`'s fan-out-to-subscribers shape, but
//! the payload itself is a `ValueDict` (value-kernel, §3.1) rather than a
//! typed Rust enum per event, matching the spec's "typed event stream"
//! described as a parameter dictionary keyed by event id (§4.6 table).
//! Dispatch happens with no lock held by the caller (§5: "event dispatch
//! happens with the mutex released"); this bus itself only takes its own
//! internal lock while iterating subscribers.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::value::{Value, ValueDict};

/// Stable core-event ids (§4.6 table). Numeric value is the wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CoreEventId {
    PropertyValueChanged = 0,
    PropertyObjectUpdateEnd = 10,
    PropertyAdded = 20,
    PropertyRemoved = 30,
    ComponentAdded = 40,
    ComponentRemoved = 50,
    SignalConnected = 60,
    SignalDisconnected = 70,
    DataDescriptorChanged = 80,
    ComponentUpdateEnd = 90,
    AttributeChanged = 100,
    TagsChanged = 110,
    StatusChanged = 120,
    TypeAdded = 130,
    TypeRemoved = 140,
    DeviceDomainChanged = 150,
    ConnectionStatusChanged = 170,
}

impl CoreEventId {
    pub fn wire_id(self) -> u32 {
        self as u32
    }
}

/// One fired core event: the id, the global id of the component that fired
/// it (empty string for bus-wide events like `TypeRemoved`, per §4.4), and
/// its parameter dictionary per the §4.6 table.
#[derive(Debug, Clone)]
pub struct CoreEventArgs {
    pub id: CoreEventId,
    pub sender_global_id: Arc<str>,
    pub params: ValueDict,
}

impl CoreEventArgs {
    pub fn new(id: CoreEventId, sender_global_id: impl Into<Arc<str>>, params: ValueDict) -> Self {
        Self { id, sender_global_id: sender_global_id.into(), params }
    }

    pub fn param(&self, key: &str) -> Option<Value> {
        self.params.get(&Value::from(key))
    }
}

type Listener = Arc<dyn Fn(&CoreEventArgs) + Send + Sync>;

struct Subscription {
    id: u64,
    listener: Listener,
}

/// Context-wide event object (§4.6: "Listeners subscribe via a
/// context-wide event object"). One instance lives in the [`crate::Context`]
/// shared by every component in a tree.
#[derive(Clone, Default)]
pub struct CoreEventBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    next_id: Arc<AtomicU64>,
}

/// Handle returned by [`CoreEventBus::subscribe`]; pass to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl CoreEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&CoreEventArgs) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.write().push(Subscription { id, listener: Arc::new(listener) });
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.write().retain(|s| s.id != id.0);
    }

    /// Fans `args` out to every subscriber. No ordering guarantee between
    /// listeners is promised (§4.6); listeners observe one component's
    /// events in causal order because `trigger` calls are made in that
    /// order by the caller.
    pub fn trigger(&self, args: &CoreEventArgs) {
        // Snapshot under the lock, then call outside it: a listener must be
        // free to subscribe/unsubscribe without deadlocking the bus.
        let snapshot: Vec<Listener> = self.subscriptions.read().iter().map(|s| s.listener.clone()).collect();
        for listener in snapshot {
            listener(args);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscriber_receives_triggered_event() {
        let bus = CoreEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        bus.subscribe(move |args| {
            assert_eq!(args.id, CoreEventId::PropertyValueChanged);
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.trigger(&CoreEventArgs::new(
            CoreEventId::PropertyValueChanged,
            "/dev/ch1",
            ValueDict::new(),
        ));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = CoreEventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let id = bus.subscribe(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(id);
        bus.trigger(&CoreEventArgs::new(CoreEventId::ComponentAdded, "", ValueDict::new()));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_can_subscribe_during_dispatch_without_deadlock() {
        let bus = CoreEventBus::new();
        let bus2 = bus.clone();
        bus.subscribe(move |_| {
            bus2.subscriber_count();
        });
        bus.trigger(&CoreEventArgs::new(CoreEventId::ComponentAdded, "", ValueDict::new()));
    }
}
