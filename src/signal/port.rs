// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Input ports (§3.5, §4.7): the consumer-side endpoint. An `InputPort`
//! wraps a [`Component`] the same way [`crate::component::Folder`] does,
//! adding a weak reference to at most one signal, an owned [`Connection`],
//! a notification mode and a listener.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::component::Component;
use crate::context::Context;
use crate::error::{Error, Outcome, Result};
use crate::events::{CoreEventArgs, CoreEventId};
use crate::signal::connection::Connection;
use crate::signal::{Signal, SignalState};
use crate::value::{Value, ValueDict};

/// Where a port's packet-ready notification is delivered (§3.5, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationMode {
    /// Invoke the listener inline, on the pushing thread.
    #[default]
    SameThread,
    /// Post the listener callback to the owning [`crate::context::Scheduler`].
    Scheduler,
    /// Silence notifications entirely; pure pull (`peek`/`pop` only).
    None,
}

/// Implemented by the owning function block (§3.5: "a listener reference
/// (the owning function block)"). `connected`/`disconnected` fire before
/// any packet flows on the new/old edge (§4.7).
pub trait PortListener: Send + Sync {
    /// Whether this port accepts `signal`. Default accepts everything.
    fn accepts_signal(&self, _port: &InputPort, _signal: &Signal) -> bool {
        true
    }
    fn connected(&self, port: &InputPort);
    fn disconnected(&self, port: &InputPort);
    /// Called when a packet becomes available, dispatched per
    /// [`NotificationMode`] (§5).
    fn packet_ready(&self, port: &InputPort);
}

struct PortState {
    component: Component,
    signal: RwLock<Weak<SignalState>>,
    connection: Connection,
    notification_mode: NotificationMode,
    listener: RwLock<Option<Arc<dyn PortListener>>>,
}

/// Consumer-side endpoint holding at most one signal and one connection
/// (§3.5).
#[derive(Clone)]
pub struct InputPort(pub(crate) Arc<PortState>);

impl InputPort {
    pub fn new(ctx: Context, local_id: impl Into<Arc<str>>, mode: NotificationMode) -> Self {
        Self(Arc::new(PortState {
            component: Component::new(ctx, local_id),
            signal: RwLock::new(Weak::new()),
            connection: Connection::with_default_capacity(),
            notification_mode: mode,
            listener: RwLock::new(None),
        }))
    }

    pub fn as_component(&self) -> &Component {
        &self.0.component
    }

    pub fn connection(&self) -> &Connection {
        &self.0.connection
    }

    pub fn notification_mode(&self) -> NotificationMode {
        self.0.notification_mode
    }

    pub fn set_listener(&self, listener: Arc<dyn PortListener>) {
        *self.0.listener.write() = Some(listener);
    }

    /// The currently-connected signal, resolved from the weak reference
    /// (§9: "re-resolves on every use").
    pub fn signal(&self) -> Option<Signal> {
        self.0.signal.read().upgrade().map(Signal::from_state)
    }

    pub fn is_connected(&self) -> bool {
        self.0.signal.read().strong_count() > 0
    }

    /// Connects `signal` to this port: checks acceptance, registers with
    /// the signal, stores the weak back-reference, then calls
    /// `listener.connected` and fires `SignalConnected` before any packet
    /// flows (§4.7).
    pub fn connect(&self, signal: &Signal) -> Result<Outcome> {
        if self.is_connected() {
            return Err(Error::InvalidState("input port already has a connected signal".to_string()));
        }
        if let Some(listener) = self.0.listener.read().as_ref() {
            if !listener.accepts_signal(self, signal) {
                return Ok(Outcome::Ignored);
            }
        }
        signal.register_port(self.clone());
        *self.0.signal.write() = signal.downgrade();

        if let Some(listener) = self.0.listener.read().clone() {
            listener.connected(self);
        }

        let params = ValueDict::new();
        let _ = params.insert(Value::from("Signal"), Value::Object(signal.global_id_or_local()));
        self.0.component.fire(CoreEventId::SignalConnected, params);
        Ok(Outcome::Applied)
    }

    /// Disconnects the current signal, if any (§4.7: listener notified
    /// before the edge is actually torn down).
    pub fn disconnect(&self) -> Result<Outcome> {
        let Some(signal) = self.signal() else {
            return Ok(Outcome::Ignored);
        };
        if let Some(listener) = self.0.listener.read().clone() {
            listener.disconnected(self);
        }
        signal.unregister_port(self);
        *self.0.signal.write() = Weak::new();
        self.0.component.fire(CoreEventId::SignalDisconnected, ValueDict::new());
        Ok(Outcome::Applied)
    }

    /// Called by the connected signal after enqueuing a packet on this
    /// port's connection; dispatches to the listener per the configured
    /// [`NotificationMode`] (§5).
    pub(crate) fn notify(&self) {
        let Some(listener) = self.0.listener.read().clone() else { return };
        match self.0.notification_mode {
            NotificationMode::SameThread => listener.packet_ready(self),
            NotificationMode::Scheduler => {
                let port = self.clone();
                let listener = listener.clone();
                self.0.component.context().scheduler.post(Box::new(move || listener.packet_ready(&port)));
            }
            NotificationMode::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::packet::Packet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
        ready: AtomicUsize,
    }
    impl CountingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self { connected: AtomicUsize::new(0), disconnected: AtomicUsize::new(0), ready: AtomicUsize::new(0) })
        }
    }
    impl PortListener for CountingListener {
        fn connected(&self, _port: &InputPort) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
        fn disconnected(&self, _port: &InputPort) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
        fn packet_ready(&self, _port: &InputPort) {
            self.ready.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn connect_registers_and_fires_listener_before_packets() {
        let ctx = Context::new();
        let port = InputPort::new(ctx.clone(), "ip0", NotificationMode::SameThread);
        let listener = CountingListener::new();
        port.set_listener(listener.clone());
        let signal = Signal::new(ctx, "sig0");

        port.connect(&signal).unwrap();
        assert_eq!(listener.connected.load(Ordering::SeqCst), 1);
        assert!(port.is_connected());
    }

    #[test]
    fn disconnect_notifies_before_clearing_signal() {
        let ctx = Context::new();
        let port = InputPort::new(ctx.clone(), "ip0", NotificationMode::SameThread);
        let listener = CountingListener::new();
        port.set_listener(listener.clone());
        let signal = Signal::new(ctx, "sig0");
        port.connect(&signal).unwrap();

        port.disconnect().unwrap();
        assert_eq!(listener.disconnected.load(Ordering::SeqCst), 1);
        assert!(!port.is_connected());
    }

    #[test]
    fn same_thread_mode_calls_listener_inline_on_notify() {
        let ctx = Context::new();
        let port = InputPort::new(ctx, "ip0", NotificationMode::SameThread);
        let listener = CountingListener::new();
        port.set_listener(listener.clone());
        port.connection().push(Packet::event(crate::signal::packet::EventPacket::descriptor_changed(None, None)));
        port.notify();
        assert_eq!(listener.ready.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn none_mode_never_calls_listener() {
        let ctx = Context::new();
        let port = InputPort::new(ctx, "ip0", NotificationMode::None);
        let listener = CountingListener::new();
        port.set_listener(listener.clone());
        port.notify();
        assert_eq!(listener.ready.load(Ordering::SeqCst), 0);
    }
}
