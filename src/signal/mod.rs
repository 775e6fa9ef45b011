// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Signal graph (§3.5, §4.7): signals, data descriptors, packets,
//! connections and input ports. A [`Signal`] is, like
//! [`crate::component::Folder`], a thin wrapper over [`Component`] that
//! adds the packet-producer side of the pipeline: a current descriptor, an
//! optional domain signal, and the set of input ports currently
//! subscribed to it.

mod connection;
mod descriptor;
mod packet;
mod port;

pub use connection::Connection;
pub use descriptor::{DataDescriptor, DataDescriptorBuilder, DataRule, PostScaling, SampleType};
pub use packet::{DataPacket, EventPacket, Packet, SamplePayload};
pub use port::{InputPort, NotificationMode, PortListener};

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::component::Component;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::CoreEventId;
use crate::value::{Value, ValueDict};

pub(crate) struct SignalState {
    component: Component,
    descriptor: RwLock<Option<Arc<DataDescriptor>>>,
    domain_signal: RwLock<Option<Signal>>,
    public: std::sync::atomic::AtomicBool,
    ports: RwLock<Vec<InputPort>>,
}

/// A component producing a lazy, ordered sequence of packets (§3.5).
#[derive(Clone)]
pub struct Signal(pub(crate) Arc<SignalState>);

impl Signal {
    pub fn new(ctx: Context, local_id: impl Into<Arc<str>>) -> Self {
        Self(Arc::new(SignalState {
            component: Component::new(ctx, local_id),
            descriptor: RwLock::new(None),
            domain_signal: RwLock::new(None),
            public: std::sync::atomic::AtomicBool::new(true),
            ports: RwLock::new(Vec::new()),
        }))
    }

    pub(crate) fn from_state(state: Arc<SignalState>) -> Self {
        Self(state)
    }

    pub(crate) fn downgrade(&self) -> Weak<SignalState> {
        Arc::downgrade(&self.0)
    }

    pub fn as_component(&self) -> &Component {
        &self.0.component
    }

    pub fn global_id_or_local(&self) -> Arc<str> {
        self.0.component.global_id().unwrap_or_else(|| self.0.component.local_id())
    }

    pub fn public(&self) -> bool {
        self.0.public.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn set_public(&self, public: bool) {
        self.0.public.store(public, std::sync::atomic::Ordering::Release);
    }

    pub fn descriptor(&self) -> Option<Arc<DataDescriptor>> {
        self.0.descriptor.read().clone()
    }

    pub fn domain_signal(&self) -> Option<Signal> {
        self.0.domain_signal.read().clone()
    }

    pub fn set_domain_signal(&self, domain: Option<Signal>) {
        *self.0.domain_signal.write() = domain;
    }

    /// True iff any input port currently holds this signal (§3.6:
    /// "streaming sources track this to start/stop remote subscriptions").
    pub fn is_subscribed(&self) -> bool {
        !self.0.ports.read().is_empty()
    }

    pub fn connected_port_count(&self) -> usize {
        self.0.ports.read().len()
    }

    /// Sets (or changes) the descriptor, broadcasting a
    /// `DataDescriptorChanged` event packet to every subscribed port before
    /// the next data packet, and firing the core event of the same name
    /// (§4.6, §4.7: "the first packet after any descriptor change is an
    /// `EventPacket`").
    pub fn set_descriptor(&self, descriptor: Arc<DataDescriptor>) {
        *self.0.descriptor.write() = Some(descriptor.clone());
        let domain_descriptor = self.domain_signal().and_then(|d| d.descriptor());
        self.broadcast_event(EventPacket::descriptor_changed(Some(descriptor.clone()), domain_descriptor));

        let params = ValueDict::new();
        let _ = params.insert(Value::from("DataDescriptor"), descriptor.to_value());
        self.0.component.fire(CoreEventId::DataDescriptorChanged, params);
    }

    fn broadcast_event(&self, event: EventPacket) {
        let event = Arc::new(event);
        for port in self.0.ports.read().iter() {
            port.connection().push(Packet::Event(event.clone()));
            port.notify();
        }
    }

    /// Publishes a data packet to every connected port's connection
    /// (§3.6, §4.7). Rejects packets whose descriptor doesn't match the
    /// signal's current one, and enforces the §3.2 invariant that a
    /// non-domain signal's data packets link a domain packet.
    pub fn send_packet(&self, packet: DataPacket) -> Result<()> {
        let current = self.descriptor().ok_or_else(|| {
            Error::InvalidState("cannot send a data packet before a descriptor is set".to_string())
        })?;
        if !Arc::ptr_eq(&current, &packet.descriptor) && *current != *packet.descriptor {
            return Err(Error::InvalidValue("packet descriptor does not match signal's current descriptor".to_string()));
        }
        if self.domain_signal().is_some() && packet.domain_packet.is_none() {
            return Err(Error::InvalidValue(
                "non-domain signal's data packet must link a domain packet".to_string(),
            ));
        }
        let packet = Arc::new(packet);
        for port in self.0.ports.read().iter() {
            port.connection().push(Packet::Data(packet.clone()));
            port.notify();
        }
        Ok(())
    }

    /// Registers `port` as a subscriber and immediately enqueues an
    /// event packet describing the current descriptor, so the first
    /// packet a new consumer ever sees is that event (§4.7).
    pub(crate) fn register_port(&self, port: InputPort) {
        if let Some(descriptor) = self.descriptor() {
            let domain_descriptor = self.domain_signal().and_then(|d| d.descriptor());
            port.connection().push(Packet::event(EventPacket::descriptor_changed(Some(descriptor), domain_descriptor)));
        }
        self.0.ports.write().push(port);
    }

    pub(crate) fn unregister_port(&self, port: &InputPort) {
        self.0.ports.write().retain(|p| !Arc::ptr_eq(&p.0, &port.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn new_port_sees_current_descriptor_as_first_packet() {
        let ctx = ctx();
        let signal = Signal::new(ctx.clone(), "sig");
        let d = DataDescriptorBuilder::new(SampleType::Float64).build();
        signal.set_descriptor(d);

        let port = InputPort::new(ctx, "ip0", NotificationMode::None);
        port.connect(&signal).unwrap();
        let first = port.connection().pop().unwrap();
        assert!(first.as_event().unwrap().is_descriptor_changed());
    }

    #[test]
    fn send_packet_fans_out_to_every_connected_port() {
        let ctx = ctx();
        let signal = Signal::new(ctx.clone(), "sig");
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build();
        signal.set_descriptor(d.clone());

        let p1 = InputPort::new(ctx.clone(), "ip0", NotificationMode::None);
        let p2 = InputPort::new(ctx, "ip1", NotificationMode::None);
        p1.connect(&signal).unwrap();
        p2.connect(&signal).unwrap();
        p1.connection().pop(); // drain the initial descriptor event
        p2.connection().pop();

        signal.send_packet(DataPacket::new(d, 10, 0, None, SamplePayload::Null).unwrap()).unwrap();
        assert_eq!(p1.connection().available_samples(), 10);
        assert_eq!(p2.connection().available_samples(), 10);
    }

    #[test]
    fn send_packet_without_domain_link_rejected_when_domain_signal_set() {
        let ctx = ctx();
        let domain = Signal::new(ctx.clone(), "time");
        let signal = Signal::new(ctx, "sig");
        signal.set_domain_signal(Some(domain));
        let d = DataDescriptorBuilder::new(SampleType::Float64).build();
        signal.set_descriptor(d.clone());

        let err = signal.send_packet(DataPacket::new(d, 10, 0, None, SamplePayload::Null).unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
    }

    #[test]
    fn descriptor_change_is_subscribed_before_next_data_packet() {
        let ctx = ctx();
        let signal = Signal::new(ctx.clone(), "sig");
        let d1 = DataDescriptorBuilder::new(SampleType::Int32).build();
        signal.set_descriptor(d1);

        let port = InputPort::new(ctx, "ip0", NotificationMode::None);
        port.connect(&signal).unwrap();
        port.connection().pop(); // initial descriptor event

        let d2 = DataDescriptorBuilder::new(SampleType::Float64).build();
        signal.set_descriptor(d2);
        let event = port.connection().pop().unwrap();
        assert!(event.as_event().unwrap().is_descriptor_changed());
    }
}
