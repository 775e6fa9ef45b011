// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Packet reader (§4.9): returns packets as-is, untyped and undecoded;
//! used by re-publishers that forward a signal's packet stream verbatim
//! rather than converting it to typed sample arrays.

use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::Result;
use crate::signal::{InputPort, NotificationMode, Packet, PortListener, Signal};

struct NoopListener;
impl PortListener for NoopListener {
    fn connected(&self, _port: &InputPort) {}
    fn disconnected(&self, _port: &InputPort) {}
    fn packet_ready(&self, _port: &InputPort) {}
}

/// Owns an input port and hands packets back untouched (§4.9 "Packet
/// reader"). No type conversion, no descriptor-convertibility checks —
/// those only apply once something decodes sample bytes.
pub struct PacketReader {
    port: InputPort,
}

impl PacketReader {
    pub fn new(ctx: Context, signal: &Signal) -> Result<Self> {
        let port = InputPort::new(ctx, "PacketReaderPort", NotificationMode::None);
        port.set_listener(Arc::new(NoopListener));
        port.connect(signal)?;
        Ok(Self { port })
    }

    pub fn input_port(&self) -> &InputPort {
        &self.port
    }

    /// Non-blocking pop of the next queued packet.
    pub fn read_packet(&self) -> Option<Packet> {
        self.port.connection().pop()
    }

    /// Blocks up to `timeout` for the next packet.
    pub fn read_packet_wait(&self, timeout: Duration) -> Option<Packet> {
        self.port.connection().wait_pop(timeout)
    }

    pub fn available_count(&self) -> usize {
        self.port.connection().available_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{DataDescriptorBuilder, SampleType};

    #[test]
    fn first_packet_seen_is_descriptor_event() {
        let ctx = Context::new();
        let signal = Signal::new(ctx.clone(), "sig");
        let d = DataDescriptorBuilder::new(SampleType::Float64).build();
        signal.set_descriptor(d);
        let reader = PacketReader::new(ctx, &signal).unwrap();
        let packet = reader.read_packet().unwrap();
        assert!(packet.as_event().unwrap().is_descriptor_changed());
    }
}
