// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Stream reader (§4.9): dequeues packets from a single input port until
//! `count` samples have been copied or a timeout expires.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{ReaderOptions, TimeoutPolicy};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::reader::{decode_data_packet, decode_domain_packet, is_implicitly_convertible, ReaderStatus, SampleDecode};
use crate::signal::{DataDescriptor, DataPacket, InputPort, NotificationMode, Packet, PortListener, Signal};

struct Pending {
    packet: Arc<DataPacket>,
    consumed: usize,
}

struct NoopListener;
impl PortListener for NoopListener {
    fn connected(&self, _port: &InputPort) {}
    fn disconnected(&self, _port: &InputPort) {}
    fn packet_ready(&self, _port: &InputPort) {}
}

/// Reads typed samples off one signal, translating the packet stream into
/// `(value, domain)` buffer pairs (§4.9). `T`/`D` are the value/domain
/// output types; `Undefined` per §4.9 ("infer from the first descriptor")
/// is modelled by deferring the convertibility check until the first
/// descriptor actually arrives.
pub struct StreamReader<T: SampleDecode, D: SampleDecode> {
    port: InputPort,
    valid: AtomicBool,
    value_descriptor: Mutex<Option<Arc<DataDescriptor>>>,
    domain_descriptor: Mutex<Option<Arc<DataDescriptor>>>,
    pending_value: Mutex<Option<Pending>>,
    options: ReaderOptions,
    _marker: PhantomData<(T, D)>,
}

impl<T: SampleDecode, D: SampleDecode> StreamReader<T, D> {
    /// Creates a reader with its own input port, connected to `signal`
    /// (§4.9: "each reader owns its input ports").
    pub fn new(ctx: Context, signal: &Signal, options: ReaderOptions) -> Result<Self> {
        let port = InputPort::new(ctx, "StreamReaderPort", NotificationMode::None);
        port.set_listener(Arc::new(NoopListener));
        port.connect(signal)?;
        Ok(Self {
            port,
            valid: AtomicBool::new(true),
            value_descriptor: Mutex::new(None),
            domain_descriptor: Mutex::new(None),
            pending_value: Mutex::new(None),
            options,
            _marker: PhantomData,
        })
    }

    /// Adopts an already-connected port from a reader being rebuilt
    /// (§4.9: "or adopts them from an existing reader when rebuilt").
    pub fn from_port(port: InputPort, options: ReaderOptions) -> Self {
        Self {
            port,
            valid: AtomicBool::new(true),
            value_descriptor: Mutex::new(None),
            domain_descriptor: Mutex::new(None),
            pending_value: Mutex::new(None),
            options,
            _marker: PhantomData,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Invalidates the reader; every subsequent `read` returns `Ignored`
    /// status immediately (§4.9 "Cancellation & errors").
    pub fn mark_as_invalid(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn input_port(&self) -> &InputPort {
        &self.port
    }

    /// Reads up to `value_buf.len()` samples, writing matching domain
    /// samples into `domain_buf` when given (§4.9: "readWithDomain fills
    /// both buffers symmetrically"). Returns the number of samples copied
    /// and the resulting status.
    pub fn read_with_domain(
        &self,
        value_buf: &mut [T],
        domain_buf: Option<&mut [D]>,
        timeout: Duration,
    ) -> Result<(usize, ReaderStatus)> {
        if !self.is_valid() {
            return Ok((0, ReaderStatus::Invalid));
        }
        let deadline = Instant::now() + timeout;
        let mut count = 0usize;
        let remaining_len = value_buf.len();
        let mut domain_buf = domain_buf;

        while count < remaining_len {
            let packet = match self.next_packet(deadline)? {
                Some(p) => p,
                None => return Ok((count, ReaderStatus::Timeout)),
            };
            match packet {
                Packet::Event(event) => {
                    if let Some(status) = self.apply_event(&event)? {
                        return Ok((count, status));
                    }
                }
                Packet::Data(data) => {
                    let available = data.sample_count - self.pending_offset(&data);
                    let take = available.min(remaining_len - count);
                    decode_data_packet(&data, self.pending_offset(&data), take, &mut value_buf[count..count + take])?;
                    if let Some(domain) = &mut domain_buf {
                        if let Some(domain_packet) = &data.domain_packet {
                            decode_domain_packet(domain_packet, self.pending_offset(&data), take, &mut domain[count..count + take])?;
                        } else {
                            decode_domain_packet(&data, self.pending_offset(&data), take, &mut domain[count..count + take])?;
                        }
                    }
                    count += take;
                    let consumed_now = self.pending_offset(&data) + take;
                    if consumed_now < data.sample_count {
                        *self.pending_value.lock() = Some(Pending { packet: data, consumed: consumed_now });
                    } else {
                        *self.pending_value.lock() = None;
                    }
                    if count == remaining_len {
                        return Ok((count, ReaderStatus::Ok));
                    }
                    if self.options.timeout_policy == TimeoutPolicy::Any && count > 0 {
                        return Ok((count, ReaderStatus::Ok));
                    }
                }
            }
        }
        Ok((count, ReaderStatus::Ok))
    }

    /// Convenience form without a domain buffer.
    pub fn read(&self, value_buf: &mut [T], timeout: Duration) -> Result<(usize, ReaderStatus)> {
        self.read_with_domain(value_buf, None, timeout)
    }

    /// Pops and applies any event packets sitting at the head of the
    /// connection, stopping once a data packet (or nothing) is at the
    /// head. Used by [`crate::reader::multi::MultiReader`] so alignment
    /// math only ever looks at data packets (§4.9 "Multi reader").
    pub(crate) fn drain_leading_events(&self) -> Result<()> {
        loop {
            match self.port.connection().peek() {
                Some(Packet::Event(event)) => {
                    self.port.connection().pop();
                    if self.apply_event(&event)?.is_some() {
                        // Event applied; nothing to return to here, the
                        // caller only cares that the head is now data.
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// The domain value of the next unread sample and its linear delta,
    /// if the (possibly linked) domain descriptor uses a linear rule.
    /// `None` means either nothing is queued or the domain isn't linear,
    /// in which case multi-reader alignment cannot proceed for this input.
    pub(crate) fn peek_next_domain_offset(&self) -> Option<(i64, i64)> {
        if let Some(p) = self.pending_value.lock().as_ref() {
            return Self::domain_offset_delta(&p.packet, p.consumed);
        }
        match self.port.connection().peek() {
            Some(Packet::Data(data)) => Self::domain_offset_delta(&data, 0),
            _ => None,
        }
    }

    fn domain_offset_delta(packet: &Arc<DataPacket>, consumed: usize) -> Option<(i64, i64)> {
        let (base_offset, rule) = match &packet.domain_packet {
            Some(domain) => (domain.offset, domain.descriptor.rule.clone()),
            None => (packet.offset, packet.descriptor.rule.clone()),
        };
        match rule {
            crate::signal::DataRule::Linear { delta, .. } => Some((base_offset + consumed as i64 * delta, delta)),
            _ => None,
        }
    }

    /// Drops the first `n` unread samples on this input (§4.9: "drops
    /// samples that precede that value on lagging inputs").
    pub(crate) fn skip_samples(&self, mut n: usize) -> Result<()> {
        while n > 0 {
            self.drain_leading_events()?;
            let head = match self.pending_value.lock().take() {
                Some(p) => p,
                None => match self.port.connection().pop() {
                    Some(Packet::Data(d)) => Pending { packet: d, consumed: 0 },
                    Some(Packet::Event(event)) => {
                        self.apply_event(&event)?;
                        continue;
                    }
                    None => return Ok(()),
                },
            };
            let remaining_in_packet = head.packet.sample_count - head.consumed;
            if remaining_in_packet <= n {
                n -= remaining_in_packet;
            } else {
                *self.pending_value.lock() = Some(Pending { packet: head.packet, consumed: head.consumed + n });
                n = 0;
            }
        }
        Ok(())
    }

    fn pending_offset(&self, packet: &Arc<DataPacket>) -> usize {
        match self.pending_value.lock().as_ref() {
            Some(p) if Arc::ptr_eq(&p.packet, packet) => p.consumed,
            _ => 0,
        }
    }

    fn next_packet(&self, deadline: Instant) -> Result<Option<Packet>> {
        if let Some(pending) = self.pending_value.lock().as_ref() {
            return Ok(Some(Packet::Data(pending.packet.clone())));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        Ok(self.port.connection().wait_pop(remaining))
    }

    /// Applies a `DataDescriptorChanged` event to the reader's cached
    /// descriptors, checking implicit convertibility. Returns `Some(status)`
    /// when the read loop must halt (§4.9: "halts the read").
    fn apply_event(&self, event: &crate::signal::EventPacket) -> Result<Option<ReaderStatus>> {
        let crate::signal::EventPacket::DataDescriptorChanged { value_descriptor, domain_descriptor } = event else {
            return Ok(None);
        };
        if let Some(new_value) = value_descriptor {
            let mut current = self.value_descriptor.lock();
            if let Some(old) = current.as_ref() {
                if !is_implicitly_convertible(old.sample_type, new_value.sample_type) {
                    self.mark_as_invalid();
                    return Err(Error::InvalidState(format!(
                        "descriptor change from {:?} to {:?} is not implicitly convertible",
                        old.sample_type, new_value.sample_type
                    )));
                }
            }
            *current = Some(new_value.clone());
        }
        if let Some(new_domain) = domain_descriptor {
            *self.domain_descriptor.lock() = Some(new_domain.clone());
        }
        Ok(Some(ReaderStatus::DescriptorChanged {
            value_descriptor: value_descriptor.clone(),
            domain_descriptor: domain_descriptor.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{DataDescriptorBuilder, DataRule, SamplePayload, SampleType};

    fn make_signal(ctx: &Context, rule: DataRule) -> Signal {
        let signal = Signal::new(ctx.clone(), "sig");
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(rule).build();
        signal.set_descriptor(d);
        signal
    }

    #[test]
    fn initial_read_surfaces_descriptor_changed_with_zero_count() {
        let ctx = Context::new();
        let signal = make_signal(&ctx, DataRule::Explicit);
        let reader: StreamReader<f64, i64> = StreamReader::new(ctx, &signal, ReaderOptions::default()).unwrap();
        let mut buf = [0.0f64; 10];
        let (count, status) = reader.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(count, 0);
        assert!(matches!(status, ReaderStatus::DescriptorChanged { .. }));
    }

    #[test]
    fn reads_raw_samples_after_descriptor_event() {
        let ctx = Context::new();
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build();
        let signal = Signal::new(ctx.clone(), "sig");
        signal.set_descriptor(d.clone());
        let reader: StreamReader<f64, i64> = StreamReader::new(ctx, &signal, ReaderOptions::default()).unwrap();
        let mut buf = [0.0f64; 4];
        reader.read(&mut buf, Duration::from_millis(10)).unwrap(); // consume initial event

        let mut bytes = Vec::new();
        for v in [1.0f64, 2.0, 3.0, 4.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        signal
            .send_packet(DataPacket::new(d, 4, 0, None, SamplePayload::Raw(Arc::new(bytes))).unwrap())
            .unwrap();

        let (count, status) = reader.read(&mut buf, Duration::from_millis(50)).unwrap();
        assert_eq!(count, 4);
        assert_eq!(status, ReaderStatus::Ok);
        assert_eq!(buf, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn partial_read_stops_at_descriptor_change_mid_packet() {
        let ctx = Context::new();
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build();
        let signal = Signal::new(ctx.clone(), "sig");
        signal.set_descriptor(d.clone());
        let reader: StreamReader<f64, i64> = StreamReader::new(ctx, &signal, ReaderOptions::default()).unwrap();
        let mut drain = [0.0f64; 1];
        reader.read(&mut drain, Duration::from_millis(10)).unwrap();

        let mut bytes = Vec::new();
        for v in [1.0f64, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        signal
            .send_packet(DataPacket::new(d.clone(), 3, 0, None, SamplePayload::Raw(Arc::new(bytes))).unwrap())
            .unwrap();
        let d2 = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).with_name("v2").build();
        signal.set_descriptor(d2);

        let mut buf = [0.0f64; 10];
        let (count, status) = reader.read(&mut buf, Duration::from_millis(50)).unwrap();
        assert_eq!(count, 3);
        assert!(matches!(status, ReaderStatus::DescriptorChanged { .. }));

        let (count2, status2) = reader.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(count2, 0);
        assert_eq!(status2, ReaderStatus::Timeout);
    }

    #[test]
    fn non_convertible_descriptor_change_invalidates_reader() {
        let ctx = Context::new();
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build();
        let signal = Signal::new(ctx.clone(), "sig");
        signal.set_descriptor(d);
        let reader: StreamReader<f64, i64> = StreamReader::new(ctx, &signal, ReaderOptions::default()).unwrap();
        let mut buf = [0.0f64; 1];
        reader.read(&mut buf, Duration::from_millis(10)).unwrap();

        let struct_descriptor = DataDescriptorBuilder::new(SampleType::Struct).build();
        signal.set_descriptor(struct_descriptor);
        let err = reader.read(&mut buf, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(!reader.is_valid());
        let (count, status) = reader.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(count, 0);
        assert_eq!(status, ReaderStatus::Invalid);
    }
}
