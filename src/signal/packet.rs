// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Packets (§3.2, §4.7): the payload carriers flowing along signal ->
//! connection -> input port edges. A [`DataPacket`] carries samples; an
//! [`EventPacket`] carries a metadata change, chiefly a descriptor change
//! that every consumer must process before the next data packet.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::signal::descriptor::{DataDescriptor, DataRule};
use crate::value::ValueDict;

/// How a [`DataPacket`]'s samples are actually carried (§3.2).
#[derive(Debug, Clone)]
pub enum SamplePayload {
    /// Raw contiguous bytes, laid out per the descriptor's
    /// `raw_sample_size` and dimensions.
    Raw(Arc<Vec<u8>>),
    /// A constant-rule start value plus sparse `(position, new value)`
    /// overrides (§3.2: "a constant-rule start value plus a list of
    /// `(position, new-value)` overrides").
    Constant { start: crate::value::Value, overrides: Vec<(usize, crate::value::Value)> },
    /// No payload (e.g. a domain packet with an implicit linear rule needs
    /// no carried bytes at all).
    Null,
}

/// A batch of samples conforming to a [`DataDescriptor`], optionally linked
/// to a domain packet supplying timestamps/ticks (§3.2).
#[derive(Debug, Clone)]
pub struct DataPacket {
    pub descriptor: Arc<DataDescriptor>,
    pub sample_count: usize,
    /// First-sample domain value; used by implicit linear rules to compute
    /// subsequent samples and to detect gaps (§3.2, §4.7).
    pub offset: i64,
    /// The domain packet supplying this packet's timestamps/ticks. `None`
    /// only for a domain signal's own packets (§3.2 invariant).
    pub domain_packet: Option<Arc<DataPacket>>,
    pub payload: SamplePayload,
}

impl DataPacket {
    /// Builds a packet, checking the §3.2 invariant that sample count
    /// agrees between this packet and any linked domain packet.
    pub fn new(
        descriptor: Arc<DataDescriptor>,
        sample_count: usize,
        offset: i64,
        domain_packet: Option<Arc<DataPacket>>,
        payload: SamplePayload,
    ) -> Result<Self> {
        if let Some(domain) = &domain_packet {
            if domain.sample_count != sample_count {
                return Err(Error::InvalidValue(format!(
                    "data packet sample count {sample_count} disagrees with domain packet sample count {}",
                    domain.sample_count
                )));
            }
        }
        Ok(Self { descriptor, sample_count, offset, domain_packet, payload })
    }

    /// Domain value one past this packet's last sample, assuming a linear
    /// domain rule. `None` for any other rule (§3.2: "only applicable when
    /// domain rule is linear").
    pub fn next_expected_offset(&self) -> Option<i64> {
        match self.descriptor.rule {
            DataRule::Linear { delta, .. } => Some(self.offset + self.sample_count as i64 * delta),
            _ => None,
        }
    }

    /// `true` iff `next` is contiguous with `self` under a linear domain
    /// rule (§3.2 invariant 3, §8 invariant 7). Non-linear rules are
    /// defined to never report a gap.
    pub fn is_contiguous_with(&self, next: &DataPacket) -> bool {
        match self.next_expected_offset() {
            Some(expected) => next.offset == expected,
            None => true,
        }
    }

    /// Raw byte length implied by `sample_count`, dimensions and the
    /// descriptor's raw sample size. Zero for non-`Raw` payloads.
    pub fn expected_raw_len(&self) -> usize {
        let elems_per_sample = self.descriptor.dimensions.iter().product::<usize>().max(1);
        self.sample_count * elems_per_sample * self.descriptor.raw_sample_size()
    }
}

/// A metadata change reported alongside the packet stream (§3.2, §4.6).
/// Absent fields mean "unchanged" — a `DataDescriptorChanged` with both
/// `None` still forces consumers to re-anchor (e.g. after a gap) without
/// actually altering either descriptor.
#[derive(Debug, Clone)]
pub enum EventPacket {
    DataDescriptorChanged { value_descriptor: Option<Arc<DataDescriptor>>, domain_descriptor: Option<Arc<DataDescriptor>> },
    /// Any other tagged event, carried opaquely (mirrors the core-event
    /// bus's `ValueDict` payload shape for forward compatibility).
    Other { id: Arc<str>, params: ValueDict },
}

impl EventPacket {
    pub fn descriptor_changed(
        value_descriptor: Option<Arc<DataDescriptor>>,
        domain_descriptor: Option<Arc<DataDescriptor>>,
    ) -> Self {
        EventPacket::DataDescriptorChanged { value_descriptor, domain_descriptor }
    }

    pub fn is_descriptor_changed(&self) -> bool {
        matches!(self, EventPacket::DataDescriptorChanged { .. })
    }
}

/// A unit on the connection FIFO: either data or a metadata event (§4.7:
/// "Consumers must handle \[the event packet\] before any data packet").
#[derive(Debug, Clone)]
pub enum Packet {
    Data(Arc<DataPacket>),
    Event(Arc<EventPacket>),
}

impl Packet {
    pub fn data(packet: DataPacket) -> Self {
        Packet::Data(Arc::new(packet))
    }

    pub fn event(packet: EventPacket) -> Self {
        Packet::Event(Arc::new(packet))
    }

    pub fn as_data(&self) -> Option<&Arc<DataPacket>> {
        match self {
            Packet::Data(p) => Some(p),
            Packet::Event(_) => None,
        }
    }

    pub fn as_event(&self) -> Option<&Arc<EventPacket>> {
        match self {
            Packet::Event(p) => Some(p),
            Packet::Data(_) => None,
        }
    }

    pub fn sample_count(&self) -> usize {
        match self {
            Packet::Data(p) => p.sample_count,
            Packet::Event(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::descriptor::{DataDescriptorBuilder, SampleType};

    fn linear_descriptor(delta: i64) -> Arc<DataDescriptor> {
        DataDescriptorBuilder::new(SampleType::Int64).with_rule(DataRule::Linear { start: 0, delta }).build()
    }

    #[test]
    fn contiguous_packets_report_no_gap() {
        let d = linear_descriptor(10);
        let p1 = DataPacket::new(d.clone(), 100, 0, None, SamplePayload::Null).unwrap();
        let p2 = DataPacket::new(d, 100, 1000, None, SamplePayload::Null).unwrap();
        assert!(p1.is_contiguous_with(&p2));
    }

    #[test]
    fn gap_detected_when_offset_disagrees() {
        let d = linear_descriptor(10);
        let p1 = DataPacket::new(d.clone(), 100, 0, None, SamplePayload::Null).unwrap();
        let p2 = DataPacket::new(d, 100, 1500, None, SamplePayload::Null).unwrap();
        assert!(!p1.is_contiguous_with(&p2));
    }

    #[test]
    fn mismatched_domain_sample_count_rejected() {
        let d = linear_descriptor(1);
        let domain = Arc::new(DataPacket::new(d.clone(), 50, 0, None, SamplePayload::Null).unwrap());
        let err = DataPacket::new(d, 100, 0, Some(domain), SamplePayload::Null).unwrap_err();
        assert!(matches!(err, Error::InvalidValue(_)));
    }
}
