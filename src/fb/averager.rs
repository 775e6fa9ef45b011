// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Block-average/RMS statistics function block (§4.8, SUPPLEMENTED FEATURES
//! #2): the worked example this crate's function-block runtime is built
//! against. Grounded line-for-line on
//! `ref_fb_module/statistics_fb_impl.cpp`'s `StatisticsFbImpl` — same
//! property names (`BlockSize`, `DomainSignalType`), same signal names
//! (`avg`, `rms`, `domain`), same gap-detection and block-accumulation
//! logic, re-expressed over this crate's signal/property APIs instead of
//! the original's raw-pointer buffer juggling.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::fb::{FunctionBlock, FunctionBlockHandler, FunctionBlockType};
use crate::property::{Property, PropertyObject, Selection};
use crate::signal::{
    DataDescriptor, DataDescriptorBuilder, DataPacket, DataRule, EventPacket, InputPort,
    NotificationMode, Packet, SamplePayload, SampleType, Signal,
};
use crate::value::{CoreType, Value, ValueList};

/// `DomainSignalType` selection values (`ref_fb_module/statistics_fb_impl.h`'s
/// `DomainSignalType` enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainSignalType {
    /// Output domain is linear: only a rate change, no per-sample payload.
    Implicit,
    /// Output domain is explicit int64 ticks, one per output sample.
    Explicit,
    /// Output domain is explicit `(start, end)` tick ranges, one per
    /// output sample — the block's time span rather than a single instant.
    ExplicitRange,
}

impl DomainSignalType {
    fn from_index(i: i64) -> Self {
        match i {
            0 => DomainSignalType::Implicit,
            1 => DomainSignalType::Explicit,
            _ => DomainSignalType::ExplicitRange,
        }
    }
}

/// Sample types the averager accepts on its input value signal, matching
/// the original's `acceptSampleType` switch exactly.
fn is_acceptable_sample_type(t: SampleType) -> bool {
    matches!(
        t,
        SampleType::Float32
            | SampleType::Float64
            | SampleType::UInt8
            | SampleType::Int8
            | SampleType::UInt16
            | SampleType::Int16
            | SampleType::UInt32
            | SampleType::Int32
            | SampleType::UInt64
            | SampleType::Int64
    )
}

fn decode_raw_samples(sample_type: SampleType, bytes: &[u8]) -> Vec<f64> {
    match sample_type {
        SampleType::Int8 => bytes.iter().map(|&b| b as i8 as f64).collect(),
        SampleType::UInt8 => bytes.iter().map(|&b| b as f64).collect(),
        SampleType::Int16 => bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]]) as f64).collect(),
        SampleType::UInt16 => bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]) as f64).collect(),
        SampleType::Int32 => bytes.chunks_exact(4).map(|c| i32::from_le_bytes(c.try_into().unwrap()) as f64).collect(),
        SampleType::UInt32 => bytes.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap()) as f64).collect(),
        SampleType::Int64 => bytes.chunks_exact(8).map(|c| i64::from_le_bytes(c.try_into().unwrap()) as f64).collect(),
        SampleType::UInt64 => bytes.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap()) as f64).collect(),
        SampleType::Float32 => bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap()) as f64).collect(),
        SampleType::Float64 => bytes.chunks_exact(8).map(|c| f64::from_le_bytes(c.try_into().unwrap())).collect(),
        _ => Vec::new(),
    }
}

fn encode_f64_samples(sample_type: SampleType, samples: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * sample_type.raw_size().max(1));
    for &v in samples {
        match sample_type {
            SampleType::Int8 => out.push(v as i8 as u8),
            SampleType::UInt8 => out.push(v as u8),
            SampleType::Int16 => out.extend_from_slice(&(v as i16).to_le_bytes()),
            SampleType::UInt16 => out.extend_from_slice(&(v as u16).to_le_bytes()),
            SampleType::Int32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
            SampleType::UInt32 => out.extend_from_slice(&(v as u32).to_le_bytes()),
            SampleType::Int64 => out.extend_from_slice(&(v as i64).to_le_bytes()),
            SampleType::UInt64 => out.extend_from_slice(&(v as u64).to_le_bytes()),
            SampleType::Float32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
            SampleType::Float64 => out.extend_from_slice(&v.to_le_bytes()),
            _ => {}
        }
    }
    out
}

fn encode_explicit_ticks(ticks: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ticks.len() * 8);
    for t in ticks {
        out.extend_from_slice(&t.to_le_bytes());
    }
    out
}

fn encode_explicit_ranges(ranges: &[(i64, i64)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ranges.len() * 16);
    for (start, end) in ranges {
        out.extend_from_slice(&start.to_le_bytes());
        out.extend_from_slice(&end.to_le_bytes());
    }
    out
}

/// Everything re-derived from the current input descriptors and config
/// whenever either changes (§"configure" in the original).
struct Pipeline {
    input_value_descriptor: Option<Arc<DataDescriptor>>,
    input_domain_descriptor: Option<Arc<DataDescriptor>>,
    input_delta_ticks: i64,
    output_delta_ticks: i64,
    sample_type: SampleType,
    output_domain_descriptor: Option<Arc<DataDescriptor>>,
    output_avg_descriptor: Option<Arc<DataDescriptor>>,
    output_rms_descriptor: Option<Arc<DataDescriptor>>,
    calc_buf: Vec<f64>,
    next_expected_domain_value: Option<i64>,
    valid: bool,
}

impl Pipeline {
    fn empty() -> Self {
        Self {
            input_value_descriptor: None,
            input_domain_descriptor: None,
            input_delta_ticks: 0,
            output_delta_ticks: 0,
            sample_type: SampleType::Undefined,
            output_domain_descriptor: None,
            output_avg_descriptor: None,
            output_rms_descriptor: None,
            calc_buf: Vec::new(),
            next_expected_domain_value: None,
            valid: false,
        }
    }
}

struct AveragerState {
    avg_signal: Signal,
    rms_signal: Signal,
    domain_signal: Signal,
    domain_signal_type: std::sync::atomic::AtomicU8,
    block_size: std::sync::atomic::AtomicUsize,
    pipeline: Mutex<Pipeline>,
}

impl AveragerState {
    fn domain_signal_type(&self) -> DomainSignalType {
        match self.domain_signal_type.load(std::sync::atomic::Ordering::Acquire) {
            0 => DomainSignalType::Implicit,
            1 => DomainSignalType::Explicit,
            _ => DomainSignalType::ExplicitRange,
        }
    }

    fn block_size(&self) -> usize {
        self.block_size.load(std::sync::atomic::Ordering::Acquire).max(1)
    }

    fn process_descriptor_changed(&self, value: Option<Arc<DataDescriptor>>, domain: Option<Arc<DataDescriptor>>) {
        let mut p = self.pipeline.lock();
        if let Some(v) = value {
            p.input_value_descriptor = Some(v);
        }
        if let Some(d) = domain {
            p.input_domain_descriptor = Some(d);
        }
        self.configure(&mut p);
    }

    /// Re-derives every output descriptor from the current input
    /// descriptors and config, mirroring `StatisticsFbImpl::configure`.
    fn configure(&self, p: &mut Pipeline) {
        p.valid = false;

        let (Some(value_desc), Some(domain_desc)) = (p.input_value_descriptor.clone(), p.input_domain_descriptor.clone()) else {
            log::warn!("averager: incomplete input signal descriptors");
            return;
        };

        if !matches!(domain_desc.sample_type, SampleType::Int64 | SampleType::UInt64) {
            log::warn!("averager: incompatible domain sample type {:?}", domain_desc.sample_type);
            return;
        }
        let DataRule::Linear { start, delta } = domain_desc.rule else {
            log::warn!("averager: domain rule is not linear");
            return;
        };

        let block_size = self.block_size() as i64;
        p.input_delta_ticks = delta;
        p.output_delta_ticks = delta * block_size;

        let domain_signal_type = self.domain_signal_type();
        let mut domain_builder = DataDescriptorBuilder::copy_of(&domain_desc).with_name("StatisticsDomain");
        domain_builder = match domain_signal_type {
            DomainSignalType::Implicit => domain_builder.with_rule(DataRule::Linear { start, delta: p.output_delta_ticks }),
            DomainSignalType::Explicit => domain_builder.with_rule(DataRule::Explicit),
            DomainSignalType::ExplicitRange => domain_builder.with_rule(DataRule::Explicit).with_sample_type(SampleType::RangeInt64),
        };
        let output_domain_descriptor = domain_builder.build();
        self.domain_signal.set_descriptor(output_domain_descriptor.clone());
        p.output_domain_descriptor = Some(output_domain_descriptor);

        if value_desc.sample_type == SampleType::Struct || !value_desc.is_scalar() {
            log::warn!("averager: arrays/structs are not supported on the input");
            return;
        }
        if !is_acceptable_sample_type(value_desc.sample_type) {
            log::warn!("averager: incompatible input sample type {:?}", value_desc.sample_type);
            return;
        }
        p.sample_type = value_desc.sample_type;

        let base_name = value_desc.name.clone().unwrap_or_else(|| Arc::from("Value"));
        let output_avg = DataDescriptorBuilder::copy_of(&value_desc)
            .with_name(format!("{base_name}/Avg"))
            .with_post_scaling(None)
            .build();
        self.avg_signal.set_descriptor(output_avg.clone());
        p.output_avg_descriptor = Some(output_avg);

        let mut rms_builder = DataDescriptorBuilder::copy_of(&value_desc).with_name(format!("{base_name}/Rms")).with_post_scaling(None);
        if let Some((_, high)) = &value_desc.value_range {
            rms_builder = rms_builder.with_value_range(Value::Int(0), high.clone());
        }
        let output_rms = rms_builder.build();
        self.rms_signal.set_descriptor(output_rms.clone());
        p.output_rms_descriptor = Some(output_rms);

        p.calc_buf.clear();
        p.next_expected_domain_value = None;
        p.valid = true;
    }

    fn process_data_packet(&self, packet: &Arc<DataPacket>) {
        let mut p = self.pipeline.lock();
        if !p.valid {
            return;
        }
        let Some(domain_packet) = packet.domain_packet.clone() else {
            return;
        };

        let have_gap = match p.next_expected_domain_value {
            None => false,
            Some(expected) => domain_packet.offset != expected,
        };
        if have_gap {
            p.calc_buf.clear();
        }
        let output_start_domain_value = if have_gap || p.next_expected_domain_value.is_none() {
            domain_packet.offset
        } else {
            domain_packet.offset - p.calc_buf.len() as i64 * p.input_delta_ticks
        };
        p.next_expected_domain_value = Some(domain_packet.offset + packet.sample_count as i64 * p.input_delta_ticks);

        let SamplePayload::Raw(bytes) = &packet.payload else {
            log::warn!("averager: only raw sample payloads are supported");
            return;
        };
        p.calc_buf.extend(decode_raw_samples(p.sample_type, bytes));

        let block_size = self.block_size();
        let out_sample_count = p.calc_buf.len() / block_size;
        if out_sample_count == 0 {
            return;
        }

        let domain_signal_type = self.domain_signal_type();
        let mut avg_samples = Vec::with_capacity(out_sample_count);
        let mut rms_samples = Vec::with_capacity(out_sample_count);
        let mut domain_ticks = Vec::with_capacity(out_sample_count);
        let mut domain_ranges = Vec::with_capacity(out_sample_count);
        let mut tick = output_start_domain_value;

        for block in p.calc_buf.chunks_exact(block_size).take(out_sample_count) {
            let sum: f64 = block.iter().sum();
            let sum_sq: f64 = block.iter().map(|v| v * v).sum();
            avg_samples.push(sum / block_size as f64);
            rms_samples.push((sum_sq / block_size as f64).sqrt());
            match domain_signal_type {
                DomainSignalType::Implicit => {}
                DomainSignalType::Explicit => {
                    domain_ticks.push(tick);
                    tick += p.output_delta_ticks;
                }
                DomainSignalType::ExplicitRange => {
                    domain_ranges.push((tick, tick + p.input_delta_ticks * block_size as i64 - 1));
                    tick += p.output_delta_ticks;
                }
            }
        }

        let consumed = out_sample_count * block_size;
        p.calc_buf.drain(0..consumed);

        let domain_descriptor = p.output_domain_descriptor.clone().expect("configured");
        let avg_descriptor = p.output_avg_descriptor.clone().expect("configured");
        let rms_descriptor = p.output_rms_descriptor.clone().expect("configured");
        let sample_type = p.sample_type;
        drop(p);

        let domain_payload = match domain_signal_type {
            DomainSignalType::Implicit => SamplePayload::Null,
            DomainSignalType::Explicit => SamplePayload::Raw(Arc::new(encode_explicit_ticks(&domain_ticks))),
            DomainSignalType::ExplicitRange => SamplePayload::Raw(Arc::new(encode_explicit_ranges(&domain_ranges))),
        };
        let domain_out = match DataPacket::new(domain_descriptor, out_sample_count, output_start_domain_value, None, domain_payload) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                log::warn!("averager: failed to build output domain packet: {e}");
                return;
            }
        };

        if self.avg_signal.descriptor().is_some() {
            let payload = SamplePayload::Raw(Arc::new(encode_f64_samples(sample_type, &avg_samples)));
            if let Ok(p) = DataPacket::new(avg_descriptor, out_sample_count, output_start_domain_value, Some(domain_out.clone()), payload)
            {
                let _ = self.avg_signal.send_packet(p);
            }
        }
        if self.rms_signal.descriptor().is_some() {
            let payload = SamplePayload::Raw(Arc::new(encode_f64_samples(sample_type, &rms_samples)));
            if let Ok(p) = DataPacket::new(rms_descriptor, out_sample_count, output_start_domain_value, Some(domain_out.clone()), payload)
            {
                let _ = self.rms_signal.send_packet(p);
            }
        }
        let _ = self.domain_signal.send_packet((*domain_out).clone());
    }
}

struct AveragerHandler(Arc<AveragerState>);

impl FunctionBlockHandler for AveragerHandler {
    fn on_packet_received(&self, _fb: &FunctionBlock, port: &InputPort) {
        while let Some(packet) = port.connection().pop() {
            match packet {
                Packet::Event(event) => {
                    if let EventPacket::DataDescriptorChanged { value_descriptor, domain_descriptor } = &*event {
                        self.0.process_descriptor_changed(value_descriptor.clone(), domain_descriptor.clone());
                    }
                }
                Packet::Data(data) => self.0.process_data_packet(&data),
            }
        }
    }
}

/// Registers the averager's type id for a module-registry-style lookup
/// (§4.8: "The type supplies a default-config property object").
pub struct AveragerType;

impl FunctionBlockType for AveragerType {
    fn type_id(&self) -> &'static str {
        "ref_fb_module_statistics"
    }

    fn default_config(&self, _ctx: &Context) -> PropertyObject {
        Averager::build_default_config()
    }
}

/// Handle to a constructed averager instance: a [`FunctionBlock`] with one
/// input port (`input`) and three output signals (`avg`, `rms`, `domain`).
#[derive(Clone)]
pub struct Averager {
    fb: FunctionBlock,
    input_port: InputPort,
    state: Arc<AveragerState>,
}

impl Averager {
    fn build_default_config() -> PropertyObject {
        let config = PropertyObject::new();
        config.add_property(Property::new("BlockSize", CoreType::Int, Value::Int(10))).expect("BlockSize property is well-formed");
        let domain_type_selection = ValueList::from_vec(vec![Value::from("Implicit"), Value::from("Explicit"), Value::from("ExplicitRange")]);
        config
            .add_property(Property::new("DomainSignalType", CoreType::Int, Value::Int(0)).with_selection(Selection::List(domain_type_selection)))
            .expect("DomainSignalType property is well-formed");
        config
    }

    /// Builds a detached averager under `ctx`, optionally overlaying
    /// `user_config` onto the default `BlockSize`/`DomainSignalType`
    /// (§4.8, §9: unrecognised overlay keys are rejected by
    /// [`FunctionBlock::new`]).
    pub fn new(ctx: Context, local_id: impl Into<Arc<str>>, user_config: Option<&PropertyObject>) -> Result<Self> {
        let fb = FunctionBlock::new(ctx, local_id, Self::build_default_config(), user_config)?;

        let avg_signal = fb.create_signal("avg")?;
        let rms_signal = fb.create_signal("rms")?;
        let domain_signal = fb.create_signal("domain")?;
        avg_signal.set_domain_signal(Some(domain_signal.clone()));
        rms_signal.set_domain_signal(Some(domain_signal.clone()));

        let block_size = fb.config().get_property_value("BlockSize")?.as_int()?;
        let domain_signal_type = DomainSignalType::from_index(fb.config().get_property_value("DomainSignalType")?.as_int()?);

        let state = Arc::new(AveragerState {
            avg_signal,
            rms_signal,
            domain_signal,
            domain_signal_type: std::sync::atomic::AtomicU8::new(match domain_signal_type {
                DomainSignalType::Implicit => 0,
                DomainSignalType::Explicit => 1,
                DomainSignalType::ExplicitRange => 2,
            }),
            block_size: std::sync::atomic::AtomicUsize::new(block_size.max(1) as usize),
            pipeline: Mutex::new(Pipeline::empty()),
        });

        fb.set_handler(Arc::new(AveragerHandler(state.clone())));
        let input_port = fb.create_input_port("input", NotificationMode::Scheduler)?;

        Ok(Self { fb, input_port, state })
    }

    pub fn as_function_block(&self) -> &FunctionBlock {
        &self.fb
    }

    /// The block's sole input port (`input`), wired to call back into this
    /// averager whenever a packet arrives.
    pub fn input_port(&self) -> &InputPort {
        &self.input_port
    }

    /// Re-reads `BlockSize`/`DomainSignalType` from the config property
    /// object and re-derives output descriptors. Call after changing
    /// either property (`propertyChanged()` in the original, there wired
    /// automatically through a property-write event handler).
    pub fn apply_config(&self) -> Result<()> {
        let block_size = self.fb.config().get_property_value("BlockSize")?.as_int()?;
        if block_size <= 0 {
            return Err(Error::InvalidValue("BlockSize must be positive".to_string()));
        }
        let domain_signal_type = DomainSignalType::from_index(self.fb.config().get_property_value("DomainSignalType")?.as_int()?);

        self.state.block_size.store(block_size as usize, std::sync::atomic::Ordering::Release);
        self.state.domain_signal_type.store(
            match domain_signal_type {
                DomainSignalType::Implicit => 0,
                DomainSignalType::Explicit => 1,
                DomainSignalType::ExplicitRange => 2,
            },
            std::sync::atomic::Ordering::Release,
        );

        let mut p = self.state.pipeline.lock();
        self.state.configure(&mut p);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_domain(delta: i64) -> Arc<DataDescriptor> {
        DataDescriptorBuilder::new(SampleType::Int64).with_rule(DataRule::Linear { start: 0, delta }).with_name("time").build()
    }

    fn connect_source(ctx: &Context, averager: &Averager, sample_type: SampleType, domain_delta: i64) -> (Signal, Signal) {
        let domain_source = Signal::new(ctx.clone(), "time");
        let value_source = Signal::new(ctx.clone(), "value");
        value_source.set_domain_signal(Some(domain_source.clone()));

        domain_source.set_descriptor(linear_domain(domain_delta));
        value_source.set_descriptor(DataDescriptorBuilder::new(sample_type).with_rule(DataRule::Explicit).with_name("Value").build());

        averager.input_port().connect(&value_source).unwrap();
        (value_source, domain_source)
    }

    fn send_block(value_source: &Signal, domain: &Arc<DataDescriptor>, offset: i64, values: &[f64]) {
        let domain_packet = Arc::new(DataPacket::new(domain.clone(), values.len(), offset, None, SamplePayload::Null).unwrap());
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>();
        let packet = DataPacket::new(
            value_source.descriptor().unwrap(),
            values.len(),
            offset,
            Some(domain_packet),
            SamplePayload::Raw(Arc::new(bytes)),
        )
        .unwrap();
        value_source.send_packet(packet).unwrap();
    }

    #[test]
    fn averages_a_full_block_into_one_output_sample() {
        let ctx = Context::new();
        let averager = Averager::new(ctx.clone(), "avg0", None).unwrap();
        averager.fb.config().set_property_value("BlockSize", Value::Int(4)).unwrap();
        averager.apply_config().unwrap();

        let avg_out = std::sync::Arc::new(parking_lot::Mutex::new(Vec::<f64>::new()));
        let avg_port = InputPort::new(ctx.clone(), "avg_tap", NotificationMode::None);
        avg_port.connect(&averager.state.avg_signal).unwrap();

        let (value_source, domain_source) = connect_source(&ctx, &averager, SampleType::Float64, 1);
        let domain_desc = domain_source.descriptor().unwrap();

        send_block(&value_source, &domain_desc, 0, &[1.0, 2.0, 3.0, 4.0]);

        while let Some(packet) = avg_port.connection().pop() {
            if let Some(p) = packet.as_data() {
                let values = decode_raw_samples(SampleType::Float64, match &p.payload {
                    SamplePayload::Raw(b) => b,
                    _ => panic!("expected raw payload"),
                });
                avg_out.lock().extend(values);
            }
        }
        assert_eq!(*avg_out.lock(), vec![2.5]);
    }

    #[test]
    fn partial_block_is_buffered_until_full() {
        let ctx = Context::new();
        let averager = Averager::new(ctx.clone(), "avg0", None).unwrap();
        averager.fb.config().set_property_value("BlockSize", Value::Int(4)).unwrap();
        averager.apply_config().unwrap();

        let (value_source, domain_source) = connect_source(&ctx, &averager, SampleType::Float64, 1);
        let domain_desc = domain_source.descriptor().unwrap();

        send_block(&value_source, &domain_desc, 0, &[1.0, 2.0]);
        assert_eq!(averager.state.pipeline.lock().calc_buf.len(), 2);

        send_block(&value_source, &domain_desc, 2, &[3.0, 4.0]);
        assert_eq!(averager.state.pipeline.lock().calc_buf.len(), 0);
    }

    #[test]
    fn gap_in_domain_resets_calc_buffer() {
        let ctx = Context::new();
        let averager = Averager::new(ctx.clone(), "avg0", None).unwrap();
        averager.fb.config().set_property_value("BlockSize", Value::Int(4)).unwrap();
        averager.apply_config().unwrap();

        let (value_source, domain_source) = connect_source(&ctx, &averager, SampleType::Float64, 1);
        let domain_desc = domain_source.descriptor().unwrap();

        send_block(&value_source, &domain_desc, 0, &[1.0, 2.0]);
        assert_eq!(averager.state.pipeline.lock().calc_buf.len(), 2);

        // offset 100 instead of the expected 2 is a gap: buffer resets to the new block
        send_block(&value_source, &domain_desc, 100, &[5.0]);
        assert_eq!(averager.state.pipeline.lock().calc_buf.len(), 1);
    }

    #[test]
    fn incompatible_domain_sample_type_leaves_pipeline_invalid() {
        let ctx = Context::new();
        let averager = Averager::new(ctx.clone(), "avg0", None).unwrap();

        let domain_source = Signal::new(ctx.clone(), "time");
        let value_source = Signal::new(ctx.clone(), "value");
        value_source.set_domain_signal(Some(domain_source.clone()));
        domain_source.set_descriptor(DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build());
        value_source.set_descriptor(DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build());

        averager.input_port().connect(&value_source).unwrap();
        assert!(!averager.state.pipeline.lock().valid);
    }
}
