// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Reader layer (§4.9): pull-side adapters that convert the packet
//! pipeline into typed, possibly multi-signal, time-aligned sample
//! batches for user code.
//!
//! Every reader owns an [`InputPort`] (or several, for [`multi::MultiReader`])
//! and operates on a `(valueType, domainType)` pair chosen at construction.
//! Grounded on `hdds::dds::reader`'s take/read-condition split generalised
//! from "one topic's samples" to "a typed view over a signal's packet
//! stream", keeping the same never-block-the-producer posture the
//! connection FIFO already gives us (§5).

pub mod block;
pub mod multi;
pub mod packet;
pub mod stream;
pub mod tail;

pub use block::BlockReader;
pub use multi::MultiReader;
pub use packet::PacketReader;
pub use stream::StreamReader;
pub use tail::TailReader;

use crate::error::{Error, Result};
use crate::signal::{DataDescriptor, DataPacket, DataRule, PostScaling, SamplePayload, SampleType};
use std::sync::Arc;

/// Outcome of a single `read` call (§4.9).
#[derive(Debug, Clone, PartialEq)]
pub enum ReaderStatus {
    /// `count` samples were copied with no interruption.
    Ok,
    /// A timeout elapsed before `count` samples could be produced.
    Timeout,
    /// A `DataDescriptorChanged` event halted the read. The reader's
    /// position is left on the post-event boundary (§4.9 "Stream reader").
    DescriptorChanged { value_descriptor: Option<Arc<DataDescriptor>>, domain_descriptor: Option<Arc<DataDescriptor>> },
    /// The reader has been invalidated (§4.9 "Cancellation & errors").
    Invalid,
}

/// A type a reader can decode packet bytes into. Implemented for every
/// primitive numeric Rust type; conversion always goes through an `f64`
/// intermediate, matching the value kernel's "lossy-but-defined" numeric
/// conversion rule (§4.1).
pub trait SampleDecode: Copy + Send + Sync + Default + 'static {
    fn from_f64_lossy(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_sample_decode_float {
    ($t:ty) => {
        impl SampleDecode for $t {
            fn from_f64_lossy(v: f64) -> Self {
                v as $t
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

macro_rules! impl_sample_decode_int {
    ($t:ty) => {
        impl SampleDecode for $t {
            // C-style rounding toward zero, per §4.1.
            fn from_f64_lossy(v: f64) -> Self {
                v.trunc() as $t
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_sample_decode_float!(f32);
impl_sample_decode_float!(f64);
impl_sample_decode_int!(i8);
impl_sample_decode_int!(u8);
impl_sample_decode_int!(i16);
impl_sample_decode_int!(u16);
impl_sample_decode_int!(i32);
impl_sample_decode_int!(u32);
impl_sample_decode_int!(i64);
impl_sample_decode_int!(u64);

/// True iff `from` can be implicitly converted to `to` (§4.9: "integer ->
/// float -> complex widenings; otherwise `InvalidState`"). Numeric-to-
/// numeric is always allowed (lossy, per §4.1); anything touching a
/// non-numeric sample type is not.
pub fn is_implicitly_convertible(from: SampleType, to: SampleType) -> bool {
    from.is_numeric() && to.is_numeric()
}

fn read_raw_scalar(sample_type: SampleType, bytes: &[u8]) -> Result<f64> {
    let width = sample_type.raw_size();
    if bytes.len() < width {
        return Err(Error::InvalidValue("raw sample buffer shorter than sample width".to_string()));
    }
    Ok(match sample_type {
        SampleType::Int8 => bytes[0] as i8 as f64,
        SampleType::UInt8 => bytes[0] as f64,
        SampleType::Int16 => i16::from_le_bytes(bytes[0..2].try_into().unwrap()) as f64,
        SampleType::UInt16 => u16::from_le_bytes(bytes[0..2].try_into().unwrap()) as f64,
        SampleType::Int32 => i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as f64,
        SampleType::UInt32 => u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as f64,
        SampleType::Int64 => i64::from_le_bytes(bytes[0..8].try_into().unwrap()) as f64,
        SampleType::UInt64 => u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as f64,
        SampleType::Float32 => f32::from_le_bytes(bytes[0..4].try_into().unwrap()) as f64,
        SampleType::Float64 => f64::from_le_bytes(bytes[0..8].try_into().unwrap()),
        other => {
            return Err(Error::ConversionFailed(format!("sample type {other:?} has no scalar numeric representation")))
        }
    })
}

fn apply_post_scaling(raw: f64, scaling: Option<&PostScaling>) -> f64 {
    match scaling {
        Some(ps) => raw * ps.scale + ps.offset,
        None => raw,
    }
}

/// Decodes `take` samples starting at sample index `skip` from `packet`
/// into `out` (flattened, `elems_per_sample` `T`s per sample), honouring
/// raw/constant/null payloads (§3.2, §4.9).
pub(crate) fn decode_data_packet<T: SampleDecode>(packet: &DataPacket, skip: usize, take: usize, out: &mut [T]) -> Result<()> {
    let descriptor = &packet.descriptor;
    let elems = descriptor.dimensions.iter().product::<usize>().max(1);
    if out.len() < take * elems {
        return Err(Error::InvalidParameter("output buffer too small for requested sample range".to_string()));
    }
    match &packet.payload {
        SamplePayload::Raw(bytes) => {
            let sample_type = descriptor.post_scaling.as_ref().map(|p| p.input_sample_type).unwrap_or(descriptor.sample_type);
            let width = sample_type.raw_size();
            for s in 0..take {
                for e in 0..elems {
                    let idx = (skip + s) * elems + e;
                    let byte_off = idx * width;
                    let raw = read_raw_scalar(sample_type, &bytes[byte_off..])?;
                    let scaled = apply_post_scaling(raw, descriptor.post_scaling.as_ref());
                    out[s * elems + e] = T::from_f64_lossy(scaled);
                }
            }
        }
        SamplePayload::Constant { start, overrides } => {
            let start_f = start.as_float().or_else(|_| start.as_int().map(|i| i as f64))?;
            for s in 0..take {
                let sample_idx = skip + s;
                let v = overrides
                    .iter()
                    .find(|(pos, _)| *pos == sample_idx)
                    .map(|(_, v)| v.as_float().or_else(|_| v.as_int().map(|i| i as f64)))
                    .transpose()?
                    .unwrap_or(start_f);
                for e in 0..elems {
                    out[s * elems + e] = T::from_f64_lossy(v);
                }
            }
        }
        SamplePayload::Null => {
            for slot in out.iter_mut().take(take * elems) {
                *slot = T::from_f64_lossy(0.0);
            }
        }
    }
    Ok(())
}

/// Decodes `take` domain values starting at sample index `skip` (§3.2,
/// §4.7). A linear rule is computed from `offset + idx * delta` rather
/// than read from a payload, since linear domain packets typically carry
/// no raw bytes at all.
pub(crate) fn decode_domain_packet<D: SampleDecode>(packet: &DataPacket, skip: usize, take: usize, out: &mut [D]) -> Result<()> {
    match packet.descriptor.rule {
        DataRule::Linear { delta, .. } => {
            if out.len() < take {
                return Err(Error::InvalidParameter("output buffer too small for requested domain range".to_string()));
            }
            for s in 0..take {
                let idx = (skip + s) as i64;
                out[s] = D::from_f64_lossy((packet.offset + idx * delta) as f64);
            }
            Ok(())
        }
        DataRule::Explicit | DataRule::Constant => decode_data_packet(packet, skip, take, out),
    }
}
