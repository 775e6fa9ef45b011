// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Block reader (§4.9): reads whole blocks of a fixed size; a partial
//! block is never handed to the caller, it is retained until enough
//! samples arrive to complete it.

use std::time::Duration;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::reader::{ReaderStatus, SampleDecode, StreamReader};
use crate::signal::Signal;

/// Wraps a [`StreamReader`], only ever emitting complete blocks of
/// `block_size` samples (§4.9 "Block reader").
pub struct BlockReader<T: SampleDecode, D: SampleDecode> {
    inner: StreamReader<T, D>,
    block_size: usize,
    leftover_value: Mutex<Vec<T>>,
    leftover_domain: Mutex<Vec<D>>,
}

impl<T: SampleDecode, D: SampleDecode> BlockReader<T, D> {
    pub fn new(ctx: Context, signal: &Signal, block_size: usize, options: crate::config::ReaderOptions) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidParameter("block size must be non-zero".to_string()));
        }
        Ok(Self {
            inner: StreamReader::new(ctx, signal, options)?,
            block_size,
            leftover_value: Mutex::new(Vec::new()),
            leftover_domain: Mutex::new(Vec::new()),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// Reads as many whole blocks as fit in `value_buf`/`domain_buf`
    /// (`value_buf.len()` must be a multiple of `block_size`). Returns the
    /// number of *samples* emitted (always a multiple of `block_size`) and
    /// the status of the underlying read that produced (or failed to
    /// produce) the remainder.
    pub fn read_blocks(&self, value_buf: &mut [T], mut domain_buf: Option<&mut [D]>, timeout: Duration) -> Result<(usize, ReaderStatus)> {
        if value_buf.len() % self.block_size != 0 {
            return Err(Error::InvalidParameter("buffer length must be a multiple of block size".to_string()));
        }
        if let Some(domain) = domain_buf.as_deref() {
            if domain.len() != value_buf.len() {
                return Err(Error::InvalidParameter("domain buffer length must match value buffer length".to_string()));
            }
        }

        let mut leftover_value = self.leftover_value.lock();
        let mut leftover_domain = self.leftover_domain.lock();
        let carried = leftover_value.len();
        value_buf[..carried].copy_from_slice(&leftover_value);
        if let Some(domain) = domain_buf.as_deref_mut() {
            domain[..carried].copy_from_slice(&leftover_domain);
        }

        let (new_count, status) = self.inner.read_with_domain(&mut value_buf[carried..], domain_buf.as_deref_mut().map(|d| &mut d[carried..]), timeout)?;
        let total = carried + new_count;
        let whole_blocks_samples = (total / self.block_size) * self.block_size;

        leftover_value.clear();
        leftover_value.extend_from_slice(&value_buf[whole_blocks_samples..total]);
        leftover_domain.clear();
        if let Some(domain) = domain_buf.as_deref() {
            leftover_domain.extend_from_slice(&domain[whole_blocks_samples..total]);
        }

        Ok((whole_blocks_samples, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderOptions;
    use crate::signal::{DataDescriptorBuilder, DataPacket, DataRule, SamplePayload, SampleType};
    use std::sync::Arc;

    #[test]
    fn partial_block_is_retained_until_complete() {
        let ctx = Context::new();
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build();
        let signal = Signal::new(ctx.clone(), "sig");
        signal.set_descriptor(d.clone());
        let reader: BlockReader<f64, i64> = BlockReader::new(ctx, &signal, 4, ReaderOptions::default()).unwrap();

        let mut buf = [0.0f64; 8];
        reader.read_blocks(&mut buf, None, Duration::from_millis(10)).unwrap(); // drain initial event

        let mut bytes = Vec::new();
        for v in [1.0f64, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        signal.send_packet(DataPacket::new(d, 3, 0, None, SamplePayload::Raw(Arc::new(bytes))).unwrap()).unwrap();

        let (count, _status) = reader.read_blocks(&mut buf, None, Duration::from_millis(10)).unwrap();
        assert_eq!(count, 0, "an incomplete block must never be emitted");
    }

    #[test]
    fn full_block_emitted_once_boundary_reached() {
        let ctx = Context::new();
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build();
        let signal = Signal::new(ctx.clone(), "sig");
        signal.set_descriptor(d.clone());
        let reader: BlockReader<f64, i64> = BlockReader::new(ctx, &signal, 2, ReaderOptions::default()).unwrap();
        let mut buf = [0.0f64; 4];
        reader.read_blocks(&mut buf, None, Duration::from_millis(10)).unwrap();

        let mut bytes = Vec::new();
        for v in [1.0f64, 2.0, 3.0, 4.0, 5.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        signal.send_packet(DataPacket::new(d, 5, 0, None, SamplePayload::Raw(Arc::new(bytes))).unwrap()).unwrap();

        let (count, _) = reader.read_blocks(&mut buf, None, Duration::from_millis(10)).unwrap();
        assert_eq!(count, 4);
        assert_eq!(&buf[..4], &[1.0, 2.0, 3.0, 4.0]);
    }
}
