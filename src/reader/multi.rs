// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Multi reader (§4.9): aligns reads across several signals sharing a
//! comparable domain origin. At the start of every read it computes a
//! common domain value at least as large as every input's next available
//! sample, then drops samples on inputs that lag behind it.

use std::time::{Duration, Instant};

use crate::config::ReaderOptions;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::reader::{ReaderStatus, SampleDecode, StreamReader};
use crate::signal::Signal;

/// Aligns `N` signals sharing a comparable domain (§4.9 "Multi reader").
/// Every input is read through its own [`StreamReader`].
pub struct MultiReader<T: SampleDecode, D: SampleDecode> {
    inputs: Vec<StreamReader<T, D>>,
    options: ReaderOptions,
}

impl<T: SampleDecode, D: SampleDecode> MultiReader<T, D> {
    pub fn new(ctx: Context, signals: &[Signal], options: ReaderOptions) -> Result<Self> {
        if signals.is_empty() {
            return Err(Error::InvalidParameter("multi reader requires at least one signal".to_string()));
        }
        let inputs = signals
            .iter()
            .map(|s| StreamReader::new(ctx.clone(), s, options.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { inputs, options })
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_valid(&self) -> bool {
        self.inputs.iter().all(StreamReader::is_valid)
    }

    /// Aligns every input to a common starting domain value, then reads up
    /// to `value_bufs[i].len()` samples per input. Every buffer must have
    /// equal length; the returned count is the number of aligned samples
    /// available across all inputs (§8 invariant 8: "equal domain values").
    pub fn read(&self, value_bufs: &mut [&mut [T]], domain_buf: Option<&mut [D]>, timeout: Duration) -> Result<(usize, ReaderStatus)> {
        if value_bufs.len() != self.inputs.len() {
            return Err(Error::InvalidParameter("one buffer required per multi-reader input".to_string()));
        }
        let capacity = value_bufs.first().map(|b| b.len()).unwrap_or(0);
        if value_bufs.iter().any(|b| b.len() != capacity) {
            return Err(Error::InvalidParameter("all multi-reader buffers must share the same length".to_string()));
        }

        let deadline = Instant::now() + timeout;
        self.align()?;

        let mut count = capacity;
        let mut status = ReaderStatus::Ok;
        let mut domain_buf = domain_buf;
        for (i, (reader, buf)) in self.inputs.iter().zip(value_bufs.iter_mut()).enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // Only the reference (first) input's domain values are handed
            // back to the caller: once aligned, every input's domain
            // values at a given slot are equal by construction.
            let (n, s) = if i == 0 {
                reader.read_with_domain(buf, domain_buf.as_deref_mut(), remaining)?
            } else {
                reader.read_with_domain(buf, None, remaining)?
            };
            count = count.min(n);
            if !matches!(s, ReaderStatus::Ok) {
                status = s;
            }
        }
        Ok((count, status))
    }

    /// Computes the common alignment target and drops lagging samples on
    /// every input (§4.9 steps 1-2).
    fn align(&self) -> Result<()> {
        for reader in &self.inputs {
            reader.drain_leading_events()?;
        }

        let offsets: Vec<Option<(i64, i64)>> = self.inputs.iter().map(StreamReader::peek_next_domain_offset).collect();
        if offsets.iter().all(Option::is_none) {
            return Ok(()); // nothing queued anywhere yet
        }

        if self.options.require_common_rate {
            let deltas: Vec<i64> = offsets.iter().filter_map(|o| o.map(|(_, d)| d)).collect();
            if let Some(first) = deltas.first() {
                if deltas.iter().any(|d| d != first) {
                    return Err(Error::InvalidState("multi-reader inputs disagree on linear domain delta".to_string()));
                }
            }
        }

        let mut target = offsets.iter().filter_map(|o| o.map(|(off, _)| off)).max().unwrap_or(0);
        if self.options.start_on_full_unit_of_domain && self.options.domain_tick_denominator > 0 {
            let denom = self.options.domain_tick_denominator;
            target = ((target + denom - 1) / denom) * denom;
        }

        for (reader, offset) in self.inputs.iter().zip(offsets.iter()) {
            let Some((next_offset, delta)) = offset else { continue };
            if *next_offset < target && *delta != 0 {
                let skip = ((target - next_offset) + delta - 1) / delta;
                reader.skip_samples(skip.max(0) as usize)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{DataDescriptorBuilder, DataPacket, DataRule, SamplePayload, SampleType};
    use std::sync::Arc;

    fn linear_signal(ctx: &Context, name: &str, delta: i64) -> Signal {
        let signal = Signal::new(ctx.clone(), name);
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Linear { start: 0, delta }).build();
        signal.set_descriptor(d);
        signal
    }

    #[test]
    fn lagging_input_is_trimmed_to_common_start() {
        let ctx = Context::new();
        let s1 = linear_signal(&ctx, "s1", 1);
        let s2 = linear_signal(&ctx, "s2", 1);
        let reader: MultiReader<f64, i64> = MultiReader::new(ctx.clone(), &[s1.clone(), s2.clone()], ReaderOptions::default()).unwrap();

        let d1 = s1.descriptor().unwrap();
        let mut bytes1 = Vec::new();
        for v in [10.0f64, 11.0, 12.0, 13.0, 14.0] {
            bytes1.extend_from_slice(&v.to_le_bytes());
        }
        s1.send_packet(DataPacket::new(d1, 5, 0, None, SamplePayload::Raw(Arc::new(bytes1))).unwrap()).unwrap();

        let d2 = s2.descriptor().unwrap();
        let mut bytes2 = Vec::new();
        for v in [20.0f64, 21.0, 22.0] {
            bytes2.extend_from_slice(&v.to_le_bytes());
        }
        s2.send_packet(DataPacket::new(d2, 3, 2, None, SamplePayload::Raw(Arc::new(bytes2))).unwrap()).unwrap();

        let mut buf1 = [0.0f64; 3];
        let mut buf2 = [0.0f64; 3];
        let mut bufs: Vec<&mut [f64]> = vec![&mut buf1, &mut buf2];
        let (count, _status) = reader.read(&mut bufs, None, Duration::from_millis(50)).unwrap();
        assert_eq!(count, 3);
        // s1 starts at domain 0, s2 starts at domain 2: s1 must drop its
        // first two samples (10.0, 11.0) to align on domain value 2.
        assert_eq!(buf1, [12.0, 13.0, 14.0]);
        assert_eq!(buf2, [20.0, 21.0, 22.0]);
    }

    #[test]
    fn disagreeing_delta_rejected_when_common_rate_required() {
        let ctx = Context::new();
        let s1 = linear_signal(&ctx, "s1", 1);
        let s2 = linear_signal(&ctx, "s2", 2);
        let mut options = ReaderOptions::default();
        options.require_common_rate = true;
        let reader: MultiReader<f64, i64> = MultiReader::new(ctx, &[s1.clone(), s2.clone()], options).unwrap();

        let d1 = s1.descriptor().unwrap();
        s1.send_packet(DataPacket::new(d1, 1, 0, None, SamplePayload::Raw(Arc::new(vec![0; 8]))).unwrap()).unwrap();
        let d2 = s2.descriptor().unwrap();
        s2.send_packet(DataPacket::new(d2, 1, 0, None, SamplePayload::Raw(Arc::new(vec![0; 8]))).unwrap()).unwrap();

        let mut buf1 = [0.0f64; 1];
        let mut buf2 = [0.0f64; 1];
        let mut bufs: Vec<&mut [f64]> = vec![&mut buf1, &mut buf2];
        let err = reader.read(&mut bufs, None, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
