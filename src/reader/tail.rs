// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Tail reader (§4.9): retains the last N samples in a circular buffer;
//! `read` returns up to N most recent, and overlap across calls is
//! allowed (repeated reads may see the same sample more than once).

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::context::Context;
use crate::error::Result;
use crate::reader::{ReaderStatus, SampleDecode, StreamReader};
use crate::signal::Signal;

struct History<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    fn push_all(&mut self, items: impl Iterator<Item = T>) {
        for item in items {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(item);
        }
    }
}

/// Keeps the most recent `history_size` samples seen on a signal, drawn
/// through an internal [`StreamReader`] drained on every `read` (§4.9
/// "Tail reader").
pub struct TailReader<T: SampleDecode, D: SampleDecode> {
    inner: StreamReader<T, D>,
    value_history: Mutex<History<T>>,
    domain_history: Mutex<History<D>>,
}

impl<T: SampleDecode, D: SampleDecode> TailReader<T, D> {
    pub fn new(ctx: Context, signal: &Signal, history_size: usize, options: crate::config::ReaderOptions) -> Result<Self> {
        Ok(Self {
            inner: StreamReader::new(ctx, signal, options)?,
            value_history: Mutex::new(History { samples: VecDeque::with_capacity(history_size), capacity: history_size }),
            domain_history: Mutex::new(History { samples: VecDeque::with_capacity(history_size), capacity: history_size }),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// Drains whatever is currently available from the underlying signal
    /// (non-blocking drain loop bounded by `timeout`), folds it into the
    /// circular history, then copies up to `out.len()` of the most recent
    /// samples into `out` (oldest first).
    pub fn read(&self, out: &mut [T], domain_out: Option<&mut [D]>, timeout: Duration) -> Result<(usize, ReaderStatus)> {
        let mut scratch = vec![T::default(); self.value_history.lock().capacity.max(1)];
        let mut domain_scratch = vec![D::default(); scratch.len()];
        let mut last_status = ReaderStatus::Ok;
        loop {
            let (count, status) = self.inner.read_with_domain(&mut scratch, Some(&mut domain_scratch), Duration::from_millis(0))?;
            if count > 0 {
                self.value_history.lock().push_all(scratch[..count].iter().copied());
                self.domain_history.lock().push_all(domain_scratch[..count].iter().copied());
            }
            last_status = status.clone();
            if matches!(status, ReaderStatus::Timeout | ReaderStatus::Invalid) {
                break;
            }
            if count == 0 && matches!(status, ReaderStatus::Ok) {
                break;
            }
        }
        let _ = timeout; // the drain above is always non-blocking; timeout only bounds the caller's patience, not this snapshot read.

        let values = self.value_history.lock();
        let domains = self.domain_history.lock();
        let n = out.len().min(values.samples.len());
        for (slot, v) in out.iter_mut().zip(values.samples.iter().rev().take(n).collect::<Vec<_>>().into_iter().rev()) {
            *slot = *v;
        }
        if let Some(domain_out) = domain_out {
            for (slot, v) in domain_out.iter_mut().zip(domains.samples.iter().rev().take(n).collect::<Vec<_>>().into_iter().rev()) {
                *slot = *v;
            }
        }
        Ok((n, last_status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderOptions;
    use crate::signal::{DataDescriptorBuilder, DataPacket, DataRule, SamplePayload, SampleType};
    use std::sync::Arc;

    #[test]
    fn returns_most_recent_n_samples() {
        let ctx = Context::new();
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build();
        let signal = Signal::new(ctx.clone(), "sig");
        signal.set_descriptor(d.clone());
        let reader: TailReader<f64, i64> = TailReader::new(ctx, &signal, 3, ReaderOptions::default()).unwrap();

        let mut bytes = Vec::new();
        for v in [1.0f64, 2.0, 3.0, 4.0, 5.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        signal.send_packet(DataPacket::new(d, 5, 0, None, SamplePayload::Raw(Arc::new(bytes))).unwrap()).unwrap();

        let mut out = [0.0f64; 3];
        reader.read(&mut out, None, Duration::from_millis(10)).unwrap();
        assert_eq!(out, [3.0, 4.0, 5.0]);
    }
}
