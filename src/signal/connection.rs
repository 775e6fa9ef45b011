// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Connection FIFO (§3.5, §4.7, §5): the rendezvous point between one
//! signal (producer) and the input port that owns the connection
//! (consumer). Single-producer/single-consumer by design contract, though
//! nothing here enforces that beyond the API shape.
//!
//! Open question (§9): the source leaves the buffer bound implementation-
//! defined, mandating only `getAvailableSamples/Count` and blocking-until-
//! timeout semantics. This crate picks a **soft** bound
//! ([`config::DEFAULT_CONNECTION_DEPTH`]): push never fails or blocks the
//! producer (§3.6: "an unread connection retains memory — this is intended
//! backpressure"), but exceeding the bound logs a warning so an embedder
//! notices a consumer that stopped draining, the way `hdds`'s reliability
//! writer queue logs on an unacknowledged-sample backlog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::signal::packet::Packet;

struct ConnectionState {
    queue: Mutex<std::collections::VecDeque<Packet>>,
    not_empty: Condvar,
    capacity: usize,
}

/// Bounded-by-convention FIFO of packets, owned by the consuming
/// [`crate::signal::InputPort`] (§3.5: "A connection is owned by the input
/// port").
#[derive(Clone)]
pub struct Connection(Arc<ConnectionState>);

impl Connection {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(ConnectionState {
            queue: Mutex::new(std::collections::VecDeque::new()),
            not_empty: Condvar::new(),
            capacity,
        }))
    }

    pub fn with_default_capacity() -> Self {
        Self::new(crate::config::DEFAULT_CONNECTION_DEPTH)
    }

    /// Thread-safe push from the emitting signal's thread (§5). Never
    /// blocks or fails; logs once the queue has grown past `capacity`.
    pub fn push(&self, packet: Packet) {
        let mut queue = self.0.queue.lock();
        queue.push_back(packet);
        if queue.len() == self.0.capacity + 1 {
            log::warn!(
                "connection backlog exceeded {} queued packets; consumer is not draining",
                self.0.capacity
            );
        }
        self.0.not_empty.notify_one();
    }

    /// Thread-safe, non-blocking dequeue from the owning function block's
    /// thread (§5).
    pub fn pop(&self) -> Option<Packet> {
        self.0.queue.lock().pop_front()
    }

    /// Non-destructive look at the head packet, used by the reader layer
    /// to inspect a pending event packet (§4.7: "`peek` is non-destructive").
    pub fn peek(&self) -> Option<Packet> {
        self.0.queue.lock().front().cloned()
    }

    /// Blocks on the connection's condition variable until a packet is
    /// available or `timeout` elapses (§5: "reader `read` calls with
    /// non-zero timeout may park on the connection's condition variable").
    /// A zero timeout polls once without blocking.
    pub fn wait_pop(&self, timeout: Duration) -> Option<Packet> {
        let mut queue = self.0.queue.lock();
        if let Some(p) = queue.pop_front() {
            return Some(p);
        }
        if timeout.is_zero() {
            return None;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return queue.pop_front();
            }
            let result = self.0.not_empty.wait_for(&mut queue, remaining);
            if let Some(p) = queue.pop_front() {
                return Some(p);
            }
            if result.timed_out() {
                return None;
            }
        }
    }

    /// Sum of sample counts across queued data packets (§4.7).
    pub fn available_samples(&self) -> usize {
        self.0.queue.lock().iter().map(Packet::sample_count).sum()
    }

    /// Number of queued packets, data and event alike (§4.7).
    pub fn available_count(&self) -> usize {
        self.0.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::descriptor::{DataDescriptorBuilder, SampleType};
    use crate::signal::packet::{DataPacket, SamplePayload};
    use std::thread;

    fn data_packet(n: usize) -> Packet {
        let d = DataDescriptorBuilder::new(SampleType::Float64).build();
        Packet::data(DataPacket::new(d, n, 0, None, SamplePayload::Null).unwrap())
    }

    #[test]
    fn push_then_pop_preserves_order() {
        let c = Connection::new(8);
        c.push(data_packet(10));
        c.push(data_packet(20));
        assert_eq!(c.pop().unwrap().sample_count(), 10);
        assert_eq!(c.pop().unwrap().sample_count(), 20);
        assert!(c.pop().is_none());
    }

    #[test]
    fn available_samples_sums_queued_data_packets() {
        let c = Connection::new(8);
        c.push(data_packet(10));
        c.push(data_packet(20));
        assert_eq!(c.available_samples(), 30);
        assert_eq!(c.available_count(), 2);
    }

    #[test]
    fn peek_does_not_remove() {
        let c = Connection::new(8);
        c.push(data_packet(5));
        assert_eq!(c.peek().unwrap().sample_count(), 5);
        assert_eq!(c.available_count(), 1);
    }

    #[test]
    fn wait_pop_times_out_when_empty() {
        let c = Connection::new(8);
        let start = Instant::now();
        assert!(c.wait_pop(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn wait_pop_wakes_on_push_from_another_thread() {
        let c = Connection::new(8);
        let c2 = c.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            c2.push(data_packet(1));
        });
        let got = c.wait_pop(Duration::from_secs(1));
        handle.join().unwrap();
        assert!(got.is_some());
    }
}
