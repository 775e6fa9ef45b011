// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! The explicit `Context` object (§9 design note): scheduler + type manager
//! + core-event bus, passed to every component at construction instead of
//! reaching for hidden process-wide singletons. `log`'s global logger is
//! the one genuine ambient singleton this crate keeps, matching `hdds`'s
//! own use of the `log` facade rather than a context-carried logger handle.

use std::sync::Arc;

use crate::events::CoreEventBus;
use crate::types::TypeManager;

/// Where a function block's `onPacketReceived` callback runs (§5
/// "scheduler threads").
pub trait Scheduler: Send + Sync {
    /// Posts `task` for execution. `SameThread` notification mode calls
    /// this inline from the pushing thread; a pooled scheduler would queue
    /// it instead. Posting is documented as non-blocking (§5); if a real
    /// pool is saturated it must queue rather than block here.
    fn post(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs every posted task inline, on the calling thread. The default for
/// embedders that don't need a worker pool; stands in for `hdds`'s
/// executor the way a unit struct stands in for a trait object when no
/// concurrency is required.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn post(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Shared collaborators every component needs at construction (§9: "no
/// hidden singletons"). Cheap to clone: every field is itself an `Arc` or
/// `Arc`-backed handle.
#[derive(Clone)]
pub struct Context {
    pub events: CoreEventBus,
    pub types: TypeManager,
    pub scheduler: Arc<dyn Scheduler>,
}

impl Context {
    pub fn new() -> Self {
        let events = CoreEventBus::new();
        Self { types: TypeManager::with_events(events.clone()), events, scheduler: Arc::new(InlineScheduler) }
    }

    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        let events = CoreEventBus::new();
        Self { types: TypeManager::with_events(events.clone()), events, scheduler }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn inline_scheduler_runs_synchronously() {
        let ctx = Context::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        ctx.scheduler.post(Box::new(move || ran2.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn context_types_fire_on_shared_event_bus() {
        let ctx = Context::new();
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        ctx.events.subscribe(move |_| seen2.store(true, Ordering::SeqCst));
        ctx.types.add_class(crate::types::PropertyObjectClass::new("X")).unwrap();
        assert!(seen.load(Ordering::SeqCst));
    }
}
