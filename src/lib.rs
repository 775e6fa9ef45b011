// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! # daqcore — reactive component graph and packet pipeline for distributed DAQ
//!
//! `daqcore` models measurement hardware as a tree of live components
//! (devices, channels, function blocks, signals, input ports), executes
//! signal-processing pipelines over packetised waveform data, and mirrors
//! that tree across a process boundary so a client runtime can manipulate a
//! remote server's component graph as if it were local.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                      Property / Component Layer                     |
//! |  Value kernel | Property objects | Type manager | Component tree    |
//! +---------------------------------------------------------------------+
//! |                          Core Event Bus                             |
//! |   PropertyValueChanged | ComponentAdded | DataDescriptorChanged ...  |
//! +---------------------------------------------------------------------+
//! |                        Signal Pipeline Layer                        |
//! |   Signals -> Connections -> Input Ports -> Function Blocks          |
//! +---------------------------------------------------------------------+
//! |                          Reader Layer                               |
//! |   Stream | Block | Tail | Packet | Multi readers                    |
//! +---------------------------------------------------------------------+
//! |                     Remote Mirror RPC (optional)                    |
//! |   Request/Reply + Notification, client-side proxy component tree    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules overview
//!
//! - [`value`] — reference-counted polymorphic value kernel (C1)
//! - [`ser`] — tagged, versioned, self-describing serialisation (C2)
//! - [`property`] — reflective property system (C3)
//! - [`eval`], [`types`] — expression language and type/class registry (C4)
//! - [`component`] — component tree, folders, permissions, locking (C5)
//! - [`events`] — core-event bus (C6)
//! - [`signal`] — signals, descriptors, packets, connections, input ports (C7)
//! - [`fb`] — function-block runtime (C8)
//! - [`reader`] — stream/block/tail/packet/multi readers (C9)
//! - [`rpc`] — remote mirror protocol, client + server (C10)
//! - [`streaming`] — streaming-source attachment policy (C11)
//! - [`config`] — layered runtime configuration (§6.4)
//! - [`error`] — closed error-kind enum (§7)

/// Component tree: devices, channels, function blocks, folders, permissions.
pub mod component;
/// Layered runtime configuration (streaming heuristics, reader defaults).
pub mod config;
/// Explicit scheduler + event-bus + type-manager bundle passed at construction.
pub mod context;
/// Small reference-expression language used by validators/coercers/evals.
pub mod eval;
/// Core-event bus: the stable id/payload table every structural change fires on.
pub mod events;
/// Closed error-kind enum shared by every fallible operation.
pub mod error;
/// Function-block runtime: input-port/signal folders, scheduler callback.
pub mod fb;
/// Reflective property system: typed properties, coercion, validation, batching.
pub mod property;
/// Pull-side adapters converting packets into typed sample batches.
pub mod reader;
/// Remote mirror RPC: request/reply + notification protocol, client mirror.
#[cfg(feature = "rpc")]
pub mod rpc;
/// Tagged, versioned, self-describing serialisation over the value kernel.
pub mod ser;
/// Signal graph: descriptors, packets, connections, input ports.
pub mod signal;
/// Streaming-source attachment policy for remote signals.
pub mod streaming;
/// Named class/struct/enum registry (type manager).
pub mod types;
/// Reference-counted polymorphic value kernel.
pub mod value;

pub use component::{Component, ComponentId, Folder, ItemRef, SearchFilter};
pub use context::{Context, Scheduler};
pub use error::{Error, Result};
pub use events::{CoreEventArgs, CoreEventBus, CoreEventId};
pub use property::{Property, PropertyObject};
pub use signal::{Connection, DataDescriptor, DataPacket, EventPacket, InputPort, Packet, Signal};
pub use value::Value;

/// Crate version, exposed the way embedders often surface it in `GetInfo` RPCs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
