// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Remote mirror protocol (§4.10 "Remote mirror RPC"): a request/reply +
//! notification protocol letting a client runtime manipulate a server's
//! component tree as if it were local.
//!
//! Grounded on `hdds-xrce`'s `{protocol, session, transport, agent}` split:
//! [`wire`] plays the role of `hdds_xrce::protocol` (message shapes +
//! (de)serialisation), [`session`] mirrors `hdds_xrce::session`, [`auth`] is
//! new (XRCE has no authentication step), [`server`] plays the role of
//! `hdds_xrce::agent::XrceAgent` (one dispatch point per inbound frame), and
//! [`client`] plays the role of `hdds_xrce::proxy::ProxyBridge` from the
//! other direction: a local stand-in for a tree that actually lives
//! elsewhere.

pub mod auth;
pub mod client;
pub mod server;
pub mod session;
pub mod wire;

pub use auth::{AnonymousAuthenticator, Authenticator, UsernamePasswordAuthenticator};
pub use client::{MirrorClient, Transport};
pub use server::RpcServer;
pub use session::{RpcSession, SessionTable};
pub use wire::{decode_frame, encode_frame, Frame, WireError, PROTOCOL_VERSION};
