// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Client-side mirror of a remote component tree (§4.10 "a client runtime
//! can manipulate a remote server's component graph as if it were local").
//!
//! Grounded on `hdds_xrce::proxy::ProxyBridge`'s role (a local stand-in for
//! state that actually lives across a transport boundary) and on
//! `hdds_xrce::transport::XrceTransport` for the byte-level send/recv split,
//! simplified from XRCE's addressed multi-peer transport to a single
//! ordered stream per connection (§4.10, §6.2) since each [`MirrorClient`]
//! owns exactly one session.
//!
//! Rather than reconstructing a full [`crate::component::Component`] tree
//! locally, the client keeps a lightweight per-path [`PropertyObject`]
//! cache: enough to read/write properties without duplicating the whole
//! component/folder/permission machinery on both ends of the wire.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::property::PropertyObject;
use crate::rpc::wire::{decode_frame, encode_frame, Frame, PROTOCOL_VERSION};
use crate::ser::TypeRegistry;
use crate::value::{Value, ValueDict};

/// Byte-level transport a [`MirrorClient`] drives synchronously. Mirrors
/// `hdds_xrce::transport::XrceTransport`'s `recv`/`send` split without the
/// peer-address bookkeeping a multiplexing agent needs.
pub trait Transport: Send {
    /// Sends the given bytes, blocking until fully written.
    fn send(&mut self, data: &[u8]) -> Result<()>;
    /// Reads at least one byte into `buf`, blocking until data arrives.
    /// Returns `0` only when the peer has closed the connection.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;
}

fn encode_value(value: &Value) -> Result<String> {
    crate::ser::serialize(value, crate::ser::CURRENT_VERSION)
}

fn decode_value(text: &str, registry: &TypeRegistry) -> Result<Value> {
    if text.is_empty() {
        return Ok(Value::Undefined);
    }
    crate::ser::deserialize(text, registry)
}

/// A synchronous client-side connection to an [`crate::rpc::RpcServer`]
/// (§4.10). One [`MirrorClient`] corresponds to one negotiated session.
pub struct MirrorClient {
    transport: Box<dyn Transport>,
    registry: TypeRegistry,
    buf: Vec<u8>,
    next_seq: AtomicU64,
    protocol_version: u32,
    pending_events: Mutex<VecDeque<Frame>>,
    property_cache: DashMap<Arc<str>, PropertyObject>,
}

impl MirrorClient {
    /// Performs the Hello handshake over `transport` and returns a ready
    /// client, or the rejection reason if the server refused the
    /// connection (§4.10 "Connection setup").
    pub fn connect(mut transport: Box<dyn Transport>, registry: TypeRegistry, username: Option<&str>, password: Option<&str>) -> Result<Self> {
        let hello = Frame::Hello {
            supported_versions: vec![PROTOCOL_VERSION],
            username: username.map(String::from),
            password: password.map(String::from),
            client_capabilities: vec![],
        };
        let bytes = encode_frame(&hello)?;
        transport.send(&bytes)?;

        let mut client = Self {
            transport,
            registry,
            buf: Vec::new(),
            next_seq: AtomicU64::new(1),
            protocol_version: 0,
            pending_events: Mutex::new(VecDeque::new()),
            property_cache: DashMap::new(),
        };
        match client.read_frame()? {
            Frame::HelloAck { version } => {
                client.protocol_version = version;
                Ok(client)
            }
            Frame::Reject { reason } => Err(Error::AccessDenied(reason)),
            other => Err(Error::InvalidState(format!("unexpected frame during handshake: {other:?}"))),
        }
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some((frame, consumed)) = decode_frame(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(frame);
            }
            let mut scratch = [0u8; 4096];
            let n = self.transport.recv(&mut scratch)?;
            if n == 0 {
                return Err(Error::InvalidState("transport closed by peer".to_string()));
            }
            self.buf.extend_from_slice(&scratch[..n]);
        }
    }

    /// Sends one request and blocks for its matching reply, queueing any
    /// `NotifyEvent`/`NotifyPacket` frames observed in the meantime for
    /// later retrieval via [`MirrorClient::poll_events`].
    pub fn call(&mut self, component_path: &str, command: &str, params: &Value) -> Result<Value> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let params_text = encode_value(params)?;
        let request = Frame::Request { seq, component_path: component_path.to_string(), command: command.to_string(), params: params_text };
        let bytes = encode_frame(&request)?;
        self.transport.send(&bytes)?;

        loop {
            match self.read_frame()? {
                Frame::Reply { seq: reply_seq, result, error } if reply_seq == seq => {
                    if let Some(err) = error {
                        return Err(err.into());
                    }
                    return decode_value(&result.unwrap_or_default(), &self.registry);
                }
                frame @ (Frame::NotifyEvent { .. } | Frame::NotifyPacket { .. }) => {
                    self.pending_events.lock().push_back(frame);
                }
                Frame::Close => return Err(Error::InvalidState("server closed the connection".to_string())),
                _ => {}
            }
        }
    }

    /// Drains queued notifications. Structural events invalidate the whole
    /// property cache rather than tracking per-path dependencies, trading
    /// some redundant re-fetching for a much simpler cache (see
    /// `DESIGN.md`).
    pub fn poll_events(&self) -> Vec<Frame> {
        let mut queue = self.pending_events.lock();
        if !queue.is_empty() {
            self.property_cache.clear();
        }
        queue.drain(..).collect()
    }

    pub fn get_property_value(&mut self, component_path: &str, name: &str) -> Result<Value> {
        self.call(component_path, "GetPropertyValue", &Value::from(name))
    }

    pub fn set_property_value(&mut self, component_path: &str, name: &str, value: Value) -> Result<bool> {
        let dict = ValueDict::new();
        dict.insert(Value::from("name"), Value::from(name))?;
        dict.insert(Value::from("value"), value)?;
        let result = self.call(component_path, "SetPropertyValue", &Value::Dict(dict))?;
        self.property_cache.remove(component_path);
        Ok(result.as_bool().unwrap_or(false))
    }

    pub fn call_property(&mut self, component_path: &str, name: &str, args: Vec<Value>) -> Result<Value> {
        let dict = ValueDict::new();
        dict.insert(Value::from("name"), Value::from(name))?;
        let arg_list = crate::value::ValueList::from_vec(args);
        dict.insert(Value::from("args"), Value::List(arg_list))?;
        self.call(component_path, "CallProperty", &Value::Dict(dict))
    }

    /// Fetches and caches the property snapshot of the component at
    /// `component_path`, mirroring just its reflective property set rather
    /// than reconstructing a full [`crate::component::Component`] locally.
    pub fn fetch_properties(&mut self, component_path: &str) -> Result<PropertyObject> {
        if let Some(cached) = self.property_cache.get(component_path) {
            return Ok(cached.value().clone());
        }
        let snapshot = self.call(component_path, "GetComponentConfig", &Value::Undefined)?;
        let Value::Dict(dict) = snapshot else {
            return Err(Error::InvalidValue("GetComponentConfig did not return a dictionary".to_string()));
        };
        let properties = PropertyObject::new();
        for (key, value) in dict.iter() {
            let name = key.as_str()?;
            properties.add_property(crate::property::Property::new(name, value.core_type(), value))?;
        }
        self.property_cache.insert(Arc::from(component_path), properties.clone());
        Ok(properties)
    }

    pub fn get_info(&mut self, component_path: &str) -> Result<Value> {
        self.call(component_path, "GetInfo", &Value::Undefined)
    }

    /// Pulls a full serialised subtree snapshot the way an initial-sync
    /// client would (§4.10 "a full serialisation of the device tree").
    pub fn serialize_for_update(&mut self, component_path: &str) -> Result<String> {
        let value = self.call(component_path, "SerializeForUpdate", &Value::Undefined)?;
        value.as_str().map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::context::Context;
    use crate::rpc::auth::AnonymousAuthenticator;
    use crate::rpc::server::RpcServer;
    use std::sync::mpsc::{Receiver, Sender};

    /// In-memory duplex byte pipe standing in for a socket, grounded on
    /// `hdds_xrce::transport::XrceTransport`'s blocking `recv`/`send` shape.
    struct PipeTransport {
        tx: Sender<Vec<u8>>,
        rx: Receiver<Vec<u8>>,
        leftover: Vec<u8>,
    }

    impl Transport for PipeTransport {
        fn send(&mut self, data: &[u8]) -> Result<()> {
            self.tx.send(data.to_vec()).map_err(|_| Error::InvalidState("peer gone".to_string()))
        }

        fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.leftover.is_empty() {
                self.leftover = self.rx.recv().map_err(|_| Error::InvalidState("peer gone".to_string()))?;
            }
            let n = self.leftover.len().min(buf.len());
            buf[..n].copy_from_slice(&self.leftover[..n]);
            self.leftover.drain(..n);
            Ok(n)
        }
    }

    fn make_pair() -> (PipeTransport, PipeTransport) {
        let (tx_a, rx_a) = std::sync::mpsc::channel();
        let (tx_b, rx_b) = std::sync::mpsc::channel();
        (
            PipeTransport { tx: tx_a, rx: rx_b, leftover: Vec::new() },
            PipeTransport { tx: tx_b, rx: rx_a, leftover: Vec::new() },
        )
    }

    #[test]
    fn client_reads_property_through_a_live_server() {
        let ctx = Context::new();
        let root = Component::new(ctx.clone(), "root");
        root.set_enabled(true);
        root.properties()
            .add_property(crate::property::Property::new("Gain", crate::value::CoreType::Float, Value::Float(1.0)))
            .unwrap();
        let server = Arc::new(RpcServer::new(ctx, root, TypeRegistry::new(), Arc::new(AnonymousAuthenticator::new("admin")), 4));

        let (client_side, server_side) = make_pair();
        let server_for_thread = server.clone();
        let handle = std::thread::spawn(move || {
            let mut transport = server_side;
            let mut buf = Vec::new();
            let mut scratch = [0u8; 4096];
            let mut session_id = None;
            loop {
                let frame = loop {
                    if let Some((frame, consumed)) = decode_frame(&buf).unwrap() {
                        buf.drain(..consumed);
                        break frame;
                    }
                    let n = transport.recv(&mut scratch).unwrap();
                    buf.extend_from_slice(&scratch[..n]);
                };
                match frame {
                    Frame::Hello { .. } => {
                        let (reply, session) = server_for_thread.handle_hello(&frame);
                        transport.send(&encode_frame(&reply).unwrap()).unwrap();
                        session_id = session.map(|s| s.session_id);
                        if session_id.is_none() {
                            return;
                        }
                    }
                    Frame::Request { .. } => {
                        let reply = server_for_thread.handle_request(session_id.unwrap(), &frame);
                        transport.send(&encode_frame(&reply).unwrap()).unwrap();
                        return;
                    }
                    _ => return,
                }
            }
        });

        let mut client = MirrorClient::connect(Box::new(client_side), TypeRegistry::new(), None, None).unwrap();
        let value = client.get_property_value("/", "Gain").unwrap();
        assert_eq!(value.as_float().unwrap(), 1.0);
        handle.join().unwrap();
    }
}
