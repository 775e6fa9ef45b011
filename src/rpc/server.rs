// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Server-side dispatch (§4.10 "Server dispatch", "Notifications").
//!
//! Grounded on `hdds-xrce::agent::XrceAgent::process_incoming`'s shape: a
//! pure function from one inbound frame to zero-or-more outbound frames,
//! with per-session state looked up by id rather than captured in a
//! connection-specific closure. Here the "bridge" XRCE forwards to is the
//! component tree itself rather than a second DDS implementation.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::component::{Component, PermissionMask};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::CoreEventArgs;
use crate::fb::FunctionBlock;
use crate::property::PropertyObject;
use crate::rpc::auth::Authenticator;
use crate::rpc::session::{RpcSession, SessionTable};
use crate::rpc::wire::{Frame, WireError, PROTOCOL_VERSION};
use crate::ser::TypeRegistry;
use crate::signal::{InputPort, Signal};
use crate::value::{Value, ValueDict, ValueList};

/// Required permission for each command name (§4.10 "every command
/// declares the permission subset it needs").
fn required_permission(command: &str) -> PermissionMask {
    match command {
        "GetPropertyValue" | "GetInfo" | "GetComponentConfig" | "SerializeForUpdate" | "GetTypeManager"
        | "GetAvailableFunctionBlockTypes" | "AcceptsSignal" => PermissionMask::READ,
        "SetPropertyValue" | "SetProtectedPropertyValue" | "ClearPropertyValue" | "BeginUpdate" | "EndUpdate"
        | "SetAttributeValue" | "Update" | "ConnectSignal" | "DisconnectSignal" => PermissionMask::READ_WRITE,
        "CallProperty" | "AddFunctionBlock" | "RemoveFunctionBlock" => PermissionMask::ALL,
        _ => PermissionMask::ALL,
    }
}

fn is_write_command(command: &str) -> bool {
    required_permission(command).write || required_permission(command).execute
}

/// Converts a value-kernel dictionary into a JSON-shaped params string and
/// back, so [`Frame::Request::params`]/[`Frame::Reply::result`] carry
/// value-kernel payloads rather than a second ad hoc shape (§4.10, §6.2).
fn encode_value(value: &Value) -> Result<String> {
    crate::ser::serialize(value, crate::ser::CURRENT_VERSION)
}

fn decode_value(text: &str, registry: &TypeRegistry) -> Result<Value> {
    if text.is_empty() {
        return Ok(Value::Undefined);
    }
    crate::ser::deserialize(text, registry)
}

fn params_list(params: &Value) -> Vec<Value> {
    match params {
        Value::List(l) => l.iter().collect(),
        Value::Undefined => Vec::new(),
        other => vec![other.clone()],
    }
}

fn params_dict_get(params: &Value, key: &str) -> Option<Value> {
    match params {
        Value::Dict(d) => d.get(&Value::from(key)),
        _ => None,
    }
}

/// Server side of the remote mirror protocol (§4.10). Holds the exposed
/// root component, a type registry for wire (de)serialisation, and indices
/// of function blocks/input ports/signals reachable by path (since a bare
/// [`Component`] doesn't retain which concrete wrapper type constructed it
/// — see `DESIGN.md`).
pub struct RpcServer {
    root: Component,
    ctx: Context,
    registry: TypeRegistry,
    sessions: SessionTable,
    authenticator: Arc<dyn Authenticator>,
    fb_index: DashMap<Arc<str>, FunctionBlock>,
    input_port_index: DashMap<Arc<str>, InputPort>,
    signal_index: DashMap<Arc<str>, Signal>,
    fb_types: DashMap<&'static str, Arc<dyn Fn(&Context) -> PropertyObject + Send + Sync>>,
    view_only_default: RwLock<bool>,
}

impl RpcServer {
    pub fn new(ctx: Context, root: Component, registry: TypeRegistry, authenticator: Arc<dyn Authenticator>, max_clients: usize) -> Self {
        Self {
            root,
            ctx,
            registry,
            sessions: SessionTable::new(max_clients),
            authenticator,
            fb_index: DashMap::new(),
            input_port_index: DashMap::new(),
            signal_index: DashMap::new(),
            fb_types: DashMap::new(),
            view_only_default: RwLock::new(false),
        }
    }

    pub fn set_view_only_default(&self, view_only: bool) {
        *self.view_only_default.write() = view_only;
    }

    /// Registers a function-block container reachable at `path`, so
    /// `AddFunctionBlock`/`RemoveFunctionBlock` requests targeting that path
    /// can find the typed handle (§4.10). Every container that can hold
    /// function blocks — including the root device, if it can — must be
    /// registered explicitly; bare path resolution only yields `Component`.
    pub fn register_function_block(&self, path: impl Into<Arc<str>>, fb: FunctionBlock) {
        self.fb_index.insert(path.into(), fb);
    }

    pub fn register_input_port(&self, path: impl Into<Arc<str>>, port: InputPort) {
        self.input_port_index.insert(path.into(), port);
    }

    pub fn register_signal(&self, path: impl Into<Arc<str>>, signal: Signal) {
        self.signal_index.insert(path.into(), signal);
    }

    /// Registers a function-block type available to `AddFunctionBlock` /
    /// `GetAvailableFunctionBlockTypes` (§4.10).
    pub fn register_function_block_type(&self, type_id: &'static str, default_config: impl Fn(&Context) -> PropertyObject + Send + Sync + 'static) {
        self.fb_types.insert(type_id, Arc::new(default_config));
    }

    fn resolve(&self, path: &str) -> Result<Component> {
        if path.is_empty() || path == "/" {
            return Ok(self.root.clone());
        }
        let mut current = self.root.clone();
        for segment in path.trim_start_matches('/').split('/') {
            if segment.is_empty() {
                continue;
            }
            current = current
                .children()
                .into_iter()
                .find(|c| &*c.local_id() == segment)
                .ok_or_else(|| Error::NotFound(format!("no component at '{path}'")))?;
        }
        Ok(current)
    }

    /// Handles a `Hello`, returning the `HelloAck`/`Reject` frame and,
    /// on success, the freshly created session (§4.10 "Connection setup").
    pub fn handle_hello(&self, frame: &Frame) -> (Frame, Option<Arc<RpcSession>>) {
        let Frame::Hello { supported_versions, username, password, .. } = frame else {
            return (Frame::Reject { reason: "expected Hello".to_string() }, None);
        };
        let version = *supported_versions.iter().filter(|v| **v <= PROTOCOL_VERSION).max().unwrap_or(&0);
        if version == 0 {
            return (Frame::Reject { reason: "no common protocol version".to_string() }, None);
        }
        match self.authenticator.authenticate(username.as_deref(), password.as_deref()) {
            Ok(role) => match self.sessions.create(role, version, *self.view_only_default.read()) {
                Ok(session) => (Frame::HelloAck { version }, Some(session)),
                Err(e) => (Frame::Reject { reason: e.to_string() }, None),
            },
            Err(e) => (Frame::Reject { reason: e.to_string() }, None),
        }
    }

    /// Dispatches one `Request` frame for an already-authenticated session,
    /// returning the matching `Reply` frame.
    pub fn handle_request(&self, session_id: u64, frame: &Frame) -> Frame {
        let Frame::Request { seq, component_path, command, params } = frame else {
            return Frame::Reply { seq: 0, result: None, error: Some(WireError { code: "InvalidParameter".to_string(), message: Some("expected Request".to_string()) }) };
        };
        let seq = *seq;
        match self.dispatch(session_id, component_path, command, params) {
            Ok(value) => match encode_value(&value) {
                Ok(text) => Frame::Reply { seq, result: Some(text), error: None },
                Err(e) => Frame::Reply { seq, result: None, error: Some((&e).into()) },
            },
            Err(e) => Frame::Reply { seq, result: None, error: Some((&e).into()) },
        }
    }

    fn dispatch(&self, session_id: u64, path: &str, command: &str, params: &str) -> Result<Value> {
        let session = self.sessions.get(session_id).ok_or_else(|| Error::InvalidState("unknown session".to_string()))?;
        let component = self.resolve(path)?;

        if is_write_command(command) {
            if session.view_only {
                return Err(Error::AccessDenied("connection is view-only".to_string()));
            }
            if component.is_locked() {
                return Err(Error::AccessDenied(format!("component '{path}' is locked")));
            }
        }
        let required = required_permission(command);
        if !component.effective_permission(&session.role).covers(required) {
            return Err(Error::AccessDenied(format!("role '{}' lacks permission for '{command}' on '{path}'", session.role)));
        }

        let params = decode_value(params, &self.registry)?;
        self.dispatch_command(path, &component, command, &params)
    }

    fn dispatch_command(&self, path: &str, component: &Component, command: &str, params: &Value) -> Result<Value> {
        match command {
            "GetPropertyValue" => {
                let prop = params.as_str()?;
                component.get_property_value(prop)
            }
            "SetPropertyValue" => {
                let prop = params_dict_get(params, "name").ok_or_else(|| Error::InvalidParameter("missing 'name'".to_string()))?;
                let value = params_dict_get(params, "value").ok_or_else(|| Error::InvalidParameter("missing 'value'".to_string()))?;
                let outcome = component.set_property_value(prop.as_str()?, value)?;
                Ok(Value::Bool(outcome.applied()))
            }
            "SetProtectedPropertyValue" => {
                let prop = params_dict_get(params, "name").ok_or_else(|| Error::InvalidParameter("missing 'name'".to_string()))?;
                let value = params_dict_get(params, "value").ok_or_else(|| Error::InvalidParameter("missing 'value'".to_string()))?;
                let outcome = component.properties().set_property_value_protected(prop.as_str()?, value)?;
                Ok(Value::Bool(outcome.applied()))
            }
            "ClearPropertyValue" => {
                let prop = params.as_str()?;
                component.properties().clear_property_value(prop)?;
                Ok(Value::Undefined)
            }
            "CallProperty" => {
                let name = params_dict_get(params, "name").ok_or_else(|| Error::InvalidParameter("missing 'name'".to_string()))?;
                let args = params_dict_get(params, "args").map(|v| params_list(&v)).unwrap_or_default();
                let result = component.properties().call_property(name.as_str()?, &args)?;
                Ok(result.unwrap_or(Value::Undefined))
            }
            "BeginUpdate" => {
                component.properties().begin_update();
                Ok(Value::Undefined)
            }
            "EndUpdate" => {
                component.properties().end_update()?;
                Ok(Value::Undefined)
            }
            "SetAttributeValue" => {
                let name = params_dict_get(params, "name").ok_or_else(|| Error::InvalidParameter("missing 'name'".to_string()))?;
                let value = params_dict_get(params, "value").ok_or_else(|| Error::InvalidParameter("missing 'value'".to_string()))?;
                set_attribute(component, name.as_str()?, value)
            }
            "Update" => {
                let text = params.as_str()?;
                let deserialised = crate::ser::deserialize(text, &self.registry)?;
                component.properties().set_remote_update(true);
                let result = apply_update_to_properties(component.properties(), &deserialised);
                component.properties().set_remote_update(false);
                result?;
                Ok(Value::Undefined)
            }
            "GetAvailableFunctionBlockTypes" => {
                let list = ValueList::new();
                for entry in self.fb_types.iter() {
                    list.push(Value::from(*entry.key()))?;
                }
                Ok(Value::List(list))
            }
            "AddFunctionBlock" => {
                let type_id = params_dict_get(params, "typeId").ok_or_else(|| Error::InvalidParameter("missing 'typeId'".to_string()))?;
                let local_id = params_dict_get(params, "localId").ok_or_else(|| Error::InvalidParameter("missing 'localId'".to_string()))?;
                let container = self
                    .fb_index
                    .get(path)
                    .map(|e| e.value().clone())
                    .ok_or_else(|| Error::NotFound(format!("no function block container at '{path}'")))?;
                let factory = self
                    .fb_types
                    .get(type_id.as_str()?)
                    .ok_or_else(|| Error::NotFound(format!("no function block type '{}'", type_id.as_str()?)))?;
                let default_config = factory.value()(&self.ctx);
                let fb = FunctionBlock::new(self.ctx.clone(), local_id.as_str()?.to_string(), default_config, None)?;
                container.add_function_block(fb.clone())?;
                let fb_path = format!("{path}/{}", local_id.as_str()?);
                self.fb_index.insert(Arc::from(fb_path.as_str()), fb);
                Ok(Value::Object(Arc::from(fb_path.as_str())))
            }
            "RemoveFunctionBlock" => {
                let local_id = params.as_str()?;
                let container = self
                    .fb_index
                    .get(path)
                    .map(|e| e.value().clone())
                    .ok_or_else(|| Error::NotFound(format!("no function block container at '{path}'")))?;
                container.remove_function_block(local_id)?;
                self.fb_index.remove(&format!("{path}/{local_id}") as &str);
                Ok(Value::Undefined)
            }
            "ConnectSignal" => {
                let signal_path = params.as_str()?;
                let port = self
                    .input_port_index
                    .get(path)
                    .map(|e| e.value().clone())
                    .ok_or_else(|| Error::NotFound(format!("no input port at '{path}'")))?;
                let signal = self
                    .signal_index
                    .get(signal_path)
                    .map(|e| e.value().clone())
                    .ok_or_else(|| Error::NotFound(format!("no signal at '{signal_path}'")))?;
                let outcome = port.connect(&signal)?;
                Ok(Value::Bool(outcome.applied()))
            }
            "DisconnectSignal" => {
                let port = self
                    .input_port_index
                    .get(path)
                    .map(|e| e.value().clone())
                    .ok_or_else(|| Error::NotFound(format!("no input port at '{path}'")))?;
                let outcome = port.disconnect()?;
                Ok(Value::Bool(outcome.applied()))
            }
            "AcceptsSignal" => {
                let port = self.input_port_index.get(path).map(|e| e.value().clone());
                Ok(Value::Bool(port.map(|p| !p.is_connected()).unwrap_or(false)))
            }
            "GetInfo" => Ok(component_info(component)),
            "GetComponentConfig" => Ok(properties_to_dict(component.properties())),
            "SerializeForUpdate" => {
                let value = component_to_value(component);
                let text = crate::ser::serialize_root(&value, "Component", crate::ser::CURRENT_VERSION)?;
                Ok(Value::from(text))
            }
            "GetTypeManager" => {
                let class_name = params.as_str()?;
                let props = self.ctx.types.resolve_properties(class_name)?;
                let list = ValueList::new();
                for p in props {
                    list.push(Value::from(&*p.name))?;
                }
                Ok(Value::List(list))
            }
            other => Err(Error::NotSupported(format!("unknown command '{other}'"))),
        }
    }

    /// Taps the shared event bus, forwarding every event to every
    /// connected session (§4.10 "Notifications"). Returns the frames to
    /// send; the caller decides how to push them onto each session's
    /// transport.
    pub fn events_to_notify(&self, event: &CoreEventArgs) -> Result<Vec<(u64, Frame)>> {
        let dict = ValueDict::new();
        dict.insert(Value::from("id"), Value::Int(event.id.wire_id() as i64))?;
        dict.insert(Value::from("sender"), Value::from(&*event.sender_global_id))?;
        dict.insert(Value::from("params"), Value::Dict(event.params.clone()))?;
        let text = crate::ser::serialize(&Value::Dict(dict), crate::ser::CURRENT_VERSION)?;
        Ok(self.sessions.all().iter().map(|s| (s.session_id, Frame::NotifyEvent { event: text.clone() })).collect())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn close_session(&self, session_id: u64) {
        self.sessions.remove(session_id);
    }
}

fn set_attribute(component: &Component, name: &str, value: Value) -> Result<Value> {
    match name {
        "Name" => component.set_name(value.as_str()?.to_string()),
        "Description" => component.set_description(value.as_str()?.to_string()),
        "Active" => component.set_active(value.as_bool()?),
        "Visible" => component.set_visible(value.as_bool()?),
        other => return Err(Error::InvalidProperty(format!("'{other}' is not a settable attribute"))),
    }
    Ok(Value::Undefined)
}

fn component_info(component: &Component) -> Value {
    let dict = ValueDict::new();
    let _ = dict.insert(Value::from("Name"), Value::from(&*component.name()));
    let _ = dict.insert(Value::from("GlobalId"), component.global_id().map(|g| Value::from(&*g)).unwrap_or(Value::Undefined));
    let _ = dict.insert(Value::from("Active"), Value::Bool(component.active()));
    let _ = dict.insert(Value::from("Visible"), Value::Bool(component.visible()));
    let _ = dict.insert(Value::from("Locked"), Value::Bool(component.is_locked()));
    let _ = dict.insert(Value::from("Tags"), Value::List(component.tags()));
    Value::Dict(dict)
}

fn properties_to_dict(properties: &PropertyObject) -> Value {
    let dict = ValueDict::new();
    for name in properties.property_names() {
        let value = properties.get_property_value(&name).unwrap_or(Value::Undefined);
        let _ = dict.insert(Value::from(&*name), value);
    }
    Value::Dict(dict)
}

/// Builds a serialisable snapshot of a component subtree: its properties
/// plus nested children (§4.10 "a full serialisation of the device tree").
fn component_to_value(component: &Component) -> Value {
    let dict = ValueDict::new();
    let _ = dict.insert(Value::from("localId"), Value::from(&*component.local_id()));
    let _ = dict.insert(Value::from("properties"), properties_to_dict(component.properties()));
    let children = ValueList::new();
    for child in component.children() {
        let _ = children.push(component_to_value(&child));
    }
    let _ = dict.insert(Value::from("children"), Value::List(children));
    Value::Dict(dict)
}

/// Applies a deserialised property snapshot onto `target` (§4.10 "Update",
/// §7 "a deserialisation mismatch inside an `Update` leaves the target
/// unchanged"): every property write is validated before any of them are
/// applied.
fn apply_update_to_properties(target: &PropertyObject, value: &Value) -> Result<()> {
    let Value::Dict(dict) = value else {
        return Err(Error::InvalidValue("Update payload must be a dictionary".to_string()));
    };
    let properties = dict
        .get(&Value::from("properties"))
        .ok_or_else(|| Error::InvalidValue("Update payload missing 'properties'".to_string()))?;
    let Value::Dict(properties) = properties else {
        return Err(Error::InvalidValue("'properties' must be a dictionary".to_string()));
    };
    for (key, value) in properties.iter() {
        let name = key.as_str()?;
        if target.get_property_value(name).is_err() {
            return Err(Error::InvalidValue(format!("unknown property '{name}' in Update payload")));
        }
    }
    target.begin_update();
    for (key, value) in properties.iter() {
        target.set_property_value(key.as_str()?, value)?;
    }
    target.end_update()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::auth::AnonymousAuthenticator;

    fn make_server() -> (RpcServer, Component) {
        let ctx = Context::new();
        let root = Component::new(ctx.clone(), "root");
        root.set_enabled(true);
        let server = RpcServer::new(ctx, root.clone(), TypeRegistry::new(), Arc::new(AnonymousAuthenticator::new("admin")), 8);
        (server, root)
    }

    #[test]
    fn hello_negotiates_highest_common_version() {
        let (server, _root) = make_server();
        let hello = Frame::Hello { supported_versions: vec![0, 1], username: None, password: None, client_capabilities: vec![] };
        let (reply, session) = server.handle_hello(&hello);
        assert!(matches!(reply, Frame::HelloAck { version: 1 }));
        assert!(session.is_some());
    }

    #[test]
    fn get_info_round_trips_through_dispatch() {
        let (server, root) = make_server();
        let hello = Frame::Hello { supported_versions: vec![1], username: None, password: None, client_capabilities: vec![] };
        let (_reply, session) = server.handle_hello(&hello);
        let session = session.unwrap();
        root.set_name("Root Device");

        let request = Frame::Request { seq: 1, component_path: "/".to_string(), command: "GetInfo".to_string(), params: "null".to_string() };
        let reply = server.handle_request(session.session_id, &request);
        let Frame::Reply { result: Some(text), error: None, .. } = reply else { panic!("expected successful reply") };
        assert!(text.contains("Root Device"));
    }

    #[test]
    fn write_denied_on_view_only_session() {
        let (server, root) = make_server();
        server.set_view_only_default(true);
        let hello = Frame::Hello { supported_versions: vec![1], username: None, password: None, client_capabilities: vec![] };
        let (_reply, session) = server.handle_hello(&hello);
        let session = session.unwrap();
        root.properties().add_property(crate::property::Property::new("X", crate::value::CoreType::Int, Value::Int(0))).unwrap();

        let params = ValueDict::new();
        params.insert(Value::from("name"), Value::from("X")).unwrap();
        params.insert(Value::from("value"), Value::Int(5)).unwrap();
        let request = Frame::Request {
            seq: 2,
            component_path: "/".to_string(),
            command: "SetPropertyValue".to_string(),
            params: encode_value(&Value::Dict(params)).unwrap(),
        };
        let reply = server.handle_request(session.session_id, &request);
        let Frame::Reply { error: Some(err), .. } = reply else { panic!("expected an error reply") };
        assert_eq!(err.code, "AccessDenied");
    }
}
