// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Function-block runtime (§3.5, §4.8): a function block is a property
//! object plus `InputPorts`/`Signals`/`FunctionBlocks` subfolders and a
//! typed configuration object. Whenever any of its input ports is
//! notified, it may drain connections and re-emit on its own signals.
//!
//! Grounded on `hdds::engine::subscriber`'s callback-trait shape
//! (`Subscriber::on_data`) generalised from "one topic" to "one or more
//! input ports feeding one handler".

pub mod averager;

use std::sync::Arc;

use crate::component::{Component, Folder, ItemRef, SearchFilter};
use crate::context::Context;
use crate::error::{Error, Outcome, Result};
use crate::property::PropertyObject;
use crate::signal::{InputPort, NotificationMode, PortListener, Signal};

/// Implemented by a concrete function block's logic (§4.8: "the block's
/// `onPacketReceived`"). Receives the port that was notified; the
/// implementation is expected to drain that port's connection (and any
/// others it cares about) under its own synchronization.
pub trait FunctionBlockHandler: Send + Sync {
    fn on_packet_received(&self, fb: &FunctionBlock, port: &InputPort);
}

/// Supplies the default configuration property object for a function-block
/// type, the way the original's module manager hands a type id to a
/// factory (§4.8: "The type supplies a default-config property object").
pub trait FunctionBlockType {
    fn type_id(&self) -> &'static str;
    fn default_config(&self, ctx: &Context) -> PropertyObject;
}

struct FbPortListener {
    fb: std::sync::Weak<FbState>,
    handler: Arc<dyn FunctionBlockHandler>,
}

impl PortListener for FbPortListener {
    fn connected(&self, _port: &InputPort) {}
    fn disconnected(&self, _port: &InputPort) {}
    fn packet_ready(&self, port: &InputPort) {
        if let Some(state) = self.fb.upgrade() {
            self.handler.on_packet_received(&FunctionBlock(state), port);
        }
    }
}

pub(crate) struct FbState {
    component: Component,
    input_ports: Folder,
    signals: Folder,
    nested_fbs: Folder,
    /// Typed view of `nested_fbs`'s children, kept alongside the folder so
    /// `get_signals`/`get_function_blocks`/`get_input_ports` can recurse
    /// through nested blocks' own typed folders (§4.8) instead of
    /// reconstructing a `FunctionBlock` from a bare `Component`.
    nested: parking_lot::RwLock<Vec<FunctionBlock>>,
    config: PropertyObject,
    handler: parking_lot::RwLock<Option<Arc<dyn FunctionBlockHandler>>>,
}

/// Property object + `InputPorts`/`Signals`/nested-`FunctionBlocks` folders
/// (§3.5, §4.8). Cheap to clone: an `Arc` handle, same as [`Component`].
#[derive(Clone)]
pub struct FunctionBlock(pub(crate) Arc<FbState>);

impl FunctionBlock {
    /// Constructs a detached function block. `user_config` overlays the
    /// type's default config property-by-property for recognised names
    /// only (§4.8, §9: "unknown keys are errors, not silently ignored").
    pub fn new(
        ctx: Context,
        local_id: impl Into<Arc<str>>,
        default_config: PropertyObject,
        user_config: Option<&PropertyObject>,
    ) -> Result<Self> {
        let local_id = local_id.into();
        let component = Component::new(ctx.clone(), local_id.clone());
        let input_ports = Folder::new(ctx.clone(), "IP", Some("IInputPort"));
        let signals = Folder::new(ctx.clone(), "Sig", Some("ISignal"));
        let nested_fbs = Folder::new(ctx.clone(), "FB", Some("IFunctionBlock"));

        input_ports.as_component().attach(&component);
        signals.as_component().attach(&component);
        nested_fbs.as_component().attach(&component);

        if let Some(overlay) = user_config {
            for name in overlay.property_names() {
                if default_config.property_names().iter().any(|n| n == &name) {
                    let value = overlay.get_property_value(&name)?;
                    default_config.set_property_value_protected(&name, value)?;
                } else {
                    return Err(Error::InvalidProperty(format!(
                        "function block '{local_id}' has no recognised config property '{name}'"
                    )));
                }
            }
        }

        Ok(Self(Arc::new(FbState {
            component,
            input_ports,
            signals,
            nested_fbs,
            nested: parking_lot::RwLock::new(Vec::new()),
            config: default_config,
            handler: parking_lot::RwLock::new(None),
        })))
    }

    pub fn as_component(&self) -> &Component {
        &self.0.component
    }

    pub fn config(&self) -> &PropertyObject {
        &self.0.config
    }

    /// Installs the handler whose `on_packet_received` fires whenever any
    /// input port created through [`Self::create_input_port`] is notified.
    pub fn set_handler(&self, handler: Arc<dyn FunctionBlockHandler>) {
        *self.0.handler.write() = Some(handler);
    }

    /// Creates and attaches a new input port under the `IP` folder, wired
    /// so packet-ready notifications reach this block's handler (§4.8).
    pub fn create_input_port(&self, local_id: impl Into<Arc<str>>, mode: NotificationMode) -> Result<InputPort> {
        let handler = self.0.handler.read().clone().ok_or_else(|| {
            Error::InvalidState("function block has no handler installed before creating input ports".to_string())
        })?;
        let port = InputPort::new(self.0.component.context().clone(), local_id, mode);
        port.set_listener(Arc::new(FbPortListener { fb: Arc::downgrade(&self.0), handler }));
        self.0.input_ports.add(port.as_component().clone())?;
        Ok(port)
    }

    /// Creates and attaches a new output signal under the `Sig` folder.
    pub fn create_signal(&self, local_id: impl Into<Arc<str>>) -> Result<Signal> {
        let signal = Signal::new(self.0.component.context().clone(), local_id);
        self.0.signals.add(signal.as_component().clone())?;
        Ok(signal)
    }

    /// Attaches an already-constructed nested function block under `FB`.
    pub fn add_function_block(&self, child: FunctionBlock) -> Result<Outcome> {
        let outcome = self.0.nested_fbs.add(child.0.component.clone())?;
        if outcome.applied() {
            self.0.nested.write().push(child);
        }
        Ok(outcome)
    }

    pub fn remove_function_block(&self, local_id: &str) -> Result<Component> {
        let removed = self.0.nested_fbs.remove_item(ItemRef::LocalId(local_id))?;
        self.0.nested.write().retain(|fb| &*fb.0.component.local_id() != local_id);
        Ok(removed)
    }

    /// Local input ports, descending into nested function blocks when
    /// `filter` is [`SearchFilter::Recursive`] (§4.8).
    pub fn input_ports(&self, filter: &SearchFilter) -> Vec<Component> {
        self.collect_recursive(filter, &|fb| fb.0.input_ports.items(filter.inner()))
    }

    /// Local output signals, descending into nested function blocks when
    /// `filter` is [`SearchFilter::Recursive`] (§4.8: "searches local
    /// signals and ... descends into nested blocks").
    pub fn signals(&self, filter: &SearchFilter) -> Vec<Component> {
        self.collect_recursive(filter, &|fb| fb.0.signals.items(filter.inner()))
    }

    /// Nested function blocks, recursing the same way (§4.8: "same pattern
    /// for `getFunctionBlocks`").
    pub fn function_blocks(&self, filter: &SearchFilter) -> Vec<Component> {
        self.collect_recursive(filter, &|fb| fb.0.nested_fbs.items(filter.inner()))
    }

    /// Shared recursion for `input_ports`/`signals`/`function_blocks`:
    /// collects this block's own items via `local`, then descends into
    /// nested blocks when `filter` carries [`SearchFilter::Recursive`].
    /// `local` is a `dyn` reference (rather than `impl Fn`) so the
    /// recursive call below doesn't grow a new generic instantiation per
    /// nesting level.
    fn collect_recursive(&self, filter: &SearchFilter, local: &dyn Fn(&FunctionBlock) -> Vec<Component>) -> Vec<Component> {
        let mut out = local(self);
        if filter.is_recursive() {
            for nested in self.0.nested.read().iter() {
                out.extend(nested.collect_recursive(filter, local));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::packet::{DataPacket, SamplePayload};
    use crate::signal::{DataDescriptorBuilder, DataRule, SampleType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoHandler(Arc<AtomicUsize>);
    impl FunctionBlockHandler for EchoHandler {
        fn on_packet_received(&self, _fb: &FunctionBlock, port: &InputPort) {
            while let Some(packet) = port.connection().pop() {
                if packet.as_data().is_some() {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    #[test]
    fn packet_received_dispatches_to_handler() {
        let ctx = Context::new();
        let fb = FunctionBlock::new(ctx.clone(), "fb0", PropertyObject::new(), None).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        fb.set_handler(Arc::new(EchoHandler(seen.clone())));
        let port = fb.create_input_port("ip0", NotificationMode::SameThread).unwrap();

        let signal = Signal::new(ctx, "src");
        let d = DataDescriptorBuilder::new(SampleType::Float64).with_rule(DataRule::Explicit).build();
        signal.set_descriptor(d.clone());
        port.connect(&signal).unwrap();

        signal.send_packet(DataPacket::new(d, 4, 0, None, SamplePayload::Null).unwrap()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unrecognised_config_key_is_rejected() {
        let ctx = Context::new();
        let default = PropertyObject::new();
        default
            .add_property(crate::property::Property::new("BlockSize", crate::value::CoreType::Int, crate::value::Value::Int(10)))
            .unwrap();
        let overlay = PropertyObject::new();
        overlay.add_property(crate::property::Property::new("Bogus", crate::value::CoreType::Int, crate::value::Value::Int(1))).unwrap();
        overlay.set_property_value("Bogus", crate::value::Value::Int(2)).unwrap();

        let err = FunctionBlock::new(ctx, "fb0", default, Some(&overlay)).unwrap_err();
        assert!(matches!(err, Error::InvalidProperty(_)));
    }
}
