// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Data descriptors (§3.2): immutable, freezable metadata describing the
//! shape and semantics of a signal's samples. Built through
//! [`DataDescriptorBuilder`] the way the original's `DataDescriptorBuilder`
//! works (see `modules/ref_fb_module/src/statistics_fb_impl.cpp`'s
//! `DataDescriptorBuilderCopy(...).setName(...).build()` chains).

use std::sync::Arc;

use crate::value::{Value, ValueDict};

/// Sample type closed set (§3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    ComplexFloat32,
    ComplexFloat64,
    RangeInt64,
    Struct,
    String,
    Binary,
    Undefined,
}

impl SampleType {
    /// Raw per-sample byte size; zero for variable-size/struct types, which
    /// carry their own framing.
    pub fn raw_size(self) -> usize {
        match self {
            SampleType::Int8 | SampleType::UInt8 => 1,
            SampleType::Int16 | SampleType::UInt16 => 2,
            SampleType::Int32 | SampleType::UInt32 | SampleType::Float32 => 4,
            SampleType::Int64 | SampleType::UInt64 | SampleType::Float64 | SampleType::ComplexFloat32 => 8,
            SampleType::ComplexFloat64 | SampleType::RangeInt64 => 16,
            SampleType::Struct | SampleType::String | SampleType::Binary | SampleType::Undefined => 0,
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, SampleType::Struct | SampleType::String | SampleType::Binary | SampleType::Undefined)
    }
}

/// Domain/value generation rule (§3.2).
#[derive(Debug, Clone, PartialEq)]
pub enum DataRule {
    /// Every sample's domain/value is carried explicitly in the packet.
    Explicit,
    /// Samples are generated from `start + k * delta` for sample index `k`,
    /// relative to the packet's offset.
    Linear { start: i64, delta: i64 },
    /// A single value repeats, save for the explicit `(position, value)`
    /// overrides a `DataPacket` may carry.
    Constant,
}

/// Optional post-acquisition scaling from a raw input sample type to the
/// descriptor's declared (output) sample type.
#[derive(Debug, Clone, PartialEq)]
pub struct PostScaling {
    pub input_sample_type: SampleType,
    pub scale: f64,
    pub offset: f64,
}

/// Immutable, freezable packet-shape metadata (§3.2). Always constructed
/// through [`DataDescriptorBuilder::build`], which returns it already
/// wrapped in `Arc` since descriptors are shared, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDescriptor {
    pub sample_type: SampleType,
    pub post_scaling: Option<PostScaling>,
    pub rule: DataRule,
    /// Empty = scalar; one entry = fixed-size vector (§3.2: "0 = scalar,
    /// 1 = vector of fixed size").
    pub dimensions: Vec<usize>,
    pub unit: Option<Arc<str>>,
    pub value_range: Option<(Value, Value)>,
    pub name: Option<Arc<str>>,
    pub metadata: ValueDict,
}

impl DataDescriptor {
    /// Per-sample byte size as actually laid out on the wire: the *input*
    /// sample type when post-scaling is present (scaling happens after
    /// reading the raw bytes), otherwise the declared sample type (§3.2).
    pub fn raw_sample_size(&self) -> usize {
        match &self.post_scaling {
            Some(ps) => ps.input_sample_type.raw_size(),
            None => self.sample_type.raw_size(),
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Value-kernel view of this descriptor, used as the `DataDescriptor`
    /// core-event parameter (§4.6) and as the RPC wire representation.
    pub fn to_value(&self) -> Value {
        let fields = ValueDict::new();
        let _ = fields.insert(Value::from("sampleType"), Value::from(format!("{:?}", self.sample_type)));
        let _ = fields.insert(
            Value::from("rule"),
            Value::from(match &self.rule {
                DataRule::Explicit => "Explicit".to_string(),
                DataRule::Linear { start, delta } => format!("Linear(start={start},delta={delta})"),
                DataRule::Constant => "Constant".to_string(),
            }),
        );
        let dims = crate::value::ValueList::new();
        for d in &self.dimensions {
            let _ = dims.push(Value::Int(*d as i64));
        }
        let _ = fields.insert(Value::from("dimensions"), Value::List(dims));
        if let Some(unit) = &self.unit {
            let _ = fields.insert(Value::from("unit"), Value::from(&**unit));
        }
        if let Some(name) = &self.name {
            let _ = fields.insert(Value::from("name"), Value::from(&**name));
        }
        Value::Struct(crate::value::ValueStruct { type_name: Arc::from("DataDescriptor"), fields })
    }
}

/// Builds a [`DataDescriptor`]. Every setter consumes and returns `self`,
/// matching the teacher repo's QoS/endpoint builder style
/// (`dds/writer/builder.rs`).
#[derive(Debug, Clone)]
pub struct DataDescriptorBuilder {
    sample_type: SampleType,
    post_scaling: Option<PostScaling>,
    rule: DataRule,
    dimensions: Vec<usize>,
    unit: Option<Arc<str>>,
    value_range: Option<(Value, Value)>,
    name: Option<Arc<str>>,
    metadata: ValueDict,
}

impl DataDescriptorBuilder {
    pub fn new(sample_type: SampleType) -> Self {
        Self {
            sample_type,
            post_scaling: None,
            rule: DataRule::Explicit,
            dimensions: Vec::new(),
            unit: None,
            value_range: None,
            name: None,
            metadata: ValueDict::new(),
        }
    }

    /// Starts a new builder copying every field of an existing descriptor,
    /// the way `DataDescriptorBuilderCopy(descriptor)` does in the original.
    pub fn copy_of(descriptor: &DataDescriptor) -> Self {
        Self {
            sample_type: descriptor.sample_type,
            post_scaling: descriptor.post_scaling.clone(),
            rule: descriptor.rule.clone(),
            dimensions: descriptor.dimensions.clone(),
            unit: descriptor.unit.clone(),
            value_range: descriptor.value_range.clone(),
            name: descriptor.name.clone(),
            metadata: descriptor.metadata.deep_clone(),
        }
    }

    pub fn with_rule(mut self, rule: DataRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_post_scaling(mut self, scaling: Option<PostScaling>) -> Self {
        self.post_scaling = scaling;
        self
    }

    pub fn with_dimensions(mut self, dimensions: Vec<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<Arc<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_value_range(mut self, low: Value, high: Value) -> Self {
        self.value_range = Some((low, high));
        self
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    pub fn build(self) -> Arc<DataDescriptor> {
        Arc::new(DataDescriptor {
            sample_type: self.sample_type,
            post_scaling: self.post_scaling,
            rule: self.rule,
            dimensions: self.dimensions,
            unit: self.unit,
            value_range: self.value_range,
            name: self.name,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_sample_size_uses_input_type_under_post_scaling() {
        let d = DataDescriptorBuilder::new(SampleType::Float64)
            .with_post_scaling(Some(PostScaling { input_sample_type: SampleType::Int16, scale: 1.0, offset: 0.0 }))
            .build();
        assert_eq!(d.raw_sample_size(), 2);
    }

    #[test]
    fn raw_sample_size_without_post_scaling_uses_declared_type() {
        let d = DataDescriptorBuilder::new(SampleType::Float64).build();
        assert_eq!(d.raw_sample_size(), 8);
    }

    #[test]
    fn copy_of_preserves_rule_and_name() {
        let src = DataDescriptorBuilder::new(SampleType::Int64)
            .with_rule(DataRule::Linear { start: 0, delta: 10 })
            .with_name("Domain")
            .build();
        let copy = DataDescriptorBuilder::copy_of(&src).with_name("Domain2").build();
        assert_eq!(copy.rule, DataRule::Linear { start: 0, delta: 10 });
        assert_eq!(copy.name.as_deref(), Some("Domain2"));
    }

    #[test]
    fn to_value_carries_rule_and_dimensions() {
        let d = DataDescriptorBuilder::new(SampleType::Float64)
            .with_rule(DataRule::Linear { start: 0, delta: 5 })
            .with_dimensions(vec![4])
            .build();
        match d.to_value() {
            Value::Struct(s) => {
                assert_eq!(&*s.type_name, "DataDescriptor");
                assert!(s.fields.get(&Value::from("rule")).unwrap().equals(&Value::from("Linear(start=0,delta=5)")));
            }
            other => panic!("expected struct, got {other:?}"),
        }
    }
}
