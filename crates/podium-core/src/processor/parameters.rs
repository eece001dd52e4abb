//! Parameter and property model
//!
//! Every parameter stores two values in lock-free cells: the **domain**
//! value (what the user set, in the parameter's own units) and the
//! **processed** value (after the pre-processor, what the DSP reads).
//! Normalized `[0, 1]` values map linearly onto the domain range, so
//! `normalized * (max - min) + min == domain` holds for every parameter
//! regardless of its pre-processor.
//!
//! The audio thread writes cells while control threads read them; both
//! sides go through atomics, so no locks exist on either path. String and
//! data properties are the exception: their values live behind mutexes and
//! are only touched from non-RT threads.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ProcessorError, ProcessorResult};
use crate::types::{next_object_id, ObjectId};

/// Kind tag of a registered parameter or property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Bool,
    Int,
    Float,
    String,
    Data,
}

/// Static description of a parameter: identity, kind and domain range.
#[derive(Debug)]
pub struct ParameterDescriptor {
    id: ObjectId,
    name: String,
    label: String,
    unit: String,
    kind: ParameterKind,
    min_domain: f32,
    max_domain: f32,
}

impl ParameterDescriptor {
    fn new(
        name: &str,
        label: &str,
        unit: &str,
        kind: ParameterKind,
        min_domain: f32,
        max_domain: f32,
    ) -> Self {
        Self {
            id: next_object_id(),
            name: name.to_string(),
            label: label.to_string(),
            unit: unit.to_string(),
            kind,
            min_domain,
            max_domain,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    pub fn min_domain(&self) -> f32 {
        self.min_domain
    }

    pub fn max_domain(&self) -> f32 {
        self.max_domain
    }

    /// Linear normalized -> domain mapping.
    pub fn to_domain(&self, normalized: f32) -> f32 {
        self.min_domain + normalized.clamp(0.0, 1.0) * (self.max_domain - self.min_domain)
    }

    /// Linear domain -> normalized mapping.
    pub fn to_normalized(&self, domain: f32) -> f32 {
        if self.max_domain == self.min_domain {
            0.0
        } else {
            ((domain - self.min_domain) / (self.max_domain - self.min_domain)).clamp(0.0, 1.0)
        }
    }
}

/// Mapping from the stored domain value to the value the DSP consumes.
#[derive(Debug, Clone, Copy, Default)]
pub enum FloatPreProcessor {
    /// Processed value equals the domain value
    Identity,
    /// Domain value clamped to the descriptor range
    #[default]
    Clamp,
    /// Domain value interpreted as decibels, converted to linear gain
    DbToLinear,
}

impl FloatPreProcessor {
    pub fn process(&self, domain: f32, min: f32, max: f32) -> f32 {
        match self {
            FloatPreProcessor::Identity => domain,
            FloatPreProcessor::Clamp => domain.clamp(min, max),
            FloatPreProcessor::DbToLinear => {
                10.0_f32.powf(domain.clamp(min, max) / 20.0)
            }
        }
    }
}

/// Runtime storage for a float parameter.
#[derive(Debug)]
pub struct FloatParameterValue {
    descriptor: Arc<ParameterDescriptor>,
    pre_processor: FloatPreProcessor,
    domain_bits: AtomicU32,
    processed_bits: AtomicU32,
}

impl FloatParameterValue {
    fn new(descriptor: Arc<ParameterDescriptor>, pre_processor: FloatPreProcessor, default_domain: f32) -> Self {
        let value = Self {
            descriptor,
            pre_processor,
            domain_bits: AtomicU32::new(0),
            processed_bits: AtomicU32::new(0),
        };
        value.set_domain(default_domain);
        value
    }

    pub fn descriptor(&self) -> &Arc<ParameterDescriptor> {
        &self.descriptor
    }

    pub fn set_domain(&self, domain: f32) {
        let descriptor = &self.descriptor;
        let processed =
            self.pre_processor.process(domain, descriptor.min_domain(), descriptor.max_domain());
        self.domain_bits.store(domain.to_bits(), Ordering::Relaxed);
        self.processed_bits.store(processed.to_bits(), Ordering::Relaxed);
    }

    pub fn set_normalized(&self, normalized: f32) {
        self.set_domain(self.descriptor.to_domain(normalized));
    }

    pub fn domain_value(&self) -> f32 {
        f32::from_bits(self.domain_bits.load(Ordering::Relaxed))
    }

    pub fn normalized_value(&self) -> f32 {
        self.descriptor.to_normalized(self.domain_value())
    }

    /// Value after the pre-processor; what audio code reads.
    pub fn processed_value(&self) -> f32 {
        f32::from_bits(self.processed_bits.load(Ordering::Relaxed))
    }
}

/// Runtime storage for an integer parameter. The processed value is the
/// domain value clamped to the descriptor range.
#[derive(Debug)]
pub struct IntParameterValue {
    descriptor: Arc<ParameterDescriptor>,
    domain: AtomicI32,
}

impl IntParameterValue {
    fn new(descriptor: Arc<ParameterDescriptor>, default: i32) -> Self {
        let value = Self { descriptor, domain: AtomicI32::new(0) };
        value.set_domain(default);
        value
    }

    pub fn descriptor(&self) -> &Arc<ParameterDescriptor> {
        &self.descriptor
    }

    pub fn set_domain(&self, domain: i32) {
        let min = self.descriptor.min_domain() as i32;
        let max = self.descriptor.max_domain() as i32;
        self.domain.store(domain.clamp(min, max), Ordering::Relaxed);
    }

    pub fn set_normalized(&self, normalized: f32) {
        self.set_domain(self.descriptor.to_domain(normalized).round() as i32);
    }

    pub fn domain_value(&self) -> i32 {
        self.domain.load(Ordering::Relaxed)
    }

    pub fn normalized_value(&self) -> f32 {
        self.descriptor.to_normalized(self.domain_value() as f32)
    }

    pub fn processed_value(&self) -> i32 {
        self.domain_value()
    }
}

/// Runtime storage for a boolean parameter.
#[derive(Debug)]
pub struct BoolParameterValue {
    descriptor: Arc<ParameterDescriptor>,
    value: AtomicBool,
}

impl BoolParameterValue {
    fn new(descriptor: Arc<ParameterDescriptor>, default: bool) -> Self {
        Self { descriptor, value: AtomicBool::new(default) }
    }

    pub fn descriptor(&self) -> &Arc<ParameterDescriptor> {
        &self.descriptor
    }

    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn set_normalized(&self, normalized: f32) {
        self.set(normalized > 0.5);
    }

    pub fn value(&self) -> bool {
        self.value.load(Ordering::Relaxed)
    }

    pub fn normalized_value(&self) -> f32 {
        if self.value() {
            1.0
        } else {
            0.0
        }
    }
}

/// Runtime storage for a string property. Non-RT only.
#[derive(Debug)]
pub struct StringPropertyValue {
    descriptor: Arc<ParameterDescriptor>,
    value: Mutex<String>,
}

impl StringPropertyValue {
    fn new(descriptor: Arc<ParameterDescriptor>, default: &str) -> Self {
        Self { descriptor, value: Mutex::new(default.to_string()) }
    }

    pub fn descriptor(&self) -> &Arc<ParameterDescriptor> {
        &self.descriptor
    }

    pub fn set(&self, value: String) {
        *self.value.lock().unwrap() = value;
    }

    pub fn value(&self) -> String {
        self.value.lock().unwrap().clone()
    }
}

/// Runtime storage for a binary blob property. Non-RT only.
#[derive(Debug)]
pub struct DataPropertyValue {
    descriptor: Arc<ParameterDescriptor>,
    value: Mutex<Vec<u8>>,
}

impl DataPropertyValue {
    fn new(descriptor: Arc<ParameterDescriptor>) -> Self {
        Self { descriptor, value: Mutex::new(Vec::new()) }
    }

    pub fn descriptor(&self) -> &Arc<ParameterDescriptor> {
        &self.descriptor
    }

    pub fn set(&self, value: Vec<u8>) {
        *self.value.lock().unwrap() = value;
    }

    pub fn value(&self) -> Vec<u8> {
        self.value.lock().unwrap().clone()
    }
}

/// One registered entry, tagged by kind.
#[derive(Debug, Clone)]
pub enum ParameterEntry {
    Float(Arc<FloatParameterValue>),
    Int(Arc<IntParameterValue>),
    Bool(Arc<BoolParameterValue>),
    StringProperty(Arc<StringPropertyValue>),
    DataProperty(Arc<DataPropertyValue>),
}

impl ParameterEntry {
    pub fn descriptor(&self) -> &Arc<ParameterDescriptor> {
        match self {
            ParameterEntry::Float(v) => v.descriptor(),
            ParameterEntry::Int(v) => v.descriptor(),
            ParameterEntry::Bool(v) => v.descriptor(),
            ParameterEntry::StringProperty(v) => v.descriptor(),
            ParameterEntry::DataProperty(v) => v.descriptor(),
        }
    }

    fn normalized_value(&self) -> Option<f32> {
        match self {
            ParameterEntry::Float(v) => Some(v.normalized_value()),
            ParameterEntry::Int(v) => Some(v.normalized_value()),
            ParameterEntry::Bool(v) => Some(v.normalized_value()),
            _ => None,
        }
    }

    fn domain_value(&self) -> Option<f32> {
        match self {
            ParameterEntry::Float(v) => Some(v.domain_value()),
            ParameterEntry::Int(v) => Some(v.domain_value() as f32),
            ParameterEntry::Bool(v) => Some(if v.value() { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

/// Per-processor registry of parameters and properties.
///
/// Registration happens while the owning processor is being constructed;
/// afterwards the registry is read-only (values change through the cells,
/// not the registry).
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    entries: Vec<ParameterEntry>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn name_taken(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.descriptor().name() == name)
    }

    pub fn register_float(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default_domain: f32,
        min_domain: f32,
        max_domain: f32,
        pre_processor: FloatPreProcessor,
    ) -> Option<Arc<FloatParameterValue>> {
        if self.name_taken(name) {
            return None;
        }
        let descriptor = Arc::new(ParameterDescriptor::new(
            name,
            label,
            unit,
            ParameterKind::Float,
            min_domain,
            max_domain,
        ));
        let value = Arc::new(FloatParameterValue::new(descriptor, pre_processor, default_domain));
        self.entries.push(ParameterEntry::Float(Arc::clone(&value)));
        Some(value)
    }

    pub fn register_int(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default: i32,
        min: i32,
        max: i32,
    ) -> Option<Arc<IntParameterValue>> {
        if self.name_taken(name) {
            return None;
        }
        let descriptor = Arc::new(ParameterDescriptor::new(
            name,
            label,
            unit,
            ParameterKind::Int,
            min as f32,
            max as f32,
        ));
        let value = Arc::new(IntParameterValue::new(descriptor, default));
        self.entries.push(ParameterEntry::Int(Arc::clone(&value)));
        Some(value)
    }

    pub fn register_bool(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default: bool,
    ) -> Option<Arc<BoolParameterValue>> {
        if self.name_taken(name) {
            return None;
        }
        let descriptor =
            Arc::new(ParameterDescriptor::new(name, label, unit, ParameterKind::Bool, 0.0, 1.0));
        let value = Arc::new(BoolParameterValue::new(descriptor, default));
        self.entries.push(ParameterEntry::Bool(Arc::clone(&value)));
        Some(value)
    }

    pub fn register_property(
        &mut self,
        name: &str,
        label: &str,
        default: &str,
    ) -> Option<Arc<StringPropertyValue>> {
        if self.name_taken(name) {
            return None;
        }
        let descriptor =
            Arc::new(ParameterDescriptor::new(name, label, "", ParameterKind::String, 0.0, 0.0));
        let value = Arc::new(StringPropertyValue::new(descriptor, default));
        self.entries.push(ParameterEntry::StringProperty(Arc::clone(&value)));
        Some(value)
    }

    pub fn register_data_property(
        &mut self,
        name: &str,
        label: &str,
    ) -> Option<Arc<DataPropertyValue>> {
        if self.name_taken(name) {
            return None;
        }
        let descriptor =
            Arc::new(ParameterDescriptor::new(name, label, "", ParameterKind::Data, 0.0, 0.0));
        let value = Arc::new(DataPropertyValue::new(descriptor));
        self.entries.push(ParameterEntry::DataProperty(Arc::clone(&value)));
        Some(value)
    }

    pub fn entries(&self) -> &[ParameterEntry] {
        &self.entries
    }

    pub fn entry(&self, id: ObjectId) -> Option<&ParameterEntry> {
        self.entries.iter().find(|entry| entry.descriptor().id() == id)
    }

    pub fn entry_by_name(&self, name: &str) -> Option<&ParameterEntry> {
        self.entries.iter().find(|entry| entry.descriptor().name() == name)
    }

    /// Normalized value of any automatable parameter.
    pub fn parameter_value(&self, id: ObjectId) -> ProcessorResult<f32> {
        self.entry(id)
            .and_then(|entry| entry.normalized_value())
            .ok_or(ProcessorError::ParameterNotFound)
    }

    /// Domain value of any automatable parameter.
    pub fn parameter_value_in_domain(&self, id: ObjectId) -> ProcessorResult<f32> {
        self.entry(id)
            .and_then(|entry| entry.domain_value())
            .ok_or(ProcessorError::ParameterNotFound)
    }

    /// Set any automatable parameter from a normalized value. Returns the
    /// resulting domain value.
    pub fn set_parameter_value(&self, id: ObjectId, normalized: f32) -> ProcessorResult<f32> {
        match self.entry(id) {
            Some(ParameterEntry::Float(v)) => {
                v.set_normalized(normalized);
                Ok(v.domain_value())
            }
            Some(ParameterEntry::Int(v)) => {
                v.set_normalized(normalized);
                Ok(v.domain_value() as f32)
            }
            Some(ParameterEntry::Bool(v)) => {
                v.set_normalized(normalized);
                Ok(if v.value() { 1.0 } else { 0.0 })
            }
            _ => Err(ProcessorError::ParameterNotFound),
        }
    }

    pub fn property_value(&self, id: ObjectId) -> ProcessorResult<String> {
        match self.entry(id) {
            Some(ParameterEntry::StringProperty(v)) => Ok(v.value()),
            _ => Err(ProcessorError::PropertyNotFound),
        }
    }

    pub fn set_property_value(&self, id: ObjectId, value: String) -> ProcessorResult<()> {
        match self.entry(id) {
            Some(ParameterEntry::StringProperty(v)) => {
                v.set(value);
                Ok(())
            }
            _ => Err(ProcessorError::PropertyNotFound),
        }
    }
}
