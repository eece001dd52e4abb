//! The processor contract
//!
//! A processor is split in two halves:
//!
//! - [`ProcessorModel`]: the shared, thread-safe half — identity, parameter
//!   registry, enabled/bypassed flags, channel counts. The container keeps
//!   an `Arc` to it for the lifetime of the processor, so control threads
//!   can query and set parameters while the DSP half lives on the audio
//!   thread.
//! - The [`Processor`] implementation itself: the DSP object, uniquely
//!   owned, moved into the audio graph when inserted and moved back out on
//!   removal. Its two hot methods, `process_audio` and `process_event`,
//!   must not allocate, lock or block.

pub mod parameters;
pub mod state;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::{BufferView, BufferViewMut};
use crate::error::{ProcessorError, ProcessorResult};
use crate::event::queue::RtEventSink;
use crate::event::rt::{RtEvent, IMMEDIATE_PROCESS};
use crate::types::{next_object_id, ObjectId, MAX_TRACK_CHANNELS};

use parameters::{
    BoolParameterValue, DataPropertyValue, FloatParameterValue, FloatPreProcessor,
    IntParameterValue, ParameterRegistry, StringPropertyValue,
};
use state::ProcessorState;

/// Shared half of a processor: identity, parameters and flags.
///
/// Constructed mutably, parameters registered, then frozen behind an `Arc`.
/// After that, all mutation goes through atomic cells.
#[derive(Debug)]
pub struct ProcessorModel {
    id: ObjectId,
    name: String,
    label: String,
    enabled: AtomicBool,
    bypassed: AtomicBool,
    input_channels: AtomicUsize,
    output_channels: AtomicUsize,
    max_input_channels: usize,
    max_output_channels: usize,
    registry: ParameterRegistry,
}

impl ProcessorModel {
    pub fn new(name: &str, label: &str) -> Self {
        Self::with_max_channels(name, label, MAX_TRACK_CHANNELS, MAX_TRACK_CHANNELS)
    }

    pub fn with_max_channels(
        name: &str,
        label: &str,
        max_input_channels: usize,
        max_output_channels: usize,
    ) -> Self {
        Self {
            id: next_object_id(),
            name: name.to_string(),
            label: label.to_string(),
            enabled: AtomicBool::new(true),
            bypassed: AtomicBool::new(false),
            input_channels: AtomicUsize::new(max_input_channels.min(2)),
            output_channels: AtomicUsize::new(max_output_channels.min(2)),
            max_input_channels,
            max_output_channels,
            registry: ParameterRegistry::new(),
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

    // ─────────────────────────────────────────────────────────────
    // Flags and channel configuration
    // ─────────────────────────────────────────────────────────────

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Relaxed)
    }

    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Relaxed);
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels.load(Ordering::Relaxed)
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels.load(Ordering::Relaxed)
    }

    pub fn max_input_channels(&self) -> usize {
        self.max_input_channels
    }

    pub fn max_output_channels(&self) -> usize {
        self.max_output_channels
    }

    pub fn set_input_channels(&self, channels: usize) -> ProcessorResult<()> {
        if channels > self.max_input_channels {
            return Err(ProcessorError::UnsupportedChannelCount(channels));
        }
        self.input_channels.store(channels, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_output_channels(&self, channels: usize) -> ProcessorResult<()> {
        if channels > self.max_output_channels {
            return Err(ProcessorError::UnsupportedChannelCount(channels));
        }
        self.output_channels.store(channels, Ordering::Relaxed);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Parameter registration (construction time only)
    // ─────────────────────────────────────────────────────────────

    pub fn register_float_parameter(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default_domain: f32,
        min_domain: f32,
        max_domain: f32,
        pre_processor: FloatPreProcessor,
    ) -> Option<Arc<FloatParameterValue>> {
        self.registry
            .register_float(name, label, unit, default_domain, min_domain, max_domain, pre_processor)
    }

    pub fn register_int_parameter(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default: i32,
        min: i32,
        max: i32,
    ) -> Option<Arc<IntParameterValue>> {
        self.registry.register_int(name, label, unit, default, min, max)
    }

    pub fn register_bool_parameter(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        default: bool,
    ) -> Option<Arc<BoolParameterValue>> {
        self.registry.register_bool(name, label, unit, default)
    }

    pub fn register_property(
        &mut self,
        name: &str,
        label: &str,
        default: &str,
    ) -> Option<Arc<StringPropertyValue>> {
        self.registry.register_property(name, label, default)
    }

    pub fn register_data_property(
        &mut self,
        name: &str,
        label: &str,
    ) -> Option<Arc<DataPropertyValue>> {
        self.registry.register_data_property(name, label)
    }

    // ─────────────────────────────────────────────────────────────
    // Parameter access
    // ─────────────────────────────────────────────────────────────

    pub fn parameters(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Normalized value of a parameter.
    pub fn parameter_value(&self, id: ObjectId) -> ProcessorResult<f32> {
        self.registry.parameter_value(id)
    }

    /// Domain value of a parameter.
    pub fn parameter_value_in_domain(&self, id: ObjectId) -> ProcessorResult<f32> {
        self.registry.parameter_value_in_domain(id)
    }

    /// Set a parameter from a normalized value; returns the domain value.
    pub fn set_parameter_value(&self, id: ObjectId, normalized: f32) -> ProcessorResult<f32> {
        self.registry.set_parameter_value(id, normalized)
    }

    pub fn property_value(&self, id: ObjectId) -> ProcessorResult<String> {
        self.registry.property_value(id)
    }

    pub fn set_property_value(&self, id: ObjectId, value: String) -> ProcessorResult<()> {
        self.registry.set_property_value(id, value)
    }

    // ─────────────────────────────────────────────────────────────
    // State snapshots
    // ─────────────────────────────────────────────────────────────

    /// Capture bypass, every automatable parameter (normalized) and every
    /// string property.
    pub fn save_state(&self) -> ProcessorState {
        let mut snapshot = ProcessorState { bypassed: Some(self.bypassed()), ..Default::default() };
        for entry in self.registry.entries() {
            let id = entry.descriptor().id();
            if let Ok(normalized) = self.registry.parameter_value(id) {
                snapshot.parameters.push((id, normalized));
            } else if let Ok(value) = self.registry.property_value(id) {
                snapshot.properties.push((id, value));
            }
        }
        snapshot
    }

    /// Apply a snapshot. Ids no longer in the registry are skipped and
    /// logged; everything else is applied.
    pub fn set_state(&self, snapshot: &ProcessorState) {
        if let Some(bypassed) = snapshot.bypassed {
            self.set_bypassed(bypassed);
        }
        for (id, normalized) in &snapshot.parameters {
            if self.registry.set_parameter_value(*id, *normalized).is_err() {
                log::warn!("{}: snapshot references unknown parameter {}", self.name, id);
            }
        }
        for (id, value) in &snapshot.properties {
            if self.registry.set_property_value(*id, value.clone()).is_err() {
                log::warn!("{}: snapshot references unknown property {}", self.name, id);
            }
        }
    }
}

/// The audio-thread capability surface of a processor.
///
/// `process_audio` and `process_event` run on the audio thread (or a worker
/// with the same discipline); everything else is non-RT and happens before
/// the object is handed to the graph or after it is taken back.
pub trait Processor: Send {
    /// The shared half of this processor.
    fn model(&self) -> &Arc<ProcessorModel>;

    /// One-shot initialisation before any audio. A failing processor is
    /// never added to a graph.
    fn init(&mut self, sample_rate: f32) -> ProcessorResult<()> {
        let _ = sample_rate;
        Ok(())
    }

    /// Reconfigure after a sample-rate change. Only called while audio is
    /// paused; must be fast.
    fn configure(&mut self, sample_rate: f32) {
        let _ = sample_rate;
    }

    fn set_input_channels(&mut self, channels: usize) -> ProcessorResult<()> {
        self.model().set_input_channels(channels)
    }

    fn set_output_channels(&mut self, channels: usize) -> ProcessorResult<()> {
        self.model().set_output_channels(channels)
    }

    /// Produce exactly one chunk. RT: no allocation, locks or blocking.
    fn process_audio(
        &mut self,
        input: &BufferView,
        output: &mut BufferViewMut,
        out_events: &mut RtEventSink,
    );

    /// Consume one event addressed to this processor. Total: unknown kinds
    /// are no-ops. RT discipline applies.
    fn process_event(&mut self, event: RtEvent, out_events: &mut RtEventSink) {
        default_process_event(self.model(), event, out_events);
    }

    /// True if the processor ramps its own dry/wet when bypassed; the host
    /// then keeps calling `process_audio` instead of substituting the
    /// pass-through copy.
    fn supports_soft_bypass(&self) -> bool {
        false
    }
}

/// Baseline event handling shared by every processor: parameter changes
/// update the registry cells and emit a change notification, property
/// payloads are returned for off-thread deallocation, bypass flips the
/// flag, and anything else is a logged no-op.
pub fn default_process_event(
    model: &Arc<ProcessorModel>,
    event: RtEvent,
    out_events: &mut RtEventSink,
) {
    match event {
        RtEvent::FloatParameterChange { parameter, value, .. } => {
            apply_parameter_change(model, parameter, value, out_events);
        }
        RtEvent::IntParameterChange { parameter, value, .. } => {
            match model.parameters().entry(parameter) {
                Some(parameters::ParameterEntry::Int(cell)) => {
                    cell.set_domain(value);
                    out_events.push(RtEvent::ParameterChangeNotification {
                        processor: model.id(),
                        parameter,
                        normalized: cell.normalized_value(),
                        domain: cell.domain_value() as f32,
                        time: IMMEDIATE_PROCESS,
                    });
                }
                _ => log::debug!("{}: int change for unknown parameter {}", model.name(), parameter),
            }
        }
        RtEvent::BoolParameterChange { parameter, value, .. } => {
            match model.parameters().entry(parameter) {
                Some(parameters::ParameterEntry::Bool(cell)) => {
                    cell.set(value);
                    out_events.push(RtEvent::ParameterChangeNotification {
                        processor: model.id(),
                        parameter,
                        normalized: cell.normalized_value(),
                        domain: cell.normalized_value(),
                        time: IMMEDIATE_PROCESS,
                    });
                }
                _ => {
                    log::debug!("{}: bool change for unknown parameter {}", model.name(), parameter)
                }
            }
        }
        RtEvent::StringPropertyChange { value, .. } => {
            // Ownership goes straight back for deallocation; processors
            // that consume string payloads override process_event.
            out_events.push(RtEvent::StringDelete { value });
        }
        RtEvent::DataPropertyChange { value, .. } => {
            out_events.push(RtEvent::DataDelete { value });
        }
        RtEvent::SetBypass { bypassed, .. } => {
            model.set_bypassed(bypassed);
        }
        RtEvent::NoteOn { .. }
        | RtEvent::NoteOff { .. }
        | RtEvent::NoteAftertouch { .. }
        | RtEvent::PitchBend { .. }
        | RtEvent::Modulation { .. }
        | RtEvent::Aftertouch { .. }
        | RtEvent::WrappedMidi { .. }
        | RtEvent::AsyncWorkCompletion { .. } => {
            log::debug!("{}: unhandled event", model.name());
        }
        other => {
            log::debug!("{}: unexpected event {:?}", model.name(), other);
        }
    }
}

/// Apply a normalized float change to whichever parameter kind it targets.
fn apply_parameter_change(
    model: &Arc<ProcessorModel>,
    parameter: ObjectId,
    normalized: f32,
    out_events: &mut RtEventSink,
) {
    match model.parameters().set_parameter_value(parameter, normalized) {
        Ok(domain) => {
            out_events.push(RtEvent::ParameterChangeNotification {
                processor: model.id(),
                parameter,
                normalized: normalized.clamp(0.0, 1.0),
                domain,
                time: IMMEDIATE_PROCESS,
            });
        }
        Err(_) => {
            log::debug!("{}: change for unknown parameter {}", model.name(), parameter);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Minimal processors used across the crate's tests.

    use super::*;

    /// Copies input to output and records note events.
    pub struct PassthroughProcessor {
        model: Arc<ProcessorModel>,
        pub notes_on: Vec<u8>,
        pub notes_off: Vec<u8>,
    }

    impl PassthroughProcessor {
        pub fn new(name: &str) -> Self {
            let model = ProcessorModel::new(name, "Passthrough");
            Self { model: Arc::new(model), notes_on: Vec::new(), notes_off: Vec::new() }
        }
    }

    impl Processor for PassthroughProcessor {
        fn model(&self) -> &Arc<ProcessorModel> {
            &self.model
        }

        fn process_audio(
            &mut self,
            input: &BufferView,
            output: &mut BufferViewMut,
            _out_events: &mut RtEventSink,
        ) {
            output.copy_from(input);
        }

        fn process_event(&mut self, event: RtEvent, out_events: &mut RtEventSink) {
            match event {
                RtEvent::NoteOn { note, .. } => self.notes_on.push(note),
                RtEvent::NoteOff { note, .. } => self.notes_off.push(note),
                other => default_process_event(&self.model, other, out_events),
            }
        }
    }

    /// Scales input by a float "gain" parameter in [0, 10], default 1.
    pub struct TestGainProcessor {
        model: Arc<ProcessorModel>,
        pub gain: Arc<FloatParameterValue>,
    }

    impl TestGainProcessor {
        pub fn new(name: &str) -> Self {
            let mut model = ProcessorModel::new(name, "Test Gain");
            let gain = model
                .register_float_parameter("gain", "Gain", "", 1.0, 0.0, 10.0, FloatPreProcessor::Clamp)
                .unwrap();
            Self { model: Arc::new(model), gain }
        }
    }

    impl Processor for TestGainProcessor {
        fn model(&self) -> &Arc<ProcessorModel> {
            &self.model
        }

        fn process_audio(
            &mut self,
            input: &BufferView,
            output: &mut BufferViewMut,
            _out_events: &mut RtEventSink,
        ) {
            let gain = self.gain.processed_value();
            let channels = output.channel_count().min(input.channel_count());
            for ch in 0..channels {
                let src = input.channel(ch);
                let dst = output.channel_mut(ch);
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    *d = *s * gain;
                }
            }
        }
    }
}
