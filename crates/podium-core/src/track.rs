//! Tracks: ordered processor chains with channel routing
//!
//! A track is itself a [`Processor`] whose audio callback pipes the chunk
//! through its chain, ping-ponging between two scratch buffers. Inserting
//! or removing a chain member renegotiates channel counts left to right.
//! Each track carries its own staging buffers (filled and drained by the
//! engine around dispatch, so tracks can process in parallel) and its own
//! outbound event queue.

use std::sync::Arc;

use crate::buffer::{bypass_passthrough, BufferView, BufferViewMut, SampleBuffer};
use crate::error::{EngineError, EngineResult};
use crate::event::queue::{default_rt_event_channel, RtEventConsumer, RtEventSink};
use crate::event::rt::RtEvent;
use crate::processor::parameters::{FloatParameterValue, FloatPreProcessor};
use crate::processor::{Processor, ProcessorModel};
use crate::types::{ObjectId, MAX_TRACK_CHANNELS};

/// Chain slots reserved up front so inserts while audio runs stay
/// allocation-free.
pub const TRACK_MAX_PROCESSORS: usize = 32;

/// Gain parameter range in dB.
const GAIN_MIN_DB: f32 = -120.0;
const GAIN_MAX_DB: f32 = 24.0;

/// One channel strip: a chain of processors between the engine's input and
/// output connections.
pub struct Track {
    model: Arc<ProcessorModel>,
    chain: Vec<Box<dyn Processor>>,
    scratch: [SampleBuffer; 2],
    input_staging: SampleBuffer,
    output_staging: SampleBuffer,
    out_events: RtEventSink,
    out_events_rx: RtEventConsumer,
    gain: Arc<FloatParameterValue>,
    pan: Arc<FloatParameterValue>,
    input_busses: usize,
    output_busses: usize,
}

impl Track {
    /// Create a track with symmetric input/output channel counts.
    pub fn new(name: &str, channels: usize) -> EngineResult<Self> {
        if channels == 0 || channels > MAX_TRACK_CHANNELS {
            return Err(EngineError::InvalidChannel);
        }
        Self::build(name, channels, channels, channels.div_ceil(2), channels.div_ceil(2))
    }

    /// Create a track addressed in stereo-pair busses: bus `i` denotes
    /// channels `2i` and `2i + 1`.
    pub fn new_multibus(name: &str, input_busses: usize, output_busses: usize) -> EngineResult<Self> {
        let in_channels = input_busses * 2;
        let out_channels = output_busses * 2;
        if input_busses == 0
            || output_busses == 0
            || in_channels > MAX_TRACK_CHANNELS
            || out_channels > MAX_TRACK_CHANNELS
        {
            return Err(EngineError::InvalidChannel);
        }
        Self::build(name, in_channels, out_channels, input_busses, output_busses)
    }

    fn build(
        name: &str,
        in_channels: usize,
        out_channels: usize,
        input_busses: usize,
        output_busses: usize,
    ) -> EngineResult<Self> {
        let mut model = ProcessorModel::new(name, "Track");
        model.set_input_channels(in_channels).map_err(|_| EngineError::InvalidChannel)?;
        model.set_output_channels(out_channels).map_err(|_| EngineError::InvalidChannel)?;

        let gain = model
            .register_float_parameter(
                "gain",
                "Gain",
                "dB",
                0.0,
                GAIN_MIN_DB,
                GAIN_MAX_DB,
                FloatPreProcessor::DbToLinear,
            )
            .ok_or(EngineError::InvalidTrack)?;
        let pan = model
            .register_float_parameter("pan", "Pan", "", 0.0, -1.0, 1.0, FloatPreProcessor::Clamp)
            .ok_or(EngineError::InvalidTrack)?;

        let (tx, rx) = default_rt_event_channel();
        let mut chain = Vec::new();
        chain.reserve_exact(TRACK_MAX_PROCESSORS);

        Ok(Self {
            model: Arc::new(model),
            chain,
            scratch: [SampleBuffer::new(MAX_TRACK_CHANNELS), SampleBuffer::new(MAX_TRACK_CHANNELS)],
            input_staging: SampleBuffer::new(MAX_TRACK_CHANNELS),
            output_staging: SampleBuffer::new(MAX_TRACK_CHANNELS),
            out_events: RtEventSink::new(tx),
            out_events_rx: rx,
            gain,
            pan,
            input_busses,
            output_busses,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.model.id()
    }

    pub fn name(&self) -> &str {
        self.model.name()
    }

    pub fn input_busses(&self) -> usize {
        self.input_busses
    }

    pub fn output_busses(&self) -> usize {
        self.output_busses
    }

    pub fn gain_parameter(&self) -> &Arc<FloatParameterValue> {
        &self.gain
    }

    pub fn pan_parameter(&self) -> &Arc<FloatParameterValue> {
        &self.pan
    }

    // ─────────────────────────────────────────────────────────────
    // Chain editing
    // ─────────────────────────────────────────────────────────────

    /// Insert a processor before `before`, or at the back. Within the
    /// reserved capacity this does not allocate, so it is safe in response
    /// to graph-edit events on the audio thread.
    ///
    /// On failure ownership of the processor is handed back to the caller;
    /// it is never dropped here.
    pub fn add_processor(
        &mut self,
        processor: Box<dyn Processor>,
        before: Option<ObjectId>,
    ) -> Result<(), Box<dyn Processor>> {
        if self.chain.len() >= TRACK_MAX_PROCESSORS {
            log::warn!("track {}: processor chain is full", self.model.name());
            return Err(processor);
        }
        let position = match before {
            Some(id) => match self.chain_index(id) {
                Some(position) => position,
                None => {
                    log::warn!(
                        "track {}: no processor {} to insert before",
                        self.model.name(),
                        id
                    );
                    return Err(processor);
                }
            },
            None => self.chain.len(),
        };
        self.chain.insert(position, processor);
        self.update_channel_config();
        Ok(())
    }

    /// Remove a processor by id, returning ownership of the DSP object.
    pub fn remove_processor(&mut self, id: ObjectId) -> Option<Box<dyn Processor>> {
        let position = self.chain_index(id)?;
        let processor = self.chain.remove(position);
        self.update_channel_config();
        Some(processor)
    }

    pub fn processor_count(&self) -> usize {
        self.chain.len()
    }

    pub fn processor_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.chain.iter().map(|p| p.model().id())
    }

    pub fn has_processor(&self, id: ObjectId) -> bool {
        self.chain_index(id).is_some()
    }

    fn chain_index(&self, id: ObjectId) -> Option<usize> {
        self.chain.iter().position(|p| p.model().id() == id)
    }

    /// Propagate channel counts through the chain: each stage takes as many
    /// inputs as the upstream provides (clamped by its own maximum), and
    /// its output count is clamped against the next stage's input maximum
    /// (the track's own output count for the last stage).
    fn update_channel_config(&mut self) {
        let mut channels = self.model.input_channels();
        let track_out = self.model.output_channels();
        let count = self.chain.len();
        for index in 0..count {
            let downstream_max = if index + 1 < count {
                self.chain[index + 1].model().max_input_channels()
            } else {
                track_out
            };
            let processor = &mut self.chain[index];
            let inputs = channels.min(processor.model().max_input_channels());
            let outputs = processor.model().max_output_channels().min(downstream_max);
            // Maxima were used as the bounds, so these cannot fail.
            let _ = processor.set_input_channels(inputs);
            let _ = processor.set_output_channels(outputs);
            channels = outputs;
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Engine-facing staging and event collection
    // ─────────────────────────────────────────────────────────────

    /// Buffer the engine copies input audio into before dispatch.
    pub fn input_staging_mut(&mut self) -> &mut SampleBuffer {
        &mut self.input_staging
    }

    /// Buffer holding this track's output after [`Track::process_chunk`].
    pub fn output_staging(&self) -> &SampleBuffer {
        &self.output_staging
    }

    /// Process one chunk from the input staging buffer into the output
    /// staging buffer. Runs on the audio thread or a pool worker.
    pub fn process_chunk(&mut self) {
        let in_channels = self.model.input_channels();
        let out_channels = self.model.output_channels();
        let input = self.input_staging.view(in_channels);
        let mut output = self.output_staging.view_mut(out_channels);
        render_chain(
            &self.model,
            &mut self.chain,
            &mut self.scratch,
            &self.gain,
            &self.pan,
            &mut self.out_events,
            &input,
            &mut output,
        );
    }

    /// Drain events emitted by this track and its processors during the
    /// current chunk, in emission order.
    pub fn collect_events(&mut self, mut consume: impl FnMut(RtEvent)) {
        self.out_events.flush();
        let overflows = self.out_events.take_overflows();
        if overflows > 0 {
            log::warn!("track {}: dropped {} outbound events", self.model.name(), overflows);
        }
        while let Some(event) = self.out_events_rx.pop() {
            consume(event);
        }
    }
}

impl Processor for Track {
    fn model(&self) -> &Arc<ProcessorModel> {
        &self.model
    }

    fn init(&mut self, sample_rate: f32) -> crate::error::ProcessorResult<()> {
        for processor in &mut self.chain {
            processor.init(sample_rate)?;
        }
        Ok(())
    }

    fn configure(&mut self, sample_rate: f32) {
        for processor in &mut self.chain {
            processor.configure(sample_rate);
        }
    }

    fn process_audio(
        &mut self,
        input: &BufferView,
        output: &mut BufferViewMut,
        _out_events: &mut RtEventSink,
    ) {
        render_chain(
            &self.model,
            &mut self.chain,
            &mut self.scratch,
            &self.gain,
            &self.pan,
            &mut self.out_events,
            input,
            output,
        );
    }

    /// Route an event: the track handles its own, fans keyboard events out
    /// to every chain member, and forwards addressed events to the matching
    /// processor. Events for unknown ids are sent back out the track's
    /// event queue.
    fn process_event(&mut self, event: RtEvent, _out_events: &mut RtEventSink) {
        let receiver = event.receiver();
        if let Some(receiver) = receiver.filter(|&id| id != self.model.id()) {
            match self.chain_index(receiver) {
                Some(index) => self.chain[index].process_event(event, &mut self.out_events),
                None => {
                    log::warn!(
                        "track {}: event for unknown processor {}",
                        self.model.name(),
                        receiver
                    );
                    self.out_events.push(event);
                }
            }
            return;
        }

        if is_keyboard_event(&event) {
            for processor in &mut self.chain {
                if let Some(copy) = event.try_clone() {
                    processor.process_event(copy, &mut self.out_events);
                }
            }
        } else {
            crate::processor::default_process_event(&self.model, event, &mut self.out_events);
        }
    }
}

fn is_keyboard_event(event: &RtEvent) -> bool {
    matches!(
        event,
        RtEvent::NoteOn { .. }
            | RtEvent::NoteOff { .. }
            | RtEvent::NoteAftertouch { .. }
            | RtEvent::PitchBend { .. }
            | RtEvent::Modulation { .. }
            | RtEvent::Aftertouch { .. }
            | RtEvent::WrappedMidi { .. }
    )
}

/// Pipe one chunk through the chain, then apply track gain and pan.
///
/// Free function over disjoint borrows so both the trait path and the
/// staging path can share it.
#[allow(clippy::too_many_arguments)]
fn render_chain(
    model: &Arc<ProcessorModel>,
    chain: &mut [Box<dyn Processor>],
    scratch: &mut [SampleBuffer; 2],
    gain: &Arc<FloatParameterValue>,
    pan: &Arc<FloatParameterValue>,
    out_events: &mut RtEventSink,
    input: &BufferView,
    output: &mut BufferViewMut,
) {
    if !model.enabled() {
        output.clear();
        return;
    }

    let in_channels = model.input_channels();
    scratch[0].clear();
    scratch[1].clear();
    scratch[0].view_mut(in_channels).copy_from(input);

    let mut current = 0;
    for processor in chain.iter_mut() {
        let processor_model = processor.model();
        if !processor_model.enabled() {
            continue;
        }
        let stage_in = processor_model.input_channels();
        let stage_out = processor_model.output_channels();
        let bypassed = processor_model.bypassed();

        let (first, second) = scratch.split_at_mut(1);
        let (src, dst) =
            if current == 0 { (&first[0], &mut second[0]) } else { (&second[0], &mut first[0]) };
        let stage_input = src.view(stage_in);
        let mut stage_output = dst.view_mut(stage_out);

        if bypassed && !processor.supports_soft_bypass() {
            bypass_passthrough(&stage_input, &mut stage_output);
        } else {
            processor.process_audio(&stage_input, &mut stage_output, out_events);
        }
        current = 1 - current;
    }

    // Output stage: track gain (dB pre-processed to linear) and stereo pan.
    let out_channels = output.channel_count();
    let gain_linear = gain.processed_value();
    let pan_position = pan.processed_value();
    let rendered = scratch[current].view(out_channels);

    for ch in 0..out_channels {
        let mut channel_gain = gain_linear;
        if out_channels == 2 {
            if pan_position > 0.0 && ch == 0 {
                channel_gain *= 1.0 - pan_position;
            } else if pan_position < 0.0 && ch == 1 {
                channel_gain *= 1.0 + pan_position;
            }
        }
        let src = rendered.channel(ch);
        let dst = output.channel_mut(ch);
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = *s * channel_gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::test_support::{PassthroughProcessor, TestGainProcessor};
    use crate::types::AUDIO_CHUNK_SIZE;

    fn input_buffer(channels: usize, value: f32) -> SampleBuffer {
        let mut buf = SampleBuffer::new(channels);
        for ch in 0..channels {
            buf.channel_mut(ch).fill(value);
        }
        buf
    }

    #[test]
    fn test_empty_track_applies_unity_gain() {
        let mut track = Track::new("main", 2).unwrap();
        let input = input_buffer(2, 0.5);
        track.input_staging_mut().view_mut(2).copy_from(&input.view(2));
        track.process_chunk();

        assert!((track.output_staging().channel(0)[0] - 0.5).abs() < 1e-6);
        assert!((track.output_staging().channel(1)[AUDIO_CHUNK_SIZE - 1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_chain_order_and_processing() {
        let mut track = Track::new("fx", 2).unwrap();
        let first = TestGainProcessor::new("g1");
        let second = TestGainProcessor::new("g2");
        first.gain.set_domain(2.0);
        second.gain.set_domain(3.0);
        let first_id = first.model().id();

        assert!(track.add_processor(Box::new(first), None).is_ok());
        assert!(track.add_processor(Box::new(second), None).is_ok());
        assert_eq!(track.processor_count(), 2);

        let input = input_buffer(2, 0.1);
        track.input_staging_mut().view_mut(2).copy_from(&input.view(2));
        track.process_chunk();
        // 0.1 * 2 * 3 = 0.6
        assert!((track.output_staging().channel(0)[0] - 0.6).abs() < 1e-5);

        // Remove the first stage; only the x3 remains.
        let removed = track.remove_processor(first_id).unwrap();
        assert_eq!(removed.model().id(), first_id);
        track.process_chunk();
        assert!((track.output_staging().channel(0)[0] - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_insert_before() {
        let mut track = Track::new("order", 2).unwrap();
        let a = PassthroughProcessor::new("a");
        let b = PassthroughProcessor::new("b");
        let a_id = a.model().id();
        let b_id = b.model().id();

        assert!(track.add_processor(Box::new(a), None).is_ok());
        assert!(track.add_processor(Box::new(b), Some(a_id)).is_ok());
        let order: Vec<_> = track.processor_ids().collect();
        assert_eq!(order, vec![b_id, a_id]);
    }

    #[test]
    fn test_channel_negotiation() {
        let mut track = Track::new("nego", 2).unwrap();
        let processor = PassthroughProcessor::new("wide");
        assert!(track.add_processor(Box::new(processor), None).is_ok());

        let ids: Vec<_> = track.processor_ids().collect();
        assert_eq!(ids.len(), 1);
        // The stage is clamped to the track's own channel counts.
        // (Reach through the chain via process to observe behaviour.)
        let input = input_buffer(2, 0.25);
        track.input_staging_mut().view_mut(2).copy_from(&input.view(2));
        track.process_chunk();
        assert!((track.output_staging().channel(1)[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_bypassed_stage_passes_audio() {
        let mut track = Track::new("byp", 2).unwrap();
        let gain = TestGainProcessor::new("g");
        gain.gain.set_domain(4.0);
        gain.model().set_bypassed(true);
        assert!(track.add_processor(Box::new(gain), None).is_ok());

        let input = input_buffer(2, 0.2);
        track.input_staging_mut().view_mut(2).copy_from(&input.view(2));
        track.process_chunk();
        assert!((track.output_staging().channel(0)[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_track_outputs_silence() {
        let mut track = Track::new("off", 2).unwrap();
        track.model().set_enabled(false);

        let input = input_buffer(2, 0.7);
        track.input_staging_mut().view_mut(2).copy_from(&input.view(2));
        track.process_chunk();
        assert_eq!(track.output_staging().view(2).peak(), 0.0);
    }

    #[test]
    fn test_keyboard_fanout() {
        let mut track = Track::new("keys", 2).unwrap();
        let processor = PassthroughProcessor::new("synth");
        assert!(track.add_processor(Box::new(processor), None).is_ok());

        let (tx, _rx) = default_rt_event_channel();
        let mut unused = RtEventSink::new(tx);
        let event = RtEvent::note_on(track.id(), 0, 60, 1.0);
        track.process_event(event, &mut unused);
        // The note reached the chain member (observable via no unknown-id
        // bounce on the track queue).
        let mut bounced = 0;
        track.collect_events(|_| bounced += 1);
        assert_eq!(bounced, 0);
    }

    #[test]
    fn test_unknown_receiver_bounces() {
        let mut track = Track::new("bounce", 2).unwrap();
        let (tx, _rx) = default_rt_event_channel();
        let mut unused = RtEventSink::new(tx);

        track.process_event(RtEvent::note_on(99999, 0, 60, 1.0), &mut unused);
        let mut bounced = Vec::new();
        track.collect_events(|event| bounced.push(event));
        assert_eq!(bounced.len(), 1);
        assert!(matches!(bounced[0], RtEvent::NoteOn { processor: 99999, .. }));
    }

    #[test]
    fn test_track_gain_parameter() {
        let mut track = Track::new("gain", 2).unwrap();
        // -6 dB is roughly a factor 0.501
        track.gain_parameter().set_domain(-6.0);

        let input = input_buffer(2, 1.0);
        track.input_staging_mut().view_mut(2).copy_from(&input.view(2));
        track.process_chunk();
        assert!((track.output_staging().channel(0)[0] - 0.501).abs() < 1e-3);
    }

    #[test]
    fn test_multibus_channel_counts() {
        let track = Track::new_multibus("bus", 2, 1).unwrap();
        assert_eq!(track.model().input_channels(), 4);
        assert_eq!(track.model().output_channels(), 2);
        assert_eq!(track.input_busses(), 2);
        assert_eq!(track.output_busses(), 1);
    }
}
