//! End-to-end engine scenarios driven through the public API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use podium_core::buffer::{BufferView, BufferViewMut, SampleBuffer};
use podium_core::engine::dispatcher::EventPoster;
use podium_core::engine::{AudioEngine, RealtimeState};
use podium_core::event::queue::RtEventSink;
use podium_core::event::rt::RtEvent;
use podium_core::event::{Event, EventKind, KeyboardEventKind};
use podium_core::processor::parameters::{FloatParameterValue, FloatPreProcessor};
use podium_core::processor::{Processor, ProcessorModel};
use podium_core::types::{ControlBuffer, ObjectId, AUDIO_CHUNK_SIZE};

const SAMPLE_RATE: f32 = 48_000.0;

// ─────────────────────────────────────────────────────────────
// Test processors
// ─────────────────────────────────────────────────────────────

/// Gain with a linear domain of [0, 10], default 1.
struct TestGain {
    model: Arc<ProcessorModel>,
    gain: Arc<FloatParameterValue>,
}

impl TestGain {
    fn new(name: &str) -> Self {
        let mut model = ProcessorModel::new(name, "Test Gain");
        let gain = model
            .register_float_parameter("gain", "Gain", "", 1.0, 0.0, 10.0, FloatPreProcessor::Clamp)
            .unwrap();
        Self { model: Arc::new(model), gain }
    }
}

impl Processor for TestGain {
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

/// Emits one note-on from its first audio callback.
struct NoteEmitter {
    model: Arc<ProcessorModel>,
    emitted: bool,
}

impl NoteEmitter {
    fn new(name: &str) -> Self {
        Self { model: Arc::new(ProcessorModel::new(name, "Note Emitter")), emitted: false }
    }
}

impl Processor for NoteEmitter {
    fn model(&self) -> &Arc<ProcessorModel> {
        &self.model
    }

    fn process_audio(
        &mut self,
        input: &BufferView,
        output: &mut BufferViewMut,
        out_events: &mut RtEventSink,
    ) {
        if !self.emitted {
            out_events.push(RtEvent::note_on(self.model.id(), 0, 60, 1.0));
            self.emitted = true;
        }
        output.copy_from(input);
    }
}

/// Records every keyboard event it receives.
struct NoteRecorder {
    model: Arc<ProcessorModel>,
    notes: Arc<Mutex<Vec<(bool, u8, u8)>>>,
}

impl NoteRecorder {
    fn new(name: &str, notes: Arc<Mutex<Vec<(bool, u8, u8)>>>) -> Self {
        Self { model: Arc::new(ProcessorModel::new(name, "Note Recorder")), notes }
    }
}

impl Processor for NoteRecorder {
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
            RtEvent::NoteOn { channel, note, .. } => {
                self.notes.lock().unwrap().push((true, channel, note));
            }
            RtEvent::NoteOff { channel, note, .. } => {
                self.notes.lock().unwrap().push((false, channel, note));
            }
            other => podium_core::processor::default_process_event(&self.model, other, out_events),
        }
    }
}

/// Outputs a constant hot signal well above full scale.
struct HotSignal {
    model: Arc<ProcessorModel>,
}

impl HotSignal {
    fn new(name: &str) -> Self {
        Self { model: Arc::new(ProcessorModel::new(name, "Hot Signal")) }
    }
}

impl Processor for HotSignal {
    fn model(&self) -> &Arc<ProcessorModel> {
        &self.model
    }

    fn process_audio(
        &mut self,
        _input: &BufferView,
        output: &mut BufferViewMut,
        _out_events: &mut RtEventSink,
    ) {
        for ch in 0..output.channel_count() {
            output.channel_mut(ch).fill(1.5);
        }
    }
}

/// Poster recording dispatched events.
struct RecordingPoster {
    id: ObjectId,
    keyboard: Mutex<Vec<(KeyboardEventKind, u8, f32)>>,
    clips: Mutex<Vec<(usize, bool)>>,
}

impl RecordingPoster {
    fn new(id: ObjectId) -> Arc<Self> {
        Arc::new(Self { id, keyboard: Mutex::new(Vec::new()), clips: Mutex::new(Vec::new()) })
    }
}

impl EventPoster for RecordingPoster {
    fn poster_id(&self) -> ObjectId {
        self.id
    }

    fn process_event(&self, event: &Event) {
        match event.kind() {
            EventKind::Keyboard(keyboard) => {
                self.keyboard.lock().unwrap().push((keyboard.kind, keyboard.note, keyboard.value));
            }
            EventKind::ClippingNotification { channel, input } => {
                self.clips.lock().unwrap().push((*channel, *input));
            }
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────

struct Harness {
    engine: AudioEngine,
    input: SampleBuffer,
    output: SampleBuffer,
    in_controls: ControlBuffer,
    out_controls: ControlBuffer,
    samplecount: u64,
}

impl Harness {
    fn new(cores: usize) -> Self {
        Self {
            engine: AudioEngine::new(SAMPLE_RATE, cores),
            input: SampleBuffer::new(2),
            output: SampleBuffer::new(2),
            in_controls: ControlBuffer::new(),
            out_controls: ControlBuffer::new(),
            samplecount: 0,
        }
    }

    fn run_chunk(&mut self) {
        self.engine.process_chunk(
            &self.input,
            &mut self.output,
            &self.in_controls,
            &mut self.out_controls,
            0,
            self.samplecount,
        );
        self.samplecount += AUDIO_CHUNK_SIZE as u64;
    }
}

fn settle() {
    thread::sleep(Duration::from_millis(30));
}

// ─────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────

#[test]
fn test_create_and_delete_track() {
    let mut harness = Harness::new(1);
    harness.engine.create_track("main", 2).unwrap();

    let track = harness.engine.processor_container().track_by_name("main").unwrap();
    assert_eq!(track.input_channels(), 2);
    assert_eq!(track.output_channels(), 2);

    harness.engine.delete_track("main").unwrap();
    assert!(harness.engine.processor_container().track_by_name("main").is_none());
    assert!(harness.engine.delete_track("main").is_err());
}

#[test]
fn test_parameter_change_via_event() {
    let mut harness = Harness::new(1);
    harness.engine.create_track("t", 2).unwrap();
    let track_id = harness.engine.processor_container().track_by_name("t").unwrap().id();

    harness
        .engine
        .register_plugin("test.gain", Box::new(|name, _host| Box::new(TestGain::new(name))));
    let plugin_id = harness.engine.load_plugin("test.gain", "gain0").unwrap();
    harness.engine.add_plugin_to_track(plugin_id, track_id, None).unwrap();

    let model = harness.engine.processor_container().processor(plugin_id).unwrap();
    let parameter = model.parameters().entry_by_name("gain").unwrap().descriptor().id();

    harness
        .engine
        .send_async_event(RtEvent::float_parameter_change(plugin_id, parameter, 0.5))
        .unwrap();
    harness.run_chunk();

    let domain = model.parameter_value_in_domain(parameter).unwrap();
    assert!((domain - 5.0).abs() < 1e-6, "domain value was {}", domain);
}

#[test]
fn test_keyboard_fanout_to_subscriber() {
    let mut harness = Harness::new(1);
    harness.engine.create_track("keys", 2).unwrap();
    let track_id = harness.engine.processor_container().track_by_name("keys").unwrap().id();

    harness
        .engine
        .register_plugin("test.emitter", Box::new(|name, _host| Box::new(NoteEmitter::new(name))));
    let emitter = harness.engine.load_plugin("test.emitter", "emitter0").unwrap();
    harness.engine.add_plugin_to_track(emitter, track_id, None).unwrap();

    let poster = RecordingPoster::new(7001);
    harness.engine.event_dispatcher().register_poster(poster.clone());
    harness.engine.event_dispatcher().subscribe_to_keyboard_events(7001);

    harness.run_chunk();
    settle();

    let received = poster.keyboard.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    let (kind, note, velocity) = received[0];
    assert!(matches!(kind, KeyboardEventKind::NoteOn));
    assert_eq!(note, 60);
    assert_eq!(velocity, 1.0);
}

#[test]
fn test_gate_to_note_routing() {
    let mut harness = Harness::new(1);
    harness.engine.create_track("gated", 2).unwrap();
    let track_id = harness.engine.processor_container().track_by_name("gated").unwrap().id();

    let notes = Arc::new(Mutex::new(Vec::new()));
    let notes_clone = Arc::clone(&notes);
    harness.engine.register_plugin(
        "test.recorder",
        Box::new(move |name, _host| Box::new(NoteRecorder::new(name, Arc::clone(&notes_clone)))),
    );
    let recorder = harness.engine.load_plugin("test.recorder", "rec0").unwrap();
    harness.engine.add_plugin_to_track(recorder, track_id, None).unwrap();

    harness.engine.connect_gate_to_processor("rec0", 3, 48, 1).unwrap();

    // Gate high on chunk N, low on chunk N+1.
    harness.in_controls.gate_in = 1 << 3;
    harness.run_chunk();
    harness.in_controls.gate_in = 0;
    harness.run_chunk();

    let received = notes.lock().unwrap().clone();
    assert_eq!(received, vec![(true, 1, 48), (false, 1, 48)]);
}

#[test]
fn test_output_clip_detection() {
    let mut harness = Harness::new(1);
    harness.engine.create_track("hot", 2).unwrap();
    let track_id = harness.engine.processor_container().track_by_name("hot").unwrap().id();

    harness
        .engine
        .register_plugin("test.hot", Box::new(|name, _host| Box::new(HotSignal::new(name))));
    let hot = harness.engine.load_plugin("test.hot", "hot0").unwrap();
    harness.engine.add_plugin_to_track(hot, track_id, None).unwrap();

    harness.engine.connect_audio_output_channel(0, 0, "hot").unwrap();
    harness.engine.connect_audio_output_channel(1, 1, "hot").unwrap();
    harness.engine.enable_output_clip_detection(true);

    let poster = RecordingPoster::new(7002);
    harness.engine.event_dispatcher().register_poster(poster.clone());
    harness.engine.event_dispatcher().subscribe_to_engine_notifications(7002);

    // Half a second of clipping audio: one notification per channel.
    let chunks = SAMPLE_RATE as usize / AUDIO_CHUNK_SIZE / 2;
    for _ in 0..chunks {
        harness.run_chunk();
    }
    settle();

    let clips = poster.clips.lock().unwrap().clone();
    let channel_0 = clips.iter().filter(|&&(ch, input)| ch == 0 && !input).count();
    let channel_1 = clips.iter().filter(|&&(ch, input)| ch == 1 && !input).count();
    assert_eq!(channel_0, 1);
    assert_eq!(channel_1, 1);
}

#[test]
fn test_multi_core_equivalence() {
    fn render(cores: usize) -> Vec<f32> {
        let mut harness = Harness::new(cores);
        for i in 0..4 {
            let name = format!("track_{}", i);
            harness.engine.create_track(&name, 2).unwrap();
            let track_id =
                harness.engine.processor_container().track_by_name(&name).unwrap().id();

            let uid = format!("test.gain_{}", i);
            harness
                .engine
                .register_plugin(&uid, Box::new(|name, _host| Box::new(TestGain::new(name))));
            let plugin_name = format!("gain_{}", i);
            let plugin_id = harness.engine.load_plugin(&uid, &plugin_name).unwrap();
            harness.engine.add_plugin_to_track(plugin_id, track_id, None).unwrap();

            // Distinct deterministic gain per track.
            let model = harness.engine.processor_container().processor(plugin_id).unwrap();
            let parameter = model.parameters().entry_by_name("gain").unwrap().descriptor().id();
            model.set_parameter_value(parameter, 0.1 * (i + 1) as f32).unwrap();

            harness.engine.connect_audio_input_channel(0, 0, &name).unwrap();
            harness.engine.connect_audio_input_channel(1, 1, &name).unwrap();
            harness.engine.connect_audio_output_channel(0, 0, &name).unwrap();
            harness.engine.connect_audio_output_channel(1, 1, &name).unwrap();
        }

        // Deterministic ramp input.
        for ch in 0..2 {
            let samples = harness.input.channel_mut(ch);
            for (frame, sample) in samples.iter_mut().enumerate() {
                *sample = (frame as f32 - 32.0) / 64.0 + ch as f32 * 0.01;
            }
        }

        let mut rendered = Vec::new();
        for _ in 0..8 {
            harness.run_chunk();
            rendered.extend_from_slice(harness.output.channel(0));
            rendered.extend_from_slice(harness.output.channel(1));
        }
        rendered
    }

    let single = render(1);
    let quad = render(4);
    assert_eq!(single, quad);
    assert!(single.iter().any(|&s| s != 0.0));
}

#[test]
fn test_realtime_state_machine() {
    let mut harness = Harness::new(1);
    assert_eq!(harness.engine.realtime_state(), RealtimeState::Stopped);
    assert!(harness.engine.enable_realtime(false).is_err());

    harness.engine.enable_realtime(true).unwrap();
    assert_eq!(harness.engine.realtime_state(), RealtimeState::Starting);
    assert!(harness.engine.enable_realtime(true).is_err());

    harness.run_chunk();
    assert_eq!(harness.engine.realtime_state(), RealtimeState::Running);

    harness.engine.enable_realtime(false).unwrap();
    assert_eq!(harness.engine.realtime_state(), RealtimeState::Stopping);
    harness.run_chunk();
    assert_eq!(harness.engine.realtime_state(), RealtimeState::Stopped);
}

#[test]
fn test_insert_protocol_while_running() {
    let mut harness = Harness::new(1);
    harness.engine.create_track("live", 2).unwrap();
    let track_id = harness.engine.processor_container().track_by_name("live").unwrap().id();

    harness.engine.enable_realtime(true).unwrap();
    harness.run_chunk();

    harness
        .engine
        .register_plugin("test.gain", Box::new(|name, _host| Box::new(TestGain::new(name))));
    let plugin_id = harness.engine.load_plugin("test.gain", "live_gain").unwrap();
    harness.engine.add_plugin_to_track(plugin_id, track_id, None).unwrap();

    // Queued, not yet acknowledged.
    assert!(!harness.engine.processor_container().is_live(plugin_id));

    harness.run_chunk();
    settle();
    assert!(harness.engine.processor_container().is_live(plugin_id));

    // And back out again.
    harness.engine.remove_plugin_from_track(plugin_id, track_id).unwrap();
    harness.run_chunk();
    settle();
    assert!(!harness.engine.processor_container().is_live(plugin_id));
    assert!(harness.engine.delete_plugin(plugin_id).is_ok());
}

#[test]
fn test_connections_rejected_while_running() {
    let mut harness = Harness::new(1);
    harness.engine.create_track("fixed", 2).unwrap();
    harness.engine.enable_realtime(true).unwrap();
    harness.run_chunk();

    assert!(harness.engine.connect_audio_input_channel(0, 0, "fixed").is_err());
    assert!(harness.engine.connect_audio_output_channel(0, 0, "fixed").is_err());
}

#[test]
fn test_event_to_removed_processor_routes_unknown() {
    let mut harness = Harness::new(1);
    harness.engine.create_track("gone", 2).unwrap();
    let track_id = harness.engine.processor_container().track_by_name("gone").unwrap().id();

    harness
        .engine
        .register_plugin("test.gain", Box::new(|name, _host| Box::new(TestGain::new(name))));
    let plugin_id = harness.engine.load_plugin("test.gain", "gone_gain").unwrap();
    harness.engine.add_plugin_to_track(plugin_id, track_id, None).unwrap();
    harness.engine.remove_plugin_from_track(plugin_id, track_id).unwrap();
    harness.engine.delete_plugin(plugin_id).unwrap();

    assert!(!harness.engine.processor_container().processor_exists(plugin_id));
    let result = harness.engine.send_rt_event(RtEvent::note_on(plugin_id, 0, 60, 1.0));
    assert!(result.is_err());
}

#[test]
fn test_cv_to_parameter_routing() {
    let mut harness = Harness::new(1);
    harness.engine.set_cv_input_channels(4).unwrap();
    harness.engine.create_track("cv", 2).unwrap();
    let track_id = harness.engine.processor_container().track_by_name("cv").unwrap().id();

    harness
        .engine
        .register_plugin("test.gain", Box::new(|name, _host| Box::new(TestGain::new(name))));
    let plugin_id = harness.engine.load_plugin("test.gain", "cv_gain").unwrap();
    harness.engine.add_plugin_to_track(plugin_id, track_id, None).unwrap();

    harness.engine.connect_cv_to_parameter("cv_gain", "gain", 2).unwrap();

    harness.in_controls.cv_in[2] = 0.8;
    harness.run_chunk();

    let model = harness.engine.processor_container().processor(plugin_id).unwrap();
    let parameter = model.parameters().entry_by_name("gain").unwrap().descriptor().id();
    let domain = model.parameter_value_in_domain(parameter).unwrap();
    assert!((domain - 8.0).abs() < 1e-5);
}

#[test]
fn test_tempo_event_reaches_transport() {
    let mut harness = Harness::new(1);
    harness.engine.send_async_event(RtEvent::TempoChange { tempo: 96.0, time: 0 }).unwrap();
    harness.run_chunk();
    assert_eq!(harness.engine.transport().tempo(), 96.0);
}

#[test]
fn test_completion_callback_from_engine_event() {
    let harness = Harness::new(1);
    let fired = Arc::new(AtomicBool::new(false));
    let fired_clone = Arc::clone(&fired);

    let event = Event::tempo(132.0).with_completion(Box::new(move |_status| {
        fired_clone.store(true, Ordering::SeqCst);
    }));
    harness.engine.event_dispatcher().post_event(event);
    settle();
    assert!(fired.load(Ordering::SeqCst));
}
