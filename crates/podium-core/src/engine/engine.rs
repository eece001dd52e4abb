//! The audio engine
//!
//! Top-level orchestrator: owns the processor container, the dispatcher,
//! the transport, the audio graph and the realtime state machine, and
//! exposes the driver-facing chunk callback.
//!
//! # Threading
//!
//! `process_chunk` runs on the driver's audio thread; the graph and the
//! dense routing table are touched there and only there while realtime
//! mode is active. Structural operations mutate the graph directly when
//! the engine is stopped, and switch to the insert/remove event protocol
//! when it is running: the DSP object is moved through the inbound queue,
//! spliced in by the audio thread, and the edit is considered complete
//! once the acknowledgement comes back on the outbound queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::SampleBuffer;
use crate::engine::clip_detector::ClipDetector;
use crate::engine::container::ProcessorContainer;
use crate::engine::dispatcher::{EventDispatcher, PendingOp, PendingOps};
use crate::engine::host_control::HostControl;
use crate::engine::worker_pool::WorkerPool;
use crate::error::{EngineError, EngineResult};
use crate::event::queue::{
    default_rt_event_channel, RtEventConsumer, RtEventProducer, RtEventSink,
};
use crate::event::rt::RtEvent;
use crate::event::{Event, EventKind};
use crate::processor::state::ProcessorState;
use crate::processor::Processor;
use crate::track::Track;
use crate::transport::Transport;
use crate::types::{
    ControlBuffer, ObjectId, PlayingMode, SyncMode, TimeSignature, AUDIO_CHUNK_SIZE,
    MAX_CV_PORTS, MAX_ENGINE_CHANNELS, MAX_GATE_PORTS, MAX_RT_PROCESSORS,
};

/// Maximum number of tracks in the graph; slots are reserved up front so
/// inserts while audio runs never reallocate the graph vector.
pub const MAX_TRACKS: usize = 64;

/// Realtime processing state. `Starting` and `Stopping` are transient and
/// advanced only by the audio thread via [`update_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RealtimeState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl RealtimeState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => RealtimeState::Starting,
            2 => RealtimeState::Running,
            3 => RealtimeState::Stopping,
            _ => RealtimeState::Stopped,
        }
    }
}

/// Advance transient states. This is the only way the realtime state
/// machine progresses past `Starting` and `Stopping`.
pub fn update_state(current: RealtimeState) -> RealtimeState {
    match current {
        RealtimeState::Starting => RealtimeState::Running,
        RealtimeState::Stopping => RealtimeState::Stopped,
        stable => stable,
    }
}

/// Factory building a named plugin instance; registered per uid.
pub type PluginFactory = Box<dyn Fn(&str, HostControl) -> Box<dyn Processor> + Send + Sync>;

/// Where an id routes to on the audio thread.
#[derive(Debug, Clone, Copy)]
enum RtSlot {
    /// The id is a track in the graph
    Track,
    /// The id is a processor on the given track
    OnTrack { track: ObjectId },
}

struct AudioConnection {
    engine_channel: usize,
    track_channel: usize,
    track: ObjectId,
}

struct CvConnection {
    processor: ObjectId,
    parameter: ObjectId,
    cv_port: usize,
}

struct GateConnection {
    processor: ObjectId,
    gate_port: usize,
    note: u8,
    channel: u8,
}

/// The engine. One per host process; owned by whoever drives audio.
pub struct AudioEngine {
    sample_rate: f32,
    container: Arc<ProcessorContainer>,
    dispatcher: EventDispatcher,
    transport: Transport,

    audio_graph: Vec<Box<Track>>,
    rt_table: Vec<Option<RtSlot>>,

    in_connections: Vec<AudioConnection>,
    out_connections: Vec<AudioConnection>,
    cv_in_routes: Vec<CvConnection>,
    cv_out_routes: Vec<CvConnection>,
    gate_in_routes: Vec<GateConnection>,
    gate_out_routes: Vec<GateConnection>,
    prev_gate_values: u32,
    outgoing_gate_values: u32,
    cv_out_values: [f32; MAX_CV_PORTS],
    gate_sync_input: Option<usize>,
    sync_to_gate: Option<(usize, u32)>,
    last_sync_tick: u64,

    state: AtomicU8,
    rt_in: RtEventConsumer,
    rt_in_producer: Arc<Mutex<RtEventProducer>>,
    main_out: RtEventSink,
    pending_ops: PendingOps,
    next_op: u64,

    worker_pool: Option<WorkerPool>,
    input_clip_detection: bool,
    output_clip_detection: bool,
    input_clip_detector: ClipDetector,
    output_clip_detector: ClipDetector,

    input_channels: usize,
    output_channels: usize,
    cv_input_channels: usize,
    cv_output_channels: usize,

    plugin_factories: HashMap<String, PluginFactory>,
}

impl AudioEngine {
    /// Create an engine. `rt_cores == 1` processes tracks inline on the
    /// audio thread; larger values fan independent tracks out over a
    /// worker pool of that many threads.
    pub fn new(sample_rate: f32, rt_cores: usize) -> Self {
        let container = Arc::new(ProcessorContainer::new());
        let (in_tx, in_rx) = default_rt_event_channel();
        let (out_tx, out_rx) = default_rt_event_channel();
        let rt_in_producer = Arc::new(Mutex::new(in_tx));
        let pending_ops: PendingOps = Arc::new(Mutex::new(HashMap::new()));
        let dispatcher = EventDispatcher::new(
            Arc::clone(&container),
            Arc::clone(&rt_in_producer),
            out_rx,
            Arc::clone(&pending_ops),
        );
        let worker_pool = if rt_cores > 1 {
            match WorkerPool::new(rt_cores) {
                Ok(pool) => Some(pool),
                Err(error) => {
                    log::error!("multi-core processing disabled: {}", error);
                    None
                }
            }
        } else {
            None
        };

        let mut audio_graph = Vec::new();
        audio_graph.reserve_exact(MAX_TRACKS);

        let mut engine = Self {
            sample_rate,
            container,
            dispatcher,
            transport: Transport::new(sample_rate),
            audio_graph,
            rt_table: vec![None; MAX_RT_PROCESSORS],
            in_connections: Vec::new(),
            out_connections: Vec::new(),
            cv_in_routes: Vec::new(),
            cv_out_routes: Vec::new(),
            gate_in_routes: Vec::new(),
            gate_out_routes: Vec::new(),
            prev_gate_values: 0,
            outgoing_gate_values: 0,
            cv_out_values: [0.0; MAX_CV_PORTS],
            gate_sync_input: None,
            sync_to_gate: None,
            last_sync_tick: 0,
            state: AtomicU8::new(RealtimeState::Stopped as u8),
            rt_in: in_rx,
            rt_in_producer,
            main_out: RtEventSink::new(out_tx),
            pending_ops,
            next_op: 1,
            worker_pool,
            input_clip_detection: false,
            output_clip_detection: false,
            input_clip_detector: ClipDetector::new(sample_rate, true),
            output_clip_detector: ClipDetector::new(sample_rate, false),
            input_channels: 2,
            output_channels: 2,
            cv_input_channels: 0,
            cv_output_channels: 0,
            plugin_factories: HashMap::new(),
        };
        crate::plugins::register_internal_plugins(&mut engine);
        engine
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn processor_container(&self) -> &Arc<ProcessorContainer> {
        &self.container
    }

    pub fn event_dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Handle handed to processors at construction time.
    pub fn host_control(&self) -> HostControl {
        HostControl::new(self.dispatcher.handle(), self.transport.view())
    }

    pub fn realtime_state(&self) -> RealtimeState {
        RealtimeState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// True while the realtime part may be executing on the audio thread.
    pub fn realtime(&self) -> bool {
        self.realtime_state() != RealtimeState::Stopped
    }

    fn ensure_stopped(&self) -> EngineResult<()> {
        if self.realtime() {
            Err(EngineError::RealtimeActive)
        } else {
            Ok(())
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Driver-facing configuration
    // ─────────────────────────────────────────────────────────────

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.transport.set_sample_rate(sample_rate);
        self.input_clip_detector.set_sample_rate(sample_rate);
        self.output_clip_detector.set_sample_rate(sample_rate);
        for track in &mut self.audio_graph {
            track.configure(sample_rate);
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn set_audio_input_channels(&mut self, channels: usize) -> EngineResult<()> {
        if channels > MAX_ENGINE_CHANNELS {
            return Err(EngineError::InvalidChannel);
        }
        self.input_channels = channels;
        Ok(())
    }

    pub fn set_audio_output_channels(&mut self, channels: usize) -> EngineResult<()> {
        if channels > MAX_ENGINE_CHANNELS {
            return Err(EngineError::InvalidChannel);
        }
        self.output_channels = channels;
        Ok(())
    }

    pub fn set_cv_input_channels(&mut self, channels: usize) -> EngineResult<()> {
        if channels > MAX_CV_PORTS {
            return Err(EngineError::InvalidChannel);
        }
        self.cv_input_channels = channels;
        Ok(())
    }

    pub fn set_cv_output_channels(&mut self, channels: usize) -> EngineResult<()> {
        if channels > MAX_CV_PORTS {
            return Err(EngineError::InvalidChannel);
        }
        self.cv_output_channels = channels;
        Ok(())
    }

    pub fn set_output_latency_ns(&mut self, latency_ns: u64) {
        self.transport.set_output_latency_ns(latency_ns);
    }

    pub fn enable_input_clip_detection(&mut self, enabled: bool) {
        self.input_clip_detection = enabled;
    }

    pub fn enable_output_clip_detection(&mut self, enabled: bool) {
        self.output_clip_detection = enabled;
    }

    // ─────────────────────────────────────────────────────────────
    // Transport control (non-RT)
    // ─────────────────────────────────────────────────────────────

    pub fn set_tempo(&self, tempo: f32) {
        self.transport.request_tempo(tempo);
    }

    pub fn set_time_signature(&self, signature: TimeSignature) {
        self.transport.request_time_signature(signature);
    }

    pub fn set_transport_mode(&self, mode: PlayingMode) {
        self.transport.request_playing_mode(mode);
    }

    pub fn set_tempo_sync_mode(&self, mode: SyncMode) {
        self.transport.request_sync_mode(mode);
    }

    // ─────────────────────────────────────────────────────────────
    // Realtime state machine
    // ─────────────────────────────────────────────────────────────

    pub fn enable_realtime(&mut self, enabled: bool) -> EngineResult<()> {
        let state = self.realtime_state();
        if enabled {
            match state {
                RealtimeState::Stopped => {
                    self.state.store(RealtimeState::Starting as u8, Ordering::Release);
                    Ok(())
                }
                _ => Err(EngineError::AlreadyEnabled),
            }
        } else {
            match state {
                RealtimeState::Stopped => Err(EngineError::NotEnabled),
                // Never picked up by the audio thread; stop directly.
                RealtimeState::Starting => {
                    self.state.store(RealtimeState::Stopped as u8, Ordering::Release);
                    Ok(())
                }
                _ => {
                    self.state.store(RealtimeState::Stopping as u8, Ordering::Release);
                    Ok(())
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Audio connections (engine stopped only)
    // ─────────────────────────────────────────────────────────────

    pub fn connect_audio_input_channel(
        &mut self,
        input_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        self.ensure_stopped()?;
        let track = self.container.track_by_name(track_name).ok_or(EngineError::InvalidTrack)?;
        if input_channel >= self.input_channels || track_channel >= track.input_channels() {
            return Err(EngineError::InvalidChannel);
        }
        self.in_connections.push(AudioConnection {
            engine_channel: input_channel,
            track_channel,
            track: track.id(),
        });
        Ok(())
    }

    pub fn connect_audio_output_channel(
        &mut self,
        output_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        self.ensure_stopped()?;
        let track = self.container.track_by_name(track_name).ok_or(EngineError::InvalidTrack)?;
        if output_channel >= self.output_channels || track_channel >= track.output_channels() {
            return Err(EngineError::InvalidChannel);
        }
        self.out_connections.push(AudioConnection {
            engine_channel: output_channel,
            track_channel,
            track: track.id(),
        });
        Ok(())
    }

    /// Connect a stereo pair: engine bus `input_bus` (channels `2n`,
    /// `2n + 1`) to the track's bus `track_bus`.
    pub fn connect_audio_input_bus(
        &mut self,
        input_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        for side in 0..2 {
            self.connect_audio_input_channel(input_bus * 2 + side, track_bus * 2 + side, track_name)?;
        }
        Ok(())
    }

    pub fn connect_audio_output_bus(
        &mut self,
        output_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        for side in 0..2 {
            self.connect_audio_output_channel(
                output_bus * 2 + side,
                track_bus * 2 + side,
                track_name,
            )?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // CV and gate routing (engine stopped only)
    // ─────────────────────────────────────────────────────────────

    fn lookup_parameter(
        &self,
        processor_name: &str,
        parameter_name: &str,
    ) -> EngineResult<(ObjectId, ObjectId)> {
        let model = self
            .container
            .processor_by_name(processor_name)
            .ok_or(EngineError::InvalidProcessor)?;
        let parameter = model
            .parameters()
            .entry_by_name(parameter_name)
            .map(|entry| entry.descriptor().id())
            .ok_or(EngineError::InvalidParameter)?;
        Ok((model.id(), parameter))
    }

    pub fn connect_cv_to_parameter(
        &mut self,
        processor_name: &str,
        parameter_name: &str,
        cv_input_id: usize,
    ) -> EngineResult<()> {
        self.ensure_stopped()?;
        if cv_input_id >= self.cv_input_channels {
            return Err(EngineError::InvalidChannel);
        }
        let (processor, parameter) = self.lookup_parameter(processor_name, parameter_name)?;
        self.cv_in_routes.push(CvConnection { processor, parameter, cv_port: cv_input_id });
        Ok(())
    }

    pub fn connect_cv_from_parameter(
        &mut self,
        processor_name: &str,
        parameter_name: &str,
        cv_output_id: usize,
    ) -> EngineResult<()> {
        self.ensure_stopped()?;
        if cv_output_id >= self.cv_output_channels {
            return Err(EngineError::InvalidChannel);
        }
        let (processor, parameter) = self.lookup_parameter(processor_name, parameter_name)?;
        self.cv_out_routes.push(CvConnection { processor, parameter, cv_port: cv_output_id });
        Ok(())
    }

    pub fn connect_gate_to_processor(
        &mut self,
        processor_name: &str,
        gate_input_id: usize,
        note_no: u8,
        channel: u8,
    ) -> EngineResult<()> {
        self.ensure_stopped()?;
        if gate_input_id >= MAX_GATE_PORTS {
            return Err(EngineError::InvalidChannel);
        }
        let model = self
            .container
            .processor_by_name(processor_name)
            .ok_or(EngineError::InvalidProcessor)?;
        self.gate_in_routes.push(GateConnection {
            processor: model.id(),
            gate_port: gate_input_id,
            note: note_no,
            channel,
        });
        Ok(())
    }

    pub fn connect_gate_from_processor(
        &mut self,
        processor_name: &str,
        gate_output_id: usize,
        note_no: u8,
        channel: u8,
    ) -> EngineResult<()> {
        self.ensure_stopped()?;
        if gate_output_id >= MAX_GATE_PORTS {
            return Err(EngineError::InvalidChannel);
        }
        let model = self
            .container
            .processor_by_name(processor_name)
            .ok_or(EngineError::InvalidProcessor)?;
        self.gate_out_routes.push(GateConnection {
            processor: model.id(),
            gate_port: gate_output_id,
            note: note_no,
            channel,
        });
        Ok(())
    }

    pub fn connect_gate_to_sync(&mut self, gate_input_id: usize, ppq_ticks: u32) -> EngineResult<()> {
        self.ensure_stopped()?;
        if gate_input_id >= MAX_GATE_PORTS || ppq_ticks == 0 {
            return Err(EngineError::InvalidChannel);
        }
        self.gate_sync_input = Some(gate_input_id);
        self.transport.set_sync_ppq(ppq_ticks);
        Ok(())
    }

    pub fn connect_sync_to_gate(&mut self, gate_output_id: usize, ppq_ticks: u32) -> EngineResult<()> {
        self.ensure_stopped()?;
        if gate_output_id >= MAX_GATE_PORTS || ppq_ticks == 0 {
            return Err(EngineError::InvalidChannel);
        }
        self.sync_to_gate = Some((gate_output_id, ppq_ticks));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Plugin registry
    // ─────────────────────────────────────────────────────────────

    /// Register a plugin factory under a unique uid.
    pub fn register_plugin(&mut self, uid: &str, factory: PluginFactory) {
        self.plugin_factories.insert(uid.to_string(), factory);
    }

    /// Instantiate and register a plugin. The instance is parked in the
    /// container until added to a track.
    pub fn load_plugin(&mut self, plugin_uid: &str, plugin_name: &str) -> EngineResult<ObjectId> {
        if self.container.processor_exists_by_name(plugin_name) {
            return Err(EngineError::InvalidProcessor);
        }
        let factory = self
            .plugin_factories
            .get(plugin_uid)
            .ok_or_else(|| EngineError::InvalidPluginUid(plugin_uid.to_string()))?;
        let mut dsp = factory(plugin_name, self.host_control());
        if let Err(error) = dsp.init(self.sample_rate) {
            return Err(EngineError::PluginLoadError(error.to_string()));
        }
        let model = Arc::clone(dsp.model());
        let id = model.id();
        if id as usize >= MAX_RT_PROCESSORS {
            return Err(EngineError::PluginLoadError("processor id table exhausted".to_string()));
        }
        self.container.add_processor(model, dsp)?;
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────
    // Structural operations
    // ─────────────────────────────────────────────────────────────

    fn allocate_op(&mut self, op: PendingOp) -> u64 {
        let id = self.next_op;
        self.next_op += 1;
        self.pending_ops.lock().unwrap().insert(id, op);
        id
    }

    fn abandon_op(&mut self, id: u64) {
        self.pending_ops.lock().unwrap().remove(&id);
    }

    /// Push an event into the inbound RT queue from the non-RT side.
    pub fn send_async_event(&self, event: RtEvent) -> EngineResult<()> {
        match self.rt_in_producer.lock().unwrap().push(event) {
            Ok(()) => Ok(()),
            Err((error, _event)) => Err(error),
        }
    }

    /// Create an empty track and wire it into the graph.
    pub fn create_track(&mut self, name: &str, channel_count: usize) -> EngineResult<()> {
        let track = Track::new(name, channel_count)?;
        self.install_track(track)
    }

    /// Create a track addressed in stereo-pair busses.
    pub fn create_multibus_track(
        &mut self,
        name: &str,
        input_busses: usize,
        output_busses: usize,
    ) -> EngineResult<()> {
        let track = Track::new_multibus(name, input_busses, output_busses)?;
        self.install_track(track)
    }

    fn install_track(&mut self, mut track: Track) -> EngineResult<()> {
        if self.audio_graph.len() >= MAX_TRACKS {
            return Err(EngineError::InvalidTrack);
        }
        let id = track.id();
        if id as usize >= MAX_RT_PROCESSORS {
            return Err(EngineError::InvalidTrack);
        }
        track
            .init(self.sample_rate)
            .map_err(|error| EngineError::PluginLoadError(error.to_string()))?;
        self.container.add_track(Arc::clone(track.model()))?;

        if !self.realtime() {
            self.rt_table[id as usize] = Some(RtSlot::Track);
            self.audio_graph.push(Box::new(track));
            self.container.set_live(id, true);
            return Ok(());
        }

        let op = self.allocate_op(PendingOp::InsertTrack { track: id });
        let event = RtEvent::InsertTrack { track: Box::new(track), op };
        if let Err(error) = self.send_async_event(event) {
            self.abandon_op(op);
            self.container.set_live(id, false);
            let _ = self.container.remove(id);
            return Err(error);
        }
        Ok(())
    }

    /// Delete a track. The track must be empty.
    pub fn delete_track(&mut self, track_name: &str) -> EngineResult<()> {
        let model = self.container.track_by_name(track_name).ok_or(EngineError::InvalidTrack)?;
        let id = model.id();
        if !self.container.processors_on_track(id).is_empty() {
            return Err(EngineError::InvalidTrack);
        }

        if !self.realtime() {
            let position = self
                .audio_graph
                .iter()
                .position(|track| track.id() == id)
                .ok_or(EngineError::InvalidTrack)?;
            let track = self.audio_graph.remove(position);
            self.rt_table[id as usize] = None;
            drop(track);
            self.container.set_live(id, false);
            self.container.remove(id)?;
            return Ok(());
        }

        let op = self.allocate_op(PendingOp::RemoveTrack { track: id });
        let event = RtEvent::RemoveTrack { track: id, op };
        if let Err(error) = self.send_async_event(event) {
            self.abandon_op(op);
            return Err(error);
        }
        Ok(())
    }

    /// Add a loaded plugin to a track, optionally before another plugin.
    pub fn add_plugin_to_track(
        &mut self,
        plugin_id: ObjectId,
        track_id: ObjectId,
        before_plugin_id: Option<ObjectId>,
    ) -> EngineResult<()> {
        self.container.track(track_id).ok_or(EngineError::InvalidTrack)?;
        // Validates existence, exclusivity and the anchor position.
        self.container.add_to_track(plugin_id, track_id, before_plugin_id)?;
        let dsp = match self.container.take_dsp(plugin_id) {
            Some(dsp) => dsp,
            None => {
                let _ = self.container.remove_from_track(plugin_id, track_id);
                return Err(EngineError::InvalidProcessor);
            }
        };

        if !self.realtime() {
            let track = match self.track_in_graph(track_id) {
                Some(track) => track,
                None => {
                    self.container.restore_dsp(plugin_id, dsp);
                    let _ = self.container.remove_from_track(plugin_id, track_id);
                    return Err(EngineError::InvalidTrack);
                }
            };
            if let Err(dsp) = track.add_processor(dsp, before_plugin_id) {
                self.container.restore_dsp(plugin_id, dsp);
                let _ = self.container.remove_from_track(plugin_id, track_id);
                return Err(EngineError::InvalidProcessor);
            }
            self.rt_table[plugin_id as usize] = Some(RtSlot::OnTrack { track: track_id });
            self.container.set_live(plugin_id, true);
            return Ok(());
        }

        let op = self.allocate_op(PendingOp::InsertProcessor { processor: plugin_id });
        let event = RtEvent::InsertProcessor {
            track: track_id,
            before: before_plugin_id,
            processor: dsp,
            op,
        };
        let push_result = self.rt_in_producer.lock().unwrap().push(event);
        if let Err((error, returned)) = push_result {
            self.abandon_op(op);
            let _ = self.container.remove_from_track(plugin_id, track_id);
            // The failed push hands the event back; recover the DSP box.
            if let RtEvent::InsertProcessor { processor, .. } = returned {
                self.container.restore_dsp(plugin_id, processor);
            }
            return Err(error);
        }
        Ok(())
    }

    /// Remove a plugin from a track. The instance stays loaded and can be
    /// added to another track.
    pub fn remove_plugin_from_track(
        &mut self,
        plugin_id: ObjectId,
        track_id: ObjectId,
    ) -> EngineResult<()> {
        self.container.remove_from_track(plugin_id, track_id)?;

        if !self.realtime() {
            let track = self.track_in_graph(track_id).ok_or(EngineError::InvalidTrack)?;
            let dsp = track.remove_processor(plugin_id).ok_or(EngineError::InvalidProcessor)?;
            self.rt_table[plugin_id as usize] = None;
            self.container.restore_dsp(plugin_id, dsp);
            return Ok(());
        }

        let op = self.allocate_op(PendingOp::RemoveProcessor { processor: plugin_id });
        let event = RtEvent::RemoveProcessor { track: track_id, processor: plugin_id, op };
        if let Err(error) = self.send_async_event(event) {
            self.abandon_op(op);
            return Err(error);
        }
        Ok(())
    }

    /// Delete a loaded plugin. Must not be bound to any track.
    pub fn delete_plugin(&mut self, plugin_id: ObjectId) -> EngineResult<()> {
        self.container.remove(plugin_id)
    }

    /// Apply a state snapshot to a processor, optionally notifying
    /// parameter-change subscribers.
    pub fn set_processor_state(
        &self,
        processor_id: ObjectId,
        state: &ProcessorState,
        send_notifications: bool,
    ) -> EngineResult<()> {
        let model = self.container.processor(processor_id).ok_or(EngineError::InvalidProcessor)?;
        model.set_state(state);
        if send_notifications {
            for (parameter, normalized) in &state.parameters {
                if let Ok(domain) = model.parameter_value_in_domain(*parameter) {
                    let event = Event::new(EventKind::ParameterChangeNotification {
                        parameter: *parameter,
                        normalized: *normalized,
                        domain,
                    })
                    .with_receiver(processor_id);
                    self.dispatcher.notify_parameter_subscribers(&event);
                }
            }
        }
        Ok(())
    }

    fn track_in_graph(&mut self, id: ObjectId) -> Option<&mut Box<Track>> {
        self.audio_graph.iter_mut().find(|track| track.id() == id)
    }

    // ─────────────────────────────────────────────────────────────
    // The chunk callback
    // ─────────────────────────────────────────────────────────────

    /// Process one chunk. Called by the audio front-end on its realtime
    /// thread with caller-owned buffers of exactly
    /// [`AUDIO_CHUNK_SIZE`] frames per channel.
    pub fn process_chunk(
        &mut self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        in_controls: &ControlBuffer,
        out_controls: &mut ControlBuffer,
        timestamp_ns: u64,
        samplecount: u64,
    ) {
        let state = self.realtime_state();
        let next_state = update_state(state);
        if next_state != state {
            self.state.store(next_state as u8, Ordering::Release);
        }

        // a. Musical time first; everything this chunk sees it.
        self.transport.update(samplecount, timestamp_ns);
        self.main_out.flush();

        // b. Control voltage and gate inputs become events.
        self.route_cv_gate_inputs(in_controls, samplecount);

        // c. Inbound events, FIFO up to the end of this chunk.
        let chunk_end = samplecount + AUDIO_CHUNK_SIZE as u64;
        while let Some(time) = self.rt_in.peek_time() {
            if time > chunk_end {
                break;
            }
            if let Some(event) = self.rt_in.pop() {
                self.process_rt_event(event);
            }
        }

        // d. Input clip scan.
        if self.input_clip_detection {
            self.input_clip_detector.detect(&input.view(self.input_channels), &mut self.main_out);
        }

        // e. Stage inputs and run every track.
        for track in &mut self.audio_graph {
            track.input_staging_mut().clear();
        }
        for connection in &self.in_connections {
            if let Some(track) =
                self.audio_graph.iter_mut().find(|track| track.id() == connection.track)
            {
                let staging = track.input_staging_mut();
                staging
                    .channel_mut(connection.track_channel)
                    .copy_from_slice(input.channel(connection.engine_channel));
            }
        }
        match &self.worker_pool {
            Some(pool) => pool.process_tracks(&mut self.audio_graph),
            None => {
                for track in &mut self.audio_graph {
                    track.process_chunk();
                }
            }
        }

        // f. Mix track outputs to the engine output.
        output.clear();
        for connection in &self.out_connections {
            if let Some(track) =
                self.audio_graph.iter().find(|track| track.id() == connection.track)
            {
                let src = track.output_staging().channel(connection.track_channel);
                let dst = output.channel_mut(connection.engine_channel);
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    *d += *s;
                }
            }
        }

        // g. Outgoing events, gates and CV.
        self.process_outgoing_events(out_controls);

        // h. Output clip scan.
        if self.output_clip_detection {
            self.output_clip_detector
                .detect(&output.view(self.output_channels), &mut self.main_out);
        }
    }

    /// Process an event immediately in RT context. Only valid on the audio
    /// thread, before or between chunk callbacks.
    pub fn send_rt_event(&mut self, event: RtEvent) -> EngineResult<()> {
        match event.receiver() {
            Some(receiver) => {
                let slot = self
                    .rt_table
                    .get(receiver as usize)
                    .and_then(|slot| slot.as_ref())
                    .copied();
                if slot.is_none() {
                    return Err(EngineError::InvalidProcessor);
                }
                self.process_rt_event(event);
                Ok(())
            }
            None => {
                self.process_rt_event(event);
                Ok(())
            }
        }
    }

    fn process_rt_event(&mut self, event: RtEvent) {
        match event {
            RtEvent::TempoChange { tempo, .. } => self.transport.set_tempo(tempo),
            RtEvent::TimeSignatureChange { signature, .. } => {
                self.transport.set_time_signature(signature)
            }
            RtEvent::PlayingModeChange { mode, .. } => self.transport.set_playing_mode(mode),
            RtEvent::SyncModeChange { mode, .. } => self.transport.set_sync_mode(mode),
            RtEvent::StopEngine => {
                self.state.store(RealtimeState::Stopping as u8, Ordering::Release);
            }
            RtEvent::InsertTrack { track, op } => {
                let id = track.id();
                if self.audio_graph.len() >= MAX_TRACKS || (id as usize) >= MAX_RT_PROCESSORS {
                    log::warn!("track {} rejected by the realtime part", id);
                    self.main_out.push(RtEvent::OpCompleted { op, success: false });
                    return;
                }
                self.rt_table[id as usize] = Some(RtSlot::Track);
                for processor_id in track.processor_ids() {
                    if (processor_id as usize) < MAX_RT_PROCESSORS {
                        self.rt_table[processor_id as usize] = Some(RtSlot::OnTrack { track: id });
                    }
                }
                self.audio_graph.push(track);
                self.main_out.push(RtEvent::OpCompleted { op, success: true });
            }
            RtEvent::RemoveTrack { track, op } => {
                match self.audio_graph.iter().position(|t| t.id() == track) {
                    Some(position) => {
                        let removed = self.audio_graph.remove(position);
                        self.rt_table[track as usize] = None;
                        for processor_id in removed.processor_ids() {
                            if (processor_id as usize) < MAX_RT_PROCESSORS {
                                self.rt_table[processor_id as usize] = None;
                            }
                        }
                        self.main_out.push(RtEvent::TrackReturned { track: removed, op });
                    }
                    None => {
                        self.main_out.push(RtEvent::OpCompleted { op, success: false });
                    }
                }
            }
            RtEvent::InsertProcessor { track, before, processor, op } => {
                let id = processor.model().id();
                if (id as usize) >= MAX_RT_PROCESSORS {
                    self.main_out.push(RtEvent::ProcessorReturned { processor, op });
                    return;
                }
                match self.audio_graph.iter_mut().position(|t| t.id() == track) {
                    Some(position) => {
                        match self.audio_graph[position].add_processor(processor, before) {
                            Ok(()) => {
                                self.rt_table[id as usize] = Some(RtSlot::OnTrack { track });
                                self.main_out.push(RtEvent::OpCompleted { op, success: true });
                            }
                            Err(processor) => {
                                self.main_out
                                    .push(RtEvent::ProcessorReturned { processor, op });
                            }
                        }
                    }
                    None => {
                        self.main_out.push(RtEvent::ProcessorReturned { processor, op });
                    }
                }
            }
            RtEvent::RemoveProcessor { track, processor, op } => {
                let removed = self
                    .audio_graph
                    .iter_mut()
                    .find(|t| t.id() == track)
                    .and_then(|t| t.remove_processor(processor));
                match removed {
                    Some(dsp) => {
                        self.rt_table[processor as usize] = None;
                        self.main_out.push(RtEvent::ProcessorReturned { processor: dsp, op });
                    }
                    None => {
                        self.main_out.push(RtEvent::OpCompleted { op, success: false });
                    }
                }
            }
            addressed => {
                Self::route_event(
                    &mut self.audio_graph,
                    &self.rt_table,
                    &mut self.main_out,
                    addressed,
                );
            }
        }
    }

    /// Deliver an addressed event to its track or processor. Events for
    /// unknown ids bounce to the outbound queue where the dispatcher logs
    /// them.
    fn route_event(
        graph: &mut [Box<Track>],
        table: &[Option<RtSlot>],
        main_out: &mut RtEventSink,
        event: RtEvent,
    ) {
        let receiver = match event.receiver() {
            Some(receiver) => receiver,
            None => {
                log::debug!("unaddressed event {:?} ignored", event);
                return;
            }
        };
        let slot = table.get(receiver as usize).and_then(|slot| slot.as_ref());
        let track_id = match slot {
            Some(RtSlot::Track) => receiver,
            Some(RtSlot::OnTrack { track }) => *track,
            None => {
                log::warn!("event for unknown processor {}", receiver);
                main_out.push(event);
                return;
            }
        };
        match graph.iter_mut().find(|track| track.id() == track_id) {
            Some(track) => {
                // The sink argument is unused by tracks; they queue onto
                // their own outbound ring.
                track.process_event(event, main_out);
            }
            None => {
                log::warn!("routing table references missing track {}", track_id);
                main_out.push(event);
            }
        }
    }

    fn route_cv_gate_inputs(&mut self, controls: &ControlBuffer, samplecount: u64) {
        for route in &self.cv_in_routes {
            let value = controls.cv_in[route.cv_port].clamp(0.0, 1.0);
            let event = RtEvent::float_parameter_change(route.processor, route.parameter, value);
            Self::route_event(&mut self.audio_graph, &self.rt_table, &mut self.main_out, event);
        }

        let gate_in = controls.gate_in;
        let changed = gate_in ^ self.prev_gate_values;
        if changed != 0 {
            for route in &self.gate_in_routes {
                let bit = 1u32 << route.gate_port;
                if changed & bit == 0 {
                    continue;
                }
                let event = if gate_in & bit != 0 {
                    RtEvent::note_on(route.processor, route.channel, route.note, 1.0)
                } else {
                    RtEvent::note_off(route.processor, route.channel, route.note, 0.0)
                };
                Self::route_event(&mut self.audio_graph, &self.rt_table, &mut self.main_out, event);
            }
            if let Some(port) = self.gate_sync_input {
                let bit = 1u32 << port;
                if changed & bit != 0 && gate_in & bit != 0 {
                    self.transport.sync_pulse(samplecount);
                }
            }
        }
        self.prev_gate_values = gate_in;
    }

    fn process_outgoing_events(&mut self, out_controls: &mut ControlBuffer) {
        let main_out = &mut self.main_out;
        let gate_routes = &self.gate_out_routes;
        let cv_routes = &self.cv_out_routes;
        let cv_out_values = &mut self.cv_out_values;
        let mut gate_values = self.outgoing_gate_values;

        for track in &mut self.audio_graph {
            track.collect_events(|event| {
                match &event {
                    RtEvent::NoteOn { processor, channel, note, .. } => {
                        if let Some(route) = gate_routes.iter().find(|route| {
                            route.processor == *processor
                                && route.note == *note
                                && route.channel == *channel
                        }) {
                            gate_values |= 1 << route.gate_port;
                            return;
                        }
                    }
                    RtEvent::NoteOff { processor, channel, note, .. } => {
                        if let Some(route) = gate_routes.iter().find(|route| {
                            route.processor == *processor
                                && route.note == *note
                                && route.channel == *channel
                        }) {
                            gate_values &= !(1 << route.gate_port);
                            return;
                        }
                    }
                    RtEvent::ParameterChangeNotification {
                        processor, parameter, normalized, ..
                    } => {
                        if let Some(route) = cv_routes.iter().find(|route| {
                            route.processor == *processor && route.parameter == *parameter
                        }) {
                            cv_out_values[route.cv_port] = normalized.clamp(0.0, 1.0);
                        }
                    }
                    _ => {}
                }
                main_out.push(event);
            });
        }

        // Sync pulses on the configured gate output.
        if let Some((port, ppq)) = self.sync_to_gate {
            let beat = self.transport.beat_position();
            let tick = (beat * ppq as f64).floor() as u64;
            if tick != self.last_sync_tick {
                gate_values |= 1 << port;
                self.last_sync_tick = tick;
            } else {
                gate_values &= !(1u32 << port);
            }
        }

        self.outgoing_gate_values = gate_values;
        out_controls.gate_out = gate_values;
        out_controls.cv_out[..self.cv_output_channels]
            .copy_from_slice(&cv_out_values[..self.cv_output_channels]);
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.dispatcher.stop();
    }
}
