//! Musical time derived from sample counts
//!
//! The transport advances by exactly one chunk per `process_chunk` call and
//! recomputes its derived fields (beat position, bar start) from the sample
//! count each time. Writers on non-RT threads never touch the live state:
//! they park changes in a mutex-guarded pending slot which the audio thread
//! applies at the next chunk boundary. Playing and sync mode changes wait
//! for the next bar when the transport is rolling, so mode flips stay on the
//! grid.
//!
//! Processors read the transport through [`TransportView`], a set of atomic
//! cells republished once per chunk.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::types::{PlayingMode, SyncMode, TimeSignature, AUDIO_CHUNK_SIZE};

/// Default tempo in beats per minute.
pub const DEFAULT_TEMPO: f32 = 120.0;

/// Changes requested from non-RT threads, applied at the next chunk.
#[derive(Debug, Default)]
struct PendingChanges {
    tempo: Option<f32>,
    signature: Option<TimeSignature>,
    playing_mode: Option<PlayingMode>,
    sync_mode: Option<SyncMode>,
}

/// Lock-free snapshot of the transport for processors and control threads.
///
/// All fields are plain atomics; readers see the state published at the
/// most recent chunk boundary.
#[derive(Debug)]
pub struct TransportView {
    tempo_bits: AtomicU32,
    beat_bits: AtomicU64,
    bar_start_bits: AtomicU64,
    samples: AtomicU64,
    playing: AtomicU8,
    sync: AtomicU8,
    signature_num: AtomicU32,
    signature_den: AtomicU32,
}

impl TransportView {
    fn new() -> Self {
        Self {
            tempo_bits: AtomicU32::new(DEFAULT_TEMPO.to_bits()),
            beat_bits: AtomicU64::new(0f64.to_bits()),
            bar_start_bits: AtomicU64::new(0f64.to_bits()),
            samples: AtomicU64::new(0),
            playing: AtomicU8::new(PlayingMode::Stopped as u8),
            sync: AtomicU8::new(SyncMode::Internal as u8),
            signature_num: AtomicU32::new(4),
            signature_den: AtomicU32::new(4),
        }
    }

    pub fn tempo(&self) -> f32 {
        f32::from_bits(self.tempo_bits.load(Ordering::Relaxed))
    }

    /// Beat position at the start of the current chunk.
    pub fn beat_position(&self) -> f64 {
        f64::from_bits(self.beat_bits.load(Ordering::Relaxed))
    }

    /// Beat position of the start of the current bar.
    pub fn bar_start_beat(&self) -> f64 {
        f64::from_bits(self.bar_start_bits.load(Ordering::Relaxed))
    }

    pub fn samples_since_start(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn playing_mode(&self) -> PlayingMode {
        PlayingMode::from_raw(self.playing.load(Ordering::Relaxed))
    }

    pub fn sync_mode(&self) -> SyncMode {
        SyncMode::from_raw(self.sync.load(Ordering::Relaxed))
    }

    pub fn time_signature(&self) -> TimeSignature {
        TimeSignature::new(
            self.signature_num.load(Ordering::Relaxed),
            self.signature_den.load(Ordering::Relaxed),
        )
    }
}

/// The engine's musical-time state machine. Owned by the audio engine and
/// updated on the audio thread; see the module docs for the write paths.
pub struct Transport {
    sample_rate: f64,
    samples_since_start: u64,
    current_time_ns: u64,
    output_latency_ns: u64,
    tempo: f32,
    signature: TimeSignature,
    playing_mode: PlayingMode,
    sync_mode: SyncMode,
    beat_count: f64,
    bar_start_beat: f64,
    beats_per_chunk: f64,
    pending: Arc<Mutex<PendingChanges>>,
    view: Arc<TransportView>,
    sync_ppq: u32,
    last_sync_pulse: Option<u64>,
}

impl Transport {
    pub fn new(sample_rate: f32) -> Self {
        let mut transport = Self {
            sample_rate: sample_rate as f64,
            samples_since_start: 0,
            current_time_ns: 0,
            output_latency_ns: 0,
            tempo: DEFAULT_TEMPO,
            signature: TimeSignature::default(),
            playing_mode: PlayingMode::Stopped,
            sync_mode: SyncMode::Internal,
            beat_count: 0.0,
            bar_start_beat: 0.0,
            beats_per_chunk: 0.0,
            pending: Arc::new(Mutex::new(PendingChanges::default())),
            view: Arc::new(TransportView::new()),
            sync_ppq: 0,
            last_sync_pulse: None,
        };
        transport.recompute_beats_per_chunk();
        transport
    }

    /// Shared read-only view handed to processors via host control.
    pub fn view(&self) -> Arc<TransportView> {
        Arc::clone(&self.view)
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate as f64;
        self.recompute_beats_per_chunk();
    }

    pub fn set_output_latency_ns(&mut self, latency_ns: u64) {
        self.output_latency_ns = latency_ns;
    }

    pub fn output_latency_ns(&self) -> u64 {
        self.output_latency_ns
    }

    // ─────────────────────────────────────────────────────────────
    // Non-RT write path: requests land in the pending slot
    // ─────────────────────────────────────────────────────────────

    pub fn request_tempo(&self, tempo: f32) {
        self.pending.lock().unwrap().tempo = Some(tempo.max(1.0));
    }

    pub fn request_time_signature(&self, signature: TimeSignature) {
        self.pending.lock().unwrap().signature = Some(signature);
    }

    pub fn request_playing_mode(&self, mode: PlayingMode) {
        self.pending.lock().unwrap().playing_mode = Some(mode);
    }

    pub fn request_sync_mode(&self, mode: SyncMode) {
        self.pending.lock().unwrap().sync_mode = Some(mode);
    }

    // ─────────────────────────────────────────────────────────────
    // RT write path: events already on the audio thread
    // ─────────────────────────────────────────────────────────────

    pub fn set_tempo(&mut self, tempo: f32) {
        self.tempo = tempo.max(1.0);
        self.recompute_beats_per_chunk();
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature) {
        self.signature = signature;
    }

    pub fn set_playing_mode(&mut self, mode: PlayingMode) {
        self.playing_mode = mode;
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode) {
        self.sync_mode = mode;
    }

    /// Configure the pulses-per-quarter-note rate used for gate sync input.
    pub fn set_sync_ppq(&mut self, ppq: u32) {
        self.sync_ppq = ppq;
        self.last_sync_pulse = None;
    }

    /// Register a sync pulse seen on the configured gate input. When the
    /// sync mode is [`SyncMode::GateInput`], pulse spacing infers the tempo.
    pub fn sync_pulse(&mut self, sample_time: u64) {
        if self.sync_mode != SyncMode::GateInput || self.sync_ppq == 0 {
            return;
        }
        if let Some(last) = self.last_sync_pulse {
            let spacing = sample_time.saturating_sub(last);
            if spacing > 0 {
                let tempo = 60.0 * self.sample_rate / (spacing as f64 * self.sync_ppq as f64);
                self.set_tempo(tempo as f32);
            }
        }
        self.last_sync_pulse = Some(sample_time);
    }

    /// Advance to the chunk starting at `samplecount`, applying pending
    /// changes, recomputing derived positions and publishing the view.
    /// Called exactly once per `process_chunk`, before anything else.
    pub fn update(&mut self, samplecount: u64, timestamp_ns: u64) {
        self.apply_pending();

        self.samples_since_start = samplecount;
        self.current_time_ns = timestamp_ns;

        let previous_bar_start = self.bar_start_beat;
        self.beat_count =
            self.samples_since_start as f64 * self.tempo as f64 / (60.0 * self.sample_rate);
        let beats_per_bar = self.signature.beats_per_bar();
        self.bar_start_beat = (self.beat_count / beats_per_bar).floor() * beats_per_bar;

        // Mode changes requested while rolling wait for the bar line.
        if self.bar_start_beat != previous_bar_start || self.playing_mode == PlayingMode::Stopped {
            self.apply_deferred_modes();
        }

        self.publish();
    }

    fn apply_pending(&mut self) {
        let (tempo, signature) = {
            let mut pending = self.pending.lock().unwrap();
            (pending.tempo.take(), pending.signature.take())
        };
        if let Some(tempo) = tempo {
            self.set_tempo(tempo);
        }
        if let Some(signature) = signature {
            self.signature = signature;
        }
        if self.playing_mode == PlayingMode::Stopped {
            self.apply_deferred_modes();
        }
    }

    fn apply_deferred_modes(&mut self) {
        let (playing, sync) = {
            let mut pending = self.pending.lock().unwrap();
            (pending.playing_mode.take(), pending.sync_mode.take())
        };
        if let Some(mode) = playing {
            self.playing_mode = mode;
        }
        if let Some(mode) = sync {
            self.sync_mode = mode;
            self.last_sync_pulse = None;
        }
    }

    fn publish(&self) {
        let view = &self.view;
        view.tempo_bits.store(self.tempo.to_bits(), Ordering::Relaxed);
        view.beat_bits.store(self.beat_count.to_bits(), Ordering::Relaxed);
        view.bar_start_bits.store(self.bar_start_beat.to_bits(), Ordering::Relaxed);
        view.samples.store(self.samples_since_start, Ordering::Relaxed);
        view.playing.store(self.playing_mode as u8, Ordering::Relaxed);
        view.sync.store(self.sync_mode as u8, Ordering::Relaxed);
        view.signature_num.store(self.signature.numerator, Ordering::Relaxed);
        view.signature_den.store(self.signature.denominator, Ordering::Relaxed);
    }

    fn recompute_beats_per_chunk(&mut self) {
        self.beats_per_chunk =
            AUDIO_CHUNK_SIZE as f64 * self.tempo as f64 / (60.0 * self.sample_rate);
    }

    // ─────────────────────────────────────────────────────────────
    // Getters
    // ─────────────────────────────────────────────────────────────

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate as f32
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.signature
    }

    pub fn playing_mode(&self) -> PlayingMode {
        self.playing_mode
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn samples_since_start(&self) -> u64 {
        self.samples_since_start
    }

    pub fn current_time_ns(&self) -> u64 {
        self.current_time_ns
    }

    pub fn beat_position(&self) -> f64 {
        self.beat_count
    }

    pub fn bar_start_beat(&self) -> f64 {
        self.bar_start_beat
    }

    pub fn beats_per_chunk(&self) -> f64 {
        self.beats_per_chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48_000.0;

    fn samples_for_beats(beats: f64, tempo: f64) -> u64 {
        (beats * 60.0 * SAMPLE_RATE as f64 / tempo) as u64
    }

    #[test]
    fn test_beat_derivation() {
        let mut transport = Transport::new(SAMPLE_RATE);
        // 120 bpm = 2 beats per second = 96000 samples for 4 beats
        transport.update(samples_for_beats(4.0, 120.0), 0);
        assert!((transport.beat_position() - 4.0).abs() < 1e-9);
        assert_eq!(transport.bar_start_beat(), 4.0);

        transport.update(samples_for_beats(5.5, 120.0), 0);
        assert!((transport.beat_position() - 5.5).abs() < 1e-9);
        assert_eq!(transport.bar_start_beat(), 4.0);
    }

    #[test]
    fn test_pending_tempo_applies_at_chunk_boundary() {
        let mut transport = Transport::new(SAMPLE_RATE);
        transport.request_tempo(90.0);
        assert_eq!(transport.tempo(), DEFAULT_TEMPO);

        transport.update(0, 0);
        assert_eq!(transport.tempo(), 90.0);
        assert_eq!(transport.view().tempo(), 90.0);
    }

    #[test]
    fn test_mode_change_immediate_when_stopped() {
        let mut transport = Transport::new(SAMPLE_RATE);
        transport.request_playing_mode(PlayingMode::Playing);
        transport.update(0, 0);
        assert_eq!(transport.playing_mode(), PlayingMode::Playing);
    }

    #[test]
    fn test_mode_change_waits_for_bar_while_playing() {
        let mut transport = Transport::new(SAMPLE_RATE);
        transport.request_playing_mode(PlayingMode::Playing);
        transport.update(0, 0);

        // Request a stop mid-bar; it must hold until the next bar line.
        transport.request_playing_mode(PlayingMode::Stopped);
        transport.update(samples_for_beats(1.0, 120.0), 0);
        assert_eq!(transport.playing_mode(), PlayingMode::Playing);

        transport.update(samples_for_beats(4.0, 120.0), 0);
        assert_eq!(transport.playing_mode(), PlayingMode::Stopped);
    }

    #[test]
    fn test_gate_sync_tempo_inference() {
        let mut transport = Transport::new(SAMPLE_RATE);
        transport.set_sync_mode(SyncMode::GateInput);
        transport.set_sync_ppq(1);

        // Pulses 24000 samples apart at 48 kHz = 2 Hz = 120 bpm at 1 ppq.
        transport.sync_pulse(0);
        transport.sync_pulse(24_000);
        assert!((transport.tempo() - 120.0).abs() < 0.01);
    }

    #[test]
    fn test_view_publishes_signature() {
        let mut transport = Transport::new(SAMPLE_RATE);
        transport.request_time_signature(TimeSignature::new(3, 4));
        transport.update(0, 0);

        let view = transport.view();
        assert_eq!(view.time_signature(), TimeSignature::new(3, 4));
    }
}
