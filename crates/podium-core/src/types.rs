//! Common types and constants shared across the engine
//!
//! Everything here is cheap, `Copy` where possible, and safe to touch from
//! the audio thread.

use std::sync::atomic::{AtomicU32, Ordering};

/// Number of frames processed per chunk. The whole engine is built around
/// fixed-size chunks; the driver front-end is expected to adapt its period
/// size to a multiple of this.
pub const AUDIO_CHUNK_SIZE: usize = 64;

/// Maximum number of audio channels a track or processor can expose.
pub const MAX_TRACK_CHANNELS: usize = 16;

/// Maximum number of engine-level audio channels (driver side).
pub const MAX_ENGINE_CHANNELS: usize = 16;

/// Number of control voltage ports on the driver boundary.
pub const MAX_CV_PORTS: usize = 8;

/// Number of gate ports on the driver boundary (one bit each).
pub const MAX_GATE_PORTS: usize = 32;

/// Upper bound of the dense id -> processor routing table on the audio
/// thread. Registration of a processor whose id falls outside the table
/// fails; ids are never recycled.
pub const MAX_RT_PROCESSORS: usize = 1000;

/// Process-wide unique identifier for processors, tracks and parameters.
pub type ObjectId = u32;

static NEXT_OBJECT_ID: AtomicU32 = AtomicU32::new(0);

/// Allocate a fresh [`ObjectId`] from the process-wide counter.
///
/// Ids are monotonically increasing and never reused. 32 bits last a very
/// long time at the rate hosts create processors; wrap-around is not
/// handled.
pub fn next_object_id() -> ObjectId {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Control voltage and gate data exchanged with the driver once per chunk.
///
/// CV values are normalized to `[0, 1]` and sampled once per chunk; gates
/// are one bit per port, packed into a 32-bit mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlBuffer {
    pub cv_in: [f32; MAX_CV_PORTS],
    pub cv_out: [f32; MAX_CV_PORTS],
    pub gate_in: u32,
    pub gate_out: u32,
}

impl ControlBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a single gate input bit.
    #[inline]
    pub fn gate_in_state(&self, port: usize) -> bool {
        self.gate_in & (1 << port) != 0
    }

    /// Set or clear a single gate output bit.
    #[inline]
    pub fn set_gate_out(&mut self, port: usize, high: bool) {
        if high {
            self.gate_out |= 1 << port;
        } else {
            self.gate_out &= !(1 << port);
        }
    }
}

/// Musical time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { numerator: 4, denominator: 4 }
    }
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self { numerator, denominator }
    }

    /// Beats (quarter notes) per bar under this signature.
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * 4.0 / self.denominator as f64
    }
}

/// Playback state of the transport. `Stopped` means audio still flows but
/// sequencer-like processors should hold their position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PlayingMode {
    #[default]
    Stopped = 0,
    Playing = 1,
    Recording = 2,
}

impl PlayingMode {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => PlayingMode::Playing,
            2 => PlayingMode::Recording,
            _ => PlayingMode::Stopped,
        }
    }
}

/// Source of tempo and beat synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SyncMode {
    #[default]
    Internal = 0,
    Midi = 1,
    Link = 2,
    GateInput = 3,
}

impl SyncMode {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SyncMode::Midi,
            2 => SyncMode::Link,
            3 => SyncMode::GateInput,
            _ => SyncMode::Internal,
        }
    }
}
