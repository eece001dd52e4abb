//! Real-time events
//!
//! [`RtEvent`] is the only message type that crosses into the audio thread.
//! Events are moved by value through wait-free rings; the enum stays small
//! so a push is a short memcpy, and anything bigger than a pointer rides in
//! a `Box` allocated by the non-RT side.
//!
//! # Heap discipline
//!
//! The audio thread never allocates or frees. String and data property
//! changes carry an owning `Box` in; the receiving processor moves the box
//! into a paired [`RtEvent::StringDelete`] / [`RtEvent::DataDelete`] event
//! on its output queue, and the dispatcher drops it on its own thread.
//! Processors and whole tracks move through the rings the same way when the
//! graph is edited while audio is running.

use crate::processor::Processor;
use crate::track::Track;
use crate::types::{ObjectId, PlayingMode, SyncMode, TimeSignature};

/// Timestamp value meaning "process in the current chunk".
pub const IMMEDIATE_PROCESS: u64 = 0;

/// A control message for the audio thread.
///
/// `time` fields hold an absolute sample count; the engine admits an event
/// into a chunk when its timestamp is at or before the chunk end, in FIFO
/// order, with no sub-chunk splitting.
pub enum RtEvent {
    // ─────────────────────────────────────────────────────────────
    // Keyboard
    // ─────────────────────────────────────────────────────────────
    NoteOn { processor: ObjectId, channel: u8, note: u8, velocity: f32, time: u64 },
    NoteOff { processor: ObjectId, channel: u8, note: u8, velocity: f32, time: u64 },
    NoteAftertouch { processor: ObjectId, channel: u8, note: u8, value: f32, time: u64 },
    PitchBend { processor: ObjectId, channel: u8, value: f32, time: u64 },
    Modulation { processor: ObjectId, channel: u8, value: f32, time: u64 },
    Aftertouch { processor: ObjectId, channel: u8, value: f32, time: u64 },
    /// Raw 3-byte MIDI message passed through to a wrapped plugin
    WrappedMidi { processor: ObjectId, data: [u8; 3], time: u64 },

    // ─────────────────────────────────────────────────────────────
    // Parameters
    // ─────────────────────────────────────────────────────────────
    BoolParameterChange { processor: ObjectId, parameter: ObjectId, value: bool, time: u64 },
    IntParameterChange { processor: ObjectId, parameter: ObjectId, value: i32, time: u64 },
    /// Value is normalized to `[0, 1]`
    FloatParameterChange { processor: ObjectId, parameter: ObjectId, value: f32, time: u64 },

    // ─────────────────────────────────────────────────────────────
    // Properties (heap ownership rides the queue both ways)
    // ─────────────────────────────────────────────────────────────
    StringPropertyChange { processor: ObjectId, property: ObjectId, value: Box<str>, time: u64 },
    /// Returns string ownership to the non-RT side for deallocation
    StringDelete { value: Box<str> },
    DataPropertyChange { processor: ObjectId, property: ObjectId, value: Box<[u8]>, time: u64 },
    /// Returns blob ownership to the non-RT side for deallocation
    DataDelete { value: Box<[u8]> },

    // ─────────────────────────────────────────────────────────────
    // Processor control
    // ─────────────────────────────────────────────────────────────
    SetBypass { processor: ObjectId, bypassed: bool, time: u64 },

    // ─────────────────────────────────────────────────────────────
    // Notifications (audio thread -> dispatcher)
    // ─────────────────────────────────────────────────────────────
    ParameterChangeNotification {
        processor: ObjectId,
        parameter: ObjectId,
        normalized: f32,
        domain: f32,
        time: u64,
    },
    ClippingNotification { channel: u16, input: bool, time: u64 },

    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────
    TempoChange { tempo: f32, time: u64 },
    TimeSignatureChange { signature: TimeSignature, time: u64 },
    PlayingModeChange { mode: PlayingMode, time: u64 },
    SyncModeChange { mode: SyncMode, time: u64 },

    // ─────────────────────────────────────────────────────────────
    // Graph edits (non-RT -> audio thread, acknowledged back)
    // ─────────────────────────────────────────────────────────────
    /// Hand a processor to the audio thread and splice it into a track.
    /// Boxed: the DSP object moves, it is never copied or reallocated.
    InsertProcessor {
        track: ObjectId,
        before: Option<ObjectId>,
        processor: Box<dyn Processor>,
        op: u64,
    },
    RemoveProcessor { track: ObjectId, processor: ObjectId, op: u64 },
    InsertTrack { track: Box<Track>, op: u64 },
    RemoveTrack { track: ObjectId, op: u64 },

    // ─────────────────────────────────────────────────────────────
    // Graph edit results (audio thread -> dispatcher)
    // ─────────────────────────────────────────────────────────────
    /// A processor removed from a track, moving back to the container
    ProcessorReturned { processor: Box<dyn Processor>, op: u64 },
    /// A track removed from the graph, moving back for disposal
    TrackReturned { track: Box<Track>, op: u64 },
    /// Acknowledgement of a graph edit that does not return an object
    OpCompleted { op: u64, success: bool },

    // ─────────────────────────────────────────────────────────────
    // Async work
    // ─────────────────────────────────────────────────────────────
    AsyncWorkCompletion { processor: ObjectId, work_id: u64, status: i32, time: u64 },

    /// Request the realtime state machine to leave RUNNING
    StopEngine,
}

impl std::fmt::Debug for RtEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtEvent::NoteOn { processor, channel, note, velocity, time } => write!(
                f,
                "NoteOn {{ processor: {}, channel: {}, note: {}, velocity: {}, time: {} }}",
                processor, channel, note, velocity, time
            ),
            RtEvent::NoteOff { processor, channel, note, velocity, time } => write!(
                f,
                "NoteOff {{ processor: {}, channel: {}, note: {}, velocity: {}, time: {} }}",
                processor, channel, note, velocity, time
            ),
            RtEvent::NoteAftertouch { processor, note, value, .. } => write!(
                f,
                "NoteAftertouch {{ processor: {}, note: {}, value: {} }}",
                processor, note, value
            ),
            RtEvent::PitchBend { processor, value, .. } => {
                write!(f, "PitchBend {{ processor: {}, value: {} }}", processor, value)
            }
            RtEvent::Modulation { processor, value, .. } => {
                write!(f, "Modulation {{ processor: {}, value: {} }}", processor, value)
            }
            RtEvent::Aftertouch { processor, value, .. } => {
                write!(f, "Aftertouch {{ processor: {}, value: {} }}", processor, value)
            }
            RtEvent::WrappedMidi { processor, data, .. } => {
                write!(f, "WrappedMidi {{ processor: {}, data: {:?} }}", processor, data)
            }
            RtEvent::BoolParameterChange { processor, parameter, value, .. } => write!(
                f,
                "BoolParameterChange {{ processor: {}, parameter: {}, value: {} }}",
                processor, parameter, value
            ),
            RtEvent::IntParameterChange { processor, parameter, value, .. } => write!(
                f,
                "IntParameterChange {{ processor: {}, parameter: {}, value: {} }}",
                processor, parameter, value
            ),
            RtEvent::FloatParameterChange { processor, parameter, value, .. } => write!(
                f,
                "FloatParameterChange {{ processor: {}, parameter: {}, value: {} }}",
                processor, parameter, value
            ),
            RtEvent::StringPropertyChange { processor, property, .. } => write!(
                f,
                "StringPropertyChange {{ processor: {}, property: {} }}",
                processor, property
            ),
            RtEvent::StringDelete { .. } => write!(f, "StringDelete"),
            RtEvent::DataPropertyChange { processor, property, .. } => {
                write!(f, "DataPropertyChange {{ processor: {}, property: {} }}", processor, property)
            }
            RtEvent::DataDelete { .. } => write!(f, "DataDelete"),
            RtEvent::SetBypass { processor, bypassed, .. } => {
                write!(f, "SetBypass {{ processor: {}, bypassed: {} }}", processor, bypassed)
            }
            RtEvent::ParameterChangeNotification { processor, parameter, normalized, domain, .. } => {
                write!(
                    f,
                    "ParameterChangeNotification {{ processor: {}, parameter: {}, normalized: {}, domain: {} }}",
                    processor, parameter, normalized, domain
                )
            }
            RtEvent::ClippingNotification { channel, input, .. } => {
                write!(f, "ClippingNotification {{ channel: {}, input: {} }}", channel, input)
            }
            RtEvent::TempoChange { tempo, time } => {
                write!(f, "TempoChange {{ tempo: {}, time: {} }}", tempo, time)
            }
            RtEvent::TimeSignatureChange { signature, .. } => {
                write!(f, "TimeSignatureChange {{ signature: {:?} }}", signature)
            }
            RtEvent::PlayingModeChange { mode, .. } => {
                write!(f, "PlayingModeChange {{ mode: {:?} }}", mode)
            }
            RtEvent::SyncModeChange { mode, .. } => {
                write!(f, "SyncModeChange {{ mode: {:?} }}", mode)
            }
            RtEvent::InsertProcessor { track, op, .. } => {
                write!(f, "InsertProcessor {{ track: {}, op: {} }}", track, op)
            }
            RtEvent::RemoveProcessor { track, processor, op } => write!(
                f,
                "RemoveProcessor {{ track: {}, processor: {}, op: {} }}",
                track, processor, op
            ),
            RtEvent::InsertTrack { op, .. } => write!(f, "InsertTrack {{ op: {} }}", op),
            RtEvent::RemoveTrack { track, op } => {
                write!(f, "RemoveTrack {{ track: {}, op: {} }}", track, op)
            }
            RtEvent::ProcessorReturned { op, .. } => {
                write!(f, "ProcessorReturned {{ op: {} }}", op)
            }
            RtEvent::TrackReturned { op, .. } => write!(f, "TrackReturned {{ op: {} }}", op),
            RtEvent::OpCompleted { op, success } => {
                write!(f, "OpCompleted {{ op: {}, success: {} }}", op, success)
            }
            RtEvent::AsyncWorkCompletion { processor, work_id, status, .. } => write!(
                f,
                "AsyncWorkCompletion {{ processor: {}, work_id: {}, status: {} }}",
                processor, work_id, status
            ),
            RtEvent::StopEngine => write!(f, "StopEngine"),
        }
    }
}

impl RtEvent {
    /// Absolute sample timestamp, or [`IMMEDIATE_PROCESS`] for events that
    /// are not time-tagged.
    pub fn time(&self) -> u64 {
        match self {
            RtEvent::NoteOn { time, .. }
            | RtEvent::NoteOff { time, .. }
            | RtEvent::NoteAftertouch { time, .. }
            | RtEvent::PitchBend { time, .. }
            | RtEvent::Modulation { time, .. }
            | RtEvent::Aftertouch { time, .. }
            | RtEvent::WrappedMidi { time, .. }
            | RtEvent::BoolParameterChange { time, .. }
            | RtEvent::IntParameterChange { time, .. }
            | RtEvent::FloatParameterChange { time, .. }
            | RtEvent::StringPropertyChange { time, .. }
            | RtEvent::DataPropertyChange { time, .. }
            | RtEvent::SetBypass { time, .. }
            | RtEvent::ParameterChangeNotification { time, .. }
            | RtEvent::ClippingNotification { time, .. }
            | RtEvent::TempoChange { time, .. }
            | RtEvent::TimeSignatureChange { time, .. }
            | RtEvent::PlayingModeChange { time, .. }
            | RtEvent::SyncModeChange { time, .. }
            | RtEvent::AsyncWorkCompletion { time, .. } => *time,
            _ => IMMEDIATE_PROCESS,
        }
    }

    /// The processor this event is addressed to, if any.
    pub fn receiver(&self) -> Option<ObjectId> {
        match self {
            RtEvent::NoteOn { processor, .. }
            | RtEvent::NoteOff { processor, .. }
            | RtEvent::NoteAftertouch { processor, .. }
            | RtEvent::PitchBend { processor, .. }
            | RtEvent::Modulation { processor, .. }
            | RtEvent::Aftertouch { processor, .. }
            | RtEvent::WrappedMidi { processor, .. }
            | RtEvent::BoolParameterChange { processor, .. }
            | RtEvent::IntParameterChange { processor, .. }
            | RtEvent::FloatParameterChange { processor, .. }
            | RtEvent::StringPropertyChange { processor, .. }
            | RtEvent::DataPropertyChange { processor, .. }
            | RtEvent::SetBypass { processor, .. }
            | RtEvent::AsyncWorkCompletion { processor, .. } => Some(*processor),
            _ => None,
        }
    }

    /// Duplicate an event that carries no heap ownership. Returns `None`
    /// for variants whose payload can only be moved.
    pub fn try_clone(&self) -> Option<RtEvent> {
        match self {
            RtEvent::NoteOn { processor, channel, note, velocity, time } => Some(RtEvent::NoteOn {
                processor: *processor,
                channel: *channel,
                note: *note,
                velocity: *velocity,
                time: *time,
            }),
            RtEvent::NoteOff { processor, channel, note, velocity, time } => {
                Some(RtEvent::NoteOff {
                    processor: *processor,
                    channel: *channel,
                    note: *note,
                    velocity: *velocity,
                    time: *time,
                })
            }
            RtEvent::NoteAftertouch { processor, channel, note, value, time } => {
                Some(RtEvent::NoteAftertouch {
                    processor: *processor,
                    channel: *channel,
                    note: *note,
                    value: *value,
                    time: *time,
                })
            }
            RtEvent::PitchBend { processor, channel, value, time } => Some(RtEvent::PitchBend {
                processor: *processor,
                channel: *channel,
                value: *value,
                time: *time,
            }),
            RtEvent::Modulation { processor, channel, value, time } => Some(RtEvent::Modulation {
                processor: *processor,
                channel: *channel,
                value: *value,
                time: *time,
            }),
            RtEvent::Aftertouch { processor, channel, value, time } => Some(RtEvent::Aftertouch {
                processor: *processor,
                channel: *channel,
                value: *value,
                time: *time,
            }),
            RtEvent::WrappedMidi { processor, data, time } => {
                Some(RtEvent::WrappedMidi { processor: *processor, data: *data, time: *time })
            }
            RtEvent::BoolParameterChange { processor, parameter, value, time } => {
                Some(RtEvent::BoolParameterChange {
                    processor: *processor,
                    parameter: *parameter,
                    value: *value,
                    time: *time,
                })
            }
            RtEvent::IntParameterChange { processor, parameter, value, time } => {
                Some(RtEvent::IntParameterChange {
                    processor: *processor,
                    parameter: *parameter,
                    value: *value,
                    time: *time,
                })
            }
            RtEvent::FloatParameterChange { processor, parameter, value, time } => {
                Some(RtEvent::FloatParameterChange {
                    processor: *processor,
                    parameter: *parameter,
                    value: *value,
                    time: *time,
                })
            }
            RtEvent::SetBypass { processor, bypassed, time } => Some(RtEvent::SetBypass {
                processor: *processor,
                bypassed: *bypassed,
                time: *time,
            }),
            _ => None,
        }
    }

    pub fn note_on(processor: ObjectId, channel: u8, note: u8, velocity: f32) -> Self {
        RtEvent::NoteOn { processor, channel, note, velocity, time: IMMEDIATE_PROCESS }
    }

    pub fn note_off(processor: ObjectId, channel: u8, note: u8, velocity: f32) -> Self {
        RtEvent::NoteOff { processor, channel, note, velocity, time: IMMEDIATE_PROCESS }
    }

    pub fn float_parameter_change(processor: ObjectId, parameter: ObjectId, value: f32) -> Self {
        RtEvent::FloatParameterChange { processor, parameter, value, time: IMMEDIATE_PROCESS }
    }

    pub fn int_parameter_change(processor: ObjectId, parameter: ObjectId, value: i32) -> Self {
        RtEvent::IntParameterChange { processor, parameter, value, time: IMMEDIATE_PROCESS }
    }

    pub fn bool_parameter_change(processor: ObjectId, parameter: ObjectId, value: bool) -> Self {
        RtEvent::BoolParameterChange { processor, parameter, value, time: IMMEDIATE_PROCESS }
    }
}
