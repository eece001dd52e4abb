//! The event plane
//!
//! Two parallel taxonomies cross the engine:
//!
//! - [`Event`]: heap-friendly control messages exchanged between non-RT
//!   threads through the dispatcher. May carry strings, closures and
//!   completion callbacks.
//! - [`rt::RtEvent`]: fixed-size messages for the audio thread, moved by
//!   value through wait-free rings.
//!
//! An [`Event`] that targets the audio thread is converted exactly once, at
//! the dispatcher boundary, and the original is destroyed off the audio
//! thread.

pub mod queue;
pub mod rt;

use crate::types::{ObjectId, PlayingMode, SyncMode, TimeSignature};

use rt::{RtEvent, IMMEDIATE_PROCESS};

/// Outcome reported to an event's completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Delivered to its receiver or queued to the audio thread
    Handled,
    /// No receiver with the given id was registered
    UnknownReceiver,
}

/// Callback invoked on the dispatcher thread after an event is delivered.
pub type CompletionCallback = Box<dyn FnOnce(EventStatus) + Send>;

/// Work executed on the dispatcher thread on behalf of a processor; the
/// returned status is fed back to the processor as an async-work
/// completion event.
pub type AsyncWorkCallback = Box<dyn FnOnce() -> i32 + Send>;

/// A keyboard-style control message (MIDI semantics without MIDI framing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardEvent {
    pub kind: KeyboardEventKind,
    pub channel: u8,
    pub note: u8,
    /// Velocity for note events, bend/wheel position for controllers
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyboardEventKind {
    NoteOn,
    NoteOff,
    NoteAftertouch,
    PitchBend,
    Modulation,
    Aftertouch,
    WrappedMidi([u8; 3]),
}

/// Payload of a non-RT [`Event`].
pub enum EventKind {
    // Control plane -> audio thread
    ParameterChange { parameter: ObjectId, normalized: f32 },
    PropertyChange { property: ObjectId, value: String },
    DataPropertyChange { property: ObjectId, value: Vec<u8> },
    Keyboard(KeyboardEvent),
    SetTempo(f32),
    SetTimeSignature(TimeSignature),
    SetPlayingMode(PlayingMode),
    SetSyncMode(SyncMode),
    AsyncWorkCompletion { work_id: u64, status: i32 },

    // Structural requests, delivered to a registered poster
    AddTrack { name: String, channels: usize },
    RemoveTrack { name: String },
    AddProcessor { uid: String, name: String, track: String },
    RemoveProcessor { name: String, track: String },

    // Work executed on the dispatcher thread
    AsyncWork { work_id: u64, callback: AsyncWorkCallback },

    // Notifications fanned out to subscribers
    ParameterChangeNotification { parameter: ObjectId, normalized: f32, domain: f32 },
    ClippingNotification { channel: usize, input: bool },
}

impl std::fmt::Debug for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::ParameterChange { parameter, normalized } => f
                .debug_struct("ParameterChange")
                .field("parameter", parameter)
                .field("normalized", normalized)
                .finish(),
            EventKind::PropertyChange { property, .. } => {
                f.debug_struct("PropertyChange").field("property", property).finish()
            }
            EventKind::DataPropertyChange { property, .. } => {
                f.debug_struct("DataPropertyChange").field("property", property).finish()
            }
            EventKind::Keyboard(event) => f.debug_tuple("Keyboard").field(event).finish(),
            EventKind::SetTempo(tempo) => f.debug_tuple("SetTempo").field(tempo).finish(),
            EventKind::SetTimeSignature(ts) => f.debug_tuple("SetTimeSignature").field(ts).finish(),
            EventKind::SetPlayingMode(mode) => f.debug_tuple("SetPlayingMode").field(mode).finish(),
            EventKind::SetSyncMode(mode) => f.debug_tuple("SetSyncMode").field(mode).finish(),
            EventKind::AsyncWorkCompletion { work_id, status } => f
                .debug_struct("AsyncWorkCompletion")
                .field("work_id", work_id)
                .field("status", status)
                .finish(),
            EventKind::AddTrack { name, channels } => f
                .debug_struct("AddTrack")
                .field("name", name)
                .field("channels", channels)
                .finish(),
            EventKind::RemoveTrack { name } => {
                f.debug_struct("RemoveTrack").field("name", name).finish()
            }
            EventKind::AddProcessor { uid, name, track } => f
                .debug_struct("AddProcessor")
                .field("uid", uid)
                .field("name", name)
                .field("track", track)
                .finish(),
            EventKind::RemoveProcessor { name, track } => f
                .debug_struct("RemoveProcessor")
                .field("name", name)
                .field("track", track)
                .finish(),
            EventKind::AsyncWork { work_id, .. } => {
                f.debug_struct("AsyncWork").field("work_id", work_id).finish()
            }
            EventKind::ParameterChangeNotification { parameter, normalized, domain } => f
                .debug_struct("ParameterChangeNotification")
                .field("parameter", parameter)
                .field("normalized", normalized)
                .field("domain", domain)
                .finish(),
            EventKind::ClippingNotification { channel, input } => f
                .debug_struct("ClippingNotification")
                .field("channel", channel)
                .field("input", input)
                .finish(),
        }
    }
}

/// A non-RT control message.
pub struct Event {
    /// Processor or poster this event is addressed to
    receiver: Option<ObjectId>,
    kind: EventKind,
    completion: Option<CompletionCallback>,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("receiver", &self.receiver)
            .field("kind", &self.kind)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self { receiver: None, kind, completion: None }
    }

    pub fn with_receiver(mut self, receiver: ObjectId) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn with_completion(mut self, callback: CompletionCallback) -> Self {
        self.completion = Some(callback);
        self
    }

    pub fn receiver(&self) -> Option<ObjectId> {
        self.receiver
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub(crate) fn into_kind(self) -> EventKind {
        self.kind
    }

    pub(crate) fn take_completion(&mut self) -> Option<CompletionCallback> {
        self.completion.take()
    }

    /// Convenience constructors mirroring the common control operations.
    pub fn parameter_change(processor: ObjectId, parameter: ObjectId, normalized: f32) -> Self {
        Event::new(EventKind::ParameterChange { parameter, normalized }).with_receiver(processor)
    }

    pub fn property_change(processor: ObjectId, property: ObjectId, value: String) -> Self {
        Event::new(EventKind::PropertyChange { property, value }).with_receiver(processor)
    }

    pub fn keyboard(processor: ObjectId, event: KeyboardEvent) -> Self {
        Event::new(EventKind::Keyboard(event)).with_receiver(processor)
    }

    pub fn tempo(tempo: f32) -> Self {
        Event::new(EventKind::SetTempo(tempo))
    }

    /// Whether this event has a real-time representation.
    pub fn maps_to_rt_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ParameterChange { .. }
                | EventKind::PropertyChange { .. }
                | EventKind::DataPropertyChange { .. }
                | EventKind::Keyboard(_)
                | EventKind::SetTempo(_)
                | EventKind::SetTimeSignature(_)
                | EventKind::SetPlayingMode(_)
                | EventKind::SetSyncMode(_)
                | EventKind::AsyncWorkCompletion { .. }
        )
    }

    /// Convert into the real-time representation, consuming the payload.
    ///
    /// Returns `None` for kinds without an RT mapping, or for addressed
    /// kinds missing a receiver.
    pub fn to_rt_event(self) -> Option<RtEvent> {
        let receiver = self.receiver;
        match self.kind {
            EventKind::ParameterChange { parameter, normalized } => {
                Some(RtEvent::float_parameter_change(receiver?, parameter, normalized))
            }
            EventKind::PropertyChange { property, value } => Some(RtEvent::StringPropertyChange {
                processor: receiver?,
                property,
                value: value.into_boxed_str(),
                time: IMMEDIATE_PROCESS,
            }),
            EventKind::DataPropertyChange { property, value } => Some(RtEvent::DataPropertyChange {
                processor: receiver?,
                property,
                value: value.into_boxed_slice(),
                time: IMMEDIATE_PROCESS,
            }),
            EventKind::Keyboard(event) => {
                let processor = receiver?;
                let KeyboardEvent { kind, channel, note, value } = event;
                Some(match kind {
                    KeyboardEventKind::NoteOn => RtEvent::note_on(processor, channel, note, value),
                    KeyboardEventKind::NoteOff => {
                        RtEvent::note_off(processor, channel, note, value)
                    }
                    KeyboardEventKind::NoteAftertouch => RtEvent::NoteAftertouch {
                        processor,
                        channel,
                        note,
                        value,
                        time: IMMEDIATE_PROCESS,
                    },
                    KeyboardEventKind::PitchBend => {
                        RtEvent::PitchBend { processor, channel, value, time: IMMEDIATE_PROCESS }
                    }
                    KeyboardEventKind::Modulation => {
                        RtEvent::Modulation { processor, channel, value, time: IMMEDIATE_PROCESS }
                    }
                    KeyboardEventKind::Aftertouch => {
                        RtEvent::Aftertouch { processor, channel, value, time: IMMEDIATE_PROCESS }
                    }
                    KeyboardEventKind::WrappedMidi(data) => {
                        RtEvent::WrappedMidi { processor, data, time: IMMEDIATE_PROCESS }
                    }
                })
            }
            EventKind::SetTempo(tempo) => {
                Some(RtEvent::TempoChange { tempo, time: IMMEDIATE_PROCESS })
            }
            EventKind::SetTimeSignature(signature) => {
                Some(RtEvent::TimeSignatureChange { signature, time: IMMEDIATE_PROCESS })
            }
            EventKind::SetPlayingMode(mode) => {
                Some(RtEvent::PlayingModeChange { mode, time: IMMEDIATE_PROCESS })
            }
            EventKind::SetSyncMode(mode) => {
                Some(RtEvent::SyncModeChange { mode, time: IMMEDIATE_PROCESS })
            }
            EventKind::AsyncWorkCompletion { work_id, status } => {
                Some(RtEvent::AsyncWorkCompletion {
                    processor: receiver?,
                    work_id,
                    status,
                    time: IMMEDIATE_PROCESS,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rt_mapping() {
        let event = Event::parameter_change(7, 3, 0.5);
        assert!(event.maps_to_rt_event());
        match event.to_rt_event() {
            Some(RtEvent::FloatParameterChange { processor, parameter, value, .. }) => {
                assert_eq!(processor, 7);
                assert_eq!(parameter, 3);
                assert_eq!(value, 0.5);
            }
            other => panic!("unexpected conversion: {:?}", other),
        }
    }

    #[test]
    fn test_structural_events_have_no_rt_mapping() {
        let event = Event::new(EventKind::AddTrack { name: "main".into(), channels: 2 });
        assert!(!event.maps_to_rt_event());
        assert!(event.to_rt_event().is_none());
    }

    #[test]
    fn test_property_change_moves_string_ownership() {
        let event = Event::property_change(1, 2, "hello".to_string());
        match event.to_rt_event() {
            Some(RtEvent::StringPropertyChange { value, .. }) => {
                assert_eq!(&*value, "hello");
            }
            other => panic!("unexpected conversion: {:?}", other),
        }
    }
}
