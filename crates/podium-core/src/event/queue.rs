//! Wait-free event queues for the audio thread
//!
//! Thin typed wrappers over `rtrb` single-producer/single-consumer rings.
//! Push and pop are O(1), never block, and never allocate. A full queue is
//! a reported error, not a silent drop: producers get the event back and
//! decide what to do with it off the audio thread.

use crate::error::EngineError;
use crate::event::rt::RtEvent;

/// Default capacity of an RT event queue. Large enough for bursty graph
/// edits and dense automation without growing the memory footprint much.
pub const RT_QUEUE_CAPACITY: usize = 512;

/// Create a new RT event queue with the given capacity.
pub fn rt_event_channel(capacity: usize) -> (RtEventProducer, RtEventConsumer) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    (RtEventProducer { inner: producer }, RtEventConsumer { inner: consumer })
}

/// Create a new RT event queue with [`RT_QUEUE_CAPACITY`].
pub fn default_rt_event_channel() -> (RtEventProducer, RtEventConsumer) {
    rt_event_channel(RT_QUEUE_CAPACITY)
}

/// Producer half of an RT event queue.
pub struct RtEventProducer {
    inner: rtrb::Producer<RtEvent>,
}

impl RtEventProducer {
    /// Push an event, returning it inside [`EngineError::QueueFull`] if the
    /// ring is full.
    pub fn push(&mut self, event: RtEvent) -> Result<(), (EngineError, RtEvent)> {
        match self.inner.push(event) {
            Ok(()) => Ok(()),
            Err(rtrb::PushError::Full(event)) => Err((EngineError::QueueFull, event)),
        }
    }

    /// Number of free slots.
    pub fn slots(&self) -> usize {
        self.inner.slots()
    }
}

/// Consumer half of an RT event queue.
pub struct RtEventConsumer {
    inner: rtrb::Consumer<RtEvent>,
}

impl RtEventConsumer {
    /// Pop the next event, if any.
    pub fn pop(&mut self) -> Option<RtEvent> {
        self.inner.pop().ok()
    }

    /// Timestamp of the next event without consuming it.
    pub fn peek_time(&self) -> Option<u64> {
        self.inner.peek().ok().map(|event| event.time())
    }

    /// True if no events are waiting.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Event output endpoint handed to processors during audio processing.
///
/// Wraps a producer with a small pre-allocated spill buffer so that a full
/// ring never forces a drop (and therefore a free) on the audio thread:
/// spilled events are retried on the next flush, oldest first.
pub struct RtEventSink {
    producer: RtEventProducer,
    spill: std::collections::VecDeque<RtEvent>,
    overflows: u32,
}

/// Spill capacity reserved up front; pushes beyond ring + spill are counted
/// and surfaced through [`RtEventSink::take_overflows`].
const SINK_SPILL_CAPACITY: usize = 64;

impl RtEventSink {
    pub fn new(producer: RtEventProducer) -> Self {
        Self {
            producer,
            spill: std::collections::VecDeque::with_capacity(SINK_SPILL_CAPACITY),
            overflows: 0,
        }
    }

    /// Push an event towards the queue. Never blocks, never allocates.
    pub fn push(&mut self, event: RtEvent) {
        self.flush();
        match self.producer.push(event) {
            Ok(()) => {}
            Err((_, event)) => {
                if self.spill.len() < SINK_SPILL_CAPACITY {
                    self.spill.push_back(event);
                } else {
                    // Consumer stalled well beyond queue + spill capacity;
                    // the event is lost and the loss is counted.
                    self.overflows = self.overflows.saturating_add(1);
                }
            }
        }
    }

    /// Retry spilled events in order. Called at chunk boundaries.
    pub fn flush(&mut self) {
        while let Some(event) = self.spill.pop_front() {
            if let Err((_, event)) = self.producer.push(event) {
                self.spill.push_front(event);
                break;
            }
        }
    }

    /// Number of events lost since the last call, resetting the counter.
    pub fn take_overflows(&mut self) -> u32 {
        std::mem::take(&mut self.overflows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_order() {
        let (mut tx, mut rx) = rt_event_channel(8);
        tx.push(RtEvent::note_on(1, 0, 60, 1.0)).unwrap();
        tx.push(RtEvent::note_off(1, 0, 60, 0.0)).unwrap();

        assert!(matches!(rx.pop(), Some(RtEvent::NoteOn { note: 60, .. })));
        assert!(matches!(rx.pop(), Some(RtEvent::NoteOff { note: 60, .. })));
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_full_queue_reports_error() {
        let (mut tx, _rx) = rt_event_channel(2);
        tx.push(RtEvent::note_on(1, 0, 60, 1.0)).unwrap();
        tx.push(RtEvent::note_on(1, 0, 61, 1.0)).unwrap();

        let result = tx.push(RtEvent::note_on(1, 0, 62, 1.0));
        let (error, returned) = result.unwrap_err();
        assert_eq!(error, EngineError::QueueFull);
        assert!(matches!(returned, RtEvent::NoteOn { note: 62, .. }));
    }

    #[test]
    fn test_peek_time() {
        let (mut tx, rx) = rt_event_channel(4);
        assert_eq!(rx.peek_time(), None);
        tx.push(RtEvent::TempoChange { tempo: 100.0, time: 1024 }).unwrap();
        assert_eq!(rx.peek_time(), Some(1024));
    }

    #[test]
    fn test_sink_spills_and_recovers() {
        let (tx, mut rx) = rt_event_channel(2);
        let mut sink = RtEventSink::new(tx);

        for note in 0..4 {
            sink.push(RtEvent::note_on(1, 0, note, 1.0));
        }
        assert_eq!(sink.take_overflows(), 0);

        // Drain the ring, flush the spill, and the remaining events arrive
        // in their original order.
        let mut notes = Vec::new();
        while let Some(RtEvent::NoteOn { note, .. }) = rx.pop() {
            notes.push(note);
        }
        sink.flush();
        while let Some(RtEvent::NoteOn { note, .. }) = rx.pop() {
            notes.push(note);
        }
        assert_eq!(notes, vec![0, 1, 2, 3]);
    }
}
